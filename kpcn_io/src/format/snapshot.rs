//! Binary layout of snapshot variable files.
//!
//! # Format Specification
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │ HEADER (16 bytes, see header.rs)                                   │
//! ├────────────────────────────────────────────────────────────────────┤
//! │ ENTRIES (num_entries times)                                        │
//! │  name_len (u32 LE) | name (UTF-8)                                  │
//! │  rank (u32 LE)     | dims (u64 LE × rank)                          │
//! │  values (f32 LE × product(dims))                                   │
//! └────────────────────────────────────────────────────────────────────┘
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use super::header::{SnapshotHeader, HEADER_SIZE, SNAPSHOT_VERSION};
use crate::error::{element_count, payload_len, KpcnIoError, Result};

/// Upper bound on name length, guards against reading garbage as a length.
const MAX_NAME_LEN: usize = 4096;
/// Upper bound on tensor rank.
const MAX_RANK: usize = 8;

/// One named variable inside a snapshot file.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    /// Scope path of the variable.
    pub name: String,
    /// Shape of the variable.
    pub shape: Vec<usize>,
    /// Row-major values.
    pub values: Vec<f32>,
}

impl SnapshotEntry {
    /// Create an entry, checking that `values` fills `shape`.
    pub fn new(name: impl Into<String>, shape: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        if element_count(&shape) != Some(values.len()) {
            return Err(KpcnIoError::ShapeMismatch {
                shape,
                values: values.len(),
            });
        }
        Ok(Self {
            name: name.into(),
            shape,
            values,
        })
    }
}

/// Write snapshot entries to a writer.
pub fn write_snapshot<W: Write>(entries: &[SnapshotEntry], writer: &mut W) -> Result<()> {
    let header = SnapshotHeader::new(entries.len() as u32);
    writer.write_all(&header.to_bytes())?;

    for entry in entries {
        let name = entry.name.as_bytes();
        writer.write_all(&(name.len() as u32).to_le_bytes())?;
        writer.write_all(name)?;

        writer.write_all(&(entry.shape.len() as u32).to_le_bytes())?;
        for &dim in &entry.shape {
            writer.write_all(&(dim as u64).to_le_bytes())?;
        }
        for &value in &entry.values {
            writer.write_all(&value.to_le_bytes())?;
        }
    }

    Ok(())
}

/// Read snapshot entries from a reader.
pub fn read_snapshot<R: Read>(reader: &mut R) -> Result<Vec<SnapshotEntry>> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;
    let header = SnapshotHeader::from_bytes(&header_bytes);

    if !header.is_valid() {
        return Err(KpcnIoError::format("invalid magic bytes (expected KPCS)"));
    }
    if header.version != SNAPSHOT_VERSION {
        return Err(KpcnIoError::format(format!(
            "unsupported snapshot version {}",
            header.version
        )));
    }

    let mut entries = Vec::with_capacity((header.num_entries as usize).min(1024));
    for _ in 0..header.num_entries {
        let name_len = read_u32(reader)? as usize;
        if name_len > MAX_NAME_LEN {
            return Err(KpcnIoError::format(format!("name length {} too large", name_len)));
        }
        let mut name = vec![0u8; name_len];
        reader.read_exact(&mut name)?;
        let name = String::from_utf8(name)
            .map_err(|_| KpcnIoError::format("variable name is not UTF-8"))?;

        let rank = read_u32(reader)? as usize;
        if rank > MAX_RANK {
            return Err(KpcnIoError::format(format!("rank {} too large", rank)));
        }
        let mut shape = Vec::with_capacity(rank);
        for _ in 0..rank {
            let mut dim = [0u8; 8];
            reader.read_exact(&mut dim)?;
            shape.push(u64::from_le_bytes(dim) as usize);
        }

        // Allocation follows the bytes actually read.
        let len = payload_len(&shape)?;
        let mut raw = Vec::new();
        reader.by_ref().take(len as u64).read_to_end(&mut raw)?;
        if raw.len() != len {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        let values = raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        entries.push(SnapshotEntry {
            name,
            shape,
            values,
        });
    }

    Ok(entries)
}

/// Write snapshot entries to a file.
pub fn save_snapshot_file<P: AsRef<Path>>(entries: &[SnapshotEntry], path: P) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_snapshot(entries, &mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Read snapshot entries from a file.
pub fn load_snapshot_file<P: AsRef<Path>>(path: P) -> Result<Vec<SnapshotEntry>> {
    let mut reader = BufReader::new(File::open(path)?);
    read_snapshot(&mut reader)
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}
