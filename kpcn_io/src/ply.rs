//! PLY point cloud files.
//!
//! Writes `binary_little_endian 1.0` files with a single `vertex` element and
//! three `float` properties `x`, `y`, `z`. The reader accepts the same subset,
//! plus the ASCII variant.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use kpcn_core::{Point3, PointSet};

use crate::error::{payload_len, KpcnIoError, Result};

const PROPERTIES: [&str; 3] = ["x", "y", "z"];

#[derive(Debug, Clone, Copy, PartialEq)]
enum PlyEncoding {
    Ascii,
    BinaryLittleEndian,
}

/// Write points as a binary little-endian PLY stream.
pub fn write_ply<W: Write>(points: &[Point3], writer: &mut W) -> Result<()> {
    write!(
        writer,
        "ply\nformat binary_little_endian 1.0\nelement vertex {}\n",
        points.len()
    )?;
    for name in PROPERTIES {
        writeln!(writer, "property float {}", name)?;
    }
    writer.write_all(b"end_header\n")?;

    for p in points {
        for v in p.as_array() {
            writer.write_all(&v.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Read an `x y z` point cloud from a PLY stream.
pub fn read_ply<R: BufRead>(reader: &mut R) -> Result<PointSet> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim_end() != "ply" {
        return Err(KpcnIoError::format("missing 'ply' magic line"));
    }

    let mut encoding = None;
    let mut vertex_count = None;
    let mut properties = Vec::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(KpcnIoError::format("unexpected end of header"));
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["end_header"] => break,
            ["format", "ascii", _] => encoding = Some(PlyEncoding::Ascii),
            ["format", "binary_little_endian", _] => {
                encoding = Some(PlyEncoding::BinaryLittleEndian)
            }
            ["format", other, _] => {
                return Err(KpcnIoError::format(format!("unsupported encoding {}", other)))
            }
            ["element", "vertex", count] => {
                let count = count
                    .parse::<usize>()
                    .map_err(|_| KpcnIoError::format("invalid vertex count"))?;
                vertex_count = Some(count);
            }
            ["element", other, _] => {
                return Err(KpcnIoError::format(format!("unexpected element {}", other)))
            }
            ["property", "float", name] => properties.push(name.to_string()),
            ["property", ..] => {
                return Err(KpcnIoError::UnsupportedLayout {
                    message: "only float vertex properties are supported",
                })
            }
            ["comment", ..] | [] => {}
            _ => {
                return Err(KpcnIoError::format(format!(
                    "unrecognised header line '{}'",
                    line.trim_end()
                )))
            }
        }
    }

    if properties != PROPERTIES {
        return Err(KpcnIoError::UnsupportedLayout {
            message: "expected exactly the x, y, z properties",
        });
    }
    let encoding = encoding.ok_or_else(|| KpcnIoError::format("missing format line"))?;
    let count = vertex_count.ok_or_else(|| KpcnIoError::format("missing vertex element"))?;
    let len = payload_len(&[count, 3])?;

    let values = match encoding {
        PlyEncoding::BinaryLittleEndian => {
            let mut raw = Vec::new();
            reader.by_ref().take(len as u64).read_to_end(&mut raw)?;
            if raw.len() != len {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
            raw.chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect::<Vec<f32>>()
        }
        PlyEncoding::Ascii => {
            let mut body = String::new();
            reader.read_to_string(&mut body)?;
            let values = body
                .split_whitespace()
                .take(len / 4)
                .map(|t| t.parse::<f32>())
                .collect::<core::result::Result<Vec<f32>, _>>()
                .map_err(|_| KpcnIoError::format("invalid ascii vertex value"))?;
            if values.len() != len / 4 {
                return Err(KpcnIoError::ShapeMismatch {
                    shape: vec![count, 3],
                    values: values.len(),
                });
            }
            values
        }
    };

    PointSet::from_flat(&values).map_err(|e| KpcnIoError::format(e.to_string()))
}

/// Write points to a PLY file.
pub fn save_ply<P: AsRef<Path>>(points: &[Point3], path: P) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_ply(points, &mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Read a PLY file.
pub fn load_ply<P: AsRef<Path>>(path: P) -> Result<PointSet> {
    let mut reader = BufReader::new(File::open(path)?);
    read_ply(&mut reader)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_header() {
        let mut buffer = Vec::new();
        write_ply(&[Point3::new(1.0, 2.0, 3.0)], &mut buffer).unwrap();

        let header_end = buffer
            .windows(11)
            .position(|w| w == b"end_header\n")
            .unwrap()
            + 11;
        let header = std::str::from_utf8(&buffer[..header_end]).unwrap();
        assert!(header.contains("format binary_little_endian 1.0"));
        assert!(header.contains("element vertex 1"));
        assert_eq!(buffer.len() - header_end, 12);
    }

    #[test]
    fn test_read_back() {
        let points = vec![Point3::new(0.5, -1.0, 2.0), Point3::new(3.0, 0.0, -0.25)];
        let mut buffer = Vec::new();
        write_ply(&points, &mut buffer).unwrap();

        let set = read_ply(&mut buffer.as_slice()).unwrap();
        assert_eq!(set.points(), points.as_slice());
    }

    #[test]
    fn test_read_ascii() {
        let text = "ply\nformat ascii 1.0\ncomment test\nelement vertex 2\n\
                    property float x\nproperty float y\nproperty float z\nend_header\n\
                    0 1 2\n3 4 5\n";
        let set = read_ply(&mut text.as_bytes()).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.points()[1], Point3::new(3.0, 4.0, 5.0));
    }

    #[test]
    fn test_rejects_extra_properties() {
        let text = "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\n\
                    property float y\nproperty float z\nproperty float w\nend_header\n0 0 0 0\n";
        assert!(matches!(
            read_ply(&mut text.as_bytes()),
            Err(KpcnIoError::UnsupportedLayout { .. })
        ));
    }

    #[test]
    fn test_rejects_oversized_vertex_count() {
        let header = format!(
            "ply\nformat binary_little_endian 1.0\nelement vertex {}\nproperty float x\n\
             property float y\nproperty float z\nend_header\n",
            usize::MAX / 2
        );
        assert!(matches!(
            read_ply(&mut header.as_bytes()),
            Err(KpcnIoError::InvalidFormat { .. })
        ));

        let short = "ply\nformat binary_little_endian 1.0\nelement vertex 1000000000\n\
                     property float x\nproperty float y\nproperty float z\nend_header\n\0\0\0\0";
        assert!(matches!(read_ply(&mut short.as_bytes()), Err(KpcnIoError::Io(_))));
    }
}
