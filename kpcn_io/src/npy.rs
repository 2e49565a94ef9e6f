//! NumPy `.npy` arrays of `f32`.
//!
//! Encoding and decoding go through `ndarray-npy`; this module only converts
//! between [`NpyArray`] and an `ndarray` array.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use ndarray::{ArrayD, IxDyn};
use ndarray_npy::{ReadNpyExt, WriteNpyExt};

use crate::error::{element_count, KpcnIoError, Result};

/// A dense f32 array with its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    /// Array shape.
    pub shape: Vec<usize>,
    /// Row-major values.
    pub values: Vec<f32>,
}

impl NpyArray {
    fn into_ndarray(self) -> Result<ArrayD<f32>> {
        let NpyArray { shape, values } = self;
        if element_count(&shape) != Some(values.len()) {
            return Err(KpcnIoError::ShapeMismatch {
                shape,
                values: values.len(),
            });
        }
        ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map_err(|e| KpcnIoError::format(format!("npy shape: {}", e)))
    }

    fn from_ndarray(array: ArrayD<f32>) -> Self {
        Self {
            shape: array.shape().to_vec(),
            // Logical iteration order is row-major even for Fortran-ordered files.
            values: array.iter().copied().collect(),
        }
    }
}

/// Write an array in `.npy` format.
pub fn write_npy<W: Write>(shape: &[usize], values: &[f32], writer: &mut W) -> Result<()> {
    let array = NpyArray {
        shape: shape.to_vec(),
        values: values.to_vec(),
    }
    .into_ndarray()?;

    array
        .write_npy(writer)
        .map_err(|e| KpcnIoError::format(format!("npy write: {}", e)))
}

/// Read an `.npy` array of `f32` values.
pub fn read_npy<R: Read>(reader: &mut R) -> Result<NpyArray> {
    let array = ArrayD::<f32>::read_npy(reader)
        .map_err(|e| KpcnIoError::format(format!("npy read: {}", e)))?;
    Ok(NpyArray::from_ndarray(array))
}

/// Write an array to a `.npy` file.
pub fn save_npy<P: AsRef<Path>>(shape: &[usize], values: &[f32], path: P) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_npy(shape, values, &mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Read a `.npy` file.
pub fn load_npy<P: AsRef<Path>>(path: P) -> Result<NpyArray> {
    let mut reader = BufReader::new(File::open(path)?);
    read_npy(&mut reader)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_numpy_f4() {
        let mut buffer = Vec::new();
        write_npy(&[15, 4, 8], &vec![0.25; 480], &mut buffer).unwrap();

        assert_eq!(&buffer[0..6], b"\x93NUMPY");
        let header_len = u16::from_le_bytes([buffer[8], buffer[9]]) as usize;
        let header = std::str::from_utf8(&buffer[10..10 + header_len]).unwrap();
        assert!(header.contains("'descr': '<f4'"));
        assert!(header.contains("'shape': (15, 4, 8)"));
        assert_eq!(buffer.len(), 10 + header_len + 480 * 4);
        assert_eq!(&buffer[buffer.len() - 4..], &0.25f32.to_le_bytes());
    }

    #[test]
    fn test_read_back() {
        let values: Vec<f32> = (0..6).map(|v| v as f32 * 0.5).collect();
        let mut buffer = Vec::new();
        write_npy(&[2, 3], &values, &mut buffer).unwrap();

        let array = read_npy(&mut buffer.as_slice()).unwrap();
        assert_eq!(array.shape, vec![2, 3]);
        assert_eq!(array.values, values);
    }

    #[test]
    fn test_rejects_shape_mismatch() {
        let mut buffer = Vec::new();
        assert!(matches!(
            write_npy(&[2, 2], &[1.0; 5], &mut buffer),
            Err(KpcnIoError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        let bytes = b"not an npy file at all";
        assert!(matches!(
            read_npy(&mut bytes.as_slice()),
            Err(KpcnIoError::InvalidFormat { .. })
        ));
    }
}
