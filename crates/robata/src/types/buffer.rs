use crate::error::{Error, Result};
use super::DataType;

/// # HostBuffer
///
/// Flat, row-major element data living in host memory. Used to move values in
/// and out of a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum HostBuffer {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    U8(Vec<u8>),
}

impl HostBuffer {
    pub fn len(&self) -> usize {
        match self {
            HostBuffer::F32(v) => v.len(),
            HostBuffer::F64(v) => v.len(),
            HostBuffer::I32(v) => v.len(),
            HostBuffer::I64(v) => v.len(),
            HostBuffer::U8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The [`DataType`] these elements carry
    pub fn data_type(&self) -> DataType {
        match self {
            HostBuffer::F32(_) => DataType::Float32,
            HostBuffer::F64(_) => DataType::Float64,
            HostBuffer::I32(_) => DataType::Int32,
            HostBuffer::I64(_) => DataType::Int64,
            HostBuffer::U8(_) => DataType::Uint8,
        }
    }

    /// Widens every element to `f64`
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            HostBuffer::F32(v) => v.iter().map(|&x| x as f64).collect(),
            HostBuffer::F64(v) => v.clone(),
            HostBuffer::I32(v) => v.iter().map(|&x| x as f64).collect(),
            HostBuffer::I64(v) => v.iter().map(|&x| x as f64).collect(),
            HostBuffer::U8(v) => v.iter().map(|&x| x as f64).collect(),
        }
    }

    /// Narrows `values` into a buffer of the given type.
    ///
    /// Booleans are stored as `0`/`1` bytes. Types without a host
    /// representation fail with [`Error::Unsupported`].
    pub fn from_f64(data_type: DataType, values: Vec<f64>) -> Result<Self> {
        Ok(match data_type {
            DataType::Float32 => HostBuffer::F32(values.into_iter().map(|x| x as f32).collect()),
            DataType::Float64 => HostBuffer::F64(values),
            DataType::Int32 => HostBuffer::I32(values.into_iter().map(|x| x as i32).collect()),
            DataType::Int64 => HostBuffer::I64(values.into_iter().map(|x| x as i64).collect()),
            DataType::Uint8 => HostBuffer::U8(values.into_iter().map(|x| x as u8).collect()),
            DataType::Boolean => {
                HostBuffer::U8(values.into_iter().map(|x| u8::from(x != 0.0)).collect())
            }
            other => {
                return Err(Error::Unsupported(format!(
                    "no host buffer for data type {}", other
                )))
            }
        })
    }
}

/// Rust element types that can be copied in and out of an [`NDArray`](crate::NDArray)
pub trait Element: Copy + Send + Sync + 'static {
    /// The [`DataType`] arrays built from this element carry
    const DATA_TYPE: DataType;

    fn into_buffer(values: Vec<Self>) -> HostBuffer;

    /// Converts a buffer of any type into this element type
    fn from_buffer(buffer: HostBuffer) -> Vec<Self>;
}

macro_rules! impl_element {
    ($t:ty, $variant:ident, $dtype:expr) => {
        impl Element for $t {
            const DATA_TYPE: DataType = $dtype;

            fn into_buffer(values: Vec<Self>) -> HostBuffer {
                HostBuffer::$variant(values)
            }

            fn from_buffer(buffer: HostBuffer) -> Vec<Self> {
                match buffer {
                    HostBuffer::$variant(values) => values,
                    other => other.to_f64_vec().into_iter().map(|x| x as $t).collect(),
                }
            }
        }
    };
}

impl_element!(f32, F32, DataType::Float32);
impl_element!(f64, F64, DataType::Float64);
impl_element!(i32, I32, DataType::Int32);
impl_element!(i64, I64, DataType::Int64);
impl_element!(u8, U8, DataType::Uint8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_reports_type_and_len() {
        let buffer = f32::into_buffer(vec![1.0, 2.0, 3.0]);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.data_type(), DataType::Float32);
    }

    #[test]
    fn test_cross_type_extraction() {
        let buffer = HostBuffer::I64(vec![1, 2, 3]);
        assert_eq!(f32::from_buffer(buffer), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_boolean_from_f64() {
        let buffer = HostBuffer::from_f64(DataType::Boolean, vec![0.0, 2.5, -1.0]).unwrap();
        assert_eq!(buffer, HostBuffer::U8(vec![0, 1, 1]));
    }

    #[test]
    fn test_from_f64_unsupported() {
        assert!(matches!(
            HostBuffer::from_f64(DataType::Float16, vec![1.0]),
            Err(Error::Unsupported(_))
        ));
    }
}
