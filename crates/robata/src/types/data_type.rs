use std::fmt::{self, Display};
use std::str::FromStr;
use crate::error::Error;

/// # DataType
///
/// Element kind of an [`NDArray`](crate::NDArray), independent of any backend.
///
/// Backends translate to and from their own dtype enum through
/// [`Backend::to_native_dtype`](crate::backend::Backend::to_native_dtype) and
/// [`Backend::from_native_dtype`](crate::backend::Backend::from_native_dtype);
/// kinds a backend cannot represent map to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Float32,
    Float64,
    Float16,
    Int8,
    Int32,
    Int64,
    Uint8,
    Boolean,
    Unknown,
}

impl DataType {
    /// Width of one element in bytes, `0` for [`DataType::Unknown`]
    pub fn num_of_bytes(&self) -> usize {
        match self {
            DataType::Float64 | DataType::Int64 => 8,
            DataType::Float32 | DataType::Int32 => 4,
            DataType::Float16 => 2,
            DataType::Int8 | DataType::Uint8 | DataType::Boolean => 1,
            DataType::Unknown => 0,
        }
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, DataType::Float16 | DataType::Float32 | DataType::Float64)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::Int8 | DataType::Int32 | DataType::Int64 | DataType::Uint8
        )
    }

    fn as_str(&self) -> &'static str {
        match self {
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Float16 => "float16",
            DataType::Int8 => "int8",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Uint8 => "uint8",
            DataType::Boolean => "boolean",
            DataType::Unknown => "unknown",
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "float32" | "f32" => Ok(DataType::Float32),
            "float64" | "f64" => Ok(DataType::Float64),
            "float16" | "f16" => Ok(DataType::Float16),
            "int8" | "i8" => Ok(DataType::Int8),
            "int32" | "i32" => Ok(DataType::Int32),
            "int64" | "i64" => Ok(DataType::Int64),
            "uint8" | "u8" => Ok(DataType::Uint8),
            "boolean" | "bool" => Ok(DataType::Boolean),
            "unknown" => Ok(DataType::Unknown),
            other => Err(Error::InvalidArgument(format!("unknown data type {}", other))),
        }
    }
}
