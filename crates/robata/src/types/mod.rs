//! Value types describing tensor geometry, element kind, placement and raw host data.

mod buffer;
mod data_type;
mod device;
pub(crate) mod shape;

pub use buffer::{Element, HostBuffer};
pub use data_type::DataType;
pub use device::{Device, DeviceKind};
pub use shape::Shape;
