use std::fmt::Debug;
use std::path::Path;
use crate::error::Result;
use crate::graph::Op;
use crate::types::{DataType, Device, HostBuffer, Shape};

/// # Backend
///
/// The adapter seam between the engine and a concrete tensor library.
///
/// The engine never computes on its own: it records [`Op`]s in a graph and hands
/// them to [`Backend::apply`] when a value is requested. Implementations own the
/// dtype and device translation tables and the operator dispatch.
///
/// Kinds the library cannot represent surface as
/// [`Error::Unsupported`](crate::Error::Unsupported), never as a panic or a
/// silently wrong result.
pub trait Backend: Debug + Send + Sync + 'static {
    /// Materialised tensor of the library
    type Tensor: Debug + Clone + Send + Sync + 'static;

    /// The library's element type enum
    type DType: Debug + Copy + PartialEq + Send + Sync;

    /// The library's device handle
    type Device: Debug + Clone + Send + Sync;

    /// Short engine name, e.g. `candle`
    fn name(&self) -> &'static str;

    fn version(&self) -> String;

    /// Number of accelerators the library can reach
    fn gpu_count(&self) -> usize;

    /// Maps a [`DataType`] to the library's dtype, `None` when it has no counterpart
    fn to_native_dtype(data_type: DataType) -> Option<Self::DType>;

    /// Maps a library dtype back, `None` when it has no counterpart
    fn from_native_dtype(dtype: Self::DType) -> Option<DataType>;

    /// Resolves a placement token to a library device
    fn native_device(&self, device: Device) -> Result<Self::Device>;

    fn shape(tensor: &Self::Tensor) -> Shape;

    fn data_type(tensor: &Self::Tensor) -> Result<DataType>;

    fn device(tensor: &Self::Tensor) -> Device;

    /// Uploads host data as a tensor of `data_type` with the given dimensions.
    ///
    /// # Parameters
    ///
    /// * `buffer` - Row-major elements, converted to `data_type` if needed
    /// * `dims` - Concrete dimensions whose product equals `buffer.len()`
    /// * `data_type` - Element type of the resulting tensor
    /// * `device` - Where the tensor lives
    fn from_host(
        &self,
        buffer: HostBuffer,
        dims: &[usize],
        data_type: DataType,
        device: Device,
    ) -> Result<Self::Tensor>;

    /// Downloads a tensor as row-major host data
    fn to_host(&self, tensor: &Self::Tensor) -> Result<HostBuffer>;

    /// A tensor with every element set to `value`
    fn full(&self, value: f64, dims: &[usize], data_type: DataType, device: Device) -> Result<Self::Tensor>;

    /// Samples uniformly from `[low, high)`
    fn random_uniform(
        &self,
        low: f64,
        high: f64,
        dims: &[usize],
        data_type: DataType,
        device: Device,
    ) -> Result<Self::Tensor>;

    fn random_normal(
        &self,
        mean: f64,
        std: f64,
        dims: &[usize],
        data_type: DataType,
        device: Device,
    ) -> Result<Self::Tensor>;

    /// Executes one recorded operation on materialised inputs.
    ///
    /// The graph has already validated arity, shapes and dtypes with
    /// [`Op::infer`], so implementations only report library failures.
    fn apply(&self, op: &Op, inputs: &[&Self::Tensor]) -> Result<Self::Tensor>;

    /// Reads every named tensor of a parameter file onto `device`
    fn load(&self, path: &Path, device: Device) -> Result<Vec<(String, Self::Tensor)>>;

    /// Writes named tensors to a parameter file
    fn save(&self, tensors: &[(String, Self::Tensor)], path: &Path) -> Result<()>;
}
