use crate::backend::Backend;
use crate::error::Result;
use crate::ndarray::NDList;

/// # Block
///
/// The forward pass of a model, traced once into the graph when the model is
/// loaded.
///
/// `forward` receives the loaded parameters and one placeholder per declared
/// input, and returns the arrays to expose as outputs. Name an output with
/// [`NDArray::set_name`](crate::NDArray::set_name) to choose its output name.
///
/// Any `Fn(&NDList, &NDList) -> Result<NDList>` closure is a block.
pub trait Block<B: Backend>: Send + Sync {
    fn forward(&self, parameters: &NDList<B>, inputs: &NDList<B>) -> Result<NDList<B>>;
}

impl<B, F> Block<B> for F
where
    B: Backend,
    F: Fn(&NDList<B>, &NDList<B>) -> Result<NDList<B>> + Send + Sync,
{
    fn forward(&self, parameters: &NDList<B>, inputs: &NDList<B>) -> Result<NDList<B>> {
        self(parameters, inputs)
    }
}
