use crate::backend::Backend;
use crate::error::Result;
use crate::manager::NDManager;
use crate::ndarray::NDList;

/// State handed to a [`Translator`] for one prediction
pub struct TranslatorContext<B: Backend> {
    manager: NDManager<B>,
    predictor_manager: NDManager<B>,
    model_name: String,
}

impl<B: Backend> TranslatorContext<B> {
    pub(crate) fn new(manager: NDManager<B>, predictor_manager: NDManager<B>, model_name: &str) -> Self {
        Self {
            manager,
            predictor_manager,
            model_name: model_name.to_string(),
        }
    }

    /// Manager scoped to this prediction; it is closed when the prediction returns
    pub fn manager(&self) -> &NDManager<B> {
        &self.manager
    }

    /// Manager of the predictor, for arrays that must outlive the prediction
    pub fn predictor_manager(&self) -> &NDManager<B> {
        &self.predictor_manager
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// # Translator
///
/// Converts user types to the named arrays a model consumes, and the arrays it
/// produces back to user types.
///
/// Each method is called exactly once per prediction. Arrays created in
/// `process_input` should be created on [`TranslatorContext::manager`] so they
/// are released with the prediction.
///
/// # Type Parameters
///
/// * `I` - Input type accepted by the predictor
/// * `O` - Output type returned by the predictor
pub trait Translator<B: Backend, I, O>: Send + Sync {
    /// Builds the model inputs, each named after the model input it feeds
    fn process_input(&self, ctx: &TranslatorContext<B>, input: I) -> Result<NDList<B>>;

    /// Converts the model outputs, named after the declared outputs
    fn process_output(&self, ctx: &TranslatorContext<B>, output: NDList<B>) -> Result<O>;
}

/// Passes arrays straight through.
///
/// Outputs are moved to the predictor's manager so they survive the
/// prediction; close them, or the predictor, when done.
#[derive(Debug, Clone, Copy, Default)]
pub struct NDListTranslator;

impl<B: Backend> Translator<B, NDList<B>, NDList<B>> for NDListTranslator {
    fn process_input(&self, _ctx: &TranslatorContext<B>, input: NDList<B>) -> Result<NDList<B>> {
        Ok(input)
    }

    fn process_output(&self, ctx: &TranslatorContext<B>, output: NDList<B>) -> Result<NDList<B>> {
        output.attach_to(ctx.predictor_manager())?;
        Ok(output)
    }
}
