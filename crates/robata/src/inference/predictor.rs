use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::graph::Session;
use crate::manager::NDManager;
use crate::ndarray::NDList;
use super::{Translator, TranslatorContext};

/// # Predictor
///
/// Runs a model's traced forward pass on user inputs.
///
/// Every [`predict`](Predictor::predict) opens its own sub-manager, so arrays
/// created for one call are released when it returns, whether it succeeded
/// or not. Nothing is cached between calls.
///
/// # Type Parameters
///
/// * `I` - Input accepted by the translator
/// * `O` - Output produced by the translator
pub struct Predictor<B: Backend, I, O> {
    model_name: String,
    manager: NDManager<B>,
    session: Arc<Session<B>>,
    translator: Arc<dyn Translator<B, I, O>>,
    /// Consumed by the first prediction, which validates the input names
    first: AtomicBool,
}

impl<B: Backend, I, O> Predictor<B, I, O> {
    pub(crate) fn new(
        model_name: String,
        manager: NDManager<B>,
        session: Arc<Session<B>>,
        translator: Arc<dyn Translator<B, I, O>>,
    ) -> Self {
        Self {
            model_name,
            manager,
            session,
            translator,
            first: AtomicBool::new(true),
        }
    }

    pub fn manager(&self) -> &NDManager<B> {
        &self.manager
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Runs one forward pass.
    ///
    /// # Parameters
    ///
    /// * `input` - Converted into named arrays by the translator
    ///
    /// # Returns
    ///
    /// The translator's view of the outputs; translator, binding and
    /// evaluation failures are returned unchanged
    pub fn predict(&self, input: I) -> Result<O> {
        let call = self.manager.new_sub_manager()?;
        let result = self.predict_in(&call, input);
        call.close();
        result
    }

    /// Runs [`predict`](Predictor::predict) on each input, stopping at the first failure
    pub fn batch_predict(&self, inputs: Vec<I>) -> Result<Vec<O>> {
        inputs.into_iter().map(|input| self.predict(input)).collect()
    }

    fn predict_in(&self, call: &NDManager<B>, input: I) -> Result<O> {
        let ctx = TranslatorContext::new(call.clone(), self.manager.clone(), &self.model_name);
        let inputs = self.translator.process_input(&ctx, input)?;
        if self.first.swap(false, Ordering::SeqCst) {
            self.check_inputs(&inputs)?;
            debug!(model = %self.model_name, inputs = inputs.len(), "predictor warmed up");
        }

        let outputs = self
            .session
            .run(&inputs)?
            .into_iter()
            .map(|(name, tensor)| {
                let data_type = match self.session.output_data_type(&name) {
                    Some(data_type) => data_type,
                    None => B::data_type(&tensor)?,
                };
                let array = call.wrap_tensor(tensor, data_type)?;
                array.set_name(name);
                Ok(array)
            })
            .collect::<Result<NDList<B>>>()?;
        self.translator.process_output(&ctx, outputs)
    }

    fn check_inputs(&self, inputs: &NDList<B>) -> Result<()> {
        match self
            .session
            .input_names()
            .into_iter()
            .find(|name| inputs.get_by_name(name).is_none())
        {
            Some(missing) => Err(Error::InvalidArgument(format!(
                "model {} expects an input named {}", self.model_name, missing
            ))),
            None => Ok(()),
        }
    }

    /// Releases the predictor's manager and any arrays it still owns
    pub fn close(&self) {
        self.manager.close();
    }
}
