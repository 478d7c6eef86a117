//! # Inference
//!
//! Model lifecycle and forward-pass execution.
//!
//! A [`Model`] traces its [`Block`] into a session once, when it is loaded. A
//! [`Predictor`] then binds user inputs, converted by a [`Translator`], to the
//! session's inputs and evaluates its outputs on every call.

mod block;
mod model;
mod predictor;
mod translator;

pub use block::Block;
pub use model::Model;
pub use predictor::Predictor;
pub use translator::{NDListTranslator, Translator, TranslatorContext};
