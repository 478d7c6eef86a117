//! # Robata
//!
//! A lazy, graph-backed n-dimensional array engine with scoped resource
//! management and a model/predictor inference layer.
//!
//! ## Overview
//!
//! Arrays are handles onto nodes of a shared computation graph. Operations
//! append nodes and infer their shape and element type immediately; values
//! are only computed, by the backend, when something reads them.
//!
//! Key components include:
//!
//! - [`NDManager`]: a tree of scopes that own arrays and other closeable resources
//! - [`NDArray`] and [`NDList`]: array handles and named lists of them
//! - [`Session`]: named inputs and outputs over the graph, evaluated on demand
//! - [`Model`] and [`Predictor`]: trace a [`Block`] once, then run it per request
//! - [`PredictorService`]: an async queue in front of a predictor
//!
//! ## Architecture
//!
//! ### Resource Scopes
//!
//! Every manager has a parent, except the engine's root. Closing a manager
//! closes everything it owns, sub-managers included, and removes it from its
//! parent. The root cannot be closed. Arrays are held weakly, so dropping the
//! last handle releases an array without closing its manager.
//!
//! ### Backend Trait
//!
//! The [`Backend`](backend::Backend) trait is the seam to a tensor library:
//! native type mapping, host transfers, factories, a single operator dispatch
//! and parameter persistence. Graph building and scoping are independent of it.
//!
//! ### Lazy Evaluation
//!
//! Placeholders are graph inputs without a value. Evaluating a node plans the
//! nodes it depends on and fails with
//! [`Error::UnresolvedDependency`] if a needed placeholder is unbound.
//!
//! ## Features
//!
//! - **candle** (default) - Enables the candle backend and [`engine()`]
//!
//! ## Example
//!
//! ```ignore
//! let manager = robata::engine().new_base_manager()?;
//! let a = manager.create(&[1.0f32, 2.0, 3.0], [1, 3])?;
//! let probabilities = a.softmax(-1, 1.0)?;
//! assert_eq!(probabilities.shape()?, robata::Shape::from([1, 3]));
//! manager.close();
//! ```

mod error;
mod sync;

pub mod backend;
pub mod constant;
pub mod engine;
pub mod graph;
pub mod inference;
pub mod manager;
pub mod ndarray;
pub mod serving;
pub mod types;

pub use error::{Error, Result};
pub use types::{DataType, Device, DeviceKind, Element, HostBuffer, Shape};
pub use ndarray::{NDArray, NDList, Operand};
pub use manager::{Closeable, NDManager};
pub use graph::Session;
pub use engine::{Engine, EngineOptions};
#[cfg(feature = "candle")]
pub use engine::engine;
pub use inference::{Block, Model, NDListTranslator, Predictor, Translator, TranslatorContext};
pub use serving::{Item, PredictionService, PredictorService};
