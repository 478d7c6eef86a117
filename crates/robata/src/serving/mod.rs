//! # Serving
//!
//! Asynchronous front end for a [`Predictor`](crate::Predictor).
//!
//! A [`PredictorService`] queues submitted inputs and answers them from a
//! background tokio task, so many async callers can share one predictor.

mod item;
mod queue_item;
mod service;

pub use item::Item;
pub use service::{PredictionService, PredictorService};
