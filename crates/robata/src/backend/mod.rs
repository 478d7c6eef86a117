//! # Tensor Backend
//!
//! This module provides the interface the engine uses to reach a concrete
//! tensor library. Arrays, managers and sessions are written against
//! [`Backend`] only, so the library can be swapped without touching them.
//!
//! ## Feature Flags
//!
//! - `candle`: Enables [`CandleBackend`](candle::CandleBackend), backed by candle-core
//!
//! ## Usage
//!
//! 1. Pick a backend (or enable the `candle` feature and call [`crate::engine`])
//! 2. Build an [`Engine`](crate::Engine) over it
//! 3. Create arrays through the engine's managers

mod core_trait;

#[cfg_attr(docsrs, doc(cfg(feature = "candle")))]
#[cfg(feature = "candle")]
/// Candle tensor backend implementation.
///
/// This module is only available when the `candle` feature flag is enabled.
/// It maps every recorded [`Op`](crate::graph::Op) onto candle-core tensor
/// operations, falling back to host-side loops for the few operators candle
/// has no kernel for.
pub mod candle;

pub use core_trait::*;
