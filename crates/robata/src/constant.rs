//! # Constants with reserved meanings in Robata

/// Name given to the single output of a traced block when it carries no name
pub const DEFAULT_OUTPUT_NAME: &str = "output";

/// File extension of model parameter files
pub const PARAMETER_FILE_EXTENSION: &str = "safetensors";

/// Name reported by the candle engine
pub const ENGINE_NAME: &str = "candle";

/// Environment variable read by [`EngineOptions::from_env`](crate::engine::EngineOptions::from_env)
pub const DEVICE_ENV: &str = "ROBATA_DEFAULT_DEVICE";

/// Largest element count of an array built on the host by a factory such as
/// [`NDManager::arange`](crate::NDManager::arange)
pub const MAX_HOST_ELEMENTS: usize = 1 << 31;
