//! # Engine
//!
//! Entry point of the library: owns the backend, the shared graph and the
//! root ("system") manager that every other manager descends from.

use std::sync::Arc;
use tracing::{debug, warn};
use crate::backend::Backend;
use crate::constant::DEVICE_ENV;
use crate::error::Result;
use crate::manager::{NDManager, Registry};
use crate::types::Device;

/// Settings read when an [`Engine`] starts
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineOptions {
    /// Device of the root manager, inherited by managers that do not pick one
    pub default_device: Device,
}

impl EngineOptions {
    /// Reads options from the process environment.
    ///
    /// `ROBATA_DEFAULT_DEVICE` accepts the forms parsed by [`Device`]; an
    /// unparsable value is logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads options through `lookup`, which maps a variable name to its value
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default_device = match lookup(DEVICE_ENV) {
            Some(value) => value.parse().unwrap_or_else(|err| {
                warn!(variable = DEVICE_ENV, value = %value, error = %err, "ignoring invalid device");
                Device::default()
            }),
            None => Device::default(),
        };
        Self { default_device }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.default_device = device;
        self
    }
}

/// # Engine
///
/// The root context for one backend.
///
/// All managers created from an engine share its graph; arrays from
/// different engines cannot be mixed. An engine is usually created once per
/// process, see [`engine`](crate::engine) for the lazily initialised candle one.
///
/// # Type Parameters
///
/// * `B` - The tensor library adapter
pub struct Engine<B: Backend> {
    registry: Arc<Registry<B>>,
    root: NDManager<B>,
    options: EngineOptions,
}

impl<B: Backend> Engine<B> {
    pub fn new(backend: B, options: EngineOptions) -> Self {
        let (registry, root) = Registry::new(backend, options.default_device);
        let root = NDManager::from_parts(registry.clone(), root);
        debug!(
            engine = root.backend().name(),
            device = %options.default_device,
            "engine started"
        );
        Self {
            registry,
            root,
            options,
        }
    }

    pub fn name(&self) -> &'static str {
        self.registry.backend.name()
    }

    pub fn version(&self) -> String {
        self.registry.backend.version()
    }

    pub fn gpu_count(&self) -> usize {
        self.registry.backend.gpu_count()
    }

    pub fn default_device(&self) -> Device {
        self.options.default_device
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// The root manager. It never closes, and arrays created on it live as
    /// long as their handles.
    pub fn system_manager(&self) -> &NDManager<B> {
        &self.root
    }

    /// A top-level manager on the default device
    pub fn new_base_manager(&self) -> Result<NDManager<B>> {
        self.root.new_sub_manager()
    }

    pub fn new_base_manager_on(&self, device: Device) -> Result<NDManager<B>> {
        self.root.new_sub_manager_on(device)
    }

    /// Closes every manager below the root. The engine stays usable.
    pub fn shutdown(&self) {
        let children = self.registry.children_of(self.root.uid());
        let count = children.len();
        for child in children {
            NDManager::from_parts(self.registry.clone(), child).close();
        }
        debug!(managers = count, "engine shut down");
    }

    /// Number of open managers, not counting the root
    pub fn live_managers(&self) -> usize {
        self.registry.len().saturating_sub(1)
    }
}

#[cfg(feature = "candle")]
static ENGINE: std::sync::OnceLock<Engine<crate::backend::candle::CandleBackend>> =
    std::sync::OnceLock::new();

/// The process-wide candle engine, created on first use with
/// [`EngineOptions::from_env`]
#[cfg_attr(docsrs, doc(cfg(feature = "candle")))]
#[cfg(feature = "candle")]
pub fn engine() -> &'static Engine<crate::backend::candle::CandleBackend> {
    ENGINE.get_or_init(|| {
        Engine::new(crate::backend::candle::CandleBackend, EngineOptions::from_env())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_lookup() {
        let options = EngineOptions::from_lookup(|key| {
            (key == DEVICE_ENV).then(|| "gpu:1".to_string())
        });
        assert_eq!(options.default_device, Device::gpu(1));
    }

    #[test]
    fn test_options_ignore_invalid_device() {
        let options = EngineOptions::from_lookup(|_| Some("abacus".to_string()));
        assert_eq!(options.default_device, Device::cpu());
        assert_eq!(EngineOptions::from_lookup(|_| None), EngineOptions::default());
    }

    #[test]
    fn test_with_device() {
        let options = EngineOptions::default().with_device(Device::gpu(0));
        assert_eq!(options.default_device, Device::gpu(0));
    }

    #[cfg(feature = "candle")]
    mod candle {
        use super::*;
        use crate::backend::candle::CandleBackend;

        #[test]
        fn test_engine_identity() {
            let engine = Engine::new(CandleBackend, EngineOptions::default());
            assert_eq!(engine.name(), "candle");
            assert!(!engine.version().is_empty());
            assert!(engine.system_manager().is_root());
            assert_eq!(engine.default_device(), Device::cpu());
        }

        #[test]
        fn test_shutdown_closes_base_managers() {
            let engine = Engine::new(CandleBackend, EngineOptions::default());
            let first = engine.new_base_manager().unwrap();
            let nested = first.new_sub_manager().unwrap();
            let second = engine.new_base_manager().unwrap();
            assert_eq!(engine.live_managers(), 3);

            engine.shutdown();
            assert!(!first.is_open());
            assert!(!nested.is_open());
            assert!(!second.is_open());
            assert_eq!(engine.live_managers(), 0);
            assert!(engine.system_manager().is_open());
            assert!(engine.new_base_manager().is_ok());
        }

        #[test]
        fn test_global_engine_is_shared() {
            assert!(std::ptr::eq(engine(), engine()));
        }
    }
}
