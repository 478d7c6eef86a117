use std::sync::{Arc, Weak};
use crate::backend::Backend;
use crate::error::Result;
use crate::ndarray::ArrayInner;

/// # Closeable
///
/// Anything a manager can own and release when it closes.
///
/// Implemented by [`NDArray`](crate::NDArray); attach your own types with
/// [`NDManager::attach`](crate::NDManager::attach) to tie their release to a
/// manager's lifetime.
pub trait Closeable: Send + Sync {
    /// Releases the resource. Called at most once by a closing manager.
    fn close(&self) -> Result<()>;
}

/// Entry of a manager's resource table
pub(crate) enum Resource<B: Backend> {
    /// A sub-manager, looked up in the registry by its uid
    Manager,
    /// An array; the table never keeps an array alive on its own
    Array(Weak<ArrayInner<B>>),
    External(Arc<dyn Closeable>),
}
