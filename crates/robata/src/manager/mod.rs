//! # NDManager
//!
//! Hierarchical resource scopes. Every array and sub-manager is owned by
//! exactly one manager, and closing a manager releases everything it owns,
//! depth first, before detaching it from its parent.
//!
//! Managers live in an arena owned by their [`Engine`](crate::Engine); a child
//! holds its parent, and a parent refers to its children only by uid, so the
//! tree never forms reference cycles.

mod registry;
mod resource;

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;
use rand::Rng;
use tracing::{debug, trace, warn};
use crate::backend::Backend;
use crate::constant::MAX_HOST_ELEMENTS;
use crate::error::{Error, Result};
use crate::graph::{self, Node, NodeId, NodeKind, Op, Session};
use crate::ndarray::NDArray;
use crate::sync::{lock, read, write};
use crate::types::{DataType, Device, Element, HostBuffer, Shape};
use crate::types::shape::UNKNOWN_DIM;

pub use resource::Closeable;
pub(crate) use registry::{ManagerNode, Registry};
pub(crate) use resource::Resource;

/// # NDManager
///
/// Handle to one scope in the manager tree. Cloning the handle does not create
/// a new scope.
///
/// A manager is open until [`close`](NDManager::close) is called; afterwards
/// every operation other than `close` and the read-only queries fails with
/// [`Error::IllegalState`]. The engine's root manager never closes and keeps no
/// resource table.
///
/// # Example
///
/// ```ignore
/// use robata::{engine, DataType};
///
/// let manager = engine().new_base_manager()?;
/// let x = manager.create(&[1.0f32, 2.0, 3.0], [3])?;
/// let y = x.mul(2.0)?.add(&x)?;
/// assert_eq!(y.to_vec::<f32>()?, vec![3.0, 6.0, 9.0]);
/// manager.close();
/// ```
pub struct NDManager<B: Backend> {
    registry: Arc<Registry<B>>,
    node: Arc<ManagerNode<B>>,
}

impl<B: Backend> Clone for NDManager<B> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            node: self.node.clone(),
        }
    }
}

impl<B: Backend> NDManager<B> {
    pub(crate) fn from_parts(registry: Arc<Registry<B>>, node: Arc<ManagerNode<B>>) -> Self {
        Self { registry, node }
    }

    pub fn uid(&self) -> &str {
        &self.node.uid
    }

    /// Default device of arrays created here
    pub fn device(&self) -> Device {
        self.node.device
    }

    pub fn is_open(&self) -> bool {
        !self.node.is_closed()
    }

    pub fn is_root(&self) -> bool {
        self.node.is_root
    }

    pub fn parent(&self) -> Option<NDManager<B>> {
        self.node
            .parent
            .as_ref()
            .map(|parent| Self::from_parts(self.registry.clone(), parent.clone()))
    }

    pub fn backend(&self) -> &B {
        self.registry.backend.as_ref()
    }

    /// Number of resources this manager currently owns, `0` for the root
    pub fn resource_count(&self) -> usize {
        lock(&self.node.resources).len()
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.node.is_closed() {
            Err(Error::IllegalState(format!("manager {} is closed", self.uid())))
        } else {
            Ok(())
        }
    }

    pub(crate) fn shares_engine(&self, other: &NDManager<B>) -> bool {
        Arc::ptr_eq(&self.registry, &other.registry)
    }

    /// Opens a child scope on this manager's device
    pub fn new_sub_manager(&self) -> Result<NDManager<B>> {
        self.new_sub_manager_on(self.device())
    }

    /// Opens a child scope whose arrays default to `device`.
    ///
    /// # Returns
    ///
    /// The child, registered in this manager's resource table, or
    /// [`Error::IllegalState`] if this manager is closed
    pub fn new_sub_manager_on(&self, device: Device) -> Result<NDManager<B>> {
        self.ensure_open()?;
        let child = Arc::new(ManagerNode::new(Some(self.node.clone()), device));
        self.registry.register(child.clone());
        if let Err(err) = self.node.attach(&child.uid, Resource::Manager) {
            self.registry.remove(&child.uid);
            return Err(err);
        }
        debug!(manager = %child.uid, parent = %self.uid(), device = %device, "sub-manager created");
        Ok(Self::from_parts(self.registry.clone(), child))
    }

    /// Ties `resource` to this manager: it is closed when the manager closes.
    ///
    /// The resource's own state is untouched. No-op on the root.
    pub fn attach(&self, uid: impl Into<String>, resource: Arc<dyn Closeable>) -> Result<()> {
        self.node.attach(&uid.into(), Resource::External(resource))
    }

    pub(crate) fn attach_resource(&self, uid: &str, resource: Resource<B>) -> Result<()> {
        self.node.attach(uid, resource)
    }

    /// Forgets the resource under `uid` without closing it. No-op on the root.
    pub fn detach(&self, uid: &str) {
        self.node.detach(uid);
    }

    pub(crate) fn detach_resource(&self, uid: &str) -> bool {
        self.node.detach(uid)
    }

    /// Closes every owned resource, then detaches this manager from its parent.
    ///
    /// Per-resource failures are logged and do not stop the remaining
    /// resources from closing. Closing twice is a no-op, and so is closing the root.
    pub fn close(&self) {
        if self.node.is_root || self.node.closed.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        let resources = std::mem::take(&mut *lock(&self.node.resources));
        let count = resources.len();
        for (uid, resource) in resources {
            if let Err(err) = self.close_resource(&uid, resource) {
                warn!(manager = %self.uid(), resource = %uid, error = %err, "failed to close resource");
            }
        }
        self.registry.remove(self.uid());
        if let Some(parent) = &self.node.parent {
            parent.detach(self.uid());
        }
        debug!(manager = %self.uid(), resources = count, "manager closed");
    }

    fn close_resource(&self, uid: &str, resource: Resource<B>) -> Result<()> {
        match resource {
            Resource::Manager => {
                if let Some(child) = self.registry.get(uid) {
                    Self::from_parts(self.registry.clone(), child).close();
                }
                Ok(())
            }
            Resource::Array(array) => {
                if let Some(inner) = array.upgrade() {
                    NDArray::from_inner(inner).close();
                }
                Ok(())
            }
            Resource::External(resource) => resource.close(),
        }
    }

    /// The session of the nearest manager, this one included, that installed one.
    /// The root always has one.
    pub fn session(&self) -> Result<Arc<Session<B>>> {
        let mut current = Some(self.node.clone());
        while let Some(node) = current {
            if let Some(session) = read(&node.session).as_ref() {
                return Ok(session.clone());
            }
            current = node.parent.clone();
        }
        Err(Error::IllegalState(format!("manager {} has no session", self.uid())))
    }

    /// Gives this manager a fresh session, replacing any it had
    pub fn install_session(&self) -> Result<Arc<Session<B>>> {
        self.ensure_open()?;
        let session = Arc::new(Session::new(self.registry.backend.clone(), self.registry.graph.clone()));
        *write(&self.node.session) = Some(session.clone());
        debug!(manager = %self.uid(), session = %session.uid(), "session installed");
        Ok(session)
    }

    /// Creates an array from `data` on this manager's device.
    ///
    /// # Parameters
    ///
    /// * `data` - Row-major elements
    /// * `shape` - Target shape; a single `-1` dimension is inferred from `data.len()`
    ///
    /// # Returns
    ///
    /// The new array, or [`Error::InvalidArgument`] when `data.len()` does not
    /// match the shape
    pub fn create<T: Element>(&self, data: &[T], shape: impl Into<Shape>) -> Result<NDArray<B>> {
        self.create_on(data, shape, self.device())
    }

    pub fn create_on<T: Element>(
        &self,
        data: &[T],
        shape: impl Into<Shape>,
        device: Device,
    ) -> Result<NDArray<B>> {
        self.create_buffer(T::into_buffer(data.to_vec()), shape, T::DATA_TYPE, device)
    }

    /// Creates an array of `data_type` from host data of any element type
    pub fn create_buffer(
        &self,
        buffer: HostBuffer,
        shape: impl Into<Shape>,
        data_type: DataType,
        device: Device,
    ) -> Result<NDArray<B>> {
        self.ensure_open()?;
        let shape = resolve_data_shape(shape.into(), buffer.len())?;
        let dims = known_dims(&shape)?;
        let tensor = self.backend().from_host(buffer, &dims, data_type, device)?;
        self.push_value(NodeKind::Variable(Some(tensor)), shape, data_type, device)
    }

    /// Creates a rank-0 constant
    pub fn create_scalar<T: Element>(&self, value: T) -> Result<NDArray<B>> {
        self.ensure_open()?;
        let device = self.device();
        let tensor = self.backend().from_host(T::into_buffer(vec![value]), &[], T::DATA_TYPE, device)?;
        self.push_value(NodeKind::Constant(tensor), Shape::scalar(), T::DATA_TYPE, device)
    }

    /// Wraps a tensor that is already materialised by the backend
    pub fn from_tensor(&self, tensor: B::Tensor) -> Result<NDArray<B>> {
        let data_type = B::data_type(&tensor)?;
        self.wrap_tensor(tensor, data_type)
    }

    pub(crate) fn wrap_tensor(&self, tensor: B::Tensor, data_type: DataType) -> Result<NDArray<B>> {
        self.ensure_open()?;
        let shape = B::shape(&tensor);
        let device = B::device(&tensor);
        self.push_value(NodeKind::Constant(tensor), shape, data_type, device)
    }

    /// Declares a named input of the nearest session.
    ///
    /// The returned array has no value: evaluating anything that depends on it
    /// requires binding a value under `name`.
    ///
    /// # Parameters
    ///
    /// * `name` - Input name, unique within the session
    /// * `shape` - Declared shape, `-1` for dimensions fixed only at bind time
    /// * `data_type` - Element type of bound values
    pub fn placeholder(
        &self,
        name: &str,
        shape: impl Into<Shape>,
        data_type: DataType,
    ) -> Result<NDArray<B>> {
        self.ensure_open()?;
        let shape = shape.into();
        shape.validate()?;
        if B::to_native_dtype(data_type).is_none() {
            return Err(Error::Unsupported(format!(
                "{} has no native type for {}", self.backend().name(), data_type
            )));
        }
        let session = self.session()?;
        let node = self.append_node(NodeKind::Variable(None), shape, data_type, self.device());
        session.declare_input(name, node)?;
        self.wrap(node, Some(name.to_string()))
    }

    /// An array of zeros. `device` defaults to this manager's device.
    pub fn zeros(
        &self,
        shape: impl Into<Shape>,
        data_type: DataType,
        device: Option<Device>,
    ) -> Result<NDArray<B>> {
        self.full(shape, 0.0, data_type, device)
    }

    pub fn ones(
        &self,
        shape: impl Into<Shape>,
        data_type: DataType,
        device: Option<Device>,
    ) -> Result<NDArray<B>> {
        self.full(shape, 1.0, data_type, device)
    }

    /// An array with every element set to `value`
    pub fn full(
        &self,
        shape: impl Into<Shape>,
        value: f64,
        data_type: DataType,
        device: Option<Device>,
    ) -> Result<NDArray<B>> {
        self.ensure_open()?;
        let shape = shape.into();
        let dims = known_dims(&shape)?;
        let device = device.unwrap_or(self.device());
        let tensor = self.backend().full(value, &dims, data_type, device)?;
        self.push_value(NodeKind::Constant(tensor), shape, data_type, device)
    }

    /// Values from `start` up to, not including, `stop`, spaced by `step`
    pub fn arange(
        &self,
        start: f64,
        stop: f64,
        step: f64,
        data_type: DataType,
        device: Option<Device>,
    ) -> Result<NDArray<B>> {
        if step == 0.0 || !step.is_finite() || !start.is_finite() || !stop.is_finite() {
            return Err(Error::InvalidArgument(format!(
                "cannot range from {} to {} by {}", start, stop, step
            )));
        }
        let count = host_len(((stop - start) / step).ceil().max(0.0))?;
        let values = (0..count).map(|i| start + i as f64 * step).collect::<Vec<_>>();
        let device = device.unwrap_or(self.device());
        self.create_buffer(HostBuffer::F64(values), [count], data_type, device)
    }

    /// A `rows` by `cols` matrix with ones on diagonal `k` (positive is above the main one)
    pub fn eye(
        &self,
        rows: usize,
        cols: usize,
        k: i64,
        data_type: DataType,
        device: Option<Device>,
    ) -> Result<NDArray<B>> {
        let len = rows
            .checked_mul(cols)
            .ok_or_else(|| Error::InvalidArgument(format!("eye of {} by {} is too large", rows, cols)))?;
        let mut values = vec![0.0; host_len(len as f64)?];
        for row in 0..rows {
            let col = row as i64 + k;
            if col >= 0 && (col as usize) < cols {
                values[row * cols + col as usize] = 1.0;
            }
        }
        let device = device.unwrap_or(self.device());
        self.create_buffer(HostBuffer::F64(values), [rows, cols], data_type, device)
    }

    /// `num` evenly spaced values over `[start, stop]`, or `[start, stop)` without `endpoint`
    pub fn linspace(
        &self,
        start: f64,
        stop: f64,
        num: usize,
        endpoint: bool,
        data_type: DataType,
        device: Option<Device>,
    ) -> Result<NDArray<B>> {
        host_len(num as f64)?;
        let intervals = if endpoint { num.saturating_sub(1) } else { num };
        let step = if intervals == 0 { 0.0 } else { (stop - start) / intervals as f64 };
        let values = (0..num).map(|i| start + i as f64 * step).collect::<Vec<_>>();
        let device = device.unwrap_or(self.device());
        self.create_buffer(HostBuffer::F64(values), [num], data_type, device)
    }

    /// Samples uniformly from `[low, high)`
    pub fn random_uniform(
        &self,
        low: f64,
        high: f64,
        shape: impl Into<Shape>,
        data_type: DataType,
        device: Option<Device>,
    ) -> Result<NDArray<B>> {
        self.ensure_open()?;
        if low > high {
            return Err(Error::InvalidArgument(format!(
                "uniform range {}..{} is empty", low, high
            )));
        }
        let shape = shape.into();
        let dims = known_dims(&shape)?;
        let device = device.unwrap_or(self.device());
        let tensor = self.backend().random_uniform(low, high, &dims, data_type, device)?;
        self.push_value(NodeKind::Constant(tensor), shape, data_type, device)
    }

    pub fn random_normal(
        &self,
        mean: f64,
        std: f64,
        shape: impl Into<Shape>,
        data_type: DataType,
        device: Option<Device>,
    ) -> Result<NDArray<B>> {
        self.ensure_open()?;
        if std < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "standard deviation {} is negative", std
            )));
        }
        let shape = shape.into();
        let dims = known_dims(&shape)?;
        let device = device.unwrap_or(self.device());
        let tensor = self.backend().random_normal(mean, std, &dims, data_type, device)?;
        self.push_value(NodeKind::Constant(tensor), shape, data_type, device)
    }

    /// Draws `trials` samples from the categorical distribution `probabilities`.
    ///
    /// Probability mass missing from a total below one falls to the last category.
    ///
    /// # Returns
    ///
    /// An `Int64` vector counting how often each category was drawn
    pub fn random_multinomial(&self, trials: usize, probabilities: &NDArray<B>) -> Result<NDArray<B>> {
        self.ensure_open()?;
        let shape = probabilities.shape()?;
        if shape.dimension() != 1 {
            return Err(Error::InvalidArgument(format!(
                "multinomial probabilities must be a vector, got shape {}", shape
            )));
        }
        let probabilities_host = probabilities.to_vec::<f64>()?;
        let total: f64 = probabilities_host.iter().sum();
        if probabilities_host.iter().any(|p| *p < 0.0 || !p.is_finite()) || total > 1.0 + 1e-6 {
            return Err(Error::InvalidArgument(format!(
                "{:?} is not a probability distribution", probabilities_host
            )));
        }
        let categories = probabilities_host.len();
        let mut counts = vec![0i64; categories];
        if categories > 0 {
            let mut rng = rand::thread_rng();
            for _ in 0..trials {
                let draw = rng.gen_range(0.0..1.0);
                let mut cumulative = 0.0;
                let picked = probabilities_host
                    .iter()
                    .position(|p| {
                        cumulative += p;
                        draw < cumulative
                    })
                    .unwrap_or(categories - 1);
                counts[picked] += 1;
            }
        }
        self.create_buffer(HostBuffer::I64(counts), [categories], DataType::Int64, probabilities.device()?)
    }

    fn append_node(&self, kind: NodeKind<B::Tensor>, shape: Shape, data_type: DataType, device: Device) -> NodeId {
        let id = write(&self.registry.graph).push(Node { kind, shape, data_type, device });
        trace!(manager = %self.uid(), node = id.index(), "node appended");
        id
    }

    fn push_value(
        &self,
        kind: NodeKind<B::Tensor>,
        shape: Shape,
        data_type: DataType,
        device: Device,
    ) -> Result<NDArray<B>> {
        let node = self.append_node(kind, shape, data_type, device);
        self.wrap(node, None)
    }

    /// Records `op` over `inputs`, inferring the result's shape and dtype
    pub(crate) fn append_op(&self, op: Op, inputs: &[&NDArray<B>]) -> Result<NodeId> {
        self.ensure_open()?;
        let mut ids = Vec::with_capacity(inputs.len());
        for array in inputs {
            if !self.shares_engine(&array.manager()) {
                return Err(Error::InvalidArgument(
                    "operands belong to different engines".to_string(),
                ));
            }
            ids.push(array.node_id()?);
        }

        let mut graph = write(&self.registry.graph);
        let infos = ids
            .iter()
            .map(|&id| graph.node(id).map(|node| (node.shape.clone(), node.data_type, node.device)))
            .collect::<Result<Vec<_>>>()?;
        let device = match infos.first() {
            Some((_, _, device)) => *device,
            None => {
                return Err(Error::InvalidArgument(format!("{} received no inputs", op.name())))
            }
        };
        if let Some((_, _, other)) = infos.iter().find(|(_, _, d)| *d != device) {
            return Err(Error::InvalidArgument(format!(
                "{} mixes arrays on {} and {}", op.name(), device, other
            )));
        }
        let described = infos.iter().map(|(shape, dtype, _)| (shape, *dtype)).collect::<Vec<_>>();
        let (shape, data_type) = op.infer(&described)?;
        let id = graph.push(Node {
            kind: NodeKind::Op { op, inputs: ids },
            shape,
            data_type,
            device,
        });
        trace!(manager = %self.uid(), node = id.index(), "op appended");
        Ok(id)
    }

    /// Binds a fresh array owned by this manager to `node`
    pub(crate) fn wrap(&self, node: NodeId, name: Option<String>) -> Result<NDArray<B>> {
        let array = NDArray::bind(self.clone(), node, name);
        self.node.attach(array.uid(), Resource::Array(array.downgrade()))?;
        Ok(array)
    }

    pub(crate) fn describe(&self, node: NodeId) -> Result<(Shape, DataType, Device)> {
        let graph = read(&self.registry.graph);
        let node = graph.node(node)?;
        Ok((node.shape.clone(), node.data_type, node.device))
    }

    /// Evaluates one node with no bound inputs
    pub(crate) fn evaluate(&self, node: NodeId) -> Result<B::Tensor> {
        graph::evaluate(self.backend(), &self.registry.graph, HashMap::new(), &[node])?
            .pop()
            .ok_or_else(|| Error::UnresolvedDependency(format!("node {} has no value", node.index())))
    }
}

impl<B: Backend> PartialEq for NDManager<B> {
    fn eq(&self, other: &Self) -> bool {
        self.uid() == other.uid()
    }
}

impl<B: Backend> Debug for NDManager<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NDManager")
            .field("uid", &self.uid())
            .field("device", &self.device())
            .field("open", &self.is_open())
            .field("root", &self.is_root())
            .finish()
    }
}

/// Checks `shape` against the number of elements supplied, filling in one `-1`
fn resolve_data_shape(shape: Shape, len: usize) -> Result<Shape> {
    shape.validate()?;
    let unknown = shape.dims().iter().filter(|&&d| d == UNKNOWN_DIM).count();
    let known: i64 = shape.dims().iter().filter(|&&d| d != UNKNOWN_DIM).product();
    let len = len as i64;
    let resolved = match unknown {
        0 if known == len => Some(shape.clone()),
        1 if known > 0 && len % known == 0 => Some(Shape::new(
            shape
                .dims()
                .iter()
                .map(|&d| if d == UNKNOWN_DIM { len / known } else { d })
                .collect::<Vec<_>>(),
        )),
        _ => None,
    };
    resolved.ok_or_else(|| {
        Error::InvalidArgument(format!(
            "{} elements cannot fill shape {}", len, shape
        ))
    })
}

/// Element count of a factory built on the host, bounded by [`MAX_HOST_ELEMENTS`]
fn host_len(count: f64) -> Result<usize> {
    if count > MAX_HOST_ELEMENTS as f64 {
        return Err(Error::InvalidArgument(format!(
            "{} elements exceed the host factory limit of {}", count, MAX_HOST_ELEMENTS
        )));
    }
    Ok(count as usize)
}

fn known_dims(shape: &Shape) -> Result<Vec<usize>> {
    shape.validate()?;
    shape.to_usize().ok_or_else(|| {
        Error::InvalidArgument(format!("shape {} has unknown dimensions", shape))
    })
}

#[cfg(all(test, feature = "candle"))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use super::*;
    use crate::backend::candle::CandleBackend;
    use crate::engine::{Engine, EngineOptions};

    fn engine() -> Engine<CandleBackend> {
        Engine::new(CandleBackend, EngineOptions::default())
    }

    struct Counter(Arc<AtomicUsize>);

    impl Closeable for Counter {
        fn close(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    impl Closeable for Failing {
        fn close(&self) -> Result<()> {
            Err(Error::IllegalState("refusing to close".to_string()))
        }
    }

    #[test]
    fn test_create_keeps_shape() {
        let engine = engine();
        let manager = engine.new_base_manager().unwrap();
        let array = manager.create(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
        assert_eq!(array.shape().unwrap(), Shape::from([2, 3]));
        assert_eq!(array.data_type().unwrap(), DataType::Float32);
        assert_eq!(array.device().unwrap(), Device::cpu());
    }

    #[test]
    fn test_create_infers_one_dimension() {
        let engine = engine();
        let manager = engine.new_base_manager().unwrap();
        let array = manager.create(&[1i64, 2, 3, 4, 5, 6], Shape::new(vec![-1, 2])).unwrap();
        assert_eq!(array.shape().unwrap(), Shape::from([3, 2]));
    }

    #[test]
    fn test_create_rejects_length_mismatch() {
        let engine = engine();
        let manager = engine.new_base_manager().unwrap();
        let err = manager.create(&[1.0f32, 2.0, 3.0], [2, 2]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        let err = manager.create(&[1.0f32], Shape::new(vec![1, -2])).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_unmapped_type_is_unsupported() {
        let engine = engine();
        let manager = engine.new_base_manager().unwrap();
        let err = manager.create(&[1i32, 2], [2]).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        let err = manager.zeros([2], DataType::Int8, None).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_factories() {
        let engine = engine();
        let manager = engine.new_base_manager().unwrap();
        assert_eq!(
            manager.arange(0.0, 5.0, 2.0, DataType::Int64, None).unwrap().to_vec::<i64>().unwrap(),
            vec![0, 2, 4]
        );
        assert_eq!(
            manager.eye(2, 3, 1, DataType::Float32, None).unwrap().to_vec::<f32>().unwrap(),
            vec![0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
        );
        assert_eq!(
            manager.linspace(0.0, 1.0, 5, true, DataType::Float64, None).unwrap().to_vec::<f64>().unwrap(),
            vec![0.0, 0.25, 0.5, 0.75, 1.0]
        );
        assert_eq!(
            manager.ones([2, 2], DataType::Float32, None).unwrap().to_vec::<f32>().unwrap(),
            vec![1.0; 4]
        );
        assert!(manager.arange(0.0, 1.0, 0.0, DataType::Float32, None).is_err());
    }

    #[test]
    fn test_oversized_factories_fail() {
        let engine = engine();
        let manager = engine.new_base_manager().unwrap();
        assert!(matches!(
            manager.arange(0.0, 1e30, 1.0, DataType::Float32, None),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.eye(usize::MAX, 2, 0, DataType::Float32, None),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.eye(1 << 20, 1 << 20, 0, DataType::Float32, None),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.linspace(0.0, 1.0, usize::MAX, true, DataType::Float32, None),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.create(&[1.0f32], Shape::new(vec![i64::MAX, 2, -1])),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(manager.resource_count(), 0);
    }

    #[test]
    fn test_random_factories_respect_bounds() {
        let engine = engine();
        let manager = engine.new_base_manager().unwrap();
        let uniform = manager
            .random_uniform(-1.0, 1.0, [100], DataType::Float32, None)
            .unwrap()
            .to_vec::<f32>()
            .unwrap();
        assert!(uniform.iter().all(|x| (-1.0..1.0).contains(x)));

        let normal = manager.random_normal(0.0, 1.0, [4, 4], DataType::Float64, None).unwrap();
        assert_eq!(normal.shape().unwrap(), Shape::from([4, 4]));

        let err = manager.random_uniform(0.0, 1.0, [2], DataType::Int64, None).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_multinomial_counts_trials() {
        let engine = engine();
        let manager = engine.new_base_manager().unwrap();
        let probabilities = manager.create(&[0.2f64, 0.3, 0.5], [3]).unwrap();
        let counts = manager.random_multinomial(1000, &probabilities).unwrap();
        assert_eq!(counts.data_type().unwrap(), DataType::Int64);
        assert_eq!(counts.to_vec::<i64>().unwrap().iter().sum::<i64>(), 1000);

        let certain = manager.create(&[0.0f64, 1.0], [2]).unwrap();
        assert_eq!(manager.random_multinomial(10, &certain).unwrap().to_vec::<i64>().unwrap(), vec![0, 10]);

        let invalid = manager.create(&[0.9f64, 0.9], [2]).unwrap();
        assert!(manager.random_multinomial(1, &invalid).is_err());
    }

    #[test]
    fn test_sub_manager_registration() {
        let engine = engine();
        let parent = engine.new_base_manager().unwrap();
        let child = parent.new_sub_manager().unwrap();
        assert_eq!(parent.resource_count(), 1);
        assert_eq!(child.parent().unwrap(), parent);
        assert_eq!(child.device(), parent.device());

        child.close();
        assert_eq!(parent.resource_count(), 0);
        assert!(!child.is_open());
    }

    #[test]
    fn test_close_is_recursive_and_idempotent() {
        let engine = engine();
        let parent = engine.new_base_manager().unwrap();
        let child = parent.new_sub_manager().unwrap();
        let array = child.create(&[1.0f32, 2.0], [2]).unwrap();

        parent.close();
        parent.close();
        assert!(!child.is_open());
        assert!(matches!(array.shape(), Err(Error::IllegalState(_))));
        assert!(matches!(child.new_sub_manager(), Err(Error::IllegalState(_))));
        assert!(matches!(child.create(&[1.0f32], [1]), Err(Error::IllegalState(_))));
    }

    #[test]
    fn test_close_tolerates_failing_resources() {
        let engine = engine();
        let manager = engine.new_base_manager().unwrap();
        let closed = Arc::new(AtomicUsize::new(0));
        manager.attach("failing", Arc::new(Failing)).unwrap();
        manager.attach("counter", Arc::new(Counter(closed.clone()))).unwrap();

        manager.close();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(matches!(
            manager.attach("late", Arc::new(Counter(closed.clone()))),
            Err(Error::IllegalState(_))
        ));
    }

    #[test]
    fn test_detach_does_not_close() {
        let engine = engine();
        let manager = engine.new_base_manager().unwrap();
        let closed = Arc::new(AtomicUsize::new(0));
        manager.attach("counter", Arc::new(Counter(closed.clone()))).unwrap();
        manager.detach("counter");
        manager.close();
        assert_eq!(closed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_detaching_or_replacing_attached_arrays() {
        let engine = engine();
        let manager = engine.new_base_manager().unwrap();
        let (sender, receiver) = std::sync::mpsc::channel();
        let worker = manager.clone();
        std::thread::spawn(move || {
            let detached = worker.create(&[1.0f32], [1]).unwrap();
            worker.attach("detached", Arc::new(detached)).unwrap();
            worker.detach("detached");

            let first = worker.create(&[2.0f32], [1]).unwrap();
            worker.attach("replaced", Arc::new(first)).unwrap();
            let second = worker.create(&[3.0f32], [1]).unwrap();
            worker.attach("replaced", Arc::new(second)).unwrap();
            sender.send(worker.resource_count()).unwrap();
        });

        let count = receiver.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(count, 2);
        manager.close();
        assert_eq!(manager.resource_count(), 0);
    }

    #[test]
    fn test_closing_owner_keeps_its_arrays() {
        let engine = engine();
        let source = engine.new_base_manager().unwrap();
        let target = engine.new_base_manager().unwrap();
        let array = source.create(&[1.0f32], [1]).unwrap();

        // State of `close` once it has claimed the table but not yet closed the array.
        source.node.closed.store(true, Ordering::SeqCst);
        let claimed = std::mem::take(&mut *lock(&source.node.resources));

        assert!(matches!(array.attach_to(&target), Err(Error::IllegalState(_))));
        assert_eq!(target.resource_count(), 0);
        assert_eq!(array.manager(), source);
        assert_eq!(claimed.len(), 1);
    }

    #[test]
    fn test_root_is_never_closed() {
        let engine = engine();
        let root = engine.system_manager();
        let closed = Arc::new(AtomicUsize::new(0));
        root.attach("counter", Arc::new(Counter(closed.clone()))).unwrap();
        root.close();
        assert!(root.is_open());
        assert_eq!(root.resource_count(), 0);
        assert_eq!(closed.load(Ordering::SeqCst), 0);
        let array = root.create(&[1.0f32], [1]).unwrap();
        assert_eq!(array.to_vec::<f32>().unwrap(), vec![1.0]);
    }

    #[test]
    fn test_dropped_arrays_leave_the_table() {
        let engine = engine();
        let manager = engine.new_base_manager().unwrap();
        {
            let _array = manager.create(&[1.0f32], [1]).unwrap();
            assert_eq!(manager.resource_count(), 1);
        }
        assert_eq!(manager.resource_count(), 0);
    }

    #[test]
    fn test_session_lookup_walks_parents() {
        let engine = engine();
        let root_session = engine.system_manager().session().unwrap();
        let parent = engine.new_base_manager().unwrap();
        let child = parent.new_sub_manager().unwrap();
        assert_eq!(child.session().unwrap().uid(), root_session.uid());

        let installed = parent.install_session().unwrap();
        assert_eq!(child.session().unwrap().uid(), installed.uid());
    }

    #[test]
    fn test_placeholder_names_are_unique() {
        let engine = engine();
        let manager = engine.new_base_manager().unwrap();
        manager.install_session().unwrap();
        let x = manager.placeholder("x", Shape::new(vec![-1, 3]), DataType::Float32).unwrap();
        assert_eq!(x.name().as_deref(), Some("x"));
        assert!(matches!(
            manager.placeholder("x", [3], DataType::Float32),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(x.to_vec::<f32>(), Err(Error::UnresolvedDependency(_))));
    }

    #[test]
    fn test_sub_managers_from_many_threads() {
        let engine = engine();
        let parent = engine.new_base_manager().unwrap();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        let child = parent.new_sub_manager().unwrap();
                        child.create(&[1.0f32, 2.0], [2]).unwrap();
                        child.close();
                    }
                });
            }
        });
        assert_eq!(parent.resource_count(), 0);
        assert!(parent.is_open());
    }
}
