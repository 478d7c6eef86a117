//! # NDArray
//!
//! Handles to tensor values recorded in the engine's graph.
//!
//! Operations on an [`NDArray`] never compute: they append a node and return
//! a new array bound to it. Values are produced when they are read, through
//! [`NDArray::to_vec`], [`NDArray::tensor`] or a [`Session`](crate::Session).

mod list;
mod operand;

use std::fmt::{self, Debug, Display};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::trace;
use uuid::Uuid;
use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::graph::{ArgReduceOp, BinaryOp, NodeId, Op, ReduceOp, UnaryOp};
use crate::manager::{Closeable, NDManager, Resource};
use crate::sync::{read, write};
use crate::types::shape::normalize_axis;
use crate::types::{DataType, Device, Element, HostBuffer, Shape};

pub use list::NDList;
pub use operand::Operand;

/// Elements printed by [`Display`] before the output is elided
const DISPLAY_LIMIT: usize = 20;

/// Shared state of one array. The owner's resource table refers to it weakly.
pub(crate) struct ArrayInner<B: Backend> {
    uid: String,
    owner: RwLock<NDManager<B>>,
    /// `None` once the array is closed
    node: RwLock<Option<NodeId>>,
    name: RwLock<Option<String>>,
}

impl<B: Backend> Drop for ArrayInner<B> {
    fn drop(&mut self) {
        let owner = self.owner.get_mut().unwrap_or_else(PoisonError::into_inner);
        owner.detach(&self.uid);
    }
}

/// # NDArray
///
/// A tensor value with a process-unique uid, owned by exactly one
/// [`NDManager`] at a time.
///
/// Cloning the handle keeps the same identity. Closing the array, directly or
/// through its owner, makes every later access fail with
/// [`Error::IllegalState`] while other arrays computed from it stay usable.
///
/// Binary operations accept anything convertible into an [`Operand`]: another
/// array or a plain number.
///
/// ```ignore
/// let x = manager.full([2, 2], 5.0, DataType::Float32, None)?;
/// let y = x.add(3)?;
/// assert_eq!(y.to_vec::<f32>()?, vec![8.0; 4]);
/// ```
pub struct NDArray<B: Backend> {
    inner: Arc<ArrayInner<B>>,
}

impl<B: Backend> Clone for NDArray<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

macro_rules! unary_ops {
    ($($(#[$doc:meta])* $name:ident => $op:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name(&self) -> Result<NDArray<B>> {
                self.apply(Op::Unary(UnaryOp::$op), &[])
            }
        )*
    };
}

macro_rules! binary_ops {
    ($($(#[$doc:meta])* $name:ident => $op:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name<'a>(&self, other: impl Into<Operand<'a, B>>) -> Result<NDArray<B>> {
                let (manager, node) = self.binary_node(BinaryOp::$op, other.into())?;
                manager.wrap(node, None)
            }
        )*
    };
}

macro_rules! in_place_ops {
    ($($(#[$doc:meta])* $name:ident => $op:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name<'a>(&self, other: impl Into<Operand<'a, B>>) -> Result<&Self> {
                let (_, node) = self.binary_node(BinaryOp::$op, other.into())?;
                self.rebind(node)
            }
        )*
    };
}

impl<B: Backend> NDArray<B> {
    pub(crate) fn bind(owner: NDManager<B>, node: NodeId, name: Option<String>) -> Self {
        Self {
            inner: Arc::new(ArrayInner {
                uid: Uuid::new_v4().to_string(),
                owner: RwLock::new(owner),
                node: RwLock::new(Some(node)),
                name: RwLock::new(name),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ArrayInner<B>>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ArrayInner<B>> {
        Arc::downgrade(&self.inner)
    }

    pub fn uid(&self) -> &str {
        &self.inner.uid
    }

    /// The manager currently owning this array
    pub fn manager(&self) -> NDManager<B> {
        read(&self.inner.owner).clone()
    }

    pub fn name(&self) -> Option<String> {
        read(&self.inner.name).clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *write(&self.inner.name) = Some(name.into());
    }

    pub fn is_closed(&self) -> bool {
        read(&self.inner.node).is_none()
    }

    pub(crate) fn node_id(&self) -> Result<NodeId> {
        read(&self.inner.node)
            .ok_or_else(|| Error::IllegalState(format!("array {} is closed", self.uid())))
    }

    fn describe(&self) -> Result<(Shape, DataType, Device)> {
        let node = self.node_id()?;
        self.manager().describe(node)
    }

    pub fn shape(&self) -> Result<Shape> {
        self.describe().map(|(shape, _, _)| shape)
    }

    pub fn data_type(&self) -> Result<DataType> {
        self.describe().map(|(_, dtype, _)| dtype)
    }

    pub fn device(&self) -> Result<Device> {
        self.describe().map(|(_, _, device)| device)
    }

    /// Number of elements, `-1` while a dimension is unknown
    pub fn size(&self) -> Result<i64> {
        self.shape().map(|shape| shape.size())
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.size().map(|size| size == 0)
    }

    pub fn shape_equals(&self, other: &NDArray<B>) -> Result<bool> {
        Ok(self.shape()? == other.shape()?)
    }

    /// `true` when both arrays have the same shape, dtype and elements
    pub fn content_equals(&self, other: &NDArray<B>) -> Result<bool> {
        if self.shape()? != other.shape()? || self.data_type()? != other.data_type()? {
            return Ok(false);
        }
        Ok(self.to_buffer()? == other.to_buffer()?)
    }

    /// Evaluates this array's node and returns the backend tensor
    pub fn tensor(&self) -> Result<B::Tensor> {
        let node = self.node_id()?;
        self.manager().evaluate(node)
    }

    pub fn to_buffer(&self) -> Result<HostBuffer> {
        let tensor = self.tensor()?;
        self.manager().backend().to_host(&tensor)
    }

    /// Evaluates the array and copies its elements, row-major, as `T`
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.to_buffer().map(T::from_buffer)
    }

    /// The single element of a one-element array
    pub fn to_scalar<T: Element>(&self) -> Result<T> {
        let values = self.to_vec::<T>()?;
        match values.as_slice() {
            [value] => Ok(*value),
            _ => Err(Error::InvalidArgument(format!(
                "array of {} elements is not a scalar", values.len()
            ))),
        }
    }

    /// Values are baked into the graph, so arrays cannot be overwritten
    pub fn set(&self, _buffer: HostBuffer) -> Result<()> {
        Err(Error::Unsupported(
            "arrays are immutable graph values and cannot be set".to_string(),
        ))
    }

    /// Releases this array and detaches it from its owner. Closing twice is a no-op.
    pub fn close(&self) {
        if write(&self.inner.node).take().is_some() {
            read(&self.inner.owner).detach(self.uid());
            trace!(array = %self.uid(), "array closed");
        }
    }

    /// Moves ownership to `manager`.
    ///
    /// The array's owner lock is held throughout. The old owner gives the
    /// array up first; if it has already started closing, its close owns the
    /// array and the move fails with [`Error::IllegalState`].
    pub fn attach_to(&self, manager: &NDManager<B>) -> Result<()> {
        self.node_id()?;
        let mut owner = write(&self.inner.owner);
        if !owner.shares_engine(manager) {
            return Err(Error::InvalidArgument(
                "cannot move an array to another engine".to_string(),
            ));
        }
        if *owner == *manager {
            return Ok(());
        }
        if !owner.detach_resource(self.uid()) && !owner.is_open() {
            return Err(Error::IllegalState(format!(
                "array {} belongs to closed manager {}", self.uid(), owner.uid()
            )));
        }
        if let Err(err) = manager.attach_resource(self.uid(), Resource::Array(self.downgrade())) {
            if owner.attach_resource(self.uid(), Resource::Array(self.downgrade())).is_err() {
                // Neither table holds the array any more.
                write(&self.inner.node).take();
            }
            return Err(err);
        }
        *owner = manager.clone();
        Ok(())
    }

    fn apply(&self, op: Op, others: &[&NDArray<B>]) -> Result<NDArray<B>> {
        let manager = self.manager();
        let mut inputs = Vec::with_capacity(others.len() + 1);
        inputs.push(self);
        inputs.extend_from_slice(others);
        let node = manager.append_op(op, &inputs)?;
        manager.wrap(node, None)
    }

    fn binary_node(&self, op: BinaryOp, other: Operand<'_, B>) -> Result<(NDManager<B>, NodeId)> {
        let manager = self.manager();
        let node = match other {
            Operand::Scalar(value) => manager.append_op(Op::Scalar { op, value }, &[self])?,
            Operand::Array(rhs) => manager.append_op(Op::Binary(op), &[self, rhs])?,
        };
        Ok((manager, node))
    }

    fn rebind(&self, node: NodeId) -> Result<&Self> {
        let mut slot = write(&self.inner.node);
        if slot.is_none() {
            return Err(Error::IllegalState(format!("array {} is closed", self.uid())));
        }
        *slot = Some(node);
        Ok(self)
    }

    binary_ops! {
        add => Add,
        sub => Sub,
        mul => Mul,
        div => Div,
        /// Remainder with the sign of the divisor
        modulo => Mod,
        pow => Pow,
        maximum => Maximum,
        minimum => Minimum,
        eq => Eq,
        neq => Neq,
        gt => Gt,
        gte => Gte,
        lt => Lt,
        lte => Lte,
        logical_and => LogicalAnd,
        logical_or => LogicalOr,
        logical_xor => LogicalXor,
    }

    in_place_ops! {
        /// Adds in place: the array keeps its uid and now refers to the sum
        addi => Add,
        subi => Sub,
        muli => Mul,
        divi => Div,
        modi => Mod,
        powi => Pow,
    }

    /// Negates in place
    pub fn negi(&self) -> Result<&Self> {
        let manager = self.manager();
        let node = manager.append_op(Op::Unary(UnaryOp::Neg), &[self])?;
        self.rebind(node)
    }

    unary_ops! {
        neg => Neg,
        abs => Abs,
        square => Square,
        sqrt => Sqrt,
        cbrt => Cbrt,
        floor => Floor,
        ceil => Ceil,
        round => Round,
        trunc => Trunc,
        exp => Exp,
        log => Log,
        log10 => Log10,
        log2 => Log2,
        sin => Sin,
        cos => Cos,
        tan => Tan,
        asin => Asin,
        acos => Acos,
        atan => Atan,
        sinh => Sinh,
        cosh => Cosh,
        tanh => Tanh,
        asinh => Asinh,
        acosh => Acosh,
        atanh => Atanh,
        to_degrees => ToDegrees,
        to_radians => ToRadians,
        /// Boolean mask of the zero elements
        logical_not => LogicalNot,
        is_nan => IsNaN,
        is_infinite => IsInfinite,
    }

    fn reduce_all(&self, op: ReduceOp) -> Result<NDArray<B>> {
        let axes = (0..self.shape()?.dimension()).collect();
        self.apply(Op::Reduce { op, axes, keep_dims: false }, &[])
    }

    fn reduce_axes(&self, op: ReduceOp, axes: &[i64], keep_dims: bool) -> Result<NDArray<B>> {
        let axes = self.normalize_axes(axes)?;
        self.apply(Op::Reduce { op, axes, keep_dims }, &[])
    }

    fn normalize_axes(&self, axes: &[i64]) -> Result<Vec<usize>> {
        let rank = self.shape()?.dimension();
        let mut resolved = axes
            .iter()
            .map(|&axis| normalize_axis(axis, rank))
            .collect::<Result<Vec<_>>>()?;
        resolved.sort_unstable();
        resolved.dedup();
        Ok(resolved)
    }

    fn normalize(&self, axis: i64) -> Result<usize> {
        self.shape()?.normalize_axis(axis)
    }

    /// Sum of every element, as a rank-0 array
    pub fn sum(&self) -> Result<NDArray<B>> {
        self.reduce_all(ReduceOp::Sum)
    }

    pub fn prod(&self) -> Result<NDArray<B>> {
        self.reduce_all(ReduceOp::Prod)
    }

    pub fn mean(&self) -> Result<NDArray<B>> {
        self.reduce_all(ReduceOp::Mean)
    }

    pub fn max(&self) -> Result<NDArray<B>> {
        self.reduce_all(ReduceOp::Max)
    }

    pub fn min(&self) -> Result<NDArray<B>> {
        self.reduce_all(ReduceOp::Min)
    }

    /// Sums along `axes`; negative axes count from the end
    pub fn sum_axes(&self, axes: &[i64], keep_dims: bool) -> Result<NDArray<B>> {
        self.reduce_axes(ReduceOp::Sum, axes, keep_dims)
    }

    pub fn prod_axes(&self, axes: &[i64], keep_dims: bool) -> Result<NDArray<B>> {
        self.reduce_axes(ReduceOp::Prod, axes, keep_dims)
    }

    pub fn mean_axes(&self, axes: &[i64], keep_dims: bool) -> Result<NDArray<B>> {
        self.reduce_axes(ReduceOp::Mean, axes, keep_dims)
    }

    pub fn max_axes(&self, axes: &[i64], keep_dims: bool) -> Result<NDArray<B>> {
        self.reduce_axes(ReduceOp::Max, axes, keep_dims)
    }

    pub fn min_axes(&self, axes: &[i64], keep_dims: bool) -> Result<NDArray<B>> {
        self.reduce_axes(ReduceOp::Min, axes, keep_dims)
    }

    /// `Int64` indices of the largest elements along `axis`
    pub fn argmax(&self, axis: i64) -> Result<NDArray<B>> {
        let axis = self.normalize(axis)?;
        self.apply(Op::ArgReduce { op: ArgReduceOp::Max, axis }, &[])
    }

    pub fn argmin(&self, axis: i64) -> Result<NDArray<B>> {
        let axis = self.normalize(axis)?;
        self.apply(Op::ArgReduce { op: ArgReduceOp::Min, axis }, &[])
    }

    pub fn cumsum(&self, axis: i64) -> Result<NDArray<B>> {
        let axis = self.normalize(axis)?;
        self.apply(Op::CumSum { axis }, &[])
    }

    /// Softmax along `axis` of the array divided by `temperature`
    pub fn softmax(&self, axis: i64, temperature: f64) -> Result<NDArray<B>> {
        let axis = self.normalize(axis)?;
        self.apply(Op::Softmax { axis, temperature, log: false }, &[])
    }

    pub fn log_softmax(&self, axis: i64) -> Result<NDArray<B>> {
        let axis = self.normalize(axis)?;
        self.apply(Op::Softmax { axis, temperature: 1.0, log: true }, &[])
    }

    /// Reshapes to `shape`; one dimension may be `-1` and is inferred
    pub fn reshape(&self, shape: impl Into<Shape>) -> Result<NDArray<B>> {
        self.apply(Op::Reshape(shape.into()), &[])
    }

    pub fn flatten(&self) -> Result<NDArray<B>> {
        self.reshape(Shape::new(vec![-1]))
    }

    /// Inserts a dimension of size one at `axis`
    pub fn expand_dims(&self, axis: i64) -> Result<NDArray<B>> {
        let axis = normalize_axis(axis, self.shape()?.dimension() + 1)?;
        self.apply(Op::ExpandDims(axis), &[])
    }

    /// Removes every dimension of size one
    pub fn squeeze(&self) -> Result<NDArray<B>> {
        let axes = self
            .shape()?
            .dims()
            .iter()
            .enumerate()
            .filter(|&(_, &d)| d == 1)
            .map(|(i, _)| i)
            .collect();
        self.apply(Op::Squeeze(axes), &[])
    }

    pub fn squeeze_axes(&self, axes: &[i64]) -> Result<NDArray<B>> {
        let axes = self.normalize_axes(axes)?;
        self.apply(Op::Squeeze(axes), &[])
    }

    /// Reverses the order of the axes
    pub fn transpose(&self) -> Result<NDArray<B>> {
        let axes = (0..self.shape()?.dimension()).rev().collect();
        self.apply(Op::Permute(axes), &[])
    }

    /// Reorders the axes so that axis `i` of the result is `axes[i]` of this array
    pub fn transpose_axes(&self, axes: &[usize]) -> Result<NDArray<B>> {
        self.apply(Op::Permute(axes.to_vec()), &[])
    }

    pub fn swap_axes(&self, first: i64, second: i64) -> Result<NDArray<B>> {
        let rank = self.shape()?.dimension();
        let (first, second) = (normalize_axis(first, rank)?, normalize_axis(second, rank)?);
        let mut axes = (0..rank).collect::<Vec<_>>();
        axes.swap(first, second);
        self.apply(Op::Permute(axes), &[])
    }

    pub fn broadcast(&self, shape: impl Into<Shape>) -> Result<NDArray<B>> {
        self.apply(Op::Broadcast(shape.into()), &[])
    }

    /// Splits into `sections` equal parts along `axis`
    pub fn split(&self, sections: usize, axis: i64) -> Result<NDList<B>> {
        let shape = self.shape()?;
        let axis = shape.normalize_axis(axis)?;
        let extent = usize::try_from(shape.dims()[axis]).map_err(|_| {
            Error::InvalidArgument(format!("cannot split unknown axis {} of {}", axis, shape))
        })?;
        if sections == 0 || extent % sections != 0 {
            return Err(Error::InvalidArgument(format!(
                "axis {} of {} does not split into {} sections", axis, shape, sections
            )));
        }
        let len = extent / sections;
        (0..sections)
            .map(|i| self.apply(Op::Narrow { axis, start: i * len, len }, &[]))
            .collect::<Result<Vec<_>>>()
            .map(NDList::from)
    }

    /// Repeats the whole array `repeats` times along `axis`
    pub fn tile(&self, axis: i64, repeats: usize) -> Result<NDArray<B>> {
        let axis = self.normalize(axis)?;
        self.apply(Op::Tile { axis, repeats }, &[])
    }

    /// Repeats each element `repeats` times along `axis`
    pub fn repeat(&self, axis: i64, repeats: usize) -> Result<NDArray<B>> {
        let axis = self.normalize(axis)?;
        self.apply(Op::Repeat { axis, repeats }, &[])
    }

    /// Joins `arrays` along an existing axis; the result belongs to the first array's manager
    pub fn concat(arrays: &NDList<B>, axis: i64) -> Result<NDArray<B>> {
        let (first, rest) = split_list(arrays, "concat")?;
        let axis = first.normalize(axis)?;
        first.apply(Op::Concat { axis }, &rest)
    }

    /// Joins `arrays` along a new axis
    pub fn stack(arrays: &NDList<B>, axis: i64) -> Result<NDArray<B>> {
        let (first, rest) = split_list(arrays, "stack")?;
        let axis = normalize_axis(axis, first.shape()?.dimension() + 1)?;
        first.apply(Op::Stack { axis }, &rest)
    }

    /// Inner product of two vectors, or (batched) matrix product
    pub fn dot(&self, other: &NDArray<B>) -> Result<NDArray<B>> {
        self.apply(Op::Dot, &[other])
    }

    /// Clamps every element into `[min, max]`
    pub fn clip(&self, min: f64, max: f64) -> Result<NDArray<B>> {
        self.apply(Op::Clip { min, max }, &[])
    }

    pub fn as_type(&self, data_type: DataType) -> Result<NDArray<B>> {
        self.apply(Op::Cast(data_type), &[])
    }

    pub fn zeros_like(&self) -> Result<NDArray<B>> {
        self.apply(Op::ZerosLike, &[])
    }

    pub fn ones_like(&self) -> Result<NDArray<B>> {
        self.apply(Op::OnesLike, &[])
    }
}

fn split_list<'a, B: Backend>(
    arrays: &'a NDList<B>,
    op: &str,
) -> Result<(&'a NDArray<B>, Vec<&'a NDArray<B>>)> {
    let mut iter = arrays.iter();
    let first = iter
        .next()
        .ok_or_else(|| Error::InvalidArgument(format!("{} needs at least one array", op)))?;
    Ok((first, iter.collect()))
}

impl<B: Backend> Closeable for NDArray<B> {
    fn close(&self) -> Result<()> {
        NDArray::close(self);
        Ok(())
    }
}

impl<B: Backend> Debug for NDArray<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NDArray")
            .field("uid", &self.uid())
            .field("name", &self.name())
            .field("node", &read(&self.inner.node).map(|node| node.index()))
            .finish()
    }
}

impl<B: Backend> Display for NDArray<B> {
    /// Prints `ND: <shape> <device> <dtype>` followed by the leading elements
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Ok((shape, data_type, device)) = self.describe() else {
            return write!(f, "ND: closed");
        };
        write!(f, "ND: {} {} {}", shape, device, data_type)?;
        match self.to_buffer() {
            Ok(buffer) => {
                let values = buffer.to_f64_vec();
                let shown = values.iter().take(DISPLAY_LIMIT).map(f64::to_string).collect::<Vec<_>>();
                let ellipsis = if values.len() > DISPLAY_LIMIT { ", ..." } else { "" };
                write!(f, " [{}{}]", shown.join(", "), ellipsis)
            }
            Err(_) => write!(f, " <unevaluated>"),
        }
    }
}
