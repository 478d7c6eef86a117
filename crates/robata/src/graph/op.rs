//! Operator enum carried by graph nodes, with eager shape and dtype inference.

use crate::error::{Error, Result};
use crate::types::{DataType, Shape};
use crate::types::shape::{dims_agree, UNKNOWN_DIM};

/// Element-wise operators taking one array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Abs,
    Square,
    Sqrt,
    Cbrt,
    Floor,
    Ceil,
    Round,
    Trunc,
    Exp,
    Log,
    Log10,
    Log2,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Asinh,
    Acosh,
    Atanh,
    ToDegrees,
    ToRadians,
    LogicalNot,
    IsNaN,
    IsInfinite,
}

impl UnaryOp {
    /// `true` for operators producing a [`DataType::Boolean`] mask
    pub fn is_predicate(&self) -> bool {
        matches!(self, UnaryOp::LogicalNot | UnaryOp::IsNaN | UnaryOp::IsInfinite)
    }
}

/// Element-wise operators taking two broadcast-compatible operands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    /// Remainder with the sign of the divisor
    Mod,
    Pow,
    Maximum,
    Minimum,
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    LogicalAnd,
    LogicalOr,
    LogicalXor,
}

impl BinaryOp {
    /// `true` for comparisons and logical operators, which produce a boolean mask
    pub fn is_predicate(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Neq
                | BinaryOp::Gt
                | BinaryOp::Gte
                | BinaryOp::Lt
                | BinaryOp::Lte
                | BinaryOp::LogicalAnd
                | BinaryOp::LogicalOr
                | BinaryOp::LogicalXor
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
            BinaryOp::Pow => "pow",
            BinaryOp::Maximum => "maximum",
            BinaryOp::Minimum => "minimum",
            BinaryOp::Eq => "eq",
            BinaryOp::Neq => "neq",
            BinaryOp::Gt => "gt",
            BinaryOp::Gte => "gte",
            BinaryOp::Lt => "lt",
            BinaryOp::Lte => "lte",
            BinaryOp::LogicalAnd => "logical_and",
            BinaryOp::LogicalOr => "logical_or",
            BinaryOp::LogicalXor => "logical_xor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Sum,
    Prod,
    Mean,
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgReduceOp {
    Max,
    Min,
}

/// # Op
///
/// A single operation recorded in the graph. Axes are already resolved to
/// non-negative indices when an `Op` is built.
///
/// Every variant knows how to [`infer`](Op::infer) the shape and dtype of its
/// result from the shapes and dtypes of its inputs, so malformed operations are
/// rejected when they are recorded rather than when they are evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Unary(UnaryOp),
    Binary(BinaryOp),
    /// Binary operator whose right operand is a scalar
    Scalar { op: BinaryOp, value: f64 },
    Reduce { op: ReduceOp, axes: Vec<usize>, keep_dims: bool },
    ArgReduce { op: ArgReduceOp, axis: usize },
    CumSum { axis: usize },
    Softmax { axis: usize, temperature: f64, log: bool },
    /// Target shape, at most one dimension may be `-1`
    Reshape(Shape),
    Permute(Vec<usize>),
    Broadcast(Shape),
    ExpandDims(usize),
    Squeeze(Vec<usize>),
    Narrow { axis: usize, start: usize, len: usize },
    /// Repeat the whole array `repeats` times along `axis`
    Tile { axis: usize, repeats: usize },
    /// Repeat every element `repeats` times along `axis`
    Repeat { axis: usize, repeats: usize },
    Concat { axis: usize },
    Stack { axis: usize },
    Dot,
    Clip { min: f64, max: f64 },
    Cast(DataType),
    ZerosLike,
    OnesLike,
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::Unary(_) => "unary",
            Op::Binary(op) | Op::Scalar { op, .. } => op.name(),
            Op::Reduce { .. } => "reduce",
            Op::ArgReduce { .. } => "arg_reduce",
            Op::CumSum { .. } => "cumsum",
            Op::Softmax { .. } => "softmax",
            Op::Reshape(_) => "reshape",
            Op::Permute(_) => "transpose",
            Op::Broadcast(_) => "broadcast",
            Op::ExpandDims(_) => "expand_dims",
            Op::Squeeze(_) => "squeeze",
            Op::Narrow { .. } => "narrow",
            Op::Tile { .. } => "tile",
            Op::Repeat { .. } => "repeat",
            Op::Concat { .. } => "concat",
            Op::Stack { .. } => "stack",
            Op::Dot => "dot",
            Op::Clip { .. } => "clip",
            Op::Cast(_) => "as_type",
            Op::ZerosLike => "zeros_like",
            Op::OnesLike => "ones_like",
        }
    }

    /// Computes the shape and dtype this op produces from its inputs.
    ///
    /// # Parameters
    ///
    /// * `inputs` - Shape and dtype of every input node, in order
    ///
    /// # Returns
    ///
    /// The result shape and dtype, [`Error::ShapeMismatch`] when operands cannot
    /// be broadcast together, or [`Error::InvalidArgument`] for any other
    /// malformed operation
    pub fn infer(&self, inputs: &[(&Shape, DataType)]) -> Result<(Shape, DataType)> {
        self.check_arity(inputs.len())?;
        let (shape, dtype) = inputs[0];
        match self {
            Op::Unary(op) => {
                let dtype = if op.is_predicate() { DataType::Boolean } else { dtype };
                Ok((shape.clone(), dtype))
            }
            Op::Binary(op) => {
                let (rhs, rhs_dtype) = inputs[1];
                if dtype != rhs_dtype {
                    return Err(Error::InvalidArgument(format!(
                        "{} expects operands of one data type, got {} and {}",
                        op.name(), dtype, rhs_dtype
                    )));
                }
                let out = shape
                    .broadcast_with(rhs)
                    .ok_or_else(|| Error::shape_mismatch(op.name(), shape, rhs))?;
                Ok((out, predicate_type(op.is_predicate(), dtype)))
            }
            Op::Scalar { op, value } => {
                if !dtype.is_floating() && value.fract() != 0.0 {
                    return Err(Error::InvalidArgument(format!(
                        "{} of a {} array with non-integral scalar {}", op.name(), dtype, value
                    )));
                }
                Ok((shape.clone(), predicate_type(op.is_predicate(), dtype)))
            }
            Op::Reduce { axes, keep_dims, .. } => {
                check_axes(axes, shape.dimension())?;
                let dims = shape
                    .dims()
                    .iter()
                    .enumerate()
                    .filter_map(|(i, &d)| match (axes.contains(&i), keep_dims) {
                        (false, _) => Some(d),
                        (true, true) => Some(1),
                        (true, false) => None,
                    })
                    .collect::<Vec<_>>();
                Ok((Shape::new(dims), dtype))
            }
            Op::ArgReduce { axis, .. } => {
                check_axes(&[*axis], shape.dimension())?;
                let mut dims = shape.dims().to_vec();
                dims.remove(*axis);
                Ok((Shape::new(dims), DataType::Int64))
            }
            Op::CumSum { axis } => {
                check_axes(&[*axis], shape.dimension())?;
                Ok((shape.clone(), dtype))
            }
            Op::Softmax { axis, temperature, .. } => {
                check_axes(&[*axis], shape.dimension())?;
                if !dtype.is_floating() {
                    return Err(Error::InvalidArgument(format!(
                        "softmax requires a floating point array, got {}", dtype
                    )));
                }
                if !(*temperature > 0.0) || !temperature.is_finite() {
                    return Err(Error::InvalidArgument(format!(
                        "softmax temperature must be positive, got {}", temperature
                    )));
                }
                Ok((shape.clone(), dtype))
            }
            Op::Reshape(target) => Ok((infer_reshape(shape, target)?, dtype)),
            Op::Permute(axes) => {
                let rank = shape.dimension();
                let mut seen = vec![false; rank];
                if axes.len() != rank {
                    return Err(Error::InvalidArgument(format!(
                        "transpose of rank {} array needs {} axes, got {:?}", rank, rank, axes
                    )));
                }
                for &axis in axes {
                    if axis >= rank || seen[axis] {
                        return Err(Error::InvalidArgument(format!(
                            "{:?} is not a permutation of {} axes", axes, rank
                        )));
                    }
                    seen[axis] = true;
                }
                let dims = axes.iter().map(|&a| shape.dims()[a]).collect::<Vec<_>>();
                Ok((Shape::new(dims), dtype))
            }
            Op::Broadcast(target) => {
                target.validate()?;
                let fits = shape.dimension() <= target.dimension()
                    && shape.broadcast_with(target).is_some_and(|out| target.accepts(&out));
                if !fits {
                    return Err(Error::shape_mismatch("broadcast", shape, target));
                }
                Ok((target.clone(), dtype))
            }
            Op::ExpandDims(axis) => {
                if *axis > shape.dimension() {
                    return Err(Error::InvalidArgument(format!(
                        "cannot expand axis {} of rank {} array", axis, shape.dimension()
                    )));
                }
                let mut dims = shape.dims().to_vec();
                dims.insert(*axis, 1);
                Ok((Shape::new(dims), dtype))
            }
            Op::Squeeze(axes) => {
                check_axes(axes, shape.dimension())?;
                if let Some(&axis) = axes.iter().find(|&&a| !dims_agree(shape.dims()[a], 1)) {
                    return Err(Error::InvalidArgument(format!(
                        "cannot squeeze axis {} of shape {}", axis, shape
                    )));
                }
                let dims = shape
                    .dims()
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !axes.contains(i))
                    .map(|(_, &d)| d)
                    .collect::<Vec<_>>();
                Ok((Shape::new(dims), dtype))
            }
            Op::Narrow { axis, start, len } => {
                check_axes(&[*axis], shape.dimension())?;
                let dim = shape.dims()[*axis];
                if dim != UNKNOWN_DIM && (start + len) as i64 > dim {
                    return Err(Error::InvalidArgument(format!(
                        "range {}..{} is out of bounds for axis {} of shape {}",
                        start, start + len, axis, shape
                    )));
                }
                let mut dims = shape.dims().to_vec();
                dims[*axis] = *len as i64;
                Ok((Shape::new(dims), dtype))
            }
            Op::Tile { axis, repeats } | Op::Repeat { axis, repeats } => {
                check_axes(&[*axis], shape.dimension())?;
                if *repeats == 0 {
                    return Err(Error::InvalidArgument(format!(
                        "{} needs at least one repetition", self.name()
                    )));
                }
                let mut dims = shape.dims().to_vec();
                if dims[*axis] != UNKNOWN_DIM {
                    dims[*axis] *= *repeats as i64;
                }
                Ok((Shape::new(dims), dtype))
            }
            Op::Concat { axis } => {
                check_axes(&[*axis], shape.dimension())?;
                let mut dims = shape.dims().to_vec();
                for &(other, other_dtype) in &inputs[1..] {
                    check_same_type("concat", dtype, other_dtype)?;
                    let compatible = other.dimension() == shape.dimension()
                        && (0..dims.len())
                            .filter(|i| i != axis)
                            .all(|i| dims_agree(dims[i], other.dims()[i]));
                    if !compatible {
                        return Err(Error::shape_mismatch("concat", shape, other));
                    }
                    let extent = other.dims()[*axis];
                    dims[*axis] = if dims[*axis] == UNKNOWN_DIM || extent == UNKNOWN_DIM {
                        UNKNOWN_DIM
                    } else {
                        dims[*axis] + extent
                    };
                }
                Ok((Shape::new(dims), dtype))
            }
            Op::Stack { axis } => {
                if *axis > shape.dimension() {
                    return Err(Error::InvalidArgument(format!(
                        "cannot stack along axis {} of rank {} arrays", axis, shape.dimension()
                    )));
                }
                for &(other, other_dtype) in &inputs[1..] {
                    check_same_type("stack", dtype, other_dtype)?;
                    if !shape.accepts(other) {
                        return Err(Error::shape_mismatch("stack", shape, other));
                    }
                }
                let mut dims = shape.dims().to_vec();
                dims.insert(*axis, inputs.len() as i64);
                Ok((Shape::new(dims), dtype))
            }
            Op::Dot => {
                let (rhs, rhs_dtype) = inputs[1];
                check_same_type("dot", dtype, rhs_dtype)?;
                Ok((infer_dot(shape, rhs)?, dtype))
            }
            Op::Clip { min, max } => {
                if min > max {
                    return Err(Error::InvalidArgument(format!(
                        "clip range {}..{} is empty", min, max
                    )));
                }
                Ok((shape.clone(), dtype))
            }
            Op::Cast(target) => Ok((shape.clone(), *target)),
            Op::ZerosLike | Op::OnesLike => Ok((shape.clone(), dtype)),
        }
    }

    fn check_arity(&self, count: usize) -> Result<()> {
        let ok = match self {
            Op::Binary(_) | Op::Dot => count == 2,
            Op::Concat { .. } | Op::Stack { .. } => count >= 1,
            _ => count == 1,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::InvalidArgument(format!(
                "{} cannot take {} inputs", self.name(), count
            )))
        }
    }
}

fn predicate_type(is_predicate: bool, dtype: DataType) -> DataType {
    if is_predicate { DataType::Boolean } else { dtype }
}

fn check_same_type(op: &str, lhs: DataType, rhs: DataType) -> Result<()> {
    if lhs == rhs {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "{} expects operands of one data type, got {} and {}", op, lhs, rhs
        )))
    }
}

fn check_axes(axes: &[usize], rank: usize) -> Result<()> {
    match axes.iter().find(|&&a| a >= rank) {
        Some(axis) => Err(Error::InvalidArgument(format!(
            "axis {} is out of range for rank {}", axis, rank
        ))),
        None => Ok(()),
    }
}

fn infer_reshape(shape: &Shape, target: &Shape) -> Result<Shape> {
    target.validate()?;
    let unknown = target.dims().iter().filter(|&&d| d == UNKNOWN_DIM).count();
    if unknown > 1 {
        return Err(Error::InvalidArgument(format!(
            "reshape target {} may infer at most one dimension", target
        )));
    }
    if !shape.is_known() {
        return Ok(target.clone());
    }
    let size = shape.size();
    let known: i64 = target.dims().iter().filter(|&&d| d != UNKNOWN_DIM).product();
    if unknown == 0 {
        if known != size {
            return Err(Error::InvalidArgument(format!(
                "cannot reshape {} into {}", shape, target
            )));
        }
        return Ok(target.clone());
    }
    if known == 0 || size % known != 0 {
        return Err(Error::InvalidArgument(format!(
            "cannot reshape {} into {}", shape, target
        )));
    }
    let dims = target
        .dims()
        .iter()
        .map(|&d| if d == UNKNOWN_DIM { size / known } else { d })
        .collect::<Vec<_>>();
    Ok(Shape::new(dims))
}

fn infer_dot(lhs: &Shape, rhs: &Shape) -> Result<Shape> {
    let mismatch = || Error::shape_mismatch("dot", lhs, rhs);
    match (lhs.dimension(), rhs.dimension()) {
        (1, 1) => {
            if !dims_agree(lhs.dims()[0], rhs.dims()[0]) {
                return Err(mismatch());
            }
            Ok(Shape::scalar())
        }
        (l, r) if l >= 2 && r >= 2 => {
            let (m, k) = (lhs.dims()[l - 2], lhs.dims()[l - 1]);
            let (k2, n) = (rhs.dims()[r - 2], rhs.dims()[r - 1]);
            if !dims_agree(k, k2) {
                return Err(mismatch());
            }
            let batch = Shape::new(lhs.dims()[..l - 2].to_vec())
                .broadcast_with(&Shape::new(rhs.dims()[..r - 2].to_vec()))
                .ok_or_else(mismatch)?;
            let mut dims = batch.dims().to_vec();
            dims.extend([m, n]);
            Ok(Shape::new(dims))
        }
        _ => Err(Error::InvalidArgument(format!(
            "dot is defined for two vectors or two matrices, got {} and {}", lhs, rhs
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_input(shape: &Shape) -> (&Shape, DataType) {
        (shape, DataType::Float32)
    }

    #[test]
    fn test_binary_broadcasts() {
        let lhs = Shape::from([2, 3]);
        let rhs = Shape::from([3]);
        let (shape, dtype) = Op::Binary(BinaryOp::Add)
            .infer(&[f32_input(&lhs), f32_input(&rhs)])
            .unwrap();
        assert_eq!(shape, Shape::from([2, 3]));
        assert_eq!(dtype, DataType::Float32);
    }

    #[test]
    fn test_binary_shape_mismatch() {
        let lhs = Shape::from([2, 3]);
        let rhs = Shape::from([4]);
        let err = Op::Binary(BinaryOp::Mul)
            .infer(&[f32_input(&lhs), f32_input(&rhs)])
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_binary_dtype_mismatch() {
        let shape = Shape::from([2]);
        let err = Op::Binary(BinaryOp::Add)
            .infer(&[(&shape, DataType::Float32), (&shape, DataType::Int64)])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_comparison_yields_boolean() {
        let shape = Shape::from([2]);
        let (_, dtype) = Op::Scalar { op: BinaryOp::Gt, value: 1.0 }
            .infer(&[f32_input(&shape)])
            .unwrap();
        assert_eq!(dtype, DataType::Boolean);
    }

    #[test]
    fn test_integer_arrays_need_integral_scalars() {
        let shape = Shape::from([2]);
        let int = [(&shape, DataType::Int64)];
        assert!(matches!(
            Op::Scalar { op: BinaryOp::Add, value: 0.5 }.infer(&int),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Op::Scalar { op: BinaryOp::Lt, value: f64::NAN }.infer(&int),
            Err(Error::InvalidArgument(_))
        ));
        assert!(Op::Scalar { op: BinaryOp::Add, value: 2.0 }.infer(&int).is_ok());
        assert!(Op::Scalar { op: BinaryOp::Add, value: 0.5 }.infer(&[f32_input(&shape)]).is_ok());
    }

    #[test]
    fn test_softmax_temperature_must_be_positive() {
        let shape = Shape::from([3]);
        for temperature in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let op = Op::Softmax { axis: 0, temperature, log: false };
            assert!(matches!(op.infer(&[f32_input(&shape)]), Err(Error::InvalidArgument(_))));
        }
        let op = Op::Softmax { axis: 0, temperature: 0.5, log: false };
        assert!(op.infer(&[f32_input(&shape)]).is_ok());
    }

    #[test]
    fn test_reshape_infers_single_unknown() {
        let shape = Shape::from([2, 6]);
        let (out, _) = Op::Reshape(Shape::new(vec![3, -1]))
            .infer(&[f32_input(&shape)])
            .unwrap();
        assert_eq!(out, Shape::from([3, 4]));
    }

    #[test]
    fn test_reshape_rejects() {
        let shape = Shape::from([2, 6]);
        for target in [Shape::from([5]), Shape::new(vec![-1, -1]), Shape::new(vec![5, -1])] {
            let err = Op::Reshape(target).infer(&[f32_input(&shape)]).unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)));
        }
    }

    #[test]
    fn test_reduce_axes() {
        let shape = Shape::from([2, 3, 4]);
        let op = Op::Reduce { op: ReduceOp::Sum, axes: vec![0, 2], keep_dims: false };
        assert_eq!(op.infer(&[f32_input(&shape)]).unwrap().0, Shape::from([3]));
        let op = Op::Reduce { op: ReduceOp::Sum, axes: vec![1], keep_dims: true };
        assert_eq!(op.infer(&[f32_input(&shape)]).unwrap().0, Shape::from([2, 1, 4]));
    }

    #[test]
    fn test_argmax_is_int64() {
        let shape = Shape::from([2, 3]);
        let (out, dtype) = Op::ArgReduce { op: ArgReduceOp::Max, axis: 1 }
            .infer(&[f32_input(&shape)])
            .unwrap();
        assert_eq!(out, Shape::from([2]));
        assert_eq!(dtype, DataType::Int64);
    }

    #[test]
    fn test_permute_validation() {
        let shape = Shape::from([2, 3, 4]);
        let (out, _) = Op::Permute(vec![2, 0, 1]).infer(&[f32_input(&shape)]).unwrap();
        assert_eq!(out, Shape::from([4, 2, 3]));
        assert!(Op::Permute(vec![0, 0, 1]).infer(&[f32_input(&shape)]).is_err());
        assert!(Op::Permute(vec![0, 1]).infer(&[f32_input(&shape)]).is_err());
    }

    #[test]
    fn test_concat_and_stack() {
        let a = Shape::from([2, 3]);
        let b = Shape::from([4, 3]);
        let (out, _) = Op::Concat { axis: 0 }.infer(&[f32_input(&a), f32_input(&b)]).unwrap();
        assert_eq!(out, Shape::from([6, 3]));
        assert!(Op::Stack { axis: 0 }.infer(&[f32_input(&a), f32_input(&b)]).is_err());
        let (out, _) = Op::Stack { axis: 1 }.infer(&[f32_input(&a), f32_input(&a)]).unwrap();
        assert_eq!(out, Shape::from([2, 2, 3]));
    }

    #[test]
    fn test_dot_shapes() {
        let v = Shape::from([3]);
        assert_eq!(Op::Dot.infer(&[f32_input(&v), f32_input(&v)]).unwrap().0, Shape::scalar());
        let a = Shape::from([2, 3]);
        let b = Shape::from([3, 5]);
        assert_eq!(Op::Dot.infer(&[f32_input(&a), f32_input(&b)]).unwrap().0, Shape::from([2, 5]));
        assert!(matches!(
            Op::Dot.infer(&[f32_input(&a), f32_input(&a)]),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_broadcast_target() {
        let shape = Shape::from([1, 3]);
        let (out, _) = Op::Broadcast(Shape::from([4, 3])).infer(&[f32_input(&shape)]).unwrap();
        assert_eq!(out, Shape::from([4, 3]));
        assert!(Op::Broadcast(Shape::from([4, 2])).infer(&[f32_input(&shape)]).is_err());
        assert!(Op::Broadcast(Shape::from([3])).infer(&[f32_input(&shape)]).is_err());
    }

    #[test]
    fn test_repeat_rejects_zero() {
        let shape = Shape::from([2]);
        assert!(Op::Repeat { axis: 0, repeats: 0 }.infer(&[f32_input(&shape)]).is_err());
        let (out, _) = Op::Tile { axis: 0, repeats: 3 }.infer(&[f32_input(&shape)]).unwrap();
        assert_eq!(out, Shape::from([6]));
    }

    #[test]
    fn test_arity_checked() {
        let shape = Shape::from([2]);
        assert!(Op::Binary(BinaryOp::Add).infer(&[f32_input(&shape)]).is_err());
    }
}
