use std::collections::HashMap;
use std::f64::consts::{LN_10, LN_2, PI};
use std::path::Path;
use candle_core::{DType, DeviceLocation, Tensor};
use tracing::trace;
use super::Backend;
use crate::constant::ENGINE_NAME;
use crate::error::{Error, Result};
use crate::graph::{ArgReduceOp, BinaryOp, Op, ReduceOp, UnaryOp};
use crate::types::{DataType, Device, HostBuffer, Shape};

/// Release line of candle-core this adapter is written against
const CANDLE_VERSION: &str = "0.8";

/// # CandleBackend
///
/// [`Backend`] over candle-core tensors.
///
/// Booleans are stored as `U8` masks of `0`/`1`. Candle has no `I32` or `I8`
/// dtype, so those kinds are unsupported here.
#[derive(Debug, Clone, Copy, Default)]
pub struct CandleBackend;

impl Backend for CandleBackend {
    type Tensor = Tensor;
    type DType = DType;
    type Device = candle_core::Device;

    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn version(&self) -> String {
        CANDLE_VERSION.to_string()
    }

    fn gpu_count(&self) -> usize {
        usize::from(candle_core::utils::cuda_is_available())
    }

    fn to_native_dtype(data_type: DataType) -> Option<DType> {
        match data_type {
            DataType::Float32 => Some(DType::F32),
            DataType::Float64 => Some(DType::F64),
            DataType::Float16 => Some(DType::F16),
            DataType::Int64 => Some(DType::I64),
            DataType::Uint8 | DataType::Boolean => Some(DType::U8),
            DataType::Int8 | DataType::Int32 | DataType::Unknown => None,
        }
    }

    fn from_native_dtype(dtype: DType) -> Option<DataType> {
        match dtype {
            DType::F32 => Some(DataType::Float32),
            DType::F64 => Some(DataType::Float64),
            DType::F16 => Some(DataType::Float16),
            DType::I64 => Some(DataType::Int64),
            DType::U8 => Some(DataType::Uint8),
            _ => None,
        }
    }

    fn native_device(&self, device: Device) -> Result<candle_core::Device> {
        if device.is_gpu() {
            candle_core::Device::new_cuda(device.id()).map_err(|err| {
                Error::Unsupported(format!("device {} is unavailable: {}", device, err))
            })
        } else {
            Ok(candle_core::Device::Cpu)
        }
    }

    fn shape(tensor: &Tensor) -> Shape {
        Shape::from(tensor.dims())
    }

    fn data_type(tensor: &Tensor) -> Result<DataType> {
        Self::from_native_dtype(tensor.dtype()).ok_or_else(|| {
            Error::Unsupported(format!("candle dtype {:?} has no data type", tensor.dtype()))
        })
    }

    fn device(tensor: &Tensor) -> Device {
        match tensor.device().location() {
            DeviceLocation::Cpu => Device::cpu(),
            DeviceLocation::Cuda { gpu_id } | DeviceLocation::Metal { gpu_id } => Device::gpu(gpu_id),
        }
    }

    fn from_host(
        &self,
        buffer: HostBuffer,
        dims: &[usize],
        data_type: DataType,
        device: Device,
    ) -> Result<Tensor> {
        let native = native_or_unsupported(data_type)?;
        let dev = self.native_device(device)?;
        let tensor = match buffer {
            HostBuffer::F32(values) => Tensor::from_vec(values, dims, &dev)?,
            HostBuffer::F64(values) => Tensor::from_vec(values, dims, &dev)?,
            HostBuffer::I32(values) => {
                let widened = values.into_iter().map(i64::from).collect::<Vec<_>>();
                Tensor::from_vec(widened, dims, &dev)?
            }
            HostBuffer::I64(values) => Tensor::from_vec(values, dims, &dev)?,
            HostBuffer::U8(values) => Tensor::from_vec(values, dims, &dev)?,
        };
        if data_type == DataType::Boolean {
            return truthy(&tensor);
        }
        Ok(tensor.to_dtype(native)?)
    }

    fn to_host(&self, tensor: &Tensor) -> Result<HostBuffer> {
        let flat = tensor.reshape(tensor.elem_count())?;
        Ok(match tensor.dtype() {
            DType::F32 => HostBuffer::F32(flat.to_vec1()?),
            DType::F64 => HostBuffer::F64(flat.to_vec1()?),
            DType::I64 => HostBuffer::I64(flat.to_vec1()?),
            DType::U8 => HostBuffer::U8(flat.to_vec1()?),
            DType::F16 | DType::BF16 => HostBuffer::F32(flat.to_dtype(DType::F32)?.to_vec1()?),
            DType::U32 => HostBuffer::I64(flat.to_dtype(DType::I64)?.to_vec1()?),
            other => {
                return Err(Error::Unsupported(format!(
                    "cannot copy candle dtype {:?} to the host", other
                )))
            }
        })
    }

    fn full(&self, value: f64, dims: &[usize], data_type: DataType, device: Device) -> Result<Tensor> {
        let native = native_or_unsupported(data_type)?;
        let value = if data_type == DataType::Boolean {
            f64::from(u8::from(value != 0.0))
        } else {
            value
        };
        let dev = self.native_device(device)?;
        Ok(Tensor::new(value, &dev)?
            .broadcast_as(dims)?
            .to_dtype(native)?
            .contiguous()?)
    }

    fn random_uniform(
        &self,
        low: f64,
        high: f64,
        dims: &[usize],
        data_type: DataType,
        device: Device,
    ) -> Result<Tensor> {
        let dev = self.native_device(device)?;
        Ok(match data_type {
            DataType::Float32 => Tensor::rand(low as f32, high as f32, dims, &dev)?,
            DataType::Float64 => Tensor::rand(low, high, dims, &dev)?,
            DataType::Float16 => {
                Tensor::rand(low as f32, high as f32, dims, &dev)?.to_dtype(DType::F16)?
            }
            other => {
                return Err(Error::Unsupported(format!(
                    "uniform sampling of {} arrays", other
                )))
            }
        })
    }

    fn random_normal(
        &self,
        mean: f64,
        std: f64,
        dims: &[usize],
        data_type: DataType,
        device: Device,
    ) -> Result<Tensor> {
        let dev = self.native_device(device)?;
        Ok(match data_type {
            DataType::Float32 => Tensor::randn(mean as f32, std as f32, dims, &dev)?,
            DataType::Float64 => Tensor::randn(mean, std, dims, &dev)?,
            DataType::Float16 => {
                Tensor::randn(mean as f32, std as f32, dims, &dev)?.to_dtype(DType::F16)?
            }
            other => {
                return Err(Error::Unsupported(format!(
                    "normal sampling of {} arrays", other
                )))
            }
        })
    }

    fn apply(&self, op: &Op, inputs: &[&Tensor]) -> Result<Tensor> {
        let first: &Tensor = inputs
            .first()
            .copied()
            .ok_or_else(|| Error::InvalidArgument(format!("{} received no inputs", op.name())))?;
        trace!(op = op.name(), inputs = inputs.len(), "candle apply");
        match op {
            Op::Unary(op) => unary(*op, first),
            Op::Binary(op) => binary(*op, first, second(op.name(), inputs)?),
            Op::Scalar { op: BinaryOp::Pow, value } => map_host(first, |x| x.powf(*value)),
            Op::Scalar { op: BinaryOp::Mod, value } => map_host(first, |x| floor_mod(x, *value)),
            Op::Scalar { op, value } => binary(*op, first, &scalar_like(*value, first)?),
            Op::Reduce { op, axes, keep_dims } => reduce(*op, axes, *keep_dims, first),
            Op::ArgReduce { op, axis } => {
                let indices = match op {
                    ArgReduceOp::Max => first.argmax(*axis)?,
                    ArgReduceOp::Min => first.argmin(*axis)?,
                };
                Ok(indices.to_dtype(DType::I64)?)
            }
            Op::CumSum { axis } => {
                if first.dtype().is_float() {
                    Ok(first.cumsum(*axis)?)
                } else {
                    Ok(first.to_dtype(DType::F64)?.cumsum(*axis)?.to_dtype(first.dtype())?)
                }
            }
            Op::Softmax { axis, temperature, log } => softmax(first, *axis, *temperature, *log),
            Op::Reshape(target) => {
                let known: usize = target
                    .dims()
                    .iter()
                    .filter(|&&d| d >= 0)
                    .map(|&d| d as usize)
                    .product();
                let dims = target
                    .dims()
                    .iter()
                    .map(|&d| if d < 0 { first.elem_count() / known.max(1) } else { d as usize })
                    .collect::<Vec<_>>();
                Ok(first.reshape(dims)?)
            }
            Op::Permute(axes) => Ok(first.permute(axes.clone())?.contiguous()?),
            Op::Broadcast(target) => {
                let offset = target.dimension() - first.rank();
                let dims = target
                    .dims()
                    .iter()
                    .enumerate()
                    .map(|(i, &d)| match usize::try_from(d) {
                        Ok(d) => d,
                        Err(_) if i >= offset => first.dims()[i - offset],
                        Err(_) => 1,
                    })
                    .collect::<Vec<_>>();
                Ok(first.broadcast_as(dims)?.contiguous()?)
            }
            Op::ExpandDims(axis) => Ok(first.unsqueeze(*axis)?),
            Op::Squeeze(axes) => squeeze_all(first.clone(), axes),
            Op::Narrow { axis, start, len } => Ok(first.narrow(*axis, *start, *len)?),
            Op::Tile { axis, repeats } => {
                let copies = vec![first.clone(); *repeats];
                Ok(Tensor::cat(&copies, *axis)?)
            }
            Op::Repeat { axis, repeats } => {
                let expanded = first.unsqueeze(*axis + 1)?;
                let mut target = expanded.dims().to_vec();
                target[*axis + 1] = *repeats;
                let mut dims = first.dims().to_vec();
                dims[*axis] *= *repeats;
                Ok(expanded.broadcast_as(target)?.contiguous()?.reshape(dims)?)
            }
            Op::Concat { axis } => Ok(Tensor::cat(inputs, *axis)?),
            Op::Stack { axis } => Ok(Tensor::stack(inputs, *axis)?),
            Op::Dot => dot(first, second("dot", inputs)?),
            Op::Clip { min, max } => Ok(first
                .broadcast_maximum(&scalar_like(*min, first)?)?
                .broadcast_minimum(&scalar_like(*max, first)?)?),
            Op::Cast(DataType::Boolean) => truthy(first),
            Op::Cast(data_type) => Ok(first.to_dtype(native_or_unsupported(*data_type)?)?),
            Op::ZerosLike => Ok(first.zeros_like()?),
            Op::OnesLike => Ok(first.ones_like()?),
        }
    }

    fn load(&self, path: &Path, device: Device) -> Result<Vec<(String, Tensor)>> {
        let dev = self.native_device(device)?;
        let mut tensors = candle_core::safetensors::load(path, &dev)?
            .into_iter()
            .collect::<Vec<_>>();
        tensors.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(tensors)
    }

    fn save(&self, tensors: &[(String, Tensor)], path: &Path) -> Result<()> {
        let named = tensors.iter().cloned().collect::<HashMap<_, _>>();
        candle_core::safetensors::save(&named, path)?;
        Ok(())
    }
}

fn native_or_unsupported(data_type: DataType) -> Result<DType> {
    CandleBackend::to_native_dtype(data_type)
        .ok_or_else(|| Error::Unsupported(format!("candle has no dtype for {}", data_type)))
}

fn second<'a>(op: &str, inputs: &[&'a Tensor]) -> Result<&'a Tensor> {
    inputs
        .get(1)
        .copied()
        .ok_or_else(|| Error::InvalidArgument(format!("{} needs two inputs", op)))
}

/// Rank-0 tensor holding `value` in the dtype and device of `like`
fn scalar_like(value: f64, like: &Tensor) -> Result<Tensor> {
    Ok(Tensor::new(value, like.device())?.to_dtype(like.dtype())?)
}

/// `U8` mask of the non-zero elements
fn truthy(tensor: &Tensor) -> Result<Tensor> {
    Ok(tensor.ne(&tensor.zeros_like()?)?)
}

fn floor_mod(x: f64, y: f64) -> f64 {
    x - y * (x / y).floor()
}

fn host_f64(tensor: &Tensor) -> Result<Vec<f64>> {
    Ok(tensor
        .to_dtype(DType::F64)?
        .reshape(tensor.elem_count())?
        .to_vec1::<f64>()?)
}

fn from_f64(values: Vec<f64>, dims: &[usize], like: &Tensor) -> Result<Tensor> {
    Ok(Tensor::from_vec(values, dims, like.device())?.to_dtype(like.dtype())?)
}

/// Element-wise function evaluated on the host, for operators candle has no kernel for
fn map_host(tensor: &Tensor, f: impl Fn(f64) -> f64) -> Result<Tensor> {
    let values = host_f64(tensor)?.into_iter().map(f).collect();
    from_f64(values, tensor.dims(), tensor)
}

fn zip_host(lhs: &Tensor, rhs: &Tensor, name: &str, f: impl Fn(f64, f64) -> f64) -> Result<Tensor> {
    let (lhs_shape, rhs_shape) = (Shape::from(lhs.dims()), Shape::from(rhs.dims()));
    let dims = lhs_shape
        .broadcast_with(&rhs_shape)
        .and_then(|shape| shape.to_usize())
        .ok_or_else(|| Error::shape_mismatch(name, &lhs_shape, &rhs_shape))?;
    let a = host_f64(&lhs.broadcast_as(dims.as_slice())?)?;
    let b = host_f64(&rhs.broadcast_as(dims.as_slice())?)?;
    let values = a.into_iter().zip(b).map(|(x, y)| f(x, y)).collect();
    from_f64(values, &dims, lhs)
}

fn unary(op: UnaryOp, t: &Tensor) -> Result<Tensor> {
    Ok(match op {
        UnaryOp::Neg => t.neg()?,
        UnaryOp::Abs => t.abs()?,
        UnaryOp::Square => t.sqr()?,
        UnaryOp::Sqrt => t.sqrt()?,
        UnaryOp::Exp => t.exp()?,
        UnaryOp::Log => t.log()?,
        UnaryOp::Log10 => t.log()?.affine(1.0 / LN_10, 0.0)?,
        UnaryOp::Log2 => t.log()?.affine(1.0 / LN_2, 0.0)?,
        UnaryOp::Sin => t.sin()?,
        UnaryOp::Cos => t.cos()?,
        UnaryOp::Tanh => t.tanh()?,
        UnaryOp::Floor => t.floor()?,
        UnaryOp::Ceil => t.ceil()?,
        UnaryOp::Round => t.round()?,
        UnaryOp::ToDegrees => t.affine(180.0 / PI, 0.0)?,
        UnaryOp::ToRadians => t.affine(PI / 180.0, 0.0)?,
        UnaryOp::LogicalNot => t.eq(&t.zeros_like()?)?,
        UnaryOp::IsNaN => t.ne(t)?,
        UnaryOp::IsInfinite => {
            let mask = host_f64(t)?
                .into_iter()
                .map(|x| u8::from(x.is_infinite()))
                .collect::<Vec<_>>();
            Tensor::from_vec(mask, t.dims(), t.device())?
        }
        UnaryOp::Cbrt => map_host(t, f64::cbrt)?,
        UnaryOp::Trunc => map_host(t, f64::trunc)?,
        UnaryOp::Tan => map_host(t, f64::tan)?,
        UnaryOp::Asin => map_host(t, f64::asin)?,
        UnaryOp::Acos => map_host(t, f64::acos)?,
        UnaryOp::Atan => map_host(t, f64::atan)?,
        UnaryOp::Sinh => map_host(t, f64::sinh)?,
        UnaryOp::Cosh => map_host(t, f64::cosh)?,
        UnaryOp::Asinh => map_host(t, f64::asinh)?,
        UnaryOp::Acosh => map_host(t, f64::acosh)?,
        UnaryOp::Atanh => map_host(t, f64::atanh)?,
    })
}

fn binary(op: BinaryOp, lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
    Ok(match op {
        BinaryOp::Add => lhs.broadcast_add(rhs)?,
        BinaryOp::Sub => lhs.broadcast_sub(rhs)?,
        BinaryOp::Mul => lhs.broadcast_mul(rhs)?,
        BinaryOp::Div => lhs.broadcast_div(rhs)?,
        BinaryOp::Maximum => lhs.broadcast_maximum(rhs)?,
        BinaryOp::Minimum => lhs.broadcast_minimum(rhs)?,
        BinaryOp::Eq => lhs.broadcast_eq(rhs)?,
        BinaryOp::Neq => lhs.broadcast_ne(rhs)?,
        BinaryOp::Gt => lhs.broadcast_gt(rhs)?,
        BinaryOp::Gte => lhs.broadcast_ge(rhs)?,
        BinaryOp::Lt => lhs.broadcast_lt(rhs)?,
        BinaryOp::Lte => lhs.broadcast_le(rhs)?,
        BinaryOp::Mod => zip_host(lhs, rhs, op.name(), floor_mod)?,
        BinaryOp::Pow => zip_host(lhs, rhs, op.name(), f64::powf)?,
        BinaryOp::LogicalAnd => truthy(lhs)?.broadcast_mul(&truthy(rhs)?)?,
        BinaryOp::LogicalOr => truthy(lhs)?.broadcast_maximum(&truthy(rhs)?)?,
        BinaryOp::LogicalXor => truthy(lhs)?.broadcast_ne(&truthy(rhs)?)?,
    })
}

fn reduce(op: ReduceOp, axes: &[usize], keep_dims: bool, t: &Tensor) -> Result<Tensor> {
    let mut axes = axes.to_vec();
    axes.sort_unstable();
    axes.dedup();
    let mut out = t.clone();
    for &axis in &axes {
        out = match op {
            ReduceOp::Sum => out.sum_keepdim(axis)?,
            ReduceOp::Mean => out.mean_keepdim(axis)?,
            ReduceOp::Max => out.max_keepdim(axis)?,
            ReduceOp::Min => out.min_keepdim(axis)?,
            ReduceOp::Prod => prod_keepdim(&out, axis)?,
        };
    }
    if keep_dims {
        Ok(out)
    } else {
        squeeze_all(out, &axes)
    }
}

fn prod_keepdim(t: &Tensor, axis: usize) -> Result<Tensor> {
    let extent = t.dim(axis)?;
    if extent == 0 {
        let mut dims = t.dims().to_vec();
        dims[axis] = 1;
        return Ok(Tensor::ones(dims, t.dtype(), t.device())?);
    }
    let mut acc = t.narrow(axis, 0, 1)?;
    for i in 1..extent {
        acc = acc.mul(&t.narrow(axis, i, 1)?)?;
    }
    Ok(acc)
}

/// Squeezes `axes` from the highest index down so earlier indices stay valid
fn squeeze_all(mut t: Tensor, axes: &[usize]) -> Result<Tensor> {
    let mut axes = axes.to_vec();
    axes.sort_unstable_by(|a, b| b.cmp(a));
    axes.dedup();
    for axis in axes {
        t = t.squeeze(axis)?;
    }
    Ok(t)
}

fn softmax(t: &Tensor, axis: usize, temperature: f64, log: bool) -> Result<Tensor> {
    let scaled = if temperature == 1.0 {
        t.clone()
    } else {
        t.affine(1.0 / temperature, 0.0)?
    };
    let shifted = scaled.broadcast_sub(&scaled.max_keepdim(axis)?)?;
    let exp = shifted.exp()?;
    let sum = exp.sum_keepdim(axis)?;
    if log {
        Ok(shifted.broadcast_sub(&sum.log()?)?)
    } else {
        Ok(exp.broadcast_div(&sum)?)
    }
}

fn dot(lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
    Ok(match (lhs.rank(), rhs.rank()) {
        (1, 1) => lhs.mul(rhs)?.sum_all()?,
        (2, 2) => lhs.contiguous()?.matmul(&rhs.contiguous()?)?,
        _ => lhs.contiguous()?.broadcast_matmul(&rhs.contiguous()?)?,
    })
}
