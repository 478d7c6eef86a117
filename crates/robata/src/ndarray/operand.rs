use crate::backend::Backend;
use super::NDArray;

/// Right-hand side of a binary operation: a scalar or another array
pub enum Operand<'a, B: Backend> {
    Scalar(f64),
    Array(&'a NDArray<B>),
}

impl<'a, B: Backend> From<&'a NDArray<B>> for Operand<'a, B> {
    fn from(array: &'a NDArray<B>) -> Self {
        Operand::Array(array)
    }
}

macro_rules! scalar_operand {
    ($($t:ty),*) => {
        $(
            impl<B: Backend> From<$t> for Operand<'_, B> {
                fn from(value: $t) -> Self {
                    Operand::Scalar(value as f64)
                }
            }
        )*
    };
}

scalar_operand!(f64, f32, i64, i32, u8);
