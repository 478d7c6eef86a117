use std::fmt::{self, Display};
use crate::error::{Error, Result};

/// Marker for a dimension whose size is not known until evaluation
pub(crate) const UNKNOWN_DIM: i64 = -1;

/// # Shape
///
/// An immutable, ordered list of dimension sizes.
///
/// Each dimension is either a non-negative size or `-1`, meaning the size is
/// unknown until a value is bound (placeholders declare such shapes). Equality
/// is element-wise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    dims: Vec<i64>,
}

impl Shape {
    /// Creates a shape from raw dimensions, `-1` marking an unknown size
    pub fn new(dims: impl Into<Vec<i64>>) -> Self {
        Self { dims: dims.into() }
    }

    /// The rank-0 shape of a scalar
    pub fn scalar() -> Self {
        Self { dims: vec![] }
    }

    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    /// Number of dimensions
    pub fn dimension(&self) -> usize {
        self.dims.len()
    }

    pub fn get(&self, axis: usize) -> Option<i64> {
        self.dims.get(axis).copied()
    }

    /// Total number of elements, or `-1` when any dimension is unknown.
    /// Saturates at `i64::MAX`.
    pub fn size(&self) -> i64 {
        if !self.is_known() {
            return UNKNOWN_DIM;
        }
        known_product(&self.dims).unwrap_or(i64::MAX)
    }

    /// `true` if no dimension is unknown
    pub fn is_known(&self) -> bool {
        self.dims.iter().all(|&d| d >= 0)
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Concrete dimensions, or `None` when any dimension is unknown
    pub fn to_usize(&self) -> Option<Vec<usize>> {
        self.dims
            .iter()
            .map(|&d| usize::try_from(d).ok())
            .collect()
    }

    /// Rejects dimensions smaller than `-1` and known dimensions whose
    /// product overflows `i64`
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(d) = self.dims.iter().find(|&&d| d < UNKNOWN_DIM) {
            return Err(Error::InvalidArgument(format!(
                "dimension {} in shape {} is negative", d, self
            )));
        }
        if known_product(&self.dims).is_none() {
            return Err(Error::InvalidArgument(format!("shape {} is too large", self)));
        }
        Ok(())
    }

    /// Broadcasts two shapes numpy-style, aligning trailing dimensions.
    ///
    /// Unknown dimensions broadcast against anything; the evaluated values are
    /// checked again by the backend.
    ///
    /// # Returns
    ///
    /// The broadcast shape, or `None` when two known dimensions disagree and
    /// neither of them is `1`
    pub fn broadcast_with(&self, other: &Shape) -> Option<Shape> {
        let rank = self.dimension().max(other.dimension());
        let mut dims = vec![0; rank];
        for i in 0..rank {
            let lhs = self.dim_from_back(i);
            let rhs = other.dim_from_back(i);
            let dim = if lhs == 1 {
                rhs
            } else if rhs == 1 {
                lhs
            } else if lhs == UNKNOWN_DIM {
                rhs
            } else if rhs == UNKNOWN_DIM || lhs == rhs {
                lhs
            } else {
                return None;
            };
            dims[rank - 1 - i] = dim;
        }
        Some(Shape::new(dims))
    }

    /// `true` if `concrete` could be a value of this (possibly partial) shape
    pub fn accepts(&self, concrete: &Shape) -> bool {
        self.dimension() == concrete.dimension()
            && self
                .dims
                .iter()
                .zip(concrete.dims())
                .all(|(&d, &c)| dims_agree(d, c))
    }

    /// Resolves a possibly negative axis against this rank
    pub(crate) fn normalize_axis(&self, axis: i64) -> Result<usize> {
        normalize_axis(axis, self.dimension())
    }

    fn dim_from_back(&self, i: usize) -> i64 {
        if i < self.dims.len() {
            self.dims[self.dims.len() - 1 - i]
        } else {
            1
        }
    }
}

/// Two dimensions agree when they are equal or either is unknown
pub(crate) fn dims_agree(lhs: i64, rhs: i64) -> bool {
    lhs == rhs || lhs == UNKNOWN_DIM || rhs == UNKNOWN_DIM
}

pub(crate) fn normalize_axis(axis: i64, rank: usize) -> Result<usize> {
    let rank = rank as i64;
    let resolved = if axis < 0 { axis + rank } else { axis };
    if resolved < 0 || resolved >= rank {
        return Err(Error::InvalidArgument(format!(
            "axis {} is out of range for rank {}", axis, rank
        )));
    }
    Ok(resolved as usize)
}

impl Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", dim)?;
        }
        write!(f, ")")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self::from(dims.as_slice())
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self {
            dims: dims.iter().map(|&d| d as i64).collect(),
        }
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self::from(dims.as_slice())
    }
}

impl From<&Shape> for Shape {
    fn from(shape: &Shape) -> Self {
        shape.clone()
    }
}


/// Product of the known dimensions, `None` on overflow
fn known_product(dims: &[i64]) -> Option<i64> {
    dims.iter()
        .filter(|&&d| d != UNKNOWN_DIM)
        .try_fold(1i64, |acc, &d| acc.checked_mul(d))
}
