//! Memory descriptors: shape, element type, layout and base offset.
//!
//! Only what the eltwise primitive needs: element counts with and without
//! padding, density checks, and resolution of the `Any` layout.

use serde::{Deserialize, Serialize};

use crate::types::DType;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layout {
    /// Not decided yet; resolved by the primitive descriptor.
    Any,
    /// Dense row-major in natural dimension order.
    Plain,
    /// Explicit element strides, one per dimension.
    Strided(Vec<usize>),
    /// Dimension `dim` is split into blocks of `block` elements and padded
    /// up to a multiple of `block` (e.g. `nChw8c` has `dim = 1, block = 8`).
    Blocked { dim: usize, block: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryDesc {
    pub dims: Vec<usize>,
    pub dtype: DType,
    pub layout: Layout,
    /// Offset of the first element from the base pointer, in elements.
    pub offset0: usize,
}

impl MemoryDesc {
    pub fn new(dims: &[usize], dtype: DType, layout: Layout) -> Self {
        MemoryDesc { dims: dims.to_vec(), dtype, layout, offset0: 0 }
    }

    /// Dense row-major descriptor.
    pub fn plain(dims: &[usize], dtype: DType) -> Self {
        Self::new(dims, dtype, Layout::Plain)
    }

    pub fn with_offset(mut self, offset0: usize) -> Self {
        self.offset0 = offset0;
        self
    }

    pub fn ndims(&self) -> usize {
        self.dims.len()
    }

    pub fn has_zero_dim(&self) -> bool {
        self.dims.iter().any(|&d| d == 0)
    }

    /// Dimensions after padding blocked dimensions to a multiple of the block.
    pub fn padded_dims(&self) -> Vec<usize> {
        let mut padded = self.dims.clone();
        if let Layout::Blocked { dim, block } = self.layout {
            if let Some(d) = padded.get_mut(dim) {
                if block > 0 {
                    *d = d.div_ceil(block) * block;
                }
            }
        }
        padded
    }

    /// Number of elements, optionally counting padding.
    pub fn nelems(&self, with_padding: bool) -> usize {
        if self.dims.is_empty() {
            return 0;
        }
        if with_padding {
            self.padded_dims().iter().product()
        } else {
            self.dims.iter().product()
        }
    }

    /// Whether the elements occupy one contiguous run.
    ///
    /// With `with_padding` a blocked layout counts as dense (its padding is
    /// part of the run); without it, only when no padding exists.
    pub fn is_dense(&self, with_padding: bool) -> bool {
        match &self.layout {
            Layout::Any => false,
            Layout::Plain => true,
            Layout::Strided(strides) => {
                strides.len() == self.dims.len() && *strides == natural_strides(&self.dims)
            }
            Layout::Blocked { dim, block } => {
                if *dim >= self.dims.len() || *block == 0 {
                    return false;
                }
                with_padding || self.dims[*dim] % *block == 0
            }
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self.layout, Layout::Any)
    }

    /// Size in bytes of the buffer this descriptor addresses, offset included.
    pub fn size_bytes(&self) -> usize {
        let span = match &self.layout {
            Layout::Strided(strides) if !self.has_zero_dim() => self
                .dims
                .iter()
                .zip(strides)
                .map(|(&d, &s)| (d - 1) * s)
                .sum::<usize>()
                + 1,
            _ => self.nelems(true),
        };
        (self.offset0 + span) * self.dtype.size_bytes()
    }
}

/// Row-major strides of `dims`.
pub fn natural_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1];
    }
    strides
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_counts() {
        let md = MemoryDesc::plain(&[2, 3, 5], DType::F32);
        assert_eq!(md.nelems(false), 30);
        assert_eq!(md.nelems(true), 30);
        assert!(md.is_dense(false));
        assert_eq!(md.size_bytes(), 120);
    }

    #[test]
    fn test_blocked_padding() {
        // 2x3x4x4 in nChw8c: channels padded 3 -> 8
        let md = MemoryDesc::new(&[2, 3, 4, 4], DType::BF16, Layout::Blocked { dim: 1, block: 8 });
        assert_eq!(md.padded_dims(), vec![2, 8, 4, 4]);
        assert_eq!(md.nelems(false), 96);
        assert_eq!(md.nelems(true), 256);
        assert!(md.is_dense(true));
        assert!(!md.is_dense(false));

        let full = MemoryDesc::new(&[2, 16, 4, 4], DType::BF16, Layout::Blocked { dim: 1, block: 8 });
        assert!(full.is_dense(false));
    }

    #[test]
    fn test_strided_density() {
        let dims = [4, 6];
        assert_eq!(natural_strides(&dims), vec![6, 1]);
        let dense = MemoryDesc::new(&dims, DType::F32, Layout::Strided(vec![6, 1]));
        assert!(dense.is_dense(true));
        let gappy = MemoryDesc::new(&dims, DType::F32, Layout::Strided(vec![8, 1]));
        assert!(!gappy.is_dense(true));
        assert_eq!(gappy.size_bytes(), (3 * 8 + 5 + 1) * 4);
    }

    #[test]
    fn test_zero_dim_and_offset() {
        let md = MemoryDesc::plain(&[4, 0], DType::F16);
        assert!(md.has_zero_dim());
        assert_eq!(md.nelems(true), 0);

        let md = MemoryDesc::plain(&[10], DType::F16).with_offset(6);
        assert_eq!(md.size_bytes(), 32);
        assert!(!MemoryDesc::new(&[10], DType::F16, Layout::Any).is_dense(true));
    }
}
