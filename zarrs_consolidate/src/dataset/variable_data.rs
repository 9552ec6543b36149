use ndarray::{ArrayD, ArrayViewD, Axis, Dimension, IxDyn};
use num::traits::float::FloatCore;
use thiserror::Error;
use zarrs::array::DataType;

/// The element type of a [`VariableData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// `bool`
    Bool,
    /// `i8`
    Int8,
    /// `i16`
    Int16,
    /// `i32`
    Int32,
    /// `i64`
    Int64,
    /// `u8`
    UInt8,
    /// `u16`
    UInt16,
    /// `u32`
    UInt32,
    /// `u64`
    UInt64,
    /// `f32`
    Float32,
    /// `f64`
    Float64,
}

impl ElementType {
    /// Map a Zarr data type to an element type.
    ///
    /// Returns [`None`] for data types that cannot be held by a [`VariableData`].
    #[must_use]
    pub fn from_data_type(data_type: &DataType) -> Option<Self> {
        match data_type {
            DataType::Bool => Some(Self::Bool),
            DataType::Int8 => Some(Self::Int8),
            DataType::Int16 => Some(Self::Int16),
            DataType::Int32 => Some(Self::Int32),
            DataType::Int64 => Some(Self::Int64),
            DataType::UInt8 => Some(Self::UInt8),
            DataType::UInt16 => Some(Self::UInt16),
            DataType::UInt32 => Some(Self::UInt32),
            DataType::UInt64 => Some(Self::UInt64),
            DataType::Float32 => Some(Self::Float32),
            DataType::Float64 => Some(Self::Float64),
            _ => None,
        }
    }

    /// The Zarr V2 (numpy) little-endian data type string, e.g. `<f8`.
    #[must_use]
    pub const fn dtype_v2(self) -> &'static str {
        match self {
            Self::Bool => "|b1",
            Self::Int8 => "|i1",
            Self::Int16 => "<i2",
            Self::Int32 => "<i4",
            Self::Int64 => "<i8",
            Self::UInt8 => "|u1",
            Self::UInt16 => "<u2",
            Self::UInt32 => "<u4",
            Self::UInt64 => "<u8",
            Self::Float32 => "<f4",
            Self::Float64 => "<f8",
        }
    }

    /// Returns true for `f32` and `f64`.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}

impl core::fmt::Display for ElementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        };
        f.write_str(name)
    }
}

/// The in-memory values of a variable.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum VariableData {
    Bool(ArrayD<bool>),
    Int8(ArrayD<i8>),
    Int16(ArrayD<i16>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    UInt8(ArrayD<u8>),
    UInt16(ArrayD<u16>),
    UInt32(ArrayD<u32>),
    UInt64(ArrayD<u64>),
    Float32(ArrayD<f32>),
    Float64(ArrayD<f64>),
}

/// Apply `$body` to the array held by any variant, binding it to `$array`.
macro_rules! dispatch {
    ($data:expr, $array:ident => $body:expr) => {
        match $data {
            VariableData::Bool($array) => $body,
            VariableData::Int8($array) => $body,
            VariableData::Int16($array) => $body,
            VariableData::Int32($array) => $body,
            VariableData::Int64($array) => $body,
            VariableData::UInt8($array) => $body,
            VariableData::UInt16($array) => $body,
            VariableData::UInt32($array) => $body,
            VariableData::UInt64($array) => $body,
            VariableData::Float32($array) => $body,
            VariableData::Float64($array) => $body,
        }
    };
}

/// Like [`dispatch`], but rewraps the result in the same variant.
macro_rules! map_variant {
    ($data:expr, $array:ident => $body:expr) => {
        match $data {
            VariableData::Bool($array) => VariableData::Bool($body),
            VariableData::Int8($array) => VariableData::Int8($body),
            VariableData::Int16($array) => VariableData::Int16($body),
            VariableData::Int32($array) => VariableData::Int32($body),
            VariableData::Int64($array) => VariableData::Int64($body),
            VariableData::UInt8($array) => VariableData::UInt8($body),
            VariableData::UInt16($array) => VariableData::UInt16($body),
            VariableData::UInt32($array) => VariableData::UInt32($body),
            VariableData::UInt64($array) => VariableData::UInt64($body),
            VariableData::Float32($array) => VariableData::Float32($body),
            VariableData::Float64($array) => VariableData::Float64($body),
        }
    };
}

pub(crate) use dispatch;

/// An error concatenating [`VariableData`].
#[derive(Debug, Error)]
pub enum ConcatenateError {
    /// Nothing to concatenate.
    #[error("no arrays to concatenate")]
    Empty,
    /// The element types differ.
    #[error("element type mismatch: expected {expected}, got {got}")]
    ElementTypeMismatch {
        /// The element type of the first array.
        expected: ElementType,
        /// The mismatching element type.
        got: ElementType,
    },
    /// The shapes are incompatible along the non-concatenated axes.
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

impl VariableData {
    /// The element type.
    #[must_use]
    pub const fn element_type(&self) -> ElementType {
        match self {
            Self::Bool(_) => ElementType::Bool,
            Self::Int8(_) => ElementType::Int8,
            Self::Int16(_) => ElementType::Int16,
            Self::Int32(_) => ElementType::Int32,
            Self::Int64(_) => ElementType::Int64,
            Self::UInt8(_) => ElementType::UInt8,
            Self::UInt16(_) => ElementType::UInt16,
            Self::UInt32(_) => ElementType::UInt32,
            Self::UInt64(_) => ElementType::UInt64,
            Self::Float32(_) => ElementType::Float32,
            Self::Float64(_) => ElementType::Float64,
        }
    }

    /// The shape of the array.
    #[must_use]
    pub fn shape(&self) -> Vec<u64> {
        dispatch!(self, array => array.shape().iter().map(|&len| len as u64).collect())
    }

    /// The number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        dispatch!(self, array => array.ndim())
    }

    /// The total number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        dispatch!(self, array => array.len())
    }

    /// Returns true if the array holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Select `indices` along `axis`, in the given order.
    ///
    /// # Panics
    /// Panics if `axis` is out of bounds or any index is out of bounds along `axis`.
    #[must_use]
    pub fn select(&self, axis: usize, indices: &[usize]) -> Self {
        map_variant!(self, array => array.select(Axis(axis), indices))
    }

    /// Stack `len` copies along a new leading axis.
    #[must_use]
    pub fn repeat_along_new_axis(&self, len: usize) -> Self {
        map_variant!(self, array => {
            let shape: Vec<usize> = std::iter::once(len).chain(array.shape().iter().copied()).collect();
            ArrayD::from_shape_fn(IxDyn(&shape), |index| array[&index.slice()[1..]])
        })
    }

    /// Concatenate `parts` along `axis`.
    ///
    /// # Errors
    /// Returns a [`ConcatenateError`] if `parts` is empty, the element types differ, or the shapes are incompatible.
    pub fn concatenate(axis: usize, parts: &[&Self]) -> Result<Self, ConcatenateError> {
        let first = parts.first().ok_or(ConcatenateError::Empty)?;
        let expected = first.element_type();

        macro_rules! concatenate_variant {
            ($variant:ident) => {{
                let views = parts
                    .iter()
                    .map(|part| match part {
                        Self::$variant(array) => Ok(array.view()),
                        other => Err(ConcatenateError::ElementTypeMismatch {
                            expected,
                            got: other.element_type(),
                        }),
                    })
                    .collect::<Result<Vec<ArrayViewD<_>>, _>>()?;
                Self::$variant(ndarray::concatenate(Axis(axis), &views)?)
            }};
        }

        Ok(match first {
            Self::Bool(_) => concatenate_variant!(Bool),
            Self::Int8(_) => concatenate_variant!(Int8),
            Self::Int16(_) => concatenate_variant!(Int16),
            Self::Int32(_) => concatenate_variant!(Int32),
            Self::Int64(_) => concatenate_variant!(Int64),
            Self::UInt8(_) => concatenate_variant!(UInt8),
            Self::UInt16(_) => concatenate_variant!(UInt16),
            Self::UInt32(_) => concatenate_variant!(UInt32),
            Self::UInt64(_) => concatenate_variant!(UInt64),
            Self::Float32(_) => concatenate_variant!(Float32),
            Self::Float64(_) => concatenate_variant!(Float64),
        })
    }

    /// Returns true if `self` and `other` have the same element type, shape, and values.
    ///
    /// Unlike [`PartialEq`], NaN compares equal to NaN.
    #[must_use]
    pub fn identical(&self, other: &Self) -> bool {
        fn float_identical<T: FloatCore>(a: &ArrayD<T>, b: &ArrayD<T>) -> bool {
            a.shape() == b.shape()
                && a
                    .iter()
                    .zip(b.iter())
                    .all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
        }
        match (self, other) {
            (Self::Float32(a), Self::Float32(b)) => float_identical(a, b),
            (Self::Float64(a), Self::Float64(b)) => float_identical(a, b),
            _ => self == other,
        }
    }

    /// The values as `i64`, in logical (row-major) order.
    ///
    /// Returns [`None`] for floating point and boolean data, or if a `u64` value does not fit.
    #[must_use]
    pub fn to_i64_values(&self) -> Option<Vec<i64>> {
        match self {
            Self::Int8(array) => Some(array.iter().map(|&v| i64::from(v)).collect()),
            Self::Int16(array) => Some(array.iter().map(|&v| i64::from(v)).collect()),
            Self::Int32(array) => Some(array.iter().map(|&v| i64::from(v)).collect()),
            Self::Int64(array) => Some(array.iter().copied().collect()),
            Self::UInt8(array) => Some(array.iter().map(|&v| i64::from(v)).collect()),
            Self::UInt16(array) => Some(array.iter().map(|&v| i64::from(v)).collect()),
            Self::UInt32(array) => Some(array.iter().map(|&v| i64::from(v)).collect()),
            Self::UInt64(array) => array.iter().map(|&v| i64::try_from(v).ok()).collect(),
            Self::Bool(_) | Self::Float32(_) | Self::Float64(_) => None,
        }
    }

    /// The values as `f64`, in logical (row-major) order.
    ///
    /// Returns [`None`] for boolean data.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_f64_values(&self) -> Option<Vec<f64>> {
        match self {
            Self::Float32(array) => Some(array.iter().map(|&v| f64::from(v)).collect()),
            Self::Float64(array) => Some(array.iter().copied().collect()),
            Self::Bool(_) => None,
            other => other
                .to_i64_values()
                .map(|values| values.into_iter().map(|v| v as f64).collect()),
        }
    }

    /// Create one-dimensional `i64` data.
    #[must_use]
    pub fn from_i64_values(values: Vec<i64>) -> Self {
        Self::Int64(ndarray::Array1::from_vec(values).into_dyn())
    }
}

macro_rules! impl_from_array {
    ($($variant:ident: $type:ty),*) => {
        $(
            impl From<ArrayD<$type>> for VariableData {
                fn from(array: ArrayD<$type>) -> Self {
                    Self::$variant(array)
                }
            }
        )*
    };
}

impl_from_array!(
    Bool: bool,
    Int8: i8,
    Int16: i16,
    Int32: i32,
    Int64: i64,
    UInt8: u8,
    UInt16: u16,
    UInt32: u32,
    UInt64: u64,
    Float32: f32,
    Float64: f64
);

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn concatenate_along_axis() {
        let a = VariableData::from(array![[1.0f64, 2.0], [3.0, 4.0]].into_dyn());
        let b = VariableData::from(array![[5.0f64, 6.0]].into_dyn());
        let c = VariableData::concatenate(0, &[&a, &b]).unwrap();
        assert_eq!(c.shape(), vec![3, 2]);
        assert_eq!(
            c,
            VariableData::from(array![[1.0f64, 2.0], [3.0, 4.0], [5.0, 6.0]].into_dyn())
        );
    }

    #[test]
    fn concatenate_type_mismatch() {
        let a = VariableData::from(array![1i64, 2].into_dyn());
        let b = VariableData::from(array![1.0f32].into_dyn());
        assert!(matches!(
            VariableData::concatenate(0, &[&a, &b]),
            Err(ConcatenateError::ElementTypeMismatch {
                expected: ElementType::Int64,
                got: ElementType::Float32
            })
        ));
        assert!(matches!(
            VariableData::concatenate(0, &[]),
            Err(ConcatenateError::Empty)
        ));
    }

    #[test]
    fn concatenate_shape_mismatch() {
        let a = VariableData::from(array![[1u8, 2]].into_dyn());
        let b = VariableData::from(array![[1u8, 2, 3]].into_dyn());
        assert!(matches!(
            VariableData::concatenate(0, &[&a, &b]),
            Err(ConcatenateError::Shape(_))
        ));
    }

    #[test]
    fn select_reorders() {
        let a = VariableData::from(array![[1i32, 2], [3, 4], [5, 6]].into_dyn());
        let s = a.select(0, &[2, 0]);
        assert_eq!(s, VariableData::from(array![[5i32, 6], [1, 2]].into_dyn()));
        let s = a.select(1, &[1]);
        assert_eq!(s, VariableData::from(array![[2i32], [4], [6]].into_dyn()));
    }

    #[test]
    fn repeat_along_new_axis() {
        let a = VariableData::from(array![1.5f32, 2.5].into_dyn());
        assert_eq!(
            a.repeat_along_new_axis(3),
            VariableData::from(array![[1.5f32, 2.5], [1.5, 2.5], [1.5, 2.5]].into_dyn())
        );
        assert_eq!(a.repeat_along_new_axis(0).shape(), vec![0, 2]);
        let scalar = VariableData::from(ArrayD::from_elem(IxDyn(&[]), true));
        assert_eq!(
            scalar.repeat_along_new_axis(2),
            VariableData::from(array![true, true].into_dyn())
        );
    }

    #[test]
    fn identical_treats_nan_as_equal() {
        let a = VariableData::from(array![1.0f64, f64::NAN].into_dyn());
        let b = VariableData::from(array![1.0f64, f64::NAN].into_dyn());
        assert_ne!(a, b);
        assert!(a.identical(&b));
        let c = VariableData::from(array![1.0f32, f32::NAN].into_dyn());
        assert!(!a.identical(&c));
    }

    #[test]
    fn integer_values() {
        let a = VariableData::from(array![1u64, 2, u64::MAX].into_dyn());
        assert_eq!(a.to_i64_values(), None);
        let a = VariableData::from(array![-1i16, 2].into_dyn());
        assert_eq!(a.to_i64_values(), Some(vec![-1, 2]));
        assert_eq!(a.to_f64_values(), Some(vec![-1.0, 2.0]));
        assert_eq!(VariableData::from_i64_values(vec![3, 4]).shape(), vec![2]);
    }
}
