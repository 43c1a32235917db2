//! Strided 2D tensors
//!
//! Activations, packed weight words, quantization metadata and outputs are all
//! 2D. Storage is row-major by default; [`Tensor::transpose`] swaps dimensions
//! and strides without moving data, which is how non-contiguous activations
//! reach the kernels.
//!
//! # Example
//!
//! ```
//! use rayo::Tensor;
//!
//! let t = Tensor::from_vec(2, 3, vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
//! assert_eq!(t.get(1, 2), Some(6.0));
//!
//! let tt = t.transpose();
//! assert_eq!(tt.shape(), (3, 2));
//! assert_eq!(tt.get(2, 1), Some(6.0));
//! assert!(!tt.is_contiguous());
//! ```

use crate::dtype::Element;
use crate::error::{RayoError, Result};

/// A 2D tensor with explicit element strides
///
/// Element `(r, c)` lives at `data[r * row_stride + c * col_stride]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    rows: usize,
    cols: usize,
    row_stride: usize,
    col_stride: usize,
    data: Vec<T>,
}

impl<T: Copy> Tensor<T> {
    /// Creates a row-major tensor from a vector of data
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `data.len() != rows * cols`
    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(RayoError::InvalidInput(format!(
                "Data length {} does not match tensor dimensions {}x{} (expected {})",
                data.len(),
                rows,
                cols,
                rows * cols
            )));
        }
        Ok(Self {
            rows,
            cols,
            row_stride: cols,
            col_stride: 1,
            data,
        })
    }

    /// Creates a tensor over existing storage with custom strides
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the largest addressed offset falls outside `data`.
    pub fn with_strides(
        rows: usize,
        cols: usize,
        row_stride: usize,
        col_stride: usize,
        data: Vec<T>,
    ) -> Result<Self> {
        if rows > 0 && cols > 0 {
            let last = (rows - 1) * row_stride + (cols - 1) * col_stride;
            if last >= data.len() {
                return Err(RayoError::InvalidInput(format!(
                    "Strides ({row_stride}, {col_stride}) address offset {last} beyond storage of {} elements",
                    data.len()
                )));
            }
        }
        Ok(Self {
            rows,
            cols,
            row_stride,
            col_stride,
            data,
        })
    }

    /// Builds a row-major tensor by evaluating `f(row, col)` for every element
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self {
            rows,
            cols,
            row_stride: cols,
            col_stride: 1,
            data,
        }
    }

    /// Creates a tensor filled with `value`
    pub fn full(rows: usize, cols: usize, value: T) -> Self {
        Self {
            rows,
            cols,
            row_stride: cols,
            col_stride: 1,
            data: vec![value; rows * cols],
        }
    }

    /// Returns the number of rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Returns the number of columns
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Returns the shape as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Returns the strides as (row_stride, col_stride)
    pub fn strides(&self) -> (usize, usize) {
        (self.row_stride, self.col_stride)
    }

    /// Number of logical elements
    pub fn numel(&self) -> usize {
        self.rows * self.cols
    }

    /// True when the layout is plain row-major
    pub fn is_contiguous(&self) -> bool {
        self.col_stride == 1 && (self.row_stride == self.cols || self.rows <= 1)
    }

    /// Gets the element at (row, col)
    ///
    /// Returns `None` if indices are out of bounds
    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        if row >= self.rows || col >= self.cols {
            None
        } else {
            self.data
                .get(row * self.row_stride + col * self.col_stride)
                .copied()
        }
    }

    /// Element read for indices the caller has already bounds-masked
    #[inline]
    pub(crate) fn at(&self, row: usize, col: usize) -> T {
        self.data[row * self.row_stride + col * self.col_stride]
    }

    /// Returns the underlying storage (layout given by [`Tensor::strides`])
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Swaps rows and columns without touching storage
    #[must_use]
    pub fn transpose(self) -> Self {
        Self {
            rows: self.cols,
            cols: self.rows,
            row_stride: self.col_stride,
            col_stride: self.row_stride,
            data: self.data,
        }
    }

    /// Copies into a fresh row-major tensor
    #[must_use]
    pub fn to_contiguous(&self) -> Self {
        Self::from_fn(self.rows, self.cols, |r, c| self.at(r, c))
    }

    /// Elementwise conversion into a new row-major tensor
    pub fn map<U: Copy>(&self, mut f: impl FnMut(T) -> U) -> Tensor<U> {
        Tensor::from_fn(self.rows, self.cols, |r, c| f(self.at(r, c)))
    }

    /// Row-major copy of the logical elements
    pub fn to_vec(&self) -> Vec<T> {
        if self.is_contiguous() {
            return self.data[..self.numel()].to_vec();
        }
        self.to_contiguous().data
    }
}

impl<T: Element> Tensor<T> {
    /// Builds a tensor of element type `T` from `f32` values (rounding as needed)
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `values.len() != rows * cols`
    pub fn from_f32(rows: usize, cols: usize, values: &[f32]) -> Result<Self> {
        Self::from_vec(rows, cols, values.iter().map(|&v| T::from_f32(v)).collect())
    }

    /// Widens every element to `f32`
    pub fn to_f32(&self) -> Tensor<f32> {
        self.map(Element::to_f32)
    }
}
