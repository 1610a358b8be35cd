use ndarray::{ArrayD, IxDyn, Zip};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("Shape {shape:?} describes {expected} entries but {actual} were provided")]
    LengthMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },
    #[error("Batch shapes do not match: {left:?} vs {right:?}")]
    Mismatch { left: Vec<usize>, right: Vec<usize> },
    #[error("Shape {from:?} cannot be broadcast to {to:?}")]
    NotBroadcastable { from: Vec<usize>, to: Vec<usize> },
}

/// A batch of per-entry values over arbitrary leading dimensions.
///
/// The shape lists only the leading (batch) dimensions; the per-entry payload
/// (a 3-vector, a rotation, a rigid frame, a mask weight) lives in `T`. An
/// empty shape describes a single entry. Entries are kept in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    data: ArrayD<T>,
}

impl<T> Batch<T> {
    pub fn new(shape: Vec<usize>, data: Vec<T>) -> Result<Self, ShapeError> {
        let expected: usize = shape.iter().product();
        let actual = data.len();
        let data = ArrayD::from_shape_vec(IxDyn(&shape), data).map_err(|_| {
            ShapeError::LengthMismatch {
                shape,
                expected,
                actual,
            }
        })?;
        Ok(Self { data })
    }

    pub fn from_array(data: ArrayD<T>) -> Self {
        Self { data }
    }

    /// Wraps a flat list as a one-dimensional batch.
    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            data: ndarray::Array1::from(data).into_dyn(),
        }
    }

    pub fn from_elem(shape: Vec<usize>, value: T) -> Self
    where
        T: Clone,
    {
        Self {
            data: ArrayD::from_elem(IxDyn(&shape), value),
        }
    }

    /// Builds a batch by calling `f` with each flat (row-major) index in order.
    pub fn from_fn<F>(shape: Vec<usize>, mut f: F) -> Self
    where
        F: FnMut(usize) -> T,
    {
        let mut next = 0;
        let data = ArrayD::from_shape_fn(IxDyn(&shape), |_| {
            let value = f(next);
            next += 1;
            value
        });
        Self { data }
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_array(&self) -> &ArrayD<T> {
        &self.data
    }

    pub fn into_array(self) -> ArrayD<T> {
        self.data
    }

    pub fn iter(&self) -> ndarray::iter::Iter<'_, T, IxDyn> {
        self.data.iter()
    }

    /// Entries in row-major order.
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.data.iter().cloned().collect()
    }

    pub fn map<U, F>(&self, f: F) -> Batch<U>
    where
        F: FnMut(&T) -> U,
    {
        Batch {
            data: self.data.map(f),
        }
    }

    /// Entry-wise map that runs on the rayon pool when the `parallel` feature is on.
    pub fn par_map<U, F>(&self, f: F) -> Batch<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send,
    {
        #[cfg(not(feature = "parallel"))]
        let data = self.data.map(f);

        #[cfg(feature = "parallel")]
        let data = Zip::from(&self.data).par_map_collect(f);

        Batch { data }
    }

    pub fn ensure_same_shape<U>(&self, other: &Batch<U>) -> Result<(), ShapeError> {
        if self.shape() != other.shape() {
            return Err(ShapeError::Mismatch {
                left: self.shape().to_vec(),
                right: other.shape().to_vec(),
            });
        }
        Ok(())
    }

    pub fn try_zip_map<U, V, F>(&self, other: &Batch<U>, mut f: F) -> Result<Batch<V>, ShapeError>
    where
        F: FnMut(&T, &U) -> V,
    {
        self.ensure_same_shape(other)?;
        let data = Zip::from(&self.data)
            .and(&other.data)
            .map_collect(|a, b| f(a, b));
        Ok(Batch { data })
    }
}

impl<T> std::ops::Index<usize> for Batch<T> {
    type Output = T;

    /// Entry at a flat row-major index.
    fn index(&self, index: usize) -> &T {
        assert!(
            index < self.len(),
            "index {} out of range for batch of {} entries",
            index,
            self.len()
        );
        let shape = self.shape();
        let mut position = vec![0; shape.len()];
        let mut rest = index;
        for (axis, &dim) in shape.iter().enumerate().rev() {
            position[axis] = rest % dim;
            rest /= dim;
        }
        &self.data[IxDyn(&position)]
    }
}

impl<'a, T> IntoIterator for &'a Batch<T> {
    type Item = &'a T;
    type IntoIter = ndarray::iter::Iter<'a, T, IxDyn>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}

impl Batch<f64> {
    pub fn from_bools(shape: Vec<usize>, values: &[bool]) -> Result<Self, ShapeError> {
        Self::new(
            shape,
            values.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect(),
        )
    }

    /// Expands the batch to `target` following right-aligned broadcasting rules:
    /// every trailing dimension must either match or be 1.
    pub fn broadcast_to(&self, target: &[usize]) -> Result<Batch<f64>, ShapeError> {
        let view = self
            .data
            .broadcast(IxDyn(target))
            .ok_or_else(|| ShapeError::NotBroadcastable {
                from: self.shape().to_vec(),
                to: target.to_vec(),
            })?;
        Ok(Batch {
            data: view.to_owned(),
        })
    }
}
