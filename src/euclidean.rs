use ndarray::Array1;
use num_traits::Float;

/// A chain position that lives in a Euclidean space and can be flattened into a
/// single `f64` vector.
///
/// The flat view is what the mass matrix estimators consume, and its length fixes
/// the dimensionality of the metric. Structured positions (several parameter blocks)
/// are flattened block after block, in order.
pub trait EuclideanVector: Clone {
    /// Returns the total number of scalar coordinates.
    fn len(&self) -> usize;

    /// Returns true if the position has no coordinates.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the coordinates into `out`, which must have length [`Self::len`].
    fn write_to_slice(&self, out: &mut [f64]);

    /// Returns a flat copy of the coordinates.
    fn ravel(&self) -> Array1<f64> {
        let mut buf = vec![0.0; self.len()];
        self.write_to_slice(&mut buf);
        Array1::from(buf)
    }
}

fn write_floats<'a, T, I>(values: I, out: &mut [f64])
where
    T: Float + 'a,
    I: IntoIterator<Item = &'a T>,
{
    for (slot, value) in out.iter_mut().zip(values) {
        *slot = value.to_f64().unwrap_or(f64::NAN);
    }
}

impl<T: Float> EuclideanVector for Array1<T> {
    fn len(&self) -> usize {
        self.len()
    }

    fn write_to_slice(&self, out: &mut [f64]) {
        assert_eq!(
            out.len(),
            self.len(),
            "write_to_slice called with mismatched buffer length"
        );
        write_floats(self.iter(), out);
    }
}

impl EuclideanVector for Vec<f64> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn write_to_slice(&self, out: &mut [f64]) {
        out.copy_from_slice(self);
    }
}

/// Block-structured positions, e.g. one array per model parameter.
impl<T: Float> EuclideanVector for Vec<Array1<T>> {
    fn len(&self) -> usize {
        self.iter().map(|block| block.len()).sum()
    }

    fn write_to_slice(&self, out: &mut [f64]) {
        assert_eq!(
            out.len(),
            EuclideanVector::len(self),
            "write_to_slice called with mismatched buffer length"
        );
        let mut offset = 0;
        for block in self {
            let end = offset + block.len();
            write_floats(block.iter(), &mut out[offset..end]);
            offset = end;
        }
    }
}
