//! In-memory vector storage.
//!
//! Vectors are kept row-major in one contiguous `Vec<f32>` so that point `i`
//! lives at `data[i * dims..(i + 1) * dims]`. Squared norms are computed once
//! at load time for the `FastL2` metric.

use crate::distance::squared_norm;
use crate::error::{NsgError, Result, format_error, invalid};
use crate::graph::PointId;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Size of the `i32` dimension header that precedes each `fvecs` record.
const FVECS_HEADER: usize = std::mem::size_of::<i32>();

/// Immutable store of `len()` vectors, each of `dimensions()` components.
#[derive(Debug, Clone)]
pub struct VectorStore {
    data: Vec<f32>,
    norms: Vec<f32>,
    dims: usize,
}

impl VectorStore {
    /// Builds a store from a flat row-major buffer.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `dims` is zero or `data.len()` is not
    /// a multiple of `dims`.
    pub fn from_flat(data: Vec<f32>, dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(invalid("dimensions must be > 0"));
        }
        if data.len() % dims != 0 {
            return Err(invalid(format!(
                "flat buffer of {} floats is not a multiple of dimension {}",
                data.len(),
                dims
            )));
        }
        if data.len() / dims > PointId::MAX as usize {
            return Err(invalid("too many points for 32-bit ids"));
        }

        let norms = data.chunks_exact(dims).map(squared_norm).collect();
        Ok(Self { data, norms, dims })
    }

    /// Builds a store from a slice of rows.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if there are no rows, the first row is
    /// empty, or the rows have different lengths.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self> {
        let dims = rows.first().map(|r| r.as_ref().len()).ok_or_else(|| invalid("no rows supplied"))?;

        let mut data = Vec::with_capacity(rows.len() * dims);
        for (i, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != dims {
                return Err(invalid(format!(
                    "row {} has {} components, expected {}",
                    i,
                    row.len(),
                    dims
                )));
            }
            data.extend_from_slice(row);
        }

        Self::from_flat(data, dims)
    }

    /// Loads an `fvecs` file: repeated records of an `i32` dimension followed
    /// by that many `f32` components.
    ///
    /// # Errors
    ///
    /// - `EmptyInput` if the file cannot be opened or is empty
    /// - `Format` if the dimension header is not positive, the file size is
    ///   not a whole number of records, or records disagree on dimension
    pub fn load_fvecs<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| NsgError::EmptyInput(format!("cannot open {}: {}", path.display(), e)))?;

        let len = file.metadata()?.len();
        if len == 0 {
            return Err(NsgError::EmptyInput(format!("{} is empty", path.display())));
        }

        // SAFETY: the map is read-only and dropped before this function returns
        let mmap = unsafe { Mmap::map(&file)? };
        let bytes = &mmap[..];

        let dims = read_i32(bytes, 0).ok_or_else(|| format_error("fvecs file shorter than one header"))?;
        let dims = usize::try_from(dims)
            .ok()
            .filter(|&d| d > 0)
            .ok_or_else(|| format_error(format!("fvecs dimension must be positive, got {dims}")))?;

        let record = FVECS_HEADER + dims * std::mem::size_of::<f32>();
        if bytes.len() % record != 0 {
            return Err(format_error(format!(
                "fvecs size {} is not a multiple of the {}-byte record for dimension {}",
                bytes.len(),
                record,
                dims
            )));
        }

        let count = bytes.len() / record;
        let mut data = Vec::with_capacity(count * dims);
        for (i, chunk) in bytes.chunks_exact(record).enumerate() {
            let (header, body) = chunk.split_at(FVECS_HEADER);
            let row_dims = read_i32(header, 0).unwrap_or(-1);
            if usize::try_from(row_dims).ok() != Some(dims) {
                return Err(format_error(format!(
                    "fvecs record {i} has dimension {row_dims}, expected {dims}"
                )));
            }
            data.extend(
                body.chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            );
        }

        tracing::debug!(path = %path.display(), points = count, dims, "loaded fvecs file");

        Self::from_flat(data, dims)
    }

    /// Number of stored points.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.norms.len()
    }

    /// Whether the store holds no points.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.norms.is_empty()
    }

    /// Number of components per vector.
    #[inline]
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dims
    }

    /// Borrowed view of one point's vector.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of bounds. Graph code only hands out ids that
    /// were validated against `len()`.
    #[inline]
    #[must_use]
    pub fn vector(&self, id: PointId) -> &[f32] {
        let start = id as usize * self.dims;
        &self.data[start..start + self.dims]
    }

    /// Bounds-checked variant of [`VectorStore::vector`].
    #[must_use]
    pub fn get(&self, id: PointId) -> Option<&[f32]> {
        let start = (id as usize).checked_mul(self.dims)?;
        self.data.get(start..start + self.dims)
    }

    /// Precomputed squared norm of one point.
    #[inline]
    #[must_use]
    pub fn norm(&self, id: PointId) -> f32 {
        self.norms[id as usize]
    }

    /// The whole row-major buffer.
    #[must_use]
    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    /// Componentwise mean of all vectors (accumulated in `f64`).
    #[must_use]
    pub fn centroid(&self) -> Vec<f32> {
        let mut sum = vec![0.0_f64; self.dims];
        for row in self.data.chunks_exact(self.dims) {
            for (acc, &x) in sum.iter_mut().zip(row) {
                *acc += f64::from(x);
            }
        }

        let n = self.len().max(1) as f64;
        sum.into_iter().map(|s| (s / n) as f32).collect()
    }

    /// Checks that a query has this store's dimension.
    pub(crate) fn check_query(&self, query: &[f32]) -> Result<()> {
        if query.len() != self.dims {
            return Err(invalid(format!(
                "query dimension mismatch: expected {}, got {}",
                self.dims,
                query.len()
            )));
        }
        Ok(())
    }
}

fn read_i32(bytes: &[u8], offset: usize) -> Option<i32> {
    let b = bytes.get(offset..offset + 4)?;
    Some(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows_and_access() {
        let store = VectorStore::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.dimensions(), 2);
        assert_eq!(store.vector(1), &[3.0, 4.0]);
        assert_eq!(store.norm(2), 61.0);
        assert!(store.get(3).is_none());
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let result = VectorStore::from_rows(&[vec![1.0, 2.0], vec![3.0]]);
        assert!(matches!(result, Err(NsgError::InvalidParameter(_))));
    }

    #[test]
    fn test_flat_length_must_divide() {
        assert!(VectorStore::from_flat(vec![0.0; 7], 2).is_err());
        assert!(VectorStore::from_flat(vec![0.0; 8], 0).is_err());
        assert_eq!(VectorStore::from_flat(vec![0.0; 8], 2).unwrap().len(), 4);
    }

    #[test]
    fn test_centroid() {
        let store =
            VectorStore::from_rows(&[vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0], vec![5.0, 5.0]]).unwrap();
        assert_eq!(store.centroid(), vec![1.5, 1.5]);
    }

    #[test]
    fn test_check_query() {
        let store = VectorStore::from_flat(vec![0.0; 6], 3).unwrap();
        assert!(store.check_query(&[1.0, 2.0, 3.0]).is_ok());
        assert!(store.check_query(&[1.0]).is_err());
    }
}
