//! Storage abstraction for chunked multi-dimensional arrays
//!
//! The writer only needs geometry and typed slice assignment from the storage
//! engine, so that is the whole trait. `MemoryChunkedArray` is the in-memory
//! implementation used throughout the tests.

use std::io;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::WriteError;

/// A destination array with fixed shape and a chunk size per dimension.
///
/// The geometry is immutable for the duration of a write session. Writes from
/// different workers land in disjoint row ranges, so implementations only
/// need to make individual slice writes safe to issue concurrently.
pub trait ChunkedArray<T: Copy>: Send + Sync {
    /// Array shape, leading (row) dimension first.
    fn shape(&self) -> &[usize];

    /// Chunk size along each dimension, same rank as `shape`.
    fn chunks(&self) -> &[usize];

    /// Number of elements in one logical row (product of the trailing dims).
    fn row_width(&self) -> usize {
        self.shape()[1..].iter().product()
    }

    /// Assign whole rows starting at `offset`. `data` is row-major and must
    /// hold a whole number of rows.
    fn write_rows(&self, offset: usize, data: &[T]) -> io::Result<()>;

    /// Assign a rectangular slab covering `rows` and the `cols` range of the
    /// second dimension. `data` is row-major over the slab.
    fn write_slab(&self, rows: Range<usize>, cols: Range<usize>, data: &[T]) -> io::Result<()>;
}

/// In-memory chunked array with write statistics.
///
/// Rows are stored row-major behind a mutex; the op/byte counters follow the
/// same atomic counter layout as I/O stats trackers so tests can count writes
/// without involving the shared progress counter.
#[derive(Debug)]
pub struct MemoryChunkedArray<T> {
    shape: Vec<usize>,
    chunks: Vec<usize>,
    data: Mutex<Vec<T>>,
    write_ops: AtomicU64,
    write_bytes: AtomicU64,
}

impl<T: Copy + Default> MemoryChunkedArray<T> {
    /// Create a zero-initialized array with the given shape and chunk sizes.
    pub fn new(shape: Vec<usize>, chunks: Vec<usize>) -> Result<Self, WriteError> {
        if shape.is_empty() || shape.len() != chunks.len() {
            return Err(WriteError::InvalidArgument(format!(
                "shape {shape:?} and chunks {chunks:?} must have the same non-zero rank"
            )));
        }
        if chunks.iter().any(|&c| c == 0) {
            return Err(WriteError::InvalidArgument(format!(
                "chunk sizes must be positive, got {chunks:?}"
            )));
        }
        let len = shape.iter().product();
        Ok(Self {
            shape,
            chunks,
            data: Mutex::new(vec![T::default(); len]),
            write_ops: AtomicU64::new(0),
            write_bytes: AtomicU64::new(0),
        })
    }

    /// Snapshot of the stored elements in row-major order.
    pub fn to_vec(&self) -> Vec<T> {
        self.data.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of slice writes issued so far.
    pub fn write_ops(&self) -> u64 {
        self.write_ops.load(Ordering::Relaxed)
    }

    /// Total bytes written so far.
    pub fn write_bytes(&self) -> u64 {
        self.write_bytes.load(Ordering::Relaxed)
    }

    fn record_write(&self, elements: usize) {
        self.write_ops.fetch_add(1, Ordering::Relaxed);
        self.write_bytes
            .fetch_add((elements * std::mem::size_of::<T>()) as u64, Ordering::Relaxed);
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, Vec<T>>> {
        self.data
            .lock()
            .map_err(|_| io::Error::other("array lock poisoned"))
    }
}

impl<T: Copy + Default + Send + Sync> ChunkedArray<T> for MemoryChunkedArray<T> {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn chunks(&self) -> &[usize] {
        &self.chunks
    }

    fn write_rows(&self, offset: usize, data: &[T]) -> io::Result<()> {
        let width = self.row_width();
        if width == 0 || data.len() % width != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("data length {} is not a whole number of rows", data.len()),
            ));
        }
        let start = offset * width;
        let mut stored = self.lock()?;
        let end = start + data.len();
        if end > stored.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("write of rows {}..{} exceeds shape {:?}", offset, offset + data.len() / width, self.shape),
            ));
        }
        stored[start..end].copy_from_slice(data);
        drop(stored);
        self.record_write(data.len());
        Ok(())
    }

    fn write_slab(&self, rows: Range<usize>, cols: Range<usize>, data: &[T]) -> io::Result<()> {
        if self.shape.len() < 2 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "slab writes need a trailing dimension",
            ));
        }
        let ncols = self.shape[1];
        let inner: usize = self.shape[2..].iter().product();
        let slab_width = (cols.end - cols.start) * inner;
        if rows.end > self.shape[0] || cols.end > ncols {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("slab {rows:?} x {cols:?} exceeds shape {:?}", self.shape),
            ));
        }
        if data.len() != (rows.end - rows.start) * slab_width {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("slab data length {} does not match {rows:?} x {cols:?}", data.len()),
            ));
        }
        let mut stored = self.lock()?;
        for (i, row) in rows.clone().enumerate() {
            let dst = (row * ncols + cols.start) * inner;
            let src = i * slab_width;
            stored[dst..dst + slab_width].copy_from_slice(&data[src..src + slab_width]);
        }
        drop(stored);
        self.record_write(data.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_mismatched_rank() {
        assert!(MemoryChunkedArray::<i32>::new(vec![10, 5], vec![4]).is_err());
        assert!(MemoryChunkedArray::<i32>::new(vec![], vec![]).is_err());
        assert!(MemoryChunkedArray::<i32>::new(vec![10], vec![0]).is_err());
    }

    #[test]
    fn test_write_rows_1d() {
        let array = MemoryChunkedArray::<i32>::new(vec![6], vec![2]).unwrap();
        array.write_rows(2, &[7, 8, 9]).unwrap();
        assert_eq!(array.to_vec(), vec![0, 0, 7, 8, 9, 0]);
        assert_eq!(array.write_ops(), 1);
        assert_eq!(array.write_bytes(), 12);
    }

    #[test]
    fn test_write_slab_2d() {
        let array = MemoryChunkedArray::<i32>::new(vec![3, 4], vec![2, 2]).unwrap();
        array.write_slab(1..3, 1..3, &[1, 2, 3, 4]).unwrap();
        assert_eq!(
            array.to_vec(),
            vec![0, 0, 0, 0, 0, 1, 2, 0, 0, 3, 4, 0]
        );
    }

    #[test]
    fn test_out_of_bounds_write_fails() {
        let array = MemoryChunkedArray::<i32>::new(vec![4], vec![2]).unwrap();
        assert!(array.write_rows(3, &[1, 2]).is_err());
        let array = MemoryChunkedArray::<i32>::new(vec![2, 2], vec![2, 2]).unwrap();
        assert!(array.write_slab(0..2, 1..3, &[1, 2, 3, 4]).is_err());
    }
}
