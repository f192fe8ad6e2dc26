//! Per-worker staging buffer that flushes whole chunks to storage
//!
//! Each worker owns one `BufferedArrayWriter` per destination array. Rows
//! accumulate in a chunk-sized buffer and land in storage one chunk at a
//! time, so concurrent workers writing disjoint chunk-aligned ranges never
//! touch overlapping storage regions.

use std::mem;

use crate::chunked_array::ChunkedArray;
use crate::error::WriteError;
use crate::progress::update_progress;

/// Staging buffer for one worker's writes to one chunked array.
#[derive(Debug)]
pub struct BufferedArrayWriter<'a, T, A> {
    array: &'a A,
    array_offset: usize,
    chunk_rows: usize,
    row_width: usize,
    buf: Vec<T>,
    buffer_row: usize,
}

impl<'a, T, A> BufferedArrayWriter<'a, T, A>
where
    T: Copy + Default,
    A: ChunkedArray<T>,
{
    /// Open a writer whose next flush lands at row `offset`.
    ///
    /// `offset` must be a multiple of the array's leading chunk size. The
    /// staging buffer is zero-filled up front so an allocation failure
    /// surfaces here rather than at the first flush.
    pub fn new(array: &'a A, offset: usize) -> Result<Self, WriteError> {
        let chunk0 = array.chunks()[0];
        if offset % chunk0 != 0 {
            return Err(WriteError::InvalidArgument(format!(
                "offset {offset} is not a multiple of the chunk size {chunk0}"
            )));
        }
        let chunk_rows = chunk0.min(array.shape()[0]);
        let row_width = array.row_width();
        let buf = vec![T::default(); chunk_rows * row_width];
        Ok(Self {
            array,
            array_offset: offset,
            chunk_rows,
            row_width,
            buf,
            buffer_row: 0,
        })
    }

    /// Rows held by the staging buffer when full.
    pub fn chunk_rows(&self) -> usize {
        self.chunk_rows
    }

    /// Absolute destination row of the next flush.
    pub fn array_offset(&self) -> usize {
        self.array_offset
    }

    /// Rows currently staged.
    pub fn buffered_rows(&self) -> usize {
        self.buffer_row
    }

    /// Hand out the next staging row for the caller to populate.
    ///
    /// Flushes first when the buffer is full. Callers populate exactly one
    /// logical row per call.
    pub fn next_row(&mut self) -> Result<&mut [T], WriteError> {
        if self.buffer_row == self.chunk_rows {
            self.flush()?;
        }
        let start = self.buffer_row * self.row_width;
        self.buffer_row += 1;
        Ok(&mut self.buf[start..start + self.row_width])
    }

    /// Write the staged rows to storage. A no-op when nothing is staged.
    ///
    /// The destination offset always advances by the full chunk height, even
    /// for a short final chunk, so the destination's row allocation must be a
    /// multiple of the chunk size.
    pub fn flush(&mut self) -> Result<(), WriteError> {
        if self.buffer_row == 0 {
            return Ok(());
        }
        let staged = self.buffer_row;
        if self.array.chunks().len() <= 1 {
            let data = &self.buf[..staged * self.row_width];
            self.array.write_rows(self.array_offset, data)?;
            update_progress(mem::size_of_val(data) as u64);
        } else {
            self.flush_slabs(staged)?;
        }
        log::debug!(
            "flushed rows {}..{} of {:?}",
            self.array_offset,
            self.array_offset + staged,
            self.array.shape()
        );
        self.array_offset += self.chunk_rows;
        self.buffer_row = 0;
        Ok(())
    }

    // Write one column slab at a time, bounded by the trailing chunk width,
    // so peak copy size stays bounded and progress arrives incrementally.
    fn flush_slabs(&self, staged: usize) -> Result<(), WriteError> {
        let ncols = self.array.shape()[1];
        let col_chunk = self.array.chunks()[1];
        let inner: usize = self.array.shape()[2..].iter().product();
        let mut slab: Vec<T> = Vec::with_capacity(staged * col_chunk * inner);
        let mut start = 0;
        while start < ncols {
            let stop = (start + col_chunk).min(ncols);
            slab.clear();
            for row in 0..staged {
                let base = row * self.row_width;
                slab.extend_from_slice(&self.buf[base + start * inner..base + stop * inner]);
            }
            self.array
                .write_slab(self.array_offset..self.array_offset + staged, start..stop, &slab)?;
            update_progress((slab.len() * mem::size_of::<T>()) as u64);
            start = stop;
        }
        Ok(())
    }

    /// Flush any pending rows and consume the writer.
    pub fn close(mut self) -> Result<(), WriteError> {
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunked_array::MemoryChunkedArray;

    #[test]
    fn test_misaligned_offset_is_rejected() {
        let array = MemoryChunkedArray::<i32>::new(vec![10], vec![4]).unwrap();
        let err = BufferedArrayWriter::new(&array, 3).unwrap_err();
        assert!(matches!(err, WriteError::InvalidArgument(_)));
        assert!(BufferedArrayWriter::new(&array, 8).is_ok());
    }

    #[test]
    fn test_round_trip_1d() {
        let array = MemoryChunkedArray::<i32>::new(vec![10], vec![4]).unwrap();
        let mut writer = BufferedArrayWriter::new(&array, 0).unwrap();
        for i in 0..10 {
            writer.next_row().unwrap()[0] = i;
        }
        writer.close().unwrap();
        assert_eq!(array.to_vec(), (0..10).collect::<Vec<_>>());
        // 10 rows over chunks of 4: two full flushes plus the final one.
        assert_eq!(array.write_ops(), 3);
    }

    #[test]
    fn test_round_trip_2d_with_column_slabs() {
        let array = MemoryChunkedArray::<i32>::new(vec![4, 5], vec![4, 2]).unwrap();
        let mut writer = BufferedArrayWriter::new(&array, 0).unwrap();
        for r in 0..4 {
            let row = writer.next_row().unwrap();
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = (r * 5 + c) as i32;
            }
        }
        writer.close().unwrap();
        assert_eq!(array.to_vec(), (0..20).collect::<Vec<_>>());
        // Columns 0..5 with a column chunk of 2 flush as slabs 0..2, 2..4, 4..5.
        assert_eq!(array.write_ops(), 3);
    }

    #[test]
    fn test_flush_is_idempotent() {
        let array = MemoryChunkedArray::<i32>::new(vec![8], vec![4]).unwrap();
        let mut writer = BufferedArrayWriter::new(&array, 0).unwrap();
        writer.next_row().unwrap()[0] = 42;
        writer.flush().unwrap();
        assert_eq!(array.write_ops(), 1);
        writer.flush().unwrap();
        assert_eq!(array.write_ops(), 1);
    }

    #[test]
    fn test_partial_flush_advances_by_full_chunk() {
        let array = MemoryChunkedArray::<i32>::new(vec![8], vec![4]).unwrap();
        let mut writer = BufferedArrayWriter::new(&array, 0).unwrap();
        writer.next_row().unwrap()[0] = 1;
        writer.next_row().unwrap()[0] = 2;
        writer.flush().unwrap();
        assert_eq!(writer.array_offset(), 4);
        assert_eq!(writer.buffered_rows(), 0);
        // The next staged row lands in the following chunk.
        writer.next_row().unwrap()[0] = 3;
        writer.flush().unwrap();
        assert_eq!(array.to_vec(), vec![1, 2, 0, 0, 3, 0, 0, 0]);
    }

    #[test]
    fn test_buffer_is_zeroed_at_open() {
        let array = MemoryChunkedArray::<i32>::new(vec![4], vec![4]).unwrap();
        let mut writer = BufferedArrayWriter::new(&array, 0).unwrap();
        for _ in 0..4 {
            // Rows are left untouched after the zero fill.
            assert_eq!(writer.next_row().unwrap()[0], 0);
        }
    }

    #[test]
    fn test_short_leading_dimension_shrinks_buffer() {
        let array = MemoryChunkedArray::<i32>::new(vec![3], vec![8]).unwrap();
        let writer = BufferedArrayWriter::new(&array, 0).unwrap();
        assert_eq!(writer.chunk_rows(), 3);
    }
}
