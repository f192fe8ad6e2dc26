// Implementations
pub mod buffered_writer;
pub mod chunk_slices;
pub mod chunked_array;
pub mod dtype;
pub mod error;
pub mod progress;
pub mod work_manager;

// Export the main types
pub use buffered_writer::BufferedArrayWriter;
pub use chunk_slices::chunk_aligned_slices;
pub use chunked_array::{ChunkedArray, MemoryChunkedArray};
pub use dtype::{min_int_dtype, IntDtype};
pub use error::WriteError;
pub use progress::{read_progress, set_progress, update_progress, ProgressConfig};
pub use work_manager::{default_worker_count, ParallelWorkManager, WorkHandle};
