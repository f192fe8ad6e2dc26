//! Chunk-aligned partitioning of a row range for parallel assignment

/// Split `shape0` rows into at most `n` chunk-aligned `(start, stop)` ranges.
///
/// The chunk indices are divided into `min(n, num_chunks)` contiguous groups
/// of nearly equal size, with any extra chunk going to an earlier group. Every
/// returned range starts on a chunk boundary, the ranges are disjoint and
/// sorted, and together they cover the first `num_chunks` chunks clipped to
/// `shape0`. `max_chunks` caps how many chunks are covered at all.
pub fn chunk_aligned_slices(
    shape0: usize,
    chunk_size: usize,
    n: usize,
    max_chunks: Option<usize>,
) -> Vec<(usize, usize)> {
    debug_assert!(chunk_size > 0, "chunk size must be positive");
    debug_assert!(n > 0, "partition count must be positive");

    let mut num_chunks = shape0.div_ceil(chunk_size);
    if let Some(max_chunks) = max_chunks {
        num_chunks = num_chunks.min(max_chunks);
    }
    if num_chunks == 0 {
        return Vec::new();
    }

    let groups = n.min(num_chunks);
    let base = num_chunks / groups;
    let extra = num_chunks % groups;

    let mut slices = Vec::with_capacity(groups);
    let mut first_chunk = 0;
    for group in 0..groups {
        let len = base + usize::from(group < extra);
        let last_chunk = first_chunk + len - 1;
        let start = first_chunk * chunk_size;
        let stop = ((last_chunk + 1) * chunk_size).min(shape0);
        slices.push((start, stop));
        first_chunk += len;
    }
    slices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_groups_over_three_chunks() {
        // Shape (10, 5) with chunk size 4 has 3 chunks along the rows.
        let slices = chunk_aligned_slices(10, 4, 2, None);
        assert_eq!(slices, vec![(0, 8), (8, 10)]);
    }

    #[test]
    fn test_empty_array_yields_no_slices() {
        assert_eq!(chunk_aligned_slices(0, 4, 3, None), vec![]);
    }

    #[test]
    fn test_more_groups_than_chunks() {
        let slices = chunk_aligned_slices(10, 4, 8, None);
        assert_eq!(slices, vec![(0, 4), (4, 8), (8, 10)]);
    }

    #[test]
    fn test_single_group_covers_everything() {
        assert_eq!(chunk_aligned_slices(10, 4, 1, None), vec![(0, 10)]);
        assert_eq!(chunk_aligned_slices(8, 4, 1, None), vec![(0, 8)]);
    }

    #[test]
    fn test_max_chunks_caps_coverage() {
        let slices = chunk_aligned_slices(100, 10, 4, Some(2));
        assert_eq!(slices, vec![(0, 10), (10, 20)]);
        // Cap larger than the chunk count changes nothing.
        let slices = chunk_aligned_slices(10, 4, 2, Some(100));
        assert_eq!(slices, vec![(0, 8), (8, 10)]);
    }

    #[test]
    fn test_extra_chunks_go_to_earlier_groups() {
        // 7 chunks over 3 groups: sizes 3, 2, 2.
        let slices = chunk_aligned_slices(70, 10, 3, None);
        assert_eq!(slices, vec![(0, 30), (30, 50), (50, 70)]);
    }

    #[test]
    fn test_slices_are_disjoint_aligned_and_cover() {
        for shape0 in [1, 5, 16, 33, 100, 1001] {
            for chunk_size in [1, 3, 4, 7, 16] {
                for n in [1, 2, 3, 8, 40] {
                    let slices = chunk_aligned_slices(shape0, chunk_size, n, None);
                    let num_chunks = shape0.div_ceil(chunk_size);
                    assert_eq!(slices.len(), n.min(num_chunks));
                    let mut expected_start = 0;
                    for &(start, stop) in &slices {
                        assert_eq!(start, expected_start);
                        assert_eq!(start % chunk_size, 0);
                        assert!(stop > start);
                        expected_start = stop;
                    }
                    assert_eq!(slices.last().unwrap().1, shape0);
                }
            }
        }
    }
}
