//! Ranges of the media that could not be read.

/// A region of the media that was zero-filled after a read error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorRange {
    /// Byte offset of the region on the media.
    pub offset: u64,

    /// Size of the region in bytes.
    pub size: u64,
}

impl ErrorRange {
    /// Create a new ErrorRange.
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// End offset of the region (exclusive).
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }
}

/// Sorted list of non-overlapping error ranges.
///
/// Overlapping and adjacent ranges are merged on insertion.
#[derive(Debug, Clone, Default)]
pub struct ErrorRanges {
    ranges: Vec<ErrorRange>,
}

impl ErrorRanges {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the region `[offset, offset + size)`.
    pub fn insert(&mut self, offset: u64, size: u64) {
        if size == 0 {
            return;
        }
        let mut merged = ErrorRange::new(offset, size);

        // First range that ends at or after the new start.
        let start = self.ranges.partition_point(|r| r.end() < merged.offset);
        let mut end = start;
        while end < self.ranges.len() && self.ranges[end].offset <= merged.end() {
            let range = self.ranges[end];
            let merged_end = merged.end().max(range.end());
            merged.offset = merged.offset.min(range.offset);
            merged.size = merged_end - merged.offset;
            end += 1;
        }
        self.ranges.splice(start..end, [merged]);
    }

    /// Record every range of `other`.
    pub fn merge(&mut self, other: &ErrorRanges) {
        for range in other {
            self.insert(range.offset, range.size);
        }
    }

    /// Number of ranges after merging.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Whether no range was recorded.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Range at `index`, in offset order.
    pub fn get(&self, index: usize) -> Option<&ErrorRange> {
        self.ranges.get(index)
    }

    /// Iterate over the ranges in offset order.
    pub fn iter(&self) -> std::slice::Iter<'_, ErrorRange> {
        self.ranges.iter()
    }

    /// The ranges as a slice sorted by offset.
    pub fn as_slice(&self) -> &[ErrorRange] {
        &self.ranges
    }

    /// Remove all ranges.
    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}

impl<'a> IntoIterator for &'a ErrorRanges {
    type Item = &'a ErrorRange;
    type IntoIter = std::slice::Iter<'a, ErrorRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_sorted() {
        let mut ranges = ErrorRanges::new();
        ranges.insert(4096, 512);
        ranges.insert(0, 512);
        ranges.insert(1024, 0);

        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges.get(0), Some(&ErrorRange::new(0, 512)));
        assert_eq!(ranges.get(1), Some(&ErrorRange::new(4096, 512)));
        assert_eq!(ranges.get(2), None);
    }

    #[test]
    fn test_insert_merges() {
        let mut ranges = ErrorRanges::new();
        ranges.insert(0, 512);
        ranges.insert(1024, 512);
        ranges.insert(2048, 512);

        // Adjacent to the first range.
        ranges.insert(512, 100);
        assert_eq!(ranges.as_slice()[0], ErrorRange::new(0, 612));

        // Spans the second and third range.
        ranges.insert(1500, 600);
        assert_eq!(
            ranges.as_slice(),
            &[ErrorRange::new(0, 612), ErrorRange::new(1024, 1536)]
        );

        // Contained in an existing range.
        ranges.insert(1100, 10);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges.iter().map(|r| r.size).sum::<u64>(), 612 + 1536);
    }

    #[test]
    fn test_merge() {
        let mut ranges = ErrorRanges::new();
        ranges.insert(0, 512);

        let mut pending = ErrorRanges::new();
        pending.insert(512, 512);
        pending.insert(8192, 16);

        ranges.merge(&pending);
        assert_eq!(
            ranges.as_slice(),
            &[ErrorRange::new(0, 1024), ErrorRange::new(8192, 16)]
        );
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_clear() {
        let mut ranges = ErrorRanges::new();
        ranges.insert(10, 10);
        assert!(!ranges.is_empty());
        ranges.clear();
        assert!(ranges.is_empty());
    }
}
