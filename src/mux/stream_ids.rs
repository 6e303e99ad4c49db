/// Highest number of stream ids any protocol version can address.
pub const MAX_STREAM_IDS: usize = i16::MAX as usize + 1;

/// Bitmap of stream ids in use. Allocation always picks the lowest free id.
#[derive(Debug)]
pub(crate) struct StreamIdSet {
    used_bitmap: Box<[u64]>,
    capacity: usize,
    in_use: usize,
}

impl StreamIdSet {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_STREAM_IDS);
        StreamIdSet {
            used_bitmap: vec![0; capacity.div_ceil(64)].into_boxed_slice(),
            capacity,
            in_use: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn in_use(&self) -> usize {
        self.in_use
    }

    pub(crate) fn allocate(&mut self) -> Option<i16> {
        for (block_id, block) in self.used_bitmap.iter_mut().enumerate() {
            if *block != !0 {
                let off = block.trailing_ones() as usize;
                let stream_id = block_id * 64 + off;
                // every lower id is taken, so nothing below capacity is free
                if stream_id >= self.capacity {
                    return None;
                }

                *block |= 1u64 << off;
                self.in_use += 1;
                return Some(stream_id as i16);
            }
        }
        None
    }

    pub(crate) fn contains(&self, stream_id: i16) -> bool {
        match Self::position(stream_id, self.capacity) {
            Some((block_id, off)) => self.used_bitmap[block_id] & (1u64 << off) != 0,
            None => false,
        }
    }

    /// Returns `false` when the id was not allocated.
    pub(crate) fn free(&mut self, stream_id: i16) -> bool {
        if !self.contains(stream_id) {
            return false;
        }
        if let Some((block_id, off)) = Self::position(stream_id, self.capacity) {
            self.used_bitmap[block_id] &= !(1u64 << off);
            self.in_use -= 1;
        }
        true
    }

    pub(crate) fn clear(&mut self) {
        self.used_bitmap.fill(0);
        self.in_use = 0;
    }

    fn position(stream_id: i16, capacity: usize) -> Option<(usize, usize)> {
        let index = usize::try_from(stream_id).ok().filter(|&i| i < capacity)?;
        Some((index / 64, index % 64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_lowest_free_id() {
        let mut ids = StreamIdSet::new(128);

        assert_eq!(ids.allocate(), Some(0));
        assert_eq!(ids.allocate(), Some(1));
        assert_eq!(ids.allocate(), Some(2));

        assert!(ids.free(1));
        assert_eq!(ids.allocate(), Some(1));
        assert_eq!(ids.allocate(), Some(3));
        assert_eq!(ids.in_use(), 4);
    }

    #[test]
    fn respects_a_capacity_that_is_not_a_multiple_of_64() {
        let mut ids = StreamIdSet::new(70);

        for expected in 0..70 {
            assert_eq!(ids.allocate(), Some(expected));
        }
        assert_eq!(ids.allocate(), None);

        assert!(ids.free(65));
        assert_eq!(ids.allocate(), Some(65));
    }

    #[test]
    fn crosses_block_boundaries() {
        let mut ids = StreamIdSet::new(MAX_STREAM_IDS);
        for _ in 0..64 {
            ids.allocate();
        }

        assert_eq!(ids.allocate(), Some(64));
        assert!(ids.free(3));
        assert_eq!(ids.allocate(), Some(3));
    }

    #[test]
    fn freeing_an_unknown_id_is_refused() {
        let mut ids = StreamIdSet::new(4);
        ids.allocate();

        assert!(!ids.free(1));
        assert!(!ids.free(-1));
        assert!(!ids.free(400));
        assert!(ids.free(0));
        assert!(!ids.free(0));
        assert_eq!(ids.in_use(), 0);
    }

    #[test]
    fn capacity_is_clamped_to_the_addressable_range() {
        let mut ids = StreamIdSet::new(usize::MAX);
        assert_eq!(ids.capacity(), MAX_STREAM_IDS);

        ids.clear();
        assert_eq!(ids.allocate(), Some(0));
    }

    #[test]
    fn zero_capacity_never_allocates() {
        assert_eq!(StreamIdSet::new(0).allocate(), None);
    }
}
