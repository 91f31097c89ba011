//! Free-space bitmap over file-system pages.

/// One bit per page: set means occupied or not yet known, clear means free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBitmap {
    bits: Vec<bool>,
}

impl PageBitmap {
    /// A bitmap of `len` pages, all marked occupied.
    pub fn occupied(len: u32) -> Self {
        Self {
            bits: vec![true; len as usize],
        }
    }

    /// Number of pages tracked.
    pub fn len(&self) -> u32 {
        self.bits.len() as u32
    }

    /// Whether no pages are tracked.
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Whether `page` is occupied. Pages past the end count as occupied.
    pub fn is_set(&self, page: u32) -> bool {
        self.bits
            .get(page as usize)
            .copied()
            .unwrap_or(true)
    }

    /// Mark `page` occupied.
    pub fn set(&mut self, page: u32) {
        if let Some(bit) = self
            .bits
            .get_mut(page as usize)
        {
            *bit = true;
        }
    }

    /// Mark `page` free.
    pub fn clear(&mut self, page: u32) {
        if let Some(bit) = self
            .bits
            .get_mut(page as usize)
        {
            *bit = false;
        }
    }

    /// Mark pages `start..end` free.
    pub fn clear_range(&mut self, start: u32, end: u32) {
        for page in start..end {
            self.clear(page);
        }
    }

    /// First free page at or after `from`, or `len()` if there is none.
    pub fn next_clear(&self, from: u32) -> u32 {
        (from..self.len())
            .find(|&p| !self.is_set(p))
            .unwrap_or(self.len())
    }

    /// First occupied page at or after `from`, or `len()` if there is none.
    pub fn next_set(&self, from: u32) -> u32 {
        (from..self.len())
            .find(|&p| self.is_set(p))
            .unwrap_or(self.len())
    }

    /// Free runs as `(start, end)` page ranges, in ascending order.
    pub fn free_runs(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let mut cursor = 0;
        std::iter::from_fn(move || {
            let start = self.next_clear(cursor);
            if start >= self.len() {
                return None;
            }
            let end = self.next_set(start);
            cursor = end;
            Some((start, end))
        })
    }

    /// Start of the first free run of at least `bytes` capacity.
    pub fn first_fit(&self, bytes: usize, page_size: u32) -> Option<u32> {
        self.free_runs()
            .find(|&(start, end)| run_capacity(start, end, page_size) >= bytes)
            .map(|(start, _)| start)
    }

    /// Capacity of the largest free run in bytes.
    pub fn largest_free_run(&self, page_size: u32) -> usize {
        self.free_runs()
            .map(|(start, end)| run_capacity(start, end, page_size))
            .max()
            .unwrap_or(0)
    }
}

fn run_capacity(start: u32, end: u32, page_size: u32) -> usize {
    (end - start) as usize * page_size as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap(pattern: &str) -> PageBitmap {
        let mut map = PageBitmap::occupied(pattern.len() as u32);
        for (i, c) in pattern
            .chars()
            .enumerate()
        {
            if c == '0' {
                map.clear(i as u32);
            }
        }
        map
    }

    #[test]
    fn test_next_clear_and_set() {
        let map = bitmap("110011");
        assert_eq!(map.next_clear(0), 2);
        assert_eq!(map.next_set(2), 4);
        assert_eq!(map.next_clear(4), 6);
        assert_eq!(map.next_set(6), 6);
    }

    #[test]
    fn test_first_fit_skips_small_runs() {
        let map = bitmap("1011000111");
        assert_eq!(map.first_fit(1024, 1024), Some(1));
        assert_eq!(map.first_fit(1025, 1024), Some(4));
        assert_eq!(map.first_fit(4096, 1024), None);
        assert_eq!(map.largest_free_run(1024), 3072);
    }

    #[test]
    fn test_clear_range_and_out_of_bounds() {
        let mut map = PageBitmap::occupied(4);
        map.clear_range(1, 3);
        assert_eq!(
            map.free_runs()
                .collect::<Vec<_>>(),
            vec![(1, 3)]
        );
        map.clear(10);
        assert!(map.is_set(10));
        assert_eq!(map.len(), 4);
    }
}
