//! Size-class table for the slab heap.
//!
//! Small requests are rounded up to a class and served from that class's
//! free list. The table has a linear low band followed by a doubling high
//! band:
//!
//! ```text
//! index:  0    1    2    3  | 4    5    6
//! size:   32   64   96   128| 256  512  1024    (defaults)
//!         └── lo_granularity┘ └── lo_max << k ┘
//! ```

/// The class a request size falls into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeClass {
    /// Served from the free list at `index`; every allocation in the class
    /// is exactly `size` bytes.
    Slab {
        /// Free-list index.
        index: usize,
        /// Rounded-up allocation size.
        size: usize,
    },
    /// Too large for any class; served directly by the system allocator.
    Dynamic,
}

/// Two-band size-class table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizeClasses {
    lo_granularity: usize,
    lo_count: usize,
    hi_count: usize,
}

impl SizeClasses {
    /// Build a table. Callers are expected to have validated the shape via
    /// [`HeapConfig::validate`](crate::HeapConfig::validate).
    pub fn new(lo_granularity: usize, lo_count: usize, hi_count: usize) -> Self {
        Self {
            lo_granularity,
            lo_count,
            hi_count,
        }
    }

    /// Spacing of the low band.
    pub fn lo_granularity(&self) -> usize {
        self.lo_granularity
    }

    /// Largest class in the low band.
    pub fn lo_max(&self) -> usize {
        self.lo_granularity * self.lo_count
    }

    /// Largest class overall; anything bigger is dynamic.
    pub fn largest(&self) -> usize {
        self.lo_max() << self.hi_count
    }

    /// Total number of classes (and free lists).
    pub fn count(&self) -> usize {
        self.lo_count + self.hi_count
    }

    /// Allocation size of the class at `index`.
    pub fn class_size(&self, index: usize) -> usize {
        debug_assert!(index < self.count());
        if index < self.lo_count {
            (index + 1) * self.lo_granularity
        } else {
            self.lo_max() << (index - self.lo_count + 1)
        }
    }

    /// Classify a request. A zero-byte request rounds up to the smallest
    /// class.
    pub fn classify(&self, size: usize) -> SizeClass {
        let lo_max = self.lo_max();
        if size <= lo_max {
            let index = size.saturating_sub(1) / self.lo_granularity;
            return SizeClass::Slab {
                index,
                size: (index + 1) * self.lo_granularity,
            };
        }

        // size > lo_max, so the ratio is at least 2 and the shift at least 1.
        let shift = size.div_ceil(lo_max).next_power_of_two().trailing_zeros() as usize;
        if shift <= self.hi_count {
            SizeClass::Slab {
                index: self.lo_count + shift - 1,
                size: lo_max << shift,
            }
        } else {
            SizeClass::Dynamic
        }
    }

    /// Index of the low-band class that a leftover of `size` bytes can
    /// serve, or `None` if the leftover is smaller than the granularity.
    ///
    /// Leftovers larger than the low band are capped at its largest class.
    pub fn leftover_class(&self, size: usize) -> Option<usize> {
        if size < self.lo_granularity {
            return None;
        }
        Some(size.min(self.lo_max()) / self.lo_granularity - 1)
    }
}
