//! Arena and heap configuration parameters.

use crate::error::AllocError;
use crate::size_class::SizeClasses;

/// Largest alignment an arena or heap can be configured with.
pub const MAX_ALIGNMENT: usize = 64;

/// Configuration for an [`Arena`](crate::Arena).
///
/// Validated at construction; immutable afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Nominal size of each block in bytes.
    ///
    /// Requests larger than this get a block of their own size. The
    /// alignment padding is added on top. Must be non-zero.
    pub block_size: usize,

    /// Alignment of every pointer handed out by the arena.
    ///
    /// Must be a power of two no larger than [`MAX_ALIGNMENT`].
    pub block_alignment: usize,

    /// Upper bound on the bytes the arena may hold in blocks at once.
    ///
    /// `None` means the system allocator is the only limit. Exceeding the
    /// limit is reported as [`AllocError::OutOfMemory`].
    pub memory_limit: Option<usize>,
}

impl ArenaConfig {
    /// Default nominal block size: 8 KiB.
    pub const DEFAULT_BLOCK_SIZE: usize = 8192;

    /// Default block alignment: one machine word.
    pub const DEFAULT_BLOCK_ALIGNMENT: usize = std::mem::size_of::<usize>();

    /// Create a config with the given block size and default alignment.
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            block_alignment: Self::DEFAULT_BLOCK_ALIGNMENT,
            memory_limit: None,
        }
    }

    /// Builder-style setter for the block alignment.
    pub fn with_alignment(mut self, block_alignment: usize) -> Self {
        self.block_alignment = block_alignment;
        self
    }

    /// Builder-style setter for the memory limit.
    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = Some(limit);
        self
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), AllocError> {
        if self.block_size == 0 {
            return Err(AllocError::InvalidConfig {
                reason: "block_size must be non-zero",
            });
        }
        validate_alignment(self.block_alignment)
    }

    /// `log2(block_alignment)`.
    pub fn alignment_shift(&self) -> u32 {
        self.block_alignment.trailing_zeros()
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BLOCK_SIZE)
    }
}

/// Configuration for a [`SlabHeap`](crate::SlabHeap).
///
/// The size-class table has two bands: a linear low band of
/// `lo_count` classes spaced `lo_granularity` bytes apart, followed by a
/// doubling high band of `hi_count` classes. Anything larger than the
/// last high class is served as a dynamic block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeapConfig {
    /// Alignment of slab allocations carved from the arena.
    pub slot_alignment: usize,
    /// Spacing of the low band, in bytes.
    pub lo_granularity: usize,
    /// Number of classes in the low band.
    pub lo_count: usize,
    /// Number of doubling classes in the high band.
    pub hi_count: usize,
    /// Upper bound on the bytes held by live dynamic blocks.
    pub dynamic_limit: Option<usize>,
}

impl HeapConfig {
    /// Default slot alignment: two machine words.
    pub const DEFAULT_SLOT_ALIGNMENT: usize = 2 * std::mem::size_of::<usize>();

    /// Default low-band spacing.
    pub const DEFAULT_LO_GRANULARITY: usize = 32;

    /// Default low-band class count (32, 64, 96, 128).
    pub const DEFAULT_LO_COUNT: usize = 4;

    /// Default high-band class count (256, 512, 1024).
    pub const DEFAULT_HI_COUNT: usize = 3;

    /// Bytes at the start of a released slot that hold the free-list link.
    pub const FREE_SLOT_HEADER: usize = 16;

    /// Upper bound on `hi_count`.
    pub const MAX_HI_COUNT: usize = 16;

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), AllocError> {
        validate_alignment(self.slot_alignment)?;
        if self.lo_count == 0 {
            return Err(AllocError::InvalidConfig {
                reason: "lo_count must be at least 1",
            });
        }
        if self.lo_granularity < Self::FREE_SLOT_HEADER {
            return Err(AllocError::InvalidConfig {
                reason: "lo_granularity must hold a free-list link (16 bytes)",
            });
        }
        if self.lo_granularity % self.slot_alignment != 0 {
            return Err(AllocError::InvalidConfig {
                reason: "lo_granularity must be a multiple of slot_alignment",
            });
        }
        if self.hi_count > Self::MAX_HI_COUNT {
            return Err(AllocError::InvalidConfig {
                reason: "hi_count must not exceed 16",
            });
        }
        let lo_max = self
            .lo_granularity
            .checked_mul(self.lo_count)
            .ok_or(AllocError::InvalidConfig {
                reason: "low band size overflows",
            })?;
        if lo_max.checked_shl(self.hi_count as u32).map(|v| v >> self.hi_count) != Some(lo_max) {
            return Err(AllocError::InvalidConfig {
                reason: "high band size overflows",
            });
        }
        Ok(())
    }

    /// The size-class table described by this config.
    pub fn size_classes(&self) -> SizeClasses {
        SizeClasses::new(self.lo_granularity, self.lo_count, self.hi_count)
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            slot_alignment: Self::DEFAULT_SLOT_ALIGNMENT,
            lo_granularity: Self::DEFAULT_LO_GRANULARITY,
            lo_count: Self::DEFAULT_LO_COUNT,
            hi_count: Self::DEFAULT_HI_COUNT,
            dynamic_limit: None,
        }
    }
}

fn validate_alignment(alignment: usize) -> Result<(), AllocError> {
    if !alignment.is_power_of_two() || alignment > MAX_ALIGNMENT {
        return Err(AllocError::InvalidConfig {
            reason: "alignment must be a power of two no larger than 64",
        });
    }
    Ok(())
}
