//! Page descriptors and the translation between descriptors and page-frame numbers.

use bitflags::bitflags;

/// A page-frame number.
pub type Pfn = u64;

/// The index of a [`PageDescriptor`] inside the descriptor table.
///
/// Descriptors are laid out in frame-number order, so comparing two indices
/// gives the same result as comparing their frame numbers.
pub type PageIndex = usize;

bitflags! {
    /// State bits of a single page descriptor.
    pub struct PageFlags: u8 {
        /// The page is the head of a block that sits in a free list.
        const FREE = 1 << 0;
        /// The page was taken out of the allocator permanently.
        const RESERVED = 1 << 1;
    }
}

/// Descriptor of a single physical page.
///
/// The link to the next free block is only meaningful while this page is the
/// head of a free block. All other pages of a free block are owned by the head.
#[derive(Debug, Clone, Copy)]
pub struct PageDescriptor {
    pub(crate) next_free: Option<PageIndex>,
    pub(crate) flags: PageFlags,
}

impl PageDescriptor {
    /// A descriptor that is neither free nor reserved.
    pub const EMPTY: Self = Self {
        next_free: None,
        flags: PageFlags::empty(),
    };

    /// Create a new, empty descriptor.
    pub const fn new() -> Self {
        Self::EMPTY
    }

    /// Return the state bits of this page.
    pub fn flags(&self) -> PageFlags {
        self.flags
    }
}

impl Default for PageDescriptor {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Translation between descriptor indices and page-frame numbers.
///
/// This is provided by the memory subsystem that owns the descriptor table.
/// Both directions must be exact inverses for every index inside the table.
///
/// The allocator relies on the table being a contiguous run of frames:
/// index `i + 1` must describe the frame directly after index `i`, and
/// index `0` must describe a frame aligned to a block of the largest order.
/// Free lists are sorted by index, and the pages of a block are addressed
/// as `head..head + 2^order`.
pub trait FrameMap {
    /// Return the frame number of the page described by `pgd`.
    fn pgd_to_pfn(&self, pgd: PageIndex) -> Pfn;

    /// Return the descriptor for the given frame number,
    /// or `None` if the frame is not part of the descriptor table.
    fn pfn_to_pgd(&self, pfn: Pfn) -> Option<PageIndex>;
}

/// A [`FrameMap`] for a descriptor table that covers the frames
/// `base..base + len` without holes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearMap {
    base: Pfn,
    len: usize,
}

impl LinearMap {
    /// Create a map where descriptor `0` describes frame `base`.
    pub const fn new(base: Pfn, len: usize) -> Self {
        Self { base, len }
    }

    /// The first frame number that is covered by this map.
    pub fn base(&self) -> Pfn {
        self.base
    }

    /// The number of descriptors covered by this map.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns whether this map covers no frames at all.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl FrameMap for LinearMap {
    fn pgd_to_pfn(&self, pgd: PageIndex) -> Pfn {
        self.base + pgd as Pfn
    }

    fn pfn_to_pgd(&self, pfn: Pfn) -> Option<PageIndex> {
        let idx = pfn.checked_sub(self.base)?;
        if idx < self.len as Pfn {
            Some(idx as PageIndex)
        } else {
            None
        }
    }
}

impl<M: FrameMap + ?Sized> FrameMap for &M {
    fn pgd_to_pfn(&self, pgd: PageIndex) -> Pfn {
        (**self).pgd_to_pfn(pgd)
    }

    fn pfn_to_pgd(&self, pfn: Pfn) -> Option<PageIndex> {
        (**self).pfn_to_pgd(pfn)
    }
}
