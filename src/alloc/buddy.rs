//! Implementation of a Buddy Allocator that is responsible for allocating
//! physical memory pages in blocks of `2^order` pages.
//!
//! Every order has its own [`FreeList`] that is sorted by address. Allocations
//! split larger blocks on demand, and freeing a block eagerly merges it with
//! its buddy as long as the buddy is free too.

use super::{Error, FreeList, PageAllocator, Result, Slot, PAGE_SIZE};
use crate::{
    page::{FrameMap, PageDescriptor, PageFlags, PageIndex, Pfn},
    unit,
};
use core::{cmp, fmt};
use log::{debug, trace, warn};

/// The number of orders of the buddy allocator (exclusive).
///
/// The largest block therefore spans `2^16` pages.
pub const MAX_ORDER: usize = 17;

/// The order of the largest block.
pub const TOP_ORDER: usize = MAX_ORDER - 1;

/// Returns the number of pages inside a block of the given order.
pub const fn pages_per_block(order: usize) -> usize {
    1 << order
}

/// The central structure that is responsible for allocating
/// pages using the buddy allocation algorithm.
pub struct BuddyAllocator<'pages, M> {
    pages: &'pages mut [PageDescriptor],
    map: M,
    free_areas: [FreeList; MAX_ORDER],
    managed: usize,
}

impl<'pages, M: FrameMap> BuddyAllocator<'pages, M> {
    /// Create a new buddy allocator that manages the given descriptor table.
    ///
    /// The table is split into as many blocks of the largest order as possible.
    /// Pages after the last complete block are not managed by the allocator.
    ///
    /// The state of every descriptor inside `pages` is reset.
    pub fn new(pages: &'pages mut [PageDescriptor], map: M) -> Result<Self> {
        let count = pages.len();
        debug!(
            "Buddy Allocator Initialising pd={:p}, nr={:#x}",
            pages.as_ptr(),
            count
        );

        pages.iter_mut().for_each(|pgd| *pgd = PageDescriptor::EMPTY);

        let mut this = Self {
            pages,
            map,
            free_areas: [FreeList::EMPTY; MAX_ORDER],
            managed: 0,
        };

        let blocks = count / pages_per_block(TOP_ORDER);
        if blocks > 0 && !this.is_aligned(0, TOP_ORDER) {
            return Err(Error::MisalignedRegion);
        }

        // every block is appended behind the previous one,
        // so keep the slot to avoid walking the list again
        let mut slot = Slot::Head;
        for block in 0..blocks {
            let pgd = block * pages_per_block(TOP_ORDER);
            this.free_areas[TOP_ORDER].insert_at(this.pages, slot, pgd);
            slot = Slot::Next(pgd);
        }
        this.managed = blocks * pages_per_block(TOP_ORDER);

        let dropped = count - this.managed;
        if dropped > 0 {
            warn!(
                "{} pages do not fill a block of order {} and will not be managed",
                dropped, TOP_ORDER
            );
        }

        debug!(
            "Made {} available for page allocation",
            unit::bytes(this.managed * PAGE_SIZE)
        );

        Ok(this)
    }

    /// Returns `true` if the given page is correctly aligned for `order`.
    pub fn is_aligned(&self, pgd: PageIndex, order: usize) -> bool {
        self.map.pgd_to_pfn(pgd) % pages_per_block(order) as Pfn == 0
    }

    /// Calculate the buddy of the block at `pgd`.
    ///
    /// The buddy lies either directly after or directly before the block,
    /// depending on whether the block is aligned to the next order.
    /// Returns `None` if `order` is out of range, the block is misaligned,
    /// or the buddy is not part of the descriptor table.
    pub fn buddy_of(&self, pgd: PageIndex, order: usize) -> Option<PageIndex> {
        if order >= MAX_ORDER || !self.is_aligned(pgd, order) {
            return None;
        }

        let pfn = self.map.pgd_to_pfn(pgd);
        let size = pages_per_block(order) as Pfn;
        let buddy = if self.is_aligned(pgd, order + 1) {
            pfn.checked_add(size)?
        } else {
            pfn.checked_sub(size)?
        };

        self.map.pfn_to_pgd(buddy)
    }

    /// Insert the block at `pgd` into the free list of `order`.
    ///
    /// Returns the slot that now links to the block.
    fn insert_block(&mut self, pgd: PageIndex, order: usize) -> Slot {
        self.insert_block_at(Slot::Head, pgd, order)
    }

    fn insert_block_at(&mut self, start: Slot, pgd: PageIndex, order: usize) -> Slot {
        assert!(
            !self.pages[pgd].flags.contains(PageFlags::FREE),
            "block {:#x} is already free",
            self.map.pgd_to_pfn(pgd)
        );
        debug_assert!(self.is_aligned(pgd, order));

        self.free_areas[order].insert_at(self.pages, start, pgd)
    }

    /// Remove the block at `pgd` from the free list of `order`.
    ///
    /// Panics if the block is not inside the free list.
    fn remove_block(&mut self, pgd: PageIndex, order: usize) {
        if !self.free_areas[order].remove(self.pages, pgd) {
            panic!(
                "block {:#x} is not free in order {}",
                self.map.pgd_to_pfn(pgd),
                order
            );
        }
    }

    /// Split the free block at `block` into two blocks of the order below.
    ///
    /// Returns the left half, which starts at the same page as `block`.
    fn split_block(&mut self, block: PageIndex, source_order: usize) -> PageIndex {
        assert!(source_order > 0, "can not split a block of order 0");
        assert!(
            self.is_aligned(block, source_order),
            "block {:#x} is misaligned for order {}",
            self.map.pgd_to_pfn(block),
            source_order
        );

        trace!(
            "splitting {:#x} from order {}",
            self.map.pgd_to_pfn(block),
            source_order
        );

        let target_order = source_order - 1;
        self.remove_block(block, source_order);

        // if this is how the block looked like before the split:
        //
        // +-- `block`
        // v
        // +---------------------------------+
        // |         `source_order`          |
        // +---------------------------------+
        //
        // the left buddy starts at `block`, and the right buddy is its
        // buddy in the target order:
        //
        // +---------------------------------+
        // |     buddy 1    |     buddy 2    |
        // +---------------------------------+
        self.insert_block(block, target_order);
        let buddy = self
            .buddy_of(block, target_order)
            .expect("the right half of a split block must exist");

        // the right half always comes after the left one
        self.insert_block_at(Slot::Next(block), buddy, target_order);
        block
    }

    /// Merge the free block at `block` with its buddy into the order above.
    ///
    /// Both buddies must be free in `source_order`, otherwise this will panic.
    /// Returns the merged block.
    fn merge_block(&mut self, block: PageIndex, source_order: usize) -> PageIndex {
        assert!(
            source_order < TOP_ORDER,
            "can not merge blocks of the largest order"
        );
        assert!(
            self.is_aligned(block, source_order),
            "block {:#x} is misaligned for order {}",
            self.map.pgd_to_pfn(block),
            source_order
        );

        let buddy = self
            .buddy_of(block, source_order)
            .expect("a free block must have a buddy to merge with");

        trace!(
            "merging {:#x} and {:#x} in order {}",
            self.map.pgd_to_pfn(block),
            self.map.pgd_to_pfn(buddy),
            source_order
        );

        self.remove_block(block, source_order);
        self.remove_block(buddy, source_order);

        let left = cmp::min(block, buddy);
        self.insert_block(left, source_order + 1);
        left
    }

    /// Produce a free block of the given order by splitting larger blocks.
    ///
    /// Returns the block with the lowest address of that order, which stays
    /// inside the free list.
    fn split_down(&mut self, order: usize) -> Result<PageIndex> {
        if let Some(block) = self.free_areas[order].first() {
            return Ok(block);
        }

        if order == TOP_ORDER {
            return Err(Error::NoMemoryAvailable);
        }

        let block = self.split_down(order + 1)?;
        Ok(self.split_block(block, order + 1))
    }

    /// Merge the free block at `pgd` with its buddy, for as long as possible.
    fn merge_up(&mut self, pgd: PageIndex, order: usize) {
        if order == TOP_ORDER {
            return;
        }

        let buddy = match self.buddy_of(pgd, order) {
            Some(buddy) => buddy,
            None => return,
        };

        // both buddies are free if, and only if, they are neighbours
        // inside the sorted free list
        let (left, right) = (cmp::min(pgd, buddy), cmp::max(pgd, buddy));
        if self.pages[left].next_free == Some(right) {
            let merged = self.merge_block(left, order);
            self.merge_up(merged, order + 1);
        }
    }

    /// Allocates `2^order` contiguous pages.
    ///
    /// Returns the first page of the block, which is always the
    /// free block with the lowest address that fits the order.
    pub fn alloc_pages(&mut self, order: usize) -> Result<PageIndex> {
        if order >= MAX_ORDER {
            return Err(Error::OrderTooLarge);
        }

        let pgd = self.split_down(order).map_err(|err| {
            warn!("no block of order {} left to allocate", order);
            err
        })?;

        self.remove_block(pgd, order);
        Ok(pgd)
    }

    /// Frees `2^order` contiguous pages starting at `pgd`.
    ///
    /// The block must have been returned by [`Self::alloc_pages`] using the
    /// same order, otherwise this will panic or corrupt the allocator state.
    pub fn free_pages(&mut self, pgd: PageIndex, order: usize) {
        assert!(order < MAX_ORDER, "invalid order {} given to free", order);
        assert!(
            pgd + pages_per_block(order) <= self.managed,
            "block {:#x} of order {} is not managed by this allocator",
            self.map.pgd_to_pfn(pgd),
            order
        );
        assert!(
            self.is_aligned(pgd, order),
            "block {:#x} is misaligned for order {}",
            self.map.pgd_to_pfn(pgd),
            order
        );
        assert!(
            !self.pages[pgd].flags.contains(PageFlags::RESERVED),
            "tried to free reserved page {:#x}",
            self.map.pgd_to_pfn(pgd)
        );

        self.insert_block(pgd, order);
        self.merge_up(pgd, order);
    }

    /// Find the free block that contains `pgd`.
    ///
    /// Returns the block together with its order.
    fn containing_block(&self, pgd: PageIndex) -> Option<(PageIndex, usize)> {
        (0..MAX_ORDER).find_map(|order| {
            self.free_blocks(order)
                .find(|&block| block <= pgd && pgd < block + pages_per_block(order))
                .map(|block| (block, order))
        })
    }

    /// Split the free block that contains `pgd` until `pgd` is a free block
    /// of order `0`.
    ///
    /// Returns `false` if `pgd` is not part of any free block, in which case
    /// nothing is changed.
    pub fn isolate_page(&mut self, pgd: PageIndex) -> bool {
        let (mut block, found) = match self.containing_block(pgd) {
            Some(found) => found,
            None => return false,
        };

        for order in (1..=found).rev() {
            let left = self.split_block(block, order);
            let right = self
                .buddy_of(left, order - 1)
                .expect("the right half of a split block must exist");

            // continue with the half that still contains the page
            block = if pgd < right { left } else { right };
        }

        debug_assert_eq!(block, pgd);
        true
    }

    /// Reserve the given page, so it will never be allocated.
    ///
    /// Returns `false` if the page is not free. Isolating the page may
    /// still have split the block it lives in.
    pub fn reserve_page(&mut self, pgd: PageIndex) -> bool {
        if pgd >= self.pages.len() {
            return false;
        }

        self.isolate_page(pgd);

        if !self.free_areas[0].contains(self.pages, pgd) {
            return false;
        }

        self.remove_block(pgd, 0);
        self.pages[pgd].flags.insert(PageFlags::RESERVED);
        debug!("reserved page {:#x}", self.map.pgd_to_pfn(pgd));
        true
    }

    /// Reserve the page with the given frame number.
    ///
    /// Returns `false` if the frame is not part of the descriptor table,
    /// or if the page is not free.
    pub fn reserve_frame(&mut self, pfn: Pfn) -> bool {
        match self.map.pfn_to_pgd(pfn) {
            Some(pgd) => self.reserve_page(pgd),
            None => false,
        }
    }

    /// Return the frame number of the given page.
    pub fn pfn(&self, pgd: PageIndex) -> Pfn {
        self.map.pgd_to_pfn(pgd)
    }

    /// Return an iterator over the free blocks of `order`, in ascending order.
    pub fn free_blocks(&self, order: usize) -> super::Iter<'_> {
        self.free_areas[order].iter(self.pages)
    }

    /// Count all pages that are currently inside a free block.
    pub fn free_pages_count(&self) -> usize {
        (0..MAX_ORDER)
            .map(|order| self.free_blocks(order).count() * pages_per_block(order))
            .sum()
    }

    /// The number of pages that were handed to the allocator on creation.
    pub fn managed_pages(&self) -> usize {
        self.managed
    }

    /// Returns whether `pgd` is the head of a free block.
    ///
    /// Pages outside the descriptor table are never free.
    pub fn is_free(&self, pgd: PageIndex) -> bool {
        self.has_flags(pgd, PageFlags::FREE)
    }

    /// Returns whether `pgd` was reserved.
    pub fn is_reserved(&self, pgd: PageIndex) -> bool {
        self.has_flags(pgd, PageFlags::RESERVED)
    }

    fn has_flags(&self, pgd: PageIndex, flags: PageFlags) -> bool {
        self.pages
            .get(pgd)
            .map_or(false, |page| page.flags.contains(flags))
    }

    /// Return a value that displays the free lists of all orders.
    pub fn state(&self) -> State<'_, 'pages, M> {
        State(self)
    }
}

impl<M: FrameMap> PageAllocator for BuddyAllocator<'_, M> {
    fn name(&self) -> &'static str {
        "buddy"
    }

    fn alloc_pages(&mut self, order: usize) -> Result<PageIndex> {
        BuddyAllocator::alloc_pages(self, order)
    }

    fn free_pages(&mut self, pgd: PageIndex, order: usize) {
        BuddyAllocator::free_pages(self, pgd, order)
    }

    fn reserve_page(&mut self, pgd: PageIndex) -> bool {
        BuddyAllocator::reserve_page(self, pgd)
    }

    fn dump_state(&self) {
        debug!("BUDDY STATE:");
        for order in 0..MAX_ORDER {
            debug!("{}", OrderState { alloc: self, order });
        }

        let free = self.free_pages_count();
        debug!(
            "free: {} in {} pages",
            unit::bytes(free * PAGE_SIZE),
            free
        );
    }
}

/// Displays the free list of a single order as `[order] pfn pfn ...`.
struct OrderState<'a, 'pages, M> {
    alloc: &'a BuddyAllocator<'pages, M>,
    order: usize,
}

impl<M: FrameMap> fmt::Display for OrderState<'_, '_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.order)?;
        self.alloc
            .free_blocks(self.order)
            .try_for_each(|pgd| write!(f, " {:x}", self.alloc.pfn(pgd)))
    }
}

/// Displays the free lists of every order, one line per order.
pub struct State<'a, 'pages, M>(&'a BuddyAllocator<'pages, M>);

impl<M: FrameMap> fmt::Display for State<'_, '_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (0..MAX_ORDER).try_for_each(|order| {
            writeln!(
                f,
                "{}",
                OrderState {
                    alloc: self.0,
                    order
                }
            )
        })
    }
}
