//! Page Allocation APIs.

pub mod buddy;
pub use buddy::BuddyAllocator;

mod free_list;
pub use free_list::{FreeList, Iter, Slot};

use crate::{page::PageIndex, unit::KIB};
use displaydoc_lite::displaydoc;
use lock_api::{Mutex, MutexGuard, RawMutex};

/// The size of a single page in memory.
///
/// This is also the size of an order-0 block.
pub const PAGE_SIZE: usize = 4 * KIB;

/// Result for every page allocation operation.
pub type Result<T, E = Error> = core::result::Result<T, E>;

displaydoc! {
    /// Any error that can happen while setting up an allocator or allocating pages.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Error {
        /// the first page descriptor is not aligned to the largest order.
        MisalignedRegion,
        /// tried to allocate an order that exceeded the maximum order.
        OrderTooLarge,
        /// tried to allocate, but there was no free memory left.
        NoMemoryAvailable,
    }
}

/// The interface every page allocation algorithm provides to the kernel.
pub trait PageAllocator {
    /// The name that is used to select this algorithm.
    fn name(&self) -> &'static str;

    /// Allocate `2^order` contiguous pages and return the first page of the block.
    fn alloc_pages(&mut self, order: usize) -> Result<PageIndex>;

    /// Give a block back that was returned by [`alloc_pages`](Self::alloc_pages)
    /// with the same `order`.
    fn free_pages(&mut self, pgd: PageIndex, order: usize);

    /// Take the given page out of the allocator, so it will never be handed out.
    ///
    /// Returns `false` if the page is currently not free.
    fn reserve_page(&mut self, pgd: PageIndex) -> bool;

    /// Write the current state of this allocator to the log.
    fn dump_state(&self);
}

/// A [`PageAllocator`] that can be shared between multiple harts.
///
/// The raw lock can be replaced, e.g. with a lock that disables interrupts
/// while it is held. It defaults to a plain spinlock.
pub struct LockedAllocator<A, R: RawMutex = spin::Mutex<()>>(Mutex<R, A>);

impl<A: PageAllocator, R: RawMutex> LockedAllocator<A, R> {
    /// Wrap the given allocator.
    pub fn new(alloc: A) -> Self {
        Self(Mutex::new(alloc))
    }

    /// Lock the allocator for a sequence of operations.
    pub fn lock(&self) -> MutexGuard<'_, R, A> {
        self.0.lock()
    }

    /// Return the name of the wrapped algorithm.
    pub fn name(&self) -> &'static str {
        self.0.lock().name()
    }

    /// Allocate `2^order` contiguous pages.
    pub fn alloc_pages(&self, order: usize) -> Result<PageIndex> {
        self.0.lock().alloc_pages(order)
    }

    /// Allocate a single page.
    pub fn alloc(&self) -> Result<PageIndex> {
        // order 0 is exactly one page
        self.alloc_pages(0)
    }

    /// Give a block back to the allocator.
    pub fn free_pages(&self, pgd: PageIndex, order: usize) {
        self.0.lock().free_pages(pgd, order)
    }

    /// Take the given page out of the allocator permanently.
    pub fn reserve_page(&self, pgd: PageIndex) -> bool {
        self.0.lock().reserve_page(pgd)
    }

    /// Write the state of the wrapped allocator to the log.
    pub fn dump_state(&self) {
        self.0.lock().dump_state()
    }

    /// Return the wrapped allocator.
    pub fn into_inner(self) -> A {
        self.0.into_inner()
    }
}
