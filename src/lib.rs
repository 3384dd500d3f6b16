//! Buddy allocator for physical memory pages.
//!
//! The allocator manages a table of [page descriptors](page::PageDescriptor)
//! that is handed over by the memory subsystem, and hands out blocks of
//! `2^order` contiguous pages.
#![deny(rust_2018_idioms, rustdoc::broken_intra_doc_links)]
#![cfg_attr(not(test), no_std)]

pub mod alloc;
pub mod logger;
pub mod page;
pub mod unit;

pub use self::alloc::{
    buddy::{BuddyAllocator, MAX_ORDER},
    Error, LockedAllocator, PageAllocator, Result, PAGE_SIZE,
};
pub use page::{FrameMap, LinearMap, PageDescriptor, PageFlags, PageIndex, Pfn};
