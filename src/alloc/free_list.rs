//! Address-ordered intrusive free list.
//!
//! The links live inside the [`PageDescriptor`]s, the list itself only stores
//! the index of the first block. Blocks are always kept sorted by ascending
//! index, which means two buddies that are both free are always neighbours.

use crate::page::{PageDescriptor, PageFlags, PageIndex};

/// A location that holds a link to a free block.
///
/// This is either the head of the list, or the `next_free` link
/// of a page that is part of the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// The head of the list.
    Head,
    /// The `next_free` link of the given page.
    Next(PageIndex),
}

/// Singly linked list of free blocks that all have the same order.
#[derive(Debug, Clone, Copy)]
pub struct FreeList {
    head: Option<PageIndex>,
}

impl FreeList {
    /// An empty list.
    pub const EMPTY: Self = Self { head: None };

    /// Create a new, empty list.
    pub const fn new() -> Self {
        Self::EMPTY
    }

    /// Returns whether this list is empty.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Return the block with the lowest address inside this list.
    pub fn first(&self) -> Option<PageIndex> {
        self.head
    }

    /// Read the link stored in `slot`.
    pub fn get(&self, pages: &[PageDescriptor], slot: Slot) -> Option<PageIndex> {
        match slot {
            Slot::Head => self.head,
            Slot::Next(pgd) => pages[pgd].next_free,
        }
    }

    fn set(&mut self, pages: &mut [PageDescriptor], slot: Slot, link: Option<PageIndex>) {
        match slot {
            Slot::Head => self.head = link,
            Slot::Next(pgd) => pages[pgd].next_free = link,
        }
    }

    /// Insert `pgd` at its sorted position and return the slot that now links to it.
    pub fn insert(&mut self, pages: &mut [PageDescriptor], pgd: PageIndex) -> Slot {
        self.insert_at(pages, Slot::Head, pgd)
    }

    /// Same as [`insert`](Self::insert), but starts searching at `start`.
    ///
    /// `start` must be part of this list and every block before it
    /// must have a lower address than `pgd`.
    pub fn insert_at(&mut self, pages: &mut [PageDescriptor], start: Slot, pgd: PageIndex) -> Slot {
        let mut slot = start;
        while let Some(cur) = self.get(pages, slot) {
            if pgd > cur {
                slot = Slot::Next(cur);
            } else {
                break;
            }
        }

        pages[pgd].next_free = self.get(pages, slot);
        pages[pgd].flags.insert(PageFlags::FREE);
        self.set(pages, slot, Some(pgd));
        slot
    }

    /// Unlink `pgd` from this list.
    ///
    /// Returns `false` if `pgd` was not part of the list.
    pub fn remove(&mut self, pages: &mut [PageDescriptor], pgd: PageIndex) -> bool {
        let mut slot = Slot::Head;
        loop {
            match self.get(pages, slot) {
                Some(cur) if cur == pgd => break,
                Some(cur) => slot = Slot::Next(cur),
                None => return false,
            }
        }

        let next = pages[pgd].next_free.take();
        pages[pgd].flags.remove(PageFlags::FREE);
        self.set(pages, slot, next);
        true
    }

    /// Returns whether `pgd` is part of this list.
    pub fn contains(&self, pages: &[PageDescriptor], pgd: PageIndex) -> bool {
        self.iter(pages).any(|block| block == pgd)
    }

    /// Return an iterator over all blocks in this list, in ascending order.
    pub fn iter<'pages>(&self, pages: &'pages [PageDescriptor]) -> Iter<'pages> {
        Iter {
            pages,
            next: self.head,
        }
    }
}

impl Default for FreeList {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Iterator over all blocks of a single [`FreeList`].
pub struct Iter<'pages> {
    pages: &'pages [PageDescriptor],
    next: Option<PageIndex>,
}

impl Iterator for Iter<'_> {
    type Item = PageIndex;

    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.next?;
        self.next = self.pages[cur].next_free;
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(list: &FreeList, pages: &[PageDescriptor]) -> Vec<PageIndex> {
        list.iter(pages).collect()
    }

    #[test]
    fn insert_keeps_ascending_order() {
        let mut pages = [PageDescriptor::new(); 16];
        let mut list = FreeList::new();

        for pgd in [8, 2, 12, 0, 4] {
            list.insert(&mut pages, pgd);
        }

        assert_eq!(collect(&list, &pages), [0, 2, 4, 8, 12]);
        assert_eq!(list.first(), Some(0));
        assert!(pages[4].flags().contains(PageFlags::FREE));
        assert!(!pages[5].flags().contains(PageFlags::FREE));
    }

    #[test]
    fn insert_returns_slot_holding_block() {
        let mut pages = [PageDescriptor::new(); 16];
        let mut list = FreeList::new();

        assert_eq!(list.insert(&mut pages, 4), Slot::Head);
        assert_eq!(list.insert(&mut pages, 10), Slot::Next(4));

        let slot = list.insert(&mut pages, 6);
        assert_eq!(slot, Slot::Next(4));
        assert_eq!(list.get(&pages, slot), Some(6));
    }

    #[test]
    fn insert_at_continues_from_slot() {
        let mut pages = [PageDescriptor::new(); 16];
        let mut list = FreeList::new();

        list.insert(&mut pages, 0);
        list.insert(&mut pages, 12);
        list.insert(&mut pages, 4);

        // the right half always follows the left one
        let slot = list.insert_at(&mut pages, Slot::Next(4), 6);
        assert_eq!(slot, Slot::Next(4));
        assert_eq!(collect(&list, &pages), [0, 4, 6, 12]);
    }

    #[test]
    fn remove_unlinks_block() {
        let mut pages = [PageDescriptor::new(); 16];
        let mut list = FreeList::new();

        for pgd in [0, 4, 8] {
            list.insert(&mut pages, pgd);
        }

        assert!(list.remove(&mut pages, 4));
        assert_eq!(collect(&list, &pages), [0, 8]);
        assert_eq!(pages[4].next_free, None);
        assert!(!pages[4].flags().contains(PageFlags::FREE));

        assert!(list.remove(&mut pages, 0));
        assert!(list.remove(&mut pages, 8));
        assert!(list.is_empty());
    }

    #[test]
    fn remove_missing_block() {
        let mut pages = [PageDescriptor::new(); 16];
        let mut list = FreeList::new();

        assert!(!list.remove(&mut pages, 3));

        list.insert(&mut pages, 2);
        assert!(!list.remove(&mut pages, 3));
        assert!(list.contains(&pages, 2));
        assert!(!list.contains(&pages, 3));
    }
}
