//! Map entry arena and ordered list.
//!
//! Entries live in a fixed-capacity arena and link to each other through
//! indices; a free list recycles dead slots. The live list is ordered by
//! `start_page` with non-overlapping inclusive ranges — the mapping
//! operations maintain that invariant.

use std::rc::Rc;

use host_core::MapFile;

/// Hard limit on simultaneously mapped areas.
pub const MAX_MAP_COUNT: usize = 65535;

/// One mapped area: an inclusive page range with uniform provenance.
#[derive(Clone)]
pub struct MapEntry {
    pub start_page: u32,
    pub end_page: u32,
    /// Backing file; holding it keeps one reference alive.
    pub file: Option<Rc<dyn MapFile>>,
    /// Page offset into the file of `start_page`.
    pub offset_pages: u32,
    pub next: Option<u32>,
}

/// Arena of map entries plus the ordered live list head.
#[derive(Clone)]
pub struct MapArena {
    entries: Vec<MapEntry>,
    free: Option<u32>,
    pub head: Option<u32>,
}

impl MapArena {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: None,
            head: None,
        }
    }

    /// Allocate a blank entry, reusing a freed slot if one exists.
    /// `None` when the arena is at capacity.
    pub fn alloc(&mut self) -> Option<u32> {
        if let Some(idx) = self.free {
            self.free = self.entries[idx as usize].next;
            let e = &mut self.entries[idx as usize];
            e.start_page = 0;
            e.end_page = 0;
            e.file = None;
            e.offset_pages = 0;
            e.next = None;
            return Some(idx);
        }
        if self.entries.len() >= MAX_MAP_COUNT {
            return None;
        }
        self.entries.push(MapEntry {
            start_page: 0,
            end_page: 0,
            file: None,
            offset_pages: 0,
            next: None,
        });
        Some(self.entries.len() as u32 - 1)
    }

    /// Return an entry to the free list, dropping its file reference.
    pub fn free(&mut self, idx: u32) {
        let e = &mut self.entries[idx as usize];
        e.file = None;
        e.next = self.free;
        self.free = Some(idx);
    }

    #[must_use]
    pub fn get(&self, idx: u32) -> &MapEntry {
        &self.entries[idx as usize]
    }

    pub fn get_mut(&mut self, idx: u32) -> &mut MapEntry {
        &mut self.entries[idx as usize]
    }
}

impl Default for MapArena {
    fn default() -> Self {
        Self::new()
    }
}
