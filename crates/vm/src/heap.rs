//! The heap's bump-and-coalesce, first-fit page allocator.
//!
//! Chunks form a doubly-linked list ordered by address. The list is kept in
//! a `Vec` arena addressed by index (per the arena-of-indices pattern used
//! throughout this toolchain) rather than as boxed, pointer-linked nodes —
//! `next`/`prev` become `Option<usize>` fields instead of raw pointers.
//! `free` leaves a tombstone slot that a later `malloc` of an equal or
//! smaller chunk may reuse, the same way the source's free-list-less
//! allocator reuses the *address gap* a free leaves behind (not the node
//! allocation itself — the arena slot reuse here is purely a Rust-side
//! bookkeeping detail and has no guest-visible effect).

use spyre_core::memory::{SIZE_MEMORY, SIZE_PAGE, START_HEAP};
use spyre_core::VirtualAddress;

use crate::error::VmError;

#[derive(Debug, Clone)]
struct Chunk {
    pages: usize,
    vm_address: VirtualAddress,
    next: Option<usize>,
    prev: Option<usize>,
}

/// The live set of heap allocations, first-fit over address order.
#[derive(Default)]
pub struct Heap {
    chunks: Vec<Option<Chunk>>,
    head: Option<usize>,
}

impl Heap {
    pub fn new() -> Self {
        Heap { chunks: Vec::new(), head: None }
    }

    fn pages_for(size: u64) -> usize {
        let size = size as usize;
        if size == 0 {
            1
        } else {
            size.div_ceil(SIZE_PAGE)
        }
    }

    fn insert(&mut self, chunk: Chunk) -> usize {
        if let Some(slot) = self.chunks.iter().position(|c| c.is_none()) {
            self.chunks[slot] = Some(chunk);
            slot
        } else {
            self.chunks.push(Some(chunk));
            self.chunks.len() - 1
        }
    }

    fn get(&self, index: usize) -> &Chunk {
        self.chunks[index].as_ref().expect("dangling heap chunk index")
    }

    fn get_mut(&mut self, index: usize) -> &mut Chunk {
        self.chunks[index].as_mut().expect("dangling heap chunk index")
    }

    /// Allocate `size` bytes, rounded up to whole pages. Returns
    /// [`VirtualAddress::NULL`] if the heap region is exhausted.
    pub fn malloc(&mut self, size: u64) -> VirtualAddress {
        let pages = Self::pages_for(size);

        let Some(head_idx) = self.head else {
            let addr = VirtualAddress(START_HEAP as u64);
            if !Self::fits(addr, pages) {
                return VirtualAddress::NULL;
            }
            let idx = self.insert(Chunk { pages, vm_address: addr, next: None, prev: None });
            self.head = Some(idx);
            return addr;
        };

        // The gap between the heap's start and the first live chunk is a
        // free span too, not just the gaps between chunks further along.
        let head_addr = self.get(head_idx).vm_address.0;
        let front_gap_pages = (head_addr - START_HEAP as u64) as usize / SIZE_PAGE;
        if front_gap_pages >= pages {
            let addr = VirtualAddress(START_HEAP as u64);
            let new_idx = self.insert(Chunk { pages, vm_address: addr, next: Some(head_idx), prev: None });
            self.get_mut(head_idx).prev = Some(new_idx);
            self.head = Some(new_idx);
            return addr;
        }

        let mut at = head_idx;
        loop {
            let at_chunk = self.get(at).clone();
            let gap_start = at_chunk.vm_address.0 + (at_chunk.pages * SIZE_PAGE) as u64;
            match at_chunk.next {
                Some(next_idx) => {
                    let next_addr = self.get(next_idx).vm_address.0;
                    let gap_pages = (next_addr - gap_start) as usize / SIZE_PAGE;
                    if gap_pages >= pages {
                        let addr = VirtualAddress(gap_start);
                        let new_idx = self.insert(Chunk {
                            pages,
                            vm_address: addr,
                            next: Some(next_idx),
                            prev: Some(at),
                        });
                        self.get_mut(at).next = Some(new_idx);
                        self.get_mut(next_idx).prev = Some(new_idx);
                        return addr;
                    }
                    at = next_idx;
                }
                None => {
                    let addr = VirtualAddress(gap_start);
                    if !Self::fits(addr, pages) {
                        return VirtualAddress::NULL;
                    }
                    let new_idx = self.insert(Chunk { pages, vm_address: addr, next: None, prev: Some(at) });
                    self.get_mut(at).next = Some(new_idx);
                    return addr;
                }
            }
        }
    }

    fn fits(addr: VirtualAddress, pages: usize) -> bool {
        addr.0 as usize + pages * SIZE_PAGE <= SIZE_MEMORY
    }

    /// Unlink the chunk whose virtual address matches `addr`.
    pub fn free(&mut self, addr: VirtualAddress) -> Result<(), VmError> {
        let Some(idx) = self
            .chunks
            .iter()
            .enumerate()
            .find(|(_, c)| c.as_ref().is_some_and(|c| c.vm_address == addr))
            .map(|(i, _)| i)
        else {
            return Err(VmError::FreeInvalidPointer(addr.0));
        };

        let (prev, next) = {
            let chunk = self.get(idx);
            (chunk.prev, chunk.next)
        };
        match prev {
            Some(p) => self.get_mut(p).next = next,
            None => self.head = next,
        }
        if let Some(n) = next {
            self.get_mut(n).prev = prev;
        }
        self.chunks[idx] = None;
        Ok(())
    }

    /// Whether a chunk with this virtual address is currently live.
    pub fn contains(&self, addr: VirtualAddress) -> bool {
        self.chunks.iter().flatten().any(|c| c.vm_address == addr)
    }

    /// Number of currently live chunks (for diagnostics and tests).
    pub fn live_count(&self) -> usize {
        self.chunks.iter().flatten().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_allocation_lands_at_heap_start() {
        let mut heap = Heap::new();
        let addr = heap.malloc(16);
        assert_eq!(addr, VirtualAddress(START_HEAP as u64));
    }

    #[test]
    fn zero_size_rounds_up_to_one_page() {
        let mut heap = Heap::new();
        let a = heap.malloc(0);
        let b = heap.malloc(8);
        assert_eq!(b.0 - a.0, SIZE_PAGE as u64);
    }

    #[test]
    fn free_then_realloc_reuses_the_gap() {
        let mut heap = Heap::new();
        let a = heap.malloc(16);
        let b = heap.malloc(16);
        heap.free(a).unwrap();
        assert!(!heap.contains(a));
        let c = heap.malloc(16);
        assert_eq!(c, a);
        assert_ne!(c, b);
    }

    #[test]
    fn free_of_unknown_pointer_errors() {
        let mut heap = Heap::new();
        let err = heap.free(VirtualAddress(0xDEAD)).unwrap_err();
        assert!(matches!(err, VmError::FreeInvalidPointer(0xDEAD)));
    }

    #[test]
    fn allocations_after_free_of_head_keep_list_consistent() {
        let mut heap = Heap::new();
        let a = heap.malloc(8);
        let b = heap.malloc(8);
        let c = heap.malloc(8);
        heap.free(a).unwrap();
        assert_eq!(heap.live_count(), 2);
        heap.free(b).unwrap();
        heap.free(c).unwrap();
        assert_eq!(heap.live_count(), 0);
    }
}
