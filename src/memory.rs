//! First-fit contiguous memory manager.
//!
//! Models a linear address space of `max_memory` bytes as an ordered
//! list of non-overlapping blocks that always tiles `[0, max_memory)`.
//! Each admitted process owns exactly one block of `mem_per_proc` bytes;
//! adjacent free blocks are merged eagerly so the free list never holds
//! two neighbors. A failed allocation is an expected outcome (the caller
//! parks the process on the memory-pending queue), not an error.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use tracing::debug;

use crate::types::Pid;

/// One block of the address space. `owner == None` marks a free block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBlock {
    pub start: u64,
    pub end: u64,
    pub owner: Option<Pid>,
}

impl MemoryBlock {
    pub fn size(&self) -> u64 {
        self.end - self.start
    }
}

/// Thread-safe first-fit allocator over a contiguous address space.
pub struct MemoryManager {
    blocks: Mutex<Vec<MemoryBlock>>,
    max_memory: u64,
    mem_per_proc: u64,
}

impl MemoryManager {
    pub fn new(max_memory: u64, mem_per_proc: u64) -> Self {
        MemoryManager {
            blocks: Mutex::new(vec![MemoryBlock {
                start: 0,
                end: max_memory,
                owner: None,
            }]),
            max_memory,
            mem_per_proc,
        }
    }

    pub fn max_memory(&self) -> u64 {
        self.max_memory
    }

    pub fn mem_per_proc(&self) -> u64 {
        self.mem_per_proc
    }

    /// Carve `mem_per_proc` bytes for `pid` out of the first free block
    /// large enough, in address order. Returns false when no block fits.
    pub fn allocate(&self, pid: Pid) -> bool {
        let mut blocks = self.blocks.lock().unwrap();
        for i in 0..blocks.len() {
            if blocks[i].owner.is_some() || blocks[i].size() < self.mem_per_proc {
                continue;
            }
            let start = blocks[i].start;
            let end = start + self.mem_per_proc;
            let proc_block = MemoryBlock {
                start,
                end,
                owner: Some(pid),
            };
            if blocks[i].size() == self.mem_per_proc {
                blocks[i] = proc_block;
            } else {
                blocks[i].start = end;
                blocks.insert(i, proc_block);
            }
            debug!(%pid, start, end, "memory allocated");
            return true;
        }
        debug!(%pid, "memory allocation deferred");
        false
    }

    /// Free every block owned by `pid`, then merge adjacent free blocks.
    /// Idempotent when `pid` owns nothing.
    pub fn deallocate(&self, pid: Pid) {
        let mut blocks = self.blocks.lock().unwrap();
        let mut freed = false;
        for block in blocks.iter_mut() {
            if block.owner == Some(pid) {
                block.owner = None;
                freed = true;
            }
        }
        if freed {
            Self::merge_free(&mut blocks);
            debug!(%pid, "memory deallocated");
        }
    }

    fn merge_free(blocks: &mut Vec<MemoryBlock>) {
        let mut i = 0;
        while i + 1 < blocks.len() {
            if blocks[i].owner.is_none() && blocks[i + 1].owner.is_none() {
                blocks[i].end = blocks[i + 1].end;
                blocks.remove(i + 1);
            } else {
                i += 1;
            }
        }
    }

    /// Snapshot of the block list, in address order.
    pub fn blocks(&self) -> Vec<MemoryBlock> {
        self.blocks.lock().unwrap().clone()
    }

    /// Number of blocks currently owned by processes.
    pub fn used_blocks(&self) -> usize {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.owner.is_some())
            .count()
    }

    /// Sum of free-block sizes too small to admit a process (bytes).
    pub fn external_fragmentation(&self) -> u64 {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.owner.is_none() && b.size() < self.mem_per_proc)
            .map(|b| b.size())
            .sum()
    }

    /// Write `memory_stamp_<index:02>.txt` under `dir`: a timestamp, the
    /// process count, external fragmentation in KB, and the occupied
    /// blocks listed top-down as `end / P<pid> / start`.
    pub fn dump_snapshot(&self, index: u64, dir: &Path) -> io::Result<PathBuf> {
        let blocks = self.blocks.lock().unwrap();
        let path = dir.join(format!("memory_stamp_{index:02}.txt"));
        let mut out = File::create(&path)?;

        let now = Local::now();
        writeln!(out, "Timestamp: ({})", now.format("%m/%d/%Y %I:%M:%S%p"))?;

        let proc_count = blocks.iter().filter(|b| b.owner.is_some()).count();
        writeln!(out, "Number of processes in memory: {proc_count}")?;

        let frag: u64 = blocks
            .iter()
            .filter(|b| b.owner.is_none() && b.size() < self.mem_per_proc)
            .map(|b| b.size())
            .sum();
        writeln!(out, "Total external fragmentation in KB: {}", frag / 1024)?;
        writeln!(out)?;

        writeln!(out, "----end---- = {}", self.max_memory)?;
        writeln!(out)?;
        for block in blocks.iter().rev() {
            if let Some(pid) = block.owner {
                writeln!(out, "{}", block.end)?;
                writeln!(out, "P{pid}")?;
                writeln!(out, "{}", block.start)?;
                writeln!(out)?;
            }
        }
        writeln!(out, "----start---- = 0")?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The block list must tile [0, max_memory) with no gaps or overlaps
    /// and no two adjacent free blocks.
    fn assert_tiling(mgr: &MemoryManager) {
        let blocks = mgr.blocks();
        assert!(!blocks.is_empty());
        assert_eq!(blocks.first().unwrap().start, 0);
        assert_eq!(blocks.last().unwrap().end, mgr.max_memory());
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].end, pair[1].start, "gap or overlap: {pair:?}");
            assert!(
                pair[0].owner.is_some() || pair[1].owner.is_some(),
                "adjacent free blocks: {pair:?}"
            );
        }
    }

    #[test]
    fn first_fit_in_address_order() {
        let mgr = MemoryManager::new(300, 100);
        assert!(mgr.allocate(Pid(1)));
        assert!(mgr.allocate(Pid(2)));
        assert!(mgr.allocate(Pid(3)));
        assert!(!mgr.allocate(Pid(4)), "space is exhausted");
        assert_tiling(&mgr);

        // Freeing the middle block makes its address range the first fit.
        mgr.deallocate(Pid(2));
        assert!(mgr.allocate(Pid(4)));
        let blocks = mgr.blocks();
        let p4 = blocks.iter().find(|b| b.owner == Some(Pid(4))).unwrap();
        assert_eq!(p4.start, 100);
        assert_tiling(&mgr);
    }

    #[test]
    fn deallocate_coalesces_neighbors() {
        let mgr = MemoryManager::new(300, 100);
        mgr.allocate(Pid(1));
        mgr.allocate(Pid(2));
        mgr.allocate(Pid(3));
        mgr.deallocate(Pid(1));
        mgr.deallocate(Pid(3));
        mgr.deallocate(Pid(2));
        let blocks = mgr.blocks();
        assert_eq!(blocks.len(), 1, "free space did not coalesce: {blocks:?}");
        assert_eq!(blocks[0].owner, None);
        assert_tiling(&mgr);
    }

    #[test]
    fn deallocate_is_idempotent() {
        let mgr = MemoryManager::new(300, 100);
        mgr.allocate(Pid(1));
        mgr.deallocate(Pid(1));
        let after_first = mgr.blocks();
        mgr.deallocate(Pid(1));
        assert_eq!(mgr.blocks(), after_first);
    }

    #[test]
    fn allocate_then_deallocate_restores_state() {
        let mgr = MemoryManager::new(1024, 256);
        let before = mgr.blocks();
        mgr.allocate(Pid(7));
        mgr.deallocate(Pid(7));
        assert_eq!(mgr.blocks(), before);
    }

    #[test]
    fn fragmentation_counts_small_free_blocks_only() {
        // 250 bytes, 100 per process: after two allocations the 50-byte
        // tail is unusable.
        let mgr = MemoryManager::new(250, 100);
        mgr.allocate(Pid(1));
        mgr.allocate(Pid(2));
        assert_eq!(mgr.external_fragmentation(), 50);
        mgr.deallocate(Pid(1));
        // The freed 100-byte block can fit a process; still only the tail
        // counts as fragmentation.
        assert_eq!(mgr.external_fragmentation(), 50);
    }

    #[test]
    fn snapshot_lists_blocks_top_down() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = MemoryManager::new(300, 100);
        mgr.allocate(Pid(1));
        mgr.allocate(Pid(2));
        let path = mgr.dump_snapshot(3, dir.path()).unwrap();
        assert!(path.ends_with("memory_stamp_03.txt"));
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Number of processes in memory: 2"));
        assert!(text.contains("----end---- = 300"));
        assert!(text.contains("----start---- = 0"));
        // P2 (higher addresses) is listed before P1.
        let p2_at = text.find("P2").unwrap();
        let p1_at = text.find("P1").unwrap();
        assert!(p2_at < p1_at, "blocks are not listed top-down");
    }
}
