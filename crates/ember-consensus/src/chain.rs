//! In-memory chain index.
//!
//! Reorganisation policy lives outside this core, so the active chain is a
//! simple height-indexed arena; the back-link of entry `h` is entry `h-1`.

use crate::error::{ConsensusError, ConsensusResult};
use ember_primitives::Hash256;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One block record in the index.
#[derive(Clone, Copy, Debug)]
pub struct BlockIndexEntry {
    pub height: i64,
    pub time: i64,
    pub bits: u32,
    pub hash: Hash256,
}

/// The active chain, genesis first.
#[derive(Default, Debug)]
pub struct ChainIndex {
    entries: Vec<BlockIndexEntry>,
}

impl ChainIndex {
    pub fn new() -> Self {
        ChainIndex {
            entries: Vec::new(),
        }
    }

    pub fn height(&self) -> i64 {
        self.entries.len() as i64 - 1
    }

    pub fn tip(&self) -> Option<&BlockIndexEntry> {
        self.entries.last()
    }

    pub fn at(&self, height: i64) -> Option<&BlockIndexEntry> {
        if height < 0 {
            return None;
        }
        self.entries.get(height as usize)
    }

    /// Append a new tip. The entry's height must follow the current tip.
    pub fn push(&mut self, entry: BlockIndexEntry) -> ConsensusResult<()> {
        let expected = self.height() + 1;
        if entry.height != expected {
            return Err(ConsensusError::InvalidHeader(format!(
                "non-sequential height {} (expected {})",
                entry.height, expected
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Median of the timestamps of the last 11 blocks ending at `height`.
    pub fn median_time_past(&self, height: i64) -> i64 {
        if height < 0 {
            return 0;
        }
        let end = (height as usize + 1).min(self.entries.len());
        let start = end.saturating_sub(11);
        let mut times: Vec<i64> = self.entries[start..end].iter().map(|e| e.time).collect();
        if times.is_empty() {
            return 0;
        }
        times.sort_unstable();
        times[times.len() / 2]
    }
}

/// Shared ownership of the chain index behind the global chain-state lock.
///
/// Readers (template assembly, mining workers) take the read side; block
/// connection takes the write side.
#[derive(Default)]
pub struct ChainState {
    index: RwLock<ChainIndex>,
}

impl ChainState {
    pub fn new() -> Self {
        ChainState {
            index: RwLock::new(ChainIndex::new()),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ChainIndex> {
        self.index.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ChainIndex> {
        self.index.write()
    }

    /// Tip snapshot: (height, hash, median time past).
    pub fn tip_info(&self) -> Option<(i64, Hash256, i64)> {
        let chain = self.index.read();
        chain
            .tip()
            .map(|tip| (tip.height, tip.hash, chain.median_time_past(tip.height)))
    }
}
