//! Bounded cache of decoded record blocks.
//!
//! Every block index owns a slot behind its own mutex. The first caller for a
//! block decodes it while holding only that slot's lock, so concurrent callers
//! for the same block wait and reuse the result while callers for other blocks
//! proceed. Decoded blocks are shared as `Arc` buffers; eviction only drops the
//! cache's reference, so slices handed out earlier stay valid.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::trace;

use super::types::error::{MdictError, Result};

/// A decoded, read-only block buffer.
pub type SharedBlock = Arc<Vec<u8>>;

#[derive(Debug)]
pub struct BlockCache {
    slots: Vec<Mutex<Option<SharedBlock>>>,
    /// Resident block indexes, oldest first.
    resident: Mutex<VecDeque<usize>>,
    capacity: usize,
}

impl BlockCache {
    /// Creates a cache for `num_blocks` blocks holding at most `capacity` of them.
    pub fn new(num_blocks: usize, capacity: usize) -> Self {
        Self {
            slots: (0..num_blocks).map(|_| Mutex::new(None)).collect(),
            resident: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of blocks currently held.
    pub fn resident_len(&self) -> usize {
        self.resident.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Returns the cached block at `index`, running `decode` if it is not resident.
    ///
    /// A failed decode leaves the slot empty, so a later call retries.
    pub fn get_or_decode<F>(&self, index: usize, decode: F) -> Result<SharedBlock>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        let slot = self.slots.get(index).ok_or_else(|| {
            MdictError::InvalidFormat(format!("Block index {} out of range ({} blocks)", index, self.slots.len()))
        })?;

        let block = {
            let mut guard = slot.lock().map_err(|_| MdictError::LockPoisoned)?;
            if let Some(block) = guard.as_ref() {
                trace!("Block cache hit: {}", index);
                return Ok(Arc::clone(block));
            }
            trace!("Block cache miss: {}", index);
            let block = Arc::new(decode()?);
            *guard = Some(Arc::clone(&block));
            block
        };

        self.admit(index)?;
        Ok(block)
    }

    /// Records `index` as resident and evicts the oldest blocks beyond capacity.
    ///
    /// Holds at most one lock at a time.
    fn admit(&self, index: usize) -> Result<()> {
        let evicted: Vec<usize> = {
            let mut resident = self.resident.lock().map_err(|_| MdictError::LockPoisoned)?;
            resident.push_back(index);
            let excess = resident.len().saturating_sub(self.capacity);
            resident.drain(..excess).collect()
        };

        for old in evicted {
            trace!("Evicting block {}", old);
            if let Some(slot) = self.slots.get(old) {
                *slot.lock().map_err(|_| MdictError::LockPoisoned)? = None;
            }
        }
        Ok(())
    }
}
