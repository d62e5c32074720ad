//! ✂️ The Chunker. Takes a long line of pages and cuts it into request-sized bites.
//!
//! Pure, boring, and load-bearing. The capacity is a `NonZeroUsize` because a
//! chunk size of zero is not a configuration, it's a cry for help.

use std::num::NonZeroUsize;

use crate::common::{Chunk, InputItem};

/// 🔪 Split `items` into contiguous chunks of exactly `capacity`, with the
/// leftovers in the last one. Empty in, empty out. Order is sacred.
pub fn chunk(items: Vec<InputItem>, capacity: NonZeroUsize) -> Vec<Chunk> {
    let capacity = capacity.get();
    // -- 📏 we know exactly how many chunks are coming, so allocate once and be done with it
    let mut chunks = Vec::with_capacity(items.len().div_ceil(capacity));
    let mut items = items.into_iter().peekable();
    // -- 👀 peek, don't pull: an empty take() would mint an empty chunk, and empty chunks are forbidden
    while items.peek().is_some() {
        // -- ✂️ by_ref so take() borrows the iterator instead of eating it whole
        let group: Vec<InputItem> = items.by_ref().take(capacity).collect();
        // -- 🔢 the index is just "how many came before me". Humble. Honest.
        chunks.push(Chunk::new(chunks.len(), group));
    }
    chunks
}
