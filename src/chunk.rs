//! Offset/limit reads over a snapshot buffer.

use crate::error::SnapshotError;
use crate::state::SnapshotState;
use crate::types::{Chunk, SnapshotStatus};

/// Continuation cursor after returning `returned` items starting at `offset`
/// from a buffer of `len` items.
///
/// A cursor is handed out while items remain past the slice, or while the
/// snapshot may still grow.
pub fn next_offset(offset: usize, returned: usize, len: usize, status: SnapshotStatus) -> Option<usize> {
    let end = offset.saturating_add(returned);
    if end < len || status.is_active() {
        Some(end)
    } else {
        None
    }
}

/// Returns `buffer[offset..offset + limit]`, clamped to the buffer length.
///
/// Status, length and items are read under a single lock acquisition, so
/// the cursor always agrees with the slice.
pub(crate) fn read_chunk(
    state: &SnapshotState,
    offset: usize,
    limit: usize,
) -> Result<Chunk, SnapshotError> {
    if limit == 0 {
        return Err(SnapshotError::InvalidLimit(limit));
    }

    let progress = state.read();
    let len = progress.items.len();
    let start = offset.min(len);
    let end = offset.saturating_add(limit).min(len);
    let items = progress.items[start..end].to_vec();

    Ok(Chunk {
        next_offset: next_offset(offset, items.len(), len, progress.status),
        items,
        status: progress.status,
        fetched_count: len,
    })
}
