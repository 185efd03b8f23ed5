//! Availability and relocation for flat (single-mapped) storage.
//!
//! Single-mapped storage cannot wrap a write or a read across the end of the
//! region. Three mechanisms keep data flowing:
//!
//! - **History relocation** (inside `space_available`): when the writer
//!   reaches the end while readers need look-back, the last items are copied
//!   to the front so history stays contiguous with new data.
//! - **Input blocked callback**: a reader stalled near the end with too few
//!   contiguous items gets the unread tail moved to the front.
//! - **Output blocked callback**: unread data is compacted to the front so
//!   the writer gets a contiguous run of at least its output multiple.
//!
//! All relocation happens in the region readers observe, with that region's
//! copy and move primitives.

use super::index::index_sub;
use super::{Buffer, BufferState, MappingType, ReaderCursor, ReaderId, TailWindow};
use crate::error::Result;
use crate::observability::{RelocationKind, record_relocation};
use smallvec::SmallVec;

impl Buffer {
    pub(super) fn double_mapped_space(&self, state: &BufferState) -> usize {
        let max_available = state
            .readers
            .iter()
            .map(|r| index_sub(state.write_index, r.read_index, self.capacity))
            .max()
            .unwrap_or_default();
        self.capacity - max_available - 1
    }

    pub(super) fn single_mapped_space(&self, state: &mut BufferState) -> Result<usize> {
        let write_index = state.write_index;
        let base = self.capacity - write_index;

        let needs_relocation = state.has_history
            && state.abs_write_offset > 0
            && state.tail.is_none()
            && (base < self.write_multiple || write_index == 0)
            && (write_index == 0 || !state.any_wrapped());

        if needs_relocation && !self.relocate_history(state)? {
            return Ok(0);
        }
        Ok(self.flat_space(state))
    }

    /// Contiguous room in front of the writer, bounded by every reader that
    /// is behind it in storage order.
    fn flat_space(&self, state: &BufferState) -> usize {
        let write_index = state.write_index;
        let mut space = self.capacity - write_index;
        for reader in &state.readers {
            if reader.read_index > write_index {
                space = space.min(reader.read_index - write_index);
            } else if reader.read_index == write_index && state.unread(reader) > 0 {
                return 0;
            }
        }
        space
    }

    /// End of the contiguous run a wrapped reader can read.
    #[inline]
    fn wrap_end(&self, state: &BufferState) -> usize {
        state.tail.map_or(self.capacity, |t| t.end)
    }

    pub(super) fn single_mapped_items_available(
        &self,
        state: &BufferState,
        reader: &ReaderCursor,
    ) -> usize {
        if state.unread(reader) == 0 {
            0
        } else if state.is_wrapped(reader) {
            self.wrap_end(state) - reader.read_index
        } else {
            state.write_index - reader.read_index
        }
    }

    /// Copy the newest `keep` items to the front of the region.
    ///
    /// Returns `Ok(false)` when some reader still needs the front of the
    /// region, in which case nothing changes and the writer must wait.
    fn relocate_history(&self, state: &mut BufferState) -> Result<bool> {
        let _enter = self.span.enter();
        let write_index = state.write_index;
        let end = if write_index == 0 {
            self.capacity
        } else {
            write_index
        };
        let keep = ((self.downstream_lcm - 1) + (state.max_reader_history - 1))
            .max(1)
            .min(end);
        if keep >= end {
            tracing::debug!(end, keep, "no room to relocate reader history");
            return Ok(false);
        }
        let start = end - keep;

        // A reader that has consumed everything up to the end continues at
        // the relocated write cursor.
        let positions: SmallVec<[usize; 8]> = state
            .readers
            .iter()
            .map(|r| {
                if r.read_index == write_index && state.unread(r) == 0 {
                    end
                } else {
                    r.read_index
                }
            })
            .collect();

        let floor = start.min(keep);
        let slowest = positions.iter().copied().min().unwrap_or(end);
        if slowest < floor {
            tracing::debug!(slowest, floor, "reader history relocation blocked by slow reader");
            return Ok(false);
        }

        let region = self.storage.read_region();
        let (src, len) = (start * self.item_size, keep * self.item_size);
        if start < keep {
            region.move_within(0, src, len)?;
        } else {
            region.copy_within(0, src, len)?;
        }

        for (reader, position) in state.readers.iter_mut().zip(positions) {
            if position >= start {
                reader.read_index = position - start;
            }
        }
        state.write_index = keep;
        state.tail = state
            .any_wrapped()
            .then_some(TailWindow { start, end });

        record_relocation(RelocationKind::History, keep);
        tracing::debug!(
            start,
            end,
            keep,
            lagging = state.tail.is_some(),
            "relocated reader history to front of buffer"
        );
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Blocked callbacks
    // ------------------------------------------------------------------------

    /// Whether a reader at `read_index` that needs `items_required` contiguous
    /// items can be helped by [`Buffer::input_blocked_callback`].
    pub fn input_blkd_cb_ready(&self, items_required: usize, read_index: usize) -> bool {
        if self.mapping != MappingType::SingleMapped {
            return false;
        }
        let state = self.lock();
        self.input_blkd_cb_ready_locked(&state, items_required, read_index)
    }

    fn input_blkd_cb_ready_locked(
        &self,
        state: &BufferState,
        items_required: usize,
        read_index: usize,
    ) -> bool {
        let wrap_end = self.wrap_end(state);
        read_index <= wrap_end
            && wrap_end - read_index < items_required
            && state.write_index < read_index
    }

    /// [`Buffer::input_blkd_cb_ready`] at the cursor of reader `id`, read
    /// under the same lock as the check.
    pub(super) fn reader_input_blkd_cb_ready(&self, id: ReaderId, items_required: usize) -> bool {
        if self.mapping != MappingType::SingleMapped {
            return false;
        }
        let state = self.lock();
        let Some(pos) = state.position(id) else {
            return false;
        };
        let read_index = state.readers[pos].read_index;
        self.input_blkd_cb_ready_locked(&state, items_required, read_index)
    }

    /// Bring the unread tail of the region to the front so a reader stalled
    /// at `read_index` (with `items_avail` contiguous items) can continue.
    ///
    /// Data in front of the writer is shifted up to make room, so every
    /// reader keeps seeing the same items. Returns `Ok(false)` if the tail
    /// does not fit in front of the slowest wrapped reader.
    ///
    /// # Errors
    ///
    /// Propagates copy failures, including [`crate::Error::Unsupported`]
    /// for device regions that cannot move overlapping data.
    pub fn input_blocked_callback(
        &self,
        items_required: usize,
        items_avail: usize,
        read_index: usize,
    ) -> Result<bool> {
        if self.mapping != MappingType::SingleMapped {
            return Ok(false);
        }
        let _enter = self.span.enter();
        let mut state = self.lock();
        self.input_blocked_locked(&mut state, items_required, items_avail, read_index)
    }

    /// [`Buffer::input_blocked_callback`] for reader `id`. The cursor and the
    /// contiguous item count are taken under the lock that performs the move.
    pub(super) fn reader_input_blocked_callback(
        &self,
        id: ReaderId,
        items_required: usize,
    ) -> Result<bool> {
        if self.mapping != MappingType::SingleMapped {
            return Ok(false);
        }
        let _enter = self.span.enter();
        let mut state = self.lock();
        let Some(pos) = state.position(id) else {
            return Ok(false);
        };
        let reader = &state.readers[pos];
        let read_index = reader.read_index;
        let items_avail = self.single_mapped_items_available(&state, reader);
        self.input_blocked_locked(&mut state, items_required, items_avail, read_index)
    }

    /// Caller holds the buffer lock (witnessed by `state`).
    fn input_blocked_locked(
        &self,
        state: &mut BufferState,
        items_required: usize,
        items_avail: usize,
        read_index: usize,
    ) -> Result<bool> {
        let write_index = state.write_index;

        let Some(min_wrapped) = state
            .readers
            .iter()
            .filter(|r| state.is_wrapped(r))
            .map(|r| r.read_index)
            .min()
        else {
            return Ok(false);
        };

        // With a tail window active the wrapped readers' data continues at
        // the front copy, so only `[min_wrapped, start)` is unique.
        let tail_end = match state.tail {
            Some(tail) => tail.start,
            None => read_index + items_avail,
        };
        if tail_end <= min_wrapped {
            return Ok(false);
        }
        let to_move = tail_end - min_wrapped;
        if to_move > min_wrapped - write_index {
            tracing::debug!(
                items_required,
                to_move,
                room = min_wrapped - write_index,
                "input blocked: tail does not fit in front of writer"
            );
            return Ok(false);
        }

        let isz = self.item_size;
        let region = self.storage.read_region();
        region.move_within(to_move * isz, 0, write_index * isz)?;
        region.copy_within(0, min_wrapped * isz, to_move * isz)?;

        let wrapped: SmallVec<[bool; 8]> =
            state.readers.iter().map(|r| state.is_wrapped(r)).collect();
        for (reader, wrapped) in state.readers.iter_mut().zip(wrapped) {
            if wrapped {
                reader.read_index -= min_wrapped;
            } else {
                reader.read_index += to_move;
            }
        }
        state.write_index = write_index + to_move;
        state.tail = None;

        record_relocation(RelocationKind::Input, to_move + write_index);
        tracing::debug!(
            items_required,
            to_move,
            write_index = state.write_index,
            "input blocked: moved unread tail to front"
        );
        Ok(true)
    }

    /// Whether the producer, needing runs of `output_multiple` items, is
    /// blocked and [`Buffer::output_blocked_callback`] may help.
    pub fn output_blkd_cb_ready(&self, output_multiple: usize) -> Result<bool> {
        if self.mapping != MappingType::SingleMapped {
            return Ok(false);
        }
        let space = self.space_available()?;
        Ok(space < output_multiple.max(1))
    }

    /// Compact unread data to the front of the region so the writer gets a
    /// longer contiguous run.
    ///
    /// Runs when the free run is in `(0, output_multiple)`, or always with
    /// `force`. Returns `Ok(false)` if a reader is wrapped or nothing can be
    /// reclaimed.
    ///
    /// # Errors
    ///
    /// Propagates copy failures, including [`crate::Error::Unsupported`]
    /// for device regions that cannot move overlapping data.
    pub fn output_blocked_callback(&self, output_multiple: usize, force: bool) -> Result<bool> {
        if self.mapping != MappingType::SingleMapped {
            return Ok(false);
        }
        let _enter = self.span.enter();
        let mut state = self.lock();
        if state.readers.is_empty() {
            return Ok(false);
        }

        let space = self.flat_space(&state);
        if !(force || (space > 0 && space < output_multiple)) {
            return Ok(false);
        }
        if state.any_wrapped() {
            tracing::debug!(space, "output blocked: a reader is wrapped, cannot compact");
            return Ok(false);
        }
        let min_read = state
            .readers
            .iter()
            .map(|r| r.read_index)
            .min()
            .unwrap_or_default();
        if min_read == 0 {
            return Ok(false);
        }

        let write_index = state.write_index;
        let len = write_index - min_read;
        self.storage
            .read_region()
            .move_within(0, min_read * self.item_size, len * self.item_size)?;

        state.write_index = len;
        for reader in &mut state.readers {
            reader.read_index -= min_read;
        }

        record_relocation(RelocationKind::Output, len);
        tracing::debug!(
            output_multiple,
            force,
            reclaimed = min_read,
            write_index = len,
            "output blocked: compacted unread data to front"
        );
        Ok(true)
    }
}
