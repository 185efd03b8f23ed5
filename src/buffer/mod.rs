//! Stream buffers: one writer, any number of readers.
//!
//! A [`Buffer`] is a circular region of `capacity` fixed-size items. The
//! producing stage writes at the write cursor and advances it; every consumer
//! holds a [`BufferReader`] with its own read cursor. All cursors live in one
//! lock-guarded table inside the buffer so the writer can see every reader
//! when it computes how much room is left.
//!
//! # Mapping types
//!
//! - [`MappingType::SingleMapped`]: flat storage. A write never crosses the
//!   end of the region; when the writer runs out of contiguous room the
//!   buffer relocates data to the front (see `space_available` and the
//!   blocked callbacks).
//! - [`MappingType::DoubleMapped`]: storage mirrored by virtual memory so that
//!   reads and writes wrap transparently. Only the cursor arithmetic is
//!   provided here; the mirrored storage itself comes from the backend.
//!
//! # Example
//!
//! ```rust
//! use sigbuf::backend::HostBackend;
//! use sigbuf::buffer::{Buffer, BufferRequest};
//!
//! let buffer = Buffer::allocate(&HostBackend::heap(), &BufferRequest::new(16, 4)).unwrap();
//! let mut reader = buffer.add_reader(1, 0).unwrap();
//!
//! assert_eq!(buffer.space_available().unwrap(), 16);
//! buffer.update_write_pointer(10);
//! assert_eq!(reader.items_available(), 10);
//! assert_eq!(buffer.space_available().unwrap(), 6);
//!
//! reader.update_read_pointer(10);
//! assert_eq!(reader.items_available(), 0);
//! ```

pub mod index;
mod reader;
mod single_mapped;
pub mod tags;

pub use reader::{BufferReader, ReaderId};
pub use tags::{Tag, TagIndex, TagValue};

use crate::backend::{BufferBackend, BufferContext, Storage};
use crate::defaults;
use crate::error::{Error, Result};
use crate::memory::MemoryDomain;
use crate::observability::{
    record_buffer_created, record_buffer_dropped, span_buffer, trace_read, trace_write,
};
use index::{index_add, index_sub, lcm, round_up_to_multiple};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::Span;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(0);

// ============================================================================
// Configuration
// ============================================================================

/// How the storage of a buffer handles wraparound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MappingType {
    /// Flat storage with explicit relocation at the end of the region.
    #[default]
    SingleMapped,
    /// Virtually mirrored storage that wraps transparently.
    DoubleMapped,
}

impl fmt::Display for MappingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingType::SingleMapped => f.write_str("single_mapped"),
            MappingType::DoubleMapped => f.write_str("double_mapped"),
        }
    }
}

/// What the buffer needs to know about the stage writing into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerInfo {
    /// Stage name, for logs.
    pub name: String,
    /// Output items per input item, as an integer interpolation factor.
    pub relative_rate: usize,
    /// The producer always writes a multiple of this many items.
    pub output_multiple: usize,
}

impl Default for ProducerInfo {
    fn default() -> Self {
        Self {
            name: String::from("producer"),
            relative_rate: 1,
            output_multiple: 1,
        }
    }
}

impl ProducerInfo {
    /// Describe a producer with unit rate and output multiple.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the relative rate.
    pub fn with_relative_rate(mut self, relative_rate: usize) -> Self {
        self.relative_rate = relative_rate;
        self
    }

    /// Set the output multiple.
    pub fn with_output_multiple(mut self, output_multiple: usize) -> Self {
        self.output_multiple = output_multiple;
        self
    }

    /// Write granularity: `lcm(relative_rate, output_multiple)`.
    pub fn write_multiple(&self) -> usize {
        lcm(self.relative_rate, self.output_multiple)
    }
}

/// The stage that owns the buffer's storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferOwner {
    /// Stage name, for logs.
    pub name: String,
    /// Transfer context of the storage.
    pub context: BufferContext,
}

impl Default for BufferOwner {
    fn default() -> Self {
        Self {
            name: String::from("owner"),
            context: BufferContext::HostToHost,
        }
    }
}

impl BufferOwner {
    /// An owner in the `HostToHost` context.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the transfer context.
    pub fn with_context(mut self, context: BufferContext) -> Self {
        self.context = context;
        self
    }
}

/// Everything needed to allocate a buffer.
#[derive(Debug, Clone)]
pub struct BufferRequest {
    /// Minimum number of items; rounded up to the write granularity.
    pub nitems: usize,
    /// Size of one item in bytes.
    pub item_size: usize,
    /// LCM of the read granularities of all downstream consumers.
    pub downstream_lcm: usize,
    /// The producing stage.
    pub producer: ProducerInfo,
    /// The stage owning the storage.
    pub owner: BufferOwner,
    /// Wraparound strategy.
    pub mapping: MappingType,
}

impl BufferRequest {
    /// A single-mapped host request for `nitems` items of `item_size` bytes.
    pub fn new(nitems: usize, item_size: usize) -> Self {
        Self {
            nitems,
            item_size,
            downstream_lcm: defaults::DEFAULT_DOWNSTREAM_LCM,
            producer: ProducerInfo::default(),
            owner: BufferOwner::default(),
            mapping: MappingType::SingleMapped,
        }
    }

    /// A request sized by [`defaults::default_capacity_items`].
    pub fn with_default_capacity(item_size: usize) -> Self {
        Self::new(defaults::default_capacity_items(item_size), item_size)
    }

    /// Set the downstream read granularity.
    pub fn with_downstream_lcm(mut self, downstream_lcm: usize) -> Self {
        self.downstream_lcm = downstream_lcm;
        self
    }

    /// Set the producer description.
    pub fn with_producer(mut self, producer: ProducerInfo) -> Self {
        self.producer = producer;
        self
    }

    /// Set the owner description.
    pub fn with_owner(mut self, owner: BufferOwner) -> Self {
        self.owner = owner;
        self
    }

    /// Set the transfer context of the owner.
    pub fn with_context(mut self, context: BufferContext) -> Self {
        self.owner.context = context;
        self
    }

    /// Set the mapping type.
    pub fn with_mapping(mut self, mapping: MappingType) -> Self {
        self.mapping = mapping;
        self
    }
}

// ============================================================================
// Shared state
// ============================================================================

/// One attached reader's cursor.
#[derive(Debug, Clone)]
struct ReaderCursor {
    id: ReaderId,
    /// Oldest item the reader still needs (start of its history window).
    read_index: usize,
    /// Absolute count of items consumed.
    items_read: u64,
    /// Items the reader looks at per output item (1 = no history).
    history: usize,
    sample_delay: usize,
}

impl ReaderCursor {
    #[inline]
    fn history_offset(&self) -> usize {
        self.history - 1
    }
}

/// Stale copy of relocated data that lagging readers are still draining.
///
/// After a history relocation the items `[start, end)` also exist at
/// `[0, end - start)`. A reader reaching `start..=end` continues at the
/// matching front position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TailWindow {
    start: usize,
    end: usize,
}

#[derive(Debug)]
struct BufferState {
    write_index: usize,
    abs_write_offset: u64,
    done: bool,
    tags: TagIndex,
    readers: Vec<ReaderCursor>,
    next_reader_id: u64,
    max_reader_delay: usize,
    max_reader_history: usize,
    has_history: bool,
    last_min_items_read: u64,
    tail: Option<TailWindow>,
}

impl BufferState {
    fn new() -> Self {
        Self {
            write_index: 0,
            abs_write_offset: 0,
            done: false,
            tags: TagIndex::new(),
            readers: Vec::new(),
            next_reader_id: 0,
            max_reader_delay: 0,
            max_reader_history: 1,
            has_history: false,
            last_min_items_read: 0,
            tail: None,
        }
    }

    fn position(&self, id: ReaderId) -> Option<usize> {
        self.readers.iter().position(|r| r.id == id)
    }

    /// Items between the reader's cursor and the write cursor, history included.
    #[inline]
    fn unread(&self, reader: &ReaderCursor) -> u64 {
        (self.abs_write_offset + reader.history_offset() as u64).saturating_sub(reader.items_read)
    }

    /// The reader sits behind the writer in storage order: it has to reach
    /// the end of the region before it can catch up.
    #[inline]
    fn is_wrapped(&self, reader: &ReaderCursor) -> bool {
        reader.read_index > self.write_index
            || (reader.read_index == self.write_index && self.unread(reader) > 0)
    }

    fn any_wrapped(&self) -> bool {
        self.readers.iter().any(|r| self.is_wrapped(r))
    }

    /// Drop the tail window once no reader lags behind it.
    fn refresh_tail(&mut self) {
        if self.tail.is_some() && !self.any_wrapped() {
            self.tail = None;
        }
    }
}

// ============================================================================
// Buffer
// ============================================================================

/// A circular item buffer shared by one writer and its readers.
pub struct Buffer {
    id: u64,
    owner: BufferOwner,
    producer: String,
    capacity: usize,
    item_size: usize,
    downstream_lcm: usize,
    write_multiple: usize,
    mapping: MappingType,
    storage: Storage,
    span: Span,
    state: Mutex<BufferState>,
}

impl Buffer {
    /// Allocate a buffer through `backend`.
    ///
    /// The capacity is `request.nitems` rounded up to
    /// `lcm(write_multiple, downstream_lcm)` items, where `write_multiple` is
    /// the producer's `lcm(relative_rate, output_multiple)`.
    ///
    /// # Errors
    ///
    /// - [`Error::AllocationFailed`] for a zero item size or item count, or
    ///   when the backend cannot provide storage
    /// - [`Error::Unsupported`] when the backend cannot serve the owner's context
    pub fn allocate(backend: &dyn BufferBackend, request: &BufferRequest) -> Result<Arc<Buffer>> {
        if request.item_size == 0 {
            return Err(Error::AllocationFailed("item size must be non-zero".into()));
        }
        if request.nitems == 0 {
            return Err(Error::AllocationFailed("item count must be non-zero".into()));
        }

        let write_multiple = request.producer.write_multiple();
        let downstream_lcm = request.downstream_lcm.max(1);
        let granularity = lcm(write_multiple, downstream_lcm);
        let capacity = round_up_to_multiple(request.nitems, granularity);
        let bytes = capacity.checked_mul(request.item_size).ok_or_else(|| {
            Error::AllocationFailed(format!(
                "{capacity} items of {} bytes overflow the address space",
                request.item_size
            ))
        })?;

        let storage = backend.allocate(request.owner.context, bytes)?;
        let id = NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed);
        let span = span_buffer(&request.owner.name, id);

        span.in_scope(|| {
            tracing::debug!(
                backend = backend.name(),
                producer = %request.producer.name,
                requested = request.nitems,
                capacity,
                item_size = request.item_size,
                write_multiple,
                downstream_lcm,
                mapping = %request.mapping,
                context = %request.owner.context,
                "allocated buffer"
            );
        });
        record_buffer_created();

        Ok(Arc::new(Buffer {
            id,
            owner: request.owner.clone(),
            producer: request.producer.name.clone(),
            capacity,
            item_size: request.item_size,
            downstream_lcm,
            write_multiple,
            mapping: request.mapping,
            storage,
            span,
            state: Mutex::new(BufferState::new()),
        }))
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Process-unique buffer id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The stage owning the storage.
    pub fn owner(&self) -> &BufferOwner {
        &self.owner
    }

    /// Name of the producing stage.
    pub fn producer_name(&self) -> &str {
        &self.producer
    }

    /// Capacity in items.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Item size in bytes.
    #[inline]
    pub fn item_size(&self) -> usize {
        self.item_size
    }

    /// Downstream read granularity the buffer was sized for.
    pub fn downstream_lcm(&self) -> usize {
        self.downstream_lcm
    }

    /// Producer write granularity.
    pub fn write_multiple(&self) -> usize {
        self.write_multiple
    }

    /// Wraparound strategy.
    pub fn mapping_type(&self) -> MappingType {
        self.mapping
    }

    /// Transfer context, fixed for the buffer's lifetime.
    pub fn context(&self) -> BufferContext {
        self.storage.context()
    }

    /// Domain of the region the producer writes.
    pub fn write_domain(&self) -> MemoryDomain {
        self.storage.context().write_domain()
    }

    /// Domain of the region readers observe.
    pub fn read_domain(&self) -> MemoryDomain {
        self.storage.context().read_domain()
    }

    /// Current write cursor.
    pub fn write_index(&self) -> usize {
        self.lock().write_index
    }

    /// Total items ever written.
    pub fn nitems_written(&self) -> u64 {
        self.lock().abs_write_offset
    }

    /// Number of attached readers.
    pub fn nreaders(&self) -> usize {
        self.lock().readers.len()
    }

    /// Largest history declared by any reader.
    pub fn max_reader_history(&self) -> usize {
        self.lock().max_reader_history
    }

    /// Largest sample delay declared by any reader.
    pub fn max_reader_delay(&self) -> usize {
        self.lock().max_reader_delay
    }

    /// Whether any reader needs look-back (history above 1).
    pub fn has_history(&self) -> bool {
        self.lock().has_history
    }

    // ------------------------------------------------------------------------
    // Producer side
    // ------------------------------------------------------------------------

    /// Address where the next item is written.
    ///
    /// Points into device memory for `DeviceToHost` and `DeviceToDevice`
    /// buffers; such pointers are only meaningful to the device runtime.
    pub fn write_pointer(&self) -> *mut u8 {
        let write_index = self.lock().write_index;
        self.storage.write_ptr(write_index * self.item_size)
    }

    /// Number of items the producer may write at [`Buffer::write_pointer`].
    ///
    /// For single-mapped buffers this may relocate reader history to the
    /// front of the region, which goes through the read region's copy
    /// primitives and can therefore fail.
    pub fn space_available(&self) -> Result<usize> {
        let mut state = self.lock();
        if state.readers.is_empty() {
            return Ok(self.capacity - 1);
        }

        let min_items_read = state
            .readers
            .iter()
            .map(|r| r.items_read)
            .min()
            .unwrap_or_default();
        if min_items_read != state.last_min_items_read {
            let previous = state.last_min_items_read;
            self.prune_tags_locked(&mut state, previous);
            state.last_min_items_read = min_items_read;
        }

        match self.mapping {
            MappingType::SingleMapped => self.single_mapped_space(&mut state),
            MappingType::DoubleMapped => Ok(self.double_mapped_space(&state)),
        }
    }

    /// Make the `nitems` items just written visible to readers.
    ///
    /// Call once per production step, before [`Buffer::update_write_pointer`].
    /// Copies host to device (or device to host) for cross-domain contexts.
    ///
    /// # Errors
    ///
    /// [`Error::TransferFailed`] if the copy fails; the production step must
    /// be abandoned.
    pub fn post_work(&self, nitems: usize) -> Result<()> {
        let write_index = self.lock().write_index;
        self.storage
            .post_work(write_index * self.item_size, nitems * self.item_size)
    }

    /// Advance the write cursor by `nitems`.
    ///
    /// `nitems` must not exceed the last [`Buffer::space_available`].
    pub fn update_write_pointer(&self, nitems: usize) {
        let mut state = self.lock();
        state.write_index = index_add(state.write_index, nitems, self.capacity);
        state.abs_write_offset += nitems as u64;
        trace_write(state.write_index, nitems, state.abs_write_offset);
    }

    /// Signal (or retract) end of stream.
    pub fn set_done(&self, done: bool) {
        self.lock().done = done;
        tracing::debug!(parent: &self.span, done, "buffer done flag set");
    }

    /// Whether the producer has signalled end of stream.
    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    // ------------------------------------------------------------------------
    // Tags
    // ------------------------------------------------------------------------

    /// Attach a tag to the stream.
    pub fn add_item_tag(&self, tag: Tag) {
        self.lock().tags.insert(tag);
    }

    /// Hide `tag` from consumer `consumer_id` without removing it for others.
    ///
    /// Returns whether a matching tag was found.
    pub fn remove_item_tag(&self, tag: &Tag, consumer_id: u64) -> bool {
        self.lock().tags.mark_deleted(tag, consumer_id)
    }

    /// Drop tags no reader can still see, given that every reader has read
    /// at least `max_time` items.
    pub fn prune_tags(&self, max_time: u64) -> usize {
        let mut state = self.lock();
        self.prune_tags_locked(&mut state, max_time)
    }

    /// Caller holds the buffer lock (witnessed by `state`).
    fn prune_tags_locked(&self, state: &mut BufferState, max_time: u64) -> usize {
        let removed = state.tags.prune(
            max_time,
            state.max_reader_delay as u64,
            self.capacity as u64,
        );
        if removed > 0 {
            tracing::trace!(parent: &self.span, removed, max_time, "pruned tags");
        }
        removed
    }

    /// Number of stored tags.
    pub fn tag_count(&self) -> usize {
        self.lock().tags.len()
    }

    // ------------------------------------------------------------------------
    // Readers
    // ------------------------------------------------------------------------

    /// Attach a reader that looks at `history` items per output item and
    /// declares `sample_delay` items of tag delay.
    ///
    /// The reader starts `history - 1` items behind the write cursor.
    ///
    /// # Errors
    ///
    /// [`Error::InvariantViolation`] if `history` exceeds the capacity.
    pub fn add_reader(self: &Arc<Self>, history: usize, sample_delay: usize) -> Result<BufferReader> {
        let history = history.max(1);
        if history > self.capacity {
            return Err(Error::InvariantViolation(format!(
                "reader history {history} exceeds buffer capacity {}",
                self.capacity
            )));
        }

        let mut state = self.lock();
        let id = ReaderId::new(state.next_reader_id);
        state.next_reader_id += 1;
        self.update_reader_block_history_locked(&mut state, history, sample_delay);

        let read_index = index_sub(state.write_index, history - 1, self.capacity);
        let items_read = state.abs_write_offset;
        state.readers.push(ReaderCursor {
            id,
            read_index,
            items_read,
            history,
            sample_delay,
        });

        tracing::debug!(
            parent: &self.span,
            reader = %id,
            history,
            sample_delay,
            read_index,
            readers = state.readers.len(),
            "reader attached"
        );
        drop(state);

        Ok(BufferReader::new(Arc::clone(self), id))
    }

    /// Raise the buffer-wide history and delay maxima.
    ///
    /// While nothing has been written, a single-mapped buffer also moves the
    /// write cursor to `max_history - 1` so the preloaded history fits in
    /// front of the first new item.
    ///
    /// # Errors
    ///
    /// [`Error::InvariantViolation`] if `history` exceeds the capacity.
    pub fn update_reader_block_history(&self, history: usize, delay: usize) -> Result<()> {
        if history > self.capacity {
            return Err(Error::InvariantViolation(format!(
                "reader history {history} exceeds buffer capacity {}",
                self.capacity
            )));
        }
        let mut state = self.lock();
        self.update_reader_block_history_locked(&mut state, history.max(1), delay);
        Ok(())
    }

    fn update_reader_block_history_locked(
        &self,
        state: &mut BufferState,
        history: usize,
        delay: usize,
    ) {
        let grew = history > state.max_reader_history;
        state.max_reader_history = state.max_reader_history.max(history);
        state.max_reader_delay = state.max_reader_delay.max(delay);
        state.has_history = state.max_reader_history > 1;

        if grew && self.mapping == MappingType::SingleMapped && state.abs_write_offset == 0 {
            let write_index = state.max_reader_history - 1;
            state.write_index = write_index;
            for reader in &mut state.readers {
                reader.read_index = write_index - reader.history_offset();
            }
            tracing::debug!(
                parent: &self.span,
                write_index,
                max_history = state.max_reader_history,
                "write cursor moved to make room for reader history"
            );
        }
    }

    /// Detach reader `id`.
    ///
    /// # Errors
    ///
    /// [`Error::InvariantViolation`] if no such reader is attached.
    pub(crate) fn drop_reader(&self, id: ReaderId) -> Result<()> {
        let mut state = self.lock();
        let Some(pos) = state.position(id) else {
            return Err(Error::InvariantViolation(format!(
                "reader {id} is not attached to buffer {}",
                self.id
            )));
        };
        state.readers.remove(pos);
        state.refresh_tail();
        tracing::debug!(parent: &self.span, reader = %id, readers = state.readers.len(), "reader detached");
        Ok(())
    }

    fn reader_snapshot(&self, id: ReaderId) -> Option<ReaderCursor> {
        let state = self.lock();
        state.position(id).map(|pos| state.readers[pos].clone())
    }

    fn reader_read_pointer(&self, id: ReaderId) -> *const u8 {
        let read_index = self
            .reader_snapshot(id)
            .map(|r| r.read_index)
            .unwrap_or_default();
        self.storage.read_ptr(read_index * self.item_size)
    }

    fn reader_items_available(&self, id: ReaderId) -> usize {
        let state = self.lock();
        let Some(pos) = state.position(id) else {
            return 0;
        };
        let reader = &state.readers[pos];
        match self.mapping {
            MappingType::SingleMapped => self.single_mapped_items_available(&state, reader),
            MappingType::DoubleMapped => {
                index_sub(state.write_index, reader.read_index, self.capacity)
            }
        }
    }

    fn reader_update_read_pointer(&self, id: ReaderId, nitems: usize) -> Result<()> {
        let mut state = self.lock();
        let Some(pos) = state.position(id) else {
            return Err(Error::InvariantViolation(format!(
                "reader {id} is not attached to buffer {}",
                self.id
            )));
        };
        let wrapped = state.is_wrapped(&state.readers[pos]);
        let tail = state.tail;
        let capacity = self.capacity;

        let reader = &mut state.readers[pos];
        let advanced = reader.read_index + nitems;
        reader.read_index = match tail {
            Some(t) if wrapped && (t.start..=t.end).contains(&advanced) => advanced - t.start,
            _ => index_add(reader.read_index, nitems, capacity),
        };
        reader.items_read += nitems as u64;
        trace_read(id.as_u64(), reader.read_index, nitems, reader.items_read);

        state.refresh_tail();
        Ok(())
    }

    fn reader_declare_sample_delay(&self, id: ReaderId, delay: usize) {
        let mut state = self.lock();
        if let Some(pos) = state.position(id) {
            state.readers[pos].sample_delay = delay;
            self.update_reader_block_history_locked(&mut state, 1, delay);
        }
    }

    fn reader_tags_in_range(&self, id: ReaderId, start: u64, end: u64, consumer_id: u64) -> Vec<Tag> {
        let state = self.lock();
        let Some(pos) = state.position(id) else {
            return Vec::new();
        };
        let delay = state.readers[pos].sample_delay as u64;
        state
            .tags
            .range(start.saturating_sub(delay), end.saturating_sub(delay))
            .filter(|tag| !tag.is_deleted_for(consumer_id))
            .map(|tag| {
                let mut tag = tag.clone();
                tag.offset += delay;
                tag.marked_deleted.clear();
                tag
            })
            .collect()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        debug_assert!(
            state.readers.is_empty(),
            "buffer {} destroyed with {} readers attached",
            self.id,
            state.readers.len()
        );
        record_buffer_dropped();
        tracing::debug!(parent: &self.span, "buffer released");
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("owner", &self.owner.name)
            .field("capacity", &self.capacity)
            .field("item_size", &self.item_size)
            .field("mapping", &self.mapping)
            .field("context", &self.context())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;

    fn host_buffer(request: BufferRequest) -> Arc<Buffer> {
        Buffer::allocate(&HostBackend::heap(), &request).unwrap()
    }

    #[test]
    fn test_capacity_rounded_to_granularity() {
        let producer = ProducerInfo::new("src")
            .with_relative_rate(2)
            .with_output_multiple(3);
        let buffer = host_buffer(
            BufferRequest::new(100, 4)
                .with_producer(producer)
                .with_downstream_lcm(4),
        );
        assert_eq!(buffer.write_multiple(), 6);
        assert_eq!(buffer.capacity(), 108);
        assert_eq!(buffer.capacity() % 12, 0);
    }

    #[test]
    fn test_default_capacity_request() {
        let buffer = host_buffer(BufferRequest::with_default_capacity(8));
        assert_eq!(buffer.capacity(), 4096);
        assert_eq!(buffer.downstream_lcm(), 1);
    }

    #[test]
    fn test_zero_sizes_fail() {
        let backend = HostBackend::heap();
        assert!(matches!(
            Buffer::allocate(&backend, &BufferRequest::new(0, 4)),
            Err(Error::AllocationFailed(_))
        ));
        assert!(matches!(
            Buffer::allocate(&backend, &BufferRequest::new(16, 0)),
            Err(Error::AllocationFailed(_))
        ));
    }

    #[test]
    fn test_no_readers_holds_back_one_slot() {
        let buffer = host_buffer(BufferRequest::new(16, 4));
        assert_eq!(buffer.space_available().unwrap(), 15);
        buffer.update_write_pointer(7);
        assert_eq!(buffer.space_available().unwrap(), 15);
    }

    #[test]
    fn test_write_cursor_wraps() {
        let buffer = host_buffer(BufferRequest::new(16, 1));
        buffer.update_write_pointer(10);
        buffer.update_write_pointer(6);
        assert_eq!(buffer.write_index(), 0);
        assert_eq!(buffer.nitems_written(), 16);
    }

    #[test]
    fn test_drop_unknown_reader_is_invariant_violation() {
        let buffer = host_buffer(BufferRequest::new(16, 4));
        let err = buffer.drop_reader(ReaderId::new(42)).unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn test_reader_detaches_on_drop() {
        let buffer = host_buffer(BufferRequest::new(16, 4));
        let reader = buffer.add_reader(1, 0).unwrap();
        assert_eq!(buffer.nreaders(), 1);
        drop(reader);
        assert_eq!(buffer.nreaders(), 0);
    }

    #[test]
    fn test_history_moves_write_cursor_before_first_write() {
        let buffer = host_buffer(BufferRequest::new(16, 4));
        let short = buffer.add_reader(1, 0).unwrap();
        let long = buffer.add_reader(4, 0).unwrap();
        assert!(buffer.has_history());
        assert_eq!(buffer.write_index(), 3);
        assert_eq!(long.read_index(), 0);
        assert_eq!(long.items_available(), 3);
        assert_eq!(short.read_index(), 3);
        assert_eq!(short.items_available(), 0);
    }

    #[test]
    fn test_history_after_data_does_not_move_cursors() {
        let buffer = host_buffer(BufferRequest::new(16, 4));
        let _reader = buffer.add_reader(1, 0).unwrap();
        buffer.update_write_pointer(5);
        buffer.update_reader_block_history(3, 2).unwrap();
        assert_eq!(buffer.write_index(), 5);
        assert_eq!(buffer.max_reader_history(), 3);
        assert_eq!(buffer.max_reader_delay(), 2);
    }

    #[test]
    fn test_history_larger_than_capacity_rejected() {
        let buffer = host_buffer(BufferRequest::new(16, 4));
        assert!(buffer.add_reader(17, 0).unwrap_err().is_invariant_violation());
    }

    #[test]
    fn test_tags_pruned_past_slowest_reader() {
        let buffer = host_buffer(BufferRequest::new(16, 1));
        let mut reader = buffer.add_reader(1, 0).unwrap();
        buffer.add_item_tag(Tag::new(0, "sob", true));
        buffer.add_item_tag(Tag::new(40, "eob", true));

        for _ in 0..4 {
            let n = buffer.space_available().unwrap();
            buffer.update_write_pointer(n);
            reader.update_read_pointer(reader.items_available());
        }
        // Pruning uses the minimum seen on the previous call.
        buffer.space_available().unwrap();
        assert_eq!(reader.items_read(), buffer.nitems_written());
        assert!(reader.items_read() > 17);
        assert_eq!(buffer.tag_count(), 1);
    }

    #[test]
    fn test_double_mapped_arithmetic() {
        let buffer = host_buffer(BufferRequest::new(16, 1).with_mapping(MappingType::DoubleMapped));
        let mut reader = buffer.add_reader(1, 0).unwrap();
        assert_eq!(buffer.space_available().unwrap(), 15);
        buffer.update_write_pointer(12);
        reader.update_read_pointer(10);
        assert_eq!(buffer.space_available().unwrap(), 13);
        buffer.update_write_pointer(13);
        assert_eq!(buffer.write_index(), 9);
        assert_eq!(reader.items_available(), 15);
        assert_eq!(buffer.space_available().unwrap(), 0);
    }

    #[test]
    fn test_done_flag() {
        let buffer = host_buffer(BufferRequest::new(8, 1));
        let reader = buffer.add_reader(1, 0).unwrap();
        assert!(!reader.done());
        buffer.set_done(true);
        assert!(reader.done());
        assert!(buffer.is_done());
    }
}
