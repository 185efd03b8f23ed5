//! Per-consumer read cursor.

use super::{Buffer, Tag};
use crate::error::Result;
use std::fmt;
use std::sync::Arc;

/// Identity of a reader within its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReaderId(u64);

impl ReaderId {
    /// Wrap a raw id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reader#{}", self.0)
    }
}

/// A consumer's view of a [`Buffer`].
///
/// Created by [`Buffer::add_reader`]. Keeps the buffer alive; dropping the
/// reader detaches it, after which the writer no longer waits for it.
pub struct BufferReader {
    buffer: Arc<Buffer>,
    id: ReaderId,
}

impl BufferReader {
    pub(super) fn new(buffer: Arc<Buffer>, id: ReaderId) -> Self {
        Self { buffer, id }
    }

    /// This reader's id.
    pub fn id(&self) -> ReaderId {
        self.id
    }

    /// The buffer being read.
    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    /// Address of the oldest item the reader still needs.
    ///
    /// With history `h`, the first `h - 1` items at this address are
    /// look-back; new items follow them. Points into device memory for
    /// `HostToDevice` and `DeviceToDevice` buffers.
    pub fn read_pointer(&self) -> *const u8 {
        self.buffer.reader_read_pointer(self.id)
    }

    /// Current read cursor.
    pub fn read_index(&self) -> usize {
        self.buffer
            .reader_snapshot(self.id)
            .map(|r| r.read_index)
            .unwrap_or_default()
    }

    /// Contiguous items readable at [`BufferReader::read_pointer`].
    pub fn items_available(&self) -> usize {
        self.buffer.reader_items_available(self.id)
    }

    /// Consume `nitems` items.
    ///
    /// `nitems` must not exceed [`BufferReader::items_available`].
    pub fn update_read_pointer(&mut self, nitems: usize) {
        if let Err(err) = self.buffer.reader_update_read_pointer(self.id, nitems) {
            tracing::error!(reader = %self.id, error = %err, "read pointer update failed");
        }
    }

    /// Absolute number of items consumed.
    pub fn items_read(&self) -> u64 {
        self.buffer
            .reader_snapshot(self.id)
            .map(|r| r.items_read)
            .unwrap_or_default()
    }

    /// History declared at attach time.
    pub fn history(&self) -> usize {
        self.buffer
            .reader_snapshot(self.id)
            .map(|r| r.history)
            .unwrap_or(1)
    }

    /// Declared sample delay.
    pub fn sample_delay(&self) -> usize {
        self.buffer
            .reader_snapshot(self.id)
            .map(|r| r.sample_delay)
            .unwrap_or_default()
    }

    /// Declare that this consumer's output lags its input by `delay` items.
    ///
    /// Tags are reported shifted by the delay, and the buffer keeps tags
    /// around correspondingly longer.
    pub fn declare_sample_delay(&mut self, delay: usize) {
        self.buffer.reader_declare_sample_delay(self.id, delay);
    }

    /// Whether the producer signalled end of stream.
    ///
    /// End of stream is `done() && items_available() == 0`; data written
    /// before `done` must still be drained.
    pub fn done(&self) -> bool {
        self.buffer.is_done()
    }

    /// Tags for absolute items `[start, end)` as seen by `consumer_id`.
    ///
    /// The window is shifted back by the sample delay and the returned
    /// offsets forward by it. Tags this consumer removed are skipped.
    pub fn get_tags_in_range(&self, start: u64, end: u64, consumer_id: u64) -> Vec<Tag> {
        self.buffer
            .reader_tags_in_range(self.id, start, end, consumer_id)
    }

    /// [`Buffer::input_blkd_cb_ready`] at this reader's cursor.
    pub fn input_blkd_cb_ready(&self, items_required: usize) -> bool {
        self.buffer.reader_input_blkd_cb_ready(self.id, items_required)
    }

    /// [`Buffer::input_blocked_callback`] at this reader's cursor.
    pub fn input_blocked_callback(&self, items_required: usize) -> Result<bool> {
        self.buffer.reader_input_blocked_callback(self.id, items_required)
    }
}

impl Drop for BufferReader {
    fn drop(&mut self) {
        if let Err(err) = self.buffer.drop_reader(self.id) {
            tracing::error!(reader = %self.id, error = %err, "failed to detach reader");
        }
    }
}

impl fmt::Debug for BufferReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferReader")
            .field("id", &self.id)
            .field("buffer", &self.buffer.id())
            .field("read_index", &self.read_index())
            .field("items_read", &self.items_read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::super::BufferRequest;
    use super::*;
    use crate::backend::HostBackend;

    fn buffer() -> Arc<Buffer> {
        Buffer::allocate(&HostBackend::heap(), &BufferRequest::new(32, 1)).unwrap()
    }

    #[test]
    fn test_reader_ids_are_unique() {
        let buffer = buffer();
        let a = buffer.add_reader(1, 0).unwrap();
        let b = buffer.add_reader(1, 0).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id().to_string(), "reader#0");
    }

    #[test]
    fn test_reader_keeps_buffer_alive() {
        let buffer = buffer();
        let reader = buffer.add_reader(1, 0).unwrap();
        let weak = Arc::downgrade(&buffer);
        drop(buffer);
        assert!(weak.upgrade().is_some());
        drop(reader);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_tags_shifted_by_sample_delay() {
        let buffer = buffer();
        let mut reader = buffer.add_reader(1, 0).unwrap();
        reader.declare_sample_delay(3);
        assert_eq!(buffer.max_reader_delay(), 3);
        buffer.add_item_tag(Tag::new(2, "a", 1u64));
        buffer.add_item_tag(Tag::new(6, "b", 2u64));

        let tags = reader.get_tags_in_range(4, 8, 0);
        let offsets: Vec<_> = tags.iter().map(|t| (t.key.as_str(), t.offset)).collect();
        assert_eq!(offsets, vec![("a", 5)]);
        assert_eq!(reader.sample_delay(), 3);
    }

    #[test]
    fn test_removed_tags_hidden_per_consumer() {
        let buffer = buffer();
        let reader = buffer.add_reader(1, 0).unwrap();
        let tag = Tag::new(1, "burst", true);
        buffer.add_item_tag(tag.clone());
        assert!(buffer.remove_item_tag(&tag, 7));

        assert!(reader.get_tags_in_range(0, 4, 7).is_empty());
        let seen = reader.get_tags_in_range(0, 4, 8);
        assert_eq!(seen, vec![tag]);
        assert!(seen[0].marked_deleted.is_empty());
    }

    fn write(buffer: &Buffer, values: &[u8]) {
        unsafe {
            std::ptr::copy_nonoverlapping(values.as_ptr(), buffer.write_pointer(), values.len());
        }
        buffer.post_work(values.len()).unwrap();
        buffer.update_write_pointer(values.len());
    }

    #[test]
    fn test_input_blocked_acts_on_calling_reader() {
        let buffer = Buffer::allocate(&HostBackend::heap(), &BufferRequest::new(16, 1)).unwrap();
        let mut stalled = buffer.add_reader(1, 0).unwrap();
        let mut current = buffer.add_reader(1, 0).unwrap();

        write(&buffer, &(0..12).collect::<Vec<u8>>());
        stalled.update_read_pointer(10);
        current.update_read_pointer(12);
        write(&buffer, &(12..16).collect::<Vec<u8>>());
        write(&buffer, &[16, 17]);
        current.update_read_pointer(4);
        current.update_read_pointer(2);
        assert_eq!(stalled.read_index(), 10);
        assert_eq!(current.read_index(), 2);

        assert!(!current.input_blkd_cb_ready(8));
        assert!(!current.input_blocked_callback(8).unwrap());
        assert!(stalled.input_blkd_cb_ready(8));
        assert!(stalled.input_blocked_callback(8).unwrap());

        assert_eq!(stalled.read_index(), 0);
        assert_eq!(current.read_index(), 8);
        assert_eq!(buffer.write_index(), 8);
        assert_eq!(stalled.items_available(), 8);
        assert_eq!(current.items_available(), 0);
        let ptr = stalled.read_pointer();
        let data: Vec<u8> = (0..8).map(|i| unsafe { *ptr.add(i) }).collect();
        assert_eq!(data, (10..18).collect::<Vec<u8>>());
    }

    #[test]
    fn test_history_reported() {
        let buffer = buffer();
        let reader = buffer.add_reader(5, 0).unwrap();
        assert_eq!(reader.history(), 5);
        assert_eq!(reader.items_available(), 4);
        assert_eq!(reader.items_read(), 0);
    }
}
