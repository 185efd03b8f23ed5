//! Stream tags: metadata attached to absolute item offsets.
//!
//! A producer attaches tags to items it wrote; every reader sees them through
//! [`crate::BufferReader::get_tags_in_range`]. Tags are kept ordered by offset
//! and, among equal offsets, by insertion order.
//!
//! # Example
//!
//! ```rust
//! use sigbuf::buffer::Tag;
//!
//! let tag = Tag::new(1024, "rx_freq", 433.92e6).with_srcid("tuner0");
//! assert_eq!(tag.value.to_f64(), Some(433.92e6));
//! assert_eq!(tag.value.to_string(), "4.3392e8");
//! ```

use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Tag Value
// ============================================================================

/// Payload of a stream tag.
///
/// Numeric payloads convert between each other where the value fits, so a
/// consumer reading a sample rate does not care whether the producer
/// attached it as an integer or a real.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// No payload; the key alone carries the meaning.
    Null,
    /// Flag.
    Bool(bool),
    /// Signed count or index.
    Long(i64),
    /// Absolute item offset or timestamp.
    U64(u64),
    /// Frequency, gain, rate.
    Real(f64),
    /// Short identifier such as a packet kind.
    Symbol(String),
    /// Opaque bytes.
    Blob(Vec<u8>),
    /// Several values attached together.
    Tuple(Vec<TagValue>),
}

impl TagValue {
    /// Numeric payload as `f64`.
    pub fn to_f64(&self) -> Option<f64> {
        match *self {
            TagValue::Real(x) => Some(x),
            TagValue::Long(n) => Some(n as f64),
            TagValue::U64(n) => Some(n as f64),
            _ => None,
        }
    }

    /// Non-negative integer payload as `u64`.
    pub fn to_u64(&self) -> Option<u64> {
        match *self {
            TagValue::U64(n) => Some(n),
            TagValue::Long(n) => u64::try_from(n).ok(),
            _ => None,
        }
    }

    /// Symbol payload.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            TagValue::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Flag payload.
    pub fn flag(&self) -> Option<bool> {
        match *self {
            TagValue::Bool(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Null => f.write_str("()"),
            TagValue::Bool(b) => write!(f, "{b}"),
            TagValue::Long(n) => write!(f, "{n}"),
            TagValue::U64(n) => write!(f, "{n}u"),
            TagValue::Real(x) => write!(f, "{x:e}"),
            TagValue::Symbol(s) => write!(f, "'{s}"),
            TagValue::Blob(b) => write!(f, "<{} bytes>", b.len()),
            TagValue::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
        }
    }
}

macro_rules! tag_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for TagValue {
                fn from(value: $ty) -> Self {
                    TagValue::$variant(value.into())
                }
            }
        )*
    };
}

tag_value_from! {
    bool => Bool,
    i32 => Long,
    i64 => Long,
    u32 => U64,
    u64 => U64,
    f32 => Real,
    f64 => Real,
    &str => Symbol,
    String => Symbol,
    Vec<u8> => Blob,
    Vec<TagValue> => Tuple,
}

impl From<()> for TagValue {
    fn from(_: ()) -> Self {
        TagValue::Null
    }
}

// ============================================================================
// Tag
// ============================================================================

/// A key/value pair attached to one item of a stream.
#[derive(Debug, Clone)]
pub struct Tag {
    /// Absolute item offset the tag refers to.
    pub offset: u64,
    /// Tag key.
    pub key: String,
    /// Tag payload.
    pub value: TagValue,
    /// Optional identifier of the block that created the tag.
    pub srcid: Option<String>,
    /// Consumers that have removed this tag from their view.
    pub marked_deleted: SmallVec<[u64; 2]>,
}

impl Tag {
    /// Create a tag at `offset`.
    pub fn new(offset: u64, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        Self {
            offset,
            key: key.into(),
            value: value.into(),
            srcid: None,
            marked_deleted: SmallVec::new(),
        }
    }

    /// Set the source identifier.
    pub fn with_srcid(mut self, srcid: impl Into<String>) -> Self {
        self.srcid = Some(srcid.into());
        self
    }

    /// Whether `consumer_id` has removed this tag.
    #[inline]
    pub fn is_deleted_for(&self, consumer_id: u64) -> bool {
        self.marked_deleted.contains(&consumer_id)
    }
}

/// Equality ignores deletion marks: two tags are the same tag regardless of
/// which consumers have hidden it.
impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
            && self.key == other.key
            && self.value == other.value
            && self.srcid == other.srcid
    }
}

// ============================================================================
// Tag Index
// ============================================================================

/// Ordered multi-map of tags keyed by absolute offset.
#[derive(Debug, Default)]
pub struct TagIndex {
    tags: BTreeMap<u64, Vec<Tag>>,
    len: usize,
}

impl TagIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tags.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the index holds no tags.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a tag after any existing tags at the same offset.
    pub fn insert(&mut self, tag: Tag) {
        self.tags.entry(tag.offset).or_default().push(tag);
        self.len += 1;
    }

    /// Mark every stored tag equal to `tag` as deleted by `consumer_id`.
    ///
    /// Returns whether any matching tag was found.
    pub fn mark_deleted(&mut self, tag: &Tag, consumer_id: u64) -> bool {
        let Some(at_offset) = self.tags.get_mut(&tag.offset) else {
            return false;
        };
        let mut found = false;
        for stored in at_offset.iter_mut().filter(|t| **t == *tag) {
            if !stored.is_deleted_for(consumer_id) {
                stored.marked_deleted.push(consumer_id);
            }
            found = true;
        }
        found
    }

    /// Drop every tag with `offset + max_reader_delay + capacity < max_time`.
    ///
    /// Returns the number of tags removed.
    pub fn prune(&mut self, max_time: u64, max_reader_delay: u64, capacity: u64) -> usize {
        let horizon = max_reader_delay + capacity;
        if max_time <= horizon {
            return 0;
        }
        let keep = self.tags.split_off(&(max_time - horizon));
        let removed: usize = std::mem::replace(&mut self.tags, keep)
            .values()
            .map(Vec::len)
            .sum();
        self.len -= removed;
        removed
    }

    /// Tags with offsets in `[start, end)`, in order.
    pub fn range(&self, start: u64, end: u64) -> impl Iterator<Item = &Tag> {
        let bounds = if start < end { start..end } else { start..start };
        self.tags.range(bounds).flat_map(|(_, at_offset)| at_offset.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_within_offset() {
        let mut index = TagIndex::new();
        index.insert(Tag::new(5, "b", 1u64));
        index.insert(Tag::new(2, "a", 0u64));
        index.insert(Tag::new(5, "c", 2u64));
        let keys: Vec<_> = index.range(0, 10).map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_equality_ignores_deletion_marks() {
        let mut a = Tag::new(1, "k", "v");
        let b = a.clone();
        a.marked_deleted.push(7);
        assert_eq!(a, b);
        assert_ne!(a, Tag::new(1, "k", "w"));
    }

    #[test]
    fn test_mark_deleted_is_per_consumer() {
        let mut index = TagIndex::new();
        let tag = Tag::new(3, "burst", true);
        index.insert(tag.clone());
        assert!(index.mark_deleted(&tag, 1));
        assert!(index.mark_deleted(&tag, 1));
        let stored = index.range(3, 4).next().unwrap();
        assert!(stored.is_deleted_for(1));
        assert!(!stored.is_deleted_for(2));
        assert_eq!(stored.marked_deleted.len(), 1);
        assert!(!index.mark_deleted(&Tag::new(4, "burst", true), 1));
    }

    #[test]
    fn test_mark_deleted_covers_duplicates() {
        let mut index = TagIndex::new();
        let tag = Tag::new(1, "burst", true);
        index.insert(tag.clone());
        index.insert(Tag::new(1, "burst", false));
        index.insert(tag.clone());

        assert!(index.mark_deleted(&tag, 7));
        let hidden: Vec<_> = index.range(0, 4).map(|t| t.is_deleted_for(7)).collect();
        assert_eq!(hidden, vec![true, false, true]);
    }

    #[test]
    fn test_numeric_values_convert() {
        assert_eq!(TagValue::from(48_000i32).to_f64(), Some(48_000.0));
        assert_eq!(TagValue::from(7i64).to_u64(), Some(7));
        assert_eq!(TagValue::from(-1i64).to_u64(), None);
        assert_eq!(TagValue::from(2.5f64).to_u64(), None);
        assert_eq!(TagValue::from("sob").symbol(), Some("sob"));
        assert_eq!(TagValue::from(()).flag(), None);
    }

    #[test]
    fn test_display() {
        let value = TagValue::from(vec![
            TagValue::from("burst"),
            TagValue::from(12u64),
            TagValue::from(vec![1u8, 2, 3]),
        ]);
        assert_eq!(value.to_string(), "('burst 12u <3 bytes>)");
    }

    #[test]
    fn test_prune_threshold() {
        let mut index = TagIndex::new();
        for offset in [0, 10, 20, 30] {
            index.insert(Tag::new(offset, "t", offset));
        }
        // offset + 2 + 16 < 38 holds for 0 and 10 only
        assert_eq!(index.prune(38, 2, 16), 2);
        let left: Vec<_> = index.range(0, 100).map(|t| t.offset).collect();
        assert_eq!(left, vec![20, 30]);
        assert_eq!(index.prune(10, 2, 16), 0);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_empty_range() {
        let mut index = TagIndex::new();
        index.insert(Tag::new(3, "t", 0u64));
        assert_eq!(index.range(5, 2).count(), 0);
    }
}
