//! Layout calculator
//!
//! Maps a logical byte range of a virtual object onto the backing objects
//! that hold it. Everything here is pure: no I/O and no state beyond the
//! [`StripingLayout`] passed in.
//!
//! ```text
//! layout: stripe_unit = 4K, stripe_count = 2, object_size = 8K
//!
//! logical   0      4K     8K     12K    16K    20K
//!           |  s0  |  s1  |  s2  |  s3  |  s4  | ...
//!              │      │      │      │      │
//!              ▼      ▼      ▼      ▼      ▼
//! disk.0000000000000000  [s0][s2]            (set 0, stripe 0)
//! disk.0000000000000001  [s1][s3]            (set 0, stripe 1)
//! disk.0000000000000002  [s4]...             (set 1, stripe 0)
//! ```

use crate::error::{StriperError, StriperResult};
use objectio_common::StripingLayout;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

/// Reference to one backing object of a virtual object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    /// Object set (generation) index
    pub object_set: u64,
    /// Position of the object within its set
    pub stripe_index: u64,
}

impl ObjectRef {
    /// Create a backing object reference
    #[must_use]
    pub const fn new(object_set: u64, stripe_index: u64) -> Self {
        Self {
            object_set,
            stripe_index,
        }
    }

    /// The first backing object of an object set
    #[must_use]
    pub const fn anchor(object_set: u64) -> Self {
        Self::new(object_set, 0)
    }

    /// Whether this is the first backing object of its set
    #[must_use]
    pub const fn is_anchor(&self) -> bool {
        self.stripe_index == 0
    }

    /// Sequential object number across all object sets
    #[must_use]
    pub const fn object_no(&self, layout: &StripingLayout) -> u64 {
        self.object_set * layout.stripe_count() + self.stripe_index
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "set {}/stripe {}", self.object_set, self.stripe_index)
    }
}

/// Name of a backing object in the store
///
/// `{name}.{object_no:016x}`. The fixed-width suffix keeps names of
/// different virtual objects from colliding.
#[must_use]
pub fn object_name(name: &str, object: ObjectRef, layout: &StripingLayout) -> String {
    format!("{}.{:016x}", name, object.object_no(layout))
}

/// A slice of a logical range held by one backing object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment {
    /// Backing object holding the bytes
    pub object: ObjectRef,
    /// Byte offset within the backing object
    pub local_offset: u64,
    /// Number of bytes
    pub length: u64,
    /// Offset of these bytes within the caller's buffer
    pub buffer_offset: u64,
    /// Logical offset of the first byte
    pub logical_offset: u64,
}

/// Split `[offset, offset + length)` into per-stripe segments
///
/// Segments come back in ascending logical order, one per stripe touched,
/// without coalescing. A zero length yields no segments.
///
/// # Errors
/// `InvalidArgument` if `offset + length` overflows.
pub fn compute_segments(
    layout: &StripingLayout,
    offset: u64,
    length: u64,
) -> StriperResult<Vec<Segment>> {
    let end = offset.checked_add(length).ok_or_else(|| {
        StriperError::invalid_argument(format!(
            "range offset {offset} + length {length} overflows"
        ))
    })?;

    let stripe_unit = layout.stripe_unit();
    let stripe_count = layout.stripe_count();
    let stripes_per_set = layout.stripes_per_object() * stripe_count;

    let mut segments = Vec::new();
    let mut pos = offset;
    while pos < end {
        let stripe_no = pos / stripe_unit;
        let in_stripe = pos % stripe_unit;

        let object_set = stripe_no / stripes_per_set;
        let stripe_in_set = stripe_no % stripes_per_set;
        let round = stripe_in_set / stripe_count;

        let take = (stripe_unit - in_stripe).min(end - pos);
        segments.push(Segment {
            object: ObjectRef::new(object_set, stripe_in_set % stripe_count),
            local_offset: round * stripe_unit + in_stripe,
            length: take,
            buffer_offset: pos - offset,
            logical_offset: pos,
        });
        pos += take;
    }

    Ok(segments)
}

/// Part of a caller buffer that maps into an [`ObjectExtent`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferPiece {
    /// Offset within the caller's buffer
    pub buffer_offset: u64,
    /// Number of bytes
    pub length: u64,
}

/// Contiguous local range of one backing object, gathered from segments
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectExtent {
    /// Backing object
    pub object: ObjectRef,
    /// First local byte
    pub local_offset: u64,
    /// Total bytes
    pub length: u64,
    /// Caller buffer pieces, in local order
    pub pieces: Vec<BufferPiece>,
}

impl ObjectExtent {
    /// Copy this extent's bytes out of the caller buffer
    ///
    /// Borrows when the extent is a single piece.
    #[must_use]
    pub fn gather<'a>(&self, data: &'a [u8]) -> Cow<'a, [u8]> {
        if let [piece] = self.pieces.as_slice() {
            let start = piece.buffer_offset as usize;
            return Cow::Borrowed(&data[start..start + piece.length as usize]);
        }

        let mut out = Vec::with_capacity(self.length as usize);
        for piece in &self.pieces {
            let start = piece.buffer_offset as usize;
            out.extend_from_slice(&data[start..start + piece.length as usize]);
        }
        Cow::Owned(out)
    }

    /// Spread bytes read from the backing object into the caller buffer
    ///
    /// `local` may be shorter than the extent (short object); the missing
    /// tail is left untouched.
    pub fn scatter(&self, local: &[u8], dest: &mut [u8]) {
        let mut at = 0usize;
        for piece in &self.pieces {
            let len = piece.length as usize;
            let avail = local.len().saturating_sub(at).min(len);
            if avail > 0 {
                let start = piece.buffer_offset as usize;
                dest[start..start + avail].copy_from_slice(&local[at..at + avail]);
            }
            at += len;
        }
    }
}

/// Coalesce segments addressing the same backing object at contiguous
/// local offsets
///
/// For a contiguous logical range every backing object receives exactly one
/// contiguous local range, so this yields one extent per object, ordered by
/// first appearance.
#[must_use]
pub fn coalesce(segments: &[Segment]) -> Vec<ObjectExtent> {
    let mut extents: Vec<ObjectExtent> = Vec::new();
    let mut last_for_object: HashMap<ObjectRef, usize> = HashMap::new();

    for segment in segments {
        let piece = BufferPiece {
            buffer_offset: segment.buffer_offset,
            length: segment.length,
        };

        if let Some(&idx) = last_for_object.get(&segment.object) {
            let extent = &mut extents[idx];
            if extent.local_offset + extent.length == segment.local_offset {
                extent.length += segment.length;
                extent.pieces.push(piece);
                continue;
            }
        }

        last_for_object.insert(segment.object, extents.len());
        extents.push(ObjectExtent {
            object: segment.object,
            local_offset: segment.local_offset,
            length: segment.length,
            pieces: vec![piece],
        });
    }

    extents
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::HashSet;

    fn layout(su: u64, sc: u64, os: u64) -> StripingLayout {
        StripingLayout::new(su, sc, os).unwrap()
    }

    #[test]
    fn test_single_stripe() {
        let l = layout(4096, 2, 8192);
        let segs = compute_segments(&l, 100, 200).unwrap();
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].object, ObjectRef::new(0, 0));
        assert_eq!(segs[0].local_offset, 100);
        assert_eq!(segs[0].length, 200);
        assert_eq!(segs[0].buffer_offset, 0);
    }

    #[test]
    fn test_round_robin_and_object_sets() {
        let l = layout(4096, 2, 8192);
        let segs = compute_segments(&l, 0, 5 * 4096).unwrap();
        let placed: Vec<_> = segs
            .iter()
            .map(|s| (s.object.object_set, s.object.stripe_index, s.local_offset))
            .collect();
        assert_eq!(
            placed,
            vec![
                (0, 0, 0),
                (0, 1, 0),
                (0, 0, 4096),
                (0, 1, 4096),
                (1, 0, 0),
            ]
        );
    }

    #[test]
    fn test_unaligned_range() {
        let l = layout(4096, 2, 8192);
        // 4000..4200 straddles stripes 0 and 1
        let segs = compute_segments(&l, 4000, 200).unwrap();
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].object, ObjectRef::new(0, 0));
        assert_eq!(segs[0].local_offset, 4000);
        assert_eq!(segs[0].length, 96);
        assert_eq!(segs[1].object, ObjectRef::new(0, 1));
        assert_eq!(segs[1].local_offset, 0);
        assert_eq!(segs[1].length, 104);
        assert_eq!(segs[1].buffer_offset, 96);
    }

    #[test]
    fn test_empty_range() {
        let l = layout(4096, 2, 8192);
        assert!(compute_segments(&l, 12345, 0).unwrap().is_empty());
    }

    #[test]
    fn test_overflow_rejected() {
        let l = layout(4096, 2, 8192);
        let err = compute_segments(&l, u64::MAX - 10, 11).unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(compute_segments(&l, u64::MAX - 10, 10).is_ok());
    }

    #[test]
    fn test_object_name() {
        let l = layout(4096, 3, 8192);
        assert_eq!(object_name("disk", ObjectRef::new(0, 0), &l), "disk.0000000000000000");
        assert_eq!(object_name("disk", ObjectRef::new(2, 1), &l), "disk.0000000000000007");
    }

    #[test]
    fn test_object_names_do_not_collide() {
        let l = layout(4096, 4, 8192);
        let mut seen = HashSet::new();
        for name in ["a", "a.0000000000000000", "b", "ab"] {
            for set in 0..4 {
                for idx in 0..4 {
                    assert!(seen.insert(object_name(name, ObjectRef::new(set, idx), &l)));
                }
            }
        }
    }

    #[test]
    fn test_coalesce_one_extent_per_object() {
        let l = layout(4096, 2, 8192);
        let segs = compute_segments(&l, 1000, 3 * 4096).unwrap();
        let extents = coalesce(&segs);
        assert_eq!(extents.len(), 2);

        assert_eq!(extents[0].object, ObjectRef::new(0, 0));
        assert_eq!(extents[0].local_offset, 1000);
        assert_eq!(extents[0].length, 3096 + 4096);
        assert_eq!(extents[0].pieces.len(), 2);

        assert_eq!(extents[1].object, ObjectRef::new(0, 1));
        assert_eq!(extents[1].local_offset, 0);
        assert_eq!(extents[1].length, 4096 + 1000);
        assert_eq!(extents[1].pieces.len(), 2);
    }

    #[test]
    fn test_gather_scatter() {
        let l = layout(4, 2, 8);
        let data: Vec<u8> = (0..16).collect();
        let extents = coalesce(&compute_segments(&l, 0, 16).unwrap());
        assert_eq!(extents.len(), 2);
        assert_eq!(extents[0].gather(&data).as_ref(), &[0, 1, 2, 3, 8, 9, 10, 11]);
        assert_eq!(extents[1].gather(&data).as_ref(), &[4, 5, 6, 7, 12, 13, 14, 15]);

        let mut out = vec![0u8; 16];
        for extent in &extents {
            extent.scatter(&extent.gather(&data), &mut out);
        }
        assert_eq!(out, data);

        // Short backing object leaves the tail alone
        let mut out = vec![0xffu8; 16];
        extents[0].scatter(&[1, 2, 3, 4, 5], &mut out);
        assert_eq!(&out[0..4], &[1, 2, 3, 4]);
        assert_eq!(out[8], 5);
        assert_eq!(out[9], 0xff);
    }

    #[test]
    fn test_segments_cover_range_exactly() {
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let su = rng.gen_range(1..=64u64);
            let sc = rng.gen_range(1..=5u64);
            let os = su * rng.gen_range(1..=4u64);
            let l = layout(su, sc, os);

            let offset = rng.gen_range(0..2000u64);
            let length = rng.gen_range(0..1500u64);
            let segs = compute_segments(&l, offset, length).unwrap();

            let mut expected = offset;
            let mut local_ranges: HashMap<ObjectRef, Vec<(u64, u64)>> = HashMap::new();
            for seg in &segs {
                assert_eq!(seg.logical_offset, expected);
                assert_eq!(seg.buffer_offset, expected - offset);
                assert!(seg.length > 0 && seg.length <= su);
                assert!(seg.local_offset + seg.length <= os);
                assert!(seg.object.stripe_index < sc);
                local_ranges
                    .entry(seg.object)
                    .or_default()
                    .push((seg.local_offset, seg.local_offset + seg.length));
                expected += seg.length;
            }
            assert_eq!(expected, offset + length);

            // No two segments overlap inside a backing object
            for ranges in local_ranges.values_mut() {
                ranges.sort_unstable();
                for pair in ranges.windows(2) {
                    assert!(pair[0].1 <= pair[1].0);
                }
            }

            // One contiguous extent per backing object
            let extents = coalesce(&segs);
            assert_eq!(extents.len(), local_ranges.len());
        }
    }
}
