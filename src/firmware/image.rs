//! `Segment`/`FirmwareImage`: the representation every firmware loader
//! produces and every flasher consumes.

use crate::error::{CoreError, CoreResult};

/// A contiguous run of bytes destined for `address`. Invariants upheld by
/// every loader (and checked by [`FirmwareImage::new`]): `data` is
/// non-empty, segments are sorted by address, and no two segments overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub address: u32,
    pub data: Vec<u8>,
}

impl Segment {
    pub fn new(address: u32, data: Vec<u8>) -> Self {
        Self { address, data }
    }

    pub fn end(&self) -> u64 {
        self.address as u64 + self.data.len() as u64
    }
}

/// An immutable, validated firmware image: the common currency between
/// loaders and flashers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    pub segments: Vec<Segment>,
    pub total_size: u64,
    pub target_name: Option<String>,
    pub target_alt: Option<u8>,
}

impl FirmwareImage {
    /// Build and validate an image from already-coalesced segments.
    pub fn new(mut segments: Vec<Segment>) -> CoreResult<Self> {
        segments.sort_by_key(|s| s.address);

        for seg in &segments {
            if seg.data.is_empty() {
                return Err(CoreError::ParseError {
                    reason: format!("empty segment at address 0x{:08X}", seg.address),
                });
            }
        }
        for pair in segments.windows(2) {
            if pair[0].end() > pair[1].address as u64 {
                return Err(CoreError::ParseError {
                    reason: format!(
                        "overlapping segments at 0x{:08X} and 0x{:08X}",
                        pair[0].address, pair[1].address
                    ),
                });
            }
        }

        let total_size = segments.iter().map(|s| s.data.len() as u64).sum();
        Ok(Self {
            segments,
            total_size,
            target_name: None,
            target_alt: None,
        })
    }

    pub fn with_target(mut self, name: Option<String>, alt: Option<u8>) -> Self {
        self.target_name = name;
        self.target_alt = alt;
        self
    }

    /// Lowest address covered by this image, if any segment exists.
    pub fn base_address(&self) -> Option<u32> {
        self.segments.first().map(|s| s.address)
    }

    /// One-past-the-end of the highest address covered by this image.
    pub fn end_address(&self) -> Option<u64> {
        self.segments.last().map(|s| s.end())
    }
}

/// Gaps smaller than this are filled with `0xFF` and folded into a single
/// segment; gaps at or above it are kept as distinct segments, since
/// bridging them would mean writing megabytes of filler.
const MERGE_GAP_THRESHOLD: u64 = 64 * 1024;

/// Order segments by address and merge overlapping or closely-spaced ones,
/// filling gaps below [`MERGE_GAP_THRESHOLD`] with the erased-flash value
/// `0xFF`. Gaps at or above the threshold remain as separate segments.
pub fn merge_segments(mut segments: Vec<Segment>) -> Vec<Segment> {
    if segments.is_empty() {
        return segments;
    }
    segments.sort_by_key(|s| s.address);

    let mut merged: Vec<Segment> = Vec::with_capacity(segments.len());
    for seg in segments {
        match merged.last_mut() {
            Some(prev) => {
                let gap = seg.address as u64 - prev.end();
                if (seg.address as u64) <= prev.end() {
                    // Overlapping or contiguous: append the non-overlapping tail.
                    let overlap = (prev.end() - seg.address as u64) as usize;
                    if overlap < seg.data.len() {
                        prev.data.extend_from_slice(&seg.data[overlap..]);
                    }
                } else if gap < MERGE_GAP_THRESHOLD {
                    prev.data.resize(prev.data.len() + gap as usize, 0xFF);
                    prev.data.extend_from_slice(&seg.data);
                } else {
                    merged.push(seg);
                }
            }
            None => merged.push(seg),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_empty_segment() {
        let result = FirmwareImage::new(vec![Segment::new(0x0800_0000, vec![])]);
        assert!(result.is_err());
    }

    #[test]
    fn new_rejects_overlapping_segments() {
        let result = FirmwareImage::new(vec![
            Segment::new(0x0800_0000, vec![0; 16]),
            Segment::new(0x0800_0008, vec![0; 16]),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn total_size_sums_segment_lengths() {
        let image = FirmwareImage::new(vec![
            Segment::new(0x0800_0000, vec![0; 16]),
            Segment::new(0x0801_0000, vec![0; 32]),
        ])
        .unwrap();
        assert_eq!(image.total_size, 48);
    }

    #[test]
    fn merge_segments_fills_small_gap_with_erased_value() {
        let segments = vec![
            Segment::new(0x0800_0000, vec![0xAA; 16]),
            Segment::new(0x0800_0020, vec![0xBB; 16]), // 16-byte gap
        ];
        let merged = merge_segments(segments);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].data.len(), 16 + 16 + 16);
        assert!(merged[0].data[16..32].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn merge_segments_keeps_large_gap_separate() {
        let segments = vec![
            Segment::new(0x0800_0000, vec![0xAA; 16]),
            Segment::new(0x0800_0000 + 128 * 1024, vec![0xBB; 16]),
        ];
        let merged = merge_segments(segments);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn merge_segments_coalesces_contiguous_records() {
        // HEX merging scenario: two adjacent 16-byte records become one segment.
        let segments = vec![
            Segment::new(0x0800_0000, vec![0xAA; 16]),
            Segment::new(0x0800_0010, vec![0xBB; 16]),
        ];
        let merged = merge_segments(segments);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].address, 0x0800_0000);
        assert_eq!(merged[0].data.len(), 32);
        assert!(merged[0].data[..16].iter().all(|&b| b == 0xAA));
        assert!(merged[0].data[16..].iter().all(|&b| b == 0xBB));
    }
}
