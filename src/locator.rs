//! Fallback search for pixel data in buffers the decoder could not make
//! sense of.

use crate::{decoder::Decoder, enums::RecoveryPolicy, metadata::ImageMetadata, slice::Samples};

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

const PIXEL_DATA_TAG: [u8; 4] = [0xE0, 0x7F, 0x10, 0x00];
const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;

/// Bytes inspected by the bit depth guess.
const GUESS_WINDOW: usize = 1000;

/// Acquisition sizes tried first when re-deriving dimensions, as
/// (rows, columns).
const COMMON_SIZES: [(u32, u32); 13] = [
    (512, 512),
    (256, 256),
    (1024, 1024),
    (128, 128),
    (2048, 2048),
    (256, 512),
    (512, 256),
    (512, 1024),
    (1024, 512),
    (480, 640),
    (640, 480),
    (768, 1024),
    (1024, 768),
];

pub struct PixelDataLocator<'a> {
    buffer: &'a [u8],
    metadata: &'a ImageMetadata,
    nominal_header: usize,
    policy: RecoveryPolicy,
}

impl<'a> PixelDataLocator<'a> {
    /// `nominal_header` is where regular decoding stopped making progress.
    pub fn new(
        buffer: &'a [u8],
        metadata: &'a ImageMetadata,
        nominal_header: usize,
        policy: RecoveryPolicy,
    ) -> Self {
        Self {
            buffer,
            metadata,
            nominal_header,
            policy,
        }
    }

    pub fn locate(&self) -> Option<Samples> {
        let region = self
            .scan_for_tag()
            .or_else(|| self.sized_region())
            .or_else(|| self.whole_buffer())
            .filter(|region| !region.is_empty())?;

        let bits = match self.metadata.bits_allocated {
            Some(bits) => bits,
            None if self.policy.guesses() => guess_bits_allocated(region),
            None => 8,
        };
        let signed = self.metadata.pixel_representation == Some(1);
        let samples = Samples::from_bytes(region, bits, signed);
        (!samples.is_empty()).then_some(samples)
    }

    /// Looks for the literal pixel data tag, latest occurrence first.
    fn scan_for_tag(&self) -> Option<&'a [u8]> {
        let buffer = self.buffer;
        let candidates: Vec<usize> = buffer
            .windows(PIXEL_DATA_TAG.len())
            .enumerate()
            .filter(|(_, window)| **window == PIXEL_DATA_TAG)
            .map(|(offset, _)| offset)
            .collect();

        candidates.into_iter().rev().find_map(|offset| {
            let (length, data) = self.tag_layout(offset)?;
            if length == UNDEFINED_LENGTH {
                return None;
            }
            let available = buffer.len().checked_sub(data)?;
            let take = (length as usize).min(available);
            debug!(offset, length, take, "found pixel data tag");
            (take > 0).then(|| &buffer[data..data + take])
        })
    }

    /// Length and value offset of a pixel data element found by scanning.
    ///
    /// A zero 16-bit length after an explicit VR means the real length is a
    /// 4-byte field after two padding bytes.
    fn tag_layout(&self, offset: usize) -> Option<(u32, usize)> {
        let read_u16 = |at: usize| self.buffer.get(at..at + 2).map(LittleEndian::read_u16);
        let read_u32 = |at: usize| self.buffer.get(at..at + 4).map(LittleEndian::read_u32);

        let code = self.buffer.get(offset + 4..offset + 6)?;
        if code.iter().all(u8::is_ascii_uppercase) {
            match read_u16(offset + 6)? {
                0 => Some((read_u32(offset + 8)?, offset + 12)),
                short => Some((short as u32, offset + 8)),
            }
        } else {
            Some((read_u32(offset + 4)?, offset + 8))
        }
    }

    fn expected_bytes(&self) -> Option<usize> {
        let bytes_per_sample = match self.metadata.bits_allocated {
            Some(16) => 2,
            _ => 1,
        };
        self.metadata
            .pixel_count()
            .map(|count| count * bytes_per_sample)
    }

    /// A region of the expected size, right after the header or ending at
    /// the end of the buffer.
    fn sized_region(&self) -> Option<&'a [u8]> {
        let expected = self.expected_bytes()?;
        let buffer = self.buffer;
        if self.nominal_header + expected <= buffer.len() {
            debug!(offset = self.nominal_header, expected, "pixel data after header");
            return Some(&buffer[self.nominal_header..self.nominal_header + expected]);
        }
        let offset = buffer.len().checked_sub(expected)?;
        debug!(offset, expected, "pixel data before end of buffer");
        Some(&buffer[offset..])
    }

    fn whole_buffer(&self) -> Option<&'a [u8]> {
        let buffer = self.buffer;
        match self.expected_bytes() {
            Some(expected) if buffer.len().abs_diff(expected) <= expected / 2 => Some(buffer),
            None if self.policy.guesses() => Some(&buffer[Decoder::data_start(buffer)..]),
            _ => None,
        }
    }
}

/// Guesses 16-bit data when any of the leading words exceeds 8 bits.
///
/// Bright 8-bit images read as words trip this too, so the guess is only
/// made under [`RecoveryPolicy::Heuristic`].
pub fn guess_bits_allocated(region: &[u8]) -> u16 {
    let window = &region[..region.len().min(GUESS_WINDOW)];
    let wide = window
        .chunks_exact(2)
        .any(|word| LittleEndian::read_u16(word) > 255);
    if wide { 16 } else { 8 }
}

/// Picks (rows, columns) whose product is exactly `count`.
pub fn derive_dimensions(count: usize) -> Option<(u32, u32)> {
    if count == 0 {
        return None;
    }
    if let Some(&size) = COMMON_SIZES
        .iter()
        .find(|(rows, columns)| *rows as usize * *columns as usize == count)
    {
        return Some(size);
    }
    let root = count.isqrt();
    let factor = (1..=root).rev().find(|f| count % f == 0)?;
    Some((u32::try_from(factor).ok()?, u32::try_from(count / factor).ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(rows: u32, columns: u32, bits: Option<u16>) -> ImageMetadata {
        ImageMetadata {
            rows: Some(rows),
            columns: Some(columns),
            bits_allocated: bits,
            ..Default::default()
        }
    }

    #[test]
    fn derives_common_square_and_factored_sizes() {
        assert_eq!(derive_dimensions(512 * 512), Some((512, 512)));
        assert_eq!(derive_dimensions(640 * 480), Some((480, 640)));
        assert_eq!(derive_dimensions(81), Some((9, 9)));
        assert_eq!(derive_dimensions(12), Some((3, 4)));
        assert_eq!(derive_dimensions(13), Some((1, 13)));
        assert_eq!(derive_dimensions(0), None);
    }

    #[test]
    fn finds_tag_with_zero_length_sentinel() {
        let mut buffer = vec![0x11u8; 40];
        buffer.extend_from_slice(&PIXEL_DATA_TAG);
        buffer.extend_from_slice(b"OW");
        buffer.extend_from_slice(&[0, 0]);
        buffer.extend_from_slice(&4u32.to_le_bytes());
        buffer.extend_from_slice(&[1, 2, 3, 4]);

        let metadata = metadata(2, 2, None);
        let samples = PixelDataLocator::new(&buffer, &metadata, 0, RecoveryPolicy::Tolerant)
            .locate()
            .unwrap();
        assert_eq!(samples, Samples::U8(vec![1, 2, 3, 4]));
    }

    #[test]
    fn clamps_overlong_tag_length() {
        let mut buffer = PIXEL_DATA_TAG.to_vec();
        buffer.extend_from_slice(&1000u32.to_le_bytes());
        buffer.extend_from_slice(&[5, 6, 7]);

        let metadata = ImageMetadata::default();
        let samples = PixelDataLocator::new(&buffer, &metadata, 0, RecoveryPolicy::Tolerant)
            .locate()
            .unwrap();
        assert_eq!(samples, Samples::U8(vec![5, 6, 7]));
    }

    #[test]
    fn falls_back_to_region_sized_from_dimensions() {
        let mut buffer = vec![0xAAu8; 10];
        buffer.extend((0..16u8).collect::<Vec<_>>());

        let metadata = metadata(4, 4, Some(8));
        let samples = PixelDataLocator::new(&buffer, &metadata, 10, RecoveryPolicy::Tolerant)
            .locate()
            .unwrap();
        assert_eq!(samples, Samples::U8((0..16).collect()));
    }

    #[test]
    fn region_from_end_when_header_leaves_no_room() {
        let mut buffer = vec![0xAAu8; 10];
        buffer.extend([1u8; 16]);

        let metadata = metadata(4, 4, Some(8));
        let samples = PixelDataLocator::new(&buffer, &metadata, 20, RecoveryPolicy::Tolerant)
            .locate()
            .unwrap();
        assert_eq!(samples, Samples::U8(vec![1; 16]));
    }

    #[test]
    fn guesses_bit_depth_only_when_asked() {
        assert_eq!(guess_bits_allocated(&[0x00, 0x01, 0x10, 0x00]), 16);
        assert_eq!(guess_bits_allocated(&[0xFF, 0x00, 0x10, 0x00]), 8);

        let buffer: Vec<u8> = [300u16; 8].iter().flat_map(|v| v.to_le_bytes()).collect();
        let metadata = ImageMetadata::default();
        let tolerant = PixelDataLocator::new(&buffer, &metadata, 0, RecoveryPolicy::Tolerant);
        assert_eq!(tolerant.locate(), None);
        let heuristic = PixelDataLocator::new(&buffer, &metadata, 0, RecoveryPolicy::Heuristic);
        assert_eq!(heuristic.locate(), Some(Samples::U16(vec![300; 8])));
    }
}
