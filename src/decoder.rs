use crate::{
    enums::RecoveryPolicy,
    metadata,
    slice::Samples,
    tags::{self, ITEM_GROUP, MAGIC, PREAMBLE_LEN, SEQUENCE_DELIMITER},
};

use byteorder::{ByteOrder, LittleEndian};
use dicom::core::{Tag, VR};
use dicom_dictionary_std::tags::{BITS_ALLOCATED, PIXEL_REPRESENTATION};
use thiserror::Error;
use tracing::debug;

const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;
const ITEM: u16 = 0xE000;

/// Stride used to step over bytes that could not be read as a header.
const SKIP_STRIDE: usize = 2;

/// Problems the decoder recovered from. None of them abort a batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Diagnostic {
    #[error("element {tag} at offset {offset} declares {length} bytes but only {remaining} remain")]
    MalformedElement {
        tag: Tag,
        offset: usize,
        length: usize,
        remaining: usize,
    },

    #[error("unsupported encoding for {tag} at offset {offset}: {reason}")]
    UnsupportedEncoding {
        tag: Tag,
        offset: usize,
        reason: &'static str,
    },

    #[error("{samples} samples do not fit {rows}x{columns}, using {derived_rows}x{derived_columns}")]
    DimensionMismatch {
        rows: u32,
        columns: u32,
        samples: usize,
        derived_rows: u32,
        derived_columns: u32,
    },
}

/// One decoded data element. Only the pixel data element owns its value,
/// every other element points back into the source buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: Tag,
    /// `None` when the element was read as implicit VR.
    pub vr: Option<[u8; 2]>,
    pub length: usize,
    pub offset: usize,
    pub pixels: Option<Samples>,
}

impl Element {
    pub fn vr(&self) -> Option<VR> {
        self.vr.and_then(VR::from_binary)
    }

    pub fn value<'a>(&self, buffer: &'a [u8]) -> &'a [u8] {
        buffer
            .get(self.offset..self.offset + self.length)
            .unwrap_or_default()
    }
}

enum Step {
    Element(Element),
    Skip,
    End,
}

/// Streaming decoder over one explicit VR little endian buffer.
///
/// Iterating yields the top-level elements in stream order. Elements nested
/// in sequences are traversed but not yielded.
pub struct Decoder<'a> {
    buffer: &'a [u8],
    position: usize,
    policy: RecoveryPolicy,
    depth: usize,
    last_group: u16,
    consumed: usize,
    bits_allocated: Option<u16>,
    pixel_representation: Option<u16>,
    diagnostics: Vec<Diagnostic>,
    done: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(buffer: &'a [u8], policy: RecoveryPolicy) -> Self {
        let start = Self::data_start(buffer);
        Self {
            buffer,
            position: start,
            policy,
            depth: 0,
            last_group: 0,
            consumed: start,
            bits_allocated: None,
            pixel_representation: None,
            diagnostics: Vec::new(),
            done: false,
        }
    }

    /// Offset of the first element: past the preamble and magic if present.
    pub fn data_start(buffer: &[u8]) -> usize {
        let magic_end = PREAMBLE_LEN + MAGIC.len();
        if buffer.get(PREAMBLE_LEN..magic_end) == Some(MAGIC.as_slice()) {
            magic_end
        } else {
            0
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// End offset of the last element that decoded cleanly.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    fn u16_at(&self, offset: usize) -> Option<u16> {
        self.buffer
            .get(offset..offset + 2)
            .map(LittleEndian::read_u16)
    }

    fn u32_at(&self, offset: usize) -> Option<u32> {
        self.buffer
            .get(offset..offset + 4)
            .map(LittleEndian::read_u32)
    }

    fn step(&mut self) -> Step {
        let start = self.position;
        if start >= self.buffer.len() {
            return Step::End;
        }
        match self.read_element(start) {
            Some(step) => step,
            // A header field ran off the end of the buffer.
            None if self.policy.resyncs() && start + SKIP_STRIDE < self.buffer.len() => {
                self.position = start + SKIP_STRIDE;
                Step::Skip
            }
            None => Step::End,
        }
    }

    fn read_element(&mut self, start: usize) -> Option<Step> {
        let tag = Tag(self.u16_at(start)?, self.u16_at(start + 2)?);

        if tag.group() == ITEM_GROUP {
            return self.read_item(start, tag);
        }

        let code = [*self.buffer.get(start + 4)?, *self.buffer.get(start + 5)?];
        let (vr, length, value_offset) = match VR::from_binary(code) {
            Some(vr) if has_long_length(vr) => {
                let (length, value_offset) = self.long_length(start, tag)?;
                (Some(code), length, value_offset)
            }
            Some(_) => (Some(code), self.u16_at(start + 6)? as u32, start + 8),
            None => {
                debug!(%tag, offset = start, "unrecognized VR, reading as implicit");
                self.diagnostics.push(Diagnostic::UnsupportedEncoding {
                    tag,
                    offset: start,
                    reason: "unrecognized value representation",
                });
                (None, self.u32_at(start + 4)?, start + 8)
            }
        };

        if length == UNDEFINED_LENGTH {
            if tags::is_pixel_data(tag) {
                self.diagnostics.push(Diagnostic::UnsupportedEncoding {
                    tag,
                    offset: start,
                    reason: "encapsulated pixel data",
                });
                return Some(Step::End);
            }
            // Undefined length sequence: descend, the delimiter brings us back.
            self.depth += 1;
            self.position = value_offset;
            return Some(Step::Skip);
        }

        let length = length as usize;
        let end = value_offset + length;
        if end > self.buffer.len() {
            return Some(self.malformed(start, tag, length, value_offset));
        }

        self.position = end;
        let unpadded = matches!(vr.and_then(VR::from_binary), Some(VR::SQ) | Some(VR::UT));
        if length % 2 == 1 && !unpadded && self.position < self.buffer.len() {
            self.position += 1;
        }

        if self.depth > 0 {
            return Some(Step::Skip);
        }

        self.last_group = tag.group();
        self.consumed = self.position;

        let mut element = Element {
            tag,
            vr,
            length,
            offset: value_offset,
            pixels: None,
        };
        self.observe(&mut element);
        Some(Step::Element(element))
    }

    /// Items and delimiters carry no VR, only a 4-byte length.
    fn read_item(&mut self, start: usize, tag: Tag) -> Option<Step> {
        let length = self.u32_at(start + 4)?;
        self.position = start + 8;

        if tag == SEQUENCE_DELIMITER {
            self.depth = self.depth.saturating_sub(1);
        } else if tag.element() == ITEM && length != UNDEFINED_LENGTH {
            let end = self.position + length as usize;
            if end > self.buffer.len() {
                return Some(self.malformed(start, tag, length as usize, self.position));
            }
            self.position = end;
        }
        Some(Step::Skip)
    }

    /// Length of a 4-byte-length VR and the offset its value starts at.
    ///
    /// The standard layout is two reserved bytes followed by the length.
    /// Some writers omit the reserved bytes, others interleave a group length
    /// before the real length.
    fn long_length(&self, start: usize, tag: Tag) -> Option<(u32, usize)> {
        let reserved = self.u16_at(start + 6)?;
        if reserved != 0 && self.policy.resyncs() {
            return Some((self.u32_at(start + 6)?, start + 10));
        }

        let length = self.u32_at(start + 8)?;
        let fits = |length: u32, offset: usize| offset + length as usize <= self.buffer.len();
        if length != UNDEFINED_LENGTH && !fits(length, start + 12) && self.policy.resyncs() {
            if let Some(inner) = self.u32_at(start + 12) {
                if inner == UNDEFINED_LENGTH || fits(inner, start + 16) {
                    debug!(%tag, offset = start, group_length = length, "skipping interleaved group length");
                    return Some((inner, start + 16));
                }
            }
        }
        Some((length, start + 12))
    }

    fn malformed(&mut self, start: usize, tag: Tag, length: usize, value_offset: usize) -> Step {
        let remaining = self.buffer.len().saturating_sub(value_offset);
        debug!(%tag, offset = start, length, remaining, "element overruns buffer");
        self.diagnostics.push(Diagnostic::MalformedElement {
            tag,
            offset: start,
            length,
            remaining,
        });
        if self.policy.resyncs() {
            self.resync(start)
        } else {
            Step::End
        }
    }

    /// Scans forward for the next position that plausibly starts an element.
    fn resync(&mut self, start: usize) -> Step {
        let mut candidate = start + SKIP_STRIDE;
        while candidate + 8 <= self.buffer.len() {
            let group = LittleEndian::read_u16(&self.buffer[candidate..]);
            let code = [self.buffer[candidate + 4], self.buffer[candidate + 5]];
            let plausible_group = group == 0x0002 || group >= 0x0008;
            if plausible_group && group >= self.last_group && VR::from_binary(code).is_some() {
                debug!(from = start, to = candidate, "resynchronized");
                self.position = candidate;
                return Step::Skip;
            }
            candidate += SKIP_STRIDE;
        }
        Step::End
    }

    /// Tracks the attributes that decide how pixel data is materialized.
    fn observe(&mut self, element: &mut Element) {
        let value = element.value(self.buffer);
        if element.tag == BITS_ALLOCATED {
            self.bits_allocated = metadata::read_number(value, element.vr()).map(|n| n as u16);
        } else if element.tag == PIXEL_REPRESENTATION {
            self.pixel_representation =
                metadata::read_number(value, element.vr()).map(|n| n as u16);
        } else if tags::is_pixel_data(element.tag) {
            let signed = self.pixel_representation == Some(1);
            let bits = self.bits_allocated.unwrap_or(8);
            element.pixels = Some(Samples::from_bytes(value, bits, signed));
        }
    }
}

impl Iterator for Decoder<'_> {
    type Item = Element;

    fn next(&mut self) -> Option<Element> {
        while !self.done {
            match self.step() {
                Step::Element(element) => return Some(element),
                Step::Skip => continue,
                Step::End => self.done = true,
            }
        }
        None
    }
}

fn has_long_length(vr: VR) -> bool {
    matches!(
        vr,
        VR::OB
            | VR::OW
            | VR::OF
            | VR::OD
            | VR::OL
            | VR::OV
            | VR::SQ
            | VR::SV
            | VR::UT
            | VR::UC
            | VR::UR
            | VR::UN
            | VR::UV
    )
}
