use crate::{
    decoder::{Decoder, Diagnostic},
    enums::RecoveryPolicy,
    locator::{self, PixelDataLocator},
    metadata::ImageMetadata,
};

use byteorder::{ByteOrder, LittleEndian};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Integer samples of one slice, as stored in the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    U8(Vec<u8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
}

impl Samples {
    /// Little endian samples; a trailing odd byte of 16-bit data is dropped.
    pub fn from_bytes(bytes: &[u8], bits_allocated: u16, signed: bool) -> Self {
        if bits_allocated != 16 {
            return Samples::U8(bytes.to_vec());
        }
        let even = &bytes[..bytes.len() - bytes.len() % 2];
        if signed {
            let mut out = vec![0i16; even.len() / 2];
            LittleEndian::read_i16_into(even, &mut out);
            Samples::I16(out)
        } else {
            let mut out = vec![0u16; even.len() / 2];
            LittleEndian::read_u16_into(even, &mut out);
            Samples::U16(out)
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Samples::U8(v) => v.len(),
            Samples::U16(v) => v.len(),
            Samples::I16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends exactly `count` values to `out`, zero padding on the right
    /// and ignoring surplus samples.
    pub fn write_padded(&self, out: &mut Vec<i32>, count: usize) {
        let start = out.len();
        match self {
            Samples::U8(v) => out.extend(v.iter().take(count).map(|&s| s as i32)),
            Samples::U16(v) => out.extend(v.iter().take(count).map(|&s| s as i32)),
            Samples::I16(v) => out.extend(v.iter().take(count).map(|&s| s as i32)),
        }
        out.resize(start + count, 0);
    }
}

#[derive(Debug, Error)]
pub enum SliceError {
    #[error("no usable pixel data in {source_id}")]
    NoPixelData { source_id: String },
}

/// Everything one source file contributes to a volume.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceRecord {
    pub source_id: String,
    pub samples: Samples,
    pub rows: u32,
    pub columns: u32,
    pub instance_number: Option<i64>,
    pub window: Option<(f64, f64)>,
    pub metadata: BTreeMap<String, String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl SliceRecord {
    /// Decodes one buffer, falling back to the pixel data locator when the
    /// policy allows and the stream itself yields no samples.
    pub fn parse(
        source_id: &str,
        buffer: &[u8],
        policy: RecoveryPolicy,
    ) -> Result<Self, SliceError> {
        let mut decoder = Decoder::new(buffer, policy);
        let mut metadata = ImageMetadata::default();
        let mut pixels = None;
        for element in decoder.by_ref() {
            metadata.interpret(&element, buffer);
            if let Some(samples) = element.pixels {
                pixels = Some(samples);
            }
        }
        let consumed = decoder.consumed();
        let mut diagnostics = decoder.into_diagnostics();

        let decoded = pixels.filter(|samples| !samples.is_empty());
        let (samples, recovered) = match decoded {
            Some(samples) => (samples, false),
            None if policy.uses_locator() => {
                debug!(source_id, "no pixel data decoded, scanning");
                let located = PixelDataLocator::new(buffer, &metadata, consumed, policy)
                    .locate()
                    .ok_or_else(|| SliceError::NoPixelData {
                        source_id: source_id.to_string(),
                    })?;
                (located, true)
            }
            None => {
                return Err(SliceError::NoPixelData {
                    source_id: source_id.to_string(),
                });
            }
        };

        let declared = (metadata.rows.unwrap_or(0), metadata.columns.unwrap_or(0));
        let (rows, columns) = match metadata.pixel_count() {
            Some(count) if count == samples.len() => declared,
            Some(_) if !recovered => declared,
            _ => {
                let (rows, columns) = locator::derive_dimensions(samples.len()).ok_or_else(|| {
                    SliceError::NoPixelData {
                        source_id: source_id.to_string(),
                    }
                })?;
                diagnostics.push(Diagnostic::DimensionMismatch {
                    rows: declared.0,
                    columns: declared.1,
                    samples: samples.len(),
                    derived_rows: rows,
                    derived_columns: columns,
                });
                (rows, columns)
            }
        };

        for diagnostic in &diagnostics {
            warn!(source_id, %diagnostic, "recovered");
        }

        let window = metadata.window_center.zip(metadata.window_width);
        Ok(Self {
            source_id: source_id.to_string(),
            samples,
            rows,
            columns,
            instance_number: metadata.instance_number,
            window,
            metadata: metadata.entries,
            diagnostics,
        })
    }

    pub fn pixel_count(&self) -> usize {
        self.rows as usize * self.columns as usize
    }
}
