use crate::{decoder::Element, tags};

use byteorder::{ByteOrder, LittleEndian};
use dicom::core::VR;
use dicom_dictionary_std::tags::{
    BITS_ALLOCATED, COLUMNS, INSTANCE_NUMBER, PIXEL_REPRESENTATION, ROWS, WINDOW_CENTER,
    WINDOW_WIDTH,
};
use std::collections::BTreeMap;

/// Typed view of the whitelisted attributes of one slice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageMetadata {
    pub rows: Option<u32>,
    pub columns: Option<u32>,
    pub bits_allocated: Option<u16>,
    pub pixel_representation: Option<u16>,
    pub window_center: Option<f64>,
    pub window_width: Option<f64>,
    pub instance_number: Option<i64>,
    /// Display strings of every whitelisted attribute that was found.
    pub entries: BTreeMap<String, String>,
}

impl ImageMetadata {
    pub fn interpret(&mut self, element: &Element, buffer: &[u8]) {
        let Some(name) = tags::tag_name(element.tag) else {
            return;
        };
        if tags::is_pixel_data(element.tag) {
            self.entries
                .insert(name.to_string(), format!("{} bytes", element.length));
            return;
        }

        let Some(number) = read_number(element.value(buffer), element.vr()) else {
            return;
        };
        self.entries.insert(name.to_string(), number.to_string());

        let tag = element.tag;
        if tag == ROWS {
            self.rows = Some(number as u32);
        } else if tag == COLUMNS {
            self.columns = Some(number as u32);
        } else if tag == BITS_ALLOCATED {
            self.bits_allocated = Some(number as u16);
        } else if tag == PIXEL_REPRESENTATION {
            self.pixel_representation = Some(number as u16);
        } else if tag == WINDOW_CENTER {
            self.window_center = Some(number);
        } else if tag == WINDOW_WIDTH {
            self.window_width = Some(number);
        } else if tag == INSTANCE_NUMBER {
            self.instance_number = Some(number as i64);
        }
    }

    /// Rows times columns, when both are known and non-zero.
    pub fn pixel_count(&self) -> Option<usize> {
        match (self.rows, self.columns) {
            (Some(rows), Some(columns)) if rows > 0 && columns > 0 => {
                Some(rows as usize * columns as usize)
            }
            _ => None,
        }
    }
}

/// Reads a numeric value stored either as a binary integer/float or as a
/// backslash separated ASCII string.
///
/// For strings the first token that parses is used, the rest is ignored.
pub fn read_number(value: &[u8], vr: Option<VR>) -> Option<f64> {
    match vr {
        Some(VR::US | VR::SS | VR::UL | VR::SL | VR::FL | VR::FD) => read_binary(value, vr),
        Some(VR::OB | VR::OW | VR::UN) | None => {
            if looks_textual(value) {
                read_text(value)
            } else {
                read_binary(value, vr)
            }
        }
        // Some writers store binary integers under IS/DS.
        Some(_) => read_text(value).or_else(|| match value.len() {
            2 | 4 => read_binary(value, vr),
            _ => None,
        }),
    }
}

fn read_binary(value: &[u8], vr: Option<VR>) -> Option<f64> {
    let number = match (value.len(), vr) {
        (2, Some(VR::SS)) => LittleEndian::read_i16(value) as f64,
        (2, _) => LittleEndian::read_u16(value) as f64,
        (4, Some(VR::UL)) => LittleEndian::read_u32(value) as f64,
        (4, Some(VR::FL)) => LittleEndian::read_f32(value) as f64,
        (4, _) => LittleEndian::read_i32(value) as f64,
        (8, Some(VR::FD)) => LittleEndian::read_f64(value),
        _ => return None,
    };
    number.is_finite().then_some(number)
}

fn read_text(value: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(value).ok()?;
    text.split('\\')
        .map(|token| token.trim_matches(|c: char| c.is_whitespace() || c == '\0'))
        .find_map(|token| token.parse::<f64>().ok().filter(|n| n.is_finite()))
}

fn looks_textual(value: &[u8]) -> bool {
    !value.is_empty()
        && value.iter().any(u8::is_ascii_digit)
        && value.iter().all(|&b| {
            b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E' | b'\\' | b' ' | 0)
        })
}
