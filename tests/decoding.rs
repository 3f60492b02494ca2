use dicom::core::Tag;
use dicom_volume_render::{Decoder, Diagnostic, RecoveryPolicy, Samples, SliceError, SliceRecord};
use pretty_assertions::assert_eq;

mod util;

use util::{long, short, us, with_preamble};

#[test]
fn well_formed_stream_yields_every_element() {
    let buffer = with_preamble(&[
        short(0x0008, 0x0060, b"CS", b"CT"),
        us(0x0010, 2),
        us(0x0011, 2),
        long(0x7FE0, 0x0010, b"OB", 4, &[1, 2, 3, 4]),
    ]);

    let mut decoder = Decoder::new(&buffer, RecoveryPolicy::Strict);
    let tags: Vec<Tag> = decoder.by_ref().map(|e| e.tag).collect();
    assert_eq!(
        tags,
        vec![
            Tag(0x0008, 0x0060),
            Tag(0x0028, 0x0010),
            Tag(0x0028, 0x0011),
            Tag(0x7FE0, 0x0010),
        ]
    );
    assert_eq!(decoder.position(), buffer.len());
    assert!(decoder.diagnostics().is_empty());
}

fn overrunning_stream() -> Vec<u8> {
    let mut name = short(0x0010, 0x0010, b"PN", &[]);
    name[6..8].copy_from_slice(&10_000u16.to_le_bytes());
    with_preamble(&[
        short(0x0008, 0x0060, b"CS", b"CT"),
        name,
        us(0x0010, 4),
        us(0x0011, 4),
        long(0x7FE0, 0x0010, b"OB", 16, &[9; 16]),
    ])
}

#[test]
fn tolerant_decoder_resyncs_past_an_overrun() {
    let buffer = overrunning_stream();
    let mut decoder = Decoder::new(&buffer, RecoveryPolicy::Tolerant);
    let tags: Vec<Tag> = decoder.by_ref().map(|e| e.tag).collect();

    assert_eq!(
        tags,
        vec![
            Tag(0x0008, 0x0060),
            Tag(0x0028, 0x0010),
            Tag(0x0028, 0x0011),
            Tag(0x7FE0, 0x0010),
        ]
    );
    assert_eq!(decoder.position(), buffer.len());
    assert!(matches!(
        decoder.diagnostics(),
        [Diagnostic::MalformedElement {
            length: 10_000,
            ..
        }]
    ));
}

#[test]
fn overrun_only_costs_the_damaged_element() {
    let buffer = overrunning_stream();
    let record = SliceRecord::parse("overrun", &buffer, RecoveryPolicy::Tolerant).unwrap();
    assert_eq!((record.rows, record.columns), (4, 4));
    assert_eq!(record.samples, Samples::U8(vec![9; 16]));
    assert_eq!(record.diagnostics.len(), 1);

    assert!(matches!(
        SliceRecord::parse("overrun", &buffer, RecoveryPolicy::Strict),
        Err(SliceError::NoPixelData { .. })
    ));
}

#[test]
fn truncated_pixel_data_is_located_and_reshaped() {
    let mut pixels = long(0x7FE0, 0x0010, b"OB", 64, &[5; 40]);
    pixels.truncate(12 + 40);
    let buffer = with_preamble(&[us(0x0010, 8), us(0x0011, 8), pixels]);

    let record = SliceRecord::parse("truncated", &buffer, RecoveryPolicy::Tolerant).unwrap();
    assert_eq!(record.samples.len(), 40);
    assert_eq!((record.rows, record.columns), (5, 8));
    assert!(matches!(
        record.diagnostics.as_slice(),
        [
            Diagnostic::MalformedElement { length: 64, .. },
            Diagnostic::DimensionMismatch {
                rows: 8,
                columns: 8,
                samples: 40,
                derived_rows: 5,
                derived_columns: 8,
            }
        ]
    ));
}

#[test]
fn reads_window_as_text_or_binary() {
    let pixels = long(0x7FE0, 0x0010, b"OB", 4, &[0, 1, 2, 3]);
    let text = with_preamble(&[
        us(0x0010, 2),
        us(0x0011, 2),
        short(0x0028, 0x1050, b"DS", b"40\\400"),
        short(0x0028, 0x1051, b"DS", b"80"),
        pixels.clone(),
    ]);
    let binary = with_preamble(&[
        us(0x0010, 2),
        us(0x0011, 2),
        short(0x0028, 0x1050, b"FD", &40.0f64.to_le_bytes()),
        short(0x0028, 0x1051, b"FD", &80.0f64.to_le_bytes()),
        pixels,
    ]);

    for buffer in [text, binary] {
        let record = SliceRecord::parse("window", &buffer, RecoveryPolicy::Tolerant).unwrap();
        assert_eq!(record.window, Some((40.0, 80.0)));
        assert_eq!(record.metadata.get("WindowCenter").map(String::as_str), Some("40"));
    }
}

#[test]
fn file_without_magic_is_read_from_offset_zero() {
    let buffer: Vec<u8> = [
        us(0x0010, 2),
        us(0x0011, 2),
        long(0x7FE0, 0x0010, b"OB", 4, &[4, 3, 2, 1]),
    ]
    .concat();

    let record = SliceRecord::parse("bare", &buffer, RecoveryPolicy::Strict).unwrap();
    assert_eq!(record.samples, Samples::U8(vec![4, 3, 2, 1]));
}
