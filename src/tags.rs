//! Static lookup for the handful of tags the pipeline interprets.

use dicom::core::Tag;
use dicom_dictionary_std::tags;

/// The attributes read from every slice, in the order they are reported.
pub static WHITELIST: [(Tag, &str); 8] = [
    (tags::ROWS, "Rows"),
    (tags::COLUMNS, "Columns"),
    (tags::BITS_ALLOCATED, "BitsAllocated"),
    (tags::PIXEL_REPRESENTATION, "PixelRepresentation"),
    (tags::WINDOW_CENTER, "WindowCenter"),
    (tags::WINDOW_WIDTH, "WindowWidth"),
    (tags::INSTANCE_NUMBER, "InstanceNumber"),
    (tags::PIXEL_DATA, "PixelData"),
];

pub const PREAMBLE_LEN: usize = 128;
pub const MAGIC: &[u8; 4] = b"DICM";

pub const ITEM_GROUP: u16 = 0xFFFE;
pub const SEQUENCE_DELIMITER: Tag = Tag(0xFFFE, 0xE0DD);

/// Name of a whitelisted tag, `None` for everything else.
pub fn tag_name(tag: Tag) -> Option<&'static str> {
    WHITELIST
        .iter()
        .find(|(known, _)| *known == tag)
        .map(|(_, name)| *name)
}

pub fn is_pixel_data(tag: Tag) -> bool {
    tag == tags::PIXEL_DATA
}
