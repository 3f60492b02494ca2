//! Builders for small explicit VR little endian test files.

/// Element with a 2-byte length field.
pub fn short(group: u16, element: u16, vr: &[u8; 2], value: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&group.to_le_bytes());
    out.extend_from_slice(&element.to_le_bytes());
    out.extend_from_slice(vr);
    out.extend_from_slice(&(value.len() as u16).to_le_bytes());
    out.extend_from_slice(value);
    out
}

/// Element with reserved bytes and a 4-byte length field.
pub fn long(group: u16, element: u16, vr: &[u8; 2], length: u32, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&group.to_le_bytes());
    out.extend_from_slice(&element.to_le_bytes());
    out.extend_from_slice(vr);
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(value);
    out
}

pub fn us(element: u16, value: u16) -> Vec<u8> {
    short(0x0028, element, b"US", &value.to_le_bytes())
}

/// Space padded decimal string.
#[allow(dead_code)]
pub fn text(group: u16, element: u16, vr: &[u8; 2], value: &str) -> Vec<u8> {
    let mut bytes = value.as_bytes().to_vec();
    if bytes.len() % 2 == 1 {
        bytes.push(b' ');
    }
    short(group, element, vr, &bytes)
}

/// Prepends the 128-byte preamble and the magic marker.
pub fn with_preamble(elements: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![0u8; 128];
    out.extend_from_slice(b"DICM");
    for element in elements {
        out.extend_from_slice(element);
    }
    out
}

/// An 8-bit slice of `rows` x `columns` filled with `value`.
#[allow(dead_code)]
pub fn u8_slice(rows: u16, columns: u16, instance_number: Option<i64>, value: u8) -> Vec<u8> {
    let mut elements = Vec::new();
    if let Some(n) = instance_number {
        elements.push(text(0x0020, 0x0013, b"IS", &n.to_string()));
    }
    elements.push(us(0x0010, rows));
    elements.push(us(0x0011, columns));
    elements.push(us(0x0100, 8));
    let pixels = vec![value; rows as usize * columns as usize];
    elements.push(long(0x7FE0, 0x0010, b"OB", pixels.len() as u32, &pixels));
    with_preamble(&elements)
}
