use bytes::{Buf, BufMut};

/// One table row: a list of raw column values.
pub type Row = Vec<Vec<u8>>;

/// Encode a row as `[u16 column_count]` followed by `[u16 len][bytes]`
/// per column, little-endian, no padding.
pub fn encode_row(row: &[Vec<u8>]) -> Vec<u8> {
    debug_assert!(row.len() <= u16::MAX as usize);

    let mut out = Vec::with_capacity(2 + row.iter().map(|col| 2 + col.len()).sum::<usize>());
    out.put_u16_le(row.len() as u16);
    for col in row {
        debug_assert!(col.len() <= u16::MAX as usize);
        out.put_u16_le(col.len() as u16);
        out.put_slice(col);
    }
    out
}

/// Decode one encoded row. Every length field is checked against the
/// remaining input before it is read, so a truncated or inconsistent
/// row decodes to an empty row rather than reading out of bounds.
///
/// The engine never stores zero-column rows (see
/// [`TableFile::append_row`]), so an empty result is always a
/// corruption signal, never legitimate data.
///
/// [`TableFile::append_row`]: crate::table::TableFile::append_row
pub fn decode_row(mut buf: &[u8]) -> Row {
    if buf.remaining() < 2 {
        return Row::new();
    }
    let count = buf.get_u16_le();

    let mut row = Row::with_capacity(count as usize);
    for _ in 0..count {
        if buf.remaining() < 2 {
            return Row::new();
        }
        let len = buf.get_u16_le() as usize;
        if buf.remaining() < len {
            return Row::new();
        }
        row.push(buf.copy_to_bytes(len).to_vec());
    }
    row
}
