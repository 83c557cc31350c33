//! Row scanning: locating each column's bytes inside a row payload.
//!
//! A scanned row is a list of `(offset, length)` cells into the payload,
//! with offset −1 as the SQL NULL sentinel. The cells stay valid only while
//! the backing payload does; [`Row::to_owned`] copies both for anything that
//! must outlive the next read on the session.

use crate::constant::ColumnType;
use crate::error::{Error, Result};
use crate::protocol::command::Column;
use crate::protocol::primitive::*;

/// NULL marker byte in a text-protocol row.
const TEXT_NULL: u8 = 0xFB;

/// One column's location within a row payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub offset: i64,
    pub length: u32,
}

impl Cell {
    pub const NULL: Cell = Cell {
        offset: -1,
        length: 0,
    };

    pub fn is_null(&self) -> bool {
        self.offset < 0
    }
}

/// Borrowed view of one scanned row; valid until the next read on the
/// session that produced it.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    buf: &'a [u8],
    cells: &'a [Cell],
}

impl<'a> Row<'a> {
    pub fn new(buf: &'a [u8], cells: &'a [Cell]) -> Self {
        Self { buf, cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn is_null(&self, ordinal: usize) -> bool {
        self.cells.get(ordinal).is_none_or(Cell::is_null)
    }

    /// Raw bytes of one column, `None` for SQL NULL.
    pub fn bytes(&self, ordinal: usize) -> Result<Option<&'a [u8]>> {
        let cell = self
            .cells
            .get(ordinal)
            .ok_or_else(|| Error::InvalidCast(format!("no column at ordinal {ordinal}")))?;
        if cell.is_null() {
            return Ok(None);
        }
        let start = cell.offset as usize;
        Ok(Some(&self.buf[start..start + cell.length as usize]))
    }

    /// Deep copy for use past the next network read.
    pub fn to_owned(&self) -> OwnedRow {
        OwnedRow {
            buf: self.buf.to_vec(),
            cells: self.cells.to_vec(),
        }
    }
}

/// A row whose backing bytes are owned; offsets are rebased onto the copy.
#[derive(Debug, Clone)]
pub struct OwnedRow {
    buf: Vec<u8>,
    cells: Vec<Cell>,
}

impl OwnedRow {
    pub fn as_row(&self) -> Row<'_> {
        Row::new(&self.buf, &self.cells)
    }
}

/// Scan a text-protocol row: per column either the 0xFB NULL marker or a
/// lenenc string.
pub fn scan_text_row(payload: &[u8], num_columns: usize, cells: &mut Vec<Cell>) -> Result<()> {
    cells.clear();
    let mut data = payload;
    for _ in 0..num_columns {
        match data.first() {
            None => return Err(Error::UnexpectedEof),
            Some(&TEXT_NULL) => {
                cells.push(Cell::NULL);
                data = &data[1..];
            }
            Some(_) => {
                let (value, rest) = read_bytes_lenenc(data)?;
                let offset = value.as_ptr() as usize - payload.as_ptr() as usize;
                cells.push(Cell {
                    offset: offset as i64,
                    length: value.len() as u32,
                });
                data = rest;
            }
        }
    }
    if !data.is_empty() {
        return Err(Error::InvalidPacket);
    }
    Ok(())
}

/// How many bytes a column occupies in a binary-protocol row.
fn binary_cell(column: &Column, payload: &[u8], data: &[u8]) -> Result<(Cell, usize)> {
    let fixed = |len: usize| -> Result<(Cell, usize)> {
        if data.len() < len {
            return Err(Error::UnexpectedEof);
        }
        let offset = data.as_ptr() as usize - payload.as_ptr() as usize;
        Ok((
            Cell {
                offset: offset as i64,
                length: len as u32,
            },
            len,
        ))
    };

    match column.column_type() {
        ColumnType::MYSQL_TYPE_NULL => Ok((Cell::NULL, 0)),
        ColumnType::MYSQL_TYPE_TINY => fixed(1),
        ColumnType::MYSQL_TYPE_SHORT | ColumnType::MYSQL_TYPE_YEAR => fixed(2),
        ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_FLOAT => fixed(4),
        ColumnType::MYSQL_TYPE_LONGLONG | ColumnType::MYSQL_TYPE_DOUBLE => fixed(8),

        // Temporal values carry a 1-byte length prefix (0/4/7/8/11/12)
        ColumnType::MYSQL_TYPE_DATE
        | ColumnType::MYSQL_TYPE_NEWDATE
        | ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_DATETIME2
        | ColumnType::MYSQL_TYPE_TIMESTAMP
        | ColumnType::MYSQL_TYPE_TIMESTAMP2
        | ColumnType::MYSQL_TYPE_TIME
        | ColumnType::MYSQL_TYPE_TIME2 => {
            let (len, rest) = read_u8(data)?;
            if rest.len() < len as usize {
                return Err(Error::UnexpectedEof);
            }
            let offset = rest.as_ptr() as usize - payload.as_ptr() as usize;
            Ok((
                Cell {
                    offset: offset as i64,
                    length: u32::from(len),
                },
                1 + len as usize,
            ))
        }

        // Everything else is a lenenc byte string
        _ => {
            let (value, _) = read_bytes_lenenc(data)?;
            let offset = value.as_ptr() as usize - payload.as_ptr() as usize;
            let prefix = offset - (data.as_ptr() as usize - payload.as_ptr() as usize);
            Ok((
                Cell {
                    offset: offset as i64,
                    length: value.len() as u32,
                },
                prefix + value.len(),
            ))
        }
    }
}

/// Scan a binary-protocol row: 0x00 header, NULL bitmap (2-bit offset), then
/// per-column fields laid out by column type.
pub fn scan_binary_row(payload: &[u8], columns: &[Column], cells: &mut Vec<Cell>) -> Result<()> {
    cells.clear();
    let (header, data) = read_u8(payload)?;
    if header != 0x00 {
        return Err(Error::InvalidPacket);
    }

    let bitmap_len = (columns.len() + 7 + 2) >> 3;
    let (bitmap, mut data) = read_bytes_fixed(data, bitmap_len)?;

    for (idx, column) in columns.iter().enumerate() {
        let bit = idx + 2;
        let is_null = bitmap[bit >> 3] & (1 << (bit & 7)) != 0;
        if is_null {
            cells.push(Cell::NULL);
            continue;
        }
        let (cell, consumed) = binary_cell(column, payload, data)?;
        cells.push(cell);
        data = &data[consumed..];
    }

    if !data.is_empty() {
        return Err(Error::InvalidPacket);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::{ColumnFlags, ColumnType};
    use crate::protocol::command::encode_column_definition;

    fn column(ty: ColumnType) -> Column {
        let mut payload = Vec::new();
        encode_column_definition(
            &mut payload,
            "db",
            "t",
            "c",
            45,
            16,
            ty,
            ColumnFlags::empty(),
            0,
        );
        Column::from_payload(&payload).unwrap()
    }

    #[test]
    fn test_scan_text_row_with_nulls() {
        let mut payload = Vec::new();
        write_str_lenenc(&mut payload, "42");
        payload.push(0xFB);
        write_str_lenenc(&mut payload, "hello");

        let mut cells = Vec::new();
        scan_text_row(&payload, 3, &mut cells).unwrap();

        let row = Row::new(&payload, &cells);
        assert_eq!(row.bytes(0).unwrap(), Some(&b"42"[..]));
        assert!(row.is_null(1));
        assert_eq!(row.bytes(1).unwrap(), None);
        assert_eq!(row.bytes(2).unwrap(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_scan_text_row_trailing_garbage() {
        let mut payload = Vec::new();
        write_str_lenenc(&mut payload, "1");
        payload.push(0x99);
        let mut cells = Vec::new();
        assert!(matches!(
            scan_text_row(&payload, 1, &mut cells),
            Err(Error::InvalidPacket)
        ));
    }

    #[test]
    fn test_scan_binary_row() {
        let columns = vec![
            column(ColumnType::MYSQL_TYPE_LONG),
            column(ColumnType::MYSQL_TYPE_VAR_STRING),
            column(ColumnType::MYSQL_TYPE_DOUBLE),
        ];

        // header, bitmap (col 1 NULL -> bit 3), i32, f64
        let mut payload = vec![0x00, 0b0000_1000];
        payload.extend_from_slice(&123i32.to_le_bytes());
        payload.extend_from_slice(&2.5f64.to_le_bytes());

        let mut cells = Vec::new();
        scan_binary_row(&payload, &columns, &mut cells).unwrap();

        let row = Row::new(&payload, &cells);
        assert_eq!(row.bytes(0).unwrap(), Some(&123i32.to_le_bytes()[..]));
        assert!(row.is_null(1));
        assert_eq!(row.bytes(2).unwrap(), Some(&2.5f64.to_le_bytes()[..]));
    }

    #[test]
    fn test_scan_binary_row_temporal_prefix() {
        let columns = vec![column(ColumnType::MYSQL_TYPE_DATETIME)];
        let mut payload = vec![0x00, 0b0000_0000, 4];
        payload.extend_from_slice(&2024u16.to_le_bytes());
        payload.push(12);
        payload.push(25);

        let mut cells = Vec::new();
        scan_binary_row(&payload, &columns, &mut cells).unwrap();
        let row = Row::new(&payload, &cells);
        let bytes = row.bytes(0).unwrap().unwrap();
        assert_eq!(bytes.len(), 4);
        assert_eq!(bytes[2], 12);
    }

    #[test]
    fn test_owned_row_survives_buffer_reuse() {
        let mut payload = Vec::new();
        write_str_lenenc(&mut payload, "keep");
        let mut cells = Vec::new();
        scan_text_row(&payload, 1, &mut cells).unwrap();

        let owned = Row::new(&payload, &cells).to_owned();
        payload.clear();
        payload.extend_from_slice(&[0u8; 16]); // simulate buffer reuse

        assert_eq!(owned.as_row().bytes(0).unwrap(), Some(&b"keep"[..]));
    }
}
