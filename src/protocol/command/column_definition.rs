use std::borrow::Cow;
use std::ops::Range;

use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::constant::{BINARY_CHARSET, ColumnFlags, ColumnType};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;

/// Fixed-size tail of a column definition payload (12 bytes)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct ColumnDefinitionTail {
    charset: U16LE,
    column_length: U32LE,
    column_type: u8,
    flags: U16LE,
    decimals: u8,
    reserved: U16LE,
}

/// Self-describing metadata for one result-set column.
///
/// The raw payload bytes are retained; the type/flags tail is parsed eagerly
/// (every row decode needs it) while the name/schema/table strings are only
/// ranges until an accessor decodes them.
#[derive(Debug, Clone)]
pub struct Column {
    bytes: Vec<u8>,
    schema: Range<usize>,
    table: Range<usize>,
    name: Range<usize>,
    charset: u16,
    column_length: u32,
    column_type: ColumnType,
    flags: ColumnFlags,
    decimals: u8,
}

impl Column {
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let range_of = |slice: &[u8]| -> Range<usize> {
            // Slices below are borrowed from `payload`
            let start = slice.as_ptr() as usize - payload.as_ptr() as usize;
            start..start + slice.len()
        };

        let (_catalog, data) = read_bytes_lenenc(payload)?;
        let (schema, data) = read_bytes_lenenc(data)?;
        let (table, data) = read_bytes_lenenc(data)?;
        let (_org_table, data) = read_bytes_lenenc(data)?;
        let (name, data) = read_bytes_lenenc(data)?;
        let (_org_name, data) = read_bytes_lenenc(data)?;

        // Tail length marker, always 0x0c
        let (_tail_len, data) = read_lenenc_int(data)?;
        let (tail, _) = ColumnDefinitionTail::ref_from_prefix(data).map_err(|_| Error::InvalidPacket)?;

        let column_type = ColumnType::from_u8(tail.column_type)
            .ok_or(Error::UnsupportedColumnType(tail.column_type))?;

        Ok(Self {
            schema: range_of(schema),
            table: range_of(table),
            name: range_of(name),
            charset: tail.charset.get(),
            column_length: tail.column_length.get(),
            column_type,
            flags: ColumnFlags::from_bits_truncate(tail.flags.get()),
            decimals: tail.decimals,
            bytes: payload.to_vec(),
        })
    }

    pub fn name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes[self.name.clone()])
    }

    pub fn schema(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes[self.schema.clone()])
    }

    pub fn table(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes[self.table.clone()])
    }

    pub fn charset(&self) -> u16 {
        self.charset
    }

    pub fn column_length(&self) -> u32 {
        self.column_length
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn flags(&self) -> ColumnFlags {
        self.flags
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn is_unsigned(&self) -> bool {
        self.flags.contains(ColumnFlags::UNSIGNED_FLAG)
    }

    pub fn is_binary(&self) -> bool {
        self.charset == BINARY_CHARSET
    }
}

#[cfg(test)]
pub(crate) fn encode_column_definition(
    out: &mut Vec<u8>,
    schema: &str,
    table: &str,
    name: &str,
    charset: u16,
    column_length: u32,
    column_type: ColumnType,
    flags: ColumnFlags,
    decimals: u8,
) {
    write_str_lenenc(out, "def");
    write_str_lenenc(out, schema);
    write_str_lenenc(out, table);
    write_str_lenenc(out, table);
    write_str_lenenc(out, name);
    write_str_lenenc(out, name);
    write_lenenc_int(out, 0x0c);
    write_u16(out, charset);
    write_u32(out, column_length);
    write_u8(out, column_type as u8);
    write_u16(out, flags.bits());
    write_u8(out, decimals);
    write_u16(out, 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::UTF8MB4_GENERAL_CI;

    #[test]
    fn test_column_parse() {
        let mut payload = Vec::new();
        encode_column_definition(
            &mut payload,
            "shop",
            "orders",
            "total",
            u16::from(UTF8MB4_GENERAL_CI),
            11,
            ColumnType::MYSQL_TYPE_LONG,
            ColumnFlags::NOT_NULL_FLAG,
            0,
        );

        let column = Column::from_payload(&payload).unwrap();
        assert_eq!(column.name(), "total");
        assert_eq!(column.schema(), "shop");
        assert_eq!(column.table(), "orders");
        assert_eq!(column.column_type(), ColumnType::MYSQL_TYPE_LONG);
        assert_eq!(column.column_length(), 11);
        assert!(!column.is_unsigned());
        assert!(!column.is_binary());
    }

    #[test]
    fn test_unknown_column_type_rejected() {
        let mut payload = Vec::new();
        write_str_lenenc(&mut payload, "def");
        for _ in 0..5 {
            write_str_lenenc(&mut payload, "x");
        }
        write_lenenc_int(&mut payload, 0x0c);
        write_u16(&mut payload, 63);
        write_u32(&mut payload, 4);
        write_u8(&mut payload, 0x42); // no such type
        write_u16(&mut payload, 0);
        write_u8(&mut payload, 0);
        write_u16(&mut payload, 0);

        assert!(matches!(
            Column::from_payload(&payload),
            Err(Error::UnsupportedColumnType(0x42))
        ));
    }
}
