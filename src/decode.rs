//! Typed value decoding for both result sub-protocols.
//!
//! A [`RowDecoder`] is built once per result set: each column's
//! `(type, unsigned flag, charset, declared length)` selects a [`Decoder`]
//! variant, and every row decode is a table lookup plus a per-variant parse.
//! Decode failures are local to the value; they never poison the session.

use simdutf8::basic::from_utf8;
use uuid::Uuid;

use crate::constant::ColumnType;
use crate::error::{Error, Result};
use crate::opts::UuidFormat;
use crate::protocol::command::Column;
use crate::protocol::primitive::{read_u8, read_u16, read_u32, read_u64};
use crate::protocol::row::Row;

/// A decoded column value.
///
/// Borrowed variants reference the row's backing payload and stay valid as
/// long as the row does.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    Null,
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    Text(&'a str),
    Bytes(&'a [u8]),
    Date(Date),
    DateTime(DateTime),
    Time(TimeOfDay),
    Uuid(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateTime {
    pub date: Date,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: u32,
}

/// An elapsed-time value; hours may exceed 24 (MySQL TIME spans ±838 hours).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeOfDay {
    pub negative: bool,
    pub hours: u32,
    pub minute: u8,
    pub second: u8,
    pub microsecond: u32,
}

impl<'a> Value<'a> {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::UInt(v) => i64::try_from(*v)
                .map_err(|_| Error::InvalidCast(format!("{v} does not fit in i64"))),
            other => Err(Error::InvalidCast(format!("{other:?} is not an integer"))),
        }
    }

    pub fn as_u64(&self) -> Result<u64> {
        match self {
            Value::UInt(v) => Ok(*v),
            Value::Int(v) => u64::try_from(*v)
                .map_err(|_| Error::InvalidCast(format!("{v} does not fit in u64"))),
            other => Err(Error::InvalidCast(format!("{other:?} is not an integer"))),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Float(v) => Ok(f64::from(*v)),
            Value::Double(v) => Ok(*v),
            other => Err(Error::InvalidCast(format!("{other:?} is not a float"))),
        }
    }

    pub fn as_str(&self) -> Result<&'a str> {
        match self {
            Value::Text(s) => Ok(*s),
            other => Err(Error::InvalidCast(format!("{other:?} is not a string"))),
        }
    }

    pub fn as_bytes(&self) -> Result<&'a [u8]> {
        match self {
            Value::Bytes(b) => Ok(*b),
            other => Err(Error::InvalidCast(format!(
                "{other:?} is not a binary column"
            ))),
        }
    }

    pub fn as_uuid(&self) -> Result<Uuid> {
        match self {
            Value::Uuid(u) => Ok(*u),
            other => Err(Error::InvalidCast(format!("{other:?} is not a UUID"))),
        }
    }
}

// ============================================================================
// Per-column decoder selection
// ============================================================================

/// One column's decoding strategy, chosen when metadata is first seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoder {
    AlwaysNull,
    Int8 { unsigned: bool },
    Int16 { unsigned: bool },
    Int32 { unsigned: bool },
    Int64 { unsigned: bool },
    Year,
    Float,
    Double,
    /// DECIMAL travels as text in both sub-protocols.
    Decimal,
    Date,
    DateTime,
    Time,
    /// Big-endian bit string up to 64 bits.
    Bit,
    Text,
    Bytes,
    UuidText,
    UuidBinary(UuidFormat),
}

/// Widest encoding of one character for common charsets; declared column
/// length is `chars × width`.
fn charset_char_width(charset: u16) -> u32 {
    match charset {
        // utf8mb4 collations
        45 | 46 | 224..=247 | 255 => 4,
        // utf8mb3 collations
        33 | 83 | 192..=215 => 3,
        _ => 1,
    }
}

impl Decoder {
    fn for_column(column: &Column, uuid_format: UuidFormat) -> Decoder {
        let unsigned = column.is_unsigned();
        match column.column_type() {
            ColumnType::MYSQL_TYPE_NULL => Decoder::AlwaysNull,
            ColumnType::MYSQL_TYPE_TINY => Decoder::Int8 { unsigned },
            ColumnType::MYSQL_TYPE_SHORT => Decoder::Int16 { unsigned },
            ColumnType::MYSQL_TYPE_INT24 | ColumnType::MYSQL_TYPE_LONG => {
                Decoder::Int32 { unsigned }
            }
            ColumnType::MYSQL_TYPE_LONGLONG => Decoder::Int64 { unsigned },
            ColumnType::MYSQL_TYPE_YEAR => Decoder::Year,
            ColumnType::MYSQL_TYPE_FLOAT => Decoder::Float,
            ColumnType::MYSQL_TYPE_DOUBLE => Decoder::Double,
            ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => Decoder::Decimal,
            ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => Decoder::Date,
            ColumnType::MYSQL_TYPE_DATETIME
            | ColumnType::MYSQL_TYPE_DATETIME2
            | ColumnType::MYSQL_TYPE_TIMESTAMP
            | ColumnType::MYSQL_TYPE_TIMESTAMP2 => Decoder::DateTime,
            ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => Decoder::Time,
            ColumnType::MYSQL_TYPE_BIT => Decoder::Bit,
            ColumnType::MYSQL_TYPE_JSON | ColumnType::MYSQL_TYPE_ENUM | ColumnType::MYSQL_TYPE_SET => {
                Decoder::Text
            }
            ColumnType::MYSQL_TYPE_VARCHAR
            | ColumnType::MYSQL_TYPE_VAR_STRING
            | ColumnType::MYSQL_TYPE_STRING
            | ColumnType::MYSQL_TYPE_TINY_BLOB
            | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
            | ColumnType::MYSQL_TYPE_LONG_BLOB
            | ColumnType::MYSQL_TYPE_BLOB => Self::for_string_column(column, uuid_format),
            ColumnType::MYSQL_TYPE_GEOMETRY => Decoder::Bytes,
        }
    }

    /// String-shaped columns are ambiguous: TEXT vs BLOB by charset, and a
    /// CHAR(36)/CHAR(32)/BINARY(16) may carry UUIDs depending on
    /// configuration.
    fn for_string_column(column: &Column, uuid_format: UuidFormat) -> Decoder {
        if column.is_binary() {
            match uuid_format {
                UuidFormat::Binary16 | UuidFormat::TimeSwapBinary16 | UuidFormat::LittleEndianBinary16
                    if column.column_length() == 16
                        && column.column_type() == ColumnType::MYSQL_TYPE_STRING =>
                {
                    Decoder::UuidBinary(uuid_format)
                }
                _ => Decoder::Bytes,
            }
        } else {
            let chars = column.column_length() / charset_char_width(column.charset());
            if uuid_format == UuidFormat::Char
                && column.column_type() == ColumnType::MYSQL_TYPE_STRING
                && (chars == 36 || chars == 32)
            {
                Decoder::UuidText
            } else {
                Decoder::Text
            }
        }
    }
}

// ============================================================================
// Text-protocol parsing
// ============================================================================

fn text_str<'a>(bytes: &'a [u8]) -> Result<&'a str> {
    from_utf8(bytes).map_err(|_| Error::ValueParse("invalid UTF-8 in text value".to_string()))
}

/// Strict parse: every byte must participate, trailing garbage is an error.
fn text_parse<T: std::str::FromStr>(bytes: &[u8], what: &str) -> Result<T> {
    let s = text_str(bytes)?;
    s.parse()
        .map_err(|_| Error::ValueParse(format!("'{s}' is not a valid {what}")))
}

fn text_parse_f64(bytes: &[u8]) -> Result<f64> {
    match bytes {
        b"inf" => Ok(f64::INFINITY),
        b"-inf" => Ok(f64::NEG_INFINITY),
        b"nan" => Ok(f64::NAN),
        _ => text_parse(bytes, "double"),
    }
}

fn split_fraction(s: &str) -> Result<(&str, u32)> {
    match s.split_once('.') {
        None => Ok((s, 0)),
        Some((whole, frac)) => {
            if frac.is_empty() || frac.len() > 6 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::ValueParse(format!("bad fractional seconds '{s}'")));
            }
            let digits: u32 = frac
                .parse()
                .map_err(|_| Error::ValueParse(format!("bad fractional seconds '{s}'")))?;
            // scale to microseconds
            Ok((whole, digits * 10u32.pow(6 - frac.len() as u32)))
        }
    }
}

fn text_parse_date(s: &str) -> Result<Date> {
    let parse = || -> Option<Date> {
        let mut parts = s.splitn(3, '-');
        let year = parts.next()?.parse().ok()?;
        let month = parts.next()?.parse().ok()?;
        let day = parts.next()?.parse().ok()?;
        Some(Date { year, month, day })
    };
    parse().ok_or_else(|| Error::ValueParse(format!("'{s}' is not a valid date")))
}

fn text_parse_datetime(bytes: &[u8]) -> Result<DateTime> {
    let s = text_str(bytes)?;
    let (date_part, time_part) = s
        .split_once(' ')
        .ok_or_else(|| Error::ValueParse(format!("'{s}' is not a valid datetime")))?;
    let date = text_parse_date(date_part)?;
    let (hms, microsecond) = split_fraction(time_part)?;

    let parse_hms = || -> Option<(u8, u8, u8)> {
        let mut parts = hms.splitn(3, ':');
        Some((
            parts.next()?.parse().ok()?,
            parts.next()?.parse().ok()?,
            parts.next()?.parse().ok()?,
        ))
    };
    let (hour, minute, second) =
        parse_hms().ok_or_else(|| Error::ValueParse(format!("'{s}' is not a valid datetime")))?;

    Ok(DateTime {
        date,
        hour,
        minute,
        second,
        microsecond,
    })
}

fn text_parse_time(bytes: &[u8]) -> Result<TimeOfDay> {
    let s = text_str(bytes)?;
    let (negative, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (hms, microsecond) = split_fraction(rest)?;

    let parse_hms = || -> Option<(u32, u8, u8)> {
        let mut parts = hms.splitn(3, ':');
        Some((
            parts.next()?.parse().ok()?,
            parts.next()?.parse().ok()?,
            parts.next()?.parse().ok()?,
        ))
    };
    let (hours, minute, second) =
        parse_hms().ok_or_else(|| Error::ValueParse(format!("'{s}' is not a valid time")))?;

    Ok(TimeOfDay {
        negative,
        hours,
        minute,
        second,
        microsecond,
    })
}

// ============================================================================
// Binary-protocol parsing
// ============================================================================

fn binary_date_time(bytes: &[u8]) -> Result<DateTime> {
    // The row scanner stripped the length prefix; the slice length selects
    // the variant: 0, 4 (date), 7 (+hms), 11 (+microseconds).
    let mut value = DateTime::default();
    if bytes.is_empty() {
        return Ok(value);
    }
    let (year, rest) = read_u16(bytes)?;
    let (month, rest) = read_u8(rest)?;
    let (day, mut rest) = read_u8(rest)?;
    value.date = Date { year, month, day };

    if !rest.is_empty() {
        let (hour, r) = read_u8(rest)?;
        let (minute, r) = read_u8(r)?;
        let (second, r) = read_u8(r)?;
        value.hour = hour;
        value.minute = minute;
        value.second = second;
        rest = r;
    }
    if !rest.is_empty() {
        let (microsecond, _) = read_u32(rest)?;
        value.microsecond = microsecond;
    }
    Ok(value)
}

fn binary_time(bytes: &[u8]) -> Result<TimeOfDay> {
    // Variants by slice length: 0, 8, 12.
    let mut value = TimeOfDay::default();
    if bytes.is_empty() {
        return Ok(value);
    }
    let (negative, rest) = read_u8(bytes)?;
    let (days, rest) = read_u32(rest)?;
    let (hour, rest) = read_u8(rest)?;
    let (minute, rest) = read_u8(rest)?;
    let (second, rest) = read_u8(rest)?;
    value.negative = negative != 0;
    value.hours = days * 24 + u32::from(hour);
    value.minute = minute;
    value.second = second;
    if !rest.is_empty() {
        let (microsecond, _) = read_u32(rest)?;
        value.microsecond = microsecond;
    }
    Ok(value)
}

fn bit_value(bytes: &[u8]) -> Result<u64> {
    if bytes.len() > 8 {
        return Err(Error::ValueParse(format!(
            "BIT value of {} bytes exceeds 64 bits",
            bytes.len()
        )));
    }
    Ok(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

fn uuid_from_binary(bytes: &[u8], format: UuidFormat) -> Result<Uuid> {
    let raw: [u8; 16] = bytes
        .try_into()
        .map_err(|_| Error::ValueParse(format!("UUID column holds {} bytes", bytes.len())))?;
    Ok(match format {
        UuidFormat::TimeSwapBinary16 => Uuid::from_bytes_le(raw),
        UuidFormat::LittleEndianBinary16 => {
            let mut reversed = raw;
            reversed.reverse();
            Uuid::from_bytes(reversed)
        }
        _ => Uuid::from_bytes(raw),
    })
}

fn uuid_from_text(bytes: &[u8]) -> Result<Uuid> {
    Uuid::try_parse_ascii(bytes)
        .map_err(|_| Error::ValueParse("malformed UUID string".to_string()))
}

// ============================================================================
// RowDecoder
// ============================================================================

/// Decodes rows of one result set into typed values.
pub struct RowDecoder {
    decoders: Vec<Decoder>,
    binary: bool,
}

impl RowDecoder {
    /// Build the dispatch table for a result set's columns.
    pub fn new(columns: &[Column], binary: bool, uuid_format: UuidFormat) -> Self {
        Self {
            decoders: columns
                .iter()
                .map(|c| Decoder::for_column(c, uuid_format))
                .collect(),
            binary,
        }
    }

    pub fn num_columns(&self) -> usize {
        self.decoders.len()
    }

    /// Decode one cell. NULL decodes to [`Value::Null`] for every column
    /// type; parse failures never affect the session.
    pub fn decode<'a>(&self, row: &Row<'a>, ordinal: usize) -> Result<Value<'a>> {
        let decoder = self
            .decoders
            .get(ordinal)
            .ok_or_else(|| Error::InvalidCast(format!("no column at ordinal {ordinal}")))?;
        let Some(bytes) = row.bytes(ordinal)? else {
            return Ok(Value::Null);
        };
        if self.binary {
            self.decode_binary(*decoder, bytes)
        } else {
            self.decode_text(*decoder, bytes)
        }
    }

    fn decode_text<'a>(&self, decoder: Decoder, bytes: &'a [u8]) -> Result<Value<'a>> {
        Ok(match decoder {
            Decoder::AlwaysNull => Value::Null,
            Decoder::Int8 { unsigned }
            | Decoder::Int16 { unsigned }
            | Decoder::Int32 { unsigned }
            | Decoder::Int64 { unsigned } => {
                if unsigned {
                    Value::UInt(text_parse(bytes, "unsigned integer")?)
                } else {
                    Value::Int(text_parse(bytes, "integer")?)
                }
            }
            Decoder::Year => Value::UInt(text_parse(bytes, "year")?),
            Decoder::Float => Value::Float(text_parse_f64(bytes)? as f32),
            Decoder::Double => Value::Double(text_parse_f64(bytes)?),
            Decoder::Decimal | Decoder::Text => Value::Text(text_str(bytes)?),
            Decoder::Date => Value::Date(text_parse_date(text_str(bytes)?)?),
            Decoder::DateTime => Value::DateTime(text_parse_datetime(bytes)?),
            Decoder::Time => Value::Time(text_parse_time(bytes)?),
            // BIT travels as raw bytes even in the text protocol
            Decoder::Bit => Value::UInt(bit_value(bytes)?),
            Decoder::Bytes => Value::Bytes(bytes),
            Decoder::UuidText => Value::Uuid(uuid_from_text(bytes)?),
            Decoder::UuidBinary(format) => Value::Uuid(uuid_from_binary(bytes, format)?),
        })
    }

    fn decode_binary<'a>(&self, decoder: Decoder, bytes: &'a [u8]) -> Result<Value<'a>> {
        Ok(match decoder {
            Decoder::AlwaysNull => Value::Null,
            Decoder::Int8 { unsigned } => {
                let (v, _) = read_u8(bytes)?;
                if unsigned {
                    Value::UInt(u64::from(v))
                } else {
                    Value::Int(i64::from(v as i8))
                }
            }
            Decoder::Int16 { unsigned } => {
                let (v, _) = read_u16(bytes)?;
                if unsigned {
                    Value::UInt(u64::from(v))
                } else {
                    Value::Int(i64::from(v as i16))
                }
            }
            Decoder::Int32 { unsigned } => {
                let (v, _) = read_u32(bytes)?;
                if unsigned {
                    Value::UInt(u64::from(v))
                } else {
                    Value::Int(i64::from(v as i32))
                }
            }
            Decoder::Int64 { unsigned } => {
                let (v, _) = read_u64(bytes)?;
                if unsigned {
                    Value::UInt(v)
                } else {
                    Value::Int(v as i64)
                }
            }
            Decoder::Year => {
                let (v, _) = read_u16(bytes)?;
                Value::UInt(u64::from(v))
            }
            Decoder::Float => {
                let (v, _) = read_u32(bytes)?;
                Value::Float(f32::from_bits(v))
            }
            Decoder::Double => {
                let (v, _) = read_u64(bytes)?;
                Value::Double(f64::from_bits(v))
            }
            Decoder::Decimal | Decoder::Text => Value::Text(text_str(bytes)?),
            Decoder::Date => {
                let dt = binary_date_time(bytes)?;
                Value::Date(dt.date)
            }
            Decoder::DateTime => Value::DateTime(binary_date_time(bytes)?),
            Decoder::Time => Value::Time(binary_time(bytes)?),
            Decoder::Bit => Value::UInt(bit_value(bytes)?),
            Decoder::Bytes => Value::Bytes(bytes),
            Decoder::UuidText => Value::Uuid(uuid_from_text(bytes)?),
            Decoder::UuidBinary(format) => Value::Uuid(uuid_from_binary(bytes, format)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::ColumnFlags;
    use crate::protocol::command::encode_column_definition;
    use crate::protocol::row::Cell;

    fn column(ty: ColumnType, flags: ColumnFlags, charset: u16, length: u32) -> Column {
        let mut payload = Vec::new();
        encode_column_definition(&mut payload, "db", "t", "c", charset, length, ty, flags, 0);
        Column::from_payload(&payload).unwrap()
    }

    fn one_cell_row(bytes: &[u8]) -> (Vec<u8>, Vec<Cell>) {
        (
            bytes.to_vec(),
            vec![Cell {
                offset: 0,
                length: bytes.len() as u32,
            }],
        )
    }

    fn decode_one<'a>(
        decoder: &RowDecoder,
        buf: &'a [u8],
        cells: &'a [Cell],
    ) -> Result<Value<'a>> {
        decoder.decode(&Row::new(buf, cells), 0)
    }

    #[test]
    fn test_text_binary_numeric_parity() {
        // (type, flags, text bytes, binary little-endian bytes, expected)
        let cases: Vec<(ColumnType, ColumnFlags, &[u8], Vec<u8>, Value<'static>)> = vec![
            (
                ColumnType::MYSQL_TYPE_TINY,
                ColumnFlags::empty(),
                b"-42",
                (-42i8).to_le_bytes().to_vec(),
                Value::Int(-42),
            ),
            (
                ColumnType::MYSQL_TYPE_TINY,
                ColumnFlags::UNSIGNED_FLAG,
                b"200",
                200u8.to_le_bytes().to_vec(),
                Value::UInt(200),
            ),
            (
                ColumnType::MYSQL_TYPE_SHORT,
                ColumnFlags::empty(),
                b"-1000",
                (-1000i16).to_le_bytes().to_vec(),
                Value::Int(-1000),
            ),
            (
                ColumnType::MYSQL_TYPE_LONG,
                ColumnFlags::empty(),
                b"-100000",
                (-100_000i32).to_le_bytes().to_vec(),
                Value::Int(-100_000),
            ),
            (
                ColumnType::MYSQL_TYPE_LONG,
                ColumnFlags::UNSIGNED_FLAG,
                b"4000000000",
                4_000_000_000u32.to_le_bytes().to_vec(),
                Value::UInt(4_000_000_000),
            ),
            (
                ColumnType::MYSQL_TYPE_LONGLONG,
                ColumnFlags::empty(),
                b"-9223372036854775808",
                i64::MIN.to_le_bytes().to_vec(),
                Value::Int(i64::MIN),
            ),
            (
                ColumnType::MYSQL_TYPE_LONGLONG,
                ColumnFlags::UNSIGNED_FLAG,
                b"18446744073709551615",
                u64::MAX.to_le_bytes().to_vec(),
                Value::UInt(u64::MAX),
            ),
            (
                ColumnType::MYSQL_TYPE_FLOAT,
                ColumnFlags::empty(),
                b"1.5",
                1.5f32.to_le_bytes().to_vec(),
                Value::Float(1.5),
            ),
            (
                ColumnType::MYSQL_TYPE_DOUBLE,
                ColumnFlags::empty(),
                b"-2.25",
                (-2.25f64).to_le_bytes().to_vec(),
                Value::Double(-2.25),
            ),
        ];

        for (ty, flags, text, binary, expected) in cases {
            let columns = vec![column(ty, flags, 63, 20)];

            let text_decoder = RowDecoder::new(&columns, false, UuidFormat::None);
            let (buf, cells) = one_cell_row(text);
            assert_eq!(
                decode_one(&text_decoder, &buf, &cells).unwrap(),
                expected,
                "text {ty:?}"
            );

            let binary_decoder = RowDecoder::new(&columns, true, UuidFormat::None);
            let (buf, cells) = one_cell_row(&binary);
            assert_eq!(
                decode_one(&binary_decoder, &buf, &cells).unwrap(),
                expected,
                "binary {ty:?}"
            );
        }
    }

    #[test]
    fn test_null_decodes_for_every_type() {
        let types = [
            ColumnType::MYSQL_TYPE_TINY,
            ColumnType::MYSQL_TYPE_SHORT,
            ColumnType::MYSQL_TYPE_LONG,
            ColumnType::MYSQL_TYPE_LONGLONG,
            ColumnType::MYSQL_TYPE_FLOAT,
            ColumnType::MYSQL_TYPE_DOUBLE,
            ColumnType::MYSQL_TYPE_DATE,
            ColumnType::MYSQL_TYPE_DATETIME,
            ColumnType::MYSQL_TYPE_TIME,
            ColumnType::MYSQL_TYPE_BIT,
            ColumnType::MYSQL_TYPE_NEWDECIMAL,
            ColumnType::MYSQL_TYPE_VAR_STRING,
            ColumnType::MYSQL_TYPE_BLOB,
            ColumnType::MYSQL_TYPE_JSON,
        ];
        for ty in types {
            for binary in [false, true] {
                let columns = vec![column(ty, ColumnFlags::empty(), 45, 40)];
                let decoder = RowDecoder::new(&columns, binary, UuidFormat::None);
                let cells = vec![Cell::NULL];
                let value = decode_one(&decoder, &[], &cells).unwrap();
                assert!(value.is_null(), "{ty:?} binary={binary}");
            }
        }
    }

    #[test]
    fn test_text_strict_parse_rejects_trailing_garbage() {
        let columns = vec![column(ColumnType::MYSQL_TYPE_LONG, ColumnFlags::empty(), 63, 11)];
        let decoder = RowDecoder::new(&columns, false, UuidFormat::None);
        let (buf, cells) = one_cell_row(b"123abc");
        assert!(matches!(
            decode_one(&decoder, &buf, &cells),
            Err(Error::ValueParse(_))
        ));

        let (buf, cells) = one_cell_row(b"99999999999999999999");
        assert!(matches!(
            decode_one(&decoder, &buf, &cells),
            Err(Error::ValueParse(_))
        ));
    }

    #[test]
    fn test_float_special_tokens() {
        let columns = vec![column(ColumnType::MYSQL_TYPE_DOUBLE, ColumnFlags::empty(), 63, 22)];
        let decoder = RowDecoder::new(&columns, false, UuidFormat::None);

        let (buf, cells) = one_cell_row(b"inf");
        assert_eq!(
            decode_one(&decoder, &buf, &cells).unwrap(),
            Value::Double(f64::INFINITY)
        );
        let (buf, cells) = one_cell_row(b"-inf");
        assert_eq!(
            decode_one(&decoder, &buf, &cells).unwrap(),
            Value::Double(f64::NEG_INFINITY)
        );
        let (buf, cells) = one_cell_row(b"nan");
        let Value::Double(v) = decode_one(&decoder, &buf, &cells).unwrap() else {
            panic!("expected Double");
        };
        assert!(v.is_nan());
    }

    #[test]
    fn test_temporal_text_binary_parity() {
        let columns = vec![column(
            ColumnType::MYSQL_TYPE_DATETIME,
            ColumnFlags::empty(),
            63,
            26,
        )];

        let text_decoder = RowDecoder::new(&columns, false, UuidFormat::None);
        let (buf, cells) = one_cell_row(b"2024-12-25 15:30:45.5");
        let from_text = decode_one(&text_decoder, &buf, &cells).unwrap();

        let mut binary = Vec::new();
        binary.extend_from_slice(&2024u16.to_le_bytes());
        binary.extend_from_slice(&[12, 25, 15, 30, 45]);
        binary.extend_from_slice(&500_000u32.to_le_bytes());
        let binary_decoder = RowDecoder::new(&columns, true, UuidFormat::None);
        let (buf, cells) = one_cell_row(&binary);
        let from_binary = decode_one(&binary_decoder, &buf, &cells).unwrap();

        assert_eq!(from_text, from_binary);
        let Value::DateTime(dt) = from_text else {
            panic!("expected DateTime");
        };
        assert_eq!(dt.date.year, 2024);
        assert_eq!(dt.microsecond, 500_000);
    }

    #[test]
    fn test_negative_time_over_24_hours() {
        let columns = vec![column(ColumnType::MYSQL_TYPE_TIME, ColumnFlags::empty(), 63, 10)];
        let text_decoder = RowDecoder::new(&columns, false, UuidFormat::None);
        let (buf, cells) = one_cell_row(b"-36:10:05");
        let Value::Time(t) = decode_one(&text_decoder, &buf, &cells).unwrap() else {
            panic!("expected Time");
        };
        assert!(t.negative);
        assert_eq!(t.hours, 36);

        // binary: negative, 1 day, 12:10:05
        let mut binary = vec![1u8];
        binary.extend_from_slice(&1u32.to_le_bytes());
        binary.extend_from_slice(&[12, 10, 5]);
        let binary_decoder = RowDecoder::new(&columns, true, UuidFormat::None);
        let (buf, cells) = one_cell_row(&binary);
        let Value::Time(t) = decode_one(&binary_decoder, &buf, &cells).unwrap() else {
            panic!("expected Time");
        };
        assert_eq!(t.hours, 36);
        assert_eq!(t.second, 5);
    }

    #[test]
    fn test_text_vs_blob_by_charset() {
        // Same BLOB column type: utf8 charset means TEXT, charset 63 means bytes
        let text_col = vec![column(ColumnType::MYSQL_TYPE_BLOB, ColumnFlags::empty(), 45, 400)];
        let decoder = RowDecoder::new(&text_col, false, UuidFormat::None);
        let (buf, cells) = one_cell_row(b"hello");
        assert_eq!(
            decode_one(&decoder, &buf, &cells).unwrap(),
            Value::Text("hello")
        );

        let blob_col = vec![column(ColumnType::MYSQL_TYPE_BLOB, ColumnFlags::empty(), 63, 400)];
        let decoder = RowDecoder::new(&blob_col, false, UuidFormat::None);
        let (buf, cells) = one_cell_row(&[0xDE, 0xAD]);
        assert_eq!(
            decode_one(&decoder, &buf, &cells).unwrap(),
            Value::Bytes(&[0xDE, 0xAD])
        );

        // invalid-cast accessor against the wrong shape
        let value = {
            let (buf, cells) = one_cell_row(b"hi");
            let decoder = RowDecoder::new(&text_col, false, UuidFormat::None);
            let row = Row::new(&buf, &cells);
            let v = decoder.decode(&row, 0).unwrap();
            assert!(matches!(v.as_bytes(), Err(Error::InvalidCast(_))));
            v.as_str().unwrap().to_string()
        };
        assert_eq!(value, "hi");
    }

    #[test]
    fn test_uuid_char36_resolved_per_column() {
        // CHAR(36) in utf8mb4: declared length 144
        let columns = vec![column(
            ColumnType::MYSQL_TYPE_STRING,
            ColumnFlags::empty(),
            45,
            144,
        )];
        let uuid = Uuid::parse_str("6ccd780c-baba-1026-9564-5b8c656024db").unwrap();

        let decoder = RowDecoder::new(&columns, false, UuidFormat::Char);
        let (buf, cells) = one_cell_row(uuid.to_string().as_bytes());
        assert_eq!(decode_one(&decoder, &buf, &cells).unwrap(), Value::Uuid(uuid));

        // Without the setting the same column stays text
        let decoder = RowDecoder::new(&columns, false, UuidFormat::None);
        let (buf, cells) = one_cell_row(uuid.to_string().as_bytes());
        assert!(matches!(
            decode_one(&decoder, &buf, &cells).unwrap(),
            Value::Text(_)
        ));
    }

    #[test]
    fn test_uuid_binary16_orderings() {
        let columns = vec![column(
            ColumnType::MYSQL_TYPE_STRING,
            ColumnFlags::empty(),
            63,
            16,
        )];
        let uuid = Uuid::parse_str("00112233-4455-6677-8899-aabbccddeeff").unwrap();

        let cases: [(UuidFormat, [u8; 16]); 3] = [
            (UuidFormat::Binary16, *uuid.as_bytes()),
            (UuidFormat::TimeSwapBinary16, uuid.to_bytes_le()),
            (UuidFormat::LittleEndianBinary16, {
                let mut b = *uuid.as_bytes();
                b.reverse();
                b
            }),
        ];

        for (format, stored) in cases {
            let decoder = RowDecoder::new(&columns, true, format);
            let (buf, cells) = one_cell_row(&stored);
            assert_eq!(
                decode_one(&decoder, &buf, &cells).unwrap(),
                Value::Uuid(uuid),
                "{format:?}"
            );
        }
    }

    #[test]
    fn test_bit_column() {
        let columns = vec![column(ColumnType::MYSQL_TYPE_BIT, ColumnFlags::empty(), 63, 12)];
        let decoder = RowDecoder::new(&columns, false, UuidFormat::None);
        let (buf, cells) = one_cell_row(&[0x0A, 0xBC]);
        assert_eq!(
            decode_one(&decoder, &buf, &cells).unwrap(),
            Value::UInt(0x0ABC)
        );
    }
}
