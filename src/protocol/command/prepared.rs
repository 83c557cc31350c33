use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::constant::{ColumnType, CommandByte};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;

/// COM_STMT_PREPARE OK response (zero-copy)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct PrepareOk {
    statement_id: U32LE,
    num_columns: U16LE,
    num_params: U16LE,
    _reserved: u8,
    warning_count: U16LE,
}

impl PrepareOk {
    pub fn statement_id(&self) -> u32 {
        self.statement_id.get()
    }

    pub fn num_columns(&self) -> u16 {
        self.num_columns.get()
    }

    pub fn num_params(&self) -> u16 {
        self.num_params.get()
    }

    pub fn warning_count(&self) -> u16 {
        self.warning_count.get()
    }
}

/// Write COM_STMT_PREPARE
pub fn write_prepare(out: &mut Vec<u8>, sql: &str) {
    write_u8(out, CommandByte::StmtPrepare as u8);
    out.extend_from_slice(sql.as_bytes());
}

/// Read the COM_STMT_PREPARE OK payload
pub fn read_prepare_ok(payload: &[u8]) -> Result<&PrepareOk> {
    let (status, data) = read_u8(payload)?;
    if status != 0x00 || data.len() < 11 {
        return Err(Error::InvalidPacket);
    }
    PrepareOk::ref_from_bytes(&data[..11]).map_err(|_| Error::InvalidPacket)
}

/// Write COM_STMT_CLOSE (fire and forget, no server response)
pub fn write_close_statement(out: &mut Vec<u8>, statement_id: u32) {
    write_u8(out, CommandByte::StmtClose as u8);
    write_u32(out, statement_id);
}

/// A statement parameter value for COM_STMT_EXECUTE.
#[derive(Debug, Clone, Copy)]
pub enum Param<'a> {
    Null,
    Int(i64),
    UInt(u64),
    Double(f64),
    Str(&'a str),
    Bytes(&'a [u8]),
}

impl Param<'_> {
    fn type_bytes(&self) -> (u8, u8) {
        match self {
            Param::Null => (ColumnType::MYSQL_TYPE_NULL as u8, 0),
            Param::Int(_) => (ColumnType::MYSQL_TYPE_LONGLONG as u8, 0),
            Param::UInt(_) => (ColumnType::MYSQL_TYPE_LONGLONG as u8, 0x80),
            Param::Double(_) => (ColumnType::MYSQL_TYPE_DOUBLE as u8, 0),
            Param::Str(_) => (ColumnType::MYSQL_TYPE_VAR_STRING as u8, 0),
            Param::Bytes(_) => (ColumnType::MYSQL_TYPE_BLOB as u8, 0),
        }
    }
}

/// Write COM_STMT_EXECUTE with bound parameters.
pub fn write_execute(out: &mut Vec<u8>, statement_id: u32, params: &[Param<'_>]) {
    write_u8(out, CommandByte::StmtExecute as u8);
    write_u32(out, statement_id);
    write_u8(out, 0x00); // CURSOR_TYPE_NO_CURSOR
    write_u32(out, 1); // iteration count

    if params.is_empty() {
        return;
    }

    // NULL bitmap, offset 0
    let mut bitmap = vec![0u8; params.len().div_ceil(8)];
    for (idx, param) in params.iter().enumerate() {
        if matches!(param, Param::Null) {
            bitmap[idx >> 3] |= 1 << (idx & 7);
        }
    }
    out.extend_from_slice(&bitmap);

    // new-params-bound flag + type block
    write_u8(out, 0x01);
    for param in params {
        let (ty, flag) = param.type_bytes();
        write_u8(out, ty);
        write_u8(out, flag);
    }

    for param in params {
        match param {
            Param::Null => {}
            Param::Int(v) => write_u64(out, *v as u64),
            Param::UInt(v) => write_u64(out, *v),
            Param::Double(v) => write_u64(out, v.to_bits()),
            Param::Str(s) => write_bytes_lenenc(out, s.as_bytes()),
            Param::Bytes(b) => write_bytes_lenenc(out, b),
        }
    }
}
