use crate::constant::{CommandByte, ServerStatusFlags};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use crate::protocol::response::{ErrPayloadBytes, OkPayload, OkPayloadBytes, read_eof_payload};

/// Write COM_QUERY
pub fn write_query(out: &mut Vec<u8>, sql: &str) {
    write_u8(out, CommandByte::Query as u8);
    out.extend_from_slice(sql.as_bytes());
}

/// One event per server payload while a command's response streams in.
#[derive(Debug)]
pub enum QueryEvent<'a> {
    /// The command produced no result set.
    NoResultSet { ok: OkPayload, more_results: bool },
    /// A result set header arrived; `num_columns` definitions follow.
    ResultSetStart { num_columns: usize },
    /// One column definition payload.
    Column(&'a [u8]),
    /// A marker payload between columns and rows (pre-DEPRECATE_EOF servers).
    ColumnsEnd,
    /// One row payload.
    Row(&'a [u8]),
    /// The result set finished.
    ResultSetEnd { ok: OkPayload, more_results: bool },
}

#[derive(Clone, Copy)]
enum State {
    /// Waiting for the first response payload of a command (or of the next
    /// result set in a multi-result response).
    Initial,
    Columns { remaining: usize },
    /// Expecting the legacy EOF separator between columns and rows.
    ColumnsEof,
    Rows,
    Finished,
}

/// Drives one command's response: column count, column definitions, rows,
/// terminator, with multi-result chaining. Feed it one payload at a time.
pub struct ResponseMachine {
    state: State,
    deprecate_eof: bool,
}

impl ResponseMachine {
    pub fn new(deprecate_eof: bool) -> Self {
        Self {
            state: State::Initial,
            deprecate_eof,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Finished)
    }

    /// All column definitions are in; the next payload is a row (or the
    /// terminator).
    pub fn expecting_rows(&self) -> bool {
        matches!(self.state, State::Rows)
    }

    fn terminator(&mut self, payload: &[u8]) -> Result<(OkPayload, bool)> {
        let ok = if self.deprecate_eof {
            OkPayload::try_from(OkPayloadBytes(payload))?
        } else {
            let eof = read_eof_payload(payload)?;
            OkPayload {
                affected_rows: 0,
                last_insert_id: 0,
                status_flags: eof.status_flags(),
                warnings: eof.warnings.get(),
            }
        };
        let more = ok
            .status_flags
            .contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS);
        self.state = if more { State::Initial } else { State::Finished };
        Ok((ok, more))
    }

    /// Process the next payload.
    pub fn drive<'a>(&mut self, payload: &'a [u8]) -> Result<QueryEvent<'a>> {
        match self.state {
            State::Initial => match payload.first() {
                None => Err(Error::InvalidPacket),
                Some(0xFF) => Err(ErrPayloadBytes(payload).into()),
                Some(0x00) => {
                    let ok = OkPayload::try_from(OkPayloadBytes(payload))?;
                    let more = ok
                        .status_flags
                        .contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS);
                    self.state = if more { State::Initial } else { State::Finished };
                    Ok(QueryEvent::NoResultSet { ok, more_results: more })
                }
                Some(0xFB) => Err(Error::BadConfigError(
                    "LOCAL INFILE responses are not supported".to_string(),
                )),
                Some(_) => {
                    let (num_columns, rest) = read_lenenc_int(payload)?;
                    if !rest.is_empty() || num_columns == 0 {
                        return Err(Error::InvalidPacket);
                    }
                    self.state = State::Columns {
                        remaining: num_columns as usize,
                    };
                    Ok(QueryEvent::ResultSetStart {
                        num_columns: num_columns as usize,
                    })
                }
            },

            State::Columns { remaining } => {
                let remaining = remaining - 1;
                self.state = if remaining > 0 {
                    State::Columns { remaining }
                } else if self.deprecate_eof {
                    State::Rows
                } else {
                    State::ColumnsEof
                };
                Ok(QueryEvent::Column(payload))
            }

            State::ColumnsEof => {
                read_eof_payload(payload)?;
                self.state = State::Rows;
                Ok(QueryEvent::ColumnsEnd)
            }

            State::Rows => {
                // A row's first field is NULL (0xFB) or a lenenc string, whose
                // length prefix is never 0xFF. 0xFE can begin a row only when
                // the lenenc length needs 8 bytes, which forces a maximum-size
                // packet; shorter 0xFE payloads are the terminator.
                match payload.first() {
                    None => Err(Error::InvalidPacket),
                    Some(0xFF) => Err(ErrPayloadBytes(payload).into()),
                    Some(0xFE) if payload.len() < crate::constant::MAX_PACKET_SIZE => {
                        let (ok, more) = self.terminator(payload)?;
                        Ok(QueryEvent::ResultSetEnd {
                            ok,
                            more_results: more,
                        })
                    }
                    Some(_) => Ok(QueryEvent::Row(payload)),
                }
            }

            State::Finished => Err(Error::InvalidPacket),
        }
    }
}
