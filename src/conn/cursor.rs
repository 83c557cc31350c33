use crate::decode::{RowDecoder, Value};
use crate::error::{Error, Result};
use crate::protocol::command::{Column, QueryEvent};
use crate::protocol::response::OkPayload;
use crate::protocol::row::{OwnedRow, Row, scan_binary_row, scan_text_row};

use super::session::Session;
use super::stream::TimeBudget;

/// Lazily streams one command's result set.
///
/// Rows are views into the session's read buffer: each [`next_row`] call
/// invalidates the previous row. Dropping the stream mid-result leaves the
/// remaining packets on the wire; the session drains them before its next
/// command.
///
/// [`next_row`]: QueryStream::next_row
pub struct QueryStream<'s> {
    session: &'s mut Session,
    budget: TimeBudget,
    binary: bool,
    columns: Vec<Column>,
    decoder: RowDecoder,
    ok: Option<OkPayload>,
    done: bool,
}

impl std::fmt::Debug for QueryStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryStream")
            .field("binary", &self.binary)
            .field("columns", &self.columns.len())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<'s> QueryStream<'s> {
    /// Read the response header phase: either a no-result OK or the column
    /// definitions, stopping where rows begin.
    pub(crate) async fn start(
        session: &'s mut Session,
        budget: TimeBudget,
        binary: bool,
    ) -> Result<Self> {
        let mut columns = Vec::new();
        let mut ok = None;
        let mut done = false;

        loop {
            if let Err(err) = session.read_payload_checked(&budget).await {
                return Err(session.command_failed(err).await);
            }
            let machine = session.response.as_mut().ok_or(Error::SessionBusy)?;
            let event = match machine.drive(&session.buffers.read_buffer) {
                Ok(event) => event,
                Err(err) => return Err(session.command_failed(err).await),
            };
            match event {
                QueryEvent::NoResultSet { ok: payload, more_results } => {
                    ok = Some(payload);
                    if !more_results {
                        done = true;
                        break;
                    }
                }
                QueryEvent::ResultSetStart { num_columns } => {
                    columns.reserve(num_columns);
                }
                QueryEvent::Column(payload) => {
                    columns.push(Column::from_payload(payload)?);
                    if session
                        .response
                        .as_ref()
                        .is_some_and(|m| m.expecting_rows())
                    {
                        break;
                    }
                }
                QueryEvent::ColumnsEnd => break,
                QueryEvent::Row(_) | QueryEvent::ResultSetEnd { .. } => {
                    return Err(session.command_failed(Error::InvalidPacket).await);
                }
            }
        }

        if done {
            session.response = None;
            session.finish_querying().await?;
        }

        let decoder = RowDecoder::new(&columns, binary, session.opts().uuid_format);
        Ok(Self {
            session,
            budget,
            binary,
            columns,
            decoder,
            ok,
            done,
        })
    }

    /// Result-set metadata, available before the first row.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Ordinal of a column by result-set name.
    pub fn ordinal(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    /// Affected rows from the terminal OK payload (0 until the stream ends).
    pub fn affected_rows(&self) -> u64 {
        self.ok.as_ref().map(|ok| ok.affected_rows).unwrap_or(0)
    }

    pub fn last_insert_id(&self) -> u64 {
        self.ok.as_ref().map(|ok| ok.last_insert_id).unwrap_or(0)
    }

    /// Fetch the next row, or `None` once the result set is exhausted.
    pub async fn next_row(&mut self) -> Result<Option<ResultRow<'_>>> {
        if self.done {
            return Ok(None);
        }

        loop {
            if let Err(err) = self.session.read_payload_checked(&self.budget).await {
                self.done = true;
                return Err(self.session.command_failed(err).await);
            }
            let machine = self.session.response.as_mut().ok_or(Error::SessionBusy)?;
            let event = match machine.drive(&self.session.buffers.read_buffer) {
                Ok(event) => event,
                Err(err) => {
                    self.done = true;
                    return Err(self.session.command_failed(err).await);
                }
            };
            match event {
                QueryEvent::Row(_) => {
                    let payload = &self.session.buffers.read_buffer;
                    if self.binary {
                        scan_binary_row(payload, &self.columns, &mut self.session.buffers.cells)?;
                    } else {
                        scan_text_row(payload, self.columns.len(), &mut self.session.buffers.cells)?;
                    }
                    let row = Row::new(
                        &self.session.buffers.read_buffer,
                        &self.session.buffers.cells,
                    );
                    return Ok(Some(ResultRow {
                        row,
                        decoder: &self.decoder,
                    }));
                }
                QueryEvent::ResultSetEnd { ok, more_results } => {
                    self.ok = Some(ok);
                    if !more_results {
                        self.done = true;
                        self.session.response = None;
                        self.session.finish_querying().await?;
                        return Ok(None);
                    }
                    // Additional result sets of a multi-statement command are
                    // consumed and dropped
                }
                QueryEvent::NoResultSet { ok, more_results } => {
                    self.ok = Some(ok);
                    if !more_results {
                        self.done = true;
                        self.session.response = None;
                        self.session.finish_querying().await?;
                        return Ok(None);
                    }
                }
                QueryEvent::ResultSetStart { .. }
                | QueryEvent::Column(_)
                | QueryEvent::ColumnsEnd => {}
            }
        }
    }
}

/// One decoded-on-demand row of a result stream.
///
/// Valid until the next [`QueryStream::next_row`] call; use
/// [`ResultRow::to_owned`] to keep it longer.
pub struct ResultRow<'a> {
    row: Row<'a>,
    decoder: &'a RowDecoder,
}

impl<'a> ResultRow<'a> {
    pub fn len(&self) -> usize {
        self.row.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row.is_empty()
    }

    pub fn is_null(&self, ordinal: usize) -> bool {
        self.row.is_null(ordinal)
    }

    /// Decode one column as a typed value.
    pub fn get(&self, ordinal: usize) -> Result<Value<'a>> {
        self.decoder.decode(&self.row, ordinal)
    }

    /// Raw wire bytes of one column.
    pub fn raw(&self, ordinal: usize) -> Result<Option<&'a [u8]>> {
        self.row.bytes(ordinal)
    }

    /// Deep copy outliving the stream's buffers.
    pub fn to_owned(&self) -> OwnedRow {
        self.row.to_owned()
    }
}
