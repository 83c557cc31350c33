use thiserror::Error;

use crate::protocol::response::{ErrPayload, ErrPayloadBytes};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Server Error: {0}")]
    ServerError(#[from] ErrPayload),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The per-operation time budget ran out mid I/O.
    #[error("operation timed out")]
    Timeout,

    #[error("Bad config error: {0}")]
    BadConfigError(String),

    #[error("Invalid packet")]
    InvalidPacket,

    #[error("Unexpected end of packet")]
    UnexpectedEof,

    /// Sequence id gap within one conversation. Fatal to the session.
    #[error("packet out of order: expected sequence {expected}, received {received}")]
    PacketOutOfOrder { expected: u8, received: u8 },

    /// Compressed frame failed CMF/FLG or Adler-32 validation. Fatal to the session.
    #[error("corrupt compressed frame: {0}")]
    CorruptCompression(&'static str),

    #[error(
        "payload of {0} bytes exceeds the server's max_allowed_packet; \
         raise max_allowed_packet on the server"
    )]
    PayloadTooLarge(usize),

    #[error("Unsupported authentication plugin: {0}")]
    UnsupportedAuthPlugin(String),

    #[error("unsupported column type: 0x{0:02X}")]
    UnsupportedColumnType(u8),

    /// A value's wire bytes cannot be parsed as the column's type.
    #[error("cannot parse value: {0}")]
    ValueParse(String),

    /// A typed accessor was used against an incompatible column.
    #[error("invalid cast: {0}")]
    InvalidCast(String),

    /// A second command was issued while one is still in flight.
    #[error("a command is already in progress on this session")]
    SessionBusy,

    #[error("session is not connected")]
    NotConnected,
}

impl Error {
    /// Whether the session that produced this error must be discarded.
    ///
    /// Transport and protocol errors poison the connection; server errors and
    /// decode errors leave it usable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::IoError(_)
                | Error::Timeout
                | Error::InvalidPacket
                | Error::UnexpectedEof
                | Error::PacketOutOfOrder { .. }
                | Error::CorruptCompression(_)
                | Error::NotConnected
        )
    }
}

impl<'a> From<ErrPayloadBytes<'a>> for Error {
    fn from(value: ErrPayloadBytes) -> Self {
        match ErrPayload::try_from(value) {
            Ok(err_payload) => Error::ServerError(err_payload),
            Err(err) => err,
        }
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

pub type Result<T> = std::result::Result<T, Error>;
