//! A client-side implementation of the MySQL/MariaDB wire protocol: packet
//! framing, compression, handshake and authentication negotiation, typed
//! result decoding, and connection pooling. The async engine is the core;
//! the [`sync`] module is a thin blocking adapter over it.

pub mod auth;
pub mod buffer;
pub mod conn;
pub mod constant;
pub mod decode;
pub mod error;
mod opts;
pub mod protocol;

#[cfg(feature = "sync")]
pub mod sync;

pub use conn::{CancelHandle, Pool, PoolManager, PooledSession, QueryStream, ResultRow, Session,
    SessionState};
pub use decode::Value;
pub use error::{Error, Result};
pub use opts::{Opts, SslMode, UuidFormat};
pub use protocol::command::{Column, Param};
pub use protocol::row::{OwnedRow, Row};
