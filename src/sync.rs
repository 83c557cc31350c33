//! Blocking façade over the async engine.
//!
//! There is one async core; these wrappers run it to completion on a shared
//! current-thread runtime instead of duplicating the protocol logic.

use std::sync::Arc;

use crate::auth::AuthRegistry;
use crate::conn;
use crate::decode::Value;
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::command::{Column, Param};
use crate::protocol::row::OwnedRow;

fn new_runtime() -> Result<Arc<tokio::runtime::Runtime>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(Error::IoError)?;
    Ok(Arc::new(runtime))
}

/// A fully-buffered result set for blocking callers.
pub struct ResultSet {
    columns: Vec<Column>,
    rows: Vec<OwnedRow>,
    decoder: crate::decode::RowDecoder,
    affected_rows: u64,
    last_insert_id: u64,
}

impl ResultSet {
    async fn collect(mut stream: conn::QueryStream<'_>, binary: bool, opts: &Opts) -> Result<Self> {
        let mut rows = Vec::new();
        while let Some(row) = stream.next_row().await? {
            rows.push(row.to_owned());
        }
        let columns = stream.columns().to_vec();
        let decoder = crate::decode::RowDecoder::new(&columns, binary, opts.uuid_format);
        Ok(Self {
            columns,
            rows,
            decoder,
            affected_rows: stream.affected_rows(),
            last_insert_id: stream.last_insert_id(),
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    /// Decode one cell of one buffered row.
    pub fn value(&self, row: usize, ordinal: usize) -> Result<Value<'_>> {
        let row = self
            .rows
            .get(row)
            .ok_or_else(|| Error::InvalidCast(format!("no row at index {row}")))?;
        self.decoder.decode(&row.as_row(), ordinal)
    }
}

/// Blocking connection.
pub struct Conn {
    runtime: Arc<tokio::runtime::Runtime>,
    session: conn::Session,
    opts: Arc<Opts>,
}

impl Conn {
    pub fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts: Opts = opts.try_into()?;
        Self::with_registry(opts, Arc::new(AuthRegistry::with_builtin_plugins()))
    }

    pub fn with_registry(opts: Opts, registry: Arc<AuthRegistry>) -> Result<Self> {
        let runtime = new_runtime()?;
        let opts = Arc::new(opts);
        let session =
            runtime.block_on(conn::Session::connect(Arc::clone(&opts), registry))?;
        Ok(Self {
            runtime,
            session,
            opts,
        })
    }

    pub fn connection_id(&self) -> u32 {
        self.session.connection_id()
    }

    pub fn state(&self) -> conn::SessionState {
        self.session.state()
    }

    /// Execute SQL text and buffer the whole result set.
    pub fn query(&mut self, sql: &str) -> Result<ResultSet> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(async {
            let stream = self.session.query(sql).await?;
            ResultSet::collect(stream, false, &self.opts).await
        })
    }

    /// Execute SQL text and discard any rows.
    pub fn query_drop(&mut self, sql: &str) -> Result<u64> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.session.query_drop(sql))
    }

    pub fn prepare(&mut self, sql: &str) -> Result<u32> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.session.prepare(sql))
    }

    /// Execute a prepared statement and buffer the binary-protocol result.
    pub fn execute(&mut self, statement_id: u32, params: &[Param<'_>]) -> Result<ResultSet> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(async {
            let stream = self.session.execute(statement_id, params).await?;
            ResultSet::collect(stream, true, &self.opts).await
        })
    }

    pub fn ping(&mut self) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.session.ping())
    }

    pub fn close(&mut self) {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.session.close());
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        // Skip the quit round-trip when dropped inside another runtime,
        // where block_on would panic
        if tokio::runtime::Handle::try_current().is_err()
            && !matches!(self.session.state(), conn::SessionState::Closed)
        {
            self.close();
        }
    }
}

/// Blocking pool façade.
pub struct Pool {
    runtime: Arc<tokio::runtime::Runtime>,
    inner: Arc<conn::Pool>,
}

impl Pool {
    pub fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts: Opts = opts.try_into()?;
        Ok(Self {
            runtime: new_runtime()?,
            inner: Arc::new(conn::Pool::new(
                Arc::new(opts),
                Arc::new(AuthRegistry::with_builtin_plugins()),
            )),
        })
    }

    /// Check out a session; blocks while the pool is at capacity.
    pub fn get(&self) -> Result<PooledConn> {
        let session = self.runtime.block_on(self.inner.acquire())?;
        Ok(PooledConn {
            runtime: Arc::clone(&self.runtime),
            session: std::mem::ManuallyDrop::new(session),
            opts: Arc::new(self.inner.opts().clone()),
        })
    }
}

/// A pooled blocking connection; returns to the pool on drop.
pub struct PooledConn {
    runtime: Arc<tokio::runtime::Runtime>,
    session: std::mem::ManuallyDrop<conn::PooledSession>,
    opts: Arc<Opts>,
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        // The check-in path spawns onto the runtime; give it a context and a
        // tick to run on
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(async {
            // SAFETY: session is never accessed after this
            unsafe { std::mem::ManuallyDrop::drop(&mut self.session) };
            tokio::task::yield_now().await;
        });
    }
}

impl PooledConn {
    pub fn connection_id(&self) -> u32 {
        self.session.connection_id()
    }

    pub fn query(&mut self, sql: &str) -> Result<ResultSet> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(async {
            let stream = self.session.query(sql).await?;
            ResultSet::collect(stream, false, &self.opts).await
        })
    }

    pub fn query_drop(&mut self, sql: &str) -> Result<u64> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.session.query_drop(sql))
    }

    pub fn ping(&mut self) -> Result<()> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(self.session.ping())
    }
}
