use std::sync::Arc;

use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::sync::Mutex;

use crate::auth::AuthRegistry;
use crate::buffer::BufferSet;
use crate::constant::{CapabilityFlags, UTF8MB4_GENERAL_CI};
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::command::query::write_query;
use crate::protocol::command::utility::{
    write_change_user, write_ping, write_quit, write_reset_connection,
};
use crate::protocol::command::{Param, ResponseMachine, prepared};
use crate::protocol::connection::{Handshake, HandshakeContext, HandshakeStep};
use crate::protocol::packet::Conversation;
use crate::protocol::response::ErrPayloadBytes;

use super::cursor::QueryStream;
use super::stream::{Stream, TimeBudget};
use super::transport::Transport;

/// Server error code for a statement killed by KILL QUERY.
const ER_QUERY_INTERRUPTED: u16 = 1317;

/// Absolute protocol ceiling for one command payload (max_allowed_packet
/// cannot exceed 1 GiB).
const MAX_COMMAND_PAYLOAD: usize = 1 << 30;

/// Statement used to absorb a KILL that raced with normal completion.
const DRAIN_STATEMENT: &str = "DO SLEEP(0)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Connecting,
    Connected,
    Querying,
    CancelingQuery,
    ClearingPendingCancellation,
    Failed,
    Closing,
    Closed,
}

/// Shared between a session and its cancel handles. The lock is held for the
/// whole KILL round-trip and for the finish-querying drain, so a kill can
/// never land on a later command that reuses the connection id.
#[derive(Debug, Default)]
pub(crate) struct CancelFlag {
    pub(crate) pending_kill: bool,
}

/// Cancels the session's in-flight command from another task.
///
/// The protocol has no in-band abort; cancellation opens a second session
/// and issues `KILL QUERY <connection_id>`.
#[derive(Clone)]
pub struct CancelHandle {
    connection_id: u32,
    opts: Arc<Opts>,
    registry: Arc<AuthRegistry>,
    flag: Arc<Mutex<CancelFlag>>,
}

impl CancelHandle {
    #[tracing::instrument(skip_all, fields(connection_id = self.connection_id))]
    pub async fn cancel(&self) -> Result<()> {
        let mut guard = self.flag.lock().await;
        let mut killer =
            Session::connect(Arc::clone(&self.opts), Arc::clone(&self.registry)).await?;
        let result = killer
            .query_drop(&format!("KILL QUERY {}", self.connection_id))
            .await;
        killer.close().await;
        result?;
        guard.pending_kill = true;
        Ok(())
    }
}

/// One authenticated connection.
///
/// Exactly one command may be in flight at a time; issuing a second while
/// one streams fails fast instead of interleaving bytes on the wire.
pub struct Session {
    pub(crate) transport: Transport,
    pub(crate) buffers: BufferSet,
    pub(crate) conversation: Conversation,
    pub(crate) state: SessionState,
    pub(crate) response: Option<ResponseMachine>,
    capabilities: CapabilityFlags,
    connection_id: u32,
    server_version: Vec<u8>,
    auth_seed: Vec<u8>,
    opts: Arc<Opts>,
    registry: Arc<AuthRegistry>,
    cancel: Arc<Mutex<CancelFlag>>,
}

impl Session {
    /// Establish, handshake, and authenticate a new session.
    ///
    /// Candidate hosts are tried in order; resolution and connect failures
    /// skip to the next candidate. Any failure after the socket is open
    /// tears the connection down.
    #[tracing::instrument(skip_all)]
    pub async fn connect(opts: Arc<Opts>, registry: Arc<AuthRegistry>) -> Result<Session> {
        let budget = TimeBudget::new(opts.connect_timeout);
        let stream = Self::open_stream(&opts, &budget).await?;

        let mut session = Session {
            transport: Transport::new(stream),
            buffers: BufferSet::new(),
            conversation: Conversation::new(),
            state: SessionState::Connecting,
            response: None,
            capabilities: CapabilityFlags::empty(),
            connection_id: 0,
            server_version: Vec::new(),
            auth_seed: Vec::new(),
            opts: Arc::clone(&opts),
            registry,
            cancel: Arc::new(Mutex::new(CancelFlag::default())),
        };

        match session.handshake(&budget).await {
            Ok(()) => {
                session.state = SessionState::Connected;
                Ok(session)
            }
            Err(err) => {
                session.state = SessionState::Failed;
                Err(err)
            }
        }
    }

    async fn open_stream(opts: &Opts, budget: &TimeBudget) -> Result<Stream> {
        #[cfg(unix)]
        if let Some(path) = &opts.socket {
            let stream = budget.run(UnixStream::connect(path)).await?;
            return Ok(Stream::unix(stream));
        }

        let mut last_error = None;
        for host in &opts.hosts {
            match budget
                .run(TcpStream::connect((host.as_str(), opts.port)))
                .await
            {
                Ok(tcp) => {
                    tcp.set_nodelay(opts.tcp_nodelay)?;
                    return Ok(Stream::tcp(tcp));
                }
                Err(Error::Timeout) => return Err(Error::Timeout),
                Err(err) => {
                    tracing::debug!(host = %host, error = %err, "candidate host unreachable");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| Error::BadConfigError("no hosts configured".to_string())))
    }

    async fn handshake(&mut self, budget: &TimeBudget) -> Result<()> {
        let ctx = HandshakeContext {
            username: self.opts.user.clone(),
            password: self.opts.password.clone().unwrap_or_default(),
            database: self.opts.db.clone(),
            capabilities: self.opts.capabilities,
            compress: self.opts.compress,
            ssl_mode: self.opts.ssl_mode,
            connect_attrs: self.opts.connect_attrs.clone(),
            registry: Arc::clone(&self.registry),
        };
        let mut machine = Handshake::new(ctx);

        let capabilities = 'negotiated: loop {
            self.transport
                .read_payload(&mut self.conversation, budget, &mut self.buffers.read_buffer)
                .await?;
            let mut step = machine.drive(&self.buffers.read_buffer)?;
            loop {
                match step {
                    HandshakeStep::Reply(bytes) => {
                        self.write_raw(&bytes, budget).await?;
                        break;
                    }
                    HandshakeStep::ReadMore => break,
                    HandshakeStep::UpgradeTls { ssl_request } => {
                        self.write_raw(&ssl_request, budget).await?;
                        let host = self.opts.hosts.first().cloned().unwrap_or_default();
                        let plain = self.transport.take_stream();
                        let upgraded = plain.upgrade_to_tls(&host, budget).await?;
                        self.transport.put_stream(upgraded);
                        step = machine.resume_after_tls()?;
                    }
                    HandshakeStep::Done { capabilities } => break 'negotiated capabilities,
                }
            }
        };

        let server = machine.into_server().ok_or(Error::InvalidPacket)?;
        self.capabilities = capabilities;
        self.connection_id = server.connection_id;
        self.server_version = server.server_version;
        self.auth_seed = server.auth_plugin_data;

        if capabilities.contains(CapabilityFlags::CLIENT_COMPRESS) {
            self.transport.enable_compression();
        }
        Ok(())
    }

    async fn write_raw(&mut self, payload: &[u8], budget: &TimeBudget) -> Result<()> {
        self.transport
            .write_payload(
                &mut self.conversation,
                budget,
                payload,
                &mut self.buffers.write_wire,
            )
            .await
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_broken(&self) -> bool {
        matches!(
            self.state,
            SessionState::Failed | SessionState::Closing | SessionState::Closed
        )
    }

    /// The server-assigned connection id; doubles as the session identity
    /// tag for pool-reuse checks.
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn server_version(&self) -> &[u8] {
        &self.server_version
    }

    pub fn capabilities(&self) -> CapabilityFlags {
        self.capabilities
    }

    pub(crate) fn uses_deprecate_eof(&self) -> bool {
        self.capabilities
            .contains(CapabilityFlags::CLIENT_DEPRECATE_EOF)
    }

    pub(crate) fn command_budget(&self) -> TimeBudget {
        TimeBudget::new(self.opts.io_timeout)
    }

    pub(crate) fn opts(&self) -> &Opts {
        &self.opts
    }

    /// Handle for cancelling this session's in-flight command from another
    /// task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            connection_id: self.connection_id,
            opts: Arc::clone(&self.opts),
            registry: Arc::clone(&self.registry),
            flag: Arc::clone(&self.cancel),
        }
    }

    /// Read one payload, marking the session failed on transport/protocol
    /// errors.
    pub(crate) async fn read_payload_checked(&mut self, budget: &TimeBudget) -> Result<()> {
        let result = self
            .transport
            .read_payload(&mut self.conversation, budget, &mut self.buffers.read_buffer)
            .await;
        if let Err(err) = &result
            && err.is_fatal()
        {
            self.state = SessionState::Failed;
        }
        result
    }

    /// Make the session ready for a new command: validate state and drain
    /// any abandoned result stream.
    async fn prepare_for_command(&mut self) -> Result<()> {
        match self.state {
            SessionState::Connected => Ok(()),
            SessionState::Querying if self.response.is_some() => {
                self.drain_active_response().await
            }
            SessionState::Querying
            | SessionState::CancelingQuery
            | SessionState::ClearingPendingCancellation => Err(Error::SessionBusy),
            _ => Err(Error::NotConnected),
        }
    }

    /// Consume the rest of an abandoned response before the next command.
    async fn drain_active_response(&mut self) -> Result<()> {
        let budget = self.command_budget();
        loop {
            let Some(machine) = &mut self.response else {
                break;
            };
            if machine.is_finished() {
                break;
            }
            self.read_payload_checked(&budget).await?;
            let machine = self.response.as_mut().ok_or(Error::SessionBusy)?;
            match machine.drive(&self.buffers.read_buffer) {
                Ok(_) => {}
                Err(err) => return Err(self.command_failed(err).await),
            }
        }
        self.response = None;
        self.finish_querying().await
    }

    /// Frame and send the payload staged in `buffers.write_payload` as a new
    /// conversation.
    pub(crate) async fn send_command(&mut self, budget: &TimeBudget) -> Result<()> {
        let len = self.buffers.write_payload.len();
        if len > MAX_COMMAND_PAYLOAD {
            return Err(Error::PayloadTooLarge(len));
        }
        self.transport.start_conversation(&mut self.conversation);
        let result = self
            .transport
            .write_payload(
                &mut self.conversation,
                budget,
                &self.buffers.write_payload,
                &mut self.buffers.write_wire,
            )
            .await;
        if let Err(err) = &result
            && err.is_fatal()
        {
            self.state = SessionState::Failed;
        }
        result
    }

    /// Post-command bookkeeping, run while holding the cancel lock: if a
    /// KILL raced with normal completion, drain a benign statement so the
    /// stray kill cannot cancel the next command.
    pub(crate) async fn finish_querying(&mut self) -> Result<()> {
        let flag = Arc::clone(&self.cancel);
        let mut guard = flag.lock().await;
        if guard.pending_kill {
            guard.pending_kill = false;
            self.state = SessionState::CancelingQuery;
            let result = self.drain_stray_kill().await;
            if let Err(err) = result {
                if err.is_fatal() {
                    self.state = SessionState::Failed;
                }
                return Err(err);
            }
        }
        self.state = SessionState::Connected;
        Ok(())
    }

    async fn drain_stray_kill(&mut self) -> Result<()> {
        self.state = SessionState::ClearingPendingCancellation;
        let budget = self.command_budget();
        let out = self.buffers.begin_command();
        write_query(out, DRAIN_STATEMENT);
        self.send_command(&budget).await?;

        let mut machine = ResponseMachine::new(self.uses_deprecate_eof());
        while !machine.is_finished() {
            self.read_payload_checked(&budget).await?;
            match machine.drive(&self.buffers.read_buffer) {
                Ok(_) => {}
                // The stray kill landing on the drain statement is the point
                Err(Error::ServerError(err)) if err.error_code == ER_QUERY_INTERRUPTED => {
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Classify a mid-command error: fatal ones poison the session, server
    /// errors end the command but keep the connection usable.
    pub(crate) async fn command_failed(&mut self, err: Error) -> Error {
        self.response = None;
        if err.is_fatal() {
            self.state = SessionState::Failed;
            return err;
        }

        // A KILL that interrupted this very command consumed itself.
        if let Error::ServerError(server) = &err
            && server.error_code == ER_QUERY_INTERRUPTED
        {
            self.cancel.lock().await.pending_kill = false;
        }
        self.state = SessionState::Connected;
        err
    }

    /// Execute SQL text, streaming back rows lazily.
    #[tracing::instrument(skip_all)]
    pub async fn query(&mut self, sql: &str) -> Result<QueryStream<'_>> {
        self.prepare_for_command().await?;
        let budget = self.command_budget();
        let out = self.buffers.begin_command();
        write_query(out, sql);
        self.send_command(&budget).await?;

        self.state = SessionState::Querying;
        self.response = Some(ResponseMachine::new(self.uses_deprecate_eof()));
        QueryStream::start(self, budget, false).await
    }

    /// Execute SQL text and discard any rows.
    pub async fn query_drop(&mut self, sql: &str) -> Result<u64> {
        let mut stream = self.query(sql).await?;
        while stream.next_row().await?.is_some() {}
        Ok(stream.affected_rows())
    }

    /// Prepare a statement, returning its server-side id.
    #[tracing::instrument(skip_all)]
    pub async fn prepare(&mut self, sql: &str) -> Result<u32> {
        self.prepare_for_command().await?;
        let budget = self.command_budget();
        let out = self.buffers.begin_command();
        prepared::write_prepare(out, sql);
        self.send_command(&budget).await?;

        self.read_payload_checked(&budget).await?;
        if self.buffers.read_buffer.first() == Some(&0xFF) {
            let err: Error = ErrPayloadBytes(&self.buffers.read_buffer).into();
            return Err(self.command_failed(err).await);
        }
        let prepare_ok = prepared::read_prepare_ok(&self.buffers.read_buffer)?;
        let statement_id = prepare_ok.statement_id();
        let num_params = prepare_ok.num_params() as usize;
        let num_columns = prepare_ok.num_columns() as usize;

        // Parameter and column definition blocks, each with a legacy EOF
        // separator unless the server deprecates them
        for count in [num_params, num_columns] {
            if count == 0 {
                continue;
            }
            for _ in 0..count {
                self.read_payload_checked(&budget).await?;
            }
            if !self.uses_deprecate_eof() {
                self.read_payload_checked(&budget).await?;
            }
        }

        Ok(statement_id)
    }

    /// Execute a prepared statement; rows stream back in the binary
    /// sub-protocol.
    #[tracing::instrument(skip_all)]
    pub async fn execute(
        &mut self,
        statement_id: u32,
        params: &[Param<'_>],
    ) -> Result<QueryStream<'_>> {
        self.prepare_for_command().await?;
        let budget = self.command_budget();
        let out = self.buffers.begin_command();
        prepared::write_execute(out, statement_id, params);
        self.send_command(&budget).await?;

        self.state = SessionState::Querying;
        self.response = Some(ResponseMachine::new(self.uses_deprecate_eof()));
        QueryStream::start(self, budget, true).await
    }

    /// Deallocate a prepared statement. The server sends no reply.
    pub async fn close_statement(&mut self, statement_id: u32) -> Result<()> {
        self.prepare_for_command().await?;
        let budget = self.command_budget();
        let out = self.buffers.begin_command();
        prepared::write_close_statement(out, statement_id);
        self.send_command(&budget).await
    }

    /// Health check. Stream-level failures mean "not connected" rather than
    /// a generic I/O error.
    #[tracing::instrument(skip_all)]
    pub async fn ping(&mut self) -> Result<()> {
        self.prepare_for_command().await?;
        let budget = self.command_budget();
        let out = self.buffers.begin_command();
        write_ping(out);

        let result: Result<()> = async {
            self.send_command(&budget).await?;
            self.read_payload_checked(&budget).await?;
            match self.buffers.read_buffer.first() {
                Some(0x00) | Some(0xFE) => Ok(()),
                Some(0xFF) => Err(ErrPayloadBytes(&self.buffers.read_buffer).into()),
                _ => Err(Error::InvalidPacket),
            }
        }
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_fatal() => {
                self.state = SessionState::Failed;
                Err(Error::NotConnected)
            }
            Err(err) => Err(err),
        }
    }

    /// Restore session state before the session returns to the pool:
    /// COM_RESET_CONNECTION on servers that have it, COM_CHANGE_USER
    /// re-authentication otherwise, then the default charset.
    #[tracing::instrument(skip_all)]
    pub async fn reset_for_pool(&mut self) -> Result<()> {
        self.prepare_for_command().await?;
        let budget = self.command_budget();

        if supports_reset_connection(&self.server_version) {
            let out = self.buffers.begin_command();
            write_reset_connection(out);
            self.send_command(&budget).await?;
            self.read_payload_checked(&budget).await?;
            match self.buffers.read_buffer.first() {
                Some(0x00) => {}
                Some(0xFF) => {
                    let err: Error = ErrPayloadBytes(&self.buffers.read_buffer).into();
                    return Err(self.command_failed(err).await);
                }
                _ => return Err(Error::InvalidPacket),
            }
        } else {
            self.change_user(&budget).await?;
        }

        // COM_RESET_CONNECTION reverts to the server default charset, which
        // may differ from the connection default.
        self.query_drop("SET NAMES utf8mb4").await?;
        Ok(())
    }

    async fn change_user(&mut self, budget: &TimeBudget) -> Result<()> {
        let password = self.opts.password.clone().unwrap_or_default();
        let scramble =
            crate::auth::NativePassword::scramble_bytes(&password, &self.auth_seed);
        let out = self.buffers.begin_command();
        let username = self.opts.user.clone();
        let database = self.opts.db.clone();
        let auth_response: &[u8] = if password.is_empty() { &[] } else { &scramble };
        write_change_user(
            out,
            &username,
            auth_response,
            database.as_deref(),
            UTF8MB4_GENERAL_CI,
            "mysql_native_password",
        );
        self.send_command(budget).await?;

        // The server may switch plugins (with a fresh seed) before the OK
        loop {
            self.read_payload_checked(budget).await?;
            match self.buffers.read_buffer.first() {
                Some(0x00) => return Ok(()),
                Some(0xFF) => {
                    let err: Error = ErrPayloadBytes(&self.buffers.read_buffer).into();
                    return Err(self.command_failed(err).await);
                }
                Some(0xFE) => {
                    let switch = crate::protocol::connection::read_auth_switch_request(
                        &self.buffers.read_buffer,
                    )?;
                    let plugin = self.registry.lookup(switch.plugin_name)?;
                    let response = plugin.scramble(&password, switch.plugin_data)?;
                    self.write_raw(&response, budget).await?;
                }
                _ => return Err(Error::InvalidPacket),
            }
        }
    }

    /// Best-effort teardown: send COM_QUIT, ignore whatever happens.
    #[tracing::instrument(skip_all)]
    pub async fn close(&mut self) {
        if matches!(self.state, SessionState::Closed | SessionState::Closing) {
            return;
        }
        self.state = SessionState::Closing;
        let budget = TimeBudget::new(Some(std::time::Duration::from_secs(1)));
        let out = self.buffers.begin_command();
        write_quit(out);
        // Teardown mode: protocol errors are deliberately ignored
        let _ = self.send_command(&budget).await;
        self.state = SessionState::Closed;
    }
}

/// COM_RESET_CONNECTION exists since MySQL 5.7.3 and MariaDB 10.2.4.
fn supports_reset_connection(server_version: &[u8]) -> bool {
    let Some(version) = std::str::from_utf8(server_version).ok() else {
        return false;
    };

    // MariaDB reports as "5.5.5-10.6.12-MariaDB-..."
    let (version, minimum) = match version.strip_prefix("5.5.5-") {
        Some(mariadb) => (mariadb, (10u32, 2u32, 4u32)),
        None => (version, (5, 7, 3)),
    };

    let mut parts = version.split(|c: char| !c.is_ascii_digit());
    let mut next = || -> u32 {
        parts
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or_default()
    };
    (next(), next(), next()) >= minimum
}
