use std::sync::Arc;

use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::auth::{AuthPlugin, AuthRegistry, AuthStep};
use crate::constant::{
    CAPABILITIES_ALWAYS_ENABLED, CAPABILITIES_CONFIGURABLE, CapabilityFlags, MAX_PACKET_SIZE,
    ServerStatusFlags, UTF8MB4_GENERAL_CI,
};
use crate::error::{Error, Result};
use crate::opts::SslMode;
use crate::protocol::primitive::*;
use crate::protocol::response::ErrPayloadBytes;

/// Fallback plugin when the server does not advertise CLIENT_PLUGIN_AUTH.
const LEGACY_AUTH_PLUGIN: &[u8] = b"mysql_native_password";

#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
struct HandshakeFixedFields {
    connection_id: U32LE,
    auth_data_part1: [u8; 8],
    filler: u8,
    capability_flags_lower: U16LE,
    charset: u8,
    status_flags: U16LE,
    capability_flags_upper: U16LE,
    auth_data_len: u8,
}

/// The server's initial greeting, owned past the read buffer's lifetime.
#[derive(Debug, Clone)]
pub struct InitialHandshake {
    pub protocol_version: u8,
    pub server_version: Vec<u8>,
    pub connection_id: u32,
    pub auth_plugin_data: Vec<u8>,
    pub capabilities: CapabilityFlags,
    pub charset: u8,
    pub status_flags: ServerStatusFlags,
    pub auth_plugin_name: Vec<u8>,
}

/// Read the initial handshake payload from the server.
pub fn read_initial_handshake(payload: &[u8]) -> Result<InitialHandshake> {
    let (protocol_version, data) = read_u8(payload)?;

    // A server refusing the connection greets with ERR instead.
    if protocol_version == 0xFF {
        Err(ErrPayloadBytes(payload))?;
    }

    let (server_version, data) = read_bytes_null(data)?;

    let (fixed, data) =
        HandshakeFixedFields::ref_from_prefix(data).map_err(|_| Error::InvalidPacket)?;

    let capabilities = CapabilityFlags::from_bits_retain(
        (u32::from(fixed.capability_flags_upper.get()) << 16)
            | u32::from(fixed.capability_flags_lower.get()),
    );

    let (_reserved, data) = read_bytes_fixed(data, 10)?;

    // Seed part 2: max(12, auth_data_len - 9) bytes plus a trailing filler.
    let part2_len = (fixed.auth_data_len as usize).saturating_sub(9).max(12);
    let (auth_data_part2, data) = read_bytes_fixed(data, part2_len)?;
    let (_filler, data) = read_u8(data)?;

    let mut auth_plugin_data = Vec::with_capacity(8 + part2_len);
    auth_plugin_data.extend_from_slice(&fixed.auth_data_part1);
    auth_plugin_data.extend_from_slice(auth_data_part2);

    // Some historical servers omit the trailing NUL on the plugin name.
    let auth_plugin_name = if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
        match read_bytes_null(data) {
            Ok((name, _)) => name.to_vec(),
            Err(_) => data.to_vec(),
        }
    } else {
        Vec::new()
    };

    Ok(InitialHandshake {
        protocol_version,
        server_version: server_version.to_vec(),
        connection_id: fixed.connection_id.get(),
        auth_plugin_data,
        capabilities,
        charset: fixed.charset,
        status_flags: ServerStatusFlags::from_bits_truncate(fixed.status_flags.get()),
        auth_plugin_name,
    })
}

/// HandshakeResponse41 fields
#[derive(Debug, Clone)]
pub struct HandshakeResponse<'a> {
    pub capabilities: CapabilityFlags,
    pub max_packet_size: u32,
    pub charset: u8,
    pub username: &'a str,
    pub auth_response: &'a [u8],
    pub database: Option<&'a str>,
    pub auth_plugin_name: Option<&'a [u8]>,
    pub connect_attrs: &'a [(String, String)],
}

pub fn write_handshake_response(out: &mut Vec<u8>, response: &HandshakeResponse<'_>) {
    write_u32(out, response.capabilities.bits());
    write_u32(out, response.max_packet_size);
    write_u8(out, response.charset);
    out.extend_from_slice(&[0u8; 23]);

    write_bytes_null(out, response.username.as_bytes());

    if response
        .capabilities
        .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA)
    {
        write_bytes_lenenc(out, response.auth_response);
    } else {
        write_u8(out, response.auth_response.len() as u8);
        out.extend_from_slice(response.auth_response);
    }

    if let Some(db) = response.database
        && response
            .capabilities
            .contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB)
    {
        write_bytes_null(out, db.as_bytes());
    }

    if let Some(plugin) = response.auth_plugin_name
        && response
            .capabilities
            .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH)
    {
        write_bytes_null(out, plugin);
    }

    if response
        .capabilities
        .contains(CapabilityFlags::CLIENT_CONNECT_ATTRS)
    {
        let mut attrs = Vec::new();
        for (key, value) in response.connect_attrs {
            write_str_lenenc(&mut attrs, key);
            write_str_lenenc(&mut attrs, value);
        }
        write_lenenc_int(out, attrs.len() as u64);
        out.extend_from_slice(&attrs);
    }
}

/// The abbreviated response sent before upgrading the socket to TLS:
/// capabilities, max packet size, charset, 23-byte filler, nothing else.
pub fn write_ssl_request(out: &mut Vec<u8>, capabilities: CapabilityFlags, charset: u8) {
    write_u32(out, capabilities.bits());
    write_u32(out, (MAX_PACKET_SIZE + 1) as u32);
    write_u8(out, charset);
    out.extend_from_slice(&[0u8; 23]);
}

/// Auth switch request (0xFE) sent when the server wants a different plugin.
#[derive(Debug, Clone)]
pub struct AuthSwitchRequest<'a> {
    pub plugin_name: &'a [u8],
    pub plugin_data: &'a [u8],
}

pub fn read_auth_switch_request(payload: &[u8]) -> Result<AuthSwitchRequest<'_>> {
    let (header, data) = read_u8(payload)?;
    if header != 0xFE {
        return Err(Error::InvalidPacket);
    }

    let (plugin_name, data) = read_bytes_null(data)?;
    let plugin_data = match data.last() {
        Some(0) => &data[..data.len() - 1],
        _ => data,
    };
    Ok(AuthSwitchRequest {
        plugin_name,
        plugin_data,
    })
}

// ============================================================================
// State machine
// ============================================================================

/// Inputs the negotiation needs; consumed read-only.
pub struct HandshakeContext {
    pub username: String,
    pub password: String,
    pub database: Option<String>,
    pub capabilities: CapabilityFlags,
    pub compress: bool,
    pub ssl_mode: SslMode,
    pub connect_attrs: Vec<(String, String)>,
    pub registry: Arc<AuthRegistry>,
}

/// What the session must do next.
#[derive(Debug)]
pub enum HandshakeStep {
    /// Write this payload, then read the next server message.
    Reply(Vec<u8>),
    /// Read the next server message without writing.
    ReadMore,
    /// Write the SSL request, upgrade the socket, then call
    /// [`Handshake::resume_after_tls`].
    UpgradeTls { ssl_request: Vec<u8> },
    /// Negotiation finished.
    Done { capabilities: CapabilityFlags },
}

enum State {
    Start,
    AwaitingTlsUpgrade {
        negotiated: CapabilityFlags,
        plugin: Arc<dyn AuthPlugin>,
    },
    AwaitingAuthResult {
        negotiated: CapabilityFlags,
        plugin: Arc<dyn AuthPlugin>,
        tls_active: bool,
    },
    Connected,
}

/// Pure parsing and packet generation for connection establishment; the
/// session owns the socket and feeds payloads through [`Handshake::drive`].
pub struct Handshake {
    ctx: HandshakeContext,
    state: State,
    server: Option<InitialHandshake>,
}

impl Handshake {
    pub fn new(ctx: HandshakeContext) -> Self {
        Self {
            ctx,
            state: State::Start,
            server: None,
        }
    }

    /// The parsed greeting, available after the first `drive` call.
    pub fn server(&self) -> Option<&InitialHandshake> {
        self.server.as_ref()
    }

    pub fn into_server(self) -> Option<InitialHandshake> {
        self.server
    }

    fn negotiate_capabilities(&self, server: &InitialHandshake) -> Result<CapabilityFlags> {
        let mut client = CAPABILITIES_ALWAYS_ENABLED | (self.ctx.capabilities & CAPABILITIES_CONFIGURABLE);
        if self.ctx.database.is_some() {
            client |= CapabilityFlags::CLIENT_CONNECT_WITH_DB;
        }
        if self.ctx.compress {
            client |= CapabilityFlags::CLIENT_COMPRESS;
        }
        if !self.ctx.connect_attrs.is_empty() {
            client |= CapabilityFlags::CLIENT_CONNECT_ATTRS;
        }
        if self.ctx.ssl_mode != SslMode::Disabled {
            client |= CapabilityFlags::CLIENT_SSL;
        }

        let negotiated = client & server.capabilities;

        if self.ctx.compress && !negotiated.contains(CapabilityFlags::CLIENT_COMPRESS) {
            return Err(Error::BadConfigError(
                "compression requested but the server does not support it".to_string(),
            ));
        }
        if self.ctx.ssl_mode == SslMode::Required
            && !negotiated.contains(CapabilityFlags::CLIENT_SSL)
        {
            return Err(Error::BadConfigError(
                "TLS required but the server does not support it".to_string(),
            ));
        }
        Ok(negotiated)
    }

    fn select_plugin(&self, server: &InitialHandshake) -> Result<Arc<dyn AuthPlugin>> {
        let name = if server.capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH)
            && !server.auth_plugin_name.is_empty()
        {
            server.auth_plugin_name.as_slice()
        } else {
            LEGACY_AUTH_PLUGIN
        };
        self.ctx.registry.lookup(name)
    }

    fn build_response(
        &self,
        server: &InitialHandshake,
        negotiated: CapabilityFlags,
        plugin: &Arc<dyn AuthPlugin>,
    ) -> Result<Vec<u8>> {
        let auth_response = plugin.scramble(&self.ctx.password, &server.auth_plugin_data)?;
        let response = HandshakeResponse {
            capabilities: negotiated,
            max_packet_size: (MAX_PACKET_SIZE + 1) as u32,
            charset: UTF8MB4_GENERAL_CI,
            username: &self.ctx.username,
            auth_response: &auth_response,
            database: self.ctx.database.as_deref(),
            auth_plugin_name: Some(plugin.name().as_bytes()),
            connect_attrs: &self.ctx.connect_attrs,
        };
        let mut bytes = Vec::new();
        write_handshake_response(&mut bytes, &response);
        Ok(bytes)
    }

    /// Advance the negotiation with the next server payload.
    pub fn drive(&mut self, payload: &[u8]) -> Result<HandshakeStep> {
        match &self.state {
            State::Start => {
                let server = read_initial_handshake(payload)?;
                let negotiated = self.negotiate_capabilities(&server)?;
                let plugin = self.select_plugin(&server)?;

                if negotiated.contains(CapabilityFlags::CLIENT_SSL) {
                    let mut ssl_request = Vec::new();
                    write_ssl_request(&mut ssl_request, negotiated, UTF8MB4_GENERAL_CI);
                    self.server = Some(server);
                    self.state = State::AwaitingTlsUpgrade { negotiated, plugin };
                    return Ok(HandshakeStep::UpgradeTls { ssl_request });
                }

                let bytes = self.build_response(&server, negotiated, &plugin)?;
                self.server = Some(server);
                self.state = State::AwaitingAuthResult {
                    negotiated,
                    plugin,
                    tls_active: false,
                };
                Ok(HandshakeStep::Reply(bytes))
            }

            State::AwaitingTlsUpgrade { .. } => Err(Error::InvalidPacket),

            State::AwaitingAuthResult {
                negotiated,
                plugin,
                tls_active,
            } => {
                let negotiated = *negotiated;
                let tls_active = *tls_active;
                let plugin = Arc::clone(plugin);
                match payload.first() {
                    None => Err(Error::InvalidPacket),
                    Some(0x00) => {
                        self.state = State::Connected;
                        Ok(HandshakeStep::Done {
                            capabilities: negotiated,
                        })
                    }
                    Some(0xFF) => Err(ErrPayloadBytes(payload).into()),
                    Some(0x01) => {
                        // Auth-more-data: pluggable multi-round exchange
                        match plugin.more_data(&self.ctx.password, &payload[1..], tls_active)? {
                            AuthStep::Respond(bytes) => Ok(HandshakeStep::Reply(bytes)),
                            AuthStep::Done => Ok(HandshakeStep::ReadMore),
                        }
                    }
                    Some(0xFE) => {
                        let switch = read_auth_switch_request(payload)?;
                        let plugin = self.ctx.registry.lookup(switch.plugin_name)?;
                        let bytes = plugin.scramble(&self.ctx.password, switch.plugin_data)?;
                        self.state = State::AwaitingAuthResult {
                            negotiated,
                            plugin,
                            tls_active,
                        };
                        Ok(HandshakeStep::Reply(bytes))
                    }
                    Some(_) => Err(Error::InvalidPacket),
                }
            }

            State::Connected => Err(Error::InvalidPacket),
        }
    }

    /// Continue after the socket has been upgraded to TLS.
    pub fn resume_after_tls(&mut self) -> Result<HandshakeStep> {
        let State::AwaitingTlsUpgrade { negotiated, plugin } = &self.state else {
            return Err(Error::InvalidPacket);
        };
        let negotiated = *negotiated;
        let plugin = Arc::clone(plugin);
        let server = self.server.as_ref().ok_or(Error::InvalidPacket)?;

        let bytes = self.build_response(server, negotiated, &plugin)?;
        self.state = State::AwaitingAuthResult {
            negotiated,
            plugin,
            tls_active: true,
        };
        Ok(HandshakeStep::Reply(bytes))
    }
}
