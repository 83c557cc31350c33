//! In-process scripted server for protocol scenario tests.
//!
//! Speaks just enough of the server side of the wire protocol to drive the
//! client through handshakes, result sets, and the compressed framing.

#![allow(dead_code)]

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use conduit_mysql::Opts;
use conduit_mysql::constant::{
    CapabilityFlags, ColumnFlags, ColumnType, MAX_PACKET_SIZE, UTF8MB4_GENERAL_CI,
};
use conduit_mysql::protocol::compress::{COMPRESSED_HEADER_LEN, CompressedFramer, CompressedHeader};
use conduit_mysql::protocol::packet::{Conversation, write_payload_packets};
use conduit_mysql::protocol::primitive::*;
use zerocopy::FromBytes;

/// Capabilities the scripted server advertises by default.
pub fn default_server_caps() -> CapabilityFlags {
    CapabilityFlags::CLIENT_PROTOCOL_41
        | CapabilityFlags::CLIENT_SECURE_CONNECTION
        | CapabilityFlags::CLIENT_LONG_PASSWORD
        | CapabilityFlags::CLIENT_LONG_FLAG
        | CapabilityFlags::CLIENT_TRANSACTIONS
        | CapabilityFlags::CLIENT_PLUGIN_AUTH
        | CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CapabilityFlags::CLIENT_CONNECT_WITH_DB
        | CapabilityFlags::CLIENT_DEPRECATE_EOF
}

struct Compressed {
    framer: CompressedFramer,
    inflated: Vec<u8>,
    cursor: usize,
}

/// One accepted connection, server side.
pub struct ServerConn {
    stream: TcpStream,
    conversation: Conversation,
    compressed: Option<Compressed>,
    pub connection_id: u32,
}

impl ServerConn {
    async fn read_exact_wire(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match &mut self.compressed {
            None => {
                self.stream.read_exact(buf).await?;
                Ok(())
            }
            Some(c) => {
                let mut filled = 0;
                while filled < buf.len() {
                    if c.cursor == c.inflated.len() {
                        let mut header = [0u8; COMPRESSED_HEADER_LEN];
                        self.stream.read_exact(&mut header).await?;
                        let header = CompressedHeader::read_from_bytes(&header).unwrap();
                        c.framer.accept(header.sequence_id).unwrap();
                        let mut body = vec![0u8; header.compressed_length()];
                        self.stream.read_exact(&mut body).await?;
                        c.inflated.clear();
                        c.cursor = 0;
                        CompressedFramer::decode_frame(&header, &body, &mut c.inflated).unwrap();
                    }
                    let take = (buf.len() - filled).min(c.inflated.len() - c.cursor);
                    buf[filled..filled + take]
                        .copy_from_slice(&c.inflated[c.cursor..c.cursor + take]);
                    c.cursor += take;
                    filled += take;
                }
                Ok(())
            }
        }
    }

    /// Read one logical payload (multi-packet aware).
    pub async fn read_payload(&mut self) -> std::io::Result<Vec<u8>> {
        let mut payload = Vec::new();
        loop {
            let mut header = [0u8; 4];
            self.read_exact_wire(&mut header).await?;
            let length = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
            self.conversation.accept(header[3]).unwrap();
            let start = payload.len();
            payload.resize(start + length, 0);
            self.read_exact_wire(&mut payload[start..]).await?;
            if length < MAX_PACKET_SIZE {
                return Ok(payload);
            }
        }
    }

    /// Reset sequence scopes and read the next command payload.
    pub async fn read_command(&mut self) -> std::io::Result<Vec<u8>> {
        self.conversation.reset();
        if let Some(c) = &mut self.compressed {
            c.framer.reset();
        }
        self.read_payload().await
    }

    pub async fn write_payload(&mut self, payload: &[u8]) -> std::io::Result<()> {
        let mut wire = Vec::new();
        write_payload_packets(&mut wire, payload, &mut self.conversation);
        match &mut self.compressed {
            None => self.stream.write_all(&wire).await,
            Some(c) => {
                let mut frames = Vec::new();
                c.framer.write_frames(&mut frames, &wire).unwrap();
                self.stream.write_all(&frames).await
            }
        }
    }

    /// Send the greeting, consume the handshake response, and confirm with
    /// OK. Returns the raw handshake response payload.
    pub async fn handshake(&mut self, caps: CapabilityFlags) -> std::io::Result<Vec<u8>> {
        let greeting = greeting_payload(self.connection_id, caps);
        self.write_payload(&greeting).await?;

        let response = self.read_payload().await?;
        let (client_caps, _) = read_u32(&response).unwrap();
        let client_caps = CapabilityFlags::from_bits_retain(client_caps);

        self.write_payload(&ok_payload(0, 0, 0x0002)).await?;

        if client_caps.contains(CapabilityFlags::CLIENT_COMPRESS) {
            self.compressed = Some(Compressed {
                framer: CompressedFramer::new(),
                inflated: Vec::new(),
                cursor: 0,
            });
        }
        Ok(response)
    }

    /// Send a text-protocol result set (assumes DEPRECATE_EOF was offered).
    pub async fn send_text_resultset(
        &mut self,
        columns: &[(&str, ColumnType)],
        rows: &[Vec<Option<&str>>],
    ) -> std::io::Result<()> {
        let mut header = Vec::new();
        write_lenenc_int(&mut header, columns.len() as u64);
        self.write_payload(&header).await?;

        for (name, ty) in columns {
            let def = column_def(name, *ty, ColumnFlags::empty(), u16::from(UTF8MB4_GENERAL_CI), 80);
            self.write_payload(&def).await?;
        }

        for row in rows {
            let mut payload = Vec::new();
            for value in row {
                match value {
                    None => payload.push(0xFB),
                    Some(text) => write_str_lenenc(&mut payload, text),
                }
            }
            self.write_payload(&payload).await?;
        }

        self.write_payload(&eof_ok_payload(0x0002)).await
    }
}

/// Scripted server: runs one handler task per accepted connection.
pub struct TestServer {
    pub port: u16,
}

impl TestServer {
    pub async fn spawn<F, Fut>(handler: F) -> TestServer
    where
        F: Fn(ServerConn) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handler = Arc::new(handler);

        tokio::spawn(async move {
            let mut next_connection_id = 40;
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                next_connection_id += 1;
                let conn = ServerConn {
                    stream,
                    conversation: Conversation::new(),
                    compressed: None,
                    connection_id: next_connection_id,
                };
                let handler = Arc::clone(&handler);
                tokio::spawn(async move { handler(conn).await });
            }
        });

        TestServer { port }
    }

    pub fn opts(&self, compress: bool) -> Opts {
        let mut opts = Opts::default();
        opts.hosts = vec!["127.0.0.1".to_string()];
        opts.port = self.port;
        opts.user = "test".to_string();
        opts.password = Some("hunter2".to_string());
        opts.compress = compress;
        opts
    }
}

// ============================================================================
// Payload builders
// ============================================================================

pub fn greeting_payload(connection_id: u32, caps: CapabilityFlags) -> Vec<u8> {
    let mut payload = vec![10];
    payload.extend_from_slice(b"8.0.39\0");
    write_u32(&mut payload, connection_id);
    payload.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
    payload.push(0);
    write_u16(&mut payload, (caps.bits() & 0xFFFF) as u16);
    payload.push(UTF8MB4_GENERAL_CI);
    write_u16(&mut payload, 0x0002);
    write_u16(&mut payload, (caps.bits() >> 16) as u16);
    payload.push(21);
    payload.extend_from_slice(&[0u8; 10]);
    payload.extend_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20]);
    payload.push(0);
    payload.extend_from_slice(b"mysql_native_password\0");
    payload
}

pub fn ok_payload(affected: u64, last_insert_id: u64, status: u16) -> Vec<u8> {
    let mut payload = vec![0x00];
    write_lenenc_int(&mut payload, affected);
    write_lenenc_int(&mut payload, last_insert_id);
    write_u16(&mut payload, status);
    write_u16(&mut payload, 0);
    payload
}

/// Result-set terminator under DEPRECATE_EOF: an OK payload with 0xFE header.
pub fn eof_ok_payload(status: u16) -> Vec<u8> {
    let mut payload = vec![0xFE];
    write_lenenc_int(&mut payload, 0);
    write_lenenc_int(&mut payload, 0);
    write_u16(&mut payload, status);
    write_u16(&mut payload, 0);
    payload
}

pub fn err_payload(code: u16, sql_state: &str, message: &str) -> Vec<u8> {
    let mut payload = vec![0xFF];
    write_u16(&mut payload, code);
    payload.push(b'#');
    payload.extend_from_slice(sql_state.as_bytes());
    payload.extend_from_slice(message.as_bytes());
    payload
}

pub fn column_def(
    name: &str,
    ty: ColumnType,
    flags: ColumnFlags,
    charset: u16,
    length: u32,
) -> Vec<u8> {
    let mut payload = Vec::new();
    write_str_lenenc(&mut payload, "def");
    write_str_lenenc(&mut payload, "testdb");
    write_str_lenenc(&mut payload, "t");
    write_str_lenenc(&mut payload, "t");
    write_str_lenenc(&mut payload, name);
    write_str_lenenc(&mut payload, name);
    write_lenenc_int(&mut payload, 0x0c);
    write_u16(&mut payload, charset);
    write_u32(&mut payload, length);
    write_u8(&mut payload, ty as u8);
    write_u16(&mut payload, flags.bits());
    write_u8(&mut payload, 0);
    write_u16(&mut payload, 0);
    payload
}

/// The SQL text of a COM_QUERY payload.
pub fn query_text(payload: &[u8]) -> Option<String> {
    if payload.first() == Some(&0x03) {
        Some(String::from_utf8_lossy(&payload[1..]).to_string())
    } else {
        None
    }
}
