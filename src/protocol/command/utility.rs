use crate::constant::CommandByte;
use crate::protocol::primitive::*;

/// Write COM_QUIT
pub fn write_quit(out: &mut Vec<u8>) {
    write_u8(out, CommandByte::Quit as u8);
}

/// Write COM_PING
pub fn write_ping(out: &mut Vec<u8>) {
    write_u8(out, CommandByte::Ping as u8);
}

/// Write COM_INIT_DB
pub fn write_init_db(out: &mut Vec<u8>, database: &str) {
    write_u8(out, CommandByte::InitDb as u8);
    out.extend_from_slice(database.as_bytes());
}

/// Write COM_RESET_CONNECTION
pub fn write_reset_connection(out: &mut Vec<u8>) {
    write_u8(out, CommandByte::ResetConnection as u8);
}

/// Write COM_CHANGE_USER
///
/// Re-authenticates in place; used as the pool-reset fallback for servers
/// without COM_RESET_CONNECTION.
pub fn write_change_user(
    out: &mut Vec<u8>,
    username: &str,
    auth_response: &[u8],
    database: Option<&str>,
    charset: u8,
    auth_plugin_name: &str,
) {
    write_u8(out, CommandByte::ChangeUser as u8);
    write_bytes_null(out, username.as_bytes());
    write_u8(out, auth_response.len() as u8);
    out.extend_from_slice(auth_response);
    write_bytes_null(out, database.unwrap_or("").as_bytes());
    write_u16(out, u16::from(charset));
    write_bytes_null(out, auth_plugin_name.as_bytes());
}
