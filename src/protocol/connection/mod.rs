mod handshake;

pub use handshake::{
    AuthSwitchRequest, Handshake, HandshakeContext, HandshakeResponse, HandshakeStep,
    InitialHandshake, read_auth_switch_request, read_initial_handshake, write_handshake_response,
    write_ssl_request,
};
