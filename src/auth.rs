//! Authentication plugins.
//!
//! A plugin turns `(password, server challenge)` into the credential bytes
//! the server expects. Plugins are looked up by name in an [`AuthRegistry`]
//! owned by the pool manager (or whoever creates sessions); there is no
//! process-global registry.

use std::collections::HashMap;
use std::sync::Arc;

use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::error::{Error, Result};

/// What a plugin wants to do with a mid-exchange server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStep {
    /// Send these bytes and keep reading.
    Respond(Vec<u8>),
    /// Nothing to send; the next server message should be the final OK/ERR.
    Done,
}

pub trait AuthPlugin: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Initial credential response for the handshake (or auth switch).
    fn scramble(&self, password: &str, challenge: &[u8]) -> Result<Vec<u8>>;

    /// Handle an auth-more-data message (0x01-prefixed, payload stripped).
    ///
    /// Only multi-round plugins override this.
    fn more_data(&self, _password: &str, _data: &[u8], _tls_active: bool) -> Result<AuthStep> {
        Err(Error::InvalidPacket)
    }
}

/// `mysql_native_password`: SHA1(password) XOR SHA1(challenge + SHA1(SHA1(password)))
#[derive(Debug)]
pub struct NativePassword;

impl NativePassword {
    /// 20-byte scramble, shared with COM_CHANGE_USER re-authentication.
    pub fn scramble_bytes(password: &str, challenge: &[u8]) -> [u8; 20] {
        if password.is_empty() {
            return [0u8; 20];
        }

        let stage1 = Sha1::digest(password.as_bytes());
        let stage2 = Sha1::digest(stage1);

        let mut hasher = Sha1::new();
        hasher.update(&challenge[..challenge.len().min(20)]);
        hasher.update(stage2);
        let token = hasher.finalize();

        let mut result = [0u8; 20];
        for (i, byte) in result.iter_mut().enumerate() {
            *byte = stage1[i] ^ token[i];
        }
        result
    }
}

impl AuthPlugin for NativePassword {
    fn name(&self) -> &'static str {
        "mysql_native_password"
    }

    fn scramble(&self, password: &str, challenge: &[u8]) -> Result<Vec<u8>> {
        if password.is_empty() {
            return Ok(Vec::new());
        }
        Ok(Self::scramble_bytes(password, challenge).to_vec())
    }
}

/// `caching_sha2_password`: XOR(SHA256(password), SHA256(SHA256(SHA256(password)) + challenge))
///
/// Fast path: the server answers the scramble with 0x03 (cache hit) followed
/// by OK. Cache miss: 0x04, after which the cleartext password may only be
/// sent over TLS.
#[derive(Debug)]
pub struct CachingSha2;

const FAST_AUTH_SUCCESS: u8 = 0x03;
const PERFORM_FULL_AUTHENTICATION: u8 = 0x04;

impl CachingSha2 {
    pub fn scramble_bytes(password: &str, challenge: &[u8]) -> [u8; 32] {
        if password.is_empty() {
            return [0u8; 32];
        }

        let stage1 = Sha256::digest(password.as_bytes());
        let stage2 = Sha256::digest(stage1);

        let mut hasher = Sha256::new();
        hasher.update(stage2);
        hasher.update(&challenge[..challenge.len().min(20)]);
        let token = hasher.finalize();

        let mut result = [0u8; 32];
        for (i, byte) in result.iter_mut().enumerate() {
            *byte = stage1[i] ^ token[i];
        }
        result
    }
}

impl AuthPlugin for CachingSha2 {
    fn name(&self) -> &'static str {
        "caching_sha2_password"
    }

    fn scramble(&self, password: &str, challenge: &[u8]) -> Result<Vec<u8>> {
        if password.is_empty() {
            return Ok(Vec::new());
        }
        Ok(Self::scramble_bytes(password, challenge).to_vec())
    }

    fn more_data(&self, password: &str, data: &[u8], tls_active: bool) -> Result<AuthStep> {
        match data.first() {
            Some(&FAST_AUTH_SUCCESS) => Ok(AuthStep::Done),
            Some(&PERFORM_FULL_AUTHENTICATION) => {
                if !tls_active {
                    return Err(Error::UnsupportedAuthPlugin(
                        "caching_sha2_password full authentication requires TLS".to_string(),
                    ));
                }
                let mut response = password.as_bytes().to_vec();
                response.push(0);
                Ok(AuthStep::Respond(response))
            }
            _ => Err(Error::InvalidPacket),
        }
    }
}

/// `mysql_clear_password`: the password itself, NUL-terminated. TLS only.
#[derive(Debug)]
pub struct ClearPassword;

impl AuthPlugin for ClearPassword {
    fn name(&self) -> &'static str {
        "mysql_clear_password"
    }

    fn scramble(&self, password: &str, _challenge: &[u8]) -> Result<Vec<u8>> {
        let mut response = password.as_bytes().to_vec();
        response.push(0);
        Ok(response)
    }
}

/// Name → plugin mapping consulted during handshake and auth switch.
pub struct AuthRegistry {
    plugins: HashMap<&'static str, Arc<dyn AuthPlugin>>,
}

impl AuthRegistry {
    pub fn empty() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    /// Registry pre-loaded with the built-in plugins.
    pub fn with_builtin_plugins() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(NativePassword));
        registry.register(Arc::new(CachingSha2));
        registry.register(Arc::new(ClearPassword));
        registry
    }

    pub fn register(&mut self, plugin: Arc<dyn AuthPlugin>) {
        self.plugins.insert(plugin.name(), plugin);
    }

    /// Unknown names fail hard; there is no fallback between plugins.
    pub fn lookup(&self, name: &[u8]) -> Result<Arc<dyn AuthPlugin>> {
        let name = std::str::from_utf8(name)
            .map_err(|_| Error::UnsupportedAuthPlugin(String::from_utf8_lossy(name).to_string()))?;
        self.plugins
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnsupportedAuthPlugin(name.to_string()))
    }
}

impl Default for AuthRegistry {
    fn default() -> Self {
        Self::with_builtin_plugins()
    }
}
