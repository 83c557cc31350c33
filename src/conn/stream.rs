use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Remaining wall-clock budget for one operation.
///
/// Created once per command from the configured timeout and threaded through
/// every I/O call; when it runs out the pending I/O resolves to
/// [`Error::Timeout`] instead of a generic I/O error.
#[derive(Debug, Clone, Copy)]
pub struct TimeBudget {
    deadline: Option<Instant>,
}

impl TimeBudget {
    pub fn new(limit: Option<Duration>) -> Self {
        Self {
            deadline: limit.map(|d| Instant::now() + d),
        }
    }

    pub fn unlimited() -> Self {
        Self { deadline: None }
    }

    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::io::Result<T>>,
    {
        match self.deadline {
            None => Ok(fut.await?),
            Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
                Ok(result) => Ok(result?),
                Err(_) => Err(Error::Timeout),
            },
        }
    }
}

/// Raw duplex byte transport: TCP, TLS-wrapped TCP, or unix socket.
///
/// `Detached` stands in while the socket is temporarily owned elsewhere
/// (mid TLS upgrade); any I/O on it fails fast.
pub enum Stream {
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_native_tls::TlsStream<TcpStream>>),
    #[cfg(unix)]
    Unix(UnixStream),
    Detached,
}

impl Stream {
    pub fn tcp(stream: TcpStream) -> Self {
        Self::Tcp(stream)
    }

    #[cfg(unix)]
    pub fn unix(stream: UnixStream) -> Self {
        Self::Unix(stream)
    }

    /// Wrap the underlying TCP stream in TLS, in place, as part of the
    /// handshake's SSL upgrade.
    #[cfg(feature = "tls")]
    pub async fn upgrade_to_tls(self, host: &str, budget: &TimeBudget) -> Result<Self> {
        let tcp = match self {
            Self::Tcp(tcp) => tcp,
            _ => {
                return Err(Error::BadConfigError(
                    "TLS upgrade requires a plain TCP stream".to_string(),
                ));
            }
        };

        let connector = native_tls::TlsConnector::new()
            .map_err(|e| Error::BadConfigError(format!("TLS setup failed: {e}")))?;
        let connector = tokio_native_tls::TlsConnector::from(connector);
        let tls = budget
            .run(async {
                connector
                    .connect(host, tcp)
                    .await
                    .map_err(|e| std::io::Error::other(e))
            })
            .await?;
        Ok(Self::Tls(Box::new(tls)))
    }

    #[cfg(not(feature = "tls"))]
    pub async fn upgrade_to_tls(self, _host: &str, _budget: &TimeBudget) -> Result<Self> {
        Err(Error::BadConfigError(
            "TLS requested but the 'tls' feature is not enabled".to_string(),
        ))
    }

    fn inner(&mut self) -> Result<&mut (dyn AsyncReadWrite + Unpin)> {
        match self {
            Self::Tcp(s) => Ok(s),
            #[cfg(feature = "tls")]
            Self::Tls(s) => Ok(s.as_mut()),
            #[cfg(unix)]
            Self::Unix(s) => Ok(s),
            Self::Detached => Err(Error::NotConnected),
        }
    }

    pub async fn read_exact(&mut self, buf: &mut [u8], budget: &TimeBudget) -> Result<()> {
        let inner = self.inner()?;
        budget
            .run(async move {
                inner.read_exact(buf).await?;
                Ok(())
            })
            .await
    }

    pub async fn write_all(&mut self, buf: &[u8], budget: &TimeBudget) -> Result<()> {
        let inner = self.inner()?;
        budget
            .run(async move {
                inner.write_all(buf).await?;
                inner.flush().await
            })
            .await
    }
}

trait AsyncReadWrite: AsyncRead + AsyncWrite + Send {}
impl<T: AsyncRead + AsyncWrite + Send> AsyncReadWrite for T {}
