//! Persistent per-line connection to the receiving system.
//!
//! A [`ConnectionManager`] owns at most one live stream. It dials with bounded
//! exponential backoff, performs one request/reply exchange at a time, and
//! drops the stream on any failure so the next [`ensure_connected`] re-dials.
//!
//! Dialing is abstracted behind [`Dialer`] so CSV and XML workers share the
//! same manager and tests can inject scripted transports.
//!
//! [`ensure_connected`]: ConnectionManager::ensure_connected

use crate::models::ConnectPolicy;
use crate::services::codec::Ack;
use crate::services::stop::StopSignal;
use std::future::Future;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Largest acknowledgement read in one exchange
pub const RECV_BUFFER_SIZE: usize = 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Failed to connect to {endpoint} after {attempts} attempts: {last_error}")]
    Exhausted {
        endpoint: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Stop requested while connecting")]
    Stopped,
}

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("No active connection")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed by peer")]
    Closed,

    #[error("No reply within {0:?}")]
    Timeout(Duration),
}

/// Opens transport streams to an endpoint
pub trait Dialer: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn dial(&self, endpoint: &str) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Plain TCP dialer used in production
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self, endpoint: &str) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(endpoint).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Delay before retrying after failed attempt number `attempt` (0-based)
pub fn backoff_delay(policy: &ConnectPolicy, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    policy
        .initial_backoff
        .saturating_mul(factor)
        .min(policy.max_backoff)
}

/// Write `payload`, then wait for a single non-empty reply
pub async fn exchange<S>(
    stream: &mut S,
    payload: &[u8],
    read_timeout: Duration,
) -> Result<Ack, ExchangeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(payload).await?;
    stream.flush().await?;

    let mut buf = [0u8; RECV_BUFFER_SIZE];
    let read = timeout(read_timeout, stream.read(&mut buf))
        .await
        .map_err(|_| ExchangeError::Timeout(read_timeout))??;

    Ack::decode(&buf[..read]).ok_or(ExchangeError::Closed)
}

/// Owns one line's socket
pub struct ConnectionManager<D: Dialer> {
    dialer: D,
    endpoint: String,
    policy: ConnectPolicy,
    stream: Option<D::Stream>,
}

impl<D: Dialer> ConnectionManager<D> {
    pub fn new(dialer: D, endpoint: impl Into<String>, policy: ConnectPolicy) -> Self {
        Self {
            dialer,
            endpoint: endpoint.into(),
            policy,
            stream: None,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Dial if not connected, retrying with exponential backoff.
    ///
    /// Gives up after `policy.max_attempts` dials; the caller is expected to
    /// try again on its next poll tick. Backoff sleeps end early on stop.
    pub async fn ensure_connected(&mut self, stop: &mut StopSignal) -> Result<(), ConnectError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if stop.is_stopped() {
                return Err(ConnectError::Stopped);
            }

            let dialed = timeout(self.policy.read_timeout, self.dialer.dial(&self.endpoint)).await;
            match dialed {
                Ok(Ok(stream)) => {
                    tracing::info!(
                        "Connected to {} on attempt {}",
                        self.endpoint,
                        attempt + 1
                    );
                    self.stream = Some(stream);
                    return Ok(());
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        "Attempt {}: error connecting to {} - {}",
                        attempt + 1,
                        self.endpoint,
                        e
                    );
                    last_error = e.to_string();
                }
                Err(_) => {
                    tracing::warn!(
                        "Attempt {}: connecting to {} timed out after {:?}",
                        attempt + 1,
                        self.endpoint,
                        self.policy.read_timeout
                    );
                    last_error = "connect timed out".to_string();
                }
            }

            if attempt + 1 < attempts {
                let delay = backoff_delay(&self.policy, attempt);
                tracing::debug!("Retrying {} in {:?}", self.endpoint, delay);
                if stop.sleep(delay).await {
                    return Err(ConnectError::Stopped);
                }
            }
        }

        Err(ConnectError::Exhausted {
            endpoint: self.endpoint.clone(),
            attempts,
            last_error,
        })
    }

    /// Send one payload and wait for the reply.
    ///
    /// Any failure (I/O error, empty read, timeout) drops the stream.
    pub async fn send_and_receive(&mut self, payload: &[u8]) -> Result<Ack, ExchangeError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(ExchangeError::NotConnected);
        };

        let result = exchange(stream, payload, self.policy.read_timeout).await;
        if let Err(e) = &result {
            tracing::warn!("Connection to {} lost: {}", self.endpoint, e);
            self.disconnect();
        }
        result
    }

    /// Drop the stream without a graceful shutdown
    pub fn disconnect(&mut self) {
        self.stream = None;
    }

    /// Shut the stream down cleanly, if one is open
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!("Shutdown of {} failed: {}", self.endpoint, e);
            }
        }
    }
}
