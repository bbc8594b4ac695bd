//! Connection Manager
//!
//! Owns the lifecycle of client-facing sessions and the pooled, reconnecting
//! connections to backend tool servers:
//!
//! - `channel` - multiplexed wire channel with request/response correlation
//! - `connection` - per-backend connection state machine with backoff
//! - `manager` - the pool itself (single-flight dialing, sweeps, stats)
//! - `session` - session bookkeeping (register/touch/close, stream delivery)
//!
//! Sessions never own connections: a session records backend identities and
//! looks the live handle up per call, so the pool can recycle a connection
//! underneath a session without coordination.

mod channel;
mod connection;
mod manager;
mod session;

pub use channel::{ChannelError, WireChannel};
pub use connection::{ConnectionState, PooledConnection};
pub use manager::{ConnectionManager, PoolStats};
pub use session::{Session, SessionRegistry};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use unigate_core::BackendServerRecord;

/// Byte stream to a backend server.
pub trait BackendStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> BackendStream for T {}

pub type BoxedStream = Box<dyn BackendStream>;

/// Dials the transport for one backend server. Production uses TCP; tests
/// substitute in-memory duplex streams.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(&self, record: &BackendServerRecord) -> anyhow::Result<BoxedStream>;
}

/// TCP connector for `host:port` endpoints.
pub struct TcpConnector;

#[async_trait]
impl BackendConnector for TcpConnector {
    async fn connect(&self, record: &BackendServerRecord) -> anyhow::Result<BoxedStream> {
        let stream = TcpStream::connect(&record.endpoint).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
