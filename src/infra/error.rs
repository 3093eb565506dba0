use std::{io, net::SocketAddr};

use thiserror::Error;
use tracing_subscriber::util::TryInitError;

use crate::cache::RemoteError;

/// Failures while bringing the process up or tearing it down.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("failed to bind http listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("http server stopped with an error")]
    Serve(#[source] io::Error),
    #[error("redis client could not be created")]
    RemoteClient(#[source] RemoteError),
    #[error("redis did not answer PING")]
    RemoteUnreachable,
    #[error("`cache clear` needs a redis url (set --redis-url or redis.url)")]
    RemoteNotConfigured,
    #[error("failed to install tracing subscriber")]
    Telemetry(#[source] TryInitError),
}

impl InfraError {
    pub fn bind(addr: SocketAddr, source: io::Error) -> Self {
        Self::Bind { addr, source }
    }
}
