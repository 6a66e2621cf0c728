// rendezvous-core/src/error.rs

use thiserror::Error;

/// Coordination outcomes a pool join can be refused with.
///
/// These travel on the wire as negative ranks; see [`PoolError::code`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("invalid pool size")]
    InvalidSize,

    #[error("pool already closed")]
    PoolClosed,

    #[error("pool exists with different size")]
    UnequalSize,

    #[error("coordination service ended before the pool was complete")]
    ServiceEnded,

    #[error("unknown join result: {0}")]
    Unknown(i32),
}

impl PoolError {
    pub const INVALID_SIZE: i32 = -1;
    pub const POOL_CLOSED: i32 = -2;
    pub const UNEQUAL_SIZE: i32 = -3;
    pub const SERVICE_ENDED: i32 = -4;

    /// Wire code for this outcome.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidSize => Self::INVALID_SIZE,
            Self::PoolClosed => Self::POOL_CLOSED,
            Self::UnequalSize => Self::UNEQUAL_SIZE,
            Self::ServiceEnded => Self::SERVICE_ENDED,
            Self::Unknown(code) => *code,
        }
    }

    /// Maps a negative wire rank back to its named outcome.
    pub fn from_code(code: i32) -> Self {
        match code {
            Self::INVALID_SIZE => Self::InvalidSize,
            Self::POOL_CLOSED => Self::PoolClosed,
            Self::UNEQUAL_SIZE => Self::UnequalSize,
            Self::SERVICE_ENDED => Self::ServiceEnded,
            other => Self::Unknown(other),
        }
    }
}

#[derive(Error, Debug)]
pub enum RendezvousError {
    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Handshake failed: {message}")]
    Handshake { message: String },

    #[error("Server replied with error: {message}")]
    Remote { message: String },

    #[error("Cannot join pool '{pool}': {source}")]
    Pool {
        pool: String,
        #[source]
        source: PoolError,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Service '{service}' failed: {message}")]
    Service { service: String, message: String },

    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

pub type Result<T> = std::result::Result<T, RendezvousError>;

impl RendezvousError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    pub fn pool(pool: impl Into<String>, source: PoolError) -> Self {
        Self::Pool {
            pool: pool.into(),
            source,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    pub fn transport_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Codec reads map a clean EOF to a protocol error: the peer hung up
    /// in the middle of a message.
    pub fn from_read(context: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::protocol(format!("stream closed mid-message while {context}"))
        } else {
            Self::io(context, source)
        }
    }

    /// The pool outcome behind this error, if it is one.
    pub fn pool_error(&self) -> Option<PoolError> {
        match self {
            Self::Pool { source, .. } => Some(*source),
            _ => None,
        }
    }

    /// True when the peer closed the stream (cleanly or mid-message).
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Protocol { message } => message.starts_with("stream closed"),
            Self::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }
}
