//! Remote-control protocol constants and messages.

use std::time::Duration;

use crate::host::Statistics;

pub const MAGIC: u8 = 53;

/// Version 2 carries the local address in the handshake reply and adds
/// the service-name and statistics requests.
pub const VERSION: i32 = 2;

pub const OPCODE_ADD_HUBS: u8 = 1;
pub const OPCODE_GET_HUBS: u8 = 2;
pub const OPCODE_GET_SERVICE_NAMES: u8 = 3;
pub const OPCODE_GET_STATISTICS: u8 = 4;
pub const OPCODE_END: u8 = 5;

pub const REPLY_OK: u8 = 1;
pub const REPLY_ERROR: u8 = 2;

/// Stands in for an absent statistics value.
pub const NULL_VALUE: &str = "<null>";

/// Prefix of every line the server writes in line framing.
pub const SERVER_MARKER: &str = "RDV-SERVER ";
/// Prefix of every line the controller writes in line framing.
pub const CLIENT_MARKER: &str = "RDV-CONTROL ";

/// Keywords used by the line framing.
pub mod keyword {
    pub const HELLO: &str = "HELLO";
    pub const ADD_HUBS: &str = "ADD_HUBS";
    pub const GET_HUBS: &str = "GET_HUBS";
    pub const GET_SERVICE_NAMES: &str = "GET_SERVICE_NAMES";
    pub const GET_STATISTICS: &str = "GET_STATISTICS";
    pub const END: &str = "END";
    pub const OK: &str = "OK";
    pub const ERROR: &str = "ERROR";
}

/// First message on a stream, sent by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    /// A byte on the binary wire; wider so a garbled line handshake can
    /// still be answered with a rejection.
    pub magic: i32,
    pub version: i32,
}

impl Hello {
    pub fn current() -> Self {
        Self {
            magic: MAGIC.into(),
            version: VERSION,
        }
    }

    /// Checks the handshake, returning the message to reject it with.
    pub fn check(&self) -> Result<(), String> {
        if self.magic != i32::from(MAGIC) {
            return Err(format!(
                "wrong magic byte: {} instead of {MAGIC}",
                self.magic
            ));
        }
        if self.version != VERSION {
            return Err(format!(
                "wrong version: {} instead of {VERSION}",
                self.version
            ));
        }
        Ok(())
    }
}

/// The server's answer to [`Hello`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelloReply {
    Accepted { local_address: String },
    Rejected { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    AddHubs(Vec<String>),
    GetHubs,
    GetServiceNames,
    GetStatistics(String),
    /// Shutdown timeout in milliseconds; zero or less ends at once.
    End(i64),
}

impl Request {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::AddHubs(_) => OPCODE_ADD_HUBS,
            Self::GetHubs => OPCODE_GET_HUBS,
            Self::GetServiceNames => OPCODE_GET_SERVICE_NAMES,
            Self::GetStatistics(_) => OPCODE_GET_STATISTICS,
            Self::End(_) => OPCODE_END,
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Self::AddHubs(_) => keyword::ADD_HUBS,
            Self::GetHubs => keyword::GET_HUBS,
            Self::GetServiceNames => keyword::GET_SERVICE_NAMES,
            Self::GetStatistics(_) => keyword::GET_STATISTICS,
            Self::End(_) => keyword::END,
        }
    }
}

/// Successful reply bodies. Which one follows an OK status is implied by
/// the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Done,
    Hubs(Vec<String>),
    ServiceNames(Vec<String>),
    Statistics(Option<Statistics>),
}

/// Converts a wire timeout to the host's shutdown timeout.
pub fn end_timeout(millis: i64) -> Duration {
    u64::try_from(millis)
        .map(Duration::from_millis)
        .unwrap_or(Duration::ZERO)
}

pub fn encode_value(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or(NULL_VALUE)
}

pub fn decode_value(value: String) -> Option<String> {
    if value == NULL_VALUE {
        None
    } else {
        Some(value)
    }
}
