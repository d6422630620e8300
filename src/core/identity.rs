//! Identity types for sessions
//!
//! SessionId: per-peer session identifier
//! CounterpartyRef: routing data for the other side of a session

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{CoreError, InvalidId};

const INITIATED_SUFFIX: &str = "-INITIATED";
const MAX_SESSION_ID_LEN: usize = 200;

/// Session identifier.
///
/// The initiating peer owns `X`; the initiated peer owns `X-INITIATED`. Events
/// on the wire carry the sender's id, so the receiver looks up its own state
/// with [`SessionId::counterparty`]. Ids double as store keys (and file names),
/// so the alphabet is restricted to `[A-Za-z0-9._-]`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn new(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        let invalid = |reason: &str| -> CoreError {
            InvalidId::Session {
                raw: s.clone(),
                reason: reason.into(),
            }
            .into()
        };
        if s.is_empty() {
            return Err(invalid("empty"));
        }
        if s.len() > MAX_SESSION_ID_LEN {
            return Err(invalid("too long"));
        }
        if s.starts_with('.') {
            return Err(invalid("must not start with '.'"));
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
        {
            return Err(invalid("allowed characters are [A-Za-z0-9._-]"));
        }
        Ok(Self(s))
    }

    /// Fresh random id for a session this peer initiates.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_initiated(&self) -> bool {
        self.0.ends_with(INITIATED_SUFFIX)
    }

    /// The id the other peer uses for this same session.
    pub fn counterparty(&self) -> SessionId {
        match self.0.strip_suffix(INITIATED_SUFFIX) {
            Some(base) => SessionId(base.to_string()),
            None => SessionId(format!("{}{INITIATED_SUFFIX}", self.0)),
        }
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({:?})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SessionId::new(value)
    }
}

impl From<SessionId> for String {
    fn from(value: SessionId) -> String {
        value.0
    }
}

/// Opaque addressing data for the peer.
///
/// Copied out of the `Init` exchange and never touched by the protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterpartyRef {
    pub party: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl CounterpartyRef {
    pub fn new(party: impl Into<String>) -> Result<Self, CoreError> {
        let party = party.into();
        if party.trim().is_empty() {
            return Err(InvalidId::Counterparty {
                raw: party,
                reason: "empty".into(),
            }
            .into());
        }
        Ok(Self {
            party,
            endpoint: None,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}
