//! Thread link types
//!
//! A thread link coordinates one inbound conversation thread with at most one
//! downstream ticket. Its lifecycle is `Pending -> Committed -> (deleted)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a ticket in the downstream ticketing system.
///
/// Always positive. Construction through [`TicketRef::new`] rejects zero and
/// negative values so a stored reference can never be confused with an
/// in-progress claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct TicketRef(i64);

impl TicketRef {
    pub fn new(value: i64) -> Option<Self> {
        (value > 0).then_some(Self(value))
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for TicketRef {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("ticket reference must be positive, got {value}"))
    }
}

impl From<TicketRef> for i64 {
    fn from(value: TicketRef) -> Self {
        value.0
    }
}

impl fmt::Display for TicketRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// State of a thread link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "ticket_ref", rename_all = "snake_case")]
pub enum LinkState {
    /// Claimed by some caller; ticket creation has not been committed yet.
    Pending,
    /// Linked to a downstream ticket.
    Committed(TicketRef),
}

impl LinkState {
    /// Decode the nullable `ticket_ref` column.
    pub fn from_column(ticket_ref: Option<i64>) -> Self {
        match ticket_ref.and_then(TicketRef::new) {
            Some(r) => LinkState::Committed(r),
            None => LinkState::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, LinkState::Pending)
    }

    pub fn ticket_ref(&self) -> Option<TicketRef> {
        match self {
            LinkState::Pending => None,
            LinkState::Committed(r) => Some(*r),
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Pending => write!(f, "pending"),
            LinkState::Committed(r) => write!(f, "committed({r})"),
        }
    }
}

/// A stored thread link row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadLink {
    /// Stable identifier of the inbound thread
    pub thread_key: String,
    /// Pending or committed ticket
    pub state: LinkState,
    /// Originating channel, needed to route updates back into the thread
    pub channel_ref: String,
    /// Claim time
    pub created_at: DateTime<Utc>,
}

/// Where updates for a ticket should be posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadLocation {
    pub thread_key: String,
    pub channel_ref: String,
}

/// Row counts for the link table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    pub total: u64,
    pub pending: u64,
    pub committed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_ref_rejects_non_positive() {
        assert!(TicketRef::new(0).is_none());
        assert!(TicketRef::new(-1).is_none());
        assert_eq!(TicketRef::new(42).map(|r| r.get()), Some(42));
    }

    #[test]
    fn test_link_state_from_column() {
        assert_eq!(LinkState::from_column(None), LinkState::Pending);
        assert_eq!(
            LinkState::from_column(Some(7)),
            LinkState::Committed(TicketRef::new(7).unwrap())
        );
        assert!(LinkState::from_column(None).is_pending());
    }

    #[test]
    fn test_link_state_serialization() {
        let committed = LinkState::Committed(TicketRef::new(42).unwrap());
        let json = serde_json::to_value(committed).unwrap();
        assert_eq!(json["state"], "committed");
        assert_eq!(json["ticket_ref"], 42);

        let pending = serde_json::to_value(LinkState::Pending).unwrap();
        assert_eq!(pending["state"], "pending");
    }

    #[test]
    fn test_ticket_ref_deserialize_rejects_zero() {
        assert!(serde_json::from_str::<TicketRef>("0").is_err());
        assert_eq!(serde_json::from_str::<TicketRef>("9").unwrap().get(), 9);
    }
}
