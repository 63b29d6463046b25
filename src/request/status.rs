use serde::{Deserialize, Serialize};

use crate::error::{Result, SignError};

/// Lifecycle of a signing request.
///
/// The numeric codes are part of the progress event schema and must stay
/// stable; see [`RequestStatus::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestStatus {
    Unsigned,
    ReadyForSignature,
    Rejected,
    Delegated,
    InProcess,
    Signed,
    ReadyForDispatch,
    Dispatched,
}

/// Who is asking for a transition. Only the signing pipeline may move a
/// request into or out of `InProcess`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Pipeline,
    Endpoint,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 8] = [
        RequestStatus::Unsigned,
        RequestStatus::ReadyForSignature,
        RequestStatus::Rejected,
        RequestStatus::Delegated,
        RequestStatus::InProcess,
        RequestStatus::Signed,
        RequestStatus::ReadyForDispatch,
        RequestStatus::Dispatched,
    ];

    pub fn code(self) -> u8 {
        match self {
            RequestStatus::Unsigned => 0,
            RequestStatus::ReadyForSignature => 1,
            RequestStatus::Rejected => 2,
            RequestStatus::Delegated => 3,
            RequestStatus::InProcess => 4,
            RequestStatus::Signed => 5,
            RequestStatus::ReadyForDispatch => 6,
            RequestStatus::Dispatched => 7,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Dispatched | RequestStatus::Rejected)
    }

    /// `assignedTo` is only meaningful while an officer holds the request.
    pub fn holds_assignee(self) -> bool {
        matches!(
            self,
            RequestStatus::ReadyForSignature | RequestStatus::Delegated
        )
    }

    /// The transition table. Exhaustive over `self` so a new state cannot be
    /// added without deciding its edges.
    pub fn can_transition(self, to: RequestStatus, actor: Actor) -> bool {
        use RequestStatus::*;
        match (self, actor) {
            (Unsigned, Actor::Endpoint) => to == ReadyForSignature,
            (ReadyForSignature, Actor::Endpoint) => matches!(to, Delegated | Rejected),
            (ReadyForSignature, Actor::Pipeline) => to == InProcess,
            (Delegated, Actor::Pipeline) => to == InProcess,
            (InProcess, Actor::Pipeline) => to == Signed,
            (Signed, Actor::Endpoint) => to == ReadyForDispatch,
            (ReadyForDispatch, Actor::Endpoint) => to == Dispatched,
            (Unsigned, Actor::Pipeline)
            | (Delegated, Actor::Endpoint)
            | (InProcess, Actor::Endpoint)
            | (Signed, Actor::Pipeline)
            | (ReadyForDispatch, Actor::Pipeline)
            | (Rejected, _)
            | (Dispatched, _) => false,
        }
    }

    /// Validate a transition, returning the target state on success.
    pub fn transition(self, to: RequestStatus, actor: Actor) -> Result<RequestStatus> {
        if self.can_transition(to, actor) {
            Ok(to)
        } else {
            Err(SignError::IllegalTransition { from: self, to })
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Unsigned => write!(f, "unsigned"),
            RequestStatus::ReadyForSignature => write!(f, "readyForSignature"),
            RequestStatus::Rejected => write!(f, "rejected"),
            RequestStatus::Delegated => write!(f, "delegated"),
            RequestStatus::InProcess => write!(f, "inProcess"),
            RequestStatus::Signed => write!(f, "signed"),
            RequestStatus::ReadyForDispatch => write!(f, "readyForDispatch"),
            RequestStatus::Dispatched => write!(f, "dispatched"),
        }
    }
}

/// Per-document sub-state, independent of the parent request's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignStatus {
    #[default]
    Unsigned,
    Signed,
    Rejected,
}
