use serde::{Deserialize, Serialize};

use crate::error::ContextError;
use crate::proposal::Proposal;
use crate::types::{BlockHash, Round, TimeoutKind};
use crate::vote::Vote;

/// Messages a peer (or the host's own network layer) feeds into a
/// `Context` via its mailbox.
#[derive(Debug, Clone)]
pub enum ConsensusEvent {
    Proposal(Proposal),
    PreVote(Vote),
    PreCommit(Vote),
    /// Fed back in by the timeout scheduler when an armed timer fires.
    Timeout { kind: TimeoutKind, round: Round },
}

/// Observations the Context reports to registered `Observer`s. This is the
/// crate's equivalent of a debug/telemetry feed, not a control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    StateChanged {
        round: Round,
        step: crate::types::Step,
    },
    MessageBroadcast {
        message: BroadcastMessage,
    },
    TimeoutProcessed {
        kind: TimeoutKind,
        round: Round,
    },
    BlockCommitted {
        hash: BlockHash,
    },
    ExceptionOccurred {
        kind: String,
        detail: String,
    },
}

/// A message the Context decided to broadcast to the network, handed to
/// the `GossipSink` collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BroadcastMessage {
    Proposal(Proposal),
    PreVote(Vote),
    PreCommit(Vote),
}

impl From<&ContextError> for Event {
    fn from(err: &ContextError) -> Self {
        let kind = match err {
            ContextError::InvalidSignature => "InvalidSignature",
            ContextError::UnknownValidator => "UnknownValidator",
            ContextError::HeightMismatch { .. } => "HeightMismatch",
            ContextError::WrongProposer { .. } => "WrongProposer",
            ContextError::Equivocation { .. } => "Equivocation",
            ContextError::InvalidBlockHeader(_) => "InvalidBlockHeader",
            ContextError::InvalidBlockContent(_) => "InvalidBlockContent",
            ContextError::AppendFailed(_) => "AppendFailed",
            ContextError::Cancelled => "Cancelled",
        };
        Event::ExceptionOccurred {
            kind: kind.to_string(),
            detail: err.to_string(),
        }
    }
}
