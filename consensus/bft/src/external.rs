use async_trait::async_trait;
use ed25519_dalek::SigningKey;

use crate::error::ContextError;
use crate::event::{BroadcastMessage, Event};
use crate::types::BlockHash;
use crate::vote::Vote;

/// The external blockchain store. The Context never inspects block
/// contents; it only asks this collaborator to propose, validate, and
/// append blocks it already knows only by hash.
///
/// Grounded on `postech-dao-simperby/network/src/primitives.rs`'s
/// `Storage` trait, the pack's idiom for an `async_trait` external
/// collaborator the teacher itself has no equivalent for.
#[async_trait]
pub trait BlockChain: Send + Sync {
    /// The hash of the block currently at the chain's tip, i.e. the parent
    /// of whatever this Context commits.
    async fn tip(&self) -> BlockHash;

    /// Ask the store to assemble and sign a new block proposal built on top
    /// of the current tip. Only called when this Context is the proposer.
    async fn propose_block(&self, signing_key: &SigningKey) -> Result<BlockHash, ContextError>;

    /// Validate a block's header and content before PreVoting for it.
    /// `Ok(())` means the header and content are acceptable; any error
    /// is treated as "PreVote nil".
    async fn validate_next_block(&self, block_hash: BlockHash) -> Result<(), ContextError>;

    /// Durably append a committed block and the PreCommit set that
    /// justified it.
    async fn append(&self, block_hash: BlockHash, commits: Vec<Vote>) -> Result<(), ContextError>;
}

/// The external gossip/network layer. The Context hands it fully formed,
/// already-signed messages; it never learns about peers or topology.
#[async_trait]
pub trait GossipSink: Send + Sync {
    async fn broadcast(&self, message: BroadcastMessage);
}

/// A passive subscriber to Context observations (logging, metrics, tests).
/// Synchronous and infallible by design: an `Observer` must not block or
/// fail the consensus loop.
pub trait Observer: Send + Sync {
    fn on_event(&self, event: &Event);
}
