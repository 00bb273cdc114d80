pub mod canonical;
pub mod context;
pub mod error;
pub mod event;
pub mod external;
pub mod mailbox;
pub mod proposal;
pub mod round;
pub mod state;
pub mod timeout;
pub mod types;
pub mod validator_set;
pub mod vote;

pub use context::Context;
pub use error::ContextError;
pub use event::{BroadcastMessage, ConsensusEvent, Event};
pub use external::{BlockChain, GossipSink, Observer};
pub use mailbox::MailboxSender;
pub use proposal::Proposal;
pub use types::*;
pub use validator_set::ValidatorSet;
pub use vote::{AddOutcome, Vote, VoteSet};
