use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

/// Wrapper around an ed25519 public key identifying a validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatorId(pub VerifyingKey);

impl ValidatorId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl std::fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0.as_bytes()))
    }
}

/// Opaque block identifier. The Context never inspects a block's contents
/// beyond this hash; it only ever asks the external block chain about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl std::fmt::Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::str::FromStr for BlockHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)?;
        Ok(BlockHash(out))
    }
}

/// Block height. One `Context` is constructed per height and is single-use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Height(pub u64);

/// A consensus round within a height. Monotonically non-decreasing within
/// the lifetime of a `Context`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Round(pub u32);

impl Round {
    pub const ZERO: Round = Round(0);

    pub fn next(self) -> Round {
        Round(self.0 + 1)
    }
}

/// Voting power. Quorum predicates always sum this, never raw vote counts.
pub type VotingPower = u64;

/// Which vote bucket a vote belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteKind {
    PreVote,
    PreCommit,
}

/// The step a `Context` is currently in. `Default` is the pre-`start()`
/// state; `EndCommit` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    Default,
    Propose,
    PreVote,
    PreCommit,
    EndCommit,
}

/// Per-kind timeout base durations and the linear per-round backoff applied
/// to all three.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutConfig {
    pub propose_base_ms: u64,
    pub prevote_base_ms: u64,
    pub precommit_base_ms: u64,
    /// Additional ms per round increment (linear backoff).
    pub increment_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            propose_base_ms: 3_000,
            prevote_base_ms: 3_000,
            precommit_base_ms: 3_000,
            increment_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeoutKind {
    Propose,
    PreVote,
    PreCommit,
}

impl TimeoutConfig {
    /// Compute the timeout for a given kind and round, applying linear backoff.
    pub fn duration_for(&self, kind: TimeoutKind, round: Round) -> std::time::Duration {
        let base = match kind {
            TimeoutKind::Propose => self.propose_base_ms,
            TimeoutKind::PreVote => self.prevote_base_ms,
            TimeoutKind::PreCommit => self.precommit_base_ms,
        };
        std::time::Duration::from_millis(base + self.increment_ms * round.0 as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_increases_with_round() {
        let config = TimeoutConfig::default();
        let d0 = config.duration_for(TimeoutKind::Propose, Round(0));
        let d1 = config.duration_for(TimeoutKind::Propose, Round(1));
        let d5 = config.duration_for(TimeoutKind::Propose, Round(5));
        assert!(d1 > d0);
        assert!(d5 > d1);
    }

    #[test]
    fn block_hash_display_and_parse_roundtrip() {
        let hash = BlockHash([0xAB; 32]);
        let s = hash.to_string();
        let parsed: BlockHash = s.parse().unwrap();
        assert_eq!(hash, parsed);
    }
}
