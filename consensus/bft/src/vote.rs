use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::canonical::{CanonicalEncoder, CanonicalValue};
use crate::types::{BlockHash, Height, Round, ValidatorId, VoteKind, VotingPower};
use crate::validator_set::ValidatorSet;

/// A signed PreVote or PreCommit for a height/round, for a block or nil.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub kind: VoteKind,
    pub height: Height,
    pub round: Round,
    pub block_hash: Option<BlockHash>,
    pub validator: ValidatorId,
    pub signature: Signature,
}

impl Vote {
    /// Create and sign a vote.
    pub fn new(
        kind: VoteKind,
        height: Height,
        round: Round,
        block_hash: Option<BlockHash>,
        signing_key: &SigningKey,
    ) -> Self {
        let validator = ValidatorId(signing_key.verifying_key());
        let sign_bytes = Self::sign_bytes(kind, height, round, block_hash.as_ref());
        let signature = signing_key.sign(&sign_bytes);
        Self {
            kind,
            height,
            round,
            block_hash,
            validator,
            signature,
        }
    }

    /// The signature domain: `(height, round, kind, block_hash?)` run
    /// through the project's canonical block-content encoding so the bytes
    /// a peer verifies are independent of any particular Rust struct layout.
    fn sign_bytes(
        kind: VoteKind,
        height: Height,
        round: Round,
        block_hash: Option<&BlockHash>,
    ) -> Vec<u8> {
        let kind_tag = match kind {
            VoteKind::PreVote => 1,
            VoteKind::PreCommit => 2,
        };
        let mut encoder = CanonicalEncoder::new()
            .field("kind", CanonicalValue::UInt(kind_tag))
            .field("height", CanonicalValue::UInt(height.0))
            .field("round", CanonicalValue::UInt(round.0 as u64));
        if let Some(h) = block_hash {
            encoder = encoder.field("block_hash", CanonicalValue::Bytes(h.0.to_vec()));
        }
        encoder.encode()
    }

    /// Verify the vote signature against the validator's public key.
    pub fn verify(&self) -> bool {
        let sign_bytes = Self::sign_bytes(self.kind, self.height, self.round, self.block_hash.as_ref());
        self.validator.0.verify(&sign_bytes, &self.signature).is_ok()
    }
}

/// Outcome of inserting a vote into a `VoteSet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Newly recorded, first vote seen from this validator for this bucket.
    Added,
    /// Identical to a previously recorded vote; ignored.
    Duplicate,
    /// Validator already voted differently for this height/round/kind.
    /// The first vote is kept as canonical; both are retained as evidence.
    Equivocation,
    /// Wrong kind/height/round, unknown validator, or bad signature.
    Rejected,
}

/// Collects votes for a specific height/round/kind and evaluates
/// power-weighted quorum against a `ValidatorSet`.
#[derive(Debug, Clone)]
pub struct VoteSet {
    pub kind: VoteKind,
    pub height: Height,
    pub round: Round,
    /// First (canonical) vote seen per validator.
    votes: HashMap<ValidatorId, Vote>,
    /// Second and later conflicting votes, kept as equivocation evidence.
    equivocations: HashMap<ValidatorId, Vec<Vote>>,
    /// Running power sum per candidate block hash, `None` key for nil.
    /// Invalidated only on insert, never recomputed from scratch.
    power_by_value: HashMap<Option<BlockHash>, VotingPower>,
    total_voted_power: VotingPower,
}

impl VoteSet {
    pub fn new(kind: VoteKind, height: Height, round: Round) -> Self {
        Self {
            kind,
            height,
            round,
            votes: HashMap::new(),
            equivocations: HashMap::new(),
            power_by_value: HashMap::new(),
            total_voted_power: 0,
        }
    }

    /// Add a vote, weighing it against `validators`. Rejects votes with the
    /// wrong kind/height/round, an unknown validator, or an invalid
    /// signature. A second, conflicting vote from an already-seen validator
    /// is retained as equivocation evidence rather than silently dropped.
    pub fn add_vote(&mut self, vote: Vote, validators: &ValidatorSet) -> AddOutcome {
        if vote.kind != self.kind || vote.height != self.height || vote.round != self.round {
            return AddOutcome::Rejected;
        }
        if !validators.contains(&vote.validator) {
            return AddOutcome::Rejected;
        }
        if !vote.verify() {
            return AddOutcome::Rejected;
        }

        match self.votes.get(&vote.validator) {
            None => {
                let power = validators.power_of(&vote.validator);
                *self.power_by_value.entry(vote.block_hash).or_insert(0) += power;
                self.total_voted_power += power;
                self.votes.insert(vote.validator, vote);
                AddOutcome::Added
            }
            Some(existing) => {
                if existing.block_hash == vote.block_hash && existing.signature == vote.signature {
                    AddOutcome::Duplicate
                } else {
                    self.equivocations.entry(vote.validator).or_default().push(vote);
                    AddOutcome::Equivocation
                }
            }
        }
    }

    /// The canonical vote this validator itself cast in this bucket, if any.
    pub fn vote_of(&self, validator: &ValidatorId) -> Option<&Vote> {
        self.votes.get(validator)
    }

    pub fn is_equivocating(&self, validator: &ValidatorId) -> bool {
        self.equivocations.contains_key(validator)
    }

    pub fn equivocators(&self) -> impl Iterator<Item = &ValidatorId> {
        self.equivocations.keys()
    }

    fn power_for_value(&self, value: Option<BlockHash>) -> VotingPower {
        self.power_by_value.get(&value).copied().unwrap_or(0)
    }

    /// 2/3+ of total power for a specific block hash.
    pub fn has_two_thirds_for(&self, block_hash: &BlockHash, validators: &ValidatorSet) -> bool {
        validators.has_two_thirds(self.power_for_value(Some(*block_hash)))
    }

    /// 2/3+ of total power for nil.
    pub fn has_two_thirds_nil(&self, validators: &ValidatorSet) -> bool {
        validators.has_two_thirds(self.power_for_value(None))
    }

    /// 2/3+ of total power have voted for *some* value (block or nil).
    pub fn has_two_thirds_any(&self, validators: &ValidatorSet) -> bool {
        validators.has_two_thirds(self.total_voted_power)
    }

    /// At least 1/3 of total power have voted for some value, used for the
    /// round-skip rule.
    pub fn has_one_third_any(&self, validators: &ValidatorSet) -> bool {
        validators.has_one_third(self.total_voted_power)
    }

    /// The block hash with 2/3+ power, if any.
    pub fn quorum_block(&self, validators: &ValidatorSet) -> Option<BlockHash> {
        self.power_by_value.iter().find_map(|(value, power)| {
            value.filter(|_| validators.has_two_thirds(*power))
        })
    }

    pub fn power_for(&self, block_hash: Option<&BlockHash>) -> VotingPower {
        self.power_for_value(block_hash.copied())
    }

    pub fn count(&self) -> usize {
        self.votes.len()
    }

    /// All canonical votes cast for a given block hash, used to assemble
    /// the commit evidence handed to `BlockChain::append`.
    pub fn votes_for(&self, block_hash: &BlockHash) -> Vec<Vote> {
        self.votes
            .values()
            .filter(|v| v.block_hash.as_ref() == Some(block_hash))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn make_set(n: usize) -> (Vec<SigningKey>, ValidatorSet) {
        let keys: Vec<SigningKey> = (0..n).map(|_| SigningKey::generate(&mut OsRng)).collect();
        let validators = keys
            .iter()
            .map(|k| (ValidatorId(k.verifying_key()), 1))
            .collect();
        (keys, ValidatorSet::new(validators))
    }

    #[test]
    fn vote_sign_and_verify() {
        let key = SigningKey::generate(&mut OsRng);
        let vote = Vote::new(
            VoteKind::PreVote,
            Height(1),
            Round(0),
            Some(BlockHash([0xAB; 32])),
            &key,
        );
        assert!(vote.verify());
    }

    #[test]
    fn nil_vote_sign_and_verify() {
        let key = SigningKey::generate(&mut OsRng);
        let vote = Vote::new(VoteKind::PreVote, Height(5), Round(2), None, &key);
        assert!(vote.verify());
        assert!(vote.block_hash.is_none());
    }

    #[test]
    fn tampered_vote_fails_verification() {
        let key = SigningKey::generate(&mut OsRng);
        let mut vote = Vote::new(
            VoteKind::PreVote,
            Height(1),
            Round(0),
            Some(BlockHash([0xAB; 32])),
            &key,
        );
        vote.block_hash = Some(BlockHash([0xCD; 32]));
        assert!(!vote.verify());
    }

    #[test]
    fn quorum_requires_more_than_two_thirds_power() {
        let (keys, validators) = make_set(4);
        let hash = BlockHash([0x11; 32]);
        let mut vs = VoteSet::new(VoteKind::PreVote, Height(1), Round(0));

        for key in &keys[0..2] {
            let vote = Vote::new(VoteKind::PreVote, Height(1), Round(0), Some(hash), key);
            assert_eq!(vs.add_vote(vote, &validators), AddOutcome::Added);
        }
        assert!(!vs.has_two_thirds_for(&hash, &validators));

        let vote = Vote::new(VoteKind::PreVote, Height(1), Round(0), Some(hash), &keys[2]);
        assert_eq!(vs.add_vote(vote, &validators), AddOutcome::Added);
        assert!(vs.has_two_thirds_for(&hash, &validators));
    }

    #[test]
    fn duplicate_identical_vote_is_ignored() {
        let (keys, validators) = make_set(4);
        let hash = BlockHash([0x33; 32]);
        let mut vs = VoteSet::new(VoteKind::PreVote, Height(1), Round(0));

        let vote1 = Vote::new(VoteKind::PreVote, Height(1), Round(0), Some(hash), &keys[0]);
        let vote2 = vote1.clone();
        assert_eq!(vs.add_vote(vote1, &validators), AddOutcome::Added);
        assert_eq!(vs.add_vote(vote2, &validators), AddOutcome::Duplicate);
        assert_eq!(vs.count(), 1);
    }

    #[test]
    fn conflicting_second_vote_is_equivocation_and_first_is_canonical() {
        let (keys, validators) = make_set(4);
        let hash_a = BlockHash([0xAA; 32]);
        let hash_b = BlockHash([0xBB; 32]);
        let mut vs = VoteSet::new(VoteKind::PreVote, Height(1), Round(0));

        let vote_a = Vote::new(VoteKind::PreVote, Height(1), Round(0), Some(hash_a), &keys[0]);
        let vote_b = Vote::new(VoteKind::PreVote, Height(1), Round(0), Some(hash_b), &keys[0]);
        assert_eq!(vs.add_vote(vote_a, &validators), AddOutcome::Added);
        assert_eq!(vs.add_vote(vote_b, &validators), AddOutcome::Equivocation);

        assert!(vs.is_equivocating(&ValidatorId(keys[0].verifying_key())));
        // the canonical power tally still reflects only the first vote
        assert_eq!(vs.power_for(Some(&hash_a)), 1);
        assert_eq!(vs.power_for(Some(&hash_b)), 0);
    }

    #[test]
    fn rejects_wrong_round() {
        let (keys, validators) = make_set(4);
        let hash = BlockHash([0x44; 32]);
        let mut vs = VoteSet::new(VoteKind::PreVote, Height(1), Round(0));

        let vote = Vote::new(VoteKind::PreVote, Height(1), Round(1), Some(hash), &keys[0]);
        assert_eq!(vs.add_vote(vote, &validators), AddOutcome::Rejected);
    }

    #[test]
    fn rejects_unknown_validator() {
        let (_keys, validators) = make_set(4);
        let outsider = SigningKey::generate(&mut OsRng);
        let vote = Vote::new(VoteKind::PreVote, Height(1), Round(0), None, &outsider);
        let mut vs = VoteSet::new(VoteKind::PreVote, Height(1), Round(0));
        assert_eq!(vs.add_vote(vote, &validators), AddOutcome::Rejected);
    }

    #[test]
    fn nil_quorum() {
        let (keys, validators) = make_set(4);
        let mut vs = VoteSet::new(VoteKind::PreVote, Height(1), Round(0));

        for key in &keys[0..3] {
            let vote = Vote::new(VoteKind::PreVote, Height(1), Round(0), None, key);
            vs.add_vote(vote, &validators);
        }
        assert!(vs.has_two_thirds_nil(&validators));
    }

    #[test]
    fn split_vote_has_no_block_quorum_but_two_thirds_any() {
        let (keys, validators) = make_set(4);
        let hash_a = BlockHash([0xAA; 32]);
        let hash_b = BlockHash([0xBB; 32]);
        let mut vs = VoteSet::new(VoteKind::PreVote, Height(1), Round(0));

        for key in &keys[0..2] {
            let vote = Vote::new(VoteKind::PreVote, Height(1), Round(0), Some(hash_a), key);
            vs.add_vote(vote, &validators);
        }
        for key in &keys[2..4] {
            let vote = Vote::new(VoteKind::PreVote, Height(1), Round(0), Some(hash_b), key);
            vs.add_vote(vote, &validators);
        }
        assert!(!vs.has_two_thirds_for(&hash_a, &validators));
        assert!(!vs.has_two_thirds_for(&hash_b, &validators));
        assert_eq!(vs.quorum_block(&validators), None);
        assert!(vs.has_two_thirds_any(&validators));
    }

    #[test]
    fn one_third_any_triggers_before_two_thirds() {
        let (keys, validators) = make_set(4);
        let mut vs = VoteSet::new(VoteKind::PreVote, Height(1), Round(0));
        let vote = Vote::new(VoteKind::PreVote, Height(1), Round(0), None, &keys[0]);
        vs.add_vote(vote, &validators);
        assert!(!vs.has_two_thirds_any(&validators));
        assert!(!vs.has_one_third_any(&validators));

        let vote = Vote::new(VoteKind::PreVote, Height(1), Round(0), None, &keys[1]);
        vs.add_vote(vote, &validators);
        assert!(vs.has_one_third_any(&validators));
        assert!(!vs.has_two_thirds_any(&validators));
    }
}
