use std::collections::{BTreeMap, HashSet};

use crate::round::RoundState;
use crate::types::{BlockHash, Height, Round, Step, ValidatorId};
use crate::validator_set::ValidatorSet;

/// All mutable state for a single height's consensus run. Owned exclusively
/// by the Context's consumer task; external readers only ever see a
/// point-in-time snapshot via `Context::to_debug_string`.
pub struct ConsensusState {
    pub height: Height,
    pub validators: ValidatorSet,
    pub our_id: ValidatorId,
    pub round: Round,
    pub step: Step,
    pub locked_value: Option<BlockHash>,
    pub locked_round: Option<Round>,
    pub valid_value: Option<BlockHash>,
    pub valid_round: Option<Round>,
    pub committed: Option<BlockHash>,
    /// Never pruned: old rounds are retained so a later proposal's claimed
    /// `valid_round` can be checked against the polka that actually existed
    /// then (see DESIGN.md, Open Question (b)).
    pub rounds: BTreeMap<Round, RoundState>,
    pub equivocators: HashSet<ValidatorId>,
    broadcast_proposal: HashSet<Round>,
    broadcast_prevote: HashSet<Round>,
    broadcast_precommit: HashSet<Round>,
}

impl ConsensusState {
    pub fn new(height: Height, validators: ValidatorSet, our_id: ValidatorId) -> Self {
        let round = Round::ZERO;
        let mut rounds = BTreeMap::new();
        rounds.insert(round, RoundState::new(round, height));
        Self {
            height,
            validators,
            our_id,
            round,
            step: Step::Default,
            locked_value: None,
            locked_round: None,
            valid_value: None,
            valid_round: None,
            committed: None,
            rounds,
            equivocators: HashSet::new(),
            broadcast_proposal: HashSet::new(),
            broadcast_prevote: HashSet::new(),
            broadcast_precommit: HashSet::new(),
        }
    }

    pub fn proposer(&self, round: Round) -> ValidatorId {
        self.validators.proposer(self.height, round)
    }

    pub fn is_proposer(&self, round: Round) -> bool {
        self.proposer(round) == self.our_id
    }

    pub fn round_state_mut(&mut self, round: Round) -> &mut RoundState {
        let height = self.height;
        self.rounds
            .entry(round)
            .or_insert_with(|| RoundState::new(round, height))
    }

    /// Move to a new round, initializing its vote sets. Never moves
    /// backwards: callers are expected to only call this with `round >
    /// self.round` (round skip) or `self.round.next()` (normal advance).
    pub fn enter_round(&mut self, round: Round) {
        self.round = round;
        self.step = Step::Propose;
        self.round_state_mut(round);
    }

    /// Whether round `vr` is retained and actually shows a 2/3 PreVote
    /// polka for `block_hash` — the evidence check a proposal's claimed
    /// `valid_round` must satisfy before it can unlock a locked validator.
    pub fn has_backed_polka(&self, vr: Round, block_hash: &BlockHash) -> bool {
        self.rounds
            .get(&vr)
            .is_some_and(|rs| rs.prevotes.has_two_thirds_for(block_hash, &self.validators))
    }

    /// At-most-once guards: each returns `true` only the first time it is
    /// called for a given round, so the consumer loop can broadcast its own
    /// message for a round exactly once even if the triggering condition is
    /// re-observed on a later upon-rule rescan.
    pub fn should_broadcast_proposal(&mut self, round: Round) -> bool {
        self.broadcast_proposal.insert(round)
    }

    pub fn should_broadcast_prevote(&mut self, round: Round) -> bool {
        self.broadcast_prevote.insert(round)
    }

    pub fn should_broadcast_precommit(&mut self, round: Round) -> bool {
        self.broadcast_precommit.insert(round)
    }

    /// Snapshot used for `Context::to_debug_string`.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "height": self.height.0,
            "round": self.round.0,
            "step": format!("{:?}", self.step),
            "locked_round": self.locked_round.map(|r| r.0),
            "locked_value": self.locked_value.map(|h| h.to_string()),
            "valid_round": self.valid_round.map(|r| r.0),
            "valid_value": self.valid_value.map(|h| h.to_string()),
            "committed": self.committed.map(|h| h.to_string()),
        })
    }
}
