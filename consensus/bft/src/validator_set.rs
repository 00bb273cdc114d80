use std::collections::HashMap;

use crate::types::{Height, Round, ValidatorId, VotingPower};

/// The fixed set of validators participating at a given height, along with
/// their voting power. Immutable for the lifetime of a `Context`.
#[derive(Debug, Clone)]
pub struct ValidatorSet {
    validators: Vec<ValidatorId>,
    power: HashMap<ValidatorId, VotingPower>,
    total_power: VotingPower,
}

impl ValidatorSet {
    /// Build a set from an ordered validator list and their powers. Order
    /// determines proposer rotation, so callers must agree on it out of band
    /// (e.g. sorted by `ValidatorId` bytes).
    pub fn new(validators: Vec<(ValidatorId, VotingPower)>) -> Self {
        let mut power = HashMap::with_capacity(validators.len());
        let mut ordered = Vec::with_capacity(validators.len());
        let mut total_power: VotingPower = 0;
        for (id, p) in validators {
            ordered.push(id);
            total_power += p;
            power.insert(id, p);
        }
        Self {
            validators: ordered,
            power,
            total_power,
        }
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn contains(&self, id: &ValidatorId) -> bool {
        self.power.contains_key(id)
    }

    pub fn power_of(&self, id: &ValidatorId) -> VotingPower {
        self.power.get(id).copied().unwrap_or(0)
    }

    pub fn total_power(&self) -> VotingPower {
        self.total_power
    }

    /// Threshold for a quorum ("more than 2/3"): `power > total * 2 / 3`.
    /// Computed with integer arithmetic to avoid float rounding.
    pub fn has_two_thirds(&self, power: VotingPower) -> bool {
        power * 3 > self.total_power * 2
    }

    /// Threshold for the round-skip rule ("at least 1/3"): `power * 3 >= total`.
    pub fn has_one_third(&self, power: VotingPower) -> bool {
        power * 3 >= self.total_power
    }

    /// Deterministic round-robin proposer selection: `(height + round) % n`.
    ///
    /// This is the teacher's own rule (`BftStateMachine::proposer_index`),
    /// adopted verbatim in the absence of a weighted-proposer test vector in
    /// the retrieval pack (see DESIGN.md, Open Question (a)).
    pub fn proposer(&self, height: Height, round: Round) -> ValidatorId {
        let n = self.validators.len() as u64;
        debug_assert!(n > 0, "empty validator set has no proposer");
        let idx = (height.0.wrapping_add(round.0 as u64)) % n;
        self.validators[idx as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidatorId> {
        self.validators.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn make_validators(n: usize) -> Vec<(ValidatorId, VotingPower)> {
        (0..n)
            .map(|_| {
                let key = SigningKey::generate(&mut OsRng);
                (ValidatorId(key.verifying_key()), 1)
            })
            .collect()
    }

    #[test]
    fn proposer_is_deterministic_round_robin() {
        let validators = make_validators(4);
        let set = ValidatorSet::new(validators.clone());

        for round in 0..8u32 {
            let expected_idx = (10u64 + round as u64) % 4;
            let expected = validators[expected_idx as usize].0;
            assert_eq!(set.proposer(Height(10), Round(round)), expected);
        }
    }

    #[test]
    fn quorum_thresholds() {
        let validators = make_validators(4);
        let set = ValidatorSet::new(validators);
        // total power = 4, 2/3+ requires > 8/3 i.e. >= 3
        assert!(!set.has_two_thirds(2));
        assert!(set.has_two_thirds(3));
        // 1/3 requires power*3 >= 4 i.e. >= 2 (since 1*3=3 < 4)
        assert!(!set.has_one_third(1));
        assert!(set.has_one_third(2));
    }
}
