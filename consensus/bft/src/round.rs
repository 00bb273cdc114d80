use crate::types::{Height, Round, VoteKind};
use crate::vote::VoteSet;

/// Per-round vote bookkeeping: the proposal seen (if any) and the PreVote
/// and PreCommit sets collected for this round.
#[derive(Debug, Clone)]
pub struct RoundState {
    pub round: Round,
    pub proposal: Option<crate::types::BlockHash>,
    pub prevotes: VoteSet,
    pub precommits: VoteSet,
}

impl RoundState {
    pub fn new(round: Round, height: Height) -> Self {
        Self {
            round,
            proposal: None,
            prevotes: VoteSet::new(VoteKind::PreVote, height, round),
            precommits: VoteSet::new(VoteKind::PreCommit, height, round),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_round_state_is_empty() {
        let rs = RoundState::new(Round(0), Height(1));
        assert!(rs.proposal.is_none());
        assert_eq!(rs.prevotes.count(), 0);
        assert_eq!(rs.precommits.count(), 0);
    }
}
