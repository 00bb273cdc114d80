use std::sync::Arc;

use ed25519_dalek::SigningKey;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::error::ContextError;
use crate::event::{BroadcastMessage, ConsensusEvent, Event};
use crate::external::{BlockChain, GossipSink, Observer};
use crate::mailbox::{Mailbox, MailboxSender};
use crate::proposal::Proposal;
use crate::state::ConsensusState;
use crate::timeout::TimeoutScheduler;
use crate::types::{BlockHash, Height, Round, Step, TimeoutConfig, TimeoutKind, ValidatorId, VoteKind};
use crate::validator_set::ValidatorSet;
use crate::vote::{AddOutcome, Vote};

/// Drives a single height's BFT round machine to completion.
///
/// Owns the one consumer task that reads the mailbox, mutates
/// `ConsensusState`, drives the `TimeoutScheduler`, and calls out to the
/// `BlockChain`/`GossipSink`/`Observer` collaborators. Grounded on
/// `consensus/bft/src/state_machine.rs`'s `BftStateMachine`, generalized
/// from a pure synchronous state machine into the async, self-driving
/// component the spec requires.
pub struct Context {
    state: Arc<Mutex<ConsensusState>>,
    mailbox_sender: MailboxSender,
    mailbox: Option<Mailbox>,
    signing_key: Option<SigningKey>,
    blockchain: Arc<dyn BlockChain>,
    gossip: Arc<dyn GossipSink>,
    observers: Vec<Arc<dyn Observer>>,
    timeout_config: TimeoutConfig,
    task: Option<JoinHandle<()>>,
    started: bool,
}

impl Context {
    pub fn new(
        height: Height,
        validators: ValidatorSet,
        signing_key: SigningKey,
        blockchain: Arc<dyn BlockChain>,
        gossip: Arc<dyn GossipSink>,
        timeout_config: TimeoutConfig,
    ) -> Self {
        let our_id = ValidatorId(signing_key.verifying_key());
        let state = Arc::new(Mutex::new(ConsensusState::new(height, validators, our_id)));
        let (mailbox_sender, mailbox) = Mailbox::new();
        Self {
            state,
            mailbox_sender,
            mailbox: Some(mailbox),
            signing_key: Some(signing_key),
            blockchain,
            gossip,
            observers: Vec::new(),
            timeout_config,
            task: None,
            started: false,
        }
    }

    /// Register an observer. Only effective before `start()`.
    pub fn register_observer(&mut self, observer: Arc<dyn Observer>) {
        if self.started {
            tracing::warn!("ignoring observer registered after start()");
            return;
        }
        self.observers.push(observer);
    }

    /// A cheap, cloneable handle callers use to feed messages in.
    pub fn mailbox_sender(&self) -> MailboxSender {
        self.mailbox_sender.clone()
    }

    pub fn produce_message(&self, event: ConsensusEvent) {
        self.mailbox_sender.produce_message(event);
    }

    /// A point-in-time JSON snapshot of height/round/step/locked/valid state.
    pub fn to_debug_string(&self) -> serde_json::Value {
        self.state.lock().snapshot()
    }

    /// Spawn the consumer task and kick off round 0.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let mailbox = self.mailbox.take().expect("start() called twice");
        let signing_key = self.signing_key.take().expect("start() called twice");

        let mailbox_tx = self.mailbox_sender.raw();
        let scheduler = TimeoutScheduler::new(self.timeout_config, mailbox_tx);

        let mut driver = Driver {
            state: self.state.clone(),
            signing_key,
            blockchain: self.blockchain.clone(),
            gossip: self.gossip.clone(),
            observers: self.observers.clone(),
            scheduler,
        };

        self.task = Some(tokio::spawn(async move {
            driver.kickoff().await;
            driver.run(mailbox).await;
        }));
    }

    /// Abort the consumer task and all outstanding timers.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Driver {
    state: Arc<Mutex<ConsensusState>>,
    signing_key: SigningKey,
    blockchain: Arc<dyn BlockChain>,
    gossip: Arc<dyn GossipSink>,
    observers: Vec<Arc<dyn Observer>>,
    scheduler: TimeoutScheduler,
}

impl Driver {
    fn notify(&self, event: Event) {
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }

    fn our_id(&self) -> ValidatorId {
        ValidatorId(self.signing_key.verifying_key())
    }

    async fn kickoff(&mut self) {
        let round = Round::ZERO;
        {
            let mut state = self.state.lock();
            state.enter_round(round);
        }
        self.notify(Event::StateChanged { round, step: Step::Propose });
        self.scheduler.schedule(TimeoutKind::Propose, round);

        let is_proposer = self.state.lock().is_proposer(round);
        if is_proposer {
            self.propose(round).await;
        }
    }

    /// Propose for `round`. If we already hold a `valid_value` (set by an
    /// earlier round's polka that didn't go on to commit), we re-propose it
    /// with its `valid_round` as evidence rather than minting a fresh block.
    async fn propose(&mut self, round: Round) {
        let height = self.state.lock().height;
        let (valid_value, valid_round) = {
            let state = self.state.lock();
            (state.valid_value, state.valid_round)
        };

        let proposal = match valid_value {
            Some(block_hash) => Proposal::new(height, round, block_hash, valid_round, &self.signing_key),
            None => match self.blockchain.propose_block(&self.signing_key).await {
                Ok(block_hash) => Proposal::new(height, round, block_hash, valid_round, &self.signing_key),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to assemble block proposal");
                    self.notify(Event::from(&err));
                    return;
                }
            },
        };
        self.broadcast_proposal_once(round, proposal).await;
    }

    async fn broadcast_proposal_once(&mut self, round: Round, proposal: Proposal) {
        let should = self.state.lock().should_broadcast_proposal(round);
        if should {
            let message = BroadcastMessage::Proposal(proposal);
            self.gossip.broadcast(message.clone()).await;
            self.notify(Event::MessageBroadcast { message });
        }
    }

    async fn run(&mut self, mut mailbox: Mailbox) {
        while let Some(event) = mailbox.recv().await {
            match event {
                ConsensusEvent::Proposal(proposal) => self.on_proposal(proposal).await,
                ConsensusEvent::PreVote(vote) => self.on_vote(vote).await,
                ConsensusEvent::PreCommit(vote) => self.on_vote(vote).await,
                ConsensusEvent::Timeout { kind, round } => self.on_timeout(kind, round).await,
            }
        }
    }

    async fn on_proposal(&mut self, proposal: Proposal) {
        let height = self.state.lock().height;
        if proposal.height != height {
            let err = ContextError::HeightMismatch {
                expected: height.0,
                got: proposal.height.0,
            };
            self.notify(Event::from(&err));
            return;
        }
        if !proposal.verify() {
            self.notify(Event::from(&ContextError::InvalidSignature));
            return;
        }

        let (current_round, current_step, expected_proposer) = {
            let state = self.state.lock();
            (state.round, state.step, state.proposer(proposal.round))
        };
        if proposal.round != current_round || current_step != Step::Propose {
            return;
        }
        if proposal.proposer != expected_proposer {
            let err = ContextError::WrongProposer {
                round: proposal.round.0,
                expected: expected_proposer.to_string(),
                got: proposal.proposer.to_string(),
            };
            self.notify(Event::from(&err));
            return;
        }

        {
            let mut state = self.state.lock();
            state.round_state_mut(proposal.round).proposal = Some(proposal.block_hash);
        }

        let validation = self.blockchain.validate_next_block(proposal.block_hash).await;
        let prevote_hash = match validation {
            Err(err) => {
                tracing::warn!(error = %err, "rejecting proposed block");
                self.notify(Event::from(&err));
                None
            }
            Ok(()) => self.decide_prevote_value(&proposal),
        };

        self.scheduler.cancel(TimeoutKind::Propose, proposal.round);
        self.enter_prevote_step(proposal.round, prevote_hash).await;
    }

    /// Implements the locking rule: prevote our lock unless the proposal
    /// carries a `valid_round` whose claimed polka is actually backed by a
    /// retained 2/3 PreVote quorum (Open Question (b)), or we hold no lock.
    fn decide_prevote_value(&self, proposal: &Proposal) -> Option<BlockHash> {
        let state = self.state.lock();
        match state.locked_value {
            None => Some(proposal.block_hash),
            Some(locked) if locked == proposal.block_hash => Some(proposal.block_hash),
            Some(_) => match (proposal.valid_round, state.locked_round) {
                (Some(vr), Some(lr)) if vr >= lr && state.has_backed_polka(vr, &proposal.block_hash) => {
                    Some(proposal.block_hash)
                }
                _ => None,
            },
        }
    }

    async fn enter_prevote_step(&mut self, round: Round, value: Option<BlockHash>) {
        {
            let mut state = self.state.lock();
            if state.round == round {
                state.step = Step::PreVote;
            }
        }
        self.notify(Event::StateChanged { round, step: Step::PreVote });

        let height = self.state.lock().height;
        let vote = Vote::new(VoteKind::PreVote, height, round, value, &self.signing_key);
        let should = self.state.lock().should_broadcast_prevote(round);
        if should {
            let message = BroadcastMessage::PreVote(vote.clone());
            self.gossip.broadcast(message.clone()).await;
            self.notify(Event::MessageBroadcast { message });
        }
        // feed our own vote back through the normal vote path so it counts
        // towards quorum exactly once.
        self.on_vote(vote).await;
    }

    async fn on_vote(&mut self, vote: Vote) {
        let height = self.state.lock().height;
        if vote.height != height {
            let err = ContextError::HeightMismatch {
                expected: height.0,
                got: vote.height.0,
            };
            self.notify(Event::from(&err));
            return;
        }
        if !vote.verify() {
            self.notify(Event::from(&ContextError::InvalidSignature));
            return;
        }
        let known = self.state.lock().validators.contains(&vote.validator);
        if !known {
            self.notify(Event::from(&ContextError::UnknownValidator));
            return;
        }

        // `VoteSet::add_vote` needs `&ValidatorSet` while `rounds` is
        // borrowed mutably, so the set is cloned out first (cheap: a handful
        // of ids and power values, not the vote sets themselves). It
        // re-checks signature/validator/height/round/kind itself; the
        // pre-checks above exist only so a rejection here can still be
        // attributed to a specific cause above, rather than silently
        // dropped.
        let outcome = {
            let mut state = self.state.lock();
            let validators = state.validators.clone();
            let round = vote.round;
            let rs = state.round_state_mut(round);
            match vote.kind {
                VoteKind::PreVote => rs.prevotes.add_vote(vote.clone(), &validators),
                VoteKind::PreCommit => rs.precommits.add_vote(vote.clone(), &validators),
            }
        };

        match outcome {
            AddOutcome::Rejected | AddOutcome::Duplicate => return,
            AddOutcome::Equivocation => {
                let mut state = self.state.lock();
                state.equivocators.insert(vote.validator);
                drop(state);
                let err = ContextError::Equivocation {
                    validator: vote.validator.to_string(),
                };
                self.notify(Event::from(&err));
            }
            AddOutcome::Added => {}
        }

        self.maybe_skip_round(vote.round).await;
        self.rescan(vote.round).await;
    }

    /// The round-skip rule: if at least 1/3 of total power has voted
    /// (PreVote or PreCommit, any value) at a round strictly ahead of ours,
    /// jump straight to it rather than waiting out the current round's
    /// timeouts.
    async fn maybe_skip_round(&mut self, round: Round) {
        let should_skip = {
            let state = self.state.lock();
            if round <= state.round {
                false
            } else {
                state.rounds.get(&round).is_some_and(|rs| {
                    rs.prevotes.has_one_third_any(&state.validators)
                        || rs.precommits.has_one_third_any(&state.validators)
                })
            }
        };
        if should_skip {
            {
                let mut state = self.state.lock();
                state.enter_round(round);
            }
            self.notify(Event::StateChanged { round, step: Step::Propose });
            self.scheduler.schedule(TimeoutKind::Propose, round);
            let is_proposer = self.state.lock().is_proposer(round);
            if is_proposer {
                self.propose(round).await;
            }
        }
    }

    /// Re-evaluate the upon-rules for `round` against the current step,
    /// after a vote has just been added.
    async fn rescan(&mut self, round: Round) {
        let (current_round, current_step) = {
            let state = self.state.lock();
            (state.round, state.step)
        };
        if round != current_round {
            return;
        }

        match current_step {
            Step::PreVote => self.rescan_prevote_step(round).await,
            Step::PreCommit => self.rescan_precommit_step(round).await,
            _ => {}
        }
    }

    async fn rescan_prevote_step(&mut self, round: Round) {
        let quorum_block = {
            let state = self.state.lock();
            state
                .rounds
                .get(&round)
                .and_then(|rs| rs.prevotes.quorum_block(&state.validators))
        };
        if let Some(hash) = quorum_block {
            // Only lock onto a polka we ourselves prevoted for: a quorum for
            // a hash we never validated or voted nil on must not move our
            // own lock, even though the rest of the network converged on it.
            let our_prevote = {
                let state = self.state.lock();
                state
                    .rounds
                    .get(&round)
                    .and_then(|rs| rs.prevotes.vote_of(&state.our_id))
                    .and_then(|v| v.block_hash)
            };
            if our_prevote == Some(hash) {
                self.lock_and_precommit(round, Some(hash)).await;
                return;
            }
        }

        let nil_quorum = {
            let state = self.state.lock();
            state
                .rounds
                .get(&round)
                .is_some_and(|rs| rs.prevotes.has_two_thirds_nil(&state.validators))
        };
        if nil_quorum {
            self.enter_precommit_step(round, None).await;
            return;
        }

        let two_thirds_any = {
            let state = self.state.lock();
            state
                .rounds
                .get(&round)
                .is_some_and(|rs| rs.prevotes.has_two_thirds_any(&state.validators))
        };
        if two_thirds_any {
            self.scheduler.schedule(TimeoutKind::PreVote, round);
        }
    }

    async fn rescan_precommit_step(&mut self, round: Round) {
        // Even while already at PreCommit, a late-arriving polka still
        // updates valid_value/valid_round per the teacher's dual check.
        let quorum_block = {
            let state = self.state.lock();
            state
                .rounds
                .get(&round)
                .and_then(|rs| rs.prevotes.quorum_block(&state.validators))
        };
        if let Some(hash) = quorum_block {
            let mut state = self.state.lock();
            state.valid_value = Some(hash);
            state.valid_round = Some(round);
        }

        let commit_block = {
            let state = self.state.lock();
            state
                .rounds
                .get(&round)
                .and_then(|rs| rs.precommits.quorum_block(&state.validators))
        };
        if let Some(hash) = commit_block {
            self.commit(round, hash).await;
            return;
        }

        let two_thirds_any = {
            let state = self.state.lock();
            state
                .rounds
                .get(&round)
                .is_some_and(|rs| rs.precommits.has_two_thirds_any(&state.validators))
        };
        if two_thirds_any {
            self.scheduler.schedule(TimeoutKind::PreCommit, round);
        }
    }

    /// Lock onto `value` (or leave the lock untouched on a nil quorum),
    /// update valid_value/valid_round, and broadcast our own PreCommit.
    async fn lock_and_precommit(&mut self, round: Round, value: Option<BlockHash>) {
        {
            let mut state = self.state.lock();
            state.valid_value = value;
            state.valid_round = Some(round);
            state.locked_value = value;
            state.locked_round = Some(round);
        }
        self.enter_precommit_step(round, value).await;
    }

    async fn enter_precommit_step(&mut self, round: Round, value: Option<BlockHash>) {
        {
            let mut state = self.state.lock();
            if state.round == round {
                state.step = Step::PreCommit;
            }
        }
        self.notify(Event::StateChanged { round, step: Step::PreCommit });
        self.scheduler.cancel(TimeoutKind::PreVote, round);

        let height = self.state.lock().height;
        let vote = Vote::new(VoteKind::PreCommit, height, round, value, &self.signing_key);
        let should = self.state.lock().should_broadcast_precommit(round);
        if should {
            let message = BroadcastMessage::PreCommit(vote.clone());
            self.gossip.broadcast(message.clone()).await;
            self.notify(Event::MessageBroadcast { message });
        }
        self.on_vote(vote).await;
    }

    async fn commit(&mut self, round: Round, block_hash: BlockHash) {
        let already_committed = self.state.lock().committed.is_some();
        if already_committed {
            return;
        }
        self.scheduler.cancel(TimeoutKind::PreCommit, round);

        let commits: Vec<Vote> = {
            let state = self.state.lock();
            state
                .rounds
                .get(&round)
                .map(|rs| rs.precommits.votes_for(&block_hash))
                .unwrap_or_default()
        };

        match self.blockchain.append(block_hash, commits).await {
            Ok(()) => {
                let mut state = self.state.lock();
                state.committed = Some(block_hash);
                state.step = Step::EndCommit;
                drop(state);
                self.notify(Event::BlockCommitted { hash: block_hash });
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to append committed block");
                self.notify(Event::from(&err));
            }
        }
    }

    async fn on_timeout(&mut self, kind: TimeoutKind, round: Round) {
        let current = { let state = self.state.lock(); (state.round, state.step) };
        if current.0 != round {
            return;
        }
        self.notify(Event::TimeoutProcessed { kind, round });

        match kind {
            TimeoutKind::Propose => {
                if current.1 == Step::Propose {
                    self.enter_prevote_step(round, None).await;
                }
            }
            TimeoutKind::PreVote => {
                if current.1 == Step::PreVote {
                    self.enter_precommit_step(round, None).await;
                }
            }
            TimeoutKind::PreCommit => {
                if current.1 == Step::PreCommit {
                    let next = round.next();
                    {
                        let mut state = self.state.lock();
                        state.enter_round(next);
                    }
                    self.notify(Event::StateChanged { round: next, step: Step::Propose });
                    self.scheduler.schedule(TimeoutKind::Propose, next);
                    let is_proposer = self.state.lock().is_proposer(next);
                    if is_proposer {
                        self.propose(next).await;
                    }
                }
            }
        }
    }
}
