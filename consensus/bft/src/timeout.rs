use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::event::ConsensusEvent;
use crate::types::{Round, TimeoutConfig, TimeoutKind};

/// Arms and cancels the three timeout kinds (propose/prevote/precommit),
/// one `tokio` task per armed `(round, kind)` key, feeding fired timeouts
/// back into the Context's mailbox as `ConsensusEvent::Timeout`.
///
/// Grounded on `consensus/net/src/network.rs`'s `tokio::select!` runner and
/// the `tokio::time::sleep` polling idiom used throughout the pack (see
/// `postech-dao-simperby/network/src/dms/server.rs`), generalized to a
/// per-timer cancellable task since the teacher itself has no timer code.
pub struct TimeoutScheduler {
    config: TimeoutConfig,
    mailbox_tx: UnboundedSender<ConsensusEvent>,
    armed: HashMap<(Round, TimeoutKind), Armed>,
}

struct Armed {
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl TimeoutScheduler {
    pub fn new(config: TimeoutConfig, mailbox_tx: UnboundedSender<ConsensusEvent>) -> Self {
        Self {
            config,
            mailbox_tx,
            armed: HashMap::new(),
        }
    }

    /// Arm a timeout for `(round, kind)`. A no-op if one is already armed
    /// for this key: the spec requires arming the same key twice to leave
    /// the original timer running rather than resetting its clock.
    pub fn schedule(&mut self, kind: TimeoutKind, round: Round) {
        if self.armed.contains_key(&(round, kind)) {
            return;
        }

        let duration = self.config.duration_for(kind, round);
        let cancelled = Arc::new(AtomicBool::new(false));
        let cancelled_for_task = cancelled.clone();
        let tx = self.mailbox_tx.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if cancelled_for_task.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(ConsensusEvent::Timeout { kind, round });
        });

        self.armed.insert((round, kind), Armed { cancelled, handle });
    }

    /// Cancel a specific armed timeout, if any. A fire-in-flight timer is
    /// aborted and its cooperative flag is set so a race between abort and
    /// delivery never reaches the mailbox.
    pub fn cancel(&mut self, kind: TimeoutKind, round: Round) {
        if let Some(armed) = self.armed.remove(&(round, kind)) {
            armed.cancelled.store(true, Ordering::SeqCst);
            armed.handle.abort();
        }
    }

    /// Cancel every outstanding timer, used on `Context::stop()`.
    pub fn cancel_all(&mut self) {
        for (_, armed) in self.armed.drain() {
            armed.cancelled.store(true, Ordering::SeqCst);
            armed.handle.abort();
        }
    }
}

impl Drop for TimeoutScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn fires_after_duration() {
        let config = TimeoutConfig {
            propose_base_ms: 20,
            prevote_base_ms: 20,
            precommit_base_ms: 20,
            increment_ms: 0,
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TimeoutScheduler::new(config, tx);
        scheduler.schedule(TimeoutKind::Propose, Round::ZERO);

        let event = rx.recv().await.expect("timeout should fire");
        match event {
            ConsensusEvent::Timeout { kind, round } => {
                assert_eq!(kind, TimeoutKind::Propose);
                assert_eq!(round, Round::ZERO);
            }
            _ => panic!("wrong event"),
        }
    }

    #[tokio::test]
    async fn cancelled_timer_never_fires() {
        let config = TimeoutConfig {
            propose_base_ms: 20,
            prevote_base_ms: 20,
            precommit_base_ms: 20,
            increment_ms: 0,
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TimeoutScheduler::new(config, tx);
        scheduler.schedule(TimeoutKind::Propose, Round::ZERO);
        scheduler.cancel(TimeoutKind::Propose, Round::ZERO);

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rescheduling_same_key_is_a_no_op() {
        let config = TimeoutConfig {
            propose_base_ms: 30,
            prevote_base_ms: 30,
            precommit_base_ms: 30,
            increment_ms: 0,
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TimeoutScheduler::new(config, tx);
        scheduler.schedule(TimeoutKind::Propose, Round::ZERO);
        // Re-arming the same key must not replace the original timer (and
        // must not reset its clock): only a single event is ever produced.
        scheduler.schedule(TimeoutKind::Propose, Round::ZERO);
        assert_eq!(scheduler.armed.len(), 1);

        let event = rx.recv().await.expect("timeout should fire once");
        assert!(matches!(event, ConsensusEvent::Timeout { kind: TimeoutKind::Propose, .. }));
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
    }
}
