use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::event::ConsensusEvent;

/// The single inbound queue a `Context` reads from. Producers (the host's
/// network layer, or the `TimeoutScheduler`) never block: `produce_message`
/// is a thin wrapper over an unbounded `tokio::sync::mpsc` sender, mirroring
/// the producer/consumer split in `consensus/net`'s `NetworkHandle` /
/// `NetworkRunner` pair.
#[derive(Clone)]
pub struct MailboxSender {
    tx: UnboundedSender<ConsensusEvent>,
}

impl MailboxSender {
    /// Enqueue a message for the Context's consumer task to process.
    /// Never fails from the caller's perspective; if the Context has
    /// already stopped the message is silently dropped.
    pub fn produce_message(&self, event: ConsensusEvent) {
        let _ = self.tx.send(event);
    }

    pub(crate) fn raw(&self) -> UnboundedSender<ConsensusEvent> {
        self.tx.clone()
    }
}

pub struct Mailbox {
    rx: UnboundedReceiver<ConsensusEvent>,
}

impl Mailbox {
    pub fn new() -> (MailboxSender, Mailbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MailboxSender { tx }, Mailbox { rx })
    }

    pub async fn recv(&mut self) -> Option<ConsensusEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Round, TimeoutKind};

    #[tokio::test]
    async fn produced_message_is_received_in_order() {
        let (sender, mut mailbox) = Mailbox::new();
        sender.produce_message(ConsensusEvent::Timeout {
            kind: TimeoutKind::Propose,
            round: Round::ZERO,
        });
        sender.produce_message(ConsensusEvent::Timeout {
            kind: TimeoutKind::PreVote,
            round: Round::ZERO,
        });

        let first = mailbox.recv().await.unwrap();
        assert!(matches!(
            first,
            ConsensusEvent::Timeout {
                kind: TimeoutKind::Propose,
                ..
            }
        ));
        let second = mailbox.recv().await.unwrap();
        assert!(matches!(
            second,
            ConsensusEvent::Timeout {
                kind: TimeoutKind::PreVote,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn dropping_all_senders_closes_mailbox() {
        let (sender, mut mailbox) = Mailbox::new();
        drop(sender);
        assert!(mailbox.recv().await.is_none());
    }
}
