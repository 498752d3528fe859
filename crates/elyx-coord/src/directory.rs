//! Agent directory and message transport.
//!
//! One FIFO inbox per agent, addressed through a shared [`Directory`] of
//! senders. Broadcast delivers to every registered agent except the sender.
//! There are no retries, no timeouts, and no iteration tagging at the
//! transport level; the protocol above counts messages against the peer
//! total and nothing else.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use elyx_core::AgentId;

use crate::codec::Message;

/// A delivered payload with its sender.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: AgentId,
    pub payload: String,
}

/// Receiving end of one agent's inbox.
#[derive(Debug)]
pub struct Mailbox {
    rx: Receiver<Envelope>,
}

impl Mailbox {
    /// Non-blocking poll; `None` when the inbox is empty or every sender is
    /// gone.
    pub fn poll(&self) -> Option<Envelope> {
        match self.rx.try_recv() {
            Ok(env) => Some(env),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Blocking receive; `None` once every sender has been dropped.
    pub fn recv(&self) -> Option<Envelope> {
        self.rx.recv().ok()
    }
}

/// Registry of agent inboxes. Cloned into every agent thread.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    inboxes: HashMap<AgentId, Sender<Envelope>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent and hand back its mailbox. Call once per agent
    /// before cloning the directory into threads.
    pub fn register(&mut self, agent: AgentId) -> Mailbox {
        let (tx, rx) = mpsc::channel();
        self.inboxes.insert(agent, tx);
        Mailbox { rx }
    }

    pub fn num_agents(&self) -> usize {
        self.inboxes.len()
    }

    pub fn agents(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.inboxes.keys().copied()
    }

    /// Deliver to every registered agent except the sender. Delivery to an
    /// agent whose mailbox is gone is silently dropped.
    pub fn broadcast(&self, from: AgentId, message: &Message) {
        let payload = message.encode();
        for (&agent, tx) in &self.inboxes {
            if agent == from {
                continue;
            }
            let _ = tx.send(Envelope {
                from,
                payload: payload.clone(),
            });
        }
    }

    /// Unicast to one agent.
    pub fn send(&self, from: AgentId, to: AgentId, message: &Message) {
        if let Some(tx) = self.inboxes.get(&to) {
            let _ = tx.send(Envelope {
                from,
                payload: message.encode(),
            });
        }
    }
}
