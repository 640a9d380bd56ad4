//! Tenant-scoped fan-out of roster change events to live subscribers.
//!
//! Subscribers register an mpsc sender keyed by tenant; every successful
//! session mutation publishes one event. Senders whose receiver has gone
//! away are pruned during publish, so a dropped subscription unsubscribes
//! itself even if the connection handler never calls `unsubscribe`.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;
use tracing::debug;

use shiftwatch_protocol::RosterEvent;

pub struct Fanout {
    inner: Mutex<FanoutInner>,
}

struct FanoutInner {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

struct Subscriber {
    id: u64,
    tenant_id: String,
    sender: Sender<RosterEvent>,
}

impl Fanout {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FanoutInner {
                next_id: 1,
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn subscribe(&self, tenant_id: &str) -> (u64, Receiver<RosterEvent>) {
        let (sender, receiver) = channel();
        let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push(Subscriber {
            id,
            tenant_id: tenant_id.to_string(),
            sender,
        });
        debug!(subscriber_id = id, tenant_id = %tenant_id, "Roster subscriber added");
        (id, receiver)
    }

    pub fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        inner.subscribers.retain(|sub| sub.id != id);
    }

    pub fn publish(&self, event: &RosterEvent) {
        let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
        inner.subscribers.retain(|sub| {
            if sub.tenant_id != event.tenant_id() {
                return true;
            }
            match sub.sender.send(event.clone()) {
                Ok(()) => true,
                Err(_) => {
                    debug!(subscriber_id = sub.id, "Pruning disconnected roster subscriber");
                    false
                }
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .subscribers
            .len()
    }
}
