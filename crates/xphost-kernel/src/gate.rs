//! ---
//! xp_section: "04-experience-orchestration"
//! xp_subsection: "module"
//! xp_type: "source"
//! xp_scope: "code"
//! xp_description: "Keyed readiness gate with exactly-once actions."
//! xp_version: "v0.0.0-prealpha"
//! xp_owner: "tbd"
//! ---
//! A [`ReadinessGate`] lets one side register "do this once the condition
//! holds" and another side say "the condition may hold now", in either order.
//! Each key carries at most one registration. The action runs outside the lock,
//! while the key sits in the `Delivering` state, so a concurrent `notify` or a
//! new `wait` cannot observe the key as free until the action has returned.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::GateError;

type Predicate = Box<dyn Fn() -> bool + Send>;
type Action = Box<dyn FnOnce() + Send>;

/// Identifies one registration so that it can be cancelled without touching a
/// later registration on the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitTicket(u64);

struct Waiter {
    ticket: WaitTicket,
    predicate: Predicate,
    action: Action,
}

enum Slot {
    Pending(Waiter),
    Delivering(WaitTicket),
}

pub struct ReadinessGate<K = &'static str> {
    slots: Mutex<HashMap<K, Slot>>,
    next_ticket: AtomicU64,
}

impl<K> Default for ReadinessGate<K>
where
    K: Eq + Hash + Clone + Display,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> ReadinessGate<K>
where
    K: Eq + Hash + Clone + Display,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Register `action` to run once `predicate` holds.
    ///
    /// When the predicate is already true the action runs before this call
    /// returns. Otherwise it runs inside the first [`notify`](Self::notify)
    /// that finds the predicate true.
    pub fn wait<P, A>(&self, key: K, predicate: P, action: A) -> Result<WaitTicket, GateError>
    where
        P: Fn() -> bool + Send + 'static,
        A: FnOnce() + Send + 'static,
    {
        let ticket = WaitTicket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        {
            let mut slots = self.slots.lock();
            if slots.contains_key(&key) {
                return Err(GateError::DuplicateWaiter {
                    key: key.to_string(),
                });
            }
            if !predicate() {
                debug!(%key, "readiness waiter registered");
                slots.insert(
                    key,
                    Slot::Pending(Waiter {
                        ticket,
                        predicate: Box::new(predicate),
                        action: Box::new(action),
                    }),
                );
                return Ok(ticket);
            }
            slots.insert(key.clone(), Slot::Delivering(ticket));
        }
        trace!(%key, "readiness predicate already satisfied");
        action();
        self.finish(&key, ticket);
        Ok(ticket)
    }

    /// Re-evaluate the registration on `key`. Returns whether an action ran.
    pub fn notify(&self, key: &K) -> bool {
        let waiter = {
            let mut slots = self.slots.lock();
            let ready = match slots.get(key) {
                Some(Slot::Pending(waiter)) => (waiter.predicate)(),
                Some(Slot::Delivering(_)) | None => false,
            };
            if !ready {
                return false;
            }
            match slots.remove(key) {
                Some(Slot::Pending(waiter)) => {
                    slots.insert(key.clone(), Slot::Delivering(waiter.ticket));
                    waiter
                }
                // checked above while holding the same lock
                _ => return false,
            }
        };
        debug!(%key, "readiness predicate satisfied");
        let ticket = waiter.ticket;
        (waiter.action)();
        self.finish(key, ticket);
        true
    }

    /// Drop a pending registration. Only the registration identified by
    /// `ticket` is removed; one that is already delivering is left alone.
    pub fn cancel(&self, key: &K, ticket: WaitTicket) -> bool {
        let mut slots = self.slots.lock();
        match slots.get(key) {
            Some(Slot::Pending(waiter)) if waiter.ticket == ticket => {
                slots.remove(key);
                debug!(%key, "readiness waiter cancelled");
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        matches!(self.slots.lock().get(key), Some(Slot::Pending(_)))
    }

    fn finish(&self, key: &K, ticket: WaitTicket) {
        let mut slots = self.slots.lock();
        if matches!(slots.get(key), Some(Slot::Delivering(current)) if *current == ticket) {
            slots.remove(key);
        }
    }
}
