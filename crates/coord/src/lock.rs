// Advisory edit locks on graph entities.
//
// Locks are TTL-driven only:
// - acquire grants a lock with `expires_at = now + ttl` when no live lock exists
// - renew extends the same lock by another full TTL window from "now"
// - liveness is evaluated lazily on each call; nothing sweeps in the background
//
// The table keeps the last-issued lock per entity (live or not) so a holder can
// release idempotently. Every decision for one entity happens under that
// entity's DashMap entry guard, and no guard is held across a store call.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use teamgraph_common::types::{LockAction, LockEvent, LockToken};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::LockConfig;
use crate::error::LockError;
use crate::notify::NotificationSink;
use crate::store::GraphStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// A live lock was dropped.
    Released,
    /// The caller's token was the last one issued, but the lock had already
    /// expired or been released.
    AlreadyInactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Held,
    Released,
    /// Expired and already announced to the notification sink.
    Expired,
}

#[derive(Debug, Clone)]
struct LockSlot {
    token: LockToken,
    state: SlotState,
}

impl LockSlot {
    fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.state == SlotState::Held && self.token.is_live_at(now)
    }

    /// Marks a held-but-expired slot as expired, returning the event to emit.
    fn settle_expiry(&mut self, now: DateTime<Utc>) -> Option<LockEvent> {
        if self.state != SlotState::Held || self.token.is_live_at(now) {
            return None;
        }
        self.state = SlotState::Expired;
        Some(LockEvent {
            entity_id: self.token.entity_id.clone(),
            holder_id: self.token.holder_id.clone(),
            action: LockAction::Expired,
            at: now,
        })
    }
}

#[derive(Debug)]
pub struct LockManager<S> {
    store: Arc<S>,
    table: DashMap<String, LockSlot>,
    policy: LockConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn NotificationSink>,
}

impl<S: GraphStore> LockManager<S> {
    pub fn new(
        store: Arc<S>,
        policy: LockConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self { store, table: DashMap::new(), policy, clock, sink }
    }

    /// Grant an exclusive lock when no live lock exists on the entity.
    ///
    /// Reads the entity version first (one store round trip) so the token
    /// carries the version the editor should commit against. Re-acquiring a
    /// live lock you already hold refreshes its expiry and keeps the token id.
    pub async fn acquire(&self, entity_id: &str, holder_id: &str) -> Result<LockToken, LockError> {
        let base_version = self.store.get_version(entity_id).await?;
        let now = self.clock.now();
        let expires_at = now + self.policy.ttl_for(entity_id);
        let mut events = Vec::with_capacity(2);

        let result = match self.table.entry(entity_id.to_owned()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                if slot.is_live_at(now) {
                    if slot.token.holder_id == holder_id {
                        slot.token.expires_at = expires_at;
                        slot.token.base_version = base_version;
                        Ok(slot.token.clone())
                    } else {
                        Err(LockError::AlreadyLocked {
                            entity_id: entity_id.to_owned(),
                            holder_id: slot.token.holder_id.clone(),
                            expires_at: slot.token.expires_at,
                        })
                    }
                } else {
                    events.extend(slot.settle_expiry(now));
                    *slot = self.issue(entity_id, holder_id, now, expires_at, base_version);
                    events.push(acquired_event(&slot.token));
                    Ok(slot.token.clone())
                }
            }
            Entry::Vacant(vacant) => {
                let slot = vacant.insert(self.issue(entity_id, holder_id, now, expires_at, base_version));
                events.push(acquired_event(&slot.token));
                Ok(slot.token.clone())
            }
        };

        self.emit(events);

        match &result {
            Ok(token) => debug!(
                entity_id,
                holder_id,
                base_version,
                expires_at = %token.expires_at,
                "lock granted"
            ),
            Err(LockError::AlreadyLocked { holder_id: current, .. }) => info!(
                entity_id,
                holder_id,
                current_holder = %current,
                "lock contention"
            ),
            Err(_) => {}
        }

        result
    }

    /// Extend a live lock to `now + ttl`.
    ///
    /// Fails once the lock has expired, even if nobody else acquired it since.
    pub async fn renew(&self, token: &LockToken) -> Result<LockToken, LockError> {
        let now = self.clock.now();
        let mut events = Vec::with_capacity(1);

        let result = match self.table.get_mut(&token.entity_id) {
            Some(mut slot) if slot.token.token_id == token.token_id => {
                events.extend(slot.settle_expiry(now));
                if !slot.is_live_at(now) {
                    Err(LockError::LockExpiredOrNotHeld { entity_id: token.entity_id.clone() })
                } else if !slot.token.renewable {
                    Err(LockError::NotRenewable { entity_id: token.entity_id.clone() })
                } else {
                    slot.token.expires_at = now + self.policy.ttl_for(&token.entity_id);
                    Ok(slot.token.clone())
                }
            }
            _ => Err(LockError::LockExpiredOrNotHeld { entity_id: token.entity_id.clone() }),
        };

        self.emit(events);

        if let Ok(renewed) = &result {
            debug!(
                entity_id = %renewed.entity_id,
                holder_id = %renewed.holder_id,
                expires_at = %renewed.expires_at,
                "lock renewed"
            );
        }

        result
    }

    /// Drop a lock. Idempotent for the holder of the last-issued token.
    pub async fn release(&self, token: &LockToken) -> Result<ReleaseOutcome, LockError> {
        let now = self.clock.now();
        let mut events = Vec::with_capacity(1);

        let result = match self.table.get_mut(&token.entity_id) {
            Some(mut slot) if slot.token.token_id == token.token_id => {
                events.extend(slot.settle_expiry(now));
                if slot.is_live_at(now) {
                    slot.state = SlotState::Released;
                    events.push(LockEvent {
                        entity_id: slot.token.entity_id.clone(),
                        holder_id: slot.token.holder_id.clone(),
                        action: LockAction::Released,
                        at: now,
                    });
                    Ok(ReleaseOutcome::Released)
                } else {
                    Ok(ReleaseOutcome::AlreadyInactive)
                }
            }
            _ => Err(LockError::NotHolder { entity_id: token.entity_id.clone() }),
        };

        self.emit(events);

        if let Ok(outcome) = &result {
            debug!(entity_id = %token.entity_id, holder_id = %token.holder_id, ?outcome, "lock released");
        }

        result
    }

    /// The live lock on an entity, if any.
    pub fn holder(&self, entity_id: &str) -> Option<LockToken> {
        let now = self.clock.now();
        let (live, expired) = match self.table.get_mut(entity_id) {
            Some(mut slot) => {
                let expired = slot.settle_expiry(now);
                let live = slot.is_live_at(now).then(|| slot.token.clone());
                (live, expired)
            }
            None => (None, None),
        };
        self.emit(expired);
        live
    }

    fn issue(
        &self,
        entity_id: &str,
        holder_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        base_version: u64,
    ) -> LockSlot {
        LockSlot {
            token: LockToken {
                token_id: Uuid::new_v4(),
                entity_id: entity_id.to_owned(),
                holder_id: holder_id.to_owned(),
                acquired_at: now,
                expires_at,
                renewable: self.policy.renewable,
                base_version,
            },
            state: SlotState::Held,
        }
    }

    fn emit(&self, events: impl IntoIterator<Item = LockEvent>) {
        for event in events {
            self.sink.notify(event);
        }
    }
}

fn acquired_event(token: &LockToken) -> LockEvent {
    LockEvent {
        entity_id: token.entity_id.clone(),
        holder_id: token.holder_id.clone(),
        action: LockAction::Acquired,
        at: token.acquired_at,
    }
}
