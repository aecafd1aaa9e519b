//! Maps driver/passenger identities to live WebSocket sessions and fans
//! pushes out across process instances.
//!
//! Delivery is at-most-once and fire-and-forget. Every instance publishes
//! addressed envelopes on a shared Postgres NOTIFY channel and every
//! instance listens on it, delivering only to the sessions bound in its
//! own process. An unreachable target is logged and dropped; it never
//! fails the operation that produced the push.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgListener;
use sqlx::{Executor, Pool, Postgres};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const PUSH_CHANNEL: &str = "session_push";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Identity {
    Driver(Uuid),
    Passenger(Uuid),
}

/// Addressed push as published on the broadcast channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub target: Identity,
    pub event: String,
    pub payload: Value,
}

/// Frame delivered to a single session's socket task.
#[derive(Clone, Debug, Serialize)]
pub struct OutboundFrame {
    pub event: String,
    pub data: Value,
}

pub type SessionSender = mpsc::UnboundedSender<OutboundFrame>;

struct Binding {
    session: Uuid,
    tx: SessionSender,
}

/// Process-local identity -> session map. Last bind wins so a reconnect
/// replaces a stale session; unbinds are guarded by session id so the
/// stale socket's teardown cannot evict its replacement.
#[derive(Default)]
struct SessionTable {
    inner: RwLock<HashMap<Identity, Binding>>,
}

impl SessionTable {
    fn bind(&self, identity: Identity, session: Uuid, tx: SessionSender) {
        let mut map = self.inner.write().unwrap();
        map.insert(identity, Binding { session, tx });
    }

    fn unbind(&self, identity: Identity, session: Uuid) {
        let mut map = self.inner.write().unwrap();
        if let Some(binding) = map.get(&identity) {
            if binding.session == session {
                map.remove(&identity);
            }
        }
    }

    fn deliver(&self, envelope: &PushEnvelope) -> bool {
        let map = self.inner.read().unwrap();

        match map.get(&envelope.target) {
            Some(binding) => binding
                .tx
                .send(OutboundFrame {
                    event: envelope.event.clone(),
                    data: envelope.payload.clone(),
                })
                .is_ok(),
            None => false,
        }
    }
}

pub struct ConnectionRegistry {
    pool: Pool<Postgres>,
    sessions: SessionTable,
}

impl ConnectionRegistry {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            sessions: SessionTable::default(),
        }
    }

    pub fn bind(&self, identity: Identity, session: Uuid, tx: SessionSender) {
        tracing::info!(?identity, %session, "session bound");
        self.sessions.bind(identity, session, tx);
    }

    pub fn unbind(&self, identity: Identity, session: Uuid) {
        tracing::info!(?identity, %session, "session unbound");
        self.sessions.unbind(identity, session);
    }

    /// Publishes an addressed push on the broadcast channel. Whichever
    /// instance holds the target's socket delivers it; if the bus is down
    /// we fall back to local delivery only.
    #[tracing::instrument(skip(self, payload))]
    pub async fn push_to(&self, target: Identity, event: &str, payload: Value) {
        let envelope = PushEnvelope {
            target,
            event: event.into(),
            payload,
        };

        let encoded = match serde_json::to_string(&envelope) {
            Ok(encoded) => encoded,
            Err(err) => {
                tracing::warn!(error = ?err, "failed to encode push envelope");
                return;
            }
        };

        let published = self
            .pool
            .execute(
                sqlx::query("SELECT pg_notify($1, $2)")
                    .bind(PUSH_CHANNEL)
                    .bind(&encoded),
            )
            .await;

        if let Err(err) = published {
            tracing::warn!(error = ?err, "push bus unavailable, delivering locally only");
            self.deliver_local(&envelope);
        }
    }

    /// Listener loop; spawned once per process at startup.
    pub async fn run_listener(self: Arc<Self>) {
        let mut listener = match PgListener::connect_with(&self.pool).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!(error = ?err, "failed to connect push listener");
                return;
            }
        };

        if let Err(err) = listener.listen(PUSH_CHANNEL).await {
            tracing::error!(error = ?err, "failed to subscribe to push channel");
            return;
        }

        tracing::info!("listening for pushes on {}", PUSH_CHANNEL);

        loop {
            match listener.recv().await {
                Ok(notification) => {
                    match serde_json::from_str::<PushEnvelope>(notification.payload()) {
                        Ok(envelope) => self.deliver_local(&envelope),
                        Err(err) => {
                            tracing::warn!(error = ?err, "dropping malformed push envelope")
                        }
                    }
                }
                // PgListener reconnects on the next recv; just keep going
                Err(err) => tracing::warn!(error = ?err, "push listener error"),
            }
        }
    }

    fn deliver_local(&self, envelope: &PushEnvelope) {
        if !self.sessions.deliver(envelope) {
            tracing::debug!(
                identity = ?envelope.target,
                event = %envelope.event,
                "peer has no session here, push dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(target: Identity) -> PushEnvelope {
        PushEnvelope {
            target,
            event: "receiveCounterOffer".into(),
            payload: json!({ "fare": 450.0 }),
        }
    }

    #[test]
    fn deliver_reaches_bound_session() {
        let table = SessionTable::default();
        let identity = Identity::Driver(Uuid::new_v4());
        let (tx, mut rx) = mpsc::unbounded_channel();

        table.bind(identity, Uuid::new_v4(), tx);

        assert!(table.deliver(&envelope(identity)));
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.event, "receiveCounterOffer");
        assert_eq!(frame.data["fare"], 450.0);
    }

    #[test]
    fn deliver_to_unbound_identity_is_a_noop() {
        let table = SessionTable::default();

        assert!(!table.deliver(&envelope(Identity::Passenger(Uuid::new_v4()))));
    }

    #[test]
    fn last_bind_wins_on_reconnect() {
        let table = SessionTable::default();
        let identity = Identity::Driver(Uuid::new_v4());

        let (stale_tx, mut stale_rx) = mpsc::unbounded_channel();
        let (live_tx, mut live_rx) = mpsc::unbounded_channel();

        table.bind(identity, Uuid::new_v4(), stale_tx);
        table.bind(identity, Uuid::new_v4(), live_tx);

        assert!(table.deliver(&envelope(identity)));
        assert!(stale_rx.try_recv().is_err());
        assert!(live_rx.try_recv().is_ok());
    }

    #[test]
    fn stale_unbind_does_not_evict_replacement() {
        let table = SessionTable::default();
        let identity = Identity::Passenger(Uuid::new_v4());
        let stale_session = Uuid::new_v4();

        let (stale_tx, _stale_rx) = mpsc::unbounded_channel();
        let (live_tx, mut live_rx) = mpsc::unbounded_channel();

        table.bind(identity, stale_session, stale_tx);
        table.bind(identity, Uuid::new_v4(), live_tx);

        // the replaced socket tears down after the reconnect
        table.unbind(identity, stale_session);

        assert!(table.deliver(&envelope(identity)));
        assert!(live_rx.try_recv().is_ok());
    }

    #[test]
    fn unbind_of_unknown_identity_is_a_noop() {
        let table = SessionTable::default();
        table.unbind(Identity::Driver(Uuid::new_v4()), Uuid::new_v4());
    }

    #[test]
    fn envelope_round_trips_through_the_bus_encoding() {
        let identity = Identity::Driver(Uuid::new_v4());
        let encoded = serde_json::to_string(&envelope(identity)).unwrap();
        let decoded: PushEnvelope = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.target, identity);
        assert_eq!(decoded.event, "receiveCounterOffer");
    }
}
