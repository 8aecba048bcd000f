//! Background Sweeps
//!
//! Expired handshake sessions, loader sessions and nonces are purged on
//! independent periodic tasks. A failed sweep is logged and retried on the next tick; request-path
//! validation never waits on a sweep.

use crate::application::handshake::HandshakeCoordinator;
use crate::application::replay_guard::ReplayGuard;
use crate::application::session::SessionManager;
use crate::domain::repository::{HandshakeSessionStore, LoaderSessionStore, NonceRepository};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub fn spawn_handshake_sweeper<S>(
    coordinator: Arc<HandshakeCoordinator<S>>,
    every: Duration,
) -> JoinHandle<()>
where
    S: HandshakeSessionStore + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match coordinator.sweep_expired().await {
                Ok(0) => {}
                Ok(deleted) => {
                    tracing::info!(sessions_deleted = deleted, "Handshake sweep completed");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Handshake sweep failed, retrying next tick");
                }
            }
        }
    })
}

pub fn spawn_nonce_sweeper<N>(guard: Arc<ReplayGuard<N>>, every: Duration) -> JoinHandle<()>
where
    N: NonceRepository + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match guard.sweep_expired().await {
                Ok(0) => {}
                Ok(purged) => {
                    tracing::info!(nonces_purged = purged, "Nonce sweep completed");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Nonce sweep failed, retrying next tick");
                }
            }
        }
    })
}

pub fn spawn_session_sweeper<T>(sessions: Arc<SessionManager<T>>, every: Duration) -> JoinHandle<()>
where
    T: LoaderSessionStore + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match sessions.sweep_expired().await {
                Ok(0) => {}
                Ok(deleted) => {
                    tracing::info!(sessions_deleted = deleted, "Loader session sweep completed");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Loader session sweep failed, retrying next tick");
                }
            }
        }
    })
}
