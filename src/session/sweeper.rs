use super::SessionRegistry;
use crate::transport::RemoteConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Spawns the idle-session sweeper: on every tick, sessions whose
/// `last_active` is older than `idle_timeout` are deleted from the registry
/// and their transports disconnected. The sweep runs concurrently with all
/// request handling and never blocks `load`; an in-flight bridge call holding
/// an evicted handle simply finishes against a dead transport.
pub fn spawn<C>(
    registry: Arc<SessionRegistry<C>>,
    idle_timeout: Duration,
    sweep_interval: Duration,
) -> JoinHandle<()>
where
    C: RemoteConnection + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let idle_timeout_ms = idle_timeout.as_millis() as i64;

        loop {
            ticker.tick().await;

            let stale: Vec<String> = registry
                .list()
                .into_iter()
                .filter(|handle| handle.idle_millis() >= idle_timeout_ms)
                .map(|handle| handle.session_id.clone())
                .collect();

            if stale.is_empty() {
                debug!(live = registry.len(), "Idle sweep: nothing to evict");
                continue;
            }

            for session_id in stale {
                if let Some(handle) = registry.delete(&session_id) {
                    info!(
                        session_id = %session_id,
                        host = %handle.endpoint.host,
                        idle_ms = handle.idle_millis(),
                        "Evicting idle session"
                    );
                    handle.mark_closed();
                    handle.connection.disconnect().await;
                }
            }
        }
    })
}
