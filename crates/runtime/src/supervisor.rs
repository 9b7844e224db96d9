//! Fleet supervisor: one restart loop per identity, forever.
//!
//! Every identity gets its own task running [`supervise`]. A cycle that
//! ends, errors, or panics never takes down a sibling; the loop applies
//! the cooldown its [`CycleEnd`] calls for and goes again. The process as
//! a whole only stops when it is killed.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::identity::IdentityCache;
use crate::probe::{RESET_COOLDOWN, THROTTLE_COOLDOWN};
use crate::proxy::ProxyDescriptor;
use crate::session::{CycleEnd, Session, SessionConfig};
use crate::transport::NetTunnel;

/// One unit of the fleet: a user id bound to its (optional) proxy.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub proxy: Option<ProxyDescriptor>,
}

/// Pause before the next cycle, by how the last one ended.
fn restart_delay(end: CycleEnd) -> Option<Duration> {
    match end {
        CycleEnd::Closed => None,
        CycleEnd::Throttled => Some(THROTTLE_COOLDOWN),
        CycleEnd::Abandoned => Some(RESET_COOLDOWN),
    }
}

/// Runs one session's cycles forever, isolating panics to this identity.
async fn supervise(mut session: Session) {
    loop {
        let end = AssertUnwindSafe(session.cycle()).catch_unwind().await;
        let delay = match end {
            Ok(end) => restart_delay(end),
            Err(_) => {
                error!(session = %session.label(), "session cycle panicked; restarting");
                Some(RESET_COOLDOWN)
            }
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Owns the fleet: shared config, the identity cache, and the set of
/// identities to keep connected.
pub struct Supervisor {
    config: Arc<SessionConfig>,
    cache: Arc<IdentityCache>,
    identities: Vec<Identity>,
}

impl Supervisor {
    pub fn new(config: SessionConfig, cache: IdentityCache, identities: Vec<Identity>) -> Self {
        Self {
            config: Arc::new(config),
            cache: Arc::new(cache),
            identities,
        }
    }

    /// Spawns one supervised session per identity and waits on all of
    /// them. Sessions run forever, so this returns only if the fleet is
    /// empty or every task is externally aborted.
    pub async fn run(self) {
        let mut fleet = JoinSet::new();
        let count = self.identities.len();

        for identity in self.identities {
            let session = Session::new(
                identity.user_id,
                identity.proxy.clone(),
                Arc::clone(&self.config),
                Arc::clone(&self.cache),
                Arc::new(NetTunnel::new(identity.proxy)),
            );
            info!(session = %session.label(), "starting session");
            fleet.spawn(supervise(session));
        }

        info!(sessions = count, "fleet running");
        while fleet.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_delay_matches_cycle_end() {
        assert_eq!(restart_delay(CycleEnd::Closed), None);
        assert_eq!(
            restart_delay(CycleEnd::Throttled),
            Some(Duration::from_secs(600))
        );
        assert_eq!(
            restart_delay(CycleEnd::Abandoned),
            Some(Duration::from_secs(60))
        );
    }

    #[tokio::test]
    async fn empty_fleet_returns() {
        let config = SessionConfig {
            ip_check_url: "http://127.0.0.1:9/ip".to_string(),
            wss_host: "gateway.test".to_string(),
        };
        let tmp = tempfile::TempDir::new().unwrap();
        let cache = IdentityCache::load(tmp.path().join("identities.json"));
        Supervisor::new(config, cache, Vec::new()).run().await;
    }
}
