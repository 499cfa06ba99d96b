// =============================================================================
// Kill-Switch Oracle — absolute, fail-closed trading stop
// =============================================================================
//
// The oracle fuses two flags: the environment flag frozen at boot and the
// persisted `system_state.kill_switch`. Either one being truthy blocks all
// order placement. A store read failure also reads as active: when the truth
// cannot be established, the answer is "do not trade".
//
// Checked at the worker-loop top and re-checked immediately before every
// order-placing wire call.
// =============================================================================

use tracing::{error, warn};

use crate::store::Store;

#[derive(Clone)]
pub struct KillSwitch {
    env_active: bool,
    store: Store,
}

impl KillSwitch {
    pub fn new(env_active: bool, store: Store) -> Self {
        Self { env_active, store }
    }

    /// True if trading must stop.
    pub async fn is_active(&self) -> bool {
        // The environment flag always wins.
        if self.env_active {
            return true;
        }

        match self.store.get_system_state().await {
            Ok(state) => state.kill_switch,
            Err(e) => {
                // Fail closed: an unreadable store blocks trading.
                error!(error = %e, "kill-switch store read failed — treating as ACTIVE");
                true
            }
        }
    }

    /// Persist the kill-switch ON. Used by the FAILSAFE path when protection
    /// invariants cannot be upheld.
    pub async fn engage(&self, reason: &str) {
        warn!(reason, "engaging persisted kill-switch");
        if let Err(e) = self
            .store
            .update_system_state(None, None, Some(true))
            .await
        {
            // Nothing further can be done here; the env flag and the failed
            // store reads both keep the oracle fail-closed.
            error!(error = %e, "failed to persist kill-switch");
        }
    }
}

impl std::fmt::Debug for KillSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KillSwitch")
            .field("env_active", &self.env_active)
            .finish_non_exhaustive()
    }
}
