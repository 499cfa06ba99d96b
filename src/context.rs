// =============================================================================
// Application Context — explicit wiring of shared subsystems
// =============================================================================
//
// One context per worker process, built once at boot and handed to
// constructors. Lifecycle: created after config + store init, torn down on
// shutdown. Nothing reads process-wide statics after boot.
// =============================================================================

use std::sync::Arc;

use crate::config::AppConfig;
use crate::kill_switch::KillSwitch;
use crate::outbox::Outbox;
use crate::store::Store;
use crate::wallet::VirtualWallet;

/// Shared subsystems for the worker process.
#[derive(Clone)]
pub struct AppContext {
    pub config: AppConfig,
    pub store: Store,
    pub outbox: Outbox,
    pub kill_switch: KillSwitch,
    pub wallet: Arc<VirtualWallet>,
}

impl AppContext {
    pub fn new(config: AppConfig, store: Store, outbox: Outbox) -> Self {
        let kill_switch = KillSwitch::new(config.env_kill_switch, store.clone());
        let wallet = Arc::new(VirtualWallet::new(config.virtual_start_balance));
        Self {
            config,
            store,
            outbox,
            kill_switch,
            wallet,
        }
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("outbox", &self.outbox)
            .finish_non_exhaustive()
    }
}
