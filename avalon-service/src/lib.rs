mod api;
mod automatch;
mod config;
mod manager;
mod resource_monitor;

use std::{
    path::PathBuf,
    sync::Arc,
};

use avalon_core::llm::{
    HttpLlmClient,
    LlmClientPool,
    LlmGateway,
};
use avalon_data::{
    AiCodeResolver,
    BattleStore,
};
use avalon_rating::RatingProcessor;

pub use api::*;
pub use automatch::{
    AutomatchManager,
    AutomatchScheduler,
};
pub use config::Config;
pub use manager::{
    BattleManager,
    BattleSink,
};
pub use resource_monitor::ResourceMonitor;

/// Assembles a [`BattleManager`] and its companion [`AutomatchManager`], wired to the same store
/// and worker config, per `spec.md` §3's data flow (Automatch feeds the manager's queue; both
/// share the Battle Store).
///
/// `base_dir` is where sandboxed bot sources are unpacked per battle; `log_dir` is where the
/// Observer writes each battle's public/private/archive trace files.
pub struct AvalonService {
    pub battle_manager: Arc<BattleManager>,
    pub automatch: Arc<AutomatchManager>,
}

impl AvalonService {
    pub fn new(
        store: Arc<dyn BattleStore>,
        ai_code_resolver: Arc<dyn AiCodeResolver>,
        base_dir: PathBuf,
        log_dir: PathBuf,
        config: Config,
    ) -> Self {
        let llm = Arc::new(LlmGateway::new(
            LlmClientPool::new(Config::llm_client_configs()),
            Arc::new(HttpLlmClient::new()),
        ));
        llm.spawn_watchdog();
        let rating = RatingProcessor::new(store.clone());
        let battle_manager = BattleManager::new(
            store.clone(),
            ai_code_resolver,
            llm,
            base_dir,
            log_dir,
            rating,
            &config,
        );
        battle_manager.spawn_dispatcher();
        battle_manager.spawn_load_monitor();

        let automatch = Arc::new(AutomatchManager::new(
            store,
            battle_manager.clone(),
            config,
        ));

        Self {
            battle_manager,
            automatch,
        }
    }
}
