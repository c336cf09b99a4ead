use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    sync::{
        Arc,
        Mutex as StdMutex,
        atomic::{
            AtomicBool,
            AtomicU64,
            Ordering,
        },
    },
};

use anyhow::Result;
use avalon_data::{
    BattleParticipant,
    BattleStatus,
    BattleStore,
};
use futures_util::lock::Mutex as AsyncMutex;
use rand::seq::SliceRandom;
use uuid::Uuid;

use crate::{
    api::{
        AutomatchStatus,
        SubmittedParticipant,
    },
    config::{
        AUTOMATCH_INITIAL_RETRY_DELAY,
        AUTOMATCH_MAX_RETRY_DELAY,
        AUTOMATCH_PARTICIPANTS,
        AUTOMATCH_REFRESH_INTERVAL_BATTLES,
        AUTOMATCH_STATUS_POLL_INTERVAL,
        Config,
        WORKER_STOP_TIMEOUT,
    },
    manager::BattleSink,
};

struct Stats {
    battles_started: AtomicU64,
}

impl Stats {
    fn new() -> Self {
        Self {
            battles_started: AtomicU64::new(0),
        }
    }

    fn reset(&self) {
        self.battles_started.store(0, Ordering::SeqCst);
    }
}

/// One managed leaderboard's produce loop, per `spec.md` §4.7.
///
/// Samples active AI codes for this leaderboard, assembles 7-player battles, submits them to the
/// [`BattleManager`], and throttles itself against an in-flight cap so it never spins ahead of
/// what the manager can actually run.
pub struct AutomatchScheduler {
    leaderboard_id: i64,
    store: Arc<dyn BattleStore>,
    manager: Arc<dyn BattleSink>,
    max_in_flight: usize,
    batch_size: usize,

    running: AtomicBool,
    stats: Stats,
    eligible_bots: AsyncMutex<Vec<avalon_data::ActiveAiCode>>,
    in_flight: AsyncMutex<VecDeque<Uuid>>,
    handle: StdMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AutomatchScheduler {
    pub fn new(
        leaderboard_id: i64,
        store: Arc<dyn BattleStore>,
        manager: Arc<dyn BattleSink>,
        config: &Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            leaderboard_id,
            store,
            manager,
            max_in_flight: config.automatch_max_in_flight,
            batch_size: config.automatch_batch_size,
            running: AtomicBool::new(false),
            stats: Stats::new(),
            eligible_bots: AsyncMutex::new(Vec::new()),
            in_flight: AsyncMutex::new(VecDeque::new()),
            handle: StdMutex::new(None),
        })
    }

    /// Idempotent: calling `start` on an already-running instance is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run().await });
        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Signals the produce loop to stop, then waits up to [`WORKER_STOP_TIMEOUT`] for it to
    /// actually exit. Logs rather than blocking forever if the loop is stuck mid-iteration.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.handle.lock().unwrap().take();
        let Some(handle) = handle else {
            return;
        };
        match tokio::time::timeout(WORKER_STOP_TIMEOUT, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log::error!("leaderboard {} automatch task panicked while stopping: {err}", self.leaderboard_id)
            }
            Err(_) => log::warn!(
                "leaderboard {} automatch task did not stop within {WORKER_STOP_TIMEOUT:?}",
                self.leaderboard_id
            ),
        }
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    pub async fn status(&self) -> AutomatchStatus {
        AutomatchStatus {
            leaderboard_id: self.leaderboard_id,
            running: self.running.load(Ordering::SeqCst),
            battles_started: self.stats.battles_started.load(Ordering::SeqCst),
            in_flight: self.in_flight.lock().await.len(),
            eligible_bots: self.eligible_bots.lock().await.len(),
        }
    }

    async fn run(self: Arc<Self>) {
        let mut retry_delay = AUTOMATCH_INITIAL_RETRY_DELAY;
        while self.running.load(Ordering::SeqCst) {
            if self.eligible_bots.lock().await.is_empty()
                || self.stats.battles_started.load(Ordering::SeqCst) % AUTOMATCH_REFRESH_INTERVAL_BATTLES == 0
            {
                if let Err(err) = self.refresh_eligible_bots().await {
                    log::error!("leaderboard {} failed to refresh eligible bots: {err:#}", self.leaderboard_id);
                }
            }

            let eligible_count = self.eligible_bots.lock().await.len();
            if eligible_count < AUTOMATCH_PARTICIPANTS {
                log::debug!(
                    "leaderboard {} has only {eligible_count} eligible bots; backing off {retry_delay:?}",
                    self.leaderboard_id
                );
                tokio::time::sleep(retry_delay).await;
                retry_delay = (retry_delay * 2).min(AUTOMATCH_MAX_RETRY_DELAY);
                continue;
            }
            retry_delay = AUTOMATCH_INITIAL_RETRY_DELAY;

            let mut created_this_batch = 0;
            while created_this_batch < self.batch_size {
                if !self.running.load(Ordering::SeqCst) {
                    return;
                }
                if self.in_flight.lock().await.len() >= self.max_in_flight {
                    self.wait_for_oldest_to_finish().await;
                    continue;
                }
                match self.create_one_battle().await {
                    Ok(Some(battle_id)) => {
                        self.in_flight.lock().await.push_back(battle_id);
                        self.stats.battles_started.fetch_add(1, Ordering::SeqCst);
                        created_this_batch += 1;
                    }
                    Ok(None) => break,
                    Err(err) => {
                        log::error!("leaderboard {} failed to create a battle: {err:#}", self.leaderboard_id);
                        break;
                    }
                }
            }

            tokio::time::sleep(AUTOMATCH_STATUS_POLL_INTERVAL).await;
        }
    }

    async fn refresh_eligible_bots(&self) -> Result<()> {
        let bots = self.store.list_active_ai_codes(self.leaderboard_id).await?;
        *self.eligible_bots.lock().await = bots;
        Ok(())
    }

    /// Samples 7 distinct bots, creates the Battle record, and submits it to the manager.
    /// Returns `Ok(None)` if fewer than 7 bots remain eligible (a race with a concurrent refresh).
    async fn create_one_battle(&self) -> Result<Option<Uuid>> {
        let sample = {
            let eligible = self.eligible_bots.lock().await;
            if eligible.len() < AUTOMATCH_PARTICIPANTS {
                return Ok(None);
            }
            eligible
                .choose_multiple(&mut rand::rng(), AUTOMATCH_PARTICIPANTS)
                .cloned()
                .collect::<Vec<_>>()
        };

        let battle_id = Uuid::new_v4();
        let participants: Vec<BattleParticipant> = sample
            .iter()
            .enumerate()
            .map(|(index, bot)| BattleParticipant {
                user_id: bot.user_id,
                ai_code_id: bot.ai_code_id,
                position: index as u8 + 1,
            })
            .collect();

        self.store
            .create_battle(
                battle_id,
                &participants,
                self.leaderboard_id,
                false,
                "automatch".to_owned(),
                BattleStatus::Waiting,
            )
            .await?;

        let submitted: Vec<SubmittedParticipant> = sample
            .into_iter()
            .enumerate()
            .map(|(index, bot)| SubmittedParticipant {
                user_id: bot.user_id,
                ai_code_id: bot.ai_code_id,
                position: index as u8 + 1,
            })
            .collect();
        self.manager.submit(battle_id, submitted).await?;

        Ok(Some(battle_id))
    }

    /// Blocks until the oldest in-flight battle leaves `{waiting, playing}`, then pops it.
    async fn wait_for_oldest_to_finish(&self) {
        let oldest = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.pop_front() {
                Some(id) => id,
                None => return,
            }
        };
        loop {
            match self.manager.status(oldest).await {
                Some(status) if !matches!(status, BattleStatus::Waiting | BattleStatus::Playing) => return,
                None => return,
                _ => tokio::time::sleep(AUTOMATCH_STATUS_POLL_INTERVAL).await,
            }
        }
    }
}

/// Admin control surface over the set of per-leaderboard [`AutomatchScheduler`]s, per `spec.md`
/// §4.7's "manage-set" operation.
pub struct AutomatchManager {
    store: Arc<dyn BattleStore>,
    battle_manager: Arc<dyn BattleSink>,
    config: Config,
    instances: AsyncMutex<HashMap<i64, Arc<AutomatchScheduler>>>,
}

impl AutomatchManager {
    pub fn new(store: Arc<dyn BattleStore>, battle_manager: Arc<dyn BattleSink>, config: Config) -> Self {
        Self {
            store,
            battle_manager,
            config,
            instances: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Starts (or idempotently re-starts) the instance for `leaderboard_id`, creating it if
    /// necessary.
    pub async fn start(&self, leaderboard_id: i64) {
        let instance = self.instance_for(leaderboard_id).await;
        instance.start();
    }

    pub async fn stop(&self, leaderboard_id: i64) {
        let instance = self.instances.lock().await.get(&leaderboard_id).cloned();
        if let Some(instance) = instance {
            instance.stop().await;
        }
    }

    /// Stops and forgets the instance for `leaderboard_id`.
    pub async fn terminate(&self, leaderboard_id: i64) {
        let instance = self.instances.lock().await.remove(&leaderboard_id);
        if let Some(instance) = instance {
            instance.stop().await;
        }
    }

    pub async fn reset_stats(&self, leaderboard_id: i64) {
        if let Some(instance) = self.instances.lock().await.get(&leaderboard_id) {
            instance.reset_stats();
        }
    }

    /// Ensures a running instance exists for every id in `leaderboard_ids`, and stops (but keeps,
    /// for status queries) any existing instance not in the set.
    pub async fn manage_set(&self, leaderboard_ids: &[i64]) {
        for &id in leaderboard_ids {
            self.start(id).await;
        }
        let to_stop: Vec<Arc<AutomatchScheduler>> = self
            .instances
            .lock()
            .await
            .iter()
            .filter(|(id, _)| !leaderboard_ids.contains(id))
            .map(|(_, instance)| instance.clone())
            .collect();
        for instance in to_stop {
            instance.stop().await;
        }
    }

    pub async fn status(&self, leaderboard_id: i64) -> Option<AutomatchStatus> {
        let instance = self.instances.lock().await.get(&leaderboard_id)?.clone();
        Some(instance.status().await)
    }

    pub async fn status_all(&self) -> Vec<AutomatchStatus> {
        let instances: Vec<_> = self.instances.lock().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(instances.len());
        for instance in instances {
            statuses.push(instance.status().await);
        }
        statuses
    }

    async fn instance_for(&self, leaderboard_id: i64) -> Arc<AutomatchScheduler> {
        let mut instances = self.instances.lock().await;
        instances
            .entry(leaderboard_id)
            .or_insert_with(|| {
                AutomatchScheduler::new(
                    leaderboard_id,
                    self.store.clone(),
                    self.battle_manager.clone(),
                    &self.config,
                )
            })
            .clone()
    }
}
