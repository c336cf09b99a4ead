use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{
            AtomicUsize,
            Ordering,
        },
    },
};

use anyhow::{
    Error,
    Result,
    anyhow,
};
use async_trait::async_trait;
use avalon_core::{
    llm::LlmGateway,
    observer::{
        Observer,
        ObserverPaths,
    },
    referee::{
        BattleStatusChecker,
        Referee,
    },
    sandbox::BotHost,
};
use avalon_data::{
    AiCodeResolver,
    BattleFieldUpdate,
    BattleStatus,
    BattleStore,
    EventRecord,
    GameResult,
};
use avalon_rating::RatingProcessor;
use futures_util::lock::Mutex as AsyncMutex;
use tokio::sync::{
    Semaphore,
    mpsc,
};
use uuid::Uuid;

use crate::{
    api::{
        BattleResult,
        SubmittedParticipant,
    },
    config::Config,
    resource_monitor::ResourceMonitor,
};

/// The slice of [`BattleManager`] that the Automatch Scheduler needs, split out as a trait so
/// scheduler tests can run against a lightweight fake instead of a fully wired manager.
#[async_trait]
pub trait BattleSink: Send + Sync {
    async fn submit(&self, battle_id: Uuid, participants: Vec<SubmittedParticipant>) -> Result<bool>;
    async fn status(&self, battle_id: Uuid) -> Option<BattleStatus>;
}

#[async_trait]
impl BattleSink for BattleManager {
    async fn submit(&self, battle_id: Uuid, participants: Vec<SubmittedParticipant>) -> Result<bool> {
        BattleManager::submit(self, battle_id, participants).await
    }

    async fn status(&self, battle_id: Uuid) -> Option<BattleStatus> {
        BattleManager::status(self, battle_id).await
    }
}

/// Consults the Battle Store for the battle's live status, so the referee can observe a
/// `cancel()` call made through [`BattleManager`] while the game is in progress.
struct StoreStatusChecker {
    store: Arc<dyn BattleStore>,
}

#[async_trait]
impl BattleStatusChecker for StoreStatusChecker {
    async fn status(&self, battle_id: &str) -> Result<BattleStatus> {
        let id = Uuid::parse_str(battle_id)?;
        self.store
            .get_battle(id)
            .await?
            .map(|battle| battle.status)
            .ok_or_else(|| anyhow!("battle {battle_id} disappeared from the store mid-game"))
    }
}

/// In-memory record for one battle admitted to the manager, per `spec.md` §4.6's "current status
/// from in-memory map" and "drain_snapshots returns and clears the Observer tail".
struct BattleEntry {
    status: BattleStatus,
    result: Option<GameResult>,
    observer: Arc<Observer>,
}

struct Inner {
    store: Arc<dyn BattleStore>,
    ai_code_resolver: Arc<dyn AiCodeResolver>,
    llm: Arc<LlmGateway>,
    rating: RatingProcessor,
    base_dir: PathBuf,
    log_dir: PathBuf,

    queue_tx: mpsc::Sender<Uuid>,
    queue_rx: AsyncMutex<Option<mpsc::Receiver<Uuid>>>,

    battles: AsyncMutex<HashMap<Uuid, BattleEntry>>,
    pending_sources: AsyncMutex<HashMap<Uuid, [PathBuf; 7]>>,

    semaphore: Arc<Semaphore>,
    capacity: AtomicUsize,
    min_workers: usize,
    max_workers: usize,
}

/// Process-wide singleton coordinating all in-flight battles, per `spec.md` §4.6.
///
/// Owns a bounded admission queue and an adaptively sized pool of worker tasks. Each worker
/// dequeues one battle id, loads its bots into a fresh [`BotHost`], drives a [`Referee`] to
/// completion, persists the result, runs the [`RatingProcessor`], and releases the battle's
/// sandbox directory (via `BotHost`'s `Drop`) before picking up its next battle.
pub struct BattleManager {
    inner: Arc<Inner>,
}

impl BattleManager {
    pub fn new(
        store: Arc<dyn BattleStore>,
        ai_code_resolver: Arc<dyn AiCodeResolver>,
        llm: Arc<LlmGateway>,
        base_dir: PathBuf,
        log_dir: PathBuf,
        rating: RatingProcessor,
        config: &Config,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(config.admission_queue_capacity);
        let inner = Arc::new(Inner {
            store,
            ai_code_resolver,
            llm,
            rating,
            base_dir,
            log_dir,
            queue_tx,
            queue_rx: AsyncMutex::new(Some(queue_rx)),
            battles: AsyncMutex::new(HashMap::new()),
            pending_sources: AsyncMutex::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(config.min_worker_threads)),
            capacity: AtomicUsize::new(config.min_worker_threads),
            min_workers: config.min_worker_threads,
            max_workers: config.max_worker_threads,
        });
        Self { inner }.into()
    }

    /// Spawns the dispatcher task that pulls queued battle ids and hands each to a fresh worker
    /// once the adaptive semaphore admits it. Call once per process.
    pub fn spawn_dispatcher(self: &Arc<Self>) {
        let inner = self.inner.clone();
        tokio::spawn(async move { Self::dispatch_loop(inner).await });
    }

    /// Spawns the load monitor that adjusts the worker cap every [`crate::config::LOAD_CHECK_INTERVAL`],
    /// per `spec.md` §4.6's adaptive sizing rule.
    pub fn spawn_load_monitor(self: &Arc<Self>) {
        let inner = self.inner.clone();
        tokio::spawn(async move { Self::load_monitor_loop(inner).await });
    }

    async fn dispatch_loop(inner: Arc<Inner>) {
        loop {
            let battle_id = {
                let mut guard = inner.queue_rx.lock().await;
                let rx = match guard.as_mut() {
                    Some(rx) => rx,
                    None => return,
                };
                match rx.recv().await {
                    Some(id) => id,
                    None => return,
                }
            };
            let permit = match inner.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let inner = inner.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(err) = Self::run_battle(inner.clone(), battle_id).await {
                    log::error!("battle {battle_id} worker failed: {err:#}");
                }
            });
        }
    }

    async fn load_monitor_loop(inner: Arc<Inner>) {
        let mut monitor = ResourceMonitor::new(crate::config::LOAD_CHECK_INTERVAL);
        loop {
            tokio::time::sleep(crate::config::LOAD_CHECK_INTERVAL).await;
            let cpu = monitor.cpu_usage();
            let mem = monitor.memory_usage();
            let current = inner.capacity.load(Ordering::SeqCst);
            if cpu > crate::config::HIGH_CPU_THRESHOLD || mem > crate::config::HIGH_MEM_THRESHOLD {
                let target = current
                    .saturating_sub(crate::config::WORKER_THREAD_STEP)
                    .max(inner.min_workers);
                if target < current {
                    Self::shrink_capacity(&inner, current - target);
                    inner.capacity.store(target, Ordering::SeqCst);
                    log::info!("high load (cpu={cpu:.2}, mem={mem:.2}): worker cap {current} -> {target}");
                }
            } else if cpu < crate::config::LOW_CPU_THRESHOLD && mem < crate::config::LOW_MEM_THRESHOLD {
                let target = (current + crate::config::WORKER_THREAD_STEP).min(inner.max_workers);
                if target > current {
                    inner.semaphore.add_permits(target - current);
                    inner.capacity.store(target, Ordering::SeqCst);
                    log::info!("low load (cpu={cpu:.2}, mem={mem:.2}): worker cap {current} -> {target}");
                }
            }
        }
    }

    /// Shrinks capacity by permanently forgetting `count` permits the next time they are
    /// available, so the pool shrinks by simply not replacing exiting workers rather than
    /// aborting work in progress.
    fn shrink_capacity(inner: &Arc<Inner>, count: usize) {
        let semaphore = inner.semaphore.clone();
        tokio::spawn(async move {
            for _ in 0..count {
                if let Ok(permit) = semaphore.clone().acquire_owned().await {
                    permit.forget();
                }
            }
        });
    }

    /// Enqueues a battle for execution. Returns `false` if the battle is already known, the
    /// participant count is not exactly 7, or any AI code path fails to resolve, per `spec.md`
    /// §4.6.
    pub async fn submit(
        &self,
        battle_id: Uuid,
        participants: Vec<SubmittedParticipant>,
    ) -> Result<bool> {
        if participants.len() != 7 {
            return Ok(false);
        }
        {
            let battles = self.inner.battles.lock().await;
            if battles.contains_key(&battle_id) {
                return Ok(false);
            }
        }

        let mut sources: Vec<Option<PathBuf>> = vec![None; 7];
        for participant in &participants {
            if !(1..=7).contains(&participant.position) {
                return Ok(false);
            }
            let path = self
                .inner
                .ai_code_resolver
                .path_for(participant.ai_code_id)
                .await?;
            let path = match path {
                Some(path) => path,
                None => return Ok(false),
            };
            sources[participant.position as usize - 1] = Some(path);
        }
        let sources: Vec<PathBuf> = match sources.into_iter().collect::<Option<_>>() {
            Some(sources) => sources,
            None => return Ok(false),
        };
        let sources: [PathBuf; 7] = match sources.try_into() {
            Ok(sources) => sources,
            Err(_) => return Ok(false),
        };

        let observer = Arc::new(Observer::new(&self.inner.log_dir, battle_id.to_string()));
        {
            let mut battles = self.inner.battles.lock().await;
            battles.insert(
                battle_id,
                BattleEntry {
                    status: BattleStatus::Waiting,
                    result: None,
                    observer,
                },
            );
        }
        self.inner.store_sources(battle_id, sources).await;

        if self.inner.queue_tx.send(battle_id).await.is_err() {
            return Err(Error::msg("admission queue is closed"));
        }
        Ok(true)
    }

    /// Current status from the in-memory map, or `None` if unknown.
    pub async fn status(&self, battle_id: Uuid) -> Option<BattleStatus> {
        self.inner
            .battles
            .lock()
            .await
            .get(&battle_id)
            .map(|entry| entry.status)
    }

    /// Cached result record, or `None` if unknown or not yet terminal.
    pub async fn result(&self, battle_id: Uuid) -> Option<BattleResult> {
        let battles = self.inner.battles.lock().await;
        let entry = battles.get(&battle_id)?;
        Some(BattleResult {
            battle_id,
            status: entry.status,
            game_result: entry.result.clone(),
        })
    }

    /// Transitions a waiting or playing battle to cancelled. Idempotent on terminal battles.
    pub async fn cancel(&self, battle_id: Uuid, reason: Option<String>) -> Result<()> {
        let should_cancel = {
            let battles = self.inner.battles.lock().await;
            match battles.get(&battle_id) {
                Some(entry) => !entry.status.is_terminal(),
                None => return Ok(()),
            }
        };
        if !should_cancel {
            return Ok(());
        }
        self.inner.store.mark_cancelled(battle_id, reason).await?;
        let mut battles = self.inner.battles.lock().await;
        if let Some(entry) = battles.get_mut(&battle_id) {
            entry.status = BattleStatus::Cancelled;
        }
        Ok(())
    }

    /// Returns and clears the battle's in-memory snapshot tail.
    pub async fn drain_snapshots(&self, battle_id: Uuid) -> Vec<EventRecord> {
        let battles = self.inner.battles.lock().await;
        match battles.get(&battle_id) {
            Some(entry) => entry.observer.drain_snapshots(),
            None => Vec::new(),
        }
    }

    async fn run_battle(inner: Arc<Inner>, battle_id: Uuid) -> Result<()> {
        let sources = inner.take_sources(battle_id).await.ok_or_else(|| {
            anyhow!("battle {battle_id} was dequeued without resolved sources")
        })?;
        let observer = {
            let battles = inner.battles.lock().await;
            battles
                .get(&battle_id)
                .map(|entry| entry.observer.clone())
                .ok_or_else(|| anyhow!("battle {battle_id} missing from in-memory map"))?
        };

        inner
            .store
            .update_battle(
                battle_id,
                BattleFieldUpdate {
                    status: Some(BattleStatus::Playing),
                    started_at: Some(chrono::Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        Self::set_status(&inner, battle_id, BattleStatus::Playing).await;

        let bot_host = match BotHost::prepare(&inner.base_dir, &battle_id.to_string(), &sources) {
            Ok(host) => host,
            Err(err) => {
                observer
                    .record(
                        avalon_data::EventType::CriticalSetupError,
                        serde_json::json!({ "error": err.to_string() }),
                    )
                    .ok();
                return Self::finalize(&inner, battle_id, observer.as_ref(), None).await;
            }
        };

        let status_checker = StoreStatusChecker {
            store: inner.store.clone(),
        };
        let referee = Referee::new(
            battle_id.to_string(),
            bot_host,
            observer.as_ref(),
            inner.llm.as_ref(),
            &status_checker,
            None,
        );

        let game_result = referee.run_game().await;

        match game_result {
            Ok(result) => Self::finalize(&inner, battle_id, observer.as_ref(), Some(result)).await,
            Err(err) => {
                log::warn!("battle {battle_id} ended with an error: {err:#}");
                Self::finalize(&inner, battle_id, observer.as_ref(), None).await
            }
        }
    }

    async fn set_status(inner: &Arc<Inner>, battle_id: Uuid, status: BattleStatus) {
        let mut battles = inner.battles.lock().await;
        if let Some(entry) = battles.get_mut(&battle_id) {
            entry.status = status;
        }
    }

    /// Persists the final outcome, runs the rating processor, and refreshes the in-memory
    /// status/result cache. Called on every exit path (completed, setup error, referee error,
    /// cancellation observed mid-game), per `spec.md` §4.6's worker loop.
    async fn finalize(
        inner: &Arc<Inner>,
        battle_id: Uuid,
        observer: &Observer,
        game_result: Option<GameResult>,
    ) -> Result<()> {
        let now = chrono::Utc::now();
        match &game_result {
            Some(result) if result.winner.is_some() => {
                inner
                    .store
                    .update_battle(
                        battle_id,
                        BattleFieldUpdate {
                            status: Some(BattleStatus::Completed),
                            ended_at: Some(now),
                            result: Some(result.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            Some(result) => {
                // Terminated due to an externally observed status change (cancellation); the
                // status itself was already set by whoever changed it. Just cache the result.
                inner
                    .store
                    .update_battle(
                        battle_id,
                        BattleFieldUpdate {
                            ended_at: Some(now),
                            result: Some(result.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            None => {
                inner
                    .store
                    .update_battle(
                        battle_id,
                        BattleFieldUpdate {
                            status: Some(BattleStatus::Error),
                            ended_at: Some(now),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
        }

        observer.finalize()?;
        let archive_path = ObserverPaths::new(&inner.log_dir, &battle_id.to_string()).archive;
        let event_log = read_archive(&archive_path)?;

        if let Err(err) = inner.rating.process(battle_id, &event_log).await {
            if err
                .downcast_ref::<avalon_rating::RatingError>()
                .is_some_and(|err| matches!(err, avalon_rating::RatingError::UnattributedError(_)))
            {
                log::info!("battle {battle_id} had no attributable offender; no penalty applied");
            } else {
                log::error!("rating processor failed for battle {battle_id}: {err:#}");
            }
        }

        let battle = inner.store.get_battle(battle_id).await?;
        let mut battles = inner.battles.lock().await;
        if let Some(entry) = battles.get_mut(&battle_id) {
            if let Some(battle) = battle {
                entry.status = battle.status;
            }
            entry.result = game_result;
        }
        Ok(())
    }
}

fn read_archive(path: &std::path::Path) -> Result<Vec<EventRecord>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

impl Inner {
    async fn store_sources(&self, battle_id: Uuid, sources: [PathBuf; 7]) {
        self.pending_sources.lock().await.insert(battle_id, sources);
    }

    async fn take_sources(&self, battle_id: Uuid) -> Option<[PathBuf; 7]> {
        self.pending_sources.lock().await.remove(&battle_id)
    }
}
