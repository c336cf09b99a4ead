use std::{
    collections::HashMap,
    sync::Mutex,
};

use anyhow::Result;
use async_trait::async_trait;
use avalon_data::{
    ActiveAiCode,
    Battle,
    BattleFieldUpdate,
    BattleParticipant,
    BattlePlayer,
    BattlePlayerFieldUpdate,
    BattleStatus,
    BattleStore,
    GameStats,
    GameStatsFieldUpdate,
};
use uuid::Uuid;

/// An in-memory [`BattleStore`], shared across the Battle Manager, Rating Processor, and
/// Automatch test suites so each does not hand-roll its own fake.
///
/// Mirrors the relational shape `spec.md` §6 assumes (one `Battle` row, many `BattlePlayer`
/// rows, one `GameStats` row per `(user, leaderboard)`), without any of the transactional
/// guarantees a real store provides: callers in a single test run sequentially, so a `Mutex`
/// per table is enough.
#[derive(Default)]
pub struct InMemoryBattleStore {
    battles: Mutex<HashMap<Uuid, Battle>>,
    players: Mutex<HashMap<Uuid, Vec<BattlePlayer>>>,
    gamestats: Mutex<HashMap<(Uuid, i64), GameStats>>,
    active_ai_codes: Mutex<HashMap<i64, Vec<ActiveAiCode>>>,
}

impl InMemoryBattleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an `ActiveAiCode` entry returned by `list_active_ai_codes` for the given
    /// leaderboard, used by Automatch Scheduler tests to stock an eligible-bot pool.
    pub fn seed_active_ai_code(&self, leaderboard_id: i64, code: ActiveAiCode) {
        self.active_ai_codes
            .lock()
            .unwrap()
            .entry(leaderboard_id)
            .or_default()
            .push(code);
    }

    /// Inserts a fully-formed `Battle` row directly, bypassing `create_battle`, for tests that
    /// need to seed terminal state (e.g. a `Completed` battle for the Rating Processor).
    pub fn seed_battle(&self, battle: Battle) {
        self.battles.lock().unwrap().insert(battle.id, battle);
    }

    /// Inserts the roster for a seeded battle.
    pub fn seed_players(&self, battle_id: Uuid, players: Vec<BattlePlayer>) {
        self.players.lock().unwrap().insert(battle_id, players);
    }
}

#[async_trait]
impl BattleStore for InMemoryBattleStore {
    async fn get_battle(&self, id: Uuid) -> Result<Option<Battle>> {
        Ok(self.battles.lock().unwrap().get(&id).cloned())
    }

    async fn create_battle(
        &self,
        id: Uuid,
        participants: &[BattleParticipant],
        leaderboard_id: i64,
        elo_exempt: bool,
        battle_type: String,
        status: BattleStatus,
    ) -> Result<Battle> {
        let battle = Battle {
            id,
            status,
            leaderboard_id,
            elo_exempt,
            battle_type,
            created_at: chrono::Utc::now(),
            started_at: None,
            ended_at: None,
            result: None,
            log_artifact_id: None,
        };
        self.battles.lock().unwrap().insert(id, battle.clone());

        let players = participants
            .iter()
            .map(|participant| BattlePlayer {
                id: Uuid::new_v4(),
                battle_id: id,
                user_id: participant.user_id,
                ai_code_id: participant.ai_code_id,
                position: participant.position,
                initial_elo: 0,
                elo_change: 0,
                outcome: None,
            })
            .collect();
        self.players.lock().unwrap().insert(id, players);

        Ok(battle)
    }

    async fn update_battle(&self, id: Uuid, fields: BattleFieldUpdate) -> Result<()> {
        let mut battles = self.battles.lock().unwrap();
        let battle = battles
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("no battle with id {id}"))?;
        if let Some(status) = fields.status {
            battle.status = status;
        }
        if let Some(started_at) = fields.started_at {
            battle.started_at = Some(started_at);
        }
        if let Some(ended_at) = fields.ended_at {
            battle.ended_at = Some(ended_at);
        }
        if let Some(result) = fields.result {
            battle.result = Some(result);
        }
        if let Some(log_artifact_id) = fields.log_artifact_id {
            battle.log_artifact_id = Some(log_artifact_id);
        }
        Ok(())
    }

    async fn mark_cancelled(&self, id: Uuid, _reason: Option<String>) -> Result<()> {
        let mut battles = self.battles.lock().unwrap();
        let battle = battles
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("no battle with id {id}"))?;
        battle.status = BattleStatus::Cancelled;
        Ok(())
    }

    async fn get_gamestats(&self, user_id: Uuid, leaderboard_id: i64) -> Result<Option<GameStats>> {
        Ok(self
            .gamestats
            .lock()
            .unwrap()
            .get(&(user_id, leaderboard_id))
            .cloned())
    }

    async fn create_gamestats(&self, user_id: Uuid, leaderboard_id: i64) -> Result<GameStats> {
        let stats = GameStats::new(user_id, leaderboard_id);
        self.gamestats
            .lock()
            .unwrap()
            .insert((user_id, leaderboard_id), stats.clone());
        Ok(stats)
    }

    async fn update_gamestats(
        &self,
        user_id: Uuid,
        leaderboard_id: i64,
        fields: GameStatsFieldUpdate,
    ) -> Result<()> {
        let mut gamestats = self.gamestats.lock().unwrap();
        let stats = gamestats
            .get_mut(&(user_id, leaderboard_id))
            .ok_or_else(|| anyhow::anyhow!("no gamestats row for ({user_id}, {leaderboard_id})"))?;
        if let Some(elo) = fields.elo {
            stats.elo = elo;
        }
        if let Some(games_played) = fields.games_played {
            stats.games_played = games_played;
        }
        if let Some(wins) = fields.wins {
            stats.wins = wins;
        }
        if let Some(losses) = fields.losses {
            stats.losses = losses;
        }
        if let Some(draws) = fields.draws {
            stats.draws = draws;
        }
        Ok(())
    }

    async fn get_battle_players(&self, battle_id: Uuid) -> Result<Vec<BattlePlayer>> {
        Ok(self
            .players
            .lock()
            .unwrap()
            .get(&battle_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_battle_player(&self, id: Uuid, fields: BattlePlayerFieldUpdate) -> Result<()> {
        let mut players = self.players.lock().unwrap();
        for roster in players.values_mut() {
            if let Some(player) = roster.iter_mut().find(|p| p.id == id) {
                if let Some(initial_elo) = fields.initial_elo {
                    player.initial_elo = initial_elo;
                }
                if let Some(elo_change) = fields.elo_change {
                    player.elo_change = elo_change;
                }
                if let Some(outcome) = fields.outcome {
                    player.outcome = Some(outcome);
                }
                return Ok(());
            }
        }
        Err(anyhow::anyhow!("no battle player with id {id}"))
    }

    async fn list_active_ai_codes(&self, leaderboard_id: i64) -> Result<Vec<ActiveAiCode>> {
        Ok(self
            .active_ai_codes
            .lock()
            .unwrap()
            .get(&leaderboard_id)
            .cloned()
            .unwrap_or_default())
    }
}
