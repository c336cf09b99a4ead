use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    Battle,
    BattleParticipant,
    BattlePlayer,
    BattleStatus,
    GameResult,
    GameStats,
};

/// A sparse set of fields to apply to a [`Battle`] row, per `spec.md` §6's `update_battle`.
///
/// Fields left `None` are left untouched by the store.
#[derive(Debug, Clone, Default)]
pub struct BattleFieldUpdate {
    pub status: Option<BattleStatus>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub result: Option<GameResult>,
    pub log_artifact_id: Option<String>,
}

/// A sparse set of fields to apply to a [`BattlePlayer`] row.
#[derive(Debug, Clone, Default)]
pub struct BattlePlayerFieldUpdate {
    pub initial_elo: Option<i64>,
    pub elo_change: Option<i64>,
    pub outcome: Option<crate::PlayerOutcome>,
}

/// A sparse set of fields to apply to a [`GameStats`] row.
#[derive(Debug, Clone, Default)]
pub struct GameStatsFieldUpdate {
    pub elo: Option<i64>,
    pub games_played: Option<u64>,
    pub wins: Option<u64>,
    pub losses: Option<u64>,
    pub draws: Option<u64>,
}

/// An eligible bot for Automatch sampling: a user with an active `AiCode` and a `GameStats` row
/// on the relevant leaderboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveAiCode {
    pub user_id: Uuid,
    pub ai_code_id: Uuid,
}

/// Persistence consumed by the core, per `spec.md` §6.
///
/// Implementations own the relational schema (Battle, BattlePlayer, GameStats) and are
/// responsible for transactional semantics: each mutation here either commits wholly or rolls
/// back, and the Rating Processor expects a single transaction per battle.
#[async_trait]
pub trait BattleStore: Send + Sync {
    async fn get_battle(&self, id: Uuid) -> Result<Option<Battle>>;

    async fn create_battle(
        &self,
        id: Uuid,
        participants: &[BattleParticipant],
        leaderboard_id: i64,
        elo_exempt: bool,
        battle_type: String,
        status: BattleStatus,
    ) -> Result<Battle>;

    async fn update_battle(&self, id: Uuid, fields: BattleFieldUpdate) -> Result<()>;

    async fn mark_cancelled(&self, id: Uuid, reason: Option<String>) -> Result<()>;

    async fn get_gamestats(&self, user_id: Uuid, leaderboard_id: i64) -> Result<Option<GameStats>>;

    async fn create_gamestats(&self, user_id: Uuid, leaderboard_id: i64) -> Result<GameStats>;

    async fn update_gamestats(
        &self,
        user_id: Uuid,
        leaderboard_id: i64,
        fields: GameStatsFieldUpdate,
    ) -> Result<()>;

    async fn get_battle_players(&self, battle_id: Uuid) -> Result<Vec<BattlePlayer>>;

    async fn update_battle_player(
        &self,
        id: Uuid,
        fields: BattlePlayerFieldUpdate,
    ) -> Result<()>;

    async fn list_active_ai_codes(&self, leaderboard_id: i64) -> Result<Vec<ActiveAiCode>>;
}
