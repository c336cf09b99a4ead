use avalon_data::{
    BattleStatus,
    GameResult,
};
use serde::{
    Deserialize,
    Serialize,
};
use uuid::Uuid;

/// One of the 7 entries `submit` requires, per `spec.md` §4.6.
///
/// The Battle and its `BattlePlayer` rows are assumed to already exist in the store (created by
/// whatever called `submit`, typically an [`crate::automatch::AutomatchScheduler`]); submission
/// only resolves AI code paths and enqueues the battle for execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedParticipant {
    pub user_id: Uuid,
    pub ai_code_id: Uuid,
    pub position: u8,
}

/// The cached terminal outcome of a battle, per `result(battle_id)` in `spec.md` §4.6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleResult {
    pub battle_id: Uuid,
    pub status: BattleStatus,
    pub game_result: Option<GameResult>,
}

/// Admin control operations for one leaderboard's automatch instance, per `spec.md` §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomatchCommand {
    Start,
    Stop,
    Terminate,
    ResetStats,
}

/// A snapshot of one automatch instance, for the admin surface's `manager-status` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomatchStatus {
    pub leaderboard_id: i64,
    pub running: bool,
    pub battles_started: u64,
    pub in_flight: usize,
    pub eligible_bots: usize,
}
