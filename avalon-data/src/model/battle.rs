use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use uuid::Uuid;

use crate::Role;

/// The lifecycle status of a battle.
///
/// Transitions are monotone forward: `Waiting -> Playing -> {Completed, Error, Cancelled}`. Once
/// a battle reaches a terminal status, it and its `ended_at` timestamp are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleStatus {
    Waiting,
    Playing,
    Completed,
    Error,
    Cancelled,
}

impl BattleStatus {
    /// Whether this status is terminal, i.e. no further transition is legal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

/// The outcome of a final `run_game` result, independent of persistence concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Blue,
    Red,
}

/// The reason a game ended, surfaced to replay UIs and used by the rating processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinReason {
    MissionsFailed,
    AssassinationSuccess,
    FailedAssassination,
    TerminatedDueToStatusChange,
}

/// The final record returned by the referee's `run_game`, per `spec.md` §4.4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameResult {
    pub winner: Option<Winner>,
    pub win_reason: WinReason,
    pub blue_wins: u8,
    pub red_wins: u8,
    pub rounds_played: u8,
    pub roles: std::collections::BTreeMap<u8, Role>,
    pub log_path: String,
    pub traceback: Option<String>,
}

/// A single scheduled or completed game between 7 bots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Battle {
    pub id: Uuid,
    pub status: BattleStatus,
    pub leaderboard_id: i64,
    pub elo_exempt: bool,
    pub battle_type: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub result: Option<GameResult>,
    pub log_artifact_id: Option<String>,
}

impl Battle {
    pub fn new(id: Uuid, leaderboard_id: i64, elo_exempt: bool, battle_type: String) -> Self {
        Self {
            id,
            status: BattleStatus::Waiting,
            leaderboard_id,
            elo_exempt,
            battle_type,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            result: None,
            log_artifact_id: None,
        }
    }

    /// Untracked/test leaderboard sentinel, per `spec.md` glossary.
    pub const UNTRACKED_LEADERBOARD_ID: i64 = 0;

    pub fn is_rated(&self) -> bool {
        !self.elo_exempt && self.leaderboard_id != Self::UNTRACKED_LEADERBOARD_ID
    }
}

/// The outcome recorded for one player once a battle is rated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerOutcome {
    Win,
    Loss,
    Draw,
    Cancelled,
}

/// One of the 7 seats in a battle, linking a user's submitted bot to a position and its
/// eventual rating outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattlePlayer {
    pub id: Uuid,
    pub battle_id: Uuid,
    pub user_id: Uuid,
    pub ai_code_id: Uuid,
    /// 1-indexed seat, unique within a battle; all 7 positions form a permutation of `1..=7`.
    pub position: u8,
    pub initial_elo: i64,
    pub elo_change: i64,
    pub outcome: Option<PlayerOutcome>,
}

/// A participant submitted to the Battle Manager for a single battle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleParticipant {
    pub user_id: Uuid,
    pub ai_code_id: Uuid,
    pub position: u8,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn terminal_statuses_are_sticky() {
        assert!(BattleStatus::Completed.is_terminal());
        assert!(BattleStatus::Error.is_terminal());
        assert!(BattleStatus::Cancelled.is_terminal());
        assert!(!BattleStatus::Waiting.is_terminal());
        assert!(!BattleStatus::Playing.is_terminal());
    }

    #[test]
    fn untracked_leaderboard_is_unrated() {
        let battle = Battle::new(Uuid::new_v4(), 0, false, "standard".to_owned());
        assert!(!battle.is_rated());
        let battle = Battle::new(Uuid::new_v4(), 1, true, "standard".to_owned());
        assert!(!battle.is_rated());
        let battle = Battle::new(Uuid::new_v4(), 1, false, "standard".to_owned());
        assert_eq!(battle.is_rated(), true);
    }
}
