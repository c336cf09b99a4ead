use serde::{
    Deserialize,
    Serialize,
};
use uuid::Uuid;

/// The default starting ELO for a user entering a leaderboard for the first time.
pub const DEFAULT_ELO: i64 = 1200;

/// The floor below which ELO never drops, per `spec.md` §3 and §8.
pub const ELO_FLOOR: i64 = 100;

/// A user's aggregate record on one leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStats {
    pub user_id: Uuid,
    pub leaderboard_id: i64,
    pub elo: i64,
    pub games_played: u64,
    pub wins: u64,
    pub losses: u64,
    pub draws: u64,
}

impl GameStats {
    pub fn new(user_id: Uuid, leaderboard_id: i64) -> Self {
        Self {
            user_id,
            leaderboard_id,
            elo: DEFAULT_ELO,
            games_played: 0,
            wins: 0,
            losses: 0,
            draws: 0,
        }
    }

    /// Applies an ELO delta, clamping at [`ELO_FLOOR`].
    pub fn apply_elo_delta(&mut self, delta: i64) {
        self.elo = (self.elo + delta).max(ELO_FLOOR);
    }

    /// Whether the invariant `games_played = wins + losses + draws` holds.
    pub fn is_consistent(&self) -> bool {
        self.games_played == self.wins + self.losses + self.draws
    }
}
