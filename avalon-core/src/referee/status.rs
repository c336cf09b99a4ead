use anyhow::Result;
use async_trait::async_trait;
use avalon_data::BattleStatus;

/// Consulted by the referee at phase boundaries and periodically inside long loops, per
/// `spec.md` §4.4's cancellation rule.
#[async_trait]
pub trait BattleStatusChecker: Send + Sync {
    async fn status(&self, battle_id: &str) -> Result<BattleStatus>;
}

/// Whether a battle in this status should keep running. Anything else (completed, error,
/// cancelled out from under the referee) means someone else has already decided this battle is
/// over and the referee must unwind.
pub(crate) fn status_allows_continuation(status: BattleStatus) -> bool {
    matches!(status, BattleStatus::Waiting | BattleStatus::Playing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_waiting_and_playing_continue() {
        assert!(status_allows_continuation(BattleStatus::Waiting));
        assert!(status_allows_continuation(BattleStatus::Playing));
        assert!(!status_allows_continuation(BattleStatus::Cancelled));
        assert!(!status_allows_continuation(BattleStatus::Completed));
        assert!(!status_allows_continuation(BattleStatus::Error));
    }
}
