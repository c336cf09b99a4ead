use std::sync::atomic::{
    AtomicU32,
    Ordering,
};

use anyhow::Result;
use async_trait::async_trait;
use avalon_core::referee::BattleStatusChecker;
use avalon_data::BattleStatus;

/// A [`BattleStatusChecker`] that reports a fixed status forever, for scenario tests that never
/// cancel mid-game.
pub struct FixedStatusChecker(pub BattleStatus);

#[async_trait]
impl BattleStatusChecker for FixedStatusChecker {
    async fn status(&self, _battle_id: &str) -> Result<BattleStatus> {
        Ok(self.0)
    }
}

/// A [`BattleStatusChecker`] that reports `Playing` for a fixed number of calls, then flips to
/// `Cancelled` forever, so a cancellation can be scripted to land at a specific phase boundary
/// without racing a real clock.
pub struct FlipAfterNCallsStatusChecker {
    remaining: AtomicU32,
}

impl FlipAfterNCallsStatusChecker {
    pub fn new(calls_before_cancel: u32) -> Self {
        Self {
            remaining: AtomicU32::new(calls_before_cancel),
        }
    }
}

#[async_trait]
impl BattleStatusChecker for FlipAfterNCallsStatusChecker {
    async fn status(&self, _battle_id: &str) -> Result<BattleStatus> {
        let previous = self.remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
            Some(remaining.saturating_sub(1))
        });
        match previous {
            Ok(0) | Err(_) => Ok(BattleStatus::Cancelled),
            Ok(_) => Ok(BattleStatus::Playing),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn fixed_checker_always_reports_the_same_status() {
        let checker = FixedStatusChecker(BattleStatus::Waiting);
        assert_eq!(checker.status("b").await.unwrap(), BattleStatus::Waiting);
        assert_eq!(checker.status("b").await.unwrap(), BattleStatus::Waiting);
    }

    #[tokio::test]
    async fn flip_after_n_calls_cancels_once_the_budget_is_exhausted() {
        let checker = FlipAfterNCallsStatusChecker::new(2);
        assert_eq!(checker.status("b").await.unwrap(), BattleStatus::Playing);
        assert_eq!(checker.status("b").await.unwrap(), BattleStatus::Playing);
        assert_eq!(checker.status("b").await.unwrap(), BattleStatus::Cancelled);
        assert_eq!(checker.status("b").await.unwrap(), BattleStatus::Cancelled);
    }
}
