use thiserror::Error;
use uuid::Uuid;

/// Errors raised by [`crate::RatingProcessor`], distinct from the `anyhow::Error`s its
/// `BattleStore` dependency may itself produce.
#[derive(Debug, Error)]
pub enum RatingError {
    #[error("battle {0} was not found")]
    BattleNotFound(Uuid),

    #[error("battle {0} has not reached a terminal status yet")]
    BattleNotTerminal(Uuid),

    #[error("battle {0} is missing its final result")]
    MissingResult(Uuid),

    #[error("battle {0} does not have all 7 players recorded")]
    IncompleteRoster(Uuid),

    #[error("battle {0}'s event log does not attribute its fatal error to any player")]
    UnattributedError(Uuid),
}
