mod battle;
mod game_stats;
mod grid;
mod role;

pub use battle::*;
pub use game_stats::*;
pub use grid::*;
pub use role::*;
