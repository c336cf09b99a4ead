use std::collections::BTreeMap;

use anyhow::Result;
use avalon_data::{
    Grid,
    Position,
    Role,
};

/// The seven synchronous entry points a bot implements, per `spec.md` §4.2.
///
/// Implementations run entirely inside one battle's sandbox: no filesystem, network, process,
/// or reflection access beyond what the restricted execution environment allows (pure
/// computation, plus the one controlled import of the LLM helper, §4.3). The referee is the
/// only caller, and calls every method under a wall-clock deadline via `spawn_blocking` — an
/// `AvalonBot` implementation must not itself spawn threads or block on external I/O other than
/// through the helper it is given.
///
/// A return value that violates the rules (wrong length, duplicate, out of range) is the
/// referee's concern, not this trait's: entry points return the bot's raw claim, and
/// `avalon-choice` validates it before the referee acts on it.
pub trait AvalonBot: Send {
    fn set_player_index(&mut self, index: u8);

    fn set_role_type(&mut self, role: Role);

    /// Delivers this bot's night-phase visibility, per `spec.md` §4.4 step 2. The mapping is
    /// role-dependent: Merlin gets `{role: player}` for every red player; Percival gets the
    /// unordered `{Merlin, Morgana}` pair; Morgana and Assassin see each other; Oberon sees
    /// nothing.
    fn pass_role_sight(&mut self, sight: BTreeMap<String, Vec<u8>>);

    fn pass_map(&mut self, grid: &Grid);

    fn pass_position_data(&mut self, positions: BTreeMap<u8, Position>);

    /// Delivers one broadcast or limited-speech message: `(sender_position, text)`.
    fn pass_message(&mut self, message: (u8, String));

    fn pass_mission_members(&mut self, round: u8, members: Vec<u8>);

    /// Proposes a mission team of the given size. Returns raw player-position claims for
    /// `avalon-choice::MissionTeamChoice` to validate.
    fn decide_mission_member(&mut self, team_size: u8) -> Result<Vec<i64>>;

    /// Returns up to 3 raw direction strings for `avalon-choice::WalkChoice` to validate.
    fn walk(&mut self) -> Result<Vec<String>>;

    fn say(&mut self) -> Result<String>;

    /// The public team-approval ballot.
    fn mission_vote1(&mut self) -> Result<bool>;

    /// The secret mission execution ballot, only invoked for mission team members.
    fn mission_vote2(&mut self) -> Result<bool>;

    /// The assassin's guess at Merlin's identity. Only ever invoked on the Assassin.
    fn assass(&mut self) -> Result<i64>;
}
