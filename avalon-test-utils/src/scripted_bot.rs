use std::collections::{
    BTreeMap,
    VecDeque,
};

use anyhow::{
    anyhow,
    Result,
};
use avalon_data::{
    Grid,
    Position,
    Role,
};
use avalon_core::sandbox::AvalonBot;

/// A fully scriptable [`AvalonBot`], for driving the referee through specific scenarios without
/// a compiled plugin.
///
/// Each decision point is backed by a queue: calls consume the queue front-to-back and fall back
/// to a conservative default (approve proposals, pass missions, stay put, say nothing) once the
/// queue runs dry, so a script only needs to spell out the calls a test actually cares about.
/// Everything the referee delivers to the bot (role, sight, messages, grid) is recorded for
/// assertions.
pub struct ScriptedBot {
    index: u8,
    role: Option<Role>,
    role_sight: Option<BTreeMap<String, Vec<u8>>>,
    grid_snapshots: u32,
    positions_snapshots: Vec<BTreeMap<u8, Position>>,
    received_messages: Vec<(u8, String)>,
    mission_members: Vec<(u8, Vec<u8>)>,

    mission_proposals: VecDeque<Vec<i64>>,
    walks: VecDeque<Vec<String>>,
    speeches: VecDeque<String>,
    vote1s: VecDeque<bool>,
    vote2s: VecDeque<bool>,
    assass_guesses: VecDeque<i64>,
}

impl ScriptedBot {
    pub fn new() -> Self {
        Self {
            index: 0,
            role: None,
            role_sight: None,
            grid_snapshots: 0,
            positions_snapshots: Vec::new(),
            received_messages: Vec::new(),
            mission_members: Vec::new(),
            mission_proposals: VecDeque::new(),
            walks: VecDeque::new(),
            speeches: VecDeque::new(),
            vote1s: VecDeque::new(),
            vote2s: VecDeque::new(),
            assass_guesses: VecDeque::new(),
        }
    }

    pub fn with_mission_proposals(mut self, proposals: impl IntoIterator<Item = Vec<i64>>) -> Self {
        self.mission_proposals.extend(proposals);
        self
    }

    pub fn with_vote1s(mut self, votes: impl IntoIterator<Item = bool>) -> Self {
        self.vote1s.extend(votes);
        self
    }

    pub fn with_vote2s(mut self, votes: impl IntoIterator<Item = bool>) -> Self {
        self.vote2s.extend(votes);
        self
    }

    pub fn with_walks(mut self, walks: impl IntoIterator<Item = Vec<String>>) -> Self {
        self.walks.extend(walks);
        self
    }

    pub fn with_assass_guesses(mut self, guesses: impl IntoIterator<Item = i64>) -> Self {
        self.assass_guesses.extend(guesses);
        self
    }

    pub fn boxed(self) -> Box<dyn AvalonBot> {
        Box::new(self)
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn role_sight(&self) -> Option<&BTreeMap<String, Vec<u8>>> {
        self.role_sight.as_ref()
    }

    pub fn received_messages(&self) -> &[(u8, String)] {
        &self.received_messages
    }

    pub fn mission_members_seen(&self) -> &[(u8, Vec<u8>)] {
        &self.mission_members
    }

    pub fn grid_snapshots(&self) -> u32 {
        self.grid_snapshots
    }
}

impl Default for ScriptedBot {
    fn default() -> Self {
        Self::new()
    }
}

impl AvalonBot for ScriptedBot {
    fn set_player_index(&mut self, index: u8) {
        self.index = index;
    }

    fn set_role_type(&mut self, role: Role) {
        self.role = Some(role);
    }

    fn pass_role_sight(&mut self, sight: BTreeMap<String, Vec<u8>>) {
        self.role_sight = Some(sight);
    }

    fn pass_map(&mut self, _grid: &Grid) {
        self.grid_snapshots += 1;
    }

    fn pass_position_data(&mut self, positions: BTreeMap<u8, Position>) {
        self.positions_snapshots.push(positions);
    }

    fn pass_message(&mut self, message: (u8, String)) {
        self.received_messages.push(message);
    }

    fn pass_mission_members(&mut self, round: u8, members: Vec<u8>) {
        self.mission_members.push((round, members));
    }

    fn decide_mission_member(&mut self, team_size: u8) -> Result<Vec<i64>> {
        Ok(self
            .mission_proposals
            .pop_front()
            .unwrap_or_else(|| (1..=team_size as i64).collect()))
    }

    fn walk(&mut self) -> Result<Vec<String>> {
        Ok(self.walks.pop_front().unwrap_or_default())
    }

    fn say(&mut self) -> Result<String> {
        Ok(self.speeches.pop_front().unwrap_or_default())
    }

    fn mission_vote1(&mut self) -> Result<bool> {
        Ok(self.vote1s.pop_front().unwrap_or(true))
    }

    fn mission_vote2(&mut self) -> Result<bool> {
        Ok(self.vote2s.pop_front().unwrap_or(true))
    }

    fn assass(&mut self) -> Result<i64> {
        self.assass_guesses
            .pop_front()
            .ok_or_else(|| anyhow!("scripted bot at position {} has no assass guess queued", self.index))
    }
}

/// A bot whose every entry point returns an error, used to script a fatal bot fault (`spec.md`
/// §4.5, `critical_player_ERROR`).
pub struct FailingBot {
    message: String,
}

impl FailingBot {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn boxed(self) -> Box<dyn AvalonBot> {
        Box::new(self)
    }
}

impl AvalonBot for FailingBot {
    fn set_player_index(&mut self, _index: u8) {}

    fn set_role_type(&mut self, _role: Role) {}

    fn pass_role_sight(&mut self, _sight: BTreeMap<String, Vec<u8>>) {}

    fn pass_map(&mut self, _grid: &Grid) {}

    fn pass_position_data(&mut self, _positions: BTreeMap<u8, Position>) {}

    fn pass_message(&mut self, _message: (u8, String)) {}

    fn pass_mission_members(&mut self, _round: u8, _members: Vec<u8>) {}

    fn decide_mission_member(&mut self, _team_size: u8) -> Result<Vec<i64>> {
        Err(anyhow!("{}", self.message))
    }

    fn walk(&mut self) -> Result<Vec<String>> {
        Err(anyhow!("{}", self.message))
    }

    fn say(&mut self) -> Result<String> {
        Err(anyhow!("{}", self.message))
    }

    fn mission_vote1(&mut self) -> Result<bool> {
        Err(anyhow!("{}", self.message))
    }

    fn mission_vote2(&mut self) -> Result<bool> {
        Err(anyhow!("{}", self.message))
    }

    fn assass(&mut self) -> Result<i64> {
        Err(anyhow!("{}", self.message))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn scripted_bot_consumes_queue_then_falls_back_to_default() {
        let mut bot = ScriptedBot::new().with_vote1s([false]);
        assert_eq!(bot.mission_vote1().unwrap(), false);
        assert_eq!(bot.mission_vote1().unwrap(), true);
    }

    #[test]
    fn scripted_bot_records_what_it_is_told() {
        let mut bot = ScriptedBot::new();
        bot.set_player_index(3);
        bot.set_role_type(Role::Merlin);
        bot.pass_message((2, "hello".to_owned()));
        assert_eq!(bot.role(), Some(Role::Merlin));
        assert_eq!(bot.received_messages(), &[(2, "hello".to_owned())]);
    }

    #[test]
    fn failing_bot_errors_on_every_entry_point() {
        let mut bot = FailingBot::new("boom");
        assert!(bot.walk().is_err());
        assert!(bot.mission_vote1().is_err());
        assert!(bot.assass().is_err());
    }
}
