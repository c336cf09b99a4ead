use std::{
    collections::BTreeMap,
    time::Duration,
};

use anyhow::{
    anyhow,
    Result,
};
use avalon_choice::{
    AssassinationChoice,
    MissionTeamChoice,
    SpeechChoice,
    WalkChoice,
};
use avalon_data::{
    EventType,
    GameResult,
    Grid,
    Position,
    Role,
    Team,
    WinReason,
    Winner,
};
use avalon_prng::{
    rand_util,
    PseudoRandomNumberGenerator,
    RealPseudoRandomNumberGenerator,
};
use serde_json::json;
use thiserror::Error;

use crate::{
    llm::{
        CallContext,
        LlmGateway,
    },
    observer::Observer,
    referee::status::{
        status_allows_continuation,
        BattleStatusChecker,
    },
    sandbox::{
        AvalonBot,
        BotHost,
    },
};

/// Mission team size for each of the 5 rounds, 1-indexed by round number.
pub const MISSION_TEAM_SIZES: [u8; 5] = [2, 3, 3, 4, 4];

/// Mission wins needed by either side to end the game.
pub const WINS_NEEDED: u8 = 3;

/// Team-proposal ballots allowed per round before the last proposal is force-executed.
pub const MAX_PROPOSALS_PER_ROUND: u8 = 5;

/// Mission rounds (3 and 4, 1-indexed) that require 2 fails rather than 1 to fail the mission.
pub const DOUBLE_FAIL_ROUNDS: [u8; 2] = [3, 4];

/// Wall-clock deadline for every bot entry point, per `spec.md` §4.2.
pub const BOT_CALL_DEADLINE: Duration = Duration::from_secs(100);

/// How often (every Nth player in a round-robin) the referee re-checks the battle status.
const STATUS_CHECK_STRIDE: usize = 3;

/// Number of grid cells; players are placed on 7 of these 81 distinct cells.
const GRID_CELLS: usize = 81;

/// Raised internally when the battle status checker reports the battle has left
/// `{waiting, playing}`. Caught at the top of [`Referee::run_game`] and converted into a
/// `terminated_due_to_status_change` result rather than propagated as a fatal error.
#[derive(Debug, Error)]
#[error("battle status left {{waiting, playing}} mid-game")]
struct Terminated;

fn rotate(position: u8) -> u8 {
    position % 7 + 1
}

fn rotation_from(start: u8) -> [u8; 7] {
    std::array::from_fn(|i| {
        let mut p = start;
        for _ in 0..i {
            p = rotate(p);
        }
        p
    })
}

fn role_key(role: Role) -> &'static str {
    match role {
        Role::Merlin => "merlin",
        Role::Percival => "percival",
        Role::Knight => "knight",
        Role::Morgana => "morgana",
        Role::Assassin => "assassin",
        Role::Oberon => "oberon",
    }
}

/// Computes each player's night-phase role sight, per `spec.md` §4.4 step 2.
fn night_sight(roles: &BTreeMap<u8, Role>) -> BTreeMap<u8, BTreeMap<String, Vec<u8>>> {
    let position_of = |role: Role| -> Vec<u8> {
        roles
            .iter()
            .filter(|(_, r)| **r == role)
            .map(|(p, _)| *p)
            .collect()
    };
    let merlin = position_of(Role::Merlin).first().copied();
    let morgana = position_of(Role::Morgana).first().copied();
    let assassin = position_of(Role::Assassin).first().copied();
    let oberon = position_of(Role::Oberon).first().copied();

    let mut sight = BTreeMap::new();
    for (&position, &role) in roles {
        let mut mapping = BTreeMap::new();
        match role {
            Role::Merlin => {
                if let Some(p) = morgana {
                    mapping.insert(role_key(Role::Morgana).to_owned(), vec![p]);
                }
                if let Some(p) = assassin {
                    mapping.insert(role_key(Role::Assassin).to_owned(), vec![p]);
                }
                if let Some(p) = oberon {
                    mapping.insert(role_key(Role::Oberon).to_owned(), vec![p]);
                }
            }
            Role::Percival => {
                let mut candidates: Vec<u8> = [merlin, morgana].into_iter().flatten().collect();
                candidates.sort_unstable();
                mapping.insert("candidates".to_owned(), candidates);
            }
            Role::Morgana => {
                if let Some(p) = assassin {
                    mapping.insert("ally".to_owned(), vec![p]);
                }
            }
            Role::Assassin => {
                if let Some(p) = morgana {
                    mapping.insert("ally".to_owned(), vec![p]);
                }
            }
            Role::Knight | Role::Oberon => {}
        }
        sight.insert(position, mapping);
    }
    sight
}

/// The single-game state machine, per `spec.md` §4.4.
///
/// Owns the loaded bots and drives them through init, night, up to 5 mission rounds, and
/// endgame, consulting the battle status checker for cancellation and reporting every event to
/// the [`Observer`]. One `Referee` plays exactly one battle to completion (or to cancellation)
/// and is then discarded.
pub struct Referee<'a> {
    battle_id: String,
    bots: BotHost,
    observer: &'a Observer,
    llm: &'a LlmGateway,
    status_checker: &'a dyn BattleStatusChecker,
    prng: Box<dyn PseudoRandomNumberGenerator>,

    roles: BTreeMap<u8, Role>,
    positions: BTreeMap<u8, Position>,
    grid: Grid,
    blue_wins: u8,
    red_wins: u8,
    rounds_played: u8,
}

impl<'a> Referee<'a> {
    pub fn new(
        battle_id: String,
        bots: BotHost,
        observer: &'a Observer,
        llm: &'a LlmGateway,
        status_checker: &'a dyn BattleStatusChecker,
        seed: Option<u64>,
    ) -> Self {
        Self {
            battle_id,
            bots,
            observer,
            llm,
            status_checker,
            prng: Box::new(RealPseudoRandomNumberGenerator::new(seed)),
            roles: BTreeMap::new(),
            positions: BTreeMap::new(),
            grid: Grid::empty(),
            blue_wins: 0,
            red_wins: 0,
            rounds_played: 0,
        }
    }

    /// Plays the battle to completion. Returns `Ok` with a `null`-winner result if the battle
    /// was cancelled out from under the referee; returns `Err` for a fatal bot fault, having
    /// already recorded the attributing event. The caller (Battle Manager) is expected to
    /// classify an `Err` battle as `error` and hand the log to the Rating Processor.
    pub async fn run_game(mut self) -> Result<GameResult> {
        match self.play().await {
            Ok(result) => Ok(result),
            Err(err) if err.downcast_ref::<Terminated>().is_some() => Ok(self.terminated_result()),
            Err(err) => Err(err),
        }
    }

    fn terminated_result(&self) -> GameResult {
        GameResult {
            winner: None,
            win_reason: WinReason::TerminatedDueToStatusChange,
            blue_wins: self.blue_wins,
            red_wins: self.red_wins,
            rounds_played: self.rounds_played,
            roles: self.roles.clone(),
            log_path: self.observer.battle_id().to_owned(),
            traceback: None,
        }
    }

    async fn check_status(&self) -> Result<()> {
        let status = self.status_checker.status(&self.battle_id).await?;
        if !status_allows_continuation(status) {
            return Err(Terminated.into());
        }
        Ok(())
    }

    /// Records a fatal-error event and turns it into the `Err` that unwinds `run_game`.
    fn fatal(&self, event_type: EventType, position: u8, method: &str, message: impl Into<String>) -> anyhow::Error {
        let message = message.into();
        let _ = self.observer.record(
            event_type,
            json!({
                "error_code_pid": position,
                "method": method,
                "message": message,
            }),
        );
        anyhow!("player {position} failed in {method}: {message}")
    }

    /// Runs one bot entry point under the call deadline, attributing a timeout or panic as
    /// `critical_player_ERROR`. The bot's own `Result` (an exception-equivalent raised during
    /// the call) is returned to the caller, which attributes it as `player_return_ERROR`.
    async fn invoke<F, T>(&mut self, position: u8, round: u8, method: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn AvalonBot) -> T + Send + 'static,
        T: Send + 'static,
    {
        let context = CallContext {
            battle_id: self.battle_id.clone(),
            player_position: position,
            round,
        };
        self.bots
            .call_blocking(position, BOT_CALL_DEADLINE, move |bot| {
                let _guard = CallContext::enter(context);
                f(bot)
            })
            .await
            .map_err(|err| self.fatal(EventType::CriticalPlayerError, position, method, err.to_string()))
    }

    fn attribute_return_error(&self, position: u8, method: &'static str, message: impl Into<String>) -> anyhow::Error {
        self.fatal(EventType::PlayerReturnError, position, method, message)
    }

    async fn play(&mut self) -> Result<GameResult> {
        self.init().await?;
        self.night().await?;

        let mut round_start_leader = {
            let index = rand_util::range(self.prng.as_mut(), 0, 7) as u8;
            index + 1
        };

        let mut round: u8 = 1;
        while self.blue_wins < WINS_NEEDED && self.red_wins < WINS_NEEDED && round <= 5 {
            self.check_status().await?;
            self.observer.record(EventType::RoundStart, json!({ "round": round }))?;

            let team_size = MISSION_TEAM_SIZES[round as usize - 1] as usize;
            let approved_team = self.propose_and_vote(round, round_start_leader, team_size).await?;

            self.rounds_played = round;
            self.execute_mission(round, &approved_team).await?;

            self.observer.record(EventType::RoundEnd, json!({ "round": round }))?;
            round_start_leader = rotate(round_start_leader);
            round += 1;
        }

        if self.red_wins >= WINS_NEEDED {
            return self.finish(Some(Winner::Red), WinReason::MissionsFailed).await;
        }

        self.assassination().await
    }

    async fn init(&mut self) -> Result<()> {
        let mut role_table = Role::table();
        rand_util::shuffle(self.prng.as_mut(), &mut role_table);
        self.roles = (1u8..=7).zip(role_table).collect();

        let cell_indices = rand_util::sample_distinct_indices(self.prng.as_mut(), GRID_CELLS, 7);
        for (position, cell) in (1u8..=7).zip(cell_indices) {
            let pos = Position::new((cell % 9) as i8, (cell / 9) as i8);
            self.grid.place(position, pos);
            self.positions.insert(position, pos);
        }

        self.observer.record(EventType::GameStart, json!({ "battle_id": self.battle_id }))?;
        self.observer.record(
            EventType::RoleAssign,
            json!(self.roles.iter().map(|(p, r)| (p.to_string(), role_key(*r))).collect::<BTreeMap<_, _>>()),
        )?;
        self.observer.record(
            EventType::DefaultPositions,
            json!(self.positions.iter().map(|(p, pos)| (p.to_string(), (pos.x, pos.y))).collect::<BTreeMap<_, _>>()),
        )?;

        for position in 1u8..=7 {
            let role = self.roles[&position];
            self.invoke(position, 0, "set_player_index", move |bot| bot.set_player_index(position))
                .await?;
            self.invoke(position, 0, "set_role_type", move |bot| bot.set_role_type(role))
                .await?;
            self.broadcast_map_and_positions(position, 0).await?;
        }
        Ok(())
    }

    async fn night(&mut self) -> Result<()> {
        self.observer.record(EventType::NightStart, json!({}))?;
        let sight = night_sight(&self.roles);
        for position in 1u8..=7 {
            let player_sight = sight.get(&position).cloned().unwrap_or_default();
            self.invoke(position, 0, "pass_role_sight", move |bot| bot.pass_role_sight(player_sight))
                .await?;
        }
        self.observer.record(EventType::NightEnd, json!({}))?;
        Ok(())
    }

    async fn broadcast_map_and_positions(&mut self, position: u8, round: u8) -> Result<()> {
        let grid = self.grid.clone();
        self.invoke(position, round, "pass_map", move |bot| bot.pass_map(&grid)).await?;
        let positions = self.positions.clone();
        self.invoke(position, round, "pass_position_data", move |bot| bot.pass_position_data(positions))
            .await?;
        Ok(())
    }

    /// Runs the propose -> global speech -> movement -> limited speech -> public vote cycle
    /// until a team is approved or force-executed, per `spec.md` §4.4 step 3.
    async fn propose_and_vote(&mut self, round: u8, round_start_leader: u8, team_size: usize) -> Result<Vec<u8>> {
        let mut proposer = round_start_leader;
        for proposal in 1u8..=MAX_PROPOSALS_PER_ROUND {
            self.check_status().await?;
            self.observer.record(EventType::Leader, json!({ "round": round, "leader": proposer }))?;

            let raw = self
                .invoke(proposer, round, "decide_mission_member", move |bot| {
                    bot.decide_mission_member(team_size as u8)
                })
                .await?
                .map_err(|err| self.attribute_return_error(proposer, "decide_mission_member", err.to_string()))?;
            let team = MissionTeamChoice::validate(&raw, team_size)
                .map_err(|err| self.attribute_return_error(proposer, "decide_mission_member", err.to_string()))?;

            for position in 1u8..=7 {
                let members = team.0.clone();
                self.invoke(position, round, "pass_mission_members", move |bot| {
                    bot.pass_mission_members(round, members)
                })
                .await?;
            }
            self.observer.record(
                EventType::TeamPropose,
                json!({ "round": round, "proposal": proposal, "leader": proposer, "members": team.0 }),
            )?;

            self.global_speech(round, proposer).await?;
            self.movement(round).await?;
            self.limited_speech(round).await?;

            let approved = self.public_vote(round).await?;
            if approved {
                self.observer.record(
                    EventType::MissionApproved,
                    json!({ "round": round, "members": team.0 }),
                )?;
                return Ok(team.0);
            }
            if proposal == MAX_PROPOSALS_PER_ROUND {
                self.observer.record(
                    EventType::MissionForceExecute,
                    json!({ "round": round, "members": team.0 }),
                )?;
                return Ok(team.0);
            }

            let next_leader = rotate(proposer);
            self.observer.record(
                EventType::MissionRejected,
                json!({ "round": round, "proposal": team.0, "next_leader": next_leader }),
            )?;
            for position in 1u8..=7 {
                self.llm.reset_round(&self.battle_id, position, round);
            }
            proposer = next_leader;
        }
        unreachable!("loop always returns by the 5th proposal")
    }

    async fn global_speech(&mut self, round: u8, leader: u8) -> Result<()> {
        for (i, &speaker) in rotation_from(leader).iter().enumerate() {
            if i % STATUS_CHECK_STRIDE == 0 {
                self.check_status().await?;
            }
            let raw = self
                .invoke(speaker, round, "say", |bot| bot.say())
                .await?
                .map_err(|err| self.attribute_return_error(speaker, "say", err.to_string()))?;
            let speech = SpeechChoice::validate(raw)
                .map_err(|err| self.attribute_return_error(speaker, "say", err.to_string()))?;

            for listener in 1u8..=7 {
                let message = (speaker, speech.0.clone());
                self.invoke(listener, round, "pass_message", move |bot| bot.pass_message(message))
                    .await?;
            }
            self.observer.record(
                EventType::PublicSpeech,
                json!({ "round": round, "speaker": speaker, "text": speech.0 }),
            )?;
        }
        Ok(())
    }

    async fn movement(&mut self, round: u8) -> Result<()> {
        for (i, position) in (1u8..=7).enumerate() {
            if i % STATUS_CHECK_STRIDE == 0 {
                self.check_status().await?;
            }
            let raw = self
                .invoke(position, round, "walk", |bot| bot.walk())
                .await?
                .map_err(|err| self.attribute_return_error(position, "walk", err.to_string()))?;
            let steps = WalkChoice::validate(&raw)
                .map_err(|err| self.attribute_return_error(position, "walk", err.to_string()))?;

            for direction in steps.0 {
                let (dx, dy) = direction.delta();
                let current = self.positions[&position];
                let next = current.stepped(dx, dy);
                if !next.in_bounds() || !self.grid.is_free(next) {
                    return Err(self.attribute_return_error(
                        position,
                        "walk",
                        format!("step to ({}, {}) is out of bounds or occupied", next.x, next.y),
                    ));
                }
                self.grid.move_player(position, current, next);
                self.positions.insert(position, next);
                self.observer.record(
                    EventType::Move,
                    json!({ "round": round, "player": position, "x": next.x, "y": next.y }),
                )?;
            }
            self.broadcast_all_maps(round).await?;
        }
        Ok(())
    }

    async fn broadcast_all_maps(&mut self, round: u8) -> Result<()> {
        self.observer.record(
            EventType::Positions,
            json!(self.positions.iter().map(|(p, pos)| (p.to_string(), (pos.x, pos.y))).collect::<BTreeMap<_, _>>()),
        )?;
        for position in 1u8..=7 {
            self.broadcast_map_and_positions(position, round).await?;
        }
        Ok(())
    }

    async fn limited_speech(&mut self, round: u8) -> Result<()> {
        for (i, speaker) in (1u8..=7).enumerate() {
            if i % STATUS_CHECK_STRIDE == 0 {
                self.check_status().await?;
            }
            let raw = self
                .invoke(speaker, round, "say", |bot| bot.say())
                .await?
                .map_err(|err| self.attribute_return_error(speaker, "say", err.to_string()))?;
            let speech = SpeechChoice::validate(raw)
                .map_err(|err| self.attribute_return_error(speaker, "say", err.to_string()))?;

            let radius = self.roles[&speaker].hearing_radius();
            let speaker_pos = self.positions[&speaker];
            let listeners: Vec<u8> = (1u8..=7)
                .filter(|listener| {
                    *listener != speaker && self.positions[listener].chebyshev_distance(&speaker_pos) <= radius
                })
                .collect();
            for &listener in &listeners {
                let message = (speaker, speech.0.clone());
                self.invoke(listener, round, "pass_message", move |bot| bot.pass_message(message))
                    .await?;
            }
            self.observer.record(
                EventType::PrivateSpeech,
                json!({ "round": round, "speaker": speaker, "text": speech.0, "listeners": listeners }),
            )?;
        }
        Ok(())
    }

    async fn public_vote(&mut self, round: u8) -> Result<bool> {
        let mut approve_count = 0u8;
        for position in 1u8..=7 {
            let raw = self
                .invoke(position, round, "mission_vote1", |bot| bot.mission_vote1())
                .await?
                .map_err(|err| self.attribute_return_error(position, "mission_vote1", err.to_string()))?;
            if raw {
                approve_count += 1;
            }
            self.observer.record(EventType::PublicVote, json!({ "round": round, "player": position, "approve": raw }))?;
        }
        let approved = (approve_count as u16) * 2 > 7;
        self.observer.record(
            EventType::PublicVoteResult,
            json!({ "round": round, "approve_count": approve_count, "approved": approved }),
        )?;
        Ok(approved)
    }

    async fn execute_mission(&mut self, round: u8, team: &[u8]) -> Result<()> {
        let mut fails = 0u8;
        for &position in team {
            let role = self.roles[&position];
            let raw = self
                .invoke(position, round, "mission_vote2", |bot| bot.mission_vote2())
                .await?
                .map_err(|err| self.attribute_return_error(position, "mission_vote2", err.to_string()))?;
            if !raw && role.team() == Team::Blue {
                return Err(self.fatal(
                    EventType::CriticalPlayerError,
                    position,
                    "mission_vote2",
                    "a blue player voted to fail the mission",
                ));
            }
            if !raw {
                fails += 1;
            }
            self.observer.record(EventType::MissionVote, json!({ "round": round, "player": position, "fail": !raw }))?;
        }

        let threshold = if DOUBLE_FAIL_ROUNDS.contains(&round) { 2 } else { 1 };
        let failed = fails >= threshold;
        if failed {
            self.red_wins += 1;
        } else {
            self.blue_wins += 1;
        }
        self.observer.record(
            EventType::MissionResult,
            json!({ "round": round, "fails": fails, "failed": failed, "blue_wins": self.blue_wins, "red_wins": self.red_wins }),
        )?;
        self.observer.record(
            EventType::ScoreBoard,
            json!({ "blue_wins": self.blue_wins, "red_wins": self.red_wins }),
        )?;
        Ok(())
    }

    async fn assassination(&mut self) -> Result<GameResult> {
        let assassin = *self
            .roles
            .iter()
            .find(|(_, role)| **role == Role::Assassin)
            .map(|(position, _)| position)
            .ok_or_else(|| anyhow!("no assassin in role table"))?;

        let round = self.rounds_played;
        let raw = self
            .invoke(assassin, round, "assass", |bot| bot.assass())
            .await?
            .map_err(|err| self.attribute_return_error(assassin, "assass", err.to_string()))?;
        if raw == assassin as i64 {
            return Err(self.attribute_return_error(assassin, "assass", "assassin targeted themselves"));
        }
        let target = AssassinationChoice::validate(raw)
            .map_err(|err| self.attribute_return_error(assassin, "assass", err.to_string()))?;

        self.observer.record(EventType::Assass, json!({ "assassin": assassin, "target": target.0 }))?;

        let merlin_found = self.roles.get(&target.0).copied() == Some(Role::Merlin);
        if merlin_found {
            self.finish(Some(Winner::Red), WinReason::AssassinationSuccess).await
        } else {
            self.finish(Some(Winner::Blue), WinReason::FailedAssassination).await
        }
    }

    async fn finish(&mut self, winner: Option<Winner>, win_reason: WinReason) -> Result<GameResult> {
        let result = GameResult {
            winner,
            win_reason,
            blue_wins: self.blue_wins,
            red_wins: self.red_wins,
            rounds_played: self.rounds_played,
            roles: self.roles.clone(),
            log_path: self.observer.battle_id().to_owned(),
            traceback: None,
        };
        self.observer.record(EventType::FinalScore, json!({ "blue_wins": result.blue_wins, "red_wins": result.red_wins }))?;
        self.observer.record(EventType::GameResult, serde_json::to_value(&result)?)?;
        self.observer.record(EventType::GameEnd, json!({}))?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_wraps_around_seven_players() {
        assert_eq!(rotate(7), 1);
        assert_eq!(rotate(3), 4);
    }

    #[test]
    fn rotation_from_produces_a_full_cycle_starting_at_leader() {
        let cycle = rotation_from(5);
        assert_eq!(cycle, [5, 6, 7, 1, 2, 3, 4]);
    }

    #[test]
    fn merlin_sees_every_red_player_and_percival_sees_an_unordered_pair() {
        let roles: BTreeMap<u8, Role> = [
            (1, Role::Merlin),
            (2, Role::Percival),
            (3, Role::Knight),
            (4, Role::Knight),
            (5, Role::Morgana),
            (6, Role::Assassin),
            (7, Role::Oberon),
        ]
        .into_iter()
        .collect();
        let sight = night_sight(&roles);
        let merlin_sight = &sight[&1];
        assert_eq!(merlin_sight["morgana"], vec![5]);
        assert_eq!(merlin_sight["assassin"], vec![6]);
        assert_eq!(merlin_sight["oberon"], vec![7]);

        let percival_sight = &sight[&2];
        let mut candidates = percival_sight["candidates"].clone();
        candidates.sort_unstable();
        assert_eq!(candidates, vec![1, 5]);

        assert!(sight[&7].is_empty());
        assert_eq!(sight[&5]["ally"], vec![6]);
        assert_eq!(sight[&6]["ally"], vec![5]);
    }
}
