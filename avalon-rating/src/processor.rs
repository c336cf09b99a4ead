use std::{
    collections::BTreeMap,
    sync::Arc,
};

use anyhow::Result;
use avalon_data::{
    BattlePlayer,
    BattlePlayerFieldUpdate,
    BattleStatus,
    BattleStore,
    EventRecord,
    EventType,
    GameStatsFieldUpdate,
    PlayerOutcome,
    Role,
    Team,
    Winner,
};
use uuid::Uuid;

use crate::{
    elo::{
        arithmetic_mean,
        expected_score,
        harmonic_mean,
        token_multiplier,
        weighted_tokens,
        K_FACTOR,
    },
    error::RatingError,
};

/// Base penalty applied to the offender of a fatal bot error, before multipliers and surcharges.
const BASE_ERROR_PENALTY: f64 = 30.0;

/// Weight applied to the absolute arithmetic-mean ELO gap between the two teams in the error
/// path's penalty.
const TEAM_DIFF_PENALTY_COEFFICIENT: f64 = 0.1;

/// The final error-path reduction is clamped to this range before being applied.
const ERROR_REDUCTION_RANGE: std::ops::RangeInclusive<f64> = 20.0..=100.0;

fn error_class_multiplier(event_type: EventType) -> f64 {
    match event_type {
        EventType::CriticalPlayerError => 1.5,
        EventType::PlayerReturnError => 1.2,
        _ => 1.0,
    }
}

fn method_surcharge(method: Option<&str>) -> f64 {
    match method {
        Some("walk") => 10.0,
        Some("decide_mission_member") => 15.0,
        Some("mission_vote2") => 20.0,
        _ => 0.0,
    }
}

/// Sums each player's `tokens` events into `(prompt_tokens, completion_tokens)`, per `spec.md`
/// §4.5's "a `tokens` event near the end carries per-player input/output counts" — in practice
/// several such events accumulate across rounds, so this sums all of them rather than reading
/// only the last.
fn token_totals(event_log: &[EventRecord]) -> BTreeMap<u8, (u64, u64)> {
    let mut totals: BTreeMap<u8, (u64, u64)> = BTreeMap::new();
    for record in event_log {
        if record.event_type != EventType::Tokens {
            continue;
        }
        let Some(player) = record.event_data.get("player").and_then(|v| v.as_u64()) else {
            continue;
        };
        let prompt = record
            .event_data
            .get("prompt_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let completion = record
            .event_data
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let entry = totals.entry(player as u8).or_insert((0, 0));
        entry.0 += prompt;
        entry.1 += completion;
    }
    totals
}

fn team_from_role_key(key: &str) -> Option<Team> {
    match key {
        "merlin" | "percival" | "knight" => Some(Team::Blue),
        "morgana" | "assassin" | "oberon" => Some(Team::Red),
        _ => None,
    }
}

/// Reconstructs each position's team from the `RoleAssign` event, for battles that ended in a
/// fatal error before a [`avalon_data::GameResult`] (which carries `roles` directly) existed.
fn team_by_position_from_event_log(event_log: &[EventRecord]) -> Option<BTreeMap<u8, Team>> {
    let record = event_log.iter().find(|r| r.event_type == EventType::RoleAssign)?;
    let object = record.event_data.as_object()?;
    let mut teams = BTreeMap::new();
    for (position_str, role_key_value) in object {
        let position: u8 = position_str.parse().ok()?;
        let team = team_from_role_key(role_key_value.as_str()?)?;
        teams.insert(position, team);
    }
    Some(teams)
}

fn outcome_for_team(team: Team, winner: Team) -> PlayerOutcome {
    if team == winner {
        PlayerOutcome::Win
    } else {
        PlayerOutcome::Loss
    }
}

/// Computes ELO and outcome updates for a finished battle and writes them through a
/// [`BattleStore`], per `spec.md` §4.5.
///
/// Owns no state of its own; every invocation re-reads the battle, its roster, and its event log
/// from the store (and the caller, for the log) so that re-processing an already-rated battle is
/// always safe to attempt, which the idempotency check below relies on.
pub struct RatingProcessor {
    store: Arc<dyn BattleStore>,
}

impl RatingProcessor {
    pub fn new(store: Arc<dyn BattleStore>) -> Self {
        Self { store }
    }

    /// Processes one battle's outcome. `event_log` is the battle's archived event records,
    /// newest-last, as produced by its Observer.
    ///
    /// A no-op if every `BattlePlayer` already has an `outcome` recorded, per `spec.md` §4.5's
    /// idempotency rule and §8's "processing a completed battle twice" invariant.
    pub async fn process(&self, battle_id: Uuid, event_log: &[EventRecord]) -> Result<()> {
        let battle = self
            .store
            .get_battle(battle_id)
            .await?
            .ok_or(RatingError::BattleNotFound(battle_id))?;
        if !battle.status.is_terminal() {
            return Err(RatingError::BattleNotTerminal(battle_id).into());
        }

        let mut players = self.store.get_battle_players(battle_id).await?;
        if players.len() != 7 {
            return Err(RatingError::IncompleteRoster(battle_id).into());
        }
        if players.iter().any(|p| p.outcome.is_some()) {
            return Ok(());
        }
        players.sort_by_key(|p| p.position);

        match battle.status {
            BattleStatus::Cancelled => self.process_cancellation(&players).await,
            BattleStatus::Error => {
                self.process_error(battle_id, battle.leaderboard_id, &players, event_log)
                    .await
            }
            BattleStatus::Completed => {
                let exempt =
                    battle.elo_exempt || battle.leaderboard_id == avalon_data::Battle::UNTRACKED_LEADERBOARD_ID;
                let result = battle.result.ok_or(RatingError::MissingResult(battle_id))?;
                let winner = result.winner.ok_or(RatingError::MissingResult(battle_id))?;
                if exempt {
                    self.process_exempt(&players, &result.roles, winner).await
                } else {
                    self.process_normal(
                        battle_id,
                        battle.leaderboard_id,
                        &players,
                        &result.roles,
                        winner,
                        event_log,
                    )
                    .await
                }
            }
            BattleStatus::Waiting | BattleStatus::Playing => {
                unreachable!("non-terminal statuses were rejected above")
            }
        }
    }

    async fn process_cancellation(&self, players: &[BattlePlayer]) -> Result<()> {
        for player in players {
            self.store
                .update_battle_player(
                    player.id,
                    BattlePlayerFieldUpdate {
                        outcome: Some(PlayerOutcome::Cancelled),
                        elo_change: Some(0),
                        ..Default::default()
                    },
                )
                .await?;
        }
        Ok(())
    }

    async fn process_exempt(
        &self,
        players: &[BattlePlayer],
        roles: &BTreeMap<u8, Role>,
        winner: Winner,
    ) -> Result<()> {
        let winner_team = team_of(winner);
        for player in players {
            let role = roles[&player.position];
            self.store
                .update_battle_player(
                    player.id,
                    BattlePlayerFieldUpdate {
                        outcome: Some(outcome_for_team(role.team(), winner_team)),
                        elo_change: Some(0),
                        ..Default::default()
                    },
                )
                .await?;
        }
        Ok(())
    }

    async fn process_normal(
        &self,
        battle_id: Uuid,
        leaderboard_id: i64,
        players: &[BattlePlayer],
        roles: &BTreeMap<u8, Role>,
        winner: Winner,
        event_log: &[EventRecord],
    ) -> Result<()> {
        let winner_team = team_of(winner);

        let mut elos = BTreeMap::new();
        for player in players {
            let stats = self.gamestats_for(player.user_id, leaderboard_id).await?;
            elos.insert(player.position, stats.elo);
        }

        let blue_elos: Vec<i64> = players
            .iter()
            .filter(|p| roles[&p.position].team() == Team::Blue)
            .map(|p| elos[&p.position])
            .collect();
        let red_elos: Vec<i64> = players
            .iter()
            .filter(|p| roles[&p.position].team() == Team::Red)
            .map(|p| elos[&p.position])
            .collect();

        let expected_blue = expected_score(harmonic_mean(&blue_elos), harmonic_mean(&red_elos));
        let expected_red = 1.0 - expected_blue;

        let tokens = token_totals(event_log);
        let weighted: BTreeMap<u8, f64> = players
            .iter()
            .map(|p| {
                let (prompt, completion) = tokens.get(&p.position).copied().unwrap_or((0, 0));
                (p.position, weighted_tokens(prompt, completion))
            })
            .collect();
        let table_mean_weighted = weighted.values().sum::<f64>() / weighted.len() as f64;

        for player in players {
            let role = roles[&player.position];
            let team = role.team();
            let actual = if team == winner_team { 1.0 } else { 0.0 };
            let expected = if team == Team::Blue { expected_blue } else { expected_red };
            let multiplier = token_multiplier(weighted[&player.position], table_mean_weighted);
            let delta = K_FACTOR * (actual - (expected * multiplier).min(1.0));
            let elo_change = delta.round() as i64;
            let outcome = outcome_for_team(team, winner_team);

            let mut stats = self.gamestats_for(player.user_id, leaderboard_id).await?;
            let initial_elo = stats.elo;
            stats.games_played += 1;
            match outcome {
                PlayerOutcome::Win => stats.wins += 1,
                PlayerOutcome::Loss => stats.losses += 1,
                PlayerOutcome::Draw | PlayerOutcome::Cancelled => stats.draws += 1,
            }
            stats.apply_elo_delta(elo_change);
            self.store
                .update_gamestats(
                    player.user_id,
                    leaderboard_id,
                    GameStatsFieldUpdate {
                        elo: Some(stats.elo),
                        games_played: Some(stats.games_played),
                        wins: Some(stats.wins),
                        losses: Some(stats.losses),
                        draws: Some(stats.draws),
                    },
                )
                .await?;

            self.store
                .update_battle_player(
                    player.id,
                    BattlePlayerFieldUpdate {
                        initial_elo: Some(initial_elo),
                        elo_change: Some(elo_change),
                        outcome: Some(outcome),
                    },
                )
                .await?;
        }

        let _ = battle_id;
        Ok(())
    }

    async fn process_error(
        &self,
        battle_id: Uuid,
        leaderboard_id: i64,
        players: &[BattlePlayer],
        event_log: &[EventRecord],
    ) -> Result<()> {
        let offending_record = event_log
            .iter()
            .rev()
            .find(|record| record.error_attributed_player().is_some())
            .ok_or(RatingError::UnattributedError(battle_id))?;
        let offender_position = offending_record.error_attributed_player().unwrap();
        let method = offending_record.error_attributed_method();

        let teams = team_by_position_from_event_log(event_log).unwrap_or_default();
        let mut elo_by_position = BTreeMap::new();
        for player in players {
            let elo = self.gamestats_for(player.user_id, leaderboard_id).await?.elo;
            elo_by_position.insert(player.position, elo);
        }
        let blue_elos: Vec<i64> = teams
            .iter()
            .filter(|(_, team)| **team == Team::Blue)
            .filter_map(|(position, _)| elo_by_position.get(position).copied())
            .collect();
        let red_elos: Vec<i64> = teams
            .iter()
            .filter(|(_, team)| **team == Team::Red)
            .filter_map(|(position, _)| elo_by_position.get(position).copied())
            .collect();
        let team_diff = if blue_elos.is_empty() || red_elos.is_empty() {
            0.0
        } else {
            (arithmetic_mean(&blue_elos) - arithmetic_mean(&red_elos)).abs()
        };

        let base = BASE_ERROR_PENALTY + TEAM_DIFF_PENALTY_COEFFICIENT * team_diff;
        let multiplier = error_class_multiplier(offending_record.event_type);
        let surcharge = method_surcharge(method.as_deref());
        let reduction = (base * multiplier + surcharge).clamp(
            *ERROR_REDUCTION_RANGE.start(),
            *ERROR_REDUCTION_RANGE.end(),
        );

        for player in players {
            let is_offender = player.position == offender_position;
            let elo_change = if is_offender { -(reduction.round() as i64) } else { 0 };
            let outcome = if is_offender {
                PlayerOutcome::Loss
            } else {
                PlayerOutcome::Draw
            };

            let mut stats = self.gamestats_for(player.user_id, leaderboard_id).await?;
            let initial_elo = stats.elo;
            stats.games_played += 1;
            match outcome {
                PlayerOutcome::Win => stats.wins += 1,
                PlayerOutcome::Loss => stats.losses += 1,
                PlayerOutcome::Draw | PlayerOutcome::Cancelled => stats.draws += 1,
            }
            if is_offender {
                stats.apply_elo_delta(elo_change);
            }
            self.store
                .update_gamestats(
                    player.user_id,
                    leaderboard_id,
                    GameStatsFieldUpdate {
                        elo: Some(stats.elo),
                        games_played: Some(stats.games_played),
                        wins: Some(stats.wins),
                        losses: Some(stats.losses),
                        draws: Some(stats.draws),
                    },
                )
                .await?;

            self.store
                .update_battle_player(
                    player.id,
                    BattlePlayerFieldUpdate {
                        initial_elo: Some(initial_elo),
                        elo_change: Some(elo_change),
                        outcome: Some(outcome),
                    },
                )
                .await?;
        }

        Ok(())
    }

    async fn gamestats_for(&self, user_id: Uuid, leaderboard_id: i64) -> Result<avalon_data::GameStats> {
        match self.store.get_gamestats(user_id, leaderboard_id).await? {
            Some(stats) => Ok(stats),
            None => self.store.create_gamestats(user_id, leaderboard_id).await,
        }
    }
}

fn team_of(winner: Winner) -> Team {
    match winner {
        Winner::Blue => Team::Blue,
        Winner::Red => Team::Red,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use avalon_data::{
        Battle,
        BattleParticipant,
        GameResult,
        WinReason,
    };
    use avalon_test_utils::InMemoryBattleStore as FakeStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn seed_battle(
        store: &FakeStore,
        status: BattleStatus,
        winner: Option<Winner>,
        win_reason: WinReason,
        elo_exempt: bool,
        leaderboard_id: i64,
    ) -> (Uuid, BTreeMap<u8, Role>) {
        let battle_id = Uuid::new_v4();
        let roles = avalon_test_utils::seven_roles();
        let result = GameResult {
            winner,
            win_reason,
            blue_wins: 3,
            red_wins: 0,
            rounds_played: 3,
            roles: roles.clone(),
            log_path: "unused".to_owned(),
            traceback: None,
        };
        store.seed_battle(Battle {
            id: battle_id,
            status,
            leaderboard_id,
            elo_exempt,
            battle_type: "standard".to_owned(),
            created_at: chrono::Utc::now(),
            started_at: None,
            ended_at: None,
            result: Some(result),
            log_artifact_id: None,
        });

        let players: Vec<BattlePlayer> = (1u8..=7)
            .map(|position| BattlePlayer {
                id: Uuid::new_v4(),
                battle_id,
                user_id: Uuid::new_v4(),
                ai_code_id: Uuid::new_v4(),
                position,
                initial_elo: 0,
                elo_change: 0,
                outcome: None,
            })
            .collect();
        store.seed_players(battle_id, players);

        (battle_id, roles)
    }

    #[tokio::test]
    async fn normal_path_rewards_the_winning_team_and_penalizes_the_losers() {
        let store = Arc::new(FakeStore::default());
        let (battle_id, _roles) =
            seed_battle(&store, BattleStatus::Completed, Some(Winner::Blue), WinReason::MissionsFailed, false, 1);

        let processor = RatingProcessor::new(store.clone());
        processor.process(battle_id, &[]).await.unwrap();

        let players = store.get_battle_players(battle_id).await.unwrap();
        for player in &players {
            assert!(player.outcome.is_some());
        }
        let blue_merlin = players.iter().find(|p| p.position == 1).unwrap();
        let red_assassin = players.iter().find(|p| p.position == 6).unwrap();
        assert_eq!(blue_merlin.outcome, Some(PlayerOutcome::Win));
        assert_eq!(red_assassin.outcome, Some(PlayerOutcome::Loss));
        assert!(blue_merlin.elo_change > 0);
        assert!(red_assassin.elo_change < 0);
    }

    #[tokio::test]
    async fn elo_exempt_battles_write_outcomes_with_zero_elo_change() {
        let store = Arc::new(FakeStore::default());
        let (battle_id, _roles) =
            seed_battle(&store, BattleStatus::Completed, Some(Winner::Red), WinReason::MissionsFailed, true, 1);

        let processor = RatingProcessor::new(store.clone());
        processor.process(battle_id, &[]).await.unwrap();

        let players = store.get_battle_players(battle_id).await.unwrap();
        assert!(players.iter().all(|p| p.elo_change == 0));
        assert!(players.iter().all(|p| p.outcome.is_some()));
    }

    #[tokio::test]
    async fn cancellation_path_marks_every_player_cancelled_with_no_elo_change() {
        let store = Arc::new(FakeStore::default());
        let (battle_id, _roles) = seed_battle(
            &store,
            BattleStatus::Cancelled,
            None,
            WinReason::TerminatedDueToStatusChange,
            false,
            1,
        );

        let processor = RatingProcessor::new(store.clone());
        processor.process(battle_id, &[]).await.unwrap();

        let players = store.get_battle_players(battle_id).await.unwrap();
        assert!(players
            .iter()
            .all(|p| p.outcome == Some(PlayerOutcome::Cancelled) && p.elo_change == 0));
    }

    #[tokio::test]
    async fn error_path_penalizes_only_the_attributed_offender() {
        let store = Arc::new(FakeStore::default());
        let (battle_id, _roles) =
            seed_battle(&store, BattleStatus::Error, None, WinReason::MissionsFailed, false, 1);

        let event_log = vec![EventRecord::new(
            EventType::PlayerReturnError,
            json!({"error_code_pid": 4, "method": "walk", "message": "Player 4 failed while executing walk"}),
        )];

        let processor = RatingProcessor::new(store.clone());
        processor.process(battle_id, &event_log).await.unwrap();

        let players = store.get_battle_players(battle_id).await.unwrap();
        let offender = players.iter().find(|p| p.position == 4).unwrap();
        assert_eq!(offender.outcome, Some(PlayerOutcome::Loss));
        assert!((-100..=-20).contains(&offender.elo_change));

        for other in players.iter().filter(|p| p.position != 4) {
            assert_eq!(other.outcome, Some(PlayerOutcome::Draw));
            assert_eq!(other.elo_change, 0);
        }
    }

    #[tokio::test]
    async fn error_path_without_an_attributable_offender_is_an_error() {
        let store = Arc::new(FakeStore::default());
        let (battle_id, _roles) =
            seed_battle(&store, BattleStatus::Error, None, WinReason::MissionsFailed, false, 1);

        let processor = RatingProcessor::new(store.clone());
        assert_matches!(processor.process(battle_id, &[]).await, Err(_));
    }

    #[tokio::test]
    async fn reprocessing_an_already_rated_battle_is_a_no_op() {
        let store = Arc::new(FakeStore::default());
        let (battle_id, _roles) =
            seed_battle(&store, BattleStatus::Completed, Some(Winner::Blue), WinReason::MissionsFailed, false, 1);

        let processor = RatingProcessor::new(store.clone());
        processor.process(battle_id, &[]).await.unwrap();
        let first_pass = store.get_battle_players(battle_id).await.unwrap();

        processor.process(battle_id, &[]).await.unwrap();
        let second_pass = store.get_battle_players(battle_id).await.unwrap();

        for (a, b) in first_pass.iter().zip(second_pass.iter()) {
            assert_eq!(a.elo_change, b.elo_change);
            assert_eq!(a.outcome, b.outcome);
        }
    }

    #[tokio::test]
    async fn error_path_penalizes_harder_when_the_offenders_team_is_outmatched() {
        let store = Arc::new(FakeStore::default());
        let (battle_id, _roles) =
            seed_battle(&store, BattleStatus::Error, None, WinReason::MissionsFailed, false, 1);

        // Boost every red player's ELO well above blue's default 1200 so the team-diff
        // surcharge has something to bite on.
        for player in store.get_battle_players(battle_id).await.unwrap() {
            if matches!(player.position, 5 | 6 | 7) {
                store.create_gamestats(player.user_id, 1).await.unwrap();
                store
                    .update_gamestats(
                        player.user_id,
                        1,
                        GameStatsFieldUpdate {
                            elo: Some(1800),
                            ..Default::default()
                        },
                    )
                    .await
                    .unwrap();
            }
        }

        let mut role_assign = serde_json::Map::new();
        for (position, key) in [
            (1, "merlin"),
            (2, "percival"),
            (3, "knight"),
            (4, "knight"),
            (5, "morgana"),
            (6, "assassin"),
            (7, "oberon"),
        ] {
            role_assign.insert(position.to_string(), json!(key));
        }
        let event_log = vec![
            EventRecord::new(EventType::RoleAssign, serde_json::Value::Object(role_assign)),
            EventRecord::new(
                EventType::CriticalPlayerError,
                json!({
                    "error_code_pid": 6,
                    "method": "mission_vote2",
                    "message": "Player 6 failed while executing mission_vote2",
                }),
            ),
        ];

        let processor = RatingProcessor::new(store.clone());
        processor.process(battle_id, &event_log).await.unwrap();

        let players = store.get_battle_players(battle_id).await.unwrap();
        let offender = players.iter().find(|p| p.position == 6).unwrap();
        // base 30 + 10% of |1200 - 1800| = 30 + 60 = 90, * 1.5 (critical) = 135, + 20
        // (mission_vote2) = 155, clamped to 100.
        assert_eq!(offender.elo_change, -100);
    }
}
