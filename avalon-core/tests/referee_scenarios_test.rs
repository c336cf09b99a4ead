//! End-to-end scenarios driving `Referee::run_game` through a full battle against scripted bots,
//! per `spec.md` §8's concrete seeds for the suite.
//!
//! Role and grid assignment are deterministic functions of the PRNG seed passed to `Referee::new`
//! (see `avalon_prng`'s LCRNG and `rand_util::shuffle`); the exact outcome for each seed used
//! below was derived by replaying that same algorithm, not guessed.

use std::{
    path::PathBuf,
    sync::Arc,
    time::{
        SystemTime,
        UNIX_EPOCH,
    },
};

use avalon_core::{
    llm::{
        HttpLlmClient,
        LlmClientPool,
        LlmGateway,
    },
    observer::Observer,
    referee::Referee,
    sandbox::BotHost,
};
use avalon_data::{
    EventType,
    WinReason,
    Winner,
};
use avalon_test_utils::{
    assert_event_emitted,
    assert_event_not_emitted,
    events_of_type,
    FixedStatusChecker,
    FlipAfterNCallsStatusChecker,
    ScriptedBot,
};
use pretty_assertions::assert_eq;

fn unique_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let dir = std::env::temp_dir().join(format!("avalon-referee-scenario-{name}-{nanos}"));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn gateway() -> LlmGateway {
    LlmGateway::new(LlmClientPool::new(Vec::new()), Arc::new(HttpLlmClient::new()))
}

#[tokio::test]
async fn happy_blue_sweep() {
    // Seed 1 -> roles {1: Knight, 2: Assassin, 3: Knight, 4: Percival, 5: Morgana, 6: Merlin,
    // 7: Oberon}. Every bot defaults to approving every proposal and passing every mission, so
    // blue sweeps 3-0. The assassin (position 2) is scripted to guess position 1, which is not
    // Merlin (position 6), so the assassination fails and blue wins outright.
    let dir = unique_dir("happy-blue-sweep");
    let observer = Observer::new(&dir, "happy-blue-sweep".to_owned());
    let llm = gateway();
    let status = FixedStatusChecker(avalon_data::BattleStatus::Playing);
    let bots = (1..=7)
        .map(|_| ScriptedBot::new().with_assass_guesses([1]).boxed())
        .collect();
    let host = BotHost::from_instances(bots);

    let referee = Referee::new("happy-blue-sweep".to_owned(), host, &observer, &llm, &status, Some(1));
    let result = referee.run_game().await.unwrap();

    assert_eq!(result.winner, Some(Winner::Blue));
    assert_eq!(result.win_reason, WinReason::FailedAssassination);
    assert_eq!(result.blue_wins, 3);
    assert_eq!(result.red_wins, 0);
    assert_eq!(result.rounds_played, 3);

    let events = observer.drain_snapshots();
    assert_event_emitted(&events, EventType::GameEnd);
    assert_eq!(events_of_type(&events, EventType::MissionResult).len(), 3);
}

#[tokio::test]
async fn assassination_comeback() {
    // Same seed and default play as `happy_blue_sweep`, but the assassin correctly names Merlin
    // (position 6), flipping an otherwise-lost game to red.
    let dir = unique_dir("assassination-comeback");
    let observer = Observer::new(&dir, "assassination-comeback".to_owned());
    let llm = gateway();
    let status = FixedStatusChecker(avalon_data::BattleStatus::Playing);
    let bots = (1..=7)
        .map(|_| ScriptedBot::new().with_assass_guesses([6]).boxed())
        .collect();
    let host = BotHost::from_instances(bots);

    let referee = Referee::new(
        "assassination-comeback".to_owned(),
        host,
        &observer,
        &llm,
        &status,
        Some(1),
    );
    let result = referee.run_game().await.unwrap();

    assert_eq!(result.winner, Some(Winner::Red));
    assert_eq!(result.win_reason, WinReason::AssassinationSuccess);
    assert_eq!(result.blue_wins, 3);
    assert_eq!(result.red_wins, 0);

    let events = observer.drain_snapshots();
    let assass = events_of_type(&events, EventType::Assass);
    assert_eq!(assass.len(), 1);
    assert_eq!(assass[0].event_data["target"], 6);
}

#[tokio::test]
async fn red_wins_by_mission_failures() {
    // Seed 1 again: {1: Knight, 2: Assassin, 3: Knight, 4: Percival, 5: Morgana, 6: Merlin,
    // 7: Oberon}, round-1 leader 6. Rounds 1, 3, and 4 are proposed with enough red players to
    // fail them (round 3 and 4 need 2 fails, per the double-fail rule); round 2 is an
    // all-blue team that passes. Red reaches 3 failed missions before round 5 is ever proposed.
    let dir = unique_dir("red-wins-by-mission-failures");
    let observer = Observer::new(&dir, "red-wins-by-mission-failures".to_owned());
    let llm = gateway();
    let status = FixedStatusChecker(avalon_data::BattleStatus::Playing);

    let mut bots: Vec<Box<dyn avalon_core::sandbox::AvalonBot>> = (1..=7).map(|_| ScriptedBot::new().boxed()).collect();
    bots[5] = ScriptedBot::new().with_mission_proposals([vec![2, 7]]).boxed(); // leader of round 1 (Merlin @ 6)
    bots[6] = ScriptedBot::new().with_mission_proposals([vec![1, 3, 4]]).boxed(); // leader of round 2 (Oberon @ 7)
    bots[0] = ScriptedBot::new().with_mission_proposals([vec![2, 5, 7]]).boxed(); // leader of round 3 (Knight @ 1)
    bots[1] = ScriptedBot::new() // Assassin @ 2: on the team in rounds 1, 3, 4, fails every time
        .with_mission_proposals([vec![2, 5, 7, 4]]) // leader of round 4
        .with_vote2s([false, false, false])
        .boxed();
    bots[4] = ScriptedBot::new() // Morgana @ 5: on the team in rounds 3 and 4, fails both
        .with_vote2s([false, false])
        .boxed();
    let host = BotHost::from_instances(bots);

    let referee = Referee::new(
        "red-wins-by-mission-failures".to_owned(),
        host,
        &observer,
        &llm,
        &status,
        Some(1),
    );
    let result = referee.run_game().await.unwrap();

    assert_eq!(result.winner, Some(Winner::Red));
    assert_eq!(result.win_reason, WinReason::MissionsFailed);
    assert_eq!(result.blue_wins, 1);
    assert_eq!(result.red_wins, 3);
    assert_eq!(result.rounds_played, 4);

    let events = observer.drain_snapshots();
    let mission_results = events_of_type(&events, EventType::MissionResult);
    assert_eq!(mission_results.len(), 4);
    assert_eq!(mission_results[0].event_data["failed"], true); // round 1
    assert_eq!(mission_results[1].event_data["failed"], false); // round 2
    assert_eq!(mission_results[2].event_data["failed"], true); // round 3
    assert_eq!(mission_results[3].event_data["failed"], true); // round 4
}

#[tokio::test]
async fn forced_execution_after_five_rejections() {
    // Seed 777 -> roles {1: Merlin, 2: Assassin, ...}, round-1 leader 1. Every player rejects all
    // 5 proposals in round 1, so the 5th is force-executed regardless of the vote; the round then
    // passes by default, and blue goes on to sweep 3-0 with a failed assassination.
    let dir = unique_dir("forced-execution");
    let observer = Observer::new(&dir, "forced-execution".to_owned());
    let llm = gateway();
    let status = FixedStatusChecker(avalon_data::BattleStatus::Playing);

    let mut bots: Vec<Box<dyn avalon_core::sandbox::AvalonBot>> = (1..=7)
        .map(|_| ScriptedBot::new().with_vote1s([false, false, false, false, false]).with_assass_guesses([3]).boxed())
        .collect();
    // Leaders of round 1's 5 ballots rotate 1, 2, 3, 4, 5.
    bots[0] = ScriptedBot::new()
        .with_vote1s([false, false, false, false, false])
        .with_mission_proposals([vec![1, 2]])
        .with_assass_guesses([3])
        .boxed();
    bots[1] = ScriptedBot::new()
        .with_vote1s([false, false, false, false, false])
        .with_mission_proposals([vec![2, 3]])
        .with_assass_guesses([3])
        .boxed();
    bots[2] = ScriptedBot::new()
        .with_vote1s([false, false, false, false, false])
        .with_mission_proposals([vec![3, 4]])
        .with_assass_guesses([3])
        .boxed();
    bots[3] = ScriptedBot::new()
        .with_vote1s([false, false, false, false, false])
        .with_mission_proposals([vec![4, 5]])
        .with_assass_guesses([3])
        .boxed();
    bots[4] = ScriptedBot::new()
        .with_vote1s([false, false, false, false, false])
        .with_mission_proposals([vec![5, 6]])
        .with_assass_guesses([3])
        .boxed();
    let host = BotHost::from_instances(bots);

    let referee = Referee::new("forced-execution".to_owned(), host, &observer, &llm, &status, Some(777));
    let result = referee.run_game().await.unwrap();

    assert_eq!(result.winner, Some(Winner::Blue));
    assert_eq!(result.win_reason, WinReason::FailedAssassination);
    assert_eq!(result.blue_wins, 3);
    assert_eq!(result.rounds_played, 3);

    let events = observer.drain_snapshots();
    let force_executes = events_of_type(&events, EventType::MissionForceExecute);
    assert_eq!(force_executes.len(), 1);
    assert_eq!(force_executes[0].event_data["round"], 1);
    assert_eq!(force_executes[0].event_data["members"], serde_json::json!([5, 6]));

    // The first 4 proposals in round 1 were all rejected, and the 5th was force-executed rather
    // than approved, so no MissionApproved should appear for round 1.
    let rejections: Vec<_> = events_of_type(&events, EventType::MissionRejected)
        .into_iter()
        .filter(|record| record.event_data["round"] == 1)
        .collect();
    assert_eq!(rejections.len(), 4);
    assert_eq!(
        rejections[0].event_data["proposal"],
        serde_json::json!([1, 2])
    );
    assert_eq!(rejections[0].event_data["next_leader"], 2);
    assert!(
        !events_of_type(&events, EventType::MissionApproved)
            .iter()
            .any(|record| record.event_data["round"] == 1)
    );

    // Rounds 2 and 3 each pass on the first proposal (every bot defaults to approve), so each
    // gets exactly one MissionApproved and no MissionRejected.
    for round in [2, 3] {
        let approvals: Vec<_> = events_of_type(&events, EventType::MissionApproved)
            .into_iter()
            .filter(|record| record.event_data["round"] == round)
            .collect();
        assert_eq!(approvals.len(), 1, "round {round} should approve exactly once");
        assert!(
            !events_of_type(&events, EventType::MissionRejected)
                .iter()
                .any(|record| record.event_data["round"] == round)
        );
    }

    // The next round's leader rotated once from the round's *original* start leader (1 -> 2),
    // not from whoever made the 5th (force-executed) proposal.
    let leaders = events_of_type(&events, EventType::Leader);
    let round_2_leader = leaders
        .iter()
        .find(|record| record.event_data["round"] == 2)
        .expect("round 2 should have proposed at least once");
    assert_eq!(round_2_leader.event_data["leader"], 2);
}

#[tokio::test]
async fn fatal_bot_error_on_out_of_bounds_walk() {
    // Seed 1 places position 5 at grid cell (0, 7); a single "left" step takes it to x = -1,
    // outside the 9x9 grid, which the referee treats as a fatal, attributable bot fault.
    let dir = unique_dir("out-of-bounds-walk");
    let observer = Observer::new(&dir, "out-of-bounds-walk".to_owned());
    let llm = gateway();
    let status = FixedStatusChecker(avalon_data::BattleStatus::Playing);

    let mut bots: Vec<Box<dyn avalon_core::sandbox::AvalonBot>> = (1..=7).map(|_| ScriptedBot::new().boxed()).collect();
    bots[4] = ScriptedBot::new().with_walks([vec!["left".to_owned()]]).boxed();
    let host = BotHost::from_instances(bots);

    let referee = Referee::new("out-of-bounds-walk".to_owned(), host, &observer, &llm, &status, Some(1));
    let err = referee.run_game().await.expect_err("an out-of-bounds walk is fatal");
    assert!(err.to_string().contains("player 5 failed in walk"));

    let events = observer.drain_snapshots();
    let offenses = events_of_type(&events, EventType::PlayerReturnError);
    assert_eq!(offenses.len(), 1);
    assert_eq!(offenses[0].error_attributed_player(), Some(5));
    assert_eq!(offenses[0].error_attributed_method(), Some("walk".to_owned()));
    assert_event_not_emitted(&events, EventType::GameEnd);
}

#[tokio::test]
async fn cancellation_mid_flight_during_round_two_limited_speech() {
    // Every bot plays the conservative default (approve, pass, stay put, say nothing), so round 1
    // completes in exactly one proposal. The status checker reports `playing` for the first 19
    // status checks and `cancelled` from the 20th on; counting round -> proposal -> speech ->
    // movement -> speech checks per round (1 + 1 + 3 + 3 + 3 = 11 per round), the 20th check
    // lands on the very first limited-speech check of round 2.
    let dir = unique_dir("cancellation-mid-flight");
    let observer = Observer::new(&dir, "cancellation-mid-flight".to_owned());
    let llm = gateway();
    let status = FlipAfterNCallsStatusChecker::new(19);
    let bots = (1..=7).map(|_| ScriptedBot::new().boxed()).collect();
    let host = BotHost::from_instances(bots);

    let referee = Referee::new(
        "cancellation-mid-flight".to_owned(),
        host,
        &observer,
        &llm,
        &status,
        Some(1),
    );
    let result = referee.run_game().await.unwrap();

    assert_eq!(result.winner, None);
    assert_eq!(result.win_reason, WinReason::TerminatedDueToStatusChange);
    assert_eq!(result.rounds_played, 1);

    let events = observer.drain_snapshots();
    assert_event_emitted(&events, EventType::RoundStart);
    assert_event_not_emitted(&events, EventType::GameEnd);
    assert_event_not_emitted(&events, EventType::GameResult);
    // Round 2's own status check (the 12th overall) still passed, so it started and its
    // RoundStart was recorded, but the 20th check (round 2's first limited-speech check) cancels
    // it before a mission result is ever reached.
    assert_eq!(events_of_type(&events, EventType::RoundStart).len(), 2);
    assert_eq!(events_of_type(&events, EventType::MissionResult).len(), 1);
}
