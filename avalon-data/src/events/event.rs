use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};

/// The closed event vocabulary emitted by the Observer, per `spec.md` §4.1.
///
/// Variant names serialize to the exact strings consumed by the rating processor and replay
/// tooling; several keep the source's inconsistent casing (`critical_player_ERROR`) because
/// downstream consumers match on the literal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    GameStart,
    RoleAssign,
    NightStart,
    NightEnd,
    RoundStart,
    RoundEnd,
    Leader,
    TeamPropose,
    PublicSpeech,
    PrivateSpeech,
    PublicVote,
    PublicVoteResult,
    MissionApproved,
    MissionRejected,
    MissionForceExecute,
    MissionVote,
    MissionResult,
    ScoreBoard,
    FinalScore,
    Positions,
    DefaultPositions,
    Move,
    Assass,
    GameResult,
    GameEnd,
    #[serde(rename = "tokens")]
    Tokens,
    #[serde(rename = "critical_player_ERROR")]
    CriticalPlayerError,
    #[serde(rename = "player_return_ERROR")]
    PlayerReturnError,
    #[serde(rename = "critical_setup_error")]
    CriticalSetupError,
    #[serde(rename = "game_aborted")]
    GameAborted,
    #[serde(rename = "game_terminated")]
    GameTerminated,
    #[serde(rename = "game_error")]
    GameError,
}

/// One entry in a battle's event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub event_data: serde_json::Value,
}

impl EventRecord {
    pub fn new(event_type: EventType, event_data: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            event_data,
        }
    }

    /// Extracts the offending player id from a `critical_player_ERROR` or `player_return_ERROR`
    /// record, per the error-attribution rule in `spec.md` §4.5.
    ///
    /// Looks first for a structured `error_code_pid` field in `[1, 7]`, falling back to
    /// regex-extracting `Player <n>` from a free-form message, matching
    /// `database/action.py`'s extraction order.
    pub fn error_attributed_player(&self) -> Option<u8> {
        if !matches!(
            self.event_type,
            EventType::CriticalPlayerError | EventType::PlayerReturnError
        ) {
            return None;
        }
        if let Some(pid) = self.event_data.get("error_code_pid").and_then(|v| v.as_i64()) {
            if (1..=7).contains(&pid) {
                return Some(pid as u8);
            }
        }
        let message = self.event_data.get("message").and_then(|v| v.as_str())?;
        extract_player_id_from_message(message)
    }

    /// Extracts the offending method name from an error record, falling back to regex
    /// extraction over a free-form message the same way the player id does.
    pub fn error_attributed_method(&self) -> Option<String> {
        if let Some(method) = self.event_data.get("method").and_then(|v| v.as_str()) {
            return Some(method.to_owned());
        }
        let message = self.event_data.get("message").and_then(|v| v.as_str())?;
        extract_method_from_message(message)
    }
}

fn extract_player_id_from_message(message: &str) -> Option<u8> {
    let idx = message.find("Player ")?;
    let rest = &message[idx + "Player ".len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let pid: u8 = digits.parse().ok()?;
    (1..=7).contains(&pid).then_some(pid)
}

fn extract_method_from_message(message: &str) -> Option<String> {
    if let Some(idx) = message.find("method '") {
        let rest = &message[idx + "method '".len()..];
        if let Some(end) = rest.find('\'') {
            return Some(rest[..end].to_owned());
        }
    }
    if let Some(idx) = message.find("executing ") {
        let rest = &message[idx + "executing ".len()..];
        let token: String = rest
            .chars()
            .take_while(|c| !c.is_whitespace())
            .collect();
        if !token.is_empty() {
            return Some(token);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn serializes_error_event_types_with_source_casing() {
        assert_eq!(
            serde_json::to_string(&EventType::CriticalPlayerError).unwrap(),
            "\"critical_player_ERROR\""
        );
        assert_eq!(
            serde_json::to_string(&EventType::PlayerReturnError).unwrap(),
            "\"player_return_ERROR\""
        );
    }

    #[test]
    fn extracts_structured_offender() {
        let record = EventRecord::new(
            EventType::CriticalPlayerError,
            json!({"error_code_pid": 4, "method": "walk"}),
        );
        assert_eq!(record.error_attributed_player(), Some(4));
        assert_eq!(record.error_attributed_method(), Some("walk".to_owned()));
    }

    #[test]
    fn falls_back_to_message_regex() {
        let record = EventRecord::new(
            EventType::PlayerReturnError,
            json!({"message": "Player 3 failed while executing decide_mission_member"}),
        );
        assert_eq!(record.error_attributed_player(), Some(3));
        assert_eq!(
            record.error_attributed_method(),
            Some("decide_mission_member".to_owned())
        );
    }

    #[test]
    fn non_error_events_have_no_offender() {
        let record = EventRecord::new(EventType::GameStart, json!({}));
        assert_eq!(record.error_attributed_player(), None);
    }
}
