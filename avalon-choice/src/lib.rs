use std::fmt::Display;

use itertools::Itertools;
use serde::{
    Deserialize,
    Serialize,
};
use thiserror::Error;

/// A decision returned by a bot that failed validation against the rules of the game.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid choice: {0}")]
pub struct InvalidChoiceError(String);

impl InvalidChoiceError {
    pub fn new<M>(message: M) -> Self
    where
        M: Display,
    {
        Self(message.to_string())
    }
}

/// A single step direction for the movement phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// The `(dx, dy)` delta this direction applies to a grid position.
    pub fn delta(&self) -> (i8, i8) {
        match self {
            Self::Up => (0, -1),
            Self::Down => (0, 1),
            Self::Left => (-1, 0),
            Self::Right => (1, 0),
        }
    }
}

impl TryFrom<&str> for Direction {
    type Error = InvalidChoiceError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            other => Err(InvalidChoiceError::new(format!(
                "'{other}' is not a valid direction"
            ))),
        }
    }
}

/// The maximum number of steps a bot may take in a single movement phase.
pub const MAX_MOVE_STEPS: usize = 3;

/// A bot's response to the movement phase: up to [`MAX_MOVE_STEPS`] steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkChoice(pub Vec<Direction>);

impl WalkChoice {
    /// Validates a raw tuple of direction strings returned by a bot's `walk()` entry point.
    pub fn validate(steps: &[String]) -> Result<Self, InvalidChoiceError> {
        if steps.len() > MAX_MOVE_STEPS {
            return Err(InvalidChoiceError::new(format!(
                "walk() returned {} steps, at most {MAX_MOVE_STEPS} allowed",
                steps.len()
            )));
        }
        let directions = steps
            .iter()
            .map(|step| Direction::try_from(step.as_str()))
            .try_collect()?;
        Ok(Self(directions))
    }
}

/// A bot's response to `decide_mission_member(count)`: a proposed mission team.
///
/// Validation enforces distinct player positions in `[1, 7]` and the exact team size demanded
/// for the current mission round; it does not enforce that the leader included themselves,
/// since the rules do not require it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissionTeamChoice(pub Vec<u8>);

impl MissionTeamChoice {
    pub fn validate(members: &[i64], expected_size: usize) -> Result<Self, InvalidChoiceError> {
        if members.len() != expected_size {
            return Err(InvalidChoiceError::new(format!(
                "decide_mission_member returned {} members, expected {expected_size}",
                members.len()
            )));
        }
        let mut positions = Vec::with_capacity(members.len());
        for member in members {
            if *member < 1 || *member > 7 {
                return Err(InvalidChoiceError::new(format!(
                    "mission team member {member} is out of range [1, 7]"
                )));
            }
            positions.push(*member as u8);
        }
        if positions.iter().unique().count() != positions.len() {
            return Err(InvalidChoiceError::new(
                "mission team contains duplicate members",
            ));
        }
        Ok(Self(positions))
    }
}

/// A bot's response to the public team-approval ballot (`mission_vote1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicVoteChoice(pub bool);

/// A bot's response to the secret mission execution ballot (`mission_vote2`).
///
/// Whether a `false` vote is legal depends on the voter's role, which this type does not know
/// about; the referee enforces that constraint using the role table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionVoteChoice(pub bool);

/// The maximum length, in characters, of a single `say()` utterance.
///
/// Not specified by the rules directly; bounds pathological bot output so a single utterance
/// cannot blow up the event log.
pub const MAX_SPEECH_LENGTH: usize = 4096;

/// A bot's response to `say()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeechChoice(pub String);

impl SpeechChoice {
    pub fn validate(text: String) -> Result<Self, InvalidChoiceError> {
        if text.len() > MAX_SPEECH_LENGTH {
            return Err(InvalidChoiceError::new(format!(
                "say() returned {} characters, at most {MAX_SPEECH_LENGTH} allowed",
                text.len()
            )));
        }
        Ok(Self(text))
    }
}

/// A bot's response to `assass()`: the assassin's guess at Merlin's identity.
///
/// Self-targeting is rejected by the referee, not here, since it needs to know the assassin's
/// own position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssassinationChoice(pub u8);

impl AssassinationChoice {
    pub fn validate(target: i64) -> Result<Self, InvalidChoiceError> {
        if target < 1 || target > 7 {
            return Err(InvalidChoiceError::new(format!(
                "assass() target {target} is out of range [1, 7]"
            )));
        }
        Ok(Self(target as u8))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn validates_mission_team_of_correct_size() {
        let choice = MissionTeamChoice::validate(&[1, 3, 5], 3).unwrap();
        assert_eq!(choice.0, vec![1, 3, 5]);
    }

    #[test]
    fn rejects_mission_team_of_wrong_size() {
        assert_matches!(MissionTeamChoice::validate(&[1, 3], 3), Err(_));
    }

    #[test]
    fn rejects_mission_team_with_duplicate() {
        assert_matches!(MissionTeamChoice::validate(&[1, 1, 5], 3), Err(_));
    }

    #[test]
    fn rejects_mission_team_out_of_range() {
        assert_matches!(MissionTeamChoice::validate(&[0, 3, 5], 3), Err(_));
        assert_matches!(MissionTeamChoice::validate(&[1, 3, 8], 3), Err(_));
    }

    #[test]
    fn validates_walk_within_step_limit() {
        let steps = vec!["up".to_owned(), "left".to_owned()];
        let choice = WalkChoice::validate(&steps).unwrap();
        assert_eq!(choice.0, vec![Direction::Up, Direction::Left]);
    }

    #[test]
    fn rejects_walk_beyond_step_limit() {
        let steps = vec![
            "up".to_owned(),
            "up".to_owned(),
            "up".to_owned(),
            "up".to_owned(),
        ];
        assert_matches!(WalkChoice::validate(&steps), Err(_));
    }

    #[test]
    fn rejects_walk_with_invalid_direction() {
        let steps = vec!["sideways".to_owned()];
        assert_matches!(WalkChoice::validate(&steps), Err(_));
    }

    #[test]
    fn validates_assassination_target() {
        assert_eq!(AssassinationChoice::validate(4).unwrap(), AssassinationChoice(4));
        assert_matches!(AssassinationChoice::validate(0), Err(_));
        assert_matches!(AssassinationChoice::validate(8), Err(_));
    }
}
