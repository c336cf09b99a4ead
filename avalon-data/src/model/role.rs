use serde::{
    Deserialize,
    Serialize,
};

/// A hidden role assigned to a player for the lifetime of one battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Merlin,
    Percival,
    Knight,
    Morgana,
    Assassin,
    Oberon,
}

/// A side of the hidden-role conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Blue,
    Red,
}

impl Role {
    /// The team this role belongs to.
    pub fn team(&self) -> Team {
        match self {
            Self::Merlin | Self::Percival | Self::Knight => Team::Blue,
            Self::Morgana | Self::Assassin | Self::Oberon => Team::Red,
        }
    }

    /// The Chebyshev hearing radius for limited speech granted to this role.
    ///
    /// Knight and Oberon hear at radius 2; every other role hears at radius 1. This is carried
    /// forward exactly as observed, including Oberon's radius, which is not revised by any
    /// redesign of the role table.
    pub fn hearing_radius(&self) -> u8 {
        match self {
            Self::Knight | Self::Oberon => 2,
            _ => 1,
        }
    }

    /// The fixed 7-role table for one battle: Merlin, Percival, two Knights, Morgana, Assassin,
    /// Oberon.
    pub fn table() -> [Role; 7] {
        [
            Role::Merlin,
            Role::Percival,
            Role::Knight,
            Role::Knight,
            Role::Morgana,
            Role::Assassin,
            Role::Oberon,
        ]
    }
}
