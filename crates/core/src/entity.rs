//! Kinds of entity that can be linked.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The closed set of entity kinds the linking workflow knows about.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    #[default]
    Task,
    Character,
    Business,
    Account,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        EntityType::Task,
        EntityType::Character,
        EntityType::Business,
        EntityType::Account,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Task => "task",
            EntityType::Character => "character",
            EntityType::Business => "business",
            EntityType::Account => "account",
        }
    }
}

impl core::fmt::Display for EntityType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "unknown entity type '{s}' (expected one of: task, character, business, account)"
                ))
            })
    }
}
