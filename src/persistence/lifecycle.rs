//! Token lifecycle state machine
//!
//! Detected -> AwaitingGraduation -> PoolCreated -> SecurityVerified -> Bought
//! -> PartiallySold -> FullyExited, with Blacklisted reachable from any
//! non-terminal state. Forward moves may skip states; nothing moves back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Detected,
    AwaitingGraduation,
    PoolCreated,
    SecurityVerified,
    Bought,
    PartiallySold,
    FullyExited,
    Blacklisted,
}

impl TokenState {
    fn rank(self) -> u8 {
        match self {
            TokenState::Detected => 0,
            TokenState::AwaitingGraduation => 1,
            TokenState::PoolCreated => 2,
            TokenState::SecurityVerified => 3,
            TokenState::Bought => 4,
            TokenState::PartiallySold => 5,
            TokenState::FullyExited => 6,
            TokenState::Blacklisted => 7,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TokenState::FullyExited | TokenState::Blacklisted)
    }

    /// Whether `self -> next` is allowed
    ///
    /// Same-state moves are allowed and only refresh attributes.
    pub fn can_transition(self, next: TokenState) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        if next == TokenState::Blacklisted {
            return true;
        }
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for TokenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TokenState::Detected => "detected",
            TokenState::AwaitingGraduation => "awaiting_graduation",
            TokenState::PoolCreated => "pool_created",
            TokenState::SecurityVerified => "security_verified",
            TokenState::Bought => "bought",
            TokenState::PartiallySold => "partially_sold",
            TokenState::FullyExited => "fully_exited",
            TokenState::Blacklisted => "blacklisted",
        };
        write!(f, "{}", name)
    }
}

/// Persisted lifecycle record for one mint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleRecord {
    pub mint: String,
    pub state: TokenState,
    /// Free-form attributes merged across upserts
    pub attributes: Map<String, Value>,
    pub first_seen: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LifecycleRecord {
    pub fn new(mint: impl Into<String>, state: TokenState) -> Self {
        let now = Utc::now();
        Self {
            mint: mint.into(),
            state,
            attributes: Map::new(),
            first_seen: now,
            updated_at: now,
        }
    }

    /// Move to `next` and merge `attributes`, rejecting backward moves
    pub fn advance(&mut self, next: TokenState, attributes: Value) -> Result<()> {
        if !self.state.can_transition(next) {
            return Err(Error::InvalidTransition {
                mint: self.mint.clone(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        merge_attributes(&mut self.attributes, attributes);
        self.updated_at = Utc::now();
        Ok(())
    }
}

fn merge_attributes(target: &mut Map<String, Value>, attributes: Value) {
    match attributes {
        Value::Object(map) => {
            for (k, v) in map {
                target.insert(k, v);
            }
        }
        Value::Null => {}
        other => {
            target.insert("value".to_string(), other);
        }
    }
}

/// Filters for `get_tokens_by_states`
#[derive(Debug, Clone, Default)]
pub struct LifecycleFilter {
    pub updated_since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl LifecycleFilter {
    pub fn matches(&self, record: &LifecycleRecord) -> bool {
        self.updated_since
            .map(|since| record.updated_at >= since)
            .unwrap_or(true)
    }
}
