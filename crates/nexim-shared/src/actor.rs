//! Typed identity for the two kinds of message participants.
//!
//! The wire form is a fixed four-character role prefix followed by the
//! decimal id: `u___12` is user 12, `ag__34` is agent 34. Parsing is total
//! and invertible; anything else is a [`ActorParseError`].

use std::fmt;
use std::str::FromStr;

/// Prefix for user actors in the canonical string form.
pub const USER_PREFIX: &str = "u___";
/// Prefix for agent actors in the canonical string form.
pub const AGENT_PREFIX: &str = "ag__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Actor {
    pub role: Role,
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorParseError {
    input: String,
}

impl fmt::Display for ActorParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed actor id: {:?}", self.input)
    }
}

impl std::error::Error for ActorParseError {}

impl Actor {
    pub fn user(id: i64) -> Self {
        Self {
            role: Role::User,
            id,
        }
    }

    pub fn agent(id: i64) -> Self {
        Self {
            role: Role::Agent,
            id,
        }
    }

    /// Canonical string form used everywhere a user id travels on the wire.
    pub fn to_user_id(&self) -> String {
        match self.role {
            Role::User => format!("{USER_PREFIX}{}", self.id),
            Role::Agent => format!("{AGENT_PREFIX}{}", self.id),
        }
    }

    pub fn parse(input: &str) -> Result<Self, ActorParseError> {
        let err = || ActorParseError {
            input: input.to_string(),
        };

        let (role, digits) = if let Some(rest) = input.strip_prefix(USER_PREFIX) {
            (Role::User, rest)
        } else if let Some(rest) = input.strip_prefix(AGENT_PREFIX) {
            (Role::Agent, rest)
        } else {
            return Err(err());
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(err());
        }
        // Reject leading zeros so parse(to_user_id(a)) == a holds exactly.
        if digits.len() > 1 && digits.starts_with('0') {
            return Err(err());
        }

        let id: i64 = digits.parse().map_err(|_| err())?;
        if id <= 0 {
            return Err(err());
        }

        Ok(Actor { role, id })
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_user_id())
    }
}

impl FromStr for Actor {
    type Err = ActorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Actor::parse(s)
    }
}

/// Canonical user-actor id for a numeric user id.
pub fn user_actor_id(id: i64) -> String {
    Actor::user(id).to_user_id()
}

/// Canonical agent-actor id for a numeric agent id.
pub fn agent_actor_id(id: i64) -> String {
    Actor::agent(id).to_user_id()
}

pub fn user_actor_ids(ids: &[i64]) -> Vec<String> {
    ids.iter().map(|id| user_actor_id(*id)).collect()
}

pub fn agent_actor_ids(ids: &[i64]) -> Vec<String> {
    ids.iter().map(|id| agent_actor_id(*id)).collect()
}

/// Parse a batch of actor ids, failing on the first malformed entry.
pub fn parse_all(ids: &[String]) -> Result<Vec<Actor>, ActorParseError> {
    ids.iter().map(|s| Actor::parse(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_is_identity() {
        for actor in [Actor::user(1), Actor::user(12), Actor::agent(34), Actor::agent(9_000_000)] {
            let s = actor.to_user_id();
            assert_eq!(Actor::parse(&s).unwrap(), actor, "roundtrip failed for {s}");
        }
    }

    #[test]
    fn parses_canonical_forms() {
        assert_eq!(Actor::parse("u___12").unwrap(), Actor::user(12));
        assert_eq!(Actor::parse("ag__34").unwrap(), Actor::agent(34));
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in [
            "", "bad", "u__12", "u___", "ag__", "u___x", "u___-3", "u___0", "u___012",
            "AG__34", "u___12 ",
        ] {
            assert!(Actor::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn parse_all_fails_on_any_malformed_entry() {
        let ok = parse_all(&["u___1".into(), "ag__2".into()]).unwrap();
        assert_eq!(ok.len(), 2);
        assert!(parse_all(&["u___1".into(), "bad".into()]).is_err());
    }
}
