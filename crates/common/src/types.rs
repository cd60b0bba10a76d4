//! Common data types for Dark Tower components.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum accepted length for room identifiers and role names.
pub const MAX_ID_LENGTH: usize = 256;

/// Error returned when an identifier fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidId {
    /// The identifier was empty or whitespace only.
    #[error("{0} must not be empty")]
    Empty(&'static str),

    /// The identifier exceeded [`MAX_ID_LENGTH`].
    #[error("{0} exceeds {MAX_ID_LENGTH} bytes")]
    TooLong(&'static str),
}

fn validate(kind: &'static str, value: &str) -> Result<(), InvalidId> {
    if value.trim().is_empty() {
        return Err(InvalidId::Empty(kind));
    }
    if value.len() > MAX_ID_LENGTH {
        return Err(InvalidId::TooLong(kind));
    }
    Ok(())
}

/// Identifier of a conferencing room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Parse a room identifier.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidId`] if the value is empty or too long.
    pub fn parse(value: impl Into<String>) -> Result<Self, InvalidId> {
        let value = value.into();
        validate("room_id", &value)?;
        Ok(Self(value))
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Discriminator letting several kinds of tracker coexist for one room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    /// Role of the room recorder.
    pub const RECORD: &'static str = "record";

    /// Parse a role name.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidId`] if the value is empty or too long.
    pub fn parse(value: impl Into<String>) -> Result<Self, InvalidId> {
        let value = value.into();
        validate("role", &value)?;
        Ok(Self(value))
    }

    /// The `record` role.
    #[must_use]
    pub fn record() -> Self {
        Self(Self::RECORD.to_string())
    }

    /// Borrow the raw role name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a managed tracker: one per `(room, role)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackerKey {
    /// Room the tracker is attached to.
    pub room_id: RoomId,
    /// Kind of tracker.
    pub role: Role,
}

impl TrackerKey {
    /// Create a key from its parts.
    #[must_use]
    pub fn new(room_id: RoomId, role: Role) -> Self {
        Self { room_id, role }
    }
}

impl fmt::Display for TrackerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.room_id, self.role)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_rejects_empty() {
        assert_eq!(RoomId::parse(""), Err(InvalidId::Empty("room_id")));
        assert_eq!(RoomId::parse("   "), Err(InvalidId::Empty("room_id")));
    }

    #[test]
    fn test_role_rejects_oversized() {
        let long = "r".repeat(MAX_ID_LENGTH + 1);
        assert_eq!(Role::parse(long), Err(InvalidId::TooLong("role")));
    }

    #[test]
    fn test_tracker_key_display() {
        let key = TrackerKey::new(RoomId::parse("room-1").unwrap(), Role::record());
        assert_eq!(key.to_string(), "room-1/record");
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let room = RoomId::parse("room-42").unwrap();
        assert_eq!(serde_json::to_string(&room).unwrap(), "\"room-42\"");

        let role: Role = serde_json::from_str("\"record\"").unwrap();
        assert_eq!(role, Role::record());
    }

    #[test]
    fn test_keys_differ_by_role() {
        let room = RoomId::parse("room-1").unwrap();
        let a = TrackerKey::new(room.clone(), Role::record());
        let b = TrackerKey::new(room, Role::parse("transcribe").unwrap());
        assert_ne!(a, b);
    }
}
