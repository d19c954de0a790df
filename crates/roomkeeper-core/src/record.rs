use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

snowflake_id!(
    /// Provider-assigned identifier of a voice room.
    ResourceId
);
snowflake_id!(
    /// Identifier of a chat user.
    UserId
);
snowflake_id!(
    /// Identifier of a text surface (channel) messages are posted to.
    SurfaceId
);
snowflake_id!(MessageId);

/// Locates the interactive control message attached to a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub surface_id: SurfaceId,
    pub message_id: MessageId,
}

/// A room under management.
///
/// Serialized in the canonical shape:
/// ```json
/// {"resource_id": 1, "owner_id": 2, "status_message": {"surface_id": 3, "message_id": 4}}
/// ```
/// Two older shapes are still accepted on read: a bare id (`1`) and the
/// `{"channel_id", "message_id", "message_channel_id"}` object. Neither carries
/// an owner, so such records can only be torn down by the reconciliation loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredRecord")]
pub struct ResourceRecord {
    pub resource_id: ResourceId,
    pub owner_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<MessageRef>,
}

impl ResourceRecord {
    pub fn new(
        resource_id: ResourceId,
        owner_id: UserId,
        status_message: Option<MessageRef>,
    ) -> Self {
        Self {
            resource_id,
            owner_id: Some(owner_id),
            status_message,
        }
    }

    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.owner_id == Some(user)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Bare(ResourceId),
    Current {
        resource_id: ResourceId,
        #[serde(default)]
        owner_id: Option<UserId>,
        #[serde(default)]
        status_message: Option<MessageRef>,
    },
    Legacy {
        channel_id: ResourceId,
        #[serde(default)]
        message_id: Option<MessageId>,
        #[serde(default)]
        message_channel_id: Option<SurfaceId>,
    },
}

impl From<StoredRecord> for ResourceRecord {
    fn from(stored: StoredRecord) -> Self {
        match stored {
            StoredRecord::Bare(resource_id) => Self {
                resource_id,
                owner_id: None,
                status_message: None,
            },
            StoredRecord::Current {
                resource_id,
                owner_id,
                status_message,
            } => Self {
                resource_id,
                owner_id,
                status_message,
            },
            StoredRecord::Legacy {
                channel_id,
                message_id,
                message_channel_id,
            } => Self {
                resource_id: channel_id,
                owner_id: None,
                status_message: match (message_channel_id, message_id) {
                    (Some(surface_id), Some(message_id)) => Some(MessageRef {
                        surface_id,
                        message_id,
                    }),
                    _ => None,
                },
            },
        }
    }
}

/// What the creation command asks the provider for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSpec {
    pub name: String,
    /// Maximum occupants; 0 means unlimited.
    #[serde(default)]
    pub occupant_limit: u32,
    #[serde(default = "default_bitrate_kbps")]
    pub bitrate_kbps: u32,
    /// Where the provider should place the room (e.g. a category id).
    #[serde(default)]
    pub placement_hint: Option<String>,
}

fn default_bitrate_kbps() -> u32 {
    64
}

/// Live state of a room as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoomState {
    /// The room no longer exists.
    Missing,
    /// The id resolves to something that is not a voice room.
    WrongKind,
    Voice { occupants: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_record_round_trips() {
        let record = ResourceRecord::new(
            ResourceId(10),
            UserId(20),
            Some(MessageRef {
                surface_id: SurfaceId(30),
                message_id: MessageId(40),
            }),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "resource_id": 10,
                "owner_id": 20,
                "status_message": {"surface_id": 30, "message_id": 40}
            })
        );
        let back: ResourceRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn record_without_message_omits_field() {
        let record = ResourceRecord::new(ResourceId(1), UserId(2), None);
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("status_message"));
    }

    #[test]
    fn bare_id_reads_as_ownerless_record() {
        let record: ResourceRecord = serde_json::from_str("123").unwrap();
        assert_eq!(record.resource_id, ResourceId(123));
        assert_eq!(record.owner_id, None);
        assert_eq!(record.status_message, None);
    }

    #[test]
    fn legacy_channel_object_reads_message_ref() {
        let record: ResourceRecord = serde_json::from_str(
            r#"{"channel_id": 5, "message_id": 6, "message_channel_id": 7}"#,
        )
        .unwrap();
        assert_eq!(record.resource_id, ResourceId(5));
        assert_eq!(
            record.status_message,
            Some(MessageRef {
                surface_id: SurfaceId(7),
                message_id: MessageId(6),
            })
        );
        assert!(!record.is_owned_by(UserId(0)));
    }

    #[test]
    fn legacy_object_with_partial_message_ref_drops_it() {
        let record: ResourceRecord =
            serde_json::from_str(r#"{"channel_id": 5, "message_id": 6}"#).unwrap();
        assert_eq!(record.status_message, None);
    }

    #[test]
    fn ownership_check() {
        let record = ResourceRecord::new(ResourceId(1), UserId(2), None);
        assert!(record.is_owned_by(UserId(2)));
        assert!(!record.is_owned_by(UserId(3)));
    }

    #[test]
    fn room_state_serializes_tagged() {
        let json = serde_json::to_value(RoomState::Voice { occupants: 3 }).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "voice", "occupants": 3}));
        let missing: RoomState = serde_json::from_str(r#"{"kind": "missing"}"#).unwrap();
        assert_eq!(missing, RoomState::Missing);
    }

    #[test]
    fn room_spec_defaults() {
        let spec: RoomSpec = serde_json::from_str(r#"{"name": "study"}"#).unwrap();
        assert_eq!(spec.occupant_limit, 0);
        assert_eq!(spec.bitrate_kbps, 64);
        assert!(spec.placement_hint.is_none());
    }
}
