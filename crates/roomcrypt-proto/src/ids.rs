//! Strongly-typed identifiers.
//!
//! Every identifier in a federated deployment is an opaque string assigned by
//! somebody else (homeserver, device, ratchet engine). Wrapping them in
//! distinct types keeps a `SessionId` from being passed where a `RoomId` is
//! expected.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[derive(Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw string.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw string.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True if the identifier is the empty string.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Room identifier.
    RoomId
);
string_id!(
    /// User identifier.
    UserId
);
string_id!(
    /// Device identifier, unique per user.
    DeviceId
);
string_id!(
    /// Group session identifier produced by the ratchet engine.
    SessionId
);
string_id!(
    /// Long-term Curve25519 identity key of a device.
    ///
    /// Identifies the originator of a group session (`sender_key`) and the
    /// relays in a forwarding chain.
    Curve25519Key
);
string_id!(
    /// Ed25519 signing key claimed by a device.
    Ed25519Key
);
string_id!(
    /// Room event identifier.
    EventId
);
string_id!(
    /// Timeline identifier.
    ///
    /// A room can be viewed through several timelines (live, search results,
    /// permalinks). Replay detection and pending buckets are per timeline.
    TimelineId
);

impl DeviceId {
    /// Wildcard device id: "any of this user's devices".
    pub const WILDCARD: &'static str = "*";

    /// The wildcard device id.
    pub fn wildcard() -> Self {
        Self(Self::WILDCARD.to_string())
    }

    /// True if this is the wildcard device id.
    pub fn is_wildcard(&self) -> bool {
        self.0 == Self::WILDCARD
    }
}

/// A specific device of a specific user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceKey {
    /// Owning user.
    pub user_id: UserId,
    /// Device of that user.
    pub device_id: DeviceId,
}

impl DeviceKey {
    /// Build a device key.
    pub fn new(user_id: impl Into<UserId>, device_id: impl Into<DeviceId>) -> Self {
        Self { user_id: user_id.into(), device_id: device_id.into() }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_device() {
        assert!(DeviceId::wildcard().is_wildcard());
        assert!(!DeviceId::from("ABCDEF").is_wildcard());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&RoomId::from("!room:example.org"), &mut bytes).unwrap();

        let decoded: String = ciborium::de::from_reader(bytes.as_slice()).unwrap();
        assert_eq!(decoded, "!room:example.org");
    }

    #[test]
    fn device_key_display() {
        let key = DeviceKey::new("@alice:example.org", "PHONE");
        assert_eq!(key.to_string(), "@alice:example.org:PHONE");
    }
}
