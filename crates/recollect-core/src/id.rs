//! Opaque string identifiers.
//!
//! IDs are compared and ordered as plain strings. Locally generated event and
//! entity IDs are 22-character URL-safe base64 encodings of a random UUID;
//! IDs received from peers are accepted verbatim.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! opaque_id {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(
      Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    )]
    #[serde(transparent)]
    pub struct $name(String);

    impl $name {
      pub fn as_str(&self) -> &str { &self.0 }

      pub fn into_string(self) -> String { self.0 }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
      }
    }

    impl From<String> for $name {
      fn from(s: String) -> Self { Self(s) }
    }

    impl From<&str> for $name {
      fn from(s: &str) -> Self { Self(s.to_owned()) }
    }

    impl AsRef<str> for $name {
      fn as_ref(&self) -> &str { &self.0 }
    }
  };
}

opaque_id!(
  /// Identity of an event; also its position key within one store's log.
  EventId
);
opaque_id!(
  /// Identity of the entity an event targets (a task or an attachment
  /// reference).
  EntityId
);
opaque_id!(
  /// A separately-scheduled sub-unit of a task, e.g. one cloze deletion.
  ComponentId
);
opaque_id!(
  /// Content-addressed attachment identity: lowercase hex SHA-256 of the
  /// attachment's bytes.
  AttachmentId
);

fn random_id() -> String { URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes()) }

impl EventId {
  /// A fresh, globally unique event ID.
  pub fn generate() -> Self { Self(random_id()) }
}

impl EntityId {
  /// A fresh, globally unique entity ID (used for new tasks).
  pub fn generate() -> Self { Self(random_id()) }
}

impl From<AttachmentId> for EntityId {
  fn from(id: AttachmentId) -> Self { Self(id.0) }
}

impl From<&EntityId> for AttachmentId {
  /// Attachment reference entities are keyed by their attachment ID.
  fn from(id: &EntityId) -> Self { Self(id.0.clone()) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn generated_ids_are_22_url_safe_chars() {
    let id = EventId::generate();
    assert_eq!(id.as_str().len(), 22);
    assert!(
      id.as_str()
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    );
    assert_ne!(id, EventId::generate());
  }

  #[test]
  fn ids_serialize_as_bare_strings() {
    let id = ComponentId::from("c1");
    assert_eq!(serde_json::to_string(&id).unwrap(), "\"c1\"");
  }
}
