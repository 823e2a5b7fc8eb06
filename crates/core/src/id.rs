// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed identifier newtypes.
//!
//! IDs are `{prefix}{uuid-v4}` strings. The prefix makes log lines and
//! wire payloads self-describing; the uuid makes them unique across hosts.

/// Define a newtype ID wrapper around `String` with a type prefix.
///
/// Generates `generate()` for random ID creation, `from_string()`,
/// `as_str()`, `Display`, `From<&str>`/`From<String>`, and a transparent
/// serde representation.
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident($prefix:literal);
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Generate a new random ID with the type prefix.
            pub fn generate() -> Self {
                Self(format!("{}{}", Self::PREFIX, uuid::Uuid::new_v4()))
            }

            /// Create an ID from an existing string (parsing/deserialization).
            pub fn from_string(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id! {
    /// Identifier for a registered project.
    pub struct ProjectId("prj-");
}

define_id! {
    /// Identifier for a connected client session.
    ///
    /// Sessions have no persistent identity; a reconnecting client gets
    /// a fresh id.
    pub struct ClientId("cli-");
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
