//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings.

use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Hex sha512 of a compressed layer blob. Names the blob under `layers/`
    /// and its mountpoint under `mnt/`.
    LayerId
);

string_newtype!(
    /// Hex sha512 of a manifest's canonical JSON.
    ManifestId
);

string_newtype!(
    /// Identifier of one layer in a foreign image history.
    ChainId
);

/// Length of a hex-encoded sha512 digest.
const SHA512_HEX_LEN: usize = 128;

/// Whether `s` has the shape of a hex sha512 digest.
pub fn is_content_hash(s: &str) -> bool {
    s.len() == SHA512_HEX_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b':')
}

/// Validate a human-readable tag. Tags become file names under `manifests/`,
/// so they must not contain path separators, must not be hidden, and must not
/// be confusable with a manifest id.
pub fn validate_tag(tag: &str) -> Result<(), SchemaError> {
    let invalid = |reason: &str| SchemaError::InvalidTag {
        tag: tag.to_owned(),
        reason: reason.to_owned(),
    };
    if tag.is_empty() || tag.len() > 128 {
        return Err(invalid("tag must be 1-128 characters"));
    }
    if tag.starts_with('.') {
        return Err(invalid("tag must not start with '.'"));
    }
    if !tag.bytes().all(is_name_byte) {
        return Err(invalid("tag must match [a-zA-Z0-9_.:-]"));
    }
    if is_content_hash(tag) {
        return Err(invalid("tag must not look like a manifest id"));
    }
    Ok(())
}

/// Validate a layer id read from a manifest before it names files under
/// `layers/` and `mnt/`.
pub fn validate_layer_id(id: &str) -> Result<(), SchemaError> {
    if !is_content_hash(id) {
        return Err(SchemaError::InvalidLayerId(id.to_owned()));
    }
    Ok(())
}

/// Validate a foreign layer id before it is used to name cache and lock files.
pub fn validate_chain_id(id: &str) -> Result<(), SchemaError> {
    if id.is_empty() || id.len() > 256 || id.starts_with('.') || !id.bytes().all(is_name_byte) {
        return Err(SchemaError::InvalidChainId(id.to_owned()));
    }
    Ok(())
}
