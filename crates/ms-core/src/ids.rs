//! Typed ID wrappers for jobs and the sessions that own them.
//!
//! Both ids are newtypes over `String` so they can carry identities handed
//! over by the transport layer, while preventing a session key from being
//! passed where a job id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum number of characters kept from the source identity in a [`JobId`].
const MAX_SOURCE_LEN: usize = 48;

/// Generate a newtype ID wrapper over `String`.
///
/// The macro produces a struct with:
/// - `as_str()` borrowing the inner value
/// - `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`, `Serialize`, `Deserialize`
/// - `Display` delegating to the inner string
/// - `From<String>` and `From<&str>` conversions
macro_rules! string_id {
    ($($(#[doc = $doc:expr])* $name:ident),+ $(,)?) => {
        $(
            $(#[doc = $doc])*
            #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(String);

            impl $name {
                /// Borrow the inner value.
                #[must_use]
                pub fn as_str(&self) -> &str {
                    &self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl From<String> for $name {
                fn from(s: String) -> Self {
                    Self(s)
                }
            }

            impl From<&str> for $name {
                fn from(s: &str) -> Self {
                    Self(s.to_string())
                }
            }

            impl AsRef<str> for $name {
                fn as_ref(&self) -> &str {
                    &self.0
                }
            }
        )+
    };
}

string_id! {
    /// Unique identifier for a compression job.
    JobId,
    /// Identifier of the requester/session that owns a job.
    OwnerSession,
}

impl JobId {
    /// Derive a job id from the source file's unique identity plus a random
    /// disambiguator, e.g. `AgADBQAD-3f9c01ab`.
    ///
    /// The source part is reduced to `[A-Za-z0-9_-]` so the id is safe to use
    /// as a directory name and inside archive names.
    #[must_use]
    pub fn derive(source_identity: &str) -> Self {
        let mut source: String = source_identity
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .take(MAX_SOURCE_LEN)
            .collect();
        if source.trim_matches('_').is_empty() {
            source = "job".to_string();
        }

        let nonce = Uuid::new_v4().simple().to_string();
        Self(format!("{source}-{}", &nonce[..8]))
    }
}
