//! core type-safe identifiers for the storage layer.

use std::borrow::Borrow;
use std::fmt;
use std::fmt::Formatter;

use serde::{Deserialize, Serialize};

/// Identifier of a commit in the log.
///
/// Ids are assigned by the log in strictly increasing order, which is what
/// makes them usable as the tie-break for revisions sharing a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitId(u64);

impl CommitId {
    /// the first id handed out by an empty log
    pub const FIRST: CommitId = CommitId(1);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// the id following this one
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Validate an opaque token: anything non-empty without control characters.
fn validate_token(token: &str) -> Result<(), InvalidNameError> {
    if token.is_empty() {
        return Err(InvalidNameError::Empty);
    }

    for (i, c) in token.chars().enumerate() {
        if c.is_control() {
            return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
        }
    }

    Ok(())
}

macro_rules! token_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// create a new token, validating the input
            pub fn new(value: impl Into<String>) -> Result<Self, InvalidNameError> {
                let value = value.into();
                validate_token(&value)?;
                Ok(Self(value))
            }

            /// get the string representation
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = InvalidNameError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

token_type!(
    /// Identifier of a translatable string, unique within a working set.
    StringId
);

token_type!(
    /// Namespace for a related group of strings.
    Component
);

token_type!(
    /// Language code the strings are written in (`en-US`, `fr`, ...).
    Language
);

token_type!(
    /// An independent release line with its own history.
    Branch
);

/// The unit of independent history: (component, language, branch).
///
/// Keys order by component, then language, then branch.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    pub component: Component,
    pub language: Language,
    pub branch: Branch,
}

impl Key {
    pub fn new(component: Component, language: Language, branch: Branch) -> Self {
        Self {
            component,
            language,
            branch,
        }
    }

    /// build a key from raw tokens, validating each of them
    pub fn parse(
        component: impl Into<String>,
        language: impl Into<String>,
        branch: impl Into<String>,
    ) -> Result<Self, InvalidNameError> {
        Ok(Self {
            component: Component::new(component)?,
            language: Language::new(language)?,
            branch: Branch::new(branch)?,
        })
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.component, self.language, self.branch)
    }
}

/// error type for invalid tokens (ids, components, languages, branches)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    InvalidCharacter { char: char, position: usize },
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character {:?} at position {}", char, position)
            }
        }
    }
}

impl std::error::Error for InvalidNameError {}

/// a change to one string between two snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub id: StringId,
    pub status: ChangeStatus,
}

/// the type of change in a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    Added,
    Deleted,
    Modified,
}
