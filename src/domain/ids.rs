use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the string representation
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a board on the remote side
    BoardId
);
string_id!(
    /// Identifier of a column
    ColumnId
);
string_id!(
    /// Identifier of a group (a horizontal lane of items)
    GroupId
);
string_id!(
    /// Identifier of an item or subitem
    ItemId
);

impl ItemId {
    const PROVISIONAL_PREFIX: &'static str = "tmp-";

    /// Mints a client-side id for an item the remote has not confirmed yet
    pub fn provisional() -> Self {
        Self(format!("{}{}", Self::PROVISIONAL_PREFIX, Uuid::new_v4()))
    }

    /// True while the id has not been replaced by a server-assigned one
    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(Self::PROVISIONAL_PREFIX)
    }
}
