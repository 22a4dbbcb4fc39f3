use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! numeric_id {
    ($name:ident, $repr:ty) => {
        #[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name($repr);

        impl $name {
            pub const fn new(raw: $repr) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> $repr {
                self.0
            }
        }

        impl From<$repr> for $name {
            fn from(raw: $repr) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<$repr>().map(Self)
            }
        }
    };
}

// Platform snowflakes fit in SQLite's signed 64-bit INTEGER.
numeric_id!(MessageId, i64);
numeric_id!(UserId, u64);

impl MessageId {
    /// Reserved id of the default system-context row.
    pub const SENTINEL: MessageId = MessageId(0);

    pub fn is_sentinel(self) -> bool {
        self == Self::SENTINEL
    }
}
