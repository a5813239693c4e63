// id.rs — Block identifiers
//
// A `Sid` is the model's own numeric block identifier. Every map and set
// keyed by it is ordered, so iteration over blocks is deterministic.

use std::fmt;

use serde::Serialize;

/// Model-unique block identifier (the `SID` attribute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Sid(pub u64);

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Sid {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Sid)
    }
}
