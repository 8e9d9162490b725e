//! Holds the dimension id type

use std::fmt::{self, Display};

/// Index of a world (or dimension) as known to the world-data provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct DimensionId(pub u16);

impl Display for DimensionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "dim{}", self.0)
    }
}

impl From<u16> for DimensionId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<DimensionId> for u16 {
    fn from(value: DimensionId) -> Self {
        value.0
    }
}
