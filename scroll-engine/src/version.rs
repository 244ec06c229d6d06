//! Minimum-cluster-version gate.

use std::fmt;

/// A cluster node version, ordered lexicographically by component.
///
/// The engine refuses to start unless every non-client node in the cluster
/// is at least [`ClusterVersion::V2_3_0`]: older nodes do not understand the
/// task accounting and cancellation protocol the engine relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClusterVersion {
    /// Major version component.
    pub major: u32,
    /// Minor version component.
    pub minor: u32,
    /// Patch version component.
    pub patch: u32,
}

impl ClusterVersion {
    /// The oldest version the engine will run against.
    pub const V2_3_0: Self = Self {
        major: 2,
        minor: 3,
        patch: 0,
    };

    /// Create a version from its components.
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ClusterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
