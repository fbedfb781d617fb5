//! Protocol versions and login negotiation.
//!
//! A client names the version it speaks in its login frame. The server only
//! talks to clients on its own major version; within that major the session
//! runs at the lower of the two minors, which is what the welcome reports
//! back.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Version this build speaks.
pub const PROTOCOL_VERSION: Version = Version::new(1, 0);

/// A `major.minor` protocol version.
///
/// Ordering is by major, then minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// The version a session runs at when this side meets `peer`.
    ///
    /// `None` when the majors differ.
    #[must_use]
    pub fn negotiate(self, peer: Version) -> Option<Version> {
        (self.major == peer.major).then(|| self.min(peer))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_settles_on_lower_minor() {
        let server = Version::new(1, 2);

        assert_eq!(server.negotiate(Version::new(1, 0)), Some(Version::new(1, 0)));
        assert_eq!(server.negotiate(Version::new(1, 5)), Some(Version::new(1, 2)));
        assert_eq!(server.negotiate(server), Some(server));
    }

    #[test]
    fn test_negotiate_refuses_other_majors() {
        assert_eq!(PROTOCOL_VERSION.negotiate(Version::new(2, 0)), None);
        assert_eq!(Version::new(2, 3).negotiate(Version::new(1, 9)), None);
    }

    #[test]
    fn test_versions_order_by_major_first() {
        assert!(Version::new(1, 9) < Version::new(2, 0));
        assert!(Version::new(1, 1) > Version::new(1, 0));
    }

    #[test]
    fn test_version_display() {
        assert_eq!(Version::new(1, 2).to_string(), "1.2");
    }
}
