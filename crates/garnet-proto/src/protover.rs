//! Advertised subprotocol versions.
//!
//! Relays describe the protocol features they implement as a list of
//! named subprotocols with version ranges, rendered in a fixed textual
//! form ("Link=3-4 LinkAuth=1 ...").  The directory-publication side
//! consumes this string; here we only know how to say what we support.

use std::collections::BTreeMap;
use std::fmt;

/// An inclusive range of versions of one subprotocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VersionRange {
    /// Lowest supported version.
    low: u32,
    /// Highest supported version.
    high: u32,
}

impl VersionRange {
    /// A range holding the single version `v`.
    pub fn single(v: u32) -> Self {
        VersionRange { low: v, high: v }
    }
    /// A range from `low` to `high` inclusive.
    ///
    /// # Panics
    ///
    /// Panics if the range is backwards.
    pub fn new(low: u32, high: u32) -> Self {
        assert!(low <= high, "backwards version range");
        VersionRange { low, high }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.low == self.high {
            write!(f, "{}", self.low)
        } else {
            write!(f, "{}-{}", self.low, self.high)
        }
    }
}

/// A set of subprotocols and the version ranges supported for each.
#[derive(Clone, Debug, Default)]
pub struct SupportedProtocols(
    /// Map from subprotocol name to supported ranges, kept sorted so
    /// the rendering is canonical.
    BTreeMap<&'static str, Vec<VersionRange>>,
);

impl SupportedProtocols {
    /// Return an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record support for `range` of the subprotocol `name`.
    pub fn support(&mut self, name: &'static str, range: VersionRange) {
        self.0.entry(name).or_default().push(range);
    }
}

impl fmt::Display for SupportedProtocols {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, ranges) in &self.0 {
            if !first {
                write!(f, " ")?;
            }
            first = false;
            write!(f, "{}=", name)?;
            for (i, r) in ranges.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}", r)?;
            }
        }
        Ok(())
    }
}

/// The subprotocols this relay implements.
pub fn supported() -> SupportedProtocols {
    let mut s = SupportedProtocols::new();
    s.support("Link", VersionRange::new(3, 4));
    s.support("LinkAuth", VersionRange::single(1));
    s.support("Relay", VersionRange::new(1, 2));
    s
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ranges_render() {
        assert_eq!(VersionRange::single(3).to_string(), "3");
        assert_eq!(VersionRange::new(3, 5).to_string(), "3-5");
    }

    #[test]
    #[should_panic]
    fn backwards_range_panics() {
        let _ = VersionRange::new(5, 3);
    }

    #[test]
    fn rendering_is_sorted_and_joined() {
        let mut s = SupportedProtocols::new();
        s.support("Relay", VersionRange::new(1, 2));
        s.support("Link", VersionRange::new(3, 4));
        s.support("Link", VersionRange::single(6));
        assert_eq!(s.to_string(), "Link=3-4,6 Relay=1-2");
    }

    #[test]
    fn our_protocols() {
        assert_eq!(supported().to_string(), "Link=3-4 LinkAuth=1 Relay=1-2");
    }
}
