use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Image version as published by the marketplace (`1`, `1.1`, `2.0-rc1`).
///
/// Ordering is segment-wise over `.` and `-` separated parts: numeric
/// segments compare as integers, other segments compare lexically and sort
/// after numeric ones, and a strict prefix sorts first. Equality follows the
/// ordering, so `1.01 == 1.1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Segment<'a> {
    Number(u64),
    Text(&'a str),
}

impl Version {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().trim().to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segments(&self) -> impl Iterator<Item = Segment<'_>> {
        self.0
            .split(['.', '-'])
            .filter(|s| !s.is_empty())
            .map(|s| match s.parse::<u64>() {
                Ok(n) => Segment::Number(n),
                Err(_) => Segment::Text(s),
            })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments().cmp(other.segments())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<u64> for Version {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::new(s)
    }

    #[test]
    fn numeric_segments_compare_numerically() {
        assert!(v("2") > v("1"));
        assert!(v("10") > v("9"));
        assert!(v("1.10") > v("1.9"));
    }

    #[test]
    fn prefix_sorts_first() {
        assert!(v("1.1") < v("1.1.1"));
        assert!(v("1") < v("1.0"));
    }

    #[test]
    fn leading_zeros_are_equal() {
        assert_eq!(v("1.01"), v("1.1"));
    }

    #[test]
    fn text_sorts_after_numbers() {
        assert!(v("1.rc1") > v("1.0"));
        assert!(v("2.0-beta") > v("2.0"));
        assert!(v("2.0-beta") < v("2.1"));
    }

    #[test]
    fn absent_version_sorts_first() {
        assert!(None < Some(v("0")));
    }

    #[test]
    fn whitespace_is_trimmed() {
        assert_eq!(v(" 3 ").as_str(), "3");
    }

    #[test]
    fn from_integer() {
        assert_eq!(Version::from(4), v("4"));
    }
}
