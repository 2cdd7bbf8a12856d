//! The set of response statuses a request is allowed to produce

use std::collections::BTreeSet;
use std::fmt;

use http::StatusCode;

/// An ordered set of HTTP statuses.
///
/// `dispatch` succeeds only when the registry answers with a member of
/// this set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSet(BTreeSet<StatusCode>);

impl StatusSet {
    /// Creates an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a status to the set
    pub fn with(mut self, status: StatusCode) -> Self {
        self.0.insert(status);
        self
    }

    /// Membership test
    pub fn contains(&self, status: StatusCode) -> bool {
        self.0.contains(&status)
    }

    /// Iterates over the statuses in ascending order
    pub fn iter(&self) -> impl Iterator<Item = StatusCode> + '_ {
        self.0.iter().copied()
    }

    /// Number of statuses in the set
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<StatusCode> for StatusSet {
    fn from_iter<I: IntoIterator<Item = StatusCode>>(iter: I) -> Self {
        StatusSet(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[StatusCode; N]> for StatusSet {
    fn from(statuses: [StatusCode; N]) -> Self {
        statuses.into_iter().collect()
    }
}

impl From<StatusCode> for StatusSet {
    fn from(status: StatusCode) -> Self {
        StatusSet::new().with(status)
    }
}

impl fmt::Display for StatusSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for status in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{}", status.as_u16())?;
            first = false;
        }
        Ok(())
    }
}
