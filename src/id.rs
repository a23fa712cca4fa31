//! Newtype identifiers, so call-ids cannot be confused with caller numbers
//! or other plain strings at the type level.

use std::fmt::{Display, Formatter, Result as FmtResult};

/// Opaque identifier for one in-flight call. Generated on INVITE
/// acceptance; never reused within a process lifetime.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CallId(pub(crate) String);

impl CallId {
    /// Generates a fresh, process-unique call id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrows the id as a plain string slice, e.g. for log fields.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CallId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.0, f)
    }
}

impl From<String> for CallId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
