//! Stage identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_STAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a stage descriptor.
///
/// Every descriptor gets a fresh id when it is created, so two descriptors
/// built from the same closure are still distinct stages. Graph wiring
/// deduplicates by id: a descriptor reachable along several paths is
/// instantiated once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageId(pub(crate) u64);

impl StageId {
    pub(crate) fn next() -> Self {
        Self(NEXT_STAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the numeric value of the id.
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
