use serde::{Deserialize, Serialize};

/// Boolean switch that defaults to `true` when omitted from the bundle.
///
/// Several task-bundle fields (fail-fast, affinity, MFR) are opt-out rather
/// than opt-in, so a bare `#[serde(default)]` bool would flip their meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flag(pub bool);

impl Flag {
    #[inline]
    pub fn is_on(&self) -> bool {
        self.0
    }

    #[inline]
    pub fn off() -> Self {
        Flag(false)
    }
}

impl Default for Flag {
    fn default() -> Self {
        Flag(true)
    }
}

impl From<bool> for Flag {
    fn from(v: bool) -> Self {
        Flag(v)
    }
}
