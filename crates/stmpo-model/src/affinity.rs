use serde::{Deserialize, Serialize};

/// Disjoint set of logical CPUs assigned exclusively to one worker slot.
///
/// Across all blocks of one task the CPU sets never overlap and their union
/// stays within the topology's pool. On hosts where a single affinity mask
/// cannot address every CPU, `group` names the processor group the whole
/// block resolves to; blocks never span groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffinityBlock {
    pub cpus: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<u16>,
}

impl AffinityBlock {
    pub fn new(cpus: Vec<u32>) -> Self {
        Self { cpus, group: None }
    }

    pub fn with_group(cpus: Vec<u32>, group: u16) -> Self {
        Self {
            cpus,
            group: Some(group),
        }
    }
}

impl std::fmt::Display for AffinityBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(g) = self.group {
            write!(f, "group {g}: {:?}", self.cpus)
        } else {
            write!(f, "{:?}", self.cpus)
        }
    }
}
