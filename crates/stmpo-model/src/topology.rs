use serde::{Deserialize, Serialize};

/// One NUMA node: an id and the logical CPUs it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumaNode {
    pub id: u32,
    /// Logical CPU ids, sorted ascending. Never empty in a valid topology.
    pub cpus: Vec<u32>,
}

/// Validated physical CPU layout of the host.
///
/// Nodes are ordered by id and their CPU sets are pairwise disjoint; the
/// loader in `stmpo-core` rejects anything else. Code that holds a
/// `NumaTopology` may rely on both invariants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumaTopology {
    pub nodes: Vec<NumaNode>,
}

impl NumaTopology {
    /// Total logical CPUs across all nodes.
    pub fn cpu_count(&self) -> usize {
        self.nodes.iter().map(|n| n.cpus.len()).sum()
    }

    /// All CPU ids in node order. This is the pool the affinity allocator
    /// slices; node grouping is preserved by construction.
    pub fn cpu_pool(&self) -> Vec<u32> {
        self.nodes.iter().flat_map(|n| n.cpus.iter().copied()).collect()
    }
}
