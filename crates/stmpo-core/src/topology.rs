use std::collections::{HashMap, HashSet};
use std::path::Path;

use stmpo_model::{NumaNode, NumaTopology};
use tracing::{debug, warn};

use crate::error::TopologyError;

/// Parse and validate a NUMA map file.
///
/// The file is a JSON object mapping node identifiers to logical CPU id
/// lists, the shape produced from Coreinfo dumps:
///
/// ```json
/// { "0": [0, 1, 2], "1": [64, 65] }
/// ```
///
/// `group_N` keys are tolerated as aliases for `N`. Nodes are ordered by
/// numeric id where possible; every node must own at least one CPU and no
/// CPU may appear in two nodes.
pub fn load_topology(path: &Path) -> Result<NumaTopology, TopologyError> {
    let raw = std::fs::read_to_string(path).map_err(|e| TopologyError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let map: HashMap<String, Vec<u32>> =
        serde_json::from_str(&raw).map_err(|e| TopologyError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
    validate(map)
}

/// Topology loading is never fatal: any problem degrades to `None`, which
/// downstream means "run every slot unpinned".
pub fn load_topology_best_effort(path: Option<&Path>) -> Option<NumaTopology> {
    let path = path?;
    match load_topology(path) {
        Ok(topology) => {
            debug!(
                target: "stmpo.core.topology",
                nodes = topology.nodes.len(),
                cpus = topology.cpu_count(),
                "numa map loaded"
            );
            Some(topology)
        }
        Err(e) => {
            warn!(target: "stmpo.core.topology", error = %e, "numa map unusable; affinity disabled");
            None
        }
    }
}

fn validate(map: HashMap<String, Vec<u32>>) -> Result<NumaTopology, TopologyError> {
    if map.is_empty() {
        return Err(TopologyError::Empty);
    }

    // Numeric node order, with a lexicographic fallback for odd keys.
    let mut entries: Vec<(String, Vec<u32>)> = map.into_iter().collect();
    entries.sort_by(|(a, _), (b, _)| match (node_id(a), node_id(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.cmp(b),
    });

    let mut seen = HashSet::new();
    let mut nodes = Vec::with_capacity(entries.len());
    for (idx, (key, mut cpus)) in entries.into_iter().enumerate() {
        if cpus.is_empty() {
            return Err(TopologyError::EmptyNode(key));
        }
        cpus.sort_unstable();
        for &cpu in &cpus {
            if !seen.insert(cpu) {
                return Err(TopologyError::DuplicateCpu { cpu });
            }
        }
        let id = node_id(&key).unwrap_or(idx as u32);
        nodes.push(NumaNode { id, cpus });
    }

    Ok(NumaTopology { nodes })
}

fn node_id(key: &str) -> Option<u32> {
    key.trim().trim_start_matches("group_").parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_map(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn loads_plain_node_keys_in_numeric_order() {
        let f = write_map(r#"{"1": [8, 9], "0": [0, 1, 2], "10": [20]}"#);
        let t = load_topology(f.path()).unwrap();
        let ids: Vec<u32> = t.nodes.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![0, 1, 10]);
        assert_eq!(t.cpu_pool(), vec![0, 1, 2, 8, 9, 20]);
    }

    #[test]
    fn tolerates_group_prefixed_keys() {
        let f = write_map(r#"{"group_0": [0, 1], "group_1": [64, 65]}"#);
        let t = load_topology(f.path()).unwrap();
        assert_eq!(t.nodes.len(), 2);
        assert_eq!(t.nodes[1].cpus, vec![64, 65]);
    }

    #[test]
    fn rejects_duplicate_cpu_across_nodes() {
        let f = write_map(r#"{"0": [0, 1], "1": [1, 2]}"#);
        assert!(matches!(
            load_topology(f.path()),
            Err(TopologyError::DuplicateCpu { cpu: 1 })
        ));
    }

    #[test]
    fn rejects_empty_node() {
        let f = write_map(r#"{"0": [0], "1": []}"#);
        assert!(matches!(
            load_topology(f.path()),
            Err(TopologyError::EmptyNode(_))
        ));
    }

    #[test]
    fn best_effort_swallows_everything() {
        assert!(load_topology_best_effort(None).is_none());
        assert!(load_topology_best_effort(Some(Path::new("/no/such/map.json"))).is_none());

        let bad = write_map("not json at all");
        assert!(load_topology_best_effort(Some(bad.path())).is_none());

        let good = write_map(r#"{"0": [0, 1, 2, 3]}"#);
        let t = load_topology_best_effort(Some(good.path())).unwrap();
        assert_eq!(t.cpu_count(), 4);
    }
}
