use std::collections::VecDeque;

use stmpo_model::{AffinityBlock, NumaTopology};
use tracing::debug;

/// One run of CPUs that should be kept together: a NUMA node, or a
/// node fragment that fits inside a single processor group.
struct Segment {
    cpus: VecDeque<u32>,
    group: Option<u16>,
}

/// Slice the topology's CPU pool into `n` pairwise-disjoint affinity blocks.
///
/// Returns `None` when there is no usable topology; every slot then runs
/// unpinned, which is a degraded mode and not an error.
///
/// The pool is the concatenation of node CPU lists in node order, split with
/// the same near-equal remainder-to-front rule as the frame splitter, with
/// two bends:
///
/// - a split point that would land inside a node is pushed to the node
///   boundary, unless the node is larger than an average block (then the
///   node is split at its own internal boundary) — keeps workers NUMA-local
///   whenever the node/worker ratio allows it;
/// - with `group_span = Some(g)` (hosts where one affinity mask cannot
///   address every CPU), no block ever crosses a multiple-of-`g` group
///   boundary; the pool is subdivided at the boundary instead of the ideal
///   split point, which can leave trailing CPUs unassigned.
///
/// Deterministic: identical inputs produce identical blocks. The union of
/// all blocks is a subset of the pool and blocks never overlap.
pub fn allocate(
    topology: Option<&NumaTopology>,
    n: u32,
    group_span: Option<u32>,
) -> Option<Vec<AffinityBlock>> {
    let topology = topology?;
    let total = topology.cpu_count();
    if total == 0 || n == 0 {
        return None;
    }
    let n = (n as usize).min(total);

    let mut segments = build_segments(topology, group_span);
    let mut blocks: Vec<AffinityBlock> = Vec::with_capacity(n);
    let mut consumed = 0usize;

    for i in 0..n {
        let remaining_blocks = n - i;
        let remaining = total - consumed;
        // Rebalance after every block so earlier boundary adjustments do not
        // starve the tail. Remainder-to-front falls out of the `rem > 0` bump.
        let base = remaining / remaining_blocks;
        let rem = remaining % remaining_blocks;
        let max_take = remaining - (remaining_blocks - 1);
        let target = (base + usize::from(rem > 0)).min(max_take);

        let mut cpus: Vec<u32> = Vec::with_capacity(target);
        let mut group: Option<u16> = None;

        while cpus.len() < target {
            let Some(seg) = segments.front_mut() else {
                break;
            };
            if group_span.is_some() && !cpus.is_empty() && group != seg.group {
                // Block would span two processor groups; cut here instead.
                break;
            }
            let space = target - cpus.len();
            if seg.cpus.len() <= space {
                group = group.or(seg.group);
                cpus.extend(seg.cpus.drain(..));
                segments.pop_front();
                continue;
            }
            // Segment does not fit. Split it only when it is larger than an
            // average block, or when this block would otherwise stay empty.
            let seg_is_large = seg.cpus.len() * n > total;
            if seg_is_large || cpus.is_empty() {
                group = group.or(seg.group);
                cpus.extend(seg.cpus.drain(..space));
            }
            break;
        }

        consumed += cpus.len();
        blocks.push(AffinityBlock { cpus, group });
    }

    let leftover = total - consumed;
    if leftover > 0 {
        debug!(
            target: "stmpo.core.affinity",
            leftover,
            "cpus left unassigned at a group boundary"
        );
    }
    Some(blocks)
}

fn build_segments(topology: &NumaTopology, group_span: Option<u32>) -> VecDeque<Segment> {
    let mut out = VecDeque::new();
    for node in &topology.nodes {
        match group_span {
            None => out.push_back(Segment {
                cpus: node.cpus.iter().copied().collect(),
                group: None,
            }),
            Some(g) => {
                // A node may straddle a group boundary; pre-cut it so every
                // segment resolves to exactly one group.
                let mut run: Vec<u32> = Vec::new();
                let mut run_group = None;
                for &cpu in &node.cpus {
                    let grp = (cpu / g) as u16;
                    if run_group != Some(grp) && !run.is_empty() {
                        out.push_back(Segment {
                            cpus: run.drain(..).collect(),
                            group: run_group,
                        });
                    }
                    run_group = Some(grp);
                    run.push(cpu);
                }
                if !run.is_empty() {
                    out.push_back(Segment {
                        cpus: run.into_iter().collect(),
                        group: run_group,
                    });
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use stmpo_model::NumaNode;

    fn topo(nodes: &[(u32, std::ops::RangeInclusive<u32>)]) -> NumaTopology {
        NumaTopology {
            nodes: nodes
                .iter()
                .map(|(id, r)| NumaNode {
                    id: *id,
                    cpus: r.clone().collect(),
                })
                .collect(),
        }
    }

    fn assert_disjoint_subset(blocks: &[AffinityBlock], topology: &NumaTopology) {
        let pool: std::collections::HashSet<u32> = topology.cpu_pool().into_iter().collect();
        let mut seen = std::collections::HashSet::new();
        for b in blocks {
            assert!(!b.cpus.is_empty(), "empty affinity block");
            for &cpu in &b.cpus {
                assert!(pool.contains(&cpu), "cpu {cpu} not in pool");
                assert!(seen.insert(cpu), "cpu {cpu} assigned twice");
            }
        }
    }

    #[test]
    fn absent_topology_disables_affinity() {
        assert!(allocate(None, 4, None).is_none());
    }

    #[test]
    fn blocks_align_to_whole_nodes_when_ratio_allows() {
        let t = topo(&[(0, 0..=7), (1, 8..=15)]);
        let blocks = allocate(Some(&t), 2, None).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].cpus, (0..=7).collect::<Vec<_>>());
        assert_eq!(blocks[1].cpus, (8..=15).collect::<Vec<_>>());
    }

    #[test]
    fn large_node_is_split_internally() {
        let t = topo(&[(0, 0..=15)]);
        let blocks = allocate(Some(&t), 4, None).unwrap();
        assert_eq!(blocks.len(), 4);
        assert!(blocks.iter().all(|b| b.cpus.len() == 4));
        assert_disjoint_subset(&blocks, &t);
    }

    #[test]
    fn small_node_is_not_split_across_blocks() {
        // Three 4-cpu nodes into 2 blocks: a naive 6/6 cut would split node 1.
        let t = topo(&[(0, 0..=3), (1, 4..=7), (2, 8..=11)]);
        let blocks = allocate(Some(&t), 2, None).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].cpus, vec![0, 1, 2, 3]);
        assert_eq!(blocks[1].cpus, vec![4, 5, 6, 7, 8, 9, 10, 11]);
        assert_disjoint_subset(&blocks, &t);
    }

    #[test]
    fn n_clamped_to_cpu_count() {
        let t = topo(&[(0, 0..=2)]);
        let blocks = allocate(Some(&t), 8, None).unwrap();
        assert_eq!(blocks.len(), 3);
        assert_disjoint_subset(&blocks, &t);
    }

    #[test]
    fn grouped_host_blocks_never_span_groups() {
        // One 96-cpu node over two 64-wide groups.
        let t = topo(&[(0, 0..=95)]);
        let blocks = allocate(Some(&t), 3, Some(64)).unwrap();
        assert_eq!(blocks.len(), 3);
        for b in &blocks {
            let g = b.group.expect("group must be recorded");
            assert!(b.cpus.iter().all(|&c| (c / 64) as u16 == g));
        }
        assert_disjoint_subset(&blocks, &t);
    }

    #[test]
    fn group_boundary_beats_ideal_split_point() {
        // n=2 over 96 cpus: the ideal second block (48..=95) would span the
        // 64-cpu group boundary, so it is cut there instead.
        let t = topo(&[(0, 0..=95)]);
        let blocks = allocate(Some(&t), 2, Some(64)).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].cpus, (0..=47).collect::<Vec<_>>());
        assert_eq!(blocks[1].cpus, (48..=63).collect::<Vec<_>>());
        assert_eq!(blocks[1].group, Some(0));
        assert_disjoint_subset(&blocks, &t);
    }

    #[test]
    fn allocation_is_deterministic() {
        let t = topo(&[(0, 0..=31), (1, 32..=63), (2, 64..=95)]);
        let a = allocate(Some(&t), 5, Some(64)).unwrap();
        let b = allocate(Some(&t), 5, Some(64)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn every_block_nonempty_for_awkward_ratios() {
        for n in 1..=12u32 {
            let t = topo(&[(0, 0..=4), (1, 5..=11)]);
            let blocks = allocate(Some(&t), n, None).unwrap();
            assert_eq!(blocks.len(), (n as usize).min(12));
            assert_disjoint_subset(&blocks, &t);
        }
    }
}
