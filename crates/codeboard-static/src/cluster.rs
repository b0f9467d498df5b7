use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use codeboard_core::normalize_path;

use crate::graph::CallGraph;

/// Fixed seed so two runs over the same call graph give identical partitions.
pub const CLUSTERING_SEED: u64 = 42;

pub const DEFAULT_TARGET_CLUSTERS: usize = 20;
pub const DEFAULT_MIN_CLUSTER_SIZE: usize = 2;

/// Quality gates for a usable partition.
pub const MIN_COVERAGE_RATIO: f64 = 0.75;
pub const MAX_SINGLETON_RATIO: f64 = 0.6;

/// Largest-cluster bounds relative to graph size.
pub const SMALL_GRAPH_MAX_CLUSTER_RATIO: f64 = 0.6;
pub const LARGE_GRAPH_MAX_CLUSTER_RATIO: f64 = 0.4;
pub const SMALL_GRAPH_THRESHOLD: usize = 50;

/// Merging stops once a cluster reaches `min_size * 3`; splitting kicks in
/// past `(total / target) * 3`, never below 10.
pub const MIN_CLUSTER_SIZE_MULTIPLIER: usize = 3;
pub const MAX_CLUSTER_SIZE_MULTIPLIER: usize = 3;
pub const MIN_MAX_CLUSTER_SIZE: usize = 10;

/// A deterministic partition of call-graph nodes into component-sized groups,
/// with constant-time file lookups in both directions.
#[derive(Debug, Clone, Default)]
pub struct ClusterResult {
    pub clusters: BTreeMap<usize, BTreeSet<String>>,
    pub file_to_clusters: HashMap<String, BTreeSet<usize>>,
    pub cluster_to_files: BTreeMap<usize, BTreeSet<String>>,
    pub strategy: String,
}

impl ClusterResult {
    pub fn cluster_ids(&self) -> Vec<usize> {
        self.clusters.keys().copied().collect()
    }

    pub fn clusters_for_file(&self, file: &str) -> BTreeSet<usize> {
        self.file_to_clusters
            .get(&normalize_path(file))
            .cloned()
            .unwrap_or_default()
    }

    pub fn files_for_cluster(&self, cluster_id: usize) -> BTreeSet<String> {
        self.cluster_to_files
            .get(&cluster_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Fraction of nodes that belong to clusters with more than one member.
    pub fn coverage_ratio(&self) -> f64 {
        let total: usize = self.clusters.values().map(BTreeSet::len).sum();
        if total == 0 {
            return 0.0;
        }
        let covered: usize = self
            .clusters
            .values()
            .filter(|members| members.len() > 1)
            .map(BTreeSet::len)
            .sum();
        covered as f64 / total as f64
    }

    fn from_groups(graph: &CallGraph, groups: Vec<BTreeSet<String>>, strategy: &str) -> Self {
        // Dense ids, assigned in order of each group's smallest member.
        let mut ordered = groups;
        ordered.sort_by(|a, b| a.iter().next().cmp(&b.iter().next()));

        let mut result = ClusterResult {
            strategy: strategy.to_string(),
            ..Default::default()
        };
        for (id, members) in ordered.into_iter().enumerate() {
            for name in &members {
                if let Some(node) = graph.node(name) {
                    let file = normalize_path(&node.file_path);
                    result
                        .file_to_clusters
                        .entry(file.clone())
                        .or_default()
                        .insert(id);
                    result.cluster_to_files.entry(id).or_default().insert(file);
                }
            }
            result.clusters.insert(id, members);
        }
        result
    }
}

impl CallGraph {
    /// Partition the graph with the default target and minimum cluster size.
    pub fn cluster(&self) -> ClusterResult {
        self.cluster_with(DEFAULT_TARGET_CLUSTERS, DEFAULT_MIN_CLUSTER_SIZE)
    }

    /// Deterministic partition: same graph, same parameters, same clusters.
    pub fn cluster_with(&self, target_clusters: usize, min_size: usize) -> ClusterResult {
        let groups = partition(self, target_clusters.max(1), min_size.max(1), true);
        ClusterResult::from_groups(self, groups, "seeded_balanced")
    }
}

/// Seed-dependent total order over node names, used for traversal tie-breaks.
fn seeded_key(seed: u64, name: &str) -> u64 {
    let mut hash = seed ^ 0xcbf2_9ce4_8422_2325;
    for byte in name.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

fn split_bound(total: usize, target: usize) -> usize {
    let by_target = ((total / target) * MAX_CLUSTER_SIZE_MULTIPLIER).max(MIN_MAX_CLUSTER_SIZE);
    let ratio = if total <= SMALL_GRAPH_THRESHOLD {
        SMALL_GRAPH_MAX_CLUSTER_RATIO
    } else {
        LARGE_GRAPH_MAX_CLUSTER_RATIO
    };
    let by_balance = ((total as f64 * ratio).floor() as usize).max(2);
    by_target.min(by_balance)
}

fn partition(
    graph: &CallGraph,
    target: usize,
    min_size: usize,
    allow_retry: bool,
) -> Vec<BTreeSet<String>> {
    let mut names: Vec<String> = graph.nodes().map(|n| n.qualified_name.clone()).collect();
    names.sort();
    let total = names.len();
    if total == 0 {
        return Vec::new();
    }

    let mut adjacency: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for (src, dst) in graph.edges() {
        if src != dst {
            adjacency.entry(src).or_default().insert(dst);
            adjacency.entry(dst).or_default().insert(src);
        }
    }

    let components = connected_components(&names, &adjacency);
    let max_size = split_bound(total, target);

    let mut groups: Vec<BTreeSet<String>> = Vec::new();
    for component in components {
        if component.len() <= max_size {
            groups.push(component);
        } else {
            groups.extend(split_component(&component, &adjacency, max_size));
        }
    }

    merge_undersized(&mut groups, &adjacency, min_size, max_size);

    let singleton_count = groups.iter().filter(|g| g.len() == 1).count();
    let singleton_ratio = singleton_count as f64 / groups.len() as f64;
    if allow_retry && singleton_ratio > MAX_SINGLETON_RATIO && target > 1 {
        debug!(
            singleton_ratio,
            target, "singleton ratio too high, retrying with a smaller cluster target"
        );
        return partition(graph, (target / 2).max(1), min_size, false);
    }

    groups
}

fn connected_components(
    names: &[String],
    adjacency: &HashMap<&str, BTreeSet<&str>>,
) -> Vec<BTreeSet<String>> {
    let mut visited: BTreeSet<&str> = BTreeSet::new();
    let mut components = Vec::new();
    for name in names {
        if visited.contains(name.as_str()) {
            continue;
        }
        let mut component = BTreeSet::new();
        let mut queue = vec![name.as_str()];
        while let Some(current) = queue.pop() {
            if !visited.insert(current) {
                continue;
            }
            component.insert(current.to_string());
            if let Some(neighbors) = adjacency.get(current) {
                queue.extend(neighbors.iter().copied());
            }
        }
        components.push(component);
    }
    components
}

/// Break an oversized component into chunks of at most `max_size` nodes by
/// walking it breadth-first in seeded order, so call-adjacent nodes tend to
/// land in the same chunk.
fn split_component(
    component: &BTreeSet<String>,
    adjacency: &HashMap<&str, BTreeSet<&str>>,
    max_size: usize,
) -> Vec<BTreeSet<String>> {
    let mut order: Vec<&str> = Vec::with_capacity(component.len());
    let mut visited: BTreeSet<&str> = BTreeSet::new();

    let mut seeds: Vec<&str> = component.iter().map(String::as_str).collect();
    seeds.sort_by_key(|name| seeded_key(CLUSTERING_SEED, name));

    for seed in seeds {
        if visited.contains(seed) {
            continue;
        }
        let mut queue = std::collections::VecDeque::from([seed]);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            order.push(current);
            if let Some(neighbors) = adjacency.get(current) {
                let mut next: Vec<&str> = neighbors
                    .iter()
                    .copied()
                    .filter(|n| component.contains(*n) && !visited.contains(n))
                    .collect();
                next.sort_by_key(|name| seeded_key(CLUSTERING_SEED, name));
                queue.extend(next);
            }
        }
    }

    order
        .chunks(max_size)
        .map(|chunk| chunk.iter().map(|s| s.to_string()).collect())
        .collect()
}

/// Fold clusters below `min_size` into the neighbor they share the most edges
/// with. Merge targets below `min_size * 3` are preferred; a larger connected
/// target is still accepted while it stays under `max_size`. Whatever remains
/// unconnected is coalesced into shared leftover groups so coverage holds.
fn merge_undersized(
    groups: &mut Vec<BTreeSet<String>>,
    adjacency: &HashMap<&str, BTreeSet<&str>>,
    min_size: usize,
    max_size: usize,
) {
    let merge_cap = min_size * MIN_CLUSTER_SIZE_MULTIPLIER;
    let mut slots: Vec<Option<BTreeSet<String>>> = std::mem::take(groups).into_iter().map(Some).collect();

    loop {
        let mut candidates: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.as_ref().is_some_and(|g| g.len() < min_size))
            .map(|(i, _)| i)
            .collect();
        candidates.sort_by(|&a, &b| {
            let first = |i: usize| slots[i].as_ref().and_then(|g| g.iter().next());
            first(a).cmp(&first(b))
        });

        let mut merged = false;
        for small_idx in candidates {
            let small = slots[small_idx].clone().unwrap_or_default();
            let mut best: Option<(bool, usize, usize)> = None; // (under cap, edges, index)
            for (idx, slot) in slots.iter().enumerate() {
                let Some(group) = slot else { continue };
                if idx == small_idx || small.len() + group.len() > max_size {
                    continue;
                }
                let edge_count: usize = small
                    .iter()
                    .filter_map(|name| adjacency.get(name.as_str()))
                    .map(|neighbors| neighbors.iter().filter(|n| group.contains(**n)).count())
                    .sum();
                if edge_count == 0 {
                    continue;
                }
                let rank = (group.len() < merge_cap, edge_count, idx);
                if best.is_none_or(|b| (rank.0, rank.1) > (b.0, b.1)) {
                    best = Some(rank);
                }
            }
            if let Some((_, _, target_idx)) = best {
                let members = slots[small_idx].take().unwrap_or_default();
                if let Some(target) = slots[target_idx].as_mut() {
                    target.extend(members);
                }
                merged = true;
                break;
            }
        }
        if !merged {
            break;
        }
    }

    // Coalesce whatever stayed undersized (no edges to any cluster) into
    // shared leftover pools so the coverage gate still holds.
    let mut remaining: Vec<BTreeSet<String>> = Vec::new();
    let mut leftovers: Vec<BTreeSet<String>> = Vec::new();
    for slot in slots.into_iter().flatten() {
        if slot.len() < min_size {
            leftovers.push(slot);
        } else {
            remaining.push(slot);
        }
    }
    leftovers.sort_by(|a, b| a.iter().next().cmp(&b.iter().next()));
    let mut pooled: Vec<BTreeSet<String>> = Vec::new();
    for members in leftovers {
        match pooled.last_mut() {
            Some(pool) if pool.len() + members.len() <= merge_cap => pool.extend(members),
            _ => pooled.push(members),
        }
    }
    remaining.extend(pooled);
    *groups = remaining;
}
