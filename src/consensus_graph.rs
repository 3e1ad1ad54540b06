/*!
Partial-order consensus graph built over a template.
Every read alignment is folded into the graph as a path from the enter node to the exit node, equivalent neighbors are merged in one topological sweep, and the consensus is the best scoring path.

# Example usage
```rust
use utgcns::consensus_graph::ConsensusGraph;
use utgcns::sequence_alignment::{GraphAlignment, GraphOp};
use utgcns::utgcns_config::ConsensusTrim;

let mut graph = ConsensusGraph::new(b"ACGT", None);
for _ in 0..2 {
    let alignment = GraphAlignment {
        template_start: 0,
        ops: vec![
            GraphOp::Match(b'A'), GraphOp::Match(b'C'),
            GraphOp::Insertion(b'T'),
            GraphOp::Match(b'G'), GraphOp::Match(b'T')
        ]
    };
    graph.add_alignment(&alignment).unwrap();
}
graph.merge_nodes().unwrap();

let consensus = graph.consensus(1, ConsensusTrim::NoSplit).unwrap();
assert_eq!(consensus.sequence(), b"ACTGT");
```
*/

use itertools::Itertools;
use log::{debug, trace};
use rustc_hash::FxHashMap as HashMap;
use simple_error::bail;
use std::collections::VecDeque;
use std::ops::Range;

use crate::errors::Result;
use crate::sequence_alignment::{GraphAlignment, GraphOp};
use crate::utgcns_config::ConsensusTrim;

/// Base stored on the enter sentinel
const ENTER_BASE: u8 = b'^';
/// Base stored on the exit sentinel
const EXIT_BASE: u8 = b'$';
/// Score charged for walking through a template node that no read supports
const UNSUPPORTED_PENALTY: i64 = 10;

/// A single base in the graph
#[derive(Clone, Debug)]
struct Node {
    /// The base for this node
    base: u8,
    /// Number of reads that placed this exact base here
    weight: u32,
    /// Number of reads spanning this template position, only tracked on template nodes
    coverage: u32,
    /// If true, this node was created from the template
    backbone: bool,
    /// The template node whose coverage applies to this node
    anchor: usize,
    /// Incoming edge ids
    in_edges: Vec<usize>,
    /// Outgoing edge ids
    out_edges: Vec<usize>
}

impl Node {
    fn new(base: u8, weight: u32, backbone: bool, anchor: usize) -> Node {
        Node {
            base,
            weight,
            coverage: 0,
            backbone,
            anchor,
            in_edges: vec![],
            out_edges: vec![]
        }
    }
}

/// A directed edge between two nodes
#[derive(Clone, Debug)]
struct Edge {
    source: usize,
    target: usize,
    /// Number of reads that traversed this edge
    count: u32,
    /// Sweep marker for `merge_nodes()`
    visited: bool
}

/// The result of `ConsensusGraph::consensus()`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphConsensus {
    /// The retained consensus bases
    sequence: Vec<u8>,
    /// Offset of the first retained base on the full best path
    trim_offset: usize,
    /// Number of bases on the full best path
    path_len: usize,
    /// For each template position, the index of its node on the full best path; entry `template_len` is `path_len`
    path_positions: Vec<Option<usize>>
}

impl GraphConsensus {
    /// Wraps a sequence that maps one-to-one onto the template
    pub fn identity(sequence: &[u8]) -> GraphConsensus {
        GraphConsensus {
            sequence: sequence.to_vec(),
            trim_offset: 0,
            path_len: sequence.len(),
            path_positions: (0..=sequence.len()).map(Some).collect()
        }
    }

    // getters
    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    pub fn trim_offset(&self) -> usize {
        self.trim_offset
    }

    pub fn path_len(&self) -> usize {
        self.path_len
    }

    pub fn path_positions(&self) -> &[Option<usize>] {
        &self.path_positions
    }

    pub fn template_len(&self) -> usize {
        self.path_positions.len().saturating_sub(1)
    }

    /// Maps each template position (plus the end position) onto the retained consensus.
    /// Positions on bases that were trimmed away or skipped by the best path are `None`.
    pub fn template_to_consensus(&self) -> Vec<Option<usize>> {
        let retained = self.trim_offset..(self.trim_offset + self.sequence.len());
        let end_retained = retained.end == self.path_len;
        let template_len = self.template_len();
        self.path_positions.iter()
            .enumerate()
            .map(|(template_pos, path_pos)| {
                let path_pos = (*path_pos)?;
                if retained.contains(&path_pos) || (template_pos == template_len && end_retained) {
                    Some(path_pos - self.trim_offset)
                } else {
                    None
                }
            })
            .collect()
    }
}

/// A retained run of the best path, see `ConsensusGraph::consensus_segments()`
#[derive(Clone, Debug, PartialEq)]
pub struct ConsensusSegment {
    /// Range on the full best path
    pub path_range: Range<usize>,
    /// The bases in the run
    pub sequence: Vec<u8>
}

/// Partial-order alignment graph over a template.
/// Nodes live in an arena addressed by index; merged nodes are only flagged and are removed by `reap_nodes()`.
#[derive(Clone, Debug)]
pub struct ConsensusGraph {
    /// Node arena
    nodes: Vec<Node>,
    /// Edge arena
    edges: Vec<Edge>,
    /// Nodes removed by merging
    deleted_nodes: Vec<bool>,
    /// Edges removed by merging
    deleted_edges: Vec<bool>,
    /// Node id of each template position
    template_nodes: Vec<usize>,
    /// Enter sentinel id
    enter: usize,
    /// Exit sentinel id
    exit: usize,
    /// Symbol on the template that reads may overwrite
    wildcard: Option<u8>,
    /// Number of alignments folded in so far
    num_alignments: usize
}

impl ConsensusGraph {
    /// Creates the backbone for a template.
    /// Template nodes start with no weight and the connecting edges with a count of zero.
    /// # Arguments
    /// * `template` - the template sequence
    /// * `wildcard` - template symbol that is replaced by the first read base matched against it
    pub fn new(template: &[u8], wildcard: Option<u8>) -> ConsensusGraph {
        let template_len = template.len();
        let exit = template_len + 1;

        let mut nodes = Vec::with_capacity(template_len * 2 + 2);
        nodes.push(Node::new(ENTER_BASE, 0, false, 0));
        for (i, &base) in template.iter().enumerate() {
            nodes.push(Node::new(base, 0, true, i + 1));
        }
        nodes.push(Node::new(EXIT_BASE, 0, false, exit));

        let mut graph = ConsensusGraph {
            deleted_nodes: vec![false; nodes.len()],
            nodes,
            edges: Vec::with_capacity(template_len * 2 + 1),
            deleted_edges: vec![],
            template_nodes: (1..=template_len).collect(),
            enter: 0,
            exit,
            wildcard,
            num_alignments: 0
        };

        for source in 0..exit {
            graph.create_edge(source, source + 1, 0);
        }
        graph
    }

    /// Folds one read alignment into the graph.
    /// # Arguments
    /// * `alignment` - the alignment of the read to the template
    /// # Errors
    /// * if the alignment runs past the end of the template
    pub fn add_alignment(&mut self, alignment: &GraphAlignment) -> Result<()> {
        let template_len = self.template_len();
        if alignment.template_end() > template_len {
            bail!("Alignment covers template {}..{}, but the template has length {}", alignment.template_start, alignment.template_end(), template_len);
        }

        let mut previous = self.enter;
        let mut cursor = alignment.template_start + 1;
        for &op in alignment.ops.iter() {
            match op {
                GraphOp::Match(base) => {
                    let node = &mut self.nodes[cursor];
                    node.coverage += 1;
                    node.weight += 1;
                    if self.wildcard == Some(node.base) && Some(base) != self.wildcard {
                        node.base = base;
                    }
                    self.add_edge(previous, cursor);
                    previous = cursor;
                    cursor += 1;
                },
                GraphOp::Deletion => {
                    self.nodes[cursor].coverage += 1;
                    cursor += 1;
                },
                GraphOp::Insertion(base) => {
                    let node = self.add_node(Node::new(base, 1, false, cursor));
                    self.add_edge(previous, node);
                    previous = node;
                }
            }
        }
        self.add_edge(previous, self.exit);
        self.num_alignments += 1;
        Ok(())
    }

    /// Merges equivalent nodes in a single topological sweep from the enter node.
    /// At each node, predecessors with a single out-edge (and successors with a single in-edge) that carry the same base are collapsed into one.
    /// # Errors
    /// * if the sweep reaches a deleted node
    pub fn merge_nodes(&mut self) -> Result<()> {
        let mut queue = VecDeque::from([self.enter]);
        let mut merged = 0;
        while let Some(node) = queue.pop_front() {
            if self.deleted_nodes[node] {
                bail!("Merge sweep reached deleted node {}", node);
            }
            merged += self.merge_in_nodes(node);
            merged += self.merge_out_nodes(node);

            let out_edges = self.nodes[node].out_edges.clone();
            for edge_id in out_edges {
                self.edges[edge_id].visited = true;
                let target = self.edges[edge_id].target;
                let ready = self.nodes[target].in_edges.iter()
                    .all(|&e| self.edges[e].visited);
                if ready {
                    queue.push_back(target);
                }
            }
        }
        debug!("merge_nodes: merged {merged} nodes");
        Ok(())
    }

    /// Collapses same-base predecessors of `node`, and then the predecessors of each survivor.
    /// Returns the number of nodes that were removed.
    fn merge_in_nodes(&mut self, node: usize) -> usize {
        let mut merged = 0;
        let mut pending = vec![node];
        while let Some(current) = pending.pop() {
            let candidates = self.nodes[current].in_edges.iter()
                .map(|&e| self.edges[e].source)
                .filter(|&n| n != self.enter && self.nodes[n].out_edges.len() == 1);
            for group in self.group_by_base(candidates) {
                let survivor = self.pick_survivor(&group);
                for &other in group.iter().filter(|&&n| n != survivor) {
                    // the single out-edge of each node goes to `current`
                    let surviving_edge = self.nodes[survivor].out_edges[0];
                    let other_edge = self.nodes[other].out_edges[0];
                    self.edges[surviving_edge].count += self.edges[other_edge].count;
                    self.nodes[survivor].weight += self.nodes[other].weight;

                    let relinked = self.nodes[other].in_edges.clone();
                    for edge_id in relinked {
                        let Edge { source, count, visited, .. } = self.edges[edge_id];
                        let new_edge = self.link(source, survivor, count);
                        self.edges[new_edge].visited |= visited;
                    }
                    self.delete_node(other);
                    merged += 1;
                }
                trace!("merge_in_nodes: {} nodes into {survivor}", group.len());
                pending.push(survivor);
            }
        }
        merged
    }

    /// Collapses same-base successors of `node`, and then the successors of each survivor.
    /// Returns the number of nodes that were removed.
    fn merge_out_nodes(&mut self, node: usize) -> usize {
        let mut merged = 0;
        let mut pending = vec![node];
        while let Some(current) = pending.pop() {
            let candidates = self.nodes[current].out_edges.iter()
                .map(|&e| self.edges[e].target)
                .filter(|&n| n != self.exit && self.nodes[n].in_edges.len() == 1);
            for group in self.group_by_base(candidates) {
                let survivor = self.pick_survivor(&group);
                for &other in group.iter().filter(|&&n| n != survivor) {
                    // the single in-edge of each node comes from `current`
                    let surviving_edge = self.nodes[survivor].in_edges[0];
                    let other_edge = self.nodes[other].in_edges[0];
                    self.edges[surviving_edge].count += self.edges[other_edge].count;
                    self.nodes[survivor].weight += self.nodes[other].weight;

                    let relinked = self.nodes[other].out_edges.clone();
                    for edge_id in relinked {
                        let Edge { target, count, visited, .. } = self.edges[edge_id];
                        let new_edge = self.link(survivor, target, count);
                        self.edges[new_edge].visited |= visited;
                    }
                    self.delete_node(other);
                    merged += 1;
                }
                trace!("merge_out_nodes: {} nodes into {survivor}", group.len());
                pending.push(survivor);
            }
        }
        merged
    }

    /// Groups node ids by base, only returning groups with more than one node.
    /// Groups come back in base order and nodes keep their adjacency order.
    fn group_by_base(&self, candidates: impl Iterator<Item = usize>) -> Vec<Vec<usize>> {
        let mut groups: HashMap<u8, Vec<usize>> = Default::default();
        for node in candidates {
            groups.entry(self.nodes[node].base).or_default().push(node);
        }
        groups.into_iter()
            .filter(|(_, group)| group.len() > 1)
            .sorted_by_key(|(base, _)| *base)
            .map(|(_, group)| group)
            .collect()
    }

    /// A template node always survives a merge so template positions stay addressable; otherwise, the first node does.
    fn pick_survivor(&self, group: &[usize]) -> usize {
        group.iter()
            .copied()
            .find(|&n| self.nodes[n].backbone)
            .unwrap_or(group[0])
    }

    /// Compacts the arena, dropping every deleted node and edge.
    /// Node ids are re-assigned, preserving their relative order.
    pub fn reap_nodes(&mut self) {
        let mut node_map = vec![usize::MAX; self.nodes.len()];
        let mut next_id = 0;
        for (old_id, deleted) in self.deleted_nodes.iter().enumerate() {
            if !deleted {
                node_map[old_id] = next_id;
                next_id += 1;
            }
        }

        let mut edge_map = vec![usize::MAX; self.edges.len()];
        let mut next_id = 0;
        for (old_id, deleted) in self.deleted_edges.iter().enumerate() {
            if !deleted {
                edge_map[old_id] = next_id;
                next_id += 1;
            }
        }

        let reaped = self.deleted_nodes.iter().filter(|&&d| d).count();
        let old_nodes = std::mem::take(&mut self.nodes);
        self.nodes = old_nodes.into_iter()
            .zip(self.deleted_nodes.iter())
            .filter(|(_, &deleted)| !deleted)
            .map(|(mut node, _)| {
                node.anchor = node_map[node.anchor];
                node.in_edges.iter_mut().for_each(|e| *e = edge_map[*e]);
                node.out_edges.iter_mut().for_each(|e| *e = edge_map[*e]);
                node
            })
            .collect();

        let old_edges = std::mem::take(&mut self.edges);
        self.edges = old_edges.into_iter()
            .zip(self.deleted_edges.iter())
            .filter(|(_, &deleted)| !deleted)
            .map(|(mut edge, _)| {
                edge.source = node_map[edge.source];
                edge.target = node_map[edge.target];
                edge
            })
            .collect();

        self.template_nodes.iter_mut().for_each(|n| *n = node_map[*n]);
        self.enter = node_map[self.enter];
        self.exit = node_map[self.exit];
        self.deleted_nodes = vec![false; self.nodes.len()];
        self.deleted_edges = vec![false; self.edges.len()];
        debug!("reap_nodes: removed {reaped} nodes, {} remain", self.nodes.len());
    }

    /// Returns the live nodes (other than the sentinels) that are missing an in-edge or an out-edge.
    pub fn dangling_nodes(&self) -> Vec<usize> {
        self.live_nodes()
            .filter(|&n| n != self.enter && n != self.exit)
            .filter(|&n| self.nodes[n].in_edges.is_empty() || self.nodes[n].out_edges.is_empty())
            .collect()
    }

    /// Computes the best scoring path from the enter node to the exit node.
    /// Returns the node ids on the path, without the sentinels.
    /// # Errors
    /// * if some node cannot reach the exit node
    pub fn best_path(&self) -> Result<Vec<usize>> {
        let num_nodes = self.nodes.len();
        let mut scores: Vec<i64> = vec![0; num_nodes];
        let mut best_edge: Vec<Option<usize>> = vec![None; num_nodes];
        let mut pending_out: Vec<usize> = self.nodes.iter().map(|n| n.out_edges.len()).collect();

        // scores are kept in half units: an edge is worth `2 * count - coverage`
        // reverse topological order from the exit node
        let mut queue = VecDeque::from([self.exit]);
        let mut processed = 0;
        while let Some(node) = queue.pop_front() {
            processed += 1;
            let mut best: Option<(i64, usize)> = None;
            for &edge_id in self.nodes[node].out_edges.iter() {
                let edge = &self.edges[edge_id];
                let target = &self.nodes[edge.target];
                let score = if target.backbone && target.weight == 0 {
                    scores[edge.target] - 2 * UNSUPPORTED_PENALTY
                } else {
                    let coverage = self.nodes[target.anchor].coverage as i64;
                    2 * edge.count as i64 - coverage + scores[edge.target]
                };
                if best.map_or(true, |(best_score, _)| score > best_score) {
                    best = Some((score, edge_id));
                }
            }
            if let Some((score, edge_id)) = best {
                scores[node] = score;
                best_edge[node] = Some(edge_id);
            }

            for &edge_id in self.nodes[node].in_edges.iter() {
                let source = self.edges[edge_id].source;
                pending_out[source] -= 1;
                if pending_out[source] == 0 {
                    queue.push_back(source);
                }
            }
        }

        let live = self.live_nodes().count();
        if processed != live {
            bail!("Best path only reached {} of {} nodes", processed, live);
        }

        let mut path = vec![];
        let mut current = self.enter;
        while current != self.exit {
            let Some(edge_id) = best_edge[current] else {
                bail!("Node {} has no path to the exit", current);
            };
            current = self.edges[edge_id].target;
            if current != self.exit {
                path.push(current);
            }
        }
        trace!("best_path: {} nodes, score {}", path.len(), scores[self.enter]);
        Ok(path)
    }

    /// Extracts the consensus from the best path.
    /// # Arguments
    /// * `min_weight` - nodes below this weight are trimmed according to `trim`
    /// * `trim` - `NoSplit` trims the low-weight ends, `LongestRun` keeps the longest run of nodes at or above `min_weight`
    /// # Errors
    /// * if the best path cannot be computed
    pub fn consensus(&self, min_weight: u32, trim: ConsensusTrim) -> Result<GraphConsensus> {
        let path = self.best_path()?;

        let mut path_index: HashMap<usize, usize> = Default::default();
        path_index.reserve(path.len());
        for (i, &node) in path.iter().enumerate() {
            path_index.insert(node, i);
        }
        let mut path_positions: Vec<Option<usize>> = self.template_nodes.iter()
            .map(|n| path_index.get(n).copied())
            .collect();
        path_positions.push(Some(path.len()));

        let retained = match trim {
            ConsensusTrim::NoSplit => {
                let first = path.iter().position(|&n| self.nodes[n].weight >= min_weight);
                let last = path.iter().rposition(|&n| self.nodes[n].weight >= min_weight);
                match (first, last) {
                    (Some(first), Some(last)) => first..(last + 1),
                    _ => 0..0
                }
            },
            ConsensusTrim::LongestRun => {
                self.weighted_runs(&path, min_weight)
                    .into_iter()
                    .fold(0..0, |best, run| if run.len() > best.len() { run } else { best })
            }
        };

        let sequence: Vec<u8> = path[retained.clone()].iter()
            .map(|&n| self.nodes[n].base)
            .collect();
        debug!("consensus: path of {} bases, retained {}..{}", path.len(), retained.start, retained.end);

        Ok(GraphConsensus {
            sequence,
            trim_offset: retained.start,
            path_len: path.len(),
            path_positions
        })
    }

    /// Splits the best path into every maximal run of nodes with `weight >= min_weight` that is at least `min_len` bases long.
    /// # Errors
    /// * if the best path cannot be computed
    pub fn consensus_segments(&self, min_weight: u32, min_len: usize) -> Result<Vec<ConsensusSegment>> {
        let path = self.best_path()?;
        Ok(self.weighted_runs(&path, min_weight)
            .into_iter()
            .filter(|run| run.len() >= min_len)
            .map(|run| ConsensusSegment {
                sequence: path[run.clone()].iter().map(|&n| self.nodes[n].base).collect(),
                path_range: run
            })
            .collect())
    }

    /// Maximal runs of path indices whose nodes meet `min_weight`
    fn weighted_runs(&self, path: &[usize], min_weight: u32) -> Vec<Range<usize>> {
        let mut runs = vec![];
        let mut start = None;
        for (i, &node) in path.iter().enumerate() {
            let passes = self.nodes[node].weight >= min_weight;
            match (passes, start) {
                (true, None) => start = Some(i),
                (false, Some(s)) => {
                    runs.push(s..i);
                    start = None;
                },
                _ => {}
            }
        }
        if let Some(s) = start {
            runs.push(s..path.len());
        }
        runs
    }

    // getters
    pub fn template_len(&self) -> usize {
        self.template_nodes.len()
    }

    pub fn num_alignments(&self) -> usize {
        self.num_alignments
    }

    /// Number of nodes that have not been merged away, including the two sentinels
    pub fn num_live_nodes(&self) -> usize {
        self.live_nodes().count()
    }

    /// Total weight over all live nodes
    pub fn total_weight(&self) -> u64 {
        self.live_nodes().map(|n| self.nodes[n].weight as u64).sum()
    }

    /// Base of template position `template_pos`
    pub fn template_base(&self, template_pos: usize) -> u8 {
        self.nodes[self.template_nodes[template_pos]].base
    }

    fn live_nodes(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len()).filter(|&n| !self.deleted_nodes[n])
    }

    fn add_node(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.deleted_nodes.push(false);
        self.nodes.len() - 1
    }

    /// Adds a read traversal of `source -> target`
    fn add_edge(&mut self, source: usize, target: usize) {
        self.link(source, target, 1);
    }

    /// Adds `count` to the edge `source -> target`, creating it if needed; returns the edge id
    fn link(&mut self, source: usize, target: usize, count: u32) -> usize {
        let existing = self.nodes[source].out_edges.iter()
            .copied()
            .find(|&e| self.edges[e].target == target);
        match existing {
            Some(edge_id) => {
                self.edges[edge_id].count += count;
                edge_id
            },
            None => self.create_edge(source, target, count)
        }
    }

    fn create_edge(&mut self, source: usize, target: usize, count: u32) -> usize {
        let edge_id = self.edges.len();
        self.edges.push(Edge {
            source,
            target,
            count,
            visited: false
        });
        self.deleted_edges.push(false);
        self.nodes[source].out_edges.push(edge_id);
        self.nodes[target].in_edges.push(edge_id);
        edge_id
    }

    /// Flags a node as deleted and detaches all of its edges
    fn delete_node(&mut self, node: usize) {
        let in_edges = std::mem::take(&mut self.nodes[node].in_edges);
        let out_edges = std::mem::take(&mut self.nodes[node].out_edges);
        for edge_id in in_edges {
            let source = self.edges[edge_id].source;
            self.nodes[source].out_edges.retain(|&e| e != edge_id);
            self.deleted_edges[edge_id] = true;
        }
        for edge_id in out_edges {
            let target = self.edges[edge_id].target;
            self.nodes[target].in_edges.retain(|&e| e != edge_id);
            self.deleted_edges[edge_id] = true;
        }
        self.deleted_nodes[node] = true;
    }
}
