/*!
# utgcns
This library provides the consensus-calling core of a shotgun assembler: given the reads laid out against one unitig, it produces a consensus sequence and a final placement for every read.

The pipeline for a unitig:
* Stitch the reads into a draft template with banded alignments of each read against the template tail
* Align every read to the finished template, escalating the window and error rate on failure (in parallel)
* Fold the alignments into a partial-order graph, merge redundant branches, and read the consensus off the best path
* Translate every read placement from template coordinates into consensus coordinates

Performance notes:
* Alignments are banded, so runtime scales with read length times the allowed error
* The graph is an index-based arena; merged nodes are compacted in a single pass at the end

# Example usage
```rust
use utgcns::read_layout::ReadLayout;
use utgcns::unitig_consensus::UnitigConsensus;
use utgcns::utgcns_config::UtgcnsConfig;

// three reads tiling a 24 bp unitig
let genome = b"ACGTTGCAAGGCTTAACCGGTATC";
let mut unitig = UnitigConsensus::with_config(UtgcnsConfig::default()).unwrap();
unitig.add_read(&ReadLayout::new(0, &genome[0..12], 0, 12)).unwrap();
unitig.add_read(&ReadLayout::new(1, &genome[6..18], 6, 18)).unwrap();
unitig.add_read(&ReadLayout::new(2, &genome[12..24], 12, 24)).unwrap();

let result = unitig.generate().unwrap();
assert_eq!(result.sequence(), genome);
assert_eq!(result.unplaced_count(), 0);
assert_eq!(result.placements()[1].final_position, Some(6..18));
```
*/

/// Banded semi-global aligner used for stitching and read placement
pub mod banded_aligner;
/// Partial-order consensus graph
pub mod consensus_graph;
/// Error types
pub mod errors;
/// Utility for generating simulated unitigs
pub mod example_gen;
/// Translation of template coordinates into consensus coordinates
pub mod position_mapper;
/// Final alignment of reads to the template
pub mod read_aligner;
/// Read layout and placement data model
pub mod read_layout;
/// Basic alignment types and sequence utilities
pub mod sequence_alignment;
/// Greedy construction of the draft template
pub mod template_builder;
/// Main functionality for computing the consensus of a unitig
pub mod unitig_consensus;
/// Configuration for unitig consensus
pub mod utgcns_config;
