/*!
This module provides access to `UnitigConsensus`, which turns the reads of one unitig into a consensus sequence and a final placement for every read.

# Example usage
```rust
use utgcns::read_layout::ReadLayout;
use utgcns::unitig_consensus::UnitigConsensus;
use utgcns::utgcns_config::UtgcnsConfigBuilder;

let config = UtgcnsConfigBuilder::default()
    .error_rate_max(0.2)
    .build().unwrap();

// two reads that differ by a single mismatch
let mut unitig = UnitigConsensus::with_config(config).unwrap();
unitig.add_read(&ReadLayout::new(1, b"ACGTACGT", 0, 8)).unwrap();
unitig.add_read(&ReadLayout::new(2, b"ACGTTCGT", 0, 8)).unwrap();

let result = unitig.generate().unwrap();
assert_eq!(result.sequence(), b"ACGTACGT");
for placement in result.placements().iter() {
    assert_eq!(placement.final_position, Some(0..8));
}
```
*/

use log::{debug, warn};
use itertools::Itertools;
use std::ops::Range;

use crate::consensus_graph::{ConsensusGraph, GraphConsensus};
use crate::errors::{Result, UtgcnsError};
use crate::position_mapper::PositionMapper;
use crate::read_aligner::{ReadAligner, ReadAlignment};
use crate::read_layout::{PlacementStatus, Read, ReadLayout, ReadPlacement};
use crate::template_builder::{StitchStats, TemplateBuilder};
use crate::utgcns_config::{ConsensusAlgorithm, UtgcnsConfig};

/// Contains the final result for a unitig
#[derive(Clone, Debug, Default)]
pub struct UnitigResult {
    /// The consensus sequence
    sequence: Vec<u8>,
    /// The stitched template the reads were aligned to
    template: Vec<u8>,
    /// One placement per read, in the order the reads were added
    placements: Vec<ReadPlacement>,
    /// For each template position, the consensus position if it was retained
    template_to_consensus: Vec<Option<usize>>,
    /// Counters from template construction
    stitch_stats: StitchStats
}

impl UnitigResult {
    // Getters
    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    pub fn template(&self) -> &[u8] {
        &self.template
    }

    pub fn placements(&self) -> &[ReadPlacement] {
        &self.placements
    }

    pub fn template_to_consensus(&self) -> &[Option<usize>] {
        &self.template_to_consensus
    }

    pub fn stitch_stats(&self) -> StitchStats {
        self.stitch_stats
    }

    /// Number of reads without a final position
    pub fn unplaced_count(&self) -> usize {
        self.placements.iter().filter(|p| !p.is_placed()).count()
    }
}

/// Computes the consensus of a single unitig.
/// Reads are borrowed from the caller for the lifetime of the computation.
#[derive(Debug)]
pub struct UnitigConsensus<'a> {
    /// The reads added so far, oriented along the unitig
    reads: Vec<Read<'a>>,
    /// The config for this consensus run
    config: UtgcnsConfig
}

impl<'a> UnitigConsensus<'a> {
    /// Creates a new instance of UnitigConsensus and performs sanity checks.
    /// # Arguments
    /// * `config` - the consensus parameters
    /// # Errors
    /// * `InvalidConfig` if the config fails validation
    pub fn with_config(config: UtgcnsConfig) -> Result<UnitigConsensus<'a>> {
        config.validate()?;
        Ok(UnitigConsensus {
            reads: vec![],
            config
        })
    }

    /// Adds a read from the unitig layout.
    /// # Arguments
    /// * `layout` - the layout entry for the read
    /// # Errors
    /// * `InvalidRead` if the read violates the input contract
    pub fn add_read(&mut self, layout: &ReadLayout<'a>) -> Result<()> {
        let read = Read::from_layout(layout)?;
        self.reads.push(read);
        Ok(())
    }

    /// The core function that gets called after adding all the reads of the unitig.
    /// Reads that fail to stitch, align, or map are reported through their placement.
    /// # Errors
    /// * `EmptyInput` if there are no reads, or every read is ignored
    /// * if the worker pool cannot be created, or the consensus graph is inconsistent
    pub fn generate(&self) -> Result<UnitigResult> {
        if self.reads.is_empty() {
            return Err(UtgcnsError::EmptyInput);
        }

        let template = TemplateBuilder::new(&self.config).build(&self.reads)?;
        let mut placements: Vec<ReadPlacement> = self.reads.iter()
            .zip(template.extension_failed().iter())
            .map(|(read, &extension_failed)| {
                let mut placement = ReadPlacement::new(read.ident(), read.layout().clone());
                placement.extension_failed = extension_failed;
                placement
            })
            .collect();

        let (consensus, spans) = match self.config.algorithm {
            ConsensusAlgorithm::Quick => {
                let spans: Vec<Option<Range<usize>>> = template.windows().iter()
                    .cloned()
                    .map(Some)
                    .collect();
                (GraphConsensus::identity(template.sequence()), spans)
            },
            ConsensusAlgorithm::Pbdag => {
                let alignments = ReadAligner::new(&self.config).align_all(template.sequence(), &self.reads, template.windows())?;
                let usable = self.reads.iter().filter(|r| !r.is_ignored()).count();
                let consensus = if usable == 1 {
                    debug!("Single usable read, using it as the consensus");
                    GraphConsensus::identity(template.sequence())
                } else {
                    self.graph_consensus(template.sequence(), &alignments)?
                };

                let spans: Vec<Option<Range<usize>>> = alignments.iter()
                    .map(|alignment| match alignment {
                        Ok(a) => Some(a.template_span()),
                        Err(e) => {
                            warn!("{e}");
                            None
                        }
                    })
                    .collect();
                (consensus, spans)
            }
        };

        let mapper = PositionMapper::new(&consensus);
        for (placement, span) in placements.iter_mut().zip(spans.into_iter()) {
            let Some(span) = span else {
                continue;
            };
            match mapper.adjust_position(&span) {
                Ok(final_position) => {
                    placement.final_position = Some(final_position);
                    placement.status = PlacementStatus::Placed;
                },
                Err(e) => {
                    warn!("Read {}: {e}", placement.ident);
                    placement.status = PlacementStatus::Unmappable;
                }
            }
            placement.template = Some(span);
        }

        let result = UnitigResult {
            sequence: consensus.sequence().to_vec(),
            template: template.sequence().to_vec(),
            template_to_consensus: consensus.template_to_consensus(),
            stitch_stats: template.stats(),
            placements
        };
        debug!(
            "Unitig consensus of {} bp from a {} bp template, {} of {} reads placed",
            result.sequence.len(), result.template.len(), self.reads.len() - result.unplaced_count(), self.reads.len()
        );
        Ok(result)
    }

    /// Folds the aligned, non-ignored reads into a graph in layout order and calls the consensus.
    /// Falls back to the template if the graph consensus comes back empty.
    fn graph_consensus(&self, template: &[u8], alignments: &[Result<ReadAlignment>]) -> Result<GraphConsensus> {
        let mut graph = ConsensusGraph::new(template, self.config.wildcard);
        let layout_order = (0..self.reads.len())
            .sorted_by_key(|&i| self.reads[i].layout().start);
        for i in layout_order {
            if self.reads[i].is_ignored() {
                continue;
            }
            if let Ok(aligned) = &alignments[i] {
                graph.add_alignment(&aligned.graph_alignment)?;
            }
        }

        graph.merge_nodes()?;
        if self.config.reap_nodes {
            graph.reap_nodes();
        }

        let consensus = graph.consensus(self.config.min_coverage, self.config.consensus_trim)?;
        if consensus.sequence().is_empty() {
            warn!("Graph consensus from {} alignments is empty, using the template", graph.num_alignments());
            Ok(GraphConsensus::identity(template))
        } else {
            Ok(consensus)
        }
    }
}
