use std::ops::Range;

use crate::consensus_graph::GraphConsensus;
use crate::errors::{Result, UtgcnsError};

/// Translates template spans into spans on the trimmed consensus.
pub struct PositionMapper<'a> {
    consensus: &'a GraphConsensus
}

impl<'a> PositionMapper<'a> {
    pub fn new(consensus: &'a GraphConsensus) -> PositionMapper<'a> {
        PositionMapper {
            consensus
        }
    }

    /// Maps a half-open template span onto the consensus.
    /// Template positions without a consensus position are resolved by scanning outward, down for the start and up for the end.
    /// The result always satisfies `0 <= start <= end <= consensus length`.
    /// # Errors
    /// * `UnmappablePosition` if the span starts at or past the end of the template
    pub fn adjust_position(&self, span: &Range<usize>) -> Result<Range<usize>> {
        let template_len = self.consensus.template_len();
        if span.start >= template_len {
            return Err(UtgcnsError::UnmappablePosition {
                min: span.start,
                max: span.end,
                template_len
            });
        }

        let positions = self.consensus.path_positions();
        let start = positions[..=span.start].iter()
            .rev()
            .find_map(|&p| p)
            .unwrap_or(0);
        let end = positions[span.end.min(template_len)..].iter()
            .find_map(|&p| p)
            .unwrap_or(self.consensus.path_len());

        let cns_len = self.consensus.sequence().len();
        let offset = self.consensus.trim_offset();
        let start = start.saturating_sub(offset).min(cns_len);
        let end = end.saturating_sub(offset).min(cns_len).max(start);
        Ok(start..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus_graph::ConsensusGraph;
    use crate::sequence_alignment::{GraphAlignment, GraphOp};
    use crate::utgcns_config::ConsensusTrim;

    #[test]
    fn test_identity() {
        let consensus = GraphConsensus::identity(b"ACGTACGT");
        let mapper = PositionMapper::new(&consensus);
        assert_eq!(mapper.adjust_position(&(0..8)).unwrap(), 0..8);
        assert_eq!(mapper.adjust_position(&(2..5)).unwrap(), 2..5);
        // the end is clamped to the template
        assert_eq!(mapper.adjust_position(&(4..20)).unwrap(), 4..8);
    }

    #[test]
    fn test_unmappable() {
        let consensus = GraphConsensus::identity(b"ACGT");
        let mapper = PositionMapper::new(&consensus);
        let error = mapper.adjust_position(&(4..6)).unwrap_err();
        assert!(matches!(error, UtgcnsError::UnmappablePosition { min: 4, max: 6, template_len: 4 }));
    }

    #[test]
    fn test_skipped_and_trimmed_positions() {
        // all reads skip template position 2, and nothing supports position 5
        let template = b"ACGTAC";
        let mut graph = ConsensusGraph::new(template, None);
        let alignment = GraphAlignment {
            template_start: 0,
            ops: vec![
                GraphOp::Match(b'A'), GraphOp::Match(b'C'), GraphOp::Deletion,
                GraphOp::Match(b'T'), GraphOp::Match(b'A')
            ]
        };
        graph.add_alignment(&alignment).unwrap();
        graph.add_alignment(&alignment).unwrap();
        graph.merge_nodes().unwrap();

        let consensus = graph.consensus(1, ConsensusTrim::NoSplit).unwrap();
        assert_eq!(consensus.sequence(), b"ACTA");
        let mapper = PositionMapper::new(&consensus);

        // a span starting on the skipped base scans down
        assert_eq!(mapper.adjust_position(&(2..4)).unwrap(), 1..3);
        // a span ending before the skipped base is unaffected
        assert_eq!(mapper.adjust_position(&(0..2)).unwrap(), 0..2);
        assert_eq!(mapper.adjust_position(&(0..6)).unwrap(), 0..4);
        assert_eq!(mapper.adjust_position(&(5..6)).unwrap(), 3..4);

        // the map itself is well formed
        let map = consensus.template_to_consensus();
        assert_eq!(map, vec![Some(0), Some(1), None, Some(2), Some(3), None, Some(4)]);
    }
}
