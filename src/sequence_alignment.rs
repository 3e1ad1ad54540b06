use itertools::Itertools;
use std::fmt;

/// A single column of a pairwise alignment between a query and a target.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EditOp {
    /// Query and target agree (or one side is the wildcard)
    Match,
    /// Query and target both have a base, but they differ
    Mismatch,
    /// A query base with no target counterpart
    Insertion,
    /// A target base with no query counterpart
    Deletion
}

impl EditOp {
    /// The extended CIGAR symbol for this operation
    pub fn symbol(&self) -> char {
        match self {
            EditOp::Match => '=',
            EditOp::Mismatch => 'X',
            EditOp::Insertion => 'I',
            EditOp::Deletion => 'D'
        }
    }

    /// Returns true if the op consumes a query base
    pub fn consumes_query(&self) -> bool {
        !matches!(self, EditOp::Deletion)
    }

    /// Returns true if the op consumes a target base
    pub fn consumes_target(&self) -> bool {
        !matches!(self, EditOp::Insertion)
    }
}

/// A single step of an alignment folded into the consensus graph.
/// The graph has no substitution edge, so mismatches are written as an `Insertion` followed by a `Deletion`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GraphOp {
    /// The read base sits on the current template node
    Match(u8),
    /// The read carries an extra base before the current template node
    Insertion(u8),
    /// The read skips the current template node
    Deletion
}

/// An alignment of a read to the template in the form used to build the consensus graph.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphAlignment {
    /// 0-based template position of the first template base consumed by the ops
    pub template_start: usize,
    /// The edit script, in template order
    pub ops: Vec<GraphOp>
}

impl GraphAlignment {
    /// The exclusive template end implied by the ops
    pub fn template_end(&self) -> usize {
        self.template_start + self.ops.iter()
            .filter(|op| !matches!(op, GraphOp::Insertion(_)))
            .count()
    }
}

/// Output of a pairwise alignment.
/// All coordinates are 0-based, half-open, and relative to the sequences passed to the aligner unless shifted with `shift_target`.
#[derive(Clone, Default, PartialEq)]
pub struct AlignmentResult {
    /// First aligned query base
    pub query_start: usize,
    /// End of the aligned query span
    pub query_end: usize,
    /// First aligned target base
    pub target_start: usize,
    /// End of the aligned target span
    pub target_end: usize,
    /// Number of edits in `ops`
    pub edit_distance: usize,
    /// The edit script from the start of both aligned spans
    pub ops: Vec<EditOp>
}

impl AlignmentResult {
    /// Number of alignment columns
    pub fn alignment_length(&self) -> usize {
        self.ops.len()
    }

    /// Edits per alignment column; an empty alignment reports 1.0
    pub fn error_rate(&self) -> f64 {
        if self.ops.is_empty() {
            1.0
        } else {
            self.edit_distance as f64 / self.ops.len() as f64
        }
    }

    /// Moves the target coordinates by `offset`, used when the target was a window into a larger sequence
    pub fn shift_target(&mut self, offset: usize) {
        self.target_start += offset;
        self.target_end += offset;
    }

    /// Run-length encoded extended CIGAR, e.g. `10=1X4=2I`
    pub fn cigar(&self) -> String {
        self.ops.iter()
            .dedup_with_count()
            .map(|(count, op)| format!("{count}{}", op.symbol()))
            .join("")
    }

    /// Converts this alignment into an edit script for the consensus graph.
    /// Mismatches are re-encoded as an insertion of the query base followed by a deletion of the template base.
    /// # Arguments
    /// * `query` - the read sequence the alignment was computed for; `template_start` is taken from the target coordinates
    pub fn graph_alignment(&self, query: &[u8]) -> GraphAlignment {
        let mut ops = Vec::with_capacity(self.ops.len() + self.ops.len() / 8);
        let mut query_pos = self.query_start;
        for op in self.ops.iter() {
            match op {
                EditOp::Match => {
                    ops.push(GraphOp::Match(query[query_pos]));
                    query_pos += 1;
                },
                EditOp::Mismatch => {
                    ops.push(GraphOp::Insertion(query[query_pos]));
                    ops.push(GraphOp::Deletion);
                    query_pos += 1;
                },
                EditOp::Insertion => {
                    ops.push(GraphOp::Insertion(query[query_pos]));
                    query_pos += 1;
                },
                EditOp::Deletion => {
                    ops.push(GraphOp::Deletion);
                }
            }
        }
        assert_eq!(query_pos, self.query_end);

        GraphAlignment {
            template_start: self.target_start,
            ops
        }
    }
}

impl fmt::Debug for AlignmentResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "query: {}-{} target: {}-{} edits: {} cigar: {}",
            self.query_start, self.query_end,
            self.target_start, self.target_end,
            self.edit_distance,
            self.cigar()
        )
    }
}

/// Returns true for the symbols a read may contain: `A`, `C`, `G`, `T`, and `N`.
pub fn is_valid_base(base: u8) -> bool {
    matches!(base, b'A' | b'C' | b'G' | b'T' | b'N')
}

/// Returns the reverse complement of a sequence over `ACGTN`; any other byte is kept as-is.
/// # Examples
/// ```rust
/// use utgcns::sequence_alignment::reverse_complement;
/// assert_eq!(reverse_complement(b"AACGTN"), b"NACGTT".to_vec());
/// ```
pub fn reverse_complement(sequence: &[u8]) -> Vec<u8> {
    sequence.iter().rev()
        .map(|&b| match b {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            b'T' => b'A',
            other => other
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cigar() {
        let result = AlignmentResult {
            query_start: 0,
            query_end: 6,
            target_start: 2,
            target_end: 8,
            edit_distance: 2,
            ops: vec![EditOp::Match, EditOp::Match, EditOp::Mismatch, EditOp::Insertion, EditOp::Deletion, EditOp::Match, EditOp::Match]
        };
        assert_eq!(result.cigar(), "2=1X1I1D2=");
        assert_eq!(result.alignment_length(), 7);
        // spans implied by the ops agree with the coordinates
        assert_eq!(result.ops.iter().filter(|op| op.consumes_query()).count(), result.query_end - result.query_start);
        assert_eq!(result.ops.iter().filter(|op| op.consumes_target()).count(), result.target_end - result.target_start);
        assert!((result.error_rate() - 2.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_graph_alignment_splits_mismatch() {
        // query ACTT vs target ACGT
        let result = AlignmentResult {
            query_start: 0,
            query_end: 4,
            target_start: 3,
            target_end: 7,
            edit_distance: 1,
            ops: vec![EditOp::Match, EditOp::Match, EditOp::Mismatch, EditOp::Match]
        };
        let graph_aln = result.graph_alignment(b"ACTT");
        assert_eq!(graph_aln.template_start, 3);
        assert_eq!(graph_aln.ops, vec![
            GraphOp::Match(b'A'), GraphOp::Match(b'C'),
            GraphOp::Insertion(b'T'), GraphOp::Deletion,
            GraphOp::Match(b'T')
        ]);
        assert_eq!(graph_aln.template_end(), 7);
    }

    #[test]
    fn test_shift_target() {
        let mut result = AlignmentResult {
            query_start: 0,
            query_end: 1,
            target_start: 0,
            target_end: 1,
            edit_distance: 0,
            ops: vec![EditOp::Match]
        };
        result.shift_target(10);
        assert_eq!((result.target_start, result.target_end), (10, 11));
    }

    #[test]
    fn test_valid_bases() {
        assert!(b"ACGTN".iter().all(|&b| is_valid_base(b)));
        assert!(!is_valid_base(b'a'));
        assert!(!is_valid_base(b'-'));
    }

    #[test]
    fn test_reverse_complement() {
        assert_eq!(reverse_complement(b"ACGT"), b"ACGT".to_vec());
        assert_eq!(reverse_complement(b"AAAC"), b"GTTT".to_vec());
        assert_eq!(reverse_complement(b""), Vec::<u8>::new());
    }
}
