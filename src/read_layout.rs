/*!
Data model for the reads of one unitig: the input layout supplied by the read store, the oriented read sequence used internally, and the per-read placement that is reported back.
*/

use std::borrow::Cow;
use std::ops::Range;

use crate::errors::{Result, UtgcnsError};
use crate::sequence_alignment::{is_valid_base, reverse_complement};

/// One read of the input layout, as supplied by the read store and the orchestration layer.
#[derive(Clone, Debug)]
pub struct ReadLayout<'a> {
    /// Read identifier in the read store
    pub ident: u32,
    /// The bases of the read in forward store orientation
    pub sequence: &'a [u8],
    /// Approximate start of the read in the unitig layout
    pub min: usize,
    /// Approximate end of the read in the unitig layout
    pub max: usize,
    /// If true, the read is placed reverse-complemented
    pub reverse: bool,
    /// If true, the read is placed but does not vote in the consensus
    pub ignore: bool
}

impl<'a> ReadLayout<'a> {
    /// Convenience constructor for a forward read that participates in consensus
    pub fn new(ident: u32, sequence: &'a [u8], min: usize, max: usize) -> ReadLayout<'a> {
        ReadLayout {
            ident,
            sequence,
            min,
            max,
            reverse: false,
            ignore: false
        }
    }
}

/// A read oriented to match the unitig, borrowed from the store when no reverse-complement was required.
#[derive(Clone, Debug)]
pub struct Read<'a> {
    /// Read identifier in the read store
    ident: u32,
    /// Bases oriented along the unitig
    bases: Cow<'a, [u8]>,
    /// Approximate layout span
    layout: Range<usize>,
    /// If true, the read does not vote in the consensus
    ignore: bool
}

impl<'a> Read<'a> {
    /// Orients a layout entry and checks it against the input contract.
    /// # Errors
    /// * `InvalidRead` if the read has no bases, contains symbols other than `ACGTN`, or has `min > max`
    pub fn from_layout(layout: &ReadLayout<'a>) -> Result<Read<'a>> {
        if layout.sequence.is_empty() {
            return Err(UtgcnsError::InvalidRead {
                ident: layout.ident,
                reason: "no bases".to_string()
            });
        }

        if let Some(pos) = layout.sequence.iter().position(|&b| !is_valid_base(b)) {
            return Err(UtgcnsError::InvalidRead {
                ident: layout.ident,
                reason: format!("unexpected symbol {:?} at offset {pos}", layout.sequence[pos] as char)
            });
        }

        if layout.min > layout.max {
            return Err(UtgcnsError::InvalidRead {
                ident: layout.ident,
                reason: format!("layout start {} is past layout end {}", layout.min, layout.max)
            });
        }

        let bases = if layout.reverse {
            Cow::Owned(reverse_complement(layout.sequence))
        } else {
            Cow::Borrowed(layout.sequence)
        };

        Ok(Read {
            ident: layout.ident,
            bases,
            layout: layout.min..layout.max,
            ignore: layout.ignore
        })
    }

    // getters
    pub fn ident(&self) -> u32 {
        self.ident
    }

    pub fn bases(&self) -> &[u8] {
        &self.bases
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    pub fn layout(&self) -> &Range<usize> {
        &self.layout
    }

    pub fn is_ignored(&self) -> bool {
        self.ignore
    }
}

/// Outcome of placing a single read.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PlacementStatus {
    /// The read has a final position in the consensus
    Placed,
    /// The read could not be aligned to the template
    AlignmentFailed,
    /// The read aligned, but its span did not survive into the consensus
    Unmappable
}

/// Placement record for one read over the lifetime of a unitig computation.
/// All spans are half-open.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadPlacement {
    /// Read identifier in the read store
    pub ident: u32,
    /// Layout span provided as input
    pub original: Range<usize>,
    /// Span on the template, set by the per-read alignment
    pub template: Option<Range<usize>>,
    /// Span on the final consensus
    pub final_position: Option<Range<usize>>,
    /// True if the read failed to extend the template during stitching
    pub extension_failed: bool,
    /// The final outcome
    pub status: PlacementStatus
}

impl ReadPlacement {
    /// Creates a placement that has not been aligned yet
    pub fn new(ident: u32, original: Range<usize>) -> ReadPlacement {
        ReadPlacement {
            ident,
            original,
            template: None,
            final_position: None,
            extension_failed: false,
            status: PlacementStatus::AlignmentFailed
        }
    }

    /// Returns true if the read has a final position
    pub fn is_placed(&self) -> bool {
        self.status == PlacementStatus::Placed
    }
}
