/*!
Final alignment of every read to the finished template.
Each read is aligned inside a padded window around its estimated span; failures widen the window and then raise the error rate until the attempt budget runs out.
Reads are independent, so the alignments run on a worker pool against a shared read-only template.
*/

use log::{debug, trace};
use rayon::prelude::*;
use std::ops::Range;

use crate::banded_aligner::BandedAligner;
use crate::errors::{Result, UtgcnsError};
use crate::read_layout::Read;
use crate::sequence_alignment::{AlignmentResult, GraphAlignment};
use crate::utgcns_config::UtgcnsConfig;

/// Window growth per attempt, in multiples of the padding
const NARROW_WIDEN: usize = 5;
/// Extra window growth on the last band of each error rate, in multiples of the padding
const WIDE_WIDEN: usize = 25;

/// A successful final alignment
#[derive(Clone, Debug, PartialEq)]
pub struct ReadAlignment {
    /// The alignment, with target coordinates on the full template
    pub alignment: AlignmentResult,
    /// The alignment as an edit script for the consensus graph
    pub graph_alignment: GraphAlignment,
    /// Number of attempts it took, starting from 1
    pub attempts: usize
}

impl ReadAlignment {
    /// The span of the template covered by the read
    pub fn template_span(&self) -> Range<usize> {
        self.alignment.target_start..self.alignment.target_end
    }
}

/// Tracks the window and error rate across the attempts for a single read
#[derive(Clone, Debug)]
struct RetryBudget {
    /// Index of the current attempt
    attempt: usize,
    /// Total attempts allowed
    max_attempts: usize,
    /// Attempts per error rate
    num_bands: usize,
    /// Current error rate is `rate_steps` times the alignment error step
    rate_steps: u32,
    /// Window padding for this read
    padding: usize,
    /// The estimated span of the read
    estimate: Range<usize>,
    /// Length of the template
    template_len: usize,
    /// Current window
    window: Range<usize>
}

impl RetryBudget {
    fn new(config: &UtgcnsConfig, read_len: usize, estimate: Range<usize>, template_len: usize) -> RetryBudget {
        let padding = config.max_padding.min((read_len as f64 * config.padding_fraction).ceil() as usize);
        let mut budget = RetryBudget {
            attempt: 0,
            max_attempts: config.max_alignment_attempts(),
            num_bands: config.num_bands as usize,
            rate_steps: 1,
            padding,
            estimate,
            template_len,
            window: 0..0
        };
        budget.reset_window();
        budget
    }

    /// Moves the window back to the padded estimate
    fn reset_window(&mut self) {
        self.window = self.estimate.start.saturating_sub(self.padding)..self.template_len.min(self.estimate.end + self.padding);
    }

    /// Grows the window on both sides by `amount`, staying inside the template
    fn widen(&mut self, amount: usize) {
        self.window = self.window.start.saturating_sub(amount)..self.template_len.min(self.window.end + amount);
    }

    /// The window to use, replacing an empty one with the template prefix up to the estimated end
    fn search_window(&self) -> Range<usize> {
        if self.window.start < self.window.end {
            self.window.clone()
        } else {
            let end = self.estimate.end.min(self.template_len);
            if end > 0 {
                0..end
            } else {
                0..self.template_len
            }
        }
    }

    fn error_rate(&self, config: &UtgcnsConfig) -> f64 {
        config.alignment_error_step() * self.rate_steps as f64
    }

    /// Moves to the next attempt, returns false when the budget is exhausted
    fn advance(&mut self) -> bool {
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            return false;
        }

        self.widen(NARROW_WIDEN * self.padding);
        if (self.attempt + 1) % self.num_bands == 0 {
            self.widen(WIDE_WIDEN * self.padding);
        }
        if self.attempt % self.num_bands == 0 {
            self.rate_steps += 1;
            self.reset_window();
        }
        true
    }
}

/// Aligns reads to the finished template.
pub struct ReadAligner<'a> {
    config: &'a UtgcnsConfig,
    aligner: BandedAligner
}

impl<'a> ReadAligner<'a> {
    pub fn new(config: &'a UtgcnsConfig) -> ReadAligner<'a> {
        ReadAligner {
            config,
            aligner: BandedAligner::new(config.wildcard)
        }
    }

    /// Aligns a single read near its estimated span.
    /// # Arguments
    /// * `template` - the finished template
    /// * `read` - the read to align
    /// * `estimate` - the estimated span of the read on the template
    /// # Errors
    /// * `ReadAlignmentFailed` if no attempt produced an alignment
    pub fn align_read(&self, template: &[u8], read: &Read, estimate: &Range<usize>) -> Result<ReadAlignment> {
        let mut budget = RetryBudget::new(self.config, read.len(), estimate.clone(), template.len());
        loop {
            let window = budget.search_window();
            let error_rate = budget.error_rate(self.config);
            match self.aligner.align(read.bases(), &template[window.clone()], error_rate) {
                Ok(mut alignment) => {
                    alignment.shift_target(window.start);
                    trace!("read {} aligned on attempt {} in {window:?} @ {error_rate:.4}: {alignment:?}", read.ident(), budget.attempt + 1);
                    let graph_alignment = alignment.graph_alignment(read.bases());
                    return Ok(ReadAlignment {
                        alignment,
                        graph_alignment,
                        attempts: budget.attempt + 1
                    });
                },
                Err(e) => {
                    trace!("read {} attempt {} in {window:?}: {e}", read.ident(), budget.attempt + 1);
                }
            }

            if !budget.advance() {
                return Err(UtgcnsError::ReadAlignmentFailed {
                    ident: read.ident(),
                    attempts: budget.max_attempts
                });
            }
        }
    }

    /// Aligns every read on a worker pool.
    /// The returned vector is indexed like `reads`; per-read failures are kept in place and do not fail the call.
    /// # Arguments
    /// * `template` - the finished template
    /// * `reads` - the reads to align
    /// * `estimates` - the estimated span of each read, indexed like `reads`
    /// # Errors
    /// * if the worker pool cannot be created
    pub fn align_all(&self, template: &[u8], reads: &[Read], estimates: &[Range<usize>]) -> Result<Vec<Result<ReadAlignment>>> {
        assert_eq!(reads.len(), estimates.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .build()?;

        let alignments: Vec<Result<ReadAlignment>> = pool.install(|| {
            reads.par_iter()
                .zip(estimates.par_iter())
                .map(|(read, estimate)| self.align_read(template, read, estimate))
                .collect()
        });

        let failed = alignments.iter().filter(|a| a.is_err()).count();
        debug!("Aligned {} of {} reads to the {} bp template", reads.len() - failed, reads.len(), template.len());
        Ok(alignments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_layout::ReadLayout;
    use crate::sequence_alignment::{EditOp, GraphOp};
    use crate::utgcns_config::UtgcnsConfigBuilder;

    #[test]
    fn test_retry_schedule() {
        let config = UtgcnsConfig::default();
        // padding of 5
        let mut budget = RetryBudget::new(&config, 100, 500..600, 1000);
        assert_eq!(budget.padding, 5);
        assert_eq!(budget.search_window(), 495..605);
        assert!((budget.error_rate(&config) - 0.03).abs() < 1e-12);

        // narrow and then wide growth
        assert!(budget.advance());
        assert_eq!(budget.search_window(), 345..755);
        assert!((budget.error_rate(&config) - 0.03).abs() < 1e-12);

        // new error rate, window starts over
        assert!(budget.advance());
        assert_eq!(budget.search_window(), 495..605);
        assert!((budget.error_rate(&config) - 0.06).abs() < 1e-12);

        for _ in 2..7 {
            assert!(budget.advance());
        }
        assert_eq!(budget.attempt, 7);
        assert!((budget.error_rate(&config) - 0.12).abs() < 1e-12);
        assert!(!budget.advance());
    }

    #[test]
    fn test_window_clamps_and_falls_back() {
        let config = UtgcnsConfig::default();
        let budget = RetryBudget::new(&config, 100, 0..100, 60);
        assert_eq!(budget.search_window(), 0..60);

        // an estimate past the end of the template
        let budget = RetryBudget::new(&config, 100, 200..300, 60);
        assert_eq!(budget.search_window(), 0..60);
    }

    #[test]
    fn test_align_with_escalation() {
        let config = UtgcnsConfigBuilder::default()
            .error_rate_max(0.2)
            .build().unwrap();
        let template = b"ACGTACGT";
        let layout = ReadLayout::new(1, b"ACGTTCGT", 0, 8);
        let read = Read::from_layout(&layout).unwrap();

        // a single mismatch over 8 bases needs the third error rate step
        let aligned = ReadAligner::new(&config).align_read(template, &read, &(0..8)).unwrap();
        assert_eq!(aligned.attempts, 5);
        assert_eq!(aligned.template_span(), 0..8);
        assert_eq!(aligned.alignment.edit_distance, 1);
        assert_eq!(aligned.alignment.ops[4], EditOp::Mismatch);
        assert_eq!(aligned.graph_alignment.ops[4..6], [GraphOp::Insertion(b'T'), GraphOp::Deletion]);
    }

    #[test]
    fn test_align_shifts_to_template() {
        let config = UtgcnsConfig::default();
        let template = b"TTTTTTTTTTACGTACGGACTTTTTTTTTT";
        let layout = ReadLayout::new(1, b"ACGTACGGAC", 10, 20);
        let read = Read::from_layout(&layout).unwrap();

        let aligned = ReadAligner::new(&config).align_read(template, &read, &(10..20)).unwrap();
        assert_eq!(aligned.attempts, 1);
        assert_eq!(aligned.template_span(), 10..20);
        assert_eq!(aligned.graph_alignment.template_start, 10);
    }

    #[test]
    fn test_align_all() {
        let config = UtgcnsConfigBuilder::default()
            .threads(2)
            .build().unwrap();
        let template = b"TTTTTTTTTTACGTACGGACTTTTTTTTTT";
        let layouts = [
            ReadLayout::new(1, b"ACGTACGGAC", 10, 20),
            ReadLayout::new(2, b"GGGGGGGGGG", 0, 10)
        ];
        let reads: Vec<Read> = layouts.iter().map(|l| Read::from_layout(l).unwrap()).collect();

        let alignments = ReadAligner::new(&config).align_all(template, &reads, &[10..20, 0..10]).unwrap();
        assert_eq!(alignments.len(), 2);
        assert_eq!(alignments[0].as_ref().unwrap().template_span(), 10..20);
        assert!(matches!(alignments[1], Err(UtgcnsError::ReadAlignmentFailed { ident: 2, attempts: 8 })));
    }
}
