/*!
Greedy construction of the draft template for a unitig.
Reads are visited in layout order; each step picks the read that extends the template the furthest, aligns the template tail into the start of that read, and appends the unaligned remainder of the read.
Reads that cannot be stitched are retried with relaxed acceptance, then the template tail is trimmed, and as a last resort the best read is appended verbatim.
*/

use itertools::Itertools;
use log::{debug, trace, warn};
use rustc_hash::FxHashSet as HashSet;
use std::cmp::Reverse;
use std::ops::Range;

use crate::banded_aligner::BandedAligner;
use crate::errors::{Result, UtgcnsError};
use crate::read_layout::Read;
use crate::utgcns_config::UtgcnsConfig;

/// Initial share of the overlap taken from the template tail, in tenths
const TEMPLATE_TENTHS: usize = 9;
/// Initial share of the overlap added to the read piece, in tenths
const EXTENSION_TENTHS: usize = 1;
/// Cap on the allowed difference between the expected overlap and the alignment length
const MAX_LENGTH_DIFFERENCE: usize = 2500;
/// Alignments below this error rate may touch the ends of the pieces
const NEAR_PERFECT_ERROR: f64 = 0.1;

/// The stitching state machine
#[derive(Clone, Copy, Debug, PartialEq)]
enum StitchState {
    /// No template yet
    Seeding,
    /// Template exists, looking for the next read
    Extending,
    /// No remaining read extends the template
    Done,
    /// There was nothing to seed from
    Failed
}

/// How permissive the candidate search is, only widened when a search comes back empty
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
enum Acceptance {
    /// Thick overlaps, plus a thin read only if it is the very first option and nothing failed yet
    Thick,
    /// Thick overlaps, plus a thin read if it is the very first option
    AllowThin,
    /// As `AllowThin`, but reads contained in the template are considered too
    AllowContained
}

impl Acceptance {
    fn widen(self) -> Option<Acceptance> {
        match self {
            Acceptance::Thick => Some(Acceptance::AllowThin),
            Acceptance::AllowThin => Some(Acceptance::AllowContained),
            Acceptance::AllowContained => None
        }
    }
}

/// The truncation sizes and band error rate of one stitch alignment
#[derive(Clone, Copy, Debug)]
struct StitchBudget {
    /// Share of the overlap taken from the template, in tenths
    template_tenths: usize,
    /// Extra share of the overlap offered from the read, in tenths
    extension_tenths: usize,
    /// Band error rate is `band_step` times the stitch error step
    band_step: u32
}

impl StitchBudget {
    fn new() -> StitchBudget {
        StitchBudget {
            template_tenths: TEMPLATE_TENTHS,
            extension_tenths: EXTENSION_TENTHS,
            band_step: 1
        }
    }
}

/// Counters describing one template construction
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StitchStats {
    /// Reads appended through an alignment
    pub extensions: usize,
    /// Failed stitch attempts
    pub failures: usize,
    /// Number of times the template tail was trimmed
    pub trims: usize,
    /// Reads appended without an alignment
    pub verbatim_appends: usize
}

/// The output of `TemplateBuilder::build()`.
/// Per-read values are indexed like the reads passed to the builder.
#[derive(Clone, Debug, Default)]
pub struct Template {
    /// The template bases
    sequence: Vec<u8>,
    /// Span of each read that was stitched into the template
    placements: Vec<Option<Range<usize>>>,
    /// Estimated span of every read, used to seed the final alignment
    windows: Vec<Range<usize>>,
    /// True if the read failed to stitch and was never stitched afterwards
    extension_failed: Vec<bool>,
    /// Counters
    stats: StitchStats
}

impl Template {
    // getters
    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    pub fn placements(&self) -> &[Option<Range<usize>>] {
        &self.placements
    }

    pub fn windows(&self) -> &[Range<usize>] {
        &self.windows
    }

    pub fn extension_failed(&self) -> &[bool] {
        &self.extension_failed
    }

    pub fn stats(&self) -> StitchStats {
        self.stats
    }
}

/// Builds the draft template from the reads of a unitig.
pub struct TemplateBuilder<'a> {
    config: &'a UtgcnsConfig,
    aligner: BandedAligner
}

impl<'a> TemplateBuilder<'a> {
    pub fn new(config: &'a UtgcnsConfig) -> TemplateBuilder<'a> {
        TemplateBuilder {
            config,
            aligner: BandedAligner::new(config.wildcard)
        }
    }

    /// Stitches the reads into a template.
    /// # Arguments
    /// * `reads` - the reads of the unitig, in any order
    /// # Errors
    /// * `EmptyInput` if every read is ignored
    pub fn build(&self, reads: &[Read]) -> Result<Template> {
        let order: Vec<usize> = (0..reads.len())
            .sorted_by_key(|&i| reads[i].layout().start)
            .collect();

        let mut template: Vec<u8> = vec![];
        let mut placements: Vec<Option<Range<usize>>> = vec![None; reads.len()];
        let mut extension_failed = vec![false; reads.len()];
        let mut stats = StitchStats::default();

        let mut state = StitchState::Seeding;
        let mut acceptance = Acceptance::Thick;
        // order positions of reads that failed since the last extension
        let mut bad: HashSet<usize> = Default::default();
        // expected end of the template in layout coordinates
        let mut e_pos = 0;
        // order position of the read that last extended the template
        let mut last = 0;

        loop {
            state = match state {
                StitchState::Seeding => {
                    match order.iter().position(|&i| !reads[i].is_ignored()) {
                        Some(pos) => {
                            let read = &reads[order[pos]];
                            template.extend_from_slice(read.bases());
                            placements[order[pos]] = Some(0..read.len());
                            e_pos = read.layout().end;
                            last = pos;
                            debug!("Seeded template with read {} ({} bp)", read.ident(), read.len());
                            StitchState::Extending
                        },
                        None => StitchState::Failed
                    }
                },
                StitchState::Extending => {
                    match self.select_candidate(reads, &order, last + 1, e_pos, acceptance, &bad) {
                        Some(pos) => {
                            let read_id = order[pos];
                            let read = &reads[read_id];
                            let olap = self.estimated_overlap(e_pos, read.layout().start);
                            match self.stitch(&template, read, olap) {
                                Ok(read_end) => {
                                    let tig_len = template.len();
                                    placements[read_id] = Some(tig_len.saturating_sub(read_end)..(tig_len + read.len()).saturating_sub(read_end));
                                    // contained reads are placed, but never grow the template
                                    if read.layout().end > e_pos {
                                        template.extend_from_slice(&read.bases()[read_end..]);
                                    }
                                    e_pos = e_pos.max(read.layout().end);
                                    last = pos;
                                    extension_failed[read_id] = false;
                                    bad.clear();
                                    acceptance = Acceptance::Thick;
                                    stats.extensions += 1;
                                    trace!("Read {} extended template to {} bp", read.ident(), template.len());
                                },
                                Err(e) => {
                                    debug!("{e}");
                                    bad.insert(pos);
                                    extension_failed[read_id] = true;
                                    stats.failures += 1;
                                }
                            }
                            StitchState::Extending
                        },
                        None => match acceptance.widen() {
                            Some(next) => {
                                acceptance = next;
                                StitchState::Extending
                            },
                            None => {
                                // nothing left at any acceptance level, recover using the best read that failed
                                let best = bad.iter()
                                    .copied()
                                    .max_by_key(|&pos| (reads[order[pos]].layout().end, Reverse(pos)));
                                match best {
                                    None => StitchState::Done,
                                    Some(pos) => {
                                        let read = &reads[order[pos]];
                                        let layout = read.layout();
                                        let raw_olap = e_pos.saturating_sub(layout.start);
                                        let min_overlap = self.config.min_overlap;
                                        if stats.trims < self.config.max_template_trims &&
                                            template.len() > min_overlap &&
                                            raw_olap > min_overlap + self.config.trim_bp {
                                            let trim = (template.len() - min_overlap).min(raw_olap - min_overlap - self.config.trim_bp);
                                            template.truncate(template.len() - trim);
                                            e_pos = e_pos.saturating_sub(trim);
                                            stats.trims += 1;
                                            debug!("Trimmed {trim} bp from the template tail after read {} failed", read.ident());
                                            bad.clear();
                                            acceptance = Acceptance::Thick;
                                            StitchState::Extending
                                        } else if layout.end > e_pos {
                                            let olap = self.estimated_overlap(e_pos, layout.start).min(read.len());
                                            template.extend_from_slice(&read.bases()[olap..]);
                                            e_pos = layout.end;
                                            last = pos;
                                            stats.verbatim_appends += 1;
                                            warn!("Read {} could not be stitched, appended {} bp without an alignment", read.ident(), read.len() - olap);
                                            bad.clear();
                                            acceptance = Acceptance::Thick;
                                            StitchState::Extending
                                        } else {
                                            StitchState::Done
                                        }
                                    }
                                }
                            }
                        }
                    }
                },
                StitchState::Done => break,
                StitchState::Failed => return Err(UtgcnsError::EmptyInput)
            };
        }

        let windows = self.estimate_windows(reads, &order, &placements);
        debug!(
            "Template of {} bp, expected {e_pos} bp: {} extensions, {} failures, {} trims, {} verbatim",
            template.len(), stats.extensions, stats.failures, stats.trims, stats.verbatim_appends
        );

        Ok(Template {
            sequence: template,
            placements,
            windows,
            extension_failed,
            stats
        })
    }

    /// Searches `order[first..]` for the read that extends the template furthest.
    /// The scan ends after the first read with a thin overlap.
    /// Returns the position in `order` of the chosen read.
    fn select_candidate(
        &self, reads: &[Read], order: &[usize], first: usize, e_pos: usize,
        acceptance: Acceptance, bad: &HashSet<usize>
    ) -> Option<usize> {
        let mut selected: Option<usize> = None;
        let mut selected_end = 0;
        for (pos, read) in order.iter().enumerate().skip(first).map(|(pos, &i)| (pos, &reads[i])) {
            let layout = read.layout();
            let contained = layout.end <= e_pos;
            if read.is_ignored() || (contained && acceptance < Acceptance::AllowContained) {
                continue;
            }

            let thick = layout.start + self.config.min_overlap < e_pos;
            let allow_thin = selected.is_none() && (acceptance > Acceptance::Thick || bad.is_empty());
            if (thick || allow_thin) && layout.end > selected_end && !bad.contains(&pos) {
                selected = Some(pos);
                selected_end = layout.end;
            }

            if !thick {
                break;
            }
        }
        selected
    }

    /// The expected overlap between the template tail and a read starting at `start`
    fn estimated_overlap(&self, e_pos: usize, start: usize) -> usize {
        let olap = e_pos.saturating_sub(start);
        if olap < self.config.min_overlap {
            e_pos.min(self.config.min_overlap)
        } else {
            olap
        }
    }

    /// Aligns the tail of the template into the start of `read`.
    /// Returns the read offset where the template ends.
    /// # Errors
    /// * `ReadExtensionFailed` if every truncation and band error rate was tried
    fn stitch(&self, template: &[u8], read: &Read, olap: usize) -> Result<usize> {
        let read_len = read.len();
        let factor = self.config.error_rate_factor;
        let max_difference = MAX_LENGTH_DIFFERENCE.min((3 * olap).div_ceil(10));

        let mut budget = StitchBudget::new();
        loop {
            let query_len = (olap * budget.template_tenths).div_ceil(10).max(2).min(template.len());
            let target_len = read_len.min(olap + (olap * budget.extension_tenths).div_ceil(10));
            let band_error_rate = self.config.stitch_error_step() * budget.band_step as f64;

            let query = &template[template.len() - query_len..];
            let target = &read.bases()[..target_len];
            let more_to_extend = target_len < read_len;

            let result = self.aligner.align(query, target, band_error_rate).ok()
                .filter(|r| budget.band_step >= factor || r.alignment_length().abs_diff(olap) <= max_difference);
            trace!("stitch read {}: template {query_len} bp, read {target_len} bp @ {band_error_rate:.4} => {result:?}", read.ident());

            let (shrink, extend) = match result {
                Some(ref r) => {
                    let near_perfect = r.error_rate() < NEAR_PERFECT_ERROR;
                    let hit_start = r.target_start == 0 && !near_perfect;
                    let hit_end = r.target_end == target_len && more_to_extend;
                    (hit_start, hit_end)
                },
                None => (true, true)
            };

            if !shrink && !extend {
                if let Some(r) = result {
                    return Ok(r.target_end);
                }
            }

            if shrink {
                budget.template_tenths -= 1;
            }
            if extend {
                budget.extension_tenths += 1;
            }

            if budget.template_tenths == 0 {
                if budget.band_step < factor {
                    budget = StitchBudget {
                        band_step: budget.band_step + 1,
                        ..StitchBudget::new()
                    };
                } else {
                    return Err(UtgcnsError::ReadExtensionFailed { ident: read.ident() });
                }
            }
        }
    }

    /// Estimates a template span for every read.
    /// Stitched reads keep their placement; every other read is offset from the closest stitched read before it in layout order.
    fn estimate_windows(&self, reads: &[Read], order: &[usize], placements: &[Option<Range<usize>>]) -> Vec<Range<usize>> {
        let mut windows = vec![0..0; reads.len()];
        let mut anchor: Option<(usize, usize)> = None;
        for &read_id in order.iter() {
            let read = &reads[read_id];
            if let Some(placement) = &placements[read_id] {
                windows[read_id] = placement.clone();
                anchor = Some((read.layout().start, placement.start));
            } else {
                let start = match anchor {
                    Some((layout_start, template_start)) => (read.layout().start + template_start).saturating_sub(layout_start),
                    None => read.layout().start
                };
                windows[read_id] = start..(start + read.len());
            }
        }
        windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_layout::ReadLayout;
    use crate::utgcns_config::UtgcnsConfigBuilder;

    /// Deterministic sequence over ACG, so that poly-T sequence never aligns to it
    fn acg_sequence(len: usize, seed: usize) -> Vec<u8> {
        let mut state = seed as u64;
        (0..len).map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            b"ACG"[((state >> 33) % 3) as usize]
        }).collect()
    }

    fn to_reads<'a>(layouts: &[ReadLayout<'a>]) -> Vec<Read<'a>> {
        layouts.iter().map(|l| Read::from_layout(l).unwrap()).collect()
    }

    #[test]
    fn test_single_read() {
        let config = UtgcnsConfig::default();
        let sequence = acg_sequence(50, 1);
        let reads = to_reads(&[ReadLayout::new(0, &sequence, 0, 50)]);
        let template = TemplateBuilder::new(&config).build(&reads).unwrap();
        assert_eq!(template.sequence(), &sequence);
        assert_eq!(template.placements(), &[Some(0..50)]);
        assert_eq!(template.stats(), StitchStats::default());
    }

    #[test]
    fn test_all_ignored() {
        let config = UtgcnsConfig::default();
        let sequence = acg_sequence(50, 1);
        let layout = ReadLayout {
            ignore: true,
            ..ReadLayout::new(0, &sequence, 0, 50)
        };
        let reads = to_reads(&[layout]);
        let result = TemplateBuilder::new(&config).build(&reads);
        assert!(matches!(result, Err(UtgcnsError::EmptyInput)));
    }

    #[test_log::test]
    fn test_chain() {
        let config = UtgcnsConfigBuilder::default()
            .min_overlap(10)
            .build().unwrap();
        let genome = acg_sequence(260, 2);
        // given out of order on purpose
        let reads = to_reads(&[
            ReadLayout::new(2, &genome[160..260], 160, 260),
            ReadLayout::new(0, &genome[0..100], 0, 100),
            ReadLayout::new(1, &genome[80..180], 80, 180),
        ]);
        let template = TemplateBuilder::new(&config).build(&reads).unwrap();
        assert_eq!(template.sequence(), &genome);
        assert_eq!(template.placements(), &[Some(160..260), Some(0..100), Some(80..180)]);
        assert_eq!(template.windows(), &[160..260, 0..100, 80..180]);
        assert_eq!(template.stats().extensions, 2);
        assert_eq!(template.stats().failures, 0);
    }

    #[test_log::test]
    fn test_verbatim_append() {
        let config = UtgcnsConfigBuilder::default()
            .min_overlap(10)
            .build().unwrap();
        let genome = acg_sequence(100, 3);
        let junk = vec![b'T'; 120];
        let reads = to_reads(&[
            ReadLayout::new(0, &genome, 0, 100),
            ReadLayout::new(1, &junk, 80, 200),
        ]);
        let template = TemplateBuilder::new(&config).build(&reads).unwrap();

        // the unaligned part past the estimated overlap is copied
        assert_eq!(template.sequence().len(), 200);
        assert_eq!(&template.sequence()[..100], &genome[..]);
        assert!(template.sequence()[100..].iter().all(|&b| b == b'T'));
        assert_eq!(template.placements(), &[Some(0..100), None]);
        assert_eq!(template.extension_failed(), &[false, true]);
        assert_eq!(template.windows()[1], 80..200);

        let stats = template.stats();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.verbatim_appends, 1);
        assert_eq!(stats.trims, 0);
    }

    #[test_log::test]
    fn test_trim_recovers_bad_tail() {
        let config = UtgcnsConfigBuilder::default()
            .min_overlap(10)
            .trim_bp(10)
            .build().unwrap();
        let genome = acg_sequence(160, 4);
        // the last 30 bases of the first read are garbage
        let mut first = genome[0..100].to_vec();
        first[70..].iter_mut().for_each(|b| *b = b'T');
        let reads = to_reads(&[
            ReadLayout::new(0, &first, 0, 100),
            ReadLayout::new(1, &genome[40..160], 40, 160),
        ]);
        let template = TemplateBuilder::new(&config).build(&reads).unwrap();

        assert_eq!(template.sequence(), &genome);
        assert_eq!(template.placements(), &[Some(0..100), Some(40..160)]);
        assert_eq!(template.extension_failed(), &[false, false]);

        let stats = template.stats();
        assert_eq!(stats.extensions, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.trims, 1);
        assert_eq!(stats.verbatim_appends, 0);
    }

    #[test]
    fn test_contained_repeat_does_not_grow() {
        // the second read looks like it extends past the tandem repeat, but the layout says it is contained
        let config = UtgcnsConfig::default();
        let reads = to_reads(&[
            ReadLayout::new(0, b"ACGTACGT", 0, 8),
            ReadLayout::new(1, b"ACGTTCGT", 0, 8),
        ]);
        let template = TemplateBuilder::new(&config).build(&reads).unwrap();
        assert_eq!(template.sequence(), b"ACGTACGT");
        assert_eq!(template.placements(), &[Some(0..8), Some(4..12)]);
    }

    #[test]
    fn test_contained_read_window() {
        let config = UtgcnsConfigBuilder::default()
            .min_overlap(10)
            .build().unwrap();
        let genome = acg_sequence(180, 5);
        let reads = to_reads(&[
            ReadLayout::new(0, &genome[0..100], 0, 100),
            ReadLayout::new(1, &genome[30..70], 30, 70),
            ReadLayout::new(2, &genome[80..180], 80, 180),
        ]);
        let template = TemplateBuilder::new(&config).build(&reads).unwrap();
        assert_eq!(template.sequence(), &genome);
        // the contained read is never stitched, but gets a window from the read before it
        assert_eq!(template.placements()[1], None);
        assert_eq!(template.windows()[1], 30..70);
        assert_eq!(template.extension_failed(), &[false, false, false]);
    }
}
