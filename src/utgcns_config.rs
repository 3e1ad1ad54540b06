/*!
Contains configuration information for unitig consensus.
Typical usage is to the use the builder to construct the config, e.g.
```
use utgcns::utgcns_config::{ConsensusTrim, UtgcnsConfig, UtgcnsConfigBuilder};
let config: UtgcnsConfig = UtgcnsConfigBuilder::default()
    .error_rate_max(0.2)
    .min_overlap(100)
    .consensus_trim(ConsensusTrim::LongestRun)
    .build()
    .unwrap();
```
*/

use crate::errors::{Result, UtgcnsError};

/// The algorithm used to turn a layout into a consensus.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum ConsensusAlgorithm {
    /// Stitch a template, align every read to it, and call consensus from the partial-order graph
    #[default]
    Pbdag,
    /// Stitch a template and report it as the consensus
    Quick
}

/// Controls how low-weight regions are removed from the graph consensus.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum ConsensusTrim {
    /// Only trims the low-weight ends, keeping any low-weight island in the middle
    #[default]
    NoSplit,
    /// Keeps only the longest run of nodes that all meet the minimum weight
    LongestRun
}

/**
Contains configuration information for unitig consensus.
Typical usage is to the use the builder to construct the config, e.g.
```
use utgcns::utgcns_config::{UtgcnsConfig, UtgcnsConfigBuilder};
let config: UtgcnsConfig = UtgcnsConfigBuilder::default()
    .threads(4)
    .wildcard(None)
    .build()
    .unwrap();
```
*/
#[derive(derive_builder::Builder, Clone, Debug)]
#[builder(default)]
pub struct UtgcnsConfig {
    /// Maximum error rate allowed while stitching reads into the template
    pub error_rate: f64,
    /// Maximum error rate allowed when aligning reads to the finished template
    pub error_rate_max: f64,
    /// Error rates are escalated in steps of `rate / error_rate_factor`, starting from the first step
    pub error_rate_factor: u32,
    /// Number of window widenings tried before the final alignment error rate is raised
    pub num_bands: u32,
    /// Minimum expected overlap for a read to be considered a thick extension candidate
    pub min_overlap: usize,
    /// Minimum node weight for a consensus base to be retained at the ends
    pub min_coverage: u32,
    /// Amount of expected overlap that must remain past `min_overlap` before the template tail is trimmed
    pub trim_bp: usize,
    /// Maximum number of tail trims tried while stitching a single unitig
    pub max_template_trims: usize,
    /// Fraction of the read length used to pad the final alignment window
    pub padding_fraction: f64,
    /// Upper bound on the final alignment padding
    pub max_padding: usize,
    /// Enables an optional wildcard character that will match anything
    pub wildcard: Option<u8>,
    /// The consensus algorithm
    pub algorithm: ConsensusAlgorithm,
    /// The trimming mode for the graph consensus
    pub consensus_trim: ConsensusTrim,
    /// Number of worker threads for read alignment, 0 will let the pool decide
    pub threads: usize,
    /// If true, merged nodes are compacted out of the graph before calling consensus
    pub reap_nodes: bool
}

impl Default for UtgcnsConfig {
    fn default() -> Self {
        Self {
            // typical for corrected long reads
            error_rate: 0.12,
            // same as stitching unless specified
            error_rate_max: 0.12,
            // a quarter of the allowed error at each step
            error_rate_factor: 4,
            // one normal and one wide band per error rate
            num_bands: 2,
            // short enough to bridge thin layout overlaps
            min_overlap: 40,
            // drop ends that no read supports
            min_coverage: 1,
            // only trim when there is plenty of overlap to give back
            trim_bp: 500,
            // a handful is plenty to recover from a bad extension
            max_template_trims: 8,
            // 5% of the read on either side
            padding_fraction: 0.05,
            // long reads should not get huge windows from the fraction alone
            max_padding: 250,
            // scaffold gaps and trimmed bases show up as N
            wildcard: Some(b'N'),
            // the full graph consensus is what most want
            algorithm: ConsensusAlgorithm::Pbdag,
            // keeps coordinates of reads in the middle stable
            consensus_trim: ConsensusTrim::NoSplit,
            // let rayon decide
            threads: 0,
            // cheap relative to alignment
            reap_nodes: true
        }
    }
}

impl UtgcnsConfig {
    /// Checks that the values in the config are usable.
    /// # Errors
    /// * if an error rate is outside of (0, 1)
    /// * if `error_rate_factor` or `num_bands` is zero
    /// * if `padding_fraction` is negative
    pub fn validate(&self) -> Result<()> {
        for (parameter, value) in [("error_rate", self.error_rate), ("error_rate_max", self.error_rate_max)] {
            if !(value > 0.0 && value < 1.0) {
                return Err(UtgcnsError::InvalidConfig {
                    parameter: parameter.to_string(),
                    reason: format!("{value} must be in (0, 1)")
                });
            }
        }

        if self.error_rate_factor == 0 {
            return Err(UtgcnsError::InvalidConfig {
                parameter: "error_rate_factor".to_string(),
                reason: "must be >= 1".to_string()
            });
        }

        if self.num_bands == 0 {
            return Err(UtgcnsError::InvalidConfig {
                parameter: "num_bands".to_string(),
                reason: "must be >= 1".to_string()
            });
        }

        if self.padding_fraction < 0.0 {
            return Err(UtgcnsError::InvalidConfig {
                parameter: "padding_fraction".to_string(),
                reason: format!("{} must be >= 0", self.padding_fraction)
            });
        }

        Ok(())
    }

    /// The size of one error-rate escalation step while stitching
    pub fn stitch_error_step(&self) -> f64 {
        self.error_rate / self.error_rate_factor as f64
    }

    /// The size of one error-rate escalation step in the final alignment
    pub fn alignment_error_step(&self) -> f64 {
        self.error_rate_max / self.error_rate_factor as f64
    }

    /// Total number of final alignment attempts per read
    pub fn max_alignment_attempts(&self) -> usize {
        (self.error_rate_factor * self.num_bands) as usize
    }
}
