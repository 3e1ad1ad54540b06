
use rand::distributions::Uniform;
use rand::{Rng, SeedableRng};

use crate::read_layout::ReadLayout;
use crate::sequence_alignment::reverse_complement;

const ALPHABET: &[u8; 4] = b"ACGT";

/// One simulated read, stored the way a read store would hold it
#[derive(Clone, Debug)]
pub struct SimulatedRead {
    pub ident: u32,
    /// Bases in store orientation, reverse-complemented when `reverse` is set
    pub sequence: Vec<u8>,
    /// True span of the read on the genome
    pub min: usize,
    pub max: usize,
    pub reverse: bool
}

/// A simulated unitig: the true genome and a tiling of reads over it
#[derive(Clone, Debug)]
pub struct SimulatedUnitig {
    pub genome: Vec<u8>,
    pub reads: Vec<SimulatedRead>
}

impl SimulatedUnitig {
    /// Layout entries borrowing the simulated reads, with the true spans as the layout
    pub fn layouts(&self) -> Vec<ReadLayout<'_>> {
        self.reads.iter()
            .map(|r| ReadLayout {
                reverse: r.reverse,
                ..ReadLayout::new(r.ident, &r.sequence, r.min, r.max)
            })
            .collect()
    }
}

/// Creates a unitig we can verify is working.
/// Reads start every `step` bases and the last read is clipped to end with the genome.
/// # Arguments
/// * `genome_len` - the length of the true sequence
/// * `read_len` - the length of each read before errors
/// * `step` - distance between consecutive read starts
/// * `error_rate` - overall error rate, assumes mismatch, insertion, and deletion are equally likely sub-components of this error rate
/// * `allow_reverse` - if true, about half the reads are stored reverse-complemented
/// * `seed` - seed for the generator
pub fn generate_unitig(genome_len: usize, read_len: usize, step: usize, error_rate: f64, allow_reverse: bool, seed: u64) -> SimulatedUnitig {
    assert!(genome_len > 0 && read_len > 0 && step > 0);
    assert!((0.0..=1.0).contains(&error_rate));

    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let base_distribution = Uniform::new(0, ALPHABET.len());
    let basem1_distribution = Uniform::new(1, ALPHABET.len());
    let error_distribution = Uniform::new(0.0, 1.0);
    let error_type_distribution = Uniform::new(0, 3);

    let genome: Vec<u8> = (0..genome_len)
        .map(|_i| ALPHABET[rng.sample(base_distribution)])
        .collect();

    let mut reads = vec![];
    let mut start = 0;
    loop {
        let end = genome_len.min(start + read_len);
        let mut seq = vec![];
        for &c in genome[start..end].iter() {
            let is_error = rng.sample(error_distribution) < error_rate;
            if is_error {
                match rng.sample(error_type_distribution) {
                    0 => {
                        // substitution
                        let c_index = ALPHABET.iter().position(|&b| b == c).unwrap_or(0);
                        let sub_offset = rng.sample(basem1_distribution);
                        seq.push(ALPHABET[(c_index + sub_offset) % ALPHABET.len()]);
                    },
                    1 => {
                        // deletion
                    },
                    2 => {
                        // insertion after the true base
                        seq.push(c);
                        seq.push(ALPHABET[rng.sample(base_distribution)]);
                    },
                    _ => panic!("no impl")
                }
            } else {
                seq.push(c);
            }
        }

        let reverse = allow_reverse && rng.gen_bool(0.5);
        let sequence = if reverse { reverse_complement(&seq) } else { seq };
        reads.push(SimulatedRead {
            ident: reads.len() as u32,
            sequence,
            min: start,
            max: end,
            reverse
        });

        if end == genome_len {
            break;
        }
        start += step;
    }

    SimulatedUnitig {
        genome,
        reads
    }
}
