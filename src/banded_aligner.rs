/*!
Banded edit-distance alignment of a query that must be fully contained in a target (free target ends).
The search runs in three passes:
1. a forward column DP with Ukkonen's cutoff finds the best end in the target;
2. the same DP over the reversed sequences finds the matching start;
3. a global DP restricted to the diagonals reachable within the found distance recovers the edit script.

# Example usage
```rust
use utgcns::banded_aligner::BandedAligner;
use utgcns::sequence_alignment::EditOp;

let aligner = BandedAligner::new(None);
let result = aligner.align(b"ACGTTACG", b"TTTTACGTACGTTTT", 0.2).unwrap();
assert_eq!(result.edit_distance, 1);
assert_eq!((result.target_start, result.target_end), (4, 11));
assert!(result.ops.contains(&EditOp::Insertion));
```
*/

use log::trace;

use crate::errors::{Result, UtgcnsError};
use crate::sequence_alignment::{AlignmentResult, EditOp};

/// Traceback codes for the banded global pass
const TB_MATCH: u8 = 0;
const TB_MISMATCH: u8 = 1;
const TB_DELETION: u8 = 2;
const TB_INSERTION: u8 = 3;

/// Stateless banded aligner; the only setting is the optional wildcard symbol.
#[derive(Clone, Copy, Debug, Default)]
pub struct BandedAligner {
    /// Sets an optional wildcard symbol that will match anything
    wildcard: Option<u8>
}

impl BandedAligner {
    /// Creates a new aligner
    /// # Arguments
    /// * `wildcard` - a known wildcard symbol that will match anything, on either sequence
    pub fn new(wildcard: Option<u8>) -> BandedAligner {
        BandedAligner {
            wildcard
        }
    }

    /// Aligns all of `query` to the best matching substring of `target`.
    /// The search allows at most `ceil(max_error_rate * query.len())` edits, and the result is only returned if its measured error rate (edits per alignment column) is at most `max_error_rate`.
    /// # Arguments
    /// * `query` - the sequence that must be aligned end-to-end
    /// * `target` - the sequence the query is placed into
    /// * `max_error_rate` - the maximum allowed edits per alignment column
    /// # Errors
    /// * `AlignmentNotFound` if either input is empty or no alignment satisfies the bound
    pub fn align(&self, query: &[u8], target: &[u8], max_error_rate: f64) -> Result<AlignmentResult> {
        let not_found = || UtgcnsError::AlignmentNotFound {
            query_len: query.len(),
            target_len: target.len(),
            max_error_rate
        };

        if query.is_empty() || target.is_empty() || !(max_error_rate > 0.0) {
            return Err(not_found());
        }

        let max_edits = (max_error_rate * query.len() as f64).ceil() as usize;

        // pass 1: find the best end
        let (distance, target_end) = self.search_end(query.iter(), target.iter(), query.len(), target.len(), max_edits)
            .ok_or_else(not_found)?;

        // pass 2: walk backwards from that end to find the start
        let reverse_target = &target[..target_end];
        let (reverse_distance, reverse_end) = self.search_end(query.iter().rev(), reverse_target.iter().rev(), query.len(), reverse_target.len(), distance)
            .ok_or_else(not_found)?;
        assert_eq!(reverse_distance, distance);
        let target_start = target_end - reverse_end;

        // pass 3: recover the edit script
        let ops = self.banded_global(query, &target[target_start..target_end], distance);

        let result = AlignmentResult {
            query_start: 0,
            query_end: query.len(),
            target_start,
            target_end,
            edit_distance: distance,
            ops
        };

        let error_rate = result.edit_distance as f64 / result.alignment_length() as f64;
        trace!("align: {} x {} @ {max_error_rate:.4} => {result:?} ({error_rate:.4})", query.len(), target.len());
        if error_rate <= max_error_rate {
            Ok(result)
        } else {
            Err(not_found())
        }
    }

    /// Returns true if the two symbols should be treated as equal
    fn is_match(&self, a: u8, b: u8) -> bool {
        a == b || self.wildcard.map_or(false, |w| a == w || b == w)
    }

    /// Column-wise DP of `query` against `target` with a free start in the target, only tracking rows within `max_edits`.
    /// Returns the lowest distance at which the whole query is consumed, along with the earliest target end reaching it.
    /// # Arguments
    /// * `query` - iterator over the query symbols
    /// * `target` - iterator over the target symbols
    /// * `query_len` - number of query symbols
    /// * `target_len` - number of target symbols
    /// * `max_edits` - the maximum distance that is explored
    fn search_end<'a, Q, T>(&self, query: Q, target: T, query_len: usize, target_len: usize, max_edits: usize) -> Option<(usize, usize)>
    where
        Q: Iterator<Item = &'a u8>,
        T: Iterator<Item = &'a u8>
    {
        let query: Vec<u8> = query.copied().collect();
        let cap = max_edits + 1;

        // column 0 is all insertions
        let mut prev: Vec<usize> = (0..=query_len).map(|i| i.min(cap)).collect();
        let mut curr: Vec<usize> = vec![cap; query_len + 1];
        let mut last = query_len.min(max_edits);

        let mut best: Option<(usize, usize)> = None;
        if last == query_len {
            best = Some((query_len, 0));
        }

        for (j, &t) in target.enumerate().take(target_len) {
            curr[0] = 0;
            let limit = (last + 1).min(query_len);
            for i in 1..=limit {
                let diag = prev[i - 1] + usize::from(!self.is_match(query[i - 1], t));
                let deletion = if i <= last { prev[i] + 1 } else { cap };
                let insertion = curr[i - 1] + 1;
                curr[i] = diag.min(deletion).min(insertion).min(cap);
            }

            last = limit;
            while last > 0 && curr[last] > max_edits {
                last -= 1;
            }

            if last == query_len {
                let distance = curr[query_len];
                if best.map_or(true, |(d, _)| distance < d) {
                    best = Some((distance, j + 1));
                    if distance == 0 {
                        // cannot do better, and ties keep the earliest end
                        break;
                    }
                }
            }

            std::mem::swap(&mut prev, &mut curr);
        }

        best
    }

    /// Global alignment of `query` to `target` restricted to the diagonals that an alignment with `distance` edits can visit.
    /// Returns the edit script; ties prefer the diagonal, then deletions, then insertions.
    fn banded_global(&self, query: &[u8], target: &[u8], distance: usize) -> Vec<EditOp> {
        let m = query.len() as isize;
        let n = target.len() as isize;
        let d = distance as isize;
        assert!((n - m).abs() <= d);

        // diagonal is j - i
        let lo = (n - m - d).max(-d);
        let hi = d.min(n - m + d);
        let width = (hi - lo + 1) as usize;
        let inf = usize::MAX / 2;

        let mut prev = vec![inf; width];
        let mut curr = vec![inf; width];
        let mut traceback = vec![TB_MATCH; (query.len() + 1) * width];

        // row 0, only deletions
        for k in 0..width {
            let j = lo + k as isize;
            if (0..=n).contains(&j) {
                prev[k] = j as usize;
                traceback[k] = TB_DELETION;
            }
        }

        for i in 1..=m {
            let row_offset = i as usize * width;
            for k in 0..width {
                let j = i + lo + k as isize;
                curr[k] = inf;
                if j < 0 || j > n {
                    continue;
                }

                let mut best = inf;
                let mut code = TB_MATCH;
                if j >= 1 && prev[k] < inf {
                    let is_match = self.is_match(query[i as usize - 1], target[j as usize - 1]);
                    best = prev[k] + usize::from(!is_match);
                    code = if is_match { TB_MATCH } else { TB_MISMATCH };
                }
                if j >= 1 && k >= 1 && curr[k - 1] + 1 < best {
                    best = curr[k - 1] + 1;
                    code = TB_DELETION;
                }
                if k + 1 < width && prev[k + 1] + 1 < best {
                    best = prev[k + 1] + 1;
                    code = TB_INSERTION;
                }

                curr[k] = best;
                traceback[row_offset + k] = code;
            }
            std::mem::swap(&mut prev, &mut curr);
        }

        let end_k = (n - m - lo) as usize;
        assert_eq!(prev[end_k], distance);

        // walk back from (m, n)
        let mut ops = Vec::with_capacity((m + d) as usize);
        let mut i = m;
        let mut k = end_k as isize;
        while i > 0 || lo + k > 0 {
            let code = traceback[i as usize * width + k as usize];
            match code {
                TB_MATCH | TB_MISMATCH => {
                    ops.push(if code == TB_MATCH { EditOp::Match } else { EditOp::Mismatch });
                    i -= 1;
                },
                TB_DELETION => {
                    ops.push(EditOp::Deletion);
                    k -= 1;
                },
                _ => {
                    ops.push(EditOp::Insertion);
                    i -= 1;
                    k += 1;
                }
            }
        }
        ops.reverse();
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts the edits in a script, verifying it agrees with the sequences
    fn check_ops(query: &[u8], target: &[u8], result: &AlignmentResult, wildcard: Option<u8>) {
        let mut q = result.query_start;
        let mut t = result.target_start;
        let mut edits = 0;
        for op in result.ops.iter() {
            match op {
                EditOp::Match => {
                    assert!(query[q] == target[t] || Some(query[q]) == wildcard || Some(target[t]) == wildcard);
                    q += 1;
                    t += 1;
                },
                EditOp::Mismatch => {
                    assert_ne!(query[q], target[t]);
                    q += 1;
                    t += 1;
                    edits += 1;
                },
                EditOp::Insertion => {
                    q += 1;
                    edits += 1;
                },
                EditOp::Deletion => {
                    t += 1;
                    edits += 1;
                }
            }
        }
        assert_eq!(q, result.query_end);
        assert_eq!(t, result.target_end);
        assert_eq!(edits, result.edit_distance);
    }

    #[test]
    fn test_exact_match() {
        let aligner = BandedAligner::default();
        let query = b"ACGTACGT";
        let result = aligner.align(query, query, 0.1).unwrap();
        assert_eq!(result.edit_distance, 0);
        assert_eq!((result.target_start, result.target_end), (0, 8));
        assert_eq!(result.cigar(), "8=");
    }

    #[test]
    fn test_contained_match() {
        let aligner = BandedAligner::default();
        let query = b"GATTACA";
        let target = b"CCCCGATTACACCCC";
        let result = aligner.align(query, target, 0.1).unwrap();
        assert_eq!(result.edit_distance, 0);
        assert_eq!((result.target_start, result.target_end), (4, 11));
    }

    #[test]
    fn test_simple_mismatch() {
        let aligner = BandedAligner::default();
        let query = b"ACGTTCGT";
        let target = b"ACGTACGT";
        let result = aligner.align(query, target, 0.2).unwrap();
        assert_eq!(result.edit_distance, 1);
        assert_eq!(result.cigar(), "4=1X3=");
        check_ops(query, target, &result, None);
    }

    #[test]
    fn test_simple_insertion() {
        let aligner = BandedAligner::default();
        let query = b"AACCGGTTTACGTAGG";
        let target = b"GGAACCGGTTACGTAGGCC";
        let result = aligner.align(query, target, 0.1).unwrap();
        assert_eq!(result.edit_distance, 1);
        assert_eq!((result.target_start, result.target_end), (2, 17));
        check_ops(query, target, &result, None);
        assert_eq!(result.ops.iter().filter(|&&op| op == EditOp::Insertion).count(), 1);
    }

    #[test]
    fn test_simple_deletion() {
        let aligner = BandedAligner::default();
        let query = b"AACCGGTACGTAGG";
        let target = b"GGAACCGGTTACGTAGGCC";
        let result = aligner.align(query, target, 0.1).unwrap();
        assert_eq!(result.edit_distance, 1);
        assert_eq!((result.target_start, result.target_end), (2, 17));
        check_ops(query, target, &result, None);
        assert_eq!(result.ops.iter().filter(|&&op| op == EditOp::Deletion).count(), 1);
    }

    #[test]
    fn test_error_rate_bound() {
        let aligner = BandedAligner::default();
        let query = b"ACGTTCGT";
        let target = b"ACGTACGT";
        // 1 edit over 8 columns is 0.125
        assert!(aligner.align(query, target, 0.12).is_err());
        let result = aligner.align(query, target, 0.125).unwrap();
        assert!(result.error_rate() <= 0.125);
    }

    #[test]
    fn test_no_alignment() {
        let aligner = BandedAligner::default();
        let query = b"AAAAAAAAAA";
        let target = b"CCCCCCCCCCCCCCCCCCCC";
        let error = aligner.align(query, target, 0.2).unwrap_err();
        assert!(matches!(error, UtgcnsError::AlignmentNotFound { query_len: 10, target_len: 20, .. }));
    }

    #[test]
    fn test_empty_inputs() {
        let aligner = BandedAligner::default();
        assert!(aligner.align(b"", b"ACGT", 0.1).is_err());
        assert!(aligner.align(b"ACGT", b"", 0.1).is_err());
    }

    #[test]
    fn test_wildcards() {
        let aligner = BandedAligner::new(Some(b'N'));
        let query = b"ACGTACGT";
        let target = b"TTACNNNNGTTTT";
        let result = aligner.align(query, target, 0.1).unwrap();
        assert_eq!(result.edit_distance, 0);
        assert_eq!((result.target_start, result.target_end), (2, 10));
        check_ops(query, target, &result, Some(b'N'));

        // without the wildcard, the N block costs edits
        let aligner = BandedAligner::new(None);
        assert!(aligner.align(query, target, 0.1).is_err());
    }

    #[test]
    fn test_query_longer_than_target() {
        let aligner = BandedAligner::default();
        let query = b"ACGTACGTA";
        let target = b"ACGTACGT";
        let result = aligner.align(query, target, 0.2).unwrap();
        assert_eq!(result.edit_distance, 1);
        assert_eq!(result.alignment_length(), 9);
        check_ops(query, target, &result, None);
    }

    #[test]
    fn test_complex() {
        let aligner = BandedAligner::default();
        let query = b"TTGACCATGCAAGTCTGAGCATTACG";
        let target = b"GGGGGGTTGACATGCAAGTCCTGAGCATAACGGGGGG";
        let result = aligner.align(query, target, 0.15).unwrap();
        assert_eq!(result.edit_distance, 3);
        check_ops(query, target, &result, None);
        assert!(result.error_rate() <= 0.15);
    }
}
