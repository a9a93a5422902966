//! Multi-signal similarity scoring between two normalized strings.
//!
//! # Signals
//!
//! | Signal | Score |
//! |--------|-------|
//! | Exact | `2.0` when `a == b` |
//! | Prefix dominance | `1.3 + 0.5 × shorter/longer` when the shorter string has ≥ 24 chars and prefixes the other |
//! | Sequence | matching-block ratio `2M / (|a| + |b|)` in `[0, 1]` |
//! | Token overlap | whitespace-token Jaccard × `0.95` |
//!
//! The score is the **maximum** of the signals, not a weighted sum: each
//! signal fires in a different failure mode (truncation, reordering, light
//! edits) and one strong signal is trusted on its own.
//!
//! Callers compare incoming → existing; only the exact case is guaranteed
//! symmetric.

use std::collections::{HashMap, HashSet};

/// Score returned for identical normalized strings.
pub const EXACT_SCORE: f64 = 2.0;

/// Minimum length (in chars) of the shorter string for the prefix signal.
pub const PREFIX_MIN_CHARS: usize = 24;

const PREFIX_BASE: f64 = 1.3;
const PREFIX_RATIO_WEIGHT: f64 = 0.5;
const TOKEN_WEIGHT: f64 = 0.95;

/// Sequences at least this long get the popular-element heuristic.
const AUTOJUNK_MIN_LEN: usize = 200;

/// Confidence that `a` and `b` (both already normalized) are the same text.
///
/// Returns `0.0` if either input is empty and [`EXACT_SCORE`] if they are
/// identical; otherwise the maximum of the prefix, sequence, and token
/// signals.
pub fn score(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return EXACT_SCORE;
    }

    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    prefix_score(a, b, a_chars.len(), b_chars.len())
        .max(sequence_ratio(&a_chars, &b_chars))
        .max(token_score(a, b))
}

fn prefix_score(a: &str, b: &str, a_len: usize, b_len: usize) -> f64 {
    let shortest = a_len.min(b_len);
    let longest = a_len.max(b_len);
    if shortest >= PREFIX_MIN_CHARS && (a.starts_with(b) || b.starts_with(a)) {
        PREFIX_BASE + PREFIX_RATIO_WEIGHT * (shortest as f64 / longest as f64)
    } else {
        0.0
    }
}

fn token_score(a: &str, b: &str) -> f64 {
    let a_tokens: HashSet<&str> = a.split_whitespace().collect();
    let b_tokens: HashSet<&str> = b.split_whitespace().collect();
    let union = a_tokens.union(&b_tokens).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a_tokens.intersection(&b_tokens).count();
    TOKEN_WEIGHT * intersection as f64 / union as f64
}

/// Fraction of characters covered by matching blocks: `2M / (|a| + |b|)`.
///
/// Blocks are found Ratcliff/Obershelp style: take the longest common
/// contiguous run, then recurse on the pieces to its left and right. For
/// `b` of 200+ chars, characters occurring in more than 1% of `b` are not
/// used to seed a block (they may still extend one).
pub fn sequence_ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matcher = BlockMatcher::new(a, b);
    2.0 * matcher.matched_chars() as f64 / total as f64
}

struct BlockMatcher<'a> {
    a: &'a [char],
    b: &'a [char],
    /// Positions of each char in `b`, ascending, popular chars removed.
    b_index: HashMap<char, Vec<usize>>,
}

impl<'a> BlockMatcher<'a> {
    fn new(a: &'a [char], b: &'a [char]) -> Self {
        let mut b_index: HashMap<char, Vec<usize>> = HashMap::new();
        for (j, ch) in b.iter().enumerate() {
            b_index.entry(*ch).or_default().push(j);
        }
        if b.len() >= AUTOJUNK_MIN_LEN {
            let limit = b.len() / 100 + 1;
            b_index.retain(|_, positions| positions.len() <= limit);
        }
        Self { a, b, b_index }
    }

    fn matched_chars(&self) -> usize {
        let mut total = 0;
        let mut queue = vec![(0, self.a.len(), 0, self.b.len())];
        while let Some((alo, ahi, blo, bhi)) = queue.pop() {
            let (i, j, k) = self.longest_match(alo, ahi, blo, bhi);
            if k == 0 {
                continue;
            }
            total += k;
            if alo < i && blo < j {
                queue.push((alo, i, blo, j));
            }
            if i + k < ahi && j + k < bhi {
                queue.push((i + k, ahi, j + k, bhi));
            }
        }
        total
    }

    /// Longest block `a[i..i+k] == b[j..j+k]` inside the given window.
    /// Ties go to the earliest `i`, then the earliest `j`.
    fn longest_match(&self, alo: usize, ahi: usize, blo: usize, bhi: usize) -> (usize, usize, usize) {
        let (mut best_i, mut best_j, mut best_k) = (alo, blo, 0usize);
        let mut run_len: HashMap<usize, usize> = HashMap::new();
        for i in alo..ahi {
            let mut next_run_len: HashMap<usize, usize> = HashMap::new();
            if let Some(positions) = self.b_index.get(&self.a[i]) {
                for &j in positions {
                    if j < blo {
                        continue;
                    }
                    if j >= bhi {
                        break;
                    }
                    let k = j
                        .checked_sub(1)
                        .and_then(|prev| run_len.get(&prev))
                        .copied()
                        .unwrap_or(0)
                        + 1;
                    next_run_len.insert(j, k);
                    if k > best_k {
                        best_i = i + 1 - k;
                        best_j = j + 1 - k;
                        best_k = k;
                    }
                }
            }
            run_len = next_run_len;
        }

        // Popular chars never seed a block; let them grow one at either end.
        while best_i > alo && best_j > blo && self.a[best_i - 1] == self.b[best_j - 1] {
            best_i -= 1;
            best_j -= 1;
            best_k += 1;
        }
        while best_i + best_k < ahi
            && best_j + best_k < bhi
            && self.a[best_i + best_k] == self.b[best_j + best_k]
        {
            best_k += 1;
        }
        (best_i, best_j, best_k)
    }
}
