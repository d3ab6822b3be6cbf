//! Word-order-insensitive string similarity.
//!
//! Both inputs are lowercased, split on whitespace, and their tokens sorted and
//! rejoined before comparison, so "web app react" and "react web application"
//! are compared as "app react web" and "application react web".
//!
//! The score is the normalized InDel similarity (insertions and deletions only):
//! `2 * LCS / (len_a + len_b)`, scaled to 0..=100. Thresholds compare the
//! unrounded value; only reported scores are rounded.

/// Token-sort similarity of `a` and `b` in the range 0..=100, rounded.
///
/// Returns 0 when either side is empty after processing.
pub fn token_sort_ratio(a: &str, b: &str) -> u8 {
    to_score(token_sort_similarity(a, b))
}

/// Unrounded token-sort similarity in `0.0..=100.0`.
pub fn token_sort_similarity(a: &str, b: &str) -> f64 {
    let a = sort_tokens(a);
    let b = sort_tokens(b);
    ratio(&a, &b)
}

/// Round an unrounded similarity to the reported integer score.
pub fn to_score(similarity: f64) -> u8 {
    similarity.round().clamp(0.0, 100.0) as u8
}

/// Lowercase, split on whitespace, sort, and rejoin with single spaces.
pub fn sort_tokens(s: &str) -> String {
    let lowered = s.to_lowercase();
    let mut tokens: Vec<&str> = lowered.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Normalized InDel similarity of two already-processed strings.
fn ratio(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let total = a_chars.len() + b_chars.len();
    if a_chars.is_empty() || b_chars.is_empty() {
        return 0.0;
    }

    let lcs = lcs_len(&a_chars, &b_chars);
    (200 * lcs) as f64 / total as f64
}

/// Length of the longest common subsequence, two-row dynamic programming.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let n = b.len();
    let mut prev = vec![0usize; n + 1];
    let mut curr = vec![0usize; n + 1];

    for &ca in a {
        for j in 1..=n {
            curr[j] = if ca == b[j - 1] {
                prev[j - 1] + 1
            } else {
                prev[j].max(curr[j - 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}
