//! Text canonicalization for comparison.
//!
//! Two strings that normalize identically are treated as the same text by
//! every later stage, regardless of surface formatting.

/// Typographic characters folded to their ASCII equivalents.
const FOLDS: &[(char, char)] = &[
    ('\u{00B4}', '\''), // acute accent
    ('\u{2019}', '\''), // right single quote
    ('\u{2018}', '\''), // left single quote
    ('\u{2013}', '-'),  // en dash
    ('\u{2014}', '-'),  // em dash
    ('\u{201C}', '"'),  // left double quote
    ('\u{201D}', '"'),  // right double quote
];

/// Canonicalize `text`: strip, lower-case, fold quote and dash variants,
/// and collapse every whitespace run to a single space.
///
/// Total and pure; empty input yields an empty string.
///
/// ```rust
/// use carryover_core::normalize::normalize;
///
/// assert_eq!(normalize("  What’s   CO2 —\tReally? "), "what's co2 - really?");
/// ```
pub fn normalize(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut pending_space = false;
    for ch in lowered.chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        let folded = FOLDS
            .iter()
            .find(|(from, _)| *from == ch)
            .map(|(_, to)| *to)
            .unwrap_or(ch);
        out.push(folded);
    }
    out
}

/// [`normalize`] for optional input; `None` yields an empty string.
pub fn normalize_opt(text: Option<&str>) -> String {
    text.map(normalize).unwrap_or_default()
}
