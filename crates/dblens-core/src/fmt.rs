//! Shared formatting helpers for finding text and the text renderer.

use crate::analysis::fields::Scalar;

// ---------------------------------------------------------------------------
// Numbers
// ---------------------------------------------------------------------------

/// Integer with `,` thousands separators: `1234567` → `"1,234,567"`.
pub fn thousands(v: i64) -> String {
    let digits = v.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if v < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Count-like scalar for display. Integers get separators, anything else
/// is shown as reported.
pub fn format_count(v: &Scalar) -> String {
    match v {
        Scalar::Int(n) => thousands(*n),
        Scalar::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => thousands(*f as i64),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Text normalization
// ---------------------------------------------------------------------------

/// First `max` characters of `s`. Never splits a character.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Normalize text for single-line display: newlines and tabs become spaces,
/// runs of spaces collapse into one.
pub fn normalize_for_display(s: &str) -> String {
    let s = s.replace('\n', " ").replace('\r', "").replace('\t', " ");
    let mut result = String::with_capacity(s.len());
    let mut prev_space = false;
    for ch in s.chars() {
        if ch == ' ' {
            if !prev_space {
                result.push(ch);
            }
            prev_space = true;
        } else {
            result.push(ch);
            prev_space = false;
        }
    }
    result
}
