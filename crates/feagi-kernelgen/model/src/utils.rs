// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Lexical helpers over code fragments

use crate::Precision;

/// Prefix shared by every random number primitive (`$(gennrand_uniform)`, `$(gennrand_normal)`, ...)
pub const RNG_MARKER: &str = "$(gennrand";

/// Does this code fragment draw random numbers?
///
/// This is a substring scan, not an analysis: a marker inside a comment is a
/// false positive and a primitive reached through a macro is a false negative.
/// Callers rely on exactly this approximation.
pub fn is_rng_required(code: &str) -> bool {
    code.contains(RNG_MARKER)
}

/// Does `code` contain the placeholder `$(name)` or a call `$(name, ...)`?
pub fn references_placeholder(code: &str, name: &str) -> bool {
    let needle = format!("$({}", name);
    code.match_indices(&needle).any(|(start, _)| {
        matches!(
            code[start + needle.len()..].chars().next(),
            Some(')') | Some(',') | Some(' ')
        )
    })
}

/// Integer division rounding up
#[inline(always)]
pub fn ceil_divide(numerator: usize, denominator: usize) -> usize {
    (numerator + denominator - 1) / denominator
}

/// Smallest multiple of `block_size` that is at least `size`
#[inline(always)]
pub fn pad_size(size: usize, block_size: usize) -> usize {
    ceil_divide(size, block_size) * block_size
}

/// Write a floating point constant so that it round-trips exactly in generated code
///
/// Non-finite values become the `<cmath>` macros `INFINITY` and `NAN`.
pub fn write_precise_string(value: f64) -> String {
    if value.is_nan() {
        "NAN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "INFINITY" } else { "-INFINITY" }.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.1}", value)
    } else {
        format!("{:e}", value)
    }
}

/// `scalar` literal for `value` in `precision`; macros for non-finite values take no suffix
pub fn scalar_literal(value: f64, precision: Precision) -> String {
    if value.is_finite() {
        format!("{}{}", write_precise_string(value), precision.literal_suffix())
    } else {
        write_precise_string(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_scan_is_lexical() {
        assert!(is_rng_required("$(V) += $(gennrand_normal);"));
        assert!(!is_rng_required("$(V) += 1.0;"));
        // Look-alike inside a comment still counts
        assert!(is_rng_required("// was $(gennrand_uniform)\n$(V) = 0;"));
    }

    #[test]
    fn test_references_placeholder() {
        assert!(references_placeholder("$(addToInSyn, $(g));", "addToInSyn"));
        assert!(references_placeholder("x = $(input);", "input"));
        assert!(!references_placeholder("$(inputCurrent)", "input"));
        assert!(!references_placeholder("$(addToInSynDelay, $(g), 2);", "addToInSyn"));
    }

    #[test]
    fn test_padding() {
        assert_eq!(ceil_divide(10, 3), 4);
        assert_eq!(pad_size(100, 32), 128);
        assert_eq!(pad_size(64, 32), 64);
    }

    #[test]
    fn test_precise_string() {
        assert_eq!(write_precise_string(2.0), "2.0");
        assert_eq!(write_precise_string(0.1).parse::<f64>().unwrap(), 0.1);
    }

    #[test]
    fn test_non_finite_literals() {
        assert_eq!(write_precise_string(f64::INFINITY), "INFINITY");
        assert_eq!(write_precise_string(f64::NEG_INFINITY), "-INFINITY");
        assert_eq!(write_precise_string(f64::NAN), "NAN");

        assert_eq!(scalar_literal(f64::INFINITY, Precision::Float), "INFINITY");
        assert_eq!(scalar_literal(f64::NAN, Precision::Double), "NAN");
        assert_eq!(scalar_literal(2.0, Precision::Float), "2.0f");
        assert_eq!(scalar_literal(2.0, Precision::Double), "2.0");
    }
}
