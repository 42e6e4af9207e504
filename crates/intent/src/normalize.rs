//! Surface normalization applied before any pattern matching.

use crate::patterns;

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '₹'];

/// Normalize a query for matching.
///
/// - `×` and `÷` become `*` and `/`
/// - currency symbols are removed
/// - thousands separators are removed, including multi-group `1,234,567`
/// - `10M`, `500K`, `2B` become literal magnitudes
/// - `percent`/`pct` become `%`
/// - runs of whitespace collapse to one space
///
/// Idempotent: `normalize(&normalize(x)) == normalize(x)`.
pub fn normalize(text: &str) -> String {
    let mapped: String = text
        .chars()
        .filter(|c| !CURRENCY_SYMBOLS.contains(c))
        .map(|c| match c {
            '×' => '*',
            '÷' => '/',
            other => other,
        })
        .collect();

    let without_separators = remove_thousands_separators(&mapped);
    let expanded = expand_magnitudes(&without_separators);
    let percents = patterns::percent_word().replace_all(&expanded, "%");
    patterns::whitespace()
        .replace_all(&percents, " ")
        .trim()
        .to_string()
}

fn remove_thousands_separators(text: &str) -> String {
    // Each pass removes one separator per group; multi-group numbers need several.
    let mut current = text.to_string();
    loop {
        let next = patterns::thousands_separator()
            .replace_all(&current, "${1}${2}${3}")
            .into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

fn expand_magnitudes(text: &str) -> String {
    patterns::magnitude_suffix()
        .replace_all(text, |caps: &regex::Captures| {
            let int_part = &caps[1];
            let frac_part = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let zeros = match caps[3].to_ascii_lowercase().as_str() {
                "k" => 3,
                "m" => 6,
                _ => 9,
            };
            shift_decimal(int_part, frac_part, zeros)
        })
        .into_owned()
}

/// Multiply a decimal literal by 10^zeros without going through floating point.
fn shift_decimal(int_part: &str, frac_part: &str, zeros: usize) -> String {
    let mut digits = String::with_capacity(int_part.len() + zeros + 1);
    digits.push_str(int_part);
    if frac_part.len() <= zeros {
        digits.push_str(frac_part);
        digits.extend(std::iter::repeat('0').take(zeros - frac_part.len()));
    } else {
        digits.push_str(&frac_part[..zeros]);
        digits.push('.');
        digits.push_str(&frac_part[zeros..]);
    }
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() || trimmed.starts_with('.') {
        format!("0{}", trimmed)
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_and_separators() {
        assert_eq!(normalize("15% of $8,500"), "15% of 8500");
        assert_eq!(normalize("€1,234,567.89 total"), "1234567.89 total");
        assert_eq!(normalize("£12"), "12");
    }

    #[test]
    fn test_list_commas_survive() {
        assert_eq!(normalize("10, 20, 30"), "10, 20, 30");
        assert_eq!(normalize("-100000,30000,40000"), "-100000,30000,40000");
    }

    #[test]
    fn test_magnitudes() {
        assert_eq!(normalize("$10M loan"), "10000000 loan");
        assert_eq!(normalize("500K"), "500000");
        assert_eq!(normalize("2B"), "2000000000");
        assert_eq!(normalize("1.5m"), "1500000");
        assert_eq!(normalize("2.5k"), "2500");
        assert_eq!(normalize("0.0005k"), "0.5");
        assert_eq!(normalize("1,000k"), "1000000");
    }

    #[test]
    fn test_units_are_not_magnitudes() {
        assert_eq!(normalize("5 km"), "5 km");
        assert_eq!(normalize("10 mb"), "10 mb");
    }

    #[test]
    fn test_operators_and_percent_words() {
        assert_eq!(normalize("6 × 7 ÷ 2"), "6 * 7 / 2");
        assert_eq!(normalize("15 percent of 200"), "15% of 200");
        assert_eq!(normalize("  lots   of\tspace "), "lots of space");
    }

    #[test]
    fn test_shift_decimal() {
        assert_eq!(shift_decimal("1", "25", 3), "1250");
        assert_eq!(shift_decimal("3", "1415", 3), "3141.5");
        assert_eq!(shift_decimal("007", "", 3), "7000");
    }
}
