// Number display helpers shared by every engine's `formatted` field.

/// General number display: integers without decimals, otherwise up to ten
/// decimals with trailing zeros removed.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() };
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        return format!("{}", n as i64);
    }
    let s = format!("{:.10}", n);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

/// Currency display with two decimals and thousands separators: `$1,073.64`.
pub fn format_currency(n: f64) -> String {
    if !n.is_finite() {
        return format_number(n);
    }
    let fixed = format!("{:.2}", n.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let grouped = group_thousands(int_part);
    if n < 0.0 && fixed != "0.00" {
        format!("-${}.{}", grouped, frac_part)
    } else {
        format!("${}.{}", grouped, frac_part)
    }
}

/// Rate display: `0.2809` becomes `28.09%`.
pub fn format_percent(rate: f64) -> String {
    if !rate.is_finite() {
        return format_number(rate);
    }
    format!("{:.2}%", rate * 100.0)
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(200.0), "200");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(0.25), "0.25");
        assert_eq!(format_number(1.0 / 3.0), "0.3333333333");
        assert_eq!(format_number(f64::NAN), "NaN");
    }

    #[test]
    fn test_format_currency() {
        assert_eq!(format_currency(1073.6432), "$1,073.64");
        assert_eq!(format_currency(1234567.0), "$1,234,567.00");
        assert_eq!(format_currency(-50.5), "-$50.50");
        assert_eq!(format_currency(0.0), "$0.00");
        assert_eq!(format_currency(999.999), "$1,000.00");
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(0.28086), "28.09%");
        assert_eq!(format_percent(0.05), "5.00%");
    }
}
