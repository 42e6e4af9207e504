//! Best-effort parameter extraction.
//!
//! Every extractor returns `Option`/leaves fields unset on a miss. Nothing in
//! here fails; downstream engines report `ParameterMissing` for absent fields.

use serde::{Deserialize, Serialize};

use crate::patterns;

/// Parameters pulled out of a query. All fields are optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Parameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,

    // Unit conversion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_unit: Option<String>,

    // Ratio problems
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratio1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratio2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_first_known: Option<bool>,

    /// Function name for financial and statistical queries (`PMT`, `STDEV`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,

    // Financial
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pv: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fv: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nper: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub years: Option<f64>,
    /// Set when `nper` counts months, so an annual `rate` must be divided by 12.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly_periods: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cash_flows: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_value: Option<f64>,

    // Statistical
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub population: Option<bool>,

    /// Word-problem kind: discount, tax, margin, markup, commission, tip.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_problem: Option<String>,
}

impl Parameters {
    pub fn is_empty(&self) -> bool {
        *self == Parameters::default()
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn num(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// True if `phrase` occurs in `text` on word boundaries.
pub(crate) fn contains_phrase(text: &str, phrase: &str) -> bool {
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(found) = text[start..].find(phrase) {
        let begin = start + found;
        let end = begin + phrase.len();
        let before_ok = begin == 0 || !bytes[begin - 1].is_ascii_alphanumeric();
        let after_ok = end == text.len() || !bytes[end].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return true;
        }
        start = begin + 1;
        while start < text.len() && !text.is_char_boundary(start) {
            start += 1;
        }
    }
    false
}

fn contains_any(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| contains_phrase(text, p))
}

fn singular(word: &str) -> &str {
    word.strip_suffix('s').unwrap_or(word)
}

/// First capture of `re` whose number is not a percentage or a period count.
fn amount_after(re: &regex::Regex, text: &str) -> Option<f64> {
    for caps in re.captures_iter(text) {
        let Some(m) = caps.get(1) else { continue };
        let rest = text[m.end()..].trim_start();
        if rest.starts_with('%') || starts_with_period_word(rest) {
            continue;
        }
        if let Some(v) = num(m.as_str()) {
            return Some(v);
        }
    }
    None
}

fn starts_with_period_word(rest: &str) -> bool {
    ["year", "yr", "month", "mo", "period", "quarter"]
        .iter()
        .any(|w| rest.starts_with(w))
}

fn all_numbers(text: &str) -> Vec<f64> {
    patterns::number()
        .find_iter(text)
        .filter_map(|m| num(m.as_str()))
        .collect()
}

// =============================================================================
// Percentages and arithmetic
// =============================================================================

/// `"X% of Y"` → (X, Y) together with the literal texts.
pub(crate) fn percentage_of(text: &str) -> Option<(f64, f64, String, String)> {
    let caps = patterns::percent_of().captures(text)?;
    let pct_text = caps[1].to_string();
    let total_text = caps[2].to_string();
    Some((num(&pct_text)?, num(&total_text)?, pct_text, total_text))
}

const EXPRESSION_FUNCTIONS: &[&str] = &[
    "abs", "sqrt", "round", "floor", "ceil", "min", "max", "pow", "ln", "log", "log10", "exp", "pi",
    "e",
];

/// Turn a lowercased query into an arithmetic expression, if it is one.
///
/// Returns the expression and whether word operators or functions were needed.
pub(crate) fn arithmetic_expression(lower: &str) -> Option<(String, bool)> {
    let stripped = patterns::leading_phrase().replace(lower, "");
    let stripped = stripped.trim().trim_end_matches(['?', '!', '.', ' ']);

    let mut used_words = false;
    let converted = patterns::word_operator().replace_all(stripped, |caps: &regex::Captures| {
        used_words = true;
        match &caps[1] {
            "plus" => "+",
            "minus" => "-",
            "times" | "multiplied by" => "*",
            "divided by" | "over" => "/",
            "to the power of" => "^",
            "mod" => "%",
            "squared" => "^2",
            _ => "^3",
        }
    });
    let expr = patterns::whitespace().replace_all(converted.trim(), " ").to_string();

    if expr.is_empty()
        || !patterns::arithmetic_chars().is_match(&expr)
        || !patterns::has_operator().is_match(&expr)
    {
        return None;
    }

    let mut used_functions = false;
    for ident in patterns::identifier().find_iter(&expr) {
        if !EXPRESSION_FUNCTIONS.contains(&ident.as_str()) {
            return None;
        }
        used_functions = true;
    }

    Some((expr, used_words || used_functions))
}

// =============================================================================
// Unit conversion
// =============================================================================

const KNOWN_UNITS: &[&str] = &[
    // length
    "mm", "millimeter", "millimeters", "millimetre", "millimetres", "cm", "centimeter",
    "centimeters", "centimetre", "centimetres", "m", "meter", "meters", "metre", "metres", "km",
    "kilometer", "kilometers", "kilometre", "kilometres", "in", "inch", "inches", "ft", "foot",
    "feet", "yd", "yard", "yards", "mi", "mile", "miles",
    // mass
    "mg", "g", "gram", "grams", "kg", "kilogram", "kilograms", "kilo", "kilos", "oz", "ounce",
    "ounces", "lb", "lbs", "pound", "pounds", "ton", "tons", "tonne", "tonnes",
    // volume
    "ml", "milliliter", "milliliters", "millilitre", "millilitres", "l", "liter", "liters",
    "litre", "litres", "gal", "gallon", "gallons", "qt", "quart", "quarts", "cup", "cups",
    // time
    "s", "sec", "secs", "second", "seconds", "min", "mins", "minute", "minutes", "h", "hr",
    "hrs", "hour", "hours", "day", "days", "week", "weeks", "year", "years",
    // speed
    "mph", "kph", "kmh",
    // temperature
    "c", "f", "k", "celsius", "fahrenheit", "kelvin",
];

fn canonical_unit_token(token: &str) -> String {
    let t = token.trim();
    let t = t.strip_prefix('°').unwrap_or(t);
    let t = t
        .strip_prefix("degrees ")
        .or_else(|| t.strip_prefix("degree "))
        .unwrap_or(t);
    t.trim().to_string()
}

pub(crate) fn is_known_unit(unit: &str) -> bool {
    KNOWN_UNITS.contains(&unit)
}

/// `"convert 10 km to miles"`, `"100°c in f"` → (value, from, to).
pub(crate) fn unit_conversion(lower: &str) -> Option<(f64, String, String)> {
    for caps in patterns::unit_conversion().captures_iter(lower) {
        let from = canonical_unit_token(&caps[2]);
        let to = canonical_unit_token(&caps[3]);
        if is_known_unit(&from) && is_known_unit(&to) && from != to {
            if let Some(value) = num(&caps[1]) {
                return Some((value, from, to));
            }
        }
    }
    None
}

// =============================================================================
// Ratios
// =============================================================================

pub(crate) struct RatioParams {
    pub ratio1: f64,
    pub ratio2: f64,
    pub known_value: Option<f64>,
    pub is_first_known: Option<bool>,
}

pub(crate) fn ratio(lower: &str) -> Option<RatioParams> {
    let pair = patterns::ratio_pair().captures(lower)?;
    let ratio1 = num(&pair[1])?;
    let ratio2 = num(&pair[2])?;

    let labels = patterns::ratio_labels()
        .captures(lower)
        .or_else(|| patterns::ratio_of_labels().captures(lower))
        .map(|c| (c[1].to_string(), c[2].to_string()));

    if labels.is_none() && !contains_phrase(lower, "ratio") {
        return None;
    }

    let label_position = |name: &str| -> Option<bool> {
        let (first, second) = labels.as_ref()?;
        if singular(name) == singular(first) {
            Some(true)
        } else if singular(name) == singular(second) {
            Some(false)
        } else {
            None
        }
    };

    let mut known_value = None;
    let mut is_first_known = None;

    for caps in patterns::labelled_value().captures_iter(lower) {
        let Some(value_match) = caps.get(2) else { continue };
        if lower[value_match.end()..].trim_start().starts_with(':') {
            continue;
        }
        let name = &caps[1];
        let position = match (&labels, label_position(name)) {
            (Some(_), Some(first)) => Some(first),
            (Some(_), None) => continue,
            (None, _) if name == "ratio" => continue,
            (None, _) => Some(true),
        };
        known_value = num(value_match.as_str());
        is_first_known = position;
        break;
    }

    if known_value.is_none() && labels.is_some() {
        for caps in patterns::counted_value().captures_iter(lower) {
            if let Some(first) = label_position(&caps[2]) {
                known_value = num(&caps[1]);
                is_first_known = Some(first);
                break;
            }
        }
    }

    Some(RatioParams { ratio1, ratio2, known_value, is_first_known })
}

// =============================================================================
// Word problems
// =============================================================================

pub(crate) fn word_problem(lower: &str) -> Option<(String, Option<f64>, Option<f64>)> {
    if contains_any(lower, &["discount rate", "discounted cash", "npv", "irr", "pmt"]) {
        return None;
    }
    let caps = patterns::word_problem().captures(lower)?;
    let kind = match &caps[1] {
        "discount" | "discounted" | "sale price" => "discount",
        "tax" | "sales tax" | "vat" => "tax",
        "margin" => "margin",
        "markup" => "markup",
        "commission" => "commission",
        _ => "tip",
    };
    let percentage = patterns::any_percent()
        .captures(lower)
        .and_then(|c| num(&c[1]));
    let amount = patterns::number().find_iter(lower).find_map(|m| {
        if lower[m.end()..].trim_start().starts_with('%') {
            None
        } else {
            num(m.as_str())
        }
    });
    Some((kind.to_string(), percentage, amount))
}

// =============================================================================
// Financial
// =============================================================================

const FINANCIAL_FUNCTIONS: &[(&[&str], &str)] = &[
    (&["irr", "internal rate of return"], "IRR"),
    (&["npv", "net present value"], "NPV"),
    (&["cagr", "compound annual growth", "growth rate"], "CAGR"),
    (&["fv", "future value"], "FV"),
    (&["pv", "present value"], "PV"),
    (
        &["nper", "how long", "how many months", "how many years", "how many payments"],
        "NPER",
    ),
    (
        &["pmt", "payment", "payments", "mortgage", "loan", "amortization", "amortisation"],
        "PMT",
    ),
];

pub(crate) fn has_financial_function_name(lower: &str) -> bool {
    contains_any(lower, &["pmt", "npv", "irr", "fv", "pv", "nper", "cagr"])
}

pub(crate) fn financial(lower: &str, params: &mut Parameters) {
    params.cash_flows = patterns::cash_flow_list().captures(lower).map(|caps| {
        caps[1]
            .split(',')
            .filter_map(|part| num(part.trim()))
            .collect()
    });

    params.rate = patterns::rate_keyword_percent()
        .captures(lower)
        .or_else(|| patterns::percent_then_rate_word().captures(lower))
        .or_else(|| patterns::any_percent().captures(lower))
        .and_then(|c| num(&c[1]))
        .map(|pct| pct / 100.0);

    params.pv = amount_after(patterns::pv_amount(), lower);
    params.fv = amount_after(patterns::fv_amount(), lower);
    params.pmt = amount_after(patterns::payment_amount(), lower);

    if let Some(caps) = patterns::period_count().captures(lower) {
        if let Some(count) = num(&caps[1]) {
            let unit = &caps[2];
            if unit.starts_with('y') {
                params.years = Some(count);
                params.nper = Some(count * 12.0);
                params.monthly_periods = Some(true);
            } else if unit.starts_with("mo") {
                params.years = Some(count / 12.0);
                params.nper = Some(count);
                params.monthly_periods = Some(true);
            } else if unit.starts_with('q') {
                params.years = Some(count / 4.0);
                params.nper = Some(count * 3.0);
                params.monthly_periods = Some(true);
            } else {
                params.nper = Some(count);
                params.monthly_periods = Some(false);
            }
        }
    }

    if let Some(caps) = patterns::from_to_values().captures(lower) {
        params.start_value = num(&caps[1]);
        params.end_value = num(&caps[2]);
    }

    let mut function = FINANCIAL_FUNCTIONS
        .iter()
        .find(|(phrases, _)| contains_any(lower, phrases))
        .map(|(_, name)| name.to_string());
    if function.is_none() && params.cash_flows.is_some() {
        function = Some(if params.rate.is_some() { "NPV" } else { "IRR" }.to_string());
    }
    params.function = function;

    // A bare principal with no keyword: take the largest plain amount.
    if params.pv.is_none() && matches!(params.function.as_deref(), Some("PMT" | "FV" | "NPER")) {
        params.pv = plain_amounts(lower)
            .into_iter()
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
    }
}

fn plain_amounts(lower: &str) -> Vec<f64> {
    patterns::number()
        .find_iter(lower)
        .filter(|m| {
            let rest = lower[m.end()..].trim_start();
            !rest.starts_with('%') && !starts_with_period_word(rest)
        })
        .filter_map(|m| num(m.as_str()))
        .collect()
}

// =============================================================================
// Statistical
// =============================================================================

const STATISTICAL_FUNCTIONS: &[(&[&str], &str)] = &[
    (&["standard deviation", "std dev", "stddev", "stdev"], "STDEV"),
    (&["variance", "var"], "VAR"),
    (&["average", "mean"], "AVERAGE"),
    (&["median"], "MEDIAN"),
    (&["mode"], "MODE"),
    (&["minimum", "min", "lowest", "smallest"], "MIN"),
    (&["maximum", "max", "highest", "largest"], "MAX"),
    (&["count"], "COUNT"),
    (&["sum", "total"], "SUM"),
];

pub(crate) fn statistical(lower: &str, params: &mut Parameters) {
    params.function = STATISTICAL_FUNCTIONS
        .iter()
        .find(|(phrases, _)| contains_any(lower, phrases))
        .map(|(_, name)| name.to_string());

    let population = contains_phrase(lower, "population")
        || lower.contains("stdev.p")
        || lower.contains("var.p");
    if matches!(params.function.as_deref(), Some("STDEV" | "VAR")) {
        params.population = Some(population);
    }

    let values = all_numbers(lower);
    if !values.is_empty() {
        params.values = Some(values);
    }
}
