//! Ordered precedence chain classifying a query.
//!
//! Rules run in order and the first match wins. Every rule is a plain
//! function over the prepared [`Query`], so adding a rule means adding one
//! entry to [`RULES`].

use serde::{Deserialize, Serialize};

use abacus_core::IntentType;

use crate::extract::{self, Parameters};
use crate::normalize::normalize;
use crate::patterns;

/// Classification of a query. Always produced, even for non-calculations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    #[serde(rename = "type")]
    pub intent: IntentType,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub normalized_expression: String,
    pub parameters: Parameters,
}

impl DetectionResult {
    fn new(intent: IntentType, confidence: f64, normalized_expression: impl Into<String>) -> Self {
        Self {
            intent,
            confidence: confidence.clamp(0.0, 1.0),
            normalized_expression: normalized_expression.into(),
            parameters: Parameters::default(),
        }
    }

    fn none(normalized_expression: impl Into<String>) -> Self {
        Self::new(IntentType::None, 1.0, normalized_expression)
    }

    fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn is_calculation(&self) -> bool {
        self.intent != IntentType::None
    }
}

/// A query prepared once for all rules.
struct Query {
    /// Trimmed original text.
    raw: String,
    normalized: String,
    lower: String,
}

impl Query {
    fn new(text: &str) -> Self {
        let normalized = normalize(text);
        let lower = normalized.to_lowercase();
        Self { raw: text.trim().to_string(), normalized, lower }
    }
}

type Rule = fn(&Query) -> Option<DetectionResult>;

const RULES: &[(&str, Rule)] = &[
    ("formula_prefix", formula_prefix),
    ("exclusion", exclusion),
    ("unit_conversion", unit_conversion),
    ("ratio", ratio),
    ("magnitude", magnitude),
    ("word_problem", word_problem),
    ("formula_syntax", formula_syntax),
    ("simple_math", simple_math),
    ("financial", financial),
    ("statistical", statistical),
    ("multi_step", multi_step),
];

/// Classify a query. Never fails; unrecognized input is `None` with confidence 1.0.
pub fn detect(query: &str) -> DetectionResult {
    let q = Query::new(query);
    if q.raw.is_empty() {
        return DetectionResult::none("");
    }
    for (name, rule) in RULES {
        if let Some(result) = rule(&q) {
            log::debug!(
                "detect: rule={} type={} confidence={:.2}",
                name,
                result.intent,
                result.confidence
            );
            return result;
        }
    }
    log::debug!("detect: no rule matched");
    DetectionResult::none(q.normalized)
}

// =============================================================================
// Rules
// =============================================================================

/// An explicit leading `=` always means a spreadsheet formula.
fn formula_prefix(q: &Query) -> Option<DetectionResult> {
    q.raw
        .starts_with('=')
        .then(|| DetectionResult::new(IntentType::SpreadsheetFormula, 0.95, q.raw.clone()))
}

fn exclusion(q: &Query) -> Option<DetectionResult> {
    let text = &q.lower;
    let excluded = patterns::document_request().is_match(text)
        || (patterns::explanation_question().is_match(text)
            && !text.chars().any(|c| c.is_ascii_digit()))
        || (patterns::external_source().is_match(text)
            && patterns::extraction_phrase().is_match(text));
    excluded.then(|| DetectionResult::none(q.normalized.clone()))
}

fn unit_conversion(q: &Query) -> Option<DetectionResult> {
    let (value, from_unit, to_unit) = extract::unit_conversion(&q.lower)?;
    let confidence = if extract::contains_phrase(&q.lower, "convert") { 0.95 } else { 0.80 };
    let params = Parameters {
        value: Some(value),
        from_unit: Some(from_unit),
        to_unit: Some(to_unit),
        ..Parameters::default()
    };
    Some(DetectionResult::new(IntentType::Complex, confidence, q.normalized.clone()).with_parameters(params))
}

fn ratio(q: &Query) -> Option<DetectionResult> {
    let r = extract::ratio(&q.lower)?;
    let params = Parameters {
        ratio1: Some(r.ratio1),
        ratio2: Some(r.ratio2),
        known_value: r.known_value,
        is_first_known: r.is_first_known,
        ..Parameters::default()
    };
    Some(DetectionResult::new(IntentType::Complex, 0.85, q.normalized.clone()).with_parameters(params))
}

/// Magnitude suffixes (`$2M`, `500K`) are a strong money signal. Checked on
/// the raw text since normalization expands them.
fn magnitude(q: &Query) -> Option<DetectionResult> {
    if !patterns::magnitude_amount().is_match(&q.raw) {
        return None;
    }
    let mut params = Parameters::default();
    extract::financial(&q.lower, &mut params);
    Some(DetectionResult::new(IntentType::Financial, 0.90, q.normalized.clone()).with_parameters(params))
}

fn word_problem(q: &Query) -> Option<DetectionResult> {
    let (kind, percentage, amount) = extract::word_problem(&q.lower)?;
    let params = Parameters {
        word_problem: Some(kind),
        percentage,
        value: amount,
        ..Parameters::default()
    };
    Some(DetectionResult::new(IntentType::Complex, 0.85, q.normalized.clone()).with_parameters(params))
}

fn formula_syntax(q: &Query) -> Option<DetectionResult> {
    if patterns::cell_reference().is_match(&q.raw) || patterns::formula_function().is_match(&q.raw) {
        let formula = format!("={}", q.raw.trim_end_matches(['?', '.']));
        return Some(DetectionResult::new(IntentType::SpreadsheetFormula, 0.95, formula));
    }
    None
}

fn simple_math(q: &Query) -> Option<DetectionResult> {
    if let Some((percentage, total, pct_text, total_text)) = extract::percentage_of(&q.lower) {
        let params = Parameters {
            percentage: Some(percentage),
            total: Some(total),
            ..Parameters::default()
        };
        let expr = format!("({} * {}) / 100", pct_text, total_text);
        return Some(DetectionResult::new(IntentType::SimpleMath, 0.95, expr).with_parameters(params));
    }
    let (expr, used_words) = extract::arithmetic_expression(&q.lower)?;
    let confidence = if used_words { 0.90 } else { 0.95 };
    Some(DetectionResult::new(IntentType::SimpleMath, confidence, expr))
}

fn financial(q: &Query) -> Option<DetectionResult> {
    if !patterns::financial_keyword().is_match(&q.lower) && !extract::has_financial_function_name(&q.lower) {
        return None;
    }
    let mut params = Parameters::default();
    extract::financial(&q.lower, &mut params);
    Some(DetectionResult::new(IntentType::Financial, 0.85, q.normalized.clone()).with_parameters(params))
}

fn statistical(q: &Query) -> Option<DetectionResult> {
    if !patterns::statistical_keyword().is_match(&q.lower) {
        return None;
    }
    let mut params = Parameters::default();
    extract::statistical(&q.lower, &mut params);
    Some(DetectionResult::new(IntentType::Statistical, 0.80, q.normalized.clone()).with_parameters(params))
}

fn multi_step(q: &Query) -> Option<DetectionResult> {
    patterns::complex_keyword()
        .is_match(&q.lower)
        .then(|| DetectionResult::new(IntentType::Complex, 0.75, q.normalized.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_arithmetic() {
        let r = detect("(25+75)*2");
        assert_eq!(r.intent, IntentType::SimpleMath);
        assert_eq!(r.confidence, 0.95);
        assert_eq!(r.normalized_expression, "(25+75)*2");
    }

    #[test]
    fn test_percentage_fast_path() {
        for query in ["15% of $8,500", "15% of 8500", "What is 15 percent of 8,500?"] {
            let r = detect(query);
            assert_eq!(r.intent, IntentType::SimpleMath, "{}", query);
            assert_eq!(r.parameters.percentage, Some(15.0));
            assert_eq!(r.parameters.total, Some(8500.0));
        }
    }

    #[test]
    fn test_leading_equals_always_formula() {
        for query in ["=1+2", "=SUM(A1:A3)", "  =10M*2", "=convert 10 km to miles"] {
            let r = detect(query);
            assert_eq!(r.intent, IntentType::SpreadsheetFormula, "{}", query);
            assert_eq!(r.confidence, 0.95);
        }
    }

    #[test]
    fn test_formula_syntax_without_equals() {
        let r = detect("SUM(A1:A10)");
        assert_eq!(r.intent, IntentType::SpreadsheetFormula);
        assert_eq!(r.normalized_expression, "=SUM(A1:A10)");
        assert_eq!(detect("B2*3").intent, IntentType::SpreadsheetFormula);
    }

    #[test]
    fn test_exclusions() {
        for query in [
            "Create a report summarizing Q3 revenue",
            "How is EBITDA calculated?",
            "Extract the total revenue from the 10-K",
        ] {
            let r = detect(query);
            assert_eq!(r.intent, IntentType::None, "{}", query);
            assert_eq!(r.confidence, 1.0);
        }
    }

    #[test]
    fn test_unit_conversion() {
        let r = detect("Convert 10 km to miles");
        assert_eq!(r.intent, IntentType::Complex);
        assert_eq!(r.confidence, 0.95);
        assert_eq!(r.parameters.value, Some(10.0));
        assert_eq!(r.parameters.from_unit.as_deref(), Some("km"));
        assert_eq!(r.parameters.to_unit.as_deref(), Some("miles"));

        let r = detect("100°C in F");
        assert_eq!(r.intent, IntentType::Complex);
        assert_eq!(r.confidence, 0.80);
    }

    #[test]
    fn test_ratio_problem() {
        let r = detect("A:B is 3:5, A=60, find B");
        assert_eq!(r.intent, IntentType::Complex);
        assert_eq!(r.confidence, 0.85);
        assert_eq!(r.parameters.ratio1, Some(3.0));
        assert_eq!(r.parameters.ratio2, Some(5.0));
        assert_eq!(r.parameters.known_value, Some(60.0));
        assert_eq!(r.parameters.is_first_known, Some(true));
    }

    #[test]
    fn test_magnitude_is_financial() {
        let r = detect("What's 8% of returns on $2M over 5 years");
        assert_eq!(r.intent, IntentType::Financial);
        assert_eq!(r.confidence, 0.90);
    }

    #[test]
    fn test_word_problem() {
        let r = detect("A jacket costs $80 with a 25% discount, what is the sale price?");
        assert_eq!(r.intent, IntentType::Complex);
        assert_eq!(r.parameters.word_problem.as_deref(), Some("discount"));
        assert_eq!(r.parameters.percentage, Some(25.0));
        assert_eq!(r.parameters.value, Some(80.0));
    }

    #[test]
    fn test_financial_extraction() {
        let r = detect("What is the monthly payment on a $200,000 mortgage at 5% interest for 30 years?");
        assert_eq!(r.intent, IntentType::Financial);
        assert_eq!(r.confidence, 0.85);
        let p = &r.parameters;
        assert_eq!(p.function.as_deref(), Some("PMT"));
        assert_eq!(p.rate, Some(0.05));
        assert_eq!(p.pv, Some(200000.0));
        assert_eq!(p.nper, Some(360.0));
    }

    #[test]
    fn test_irr_cash_flows() {
        let r = detect("Calculate IRR for cash flows: -100000, 30000, 40000, 50000, 60000");
        assert_eq!(r.intent, IntentType::Financial);
        assert_eq!(r.parameters.function.as_deref(), Some("IRR"));
        assert_eq!(r.parameters.cash_flows.as_ref().map(Vec::len), Some(5));
    }

    #[test]
    fn test_statistical() {
        let r = detect("average of 10, 20, 30, 40, 50");
        assert_eq!(r.intent, IntentType::Statistical);
        assert_eq!(r.confidence, 0.80);
        assert_eq!(r.parameters.function.as_deref(), Some("AVERAGE"));
        assert_eq!(r.parameters.values, Some(vec![10.0, 20.0, 30.0, 40.0, 50.0]));
    }

    #[test]
    fn test_multi_step_is_complex() {
        let r = detect("run a regression on sales and advertising");
        assert_eq!(r.intent, IntentType::Complex);
        assert_eq!(r.confidence, 0.75);
    }

    #[test]
    fn test_not_a_calculation() {
        for query in ["hello there", "", "   "] {
            let r = detect(query);
            assert_eq!(r.intent, IntentType::None);
            assert_eq!(r.confidence, 1.0);
            assert!(!r.is_calculation());
        }
    }

    #[test]
    fn test_json_shape() {
        let r = detect("15% of 200");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["type"], "SimpleMath");
        assert_eq!(json["parameters"]["percentage"], 15.0);
        assert!(json["parameters"].get("rate").is_none());
        assert!(json.get("normalizedExpression").is_some());
    }
}
