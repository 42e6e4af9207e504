// Compiled-once regexes shared by the normalizer and detector.

use std::sync::OnceLock;

use regex::Regex;

macro_rules! pattern {
    ($(#[$meta:meta])* $name:ident, $re:expr) => {
        $(#[$meta])*
        pub(crate) fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($re).expect("valid regex"))
        }
    };
}

// =============================================================================
// Normalizer
// =============================================================================

pattern!(thousands_separator, r"(\d),(\d{3})(\D|$)");
pattern!(magnitude_suffix, r"\b(\d+)(?:\.(\d+))?([kKmMbB])\b");
pattern!(percent_word, r"(?i)\s*\b(?:percent|pct)\b");
pattern!(whitespace, r"\s+");

// =============================================================================
// Exclusions
// =============================================================================

pattern!(
    document_request,
    r"\b(?:create|generate|write|draft|make|produce|build|prepare)\b.{0,40}?\b(?:report|document|doc|memo|presentation|slides?|deck|pdf|word file|excel file|spreadsheet|summary|letter|email)\b"
);
pattern!(
    explanation_question,
    r"\bhow (?:is|are|was|were|does|do (?:you|i|we)|to)\b.{0,40}?\b(?:calculated|computed|derived|determined|calculate|compute|work)\b|\b(?:explain|what does)\b.{0,30}?\b(?:formula|function|calculation|metric)\b"
);
pattern!(
    external_source,
    r"\b(?:10-k|10-q|8-k|annual report|quarterly report|earnings report|financial statements?|balance sheet|income statement|(?:attached|uploaded|linked) (?:file|document|spreadsheet|pdf|report)|the (?:document|file|pdf|report|database|filing))\b"
);
pattern!(
    extraction_phrase,
    r"\b(?:extract|find|pull|get|look up|lookup|list|show|retrieve|what (?:is|was|are|were))\b"
);

// =============================================================================
// Unit conversion and ratios
// =============================================================================

pattern!(
    unit_conversion,
    r"(-?\d+(?:\.\d+)?)\s*(°\s*[a-z]+|degrees?\s+[a-z]+|[a-z]+)\s+(?:to|in|into|as)\s+(°\s*[a-z]+|degrees?\s+[a-z]+|[a-z]+)\b"
);
pattern!(ratio_pair, r"(\d+(?:\.\d+)?)\s*:\s*(\d+(?:\.\d+)?)");
pattern!(ratio_labels, r"\b([a-z]+)\s*:\s*([a-z]+)\b");
pattern!(ratio_of_labels, r"\bratio of ([a-z]+) to ([a-z]+)\b");
pattern!(
    labelled_value,
    r"\b([a-z]+)(?:\s*=\s*|\s+(?:is|are|has|have|equals)\s+)(\d+(?:\.\d+)?)"
);
pattern!(counted_value, r"(\d+(?:\.\d+)?)\s+([a-z]+)");

// =============================================================================
// Financial, word problems, formulas
// =============================================================================

pattern!(magnitude_amount, r"\b\d+(?:\.\d+)?[kKmMbB]\b");
pattern!(
    word_problem,
    r"\b(discount(?:ed)?|sale price|sales tax|tax|vat|margin|markup|commission|tip|gratuity)\b"
);
pattern!(cell_reference, r"\b[A-Z]{1,3}[0-9]+\b");
pattern!(
    formula_function,
    r"(?i)\b(SUM|AVERAGE|MIN|MAX|COUNT|MEDIAN|ROUND|ABS|SQRT|IF|AND|OR|NOT|CONCAT|PMT|FV|PV|NPV|IRR|STDEV(?:\.[SP])?|VAR(?:\.[SP])?|CONVERT|MDETERM|MINVERSE|MMULT)\s*\("
);

// =============================================================================
// Simple math
// =============================================================================

pattern!(percent_of, r"(-?\d+(?:\.\d+)?)\s*%\s*of\s+(-?\d+(?:\.\d+)?)");
pattern!(
    leading_phrase,
    r"^(?:what(?:'s| is| are)|how much is|calculate|compute|evaluate|solve|find)\s+(?:the value of\s+)?"
);
pattern!(arithmetic_chars, r"^[0-9a-z\s.+\-*/^%(),]+$");
pattern!(has_operator, r"[0-9)]\s*[-+*/^%]\s*[0-9(a-z.]|^[a-z]+\(");
pattern!(identifier, r"[a-z][a-z0-9]*");
pattern!(
    word_operator,
    r"\b(plus|minus|times|multiplied by|divided by|over|to the power of|mod|squared|cubed)\b"
);

// =============================================================================
// Financial and statistical extraction
// =============================================================================

pattern!(
    financial_keyword,
    r"\b(?:loan|mortgage|interest|payments?|pmt|npv|irr|fv|pv|nper|net present value|present value|future value|internal rate of return|annuity|amorti[sz]ation|principal|apr|invest(?:ment|ed)?|return on investment|roi|cagr|compound(?:ed)?|cash flows?|discount rate)\b"
);
pattern!(
    rate_keyword_percent,
    r"\b(?:rate|interest|discount|apr|at|@)[^\d%]{0,20}?(\d+(?:\.\d+)?)\s*%"
);
pattern!(
    percent_then_rate_word,
    r"(\d+(?:\.\d+)?)\s*%\s*(?:annual|yearly|interest|rate|apr|per year|a year|p\.?a\.?)"
);
pattern!(any_percent, r"(\d+(?:\.\d+)?)\s*%");
pattern!(
    pv_amount,
    r"\b(?:loan|principal|present value|borrow(?:ed|ing)?|mortgage|invest(?:ed|ment|ing)?|deposit(?:ed)?|pv)\b\D{0,25}?(\d+(?:\.\d+)?)"
);
pattern!(
    fv_amount,
    r"\b(?:future value|target|goal|fv|grow to|reach)\b\D{0,25}?(\d+(?:\.\d+)?)"
);
pattern!(
    payment_amount,
    r"\b(?:pay(?:ing)?|payments? of|deposit(?:ing)?|contribut\w*|save|saving)\b\D{0,20}?(\d+(?:\.\d+)?)"
);
pattern!(
    period_count,
    r"(\d+(?:\.\d+)?)\s*[- ]?(years?|yrs?|months?|mos?|periods?|quarters?)\b"
);
pattern!(
    cash_flow_list,
    r"cash\s*flows?\s*(?:of|are|is|:|=)?\s*\[?\s*(-?\d+(?:\.\d+)?(?:\s*,\s*-?\d+(?:\.\d+)?)+)"
);
pattern!(from_to_values, r"\bfrom\s+(-?\d+(?:\.\d+)?)\s+to\s+(-?\d+(?:\.\d+)?)");
pattern!(number, r"-?\d+(?:\.\d+)?");
pattern!(
    statistical_keyword,
    r"\b(?:average|mean|median|mode|standard deviation|std ?dev|stdev(?:\.[sp])?|variance|var(?:\.[sp])?|sum|total|minimum|maximum|min|max|lowest|highest|smallest|largest|count)\b"
);
pattern!(
    complex_keyword,
    r"\b(?:then|analy[sz]e|analysis|regression|matrix|matrices|optimi[sz]e|optimization|forecast|simulate|simulation|correlation)\b"
);
