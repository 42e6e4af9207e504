use serde::{Deserialize, Serialize};

/// What kind of calculation a query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntentType {
    SimpleMath,
    Financial,
    Statistical,
    SpreadsheetFormula,
    Complex,
    /// Not a calculation request.
    None,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::SimpleMath => "SimpleMath",
            IntentType::Financial => "Financial",
            IntentType::Statistical => "Statistical",
            IntentType::SpreadsheetFormula => "SpreadsheetFormula",
            IntentType::Complex => "Complex",
            IntentType::None => "None",
        }
    }
}

impl std::fmt::Display for IntentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
