use serde::{Deserialize, Serialize};

use rustc_hash::FxHashMap;

use crate::codegen::GeneratedCode;

/// Optional grid context for a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CalculationContext {
    /// Loaded document to evaluate formulas against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet_name: Option<String>,
    /// Individual cells by A1 address, raw input text (`"10"`, `"=A1*2"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_data: Option<FxHashMap<String, String>>,
    /// Rows of raw cell input starting at A1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spreadsheet_data: Option<Vec<Vec<String>>>,
}

impl CalculationContext {
    pub fn for_document(document_id: impl Into<String>) -> Self {
        Self { document_id: Some(document_id.into()), ..Self::default() }
    }

    pub fn with_sheet(mut self, sheet: impl Into<String>) -> Self {
        self.sheet_name = Some(sheet.into());
        self
    }

    /// True when the context carries grid data of its own.
    pub fn has_inline_data(&self) -> bool {
        self.cell_data.as_ref().is_some_and(|c| !c.is_empty())
            || self.spreadsheet_data.as_ref().is_some_and(|r| !r.is_empty())
    }
}

/// Per-call options for [`crate::Router::calculate`].
#[derive(Debug, Clone, Default)]
pub struct CalculateOptions {
    /// Overrides the router's fallback setting for this call.
    pub enable_fallback: Option<bool>,
    /// Code for the sandbox. Takes precedence over the configured generator.
    pub generated_code: Option<GeneratedCode>,
    pub context: Option<CalculationContext>,
}

impl CalculateOptions {
    pub fn with_context(mut self, context: CalculationContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.generated_code = Some(GeneratedCode::new(code));
        self
    }

    pub fn without_fallback(mut self) -> Self {
        self.enable_fallback = Some(false);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_from_json() {
        let ctx: CalculationContext = serde_json::from_str(
            r#"{"documentId":"doc-1","sheetName":"Q3","cellData":{"A1":"10"},"spreadsheetData":[["1","2"]]}"#,
        )
        .unwrap();
        assert_eq!(ctx.document_id.as_deref(), Some("doc-1"));
        assert_eq!(ctx.sheet_name.as_deref(), Some("Q3"));
        assert_eq!(ctx.cell_data.unwrap()["A1"], "10");
        assert_eq!(ctx.spreadsheet_data.unwrap()[0], vec!["1", "2"]);
    }

    #[test]
    fn test_inline_data() {
        assert!(!CalculationContext::for_document("doc").has_inline_data());
        let ctx = CalculationContext { spreadsheet_data: Some(vec![]), ..Default::default() };
        assert!(!ctx.has_inline_data());
        let ctx = CalculationContext { spreadsheet_data: Some(vec![vec!["1".into()]]), ..Default::default() };
        assert!(ctx.has_inline_data());
    }
}
