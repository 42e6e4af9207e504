use thiserror::Error;

use abacus_core::{CalcError, ErrorKind};

/// Errors returned by workbook and registry operations.
///
/// Formula evaluation problems are not errors at this level: they become
/// cell error values (`#DIV/0!`, `#REF!`, ...) stored in the grid.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid cell address: {0}")]
    InvalidAddress(String),

    #[error("sheet not found: {0}")]
    SheetNotFound(String),

    #[error("invalid sheet name: '{0}'")]
    InvalidSheetName(String),

    #[error("a sheet named '{0}' already exists")]
    DuplicateSheet(String),

    #[error("formula error in {cell}: {message}")]
    Parse { cell: String, message: String },

    #[error("circular reference: {cell} would depend on itself")]
    CircularReference { cell: String },

    #[error("no workbook loaded for document '{0}'")]
    WorkbookNotLoaded(String),

    #[error("a what-if scenario is already active; revert it first")]
    WhatIfActive,

    #[error("no what-if scenario to revert")]
    NoActiveWhatIf,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidAddress(_) | EngineError::SheetNotFound(_) => {
                ErrorKind::SheetOrCellNotFound
            }
            EngineError::WorkbookNotLoaded(_) => ErrorKind::WorkbookNotLoaded,
            EngineError::InvalidSheetName(_)
            | EngineError::DuplicateSheet(_)
            | EngineError::Parse { .. }
            | EngineError::CircularReference { .. }
            | EngineError::WhatIfActive
            | EngineError::NoActiveWhatIf => ErrorKind::EvaluationError,
        }
    }
}

impl From<EngineError> for CalcError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::WorkbookNotLoaded(id) => CalcError::WorkbookNotLoaded(id),
            other if other.kind() == ErrorKind::SheetOrCellNotFound => {
                CalcError::not_found(other.to_string())
            }
            other => CalcError::evaluation(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
