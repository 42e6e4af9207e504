//! Spreadsheet engine: sheets of cells holding literals or formulas, a
//! dependency graph between them, and eager recalculation.
//!
//! Every write recomputes the transitive dependents of the written cell
//! before returning, so reads never observe stale values. Circular
//! references are rejected at write time.

pub mod cell;
pub mod cell_id;
pub mod dep_graph;
pub mod error;
pub mod formula;
pub mod recalc;
pub mod registry;
pub mod sheet;
pub mod whatif;
pub mod workbook;

pub use cell::{Cell, CellInput};
pub use cell_id::{col_to_letters, letters_to_col, parse_address, CellAddress, CellId, SheetId};
pub use error::EngineError;
pub use formula::eval::{CellError, EvalResult, Value};
pub use recalc::RecalcReport;
pub use registry::WorkbookRegistry;
pub use whatif::{StackingPolicy, WhatIfChange, WhatIfOutcome, WhatIfPreview};
pub use workbook::{CellSnapshot, Workbook};
