//! Reference extraction from formula AST.
//!
//! Collects the cells a formula reads, as `CellId`s for dependency graph
//! construction. Sheets that do not exist yet are reported by name so the
//! workbook can re-bind the formula when such a sheet is added.

use rustc_hash::FxHashSet;

use crate::cell_id::{CellId, SheetId};

use super::parser::{Expr, SheetRef};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct References {
    pub cells: FxHashSet<CellId>,
    /// Lowercased names of referenced sheets that could not be resolved.
    pub missing_sheets: FxHashSet<String>,
}

/// Extract all references from an expression.
///
/// `resolve` maps a sheet reference to its id, or `None` when the sheet does
/// not exist. Ranges are expanded to individual cells.
pub fn extract_references<F>(expr: &Expr, resolve: F) -> References
where
    F: Fn(&SheetRef) -> Option<SheetId>,
{
    let mut refs = References::default();
    collect(expr, &resolve, &mut refs);
    refs
}

fn collect<F>(expr: &Expr, resolve: &F, refs: &mut References)
where
    F: Fn(&SheetRef) -> Option<SheetId>,
{
    match expr {
        Expr::Number(_) | Expr::Text(_) | Expr::Boolean(_) | Expr::Name(_) | Expr::Empty => {}

        Expr::CellRef { sheet, row, col } => match resolve(sheet) {
            Some(id) => {
                refs.cells.insert(CellId::new(id, *row, *col));
            }
            None => note_missing(sheet, refs),
        },

        Expr::Range { sheet, start_row, start_col, end_row, end_col } => match resolve(sheet) {
            Some(id) => {
                for row in *start_row..=*end_row {
                    for col in *start_col..=*end_col {
                        refs.cells.insert(CellId::new(id, row, col));
                    }
                }
            }
            None => note_missing(sheet, refs),
        },

        Expr::Function { args, .. } => {
            for arg in args {
                collect(arg, resolve, refs);
            }
        }

        Expr::BinaryOp { left, right, .. } => {
            collect(left, resolve, refs);
            collect(right, resolve, refs);
        }

        Expr::Neg(inner) => collect(inner, resolve, refs),
    }
}

fn note_missing(sheet: &SheetRef, refs: &mut References) {
    if let SheetRef::Named(name) = sheet {
        refs.missing_sheets.insert(name.to_lowercase());
    }
}
