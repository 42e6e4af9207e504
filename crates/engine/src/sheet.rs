use rustc_hash::FxHashMap;

use crate::cell::{Cell, CellInput};
use crate::cell_id::SheetId;
use crate::formula::eval::Value;

/// Longest sheet name accepted, matching common spreadsheet limits.
pub const MAX_SHEET_NAME_LEN: usize = 31;

const FORBIDDEN_CHARS: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];

/// Case-insensitive lookup key for a sheet name.
pub fn normalize_sheet_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Non-empty, at most 31 characters, none of `[ ] : * ? / \`, and no
/// leading or trailing apostrophe (it would clash with quoted references).
pub fn is_valid_sheet_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty()
        && trimmed.chars().count() <= MAX_SHEET_NAME_LEN
        && !trimmed.contains(FORBIDDEN_CHARS)
        && !trimmed.starts_with('\'')
        && !trimmed.ends_with('\'')
}

/// A named sparse grid. Only non-empty cells are stored.
#[derive(Debug, Clone)]
pub struct Sheet {
    pub id: SheetId,
    pub name: String,
    /// Cached `normalize_sheet_name(name)`.
    pub(crate) name_key: String,
    cells: FxHashMap<(usize, usize), Cell>,
}

impl Sheet {
    pub fn new(id: SheetId, name: &str) -> Self {
        let name = name.trim().to_string();
        Self {
            id,
            name_key: normalize_sheet_name(&name),
            name,
            cells: FxHashMap::default(),
        }
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.cells.get(&(row, col))
    }

    /// Computed value. Unset cells are `Empty`.
    pub fn value(&self, row: usize, col: usize) -> Value {
        self.cells
            .get(&(row, col))
            .map(|c| c.value.clone())
            .unwrap_or_default()
    }

    pub fn input(&self, row: usize, col: usize) -> CellInput {
        self.cells
            .get(&(row, col))
            .map(|c| c.input.clone())
            .unwrap_or_default()
    }

    /// Store input and value together. An empty input removes the cell.
    pub(crate) fn put(&mut self, row: usize, col: usize, input: CellInput, value: Value) {
        if matches!(input, CellInput::Empty) {
            self.cells.remove(&(row, col));
        } else {
            self.cells.insert((row, col), Cell { input, value });
        }
    }

    /// Replace only the computed value of an existing formula cell.
    pub(crate) fn set_computed(&mut self, row: usize, col: usize, value: Value) {
        if let Some(cell) = self.cells.get_mut(&(row, col)) {
            cell.value = value;
        }
    }

    pub fn cells_iter(&self) -> impl Iterator<Item = (&(usize, usize), &Cell)> {
        self.cells.iter()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Bottom-right corner of the used area, `None` for an empty sheet.
    pub fn used_extent(&self) -> Option<(usize, usize)> {
        self.cells.keys().fold(None, |acc, &(r, c)| match acc {
            None => Some((r, c)),
            Some((mr, mc)) => Some((mr.max(r), mc.max(c))),
        })
    }
}
