use std::time::Instant;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::cell::CellInput;
use crate::cell_id::{parse_address, CellAddress, CellId, SheetId, MAX_COLS, MAX_ROWS};
use crate::dep_graph::DepGraph;
use crate::error::{EngineError, Result};
use crate::formula::eval::{evaluate, CellLookup, EvalResult, Value};
use crate::formula::parser::{self, SheetRef};
use crate::formula::refs::{extract_references, References};
use crate::recalc::RecalcReport;
use crate::sheet::{is_valid_sheet_name, normalize_sheet_name, Sheet};
use crate::whatif::{StackingPolicy, WhatIfBackup};

/// A cell as seen from outside: its address, computed value and formula.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellSnapshot {
    pub sheet: String,
    pub address: String,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

/// A cell write that has been parsed and had its references resolved, but
/// not yet applied.
pub(crate) struct Staged {
    pub id: CellId,
    pub input: CellInput,
    pub refs: References,
}

/// A set of named sheets plus the dependency graph between their cells.
///
/// Every write recomputes all transitive dependents before it returns, so a
/// stored value is never stale.
#[derive(Debug, Clone, Default)]
pub struct Workbook {
    sheets: Vec<Sheet>,
    /// Monotonically increasing, never reused.
    next_sheet_id: u64,
    dep_graph: DepGraph,
    /// Formula cells that name a sheet which does not exist yet, keyed by
    /// normalized sheet name. Re-bound when the sheet is added.
    pending_sheet_refs: FxHashMap<String, FxHashSet<CellId>>,
    pub(crate) whatif_backup: Option<WhatIfBackup>,
    pub(crate) stacking: StackingPolicy,
}

impl Workbook {
    /// Create an empty workbook (no sheets).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stacking_policy(stacking: StackingPolicy) -> Self {
        Self { stacking, ..Self::default() }
    }

    pub fn stacking_policy(&self) -> StackingPolicy {
        self.stacking
    }

    // =========================================================================
    // Sheets
    // =========================================================================

    /// Add a sheet. Names are unique case-insensitively.
    ///
    /// Formulas that already reference this name start resolving, and their
    /// dependents are recomputed.
    pub fn add_sheet(&mut self, name: &str) -> Result<SheetId> {
        if !is_valid_sheet_name(name) {
            return Err(EngineError::InvalidSheetName(name.to_string()));
        }
        if self.sheet_index(name).is_some() {
            return Err(EngineError::DuplicateSheet(name.trim().to_string()));
        }

        self.next_sheet_id += 1;
        let id = SheetId::from_raw(self.next_sheet_id);
        let sheet = Sheet::new(id, name);
        let key = sheet.name_key.clone();
        self.sheets.push(sheet);
        log::debug!("added sheet '{}' ({:?})", name.trim(), id);

        if let Some(waiting) = self.pending_sheet_refs.remove(&key) {
            let mut cells: Vec<CellId> = waiting.into_iter().collect();
            cells.sort_by_key(CellId::sort_key);
            let staged = cells
                .into_iter()
                .map(|cell| {
                    let input = self.input_at(cell);
                    self.stage(cell, input)
                })
                .collect();
            let report = self.commit(staged);
            log::debug!("re-bound references to '{}': {}", name.trim(), report.summary());
        }

        Ok(id)
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheet_index(name).map(|i| &self.sheets[i])
    }

    pub fn has_sheet(&self, name: &str) -> bool {
        self.sheet_index(name).is_some()
    }

    fn sheet_index(&self, name: &str) -> Option<usize> {
        let key = normalize_sheet_name(name);
        self.sheets.iter().position(|s| s.name_key == key)
    }

    fn sheet_by_id(&self, id: SheetId) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.id == id)
    }

    fn sheet_by_id_mut(&mut self, id: SheetId) -> Option<&mut Sheet> {
        self.sheets.iter_mut().find(|s| s.id == id)
    }

    fn require_sheet(&self, name: &str) -> Result<&Sheet> {
        self.sheet(name)
            .ok_or_else(|| EngineError::SheetNotFound(name.to_string()))
    }

    fn resolve_sheet(&self, sheet: &SheetRef, context: SheetId) -> Option<SheetId> {
        match sheet {
            SheetRef::Current => Some(context),
            SheetRef::Named(name) => self.sheet(name).map(|s| s.id),
        }
    }

    // =========================================================================
    // Addresses
    // =========================================================================

    /// Resolve `A1` (on `default_sheet`) or `Sheet!A1` / `'My Sheet'!A1`.
    pub fn locate(&self, default_sheet: &str, address: &str) -> Result<CellId> {
        let (sheet_name, addr_text) = match address.rsplit_once('!') {
            Some((sheet, addr)) => (unquote_sheet(sheet), addr),
            None => (default_sheet.to_string(), address),
        };
        let sheet = self.require_sheet(&sheet_name)?;
        let addr = parse_address(addr_text)?;
        Ok(CellId::new(sheet.id, addr.row, addr.col))
    }

    /// `Sheet1!A1`, quoting the sheet name when it needs it.
    pub fn cell_label(&self, id: CellId) -> String {
        let name = self
            .sheet_by_id(id.sheet)
            .map(|s| s.name.as_str())
            .unwrap_or("#REF");
        format!("{}!{}", quote_sheet(name), id.address())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Set a cell from raw text (`42`, `hello`, `=A1*2`) and recompute every
    /// dependent before returning.
    pub fn set_cell_value(&mut self, sheet: &str, address: &str, raw: &str) -> Result<RecalcReport> {
        let id = self.locate(sheet, address)?;
        let input = CellInput::parse(raw).map_err(|e| EngineError::Parse {
            cell: self.cell_label(id),
            message: e.to_string(),
        })?;
        self.set_cell_input(id, input)
    }

    /// Set a cell from an already parsed input.
    ///
    /// A formula that would make the cell depend on itself is rejected with
    /// `CircularReference` and the cell keeps its previous content.
    pub fn set_cell_input(&mut self, id: CellId, input: CellInput) -> Result<RecalcReport> {
        if id.row >= MAX_ROWS || id.col >= MAX_COLS {
            return Err(EngineError::InvalidAddress(id.address().to_string()));
        }
        if self.sheet_by_id(id.sheet).is_none() {
            return Err(EngineError::SheetNotFound(format!("{:?}", id.sheet)));
        }

        let staged = self.stage(id, input);
        if let Some(via) = self.dep_graph.would_create_cycle(id, &staged.refs.cells) {
            log::debug!(
                "rejected circular formula in {} (through {})",
                self.cell_label(id),
                self.cell_label(via)
            );
            return Err(EngineError::CircularReference { cell: self.cell_label(id) });
        }

        Ok(self.commit(vec![staged]))
    }

    /// Write several inputs at once, checking that the combined result is
    /// acyclic before anything is applied. Used to restore snapshots.
    pub(crate) fn restore_inputs(&mut self, entries: Vec<(CellId, CellInput)>) -> Result<RecalcReport> {
        let staged: Vec<Staged> = entries
            .into_iter()
            .map(|(id, input)| self.stage(id, input))
            .collect();

        let mut trial = self.dep_graph.clone();
        for s in &staged {
            trial.replace_edges(s.id, s.refs.cells.clone());
        }
        let roots: Vec<CellId> = staged.iter().map(|s| s.id).collect();
        if let Some(stuck) = trial.recalc_order(&roots).stuck.first() {
            return Err(EngineError::CircularReference { cell: self.cell_label(*stuck) });
        }

        Ok(self.commit(staged))
    }

    pub(crate) fn stage(&self, id: CellId, input: CellInput) -> Staged {
        let refs = match input.ast() {
            Some(ast) => extract_references(ast, |s| self.resolve_sheet(s, id.sheet)),
            None => References::default(),
        };
        Staged { id, input, refs }
    }

    /// Apply staged writes and run the cascade. Callers have already ruled
    /// out cycles.
    fn commit(&mut self, staged: Vec<Staged>) -> RecalcReport {
        let start = Instant::now();
        let roots: Vec<CellId> = staged.iter().map(|s| s.id).collect();

        for Staged { id, input, refs } in staged {
            for waiting in self.pending_sheet_refs.values_mut() {
                waiting.remove(&id);
            }
            for name in refs.missing_sheets {
                self.pending_sheet_refs.entry(name).or_default().insert(id);
            }
            self.pending_sheet_refs.retain(|_, cells| !cells.is_empty());

            self.dep_graph.replace_edges(id, refs.cells);

            let value = input.literal_value().unwrap_or_default();
            if let Some(sheet) = self.sheet_by_id_mut(id.sheet) {
                sheet.put(id.row, id.col, input, value);
            }
        }

        let plan = self.dep_graph.recalc_order(&roots);
        if !plan.stuck.is_empty() {
            log::warn!("{} cells on a dependency cycle were not recomputed", plan.stuck.len());
        }

        let mut report = RecalcReport::default();
        for (id, depth) in plan.order {
            let Some(value) = self.compute(id) else {
                continue;
            };
            if let Some(sheet) = self.sheet_by_id_mut(id.sheet) {
                sheet.set_computed(id.row, id.col, value);
            }
            report.cells_recomputed += 1;
            report.max_depth = report.max_depth.max(depth);
        }
        report.duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        log::trace!("{}", report.summary());
        report
    }

    /// Fresh value of a formula cell from the currently stored values of its
    /// precedents. `None` for non-formula cells.
    fn compute(&self, id: CellId) -> Option<Value> {
        let sheet = self.sheet_by_id(id.sheet)?;
        let ast = sheet.cell(id.row, id.col)?.input.ast()?;
        let lookup = WorkbookLookup { workbook: self, context: id.sheet };
        Some(evaluate(ast, &lookup).to_scalar())
    }

    pub(crate) fn input_at(&self, id: CellId) -> CellInput {
        self.sheet_by_id(id.sheet)
            .map(|s| s.input(id.row, id.col))
            .unwrap_or_default()
    }

    /// Populate a sheet from rows of raw text, creating the sheet when it
    /// does not exist. Row 0 / column 0 land in `A1`. Blank fields are skipped.
    pub fn import_rows(&mut self, sheet: &str, rows: &[Vec<String>]) -> Result<RecalcReport> {
        if !self.has_sheet(sheet) {
            self.add_sheet(sheet)?;
        }

        let mut total = RecalcReport::default();
        let mut written = 0usize;
        for (r, row) in rows.iter().enumerate() {
            for (c, field) in row.iter().enumerate() {
                if field.trim().is_empty() {
                    continue;
                }
                let address = CellAddress::new(r, c).to_string();
                total.merge(&self.set_cell_value(sheet, &address, field)?);
                written += 1;
            }
        }

        log::info!("imported {} cells into '{}'", written, sheet);
        Ok(total)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get_cell_value(&self, sheet: &str, address: &str) -> Result<CellSnapshot> {
        let id = self.locate(sheet, address)?;
        Ok(self.snapshot(id))
    }

    pub(crate) fn snapshot(&self, id: CellId) -> CellSnapshot {
        let (sheet_name, cell) = match self.sheet_by_id(id.sheet) {
            Some(s) => (s.name.clone(), s.cell(id.row, id.col)),
            None => (String::new(), None),
        };
        CellSnapshot {
            sheet: sheet_name,
            address: id.address().to_string(),
            value: cell.map(|c| c.value.clone()).unwrap_or_default(),
            formula: cell.and_then(|c| c.input.formula()).map(str::to_string),
        }
    }

    /// Values in the rectangle spanned by two corners (in either order).
    pub fn get_range_values(&self, sheet: &str, start: &str, end: &str) -> Result<Vec<Vec<Value>>> {
        let sheet = self.require_sheet(sheet)?;
        let a = parse_address(start)?;
        let b = parse_address(end)?;
        let rows = a.row.min(b.row)..=a.row.max(b.row);
        let cols = a.col.min(b.col)..=a.col.max(b.col);
        Ok(rows
            .map(|row| cols.clone().map(|col| sheet.value(row, col)).collect())
            .collect())
    }

    /// Cells the formula at `address` reads, as `Sheet!A1` labels in
    /// (sheet, row, col) order. Empty for non-formula cells.
    pub fn get_formula_dependencies(&self, sheet: &str, address: &str) -> Result<Vec<String>> {
        let id = self.locate(sheet, address)?;
        Ok(self.labels(self.dep_graph.precedents(id)))
    }

    /// Formula cells that read `address` directly.
    pub fn get_cell_dependents(&self, sheet: &str, address: &str) -> Result<Vec<String>> {
        let id = self.locate(sheet, address)?;
        Ok(self.labels(self.dep_graph.dependents(id)))
    }

    fn labels(&self, cells: impl Iterator<Item = CellId>) -> Vec<String> {
        let mut cells: Vec<CellId> = cells.collect();
        cells.sort_by_key(CellId::sort_key);
        cells.into_iter().map(|c| self.cell_label(c)).collect()
    }

    /// Evaluate a formula against the current values of `sheet` without
    /// storing it anywhere. The leading `=` is optional.
    pub fn evaluate_formula(&self, sheet: &str, formula: &str) -> Result<EvalResult> {
        let context = self.require_sheet(sheet)?.id;
        let trimmed = formula.trim();
        let source = if trimmed.starts_with('=') {
            trimmed.to_string()
        } else {
            format!("={}", trimmed)
        };
        let ast = parser::parse(&source).map_err(|e| EngineError::Parse {
            cell: source.clone(),
            message: e.to_string(),
        })?;
        let lookup = WorkbookLookup { workbook: self, context };
        Ok(evaluate(&ast, &lookup))
    }

    pub fn dep_graph(&self) -> &DepGraph {
        &self.dep_graph
    }
}

/// Reads stored values, resolving unqualified references against `context`.
struct WorkbookLookup<'a> {
    workbook: &'a Workbook,
    context: SheetId,
}

impl CellLookup for WorkbookLookup<'_> {
    fn value(&self, sheet: &SheetRef, row: usize, col: usize) -> Option<Value> {
        let id = self.workbook.resolve_sheet(sheet, self.context)?;
        self.workbook.sheet_by_id(id).map(|s| s.value(row, col))
    }
}

fn quote_sheet(name: &str) -> String {
    let plain = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if plain {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

fn unquote_sheet(text: &str) -> String {
    let t = text.trim();
    match t.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        Some(inner) => inner.replace("''", "'"),
        None => t.to_string(),
    }
}
