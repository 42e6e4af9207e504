//! Workbooks keyed by document id.
//!
//! The registry does not lock anything itself. Callers that share it across
//! threads wrap it (the router keeps it behind a mutex), which serializes
//! access per document as well.

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::error::{EngineError, Result};
use crate::formula::eval::EvalResult;
use crate::recalc::RecalcReport;
use crate::whatif::{StackingPolicy, WhatIfChange, WhatIfOutcome, WhatIfPreview};
use crate::workbook::Workbook;

#[derive(Debug)]
struct Entry {
    workbook: Workbook,
    last_used: Instant,
}

#[derive(Debug, Default)]
pub struct WorkbookRegistry {
    entries: FxHashMap<String, Entry>,
    stacking: StackingPolicy,
}

impl WorkbookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Workbooks created by this registry use `stacking` for what-if.
    pub fn with_stacking_policy(stacking: StackingPolicy) -> Self {
        Self { entries: FxHashMap::default(), stacking }
    }

    /// Read access. Unknown ids are `WorkbookNotLoaded`.
    pub fn workbook(&self, document_id: &str) -> Result<&Workbook> {
        self.entries
            .get(document_id)
            .map(|e| &e.workbook)
            .ok_or_else(|| EngineError::WorkbookNotLoaded(document_id.to_string()))
    }

    /// Write access, creating an empty workbook on first use.
    pub fn workbook_mut(&mut self, document_id: &str) -> &mut Workbook {
        let stacking = self.stacking;
        let entry = self.entries.entry(document_id.to_string()).or_insert_with(|| {
            log::debug!("created workbook for document '{}'", document_id);
            Entry {
                workbook: Workbook::with_stacking_policy(stacking),
                last_used: Instant::now(),
            }
        });
        entry.last_used = Instant::now();
        &mut entry.workbook
    }

    /// Write access without creating. Unknown ids are `WorkbookNotLoaded`.
    pub fn existing_mut(&mut self, document_id: &str) -> Result<&mut Workbook> {
        let entry = self
            .entries
            .get_mut(document_id)
            .ok_or_else(|| EngineError::WorkbookNotLoaded(document_id.to_string()))?;
        entry.last_used = Instant::now();
        Ok(&mut entry.workbook)
    }

    /// Replace (or insert) a fully built workbook.
    pub fn insert(&mut self, document_id: &str, workbook: Workbook) {
        self.entries.insert(
            document_id.to_string(),
            Entry { workbook, last_used: Instant::now() },
        );
    }

    pub fn contains(&self, document_id: &str) -> bool {
        self.entries.contains_key(document_id)
    }

    pub fn unload(&mut self, document_id: &str) -> bool {
        let removed = self.entries.remove(document_id).is_some();
        if removed {
            log::debug!("unloaded workbook for document '{}'", document_id);
        }
        removed
    }

    /// Drop workbooks not written to or explicitly touched within `ttl`.
    /// Returns the evicted ids, sorted.
    pub fn evict_idle(&mut self, ttl: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut evicted: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_used) >= ttl)
            .map(|(id, _)| id.clone())
            .collect();
        evicted.sort();
        for id in &evicted {
            self.entries.remove(id);
        }
        if !evicted.is_empty() {
            log::info!("evicted {} idle workbooks", evicted.len());
        }
        evicted
    }

    pub fn document_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // Document-level operations

    pub fn execute_what_if(
        &mut self,
        document_id: &str,
        sheet: &str,
        changes: &[WhatIfChange],
    ) -> Result<WhatIfOutcome> {
        self.existing_mut(document_id)?.execute_what_if(sheet, changes)
    }

    pub fn revert_what_if(&mut self, document_id: &str) -> Result<RecalcReport> {
        self.existing_mut(document_id)?.revert_what_if()
    }

    pub fn execute_what_if_with_revert(
        &mut self,
        document_id: &str,
        sheet: &str,
        changes: &[WhatIfChange],
        observe: &[String],
    ) -> Result<WhatIfPreview> {
        self.existing_mut(document_id)?
            .execute_what_if_with_revert(sheet, changes, observe)
    }

    /// Evaluate an ad-hoc formula against a loaded document. Nothing is
    /// stored.
    pub fn evaluate_formula_in_document(
        &self,
        document_id: &str,
        sheet: &str,
        formula: &str,
    ) -> Result<EvalResult> {
        self.workbook(document_id)?.evaluate_formula(sheet, formula)
    }
}
