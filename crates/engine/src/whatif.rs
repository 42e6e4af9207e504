//! What-if scenarios: temporary edits to input cells that can be reverted.
//!
//! A workbook holds at most one backup. What happens when a scenario is
//! applied while another is live is decided by [`StackingPolicy`].

use serde::{Deserialize, Serialize};

use crate::cell::CellInput;
use crate::cell_id::CellId;
use crate::error::{EngineError, Result};
use crate::recalc::RecalcReport;
use crate::workbook::{CellSnapshot, Workbook};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackingPolicy {
    /// A new scenario overwrites the live backup. Reverting then restores the
    /// state from just before the newest scenario.
    #[default]
    Replace,
    /// A new scenario is refused while a backup is live.
    Reject,
}

/// One edit in a scenario. `cell` is `A1` on the scenario's sheet or a
/// qualified `Sheet!A1`; `new_value` is raw input text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatIfChange {
    pub cell: String,
    pub new_value: String,
}

impl WhatIfChange {
    pub fn new(cell: impl Into<String>, new_value: impl Into<String>) -> Self {
        Self { cell: cell.into(), new_value: new_value.into() }
    }
}

/// Inputs of every touched cell as they were before the scenario, in the
/// order the cells were first touched.
#[derive(Debug, Clone, Default)]
pub struct WhatIfBackup {
    entries: Vec<(CellId, CellInput)>,
}

impl WhatIfBackup {
    fn record(&mut self, id: CellId, prior: CellInput) {
        if !self.entries.iter().any(|(c, _)| *c == id) {
            self.entries.push((id, prior));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn restore_list(&self) -> Vec<(CellId, CellInput)> {
        self.entries.iter().rev().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatIfOutcome {
    pub cells_changed: usize,
    /// True when a live backup was overwritten.
    pub replaced_backup: bool,
    pub recalc: RecalcReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatIfPreview {
    /// Observed cells as computed under the scenario.
    pub observed: Vec<CellSnapshot>,
    pub cells_changed: usize,
}

impl Workbook {
    pub fn has_active_what_if(&self) -> bool {
        self.whatif_backup.is_some()
    }

    /// Apply a scenario and keep a backup of the prior inputs.
    ///
    /// All-or-nothing: if any change fails (bad address, bad formula,
    /// circular reference), the cells already changed are restored and the
    /// previous backup, if any, stays live.
    pub fn execute_what_if(&mut self, sheet: &str, changes: &[WhatIfChange]) -> Result<WhatIfOutcome> {
        if self.whatif_backup.is_some() && self.stacking == StackingPolicy::Reject {
            return Err(EngineError::WhatIfActive);
        }

        let (backup, recalc) = self.apply_changes(sheet, changes)?;
        let cells_changed = backup.len();
        let replaced_backup = self.whatif_backup.replace(backup).is_some();
        if replaced_backup {
            log::debug!("what-if backup replaced by a new scenario");
        }
        log::debug!("what-if applied to {} cells: {}", cells_changed, recalc.summary());

        Ok(WhatIfOutcome { cells_changed, replaced_backup, recalc })
    }

    /// Restore every cell touched by the live scenario and clear the backup.
    ///
    /// Fails with `NoActiveWhatIf` when there is nothing to revert. If the
    /// restore would create a circular reference (because the cells were
    /// edited in the meantime), nothing changes and the backup stays live.
    pub fn revert_what_if(&mut self) -> Result<RecalcReport> {
        let entries = self
            .whatif_backup
            .as_ref()
            .ok_or(EngineError::NoActiveWhatIf)?
            .restore_list();
        let report = self.restore_inputs(entries)?;
        self.whatif_backup = None;
        log::debug!("what-if reverted: {}", report.summary());
        Ok(report)
    }

    /// Apply a scenario, read `observe` under it, then restore. Any live
    /// backup is left untouched.
    pub fn execute_what_if_with_revert(
        &mut self,
        sheet: &str,
        changes: &[WhatIfChange],
        observe: &[String],
    ) -> Result<WhatIfPreview> {
        // Resolve observed cells first so a bad address changes nothing
        let observe_ids = observe
            .iter()
            .map(|addr| self.locate(sheet, addr))
            .collect::<Result<Vec<CellId>>>()?;

        let (backup, _) = self.apply_changes(sheet, changes)?;
        let observed = observe_ids.iter().map(|id| self.snapshot(*id)).collect();
        self.restore_inputs(backup.restore_list())?;

        Ok(WhatIfPreview { observed, cells_changed: backup.len() })
    }

    fn apply_changes(&mut self, sheet: &str, changes: &[WhatIfChange]) -> Result<(WhatIfBackup, RecalcReport)> {
        let mut backup = WhatIfBackup::default();
        let mut recalc = RecalcReport::default();

        for change in changes {
            let applied = self.locate(sheet, &change.cell).and_then(|id| {
                let prior = self.input_at(id);
                let report = self.set_cell_value(sheet, &change.cell, &change.new_value)?;
                Ok((id, prior, report))
            });

            match applied {
                Ok((id, prior, report)) => {
                    backup.record(id, prior);
                    recalc.merge(&report);
                }
                Err(e) => {
                    if !backup.is_empty() {
                        self.restore_inputs(backup.restore_list())?;
                    }
                    log::debug!("what-if aborted at {}: {}", change.cell, e);
                    return Err(e);
                }
            }
        }

        Ok((backup, recalc))
    }
}
