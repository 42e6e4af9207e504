//! Recalculation reporting.

use serde::Serialize;

/// Summary of one eager cascade.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalcReport {
    /// Formula cells recomputed (the written cell included when it is a formula).
    pub cells_recomputed: usize,

    /// Longest dependent chain below the written cell.
    /// A direct dependent has depth 1.
    pub max_depth: usize,

    pub duration_ms: f64,
}

impl RecalcReport {
    /// Combine reports from several writes (what-if, import).
    pub fn merge(&mut self, other: &RecalcReport) {
        self.cells_recomputed += other.cells_recomputed;
        self.max_depth = self.max_depth.max(other.max_depth);
        self.duration_ms += other.duration_ms;
    }

    /// One-line summary for logging.
    pub fn summary(&self) -> String {
        format!(
            "Recalc: {} cells, depth {}, {:.2}ms",
            self.cells_recomputed, self.max_depth, self.duration_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge() {
        let mut total = RecalcReport::default();
        total.merge(&RecalcReport { cells_recomputed: 3, max_depth: 2, duration_ms: 0.5 });
        total.merge(&RecalcReport { cells_recomputed: 1, max_depth: 4, duration_ms: 0.25 });
        assert_eq!(total, RecalcReport { cells_recomputed: 4, max_depth: 4, duration_ms: 0.75 });
        assert_eq!(total.summary(), "Recalc: 4 cells, depth 4, 0.75ms");
    }
}
