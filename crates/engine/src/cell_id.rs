//! Cell identity and A1 address translation.
//!
//! Externally rows are 1-indexed and columns are base-26 letters
//! (A=0 … Z=25, AA=26 …). Internally both are 0-indexed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Largest row and column accepted in an address (spreadsheet limits).
pub const MAX_ROWS: usize = 1_048_576;
pub const MAX_COLS: usize = 16_384;

/// Stable sheet identity. Never reused within a workbook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SheetId(u64);

impl SheetId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A cell position within a sheet (0-based).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellAddress {
    pub row: usize,
    pub col: usize,
}

impl CellAddress {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Parse `A1`-style text. `$` markers are accepted and ignored.
    pub fn parse(text: &str) -> Result<Self, EngineError> {
        parse_address(text)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", col_to_letters(self.col), self.row + 1)
    }
}

impl std::str::FromStr for CellAddress {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_address(s)
    }
}

/// Unique identifier for a cell in a workbook. Graph node type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CellId {
    pub sheet: SheetId,
    pub row: usize,
    pub col: usize,
}

impl CellId {
    #[inline]
    pub fn new(sheet: SheetId, row: usize, col: usize) -> Self {
        Self { sheet, row, col }
    }

    pub fn address(&self) -> CellAddress {
        CellAddress::new(self.row, self.col)
    }

    /// Deterministic (sheet, row, col) ordering key.
    pub fn sort_key(&self) -> (u64, usize, usize) {
        (self.sheet.raw(), self.row, self.col)
    }
}

impl Ord for CellId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for CellId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Convert 0-based column index to letters: 0=A, 25=Z, 26=AA.
pub fn col_to_letters(col: usize) -> String {
    let mut result = String::new();
    let mut n = col;
    loop {
        result.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    result
}

/// Convert column letters to a 0-based index. Case-insensitive.
pub fn letters_to_col(letters: &str) -> Option<usize> {
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let n = letters
        .chars()
        .try_fold(0usize, |acc, c| {
            acc.checked_mul(26)?
                .checked_add(c.to_ascii_uppercase() as usize - 'A' as usize + 1)
        })?;
    let col = n - 1;
    (col < MAX_COLS).then_some(col)
}

pub fn parse_address(text: &str) -> Result<CellAddress, EngineError> {
    let invalid = || EngineError::InvalidAddress(text.to_string());
    let cleaned: String = text.trim().chars().filter(|&c| c != '$').collect();

    let split = cleaned
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (letters, digits) = cleaned.split_at(split);

    let col = letters_to_col(letters).ok_or_else(invalid)?;
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let row: usize = digits.parse().map_err(|_| invalid())?;
    if row == 0 || row > MAX_ROWS {
        return Err(invalid());
    }
    Ok(CellAddress::new(row - 1, col))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_id_equality() {
        let a = CellId::new(SheetId::from_raw(1), 0, 0);
        let b = CellId::new(SheetId::from_raw(1), 0, 0);
        let c = CellId::new(SheetId::from_raw(2), 0, 0);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_col_to_letters() {
        assert_eq!(col_to_letters(0), "A");
        assert_eq!(col_to_letters(25), "Z");
        assert_eq!(col_to_letters(26), "AA");
        assert_eq!(col_to_letters(27), "AB");
        assert_eq!(col_to_letters(701), "ZZ");
        assert_eq!(col_to_letters(702), "AAA");
    }

    #[test]
    fn test_letters_to_col() {
        assert_eq!(letters_to_col("A"), Some(0));
        assert_eq!(letters_to_col("z"), Some(25));
        assert_eq!(letters_to_col("AA"), Some(26));
        assert_eq!(letters_to_col("XFD"), Some(16_383));
        assert_eq!(letters_to_col("XFE"), None);
        assert_eq!(letters_to_col(""), None);
        for col in [0, 1, 25, 26, 51, 52, 701, 702, 16_383] {
            assert_eq!(letters_to_col(&col_to_letters(col)), Some(col));
        }
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("A1").unwrap(), CellAddress::new(0, 0));
        assert_eq!(parse_address("b10").unwrap(), CellAddress::new(9, 1));
        assert_eq!(parse_address("$AA$3").unwrap(), CellAddress::new(2, 26));
        assert_eq!(CellAddress::new(9, 26).to_string(), "AA10");

        for bad in ["", "A", "1", "A0", "1A", "A1B", "A-1", "A1048577"] {
            assert!(parse_address(bad).is_err(), "{bad} should not parse");
        }
    }
}
