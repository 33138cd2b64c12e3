// A1-style cell references ("J1", "AA10") to zero-indexed coordinates.

use std::fmt;
use std::str::FromStr;

use super::WriteError;

/// A cell position, zero-indexed.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct CellRef {
    pub row: usize,
    pub col: usize,
}

impl CellRef {
    pub const fn new(col: usize, row: usize) -> CellRef {
        CellRef { row, col }
    }

    /// Parse `"B3"`-style notation. Returns `None` for anything else,
    /// including row 0 and references that overflow.
    pub fn parse(name: &str) -> Option<CellRef> {
        let name = name.trim();
        let split = name.find(|c: char| !c.is_ascii_alphabetic())?;
        let (letters, digits) = name.split_at(split);
        if letters.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let mut col_acc = 0usize;
        for c in letters.to_ascii_uppercase().bytes() {
            let digit = (c - b'A') as usize + 1;
            col_acc = col_acc.checked_mul(26)?.checked_add(digit)?;
        }
        let col = col_acc.checked_sub(1)?;
        let row = digits.parse::<usize>().ok()?.checked_sub(1)?;

        Some(CellRef::new(col, row))
    }

    /// 0 -> A, 25 -> Z, 26 -> AA.
    pub fn col_to_letters(col: usize) -> String {
        let mut result = String::new();
        let mut n = col as u128 + 1;
        while n > 0 {
            n -= 1;
            result.insert(0, (b'A' + (n % 26) as u8) as char);
            n /= 26;
        }
        result
    }

    /// One-based row number, as spreadsheet applications show it.
    pub fn row_number(&self) -> usize {
        self.row + 1
    }

    /// One-based column number.
    pub fn col_number(&self) -> usize {
        self.col + 1
    }
}

impl FromStr for CellRef {
    type Err = WriteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| WriteError::InvalidCell {
            cell: s.to_string(),
        })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", CellRef::col_to_letters(self.col), self.row + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_references() {
        assert_eq!(CellRef::parse("A1"), Some(CellRef::new(0, 0)));
        assert_eq!(CellRef::parse("j1"), Some(CellRef::new(9, 0)));
        assert_eq!(CellRef::parse("AA10"), Some(CellRef::new(26, 9)));
    }

    #[test]
    fn rejects_malformed_references() {
        for bad in ["", "A", "1", "A0", "1A", "A1B", "A-1", "Ä1"] {
            assert!(CellRef::parse(bad).is_none(), "{bad} should not parse");
        }
    }

    #[test]
    fn overflow_returns_none() {
        let huge = format!("{}1", "Z".repeat(40));
        assert!(CellRef::parse(&huge).is_none());
    }

    #[test]
    fn display_round_trips_letters() {
        assert_eq!(CellRef::col_to_letters(0), "A");
        assert_eq!(CellRef::col_to_letters(25), "Z");
        assert_eq!(CellRef::col_to_letters(26), "AA");
        assert_eq!(CellRef::new(9, 0).to_string(), "J1");
        assert_eq!(CellRef::new(9, 0).col_number(), 10);
    }

    #[test]
    fn from_str_reports_invalid_cell() {
        let err = "nope".parse::<CellRef>().unwrap_err();
        assert!(matches!(err, WriteError::InvalidCell { .. }));
    }
}
