// Common Types
//
// This module defines the identifiers and the table bitmap shared by every
// part of the optimizer.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXor, Not, Sub, SubAssign};
use serde::{Serialize, Deserialize};

/// Maximum number of table slots in one statement (one bit per slot)
pub const MAX_TABLES: usize = 64;

/// Table slot number within a statement
pub type TableId = usize;

/// Semi-join nest identifier
pub type NestId = usize;

/// Subquery predicate identifier
pub type SubqueryId = usize;

/// Nested join identifier, unique within a statement
pub type JoinId = usize;

/// Set of table slots, one bit per `TableId`
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableMap(u64);

impl TableMap {
    pub const EMPTY: TableMap = TableMap(0);

    pub fn from_bits(bits: u64) -> Self {
        TableMap(bits)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Map holding a single table
    pub fn single(table: TableId) -> Self {
        debug_assert!(table < MAX_TABLES);
        TableMap(1u64 << table)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, table: TableId) -> bool {
        table < MAX_TABLES && self.0 & (1u64 << table) != 0
    }

    pub fn insert(&mut self, table: TableId) {
        self.0 |= TableMap::single(table).0;
    }

    pub fn remove(&mut self, table: TableId) {
        self.0 &= !TableMap::single(table).0;
    }

    /// True if the two maps share at least one table
    pub fn overlaps(&self, other: TableMap) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_subset_of(&self, other: TableMap) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Lowest table slot in the map
    pub fn first(&self) -> Option<TableId> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as TableId)
        }
    }

    pub fn iter(&self) -> TableMapIter {
        TableMapIter { bits: self.0 }
    }
}

/// Iterator over the slots of a `TableMap` in ascending order
pub struct TableMapIter {
    bits: u64,
}

impl Iterator for TableMapIter {
    type Item = TableId;

    fn next(&mut self) -> Option<TableId> {
        if self.bits == 0 {
            return None;
        }
        let table = self.bits.trailing_zeros() as TableId;
        self.bits &= self.bits - 1;
        Some(table)
    }
}

impl IntoIterator for TableMap {
    type Item = TableId;
    type IntoIter = TableMapIter;

    fn into_iter(self) -> TableMapIter {
        self.iter()
    }
}

impl FromIterator<TableId> for TableMap {
    fn from_iter<I: IntoIterator<Item = TableId>>(iter: I) -> Self {
        let mut map = TableMap::EMPTY;
        for table in iter {
            map.insert(table);
        }
        map
    }
}

impl fmt::Debug for TableMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl BitOr for TableMap {
    type Output = TableMap;
    fn bitor(self, rhs: TableMap) -> TableMap {
        TableMap(self.0 | rhs.0)
    }
}

impl BitOrAssign for TableMap {
    fn bitor_assign(&mut self, rhs: TableMap) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for TableMap {
    type Output = TableMap;
    fn bitand(self, rhs: TableMap) -> TableMap {
        TableMap(self.0 & rhs.0)
    }
}

impl BitAndAssign for TableMap {
    fn bitand_assign(&mut self, rhs: TableMap) {
        self.0 &= rhs.0;
    }
}

impl BitXor for TableMap {
    type Output = TableMap;
    fn bitxor(self, rhs: TableMap) -> TableMap {
        TableMap(self.0 ^ rhs.0)
    }
}

impl Sub for TableMap {
    type Output = TableMap;
    fn sub(self, rhs: TableMap) -> TableMap {
        TableMap(self.0 & !rhs.0)
    }
}

impl SubAssign for TableMap {
    fn sub_assign(&mut self, rhs: TableMap) {
        self.0 &= !rhs.0;
    }
}

impl Not for TableMap {
    type Output = TableMap;
    fn not(self) -> TableMap {
        TableMap(!self.0)
    }
}

/// Add two costs, saturating at `f64::MAX`
pub fn cost_add(a: f64, b: f64) -> f64 {
    let sum = a + b;
    if sum.is_finite() { sum } else { f64::MAX }
}

/// Multiply two costs or row counts, saturating at `f64::MAX`
pub fn cost_mult(a: f64, b: f64) -> f64 {
    let product = a * b;
    if product.is_finite() { product } else { f64::MAX }
}
