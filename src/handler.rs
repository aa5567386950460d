//! Result sinks.
//!
//! A sink receives result rows from the query state machine. The set is
//! closed: raw frames, typed collection, first row only, pre-sized fill,
//! or discard. Dispatch happens once per row; cells are decoded with the
//! statically-known target types.

use crate::conversion::FromRow;
use crate::error::{Error, Result};
use crate::oid_map::OidMap;
use crate::protocol::backend::query::{CommandComplete, DataRow, FieldDescription, RowDescription};
use crate::protocol::types::Oid;

/// Receiver for one result set.
pub trait RowHandler {
    /// Called when a result set begins.
    fn result_start(&mut self, cols: &RowDescription<'_>) -> Result<()> {
        let _ = cols;
        Ok(())
    }

    /// Called for each data row.
    fn row(
        &mut self,
        cols: &[FieldDescription<'_>],
        row: DataRow<'_>,
        map: &OidMap,
    ) -> Result<()>;

    /// Called when the result set ends.
    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        let _ = complete;
        Ok(())
    }
}

/// Sink that discards all rows, keeping only the affected-row count.
#[derive(Debug, Default)]
pub struct DropRows {
    rows_affected: Option<u64>,
}

impl DropRows {
    /// Create a new discarding sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows affected, when the command reported a count.
    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }
}

impl RowHandler for DropRows {
    fn row(&mut self, _cols: &[FieldDescription<'_>], _row: DataRow<'_>, _map: &OidMap) -> Result<()> {
        Ok(())
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        self.rows_affected = complete.rows_affected();
        Ok(())
    }
}

/// Sink that collects typed rows into a `Vec`.
#[derive(Default)]
pub struct Collect<T> {
    rows: Vec<T>,
}

impl<T> Collect<T> {
    /// Create a new collecting sink.
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    /// Consume the sink, returning the rows.
    pub fn into_rows(self) -> Vec<T> {
        self.rows
    }
}

impl<T: for<'a> FromRow<'a>> RowHandler for Collect<T> {
    fn result_start(&mut self, _cols: &RowDescription<'_>) -> Result<()> {
        // a retried operation reuses the sink
        self.rows.clear();
        Ok(())
    }

    fn row(&mut self, cols: &[FieldDescription<'_>], row: DataRow<'_>, map: &OidMap) -> Result<()> {
        self.rows.push(T::from_row(cols, row, map)?);
        Ok(())
    }
}

/// Sink that keeps only the first row.
#[derive(Default)]
pub struct FirstRow<T> {
    row: Option<T>,
}

impl<T> FirstRow<T> {
    /// Create a new first-row sink.
    pub fn new() -> Self {
        Self { row: None }
    }

    /// Consume the sink, returning the row if any arrived.
    pub fn into_row(self) -> Option<T> {
        self.row
    }
}

impl<T: for<'a> FromRow<'a>> RowHandler for FirstRow<T> {
    fn result_start(&mut self, _cols: &RowDescription<'_>) -> Result<()> {
        self.row = None;
        Ok(())
    }

    fn row(&mut self, cols: &[FieldDescription<'_>], row: DataRow<'_>, map: &OidMap) -> Result<()> {
        if self.row.is_none() {
            self.row = Some(T::from_row(cols, row, map)?);
        }
        Ok(())
    }
}

/// Sink that fills pre-sized storage in order.
///
/// Fails if the result has more rows than slots; leftover slots keep
/// their prior values.
pub struct Fill<'s, T> {
    slots: &'s mut [T],
    filled: usize,
}

impl<'s, T> Fill<'s, T> {
    /// Create a sink over the given storage.
    pub fn new(slots: &'s mut [T]) -> Self {
        Self { slots, filled: 0 }
    }

    /// Number of slots written.
    pub fn filled(&self) -> usize {
        self.filled
    }
}

impl<T: for<'a> FromRow<'a>> RowHandler for Fill<'_, T> {
    fn result_start(&mut self, _cols: &RowDescription<'_>) -> Result<()> {
        self.filled = 0;
        Ok(())
    }

    fn row(&mut self, cols: &[FieldDescription<'_>], row: DataRow<'_>, map: &OidMap) -> Result<()> {
        let Some(slot) = self.slots.get_mut(self.filled) else {
            return Err(Error::Decode(format!(
                "result exceeds provided storage of {} rows",
                self.slots.len()
            )));
        };
        *slot = T::from_row(cols, row, map)?;
        self.filled += 1;
        Ok(())
    }
}

/// One untyped result cell: column OID and raw payload (None = NULL).
pub type RawCell = (Oid, Option<Vec<u8>>);

/// Sink that keeps the untyped frames of the whole result.
#[derive(Debug, Default)]
pub struct RawResult {
    /// Column names and OIDs in result order
    pub columns: Vec<(String, Oid)>,
    /// Rows of raw cells
    pub rows: Vec<Vec<RawCell>>,
    /// Rows affected, when reported
    pub rows_affected: Option<u64>,
}

impl RawResult {
    /// Create an empty raw result.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RowHandler for RawResult {
    fn result_start(&mut self, cols: &RowDescription<'_>) -> Result<()> {
        self.columns = cols
            .fields()
            .iter()
            .map(|f| (f.name.to_string(), f.type_oid()))
            .collect();
        self.rows.clear();
        Ok(())
    }

    fn row(&mut self, cols: &[FieldDescription<'_>], row: DataRow<'_>, _map: &OidMap) -> Result<()> {
        let mut cells = Vec::with_capacity(cols.len());
        for (col, cell) in cols.iter().zip(row.iter()) {
            cells.push((col.type_oid(), cell.map(<[u8]>::to_vec)));
        }
        self.rows.push(cells);
        Ok(())
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        self.rows_affected = complete.rows_affected();
        Ok(())
    }
}
