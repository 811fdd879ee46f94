//! In-memory storage for metadata table rows.
//!
//! Rows are kept as flat `u32` column values until serialization decides the
//! physical column widths. Row indices are 1-based throughout, matching the
//! token format; index 0 is the null row and is never stored.

use strum::{EnumCount, IntoEnumIterator};

use crate::{
    metadata::tables::{columns, TableId},
    Error, Result,
};

/// A single metadata table: a flat row buffer plus its column count.
struct Table {
    /// Number of logical columns per row.
    width: usize,
    /// Row data, `width` values per row, first stored row is row 1.
    values: Vec<u32>,
}

impl Table {
    fn new(id: TableId) -> Self {
        Table {
            width: columns(id).len(),
            values: Vec::new(),
        }
    }

    fn row_count(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        {
            (self.values.len() / self.width) as u32
        }
    }
}

/// Storage for all metadata tables of one image.
///
/// Tables grow append-only while the image is being populated; the fixup and
/// sort passes then rewrite rows in place before serialization.
pub struct TableStore {
    tables: Vec<Table>,
}

/// Maps a [`TableId`] to its dense slot in the store.
fn slot(table: TableId) -> usize {
    use TableId as T;
    match table {
        T::Module => 0,
        T::TypeRef => 1,
        T::TypeDef => 2,
        T::Field => 3,
        T::MethodDef => 4,
        T::Param => 5,
        T::InterfaceImpl => 6,
        T::MemberRef => 7,
        T::Constant => 8,
        T::CustomAttribute => 9,
        T::FieldMarshal => 10,
        T::DeclSecurity => 11,
        T::ClassLayout => 12,
        T::FieldLayout => 13,
        T::StandAloneSig => 14,
        T::EventMap => 15,
        T::Event => 16,
        T::PropertyMap => 17,
        T::Property => 18,
        T::MethodSemantics => 19,
        T::MethodImpl => 20,
        T::ModuleRef => 21,
        T::TypeSpec => 22,
        T::ImplMap => 23,
        T::FieldRVA => 24,
        T::Assembly => 25,
        T::AssemblyRef => 26,
        T::File => 27,
        T::ExportedType => 28,
        T::ManifestResource => 29,
        T::NestedClass => 30,
        T::GenericParam => 31,
        T::MethodSpec => 32,
        T::GenericParamConstraint => 33,
    }
}

impl TableStore {
    /// Creates an empty store with all tables present but zero rows.
    #[must_use]
    pub fn new() -> Self {
        let mut tables = Vec::with_capacity(TableId::COUNT);
        for id in TableId::iter() {
            debug_assert_eq!(slot(id), tables.len());
            tables.push(Table::new(id));
        }
        TableStore { tables }
    }

    /// Reserves capacity for `rows` additional rows in `table`.
    ///
    /// # Errors
    /// Returns [`Error::AllocationFailed`] when the buffer cannot grow.
    pub fn reserve(&mut self, table: TableId, rows: usize) -> Result<()> {
        let entry = &mut self.tables[slot(table)];
        let extra = rows * entry.width;
        entry
            .values
            .try_reserve(extra)
            .map_err(|_| Error::AllocationFailed(extra * std::mem::size_of::<u32>()))?;
        Ok(())
    }

    /// Appends a row and returns its 1-based index.
    ///
    /// # Errors
    /// Returns [`Error::LayoutFailed`] when the value count does not match the
    /// table's column count, and [`Error::AllocationFailed`] when the buffer
    /// cannot grow.
    pub fn append_row(&mut self, table: TableId, values: &[u32]) -> Result<u32> {
        let entry = &mut self.tables[slot(table)];
        if values.len() != entry.width {
            return Err(Error::LayoutFailed(format!(
                "table 0x{:02x} expects {} columns, got {}",
                table.tag(),
                entry.width,
                values.len()
            )));
        }
        entry
            .values
            .try_reserve(values.len())
            .map_err(|_| Error::AllocationFailed(values.len() * std::mem::size_of::<u32>()))?;
        entry.values.extend_from_slice(values);
        Ok(entry.row_count())
    }

    /// Returns the row at the 1-based index, or `None` when out of range.
    #[must_use]
    pub fn row(&self, table: TableId, idx: u32) -> Option<&[u32]> {
        let entry = &self.tables[slot(table)];
        if idx == 0 || idx > entry.row_count() {
            return None;
        }
        let start = (idx as usize - 1) * entry.width;
        Some(&entry.values[start..start + entry.width])
    }

    /// Returns a mutable view of the row at the 1-based index.
    #[must_use]
    pub fn row_mut(&mut self, table: TableId, idx: u32) -> Option<&mut [u32]> {
        let entry = &mut self.tables[slot(table)];
        if idx == 0 || idx > entry.row_count() {
            return None;
        }
        let start = (idx as usize - 1) * entry.width;
        Some(&mut entry.values[start..start + entry.width])
    }

    /// Number of rows currently stored in `table`.
    #[must_use]
    pub fn row_count(&self, table: TableId) -> u32 {
        self.tables[slot(table)].row_count()
    }

    /// Number of columns per row of `table`.
    #[must_use]
    pub fn column_count(&self, table: TableId) -> usize {
        self.tables[slot(table)].width
    }

    /// Raw row buffer of `table` (row-count * column-count values).
    #[must_use]
    pub fn raw(&self, table: TableId) -> &[u32] {
        &self.tables[slot(table)].values
    }

    /// Sorts the rows of `table` by the given column, with an optional
    /// tie-break column. The sort is stable so equal rows keep their
    /// emission order.
    pub fn sort_rows(&mut self, table: TableId, primary: usize, secondary: Option<usize>) {
        let entry = &mut self.tables[slot(table)];
        if entry.row_count() < 2 {
            return;
        }
        let width = entry.width;
        let mut rows: Vec<&[u32]> = entry.values.chunks_exact(width).collect();
        rows.sort_by(|a, b| {
            a[primary].cmp(&b[primary]).then_with(|| match secondary {
                Some(col) => a[col].cmp(&b[col]),
                None => std::cmp::Ordering::Equal,
            })
        });
        let mut sorted = Vec::with_capacity(entry.values.len());
        for row in rows {
            sorted.extend_from_slice(row);
        }
        entry.values = sorted;
    }
}

impl Default for TableStore {
    fn default() -> Self {
        TableStore::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_store() {
        let store = TableStore::new();
        for id in TableId::iter() {
            assert_eq!(store.row_count(id), 0);
            assert!(store.row(id, 1).is_none());
        }
    }

    #[test]
    fn test_append_and_read() -> Result<()> {
        let mut store = TableStore::new();
        let idx = store.append_row(TableId::Field, &[0x0006, 10, 20])?;
        assert_eq!(idx, 1);
        let idx = store.append_row(TableId::Field, &[0x0001, 11, 21])?;
        assert_eq!(idx, 2);

        assert_eq!(store.row_count(TableId::Field), 2);
        assert_eq!(store.row(TableId::Field, 1), Some(&[0x0006, 10, 20][..]));
        assert_eq!(store.row(TableId::Field, 2), Some(&[0x0001, 11, 21][..]));
        assert!(store.row(TableId::Field, 0).is_none());
        assert!(store.row(TableId::Field, 3).is_none());
        Ok(())
    }

    #[test]
    fn test_column_count_mismatch() {
        let mut store = TableStore::new();
        let result = store.append_row(TableId::Field, &[1, 2]);
        assert!(matches!(result, Err(Error::LayoutFailed(_))));
    }

    #[test]
    fn test_row_mut() -> Result<()> {
        let mut store = TableStore::new();
        store.append_row(TableId::TypeSpec, &[5])?;
        store.row_mut(TableId::TypeSpec, 1).unwrap()[0] = 9;
        assert_eq!(store.row(TableId::TypeSpec, 1), Some(&[9][..]));
        Ok(())
    }

    #[test]
    fn test_sort_rows_primary_only() -> Result<()> {
        let mut store = TableStore::new();
        store.append_row(TableId::NestedClass, &[3, 1])?;
        store.append_row(TableId::NestedClass, &[1, 2])?;
        store.append_row(TableId::NestedClass, &[2, 3])?;
        store.sort_rows(TableId::NestedClass, 0, None);

        assert_eq!(store.row(TableId::NestedClass, 1), Some(&[1, 2][..]));
        assert_eq!(store.row(TableId::NestedClass, 2), Some(&[2, 3][..]));
        assert_eq!(store.row(TableId::NestedClass, 3), Some(&[3, 1][..]));
        Ok(())
    }

    #[test]
    fn test_sort_rows_with_tie_break() -> Result<()> {
        let mut store = TableStore::new();
        // Same owner, ordinals out of order.
        store.append_row(TableId::GenericParam, &[1, 0, 8, 40])?;
        store.append_row(TableId::GenericParam, &[0, 0, 8, 41])?;
        store.append_row(TableId::GenericParam, &[0, 0, 4, 42])?;
        store.sort_rows(TableId::GenericParam, 2, Some(0));

        assert_eq!(store.row(TableId::GenericParam, 1), Some(&[0, 0, 4, 42][..]));
        assert_eq!(store.row(TableId::GenericParam, 2), Some(&[0, 0, 8, 41][..]));
        assert_eq!(store.row(TableId::GenericParam, 3), Some(&[1, 0, 8, 40][..]));
        Ok(())
    }

    #[test]
    fn test_sort_is_stable() -> Result<()> {
        let mut store = TableStore::new();
        store.append_row(TableId::CustomAttribute, &[32, 0x0A, 1])?;
        store.append_row(TableId::CustomAttribute, &[32, 0x0B, 2])?;
        store.append_row(TableId::CustomAttribute, &[7, 0x0C, 3])?;
        store.sort_rows(TableId::CustomAttribute, 0, None);

        assert_eq!(store.row(TableId::CustomAttribute, 1), Some(&[7, 0x0C, 3][..]));
        assert_eq!(store.row(TableId::CustomAttribute, 2), Some(&[32, 0x0A, 1][..]));
        assert_eq!(store.row(TableId::CustomAttribute, 3), Some(&[32, 0x0B, 2][..]));
        Ok(())
    }

    #[test]
    fn test_reserve() -> Result<()> {
        let mut store = TableStore::new();
        store.reserve(TableId::MethodDef, 128)?;
        assert_eq!(store.row_count(TableId::MethodDef), 0);
        Ok(())
    }
}
