//! Declarative column layouts for every metadata table this builder emits.
//!
//! Rows are held in memory as `u32` columns; the physical width of each column
//! (1, 2 or 4 bytes) is only decided at serialization time, once the final heap
//! sizes and row counts are known. The layouts here follow ECMA-335 II.22.

use crate::metadata::tables::{CodedIndexKind, TableId};

/// The logical kind of a single table column.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ColumnKind {
    /// Fixed 1-byte constant column.
    Byte,
    /// Fixed 2-byte constant column.
    Short,
    /// Fixed 4-byte constant column.
    Long,
    /// Index into the `#Strings` heap (2 or 4 bytes).
    StringIndex,
    /// Index into the `#GUID` heap (2 or 4 bytes).
    GuidIndex,
    /// Index into the `#Blob` heap (2 or 4 bytes).
    BlobIndex,
    /// Plain 1-based row index into another table (2 or 4 bytes).
    TableIndex(TableId),
    /// Packed coded index, stored pre-encoded (2 or 4 bytes).
    CodedIndex(CodedIndexKind),
}

/// Returns the column layout of `table`.
#[must_use]
pub fn columns(table: TableId) -> &'static [ColumnKind] {
    use CodedIndexKind as CK;
    use ColumnKind::{BlobIndex, Byte, CodedIndex, GuidIndex, Long, Short, StringIndex, TableIndex};
    use TableId as T;
    match table {
        T::Module => &[Short, StringIndex, GuidIndex, GuidIndex, GuidIndex],
        T::TypeRef => &[CodedIndex(CK::ResolutionScope), StringIndex, StringIndex],
        T::TypeDef => &[
            Long,
            StringIndex,
            StringIndex,
            CodedIndex(CK::TypeDefOrRef),
            TableIndex(T::Field),
            TableIndex(T::MethodDef),
        ],
        T::Field => &[Short, StringIndex, BlobIndex],
        T::MethodDef => &[
            Long,
            Short,
            Short,
            StringIndex,
            BlobIndex,
            TableIndex(T::Param),
        ],
        T::Param => &[Short, Short, StringIndex],
        T::InterfaceImpl => &[TableIndex(T::TypeDef), CodedIndex(CK::TypeDefOrRef)],
        T::MemberRef => &[CodedIndex(CK::MemberRefParent), StringIndex, BlobIndex],
        T::Constant => &[Byte, Byte, CodedIndex(CK::HasConstant), BlobIndex],
        T::CustomAttribute => &[
            CodedIndex(CK::HasCustomAttribute),
            CodedIndex(CK::CustomAttributeType),
            BlobIndex,
        ],
        T::FieldMarshal => &[CodedIndex(CK::HasFieldMarshal), BlobIndex],
        T::DeclSecurity => &[Short, CodedIndex(CK::HasDeclSecurity), BlobIndex],
        T::ClassLayout => &[Short, Long, TableIndex(T::TypeDef)],
        T::FieldLayout => &[Long, TableIndex(T::Field)],
        T::StandAloneSig => &[BlobIndex],
        T::EventMap => &[TableIndex(T::TypeDef), TableIndex(T::Event)],
        T::Event => &[Short, StringIndex, CodedIndex(CK::TypeDefOrRef)],
        T::PropertyMap => &[TableIndex(T::TypeDef), TableIndex(T::Property)],
        T::Property => &[Short, StringIndex, BlobIndex],
        T::MethodSemantics => &[Short, TableIndex(T::MethodDef), CodedIndex(CK::HasSemantics)],
        T::MethodImpl => &[
            TableIndex(T::TypeDef),
            CodedIndex(CK::MethodDefOrRef),
            CodedIndex(CK::MethodDefOrRef),
        ],
        T::ModuleRef => &[StringIndex],
        T::TypeSpec => &[BlobIndex],
        T::ImplMap => &[
            Short,
            CodedIndex(CK::MemberForwarded),
            StringIndex,
            TableIndex(T::ModuleRef),
        ],
        T::FieldRVA => &[Long, TableIndex(T::Field)],
        T::Assembly => &[
            Long,
            Short,
            Short,
            Short,
            Short,
            Long,
            BlobIndex,
            StringIndex,
            StringIndex,
        ],
        T::AssemblyRef => &[
            Short,
            Short,
            Short,
            Short,
            Long,
            BlobIndex,
            StringIndex,
            StringIndex,
            BlobIndex,
        ],
        T::File => &[Long, StringIndex, BlobIndex],
        T::ExportedType => &[
            Long,
            Long,
            StringIndex,
            StringIndex,
            CodedIndex(CK::Implementation),
        ],
        T::ManifestResource => &[Long, Long, StringIndex, CodedIndex(CK::Implementation)],
        T::NestedClass => &[TableIndex(T::TypeDef), TableIndex(T::TypeDef)],
        T::GenericParam => &[Short, Short, CodedIndex(CK::TypeOrMethodDef), StringIndex],
        T::MethodSpec => &[CodedIndex(CK::MethodDefOrRef), BlobIndex],
        T::GenericParamConstraint => &[TableIndex(T::GenericParam), CodedIndex(CK::TypeDefOrRef)],
    }
}

/// Returns the sort key columns for tables that must be kept sorted.
///
/// The result is `(primary, secondary)` column indices; rows compare by the
/// primary column first, then the secondary where present. Tables outside the
/// set (including `GenericParamConstraint`) are serialized in emission order.
#[must_use]
pub fn sort_keys(table: TableId) -> Option<(usize, Option<usize>)> {
    match table {
        TableId::InterfaceImpl => Some((0, Some(1))),
        TableId::Constant => Some((2, None)),
        TableId::CustomAttribute => Some((0, None)),
        TableId::FieldMarshal => Some((0, None)),
        TableId::DeclSecurity => Some((1, None)),
        TableId::ClassLayout => Some((2, None)),
        TableId::FieldLayout => Some((1, None)),
        TableId::MethodSemantics => Some((2, Some(0))),
        TableId::MethodImpl => Some((0, None)),
        TableId::ImplMap => Some((1, None)),
        TableId::FieldRVA => Some((1, None)),
        TableId::NestedClass => Some((0, None)),
        TableId::GenericParam => Some((2, Some(0))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_every_table_has_columns() {
        for table in TableId::iter() {
            assert!(!columns(table).is_empty(), "{table:?} has no columns");
        }
    }

    #[test]
    fn test_known_column_counts() {
        assert_eq!(columns(TableId::Module).len(), 5);
        assert_eq!(columns(TableId::TypeDef).len(), 6);
        assert_eq!(columns(TableId::MethodDef).len(), 6);
        assert_eq!(columns(TableId::Assembly).len(), 9);
        assert_eq!(columns(TableId::AssemblyRef).len(), 9);
        assert_eq!(columns(TableId::StandAloneSig).len(), 1);
    }

    #[test]
    fn test_sorted_table_set() {
        let sorted: Vec<TableId> = TableId::iter().filter(|t| sort_keys(*t).is_some()).collect();
        assert_eq!(
            sorted,
            vec![
                TableId::InterfaceImpl,
                TableId::Constant,
                TableId::CustomAttribute,
                TableId::FieldMarshal,
                TableId::DeclSecurity,
                TableId::ClassLayout,
                TableId::FieldLayout,
                TableId::MethodSemantics,
                TableId::MethodImpl,
                TableId::ImplMap,
                TableId::FieldRVA,
                TableId::NestedClass,
                TableId::GenericParam,
            ]
        );
    }

    #[test]
    fn test_sort_keys_in_range() {
        for table in TableId::iter() {
            if let Some((primary, secondary)) = sort_keys(table) {
                let cols = columns(table);
                assert!(primary < cols.len());
                if let Some(secondary) = secondary {
                    assert!(secondary < cols.len());
                }
            }
        }
    }
}
