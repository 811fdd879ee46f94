use crate::{metadata::tables::TableId, metadata::token::Token, Error, Result};

/// The coded index families defined in ECMA-335 II.24.2.6.
///
/// A coded index packs a row index and a small table tag into a single value:
/// `(row << tag_bits) | tag`. Rows store coded columns in this packed form so
/// that the numeric order of the stored value matches the on-disk sort order.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum CodedIndexKind {
    /// `TypeDefOrRef`: TypeDef, TypeRef, TypeSpec (2 tag bits).
    TypeDefOrRef,
    /// `HasConstant`: Field, Param, Property (2 tag bits).
    HasConstant,
    /// `HasCustomAttribute`: most tables (5 tag bits).
    HasCustomAttribute,
    /// `HasFieldMarshal`: Field, Param (1 tag bit).
    HasFieldMarshal,
    /// `HasDeclSecurity`: TypeDef, MethodDef, Assembly (2 tag bits).
    HasDeclSecurity,
    /// `MemberRefParent`: TypeDef, TypeRef, ModuleRef, MethodDef, TypeSpec (3 tag bits).
    MemberRefParent,
    /// `HasSemantics`: Event, Property (1 tag bit).
    HasSemantics,
    /// `MethodDefOrRef`: MethodDef, MemberRef (1 tag bit).
    MethodDefOrRef,
    /// `MemberForwarded`: Field, MethodDef (1 tag bit).
    MemberForwarded,
    /// `Implementation`: File, AssemblyRef, ExportedType (2 tag bits).
    Implementation,
    /// `CustomAttributeType`: MethodDef, MemberRef at tags 2 and 3 (3 tag bits).
    CustomAttributeType,
    /// `ResolutionScope`: Module, ModuleRef, AssemblyRef, TypeRef (2 tag bits).
    ResolutionScope,
    /// `TypeOrMethodDef`: TypeDef, MethodDef (1 tag bit).
    TypeOrMethodDef,
}

impl CodedIndexKind {
    /// Number of low bits used for the table tag.
    #[must_use]
    pub const fn tag_bits(self) -> u32 {
        match self {
            CodedIndexKind::HasFieldMarshal
            | CodedIndexKind::HasSemantics
            | CodedIndexKind::MethodDefOrRef
            | CodedIndexKind::MemberForwarded
            | CodedIndexKind::TypeOrMethodDef => 1,
            CodedIndexKind::TypeDefOrRef
            | CodedIndexKind::HasConstant
            | CodedIndexKind::HasDeclSecurity
            | CodedIndexKind::Implementation
            | CodedIndexKind::ResolutionScope => 2,
            CodedIndexKind::MemberRefParent | CodedIndexKind::CustomAttributeType => 3,
            CodedIndexKind::HasCustomAttribute => 5,
        }
    }

    /// The tables this family can reference, indexed by tag value.
    ///
    /// `None` marks tag values the format leaves unused.
    #[must_use]
    pub const fn tables(self) -> &'static [Option<TableId>] {
        use TableId as T;
        match self {
            CodedIndexKind::TypeDefOrRef => {
                &[Some(T::TypeDef), Some(T::TypeRef), Some(T::TypeSpec)]
            }
            CodedIndexKind::HasConstant => {
                &[Some(T::Field), Some(T::Param), Some(T::Property)]
            }
            CodedIndexKind::HasCustomAttribute => &[
                Some(T::MethodDef),
                Some(T::Field),
                Some(T::TypeRef),
                Some(T::TypeDef),
                Some(T::Param),
                Some(T::InterfaceImpl),
                Some(T::MemberRef),
                Some(T::Module),
                Some(T::DeclSecurity),
                Some(T::Property),
                Some(T::Event),
                Some(T::StandAloneSig),
                Some(T::ModuleRef),
                Some(T::TypeSpec),
                Some(T::Assembly),
                Some(T::AssemblyRef),
                Some(T::File),
                Some(T::ExportedType),
                Some(T::ManifestResource),
                Some(T::GenericParam),
                Some(T::GenericParamConstraint),
                Some(T::MethodSpec),
            ],
            CodedIndexKind::HasFieldMarshal => &[Some(T::Field), Some(T::Param)],
            CodedIndexKind::HasDeclSecurity => {
                &[Some(T::TypeDef), Some(T::MethodDef), Some(T::Assembly)]
            }
            CodedIndexKind::MemberRefParent => &[
                Some(T::TypeDef),
                Some(T::TypeRef),
                Some(T::ModuleRef),
                Some(T::MethodDef),
                Some(T::TypeSpec),
            ],
            CodedIndexKind::HasSemantics => &[Some(T::Event), Some(T::Property)],
            CodedIndexKind::MethodDefOrRef => &[Some(T::MethodDef), Some(T::MemberRef)],
            CodedIndexKind::MemberForwarded => &[Some(T::Field), Some(T::MethodDef)],
            CodedIndexKind::Implementation => {
                &[Some(T::File), Some(T::AssemblyRef), Some(T::ExportedType)]
            }
            CodedIndexKind::CustomAttributeType => {
                &[None, None, Some(T::MethodDef), Some(T::MemberRef)]
            }
            CodedIndexKind::ResolutionScope => &[
                Some(T::Module),
                Some(T::ModuleRef),
                Some(T::AssemblyRef),
                Some(T::TypeRef),
            ],
            CodedIndexKind::TypeOrMethodDef => &[Some(T::TypeDef), Some(T::MethodDef)],
        }
    }

    /// Returns the tag value for a table in this family.
    pub fn tag_for(self, table: TableId) -> Result<u32> {
        for (tag, entry) in self.tables().iter().enumerate() {
            if *entry == Some(table) {
                #[allow(clippy::cast_possible_truncation)]
                return Ok(tag as u32);
            }
        }
        Err(Error::Unsupported(format!(
            "table 0x{:02x} is not part of coded index family {self:?}",
            table.tag()
        )))
    }

    /// Packs a token into this family's coded form.
    ///
    /// Fails when the token's table is not part of the family.
    pub fn encode(self, token: Token) -> Result<u32> {
        let table = decode_table_tag(token.table())?;
        let tag = self.tag_for(table)?;
        Ok((token.row() << self.tag_bits()) | tag)
    }

    /// Returns true when this coded index must be stored as 4 bytes.
    ///
    /// The 2-byte form holds rows up to `1 << (16 - tag_bits)`; once any
    /// referenced table reaches that row count, the wide form is required.
    pub fn is_wide(self, row_count: impl Fn(TableId) -> u32) -> bool {
        let limit = 1u32 << (16 - self.tag_bits());
        self.tables()
            .iter()
            .flatten()
            .any(|table| row_count(*table) >= limit)
    }
}

/// Maps a token tag byte back to a [`TableId`].
pub fn decode_table_tag(tag: u8) -> Result<TableId> {
    use strum::IntoEnumIterator;
    TableId::iter()
        .find(|id| id.tag() == tag)
        .ok_or_else(|| Error::Unsupported(format!("unknown metadata table tag 0x{tag:02x}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_bits() {
        assert_eq!(CodedIndexKind::TypeDefOrRef.tag_bits(), 2);
        assert_eq!(CodedIndexKind::HasCustomAttribute.tag_bits(), 5);
        assert_eq!(CodedIndexKind::MethodDefOrRef.tag_bits(), 1);
        assert_eq!(CodedIndexKind::CustomAttributeType.tag_bits(), 3);
    }

    #[test]
    fn test_encode_typedef_or_ref() {
        let coded = CodedIndexKind::TypeDefOrRef
            .encode(Token::from_parts(TableId::TypeRef.tag(), 7))
            .unwrap();
        assert_eq!(coded, (7 << 2) | 1);
    }

    #[test]
    fn test_encode_custom_attribute_type() {
        let coded = CodedIndexKind::CustomAttributeType
            .encode(Token::from_parts(TableId::MemberRef.tag(), 2))
            .unwrap();
        assert_eq!(coded, (2 << 3) | 3);
    }

    #[test]
    fn test_encode_rejects_foreign_table() {
        let result =
            CodedIndexKind::HasSemantics.encode(Token::from_parts(TableId::TypeDef.tag(), 1));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolution_scope_tags() {
        let kind = CodedIndexKind::ResolutionScope;
        assert_eq!(kind.tag_for(TableId::Module).unwrap(), 0);
        assert_eq!(kind.tag_for(TableId::ModuleRef).unwrap(), 1);
        assert_eq!(kind.tag_for(TableId::AssemblyRef).unwrap(), 2);
        assert_eq!(kind.tag_for(TableId::TypeRef).unwrap(), 3);
    }

    #[test]
    fn test_width_flips_at_limit() {
        let kind = CodedIndexKind::TypeDefOrRef;
        assert!(!kind.is_wide(|_| (1 << 14) - 1));
        assert!(kind.is_wide(|_| 1 << 14));

        let wide_family = CodedIndexKind::HasCustomAttribute;
        assert!(!wide_family.is_wide(|_| (1 << 11) - 1));
        assert!(wide_family.is_wide(|_| 1 << 11));
    }

    #[test]
    fn test_decode_table_tag() {
        assert_eq!(decode_table_tag(0x06).unwrap(), TableId::MethodDef);
        assert!(decode_table_tag(0x3F).is_err());
    }
}
