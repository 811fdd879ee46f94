//! Turns entity descriptors into metadata tokens.
//!
//! Each reference kind is emitted at most once per entity: results are cached
//! by [`EntityId`], so asking twice for the same entity yields the same token
//! and no duplicate rows. Generic method instantiations cache their
//! `MethodSpec` separately from the underlying `MemberRef`, matching how a
//! loader distinguishes the two tokens.

use rustc_hash::FxHashMap;

use crate::{
    image::entity::{
        AssemblyIdentity, EntityDesc, EntityId, FieldRefDesc, ScopeRef, TypeRefDesc,
    },
    metadata::heaps::{BlobHeap, StringsHeap},
    metadata::tables::{CodedIndexKind, TableId, TableStore},
    metadata::token::Token,
    Error, Result,
};

/// Resolver state: descriptors plus per-kind token caches.
pub struct Resolver {
    descriptors: FxHashMap<EntityId, EntityDesc>,
    type_cache: FxHashMap<EntityId, Token>,
    member_cache: FxHashMap<EntityId, Token>,
    spec_cache: FxHashMap<EntityId, Token>,
    assembly_cache: FxHashMap<String, Token>,
    module_cache: FxHashMap<String, Token>,
}

impl Resolver {
    /// Creates an empty resolver with no descriptors or cached tokens.
    #[must_use]
    pub fn new() -> Self {
        Resolver {
            descriptors: FxHashMap::default(),
            type_cache: FxHashMap::default(),
            member_cache: FxHashMap::default(),
            spec_cache: FxHashMap::default(),
            assembly_cache: FxHashMap::default(),
            module_cache: FxHashMap::default(),
        }
    }

    /// Registers the descriptor for `id`.
    ///
    /// An id must always describe the same entity; re-registering with a
    /// different descriptor is an error.
    pub fn describe(&mut self, id: EntityId, desc: EntityDesc) -> Result<()> {
        match self.descriptors.get(&id) {
            None => {
                self.descriptors.insert(id, desc);
                Ok(())
            }
            Some(existing) if *existing == desc => Ok(()),
            Some(_) => Err(Error::Unsupported(format!(
                "entity id {id} was already described differently"
            ))),
        }
    }

    /// Produces a token for any described entity, dispatching on its category.
    pub fn create_token(
        &mut self,
        id: EntityId,
        strings: &mut StringsHeap,
        blob: &mut BlobHeap,
        tables: &mut TableStore,
    ) -> Result<Token> {
        match self.descriptors.get(&id) {
            Some(EntityDesc::Type(_)) => self.type_token(id, strings, blob, tables),
            Some(EntityDesc::Method(_)) => self.method_token(id, strings, blob, tables),
            Some(EntityDesc::Field(_)) => self.field_token(id, strings, blob, tables),
            None => Err(Error::UnresolvedEntity(id.0)),
        }
    }

    /// Produces the `TypeDef`, `TypeRef` or `TypeSpec` token for a type entity.
    pub fn type_token(
        &mut self,
        id: EntityId,
        strings: &mut StringsHeap,
        blob: &mut BlobHeap,
        tables: &mut TableStore,
    ) -> Result<Token> {
        if let Some(&token) = self.type_cache.get(&id) {
            return Ok(token);
        }
        let desc = match self.descriptors.get(&id) {
            Some(EntityDesc::Type(desc)) => desc.clone(),
            Some(_) => {
                return Err(Error::Unsupported(format!(
                    "entity id {id} does not describe a type"
                )))
            }
            None => return Err(Error::UnresolvedEntity(id.0)),
        };

        let token = match desc {
            TypeRefDesc::Local { token } => token,
            TypeRefDesc::External {
                name,
                namespace,
                scope,
                nested_in,
            } => {
                let scope_token = match nested_in {
                    // Nested types resolve their enclosing type first and use
                    // it as the resolution scope.
                    Some(parent) => self.type_token(parent, strings, blob, tables)?,
                    None => match scope {
                        ScopeRef::Assembly(identity) => {
                            self.assembly_ref_token(&identity, strings, blob, tables)?
                        }
                        ScopeRef::Module { name } => {
                            self.module_ref_token(&name, strings, tables)?
                        }
                    },
                };
                let coded = CodedIndexKind::ResolutionScope.encode(scope_token)?;
                let name_idx = strings.intern(&name)?;
                let ns_idx = strings.intern(&namespace)?;
                let row = tables.append_row(TableId::TypeRef, &[coded, name_idx, ns_idx])?;
                Token::from_parts(TableId::TypeRef.tag(), row)
            }
            TypeRefDesc::Spec { signature } => {
                let sig_idx = blob.intern(&signature)?;
                let row = tables.append_row(TableId::TypeSpec, &[sig_idx])?;
                Token::from_parts(TableId::TypeSpec.tag(), row)
            }
        };

        self.type_cache.insert(id, token);
        Ok(token)
    }

    /// Produces the token for a method entity: a `MemberRef`, or a
    /// `MethodSpec` when the descriptor carries an instantiation.
    pub fn method_token(
        &mut self,
        id: EntityId,
        strings: &mut StringsHeap,
        blob: &mut BlobHeap,
        tables: &mut TableStore,
    ) -> Result<Token> {
        let desc = match self.descriptors.get(&id) {
            Some(EntityDesc::Method(desc)) => desc.clone(),
            Some(_) => {
                return Err(Error::Unsupported(format!(
                    "entity id {id} does not describe a method"
                )))
            }
            None => return Err(Error::UnresolvedEntity(id.0)),
        };

        let member = self.member_ref_token(
            id,
            desc.declaring,
            &desc.name,
            &desc.signature,
            strings,
            blob,
            tables,
        )?;

        let Some(instantiation) = desc.instantiation else {
            return Ok(member);
        };
        if let Some(&token) = self.spec_cache.get(&id) {
            return Ok(token);
        }
        let coded = CodedIndexKind::MethodDefOrRef.encode(member)?;
        let inst_idx = blob.intern(&instantiation)?;
        let row = tables.append_row(TableId::MethodSpec, &[coded, inst_idx])?;
        let token = Token::from_parts(TableId::MethodSpec.tag(), row);
        self.spec_cache.insert(id, token);
        Ok(token)
    }

    /// Produces the `MemberRef` token for a field entity.
    pub fn field_token(
        &mut self,
        id: EntityId,
        strings: &mut StringsHeap,
        blob: &mut BlobHeap,
        tables: &mut TableStore,
    ) -> Result<Token> {
        let desc = match self.descriptors.get(&id) {
            Some(EntityDesc::Field(desc)) => desc.clone(),
            Some(_) => {
                return Err(Error::Unsupported(format!(
                    "entity id {id} does not describe a field"
                )))
            }
            None => return Err(Error::UnresolvedEntity(id.0)),
        };
        let FieldRefDesc {
            declaring,
            name,
            signature,
        } = desc;
        self.member_ref_token(id, declaring, &name, &signature, strings, blob, tables)
    }

    #[allow(clippy::too_many_arguments)]
    fn member_ref_token(
        &mut self,
        id: EntityId,
        declaring: EntityId,
        name: &str,
        signature: &[u8],
        strings: &mut StringsHeap,
        blob: &mut BlobHeap,
        tables: &mut TableStore,
    ) -> Result<Token> {
        if let Some(&token) = self.member_cache.get(&id) {
            return Ok(token);
        }
        let parent = self.type_token(declaring, strings, blob, tables)?;
        let coded = CodedIndexKind::MemberRefParent.encode(parent)?;
        let name_idx = strings.intern(name)?;
        let sig_idx = blob.intern(signature)?;
        let row = tables.append_row(TableId::MemberRef, &[coded, name_idx, sig_idx])?;
        let token = Token::from_parts(TableId::MemberRef.tag(), row);
        self.member_cache.insert(id, token);
        Ok(token)
    }

    /// Produces the `AssemblyRef` token for an assembly identity, emitting the
    /// row on first use. Identity fields are copied verbatim.
    pub fn assembly_ref_token(
        &mut self,
        identity: &AssemblyIdentity,
        strings: &mut StringsHeap,
        blob: &mut BlobHeap,
        tables: &mut TableStore,
    ) -> Result<Token> {
        if let Some(&token) = self.assembly_cache.get(&identity.name) {
            return Ok(token);
        }
        let name_idx = strings.intern(&identity.name)?;
        let culture_idx = strings.intern(&identity.culture)?;
        let key_idx = blob.intern(&identity.public_key_or_token)?;
        let (major, minor, build, revision) = identity.version;
        let row = tables.append_row(
            TableId::AssemblyRef,
            &[
                u32::from(major),
                u32::from(minor),
                u32::from(build),
                u32::from(revision),
                identity.flags,
                key_idx,
                name_idx,
                culture_idx,
                0, // hash value
            ],
        )?;
        let token = Token::from_parts(TableId::AssemblyRef.tag(), row);
        self.assembly_cache.insert(identity.name.clone(), token);
        Ok(token)
    }

    /// Produces the `ModuleRef` token for a module name, emitting the row on
    /// first use.
    pub fn module_ref_token(
        &mut self,
        name: &str,
        strings: &mut StringsHeap,
        tables: &mut TableStore,
    ) -> Result<Token> {
        if let Some(&token) = self.module_cache.get(name) {
            return Ok(token);
        }
        let name_idx = strings.intern(name)?;
        let row = tables.append_row(TableId::ModuleRef, &[name_idx])?;
        let token = Token::from_parts(TableId::ModuleRef.tag(), row);
        self.module_cache.insert(name.to_string(), token);
        Ok(token)
    }

    /// Drops all caches and descriptors; emitted rows stay valid.
    pub fn release(&mut self) {
        self.descriptors = FxHashMap::default();
        self.type_cache = FxHashMap::default();
        self.member_cache = FxHashMap::default();
        self.spec_cache = FxHashMap::default();
        self.assembly_cache = FxHashMap::default();
        self.module_cache = FxHashMap::default();
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Resolver::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::entity::MethodRefDesc;

    fn mscorlib() -> AssemblyIdentity {
        AssemblyIdentity {
            name: "mscorlib".to_string(),
            version: (4, 0, 0, 0),
            culture: String::new(),
            public_key_or_token: vec![0xb7, 0x7a, 0x5c, 0x56, 0x19, 0x34, 0xe0, 0x89],
            flags: 0,
        }
    }

    fn object_desc() -> EntityDesc {
        EntityDesc::Type(TypeRefDesc::External {
            name: "Object".to_string(),
            namespace: "System".to_string(),
            scope: ScopeRef::Assembly(mscorlib()),
            nested_in: None,
        })
    }

    struct Fixture {
        strings: StringsHeap,
        blob: BlobHeap,
        tables: TableStore,
        resolver: Resolver,
    }

    fn fixture() -> Result<Fixture> {
        Ok(Fixture {
            strings: StringsHeap::new()?,
            blob: BlobHeap::new()?,
            tables: TableStore::new(),
            resolver: Resolver::new(),
        })
    }

    #[test]
    fn test_external_type_emits_typeref_and_assemblyref() -> Result<()> {
        let mut f = fixture()?;
        f.resolver.describe(EntityId(1), object_desc())?;

        let token = f
            .resolver
            .type_token(EntityId(1), &mut f.strings, &mut f.blob, &mut f.tables)?;
        assert_eq!(token.table(), TableId::TypeRef.tag());
        assert_eq!(token.row(), 1);
        assert_eq!(f.tables.row_count(TableId::TypeRef), 1);
        assert_eq!(f.tables.row_count(TableId::AssemblyRef), 1);

        // AssemblyRef copies the version verbatim.
        let row = f.tables.row(TableId::AssemblyRef, 1).unwrap();
        assert_eq!(&row[0..4], &[4, 0, 0, 0]);
        Ok(())
    }

    #[test]
    fn test_type_token_is_cached() -> Result<()> {
        let mut f = fixture()?;
        f.resolver.describe(EntityId(1), object_desc())?;

        let a = f
            .resolver
            .type_token(EntityId(1), &mut f.strings, &mut f.blob, &mut f.tables)?;
        let b = f
            .resolver
            .type_token(EntityId(1), &mut f.strings, &mut f.blob, &mut f.tables)?;
        assert_eq!(a, b);
        assert_eq!(f.tables.row_count(TableId::TypeRef), 1);
        assert_eq!(f.tables.row_count(TableId::AssemblyRef), 1);
        Ok(())
    }

    #[test]
    fn test_shared_assembly_scope() -> Result<()> {
        let mut f = fixture()?;
        f.resolver.describe(EntityId(1), object_desc())?;
        f.resolver.describe(
            EntityId(2),
            EntityDesc::Type(TypeRefDesc::External {
                name: "String".to_string(),
                namespace: "System".to_string(),
                scope: ScopeRef::Assembly(mscorlib()),
                nested_in: None,
            }),
        )?;

        f.resolver
            .type_token(EntityId(1), &mut f.strings, &mut f.blob, &mut f.tables)?;
        f.resolver
            .type_token(EntityId(2), &mut f.strings, &mut f.blob, &mut f.tables)?;

        // Both TypeRefs share one AssemblyRef row.
        assert_eq!(f.tables.row_count(TableId::TypeRef), 2);
        assert_eq!(f.tables.row_count(TableId::AssemblyRef), 1);
        Ok(())
    }

    #[test]
    fn test_nested_type_scopes_through_parent() -> Result<()> {
        let mut f = fixture()?;
        f.resolver.describe(EntityId(1), object_desc())?;
        f.resolver.describe(
            EntityId(2),
            EntityDesc::Type(TypeRefDesc::External {
                name: "Nested".to_string(),
                namespace: String::new(),
                scope: ScopeRef::Assembly(mscorlib()),
                nested_in: Some(EntityId(1)),
            }),
        )?;

        let token = f
            .resolver
            .type_token(EntityId(2), &mut f.strings, &mut f.blob, &mut f.tables)?;
        assert_eq!(token.table(), TableId::TypeRef.tag());
        assert_eq!(f.tables.row_count(TableId::TypeRef), 2);

        // The nested row's scope is the enclosing TypeRef (tag 3).
        let row = f.tables.row(TableId::TypeRef, token.row()).unwrap();
        assert_eq!(row[0] & 0x3, 3);
        assert_eq!(row[0] >> 2, 1);
        Ok(())
    }

    #[test]
    fn test_module_scope() -> Result<()> {
        let mut f = fixture()?;
        f.resolver.describe(
            EntityId(3),
            EntityDesc::Type(TypeRefDesc::External {
                name: "Helper".to_string(),
                namespace: String::new(),
                scope: ScopeRef::Module {
                    name: "other.dll".to_string(),
                },
                nested_in: None,
            }),
        )?;

        let token = f
            .resolver
            .type_token(EntityId(3), &mut f.strings, &mut f.blob, &mut f.tables)?;
        let row = f.tables.row(TableId::TypeRef, token.row()).unwrap();
        // ResolutionScope tag 1 is ModuleRef.
        assert_eq!(row[0] & 0x3, 1);
        assert_eq!(f.tables.row_count(TableId::ModuleRef), 1);
        Ok(())
    }

    #[test]
    fn test_method_ref() -> Result<()> {
        let mut f = fixture()?;
        f.resolver.describe(EntityId(1), object_desc())?;
        f.resolver.describe(
            EntityId(10),
            EntityDesc::Method(MethodRefDesc {
                declaring: EntityId(1),
                name: ".ctor".to_string(),
                signature: vec![0x20, 0x00, 0x01],
                instantiation: None,
            }),
        )?;

        let token = f
            .resolver
            .method_token(EntityId(10), &mut f.strings, &mut f.blob, &mut f.tables)?;
        assert_eq!(token.table(), TableId::MemberRef.tag());
        assert_eq!(f.tables.row_count(TableId::MemberRef), 1);
        assert_eq!(f.tables.row_count(TableId::MethodSpec), 0);
        Ok(())
    }

    #[test]
    fn test_generic_instantiation_emits_methodspec() -> Result<()> {
        let mut f = fixture()?;
        f.resolver.describe(EntityId(1), object_desc())?;
        f.resolver.describe(
            EntityId(11),
            EntityDesc::Method(MethodRefDesc {
                declaring: EntityId(1),
                name: "Create".to_string(),
                signature: vec![0x30, 0x01, 0x00, 0x01],
                instantiation: Some(vec![0x0a, 0x01, 0x0e]),
            }),
        )?;

        let token = f
            .resolver
            .method_token(EntityId(11), &mut f.strings, &mut f.blob, &mut f.tables)?;
        assert_eq!(token.table(), TableId::MethodSpec.tag());
        assert_eq!(f.tables.row_count(TableId::MemberRef), 1);
        assert_eq!(f.tables.row_count(TableId::MethodSpec), 1);

        // Second request hits the MethodSpec cache.
        let again = f
            .resolver
            .method_token(EntityId(11), &mut f.strings, &mut f.blob, &mut f.tables)?;
        assert_eq!(token, again);
        assert_eq!(f.tables.row_count(TableId::MethodSpec), 1);
        Ok(())
    }

    #[test]
    fn test_field_ref() -> Result<()> {
        let mut f = fixture()?;
        f.resolver.describe(EntityId(1), object_desc())?;
        f.resolver.describe(
            EntityId(20),
            EntityDesc::Field(FieldRefDesc {
                declaring: EntityId(1),
                name: "Empty".to_string(),
                signature: vec![0x06, 0x0e],
            }),
        )?;

        let token = f
            .resolver
            .field_token(EntityId(20), &mut f.strings, &mut f.blob, &mut f.tables)?;
        assert_eq!(token.table(), TableId::MemberRef.tag());
        Ok(())
    }

    #[test]
    fn test_unknown_entity() -> Result<()> {
        let mut f = fixture()?;
        let result =
            f.resolver
                .create_token(EntityId(99), &mut f.strings, &mut f.blob, &mut f.tables);
        assert!(matches!(result, Err(Error::UnresolvedEntity(99))));
        Ok(())
    }

    #[test]
    fn test_describe_conflict() -> Result<()> {
        let mut f = fixture()?;
        f.resolver.describe(EntityId(1), object_desc())?;
        f.resolver.describe(EntityId(1), object_desc())?;
        let result = f.resolver.describe(
            EntityId(1),
            EntityDesc::Type(TypeRefDesc::Spec {
                signature: vec![0x1d, 0x0e],
            }),
        );
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_local_type_passthrough() -> Result<()> {
        let mut f = fixture()?;
        let local = Token(0x02000002);
        f.resolver
            .describe(EntityId(5), EntityDesc::Type(TypeRefDesc::Local { token: local }))?;
        let token = f
            .resolver
            .type_token(EntityId(5), &mut f.strings, &mut f.blob, &mut f.tables)?;
        assert_eq!(token, local);
        assert_eq!(f.tables.row_count(TableId::TypeRef), 0);
        Ok(())
    }
}
