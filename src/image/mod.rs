//! The stateful image being built: heaps, tables, caches and the code stream.
//!
//! An [`Image`] is created from an [`ImageConfig`], populated through the
//! declaration and resolution APIs, then consumed by [`Image::finalize`]. The
//! returned [`FinalizedImage`] has token fixups applied and tables sorted and
//! can only be serialized; serialization yields a [`SerializedImage`] whose
//! stream extents stay observable after the buffers are gone. Each phase is a
//! separate type, so running a phase out of order does not compile.

pub mod entity;
pub mod fixups;
mod methods;
pub mod registry;
mod resolver;

use uguid::Guid;

use crate::{
    image::{
        entity::{ConstantValue, EntityDesc, EntityId, GenericParamDecl, TypeDecl},
        fixups::{sort_tables, FixupEngine},
        registry::TokenRegistry,
        resolver::Resolver,
    },
    metadata::heaps::{BlobHeap, GuidHeap, StreamBuffer, StringsHeap, UserStringsHeap},
    metadata::tables::{CodedIndexKind, TableId, TableStore},
    metadata::token::Token,
    utils::{hash_blob, hash_string},
    Error, Result,
};

pub use entity::AssemblyIdentity;
pub use registry::TokenCollision;

/// RVA of the `.text` section; sections start at one virtual page.
pub(crate) const TEXT_RVA: u32 = 0x2000;
/// Offset of the 6-byte native entry stub inside the code stream.
pub(crate) const ENTRY_STUB_OFFSET: u32 = 0;
/// Offset of the import address table.
pub(crate) const IAT_OFFSET: u32 = 16;
/// Offset of the import directory table (one used entry plus a null entry).
pub(crate) const IDT_OFFSET: u32 = 24;
/// Offset of the hint/name entry followed by the import module name.
pub(crate) const IMPORT_NAMES_OFFSET: u32 = 64;
/// Offset of the import lookup table.
pub(crate) const ILT_OFFSET: u32 = 90;
/// Offset of the CLI header.
pub(crate) const CLI_HEADER_OFFSET: u32 = 100;
/// Size of the CLI header.
pub(crate) const CLI_HEADER_SIZE: u32 = 72;
/// First offset available for method bodies and field data.
pub(crate) const METHOD_BASE: u32 = 172;

/// CLI header flag: image contains only IL.
const CLI_FLAGS_ILONLY: u32 = 0x0000_0001;
/// CLI header flag: image carries a strong name signature.
const CLI_FLAGS_STRONGNAMESIGNED: u32 = 0x0000_0008;

/// Kind of image produced, deciding headers and the native entry import.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ImageKind {
    /// Executable importing `_CorExeMain`.
    Exe,
    /// Library importing `_CorDllMain`.
    Dll,
}

/// Assembly manifest written into the `Assembly` table.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AssemblyDecl {
    /// Simple assembly name.
    pub name: String,
    /// Version quadruple.
    pub version: (u16, u16, u16, u16),
    /// Culture, empty for neutral.
    pub culture: String,
    /// Full public key bytes; empty when unsigned.
    pub public_key: Vec<u8>,
    /// `AssemblyFlags`.
    pub flags: u32,
    /// Hash algorithm id; SHA-1 unless overridden.
    pub hash_algorithm: u32,
}

impl AssemblyDecl {
    /// A version 0.0.0.0 neutral assembly with the default hash algorithm.
    #[must_use]
    pub fn new(name: &str) -> Self {
        AssemblyDecl {
            name: name.to_string(),
            version: (0, 0, 0, 0),
            culture: String::new(),
            public_key: Vec::new(),
            flags: 0,
            hash_algorithm: 0x8004,
        }
    }
}

/// Everything needed to start building an image.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ImageConfig {
    /// Module name, e.g. `app.exe`.
    pub module_name: String,
    /// Executable or library.
    pub kind: ImageKind,
    /// GUI subsystem instead of console.
    pub gui: bool,
    /// Module version id; derived from the module name when absent.
    pub mvid: Option<Guid>,
    /// Assembly manifest; modules without one carry no `Assembly` row.
    pub assembly: Option<AssemblyDecl>,
}

impl ImageConfig {
    /// Console executable configuration.
    #[must_use]
    pub fn exe(module_name: &str) -> Self {
        ImageConfig {
            module_name: module_name.to_string(),
            kind: ImageKind::Exe,
            gui: false,
            mvid: None,
            assembly: None,
        }
    }

    /// Library configuration.
    #[must_use]
    pub fn dll(module_name: &str) -> Self {
        ImageConfig {
            kind: ImageKind::Dll,
            ..ImageConfig::exe(module_name)
        }
    }
}

/// Tokens handed back by [`Image::declare_type`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DeclaredType {
    /// The new `TypeDef` token.
    pub token: Token,
    /// One `Field` token per declared field, in declaration order.
    pub field_tokens: Vec<Token>,
    /// One `MethodDef` token per declared method, in declaration order.
    pub method_tokens: Vec<Token>,
}

/// A generic parameter waiting for its row.
///
/// Rows are buffered until [`Image::finalize`] so they can be emitted already
/// sorted by owner and ordinal; emitting them eagerly would let the sort pass
/// move them after `GenericParamConstraint` rows have recorded their indices.
struct PendingGenericParam {
    owner: Token,
    decl: GenericParamDecl,
}

/// The image under construction.
pub struct Image {
    strings: StringsHeap,
    user_strings: UserStringsHeap,
    blob: BlobHeap,
    guids: GuidHeap,
    tables: TableStore,
    registry: TokenRegistry,
    fixups: FixupEngine,
    resolver: Resolver,
    code: StreamBuffer,
    resources: StreamBuffer,
    win32_resources: Vec<u8>,
    generic_params: Vec<PendingGenericParam>,
    kind: ImageKind,
    gui: bool,
    entry_point: Token,
    strong_name_size: u32,
}

impl Image {
    /// Creates an image with its module row, the module type and the native
    /// loader preamble already in place.
    pub fn new(config: ImageConfig) -> Result<Self> {
        let mut strings = StringsHeap::new()?;
        let mut blob = BlobHeap::new()?;
        let mut guids = GuidHeap::new();
        let mut tables = TableStore::new();

        let mvid = config
            .mvid
            .unwrap_or_else(|| derive_mvid(&config.module_name));
        let name_idx = strings.intern(&config.module_name)?;
        let mvid_idx = guids.add(mvid)?;
        tables.append_row(TableId::Module, &[0, name_idx, mvid_idx, 0, 0])?;

        // Row 1 of TypeDef is always the module type, with empty member
        // ranges starting at row 1.
        let module_type_name = strings.intern("<Module>")?;
        tables.append_row(TableId::TypeDef, &[0, module_type_name, 0, 0, 1, 1])?;

        if let Some(assembly) = &config.assembly {
            let asm_name = strings.intern(&assembly.name)?;
            let culture = strings.intern(&assembly.culture)?;
            let key = blob.intern(&assembly.public_key)?;
            let (major, minor, build, revision) = assembly.version;
            tables.append_row(
                TableId::Assembly,
                &[
                    assembly.hash_algorithm,
                    u32::from(major),
                    u32::from(minor),
                    u32::from(build),
                    u32::from(revision),
                    assembly.flags,
                    key,
                    asm_name,
                    culture,
                ],
            )?;
        }

        let code = write_preamble(config.kind)?;

        Ok(Image {
            strings,
            user_strings: UserStringsHeap::new()?,
            blob,
            guids,
            tables,
            registry: TokenRegistry::new(),
            fixups: FixupEngine::new(),
            resolver: Resolver::new(),
            code,
            resources: StreamBuffer::new(),
            win32_resources: Vec::new(),
            generic_params: Vec::new(),
            kind: config.kind,
            gui: config.gui,
            entry_point: Token(0),
            strong_name_size: 0,
        })
    }

    /// Token of the `Module` row.
    #[must_use]
    pub fn module_token(&self) -> Token {
        Token::from_parts(TableId::Module.tag(), 1)
    }

    /// Token of the module type (`TypeDef` row 1).
    #[must_use]
    pub fn module_type_token(&self) -> Token {
        Token::from_parts(TableId::TypeDef.tag(), 1)
    }

    /// Declares a type with all of its members.
    ///
    /// Member rows are appended contiguously, so the type's field and method
    /// ranges stay valid; this is why members arrive as part of the type
    /// declaration instead of through separate calls.
    pub fn declare_type(&mut self, decl: TypeDecl) -> Result<DeclaredType> {
        let first_field = self.tables.row_count(TableId::Field) + 1;
        let first_method = self.tables.row_count(TableId::MethodDef) + 1;

        let extends = match decl.extends {
            Some(token) => CodedIndexKind::TypeDefOrRef.encode(token)?,
            None => 0,
        };
        let name_idx = self.strings.intern(&decl.name)?;
        let ns_idx = self.strings.intern(&decl.namespace)?;
        let type_row = self.tables.append_row(
            TableId::TypeDef,
            &[
                decl.flags.bits(),
                name_idx,
                ns_idx,
                extends,
                first_field,
                first_method,
            ],
        )?;
        let type_token = Token::from_parts(TableId::TypeDef.tag(), type_row);

        if let Some(enclosing) = decl.nested_in {
            if enclosing.table() != TableId::TypeDef.tag() {
                return Err(Error::Unsupported(format!(
                    "enclosing type for '{}' must be a TypeDef token, got {enclosing}",
                    decl.name
                )));
            }
            self.tables
                .append_row(TableId::NestedClass, &[type_row, enclosing.row()])?;
        }
        if let Some((packing, size)) = decl.layout {
            self.tables
                .append_row(TableId::ClassLayout, &[u32::from(packing), size, type_row])?;
        }
        for interface in &decl.interfaces {
            let coded = CodedIndexKind::TypeDefOrRef.encode(*interface)?;
            self.tables
                .append_row(TableId::InterfaceImpl, &[type_row, coded])?;
        }

        let mut field_tokens = Vec::with_capacity(decl.fields.len());
        for field in &decl.fields {
            let name_idx = self.strings.intern(&field.name)?;
            let sig_idx = self.blob.intern(&field.signature)?;
            let row = self.tables.append_row(
                TableId::Field,
                &[u32::from(field.flags.bits()), name_idx, sig_idx],
            )?;
            let field_token = Token::from_parts(TableId::Field.tag(), row);

            if let Some(constant) = &field.constant {
                self.constant_row(field_token, constant)?;
            }
            if let Some(offset) = field.offset {
                self.tables
                    .append_row(TableId::FieldLayout, &[offset, row])?;
            }
            if let Some(data) = &field.rva_data {
                self.code.align4()?;
                let offset = self.code.write(data)?;
                self.tables
                    .append_row(TableId::FieldRVA, &[TEXT_RVA + offset, row])?;
            }
            if let Some(marshal) = &field.marshal {
                let coded = CodedIndexKind::HasFieldMarshal.encode(field_token)?;
                let blob_idx = self.blob.intern(marshal)?;
                self.tables
                    .append_row(TableId::FieldMarshal, &[coded, blob_idx])?;
            }
            field_tokens.push(field_token);
        }

        let mut method_tokens = Vec::with_capacity(decl.methods.len());
        for method in &decl.methods {
            let rva = match &method.body {
                Some(body) => {
                    let locals_token = if body.locals_signature.is_empty() {
                        0
                    } else {
                        self.standalone_sig(&body.locals_signature)?.value()
                    };
                    let offset =
                        methods::write_method_body(&mut self.code, body, locals_token, &mut self.fixups)?;
                    TEXT_RVA + offset
                }
                None => {
                    let bodiless = method.flags.contains(entity::MethodAttributes::ABSTRACT)
                        || method.flags.contains(entity::MethodAttributes::PINVOKE_IMPL)
                        || method
                            .impl_flags
                            .intersects(entity::MethodImplAttributes::RUNTIME
                                | entity::MethodImplAttributes::INTERNAL_CALL)
                        || method.pinvoke.is_some();
                    if !bodiless {
                        return Err(Error::MissingBody(method.name.clone()));
                    }
                    0
                }
            };

            let first_param = self.tables.row_count(TableId::Param) + 1;
            let name_idx = self.strings.intern(&method.name)?;
            let sig_idx = self.blob.intern(&method.signature)?;
            let row = self.tables.append_row(
                TableId::MethodDef,
                &[
                    rva,
                    u32::from(method.impl_flags.bits()),
                    u32::from(method.flags.bits()),
                    name_idx,
                    sig_idx,
                    first_param,
                ],
            )?;
            let method_token = Token::from_parts(TableId::MethodDef.tag(), row);

            for param in &method.params {
                let param_name = self.strings.intern(&param.name)?;
                let param_row = self.tables.append_row(
                    TableId::Param,
                    &[
                        u32::from(param.flags.bits()),
                        u32::from(param.sequence),
                        param_name,
                    ],
                )?;
                let param_token = Token::from_parts(TableId::Param.tag(), param_row);
                if let Some(constant) = &param.constant {
                    self.constant_row(param_token, constant)?;
                }
                if let Some(marshal) = &param.marshal {
                    let coded = CodedIndexKind::HasFieldMarshal.encode(param_token)?;
                    let blob_idx = self.blob.intern(marshal)?;
                    self.tables
                        .append_row(TableId::FieldMarshal, &[coded, blob_idx])?;
                }
            }

            if let Some(pinvoke) = &method.pinvoke {
                let module_ref = self.resolver.module_ref_token(
                    &pinvoke.module,
                    &mut self.strings,
                    &mut self.tables,
                )?;
                let entry = if pinvoke.entry_point.is_empty() {
                    &method.name
                } else {
                    &pinvoke.entry_point
                };
                let entry_idx = self.strings.intern(entry)?;
                let coded = CodedIndexKind::MemberForwarded.encode(method_token)?;
                self.tables.append_row(
                    TableId::ImplMap,
                    &[
                        u32::from(pinvoke.flags.bits()),
                        coded,
                        entry_idx,
                        module_ref.row(),
                    ],
                )?;
            }

            for param in &method.generic_params {
                self.generic_params.push(PendingGenericParam {
                    owner: method_token,
                    decl: param.clone(),
                });
            }
            method_tokens.push(method_token);
        }

        if !decl.properties.is_empty() {
            let first_property = self.tables.row_count(TableId::Property) + 1;
            self.tables
                .append_row(TableId::PropertyMap, &[type_row, first_property])?;
            for property in &decl.properties {
                let name_idx = self.strings.intern(&property.name)?;
                let sig_idx = self.blob.intern(&property.signature)?;
                let row = self.tables.append_row(
                    TableId::Property,
                    &[u32::from(property.flags), name_idx, sig_idx],
                )?;
                let property_token = Token::from_parts(TableId::Property.tag(), row);
                if let Some(constant) = &property.constant {
                    self.constant_row(property_token, constant)?;
                }
                let accessors = [
                    (property.getter, entity::semantics::GETTER),
                    (property.setter, entity::semantics::SETTER),
                ];
                for (accessor, semantics) in accessors {
                    if let Some(index) = accessor {
                        accessor_in_range(&property.name, index, decl.methods.len())?;
                        self.semantics_row(semantics, first_method + index as u32, property_token)?;
                    }
                }
            }
        }

        if !decl.events.is_empty() {
            let first_event = self.tables.row_count(TableId::Event) + 1;
            self.tables
                .append_row(TableId::EventMap, &[type_row, first_event])?;
            for event in &decl.events {
                let name_idx = self.strings.intern(&event.name)?;
                let event_type = if event.event_type.is_null() {
                    0
                } else {
                    CodedIndexKind::TypeDefOrRef.encode(event.event_type)?
                };
                let row = self.tables.append_row(
                    TableId::Event,
                    &[u32::from(event.flags), name_idx, event_type],
                )?;
                let event_token = Token::from_parts(TableId::Event.tag(), row);
                let accessors = [
                    (event.add_on, entity::semantics::ADD_ON),
                    (event.remove_on, entity::semantics::REMOVE_ON),
                    (event.raise, entity::semantics::FIRE),
                ];
                for (accessor, semantics) in accessors {
                    if let Some(index) = accessor {
                        accessor_in_range(&event.name, index, decl.methods.len())?;
                        self.semantics_row(semantics, first_method + index as u32, event_token)?;
                    }
                }
            }
        }

        for param in &decl.generic_params {
            self.generic_params.push(PendingGenericParam {
                owner: type_token,
                decl: param.clone(),
            });
        }

        Ok(DeclaredType {
            token: type_token,
            field_tokens,
            method_tokens,
        })
    }

    fn constant_row(&mut self, parent: Token, constant: &ConstantValue) -> Result<()> {
        let coded = CodedIndexKind::HasConstant.encode(parent)?;
        let value_idx = self.blob.intern(&constant.value)?;
        self.tables.append_row(
            TableId::Constant,
            &[u32::from(constant.type_code), 0, coded, value_idx],
        )?;
        Ok(())
    }

    fn semantics_row(&mut self, semantics: u16, method_row: u32, parent: Token) -> Result<()> {
        let coded = CodedIndexKind::HasSemantics.encode(parent)?;
        self.tables.append_row(
            TableId::MethodSemantics,
            &[u32::from(semantics), method_row, coded],
        )?;
        Ok(())
    }

    /// Registers the descriptor for an external entity.
    pub fn describe_entity(&mut self, id: EntityId, desc: EntityDesc) -> Result<()> {
        self.resolver.describe(id, desc)
    }

    /// Token for a described type entity.
    pub fn type_ref_token(&mut self, id: EntityId) -> Result<Token> {
        self.resolver
            .type_token(id, &mut self.strings, &mut self.blob, &mut self.tables)
    }

    /// Token for a described method entity.
    pub fn method_ref_token(&mut self, id: EntityId) -> Result<Token> {
        self.resolver
            .method_token(id, &mut self.strings, &mut self.blob, &mut self.tables)
    }

    /// Token for a described field entity.
    pub fn field_ref_token(&mut self, id: EntityId) -> Result<Token> {
        self.resolver
            .field_token(id, &mut self.strings, &mut self.blob, &mut self.tables)
    }

    /// Token for any described entity, dispatching on its category.
    pub fn create_token(&mut self, id: EntityId) -> Result<Token> {
        self.resolver
            .create_token(id, &mut self.strings, &mut self.blob, &mut self.tables)
    }

    /// `AssemblyRef` token for an assembly identity.
    pub fn assembly_ref_token(&mut self, identity: &AssemblyIdentity) -> Result<Token> {
        self.resolver
            .assembly_ref_token(identity, &mut self.strings, &mut self.blob, &mut self.tables)
    }

    /// Emits a custom attribute row on `parent`, constructed by `ctor` (a
    /// `MethodDef` or `MemberRef` token) with a pre-encoded value blob.
    pub fn custom_attribute(&mut self, parent: Token, ctor: Token, value: &[u8]) -> Result<()> {
        let parent_coded = CodedIndexKind::HasCustomAttribute.encode(parent)?;
        let ctor_coded = CodedIndexKind::CustomAttributeType.encode(ctor)?;
        let value_idx = self.blob.intern(value)?;
        self.tables.append_row(
            TableId::CustomAttribute,
            &[parent_coded, ctor_coded, value_idx],
        )?;
        Ok(())
    }

    /// Emits a `DeclSecurity` row with a pre-encoded permission set.
    pub fn decl_security(&mut self, parent: Token, action: u16, permission_set: &[u8]) -> Result<()> {
        let coded = CodedIndexKind::HasDeclSecurity.encode(parent)?;
        let blob_idx = self.blob.intern(permission_set)?;
        self.tables
            .append_row(TableId::DeclSecurity, &[u32::from(action), coded, blob_idx])?;
        Ok(())
    }

    /// Emits a `MethodImpl` row: `class` implements `declaration` via `body`.
    ///
    /// `class` must be a `TypeDef` token; the row stores its bare row index.
    pub fn method_impl(&mut self, class: Token, body: Token, declaration: Token) -> Result<()> {
        if class.table() != TableId::TypeDef.tag() {
            return Err(Error::Unsupported(format!(
                "MethodImpl class must be a TypeDef token, got {class}"
            )));
        }
        let body_coded = CodedIndexKind::MethodDefOrRef.encode(body)?;
        let decl_coded = CodedIndexKind::MethodDefOrRef.encode(declaration)?;
        self.tables
            .append_row(TableId::MethodImpl, &[class.row(), body_coded, decl_coded])?;
        Ok(())
    }

    /// Interns a signature as a `StandAloneSig` row and returns its token.
    pub fn standalone_sig(&mut self, signature: &[u8]) -> Result<Token> {
        let sig_idx = self.blob.intern(signature)?;
        let row = self.tables.append_row(TableId::StandAloneSig, &[sig_idx])?;
        Ok(Token::from_parts(TableId::StandAloneSig.tag(), row))
    }

    /// Embeds a managed resource and emits its `ManifestResource` row.
    ///
    /// The resource data is stored length-prefixed in the resources stream;
    /// the row's offset points at the prefix.
    pub fn add_manifest_resource(&mut self, name: &str, flags: u32, data: &[u8]) -> Result<()> {
        #[allow(clippy::cast_possible_truncation)]
        let len = data.len() as u32;
        let offset = self.resources.write(&len.to_le_bytes())?;
        self.resources.write(data)?;
        self.resources.align4()?;

        let name_idx = self.strings.intern(name)?;
        self.tables.append_row(
            TableId::ManifestResource,
            &[offset, flags, name_idx, 0],
        )?;
        Ok(())
    }

    /// Supplies pre-encoded Win32 resource data, emitted as a `.rsrc` section.
    pub fn set_win32_resources(&mut self, data: Vec<u8>) {
        self.win32_resources = data;
    }

    /// Sets the entry point method patched into the CLI header.
    pub fn set_entry_point(&mut self, token: Token) {
        self.entry_point = token;
    }

    /// Reserves space in `.text` for a strong name signature.
    pub fn reserve_strong_name(&mut self, size: u32) {
        self.strong_name_size = size;
    }

    /// Interns a name into the `#Strings` heap.
    pub fn intern_string(&mut self, value: &str) -> Result<u32> {
        self.strings.intern(value)
    }

    /// Interns a blob into the `#Blob` heap.
    pub fn intern_blob(&mut self, value: &[u8]) -> Result<u32> {
        self.blob.intern(value)
    }

    /// Interns a string literal into the `#US` heap.
    pub fn intern_user_string(&mut self, value: &str) -> Result<u32> {
        self.user_strings.intern(value)
    }

    /// `ldstr` token for a string literal (tag 0x70 plus the heap offset).
    pub fn user_string_token(&mut self, value: &str) -> Result<Token> {
        let offset = self.user_strings.intern(value)?;
        Ok(Token::from_parts(0x70, offset))
    }

    /// Hands out a provisional token for `table`.
    pub fn provisional_token(&mut self, table: TableId) -> Token {
        self.fixups.provisional_token(table)
    }

    /// Maps a provisional token to its final value.
    pub fn assign_final_token(&mut self, provisional: Token, final_token: Token) -> Result<()> {
        self.fixups.assign_final(provisional, final_token)
    }

    /// Records a token site in the code stream for the fixup pass.
    pub fn record_token_fixup(&mut self, code_offset: u32, token: Token) {
        self.fixups.record(code_offset, token);
    }

    /// Registers `token` as belonging to `entity`.
    pub fn register_token(
        &mut self,
        token: Token,
        entity: EntityId,
        policy: TokenCollision,
    ) -> Result<()> {
        self.registry.register(token, entity, policy)
    }

    /// Looks up the entity a token was registered for.
    #[must_use]
    pub fn registered_entity(&self, token: Token) -> Option<EntityId> {
        self.registry.lookup(token)
    }

    /// Read access to the tables, mainly for diagnostics.
    #[must_use]
    pub fn tables(&self) -> &TableStore {
        &self.tables
    }

    /// Current code stream length.
    #[must_use]
    pub fn code_len(&self) -> u32 {
        self.code.len()
    }

    /// Applies fixups, emits buffered rows, sorts tables and releases the
    /// interning caches. The result can only be serialized.
    pub fn finalize(mut self) -> Result<FinalizedImage> {
        self.emit_generic_params()?;

        self.fixups.apply(self.code.bytes_mut())?;
        sort_tables(&mut self.tables);

        self.strings.align4()?;
        self.user_strings.align4()?;
        self.blob.align4()?;
        self.code.align4()?;
        self.resources.align4()?;

        self.strings.release_cache();
        self.user_strings.release_cache();
        self.blob.release_cache();
        self.guids.release_cache();
        self.resolver.release();

        Ok(FinalizedImage {
            strings: self.strings,
            user_strings: self.user_strings,
            blob: self.blob,
            guids: self.guids,
            tables: self.tables,
            code: self.code,
            resources: self.resources,
            win32_resources: self.win32_resources,
            kind: self.kind,
            gui: self.gui,
            entry_point: self.entry_point,
            strong_name_size: self.strong_name_size,
        })
    }

    /// Emits the buffered `GenericParam` rows sorted by coded owner then
    /// ordinal, each followed by its constraint rows. The later table sort
    /// pass sees them already in order, so the constraint rows' owner indices
    /// stay valid.
    fn emit_generic_params(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.generic_params);
        let mut keyed = Vec::with_capacity(pending.len());
        for entry in pending {
            let owner_coded = CodedIndexKind::TypeOrMethodDef.encode(entry.owner)?;
            keyed.push((owner_coded, entry));
        }
        keyed.sort_by_key(|(owner_coded, entry)| (*owner_coded, entry.decl.number));

        for (owner_coded, entry) in keyed {
            let name_idx = self.strings.intern(&entry.decl.name)?;
            let row = self.tables.append_row(
                TableId::GenericParam,
                &[
                    u32::from(entry.decl.number),
                    u32::from(entry.decl.flags),
                    owner_coded,
                    name_idx,
                ],
            )?;
            for constraint in &entry.decl.constraints {
                let coded = CodedIndexKind::TypeDefOrRef.encode(*constraint)?;
                self.tables
                    .append_row(TableId::GenericParamConstraint, &[row, coded])?;
            }
        }
        Ok(())
    }
}

/// An image with fixups applied and tables sorted, ready to serialize.
pub struct FinalizedImage {
    pub(crate) strings: StringsHeap,
    pub(crate) user_strings: UserStringsHeap,
    pub(crate) blob: BlobHeap,
    pub(crate) guids: GuidHeap,
    pub(crate) tables: TableStore,
    pub(crate) code: StreamBuffer,
    pub(crate) resources: StreamBuffer,
    pub(crate) win32_resources: Vec<u8>,
    pub(crate) kind: ImageKind,
    pub(crate) gui: bool,
    pub(crate) entry_point: Token,
    pub(crate) strong_name_size: u32,
}

impl FinalizedImage {
    /// Read access to the sorted tables.
    #[must_use]
    pub fn tables(&self) -> &TableStore {
        &self.tables
    }

    /// The entry point token, 0 when none was set.
    #[must_use]
    pub fn entry_point(&self) -> Token {
        self.entry_point
    }

    /// Serializes the image to a file.
    pub fn write_to(self, path: &std::path::Path) -> Result<SerializedImage> {
        let metadata = crate::writer::build_compressed_metadata(&self)?;
        let layout = crate::writer::PeLayout::compute(&self, &metadata)?;
        let mut output = crate::writer::Output::create(path, layout.file_size as usize)?;
        crate::writer::write_pe(&self, &metadata, &layout, &mut output)?;
        output.finalize()?;
        Ok(SerializedImage {
            extents: self.extents(&metadata, &layout),
            bytes: None,
        })
    }

    /// Serializes the image into memory.
    pub fn to_memory(self) -> Result<SerializedImage> {
        let metadata = crate::writer::build_compressed_metadata(&self)?;
        let layout = crate::writer::PeLayout::compute(&self, &metadata)?;
        let mut output = crate::writer::Output::create_in_memory(layout.file_size as usize);
        crate::writer::write_pe(&self, &metadata, &layout, &mut output)?;
        let bytes = output.into_vec()?;
        let extents = self.extents(&metadata, &layout);
        Ok(SerializedImage {
            extents,
            bytes: Some(bytes),
        })
    }

    fn extents(&self, metadata: &[u8], layout: &crate::writer::PeLayout) -> ImageExtents {
        #[allow(clippy::cast_possible_truncation)]
        ImageExtents {
            file_size: layout.file_size,
            metadata_size: metadata.len() as u32,
            code_size: self.code.len(),
            resources_size: self.resources.len(),
            strings_size: self.strings.len(),
            user_strings_size: self.user_strings.len(),
            blob_size: self.blob.len(),
            guid_size: self.guids.len(),
        }
    }
}

/// Stream extents of a serialized image, observable after the buffers are
/// released.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ImageExtents {
    /// Total file size.
    pub file_size: u32,
    /// Size of the metadata root, streams included.
    pub metadata_size: u32,
    /// Size of the code stream, preamble included.
    pub code_size: u32,
    /// Size of the managed resources stream.
    pub resources_size: u32,
    /// `#Strings` heap size.
    pub strings_size: u32,
    /// `#US` heap size.
    pub user_strings_size: u32,
    /// `#Blob` heap size.
    pub blob_size: u32,
    /// `#GUID` heap size.
    pub guid_size: u32,
}

/// The end of the lifecycle: the serialized bytes (for in-memory output) and
/// the extents of what was written.
pub struct SerializedImage {
    extents: ImageExtents,
    bytes: Option<Vec<u8>>,
}

impl SerializedImage {
    /// Stream extents of the written image.
    #[must_use]
    pub fn extents(&self) -> &ImageExtents {
        &self.extents
    }

    /// The serialized bytes; `None` when the image was written to a file.
    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    /// Consumes the image, returning the bytes for in-memory output.
    #[must_use]
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        self.bytes
    }
}

/// Rejects a property or event accessor index that does not name one of the
/// type's own declared methods. Accessor indices turn into `MethodDef` row
/// numbers, so an out-of-range index would emit a dangling `MethodSemantics`
/// row.
fn accessor_in_range(owner: &str, index: usize, method_count: usize) -> Result<()> {
    if index < method_count {
        Ok(())
    } else {
        Err(Error::Unsupported(format!(
            "accessor index {index} on '{owner}' exceeds the type's {method_count} declared methods"
        )))
    }
}

/// Derives a deterministic MVID from the module name when the caller does not
/// supply one.
fn derive_mvid(module_name: &str) -> Guid {
    let high = hash_string(module_name);
    let low = hash_blob(&high.to_le_bytes());
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&high.to_le_bytes());
    bytes[8..].copy_from_slice(&low.to_le_bytes());
    Guid::from_bytes(bytes)
}

/// Writes the fixed code-stream preamble: entry stub, import tables for the
/// runtime shim, and the zero-filled CLI header. The operand of the entry
/// stub and the import RVAs are patched at serialization time, once section
/// addresses exist.
fn write_preamble(kind: ImageKind) -> Result<StreamBuffer> {
    let mut code = StreamBuffer::new();

    let mut entry_stub = [0u8; 16];
    entry_stub[0] = 0xFF;
    entry_stub[1] = 0x25; // jmp [addr], operand filled in later
    code.write(&entry_stub)?;

    debug_assert_eq!(code.len(), IAT_OFFSET);
    code.write_zero(8)?;

    debug_assert_eq!(code.len(), IDT_OFFSET);
    code.write_zero(40)?;

    debug_assert_eq!(code.len(), IMPORT_NAMES_OFFSET);
    code.write(&[0, 0])?; // hint
    let entry_name: &[u8] = match kind {
        ImageKind::Exe => b"_CorExeMain\0",
        ImageKind::Dll => b"_CorDllMain\0",
    };
    code.write(entry_name)?;
    code.write(b"mscoree.dll\0")?;

    debug_assert_eq!(code.len(), ILT_OFFSET);
    code.write_zero(8)?;
    code.write_zero(2)?;
    code.align4()?;

    debug_assert_eq!(code.len(), CLI_HEADER_OFFSET);
    code.write_zero(CLI_HEADER_SIZE as usize)?;

    debug_assert_eq!(code.len(), METHOD_BASE);
    Ok(code)
}

/// CLI header flags for an image, written into the header at serialization.
pub(crate) fn cli_flags(strong_name_size: u32) -> u32 {
    let mut flags = CLI_FLAGS_ILONLY;
    if strong_name_size > 0 {
        flags |= CLI_FLAGS_STRONGNAMESIGNED;
    }
    flags
}
