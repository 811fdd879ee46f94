//! Descriptors for entities referenced or declared by an image.
//!
//! External references are described once, keyed by a caller-supplied
//! [`EntityId`], then turned into tokens by the resolver. Declarations are
//! plain data consumed by the [`crate::image::Image`] builder methods.

use bitflags::bitflags;

use crate::metadata::token::Token;

/// A stable caller-supplied identity for a referenced entity.
///
/// All resolver caches are keyed by this value, so the same id must always
/// describe the same entity for the lifetime of an image.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of an external assembly, copied verbatim into `AssemblyRef` rows.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AssemblyIdentity {
    /// Simple assembly name, without extension.
    pub name: String,
    /// Version quadruple.
    pub version: (u16, u16, u16, u16),
    /// Culture string, empty for neutral.
    pub culture: String,
    /// Public key or public key token bytes; empty when unsigned.
    pub public_key_or_token: Vec<u8>,
    /// `AssemblyFlags` as stored in the row.
    pub flags: u32,
}

impl AssemblyIdentity {
    /// Identity with zeroed version and no key, as produced for references to
    /// other dynamic assemblies that have no identity yet.
    #[must_use]
    pub fn unnamed(name: &str) -> Self {
        AssemblyIdentity {
            name: name.to_string(),
            version: (0, 0, 0, 0),
            culture: String::new(),
            public_key_or_token: Vec::new(),
            flags: 0,
        }
    }
}

/// Where an external type lives, deciding its `ResolutionScope`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ScopeRef {
    /// A different assembly; produces an `AssemblyRef` row.
    Assembly(AssemblyIdentity),
    /// Another module of the same (dynamic) assembly; produces a `ModuleRef` row.
    Module {
        /// Module file name.
        name: String,
    },
}

/// Description of a type that tokens may be requested for.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TypeRefDesc {
    /// A type defined in this image; the token is already final.
    Local {
        /// The `TypeDef` token returned by the declaration API.
        token: Token,
    },
    /// A named type in an external scope; produces a `TypeRef` row.
    External {
        /// Type name.
        name: String,
        /// Namespace, empty for the global namespace.
        namespace: String,
        /// The scope the type lives in. Ignored when `nested_in` is set,
        /// since nested types use their enclosing type as scope.
        scope: ScopeRef,
        /// Enclosing type for nested types.
        nested_in: Option<EntityId>,
    },
    /// A signature-described type (generic instantiation, array, pointer);
    /// produces a `TypeSpec` row from the pre-encoded signature blob.
    Spec {
        /// ECMA-335 type signature bytes.
        signature: Vec<u8>,
    },
}

/// Description of a method to reference.
///
/// A `MemberRef` row is produced, plus a `MethodSpec` row when
/// `instantiation` is present.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MethodRefDesc {
    /// Entity id of the declaring type.
    pub declaring: EntityId,
    /// Method name.
    pub name: String,
    /// Pre-encoded method signature blob (the generic definition signature
    /// when `instantiation` is present).
    pub signature: Vec<u8>,
    /// Pre-encoded `GENERICINST` blob for generic method instantiations.
    pub instantiation: Option<Vec<u8>>,
}

/// Description of a field to reference; produces a `MemberRef` row.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FieldRefDesc {
    /// Entity id of the declaring type.
    pub declaring: EntityId,
    /// Field name.
    pub name: String,
    /// Pre-encoded field signature blob.
    pub signature: Vec<u8>,
}

/// The descriptor categories the resolver understands.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum EntityDesc {
    /// A type reference.
    Type(TypeRefDesc),
    /// A method reference.
    Method(MethodRefDesc),
    /// A field reference.
    Field(FieldRefDesc),
}

bitflags! {
    /// `TypeAttributes` from ECMA-335 II.23.1.15.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct TypeAttributes: u32 {
        /// Type is visible outside the assembly.
        const PUBLIC = 0x0000_0001;
        /// Nested type with public visibility.
        const NESTED_PUBLIC = 0x0000_0002;
        /// Nested type with private visibility.
        const NESTED_PRIVATE = 0x0000_0003;
        /// Fields are laid out sequentially.
        const SEQUENTIAL_LAYOUT = 0x0000_0008;
        /// Fields are laid out at explicit offsets.
        const EXPLICIT_LAYOUT = 0x0000_0010;
        /// Type is an interface.
        const INTERFACE = 0x0000_0020;
        /// Type is abstract.
        const ABSTRACT = 0x0000_0080;
        /// Type cannot be derived from.
        const SEALED = 0x0000_0100;
        /// Name is treated specially by the runtime.
        const SPECIAL_NAME = 0x0000_0400;
        /// Type has a class initializer run before first access.
        const BEFORE_FIELD_INIT = 0x0010_0000;
    }
}

bitflags! {
    /// `FieldAttributes` from ECMA-335 II.23.1.5.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct FieldAttributes: u16 {
        /// Accessible only within the declaring type.
        const PRIVATE = 0x0001;
        /// Accessible within the assembly.
        const ASSEMBLY = 0x0003;
        /// Accessible anywhere the type is.
        const PUBLIC = 0x0006;
        /// Field is per-type rather than per-instance.
        const STATIC = 0x0010;
        /// Field can only be initialized.
        const INIT_ONLY = 0x0020;
        /// Field is a compile-time constant; requires a `Constant` row.
        const LITERAL = 0x0040;
        /// Field has initial data mapped via `FieldRVA`.
        const HAS_FIELD_RVA = 0x0100;
        /// Field has a default value.
        const HAS_DEFAULT = 0x8000;
    }
}

bitflags! {
    /// `MethodAttributes` from ECMA-335 II.23.1.10.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct MethodAttributes: u16 {
        /// Accessible only within the declaring type.
        const PRIVATE = 0x0001;
        /// Accessible within the assembly.
        const ASSEMBLY = 0x0003;
        /// Accessible within the type and its subtypes.
        const FAMILY = 0x0004;
        /// Accessible anywhere the type is.
        const PUBLIC = 0x0006;
        /// Method is per-type rather than per-instance.
        const STATIC = 0x0010;
        /// Method cannot be overridden.
        const FINAL = 0x0020;
        /// Method is virtual.
        const VIRTUAL = 0x0040;
        /// Method hides by name and signature.
        const HIDE_BY_SIG = 0x0080;
        /// Virtual method gets a new vtable slot.
        const NEW_SLOT = 0x0100;
        /// Method has no implementation in this type.
        const ABSTRACT = 0x0400;
        /// Name is treated specially by the runtime.
        const SPECIAL_NAME = 0x0800;
        /// Runtime special name (`.ctor`, `.cctor`).
        const RT_SPECIAL_NAME = 0x1000;
        /// Method is implemented through P/Invoke.
        const PINVOKE_IMPL = 0x2000;
    }
}

bitflags! {
    /// `MethodImplAttributes` from ECMA-335 II.23.1.11.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct MethodImplAttributes: u16 {
        /// Implementation is native code.
        const NATIVE = 0x0001;
        /// Implementation is provided by the runtime.
        const RUNTIME = 0x0003;
        /// Method is not defined in this image.
        const UNMANAGED = 0x0004;
        /// Method cannot be inlined.
        const NO_INLINING = 0x0008;
        /// Method body is a forward reference.
        const FORWARD_REF = 0x0010;
        /// Method is single-threaded through its body.
        const SYNCHRONIZED = 0x0020;
        /// Reserved: signature is exported as-is.
        const PRESERVE_SIG = 0x0080;
        /// Implementation uses internal runtime call.
        const INTERNAL_CALL = 0x1000;
    }
}

bitflags! {
    /// `ParamAttributes` from ECMA-335 II.23.1.13.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct ParamAttributes: u16 {
        /// Parameter is an input.
        const IN = 0x0001;
        /// Parameter is an output.
        const OUT = 0x0002;
        /// Parameter is optional.
        const OPTIONAL = 0x0010;
        /// Parameter has a default value; requires a `Constant` row.
        const HAS_DEFAULT = 0x1000;
        /// Parameter has marshalling information.
        const HAS_FIELD_MARSHAL = 0x2000;
    }
}

bitflags! {
    /// `PInvokeAttributes` from ECMA-335 II.23.1.8, stored in `ImplMap` rows.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct PInvokeAttributes: u16 {
        /// Entry point name is not mangled.
        const NO_MANGLE = 0x0001;
        /// Strings marshalled as ANSI.
        const CHAR_SET_ANSI = 0x0002;
        /// Strings marshalled as UTF-16.
        const CHAR_SET_UNICODE = 0x0004;
        /// Last error is preserved across the call.
        const SUPPORTS_LAST_ERROR = 0x0040;
        /// `cdecl` calling convention.
        const CALL_CONV_CDECL = 0x0200;
        /// `stdcall` calling convention.
        const CALL_CONV_STDCALL = 0x0300;
    }
}

/// Accessor kinds for `MethodSemantics` rows (ECMA-335 II.23.1.12).
pub mod semantics {
    /// Property setter.
    pub const SETTER: u16 = 0x0001;
    /// Property getter.
    pub const GETTER: u16 = 0x0002;
    /// Other accessor.
    pub const OTHER: u16 = 0x0004;
    /// Event add handler.
    pub const ADD_ON: u16 = 0x0008;
    /// Event remove handler.
    pub const REMOVE_ON: u16 = 0x0010;
    /// Event raise handler.
    pub const FIRE: u16 = 0x0020;
}

/// A constant value, pre-encoded as its little-endian representation.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ConstantValue {
    /// `ELEMENT_TYPE_*` code of the constant.
    pub type_code: u8,
    /// Value bytes as stored in the blob heap.
    pub value: Vec<u8>,
}

/// An exception handling clause of a fat method body, always written in the
/// fat clause format.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ExceptionClause {
    /// Clause kind: 0 catch, 1 filter, 2 finally, 4 fault.
    pub flags: u32,
    /// Start of the protected region, as a code offset.
    pub try_offset: u32,
    /// Length of the protected region.
    pub try_length: u32,
    /// Start of the handler, as a code offset.
    pub handler_offset: u32,
    /// Length of the handler.
    pub handler_length: u32,
    /// Catch type token, or filter code offset, depending on `flags`.
    pub class_token_or_filter: u32,
}

/// IL body of a method.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct MethodBody {
    /// Raw IL bytes. Token operands may be provisional; pair them with
    /// entries in `token_fixups`.
    pub code: Vec<u8>,
    /// Maximum evaluation stack depth.
    pub max_stack: u16,
    /// Pre-encoded `LOCAL_SIG` blob, or empty for no locals.
    pub locals_signature: Vec<u8>,
    /// Whether locals are zero-initialized.
    pub init_locals: bool,
    /// Exception handling clauses.
    pub clauses: Vec<ExceptionClause>,
    /// Offsets into `code` holding token operands that must be patched once
    /// final rows are assigned, with the token written at each site.
    pub token_fixups: Vec<(u32, Token)>,
}

/// P/Invoke information for a method; produces `ImplMap` and `ModuleRef` rows.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PInvokeDecl {
    /// Mapping flags.
    pub flags: PInvokeAttributes,
    /// Exported name in the target module; empty to reuse the method name.
    pub entry_point: String,
    /// Target module name, e.g. `kernel32.dll`.
    pub module: String,
}

/// A method parameter declaration.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ParamDecl {
    /// Parameter name; empty names are allowed.
    pub name: String,
    /// 1-based parameter position; 0 names the return value.
    pub sequence: u16,
    /// Parameter flags.
    pub flags: ParamAttributes,
    /// Default value, stored as a `Constant` row.
    pub constant: Option<ConstantValue>,
    /// Pre-encoded marshalling descriptor, stored as a `FieldMarshal` row.
    pub marshal: Option<Vec<u8>>,
}

/// A generic parameter declaration for a type or method.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GenericParamDecl {
    /// Zero-based ordinal of the parameter.
    pub number: u16,
    /// `GenericParamAttributes` flags.
    pub flags: u16,
    /// Parameter name.
    pub name: String,
    /// Constraint types as `TypeDefOrRef` tokens.
    pub constraints: Vec<Token>,
}

/// A field declaration.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FieldDecl {
    /// Field name.
    pub name: String,
    /// Field flags.
    pub flags: FieldAttributes,
    /// Pre-encoded field signature blob.
    pub signature: Vec<u8>,
    /// Literal value, stored as a `Constant` row.
    pub constant: Option<ConstantValue>,
    /// Explicit byte offset, stored as a `FieldLayout` row.
    pub offset: Option<u32>,
    /// Initial data mapped into the image, producing a `FieldRVA` row.
    pub rva_data: Option<Vec<u8>>,
    /// Pre-encoded marshalling descriptor, stored as a `FieldMarshal` row.
    pub marshal: Option<Vec<u8>>,
}

/// A method declaration.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MethodDecl {
    /// Method name.
    pub name: String,
    /// Method flags.
    pub flags: MethodAttributes,
    /// Implementation flags.
    pub impl_flags: MethodImplAttributes,
    /// Pre-encoded method signature blob.
    pub signature: Vec<u8>,
    /// Parameter rows, in sequence order.
    pub params: Vec<ParamDecl>,
    /// IL body; required unless the method is abstract, runtime-implemented
    /// or P/Invoke.
    pub body: Option<MethodBody>,
    /// P/Invoke mapping.
    pub pinvoke: Option<PInvokeDecl>,
    /// Generic parameters.
    pub generic_params: Vec<GenericParamDecl>,
}

/// A property declaration. Accessors are named by their index into the
/// declaring type's `methods` vector.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PropertyDecl {
    /// Property name.
    pub name: String,
    /// `PropertyAttributes` flags.
    pub flags: u16,
    /// Pre-encoded property signature blob.
    pub signature: Vec<u8>,
    /// Default value, stored as a `Constant` row.
    pub constant: Option<ConstantValue>,
    /// Getter method index.
    pub getter: Option<usize>,
    /// Setter method index.
    pub setter: Option<usize>,
}

/// An event declaration. Accessors are named by their index into the
/// declaring type's `methods` vector.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct EventDecl {
    /// Event name.
    pub name: String,
    /// `EventAttributes` flags.
    pub flags: u16,
    /// Handler type as a `TypeDefOrRef` token.
    pub event_type: Token,
    /// Add handler method index.
    pub add_on: Option<usize>,
    /// Remove handler method index.
    pub remove_on: Option<usize>,
    /// Raise method index.
    pub raise: Option<usize>,
}

/// A full type declaration, carrying its members so field and method rows
/// stay contiguous per type.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TypeDecl {
    /// Type name.
    pub name: String,
    /// Namespace, empty for the global namespace.
    pub namespace: String,
    /// Type flags.
    pub flags: TypeAttributes,
    /// Base type as a `TypeDefOrRef` token; `None` only for interfaces and
    /// the module type.
    pub extends: Option<Token>,
    /// Implemented interfaces as `TypeDefOrRef` tokens.
    pub interfaces: Vec<Token>,
    /// Packing size and class size, stored as a `ClassLayout` row.
    pub layout: Option<(u16, u32)>,
    /// Enclosing type for nested types.
    pub nested_in: Option<Token>,
    /// Field declarations, in row order.
    pub fields: Vec<FieldDecl>,
    /// Method declarations, in row order.
    pub methods: Vec<MethodDecl>,
    /// Property declarations.
    pub properties: Vec<PropertyDecl>,
    /// Event declarations.
    pub events: Vec<EventDecl>,
    /// Generic parameters.
    pub generic_params: Vec<GenericParamDecl>,
}

impl TypeDecl {
    /// A minimal declaration with the given name, namespace and flags.
    #[must_use]
    pub fn new(namespace: &str, name: &str, flags: TypeAttributes) -> Self {
        TypeDecl {
            name: name.to_string(),
            namespace: namespace.to_string(),
            flags,
            extends: None,
            interfaces: Vec::new(),
            layout: None,
            nested_in: None,
            fields: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            generic_params: Vec::new(),
        }
    }
}

impl MethodDecl {
    /// A minimal declaration with the given name, flags and signature.
    #[must_use]
    pub fn new(name: &str, flags: MethodAttributes, signature: Vec<u8>) -> Self {
        MethodDecl {
            name: name.to_string(),
            flags,
            impl_flags: MethodImplAttributes::empty(),
            signature,
            params: Vec::new(),
            body: None,
            pinvoke: None,
            generic_params: Vec::new(),
        }
    }
}

impl FieldDecl {
    /// A minimal declaration with the given name, flags and signature.
    #[must_use]
    pub fn new(name: &str, flags: FieldAttributes, signature: Vec<u8>) -> Self {
        FieldDecl {
            name: name.to_string(),
            flags,
            signature,
            constant: None,
            offset: None,
            rva_data: None,
            marshal: None,
        }
    }
}
