use strum::{EnumCount, EnumIter};

/// Identifiers for the metadata tables defined in the ECMA-335 specification.
///
/// Each variant represents a table that can appear in the `#~` stream. The numeric
/// values are the table IDs from the CLI specification and double as the high byte
/// of metadata tokens referring into the table.
///
/// ## Reference
/// * [ECMA-335 Partition II, Section 22](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf) - Metadata Tables
#[derive(Clone, Copy, PartialEq, Debug, EnumIter, EnumCount, Eq, Hash, PartialOrd, Ord)]
pub enum TableId {
    /// `Module` table (0x00) - Information about the current module.
    ///
    /// Each image has exactly one Module row carrying the module name and
    /// MVID (Module Version ID).
    Module = 0x00,

    /// `TypeRef` table (0x01) - References to types defined in external scopes.
    TypeRef = 0x01,

    /// `TypeDef` table (0x02) - Definitions of types within this image.
    ///
    /// Holds all type definitions including their flags, name, namespace,
    /// base type, and the start of their field and method ranges.
    TypeDef = 0x02,

    /// `Field` table (0x04) - Field definitions, owned by `TypeDef` rows.
    Field = 0x04,

    /// `MethodDef` table (0x06) - Method definitions.
    ///
    /// Includes method attributes, name, signature, and RVA for methods that
    /// carry IL code.
    MethodDef = 0x06,

    /// `Param` table (0x08) - Parameter rows, owned by `MethodDef` rows.
    Param = 0x08,

    /// `InterfaceImpl` table (0x09) - Interface implementations by types.
    InterfaceImpl = 0x09,

    /// `MemberRef` table (0x0A) - References to members of external types.
    MemberRef = 0x0A,

    /// `Constant` table (0x0B) - Compile-time constant values for fields,
    /// params and properties.
    Constant = 0x0B,

    /// `CustomAttribute` table (0x0C) - Custom attribute applications.
    CustomAttribute = 0x0C,

    /// `FieldMarshal` table (0x0D) - Marshalling descriptors for fields and params.
    FieldMarshal = 0x0D,

    /// `DeclSecurity` table (0x0E) - Declarative security permission sets.
    DeclSecurity = 0x0E,

    /// `ClassLayout` table (0x0F) - Packing and class size for explicit layouts.
    ClassLayout = 0x0F,

    /// `FieldLayout` table (0x10) - Explicit field offsets.
    FieldLayout = 0x10,

    /// `StandAloneSig` table (0x11) - Standalone signatures (locals, indirect calls).
    StandAloneSig = 0x11,

    /// `EventMap` table (0x12) - Maps types to ranges in the `Event` table.
    EventMap = 0x12,

    /// `Event` table (0x14) - Event definitions.
    Event = 0x14,

    /// `PropertyMap` table (0x15) - Maps types to ranges in the `Property` table.
    PropertyMap = 0x15,

    /// `Property` table (0x17) - Property definitions.
    Property = 0x17,

    /// `MethodSemantics` table (0x18) - Accessor associations for properties
    /// and events (getter, setter, adder, remover, fire).
    MethodSemantics = 0x18,

    /// `MethodImpl` table (0x19) - Explicit method implementation overrides.
    MethodImpl = 0x19,

    /// `ModuleRef` table (0x1A) - References to external modules, mostly for
    /// P/Invoke targets.
    ModuleRef = 0x1A,

    /// `TypeSpec` table (0x1B) - Signature-described types such as generic
    /// instantiations, arrays and pointers.
    TypeSpec = 0x1B,

    /// `ImplMap` table (0x1C) - P/Invoke mappings (target module and entry point).
    ImplMap = 0x1C,

    /// `FieldRVA` table (0x1D) - Initial data locations for mapped fields.
    FieldRVA = 0x1D,

    /// `Assembly` table (0x20) - The assembly manifest row.
    Assembly = 0x20,

    /// `AssemblyRef` table (0x23) - References to external assemblies.
    AssemblyRef = 0x23,

    /// `File` table (0x26) - Files that are part of this assembly.
    File = 0x26,

    /// `ExportedType` table (0x27) - Types forwarded or exported by this assembly.
    ExportedType = 0x27,

    /// `ManifestResource` table (0x28) - Embedded or linked resources.
    ManifestResource = 0x28,

    /// `NestedClass` table (0x29) - Parent-child nesting relationships of types.
    NestedClass = 0x29,

    /// `GenericParam` table (0x2A) - Generic parameter definitions for types
    /// and methods.
    GenericParam = 0x2A,

    /// `MethodSpec` table (0x2B) - Generic method instantiations.
    MethodSpec = 0x2B,

    /// `GenericParamConstraint` table (0x2C) - Constraints on generic parameters.
    GenericParamConstraint = 0x2C,
}

impl TableId {
    /// Returns the table id as the token tag byte.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_discriminants_match_format() {
        assert_eq!(TableId::Module.tag(), 0x00);
        assert_eq!(TableId::TypeDef.tag(), 0x02);
        assert_eq!(TableId::MethodDef.tag(), 0x06);
        assert_eq!(TableId::MemberRef.tag(), 0x0A);
        assert_eq!(TableId::Assembly.tag(), 0x20);
        assert_eq!(TableId::GenericParamConstraint.tag(), 0x2C);
    }

    #[test]
    fn test_iteration_is_sorted_by_id() {
        let tags: Vec<u8> = TableId::iter().map(TableId::tag).collect();
        let mut sorted = tags.clone();
        sorted.sort_unstable();
        assert_eq!(tags, sorted);
    }
}
