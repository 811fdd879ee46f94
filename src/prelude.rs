//! # cilforge Prelude
//!
//! This module provides a convenient prelude for the most commonly used types
//! from the cilforge library. Import this module to get quick access to the
//! essential types for building .NET images.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cilforge operations
pub use crate::Error;

/// The result type used throughout cilforge
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The image under construction and its configuration
pub use crate::image::{AssemblyDecl, Image, ImageConfig, ImageKind};

/// The finalized and serialized forms of an image
pub use crate::image::{DeclaredType, FinalizedImage, ImageExtents, SerializedImage};

/// Token registration collision policies
pub use crate::image::TokenCollision;

// ================================================================================================
// Declarations
// ================================================================================================

/// Type, member and parameter declarations
pub use crate::image::entity::{
    EventDecl, FieldDecl, GenericParamDecl, MethodDecl, ParamDecl, PInvokeDecl, PropertyDecl,
    TypeDecl,
};

/// Method bodies and their parts
pub use crate::image::entity::{ConstantValue, ExceptionClause, MethodBody};

/// Attribute flag sets carried by declarations
pub use crate::image::entity::{
    FieldAttributes, MethodAttributes, MethodImplAttributes, ParamAttributes, PInvokeAttributes,
    TypeAttributes,
};

// ================================================================================================
// External References
// ================================================================================================

/// Descriptors for entities living outside the image
pub use crate::image::entity::{
    AssemblyIdentity, EntityDesc, EntityId, FieldRefDesc, MethodRefDesc, ScopeRef, TypeRefDesc,
};

// ================================================================================================
// Metadata System - Core Types
// ================================================================================================

/// Metadata token type for referencing table entries
pub use crate::metadata::token::Token;

/// Metadata table identifiers
pub use crate::metadata::tables::TableId;
