//! Crate-wide error type.

use thiserror::Error;

use crate::metadata::token::Token;

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers everything that can fail while populating a dynamic image, resolving
/// references, applying token fixups and serializing the final PE file. Each variant carries
/// enough context to decide whether the failure is recoverable.
///
/// # Error Categories
///
/// ## Builder Contract Errors
/// - [`Error::InvalidFixup`] - A recorded token fixup does not match the bytes found
/// - [`Error::TokenCollision`] - A token was registered twice under a strict policy
/// - [`Error::UnresolvedEntity`] - An entity id was referenced but never described
/// - [`Error::MissingBody`] - A non-abstract method reached serialization without IL
///
/// ## Layout and Serialization Errors
/// - [`Error::LayoutFailed`] - Image layout could not be computed
/// - [`Error::MmapFailed`] - Output buffer creation or access failed
///
/// ## Resource Errors
/// - [`Error::AllocationFailed`] - A stream or table could not grow
/// - [`Error::FileError`] - Filesystem I/O errors
#[derive(Error, Debug)]
pub enum Error {
    /// A token fixup site did not contain the expected provisional token.
    ///
    /// Recorded fixups remember the table tag of the token they patched into the
    /// code stream. When the fixup pass finds a different tag at the recorded
    /// offset, the code stream and the fixup list have diverged and the image
    /// cannot be trusted.
    ///
    /// # Fields
    ///
    /// * `offset` - Code-stream offset of the fixup site
    /// * `expected` - Table tag recorded when the fixup was created
    /// * `found` - Table tag actually present at the site
    #[error("Token fixup mismatch at code offset {offset}: expected table 0x{expected:02x}, found 0x{found:02x}")]
    InvalidFixup {
        /// Code-stream offset of the fixup site
        offset: u32,
        /// Table tag recorded when the fixup was created
        expected: u8,
        /// Table tag actually present at the site
        found: u8,
    },

    /// A token was registered for a slot that already holds a different entity.
    ///
    /// Raised only under [`crate::image::TokenCollision::New`]; the other
    /// policies either tolerate or overwrite the existing registration.
    #[error("Token already registered - {0}")]
    TokenCollision(Token),

    /// An entity id was used in a reference but no descriptor is known for it.
    ///
    /// Every external type, method or field must be described before a token
    /// can be produced for it.
    #[error("No descriptor registered for entity id {0}")]
    UnresolvedEntity(u64),

    /// A method that requires a body reached serialization without one.
    ///
    /// The associated value names the method.
    #[error("Method has no body - {0}")]
    MissingBody(String),

    /// The requested construct is not supported by this builder.
    ///
    /// Used for declaration inputs outside the supported surface, for example
    /// an unknown entity category in a reference descriptor.
    #[error("Not supported - {0}")]
    Unsupported(String),

    /// Image layout could not be computed.
    ///
    /// Covers internal consistency failures during layout such as a table row
    /// whose column count does not match its schema, or section extents that
    /// do not fit the chosen alignments.
    #[error("Layout failed - {0}")]
    LayoutFailed(String),

    /// Output buffer creation or access failed.
    ///
    /// Wraps failures from memory mapping the target file as well as
    /// bounds-check violations on the output buffer.
    #[error("Output failed - {0}")]
    MmapFailed(String),

    /// A stream or table could not reserve additional capacity.
    ///
    /// The associated value is the number of bytes that could not be obtained.
    #[error("Failed to allocate {0} bytes")]
    AllocationFailed(usize),

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur when writing the image to disk.
    #[error("{0}")]
    FileError(#[from] std::io::Error),
}
