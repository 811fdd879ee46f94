//! The metadata heaps and their backing stream buffer.
//!
//! Four heaps exist per image: `#Strings` (UTF-8 names), `#US` (UTF-16
//! literals), `#Blob` (length-prefixed binary data) and `#GUID` (raw 16-byte
//! entries). All interning heaps reserve offset 0 for the empty value and
//! deduplicate by content hash.

mod blob;
mod guid;
mod stream;
mod strings;
mod userstrings;

pub use blob::BlobHeap;
pub use guid::GuidHeap;
pub use stream::StreamBuffer;
pub use strings::StringsHeap;
pub use userstrings::UserStringsHeap;
