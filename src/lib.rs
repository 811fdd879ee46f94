#![doc = r#"
# cilforge

Dynamic construction of ECMA-335 (.NET) images. `cilforge` builds the
metadata heaps, the table stream and the PE/COFF envelope in memory, from
declarations rather than from an existing file, and serializes the result as
a loadable assembly.

## Core model

- [`Image`](crate::image::Image) is the aggregate under construction. It owns
  the heaps (strings, user strings, blobs, GUIDs), the table store, the code
  and resource streams and the reference resolver.
- Types, methods, fields, properties and events enter through
  [`Image::declare_type`](crate::image::Image::declare_type); external
  references enter through entity descriptors keyed by
  [`EntityId`](crate::image::entity::EntityId).
- Method bodies may cite tokens that do not exist yet. Provisional tokens and
  recorded fixup sites bridge the gap until
  [`Image::finalize`](crate::image::Image::finalize) assigns final tokens,
  patches the code stream and sorts the tables the runtime requires sorted.
- A [`FinalizedImage`](crate::image::FinalizedImage) serializes to a file or
  to memory; both paths share the metadata and PE writers in [`writer`].

## Quick start

```rust
use cilforge::prelude::*;

fn main() -> cilforge::Result<()> {
    let image = Image::new(ImageConfig::exe("hello.exe"))?;
    let serialized = image.finalize()?.to_memory()?;
    assert!(serialized.bytes().is_some());
    Ok(())
}
```
"#]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod image;
pub mod metadata;
pub mod prelude;
pub(crate) mod utils;
pub mod writer;

pub use error::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
