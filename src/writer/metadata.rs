//! Serialization of the metadata root: the `#~` compressed table stream plus
//! the four heaps, prefixed by the stream directory.
//!
//! Physical column widths are decided here, once heap sizes and row counts
//! are final: a heap index is 4 bytes when its heap has reached 65536 bytes,
//! a table index when the referenced table has 65536 rows, and a coded index
//! when any referenced table overflows the bits left next to the tag.

use strum::IntoEnumIterator;

use crate::{
    image::FinalizedImage,
    metadata::tables::{columns, sort_keys, ColumnKind, TableId},
    Error, Result,
};

/// Metadata root signature, `BSJB`.
const METADATA_SIGNATURE: u32 = 0x424A_5342;
/// Runtime version string stored in the root.
const VERSION_STRING: &[u8] = b"v4.0.30319\0";
/// Heap offsets widen once a heap reaches this size.
const WIDE_HEAP_LIMIT: u32 = 1 << 16;
/// Table indices widen once a table reaches this row count.
const WIDE_TABLE_LIMIT: u32 = 1 << 16;

/// Per-stream name and content, in directory order.
struct StreamEntry<'a> {
    name: &'static [u8],
    data: &'a [u8],
}

/// Physical width decisions for one serialization run.
struct WidthContext<'a> {
    image: &'a FinalizedImage,
    strings_wide: bool,
    guid_wide: bool,
    blob_wide: bool,
}

impl WidthContext<'_> {
    fn column_width(&self, column: ColumnKind) -> usize {
        match column {
            ColumnKind::Byte => 1,
            ColumnKind::Short => 2,
            ColumnKind::Long => 4,
            ColumnKind::StringIndex => {
                if self.strings_wide {
                    4
                } else {
                    2
                }
            }
            ColumnKind::GuidIndex => {
                if self.guid_wide {
                    4
                } else {
                    2
                }
            }
            ColumnKind::BlobIndex => {
                if self.blob_wide {
                    4
                } else {
                    2
                }
            }
            ColumnKind::TableIndex(table) => {
                if self.image.tables().row_count(table) >= WIDE_TABLE_LIMIT {
                    4
                } else {
                    2
                }
            }
            ColumnKind::CodedIndex(kind) => {
                if kind.is_wide(|table| self.image.tables().row_count(table)) {
                    4
                } else {
                    2
                }
            }
        }
    }
}

/// Builds the full metadata root: header, stream directory, `#~` stream and
/// the four heaps, each 4-byte aligned.
pub fn build_compressed_metadata(image: &FinalizedImage) -> Result<Vec<u8>> {
    let ctx = WidthContext {
        image,
        strings_wide: image.strings.len() >= WIDE_HEAP_LIMIT,
        guid_wide: image.guids.len() >= WIDE_HEAP_LIMIT,
        blob_wide: image.blob.len() >= WIDE_HEAP_LIMIT,
    };

    let tables_stream = build_tables_stream(&ctx)?;
    let guid_bytes = image.guids.to_bytes();
    let streams = [
        StreamEntry {
            name: b"#~\0",
            data: &tables_stream,
        },
        StreamEntry {
            name: b"#Strings\0",
            data: image.strings.bytes(),
        },
        StreamEntry {
            name: b"#US\0",
            data: image.user_strings.bytes(),
        },
        StreamEntry {
            name: b"#Blob\0",
            data: image.blob.bytes(),
        },
        StreamEntry {
            name: b"#GUID\0",
            data: &guid_bytes,
        },
    ];

    // Root header plus one 8-byte header and a name padded to 4 per stream.
    let mut header_size = 16 + pad4(VERSION_STRING.len()) + 4;
    for stream in &streams {
        header_size += 8 + pad4(stream.name.len());
    }

    let mut out = Vec::new();
    out.extend_from_slice(&METADATA_SIGNATURE.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // major
    out.extend_from_slice(&1u16.to_le_bytes()); // minor
    out.extend_from_slice(&0u32.to_le_bytes()); // reserved
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(pad4(VERSION_STRING.len()) as u32).to_le_bytes());
    out.extend_from_slice(VERSION_STRING);
    out.resize(out.len() + pad4(VERSION_STRING.len()) - VERSION_STRING.len(), 0);
    out.extend_from_slice(&0u16.to_le_bytes()); // flags
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(streams.len() as u16).to_le_bytes());

    let mut offset = header_size;
    for stream in &streams {
        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(offset as u32).to_le_bytes());
        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(pad4(stream.data.len()) as u32).to_le_bytes());
        out.extend_from_slice(stream.name);
        out.resize(out.len() + pad4(stream.name.len()) - stream.name.len(), 0);
        offset += pad4(stream.data.len());
    }

    if out.len() != header_size {
        return Err(Error::LayoutFailed(format!(
            "metadata header is {} bytes, computed {header_size}",
            out.len()
        )));
    }

    for stream in &streams {
        out.extend_from_slice(stream.data);
        out.resize(out.len() + pad4(stream.data.len()) - stream.data.len(), 0);
    }

    Ok(out)
}

/// Serializes the `#~` stream: header, masks, row counts and compressed rows.
fn build_tables_stream(ctx: &WidthContext<'_>) -> Result<Vec<u8>> {
    let tables = ctx.image.tables();

    let mut valid_mask = 0u64;
    for table in TableId::iter() {
        if tables.row_count(table) > 0 {
            valid_mask |= 1u64 << table.tag();
        }
    }
    let sorted_mask = sorted_table_mask() & valid_mask;

    let mut heap_sizes = 0u8;
    if ctx.strings_wide {
        heap_sizes |= 0x01;
    }
    if ctx.guid_wide {
        heap_sizes |= 0x02;
    }
    if ctx.blob_wide {
        heap_sizes |= 0x04;
    }

    let mut out = Vec::new();
    out.extend_from_slice(&0u32.to_le_bytes()); // reserved
    out.push(2); // major version
    out.push(0); // minor version
    out.push(heap_sizes);
    out.push(1); // reserved
    out.extend_from_slice(&valid_mask.to_le_bytes());
    out.extend_from_slice(&sorted_mask.to_le_bytes());

    for table in TableId::iter() {
        if valid_mask & (1u64 << table.tag()) != 0 {
            out.extend_from_slice(&tables.row_count(table).to_le_bytes());
        }
    }

    for table in TableId::iter() {
        if valid_mask & (1u64 << table.tag()) == 0 {
            continue;
        }
        let layout = columns(table);
        let raw = tables.raw(table);
        for row in raw.chunks_exact(layout.len()) {
            for (value, column) in row.iter().zip(layout) {
                write_column(&mut out, *value, ctx.column_width(*column))?;
            }
        }
    }

    // Pad so the next stream starts aligned.
    out.resize(pad4(out.len()), 0);
    Ok(out)
}

fn write_column(out: &mut Vec<u8>, value: u32, width: usize) -> Result<()> {
    match width {
        1 => {
            if value > u32::from(u8::MAX) {
                return Err(Error::LayoutFailed(format!(
                    "value 0x{value:x} does not fit a 1-byte column"
                )));
            }
            out.push(value as u8);
        }
        2 => {
            if value > u32::from(u16::MAX) {
                return Err(Error::LayoutFailed(format!(
                    "value 0x{value:x} does not fit a 2-byte column"
                )));
            }
            #[allow(clippy::cast_possible_truncation)]
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        4 => out.extend_from_slice(&value.to_le_bytes()),
        _ => {
            return Err(Error::LayoutFailed(format!(
                "unsupported column width {width}"
            )))
        }
    }
    Ok(())
}

/// The fixed sorted-tables mask, derived from the sort key set.
fn sorted_table_mask() -> u64 {
    let mut mask = 0u64;
    for table in TableId::iter() {
        if sort_keys(table).is_some() {
            mask |= 1u64 << table.tag();
        }
    }
    mask
}

const fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Image, ImageConfig};

    fn finalized() -> Result<FinalizedImage> {
        Image::new(ImageConfig::exe("app.exe"))?.finalize()
    }

    #[test]
    fn test_root_header() -> Result<()> {
        let metadata = build_compressed_metadata(&finalized()?)?;

        assert_eq!(&metadata[0..4], b"BSJB");
        assert_eq!(&metadata[4..8], &[1, 0, 1, 0]); // version 1.1
        let version_len = u32::from_le_bytes(metadata[12..16].try_into().unwrap());
        assert_eq!(version_len, 12);
        assert_eq!(&metadata[16..27], b"v4.0.30319\0");
        // flags then five streams
        assert_eq!(&metadata[28..32], &[0, 0, 5, 0]);
        Ok(())
    }

    #[test]
    fn test_stream_directory_order_and_offsets() -> Result<()> {
        let image = finalized()?;
        let metadata = build_compressed_metadata(&image)?;

        // Directory entries start after the 32-byte root header.
        let mut pos = 32;
        let mut names = Vec::new();
        let mut last_offset = 0;
        for _ in 0..5 {
            let offset = u32::from_le_bytes(metadata[pos..pos + 4].try_into().unwrap());
            let size = u32::from_le_bytes(metadata[pos + 4..pos + 8].try_into().unwrap());
            assert!(offset >= last_offset);
            assert_eq!(offset % 4, 0);
            assert_eq!(size % 4, 0);
            last_offset = offset + size;
            pos += 8;
            let name_start = pos;
            while metadata[pos] != 0 {
                pos += 1;
            }
            names.push(metadata[name_start..pos].to_vec());
            pos = (pos + 4) & !3;
        }
        assert_eq!(
            names,
            vec![
                b"#~".to_vec(),
                b"#Strings".to_vec(),
                b"#US".to_vec(),
                b"#Blob".to_vec(),
                b"#GUID".to_vec(),
            ]
        );
        assert_eq!(last_offset as usize, metadata.len());
        Ok(())
    }

    #[test]
    fn test_tables_stream_masks() -> Result<()> {
        let image = finalized()?;
        let metadata = build_compressed_metadata(&image)?;

        // #~ begins right after the directory; its offset is in entry 0.
        let tables_offset =
            u32::from_le_bytes(metadata[32..36].try_into().unwrap()) as usize;
        let stream = &metadata[tables_offset..];

        assert_eq!(&stream[0..4], &[0, 0, 0, 0]);
        assert_eq!(stream[4], 2); // table schema 2.0
        assert_eq!(stream[5], 0);
        assert_eq!(stream[6], 0); // no wide heaps for a tiny image
        assert_eq!(stream[7], 1);

        let valid = u64::from_le_bytes(stream[8..16].try_into().unwrap());
        // Module and TypeDef only.
        assert_eq!(valid, (1 << 0x00) | (1 << 0x02));

        let sorted = u64::from_le_bytes(stream[16..24].try_into().unwrap());
        assert_eq!(sorted & !valid, 0, "sorted mask outside valid mask");
        Ok(())
    }

    #[test]
    fn test_row_counts_follow_masks() -> Result<()> {
        let image = finalized()?;
        let metadata = build_compressed_metadata(&image)?;
        let tables_offset =
            u32::from_le_bytes(metadata[32..36].try_into().unwrap()) as usize;
        let stream = &metadata[tables_offset..];

        let module_rows = u32::from_le_bytes(stream[24..28].try_into().unwrap());
        let typedef_rows = u32::from_le_bytes(stream[28..32].try_into().unwrap());
        assert_eq!(module_rows, 1);
        assert_eq!(typedef_rows, 1);
        Ok(())
    }

    #[test]
    fn test_sorted_mask_constant() {
        let mask = sorted_table_mask();
        let expected: u64 = (1 << 0x09)   // InterfaceImpl
            | (1 << 0x0B)                 // Constant
            | (1 << 0x0C)                 // CustomAttribute
            | (1 << 0x0D)                 // FieldMarshal
            | (1 << 0x0E)                 // DeclSecurity
            | (1 << 0x0F)                 // ClassLayout
            | (1 << 0x10)                 // FieldLayout
            | (1 << 0x18)                 // MethodSemantics
            | (1 << 0x19)                 // MethodImpl
            | (1 << 0x1C)                 // ImplMap
            | (1 << 0x1D)                 // FieldRVA
            | (1 << 0x29)                 // NestedClass
            | (1 << 0x2A); // GenericParam
        assert_eq!(mask, expected);
    }

    #[test]
    fn test_narrow_column_widths() -> Result<()> {
        let image = finalized()?;
        let ctx = WidthContext {
            image: &image,
            strings_wide: false,
            guid_wide: false,
            blob_wide: false,
        };
        assert_eq!(ctx.column_width(ColumnKind::Byte), 1);
        assert_eq!(ctx.column_width(ColumnKind::Short), 2);
        assert_eq!(ctx.column_width(ColumnKind::Long), 4);
        assert_eq!(ctx.column_width(ColumnKind::StringIndex), 2);
        assert_eq!(
            ctx.column_width(ColumnKind::TableIndex(TableId::MethodDef)),
            2
        );
        Ok(())
    }

    #[test]
    fn test_wide_heap_flag() -> Result<()> {
        let image = finalized()?;
        let ctx = WidthContext {
            image: &image,
            strings_wide: true,
            guid_wide: false,
            blob_wide: true,
        };
        assert_eq!(ctx.column_width(ColumnKind::StringIndex), 4);
        assert_eq!(ctx.column_width(ColumnKind::GuidIndex), 2);
        assert_eq!(ctx.column_width(ColumnKind::BlobIndex), 4);
        Ok(())
    }

    #[test]
    fn test_value_too_large_for_column() {
        let mut out = Vec::new();
        assert!(write_column(&mut out, 0x1_0000, 2).is_err());
        assert!(write_column(&mut out, 0x100, 1).is_err());
        assert!(write_column(&mut out, u32::MAX, 4).is_ok());
    }
}
