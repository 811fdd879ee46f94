//! IL method body encoding into the image's code stream.
//!
//! Bodies use the tiny header when they qualify (under 64 bytes of code, a
//! stack depth of at most 8, no locals, no exception clauses) and the fat
//! 12-byte header otherwise. Exception clauses are always written in the fat
//! clause format as a trailing method data section.

use crate::{
    image::{entity::MethodBody, fixups::FixupEngine},
    metadata::heaps::StreamBuffer,
    Result,
};

/// Fat header flag: this is a fat body.
const FAT_FORMAT: u16 = 0x03;
/// Fat header flag: extra data sections follow the code.
const MORE_SECTS: u16 = 0x08;
/// Fat header flag: zero-initialize locals.
const INIT_LOCALS: u16 = 0x10;
/// Method data section kind: fat exception handling table.
const SECT_EHTABLE_FAT: u8 = 0x41;
/// Tiny header flag in the low two bits.
const TINY_FORMAT: u8 = 0x02;

/// Returns true when `body` fits the tiny header.
#[must_use]
pub fn is_tiny(body: &MethodBody, locals_token: u32) -> bool {
    body.code.len() < 64
        && body.max_stack <= 8
        && locals_token == 0
        && body.clauses.is_empty()
}

/// Writes `body` to the code stream and returns the offset of its header.
///
/// `locals_token` is the `StandAloneSig` token value for the locals signature,
/// or 0 when the method has no locals. Token fixup sites inside the body are
/// re-recorded against their absolute code-stream offsets.
pub fn write_method_body(
    stream: &mut StreamBuffer,
    body: &MethodBody,
    locals_token: u32,
    fixups: &mut FixupEngine,
) -> Result<u32> {
    #[allow(clippy::cast_possible_truncation)]
    let code_size = body.code.len() as u32;

    let header_offset;
    let code_offset;
    if is_tiny(body, locals_token) {
        let flags = (code_size << 2) as u8 | TINY_FORMAT;
        header_offset = stream.write(&[flags])?;
        code_offset = stream.write(&body.code)?;
    } else {
        stream.align4()?;
        let mut fat_flags = FAT_FORMAT;
        if !body.clauses.is_empty() {
            fat_flags |= MORE_SECTS;
        }
        if body.init_locals {
            fat_flags |= INIT_LOCALS;
        }
        // Header size in dwords lives in the high nibble of the flags word.
        let flags_and_size = fat_flags | (3 << 12);

        let mut header = [0u8; 12];
        header[0..2].copy_from_slice(&flags_and_size.to_le_bytes());
        header[2..4].copy_from_slice(&body.max_stack.to_le_bytes());
        header[4..8].copy_from_slice(&code_size.to_le_bytes());
        header[8..12].copy_from_slice(&locals_token.to_le_bytes());

        header_offset = stream.write(&header)?;
        code_offset = stream.write(&body.code)?;

        if !body.clauses.is_empty() {
            stream.align4()?;
            #[allow(clippy::cast_possible_truncation)]
            let data_size = body.clauses.len() as u32 * 24 + 4;
            let section = [
                SECT_EHTABLE_FAT,
                (data_size & 0xff) as u8,
                ((data_size >> 8) & 0xff) as u8,
                ((data_size >> 16) & 0xff) as u8,
            ];
            stream.write(&section)?;
            for clause in &body.clauses {
                stream.write(&clause.flags.to_le_bytes())?;
                stream.write(&clause.try_offset.to_le_bytes())?;
                stream.write(&clause.try_length.to_le_bytes())?;
                stream.write(&clause.handler_offset.to_le_bytes())?;
                stream.write(&clause.handler_length.to_le_bytes())?;
                stream.write(&clause.class_token_or_filter.to_le_bytes())?;
            }
        }
    }

    for &(rel_offset, token) in &body.token_fixups {
        fixups.record(code_offset + rel_offset, token);
    }

    Ok(header_offset)
}
