//! PE/COFF serialization: section layout, headers, and the back-patches that
//! turn the code-stream preamble into a loadable image.
//!
//! The `.text` section carries, in order, the code stream (preamble included),
//! the managed resources, the metadata root and the strong name reservation.
//! A `.rsrc` section exists only when raw Win32 resource data was supplied;
//! `.reloc` always holds the single HIGHLOW entry for the entry stub operand.

use crate::{
    image::{
        self, FinalizedImage, ImageKind, CLI_HEADER_OFFSET, CLI_HEADER_SIZE, ENTRY_STUB_OFFSET,
        IAT_OFFSET, IDT_OFFSET, ILT_OFFSET, IMPORT_NAMES_OFFSET, TEXT_RVA,
    },
    utils::align_up,
    writer::Output,
    Error, Result,
};

/// File alignment of section data.
const FILE_ALIGN: u32 = 512;
/// Virtual alignment of sections.
const VIRT_ALIGN: u32 = 8192;
/// Preferred load address.
const IMAGE_BASE: u32 = 0x0040_0000;
/// Offset of the PE signature, stored in the DOS header's `e_lfanew`.
const PE_SIGNATURE_OFFSET: usize = 128;
/// Offset of the COFF header.
const COFF_OFFSET: usize = PE_SIGNATURE_OFFSET + 4;
/// Offset of the optional header.
const OPT_HEADER_OFFSET: usize = COFF_OFFSET + 20;
/// Size of the PE32 optional header with 16 data directories.
const OPT_HEADER_SIZE: usize = 224;
/// Offset of the section table.
const SECTION_TABLE_OFFSET: usize = OPT_HEADER_OFFSET + OPT_HEADER_SIZE;
/// Size of the import directory reported in the import data directory.
const IMPORT_DIR_SIZE: u32 = 79;
/// Size of the single base relocation block.
const RELOC_SIZE: u32 = 12;

/// DOS header and stub, `e_lfanew` pointing at offset 128.
const DOS_STUB: [u8; 128] = [
    0x4d, 0x5a, 0x90, 0x00, 0x03, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0xff, 0xff, 0x00,
    0x00, 0xb8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x80, 0x00, 0x00, 0x00, 0x0e, 0x1f, 0xba, 0x0e, 0x00, 0xb4, 0x09, 0xcd, 0x21, 0xb8, 0x01,
    0x4c, 0xcd, 0x21, 0x54, 0x68, 0x69, 0x73, 0x20, 0x70, 0x72, 0x6f, 0x67, 0x72, 0x61, 0x6d,
    0x20, 0x63, 0x61, 0x6e, 0x6e, 0x6f, 0x74, 0x20, 0x62, 0x65, 0x20, 0x72, 0x75, 0x6e, 0x20,
    0x69, 0x6e, 0x20, 0x44, 0x4f, 0x53, 0x20, 0x6d, 0x6f, 0x64, 0x65, 0x2e, 0x0d, 0x0d, 0x0a,
    0x24, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// One section's placement.
struct SectionLayout {
    name: [u8; 8],
    virt_size: u32,
    virt_addr: u32,
    raw_size: u32,
    raw_offset: u32,
    characteristics: u32,
}

/// The computed file layout, fixed before any byte is written.
pub struct PeLayout {
    /// Total file size.
    pub file_size: u32,
    image_size: u32,
    header_size: u32,
    sections: Vec<SectionLayout>,
}

fn section_name(name: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[..name.len()].copy_from_slice(name);
    out
}

impl PeLayout {
    /// Places every section and computes the total file and image sizes.
    pub fn compute(image: &FinalizedImage, metadata: &[u8]) -> Result<Self> {
        #[allow(clippy::cast_possible_truncation)]
        let metadata_size = metadata.len() as u32;
        let text_size = image.code.len()
            + image.resources.len()
            + metadata_size
            + image.strong_name_size;

        #[allow(clippy::cast_possible_truncation)]
        let rsrc_size = image.win32_resources.len() as u32;

        let section_count: u32 = if rsrc_size > 0 { 3 } else { 2 };
        let table_end = SECTION_TABLE_OFFSET as u32 + section_count * 40;
        let header_size = align_up(table_end, FILE_ALIGN);

        let mut sections = Vec::with_capacity(section_count as usize);
        let mut virt_addr = TEXT_RVA;
        let mut raw_offset = header_size;
        let push = |name: &[u8], virt_size: u32, characteristics: u32,
                        virt_addr: &mut u32,
                        raw_offset: &mut u32,
                        sections: &mut Vec<SectionLayout>| {
            let raw_size = align_up(virt_size, FILE_ALIGN);
            sections.push(SectionLayout {
                name: section_name(name),
                virt_size,
                virt_addr: *virt_addr,
                raw_size,
                raw_offset: *raw_offset,
                characteristics,
            });
            *virt_addr = align_up(*virt_addr + virt_size, VIRT_ALIGN);
            *raw_offset += raw_size;
        };

        push(
            b".text",
            text_size,
            0x6000_0020, // code, execute, read
            &mut virt_addr,
            &mut raw_offset,
            &mut sections,
        );
        if rsrc_size > 0 {
            push(
                b".rsrc",
                rsrc_size,
                0x4000_0040, // initialized data, read
                &mut virt_addr,
                &mut raw_offset,
                &mut sections,
            );
        }
        push(
            b".reloc",
            RELOC_SIZE,
            0x4200_0040, // initialized data, discardable, read
            &mut virt_addr,
            &mut raw_offset,
            &mut sections,
        );

        if text_size < image::METHOD_BASE {
            return Err(Error::LayoutFailed(format!(
                "text section of {text_size} bytes is smaller than the preamble"
            )));
        }

        Ok(PeLayout {
            file_size: raw_offset,
            image_size: virt_addr,
            header_size,
            sections,
        })
    }

    fn text(&self) -> &SectionLayout {
        &self.sections[0]
    }

    fn rsrc(&self) -> Option<&SectionLayout> {
        if self.sections.len() == 3 {
            Some(&self.sections[1])
        } else {
            None
        }
    }

    fn reloc(&self) -> &SectionLayout {
        &self.sections[self.sections.len() - 1]
    }
}

/// Writes the complete image into `out`, which must be `layout.file_size`
/// bytes long.
pub fn write_pe(
    image: &FinalizedImage,
    metadata: &[u8],
    layout: &PeLayout,
    out: &mut Output,
) -> Result<()> {
    out.write_at(0, &DOS_STUB)?;
    out.write_at(PE_SIGNATURE_OFFSET, b"PE\0\0")?;

    write_coff_header(image, layout, out)?;
    write_optional_header(image, layout, out)?;
    write_section_table(layout, out)?;
    write_text(image, metadata, layout, out)?;

    if let (Some(rsrc), false) = (layout.rsrc(), image.win32_resources.is_empty()) {
        out.write_at(rsrc.raw_offset as usize, &image.win32_resources)?;
    }
    write_reloc(layout, out)?;
    Ok(())
}

fn write_coff_header(image: &FinalizedImage, layout: &PeLayout, out: &mut Output) -> Result<()> {
    let characteristics: u16 = match image.kind {
        ImageKind::Exe => 0x010e,
        ImageKind::Dll => 0x210e,
    };

    let mut coff = [0u8; 20];
    coff[0..2].copy_from_slice(&0x014cu16.to_le_bytes()); // i386
    #[allow(clippy::cast_possible_truncation)]
    coff[2..4].copy_from_slice(&(layout.sections.len() as u16).to_le_bytes());
    // Timestamp left zero so identical inputs produce identical images.
    coff[16..18].copy_from_slice(&(OPT_HEADER_SIZE as u16).to_le_bytes());
    coff[18..20].copy_from_slice(&characteristics.to_le_bytes());
    out.write_at(COFF_OFFSET, &coff)
}

fn write_optional_header(
    image: &FinalizedImage,
    layout: &PeLayout,
    out: &mut Output,
) -> Result<()> {
    let text = layout.text();
    let init_data_size: u32 = layout
        .sections
        .iter()
        .skip(1)
        .map(|section| section.raw_size)
        .sum();
    let base_of_data = layout.sections[1].virt_addr;
    let subsystem: u16 = if image.gui { 2 } else { 3 };

    let mut oh = [0u8; OPT_HEADER_SIZE];
    oh[0..2].copy_from_slice(&0x010bu16.to_le_bytes()); // PE32
    oh[2] = 6; // linker major
    oh[3] = 0;
    oh[4..8].copy_from_slice(&text.raw_size.to_le_bytes());
    oh[8..12].copy_from_slice(&init_data_size.to_le_bytes());
    oh[16..20].copy_from_slice(&(text.virt_addr + ENTRY_STUB_OFFSET).to_le_bytes());
    oh[20..24].copy_from_slice(&text.virt_addr.to_le_bytes());
    oh[24..28].copy_from_slice(&base_of_data.to_le_bytes());
    oh[28..32].copy_from_slice(&IMAGE_BASE.to_le_bytes());
    oh[32..36].copy_from_slice(&VIRT_ALIGN.to_le_bytes());
    oh[36..40].copy_from_slice(&FILE_ALIGN.to_le_bytes());
    oh[40..42].copy_from_slice(&4u16.to_le_bytes()); // os major
    oh[48..50].copy_from_slice(&4u16.to_le_bytes()); // subsystem major
    oh[56..60].copy_from_slice(&layout.image_size.to_le_bytes());
    oh[60..64].copy_from_slice(&layout.header_size.to_le_bytes());
    oh[68..70].copy_from_slice(&subsystem.to_le_bytes());
    oh[72..76].copy_from_slice(&0x0010_0000u32.to_le_bytes()); // stack reserve
    oh[76..80].copy_from_slice(&0x0000_1000u32.to_le_bytes()); // stack commit
    oh[80..84].copy_from_slice(&0x0010_0000u32.to_le_bytes()); // heap reserve
    oh[84..88].copy_from_slice(&0x0000_1000u32.to_le_bytes()); // heap commit
    oh[92..96].copy_from_slice(&16u32.to_le_bytes()); // data directory count

    // Data directories: import, resource, base reloc, IAT, CLI header.
    let mut dir = |index: usize, rva: u32, size: u32| {
        let at = 96 + index * 8;
        oh[at..at + 4].copy_from_slice(&rva.to_le_bytes());
        oh[at + 4..at + 8].copy_from_slice(&size.to_le_bytes());
    };
    dir(1, text.virt_addr + IDT_OFFSET, IMPORT_DIR_SIZE);
    if let Some(rsrc) = layout.rsrc() {
        dir(2, rsrc.virt_addr, rsrc.virt_size);
    }
    dir(5, layout.reloc().virt_addr, RELOC_SIZE);
    dir(12, text.virt_addr + IAT_OFFSET, 8);
    dir(14, text.virt_addr + CLI_HEADER_OFFSET, CLI_HEADER_SIZE);

    out.write_at(OPT_HEADER_OFFSET, &oh)
}

fn write_section_table(layout: &PeLayout, out: &mut Output) -> Result<()> {
    let mut at = SECTION_TABLE_OFFSET;
    for section in &layout.sections {
        let mut row = [0u8; 40];
        row[0..8].copy_from_slice(&section.name);
        row[8..12].copy_from_slice(&section.virt_size.to_le_bytes());
        row[12..16].copy_from_slice(&section.virt_addr.to_le_bytes());
        row[16..20].copy_from_slice(&section.raw_size.to_le_bytes());
        row[20..24].copy_from_slice(&section.raw_offset.to_le_bytes());
        row[36..40].copy_from_slice(&section.characteristics.to_le_bytes());
        out.write_at(at, &row)?;
        at += 40;
    }
    Ok(())
}

/// Writes the `.text` payload and applies the preamble back-patches that
/// depend on final addresses.
fn write_text(
    image: &FinalizedImage,
    metadata: &[u8],
    layout: &PeLayout,
    out: &mut Output,
) -> Result<()> {
    let text = layout.text();
    let base = text.raw_offset as usize;
    let rva = text.virt_addr;

    let code_len = image.code.len();
    let resources_len = image.resources.len();
    #[allow(clippy::cast_possible_truncation)]
    let metadata_len = metadata.len() as u32;

    out.write_at(base, image.code.bytes())?;
    out.write_at(base + code_len as usize, image.resources.bytes())?;
    out.write_at(base + (code_len + resources_len) as usize, metadata)?;
    // Strong name reservation stays zero-filled.

    // Entry stub operand: absolute address of the IAT slot.
    out.write_u32_le_at(
        base + (ENTRY_STUB_OFFSET + 2) as usize,
        IMAGE_BASE + rva + IAT_OFFSET,
    )?;
    // IAT and ILT both point at the hint/name entry.
    out.write_u32_le_at(base + IAT_OFFSET as usize, rva + IMPORT_NAMES_OFFSET)?;
    out.write_u32_le_at(base + ILT_OFFSET as usize, rva + IMPORT_NAMES_OFFSET)?;
    // Import directory entry: lookup table, module name, address table.
    out.write_u32_le_at(base + IDT_OFFSET as usize, rva + ILT_OFFSET)?;
    out.write_u32_le_at(
        base + IDT_OFFSET as usize + 12,
        rva + IMPORT_NAMES_OFFSET + 14,
    )?;
    out.write_u32_le_at(base + IDT_OFFSET as usize + 16, rva + IAT_OFFSET)?;

    // CLI header.
    let ch = base + CLI_HEADER_OFFSET as usize;
    out.write_u32_le_at(ch, CLI_HEADER_SIZE)?;
    out.write_u16_le_at(ch + 4, 2)?; // runtime major
    out.write_u16_le_at(ch + 6, 5)?; // runtime minor
    out.write_u32_le_at(ch + 8, rva + code_len + resources_len)?;
    out.write_u32_le_at(ch + 12, metadata_len)?;
    out.write_u32_le_at(ch + 16, image::cli_flags(image.strong_name_size))?;
    out.write_u32_le_at(ch + 20, image.entry_point.value())?;
    if resources_len > 0 {
        out.write_u32_le_at(ch + 24, rva + code_len)?;
        out.write_u32_le_at(ch + 28, resources_len)?;
    }
    if image.strong_name_size > 0 {
        out.write_u32_le_at(ch + 32, rva + code_len + resources_len + metadata_len)?;
        out.write_u32_le_at(ch + 36, image.strong_name_size)?;
    }
    Ok(())
}

fn write_reloc(layout: &PeLayout, out: &mut Output) -> Result<()> {
    let reloc = layout.reloc();
    let base = reloc.raw_offset as usize;
    // One HIGHLOW entry covering the entry stub operand.
    out.write_u32_le_at(base, layout.text().virt_addr)?;
    out.write_u32_le_at(base + 4, RELOC_SIZE)?;
    out.write_u16_le_at(base + 8, (3 << 12) | (ENTRY_STUB_OFFSET as u16 + 2))?;
    out.write_u16_le_at(base + 10, 0)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Image, ImageConfig};
    use crate::writer::build_compressed_metadata;

    fn minimal() -> Result<(FinalizedImage, Vec<u8>)> {
        let image = Image::new(ImageConfig::exe("app.exe"))?.finalize()?;
        let metadata = build_compressed_metadata(&image)?;
        Ok((image, metadata))
    }

    #[test]
    fn test_layout_alignment() -> Result<()> {
        let (image, metadata) = minimal()?;
        let layout = PeLayout::compute(&image, &metadata)?;

        assert_eq!(layout.header_size, 512);
        assert_eq!(layout.file_size % FILE_ALIGN, 0);
        assert_eq!(layout.sections.len(), 2);

        let text = layout.text();
        assert_eq!(text.virt_addr, TEXT_RVA);
        assert_eq!(text.raw_offset, 512);
        assert_eq!(text.raw_size % FILE_ALIGN, 0);

        let reloc = layout.reloc();
        assert_eq!(reloc.virt_addr % VIRT_ALIGN, 0);
        assert!(reloc.virt_addr > text.virt_addr);
        Ok(())
    }

    #[test]
    fn test_rsrc_section_only_with_data() -> Result<()> {
        let mut image = Image::new(ImageConfig::exe("app.exe"))?;
        image.set_win32_resources(vec![0u8; 32]);
        let image = image.finalize()?;
        let metadata = build_compressed_metadata(&image)?;
        let layout = PeLayout::compute(&image, &metadata)?;

        assert_eq!(layout.sections.len(), 3);
        assert_eq!(&layout.sections[1].name[..5], b".rsrc");
        Ok(())
    }

    #[test]
    fn test_headers() -> Result<()> {
        let (image, metadata) = minimal()?;
        let layout = PeLayout::compute(&image, &metadata)?;
        let mut out = Output::create_in_memory(layout.file_size as usize);
        write_pe(&image, &metadata, &layout, &mut out)?;
        let bytes = out.into_vec()?;

        assert_eq!(&bytes[0..2], b"MZ");
        assert_eq!(&bytes[0x3C..0x40], &[0x80, 0, 0, 0]);
        assert_eq!(&bytes[128..132], b"PE\0\0");
        assert_eq!(&bytes[132..134], &0x014cu16.to_le_bytes());
        assert_eq!(&bytes[134..136], &2u16.to_le_bytes()); // sections
        assert_eq!(&bytes[150..152], &0x010eu16.to_le_bytes()); // exe

        // Optional header magic and subsystem.
        assert_eq!(&bytes[152..154], &0x010bu16.to_le_bytes());
        assert_eq!(&bytes[152 + 68..152 + 70], &3u16.to_le_bytes()); // console
        Ok(())
    }

    #[test]
    fn test_cli_header_metadata_directory() -> Result<()> {
        let (image, metadata) = minimal()?;
        let layout = PeLayout::compute(&image, &metadata)?;
        let code_len = image.code.len();
        let mut out = Output::create_in_memory(layout.file_size as usize);
        write_pe(&image, &metadata, &layout, &mut out)?;
        let bytes = out.into_vec()?;

        let ch = 512 + CLI_HEADER_OFFSET as usize;
        assert_eq!(
            u32::from_le_bytes(bytes[ch..ch + 4].try_into().unwrap()),
            CLI_HEADER_SIZE
        );
        assert_eq!(u16::from_le_bytes(bytes[ch + 4..ch + 6].try_into().unwrap()), 2);
        assert_eq!(u16::from_le_bytes(bytes[ch + 6..ch + 8].try_into().unwrap()), 5);

        let md_rva = u32::from_le_bytes(bytes[ch + 8..ch + 12].try_into().unwrap());
        assert_eq!(md_rva, TEXT_RVA + code_len);

        // The metadata root lives where the directory points.
        let md_off = 512 + code_len as usize;
        assert_eq!(&bytes[md_off..md_off + 4], b"BSJB");
        Ok(())
    }

    #[test]
    fn test_import_stub_patches() -> Result<()> {
        let (image, metadata) = minimal()?;
        let layout = PeLayout::compute(&image, &metadata)?;
        let mut out = Output::create_in_memory(layout.file_size as usize);
        write_pe(&image, &metadata, &layout, &mut out)?;
        let bytes = out.into_vec()?;

        let text = 512usize;
        // jmp [IAT] at the entry stub.
        assert_eq!(&bytes[text..text + 2], &[0xFF, 0x25]);
        let operand = u32::from_le_bytes(bytes[text + 2..text + 6].try_into().unwrap());
        assert_eq!(operand, IMAGE_BASE + TEXT_RVA + IAT_OFFSET);

        let iat = u32::from_le_bytes(
            bytes[text + IAT_OFFSET as usize..text + IAT_OFFSET as usize + 4]
                .try_into()
                .unwrap(),
        );
        assert_eq!(iat, TEXT_RVA + IMPORT_NAMES_OFFSET);

        // Import directory name points at "mscoree.dll".
        let name_rva = u32::from_le_bytes(
            bytes[text + IDT_OFFSET as usize + 12..text + IDT_OFFSET as usize + 16]
                .try_into()
                .unwrap(),
        );
        let name_off = text + (name_rva - TEXT_RVA) as usize;
        assert_eq!(&bytes[name_off..name_off + 11], b"mscoree.dll");
        Ok(())
    }

    #[test]
    fn test_reloc_block() -> Result<()> {
        let (image, metadata) = minimal()?;
        let layout = PeLayout::compute(&image, &metadata)?;
        let reloc_off = layout.reloc().raw_offset as usize;
        let mut out = Output::create_in_memory(layout.file_size as usize);
        write_pe(&image, &metadata, &layout, &mut out)?;
        let bytes = out.into_vec()?;

        assert_eq!(
            u32::from_le_bytes(bytes[reloc_off..reloc_off + 4].try_into().unwrap()),
            TEXT_RVA
        );
        assert_eq!(
            u32::from_le_bytes(bytes[reloc_off + 4..reloc_off + 8].try_into().unwrap()),
            12
        );
        let entry = u16::from_le_bytes(bytes[reloc_off + 8..reloc_off + 10].try_into().unwrap());
        assert_eq!(entry, (3 << 12) | 2);
        Ok(())
    }

    #[test]
    fn test_dll_characteristics() -> Result<()> {
        let image = Image::new(ImageConfig::dll("lib.dll"))?.finalize()?;
        let metadata = build_compressed_metadata(&image)?;
        let layout = PeLayout::compute(&image, &metadata)?;
        let mut out = Output::create_in_memory(layout.file_size as usize);
        write_pe(&image, &metadata, &layout, &mut out)?;
        let bytes = out.into_vec()?;

        assert_eq!(&bytes[150..152], &0x210eu16.to_le_bytes());
        Ok(())
    }
}
