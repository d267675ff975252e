//! Minimal ELF section walking.
//!
//! The object-file container stores bundle entries as sections of the host
//! object. This module extracts just enough of an ELF image to iterate its
//! sections by name: the section header table and the section-name string
//! table. Anything that does not parse cleanly is "not an object file" and
//! the caller falls back to the binary container.

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const SHT_NOBITS: u32 = 8;

/// One section of an object file: resolved name plus the byte range of its
/// contents inside the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub offset: usize,
    pub size: usize,
}

fn u16_at(data: &[u8], pos: usize, le: bool) -> Option<u16> {
    let bytes: [u8; 2] = data.get(pos..pos + 2)?.try_into().ok()?;
    Some(if le {
        u16::from_le_bytes(bytes)
    } else {
        u16::from_be_bytes(bytes)
    })
}

fn u32_at(data: &[u8], pos: usize, le: bool) -> Option<u32> {
    let bytes: [u8; 4] = data.get(pos..pos + 4)?.try_into().ok()?;
    Some(if le {
        u32::from_le_bytes(bytes)
    } else {
        u32::from_be_bytes(bytes)
    })
}

fn u64_at(data: &[u8], pos: usize, le: bool) -> Option<u64> {
    let bytes: [u8; 8] = data.get(pos..pos + 8)?.try_into().ok()?;
    Some(if le {
        u64::from_le_bytes(bytes)
    } else {
        u64::from_be_bytes(bytes)
    })
}

/// Parse the section table of an ELF image.
///
/// Returns `None` when the image is not a supported ELF file, including
/// truncated headers and section ranges that overrun the image. An image
/// without a section table yields an empty list.
pub fn parse_sections(data: &[u8]) -> Option<Vec<Section>> {
    if data.get(..4)? != ELF_MAGIC {
        return None;
    }
    let class64 = match data.get(4)? {
        1 => false,
        2 => true,
        _ => return None,
    };
    let le = match data.get(5)? {
        1 => true,
        2 => false,
        _ => return None,
    };

    let (sh_off, sh_entsize, sh_num, sh_strndx) = if class64 {
        (
            usize::try_from(u64_at(data, 0x28, le)?).ok()?,
            usize::from(u16_at(data, 0x3a, le)?),
            usize::from(u16_at(data, 0x3c, le)?),
            usize::from(u16_at(data, 0x3e, le)?),
        )
    } else {
        (
            usize::try_from(u32_at(data, 0x20, le)?).ok()?,
            usize::from(u16_at(data, 0x2e, le)?),
            usize::from(u16_at(data, 0x30, le)?),
            usize::from(u16_at(data, 0x32, le)?),
        )
    };

    if sh_off == 0 || sh_num == 0 {
        return Some(Vec::new());
    }
    if sh_entsize != if class64 { 64 } else { 40 } {
        return None;
    }

    // (sh_type, contents range) per header entry
    let mut raw = Vec::with_capacity(sh_num);
    for i in 0..sh_num {
        let base = sh_off.checked_add(i.checked_mul(sh_entsize)?)?;
        let sh_name = usize::try_from(u32_at(data, base, le)?).ok()?;
        let sh_type = u32_at(data, base + 4, le)?;
        let (sh_offset, sh_size) = if class64 {
            (
                usize::try_from(u64_at(data, base + 24, le)?).ok()?,
                usize::try_from(u64_at(data, base + 32, le)?).ok()?,
            )
        } else {
            (
                usize::try_from(u32_at(data, base + 16, le)?).ok()?,
                usize::try_from(u32_at(data, base + 20, le)?).ok()?,
            )
        };

        // NOBITS sections occupy no image bytes.
        let (offset, size) = if sh_type == SHT_NOBITS {
            (0, 0)
        } else {
            if sh_offset.checked_add(sh_size)? > data.len() && sh_type != 0 {
                return None;
            }
            (sh_offset, sh_size)
        };
        raw.push((sh_name, offset, size));
    }

    let &(_, strtab_off, strtab_size) = raw.get(sh_strndx)?;
    let strtab = data.get(strtab_off..strtab_off.checked_add(strtab_size)?)?;

    let mut sections = Vec::with_capacity(sh_num);
    for (sh_name, offset, size) in raw {
        let name_bytes = strtab.get(sh_name..)?;
        let end = name_bytes.iter().position(|&b| b == 0)?;
        sections.push(Section {
            name: String::from_utf8_lossy(&name_bytes[..end]).into_owned(),
            offset,
            size,
        });
    }
    Some(sections)
}
