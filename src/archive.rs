//! Static-library (`ar`) reading and writing.
//!
//! Archive unbundling walks the members of a `.a` input and re-emits
//! per-target archives. This layer implements the subset of the format
//! that needs: the common member headers, GNU long-name tables and BSD
//! extended names on the read side, and deterministic GNU or Darwin
//! output (no symbol index) on the write side.

use crate::{Error, Result};
use std::path::Path;

const GLOBAL_MAGIC: &[u8; 8] = b"!<arch>\n";
const HEADER_LEN: usize = 60;

/// One member of a parsed archive. `data` borrows from the archive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember<'a> {
    pub name: String,
    pub data: &'a [u8],
}

/// A member to be written into a new archive.
#[derive(Debug, Clone)]
pub struct NewArchiveMember {
    pub name: String,
    pub data: Vec<u8>,
}

/// Output archive flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Gnu,
    Darwin,
}

/// The archive flavor native to the build host: Darwin on Darwin hosts,
/// GNU everywhere else.
pub fn host_default_kind() -> ArchiveKind {
    if cfg!(target_os = "macos") {
        ArchiveKind::Darwin
    } else {
        ArchiveKind::Gnu
    }
}

fn malformed(what: &str) -> Error {
    Error::MalformedArchive(what.to_string())
}

fn header_str(field: &[u8]) -> Result<&str> {
    std::str::from_utf8(field).map_err(|_| malformed("non-ASCII member header"))
}

/// Parse all regular members of an archive buffer.
///
/// Symbol-table members and the long-name table are consumed internally
/// and do not appear in the result.
pub fn parse_archive(data: &[u8]) -> Result<Vec<ArchiveMember<'_>>> {
    if data.get(..GLOBAL_MAGIC.len()) != Some(GLOBAL_MAGIC.as_slice()) {
        return Err(malformed("missing global header"));
    }

    let mut members = Vec::new();
    let mut long_names: &[u8] = &[];
    let mut pos = GLOBAL_MAGIC.len();

    while pos < data.len() {
        let header = data
            .get(pos..pos + HEADER_LEN)
            .ok_or_else(|| malformed("truncated member header"))?;
        if &header[58..60] != b"`\n" {
            return Err(malformed("bad member header terminator"));
        }

        let name_field = header_str(&header[..16])?.trim_end_matches(' ');
        let size: usize = header_str(&header[48..58])?
            .trim_end_matches(' ')
            .parse()
            .map_err(|_| malformed("bad member size"))?;

        let body_start = pos + HEADER_LEN;
        let body = data
            .get(body_start..body_start + size)
            .ok_or_else(|| malformed("member overruns archive"))?;
        pos = body_start + size + (size & 1);

        let (name, member_data) = if let Some(len_str) = name_field.strip_prefix("#1/") {
            // BSD extended name: stored at the front of the member body.
            let name_len: usize = len_str
                .parse()
                .map_err(|_| malformed("bad extended name length"))?;
            let name_bytes = body
                .get(..name_len)
                .ok_or_else(|| malformed("extended name overruns member"))?;
            let name = String::from_utf8_lossy(name_bytes)
                .trim_end_matches('\0')
                .to_string();
            (name, &body[name_len..])
        } else if name_field == "//" {
            long_names = body;
            continue;
        } else if name_field == "/" || name_field == "/SYM64/" {
            // GNU symbol table, not a regular member.
            continue;
        } else if let Some(offset_str) = name_field.strip_prefix('/') {
            let offset: usize = offset_str
                .parse()
                .map_err(|_| malformed("bad long-name reference"))?;
            let entry = long_names
                .get(offset..)
                .ok_or_else(|| malformed("long-name reference out of range"))?;
            let end = entry
                .iter()
                .position(|&b| b == b'\n')
                .ok_or_else(|| malformed("unterminated long-name entry"))?;
            let name = String::from_utf8_lossy(&entry[..end])
                .trim_end_matches('/')
                .to_string();
            (name, body)
        } else {
            (name_field.trim_end_matches('/').to_string(), body)
        };

        // BSD archives carry their symbol index as an ordinary member.
        if name == "__.SYMDEF" || name == "__.SYMDEF SORTED" || name == "__.SYMDEF_64" {
            continue;
        }

        members.push(ArchiveMember {
            name,
            data: member_data,
        });
    }

    Ok(members)
}

fn push_header(out: &mut Vec<u8>, name_field: &str, size: usize) {
    // name:16 mtime:12 uid:6 gid:6 mode:8 size:10, deterministic fields
    out.extend_from_slice(format!("{name_field:<16}").as_bytes());
    out.extend_from_slice(format!("{:<12}", 0).as_bytes());
    out.extend_from_slice(format!("{:<6}", 0).as_bytes());
    out.extend_from_slice(format!("{:<6}", 0).as_bytes());
    out.extend_from_slice(format!("{:<8}", 644).as_bytes());
    out.extend_from_slice(format!("{size:<10}").as_bytes());
    out.extend_from_slice(b"`\n");
}

fn build_gnu(members: &[NewArchiveMember]) -> Vec<u8> {
    let mut name_table = Vec::new();
    let mut name_fields = Vec::with_capacity(members.len());
    for member in members {
        if member.name.len() > 15 {
            name_fields.push(format!("/{}", name_table.len()));
            name_table.extend_from_slice(member.name.as_bytes());
            name_table.extend_from_slice(b"/\n");
        } else {
            name_fields.push(format!("{}/", member.name));
        }
    }

    let mut out = Vec::new();
    out.extend_from_slice(GLOBAL_MAGIC);

    if !name_table.is_empty() {
        if name_table.len() & 1 == 1 {
            name_table.push(b'\n');
        }
        out.extend_from_slice(format!("{:<48}", "//").as_bytes());
        out.extend_from_slice(format!("{:<10}", name_table.len()).as_bytes());
        out.extend_from_slice(b"`\n");
        out.extend_from_slice(&name_table);
    }

    for (member, name_field) in members.iter().zip(&name_fields) {
        push_header(&mut out, name_field, member.data.len());
        out.extend_from_slice(&member.data);
        if member.data.len() & 1 == 1 {
            out.push(b'\n');
        }
    }
    out
}

fn build_darwin(members: &[NewArchiveMember]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(GLOBAL_MAGIC);
    for member in members {
        // Name bytes live at the front of the body, null-padded to 8.
        let padded = member.name.len().div_ceil(8) * 8;
        push_header(
            &mut out,
            &format!("#1/{padded}"),
            padded + member.data.len(),
        );
        out.extend_from_slice(member.name.as_bytes());
        out.resize(out.len() + (padded - member.name.len()), 0);
        out.extend_from_slice(&member.data);
        if (padded + member.data.len()) & 1 == 1 {
            out.push(b'\n');
        }
    }
    out
}

/// Write a new archive of the given kind. An empty member list yields a
/// valid empty archive.
pub fn write_archive(path: &Path, members: &[NewArchiveMember], kind: ArchiveKind) -> Result<()> {
    let bytes = match kind {
        ArchiveKind::Gnu => build_gnu(members),
        ArchiveKind::Darwin => build_darwin(members),
    };
    std::fs::write(path, bytes).map_err(|source| Error::FileIo {
        path: path.to_path_buf(),
        source,
    })
}
