//! The comment-delimited text container.
//!
//! Each entry is framed by marker lines built from the file kind's
//! line-comment prefix:
//!
//! ```text
//! \n<comment> __CLANG_OFFLOAD_BUNDLE____START__ <id>\n
//! payload bytes
//! \n<comment> __CLANG_OFFLOAD_BUNDLE____END__ <id>\n
//! ```
//!
//! There is no header; reading scans for start markers. A buffer without
//! markers simply yields no entries.

use crate::handler::{FileHandler, OutputFile};
use crate::{Result, OFFLOAD_BUNDLE_MAGIC};
use std::io::Write;

/// Byte-wise substring search starting at `from`.
fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| from + pos)
}

/// Handler for comment-delimited text containers.
pub struct TextFileHandler {
    start_marker: String,
    end_marker: String,
    /// Read cursor into the input buffer.
    read_pos: usize,
}

impl TextFileHandler {
    /// `comment` is the line-comment prefix of the file kind, e.g. `//`
    /// for preprocessed C++ or `;` for LLVM IR.
    pub fn new(comment: &str) -> Self {
        Self {
            start_marker: format!("\n{comment} {OFFLOAD_BUNDLE_MAGIC}__START__ "),
            end_marker: format!("\n{comment} {OFFLOAD_BUNDLE_MAGIC}__END__ "),
            read_pos: 0,
        }
    }
}

impl FileHandler for TextFileHandler {
    fn read_header(&mut self, _input: &[u8]) -> Result<()> {
        self.read_pos = 0;
        Ok(())
    }

    fn read_bundle_start(&mut self, input: &[u8]) -> Result<Option<String>> {
        let marker = match find(input, self.start_marker.as_bytes(), self.read_pos) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let id_start = marker + self.start_marker.len();
        let id_end = match find(input, b"\n", id_start) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        // The payload begins after the start-marker line.
        self.read_pos = id_end + 1;
        Ok(Some(
            String::from_utf8_lossy(&input[id_start..id_end]).into_owned(),
        ))
    }

    fn read_bundle_end(&mut self, input: &[u8]) -> Result<()> {
        // The cursor sits on the newline that opens the end marker; skip
        // the rest of that line.
        match find(input, b"\n", self.read_pos + 1) {
            Some(pos) => self.read_pos = pos + 1,
            None => self.read_pos = input.len(),
        }
        Ok(())
    }

    fn read_bundle(&mut self, out: &mut dyn Write, input: &[u8]) -> Result<()> {
        let payload_start = self.read_pos;
        let payload_end =
            find(input, self.end_marker.as_bytes(), self.read_pos).unwrap_or(input.len());
        self.read_pos = payload_end;
        out.write_all(&input[payload_start..payload_end])?;
        Ok(())
    }

    fn write_header(&mut self, _out: &mut OutputFile, _inputs: &[Vec<u8>]) -> Result<()> {
        Ok(())
    }

    fn write_bundle_start(&mut self, out: &mut OutputFile, target: &str) -> Result<()> {
        write!(out, "{}{target}\n", self.start_marker)?;
        Ok(())
    }

    fn write_bundle(&mut self, out: &mut OutputFile, input: &[u8]) -> Result<()> {
        out.write_all(input)?;
        Ok(())
    }

    fn write_bundle_end(&mut self, out: &mut OutputFile, target: &str) -> Result<()> {
        write!(out, "{}{target}\n", self.end_marker)?;
        Ok(())
    }

    fn list_ids_callback(&mut self, input: &[u8], _id: &str) -> Result<()> {
        // Listing has to walk over every payload to reach the next entry.
        self.read_pos =
            find(input, self.end_marker.as_bytes(), self.read_pos).unwrap_or(input.len());
        self.read_bundle_end(input)
    }
}
