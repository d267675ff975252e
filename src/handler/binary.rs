//! The magic-tagged binary container.
//!
//! Wire format, all integers little-endian 8-byte unsigned:
//!
//! ```text
//! "__CLANG_OFFLOAD_BUNDLE__"      magic, 24 bytes
//! number of entries               u64
//! repeated per entry:
//!   payload offset                u64
//!   payload size                  u64
//!   entry id length               u64
//!   entry id bytes
//! payload bytes, placed at the recorded offsets
//! ```
//!
//! Payload offsets are aligned to the configured bundle alignment. A
//! buffer without the magic, or with a truncated or corrupt header, reads
//! as an empty container rather than an error.

use crate::config::BundlerConfig;
use crate::handler::{FileHandler, OutputFile};
use crate::{Error, Result, OFFLOAD_BUNDLE_MAGIC};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{Seek, SeekFrom, Write};
use tracing::debug;

/// Location of one stored payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BundleSlice {
    offset: u64,
    size: u64,
}

fn read_u64le(buf: &[u8], pos: &mut usize) -> Option<u64> {
    let bytes: [u8; 8] = buf.get(*pos..*pos + 8)?.try_into().ok()?;
    *pos += 8;
    Some(u64::from_le_bytes(bytes))
}

fn align_to(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// Handler for the binary container format.
pub struct BinaryFileHandler {
    config: BundlerConfig,

    /// Stored entries in header order: `(id, slice)`.
    bundles: Vec<(String, BundleSlice)>,
    /// Index of the next entry `read_bundle_start` hands out.
    next: usize,
    /// Entry currently between start and end, if any.
    current: Option<usize>,

    /// Write side: slice recorded per target while emitting the header.
    write_slices: Vec<(String, BundleSlice)>,
    current_write_target: Option<String>,
}

impl BinaryFileHandler {
    pub fn new(config: BundlerConfig) -> Self {
        Self {
            config,
            bundles: Vec::new(),
            next: 0,
            current: None,
            write_slices: Vec::new(),
            current_write_target: None,
        }
    }

    /// Record a parsed header entry. Duplicate ids are a malformed-input
    /// condition; the later entry replaces the earlier one.
    fn insert_bundle(&mut self, id: String, slice: BundleSlice) {
        if let Some(existing) = self.bundles.iter_mut().find(|(name, _)| *name == id) {
            debug_assert!(false, "duplicated entry id in bundle header");
            existing.1 = slice;
        } else {
            self.bundles.push((id, slice));
        }
    }

    fn parse_header(&mut self, input: &[u8]) -> Option<()> {
        let magic = input.get(..OFFLOAD_BUNDLE_MAGIC.len())?;
        if magic != OFFLOAD_BUNDLE_MAGIC.as_bytes() {
            return None;
        }

        let mut pos = OFFLOAD_BUNDLE_MAGIC.len();
        let count = read_u64le(input, &mut pos)?;

        for _ in 0..count {
            let offset = read_u64le(input, &mut pos)?;
            let size = read_u64le(input, &mut pos)?;
            let id_len = usize::try_from(read_u64le(input, &mut pos)?).ok()?;

            let id_bytes = input.get(pos..pos.checked_add(id_len)?)?;
            pos += id_len;
            let id = String::from_utf8_lossy(id_bytes).into_owned();

            // Offset zero would overlap the magic; out-of-range payloads
            // mean the recorded layout does not describe this buffer.
            if offset == 0 || offset.checked_add(size)? > input.len() as u64 {
                return None;
            }
            self.insert_bundle(id, BundleSlice { offset, size });
        }
        Some(())
    }
}

impl FileHandler for BinaryFileHandler {
    fn read_header(&mut self, input: &[u8]) -> Result<()> {
        self.bundles.clear();
        self.next = 0;
        self.current = None;

        if self.parse_header(input).is_none() {
            // Not a bundle, or a corrupt one: expose no entries at all.
            debug!("no parseable bundle header, treating input as empty container");
            self.bundles.clear();
        }
        Ok(())
    }

    fn read_bundle_start(&mut self, _input: &[u8]) -> Result<Option<String>> {
        if self.next >= self.bundles.len() {
            return Ok(None);
        }
        let index = self.next;
        self.current = Some(index);
        self.next += 1;
        Ok(Some(self.bundles[index].0.clone()))
    }

    fn read_bundle_end(&mut self, _input: &[u8]) -> Result<()> {
        debug_assert!(self.current.is_some(), "no bundle is being read");
        Ok(())
    }

    fn read_bundle(&mut self, out: &mut dyn Write, input: &[u8]) -> Result<()> {
        let index = self
            .current
            .ok_or_else(|| Error::Internal("no bundle is being read".to_string()))?;
        let slice = self.bundles[index].1;
        let start = slice.offset as usize;
        let end = start + slice.size as usize;
        let payload = input
            .get(start..end)
            .ok_or_else(|| Error::Internal("stored payload range out of bounds".to_string()))?;
        out.write_all(payload)?;
        Ok(())
    }

    fn write_header(&mut self, out: &mut OutputFile, inputs: &[Vec<u8>]) -> Result<()> {
        // Fixed part plus one (offset, size, id-length, id) record per
        // target.
        let mut header_size = (OFFLOAD_BUNDLE_MAGIC.len() + 8) as u64;
        for target in &self.config.target_names {
            header_size += 3 * 8 + target.len() as u64;
        }

        out.write_all(OFFLOAD_BUNDLE_MAGIC.as_bytes())?;
        out.write_u64::<LittleEndian>(self.config.target_names.len() as u64)?;

        self.write_slices.clear();
        for (target, input) in self.config.target_names.iter().zip(inputs) {
            header_size = align_to(header_size, self.config.bundle_alignment);
            let slice = BundleSlice {
                offset: header_size,
                size: input.len() as u64,
            };
            out.write_u64::<LittleEndian>(slice.offset)?;
            out.write_u64::<LittleEndian>(slice.size)?;
            self.write_slices.push((target.clone(), slice));
            header_size += slice.size;

            out.write_u64::<LittleEndian>(target.len() as u64)?;
            out.write_all(target.as_bytes())?;
        }
        Ok(())
    }

    fn write_bundle_start(&mut self, _out: &mut OutputFile, target: &str) -> Result<()> {
        self.current_write_target = Some(target.to_string());
        Ok(())
    }

    fn write_bundle(&mut self, out: &mut OutputFile, input: &[u8]) -> Result<()> {
        let target = self
            .current_write_target
            .as_deref()
            .ok_or_else(|| Error::Internal("no bundle is being written".to_string()))?;
        let slice = self
            .write_slices
            .iter()
            .find(|(name, _)| name == target)
            .map(|(_, slice)| *slice)
            .ok_or_else(|| Error::Internal(format!("no header entry for target {target}")))?;

        out.seek(SeekFrom::Start(slice.offset))?;
        out.write_all(input)?;
        Ok(())
    }

    fn write_bundle_end(&mut self, _out: &mut OutputFile, _target: &str) -> Result<()> {
        self.current_write_target = None;
        Ok(())
    }
}
