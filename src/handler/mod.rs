//! Container handlers.
//!
//! A handler is a stateful reader/writer over one container. All three
//! container formats expose the same contract: a read side that walks
//! stored entries and a write side that emits one entry per configured
//! target. Handler selection is driven by the declared files type; object
//! and archive types additionally sniff the first input and fall back to
//! the binary container when it is not a recognized object file.

pub mod binary;
pub mod object;
pub mod text;

use crate::config::{BundlerConfig, FilesType};
use crate::elf;
use crate::{Error, Result};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub use binary::BinaryFileHandler;
pub use object::ObjectFileHandler;
pub use text::TextFileHandler;

/// The output file of a bundling operation.
///
/// Wraps the handle together with its path so the object handler can close
/// the file early and hand the path to the external object-copy tool.
#[derive(Debug)]
pub struct OutputFile {
    path: PathBuf,
    file: Option<File>,
}

impl OutputFile {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|source| Error::FileIo {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and drop the underlying handle. Further writes are an error.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }

    fn handle(&mut self) -> std::io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| std::io::Error::other("output file already closed"))
    }
}

impl Write for OutputFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.handle()?.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.handle()?.flush()
    }
}

impl Seek for OutputFile {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.handle()?.seek(pos)
    }
}

/// Streaming contract over one container.
///
/// Read side: `read_header` once, then `read_bundle_start` /
/// `read_bundle` / `read_bundle_end` per entry until `read_bundle_start`
/// returns `None`. A malformed or absent header is not an error; the
/// handler turns benign-empty and yields no entries, so callers can fall
/// back to host-only behavior.
///
/// Write side: `write_header` once, then `write_bundle_start` /
/// `write_bundle` / `write_bundle_end` per configured target, in the
/// order given by the configuration.
pub trait FileHandler {
    fn read_header(&mut self, input: &[u8]) -> Result<()>;

    /// Advance to the next stored entry and return its id, or `None` at
    /// the end of the container.
    fn read_bundle_start(&mut self, input: &[u8]) -> Result<Option<String>>;

    fn read_bundle_end(&mut self, input: &[u8]) -> Result<()>;

    /// Write the current entry's payload to `out`.
    fn read_bundle(&mut self, out: &mut dyn Write, input: &[u8]) -> Result<()>;

    fn write_header(&mut self, out: &mut OutputFile, inputs: &[Vec<u8>]) -> Result<()>;

    fn write_bundle_start(&mut self, out: &mut OutputFile, target: &str) -> Result<()>;

    fn write_bundle(&mut self, out: &mut OutputFile, input: &[u8]) -> Result<()>;

    fn write_bundle_end(&mut self, out: &mut OutputFile, target: &str) -> Result<()>;

    /// Read the header and print every stored id to `out`, one per line.
    fn list_bundle_ids(&mut self, out: &mut dyn Write, input: &[u8]) -> Result<()> {
        self.read_header(input)?;
        while let Some(id) = self.read_bundle_start(input)? {
            writeln!(out, "{id}")?;
            self.list_ids_callback(input, &id)?;
        }
        Ok(())
    }

    /// Per-handler hook run after listing one id. The text handler uses
    /// it to skip over the payload to the next end marker.
    fn list_ids_callback(&mut self, _input: &[u8], _id: &str) -> Result<()> {
        Ok(())
    }
}

/// Pick the handler for an object or archive files type: the object
/// handler when the reference input parses as an object file, the binary
/// handler otherwise.
fn create_object_file_handler(
    first_input: &[u8],
    config: &BundlerConfig,
) -> Box<dyn FileHandler> {
    match elf::parse_sections(first_input) {
        Some(sections) => Box::new(ObjectFileHandler::new(sections, config.clone())),
        None => Box::new(BinaryFileHandler::new(config.clone())),
    }
}

/// Pick the handler for the configured files type, using `first_input` as
/// the reference buffer for object-format sniffing.
pub fn create_file_handler(first_input: &[u8], config: &BundlerConfig) -> Box<dyn FileHandler> {
    match config.files_type {
        FilesType::I | FilesType::Ii | FilesType::Cui | FilesType::Hipi => {
            Box::new(TextFileHandler::new("//"))
        }
        FilesType::D | FilesType::S => Box::new(TextFileHandler::new("#")),
        FilesType::Ll => Box::new(TextFileHandler::new(";")),
        FilesType::F95 => Box::new(TextFileHandler::new("!")),
        FilesType::Bc | FilesType::Gch | FilesType::Ast => {
            Box::new(BinaryFileHandler::new(config.clone()))
        }
        FilesType::O | FilesType::A => create_object_file_handler(first_input, config),
    }
}
