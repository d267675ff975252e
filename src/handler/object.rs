//! The object-file container.
//!
//! Bundle entries live in sections of the host object whose names carry
//! the magic prefix; the section-name suffix is the entry id. The host
//! entry is a one-zero-byte sentinel section, with the whole fat object
//! standing in as the host payload.
//!
//! The read side walks the sections of a parsed object. The write side
//! emits nothing itself; once the last entry has been accepted it closes
//! the output and delegates to the external object-copy tool, which
//! stamps one section per target into a copy of the host object.

use crate::config::{BundlerConfig, HOST_INPUT_UNSET};
use crate::elf::Section;
use crate::handler::{FileHandler, OutputFile};
use crate::tempfiles::TempScope;
use crate::{Error, Result, OFFLOAD_BUNDLE_MAGIC};
use std::ffi::{OsStr, OsString};
use std::io::Write;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Handler for object-file containers.
pub struct ObjectFileHandler {
    config: BundlerConfig,
    sections: Vec<Section>,

    /// Read cursor into `sections`.
    next_section: usize,
    /// Section currently between start and end, if any.
    current_section: Option<usize>,

    /// Write side: total inputs and how many have been accepted so far.
    inputs_total: usize,
    inputs_processed: usize,
}

impl ObjectFileHandler {
    pub fn new(sections: Vec<Section>, config: BundlerConfig) -> Self {
        Self {
            config,
            sections,
            next_section: 0,
            current_section: None,
            inputs_total: 0,
            inputs_processed: 0,
        }
    }

    /// Compose the object-copy command line: one
    /// `--add-section`/`--set-section-flags` pair per target, the host
    /// object, and the output path.
    fn objcopy_args(&self, host_standins: &[OsString], output: &Path) -> Vec<OsString> {
        let mut args = Vec::new();
        for (target, standin) in self.config.target_names.iter().zip(host_standins) {
            let mut add = OsString::from(format!("--add-section={OFFLOAD_BUNDLE_MAGIC}{target}="));
            add.push(standin);
            args.push(add);
            args.push(OsString::from(format!(
                "--set-section-flags={OFFLOAD_BUNDLE_MAGIC}{target}=readonly,exclude"
            )));
        }
        args.push(OsString::from("--"));
        args.push(self.config.input_file_names[self.config.host_input_index].clone().into());
        args.push(output.as_os_str().to_os_string());
        args
    }

    fn execute_objcopy(&self, args: &[OsString]) -> Result<()> {
        let objcopy = &self.config.objcopy_path;
        if self.config.print_external_commands {
            let mut line = format!("\"{}\"", objcopy.display());
            for arg in args {
                line.push_str(&format!(" \"{}\"", arg.to_string_lossy()));
            }
            eprintln!("{line}");
            return Ok(());
        }

        debug!("running object-copy tool: {objcopy:?} {args:?}");
        let status = Command::new(objcopy)
            .args(args)
            .status()
            .map_err(|source| Error::FileIo {
                path: objcopy.clone(),
                source,
            })?;
        if !status.success() {
            let tool = objcopy
                .file_name()
                .unwrap_or_else(|| OsStr::new("objcopy"))
                .to_string_lossy()
                .into_owned();
            return Err(Error::ToolFailure {
                tool,
                code: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }
}

impl FileHandler for ObjectFileHandler {
    fn read_header(&mut self, _input: &[u8]) -> Result<()> {
        self.next_section = 0;
        self.current_section = None;
        Ok(())
    }

    fn read_bundle_start(&mut self, _input: &[u8]) -> Result<Option<String>> {
        while self.next_section < self.sections.len() {
            let index = self.next_section;
            self.next_section += 1;

            if let Some(id) = self.sections[index].name.strip_prefix(OFFLOAD_BUNDLE_MAGIC) {
                self.current_section = Some(index);
                return Ok(Some(id.to_string()));
            }
        }
        Ok(None)
    }

    fn read_bundle_end(&mut self, _input: &[u8]) -> Result<()> {
        debug_assert!(self.current_section.is_some(), "no bundle is being read");
        Ok(())
    }

    fn read_bundle(&mut self, out: &mut dyn Write, input: &[u8]) -> Result<()> {
        let index = self
            .current_section
            .ok_or_else(|| Error::Internal("no bundle is being read".to_string()))?;
        let section = &self.sections[index];
        let contents = input
            .get(section.offset..section.offset + section.size)
            .ok_or_else(|| Error::Internal("section range out of bounds".to_string()))?;

        // A one-zero-byte section is the host sentinel; the fat object
        // itself is the host payload.
        if contents == [0u8] {
            out.write_all(input)?;
        } else {
            out.write_all(contents)?;
        }
        Ok(())
    }

    fn write_header(&mut self, _out: &mut OutputFile, inputs: &[Vec<u8>]) -> Result<()> {
        if self.config.host_input_index == HOST_INPUT_UNSET
            || self.config.host_input_index >= inputs.len()
        {
            return Err(Error::Internal(
                "object bundling requires a host input".to_string(),
            ));
        }
        self.inputs_total = inputs.len();
        Ok(())
    }

    fn write_bundle_start(&mut self, _out: &mut OutputFile, _target: &str) -> Result<()> {
        self.inputs_processed += 1;
        Ok(())
    }

    fn write_bundle(&mut self, _out: &mut OutputFile, _input: &[u8]) -> Result<()> {
        Ok(())
    }

    fn write_bundle_end(&mut self, out: &mut OutputFile, _target: &str) -> Result<()> {
        debug_assert!(
            self.inputs_processed <= self.inputs_total,
            "processing more inputs than actually exist"
        );

        // Only the last accepted entry triggers the object-copy step.
        if self.inputs_processed != self.inputs_total {
            return Ok(());
        }

        // The tool writes the output file itself; release our handle so
        // the path is free.
        out.close()?;

        let mut temp_files = TempScope::new();
        let mut standins = Vec::with_capacity(self.inputs_total);
        for (index, input) in self.config.input_file_names.iter().enumerate() {
            if index == self.config.host_input_index {
                // The fat object doubles as the host payload, so its
                // section only carries the sentinel byte.
                standins.push(temp_files.create(Some(&[0u8]))?.into_os_string());
            } else {
                standins.push(input.clone().into_os_string());
            }
        }

        let args = self.objcopy_args(&standins, out.path());
        self.execute_objcopy(&args)
    }
}
