//! Top-level bundling and unbundling operations.

use crate::archive::{self, NewArchiveMember};
use crate::config::{BundlerConfig, HOST_INPUT_UNSET};
use crate::handler::{create_file_handler, OutputFile};
use crate::target::{is_code_object_compatible, OffloadTargetInfo};
use crate::{Error, Result};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;

/// Read one input in full. `-` denotes standard input.
fn read_input(path: &Path) -> Result<Vec<u8>> {
    let mapped = |source| Error::FileIo {
        path: path.to_path_buf(),
        source,
    };
    if path == Path::new("-") {
        let mut buffer = Vec::new();
        std::io::stdin().read_to_end(&mut buffer).map_err(mapped)?;
        Ok(buffer)
    } else {
        std::fs::read(path).map_err(mapped)
    }
}

fn create_output(path: &Path) -> Result<File> {
    File::create(path).map_err(|source| Error::FileIo {
        path: path.to_path_buf(),
        source,
    })
}

/// Extension for an extracted device slice: LLVM bitcode for AMD
/// processors, a cubin for NVIDIA ones, the member's own extension
/// otherwise.
fn device_file_extension(device: &str, member_name: &str) -> String {
    if device.contains("gfx") {
        ".bc".to_string()
    } else if device.contains("sm_") {
        ".cubin".to_string()
    } else {
        Path::new(member_name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default()
    }
}

/// Output member name for a slice extracted from an archive member.
/// `:` is replaced by `_` so feature tags stay portable across
/// filesystems.
fn device_member_name(member_name: &str, entry_id: &str, device: &str) -> String {
    let stem = Path::new(member_name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| member_name.to_string());
    let extension = device_file_extension(device, member_name);
    format!("{stem}-{entry_id}{extension}").replace(':', "_")
}

/// Driver for the four bundling operations. All inputs, outputs and
/// policies come from the [`BundlerConfig`].
pub struct OffloadBundler {
    config: BundlerConfig,
}

impl OffloadBundler {
    pub fn new(config: BundlerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BundlerConfig {
        &self.config
    }

    fn first_input_path(&self) -> Result<&Path> {
        self.config
            .input_file_names
            .first()
            .map(|path| path.as_path())
            .ok_or_else(|| Error::Internal("no input file given".to_string()))
    }

    fn output_path(&self, index: usize) -> Result<&Path> {
        self.config
            .output_file_names
            .get(index)
            .map(|path| path.as_path())
            .ok_or_else(|| Error::Internal("fewer output files than targets".to_string()))
    }

    /// Print the ids stored in the first input, one per line, to standard
    /// output.
    pub fn list_bundle_ids(&self) -> Result<()> {
        let stdout = std::io::stdout();
        self.list_bundle_ids_to(&mut stdout.lock())
    }

    /// As [`list_bundle_ids`](Self::list_bundle_ids), with an explicit
    /// sink.
    pub fn list_bundle_ids_to(&self, out: &mut dyn Write) -> Result<()> {
        let input = read_input(self.first_input_path()?)?;
        let mut handler = create_file_handler(&input, &self.config);
        handler.list_bundle_ids(out, &input)
    }

    /// Bundle the configured inputs, one per target, into the first
    /// output file.
    pub fn bundle_files(&self) -> Result<()> {
        let mut output = OutputFile::create(self.output_path(0)?)?;

        let mut inputs = Vec::with_capacity(self.config.input_file_names.len());
        for path in &self.config.input_file_names {
            inputs.push(read_input(path)?);
        }

        // The host input (or the first one, when no host is designated)
        // is the reference buffer for handler selection.
        let reference_index = if self.config.allow_no_host {
            0
        } else {
            self.config.host_input_index
        };
        let reference = inputs.get(reference_index).ok_or_else(|| {
            Error::Internal("no host input designated for bundling".to_string())
        })?;

        let mut handler = create_file_handler(reference, &self.config);
        handler.write_header(&mut output, &inputs)?;
        for (target, input) in self.config.target_names.iter().zip(&inputs) {
            handler.write_bundle_start(&mut output, target)?;
            handler.write_bundle(&mut output, input)?;
            handler.write_bundle_end(&mut output, target)?;
        }
        output.close()
    }

    /// Extract the slice for each configured target from the first input
    /// into the matching output file.
    pub fn unbundle_files(&self) -> Result<()> {
        let input = read_input(self.first_input_path()?)?;
        let mut handler = create_file_handler(&input, &self.config);
        handler.read_header(&input)?;

        let requested: Vec<OffloadTargetInfo> = self
            .config
            .target_names
            .iter()
            .map(|target| OffloadTargetInfo::parse(target))
            .collect();

        // Targets still waiting for a slice, in declared order.
        let mut worklist: Vec<usize> = (0..requested.len()).collect();
        let mut found_host_bundle = false;

        while !worklist.is_empty() {
            let id = match handler.read_bundle_start(&input)? {
                Some(id) => id,
                None => break,
            };
            let stored = OffloadTargetInfo::parse(&id);

            let matched = worklist.iter().position(|&index| {
                is_code_object_compatible(&stored, &requested[index], &self.config)
            });
            let position = match matched {
                Some(position) => position,
                None => continue,
            };
            let index = worklist[position];

            let mut output = create_output(self.output_path(index)?)?;
            handler.read_bundle(&mut output, &input)?;
            handler.read_bundle_end(&input)?;
            worklist.remove(position);

            if stored.has_host_kind() {
                found_host_bundle = true;
            }
        }

        // Nothing matched at all: assume the input itself is the host
        // bundle. Host targets receive the whole input, others an empty
        // file.
        if worklist.len() == requested.len() {
            debug!("no bundles found, treating the input as the host bundle");
            for &index in &worklist {
                let mut output = create_output(self.output_path(index)?)?;
                if requested[index].has_host_kind() {
                    output.write_all(&input)?;
                }
            }
            return Ok(());
        }

        if !self.config.allow_missing_bundles && !worklist.is_empty() {
            let sorted: BTreeSet<&str> = worklist
                .iter()
                .map(|&index| self.config.target_names[index].as_str())
                .collect();
            return Err(Error::MissingBundles(
                sorted.into_iter().map(str::to_string).collect(),
            ));
        }

        if !(found_host_bundle
            || self.config.host_input_index == HOST_INPUT_UNSET
            || self.config.allow_missing_bundles)
        {
            return Err(Error::MissingHost);
        }

        // Targets that stayed unmatched still get (empty) output files.
        for &index in &worklist {
            create_output(self.output_path(index)?)?;
        }
        Ok(())
    }

    /// Walk a static-library archive of bundles and write one archive of
    /// extracted device slices per configured target.
    pub fn unbundle_archive(&self) -> Result<()> {
        let archive_path = self.first_input_path()?;
        let archive_data = read_input(archive_path)?;
        let members = archive::parse_archive(&archive_data)?;

        let requested: Vec<OffloadTargetInfo> = self
            .config
            .target_names
            .iter()
            .map(|target| OffloadTargetInfo::parse(target))
            .collect();
        let mut collected: Vec<Vec<NewArchiveMember>> = vec![Vec::new(); requested.len()];

        for member in &members {
            let member_name = Path::new(&member.name)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| member.name.clone());

            let mut handler = create_file_handler(member.data, &self.config);
            handler.read_header(member.data)?;

            while let Some(id) = handler.read_bundle_start(member.data)? {
                let stored = OffloadTargetInfo::parse(&id);

                if stored.has_host_kind() {
                    // Host code is not extracted from archives.
                } else {
                    // One stored slice may serve several requested
                    // targets.
                    let compatible: Vec<usize> = (0..requested.len())
                        .filter(|&index| {
                            is_code_object_compatible(&stored, &requested[index], &self.config)
                        })
                        .collect();
                    if !compatible.is_empty() {
                        let mut payload = Vec::new();
                        handler.read_bundle(&mut payload, member.data)?;

                        let name = device_member_name(&member_name, &id, &stored.target_id);
                        for &index in &compatible {
                            collected[index].push(NewArchiveMember {
                                name: name.clone(),
                                data: payload.clone(),
                            });
                        }
                    }
                }

                handler.read_bundle_end(member.data)?;
            }
        }

        let kind = archive::host_default_kind();
        for (index, target) in self.config.target_names.iter().enumerate() {
            let output_path = self.output_path(index)?;
            if !collected[index].is_empty() {
                archive::write_archive(output_path, &collected[index], kind)?;
            } else if !self.config.allow_missing_bundles {
                return Err(Error::NoCompatibleForTarget {
                    target: target.clone(),
                    archive: archive_path.display().to_string(),
                });
            } else {
                // An empty archive keeps downstream link steps from
                // complaining about a missing input.
                archive::write_archive(output_path, &[], kind)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_file_extension() {
        assert_eq!(device_file_extension("gfx906", "libfoo.a"), ".bc");
        assert_eq!(device_file_extension("gfx90a:xnack+", "member.o"), ".bc");
        assert_eq!(device_file_extension("sm_80", "member.o"), ".cubin");
        assert_eq!(device_file_extension("", "member.o"), ".o");
        assert_eq!(device_file_extension("", "member"), "");
    }

    #[test]
    fn test_device_member_name() {
        assert_eq!(
            device_member_name("member1.o", "hip-amdgcn-amd-amdhsa--gfx906", "gfx906"),
            "member1-hip-amdgcn-amd-amdhsa--gfx906.bc"
        );
        assert_eq!(
            device_member_name(
                "kernels.o",
                "hipv4-amdgcn-amd-amdhsa--gfx90a:xnack+",
                "gfx90a:xnack+"
            ),
            "kernels-hipv4-amdgcn-amd-amdhsa--gfx90a_xnack+.bc"
        );
        assert_eq!(
            device_member_name("cuda.o", "openmp-nvptx64-nvidia-cuda--sm_80", "sm_80"),
            "cuda-openmp-nvptx64-nvidia-cuda--sm_80.cubin"
        );
    }
}
