//! Shared configuration for all bundler operations.

use crate::{Error, Result};
use std::path::PathBuf;
use std::str::FromStr;

/// Sentinel for [`BundlerConfig::host_input_index`] meaning "no host input
/// designated".
pub const HOST_INPUT_UNSET: usize = usize::MAX;

/// The declared type of the input (and output) files of one bundler job.
///
/// Selects which container format the handler layer uses. Object and
/// archive types additionally sniff the first input and fall back to the
/// binary container when it is not a recognized object file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesType {
    /// Preprocessed C output
    I,
    /// Preprocessed C++ output
    Ii,
    /// Preprocessed CUDA output
    Cui,
    /// Preprocessed HIP output
    Hipi,
    /// Dependency info
    D,
    /// LLVM IR assembly
    Ll,
    /// Target assembly
    S,
    /// Preprocessed Fortran output
    F95,
    /// LLVM bitcode
    Bc,
    /// Precompiled header
    Gch,
    /// AST dump
    Ast,
    /// Object file
    O,
    /// Static library archive
    A,
}

impl FilesType {
    pub fn as_str(self) -> &'static str {
        match self {
            FilesType::I => "i",
            FilesType::Ii => "ii",
            FilesType::Cui => "cui",
            FilesType::Hipi => "hipi",
            FilesType::D => "d",
            FilesType::Ll => "ll",
            FilesType::S => "s",
            FilesType::F95 => "f95",
            FilesType::Bc => "bc",
            FilesType::Gch => "gch",
            FilesType::Ast => "ast",
            FilesType::O => "o",
            FilesType::A => "a",
        }
    }
}

impl FromStr for FilesType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "i" => Ok(FilesType::I),
            "ii" => Ok(FilesType::Ii),
            "cui" => Ok(FilesType::Cui),
            "hipi" => Ok(FilesType::Hipi),
            "d" => Ok(FilesType::D),
            "ll" => Ok(FilesType::Ll),
            "s" => Ok(FilesType::S),
            "f95" => Ok(FilesType::F95),
            "bc" => Ok(FilesType::Bc),
            "gch" => Ok(FilesType::Gch),
            "ast" => Ok(FilesType::Ast),
            "o" => Ok(FilesType::O),
            "a" => Ok(FilesType::A),
            _ => Err(Error::InvalidFilesType(value.to_string())),
        }
    }
}

impl std::fmt::Display for FilesType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration options and file lists for one bundler job.
///
/// `input_file_names`, `output_file_names` and `target_names` are aligned
/// by index for bundling and unbundling. `-` as an input path denotes
/// standard input.
#[derive(Debug, Clone)]
pub struct BundlerConfig {
    /// On unbundle, suppress missing-bundle and missing-host errors.
    pub allow_missing_bundles: bool,
    /// On bundle, use input 0 as the handler reference when no host input
    /// is designated.
    pub allow_no_host: bool,
    /// Print the external object-copy command instead of executing it.
    pub print_external_commands: bool,
    /// Treat HIP and OpenMP offload kinds as mutually compatible.
    pub hip_openmp_compatible: bool,

    /// Alignment of every payload offset in the binary container.
    pub bundle_alignment: u64,
    /// Declared type of the files being bundled or unbundled.
    pub files_type: FilesType,
    /// Index of the host input in `input_file_names`, or
    /// [`HOST_INPUT_UNSET`].
    pub host_input_index: usize,
    /// Path to the external object-copy tool.
    pub objcopy_path: PathBuf,

    pub input_file_names: Vec<PathBuf>,
    pub output_file_names: Vec<PathBuf>,
    pub target_names: Vec<String>,
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self {
            allow_missing_bundles: false,
            allow_no_host: false,
            print_external_commands: false,
            hip_openmp_compatible: false,
            bundle_alignment: 1,
            files_type: FilesType::Bc,
            host_input_index: HOST_INPUT_UNSET,
            objcopy_path: PathBuf::from("llvm-objcopy"),
            input_file_names: Vec::new(),
            output_file_names: Vec::new(),
            target_names: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_files_type_round_trip() {
        for value in [
            "i", "ii", "cui", "hipi", "d", "ll", "s", "f95", "bc", "gch", "ast", "o", "a",
        ] {
            let parsed: FilesType = value.parse().unwrap();
            assert_eq!(parsed.as_str(), value);
        }
    }

    #[test]
    fn test_files_type_unknown() {
        let err = "exe".parse::<FilesType>().unwrap_err();
        assert!(matches!(err, Error::InvalidFilesType(v) if v == "exe"));
    }
}
