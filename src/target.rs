//! Bundle entry identifiers.
//!
//! Every slice in a container is named by an entry id of the shape
//! `kind-triple[-processor-id]`, e.g.
//! `host-x86_64-unknown-linux-gnu-` or `hip-amdgcn-amd-amdhsa--gfx906`.
//! This module parses those ids and implements the compatibility relation
//! between a stored entry and a requested target.

use crate::config::BundlerConfig;
use crate::targetid;
use std::fmt;
use tracing::debug;

/// Architectures the triple parser recognizes. Anything else is treated as
/// an unknown architecture, which makes the triple invalid.
const KNOWN_ARCHES: &[&str] = &[
    "aarch64",
    "aarch64_be",
    "amdgcn",
    "arm",
    "armeb",
    "i386",
    "i486",
    "i586",
    "i686",
    "loongarch64",
    "mips",
    "mips64",
    "mips64el",
    "mipsel",
    "nvptx",
    "nvptx64",
    "powerpc",
    "powerpc64",
    "powerpc64le",
    "r600",
    "riscv32",
    "riscv64",
    "s390x",
    "sparc",
    "sparcv9",
    "spir",
    "spir64",
    "spirv32",
    "spirv64",
    "thumb",
    "thumbeb",
    "wasm32",
    "wasm64",
    "x86_64",
];

fn is_known_arch(arch: &str) -> bool {
    KNOWN_ARCHES.contains(&arch) || arch.starts_with("armv") || arch.starts_with("thumbv")
}

/// A target triple `(arch, vendor, os, env)`.
///
/// The environment component is always materialized, as the empty string
/// when the source form omits it, so every canonical triple carries four
/// components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple {
    pub arch: String,
    pub vendor: String,
    pub os: String,
    pub env: String,
}

impl Triple {
    /// Parse up to four `-`-separated components; absent components become
    /// empty strings.
    pub fn parse(triple: &str) -> Self {
        let mut parts = triple.splitn(4, '-');
        let mut next = || parts.next().unwrap_or("").to_string();
        Triple {
            arch: next(),
            vendor: next(),
            os: next(),
            env: next(),
        }
    }

    /// Whether this triple names a usable target: a nonempty canonical form
    /// with a recognized architecture.
    pub fn is_valid(&self) -> bool {
        !self.arch.is_empty() && is_known_arch(&self.arch)
    }

    /// Two triples are compatible when their canonical forms are equal.
    pub fn is_compatible_with(&self, other: &Triple) -> bool {
        self == other
    }
}

impl fmt::Display for Triple {
    /// Canonical form: all four components rejoined with `-`. An empty
    /// environment yields a trailing `-`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}-{}", self.arch, self.vendor, self.os, self.env)
    }
}

/// Parsed form of a bundle entry id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffloadTargetInfo {
    /// Offload model: `host`, `openmp`, `hip` or `hipv4`.
    pub kind: String,
    /// Machine ABI the slice was compiled for.
    pub triple: Triple,
    /// Accelerator processor id with optional feature tags, empty for
    /// entries without one.
    pub target_id: String,
}

impl OffloadTargetInfo {
    /// Parse an entry id of the shape `kind-triple[:feat...]`.
    ///
    /// The segment after the last `-` is taken as a processor id when it
    /// begins with a recognized accelerator processor name; any `:`
    /// feature suffix then belongs to the processor id. Ids that carry a
    /// feature suffix but no recognized processor drop the suffix.
    pub fn parse(target: &str) -> Self {
        let (head, features) = match target.split_once(':') {
            Some((head, features)) => (head, Some(features)),
            None => (target, None),
        };

        let (before_tail, tail) = match head.rsplit_once('-') {
            Some(split) => split,
            None => ("", head),
        };

        if targetid::is_recognized_processor(tail) {
            let target_id = match features {
                Some(features) => format!("{tail}:{features}"),
                None => tail.to_string(),
            };
            let (kind, triple) = split_kind_triple(before_tail);
            OffloadTargetInfo {
                kind,
                triple,
                target_id,
            }
        } else {
            let (kind, triple) = split_kind_triple(head);
            OffloadTargetInfo {
                kind,
                triple,
                target_id: String::new(),
            }
        }
    }

    pub fn has_host_kind(&self) -> bool {
        self.kind == "host"
    }

    pub fn is_offload_kind_valid(&self) -> bool {
        matches!(self.kind.as_str(), "host" | "openmp" | "hip" | "hipv4")
    }

    /// Kind compatibility against a requested kind. Equal kinds are always
    /// compatible; with `hip_openmp_compatible` a HIP-family kind on either
    /// side is also compatible with `openmp` on the other.
    pub fn is_offload_kind_compatible(&self, requested: &str, hip_openmp_compatible: bool) -> bool {
        if self.kind == requested {
            return true;
        }
        if hip_openmp_compatible {
            let hip_with_openmp = starts_with_hip(&self.kind) && requested == "openmp";
            let openmp_with_hip = self.kind == "openmp" && starts_with_hip(requested);
            return hip_with_openmp || openmp_with_hip;
        }
        false
    }

    pub fn is_triple_valid(&self) -> bool {
        self.triple.is_valid()
    }

    /// Exact-match relation: equal kinds, compatible triples, equal
    /// processor ids.
    pub fn matches(&self, other: &OffloadTargetInfo) -> bool {
        self.kind == other.kind
            && self.triple.is_compatible_with(&other.triple)
            && self.target_id == other.target_id
    }
}

impl fmt::Display for OffloadTargetInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.kind, self.triple, self.target_id)
    }
}

fn split_kind_triple(head: &str) -> (String, Triple) {
    let (kind, triple) = head.split_once('-').unwrap_or((head, ""));
    // Parsing and re-joining materializes the optional env component, so
    // equivalent source spellings canonicalize to one form.
    (kind.to_string(), Triple::parse(triple))
}

fn starts_with_hip(kind: &str) -> bool {
    kind.len() >= 3 && kind[..3].eq_ignore_ascii_case("hip")
}

/// Whether the stored entry `code_object` satisfies the requested
/// `target`. Arguments are ordered: stored first, requested second.
pub fn is_code_object_compatible(
    code_object: &OffloadTargetInfo,
    target: &OffloadTargetInfo,
    config: &BundlerConfig,
) -> bool {
    // Compatible in case of exact match.
    if code_object.matches(target) {
        debug!(
            target: "CodeObjectCompatibility",
            "Compatible: exact match [CodeObject: {code_object}] [Target: {target}]"
        );
        return true;
    }

    // Incompatible if kinds or triples mismatch.
    if !code_object.is_offload_kind_compatible(&target.kind, config.hip_openmp_compatible)
        || !code_object.triple.is_compatible_with(&target.triple)
    {
        debug!(
            target: "CodeObjectCompatibility",
            "Incompatible: kind/triple mismatch [CodeObject: {code_object}] [Target: {target}]"
        );
        return false;
    }

    // Incompatible if processor ids are incompatible.
    if !targetid::is_compatible_target_id(&code_object.target_id, &target.target_id) {
        debug!(
            target: "CodeObjectCompatibility",
            "Incompatible: target IDs are incompatible [CodeObject: {code_object}] [Target: {target}]"
        );
        return false;
    }

    debug!(
        target: "CodeObjectCompatibility",
        "Compatible: code objects are compatible [CodeObject: {code_object}] [Target: {target}]"
    );
    true
}
