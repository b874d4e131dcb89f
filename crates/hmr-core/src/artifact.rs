// SPDX-License-Identifier: Apache-2.0
//! Content-addressed build artifacts (`spec.md` §3 "Artifact", §6 "Artifact
//! file format").
//!
//! Fingerprinting follows the content-addressing discipline laid out in
//! `echo_cas`: the hash *is* the identity, computed purely from content with
//! no additional domain separation beyond what the fingerprint inputs
//! already encode.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::HmrError;

/// Literal magic for shader artifacts per `spec.md` §6 (`"SHDR"`).
pub const MAGIC_SHADER: u32 = 0x5348_4452;
/// Current artifact header format version.
pub const HEADER_VERSION: u32 = 1;

/// Stable hash over an artifact's inputs: source content, dependency
/// content hashes, compile flags, target ABI, and compiler version.
///
/// Two builds with identical fingerprints MUST produce byte-identical
/// artifacts (`spec.md` §3 determinism invariant; `spec.md` §8 "for all
/// artifacts A with fingerprint F... determinism").
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; 32]);

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Inputs that determine a [`Fingerprint`]. Order-independent for the
/// `dependency_hashes` slice (the builder sorts before hashing) so that
/// dependency discovery order never affects the fingerprint.
#[derive(Debug, Clone)]
pub struct FingerprintInputs<'a> {
    /// Raw bytes of the source file being built.
    pub source_content: &'a [u8],
    /// Content hashes of every dependency this build reads transitively.
    pub dependency_hashes: &'a [Fingerprint],
    /// Compile flags, joined in a stable, caller-chosen order.
    pub compile_flags: &'a [&'a str],
    /// Target ABI descriptor string (e.g. `"metal-macos-arm64"`).
    pub target_abi: &'a str,
    /// Compiler/toolchain version string.
    pub compiler_version: &'a str,
}

impl Fingerprint {
    /// Compute the fingerprint for a build from its inputs.
    #[must_use]
    pub fn compute(inputs: &FingerprintInputs<'_>) -> Self {
        let mut sorted_deps: Vec<Fingerprint> = inputs.dependency_hashes.to_vec();
        sorted_deps.sort_unstable();

        let mut hasher = blake3::Hasher::new();
        hasher.update(inputs.source_content);
        for dep in &sorted_deps {
            hasher.update(&dep.0);
        }
        for flag in inputs.compile_flags {
            hasher.update(flag.as_bytes());
            hasher.update(b"\0");
        }
        hasher.update(inputs.target_abi.as_bytes());
        hasher.update(b"\0");
        hasher.update(inputs.compiler_version.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }
}

/// ABI compatibility level an artifact declares relative to its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbiCompatibility {
    /// Drop-in replacement; no symbol changes.
    Identical,
    /// Additive changes only (new exports, no removed/changed exports).
    Additive,
    /// Exported symbol signatures changed; callers must re-resolve.
    Incompatible,
}

/// An immutable, content-addressed compiled binary (`spec.md` §3 "Artifact").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Content-addressed identity.
    pub fingerprint: Fingerprint,
    /// On-disk path, conventionally `<cache_root>/binaries/<fingerprint>.bin`.
    pub path: std::path::PathBuf,
    /// Size of the artifact's code section in bytes.
    pub size: u64,
    /// Exported symbol names.
    pub exported_symbols: Vec<String>,
    /// Opaque ABI descriptor (target triple, calling convention, etc.).
    pub abi_descriptor: Vec<u8>,
    /// Compatibility level relative to the previous artifact for this module.
    pub compatibility: AbiCompatibility,
    /// Wall-clock build time for this artifact.
    pub build_time: std::time::Duration,
}

/// On-disk artifact header (`spec.md` §6 "Artifact file format").
///
/// Layout: `magic:u32, version:u32, fingerprint:[u8; 32],
/// abi_descriptor_length:u32, abi_descriptor_bytes:.., code_length:u64,
/// code_bytes:..`. All integers little-endian.
#[derive(Debug, Clone)]
pub struct ArtifactHeader {
    /// Magic number identifying the artifact kind (see [`MAGIC_SHADER`]).
    pub magic: u32,
    /// Header format version; currently [`HEADER_VERSION`].
    pub version: u32,
    /// Content fingerprint.
    pub fingerprint: Fingerprint,
    /// Opaque ABI descriptor bytes.
    pub abi_descriptor: Vec<u8>,
    /// Compiled code bytes.
    pub code: Vec<u8>,
}

impl ArtifactHeader {
    /// Serialize this header to `writer` in the on-disk format.
    ///
    /// # Errors
    /// Returns [`HmrError::Io`] if writing fails. The error's `path` field is
    /// left empty; callers writing to a real file should wrap with their own
    /// path context if they need it.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), HmrError> {
        let abi_len = u32::try_from(self.abi_descriptor.len())
            .map_err(|_| HmrError::InvalidArtifactHeader("abi descriptor too large".into()))?;
        let code_len = self.code.len() as u64;

        let io_err = |source: std::io::Error| HmrError::Io {
            path: std::path::PathBuf::new(),
            source,
        };

        writer.write_all(&self.magic.to_le_bytes()).map_err(io_err)?;
        writer
            .write_all(&self.version.to_le_bytes())
            .map_err(io_err)?;
        writer.write_all(&self.fingerprint.0).map_err(io_err)?;
        writer.write_all(&abi_len.to_le_bytes()).map_err(io_err)?;
        writer
            .write_all(&self.abi_descriptor)
            .map_err(io_err)?;
        writer.write_all(&code_len.to_le_bytes()).map_err(io_err)?;
        writer.write_all(&self.code).map_err(io_err)?;
        Ok(())
    }

    /// Parse a header from `reader`, validating magic and version before
    /// trusting any subsequent field (`spec.md` §6: "Readers MUST verify
    /// magic and version before trusting any field").
    ///
    /// # Errors
    /// Returns [`HmrError::InvalidArtifactHeader`] if the magic or version
    /// does not match, or [`HmrError::Io`] on a read failure.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, HmrError> {
        let io_err = |source: std::io::Error| HmrError::Io {
            path: std::path::PathBuf::new(),
            source,
        };

        let mut u32_buf = [0u8; 4];
        let mut u64_buf = [0u8; 8];

        reader.read_exact(&mut u32_buf).map_err(io_err)?;
        let magic = u32::from_le_bytes(u32_buf);

        reader.read_exact(&mut u32_buf).map_err(io_err)?;
        let version = u32::from_le_bytes(u32_buf);
        if version != HEADER_VERSION {
            return Err(HmrError::InvalidArtifactHeader(format!(
                "unsupported header version {version}"
            )));
        }

        let mut fp_bytes = [0u8; 32];
        reader.read_exact(&mut fp_bytes).map_err(io_err)?;
        let fingerprint = Fingerprint(fp_bytes);

        reader.read_exact(&mut u32_buf).map_err(io_err)?;
        let abi_len = u32::from_le_bytes(u32_buf) as usize;
        let mut abi_descriptor = vec![0u8; abi_len];
        reader.read_exact(&mut abi_descriptor).map_err(io_err)?;

        reader.read_exact(&mut u64_buf).map_err(io_err)?;
        let code_len = u64::from_le_bytes(u64_buf) as usize;
        let mut code = vec![0u8; code_len];
        reader.read_exact(&mut code).map_err(io_err)?;

        Ok(Self {
            magic,
            version,
            fingerprint,
            abi_descriptor,
            code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> ArtifactHeader {
        ArtifactHeader {
            magic: MAGIC_SHADER,
            version: HEADER_VERSION,
            fingerprint: Fingerprint([7u8; 32]),
            abi_descriptor: b"metal-macos-arm64".to_vec(),
            code: vec![0xde, 0xad, 0xbe, 0xef],
        }
    }

    #[test]
    fn header_round_trips_through_bytes() {
        let header = sample_header();
        let mut buf = Vec::new();
        header.write_to(&mut buf).expect("write header");

        let parsed = ArtifactHeader::read_from(buf.as_slice()).expect("parse header");
        assert_eq!(parsed.magic, header.magic);
        assert_eq!(parsed.version, header.version);
        assert_eq!(parsed.fingerprint.0, header.fingerprint.0);
        assert_eq!(parsed.abi_descriptor, header.abi_descriptor);
        assert_eq!(parsed.code, header.code);
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut header = sample_header();
        header.version = 99;
        let mut buf = Vec::new();
        header.write_to(&mut buf).expect("write header");
        let parsed = ArtifactHeader::read_from(buf.as_slice());
        assert!(parsed.is_err());
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let header = sample_header();
        let mut buf = Vec::new();
        header.write_to(&mut buf).expect("write header");
        buf.truncate(buf.len() - 2);
        assert!(ArtifactHeader::read_from(buf.as_slice()).is_err());
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let deps = [Fingerprint([1u8; 32]), Fingerprint([2u8; 32])];
        let inputs = FingerprintInputs {
            source_content: b"void main() {}",
            dependency_hashes: &deps,
            compile_flags: &["-O2"],
            target_abi: "metal-macos-arm64",
            compiler_version: "1.0.0",
        };
        let a = Fingerprint::compute(&inputs);
        let b = Fingerprint::compute(&inputs);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_is_independent_of_dependency_order() {
        let deps_a = [Fingerprint([1u8; 32]), Fingerprint([2u8; 32])];
        let deps_b = [Fingerprint([2u8; 32]), Fingerprint([1u8; 32])];
        let base = FingerprintInputs {
            source_content: b"void main() {}",
            dependency_hashes: &deps_a,
            compile_flags: &["-O2"],
            target_abi: "metal-macos-arm64",
            compiler_version: "1.0.0",
        };
        let mut reordered = base.clone();
        reordered.dependency_hashes = &deps_b;

        assert_eq!(Fingerprint::compute(&base), Fingerprint::compute(&reordered));
    }

    #[test]
    fn fingerprint_changes_with_source_content() {
        let inputs_a = FingerprintInputs {
            source_content: b"a",
            dependency_hashes: &[],
            compile_flags: &[],
            target_abi: "abi",
            compiler_version: "1",
        };
        let mut inputs_b = inputs_a.clone();
        inputs_b.source_content = b"b";
        assert_ne!(Fingerprint::compute(&inputs_a), Fingerprint::compute(&inputs_b));
    }

    proptest::proptest! {
        #[test]
        fn header_round_trip_preserves_arbitrary_payloads(
            abi in proptest::collection::vec(proptest::num::u8::ANY, 0..64),
            code in proptest::collection::vec(proptest::num::u8::ANY, 0..256),
            fp_byte in proptest::num::u8::ANY,
        ) {
            let header = ArtifactHeader {
                magic: MAGIC_SHADER,
                version: HEADER_VERSION,
                fingerprint: Fingerprint([fp_byte; 32]),
                abi_descriptor: abi,
                code,
            };
            let mut buf = Vec::new();
            header.write_to(&mut buf).unwrap();
            let parsed = ArtifactHeader::read_from(buf.as_slice()).unwrap();
            proptest::prop_assert_eq!(parsed.abi_descriptor, header.abi_descriptor);
            proptest::prop_assert_eq!(parsed.code, header.code);
        }
    }
}
