//! Framing for preprocessed artifacts.
//!
//! Every binary artifact is laid out as
//! `magic (8) | version (u32) | payload length (u64) | payload | crc32 (u32)`,
//! all little-endian. Payload encodings live next to the types they encode.

use std::{
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
};

use crate::error::{LoadError, PreprocessError};

const VERSION: u32 = 1;
const HEADER_LEN: usize = 8 + 4 + 8;
const TRAILER_LEN: usize = 4;

/// The files produced by preprocessing, named `<base>.<extension>`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Artifact {
    Graph,
    EdgeLookup,
    Properties,
    Hierarchy,
    Partition,
    Cells,
}

impl Artifact {
    pub const ALL: [Artifact; 6] = [
        Artifact::Graph,
        Artifact::EdgeLookup,
        Artifact::Properties,
        Artifact::Hierarchy,
        Artifact::Partition,
        Artifact::Cells,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            Artifact::Graph => "graph",
            Artifact::EdgeLookup => "edge_lookup",
            Artifact::Properties => "properties",
            Artifact::Hierarchy => "hsgr",
            Artifact::Partition => "partition",
            Artifact::Cells => "cells",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Artifact::Graph => "graph",
            Artifact::EdgeLookup => "edge lookup",
            Artifact::Properties => "properties",
            Artifact::Hierarchy => "contraction hierarchy",
            Artifact::Partition => "partition",
            Artifact::Cells => "cell overlay",
        }
    }

    pub fn path(self, base: &Path) -> PathBuf {
        with_suffix(base, self.extension())
    }

    /// Signature of the framed binary artifacts. Properties are plain JSON
    /// and have none.
    fn magic(self) -> Option<&'static [u8; 8]> {
        match self {
            Artifact::Graph => Some(b"RMGRAPH\0"),
            Artifact::EdgeLookup => Some(b"RMEDGLK\0"),
            Artifact::Properties => None,
            Artifact::Hierarchy => Some(b"RMHSGR\0\0"),
            Artifact::Partition => Some(b"RMPARTN\0"),
            Artifact::Cells => Some(b"RMCELLS\0"),
        }
    }

    pub fn is_framed(self) -> bool {
        self.magic().is_some()
    }
}

fn with_suffix(base: &Path, extension: &str) -> PathBuf {
    let mut path = OsString::from(base.as_os_str());
    path.push(".");
    path.push(extension);
    PathBuf::from(path)
}

/// Writes `bytes` to `path` through a sibling temp file so readers never see
/// a partially written artifact.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PreprocessError> {
    let tmp = with_suffix(path, "tmp");
    let to_error = |source| PreprocessError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(to_error)?;
    }

    fs::write(&tmp, bytes).map_err(to_error)?;
    fs::rename(&tmp, path).map_err(to_error)
}

/// Frames the payload produced by `encode` and writes it to `<base>.<ext>`.
pub(crate) fn write_artifact(
    artifact: Artifact,
    base: &Path,
    encode: impl FnOnce(&mut Vec<u8>) -> io::Result<()>,
) -> Result<PathBuf, PreprocessError> {
    let path = artifact.path(base);
    let Some(magic) = artifact.magic() else {
        return Err(PreprocessError::Write {
            path,
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("the {} are not a framed artifact", artifact.name()),
            ),
        });
    };

    let mut payload = Vec::new();
    encode(&mut payload).map_err(|source| PreprocessError::Write {
        path: path.clone(),
        source,
    })?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    bytes.extend_from_slice(magic);
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&payload);
    bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());

    write_atomic(&path, &bytes)?;
    Ok(path)
}

/// Validates the framing of `bytes` and returns the payload.
pub(crate) fn payload(artifact: Artifact, bytes: &[u8]) -> Result<&[u8], LoadError> {
    let corrupt = |reason: String| LoadError::Corrupt {
        artifact: artifact.name(),
        reason,
    };

    let Some(magic) = artifact.magic() else {
        return Err(corrupt("not a framed artifact".into()));
    };

    if bytes.len() < HEADER_LEN + TRAILER_LEN {
        return Err(corrupt(format!("file is only {} bytes long", bytes.len())));
    }

    if &bytes[..8] != magic {
        return Err(corrupt("unexpected file signature".into()));
    }

    let version = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    if version != VERSION {
        return Err(corrupt(format!(
            "unsupported version {version}, expected {VERSION}"
        )));
    }

    let mut len = [0u8; 8];
    len.copy_from_slice(&bytes[12..20]);
    let len = u64::from_le_bytes(len) as usize;

    if bytes.len() - HEADER_LEN - TRAILER_LEN != len {
        return Err(corrupt(format!(
            "payload should be {len} bytes but {} are present",
            bytes.len() - HEADER_LEN - TRAILER_LEN
        )));
    }

    let payload = &bytes[HEADER_LEN..HEADER_LEN + len];
    let trailer = &bytes[HEADER_LEN + len..];
    let crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);

    if crc32fast::hash(payload) != crc {
        return Err(corrupt("checksum mismatch".into()));
    }

    Ok(payload)
}

/// Little-endian primitives on top of `io::Read`.
pub(crate) trait ReadLe: io::Read {
    fn read_u32_le(&mut self) -> io::Result<u32> {
        let mut bytes = [0u8; 4];
        self.read_exact(&mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_i32_le(&mut self) -> io::Result<i32> {
        let mut bytes = [0u8; 4];
        self.read_exact(&mut bytes)?;
        Ok(i32::from_le_bytes(bytes))
    }

    fn read_i64_le(&mut self) -> io::Result<i64> {
        let mut bytes = [0u8; 8];
        self.read_exact(&mut bytes)?;
        Ok(i64::from_le_bytes(bytes))
    }

    fn read_f32_le(&mut self) -> io::Result<f32> {
        let mut bytes = [0u8; 4];
        self.read_exact(&mut bytes)?;
        Ok(f32::from_le_bytes(bytes))
    }
}

impl<R: io::Read + ?Sized> ReadLe for R {}

/// Maps a decoding failure of `artifact` to a `LoadError`.
pub(crate) fn decode_error(artifact: Artifact) -> impl Fn(io::Error) -> LoadError {
    move |err| LoadError::Corrupt {
        artifact: artifact.name(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_paths_append_to_base() {
        let base = Path::new("data/monaco.v1");
        assert_eq!(
            Artifact::Graph.path(base),
            PathBuf::from("data/monaco.v1.graph")
        );
        assert_eq!(
            Artifact::Hierarchy.path(base),
            PathBuf::from("data/monaco.v1.hsgr")
        );
    }

    #[test]
    fn detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("net");

        let path = write_artifact(Artifact::Partition, &base, |out| {
            out.extend_from_slice(&[1, 2, 3, 4]);
            Ok(())
        })
        .unwrap();

        let mut bytes = fs::read(&path).unwrap();
        assert_eq!(payload(Artifact::Partition, &bytes).unwrap(), &[1, 2, 3, 4]);

        assert!(matches!(
            payload(Artifact::Cells, &bytes),
            Err(LoadError::Corrupt { .. })
        ));

        bytes[HEADER_LEN] ^= 0xff;
        assert!(matches!(
            payload(Artifact::Partition, &bytes),
            Err(LoadError::Corrupt { .. })
        ));

        assert!(matches!(
            payload(Artifact::Partition, &bytes[..bytes.len() - 1]),
            Err(LoadError::Corrupt { .. })
        ));
    }

    #[test]
    fn properties_are_not_framed() {
        assert!(!Artifact::Properties.is_framed());
        assert!(Artifact::ALL
            .iter()
            .filter(|&&artifact| artifact != Artifact::Properties)
            .all(|artifact| artifact.is_framed()));

        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("net");
        assert!(matches!(
            write_artifact(Artifact::Properties, &base, |_| Ok(())),
            Err(PreprocessError::Write { .. })
        ));
        assert!(!Artifact::Properties.path(&base).exists());

        let json = br#"{"profile":"car","nodes":0,"edges":0,"padding":"0123456789"}"#;
        assert!(matches!(
            payload(Artifact::Properties, json),
            Err(LoadError::Corrupt { .. })
        ));
    }
}
