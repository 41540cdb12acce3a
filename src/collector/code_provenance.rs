// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Code provenance from the memory mappings of the current process.
//!
//! The document sent is
//! `{"v1": [{"kind": ..., "name": ..., "version": ..., "paths": [...]}]}`,
//! with one entry for the executable and one per shared object.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use super::{CodeProvenanceCollector, CollectorError};

const PROC_SELF_MAPS: &str = "/proc/self/maps";

/// Error refreshing or rendering code provenance.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CodeProvenanceError {
    /// The maps file could not be read.
    #[error("failed to read memory mappings from {}: {source}", .path.display())]
    ReadMaps {
        /// The maps file.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
    /// The document could not be serialized.
    #[error("failed to serialize code provenance: {0}")]
    Json(#[from] serde_json::Error),
}

/// Kind of a [`Library`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LibraryKind {
    /// The main executable.
    #[serde(rename = "executable")]
    Executable,
    /// A shared object.
    #[serde(rename = "library")]
    Library,
}

/// One entry of the code provenance document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Library {
    /// Executable or shared object.
    pub kind: LibraryKind,
    /// File name without the `.so` suffix.
    pub name: String,
    /// The soname version (the part after `.so.`), or empty.
    pub version: String,
    /// Paths this library was mapped from.
    pub paths: Vec<String>,
}

#[derive(Serialize)]
struct Document<'a> {
    v1: &'a [Library],
}

/// A [`CodeProvenanceCollector`] backed by `/proc/self/maps`.
///
/// On platforms without procfs, only the executable is reported.
#[derive(Debug)]
pub struct ProcMapsCodeProvenance {
    maps_path: PathBuf,
    executable: Option<PathBuf>,
    libraries: Vec<Library>,
}

impl ProcMapsCodeProvenance {
    /// Read the mappings of the current process.
    pub fn new() -> Self {
        Self::from_maps_path(PROC_SELF_MAPS, std::env::current_exe().ok())
    }

    /// Read the mappings from `maps_path`, treating `executable` as the main
    /// executable.
    pub fn from_maps_path(maps_path: impl Into<PathBuf>, executable: Option<PathBuf>) -> Self {
        ProcMapsCodeProvenance {
            maps_path: maps_path.into(),
            executable,
            libraries: vec![],
        }
    }

    /// Libraries seen on the last refresh.
    pub fn libraries(&self) -> &[Library] {
        &self.libraries
    }

    fn read_libraries(&self) -> Result<Vec<Library>, CodeProvenanceError> {
        let mut libraries = vec![];
        if let Some(executable) = &self.executable {
            push_path(&mut libraries, LibraryKind::Executable, executable);
        }
        if !cfg!(target_os = "linux") && self.maps_path.as_path() == Path::new(PROC_SELF_MAPS) {
            return Ok(libraries);
        }

        let maps = std::fs::read_to_string(&self.maps_path).map_err(|source| {
            CodeProvenanceError::ReadMaps {
                path: self.maps_path.clone(),
                source,
            }
        })?;
        for path in maps.lines().filter_map(mapped_path) {
            if self.executable.as_deref() == Some(path) || !is_shared_object(path) {
                continue;
            }
            push_path(&mut libraries, LibraryKind::Library, path);
        }
        Ok(libraries)
    }
}

impl Default for ProcMapsCodeProvenance {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeProvenanceCollector for ProcMapsCodeProvenance {
    fn refresh(&mut self) -> Result<(), CollectorError> {
        self.libraries = self.read_libraries()?;
        tracing::debug!(libraries = self.libraries.len(), "refreshed code provenance");
        Ok(())
    }

    fn serialize_json(&self) -> Result<Vec<u8>, CollectorError> {
        let document = Document {
            v1: &self.libraries,
        };
        Ok(serde_json::to_vec(&document).map_err(CodeProvenanceError::from)?)
    }
}

/// The pathname column of a `/proc/<pid>/maps` line, if it names a file.
fn mapped_path(line: &str) -> Option<&Path> {
    // address perms offset dev inode pathname
    let path = line.splitn(6, char::is_whitespace).nth(5)?.trim_start();
    if !path.starts_with('/') || path.ends_with(" (deleted)") {
        return None;
    }
    Some(Path::new(path))
}

fn is_shared_object(path: &Path) -> bool {
    path.file_name()
        .and_then(|f| f.to_str())
        .is_some_and(|f| f.ends_with(".so") || f.contains(".so."))
}

fn push_path(libraries: &mut Vec<Library>, kind: LibraryKind, path: &Path) {
    let file_name = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (name, version) = match file_name.split_once(".so") {
        Some((name, rest)) => (name.to_owned(), rest.trim_start_matches('.').to_owned()),
        None => (file_name, String::new()),
    };
    let path = path.to_string_lossy().into_owned();

    match libraries
        .iter_mut()
        .find(|l| l.kind == kind && l.name == name && l.version == version)
    {
        Some(library) => {
            if !library.paths.contains(&path) {
                library.paths.push(path);
            }
        }
        None => libraries.push(Library {
            kind,
            name,
            version,
            paths: vec![path],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPS: &str = "\
55d0c0a00000-55d0c0a2c000 r--p 00000000 fd:01 1835032                    /usr/bin/my-service
55d0c0a2c000-55d0c0b00000 r-xp 0002c000 fd:01 1835032                    /usr/bin/my-service
55d0c1e5e000-55d0c1e7f000 rw-p 00000000 00:00 0                          [heap]
7f1a2c000000-7f1a2c021000 rw-p 00000000 00:00 0
7f1a2d200000-7f1a2d228000 r--p 00000000 fd:01 1835543                    /usr/lib/x86_64-linux-gnu/libc.so.6
7f1a2d228000-7f1a2d3bd000 r-xp 00028000 fd:01 1835543                    /usr/lib/x86_64-linux-gnu/libc.so.6
7f1a2d400000-7f1a2d500000 r-xp 00000000 fd:01 1835600                    /opt/lib/libasyncProfiler.so
7f1a2d500000-7f1a2d501000 r--p 00000000 fd:01 1835601                    /tmp/libgone.so (deleted)
7f1a2d600000-7f1a2d700000 r--p 00000000 fd:01 1835602                    /usr/share/locale/locale-archive
7ffd6a1c7000-7ffd6a1e8000 rw-p 00000000 00:00 0                          [stack]
7ffd6a1f3000-7ffd6a1f5000 r-xp 00000000 00:00 0                          [vdso]
";

    fn provenance_from(maps: &str) -> (tempfile::TempDir, ProcMapsCodeProvenance) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("maps");
        std::fs::write(&path, maps).unwrap();
        let provenance =
            ProcMapsCodeProvenance::from_maps_path(path, Some("/usr/bin/my-service".into()));
        (dir, provenance)
    }

    #[test]
    fn test_mapped_path() {
        assert_eq!(
            mapped_path("7f1a2d400000-7f1a2d500000 r-xp 00000000 fd:01 1835600   /opt/lib/a b.so"),
            Some(Path::new("/opt/lib/a b.so"))
        );
        assert_eq!(mapped_path("7f1a2c000000-7f1a2c021000 rw-p 00000000 00:00 0"), None);
        assert_eq!(
            mapped_path("7ffd6a1f3000-7ffd6a1f5000 r-xp 00000000 00:00 0    [vdso]"),
            None
        );
    }

    #[test]
    fn test_refresh_reads_libraries() {
        let (_dir, mut provenance) = provenance_from(MAPS);
        assert!(provenance.libraries().is_empty());
        provenance.refresh().unwrap();
        assert_eq!(
            provenance.libraries(),
            &[
                Library {
                    kind: LibraryKind::Executable,
                    name: "my-service".into(),
                    version: "".into(),
                    paths: vec!["/usr/bin/my-service".into()],
                },
                Library {
                    kind: LibraryKind::Library,
                    name: "libc".into(),
                    version: "6".into(),
                    paths: vec!["/usr/lib/x86_64-linux-gnu/libc.so.6".into()],
                },
                Library {
                    kind: LibraryKind::Library,
                    name: "libasyncProfiler".into(),
                    version: "".into(),
                    paths: vec!["/opt/lib/libasyncProfiler.so".into()],
                },
            ]
        );
    }

    #[test]
    fn test_serialize_json() {
        let (_dir, mut provenance) = provenance_from(MAPS);
        provenance.refresh().unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&provenance.serialize_json().unwrap()).unwrap();
        assert_eq!(json["v1"][0]["kind"], "executable");
        assert_eq!(json["v1"][1]["kind"], "library");
        assert_eq!(json["v1"][1]["name"], "libc");
        assert_eq!(json["v1"][1]["version"], "6");
        assert_eq!(
            json["v1"][1]["paths"],
            serde_json::json!(["/usr/lib/x86_64-linux-gnu/libc.so.6"])
        );
        assert_eq!(json["v1"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_missing_maps_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut provenance = ProcMapsCodeProvenance::from_maps_path(dir.path().join("nope"), None);
        let err = provenance.refresh().unwrap_err();
        assert!(err.to_string().contains("failed to read memory mappings"));
    }
}
