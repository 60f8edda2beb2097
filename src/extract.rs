//! C4: extract archive entries into a sandboxed target directory with
//! path-traversal prevention. Grounded on
//! `UpdateStore::ExtractTarBz2Internal` in the original source: lexical
//! normalization, a `canonical(target) + '/'` string-prefix containment
//! check, and a zero-entries failure. Writes go through a `cap_std::fs::Dir`
//! opened on the target so an escaping path is rejected twice over — by
//! the string check the source uses, and structurally by the directory
//! capability (the design note's "defense in depth" on symlink escapes).

use std::io::Read;
use std::path::{Component, Path, PathBuf};

use bzip2::read::BzDecoder;
use cap_std_ext::cap_std;
use cap_std_ext::cap_std::fs::Dir;
use cap_std_ext::dirext::CapStdExtDirExt;

use crate::error::{AduError, Result};

/// Lexically normalizes an archive entry path: resolves `.`/`..`
/// components without touching the filesystem, rebases absolute paths
/// under the target, and rejects entries that normalize to empty or `.`.
fn normalize_entry_path(raw: &str) -> Option<PathBuf> {
    // Mirrors `lexically_normal()`: a leading `..` with nothing to
    // cancel stays in the result as a literal component, rather than
    // being silently dropped. It is the later containment check that
    // rejects it, exactly as the C++ original relies on.
    let mut segments: Vec<&str> = Vec::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => segments.push(part.to_str()?),
            Component::ParentDir => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ => segments.push(".."),
            },
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.iter().collect())
    }
}

/// Collapses `.`/`..` components lexically, without touching the
/// filesystem, preserving a leading root.
fn lexically_normal(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(_) => out.push(component.as_os_str()),
            Component::ParentDir => {
                if out.components().next_back().map(|c| matches!(c, Component::Normal(_))) == Some(true) {
                    out.pop();
                } else if !matches!(out.components().next_back(), Some(Component::RootDir)) {
                    out.push("..");
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => out.push(component.as_os_str()),
        }
    }
    out
}

/// `dest` must live under `canonical_target`, checked the same way the
/// source does: a string-prefix comparison against `canonical_target +
/// '/'`, after collapsing `dest`'s `.`/`..` components lexically so a
/// path like `target/../../etc/passwd` cannot pass as a string prefix
/// match.
fn is_contained(canonical_target: &Path, dest: &Path) -> bool {
    let normalized_dest = lexically_normal(dest);
    let target_str = format!("{}/", canonical_target.to_string_lossy());
    let dest_str = format!("{}/", normalized_dest.to_string_lossy());
    dest_str.starts_with(&target_str)
}

#[derive(Debug)]
pub struct ExtractStats {
    pub files_extracted: usize,
}

/// Extracts every entry from `archive` into `target`, which is created
/// if it does not already exist.
pub fn extract_tar_bz2(
    archive: &mut tar::Archive<BzDecoder<Box<dyn Read>>>,
    target: &Path,
) -> Result<ExtractStats> {
    std::fs::create_dir_all(target).map_err(|source| AduError::WriteError {
        path: target.to_owned(),
        source,
    })?;
    let canonical_target = target
        .canonicalize()
        .map_err(|source| AduError::ReadError {
            path: target.to_owned(),
            source,
        })?;
    let dir = Dir::open_ambient_dir(&canonical_target, cap_std::ambient_authority())
        .map_err(|source| AduError::ReadError {
            path: canonical_target.clone(),
            source,
        })?;

    let mut files_extracted = 0usize;
    let entries = archive.entries().map_err(|source| AduError::ReadError {
        path: target.to_owned(),
        source,
    })?;

    for entry in entries {
        let mut entry = entry.map_err(|source| AduError::ReadError {
            path: target.to_owned(),
            source,
        })?;
        let raw_path = entry.path().map_err(|source| AduError::ReadError {
            path: target.to_owned(),
            source,
        })?;
        let raw_path_str = raw_path.to_string_lossy().into_owned();

        let rel = normalize_entry_path(&raw_path_str)
            .ok_or_else(|| AduError::UnsafePath(raw_path_str.clone()))?;
        let dest = canonical_target.join(&rel);
        if !is_contained(&canonical_target, &dest) {
            return Err(AduError::UnsafePath(raw_path_str));
        }

        match entry.header().entry_type() {
            tar::EntryType::Directory => {
                dir.create_dir_all(&rel).map_err(|source| AduError::WriteError {
                    path: dest.clone(),
                    source,
                })?;
            }
            tar::EntryType::Regular | tar::EntryType::Continuous => {
                if let Some(parent) = rel.parent() {
                    if !parent.as_os_str().is_empty() {
                        dir.create_dir_all(parent)
                            .map_err(|source| AduError::WriteError {
                                path: dest.clone(),
                                source,
                            })?;
                    }
                }
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf).map_err(|source| AduError::ReadError {
                    path: dest.clone(),
                    source,
                })?;
                dir.atomic_write(&rel, &buf).map_err(|source| AduError::WriteError {
                    path: dest.clone(),
                    source,
                })?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let mode = entry.header().mode().unwrap_or(0o644);
                    if let Ok(f) = dir.open(&rel) {
                        let _ = f.set_permissions(cap_std_ext::cap_std::fs::Permissions::from_std(
                            std::fs::Permissions::from_mode(mode),
                        ));
                    }
                }
                files_extracted += 1;
            }
            _ => {
                log::warn!("skipping unsupported archive entry type for {raw_path_str}");
            }
        }
    }

    if files_extracted == 0 {
        return Err(AduError::EmptyArchive);
    }

    Ok(ExtractStats { files_extracted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bzip2::write::BzEncoder;
    use std::io::Write;

    fn archive_of(entries: &[(&str, &[u8])]) -> tar::Archive<BzDecoder<Box<dyn Read>>> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            // Write the raw name bytes directly: `set_path` refuses `..`
            // components, but a hostile archive is exactly what these
            // tests need to construct.
            let name_bytes = name.as_bytes();
            header.as_old_mut().name[..name_bytes.len()].copy_from_slice(name_bytes);
            header.set_cksum();
            builder.append(&header, *data).unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();
        let mut encoder = BzEncoder::new(Vec::new(), bzip2::Compression::fast());
        encoder.write_all(&tar_bytes).unwrap();
        let bz_bytes = encoder.finish().unwrap();
        let reader: Box<dyn Read> = Box::new(std::io::Cursor::new(bz_bytes));
        tar::Archive::new(BzDecoder::new(reader))
    }

    #[test]
    fn extracts_plain_entries() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        let mut archive = archive_of(&[("a.txt", b"hello"), ("sub/b.txt", b"world")]);
        let stats = extract_tar_bz2(&mut archive, &target).unwrap();
        assert_eq!(stats.files_extracted, 2);
        assert_eq!(std::fs::read(target.join("a.txt")).unwrap(), b"hello");
        assert_eq!(std::fs::read(target.join("sub/b.txt")).unwrap(), b"world");
    }

    #[test]
    fn rejects_parent_directory_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        let mut archive = archive_of(&[("../../etc/passwd", b"evil")]);
        let err = extract_tar_bz2(&mut archive, &target).unwrap_err();
        assert!(matches!(err, AduError::UnsafePath(_)));
        assert!(!dir.path().join("etc/passwd").exists());
    }

    #[test]
    fn empty_archive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        let mut archive = archive_of(&[]);
        assert!(matches!(
            extract_tar_bz2(&mut archive, &target),
            Err(AduError::EmptyArchive)
        ));
    }

    #[test]
    fn normalize_rejects_dot_and_empty() {
        assert!(normalize_entry_path(".").is_none());
        assert!(normalize_entry_path("").is_none());
        assert!(normalize_entry_path("a/b").is_some());
    }
}
