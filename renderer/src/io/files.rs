//! Build-folder file helpers.
//!
//! Paths exchanged with the generation service are folder-relative and use `/`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::core::types::FileChanges;

const SKIPPED_DIRS: [&str; 1] = [".git"];

/// Relative paths of every UTF-8 text file under `root`.
pub fn list_text_files(root: &Path) -> Result<BTreeSet<String>> {
    let mut files = BTreeSet::new();
    if !root.exists() {
        return Ok(files);
    }
    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || !(entry.file_type().is_dir()
                && SKIPPED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref()))
    });
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let bytes =
            fs::read(entry.path()).with_context(|| format!("read {}", entry.path().display()))?;
        if std::str::from_utf8(&bytes).is_err() {
            debug!(path = %entry.path().display(), "skipping non-text file");
            continue;
        }
        files.insert(relative_name(root, entry.path())?);
    }
    Ok(files)
}

/// Contents of `names` under `root`. Missing files are skipped.
pub fn read_files(root: &Path, names: &BTreeSet<String>) -> Result<BTreeMap<String, String>> {
    let mut contents = BTreeMap::new();
    for name in names {
        let path = root.join(name);
        if !path.is_file() {
            continue;
        }
        let text =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        contents.insert(name.clone(), text);
    }
    Ok(contents)
}

/// Every text file under `root` with its content.
pub fn read_all_text_files(root: &Path) -> Result<BTreeMap<String, String>> {
    let names = list_text_files(root)?;
    read_files(root, &names)
}

/// Write or delete files under `root`. Returns the names that were touched.
pub fn apply_file_changes(root: &Path, changes: &FileChanges) -> Result<BTreeSet<String>> {
    let mut touched = BTreeSet::new();
    for (name, content) in changes {
        let path = safe_join(root, name)?;
        match content {
            Some(content) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("create directory {}", parent.display()))?;
                }
                fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
            }
            None => {
                if path.exists() {
                    fs::remove_file(&path)
                        .with_context(|| format!("delete {}", path.display()))?;
                } else {
                    warn!(file = %name, "asked to delete a file that does not exist");
                }
            }
        }
        touched.insert(name.clone());
    }
    Ok(touched)
}

/// Replace `dest` with a copy of `src`, leaving out version-control metadata.
pub fn replace_dir_with_copy(src: &Path, dest: &Path) -> Result<()> {
    if dest.exists() {
        fs::remove_dir_all(dest).with_context(|| format!("remove {}", dest.display()))?;
    }
    copy_dir(src, dest)
}

/// Copy `src` into `dest` (created if missing), leaving out version-control metadata.
pub fn copy_dir(src: &Path, dest: &Path) -> Result<()> {
    if !src.is_dir() {
        bail!("folder {} does not exist", src.display());
    }
    fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;
    let walker = WalkDir::new(src).min_depth(1).into_iter().filter_entry(|entry| {
        !(entry.file_type().is_dir()
            && SKIPPED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref()))
    });
    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("relativize {}", entry.path().display()))?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("create {}", target.display()))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copy {} to {}", entry.path().display(), target.display()))?;
        }
    }
    Ok(())
}

pub fn delete_dir(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path).with_context(|| format!("delete {}", path.display()))?;
    }
    Ok(())
}

/// Names of the non-hidden sub-folders of `root`.
pub fn list_subfolders(root: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    if !root.is_dir() {
        return Ok(names);
    }
    for entry in fs::read_dir(root).with_context(|| format!("list {}", root.display()))? {
        let entry = entry.with_context(|| format!("list {}", root.display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.path().is_dir() && !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

fn relative_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("relativize {}", path.display()))?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

/// Reject names that would escape `root`.
fn safe_join(root: &Path, name: &str) -> Result<std::path::PathBuf> {
    let relative = Path::new(name);
    let escapes = relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
    if name.is_empty() || escapes {
        bail!("refusing to write file outside the target folder: '{name}'");
    }
    Ok(root.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_text_files_and_skips_git_and_binary() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("src/nested")).expect("mkdir");
        fs::create_dir_all(root.join(".git")).expect("mkdir");
        fs::write(root.join("src/nested/lib.rs"), "fn a() {}").expect("write");
        fs::write(root.join("README.md"), "hi").expect("write");
        fs::write(root.join(".git/HEAD"), "ref").expect("write");
        fs::write(root.join("blob.bin"), [0xff_u8, 0xfe, 0x00]).expect("write");

        let files = list_text_files(root).expect("list");
        let names: Vec<&str> = files.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["README.md", "src/nested/lib.rs"]);
    }

    #[test]
    fn apply_writes_and_deletes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::write(root.join("old.txt"), "bye").expect("write");

        let mut changes = FileChanges::new();
        changes.insert("dir/new.txt".to_string(), Some("hello".to_string()));
        changes.insert("old.txt".to_string(), None);
        let touched = apply_file_changes(root, &changes).expect("apply");

        assert_eq!(touched.len(), 2);
        assert_eq!(fs::read_to_string(root.join("dir/new.txt")).expect("read"), "hello");
        assert!(!root.join("old.txt").exists());
    }

    #[test]
    fn apply_rejects_escaping_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut changes = FileChanges::new();
        changes.insert("../evil.txt".to_string(), Some("x".to_string()));
        assert!(apply_file_changes(temp.path(), &changes).is_err());
    }

    #[test]
    fn replace_dir_copies_without_git_metadata() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("src");
        let dest = temp.path().join("dest");
        fs::create_dir_all(src.join(".git")).expect("mkdir");
        fs::create_dir_all(src.join("a")).expect("mkdir");
        fs::write(src.join("a/file.txt"), "content").expect("write");
        fs::write(src.join(".git/config"), "x").expect("write");
        fs::create_dir_all(&dest).expect("mkdir");
        fs::write(dest.join("stale.txt"), "stale").expect("write");

        replace_dir_with_copy(&src, &dest).expect("copy");
        assert_eq!(fs::read_to_string(dest.join("a/file.txt")).expect("read"), "content");
        assert!(!dest.join(".git").exists());
        assert!(!dest.join("stale.txt").exists());
    }

    #[test]
    fn lists_visible_subfolders_sorted() {
        let temp = tempfile::tempdir().expect("tempdir");
        for name in ["b_tests", "a_tests", ".git"] {
            fs::create_dir_all(temp.path().join(name)).expect("mkdir");
        }
        fs::write(temp.path().join("conformance_tests.json"), "{}").expect("write");
        let names = list_subfolders(temp.path()).expect("list");
        assert_eq!(names, vec!["a_tests", "b_tests"]);
    }
}
