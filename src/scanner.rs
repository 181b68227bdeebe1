//! Non-recursive, deterministic directory walk that builds a [`Snapshot`]
//! of the module's testing packages.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::parser;
use crate::snapshot::{Snapshot, TestingPackage};

/// Directory names excluded from the walk by default, per spec.md §4.2.
pub const DEFAULT_IGNORE: &[&str] = &[".git", "node_modules"];

/// Scan `root` for testing packages. `ignore` is invoked with each
/// candidate directory's full path and returning `true` excludes that
/// directory and its subtree. Traversal uses an explicit LIFO stack, never
/// recursion, so order is deterministic within a process regardless of
/// directory depth. An unreadable root yields an empty snapshot.
pub fn scan(root: &Path, ignore: &dyn Fn(&Path) -> bool) -> Snapshot {
    let mut packages = Vec::new();
    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        if ignore(&dir) {
            continue;
        }

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                continue;
            }
        };

        let mut go_files = Vec::new();
        let mut test_go_files = Vec::new();

        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                stack.push(path);
                continue;
            }

            if !file_type.is_file() {
                continue;
            }

            let is_go = path.extension().and_then(|e| e.to_str()) == Some("go");
            if !is_go {
                continue;
            }
            go_files.push(path.clone());

            if is_test_file_name(&path) {
                test_go_files.push(path);
            }
        }

        if test_go_files.is_empty() {
            continue;
        }

        let qualifies = test_go_files.iter().any(|f| {
            fs::read_to_string(f)
                .map(|source| parser::has_test_function(&source))
                .unwrap_or(false)
        });
        if !qualifies {
            continue;
        }

        let Some(mtime) = newest_mtime(&go_files) else {
            continue;
        };

        let rel_path = module_relative_path(root, &dir);
        packages.push(TestingPackage::new(dir.clone(), rel_path, mtime, test_go_files));
    }

    Snapshot::from_packages(packages)
}

fn is_test_file_name(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|stem| stem.ends_with("_test"))
        .unwrap_or(false)
}

fn newest_mtime(go_files: &[PathBuf]) -> Option<SystemTime> {
    go_files
        .iter()
        .filter_map(|f| fs::metadata(f).ok()?.modified().ok())
        .max()
}

fn module_relative_path(root: &Path, dir: &Path) -> String {
    dir.strip_prefix(root)
        .unwrap_or(dir)
        .to_string_lossy()
        .trim_start_matches(std::path::MAIN_SEPARATOR)
        .to_string()
}

/// Build the default ignore predicate: a closure over the configured
/// directory-name tails, matched against the final component of each
/// candidate path (augmentable, per spec.md §4.2, but never shrinkable
/// before the first subscription).
pub fn ignore_predicate(names: Vec<String>) -> impl Fn(&Path) -> bool {
    move |path: &Path| {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| names.iter().any(|tail| tail == n))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn finds_single_testing_package() {
        let root = TempDir::new().unwrap();
        write(root.path(), "p/a_test.go", "package p\nfunc TestFoo(t *testing.T){}\n");
        write(root.path(), "p/a.go", "package p\n");

        let ignore = ignore_predicate(DEFAULT_IGNORE.iter().map(|s| s.to_string()).collect());
        let snap = scan(root.path(), &ignore);
        assert_eq!(snap.len(), 1);
        assert!(snap.get("p").is_some());
    }

    #[test]
    fn skips_package_without_test_prefixed_func() {
        let root = TempDir::new().unwrap();
        write(root.path(), "p/a_test.go", "package p\nfunc helper(){}\n");

        let ignore = ignore_predicate(DEFAULT_IGNORE.iter().map(|s| s.to_string()).collect());
        let snap = scan(root.path(), &ignore);
        assert!(snap.is_empty());
    }

    #[test]
    fn respects_ignore_predicate() {
        let root = TempDir::new().unwrap();
        write(root.path(), "node_modules/p/a_test.go", "package p\nfunc TestFoo(t *testing.T){}\n");
        write(root.path(), "node_modules/p/a.go", "package p\n");

        let ignore = ignore_predicate(DEFAULT_IGNORE.iter().map(|s| s.to_string()).collect());
        let snap = scan(root.path(), &ignore);
        assert!(snap.is_empty());
    }

    #[test]
    fn mtime_includes_non_test_go_files() {
        let root = TempDir::new().unwrap();
        write(root.path(), "p/a_test.go", "package p\nfunc TestFoo(t *testing.T){}\n");
        let prod = root.path().join("p/b.go");
        fs::write(&prod, "package p\n").unwrap();

        // bump mtime on the production file well after the test file
        let future = SystemTime::now() + std::time::Duration::from_secs(120);
        filetime_set(&prod, future);

        let ignore = ignore_predicate(DEFAULT_IGNORE.iter().map(|s| s.to_string()).collect());
        let snap = scan(root.path(), &ignore);
        let pkg = snap.get("p").unwrap();
        assert!(pkg.mtime >= future - std::time::Duration::from_secs(1));
    }

    fn filetime_set(path: &Path, time: SystemTime) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    #[test]
    fn nested_packages_discovered_independent_of_depth() {
        let root = TempDir::new().unwrap();
        write(root.path(), "a/a_test.go", "package a\nfunc TestA(t *testing.T){}\n");
        write(root.path(), "a/b/c/d_test.go", "package d\nfunc TestD(t *testing.T){}\n");

        let ignore = ignore_predicate(DEFAULT_IGNORE.iter().map(|s| s.to_string()).collect());
        let snap = scan(root.path(), &ignore);
        assert_eq!(snap.len(), 2);
        assert!(snap.get("a").is_some());
        assert!(snap.get("a/b/c").is_some());
    }
}
