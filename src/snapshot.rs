//! The rolling snapshot of testing packages under a module, and the
//! immutable diff computed between two successive snapshots.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

use crate::parser::{self, ParsedPackage, Test, TestSuite};

/// A directory whose test files declare at least one top-level
/// `Test`-prefixed function. Parsing is deferred: `for_each_test` and
/// `for_each_suite` trigger it on first use and memoize the result.
#[derive(Clone)]
pub struct TestingPackage {
    pub abs_path: PathBuf,
    /// Path relative to the module root, with leading separators stripped.
    /// This is the package's identity within a [`Snapshot`].
    pub rel_path: String,
    pub mtime: SystemTime,
    test_files: Arc<Vec<PathBuf>>,
    parsed: Arc<OnceLock<ParsedPackage>>,
}

impl std::fmt::Debug for TestingPackage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestingPackage")
            .field("rel_path", &self.rel_path)
            .field("mtime", &self.mtime)
            .finish()
    }
}

impl PartialEq for TestingPackage {
    fn eq(&self, other: &Self) -> bool {
        self.rel_path == other.rel_path && self.mtime == other.mtime
    }
}
impl Eq for TestingPackage {}

impl TestingPackage {
    pub fn new(abs_path: PathBuf, rel_path: String, mtime: SystemTime, test_files: Vec<PathBuf>) -> Self {
        Self {
            abs_path,
            rel_path,
            mtime,
            test_files: Arc::new(test_files),
            parsed: Arc::new(OnceLock::new()),
        }
    }

    fn parsed(&self) -> &ParsedPackage {
        self.parsed
            .get_or_init(|| parser::parse_package(&self.abs_path, &self.test_files))
    }

    /// Force the parse pass now rather than on first `for_each_*` call.
    /// Used by the execution adapter so the parsed test/suite metadata it
    /// hands back alongside a run is guaranteed to reflect the sources
    /// that were actually executed, not whatever was on disk at some
    /// earlier, unrelated access.
    pub fn ensure_parsed(&self) {
        self.parsed();
    }

    /// Iterate plain tests, short-circuiting when `cb` returns `true`.
    pub fn for_each_test(&self, mut cb: impl FnMut(&Test) -> bool) {
        for test in &self.parsed().tests {
            if cb(test) {
                break;
            }
        }
    }

    /// Iterate suites (with their attached methods), short-circuiting when
    /// `cb` returns `true`.
    pub fn for_each_suite(&self, mut cb: impl FnMut(&TestSuite) -> bool) {
        for suite in &self.parsed().suites {
            if cb(suite) {
                break;
            }
        }
    }
}

/// The full set of testing packages present in the module tree at one
/// point in time, keyed by module-relative path (unique within a snapshot).
/// Packages are kept in `Scanner::scan`'s own traversal order, not sorted —
/// spec.md §4.4 requires `Diff`'s `added`/`updated` lists to enumerate in
/// that order, and the Scanner's LIFO walk is explicitly not alphabetical.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    packages: Vec<TestingPackage>,
    index: HashMap<String, usize>,
}

impl Snapshot {
    pub fn from_packages(packages: Vec<TestingPackage>) -> Self {
        let mut ordered = Vec::with_capacity(packages.len());
        let mut index = HashMap::with_capacity(packages.len());
        for pkg in packages {
            match index.get(&pkg.rel_path) {
                Some(&i) => ordered[i] = pkg,
                None => {
                    index.insert(pkg.rel_path.clone(), ordered.len());
                    ordered.push(pkg);
                }
            }
        }
        Self { packages: ordered, index }
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn get(&self, rel_path: &str) -> Option<&TestingPackage> {
        self.index.get(rel_path).map(|&i| &self.packages[i])
    }

    pub fn newest_mtime(&self) -> Option<SystemTime> {
        self.packages.iter().map(|p| p.mtime).max()
    }

    /// Diff `self` (current) against `previous`. `None` previous means
    /// every package in `self` is `added`. Returns `None` when all three
    /// sets would be empty (the null diff).
    pub fn diff(&self, previous: Option<&Snapshot>) -> Option<Diff> {
        let Some(previous) = previous else {
            if self.packages.is_empty() {
                return None;
            }
            return Some(Diff {
                added: self.packages.clone(),
                updated: Vec::new(),
                removed: Vec::new(),
            });
        };

        let mut added = Vec::new();
        let mut updated = Vec::new();

        // `updated`/`added` iterate in the Scanner's own traversal order
        // over `self.packages` (the current snapshot), per spec.md §4.4 —
        // never re-sorted by path.
        for pkg in &self.packages {
            match previous.get(&pkg.rel_path) {
                None => added.push(pkg.clone()),
                Some(prev_pkg) => {
                    if pkg.mtime > prev_pkg.mtime {
                        updated.push(pkg.clone());
                    }
                }
            }
        }

        let removed: Vec<TestingPackage> = previous
            .packages
            .iter()
            .filter(|pkg| !self.index.contains_key(&pkg.rel_path))
            .cloned()
            .collect();

        if added.is_empty() && updated.is_empty() && removed.is_empty() {
            None
        } else {
            Some(Diff {
                added,
                updated,
                removed,
            })
        }
    }
}

/// An immutable description of what changed between two snapshots.
#[derive(Clone, Debug, Default)]
pub struct Diff {
    pub added: Vec<TestingPackage>,
    pub updated: Vec<TestingPackage>,
    pub removed: Vec<TestingPackage>,
}

impl Diff {
    /// Iterate packages that are new or updated, short-circuiting when `cb`
    /// returns `true`.
    pub fn for_each_changed(&self, mut cb: impl FnMut(&TestingPackage) -> bool) {
        for pkg in self.added.iter().chain(self.updated.iter()) {
            if cb(pkg) {
                break;
            }
        }
    }

    /// Iterate removed packages, short-circuiting when `cb` returns `true`.
    pub fn for_each_removed(&self, mut cb: impl FnMut(&TestingPackage) -> bool) {
        for pkg in &self.removed {
            if cb(pkg) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(rel_path: &str, mtime: SystemTime) -> TestingPackage {
        TestingPackage::new(PathBuf::from(rel_path), rel_path.to_string(), mtime, vec![])
    }

    #[test]
    fn null_previous_adds_everything() {
        let now = SystemTime::now();
        let snap = Snapshot::from_packages(vec![pkg("a", now), pkg("b", now)]);
        let diff = snap.diff(None).unwrap();
        assert_eq!(diff.added.len(), 2);
        assert!(diff.updated.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn empty_to_empty_is_null() {
        let snap = Snapshot::default();
        assert!(snap.diff(None).is_none());
        assert!(snap.diff(Some(&Snapshot::default())).is_none());
    }

    #[test]
    fn detects_added_updated_removed() {
        let t0 = SystemTime::UNIX_EPOCH;
        let t1 = t0 + std::time::Duration::from_secs(1);

        let prev = Snapshot::from_packages(vec![pkg("a", t0), pkg("b", t0)]);
        let curr = Snapshot::from_packages(vec![pkg("a", t1), pkg("c", t0)]);

        let diff = curr.diff(Some(&prev)).unwrap();
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].rel_path, "c");
        assert_eq!(diff.updated.len(), 1);
        assert_eq!(diff.updated[0].rel_path, "a");
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].rel_path, "b");
    }

    #[test]
    fn no_delta_is_null() {
        let t0 = SystemTime::UNIX_EPOCH;
        let prev = Snapshot::from_packages(vec![pkg("a", t0)]);
        let curr = Snapshot::from_packages(vec![pkg("a", t0)]);
        assert!(curr.diff(Some(&prev)).is_none());
    }

    #[test]
    fn added_and_updated_preserve_scanner_order_not_path_order() {
        let t0 = SystemTime::UNIX_EPOCH;
        let t1 = t0 + std::time::Duration::from_secs(1);

        // Scanner order here is deliberately the reverse of alphabetical
        // path order, the way a LIFO-stack walk can hand packages back in
        // any order depending on `fs::read_dir`'s own iteration order.
        let prev = Snapshot::from_packages(vec![pkg("z", t0), pkg("m", t0)]);
        let curr = Snapshot::from_packages(vec![pkg("b", t0), pkg("z", t1), pkg("m", t0)]);

        let diff = curr.diff(Some(&prev)).unwrap();
        assert_eq!(diff.added[0].rel_path, "b");
        assert_eq!(diff.updated[0].rel_path, "z");
    }

    #[test]
    fn added_and_removed_are_disjoint() {
        let t0 = SystemTime::UNIX_EPOCH;
        let prev = Snapshot::from_packages(vec![pkg("a", t0)]);
        let curr = Snapshot::from_packages(vec![pkg("b", t0)]);
        let diff = curr.diff(Some(&prev)).unwrap();
        let added: std::collections::HashSet<_> =
            diff.added.iter().map(|p| p.rel_path.clone()).collect();
        let removed: std::collections::HashSet<_> =
            diff.removed.iter().map(|p| p.rel_path.clone()).collect();
        assert!(added.is_disjoint(&removed));
    }
}
