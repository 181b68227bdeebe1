//! A change-detection and fan-out engine for a Go module's test-bearing
//! packages, plus the parser behind each package's tests/suites view.
//!
//! [`Watcher`] is the only public boundary: obtain a subscription with
//! [`Watcher::watch`], then read [`snapshot::Diff`] values off the
//! returned channel until it closes.

pub mod differ;
pub mod error;
pub mod exec;
pub mod module_locator;
pub mod parser;
pub mod scanner;
pub mod snapshot;
pub mod watcher;

pub use error::{Result, WatchError};
pub use exec::{Results, TestEvent};
pub use parser::{Position, Test, TestSuite};
pub use snapshot::{Diff, Snapshot, TestingPackage};
pub use watcher::{Watcher, WatcherConfig};
