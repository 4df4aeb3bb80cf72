//! Test utilities shared across test modules

use crate::paths::Paths;
use tempfile::TempDir;

/// Create a Paths struct for testing using a temporary directory
///
/// The temp directory plays the user's home: the registry lives under
/// `<temp>/.guise` and default tools point at `<temp>/.codex` and friends.
pub fn setup_test_paths(temp_dir: &TempDir) -> Paths {
    let home = temp_dir.path().to_path_buf();
    Paths::with_base(home.clone(), home.join(".guise"))
}
