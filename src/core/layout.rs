use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{RouteScribeError, Result};

/// Where generated test files live: one directory per path segment, one
/// file per endpoint
#[derive(Debug, Clone)]
pub struct TestLayout {
    test_dir: PathBuf,
    extension: String,
}

impl TestLayout {
    pub fn new(test_dir: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            test_dir: test_dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn test_dir(&self) -> &Path {
        &self.test_dir
    }

    /// `GET /users/{id}` -> `<test_dir>/users/{id}/test_users_{id}_GET.<ext>`
    ///
    /// `.` and `..` segments are dropped so the file stays under the test
    /// directory.
    pub fn path_for(&self, endpoint_path: &str, methods: &BTreeSet<String>) -> PathBuf {
        let parts: Vec<&str> = endpoint_path
            .trim_matches('/')
            .split('/')
            .filter(|part| *part != "." && *part != "..")
            .collect();
        let methods: BTreeSet<String> = methods.iter().map(|m| m.to_uppercase()).collect();
        let method_suffix = methods.into_iter().collect::<Vec<_>>().join("_");

        let directory = parts
            .iter()
            .filter(|part| !part.is_empty())
            .fold(self.test_dir.clone(), |dir, part| dir.join(part));
        directory.join(format!("test_{}_{}.{}", parts.join("_"), method_suffix, self.extension))
    }

    /// Create the directories a test file needs
    pub fn prepare(&self, file: &Path) -> Result<()> {
        let directory = file.parent().unwrap_or(&self.test_dir);
        std::fs::create_dir_all(directory).map_err(|e| {
            RouteScribeError::FileSystem(format!("Cannot create {}: {}", directory.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use predicates::prelude::*;

    fn methods(methods: &[&str]) -> BTreeSet<String> {
        methods.iter().map(|m| m.to_string()).collect()
    }

    #[test]
    fn test_path_segments_and_sorted_methods() {
        let layout = TestLayout::new("tests", "py");
        assert_eq!(
            layout.path_for("/users/{id}", &methods(&["GET"])),
            PathBuf::from("tests/users/{id}/test_users_{id}_GET.py")
        );
        assert_eq!(
            layout.path_for("/items/", &methods(&["put", "GET"])),
            PathBuf::from("tests/items/test_items_GET_PUT.py")
        );
        assert_eq!(layout.path_for("/", &methods(&["GET"])), PathBuf::from("tests/test__GET.py"));
    }

    #[test]
    fn test_dot_segments_stay_inside_test_dir() {
        let layout = TestLayout::new("tests", "py");
        let file = layout.path_for("/../../etc/x", &methods(&["GET"]));
        assert_eq!(file, PathBuf::from("tests/etc/x/test_etc_x_GET.py"));
        assert!(file.components().all(|c| c != std::path::Component::ParentDir));

        assert_eq!(
            layout.path_for("/a/./b/..", &methods(&["POST"])),
            PathBuf::from("tests/a/b/test_a_b_POST.py")
        );
        assert_eq!(layout.path_for("/..", &methods(&["GET"])), PathBuf::from("tests/test__GET.py"));
    }

    #[test]
    fn test_prepare_creates_directories() {
        let dir = assert_fs::TempDir::new().unwrap();
        let layout = TestLayout::new(dir.path(), ".py");
        let file = layout.path_for("/a/b", &methods(&["POST"]));
        layout.prepare(&file).unwrap();

        dir.child("a/b").assert(predicate::path::is_dir());
        assert!(file.ends_with("a/b/test_a_b_POST.py"));
    }
}
