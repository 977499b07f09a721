use std::path::{Path, PathBuf};

use crate::config::ScanningConfig;
use super::super::index::{is_excluded_path, ProjectIndex, Resolved};
use super::SymbolId;

/// Installed-library directories that never hold project code
const DEPENDENCY_MARKERS: &[&str] = &["site-packages", "dist-packages"];

/// Decides whether a resolved definition is project code or library code.
/// Purely a function of paths and module names.
#[derive(Debug, Clone)]
pub struct UserCodePolicy {
    roots: Vec<PathBuf>,
    markers: Vec<String>,
    builtin_modules: Vec<String>,
}

impl UserCodePolicy {
    pub fn new(roots: &[PathBuf], config: &ScanningConfig) -> Self {
        let mut markers = config.excluded_dir_markers.clone();
        for marker in DEPENDENCY_MARKERS {
            if !markers.iter().any(|m| m == marker) {
                markers.push(marker.to_string());
            }
        }

        Self {
            roots: roots
                .iter()
                .map(|root| root.canonicalize().unwrap_or_else(|_| root.clone()))
                .collect(),
            markers,
            builtin_modules: config.builtin_modules.clone(),
        }
    }

    /// Whether a file lies under a project root and outside any dependency
    /// directory below that root
    pub fn is_project_path(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| match path.strip_prefix(root) {
            Ok(relative) => !is_excluded_path(relative, &self.markers),
            Err(_) => false,
        })
    }

    pub fn is_builtin_module(&self, module_name: &str) -> bool {
        let top = module_name.split('.').next().unwrap_or(module_name);
        self.builtin_modules.iter().any(|m| m == top)
    }

    /// Whether `id` names a function the walker should follow
    fn is_user_function(&self, index: &ProjectIndex, id: &SymbolId) -> bool {
        if index.function(id).is_none() || !self.is_project_path(&id.file_path) {
            return false;
        }
        match index.module_name(&id.file_path) {
            Some(name) => !self.is_builtin_module(name),
            None => false,
        }
    }

    pub fn is_user_code(&self, index: &ProjectIndex, resolved: &Resolved) -> bool {
        match resolved {
            Resolved::Function(id) => self.is_user_function(index, id),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::index::tests::{index_of, path_of};

    #[test]
    fn test_paths_outside_roots_are_library_code() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("project");
        std::fs::create_dir_all(&root).unwrap();
        let policy = UserCodePolicy::new(&[root.clone()], &ScanningConfig::default());
        let root = root.canonicalize().unwrap();

        assert!(policy.is_project_path(&root.join("app/main.py")));
        assert!(!policy.is_project_path(&root.join("lib/python3.12/dist-packages/pkg/x.py")));
        assert!(!policy.is_project_path(&root.join(".venv/lib/x.py")));
        assert!(!policy.is_project_path(Path::new("/usr/lib/python3.12/json/__init__.py")));
    }

    #[test]
    fn test_builtin_module_names_are_not_user_code() {
        let (_dir, index) = index_of(&[
            ("collections.py", "def helper():\n    pass\n"),
            ("service.py", "def helper():\n    pass\n\nclass Service:\n    pass\n"),
        ]);
        let policy = UserCodePolicy::new(index.roots(), &ScanningConfig::default());
        let shadow = SymbolId::new(path_of(&index, "collections.py"), "helper");
        let service = SymbolId::new(path_of(&index, "service.py"), "helper");

        assert!(!policy.is_user_function(&index, &shadow));
        assert!(policy.is_user_function(&index, &service));
        assert!(!policy.is_user_code(
            &index,
            &Resolved::Class(SymbolId::new(path_of(&index, "service.py"), "Service"))
        ));
        assert!(!policy.is_user_code(
            &index,
            &Resolved::External { module: "json".to_string(), name: "dumps".to_string() }
        ));
    }
}
