use std::fmt;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::ScanningConfig;
use crate::error::{RouteScribeError, Result};
use super::index::is_excluded_path;
use super::parser::{ParsedModule, PythonParser};

/// Where the application root is constructed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: PathBuf,
    /// Factory function returning the application, if any
    pub factory: Option<String>,
    /// Module-level name the application is assigned to, if any
    pub root_name: Option<String>,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.factory, &self.root_name) {
            (Some(factory), _) => write!(f, "{}:{}()", self.file.display(), factory),
            (None, Some(root)) => write!(f, "{}:{}", self.file.display(), root),
            (None, None) => write!(f, "{}", self.file.display()),
        }
    }
}

/// Walks a source tree looking for the file that constructs the application
pub struct SourceScanner {
    parser: PythonParser,
    config: ScanningConfig,
}

impl SourceScanner {
    pub fn new(config: &ScanningConfig) -> Result<Self> {
        Ok(Self {
            parser: PythonParser::new()?,
            config: config.clone(),
        })
    }

    /// Return the first application location found under `root`, in
    /// file-name-sorted walk order
    pub fn scan(&mut self, root: &Path) -> Result<Option<SourceLocation>> {
        let root = root
            .canonicalize()
            .map_err(|e| RouteScribeError::FileSystem(format!("{}: {}", root.display(), e)))?;

        let walker = WalkDir::new(&root).sort_by_file_name().into_iter();
        for entry in walker.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(self.config.file_extension.as_str())
            {
                continue;
            }
            let relative = path.strip_prefix(&root).unwrap_or(path);
            if is_excluded_path(relative, &self.config.excluded_dir_markers) {
                continue;
            }

            let content = match std::fs::read_to_string(path) {
                Ok(content) => content,
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            match self.parser.parse_module(&content, path) {
                Ok(module) => {
                    if let Some(location) = self.find_application(&module) {
                        info!("Found application at {}", location);
                        return Ok(Some(location));
                    }
                }
                Err(e) => debug!("Skipping {}: {}", path.display(), e),
            }
        }

        Ok(None)
    }

    /// Check one module for a factory or a direct assignment, whichever
    /// appears first in the file
    pub fn find_application(&self, module: &ParsedModule) -> Option<SourceLocation> {
        let factory = module
            .functions
            .values()
            .filter_map(|func| {
                let assigned = func
                    .assignments
                    .iter()
                    .find(|a| self.is_constructor(&a.value.callee))?;
                let returned = func
                    .returned_names
                    .iter()
                    .any(|(line, name)| *line > assigned.line && name == &assigned.target);
                returned.then(|| (func.line, func.qualname.clone()))
            })
            .min_by_key(|(line, _)| *line);

        let direct = module
            .assignments
            .iter()
            .find(|a| self.is_constructor(&a.value.callee))
            .map(|a| (a.line, a.target.clone()));

        match (factory, direct) {
            (Some((factory_line, factory)), Some((direct_line, _))) if factory_line < direct_line => {
                Some(self.factory_location(module, factory))
            }
            (Some((_, factory)), None) => Some(self.factory_location(module, factory)),
            (_, Some((_, root_name))) => Some(SourceLocation {
                file: module.path.clone(),
                factory: None,
                root_name: Some(root_name),
            }),
            (None, None) => None,
        }
    }

    fn factory_location(&self, module: &ParsedModule, factory: String) -> SourceLocation {
        SourceLocation {
            file: module.path.clone(),
            factory: Some(factory),
            root_name: None,
        }
    }

    fn is_constructor(&self, callee: &str) -> bool {
        let ctor = self.config.app_constructor.as_str();
        callee == ctor || callee.rsplit_once('.').map_or(false, |(_, last)| last == ctor)
    }
}
