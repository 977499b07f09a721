//! Project-wide symbol table.
//!
//! Every source file under the project roots is parsed once; call-site and
//! annotation names are then resolved against this table instead of a live
//! module namespace.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use ignore::WalkBuilder;
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::config::ScanningConfig;
use crate::error::{RouteScribeError, Result};
use super::call_graph::SymbolId;
use super::parser::{ClassDef, FunctionDef, ImportTarget, ParsedModule, PythonParser};

/// Bound on re-export chains (`from .a import x` where `a` imports `x` again)
const MAX_RESOLVE_DEPTH: usize = 16;

/// What a dotted name refers to inside some module's namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Function(SymbolId),
    Class(SymbolId),
    /// A module-level `name = callee(...)` binding
    Variable(SymbolId),
    Module(String),
    /// Anything defined outside the indexed tree
    External { module: String, name: String },
}

pub struct ProjectIndex {
    roots: Vec<PathBuf>,
    modules: IndexMap<PathBuf, ParsedModule>,
    by_name: HashMap<String, PathBuf>,
}

impl ProjectIndex {
    /// Parse every source file under `roots`
    pub fn build(roots: &[PathBuf], config: &ScanningConfig) -> Result<Self> {
        let mut parser = PythonParser::new()?;
        let mut index = Self {
            roots: Vec::new(),
            modules: IndexMap::new(),
            by_name: HashMap::new(),
        };

        for root in roots {
            let root = match root.canonicalize() {
                Ok(root) => root,
                Err(e) => {
                    warn!("Skipping project root {}: {}", root.display(), e);
                    continue;
                }
            };

            // Use ignore crate to respect .gitignore
            let walker = WalkBuilder::new(&root)
                .hidden(false)
                .git_ignore(true)
                .sort_by_file_name(|a, b| a.cmp(b))
                .build();

            for entry in walker {
                let entry = entry.map_err(|e| RouteScribeError::FileSystem(e.to_string()))?;
                let path = entry.path();
                if !path.is_file() || !has_extension(path, &config.file_extension) {
                    continue;
                }
                let relative = path.strip_prefix(&root).unwrap_or(path);
                if is_excluded_path(relative, &config.excluded_dir_markers) {
                    continue;
                }

                let content = match std::fs::read_to_string(path) {
                    Ok(content) => content,
                    Err(e) => {
                        debug!("Skipping {}: {}", path.display(), e);
                        continue;
                    }
                };
                if content.len() > config.max_file_size {
                    debug!("Skipping {}: exceeds maximum size limit", path.display());
                    continue;
                }

                match parser.parse_module(&content, path) {
                    Ok(mut module) => {
                        module.module_name = module_name_for(relative);
                        index.insert(&root, module);
                    }
                    Err(e) => debug!("Skipping {}: {}", path.display(), e),
                }
            }

            index.roots.push(root);
        }

        debug!("Indexed {} modules", index.modules.len());
        Ok(index)
    }

    fn insert(&mut self, root: &Path, module: ParsedModule) {
        let path = module.path.clone();
        let mut names = vec![module.module_name.clone()];
        if let Some(root_name) = root.file_name().and_then(|n| n.to_str()) {
            if module.module_name.is_empty() {
                names.push(root_name.to_string());
            } else {
                names.push(format!("{}.{}", root_name, module.module_name));
            }
        }
        for name in names.into_iter().filter(|n| !n.is_empty()) {
            self.by_name.entry(name).or_insert_with(|| path.clone());
        }
        self.modules.insert(path, module);
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn module(&self, path: &Path) -> Option<&ParsedModule> {
        self.modules.get(path)
    }

    pub fn module_by_name(&self, name: &str) -> Option<&ParsedModule> {
        self.by_name.get(name).and_then(|path| self.modules.get(path))
    }

    pub fn function(&self, id: &SymbolId) -> Option<&FunctionDef> {
        self.modules.get(&id.file_path)?.functions.get(&id.qualname)
    }

    pub fn class(&self, id: &SymbolId) -> Option<&ClassDef> {
        self.modules.get(&id.file_path)?.classes.get(&id.qualname)
    }

    /// Resolve a dotted name as seen from the namespace of the module at `module`
    pub fn resolve(&self, module: &Path, dotted: &str) -> Option<Resolved> {
        let mut parts = dotted.split('.');
        let head = parts.next()?;
        let rest: Vec<&str> = parts.collect();
        let base = self.lookup_global(module, head, 0)?;
        self.descend(base, &rest, 0)
    }

    /// Look up one name in a module's global namespace
    fn lookup_global(&self, module_path: &Path, name: &str, depth: usize) -> Option<Resolved> {
        if depth > MAX_RESOLVE_DEPTH {
            return None;
        }
        let module = self.modules.get(module_path)?;

        if module.functions.contains_key(name) {
            return Some(Resolved::Function(SymbolId::new(module_path, name)));
        }
        if module.classes.contains_key(name) {
            return Some(Resolved::Class(SymbolId::new(module_path, name)));
        }
        if let Some(target) = module.imports.get(name) {
            return self.resolve_import(module, target, depth);
        }
        if module.assignments.iter().any(|a| a.target == name) {
            return Some(Resolved::Variable(SymbolId::new(module_path, name)));
        }
        None
    }

    fn resolve_import(&self, importer: &ParsedModule, target: &ImportTarget, depth: usize) -> Option<Resolved> {
        match target {
            ImportTarget::Module(name) => Some(
                self.project_module(name, &importer.path)
                    .unwrap_or_else(|| Resolved::External { module: name.clone(), name: String::new() }),
            ),
            ImportTarget::Symbol { module, name } => {
                let Some(absolute) = self.absolute_module(importer, module) else {
                    return None;
                };
                let submodule = join_dotted(&absolute, name);
                if let Some(resolved) = self.project_module(&submodule, &importer.path) {
                    return Some(resolved);
                }
                match self.find_module(&absolute, &importer.path) {
                    Some(path) => self.lookup_global(&path, name, depth + 1),
                    None if self.is_namespace_package(&absolute) => None,
                    None => Some(Resolved::External { module: absolute, name: name.clone() }),
                }
            }
        }
    }

    fn descend(&self, base: Resolved, rest: &[&str], depth: usize) -> Option<Resolved> {
        let Some((first, tail)) = rest.split_first() else {
            return Some(base);
        };
        if depth > MAX_RESOLVE_DEPTH {
            return None;
        }

        match base {
            Resolved::Module(name) => {
                let submodule = join_dotted(&name, first);
                if self.module_by_name(&submodule).is_some() || self.is_namespace_package(&submodule) {
                    return self.descend(Resolved::Module(submodule), tail, depth + 1);
                }
                let path = self.by_name.get(&name)?;
                let next = self.lookup_global(path, first, depth + 1)?;
                self.descend(next, tail, depth + 1)
            }
            Resolved::Class(id) if tail.is_empty() => {
                let qualname = format!("{}.{}", id.qualname, first);
                let module = self.modules.get(&id.file_path)?;
                module
                    .functions
                    .contains_key(&qualname)
                    .then(|| Resolved::Function(SymbolId::new(&id.file_path, qualname)))
            }
            Resolved::External { module, name } => {
                let mut full = name;
                for part in rest {
                    full = join_dotted(&full, part);
                }
                Some(Resolved::External { module, name: full })
            }
            _ => None,
        }
    }

    /// `Resolved::Module` for a project module or namespace package
    fn project_module(&self, name: &str, importer: &Path) -> Option<Resolved> {
        if let Some(path) = self.find_module(name, importer) {
            return self.modules.get(&path).map(|m| Resolved::Module(m.module_name_or(name)));
        }
        self.is_namespace_package(name).then(|| Resolved::Module(name.to_string()))
    }

    /// Find a module by dotted name, falling back to the importing file's
    /// directory for script-style imports
    fn find_module(&self, name: &str, importer: &Path) -> Option<PathBuf> {
        if let Some(path) = self.by_name.get(name) {
            return Some(path.clone());
        }
        let dir = importer.parent()?;
        let base = dir.join(name.replace('.', "/"));
        let candidates = [base.with_extension("py"), base.join("__init__.py")];
        candidates.into_iter().find(|c| self.modules.contains_key(c))
    }

    fn is_namespace_package(&self, name: &str) -> bool {
        let prefix = format!("{}.", name);
        self.by_name.keys().any(|k| k.starts_with(&prefix))
    }

    /// Turn a possibly relative module reference into an absolute dotted name
    fn absolute_module(&self, importer: &ParsedModule, module: &str) -> Option<String> {
        if !module.starts_with('.') {
            return Some(module.to_string());
        }
        let levels = module.chars().take_while(|&c| c == '.').count();
        let suffix = &module[levels..];

        let mut package = if importer.is_package {
            importer.module_name.clone()
        } else {
            importer
                .module_name
                .rsplit_once('.')
                .map(|(head, _)| head.to_string())
                .unwrap_or_default()
        };
        for _ in 1..levels {
            package = match package.rsplit_once('.') {
                Some((head, _)) => head.to_string(),
                None if !package.is_empty() => String::new(),
                None => return None,
            };
        }
        Some(join_dotted(&package, suffix))
    }

    /// Dotted module name of a file
    pub fn module_name(&self, path: &Path) -> Option<&str> {
        self.modules.get(path).map(|m| m.module_name.as_str())
    }
}

impl ParsedModule {
    fn module_name_or(&self, fallback: &str) -> String {
        if self.module_name.is_empty() {
            fallback.to_string()
        } else {
            self.module_name.clone()
        }
    }
}

fn join_dotted(head: &str, tail: &str) -> String {
    match (head.is_empty(), tail.is_empty()) {
        (true, _) => tail.to_string(),
        (_, true) => head.to_string(),
        _ => format!("{}.{}", head, tail),
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(extension)
}

/// Dotted module name for a path relative to its project root
pub fn module_name_for(relative: &Path) -> String {
    let mut parts: Vec<String> = relative
        .with_extension("")
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if parts.last().map_or(false, |p| p == "__init__") {
        parts.pop();
    }
    parts.join(".")
}

/// Whether any directory segment of a root-relative path looks like a
/// virtual environment or installed-dependency directory
pub fn is_excluded_path(relative: &Path, markers: &[String]) -> bool {
    let Some(parent) = relative.parent() else {
        return false;
    };
    parent.components().any(|component| {
        let segment = component.as_os_str().to_string_lossy();
        markers.iter().any(|marker| segment.contains(marker.as_str()))
    })
}
