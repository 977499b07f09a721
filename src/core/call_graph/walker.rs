use std::collections::HashSet;
use indexmap::IndexMap;
use tracing::debug;

use super::super::index::{ProjectIndex, Resolved};
use super::super::parser::FunctionDef;
use super::{SymbolId, UserCodePolicy};

/// Depth-first walk over call sites, restricted to user-defined functions
pub struct CallGraphWalker<'a> {
    index: &'a ProjectIndex,
    policy: &'a UserCodePolicy,
}

impl<'a> CallGraphWalker<'a> {
    pub fn new(index: &'a ProjectIndex, policy: &'a UserCodePolicy) -> Self {
        Self { index, policy }
    }

    /// Every user function reachable from `handler`, keyed by the call-site
    /// name it was first reached through. The handler itself is never part
    /// of the result.
    pub fn walk_from(&self, handler: &SymbolId) -> IndexMap<String, SymbolId> {
        let mut visited = HashSet::from([handler.clone()]);
        self.walk(handler, &mut visited)
    }

    /// Walk `callable`, skipping anything already in `visited`
    pub fn walk(&self, callable: &SymbolId, visited: &mut HashSet<SymbolId>) -> IndexMap<String, SymbolId> {
        visited.insert(callable.clone());
        let mut calls = IndexMap::new();
        self.visit(callable, visited, &mut calls);
        calls
    }

    fn visit(
        &self,
        callable: &SymbolId,
        visited: &mut HashSet<SymbolId>,
        calls: &mut IndexMap<String, SymbolId>,
    ) {
        let Some(func) = self.index.function(callable) else {
            debug!("No definition for {}, skipping branch", callable);
            return;
        };

        for site in &func.call_sites {
            let Some(resolved) = self.resolve(callable, func, site) else {
                continue;
            };
            if !self.policy.is_user_code(self.index, &resolved) {
                continue;
            }
            let Resolved::Function(target) = resolved else {
                continue;
            };
            if !visited.insert(target.clone()) {
                continue;
            }

            debug!("{} -> {}", callable, target);
            let key = self.call_key(site, &target, calls);
            calls.insert(key, target.clone());
            self.visit(&target, visited, calls);
        }
    }

    /// The call-site name, or the module-qualified name when another
    /// function was already recorded under that call-site name
    fn call_key(&self, site: &str, target: &SymbolId, calls: &IndexMap<String, SymbolId>) -> String {
        if !calls.contains_key(site) {
            return site.to_string();
        }
        let qualified = match self.index.module_name(&target.file_path) {
            Some(module) if !module.is_empty() => format!("{}.{}", module, target.qualname),
            _ => target.qualname.clone(),
        };
        if calls.contains_key(&qualified) {
            target.to_string()
        } else {
            qualified
        }
    }

    /// Resolve a call-site name: enclosing function scopes first, then the
    /// module namespace
    fn resolve(&self, callable: &SymbolId, func: &FunctionDef, site: &str) -> Option<Resolved> {
        let (head, rest) = match site.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (site, None),
        };

        let module = self.index.module(&callable.file_path)?;
        let mut scope = Some(func.qualname.as_str());
        while let Some(current) = scope {
            let local = format!("{}.<locals>.{}", current, head);
            if module.functions.contains_key(&local) {
                return match rest {
                    None => Some(Resolved::Function(SymbolId::new(&callable.file_path, local))),
                    Some(_) => None,
                };
            }
            scope = module.functions.get(current).and_then(|f| f.parent.as_deref());
        }

        self.index.resolve(&callable.file_path, site)
    }
}
