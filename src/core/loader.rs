//! Static endpoint discovery.
//!
//! Instead of executing the application module, the loader reads the route
//! registrations straight out of the project index: route decorators on the
//! application (or on routers it includes), `add_api_route` calls and
//! `include_router` calls, in source order.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ScanningConfig;
use crate::error::{RouteScribeError, Result};
use super::call_graph::SymbolId;
use super::index::{ProjectIndex, Resolved};
use super::parser::{string_literal, Assignment, CallInfo, FunctionDef, ParsedModule};
use super::scanner::SourceLocation;

const ROUTE_METHODS: &[&str] = &["get", "post", "put", "delete", "patch", "options", "head", "trace"];

/// A type expression as written in some module, resolved lazily
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRef {
    pub module: PathBuf,
    pub expr: String,
}

/// One routed path with its handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub path: String,
    pub methods: BTreeSet<String>,
    /// Route name; the handler's name unless `name=` was given
    pub name: String,
    pub handler: SymbolId,
    pub response_model: Option<TypeRef>,
}

impl EndpointDescriptor {
    /// Stable per-run identifier: path plus sorted methods
    pub fn identifier(&self) -> String {
        let methods: Vec<&str> = self.methods.iter().map(String::as_str).collect();
        format!("{}_{}", self.path, methods.join("_"))
    }
}

/// The loaded application: where it lives and what it serves
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationHandle {
    pub location: SourceLocation,
    pub endpoints: Vec<EndpointDescriptor>,
}

/// Per-run registry of the parsed project and the applications loaded from it
pub struct ModuleRegistry {
    index: ProjectIndex,
    applications: HashMap<SourceLocation, ApplicationHandle>,
}

impl ModuleRegistry {
    pub fn new(index: ProjectIndex) -> Self {
        Self {
            index,
            applications: HashMap::new(),
        }
    }

    pub fn index(&self) -> &ProjectIndex {
        &self.index
    }

    pub fn application(&self, location: &SourceLocation) -> Option<&ApplicationHandle> {
        self.applications.get(location)
    }
}

enum Registration<'a> {
    Route { func: &'a FunctionDef, decorator: &'a CallInfo, method: &'a str },
    AddRoute(&'a CallInfo),
    Include(&'a CallInfo),
}

pub struct ModuleLoader {
    config: ScanningConfig,
}

impl ModuleLoader {
    pub fn new(config: &ScanningConfig) -> Self {
        Self { config: config.clone() }
    }

    /// Load the application at `location`, reusing an earlier load from the
    /// same registry
    pub fn load<'r>(
        &self,
        registry: &'r mut ModuleRegistry,
        location: &SourceLocation,
    ) -> Result<&'r ApplicationHandle> {
        if registry.application(location).is_some() {
            return Ok(&registry.applications[location]);
        }

        let handle = self.discover(&registry.index, location)?;
        info!("Loaded {} endpoints from {}", handle.endpoints.len(), location);
        Ok(registry.applications.entry(location.clone()).or_insert(handle))
    }

    fn discover(&self, index: &ProjectIndex, location: &SourceLocation) -> Result<ApplicationHandle> {
        let module = index.module(&location.file).ok_or_else(|| {
            RouteScribeError::Loading(format!("{} could not be parsed", location.file.display()))
        })?;

        let (app_var, scope) = match (&location.factory, &location.root_name) {
            (Some(factory), _) => {
                let func = module.functions.get(factory).ok_or_else(|| {
                    RouteScribeError::Loading(format!("factory {} is not defined in {}", factory, location.file.display()))
                })?;
                let assigned = func
                    .assignments
                    .iter()
                    .find(|a| {
                        matches_constructor(&a.value.callee, &self.config.app_constructor)
                            && func.returned_names.iter().any(|(_, name)| name == &a.target)
                    })
                    .ok_or_else(|| {
                        RouteScribeError::Loading(format!("factory {} does not return an application", factory))
                    })?;
                (assigned.target.clone(), Some(factory.clone()))
            }
            (None, Some(root)) => {
                if !module.assignments.iter().any(|a| &a.target == root) {
                    return Err(RouteScribeError::Loading(format!(
                        "{} is not assigned in {}",
                        root,
                        location.file.display()
                    )));
                }
                (root.clone(), None)
            }
            (None, None) => {
                return Err(RouteScribeError::Loading(
                    "location names neither a factory nor an application root".to_string(),
                ))
            }
        };

        let mut endpoints = Vec::new();
        let mut visited = HashSet::new();
        self.collect_routes(index, module, scope.as_deref(), &app_var, "", &mut visited, &mut endpoints);

        Ok(ApplicationHandle {
            location: location.clone(),
            endpoints,
        })
    }

    /// Gather routes registered on `target` within one scope of `module`
    /// (`None` = module level, `Some(f)` = body of function `f`)
    #[allow(clippy::too_many_arguments)]
    fn collect_routes(
        &self,
        index: &ProjectIndex,
        module: &ParsedModule,
        scope: Option<&str>,
        target: &str,
        prefix: &str,
        visited: &mut HashSet<(PathBuf, String)>,
        out: &mut Vec<EndpointDescriptor>,
    ) {
        if !visited.insert((module.path.clone(), format!("{}:{}", scope.unwrap_or(""), target))) {
            return;
        }

        let mut registrations: Vec<(usize, Registration)> = Vec::new();

        for func in module.functions.values() {
            let in_scope = match scope {
                None => func.parent.is_none() && !func.qualname.contains('.'),
                Some(scope) => func.parent.as_deref() == Some(scope),
            };
            if !in_scope {
                continue;
            }
            for decorator in &func.decorators {
                if let Some((receiver, method)) = decorator.receiver_and_method() {
                    if receiver == target && (ROUTE_METHODS.contains(&method) || method == "api_route") {
                        registrations.push((decorator.line, Registration::Route { func, decorator, method }));
                    }
                }
            }
        }

        let (calls, assignments): (&[CallInfo], &[Assignment]) = match scope {
            None => (module.calls.as_slice(), module.assignments.as_slice()),
            Some(scope) => match module.functions.get(scope) {
                Some(func) => (func.calls.as_slice(), func.assignments.as_slice()),
                None => (&[], &[]),
            },
        };
        for call in calls {
            match call.receiver_and_method() {
                Some((receiver, "include_router")) if receiver == target => {
                    registrations.push((call.line, Registration::Include(call)))
                }
                Some((receiver, "add_api_route")) if receiver == target => {
                    registrations.push((call.line, Registration::AddRoute(call)))
                }
                _ => {}
            }
        }

        registrations.sort_by_key(|(line, _)| *line);

        for (_, registration) in registrations {
            match registration {
                Registration::Route { func, decorator, method } => {
                    let Some(path) = route_path(decorator) else {
                        debug!("Skipping {}: route path is not a literal", func.qualname);
                        continue;
                    };
                    let methods = if method == "api_route" {
                        parse_methods(decorator.kwarg("methods"))
                    } else {
                        BTreeSet::from([method.to_uppercase()])
                    };
                    out.push(EndpointDescriptor {
                        path: format!("{}{}", prefix, path),
                        methods,
                        name: literal_kwarg(decorator, "name").unwrap_or_else(|| func.name.clone()),
                        handler: SymbolId::new(&module.path, &func.qualname),
                        response_model: response_model(module, decorator),
                    });
                }
                Registration::AddRoute(call) => {
                    let Some(path) = route_path(call) else {
                        continue;
                    };
                    let endpoint = call.args.get(1).map(String::as_str).or_else(|| call.kwarg("endpoint"));
                    let handler = match endpoint.and_then(|e| self.resolve_function(index, module, scope, e)) {
                        Some(handler) => handler,
                        None => {
                            debug!("Skipping add_api_route({}): endpoint not resolvable", path);
                            continue;
                        }
                    };
                    out.push(EndpointDescriptor {
                        path: format!("{}{}", prefix, path),
                        methods: parse_methods(call.kwarg("methods")),
                        name: literal_kwarg(call, "name").unwrap_or_else(|| handler.name().to_string()),
                        handler,
                        response_model: response_model(module, call),
                    });
                }
                Registration::Include(call) => {
                    let Some(router_expr) = call.args.first().map(String::as_str).or_else(|| call.kwarg("router")) else {
                        continue;
                    };
                    let include_prefix = literal_kwarg(call, "prefix").unwrap_or_default();

                    // A router bound in the same scope
                    if let Some(local) = assignments.iter().find(|a| a.target == router_expr) {
                        if matches_constructor(&local.value.callee, &self.config.router_constructor) {
                            let router_prefix = literal_kwarg(&local.value, "prefix").unwrap_or_default();
                            let prefix = format!("{}{}{}", prefix, include_prefix, router_prefix);
                            self.collect_routes(index, module, scope, router_expr, &prefix, visited, out);
                            continue;
                        }
                    }

                    match index.resolve(&module.path, router_expr) {
                        Some(Resolved::Variable(id)) => {
                            let Some(router_module) = index.module(&id.file_path) else {
                                continue;
                            };
                            let Some(assignment) = router_module
                                .assignments
                                .iter()
                                .find(|a| a.target == id.qualname)
                            else {
                                continue;
                            };
                            if !matches_constructor(&assignment.value.callee, &self.config.router_constructor) {
                                debug!("Skipping include of {}: not a router", router_expr);
                                continue;
                            }
                            let router_prefix = literal_kwarg(&assignment.value, "prefix").unwrap_or_default();
                            let prefix = format!("{}{}{}", prefix, include_prefix, router_prefix);
                            self.collect_routes(index, router_module, None, &id.qualname, &prefix, visited, out);
                        }
                        _ => debug!("Skipping include of {}: router not resolvable", router_expr),
                    }
                }
            }
        }
    }

    fn resolve_function(
        &self,
        index: &ProjectIndex,
        module: &ParsedModule,
        scope: Option<&str>,
        expr: &str,
    ) -> Option<SymbolId> {
        if let Some(scope) = scope {
            let nested = format!("{}.<locals>.{}", scope, expr);
            if module.functions.contains_key(&nested) {
                return Some(SymbolId::new(&module.path, nested));
            }
        }
        match index.resolve(&module.path, expr)? {
            Resolved::Function(id) => Some(id),
            _ => None,
        }
    }
}

fn matches_constructor(callee: &str, constructor: &str) -> bool {
    callee == constructor || callee.rsplit_once('.').map_or(false, |(_, last)| last == constructor)
}

fn route_path(call: &CallInfo) -> Option<String> {
    call.args
        .first()
        .map(String::as_str)
        .or_else(|| call.kwarg("path"))
        .and_then(string_literal)
}

fn literal_kwarg(call: &CallInfo, name: &str) -> Option<String> {
    call.kwarg(name).and_then(string_literal)
}

fn response_model(module: &ParsedModule, call: &CallInfo) -> Option<TypeRef> {
    let expr = call.kwarg("response_model")?;
    if expr == "None" {
        return None;
    }
    Some(TypeRef {
        module: module.path.clone(),
        expr: expr.to_string(),
    })
}

/// Upper-cased methods from a `methods=[...]` literal; GET when absent
fn parse_methods(literal: Option<&str>) -> BTreeSet<String> {
    let mut methods = BTreeSet::new();
    if let Some(literal) = literal {
        if let Ok(re) = regex::Regex::new(r#"["']([A-Za-z]+)["']"#) {
            for cap in re.captures_iter(literal) {
                methods.insert(cap[1].to_uppercase());
            }
        }
    }
    if methods.is_empty() {
        methods.insert("GET".to_string());
    }
    methods
}
