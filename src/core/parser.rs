use std::path::{Path, PathBuf};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser, Tree};

use crate::error::{RouteScribeError, Result};

/// A parsed Python module reduced to what name resolution and endpoint
/// discovery need. Built once per file by [`PythonParser::parse_module`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedModule {
    /// File the module was read from
    pub path: PathBuf,

    /// Dotted module name, filled in by the project index
    pub module_name: String,

    /// Whether this is a package `__init__` file
    pub is_package: bool,

    /// Raw source content
    pub source: String,

    /// Functions keyed by qualified name (`f`, `Cls.m`, `outer.<locals>.inner`)
    pub functions: IndexMap<String, FunctionDef>,

    /// Module-level classes keyed by name
    pub classes: IndexMap<String, ClassDef>,

    /// Names bound by import statements
    pub imports: IndexMap<String, ImportTarget>,

    /// Module-level `name = callee(...)` statements
    pub assignments: Vec<Assignment>,

    /// Module-level bare call statements
    pub calls: Vec<CallInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub qualname: String,
    /// Qualified name of the enclosing function, for nested definitions
    pub parent: Option<String>,
    pub is_async: bool,
    pub line: usize,
    /// Definition text including decorators
    pub source: String,
    pub decorators: Vec<CallInfo>,
    pub params: Vec<Parameter>,
    /// Return annotation text
    pub returns: Option<String>,
    /// Dotted callee text of every call in the definition, first-seen order
    pub call_sites: Vec<String>,
    /// Direct body `name = callee(...)` statements
    pub assignments: Vec<Assignment>,
    /// Direct body bare call statements
    pub calls: Vec<CallInfo>,
    /// `(line, name)` for every `return <identifier>` in the body
    pub returned_names: Vec<(usize, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    pub line: usize,
    /// Base class expressions as written
    pub bases: Vec<String>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub annotation: Option<String>,
}

/// A call expression with its argument text kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallInfo {
    pub callee: String,
    pub args: Vec<String>,
    pub kwargs: Vec<(String, String)>,
    pub line: usize,
}

impl CallInfo {
    pub fn kwarg(&self, name: &str) -> Option<&str> {
        self.kwargs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Split `obj.method` into its receiver and final attribute
    pub fn receiver_and_method(&self) -> Option<(&str, &str)> {
        self.callee.rsplit_once('.')
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub target: String,
    pub value: CallInfo,
    pub line: usize,
}

/// What an imported name is bound to. Relative modules keep their leading dots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportTarget {
    Module(String),
    Symbol { module: String, name: String },
}

/// Python parser using Tree-sitter
pub struct PythonParser {
    parser: Parser,
}

impl PythonParser {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let python_language = tree_sitter_python::language();
        parser.set_language(&python_language)
            .map_err(|e| RouteScribeError::Parser(format!("Failed to set Python language: {}", e)))?;

        Ok(Self { parser })
    }

    /// Parse raw source into a syntax tree
    pub fn parse(&mut self, content: &str) -> Result<Tree> {
        self.parser.parse(content, None)
            .ok_or_else(|| RouteScribeError::Parser("Failed to parse Python code".to_string()))
    }

    /// Parse a file's content into a [`ParsedModule`]. Sources with syntax
    /// errors are rejected.
    pub fn parse_module(&mut self, content: &str, file_path: &Path) -> Result<ParsedModule> {
        let tree = self.parse(content)?;
        let root = tree.root_node();
        if root.has_error() {
            return Err(RouteScribeError::Parser(format!(
                "Syntax error in {}",
                file_path.display()
            )));
        }

        let mut module = ParsedModule {
            path: file_path.to_path_buf(),
            module_name: String::new(),
            is_package: file_path.file_name().map_or(false, |n| n == "__init__.py"),
            source: content.to_string(),
            functions: IndexMap::new(),
            classes: IndexMap::new(),
            imports: IndexMap::new(),
            assignments: Vec::new(),
            calls: Vec::new(),
        };

        for stmt in statements(root) {
            match stmt.kind() {
                "import_statement" => self.extract_import(stmt, content, &mut module.imports),
                "import_from_statement" => self.extract_from_import(stmt, content, &mut module.imports),
                "function_definition" => self.extract_function(stmt, stmt, content, "", None, &mut module),
                "class_definition" => self.extract_class(stmt, stmt, content, &mut module),
                "decorated_definition" => {
                    if let Some(definition) = stmt.child_by_field_name("definition") {
                        match definition.kind() {
                            "function_definition" => {
                                self.extract_function(definition, stmt, content, "", None, &mut module)
                            }
                            "class_definition" => self.extract_class(definition, stmt, content, &mut module),
                            _ => {}
                        }
                    }
                }
                "expression_statement" => {
                    collect_expression_statement(stmt, content, &mut module.assignments, &mut module.calls)
                }
                _ => {}
            }
        }

        Ok(module)
    }

    /// Bind names from `import a.b` / `import a.b as c`
    fn extract_import(&self, node: Node, source: &str, imports: &mut IndexMap<String, ImportTarget>) {
        let mut cursor = node.walk();
        for name_node in node.children_by_field_name("name", &mut cursor) {
            match name_node.kind() {
                "aliased_import" => {
                    let module = name_node.child_by_field_name("name").map(|n| dotted_text(n, source));
                    let alias = name_node.child_by_field_name("alias").map(|n| node_text(n, source));
                    if let (Some(module), Some(alias)) = (module, alias) {
                        imports.insert(alias, ImportTarget::Module(module));
                    }
                }
                _ => {
                    // `import a.b` binds `a`
                    let dotted = dotted_text(name_node, source);
                    let head = dotted.split('.').next().unwrap_or_default().to_string();
                    if !head.is_empty() {
                        imports.insert(head.clone(), ImportTarget::Module(head));
                    }
                }
            }
        }
    }

    /// Bind names from `from m import n` / `from .m import n as k`
    fn extract_from_import(&self, node: Node, source: &str, imports: &mut IndexMap<String, ImportTarget>) {
        let Some(module_node) = node.child_by_field_name("module_name") else {
            return;
        };
        let module = dotted_text(module_node, source);

        let mut cursor = node.walk();
        for name_node in node.children_by_field_name("name", &mut cursor) {
            let (name, alias) = match name_node.kind() {
                "aliased_import" => {
                    let name = name_node.child_by_field_name("name").map(|n| dotted_text(n, source));
                    let alias = name_node.child_by_field_name("alias").map(|n| node_text(n, source));
                    match (name, alias) {
                        (Some(name), Some(alias)) => (name, alias),
                        _ => continue,
                    }
                }
                _ => {
                    let name = dotted_text(name_node, source);
                    (name.clone(), name)
                }
            };
            imports.insert(alias, ImportTarget::Symbol { module: module.clone(), name });
        }
    }

    /// Record a function definition and, recursively, the functions nested in it
    fn extract_function(
        &self,
        node: Node,
        outer: Node,
        source: &str,
        prefix: &str,
        parent: Option<&str>,
        module: &mut ParsedModule,
    ) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, source);
        let qualname = format!("{}{}", prefix, name);

        let mut decorators = Vec::new();
        if outer.kind() == "decorated_definition" {
            let mut cursor = outer.walk();
            for child in outer.named_children(&mut cursor) {
                if child.kind() == "decorator" {
                    if let Some(expr) = child.named_child(0) {
                        decorators.push(decorator_call(expr, source));
                    }
                }
            }
        }

        let params = node
            .child_by_field_name("parameters")
            .map(|p| extract_parameters(p, source))
            .unwrap_or_default();
        let returns = node.child_by_field_name("return_type").map(|n| node_text(n, source));
        let is_async = node
            .child(0)
            .map_or(false, |first| first.kind() == "async");

        let mut assignments = Vec::new();
        let mut calls = Vec::new();
        let mut returned_names = Vec::new();
        let mut nested = Vec::new();

        if let Some(body) = node.child_by_field_name("body") {
            for stmt in statements(body) {
                match stmt.kind() {
                    "expression_statement" => {
                        collect_expression_statement(stmt, source, &mut assignments, &mut calls)
                    }
                    "return_statement" => {
                        if let Some(value) = stmt.named_child(0) {
                            if value.kind() == "identifier" {
                                returned_names.push((line_of(stmt), node_text(value, source)));
                            }
                        }
                    }
                    "function_definition" => nested.push((stmt, stmt)),
                    "decorated_definition" => {
                        if let Some(definition) = stmt.child_by_field_name("definition") {
                            if definition.kind() == "function_definition" {
                                nested.push((definition, stmt));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        module.functions.insert(
            qualname.clone(),
            FunctionDef {
                name,
                qualname: qualname.clone(),
                parent: parent.map(str::to_string),
                is_async,
                line: line_of(outer),
                source: node_text(outer, source),
                decorators,
                params,
                returns,
                call_sites: call_sites(node, source),
                assignments,
                calls,
                returned_names,
            },
        );

        let nested_prefix = format!("{}.<locals>.", qualname);
        for (definition, outer) in nested {
            self.extract_function(definition, outer, source, &nested_prefix, Some(&qualname), module);
        }
    }

    /// Record a module-level class and its methods
    fn extract_class(&self, node: Node, outer: Node, source: &str, module: &mut ParsedModule) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = node_text(name_node, source);

        let mut bases = Vec::new();
        if let Some(superclasses) = node.child_by_field_name("superclasses") {
            let mut cursor = superclasses.walk();
            for base in superclasses.named_children(&mut cursor) {
                if base.kind() != "keyword_argument" && base.kind() != "comment" {
                    bases.push(dotted_text(base, source));
                }
            }
        }

        module.classes.insert(
            name.clone(),
            ClassDef {
                name: name.clone(),
                line: line_of(outer),
                bases,
                source: node_text(outer, source),
            },
        );

        if let Some(body) = node.child_by_field_name("body") {
            let prefix = format!("{}.", name);
            for stmt in statements(body) {
                match stmt.kind() {
                    "function_definition" => self.extract_function(stmt, stmt, source, &prefix, None, module),
                    "decorated_definition" => {
                        if let Some(definition) = stmt.child_by_field_name("definition") {
                            if definition.kind() == "function_definition" {
                                self.extract_function(definition, stmt, source, &prefix, None, module);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Statements of a module or block, with compound statements flattened so
/// definitions under `if`/`try`/`with` are still seen.
fn statements(node: Node) -> Vec<Node> {
    let mut out = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "if_statement" | "elif_clause" | "else_clause" | "try_statement" | "except_clause"
            | "finally_clause" | "with_statement" | "block" => out.extend(statements(child)),
            _ => out.push(child),
        }
    }
    out
}

fn collect_expression_statement(
    stmt: Node,
    source: &str,
    assignments: &mut Vec<Assignment>,
    calls: &mut Vec<CallInfo>,
) {
    let Some(expr) = stmt.named_child(0) else {
        return;
    };
    match expr.kind() {
        "assignment" => {
            let left = expr.child_by_field_name("left");
            let right = expr.child_by_field_name("right");
            if let (Some(left), Some(right)) = (left, right) {
                if left.kind() == "identifier" && right.kind() == "call" {
                    assignments.push(Assignment {
                        target: node_text(left, source),
                        value: call_info(right, source),
                        line: line_of(expr),
                    });
                }
            }
        }
        "call" => calls.push(call_info(expr, source)),
        _ => {}
    }
}

fn extract_parameters(node: Node, source: &str) -> Vec<Parameter> {
    let mut params = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        let param = match child.kind() {
            "identifier" | "list_splat_pattern" | "dictionary_splat_pattern" => Parameter {
                name: node_text(child, source),
                annotation: None,
            },
            "typed_parameter" => Parameter {
                name: child.named_child(0).map(|n| node_text(n, source)).unwrap_or_default(),
                annotation: child.child_by_field_name("type").map(|n| node_text(n, source)),
            },
            "default_parameter" | "typed_default_parameter" => Parameter {
                name: child.child_by_field_name("name").map(|n| node_text(n, source)).unwrap_or_default(),
                annotation: child.child_by_field_name("type").map(|n| node_text(n, source)),
            },
            _ => continue,
        };
        params.push(param);
    }
    params
}

fn decorator_call(expr: Node, source: &str) -> CallInfo {
    if expr.kind() == "call" {
        call_info(expr, source)
    } else {
        CallInfo {
            callee: dotted_text(expr, source),
            args: Vec::new(),
            kwargs: Vec::new(),
            line: line_of(expr),
        }
    }
}

fn call_info(node: Node, source: &str) -> CallInfo {
    let callee = node
        .child_by_field_name("function")
        .map(|f| dotted_text(f, source))
        .unwrap_or_default();

    let mut args = Vec::new();
    let mut kwargs = Vec::new();
    if let Some(arguments) = node.child_by_field_name("arguments") {
        if arguments.kind() == "argument_list" {
            let mut cursor = arguments.walk();
            for arg in arguments.named_children(&mut cursor) {
                match arg.kind() {
                    "keyword_argument" => {
                        let name = arg.child_by_field_name("name").map(|n| node_text(n, source));
                        let value = arg.child_by_field_name("value").map(|n| node_text(n, source));
                        if let (Some(name), Some(value)) = (name, value) {
                            kwargs.push((name, value));
                        }
                    }
                    "comment" => {}
                    _ => args.push(node_text(arg, source)),
                }
            }
        }
    }

    CallInfo { callee, args, kwargs, line: line_of(node) }
}

/// Dotted callee names of every call expression under `node`. Calls whose
/// target is not a plain (dotted) name, e.g. `get_db().query`, are dropped.
fn call_sites(node: Node, source: &str) -> Vec<String> {
    let mut seen = IndexSet::new();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if current.kind() == "call" {
            if let Some(function) = current.child_by_field_name("function") {
                if matches!(function.kind(), "identifier" | "attribute") {
                    let name = dotted_text(function, source);
                    if is_dotted_name(&name) {
                        seen.insert(name);
                    }
                }
            }
        }
        // Push in reverse so children are visited in source order
        let mut cursor = current.walk();
        let children: Vec<_> = current.named_children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    seen.into_iter().collect()
}

/// Parse a standalone expression (e.g. an annotation) and hand its node to `f`
pub fn with_expression<T>(
    parser: &mut PythonParser,
    text: &str,
    f: impl FnOnce(Node, &str) -> T,
) -> Option<T> {
    let tree = parser.parse(text).ok()?;
    let root = tree.root_node();
    let stmt = root.named_child(0)?;
    if stmt.kind() != "expression_statement" {
        return None;
    }
    let expr = stmt.named_child(0)?;
    Some(f(expr, text))
}

pub fn is_dotted_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with('.')
        && !name.contains("..")
        && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

/// Value of a Python string literal, prefixes and quotes removed
pub fn string_literal(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let body = trimmed.trim_start_matches(|c: char| matches!(c, 'r' | 'R' | 'b' | 'B' | 'u' | 'U' | 'f' | 'F'));
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if body.len() >= 2 * quote.len() && body.starts_with(quote) && body.ends_with(quote) {
            return Some(body[quote.len()..body.len() - quote.len()].to_string());
        }
    }
    None
}

/// Extract text content of a node
pub fn node_text(node: Node, source: &str) -> String {
    source[node.byte_range()].to_string()
}

/// Node text with all whitespace removed, for dotted names split over lines
pub fn dotted_text(node: Node, source: &str) -> String {
    source[node.byte_range()].chars().filter(|c| !c.is_whitespace()).collect()
}

fn line_of(node: Node) -> usize {
    node.start_position().row + 1
}
