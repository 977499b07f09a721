//! Data-model detection over type annotations.

use std::path::Path;
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use tree_sitter::Node;

use crate::config::ScanningConfig;
use crate::error::Result;
use super::call_graph::SymbolId;
use super::index::{ProjectIndex, Resolved};
use super::loader::EndpointDescriptor;
use super::parser::{dotted_text, is_dotted_name, node_text, string_literal, with_expression, PythonParser};

/// Bound on base-class chains when deciding whether a class is a model
const MAX_BASE_DEPTH: usize = 16;

/// A structured data-model class
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelType {
    pub id: SymbolId,
    pub name: String,
    pub source: String,
}

/// Model types keyed by identity, in first-seen order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelSet(IndexMap<SymbolId, ModelType>);

impl ModelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the type was already present
    pub fn insert(&mut self, model: ModelType) -> bool {
        if self.0.contains_key(&model.id) {
            return false;
        }
        self.0.insert(model.id.clone(), model);
        true
    }

    pub fn extend(&mut self, other: ModelSet) {
        for model in other.0.into_values() {
            self.insert(model);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelType> {
        self.0.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.values().map(|m| m.name.as_str()).collect()
    }
}

impl Serialize for ModelSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.values())
    }
}

pub struct ModelCollector<'a> {
    index: &'a ProjectIndex,
    parser: PythonParser,
    model_bases: Vec<String>,
}

impl<'a> ModelCollector<'a> {
    pub fn new(index: &'a ProjectIndex, config: &ScanningConfig) -> Result<Self> {
        Ok(Self {
            index,
            parser: PythonParser::new()?,
            model_bases: config.model_bases.clone(),
        })
    }

    /// Models referenced by the parameter and return annotations of
    /// `callable`, plus the endpoint's response model when given
    pub fn collect(&mut self, callable: &SymbolId, endpoint: Option<&EndpointDescriptor>) -> ModelSet {
        let mut models = ModelSet::new();

        if let Some(func) = self.index.function(callable) {
            let annotations: Vec<String> = func
                .params
                .iter()
                .filter_map(|p| p.annotation.clone())
                .chain(func.returns.clone())
                .collect();
            for annotation in annotations {
                models.extend(self.from_annotation(&callable.file_path, &annotation));
            }
        }

        if let Some(response_model) = endpoint.and_then(|e| e.response_model.as_ref()) {
            models.extend(self.from_annotation(&response_model.module, &response_model.expr));
        }

        models
    }

    /// Models named by one annotation, unwrapping a single generic level
    pub fn from_annotation(&mut self, module: &Path, annotation: &str) -> ModelSet {
        let names = with_expression(&mut self.parser, annotation, |node, source| {
            let mut names = Vec::new();
            annotation_names(node, source, 0, &mut names);
            names
        })
        .unwrap_or_default();

        let mut models = ModelSet::new();
        for name in names {
            if let Some(Resolved::Class(id)) = self.index.resolve(module, &name) {
                if self.is_model(&id, 0) {
                    if let Some(class) = self.index.class(&id) {
                        models.insert(ModelType {
                            id: id.clone(),
                            name: class.name.clone(),
                            source: class.source.clone(),
                        });
                    }
                }
            }
        }
        models
    }

    /// Whether a project class derives, directly or through other project
    /// classes, from a configured model base
    pub fn is_model(&self, id: &SymbolId, depth: usize) -> bool {
        if depth > MAX_BASE_DEPTH {
            return false;
        }
        let Some(class) = self.index.class(id) else {
            return false;
        };

        class.bases.iter().any(|base| {
            let base = base.split('[').next().unwrap_or(base).trim();
            match self.index.resolve(&id.file_path, base) {
                Some(Resolved::Class(parent)) => self.is_model(&parent, depth + 1),
                Some(Resolved::External { module, name }) => {
                    let last = if name.is_empty() { module.as_str() } else { name.as_str() };
                    self.is_model_base(last)
                }
                Some(_) => false,
                None => self.is_model_base(base),
            }
        })
    }

    fn is_model_base(&self, dotted: &str) -> bool {
        let last = dotted.rsplit('.').next().unwrap_or(dotted);
        self.model_bases.iter().any(|b| b == last)
    }
}

/// Dotted names an annotation may refer to. Level 0 is the annotation
/// itself; subscripts and `|` unions open level 1, beyond which nothing is
/// unwrapped.
fn annotation_names(node: Node, source: &str, level: usize, names: &mut Vec<String>) {
    match node.kind() {
        "identifier" | "attribute" => names.push(dotted_text(node, source)),
        "string" => {
            if let Some(name) = string_literal(&node_text(node, source)) {
                if is_dotted_name(&name) {
                    names.push(name);
                }
            }
        }
        "subscript" if level == 0 => {
            let mut cursor = node.walk();
            for argument in node.children_by_field_name("subscript", &mut cursor) {
                annotation_names(argument, source, level + 1, names);
            }
        }
        "binary_operator" if level == 0 => {
            for member in union_members(node, source) {
                annotation_names(member, source, level + 1, names);
            }
        }
        _ => {}
    }
}

/// Flatten `A | B | C` into its members
fn union_members<'t>(node: Node<'t>, source: &str) -> Vec<Node<'t>> {
    let is_union = node.kind() == "binary_operator"
        && node
            .child_by_field_name("operator")
            .map_or(false, |op| node_text(op, source) == "|");
    if !is_union {
        return vec![node];
    }

    let mut members = Vec::new();
    for side in ["left", "right"] {
        if let Some(child) = node.child_by_field_name(side) {
            members.extend(union_members(child, source));
        }
    }
    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use crate::core::index::tests::{index_of, path_of};
    use crate::core::loader::TypeRef;

    const MODELS: &str = r#"
from pydantic import BaseModel
import pydantic

class UserModel(BaseModel):
    name: str

class Item(pydantic.BaseModel):
    id: int

class Admin(UserModel):
    level: int

class Plain:
    pass
"#;

    fn collect(handler_source: &str, response_model: Option<&str>) -> Vec<String> {
        let (_dir, index) = index_of(&[("models.py", MODELS), ("main.py", handler_source)]);
        let main = path_of(&index, "main.py");
        let mut collector = ModelCollector::new(&index, &ScanningConfig::default()).unwrap();
        let endpoint = response_model.map(|expr| EndpointDescriptor {
            path: "/x".to_string(),
            methods: BTreeSet::from(["GET".to_string()]),
            name: "handler".to_string(),
            handler: SymbolId::new(&main, "handler"),
            response_model: Some(TypeRef { module: main.clone(), expr: expr.to_string() }),
        });
        collector
            .collect(&SymbolId::new(&main, "handler"), endpoint.as_ref())
            .iter()
            .map(|m| m.name.clone())
            .collect()
    }

    #[test]
    fn test_optional_and_list_collapse_to_one_model() {
        let models = collect(
            "from typing import Optional\nfrom models import UserModel\n\ndef handler(user: Optional[UserModel]) -> list[UserModel]:\n    pass\n",
            None,
        );
        assert_eq!(models, vec!["UserModel"]);
    }

    #[test]
    fn test_response_model_merged() {
        let models = collect(
            "from models import UserModel, Item\n\ndef handler(user: UserModel):\n    pass\n",
            Some("list[Item]"),
        );
        assert_eq!(models, vec!["UserModel", "Item"]);
    }

    #[test]
    fn test_unions_forward_refs_and_inherited_bases() {
        let models = collect(
            "import models\nfrom models import Admin, Plain\n\ndef handler(a: \"Admin\", b: models.Item | None, c: dict[str, Plain], d: int) -> Admin:\n    pass\n",
            None,
        );
        assert_eq!(models, vec!["Admin", "Item"]);
    }

    #[test]
    fn test_nested_generics_are_not_unwrapped() {
        let models = collect(
            "from typing import Optional, List\nfrom models import UserModel\n\ndef handler(users: Optional[List[UserModel]]):\n    pass\n",
            None,
        );
        assert!(models.is_empty());
    }

    #[test]
    fn test_model_set_serializes_as_sequence() {
        let mut set = ModelSet::new();
        let model = ModelType {
            id: SymbolId::new("models.py", "User"),
            name: "User".to_string(),
            source: "class User(BaseModel): ...".to_string(),
        };
        assert!(set.insert(model.clone()));
        assert!(!set.insert(model));
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["name"], "User");
    }
}
