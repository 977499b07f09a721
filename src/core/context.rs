//! Context bundles: everything known about one endpoint, gathered before
//! generation.

use std::path::PathBuf;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::config::ScanningConfig;
use crate::error::{RouteScribeError, Result};
use super::call_graph::{CallGraphWalker, SymbolId, UserCodePolicy};
use super::index::ProjectIndex;
use super::loader::EndpointDescriptor;
use super::models::{ModelCollector, ModelSet};
use super::schema::TableSchema;

/// A user function reached from the handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalledFunction {
    pub id: SymbolId,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextBundle {
    /// Handler source, decorators included
    pub source_code: String,
    pub file_path: PathBuf,
    /// Routed path the handler serves
    pub endpoint_path: String,
    /// `<path>_<METHODS>`; unique per endpoint within a run
    pub route_definition: String,
    pub models: ModelSet,
    /// Call-site name to resolved user function; never contains the handler
    pub function_calls: IndexMap<String, CalledFunction>,
    pub table_markdowns: Vec<String>,
    pub table_defs: IndexMap<String, TableSchema>,
}

impl ContextBundle {
    pub fn new(
        source_code: impl Into<String>,
        file_path: impl Into<PathBuf>,
        endpoint_path: impl Into<String>,
        route_definition: impl Into<String>,
    ) -> Self {
        Self {
            source_code: source_code.into(),
            file_path: file_path.into(),
            endpoint_path: endpoint_path.into(),
            route_definition: route_definition.into(),
            models: ModelSet::new(),
            function_calls: IndexMap::new(),
            table_markdowns: Vec::new(),
            table_defs: IndexMap::new(),
        }
    }

    /// Source of every model, one after the other
    pub fn models_source(&self) -> String {
        self.models.iter().map(|m| format!("{}\n", m.source)).collect()
    }

    /// Source of every called function, blank-line separated
    pub fn functions_source(&self) -> String {
        self.function_calls
            .values()
            .map(|f| format!("{}\n\n", f.source))
            .collect()
    }

    /// Table descriptions, newline separated
    pub fn tables_markdown(&self) -> String {
        format!("{}\n", self.table_markdowns.join("\n"))
    }
}

/// Builds bundles from the project index
pub struct ContextExtractor<'a> {
    index: &'a ProjectIndex,
    policy: UserCodePolicy,
    collector: ModelCollector<'a>,
}

impl<'a> ContextExtractor<'a> {
    pub fn new(index: &'a ProjectIndex, config: &ScanningConfig) -> Result<Self> {
        Ok(Self {
            index,
            policy: UserCodePolicy::new(index.roots(), config),
            collector: ModelCollector::new(index, config)?,
        })
    }

    /// Handler source, call graph and models for one endpoint. Schema data
    /// is added separately.
    pub fn extract(&mut self, endpoint: &EndpointDescriptor) -> Result<ContextBundle> {
        let handler = self.index.function(&endpoint.handler).ok_or_else(|| {
            RouteScribeError::Resolution(format!("handler {} has no definition", endpoint.handler))
        })?;

        let mut bundle = ContextBundle::new(
            handler.source.clone(),
            endpoint.handler.file_path.clone(),
            endpoint.path.clone(),
            endpoint.identifier(),
        );

        let walker = CallGraphWalker::new(self.index, &self.policy);
        for (name, id) in walker.walk_from(&endpoint.handler) {
            if let Some(func) = self.index.function(&id) {
                bundle.function_calls.insert(
                    name,
                    CalledFunction {
                        id: id.clone(),
                        source: func.source.clone(),
                    },
                );
            }
        }

        bundle.models = self.collector.collect(&endpoint.handler, Some(endpoint));
        for called in bundle.function_calls.values() {
            let models = self.collector.collect(&called.id, None);
            bundle.models.extend(models);
        }

        debug!(
            "{}: {} calls, models {:?}",
            bundle.route_definition,
            bundle.function_calls.len(),
            bundle.models.names()
        );
        Ok(bundle)
    }
}
