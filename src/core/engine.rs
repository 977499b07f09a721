use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::RouteScribeError;
use super::context::{ContextBundle, ContextExtractor};
use super::index::ProjectIndex;
use super::layout::TestLayout;
use super::llm::{create_generator, GeneratedArtifact, PromptRenderer, PromptSections, TestGenerator};
use super::loader::{EndpointDescriptor, ModuleLoader, ModuleRegistry};
use super::report::RunReport;
use super::runner::TestRunner;
use super::scanner::{SourceLocation, SourceScanner};
use super::schema::{create_backend, SchemaBackend};

/// Paths that are never worth a generated test
const DENYLIST_SUBSTRINGS: &[&str] = &["/openapi.json", "/docs", "/redoc"];
const DENYLIST_EXACT: &[&str] = &["/static"];

/// Outcome of one `generate` run
#[derive(Debug)]
pub struct GenerationRun {
    /// One pair per written test file, in endpoint-selection order
    pub results: Vec<(ContextBundle, GeneratedArtifact)>,
    pub report: RunReport,
}

/// Main orchestration engine: discovery, extraction, generation
pub struct Engine {
    config: Config,
    generator: Option<Box<dyn TestGenerator>>,
}

impl Engine {
    /// Create an engine; the LLM provider is set up on the first `generate`
    pub fn new(config: Config) -> Self {
        debug!("Loaded configuration: {:?}", config);
        Self {
            config,
            generator: None,
        }
    }

    /// Create an engine that generates through `generator`
    pub fn with_generator(config: Config, generator: Box<dyn TestGenerator>) -> Self {
        Self {
            config,
            generator: Some(generator),
        }
    }

    /// Locate the application root under the source directory
    pub fn find_app(&self) -> Result<SourceLocation> {
        let source_dir = &self.config.project.source_dir;
        let mut scanner = SourceScanner::new(&self.config.scanning)?;
        let location = scanner.scan(source_dir)?.ok_or_else(|| {
            RouteScribeError::Discovery(source_dir.display().to_string())
        })?;
        Ok(location)
    }

    /// Index the project and load the application's endpoints
    fn load(&self) -> Result<(ModuleRegistry, SourceLocation, Vec<EndpointDescriptor>)> {
        let location = self.find_app()?;

        let mut roots = self.config.project_roots();
        let source_dir = self.config.project.source_dir.clone();
        if !is_under_any(&source_dir, &roots) {
            roots.push(source_dir);
        }
        let index = ProjectIndex::build(&roots, &self.config.scanning)
            .context("Failed to index project sources")?;

        let mut registry = ModuleRegistry::new(index);
        let loader = ModuleLoader::new(&self.config.scanning);
        let endpoints = loader.load(&mut registry, &location)?.endpoints.clone();

        Ok((registry, location, endpoints))
    }

    async fn schema_backend(&self) -> Option<SchemaBackend> {
        let database = self.config.database.as_ref()?;
        match create_backend(database).await {
            Ok(backend) => {
                let mode = if backend.is_async() { "async" } else { "sync" };
                info!("Schema store enabled ({}, {})", database.backend, mode);
                Some(backend)
            }
            Err(e) => {
                warn!("Schema store unavailable, continuing without table descriptions: {}", e);
                None
            }
        }
    }

    /// Build context bundles for the selected endpoints without generating
    pub async fn inspect(&self) -> Result<Vec<ContextBundle>> {
        let (registry, location, endpoints) = self.load()?;
        info!("Inspecting {} endpoints of {}", endpoints.len(), location);

        let generation = &self.config.generation;
        let selected = select_endpoints(&endpoints, generation.function_name.as_deref(), generation.route_path.as_deref());
        let backend = self.schema_backend().await;
        let mut extractor = ContextExtractor::new(registry.index(), &self.config.scanning)?;

        let mut bundles = Vec::new();
        for endpoint in selected {
            match extractor.extract(endpoint) {
                Ok(mut bundle) => {
                    if let Some(backend) = &backend {
                        backend.augment(&mut bundle).await;
                    }
                    bundles.push(bundle);
                }
                Err(e) => warn!("Skipping {}: {}", endpoint.identifier(), e),
            }
        }
        Ok(bundles)
    }

    /// Generate a test file for every selected endpoint that lacks one
    pub async fn generate(&mut self, report_path: Option<&Path>) -> Result<GenerationRun> {
        let (registry, location, endpoints) = self.load()?;

        let generation = self.config.generation.clone();
        let renderer = PromptRenderer::new(&generation.prompt_type, self.config.templates.prompt_template.as_deref())?;
        if self.generator.is_none() {
            let generator = create_generator(&self.config.llm)?;
            info!("LLM provider: {} ({})", generator.provider_name(), generator.model_name());
            self.generator = Some(generator);
        }
        let Some(generator) = self.generator.as_deref() else {
            return Err(RouteScribeError::Config("No LLM provider configured".to_string()).into());
        };

        let layout = TestLayout::new(self.config.test_dir(), &generation.test_file_extension);
        if !layout.test_dir().exists() {
            std::fs::create_dir_all(layout.test_dir()).with_context(|| {
                format!("Failed to create test directory {}", layout.test_dir().display())
            })?;
        }

        let selected = select_endpoints(&endpoints, generation.function_name.as_deref(), generation.route_path.as_deref());
        info!("Generating tests for {} of {} endpoints", selected.len(), endpoints.len());

        let backend = self.schema_backend().await;
        let runner = generation
            .run_tests
            .then(|| TestRunner::new(&generation.prompt_type).with_program(&generation.test_program));
        let mut extractor = ContextExtractor::new(registry.index(), &self.config.scanning)?;

        let mut report = RunReport::new(Some(location.to_string()));
        let mut results = Vec::new();

        for (position, endpoint) in selected.iter().enumerate() {
            let identifier = endpoint.identifier();
            debug!("{}/{}: {}", position + 1, selected.len(), identifier);

            let file = layout.path_for(&endpoint.path, &endpoint.methods);
            if file.exists() && !generation.overwrite {
                info!("Skipping test '{}' already exists", file.display());
                report.skip(&identifier);
                continue;
            }

            let mut bundle = match extractor.extract(endpoint) {
                Ok(bundle) => bundle,
                Err(e) => {
                    warn!("Skipping {}: {}", identifier, e);
                    report.fail(&identifier, e);
                    continue;
                }
            };
            if let Some(backend) = &backend {
                backend.augment(&mut bundle).await;
            }

            let prompt = match renderer.render(&PromptSections::for_bundle(&bundle, &generation)) {
                Ok(prompt) => prompt,
                Err(e) => {
                    warn!("Failed to render prompt for {}: {}", identifier, e);
                    report.fail(&identifier, e);
                    continue;
                }
            };
            debug!("{}", prompt);

            let artifact = match generator.generate(&prompt).await {
                Ok(artifact) => artifact,
                Err(e) => {
                    warn!("Generation failed for {}: {}", identifier, e);
                    report.fail(&identifier, e);
                    continue;
                }
            };

            if let Err(e) = write_test_file(&layout, &file, &artifact.content) {
                error!("Failed to write {}: {}", file.display(), e);
                report.fail(&identifier, e);
                continue;
            }
            info!("Wrote {}", file.display());

            if let Some(runner) = &runner {
                match runner.run(&file).await {
                    Ok(outcome) if outcome.passed => info!("Tests passed: {}", file.display()),
                    Ok(_) => {}
                    Err(e) => error!("{}", e),
                }
            }

            report.record(&bundle, &artifact, &file);
            results.push((bundle, artifact));
        }

        if let Some(path) = report_path {
            report
                .write(path)
                .with_context(|| format!("Failed to write run report {}", path.display()))?;
            info!("Run report written to {}", path.display());
        }

        info!(
            "Generated {}, skipped {}, failed {}",
            results.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(GenerationRun { results, report })
    }
}

fn write_test_file(layout: &TestLayout, file: &Path, content: &str) -> crate::error::Result<()> {
    layout.prepare(file)?;
    std::fs::write(file, content)
        .map_err(|e| RouteScribeError::FileSystem(format!("{}: {}", file.display(), e)))
}

fn is_under_any(path: &Path, roots: &[PathBuf]) -> bool {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    roots.iter().any(|root| {
        let root = root.canonicalize().unwrap_or_else(|_| root.clone());
        path.starts_with(root)
    })
}

/// Whether a path is an introspection or static route
pub fn is_denylisted(path: &str) -> bool {
    DENYLIST_SUBSTRINGS.iter().any(|s| path.contains(s)) || DENYLIST_EXACT.contains(&path)
}

/// Endpoints matching the route-name and path-substring filters (both when
/// both are given, all when neither is), minus denylisted paths
pub fn select_endpoints<'e>(
    endpoints: &'e [EndpointDescriptor],
    function_name: Option<&str>,
    route_path: Option<&str>,
) -> Vec<&'e EndpointDescriptor> {
    endpoints
        .iter()
        .filter(|e| function_name.map_or(true, |name| e.name == name))
        .filter(|e| route_path.map_or(true, |path| e.path.contains(path)))
        .filter(|e| !is_denylisted(&e.path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use assert_fs::prelude::*;
    use predicates::prelude::*;
    use crate::core::call_graph::SymbolId;

    struct CountingGenerator {
        calls: Arc<AtomicUsize>,
        fail_on: Option<String>,
    }

    #[async_trait::async_trait]
    impl TestGenerator for CountingGenerator {
        async fn generate(&self, prompt: &str) -> crate::error::Result<GeneratedArtifact> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(marker) = &self.fail_on {
                if prompt.contains(marker.as_str()) {
                    return Err(RouteScribeError::Generation("provider down".to_string()));
                }
            }
            Ok(GeneratedArtifact::success("def test_generated():\n    assert True\n", Some(7)))
        }

        fn provider_name(&self) -> &str {
            "Counting"
        }

        fn model_name(&self) -> &str {
            "none"
        }
    }

    const APP: &str = r#"
from fastapi import FastAPI
from pydantic import BaseModel

app = FastAPI()

class Item(BaseModel):
    name: str

def helper():
    return 1

@app.get("/a")
def read_a() -> Item:
    return helper()

@app.post("/b")
def create_b(item: Item):
    return item

@app.get("/docs/extra")
def docs_extra():
    pass
"#;

    fn project() -> assert_fs::TempDir {
        let dir = assert_fs::TempDir::new().unwrap();
        dir.child("app/main.py").write_str(APP).unwrap();
        dir
    }

    fn engine(dir: &assert_fs::TempDir, configure: impl FnOnce(&mut Config)) -> (Engine, Arc<AtomicUsize>) {
        let mut config = Config::default();
        config.project.source_dir = dir.path().join("app");
        config.project.test_dir = Some(dir.path().join("tests"));
        configure(&mut config);

        let calls = Arc::new(AtomicUsize::new(0));
        let generator = CountingGenerator {
            calls: calls.clone(),
            fail_on: None,
        };
        (Engine::with_generator(config, Box::new(generator)), calls)
    }

    fn endpoint(path: &str, name: &str) -> EndpointDescriptor {
        EndpointDescriptor {
            path: path.to_string(),
            methods: BTreeSet::from(["GET".to_string()]),
            name: name.to_string(),
            handler: SymbolId::new("main.py", name),
            response_model: None,
        }
    }

    #[test]
    fn test_filters_and_denylist() {
        let endpoints = vec![
            endpoint("/users", "list_users"),
            endpoint("/users/{id}", "read_user"),
            endpoint("/items", "read_user"),
            endpoint("/openapi.json", "openapi"),
            endpoint("/static", "static"),
            endpoint("/static/css", "css"),
        ];
        let paths = |selected: Vec<&EndpointDescriptor>| selected.iter().map(|e| e.path.clone()).collect::<Vec<_>>();

        assert_eq!(
            paths(select_endpoints(&endpoints, None, None)),
            vec!["/users", "/users/{id}", "/items", "/static/css"]
        );
        assert_eq!(paths(select_endpoints(&endpoints, Some("read_user"), None)), vec!["/users/{id}", "/items"]);
        assert_eq!(paths(select_endpoints(&endpoints, None, Some("/users"))), vec!["/users", "/users/{id}"]);
        assert_eq!(paths(select_endpoints(&endpoints, Some("read_user"), Some("/users"))), vec!["/users/{id}"]);
    }

    #[tokio::test]
    async fn test_generate_then_skip_existing() {
        let dir = project();
        let (mut engine, calls) = engine(&dir, |config| {
            config.generation.route_path = Some("/a".to_string());
        });

        let first = engine.generate(None).await.unwrap();
        assert_eq!(first.results.len(), 1);
        let (bundle, artifact) = &first.results[0];
        assert_eq!(bundle.route_definition, "/a_GET");
        assert_eq!(bundle.function_calls.keys().collect::<Vec<_>>(), vec!["helper"]);
        assert_eq!(bundle.models.names(), vec!["Item"]);
        assert_eq!(artifact.tokens_used, Some(7));
        dir.child("tests/a/test_a_GET.py")
            .assert(predicate::str::contains("def test_generated"));

        let second = engine.generate(None).await.unwrap();
        assert!(second.results.is_empty());
        assert_eq!(second.report.skipped, vec!["/a_GET"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_overwrite_regenerates_deterministically() {
        let dir = project();
        let (mut engine, calls) = engine(&dir, |config| {
            config.generation.overwrite = true;
        });

        let first = engine.generate(None).await.unwrap();
        let second = engine.generate(None).await.unwrap();
        assert_eq!(first.results.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        for ((a, _), (b, _)) in first.results.iter().zip(&second.results) {
            assert_eq!(a.function_calls.keys().collect::<Vec<_>>(), b.function_calls.keys().collect::<Vec<_>>());
            assert_eq!(a.models, b.models);
        }
    }

    #[tokio::test]
    async fn test_generation_failure_only_drops_that_endpoint() {
        let dir = project();
        let mut config = Config::default();
        config.project.source_dir = dir.path().join("app");
        config.project.test_dir = Some(dir.path().join("tests"));
        let generator = CountingGenerator {
            calls: Arc::new(AtomicUsize::new(0)),
            fail_on: Some("def create_b".to_string()),
        };
        let mut engine = Engine::with_generator(config, Box::new(generator));

        let report_path = dir.path().join("report.json");
        let run = engine.generate(Some(&report_path)).await.unwrap();
        assert_eq!(run.results.len(), 1);
        assert_eq!(run.report.failed[0].identifier, "/b_POST");
        dir.child("tests/b/test_b_POST.py").assert(predicate::path::missing());
        dir.child("report.json").assert(predicate::str::contains("/a_GET"));
    }

    #[tokio::test]
    async fn test_missing_application_is_a_discovery_error() {
        let dir = assert_fs::TempDir::new().unwrap();
        dir.child("app/util.py").write_str("def f():\n    pass\n").unwrap();
        let (mut engine, _) = engine(&dir, |_| {});

        let err = engine.generate(None).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<RouteScribeError>(), Some(RouteScribeError::Discovery(_))));
        assert_eq!(
            err.to_string(),
            format!("No application root found under {}", dir.path().join("app").display())
        );
    }

    #[tokio::test]
    async fn test_unwritable_test_file_only_drops_that_endpoint() {
        let dir = project();
        // a plain file where the /a test directory should go
        dir.child("tests/a").write_str("not a directory").unwrap();
        let (mut engine, calls) = engine(&dir, |_| {});

        let run = engine.generate(None).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(run.report.failed.len(), 1);
        assert_eq!(run.report.failed[0].identifier, "/a_GET");
        let written: Vec<_> = run.results.iter().map(|(b, _)| b.route_definition.as_str()).collect();
        assert_eq!(written, vec!["/b_POST"]);
        dir.child("tests/b/test_b_POST.py").assert(predicate::path::exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_test_run_keeps_generated_files() {
        let dir = project();
        let (mut engine, _) = engine(&dir, |config| {
            config.generation.run_tests = true;
            config.generation.test_program = "false".to_string();
        });

        let run = engine.generate(None).await.unwrap();
        assert!(run.report.failed.is_empty());
        let written: Vec<_> = run.results.iter().map(|(b, _)| b.route_definition.as_str()).collect();
        assert_eq!(written, vec!["/a_GET", "/b_POST"]);
        dir.child("tests/a/test_a_GET.py").assert(predicate::path::exists());
    }

    #[tokio::test]
    async fn test_missing_test_program_does_not_abort_the_run() {
        let dir = project();
        let (mut engine, _) = engine(&dir, |config| {
            config.generation.run_tests = true;
            config.generation.test_program = "routescribe-no-such-binary".to_string();
        });

        let run = engine.generate(None).await.unwrap();
        assert_eq!(run.results.len(), 2);
        assert!(run.report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_inspect_with_sqlite_schema() {
        let dir = assert_fs::TempDir::new().unwrap();
        dir.child("app/main.py")
            .write_str("app = FastAPI()\n\n@app.get(\"/users\")\ndef list_users():\n    return db.execute(\"SELECT * FROM users\")\n")
            .unwrap();
        let db_path = dir.path().join("app.db");
        rusqlite::Connection::open(&db_path)
            .unwrap()
            .execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);")
            .unwrap();

        let (engine, calls) = engine(&dir, |config| {
            config.database = Some(crate::config::DatabaseConfig {
                backend: "sqlite".to_string(),
                url: db_path.to_string_lossy().to_string(),
                queries: None,
            });
        });

        let bundles = engine.inspect().await.unwrap();
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].table_defs.keys().collect::<Vec<_>>(), vec!["users"]);
        assert!(bundles[0].table_markdowns[0].contains("| name | TEXT | YES |  |"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_find_app() {
        let dir = project();
        let (engine, _) = engine(&dir, |_| {});
        let location = engine.find_app().unwrap();
        assert!(location.file.ends_with("app/main.py"));
        assert_eq!(location.root_name.as_deref(), Some("app"));
    }
}
