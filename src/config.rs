use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RouteScribeError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// LLM provider (anthropic, openai)
    pub provider: String,

    /// Model name; provider default when unset
    pub model: Option<String>,

    /// API key (falls back to the provider's environment variable)
    pub api_key: Option<String>,

    /// Base URL for proxies or compatible endpoints
    pub base_url: Option<String>,

    /// Maximum tokens for LLM responses
    pub max_tokens: Option<u32>,

    /// Temperature for LLM responses (0.0 to 1.0)
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Source scanning and symbol resolution
    pub scanning: ScanningConfig,

    /// Test generation settings
    pub generation: GenerationConfig,

    /// Template customization
    pub templates: TemplateConfig,

    /// LLM integration settings
    pub llm: LlmConfig,

    /// Optional schema store used to describe touched tables
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Directory containing the web application
    pub source_dir: PathBuf,

    /// Directories whose definitions count as user code; empty means `source_dir`
    pub project_roots: Vec<PathBuf>,

    /// Where generated tests are written; `<source_dir>/tests` when unset
    pub test_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanningConfig {
    /// Constructor that marks the application root
    pub app_constructor: String,

    /// Constructor that marks a router
    pub router_constructor: String,

    /// Source file extension to scan
    pub file_extension: String,

    /// Path segments containing any of these are never scanned
    pub excluded_dir_markers: Vec<String>,

    /// Base classes that identify data-model types
    pub model_bases: Vec<String>,

    /// Modules whose functions never count as user code
    pub builtin_modules: Vec<String>,

    /// Maximum file size to parse (in bytes)
    pub max_file_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Prompt flavour; only "pytest" is built in
    pub prompt_type: String,

    /// Regenerate tests that already exist
    pub overwrite: bool,

    /// Run each generated test file
    pub run_tests: bool,

    /// Executable that runs generated tests
    pub test_program: String,

    /// Extension of generated test files
    pub test_file_extension: String,

    /// Only endpoints whose route name matches
    pub function_name: Option<String>,

    /// Only endpoints whose path contains this text
    pub route_path: Option<String>,

    pub additional_prompt_pre: Option<String>,
    pub additional_prompt_info: Option<String>,
    pub mock_prompt: Option<String>,
    pub fixtures_prompt: Option<String>,
    pub additional_prompt_after: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Prompt template replacing the built-in one
    pub prompt_template: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// "sqlite" (synchronous) or "postgres" (asynchronous)
    pub backend: String,

    /// Connection string handed to the backend as-is
    pub url: String,

    /// Overrides for the column/constraint/index queries
    #[serde(default)]
    pub queries: Option<QueryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub columns: String,
    pub constraints: String,
    pub indexes: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            project_roots: Vec::new(),
            test_dir: None,
        }
    }
}

impl Default for ScanningConfig {
    fn default() -> Self {
        Self {
            app_constructor: "FastAPI".to_string(),
            router_constructor: "APIRouter".to_string(),
            file_extension: "py".to_string(),
            excluded_dir_markers: vec![
                "venv".to_string(),
                "env".to_string(),
                "site-packages".to_string(),
            ],
            model_bases: vec!["BaseModel".to_string()],
            builtin_modules: [
                "__builtin__",
                "builtins",
                "sys",
                "os",
                "importlib",
                "collections",
                "math",
            ]
            .iter()
            .map(|m| m.to_string())
            .collect(),
            max_file_size: 1024 * 1024, // 1MB
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            prompt_type: "pytest".to_string(),
            overwrite: false,
            run_tests: false,
            test_program: "pytest".to_string(),
            test_file_extension: "py".to_string(),
            function_name: None,
            route_path: None,
            additional_prompt_pre: None,
            additional_prompt_info: None,
            mock_prompt: None,
            fixtures_prompt: None,
            additional_prompt_after: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: None,
            api_key: None,
            base_url: None,
            max_tokens: Some(2048),
            temperature: Some(0.0),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| RouteScribeError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => {
                if p.as_ref().exists() {
                    Self::load(p)
                } else {
                    Err(RouteScribeError::Config(format!(
                        "config file {} does not exist",
                        p.as_ref().display()
                    )))
                }
            }
            None => {
                // Try common config file locations
                let candidates = [
                    "RouteScribe.toml",
                    "routescribe.toml",
                    ".routescribe.toml",
                ];

                for candidate in &candidates {
                    if Path::new(candidate).exists() {
                        return Self::load(candidate);
                    }
                }

                Ok(Self::default())
            }
        }
    }

    /// Roots whose definitions count as user code
    pub fn project_roots(&self) -> Vec<PathBuf> {
        if self.project.project_roots.is_empty() {
            vec![self.project.source_dir.clone()]
        } else {
            self.project.project_roots.clone()
        }
    }

    /// Directory generated tests land in
    pub fn test_dir(&self) -> PathBuf {
        self.project
            .test_dir
            .clone()
            .unwrap_or_else(|| self.project.source_dir.join("tests"))
    }
}
