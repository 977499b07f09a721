use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use super::context::ContextBundle;
use super::llm::GeneratedArtifact;

/// JSON manifest of one generation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub application: Option<String>,
    pub generated: Vec<ReportEntry>,
    pub skipped: Vec<String>,
    pub failed: Vec<FailedEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub identifier: String,
    pub file: PathBuf,
    pub status: String,
    pub tokens_used: Option<u32>,
    /// SHA-256 of the handler source the test was generated from
    pub handler_sha256: String,
    pub function_calls: usize,
    pub models: usize,
    pub tables: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedEndpoint {
    pub identifier: String,
    pub error: String,
}

impl RunReport {
    pub fn new(application: Option<String>) -> Self {
        Self {
            generated_at: Utc::now(),
            application,
            generated: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn record(&mut self, bundle: &ContextBundle, artifact: &GeneratedArtifact, file: &Path) {
        self.generated.push(ReportEntry {
            identifier: bundle.route_definition.clone(),
            file: file.to_path_buf(),
            status: artifact.status.clone(),
            tokens_used: artifact.tokens_used,
            handler_sha256: calculate_hash(&bundle.source_code),
            function_calls: bundle.function_calls.len(),
            models: bundle.models.len(),
            tables: bundle.table_defs.len(),
        });
    }

    pub fn skip(&mut self, identifier: &str) {
        self.skipped.push(identifier.to_string());
    }

    pub fn fail(&mut self, identifier: &str, error: impl ToString) {
        self.failed.push(FailedEndpoint {
            identifier: identifier.to_string(),
            error: error.to_string(),
        });
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Calculate SHA256 hash of content
fn calculate_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_write() {
        let bundle = ContextBundle::new("def a():\n    pass\n", "main.py", "/a", "/a_GET");
        let artifact = GeneratedArtifact::success("def test_a(): pass", Some(42));

        let mut report = RunReport::new(Some("main.py:app".to_string()));
        report.record(&bundle, &artifact, Path::new("tests/a/test_a_GET.py"));
        report.skip("/b_POST");
        report.fail("/c_GET", "boom");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        report.write(&path).unwrap();

        let loaded: RunReport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.generated.len(), 1);
        assert_eq!(loaded.generated[0].tokens_used, Some(42));
        assert_eq!(loaded.generated[0].handler_sha256.len(), 64);
        assert_eq!(loaded.skipped, vec!["/b_POST"]);
        assert_eq!(loaded.failed[0].error, "boom");
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(calculate_hash("abc"), calculate_hash("abc"));
        assert_ne!(calculate_hash("abc"), calculate_hash("abd"));
    }
}
