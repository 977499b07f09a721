use std::path::Path;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{RouteScribeError, Result};

#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub passed: bool,
    pub stdout: String,
}

/// Runs a generated test file with the framework its prompt targeted
pub struct TestRunner {
    prompt_type: String,
    program: String,
}

impl TestRunner {
    pub fn new(prompt_type: &str) -> Self {
        Self {
            prompt_type: prompt_type.to_string(),
            program: "pytest".to_string(),
        }
    }

    /// Use another executable in place of `pytest`
    pub fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    pub async fn run(&self, file: &Path) -> Result<TestOutcome> {
        if self.prompt_type != "pytest" {
            return Err(RouteScribeError::TestRunner(format!(
                "{} not implemented use: pytest",
                self.prompt_type
            )));
        }

        let output = Command::new(&self.program)
            .arg(file)
            .args(["-W", "ignore::DeprecationWarning"])
            .output()
            .await
            .map_err(|e| RouteScribeError::TestRunner(format!("Failed to run {}: {}", self.program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        info!("{}", stdout);
        if !output.status.success() {
            warn!("Tests failed or encountered errors: {}", file.display());
        }

        Ok(TestOutcome {
            passed: output.status.success(),
            stdout,
        })
    }
}
