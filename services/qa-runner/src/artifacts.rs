//! Artifact files of a run.

use std::path::{Path, PathBuf};

use qa_core::render::render;
use qa_core::{QaResult, Report, ReportFormat};
use qa_load::LoadRunReport;
use serde::Serialize;
use tracing::info;

use crate::external::SuiteResult;

pub const LOAD_SUMMARY_FILE: &str = "load-summary.json";

/// Writes artifacts under one directory, created on first use.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn write(&self, file_name: &str, contents: String) -> QaResult<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(file_name);
        tokio::fs::write(&path, contents).await?;
        info!(path = %path.display(), "artifact written");
        Ok(path)
    }

    async fn write_json<T: Serialize>(&self, file_name: &str, value: &T) -> QaResult<PathBuf> {
        self.write(file_name, serde_json::to_string_pretty(value)?).await
    }

    /// The structured and human-readable report, rendered from the same value.
    pub async fn write_report(&self, report: &Report) -> QaResult<Vec<PathBuf>> {
        let mut written = Vec::new();
        for format in [ReportFormat::Json, ReportFormat::Markdown] {
            if let Some(file_name) = format.file_name() {
                written.push(self.write(file_name, render(report, format)?).await?);
            }
        }
        Ok(written)
    }

    pub async fn write_load_summary(&self, load: &LoadRunReport) -> QaResult<PathBuf> {
        self.write_json(LOAD_SUMMARY_FILE, load).await
    }

    /// One `test-results-<service>.json` per suite.
    pub async fn write_test_results(&self, suites: &[SuiteResult]) -> QaResult<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(suites.len());
        for suite in suites {
            written.push(
                self.write_json(&format!("test-results-{}.json", suite.service), suite)
                    .await?,
            );
        }
        Ok(written)
    }
}
