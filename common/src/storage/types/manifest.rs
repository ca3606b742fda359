use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Durable output of the extraction stage: one record per page, replayable
/// into the indexers without re-running extraction.

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChartDescription {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub key_points: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableColumn {
    pub name: String,
    /// Ordered cell values; `null` marks an empty cell.
    #[serde(default)]
    pub values: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TableData {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub columns: Vec<TableColumn>,
}

/// Structured payload the extraction collaborator returns for one page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PageExtraction {
    #[serde(default)]
    pub tables: Vec<TableData>,
    #[serde(default)]
    pub charts: Vec<ChartDescription>,
    #[serde(default)]
    pub narrative_text: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PageOutcome {
    Complete,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestPage {
    pub document_path: String,
    pub document_id: String,
    pub page_number: u32,
    pub outcome: PageOutcome,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub extraction: Option<PageExtraction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestionManifest {
    pub created_at: DateTime<Utc>,
    pub pages: Vec<ManifestPage>,
}

impl IngestionManifest {
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            pages: Vec::new(),
        }
    }

    pub fn record_success(
        &mut self,
        document_path: &str,
        document_id: &str,
        page_number: u32,
        extraction: PageExtraction,
    ) {
        self.pages.push(ManifestPage {
            document_path: document_path.to_owned(),
            document_id: document_id.to_owned(),
            page_number,
            outcome: PageOutcome::Complete,
            error: None,
            extraction: Some(extraction),
        });
    }

    pub fn record_failure(
        &mut self,
        document_path: &str,
        document_id: &str,
        page_number: u32,
        error: &str,
    ) {
        self.pages.push(ManifestPage {
            document_path: document_path.to_owned(),
            document_id: document_id.to_owned(),
            page_number,
            outcome: PageOutcome::Failed,
            error: Some(error.to_owned()),
            extraction: None,
        });
    }

    pub async fn save(&self, path: &Path) -> Result<(), AppError> {
        let rendered = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, rendered).await?;
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self, AppError> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl Default for IngestionManifest {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_extraction() -> PageExtraction {
        PageExtraction {
            tables: vec![TableData {
                title: Some("Revenue".into()),
                notes: Some("in kSEK".into()),
                columns: vec![
                    TableColumn {
                        name: "Quarter".into(),
                        values: vec![json!("Q1"), json!("Q2")],
                    },
                    TableColumn {
                        name: "Amount".into(),
                        values: vec![json!(100), json!(120)],
                    },
                ],
            }],
            charts: vec![ChartDescription {
                title: Some("Growth".into()),
                summary: Some("Revenue trend upward".into()),
                key_points: vec!["Q2 +20%".into()],
            }],
            narrative_text: "Revenue grew over the period.".into(),
        }
    }

    #[tokio::test]
    async fn manifest_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("manifest.json");

        let mut manifest = IngestionManifest::new();
        manifest.record_success("report.pdf", "doc-1", 1, sample_extraction());
        manifest.record_failure("report.pdf", "doc-1", 2, "rate limited");

        manifest.save(&path).await.expect("save manifest");
        let loaded = IngestionManifest::load(&path).await.expect("load manifest");

        assert_eq!(loaded.pages, manifest.pages);
        assert_eq!(loaded.pages[1].outcome, PageOutcome::Failed);
        assert_eq!(loaded.pages[1].error.as_deref(), Some("rate limited"));
    }

    #[test]
    fn extraction_tolerates_missing_fields() {
        // Collaborator output with absent keys must parse to empty defaults.
        let parsed: PageExtraction = serde_json::from_str("{}").expect("parse empty object");
        assert!(parsed.tables.is_empty());
        assert!(parsed.charts.is_empty());
        assert!(parsed.narrative_text.is_empty());
    }
}
