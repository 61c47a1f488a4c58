//! Read access to plans, issues and photos.
//!
//! The relational store that owns these records is someone else's concern;
//! rendering only needs a handful of lookups, expressed by [`PlanStore`].
//! [`ManifestStore`] answers them from a JSON project manifest, which is
//! what the CLI and the bundled server use.

use crate::error::PlanmarkError;
use crate::model::{IssueRecord, PhotoRecord, PlanRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Lookups the preview, report and crop operations need.
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn plan(&self, plan_id: i64) -> Result<Option<PlanRecord>, PlanmarkError>;

    async fn issue(&self, issue_id: i64) -> Result<Option<IssueRecord>, PlanmarkError>;

    /// All issues on a plan, in no particular order.
    async fn issues_for_plan(&self, plan_id: i64) -> Result<Vec<IssueRecord>, PlanmarkError>;

    /// Photos of one issue, in upload order.
    async fn photos_for_issue(&self, issue_id: i64) -> Result<Vec<PhotoRecord>, PlanmarkError>;
}

/// On-disk shape of a project manifest.
///
/// ```json
/// {
///   "plans":  [{"id": 1, "name": "Level 2", "file_path": "plans/l2.pdf"}],
///   "issues": [{"id": 10, "plan_id": 1, "page": 1, "x_norm": 0.4, "y_norm": 0.3, "title": "Crack"}],
///   "photos": [{"id": 100, "issue_id": 10, "filename": "crack.jpg"}]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub plans: Vec<PlanRecord>,
    #[serde(default)]
    pub issues: Vec<IssueRecord>,
    #[serde(default)]
    pub photos: Vec<PhotoRecord>,
}

/// Read-only [`PlanStore`] over an in-memory [`Manifest`].
#[derive(Debug, Clone, Default)]
pub struct ManifestStore {
    manifest: Manifest,
}

impl ManifestStore {
    pub fn new(manifest: Manifest) -> Self {
        Self { manifest }
    }

    pub fn from_json(json: &str) -> Result<Self, PlanmarkError> {
        let manifest: Manifest = serde_json::from_str(json)
            .map_err(|e| PlanmarkError::Store(format!("manifest is not valid JSON: {e}")))?;
        Ok(Self::new(manifest))
    }

    pub async fn from_path(path: &Path) -> Result<Self, PlanmarkError> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PlanmarkError::Store(format!("cannot read {}: {e}", path.display())))?;
        let store = Self::from_json(&json)?;
        info!(
            "Loaded manifest {}: {} plan(s), {} issue(s), {} photo(s)",
            path.display(),
            store.manifest.plans.len(),
            store.manifest.issues.len(),
            store.manifest.photos.len()
        );
        Ok(store)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }
}

#[async_trait]
impl PlanStore for ManifestStore {
    async fn plan(&self, plan_id: i64) -> Result<Option<PlanRecord>, PlanmarkError> {
        Ok(self.manifest.plans.iter().find(|p| p.id == plan_id).cloned())
    }

    async fn issue(&self, issue_id: i64) -> Result<Option<IssueRecord>, PlanmarkError> {
        Ok(self.manifest.issues.iter().find(|i| i.id == issue_id).cloned())
    }

    async fn issues_for_plan(&self, plan_id: i64) -> Result<Vec<IssueRecord>, PlanmarkError> {
        Ok(self
            .manifest
            .issues
            .iter()
            .filter(|i| i.plan_id == plan_id)
            .cloned()
            .collect())
    }

    async fn photos_for_issue(&self, issue_id: i64) -> Result<Vec<PhotoRecord>, PlanmarkError> {
        Ok(self
            .manifest
            .photos
            .iter()
            .filter(|p| p.issue_id == issue_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "plans": [{"id": 1, "name": "Level 2", "file_path": "plans/l2.pdf"}],
        "issues": [
            {"id": 10, "plan_id": 1, "page": 1, "x_norm": 0.4, "y_norm": 0.3, "title": "Crack"},
            {"id": 11, "plan_id": 2, "page": 1, "x_norm": 0.1, "y_norm": 0.1, "title": "Other plan"}
        ],
        "photos": [
            {"id": 100, "issue_id": 10, "filename": "a.jpg"},
            {"id": 101, "issue_id": 10, "filename": "b.jpg", "stored_path": "https://x.test/b.jpg"}
        ]
    }"#;

    #[tokio::test]
    async fn lookups_filter_by_owner() {
        let store = ManifestStore::from_json(JSON).unwrap();
        let plan = store.plan(1).await.unwrap().unwrap();
        assert_eq!(plan.revision, 1);
        assert!(store.plan(9).await.unwrap().is_none());
        assert_eq!(store.issues_for_plan(1).await.unwrap().len(), 1);
        assert_eq!(store.photos_for_issue(10).await.unwrap().len(), 2);
        assert!(store.photos_for_issue(11).await.unwrap().is_empty());
    }

    #[test]
    fn malformed_manifest_is_a_store_error() {
        let err = ManifestStore::from_json("{plans: nope}").unwrap_err();
        assert!(matches!(err, PlanmarkError::Store(_)));
    }

    #[tokio::test]
    async fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");
        std::fs::write(&path, JSON).unwrap();
        let store = ManifestStore::from_path(&path).await.unwrap();
        assert_eq!(store.manifest().photos.len(), 2);
    }
}
