use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Asset, MediaKind, UserIdentity};

/// A unit of watermark work for one (asset, user) pair.
///
/// The payload is informational: workers re-read the asset and the
/// processing row from the store before acting on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub asset_id: i64,
    pub user_id: String,
    pub asset_path: PathBuf,
    #[serde(rename = "asset_type")]
    pub asset_kind: MediaKind,
    /// Label material; the worker formats the final watermark text.
    pub user_email: String,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(asset: &Asset, kind: MediaKind, user: &UserIdentity) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            asset_id: asset.id,
            user_id: user.id.clone(),
            asset_path: asset.path.clone(),
            asset_kind: kind,
            user_email: user.email.clone(),
            created_at: Utc::now(),
        }
    }

    /// Text embedded into the output, identical for every media kind.
    pub fn watermark_label(&self) -> String {
        if self.user_email.is_empty() {
            self.user_id.clone()
        } else {
            format!("{} ({})", self.user_id, self.user_email)
        }
    }
}
