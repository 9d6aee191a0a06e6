//! Tenant settings model.

use serde::{Deserialize, Serialize};

use super::Metadata;

/// External configuration owned by one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub tenant_id: String,
    pub values: Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Request body for replacing settings.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSettingsRequest {
    pub values: Metadata,
}
