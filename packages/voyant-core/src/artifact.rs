//! Artifact Reference (§3): `{artifact_id, job_id, tenant_id, kind, format,
//! uri, size_bytes, checksum, created_at}`, the shape `list_artifacts`
//! (§6.1) returns. Immutable once constructed — the generator pipeline
//! (§4.4) produces one per canonical artifact key it returns; a job owns
//! its artifacts (§3 ownership).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ArtifactId, JobId, TenantId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactReference {
    pub artifact_id: ArtifactId,
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub kind: String,
    pub format: String,
    pub uri: String,
    pub size_bytes: u64,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

impl ArtifactReference {
    /// `kind` is the canonical artifact key a generator advertised (e.g.
    /// `"profile.json"`); `format` is derived from its extension rather
    /// than asked of the generator a second time.
    pub fn new(
        job_id: JobId,
        tenant_id: TenantId,
        kind: impl Into<String>,
        uri: impl Into<String>,
        size_bytes: u64,
        checksum: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let kind = kind.into();
        let format = kind
            .rsplit('.')
            .next()
            .filter(|ext| *ext != kind)
            .unwrap_or("bin")
            .to_string();
        Self {
            artifact_id: ArtifactId::new(),
            job_id,
            tenant_id,
            kind,
            format,
            uri: uri.into(),
            size_bytes,
            checksum: checksum.into(),
            created_at,
        }
    }
}
