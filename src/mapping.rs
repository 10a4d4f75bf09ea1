//! Institution mapping tables
//!
//! Two tables published as SPARQL JSON results (`results.bindings`):
//!
//! - short codes: institution PPN -> short code (`codeCourt`)
//! - identity providers: Shibboleth IdP URI -> institution label, PPN and
//!   short code
//!
//! Each table is fetched once at start-up. When the remote answer is not a
//! 200 with a `results.bindings` array, the local copy is read instead.
//! Failing both is fatal for the stages that need the table.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::query::HttpFetcher;
use crate::types::{EnrichError, Result};

/// Where to load the tables from
#[derive(Debug, Clone)]
pub struct MappingSources {
    pub short_code_url: String,
    pub short_code_file: PathBuf,
    pub idp_url: String,
    pub idp_file: PathBuf,
}

/// Institution matched from an identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Institution {
    pub label: String,
    pub ppn: String,
    pub short_code: String,
}

#[derive(Debug, Deserialize)]
struct Literal {
    value: String,
}

#[derive(Debug, Deserialize)]
struct ShortCodeBinding {
    ppn: Option<Literal>,
    #[serde(rename = "codeCourt")]
    code_court: Option<Literal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdpBinding {
    idp_renater: Option<Literal>,
    etab_label: Option<Literal>,
    ppn: Option<Literal>,
    code_etab: Option<Literal>,
}

/// Loaded mapping tables
#[derive(Debug, Clone, Default)]
pub struct MappingTables {
    short_codes: HashMap<String, String>,
    identity_providers: HashMap<String, Institution>,
}

impl MappingTables {
    /// Load both tables concurrently
    pub async fn load(fetcher: &dyn HttpFetcher, sources: &MappingSources) -> Result<Self> {
        let (short_codes, identity_providers) = tokio::join!(
            load_bindings(fetcher, "code court", &sources.short_code_url, &sources.short_code_file),
            load_bindings(fetcher, "idp", &sources.idp_url, &sources.idp_file),
        );

        let tables = Self::from_bindings(short_codes?, identity_providers?);
        info!(
            short_codes = tables.short_codes.len(),
            identity_providers = tables.identity_providers.len(),
            "Mapping tables loaded"
        );
        Ok(tables)
    }

    /// Build from raw bindings; incomplete bindings are skipped.
    /// The first binding wins when a key repeats.
    fn from_bindings(short_codes: Vec<Value>, identity_providers: Vec<Value>) -> Self {
        let mut tables = Self::default();

        for binding in short_codes {
            let Ok(ShortCodeBinding {
                ppn: Some(ppn),
                code_court: Some(code),
            }) = serde_json::from_value::<ShortCodeBinding>(binding)
            else {
                continue;
            };
            tables.short_codes.entry(ppn.value).or_insert(code.value);
        }

        for binding in identity_providers {
            let Ok(IdpBinding {
                idp_renater: Some(idp),
                etab_label: Some(label),
                ppn: Some(ppn),
                code_etab: Some(code),
            }) = serde_json::from_value::<IdpBinding>(binding)
            else {
                continue;
            };
            tables.identity_providers.entry(idp.value).or_insert(Institution {
                label: label.value,
                ppn: ppn.value,
                short_code: code.value,
            });
        }

        tables
    }

    /// Short code of the institution with this PPN
    pub fn short_code(&self, ppn: &str) -> Option<&str> {
        self.short_codes.get(ppn).map(String::as_str)
    }

    /// Institution behind a Shibboleth identity provider
    pub fn institution(&self, identity_provider: &str) -> Option<&Institution> {
        self.identity_providers.get(identity_provider)
    }

    pub fn with_short_code(mut self, ppn: impl Into<String>, code: impl Into<String>) -> Self {
        self.short_codes.insert(ppn.into(), code.into());
        self
    }

    pub fn with_institution(mut self, identity_provider: impl Into<String>, institution: Institution) -> Self {
        self.identity_providers
            .insert(identity_provider.into(), institution);
        self
    }
}

/// `results.bindings` of a SPARQL JSON document
fn bindings(mut doc: Value) -> Option<Vec<Value>> {
    match doc.pointer_mut("/results/bindings").map(Value::take) {
        Some(Value::Array(bindings)) => Some(bindings),
        _ => None,
    }
}

async fn load_bindings(
    fetcher: &dyn HttpFetcher,
    table: &str,
    url: &str,
    fallback: &Path,
) -> Result<Vec<Value>> {
    match fetch_bindings(fetcher, url).await {
        Ok(found) => {
            info!(table, url, "Mapping table loaded from web service");
            return Ok(found);
        }
        Err(reason) => {
            warn!(table, url, reason = %reason, "Mapping web service unavailable, using local copy");
        }
    }

    let content = tokio::fs::read_to_string(fallback)
        .await
        .map_err(|e| EnrichError::MappingLoad {
            table: table.to_string(),
            reason: format!("{}: {}", fallback.display(), e),
        })?;

    let doc: Value = serde_json::from_str(&content).map_err(|e| EnrichError::MappingLoad {
        table: table.to_string(),
        reason: format!("{}: {}", fallback.display(), e),
    })?;

    let found = bindings(doc).ok_or_else(|| EnrichError::MappingLoad {
        table: table.to_string(),
        reason: format!("{}: no results.bindings array", fallback.display()),
    })?;

    info!(table, file = %fallback.display(), "Mapping table loaded from local copy");
    Ok(found)
}

async fn fetch_bindings(fetcher: &dyn HttpFetcher, url: &str) -> std::result::Result<Vec<Value>, String> {
    let response = fetcher.get(url).await.map_err(|e| e.to_string())?;
    if response.status != 200 {
        return Err(format!("status {}", response.status));
    }
    let doc: Value = serde_json::from_slice(&response.body).map_err(|e| e.to_string())?;
    bindings(doc).ok_or_else(|| "no results.bindings array".to_string())
}
