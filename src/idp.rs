//! Identity provider stage
//!
//! Synchronous per-record mapping: a record carrying a
//! `Shib-Identity-Provider` known to the institution table gets
//! `idp_etab_nom`, `idp_etab_ppn` and `idp_etab_code_court`. Records without
//! a provider, or with an unknown one, pass through untouched.

use std::sync::Arc;
use tracing::debug;

use crate::fields::Field;
use crate::mapping::MappingTables;
use crate::record::Record;

#[derive(Debug, Clone)]
pub struct IdentityProviderStage {
    mappings: Arc<MappingTables>,
}

impl IdentityProviderStage {
    pub fn new(mappings: Arc<MappingTables>) -> Self {
        Self { mappings }
    }

    /// Map one record; returns whether it was enriched
    pub fn apply(&self, record: &mut Record) -> bool {
        let Some(provider) = record.identity_provider.as_deref() else {
            return false;
        };
        let Some(institution) = self.mappings.institution(provider) else {
            debug!(provider, "Identity provider not in institution table");
            return false;
        };

        let institution = institution.clone();
        record.set(Field::IdpEtabNom, institution.label);
        record.set(Field::IdpEtabPpn, institution.ppn);
        record.set(Field::IdpEtabCodeCourt, institution.short_code);
        true
    }
}
