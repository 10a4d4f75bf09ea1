//! Theses and thesis subjects
//!
//! Handles `PHD_THESIS` and `ABS` records. Identifiers are either a
//! national thesis number (NNT, defended theses) or a subject number
//! (`s` + digits, theses in preparation); both go into a single search
//! query per packet. PPN-shaped identifiers cannot be searched here and
//! never match.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::{full_name, list, search_url, text, text_or_nr, EnrichmentStrategy};
use crate::fields::{Field, MULTI_VALUE_SEPARATOR, NOT_APPLICABLE, NOT_FOUND, NOT_PROVIDED};
use crate::mapping::MappingTables;
use crate::query::{documents_by_id, Payload, QueryAnswer, QueryRequest};
use crate::record::{Record, RecordKind};

static NNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[0-9]{4}[a-z]{2}[0-9a-z]{2}[0-9a-z]+$").expect("valid NNT pattern")
});

static SUBJECT_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^s[0-9]+$").expect("valid subject number pattern"));

/// Thesis status values of the search API
const STATUS_IN_PROGRESS: &str = "enCours";
const STATUS_DEFENDED: &str = "soutenue";

/// How a thesis identifier can be searched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThesisIdentifier {
    Nnt,
    SubjectNumber,
    /// Anything else, typically a PPN
    Unsupported,
}

impl ThesisIdentifier {
    pub fn classify(id: &str) -> Self {
        if NNT.is_match(id) {
            ThesisIdentifier::Nnt
        } else if SUBJECT_NUMBER.is_match(id) {
            ThesisIdentifier::SubjectNumber
        } else {
            ThesisIdentifier::Unsupported
        }
    }
}

pub struct ThesisStrategy {
    api_url: String,
    mappings: Arc<MappingTables>,
}

impl ThesisStrategy {
    pub fn new(api_url: impl Into<String>, mappings: Arc<MappingTables>) -> Self {
        Self {
            api_url: api_url.into(),
            mappings,
        }
    }

    /// `nnt:(A OR B) OR numSujet:("s1" OR "s2")`, `None` when nothing is searchable
    pub fn search_query(identifiers: &[String]) -> Option<(String, Vec<String>)> {
        let mut nnts = Vec::new();
        let mut subjects = Vec::new();

        for id in identifiers {
            match ThesisIdentifier::classify(id) {
                ThesisIdentifier::Nnt => nnts.push(id.clone()),
                ThesisIdentifier::SubjectNumber => subjects.push(id.clone()),
                ThesisIdentifier::Unsupported => {
                    debug!(unitid = %id, "Identifier cannot be searched as a thesis")
                }
            }
        }

        let mut clauses = Vec::new();
        if !nnts.is_empty() {
            clauses.push(format!("nnt:({})", nnts.join(" OR ")));
        }
        if !subjects.is_empty() {
            clauses.push(format!("numSujet:(\"{}\")", subjects.join("\" OR \"")));
        }
        if clauses.is_empty() {
            return None;
        }

        nnts.extend(subjects);
        Some((clauses.join(" OR "), nnts))
    }

    /// Fields shared by theses in preparation and defended theses
    fn apply_common(&self, record: &mut Record, doc: &Value) {
        if let Some(name) = text(doc, "etabSoutenanceN") {
            record.set(Field::EtabSoutenanceN, name);
        }
        if let Some(ppn) = text(doc, "etabSoutenancePpn") {
            record.set(Field::EtabSoutenancePpn, ppn);
            if let Some(code) = self.mappings.short_code(ppn) {
                record.set(Field::CodeCourt, code);
                record.set(Field::PlatformName, code);
            }
        }
        if let Some(status) = text(doc, "status") {
            record.set(Field::Statut, status);
        }
        if let Some(discipline) = text(doc, "discipline") {
            record.set(Field::Discipline, discipline);
        }

        match list(doc, "partenairesDeRecherche") {
            Some(partners) => {
                record.set(Field::PartenaireRechercheN, join(partners, |p| text_or_nr(p, "nom").to_string()));
                record.set(Field::PartenaireRecherchePpn, join_ppns(partners));
            }
            None => {
                record.set(Field::PartenaireRechercheN, NOT_PROVIDED);
                record.set(Field::PartenaireRecherchePpn, NOT_PROVIDED);
            }
        }

        if let Some(authors) = doc.get("auteurs").and_then(Value::as_array) {
            record.set(Field::AuteurN, join(authors, full_name));
            record.set(Field::AuteurPpn, join_ppns(authors));
        }
        if let Some(directors) = doc.get("directeurs").and_then(Value::as_array) {
            record.set(Field::DirecteurN, join(directors, full_name));
            record.set(Field::DirecteurPpn, join_ppns(directors));
        }

        let president = doc.get("president").unwrap_or(&Value::Null);
        match (text(president, "nom"), text(president, "prenom")) {
            (Some(nom), Some(prenom)) => record.set(Field::PresidentN, format!("{} {}", nom, prenom)),
            _ => record.set(Field::PresidentN, NOT_PROVIDED),
        }
        record.set(Field::PresidentPpn, text_or_nr(president, "ppn"));

        set_jury(record, doc, "rapporteurs", Field::RapporteursN, Field::RapporteursPpn);
        set_jury(record, doc, "examinateurs", Field::MembresN, Field::MembresPpn);

        record.mark_not_applicable(
            [
                Field::PersonneN,
                Field::PersonnePpn,
                Field::OrganismeN,
                Field::OrganismePpn,
            ]
            .into_iter()
            .chain(Field::IDP),
        );
    }

    fn apply_in_progress(&self, record: &mut Record, doc: &Value) {
        record.set(Field::Nnt, text_or_nr(doc, "nnt"));
        if let Some(id) = text(doc, "id") {
            record.set(Field::NumSujet, id);
        }

        match text(doc, "dateSoutenance") {
            Some(date) => {
                record.set(Field::DateSoutenance, date);
                record.set(Field::AnneeSoutenance, year_of(date));
            }
            None => {
                record.set(Field::DateSoutenance, NOT_PROVIDED);
                record.set(Field::AnneeSoutenance, NOT_PROVIDED);
            }
        }

        if let Some(date) = text(doc, "datePremiereInscriptionDoctorat") {
            record.set(Field::DateInscription, date);
            record.set(Field::AnneeInscription, year_of(date));
        }

        if let Some(schools) = doc.get("ecolesDoctorale").and_then(Value::as_array) {
            record.set(
                Field::EcoleDoctoraleN,
                join(schools, |s| text(s, "nom").unwrap_or_default().to_string()),
            );
            record.set(Field::EcoleDoctoralePpn, join_ppns(schools));
        }
    }

    fn apply_defended(&self, record: &mut Record, doc: &Value) {
        if let Some(nnt) = text(doc, "nnt") {
            record.set(Field::Nnt, nnt);
        }
        record.set(Field::NumSujet, NOT_APPLICABLE);

        if let Some(date) = text(doc, "dateSoutenance") {
            record.set(Field::DateSoutenance, date);
            record.set(Field::AnneeSoutenance, year_of(date));
        }
        record.mark_not_applicable([Field::DateInscription, Field::AnneeInscription]);

        match list(doc, "ecolesDoctorale") {
            Some(schools) => {
                record.set(Field::EcoleDoctoraleN, join(schools, |s| text_or_nr(s, "nom").to_string()));
                record.set(Field::EcoleDoctoralePpn, join_ppns(schools));
            }
            None => {
                record.set(Field::EcoleDoctoraleN, NOT_PROVIDED);
                record.set(Field::EcoleDoctoralePpn, NOT_PROVIDED);
            }
        }

        // Authenticated access to a defended thesis
        if let Some(provider) = record.identity_provider.clone() {
            match self.mappings.institution(&provider) {
                Some(institution) => {
                    record.set(Field::IdpEtabNom, institution.label.as_str());
                    record.set(Field::IdpEtabPpn, institution.ppn.as_str());
                    record.set(Field::IdpEtabCodeCourt, institution.short_code.as_str());
                }
                None => {
                    for field in Field::IDP {
                        record.set(field, NOT_FOUND);
                    }
                }
            }
        }
    }
}

impl EnrichmentStrategy for ThesisStrategy {
    fn namespace(&self) -> &'static str {
        "thesesfr"
    }

    fn accepts(&self, record: &Record) -> bool {
        record.is_kind(&[RecordKind::PhdThesis, RecordKind::Abstract])
    }

    fn build_requests(&self, identifiers: &[String]) -> Vec<QueryRequest> {
        match Self::search_query(identifiers) {
            Some((query, searched)) => vec![QueryRequest {
                url: search_url(&self.api_url, "theses/recherche/", &query),
                identifiers: searched,
                payload: Payload::JsonArray("theses"),
            }],
            None => Vec::new(),
        }
    }

    fn parse_response(&self, _request: &QueryRequest, answer: QueryAnswer) -> Vec<(String, Value)> {
        match answer {
            QueryAnswer::Documents(docs) => documents_by_id(docs),
            QueryAnswer::NotFound | QueryAnswer::Text(_) => Vec::new(),
        }
    }

    fn apply(&self, record: &mut Record, document: &Value) -> bool {
        if !document.is_object() {
            return false;
        }

        self.apply_common(record, document);
        match text(document, "status") {
            Some(STATUS_IN_PROGRESS) => self.apply_in_progress(record, document),
            Some(STATUS_DEFENDED) => self.apply_defended(record, document),
            _ => {}
        }
        true
    }
}

/// Characters 6..10 of a `dd/mm/yyyy` date
fn year_of(date: &str) -> String {
    date.chars().skip(6).take(4).collect()
}

fn join(items: &[Value], render: impl Fn(&Value) -> String) -> String {
    items
        .iter()
        .map(render)
        .collect::<Vec<_>>()
        .join(MULTI_VALUE_SEPARATOR)
}

fn join_ppns(items: &[Value]) -> String {
    join(items, |item| text_or_nr(item, "ppn").to_string())
}

/// Reviewers and jury members: `NR` for missing names or PPNs
fn set_jury(record: &mut Record, doc: &Value, key: &str, names: Field, ppns: Field) {
    match list(doc, key) {
        Some(members) => {
            record.set(
                names,
                join(members, |m| match text(m, "nom") {
                    Some(_) => full_name(m),
                    None => NOT_PROVIDED.to_string(),
                }),
            );
            record.set(ppns, join_ppns(members));
        }
        None => {
            record.set(names, NOT_PROVIDED);
            record.set(ppns, NOT_PROVIDED);
        }
    }
}
