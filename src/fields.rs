//! Flat output schema shared by every entity kind
//!
//! All stages write into the same set of output attributes. A field that
//! does not apply to a record's kind is filled with [`NOT_APPLICABLE`] so
//! downstream CSV consumers see one uniform column set.

use std::fmt;

/// Field does not apply to this record kind
pub const NOT_APPLICABLE: &str = "sans objet";

/// Field applies but the metadata service did not provide it
pub const NOT_PROVIDED: &str = "NR";

/// Identity provider could not be matched against the institution table
pub const NOT_FOUND: &str = "Non trouvé";

/// Separator between repeated values (authors, directors, ...)
pub const MULTI_VALUE_SEPARATOR: &str = " / ";

/// Output attribute names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Nnt,
    NumSujet,
    EtabSoutenanceN,
    EtabSoutenancePpn,
    CodeCourt,
    DateSoutenance,
    AnneeSoutenance,
    DateInscription,
    AnneeInscription,
    Statut,
    Discipline,
    EcoleDoctoraleN,
    EcoleDoctoralePpn,
    PartenaireRechercheN,
    PartenaireRecherchePpn,
    AuteurN,
    AuteurPpn,
    DirecteurN,
    DirecteurPpn,
    PresidentN,
    PresidentPpn,
    RapporteursN,
    RapporteursPpn,
    MembresN,
    MembresPpn,
    PersonneN,
    PersonnePpn,
    OrganismeN,
    OrganismePpn,
    IdpEtabNom,
    IdpEtabPpn,
    IdpEtabCodeCourt,
    PlatformName,
    // Legacy biography stage
    PersonneNom,
    PersonnePrenom,
}

impl Field {
    /// Every field of the shared output schema, in column order
    pub const OUTPUT: [Field; 33] = [
        Field::Nnt,
        Field::NumSujet,
        Field::EtabSoutenanceN,
        Field::EtabSoutenancePpn,
        Field::CodeCourt,
        Field::DateSoutenance,
        Field::AnneeSoutenance,
        Field::DateInscription,
        Field::AnneeInscription,
        Field::Statut,
        Field::Discipline,
        Field::EcoleDoctoraleN,
        Field::EcoleDoctoralePpn,
        Field::PartenaireRechercheN,
        Field::PartenaireRecherchePpn,
        Field::AuteurN,
        Field::AuteurPpn,
        Field::DirecteurN,
        Field::DirecteurPpn,
        Field::PresidentN,
        Field::PresidentPpn,
        Field::RapporteursN,
        Field::RapporteursPpn,
        Field::MembresN,
        Field::MembresPpn,
        Field::PersonneN,
        Field::PersonnePpn,
        Field::OrganismeN,
        Field::OrganismePpn,
        Field::IdpEtabNom,
        Field::IdpEtabPpn,
        Field::IdpEtabCodeCourt,
        Field::PlatformName,
    ];

    /// Fields owned by the identity provider mapping
    pub const IDP: [Field; 3] = [Field::IdpEtabNom, Field::IdpEtabPpn, Field::IdpEtabCodeCourt];

    /// Name of the attribute in the EC
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Nnt => "nnt",
            Field::NumSujet => "numSujet",
            Field::EtabSoutenanceN => "etabSoutenanceN",
            Field::EtabSoutenancePpn => "etabSoutenancePpn",
            Field::CodeCourt => "codeCourt",
            Field::DateSoutenance => "dateSoutenance",
            Field::AnneeSoutenance => "anneeSoutenance",
            Field::DateInscription => "dateInscription",
            Field::AnneeInscription => "anneeInscription",
            Field::Statut => "statut",
            Field::Discipline => "discipline",
            Field::EcoleDoctoraleN => "ecoleDoctoraleN",
            Field::EcoleDoctoralePpn => "ecoleDoctoralePpn",
            Field::PartenaireRechercheN => "partenaireRechercheN",
            Field::PartenaireRecherchePpn => "partenaireRecherchePpn",
            Field::AuteurN => "auteurN",
            Field::AuteurPpn => "auteurPpn",
            Field::DirecteurN => "directeurN",
            Field::DirecteurPpn => "directeurPpn",
            Field::PresidentN => "presidentN",
            Field::PresidentPpn => "presidentPpn",
            Field::RapporteursN => "rapporteursN",
            Field::RapporteursPpn => "rapporteursPpn",
            Field::MembresN => "membresN",
            Field::MembresPpn => "membresPpn",
            Field::PersonneN => "personneN",
            Field::PersonnePpn => "personnePpn",
            Field::OrganismeN => "organismeN",
            Field::OrganismePpn => "organismePpn",
            Field::IdpEtabNom => "idp_etab_nom",
            Field::IdpEtabPpn => "idp_etab_ppn",
            Field::IdpEtabCodeCourt => "idp_etab_code_court",
            Field::PlatformName => "platform_name",
            Field::PersonneNom => "personneNom",
            Field::PersonnePrenom => "personnePrenom",
        }
    }

    /// Every output field except the given ones
    pub fn output_except(keep: &[Field]) -> impl Iterator<Item = Field> + '_ {
        Self::OUTPUT.into_iter().filter(move |f| !keep.contains(f))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
