//! Resource shapes returned by the resident portal API
//!
//! Field names follow the vendor's camelCase JSON. Strings the portal is
//! known to send as `null` are optional.

use serde::{Deserialize, Serialize};

/// `GET /resident`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Resident {
    pub code_client: String,
    pub nom_client: String,
    pub occupations: Vec<Occupation>,
    pub resident: ResidentIdentity,
}

/// Link between the resident and a unit
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Occupation {
    pub code_site: String,
    pub date_debut: Option<String>,
    pub date_fin: Option<String>,
    /// Unit ("local") id used by every other endpoint
    pub logement_id: String,
    pub resident_id: String,
    pub type_occupation: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ResidentIdentity {
    pub civilite: Option<String>,
    pub email: String,
    pub id: String,
    pub nom: String,
    pub prenom: String,
    pub telephone: Option<String>,
    pub date_last_connection: Option<String>,
}

/// `GET /local/{id}`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Local {
    /// Fluids billed for this unit
    pub fluides_restitues: Vec<Fluid>,
    pub local: LocalInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Fluid {
    /// Fluid key, e.g. `EauFroide`, `EauChaude`, `Cetc`
    pub fluide: String,
    pub type_distribution: Option<String>,
    pub type_releve: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalInfo {
    pub adresse: Address,
    pub batiment: Option<String>,
    pub code_site: String,
    pub etage: Option<String>,
    pub id: String,
    pub identification_local: Option<String>,
    pub is_patrimoine_harmonie: bool,
    pub numero_lot: Option<String>,
    pub numero_porte: Option<String>,
    pub reference_client: Option<String>,
    pub tantieme: f64,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub usage: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Address {
    pub code_postal: Option<String>,
    pub complement: Option<String>,
    pub numero_rue: Option<String>,
    pub pays: Option<String>,
    pub ville: Option<String>,
}

/// `GET /local/{id}/conso/dashboard/{fluid}`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Dashboard {
    pub fluide: String,
    pub local_id: String,
    pub conso_moyenne: f64,
    pub conso_dernier_mois: f64,
    /// Year-to-date consumption, reset by the portal on January 1st
    pub conso_cumulee_annee_courante: f64,
    pub unite: String,
    pub conso_mois_courant: f64,
    pub date_derniere_releve: Option<String>,
}

/// One meter from `POST /local/indexes/demande`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Device {
    pub appareil_id: String,
    /// Report date of the reading
    pub date: String,
    pub emplacement: Option<String>,
    pub fluide: String,
    /// Meter serial number
    pub numero_compteur_appareil: String,
    pub unite: String,
    /// Absolute reading
    pub valeur_index: f64,
}

/// Body the portal returns in place of data while it is down
#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceResponse {
    #[serde(rename = "IsOnline")]
    pub is_online: bool,
    #[serde(rename = "MaintenancePageUrl", default)]
    pub maintenance_page_url: Option<String>,
    #[serde(rename = "ErrorMessage", default)]
    pub error_message: Option<String>,
}

impl MaintenanceResponse {
    /// Recognize a maintenance body; anything else is an ordinary failure
    pub fn detect(body: &[u8]) -> Option<Self> {
        serde_json::from_slice::<Self>(body)
            .ok()
            .filter(|m| !m.is_online)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IndexDemandRequest<'a> {
    pub local_id: &'a str,
    pub token: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local_with_nulls() {
        let body = r#"{
            "fluidesRestitues": [
                {"fluide": "EauFroide", "typeDistribution": "Individuelle", "typeReleve": null},
                {"fluide": "Cetc", "typeDistribution": null, "typeReleve": "Radio"}
            ],
            "local": {
                "adresse": {"codePostal": "69003", "complement": null, "numeroRue": "12 rue X",
                            "pays": "France", "ville": "Lyon"},
                "batiment": "B", "codeSite": "S1", "etage": null, "id": "L-42",
                "identificationLocal": "A12", "isPatrimoineHarmonie": false,
                "numeroLot": null, "numeroPorte": "12", "referenceClient": "RC",
                "tantieme": 12.5, "type": "Appartement", "usage": "Habitation"
            }
        }"#;
        let local: Local = serde_json::from_str(body).unwrap();
        assert_eq!(local.local.id, "L-42");
        assert_eq!(local.fluides_restitues.len(), 2);
        assert_eq!(local.local.kind.as_deref(), Some("Appartement"));
        assert!(local.local.etage.is_none());
    }

    #[test]
    fn test_parse_device() {
        let body = r#"{"appareilId":"A1","date":"2024-03-01T00:00:00","emplacement":"Cuisine",
            "fluide":"EauFroide","numeroCompteurAppareil":"SN-001","unite":"m3","valeurIndex":123.456}"#;
        let device: Device = serde_json::from_str(body).unwrap();
        assert_eq!(device.numero_compteur_appareil, "SN-001");
        assert!((device.valeur_index - 123.456).abs() < f64::EPSILON);
    }

    #[test]
    fn test_maintenance_detection() {
        let down = br#"{"IsOnline":false,"MaintenancePageUrl":"https://m.example","ErrorMessage":"Maintenance"}"#;
        let detected = MaintenanceResponse::detect(down).unwrap();
        assert_eq!(detected.error_message.as_deref(), Some("Maintenance"));

        assert!(MaintenanceResponse::detect(br#"{"IsOnline":true}"#).is_none());
        assert!(MaintenanceResponse::detect(br#"{"message":"Unauthorized"}"#).is_none());
        assert!(MaintenanceResponse::detect(b"<html>Bad gateway</html>").is_none());
    }
}
