use chrono::NaiveDate;
use ocea_exporter::OceaError;
use ocea_exporter::api::{ApiClient, MeteringApi};
use ocea_exporter::auth::TokenProvider;
use ocea_exporter::config::ApiConfig;
use ocea_exporter::error::ErrorClass;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct StaticToken {
    invalidations: AtomicUsize,
}

#[async_trait::async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> ocea_exporter::Result<String> {
        Ok("tok".to_string())
    }

    async fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

fn client(server: &MockServer) -> (ApiClient, Arc<StaticToken>) {
    let tokens = Arc::new(StaticToken::default());
    let config = ApiConfig {
        base_url: format!("{}/api/v1/", server.uri()),
        ..ApiConfig::default()
    };
    let client = ApiClient::new(&config, tokens.clone()).unwrap();
    (client, tokens)
}

#[tokio::test]
async fn resident_is_fetched_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/resident"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "codeClient": "C1",
            "nomClient": "Residence",
            "occupations": [{"codeSite": "S1", "logementId": "L-1", "residentId": "R-1"}],
            "resident": {"id": "R-1", "email": "r@example.com", "nom": "Doe", "prenom": "Jane"}
        })))
        .mount(&server)
        .await;

    let (client, _) = client(&server);
    let resident = client.get_resident().await.unwrap();
    assert_eq!(resident.occupations.len(), 1);
    assert_eq!(resident.occupations[0].logement_id, "L-1");
    assert_eq!(resident.resident.prenom, "Jane");
}

#[tokio::test]
async fn dashboard_path_includes_local_and_fluid() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/local/L-1/conso/dashboard/EauFroide"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "fluide": "EauFroide",
            "localId": "L-1",
            "consoCumuleeAnneeCourante": 12.345,
            "unite": "m3"
        })))
        .mount(&server)
        .await;

    let (client, _) = client(&server);
    let dashboard = client.get_fluid_dashboard("L-1", "EauFroide").await.unwrap();
    assert!((dashboard.conso_cumulee_annee_courante - 12.345).abs() < 1e-9);
}

#[tokio::test]
async fn maintenance_body_is_recognized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/resident"))
        .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
            "IsOnline": false,
            "MaintenancePageUrl": "https://status.example/",
            "ErrorMessage": "Maintenance en cours"
        })))
        .mount(&server)
        .await;

    let (client, _) = client(&server);
    let err = client.get_resident().await.unwrap_err();
    assert!(matches!(err, OceaError::Maintenance { ref message } if message == "Maintenance en cours"));
    assert!(err.is_transient());
}

#[tokio::test]
async fn plain_server_error_keeps_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/local/L-1"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let (client, _) = client(&server);
    let err = client.get_local("L-1").await.unwrap_err();
    assert!(matches!(err, OceaError::Http { status: 502, .. }));
    assert_eq!(err.class(), ErrorClass::Transient);
}

#[tokio::test]
async fn unauthorized_invalidates_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/resident"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let (client, tokens) = client(&server);
    let err = client.get_resident().await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Auth);
    assert_eq!(tokens.invalidations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn devices_are_fetched_in_two_steps() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/local/L-1/indexes/token"))
        .and(query_param("dateDemande", "2024-03-05T00:00:00.000Z"))
        .and(query_param("raisonConforme", "RealisationEtatDesLieux"))
        .respond_with(ResponseTemplate::new(200).set_body_json("statement-token"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/local/indexes/demande"))
        .and(body_json(serde_json::json!({"localId": "L-1", "token": "statement-token"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {
                "appareilId": "A-1",
                "date": "2024-03-05T00:00:00",
                "fluide": "EauFroide",
                "numeroCompteurAppareil": "SN-1",
                "unite": "m3",
                "valeurIndex": 321.5
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = client(&server);
    let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
    let devices = client.get_devices("L-1", date).await.unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].numero_compteur_appareil, "SN-1");
    assert!((devices[0].valeur_index - 321.5).abs() < 1e-9);
}

#[tokio::test]
async fn empty_statement_token_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/local/L-1/indexes/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(""))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/local/indexes/demande"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let (client, _) = client(&server);
    let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
    let err = client.get_devices("L-1", date).await.unwrap_err();
    assert!(matches!(err, OceaError::Api { .. }));
}
