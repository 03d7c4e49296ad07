//! Resident portal REST API client
//!
//! Four reads are exposed through [`MeteringApi`]. Device readings take two
//! calls: a per-date statement token, then a demand POST carrying it.

pub mod models;

pub use models::{
    Address, Dashboard, Device, Fluid, Local, LocalInfo, MaintenanceResponse, Occupation,
    Resident, ResidentIdentity,
};

use crate::auth::TokenProvider;
use crate::config::ApiConfig;
use crate::error::{OceaError, Result};
use crate::logging::{StructuredLogger, get_logger};
use chrono::NaiveDate;
use models::IndexDemandRequest;
use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use url::Url;

const USER_AGENT: &str = concat!("ocea-exporter/", env!("CARGO_PKG_VERSION"));

/// Read access to the metering data of one account
#[async_trait::async_trait]
pub trait MeteringApi: Send + Sync {
    async fn get_resident(&self) -> Result<Resident>;

    async fn get_local(&self, local_id: &str) -> Result<Local>;

    async fn get_fluid_dashboard(&self, local_id: &str, fluid: &str) -> Result<Dashboard>;

    /// Meters that reported on `date`
    async fn get_devices(&self, local_id: &str, date: NaiveDate) -> Result<Vec<Device>>;
}

/// HTTP implementation of [`MeteringApi`]
pub struct ApiClient {
    base_url: Url,
    http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    logger: StructuredLogger,
}

impl ApiClient {
    pub fn new(config: &ApiConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/'))?;
        if base_url.cannot_be_a_base() {
            return Err(OceaError::config("api.base_url cannot be a base URL"));
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            base_url,
            http,
            tokens,
            logger: get_logger("api"),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| OceaError::config("api.base_url cannot be a base URL"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder, context: &str) -> Result<T> {
        let token = self.tokens.token().await?;
        let resp = request
            .bearer_auth(token)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;

        if status.is_success() || status.is_redirection() {
            return serde_json::from_slice(&body).map_err(|e| OceaError::Serialization {
                message: format!("{context}: {e}"),
            });
        }

        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }

        if let Some(maintenance) = MaintenanceResponse::detect(&body) {
            let message = maintenance
                .error_message
                .or(maintenance.maintenance_page_url)
                .unwrap_or_else(|| "no details".to_string());
            self.logger
                .warn(&format!("Portal in maintenance during {context}: {message}"));
            return Err(OceaError::Maintenance { message });
        }

        Err(OceaError::http(status.as_u16(), context))
    }
}

#[async_trait::async_trait]
impl MeteringApi for ApiClient {
    async fn get_resident(&self) -> Result<Resident> {
        let url = self.endpoint(&["resident"])?;
        self.execute(self.http.get(url), "resident").await
    }

    async fn get_local(&self, local_id: &str) -> Result<Local> {
        let url = self.endpoint(&["local", local_id])?;
        self.execute(self.http.get(url), "local").await
    }

    async fn get_fluid_dashboard(&self, local_id: &str, fluid: &str) -> Result<Dashboard> {
        let url = self.endpoint(&["local", local_id, "conso", "dashboard", fluid])?;
        self.execute(self.http.get(url), "dashboard").await
    }

    async fn get_devices(&self, local_id: &str, date: NaiveDate) -> Result<Vec<Device>> {
        let requested = format!("{}T00:00:00.000Z", date.format("%Y-%m-%d"));
        let url = self.endpoint(&["local", local_id, "indexes", "token"])?;
        let request = self.http.get(url).query(&[
            ("dateDemande", requested.as_str()),
            ("raisonConforme", "RealisationEtatDesLieux"),
        ]);
        let token: String = self.execute(request, "device statement token").await?;
        if token.is_empty() {
            return Err(OceaError::api("device statement token is empty"));
        }

        let url = self.endpoint(&["local", "indexes", "demande"])?;
        let request = self.http.post(url).json(&IndexDemandRequest {
            local_id,
            token: &token,
        });
        let devices: Vec<Device> = self.execute(request, "device index demand").await?;
        self.logger.debug(&format!(
            "Fetched {} device(s) for {}",
            devices.len(),
            date.format("%Y-%m-%d")
        ));
        Ok(devices)
    }
}
