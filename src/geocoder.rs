use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NoResults,
    RateLimited,
    Denied,
    InvalidRequest,
    Provider,
    Transport,
}

impl FailureKind {
    /// Failures determined by the address itself rather than by provider state.
    pub fn is_address_specific(&self) -> bool {
        matches!(self, FailureKind::NoResults | FailureKind::InvalidRequest)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolutionResult {
    Success {
        lat: f64,
        lng: f64,
        formatted_address: Option<String>,
    },
    Failure {
        kind: FailureKind,
        reason: String,
    },
}

impl ResolutionResult {
    pub fn failure(kind: FailureKind, reason: impl Into<String>) -> Self {
        ResolutionResult::Failure {
            kind,
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResolutionResult::Success { .. })
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match self {
            ResolutionResult::Success { lat, lng, .. } => Some((*lat, *lng)),
            ResolutionResult::Failure { .. } => None,
        }
    }

    /// Converts a failure into the error the writer and queue act on.
    pub fn into_error(self) -> Option<AppError> {
        match self {
            ResolutionResult::Success { .. } => None,
            ResolutionResult::Failure { kind, reason } => Some(match kind {
                FailureKind::RateLimited => AppError::RateLimited(reason),
                FailureKind::Transport => AppError::Transport(reason),
                _ => AppError::Provider(reason),
            }),
        }
    }
}

#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    async fn resolve(&self, address: &str) -> ResolutionResult;
}

pub struct HttpGeocoder {
    http: Client,
    api_base: String,
    api_key: SecretString,
}

impl HttpGeocoder {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let api_key = config.geocode_api_key.clone().ok_or_else(|| {
            AppError::Configuration("GEOCODE_API_KEY is not set".into())
        })?;
        Self::with_endpoint(config.geocode_api_base.clone(), api_key, config.geocode_timeout())
    }

    pub fn with_endpoint(
        api_base: impl Into<String>,
        api_key: SecretString,
        timeout: Duration,
    ) -> AppResult<Self> {
        if api_key.expose_secret().trim().is_empty() {
            return Err(AppError::Configuration("geocoding API key is blank".into()));
        }
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn request(&self, address: &str) -> Result<GeocodeResponse, ResolutionResult> {
        let url = format!("{}/geocode/json", self.api_base);
        let response = self
            .http
            .get(&url)
            .query(&[("address", address), ("key", self.api_key.expose_secret())])
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ResolutionResult::failure(
                FailureKind::RateLimited,
                format!("HTTP {status}"),
            ));
        }
        if !status.is_success() {
            return Err(ResolutionResult::failure(
                FailureKind::Transport,
                format!("HTTP {status}"),
            ));
        }

        response.json::<GeocodeResponse>().await.map_err(transport_failure)
    }
}

#[async_trait]
impl GeocodeProvider for HttpGeocoder {
    async fn resolve(&self, address: &str) -> ResolutionResult {
        let parsed = match self.request(address).await {
            Ok(parsed) => parsed,
            Err(failure) => {
                warn!(target: "geocoder", ?failure, "geocode request failed");
                return failure;
            }
        };
        let result = interpret(parsed);
        debug!(target: "geocoder", success = result.is_success(), "geocode response received");
        result
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeCandidate>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeCandidate {
    formatted_address: Option<String>,
    geometry: CandidateGeometry,
}

#[derive(Debug, Deserialize)]
struct CandidateGeometry {
    location: CandidateLocation,
}

#[derive(Debug, Deserialize)]
struct CandidateLocation {
    lat: f64,
    lng: f64,
}

fn interpret(response: GeocodeResponse) -> ResolutionResult {
    let GeocodeResponse {
        status,
        results,
        error_message,
    } = response;

    if status == "OK" {
        if let Some(first) = results.into_iter().next() {
            return ResolutionResult::Success {
                lat: first.geometry.location.lat,
                lng: first.geometry.location.lng,
                formatted_address: first.formatted_address,
            };
        }
        return ResolutionResult::failure(FailureKind::NoResults, "OK status without results");
    }

    let kind = match status.as_str() {
        "ZERO_RESULTS" => FailureKind::NoResults,
        "OVER_QUERY_LIMIT" | "OVER_DAILY_LIMIT" => FailureKind::RateLimited,
        "REQUEST_DENIED" => FailureKind::Denied,
        "INVALID_REQUEST" => FailureKind::InvalidRequest,
        _ => FailureKind::Provider,
    };
    let reason = match error_message {
        Some(message) if !message.trim().is_empty() => format!("{status}: {message}"),
        _ => status,
    };
    ResolutionResult::failure(kind, reason)
}

fn transport_failure(err: reqwest::Error) -> ResolutionResult {
    let reason = if err.is_timeout() {
        format!("request timed out: {err}")
    } else {
        err.to_string()
    };
    ResolutionResult::failure(FailureKind::Transport, reason)
}
