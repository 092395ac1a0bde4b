//! HTTP client for the remote training service (users, patients, patient narratives).

use serde::{Deserialize, Deserializer, Serialize};

/// Client for the service's HTTP API.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("api error: {status} {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid url: {0}")]
    Url(String),
}

impl ApiError {
    /// True for a non-success HTTP status (as opposed to a transport failure).
    pub fn is_status(&self) -> bool {
        matches!(self, ApiError::Api { .. })
    }
}

/// Structured patient fields shown in the conversation header (`GET /api/patient/{id}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientDetails {
    pub id: u64,
    pub name: String,
    #[serde(deserialize_with = "display_string")]
    pub age: String,
}

/// One entry of the patient list (`GET /api/patients`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    pub id: u64,
    pub name: String,
    #[serde(deserialize_with = "display_string")]
    pub age: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub history: String,
    #[serde(default)]
    pub symptoms: String,
    #[serde(default)]
    pub additional_info: String,
}

impl PatientRecord {
    /// Labelled fields for a patient card, in display order. Empty fields are left out.
    pub fn card_fields(&self) -> Vec<(&'static str, &str)> {
        [
            ("Age", self.age.as_str()),
            ("Gender", self.gender.as_str()),
            ("History", self.history.as_str()),
            ("Symptoms", self.symptoms.as_str()),
            ("Additional info", self.additional_info.as_str()),
        ]
        .into_iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .collect()
    }
}

/// Account record (`GET /api/users/{email}`). Only the fields the client reads.
#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Accepts a JSON number or string and keeps it as display text.
fn display_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(serde_json::Number),
        Text(String),
    }
    Ok(match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(n) => n.to_string(),
        NumberOrText::Text(s) => s,
    })
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_checked(&self, url: impl reqwest::IntoUrl) -> Result<reqwest::Response, ApiError> {
        let res = self.client.get(url).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Api { status, body });
        }
        Ok(res)
    }

    /// GET /api/patient/{id}: structured display fields.
    pub async fn patient_details(&self, patient_id: u64) -> Result<PatientDetails, ApiError> {
        let res = self
            .get_checked(format!("{}/api/patient/{}", self.base_url, patient_id))
            .await?;
        Ok(res.json().await?)
    }

    /// GET /api/patients/{id}: natural-language narrative. Accepts a plain-text body or a JSON string.
    pub async fn patient_narrative(&self, patient_id: u64) -> Result<String, ApiError> {
        let res = self
            .get_checked(format!("{}/api/patients/{}", self.base_url, patient_id))
            .await?;
        let body = res.text().await?;
        Ok(parse_narrative(&body))
    }

    /// GET /api/patients: the selectable patient list.
    pub async fn list_patients(&self) -> Result<Vec<PatientRecord>, ApiError> {
        let res = self
            .get_checked(format!("{}/api/patients", self.base_url))
            .await?;
        Ok(res.json().await?)
    }

    /// GET /api/users/{email}, with the email percent-encoded as one path segment.
    pub async fn get_user(&self, email: &str) -> Result<UserRecord, ApiError> {
        let res = self.get_checked(self.user_url(email)?).await?;
        Ok(res.json().await?)
    }

    fn user_url(&self, email: &str) -> Result<reqwest::Url, ApiError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ApiError::Url(format!("{}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::Url(format!("{} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "users", email]);
        Ok(url)
    }

    /// POST /api/users with `{ email, password }`.
    pub async fn register_user(&self, email: &str, password: &str) -> Result<(), ApiError> {
        let url = format!("{}/api/users", self.base_url);
        let res = self
            .client
            .post(&url)
            .json(&RegisterRequest { email, password })
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Api { status, body });
        }
        Ok(())
    }
}

fn parse_narrative(body: &str) -> String {
    match serde_json::from_str::<String>(body) {
        Ok(s) => s,
        Err(_) => body.to_string(),
    }
}
