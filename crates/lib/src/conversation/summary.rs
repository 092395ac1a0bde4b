//! Patient summary: structured header fields plus the narrative used to seed the conversation.

use async_trait::async_trait;

use crate::api::{ApiClient, ApiError, PatientDetails};

/// Read-only snapshot fetched once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientSummary {
    pub details: PatientDetails,
    /// Handshake payload only; never added to the transcript.
    pub narrative: String,
}

impl PatientSummary {
    /// Header line, e.g. `JANE DOE (63 Y/O)`.
    pub fn header(&self) -> String {
        format!(
            "{} ({} Y/O)",
            self.details.name.to_uppercase(),
            self.details.age
        )
    }
}

/// The two read calls a session needs. Implemented by [`ApiClient`]; tests substitute their own.
#[async_trait]
pub trait SummaryFetcher: Send + Sync {
    async fn fetch_details(&self, patient_id: u64) -> Result<PatientDetails, ApiError>;
    async fn fetch_narrative(&self, patient_id: u64) -> Result<String, ApiError>;
}

#[async_trait]
impl SummaryFetcher for ApiClient {
    async fn fetch_details(&self, patient_id: u64) -> Result<PatientDetails, ApiError> {
        self.patient_details(patient_id).await
    }

    async fn fetch_narrative(&self, patient_id: u64) -> Result<String, ApiError> {
        self.patient_narrative(patient_id).await
    }
}

/// Run both calls concurrently; either failing fails the fetch.
pub async fn fetch_summary(
    fetcher: &dyn SummaryFetcher,
    patient_id: u64,
) -> Result<PatientSummary, ApiError> {
    let (details, narrative) = tokio::try_join!(
        fetcher.fetch_details(patient_id),
        fetcher.fetch_narrative(patient_id)
    )?;
    Ok(PatientSummary { details, narrative })
}
