/*
 * Copyright 2024 Oxide Computer Company
 */

use helio_types::JobKind;

pub(crate) const CREDENTIAL_HINT: &str =
    "Please make sure you have the correct API key set in preferences.";

fn hint(status: &u16) -> String {
    if *status == 401 {
        format!("\n {CREDENTIAL_HINT}")
    } else {
        String::new()
    }
}

/**
 * Why a run was abandoned.  The rendered message is shown to the user as-is,
 * so each one says which phase failed.
 */
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Failure {
    #[error("Helio API endpoint is empty, please check the configuration.")]
    EmptyEndpoint,
    #[error(
        "Personal access token is empty, please fill in the correct token."
    )]
    EmptyCredential,
    #[error("error: {message}{}", hint(.status))]
    UploadTarget { status: u16, message: String },
    #[error("Helio: file upload failed\n{0}")]
    Upload(String),
    #[error("Helio: Failed to create GCode\n{0}")]
    Ingest(String),
    #[error("Helio: Failed to create {}\n{message}", .kind.label())]
    Create { kind: JobKind, message: String },
    #[error("Helio: {} failed\n{message}", .kind.label())]
    Job { kind: JobKind, message: String },
    #[error(
        "Helio: {} check failed {attempts} times in a row\n{last}",
        .kind.label()
    )]
    Poll { kind: JobKind, attempts: u32, last: String },
    #[error("Helio: GCode download failed\n{0}")]
    Download(String),
    #[error("Helio: could not load the downloaded GCode\n{0}")]
    Load(String),
}

impl Failure {
    /**
     * The HTTP status associated with the failure, where there was one.
     */
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Failure::UploadTarget { status, .. } if *status != 0 => {
                Some(*status)
            }
            _ => None,
        }
    }
}
