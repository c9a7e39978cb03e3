use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultServiceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient funds: available={available} lovelace, required={required} lovelace ({context})")]
    InsufficientFunds {
        available: u64,
        required: u64,
        context: String,
    },

    #[error("Assembly error: {0}")]
    Assembly(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Submission failed: primary={primary}; fallback={fallback}")]
    Submission {
        primary: String,
        fallback: String,
        inputs_spent: bool,
    },

    #[error("Ledger query error: {0}")]
    Ledger(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] hex::FromHexError),
}

impl VaultServiceError {
    /// Stable code so callers can tell resubmit, reselect and re-ask apart.
    pub fn kind(&self) -> &'static str {
        match self {
            VaultServiceError::Validation(_) => "VALIDATION_ERROR",
            VaultServiceError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            VaultServiceError::Assembly(_) => "ASSEMBLY_ERROR",
            VaultServiceError::Signing(_) => "SIGNING_ERROR",
            VaultServiceError::Submission { inputs_spent: true, .. } => "UTXO_ALREADY_SPENT",
            VaultServiceError::Submission { .. } => "SUBMISSION_ERROR",
            VaultServiceError::Ledger(_) | VaultServiceError::Http(_) => "LEDGER_ERROR",
            VaultServiceError::Config(_) => "CONFIG_ERROR",
            VaultServiceError::Serialization(_) | VaultServiceError::Encoding(_) => {
                "ENCODING_ERROR"
            }
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        VaultServiceError::Validation(message.into())
    }

    pub fn assembly(message: impl Into<String>) -> Self {
        VaultServiceError::Assembly(message.into())
    }
}

pub type Result<T> = std::result::Result<T, VaultServiceError>;
