use thiserror::Error;

/// Core-crate fallible paths: config validation, hot-reload parsing,
/// rounding failures. Exchange I/O errors live in
/// [`crate::exchange_adapter::AdapterError`].
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid quote params: {0}")]
    InvalidQuoteParams(String),

    #[error("invalid risk limits: {0}")]
    InvalidRiskLimits(String),

    #[error("hot-reload snapshot for {kind} is malformed: {source}")]
    HotReloadParse {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("hot-reload snapshot for {kind} missing at {path}")]
    HotReloadMissing { kind: &'static str, path: String },

    #[error("rounding produced a non-finite value for input {0}")]
    RoundingNonFinite(f64),

    #[error("unknown asset {0} in allocator state")]
    UnknownAsset(String),

    #[error("allocator invariant violated: {0}")]
    AllocatorInvariant(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
