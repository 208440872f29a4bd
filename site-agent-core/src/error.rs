/// Error taxonomy for the site agent core, per `spec.md` §7.
///
/// Each variant documents its trigger and propagation policy; see the
/// table in `spec.md` §7 for the authoritative mapping. Conversions from
/// third-party error types follow the teacher's pattern of grouping every
/// wrapped dependency error behind one `#[from]`-annotated enum.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network failure, 5xx, or timeout. Retried within the operation's
    /// retry budget by the caller; this variant only surfaces once that
    /// budget is exhausted.
    #[error("transient backend error: {0}")]
    TransientBackend(String),

    /// A 4xx backend response that isn't "not found". Surfaced immediately;
    /// the order or resource is marked erred.
    #[error("permanent backend error: {0}")]
    PermanentBackend(String),

    /// Resource, user, or order absent. Callers treat this as a no-op for
    /// delete/remove operations, or as a pull-miss elsewhere.
    #[error("not found: {0}")]
    NotFound(String),

    /// Create-conflict on the backend; treated as success by the caller,
    /// with the existing id substituted.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// `UsernameManager` needs out-of-band resolution. Carries the same
    /// message/url pair the control plane stores on the `OfferingUser`.
    #[error("username deferred: {message}")]
    UsernameDeferred {
        message: String,
        url: Option<String>,
        kind: UsernameDeferralKind,
    },

    /// New total usage is lower than the already-submitted total for a
    /// component and period. The submission is aborted for the whole
    /// resource this cycle; never retried.
    #[error("usage anomaly for component {component}: new {new} < existing {existing}")]
    UsageAnomaly {
        component: String,
        new: String,
        existing: String,
    },

    /// Missing required setting, bad timezone, or similar. Fatal at driver
    /// construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Backend id generation exhausted its collision-retry budget.
    #[error("backend id collision: exhausted retries generating an id for {0}")]
    Collision(String),

    #[error("http error: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    #[error("json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("config parse error: {source}")]
    Yaml {
        #[from]
        source: serde_yaml::Error,
    },

    #[error("failed to parse timestamp: {source}")]
    Chrono {
        #[from]
        source: chrono::ParseError,
    },

    #[error("out of range duration: {source}")]
    OutOfRange {
        #[from]
        source: chrono::OutOfRangeError,
    },

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}

/// Distinguishes the two recoverable `UsernameManager` deferral kinds from
/// `spec.md` §4.2, so callers can route to the right `OfferingUserState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsernameDeferralKind {
    AccountLinkingRequired,
    AdditionalValidationRequired,
}

impl Error {
    /// Whether this error belongs to the retry-eligible class from
    /// `spec.md` §7 (transient backend failures only; anomalies and
    /// permanent errors are never retried).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransientBackend(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
