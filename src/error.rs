use crate::services::helpers::template::{ParseError, RenderError};

/// Failure of a single query against the container runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Docker(#[from] bollard::errors::Error),
    #[error("cannot decode stats: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("stats stream ended before the first sample")]
    EmptyStream,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot list containers: {0}")]
    Enumeration(#[source] RuntimeError),
    #[error("cannot inspect container {id}: {source}")]
    MetadataUnavailable {
        id: String,
        #[source]
        source: RuntimeError,
    },
    #[error("cannot get stats for container {id}: {source}")]
    StatsUnavailable {
        id: String,
        #[source]
        source: RuntimeError,
    },
    #[error("cannot render label {label}: {source}")]
    LabelRender {
        label: String,
        #[source]
        source: RenderError,
    },
    #[error("invalid template for label {label}: {source}")]
    TemplateSyntax {
        label: String,
        #[source]
        source: ParseError,
    },
    #[error("invalid label name {0:?}")]
    InvalidLabelName(String),
    #[error("environment variable {0:?} is not valid unicode")]
    NonUnicodeVariable(String),
    #[error("invalid listen address {0:?}")]
    InvalidListenAddress(String),
    #[error("invalid scrape timeout {0:?}")]
    InvalidScrapeTimeout(String),
    #[error("scrape did not finish within {0:?}")]
    ScrapeTimeout(std::time::Duration),
    #[error("cannot create docker client: {0}")]
    Connect(#[source] bollard::errors::Error),
    #[error(transparent)]
    Registry(#[from] prometheus::Error),
    #[error("metrics output is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

pub type Result<T> = std::result::Result<T, Error>;
