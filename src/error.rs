use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by a [`crate::api::TestRail`] implementation.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("network error talking to {url}: {source}")]
    Network {
        url:        String,
        #[source]
        source:     reqwest::Error,
    },

    #[error("authentication rejected ({status}): {message}")]
    Auth {
        status:     u16,
        message:    String,
    },

    #[error("not found: {message}")]
    NotFound {
        message:    String,
    },

    #[error("rate limited by server (retry after {retry_after:?}s)")]
    RateLimited {
        retry_after: Option<u64>,
    },

    #[error("request failed with status {status}: {message}")]
    Status {
        status:     u16,
        message:    String,
    },

    #[error("malformed response from {url}: {message}")]
    InvalidResponse {
        url:        String,
        message:    String,
    },
}

/// Invalid flag combinations or rc file contents, caught before any network call.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("nothing to do: pass --add_results (-u) or --close_pattern_plans (-p)")]
    NothingToDo,

    #[error("--add_results requires {0}")]
    MissingArgument(&'static str),

    #[error("need an artifact reference (--artifacts) OR a list of reports (--reports)")]
    NoReportSource,

    #[error("--artifacts and --reports are mutually exclusive, choose one")]
    ConflictingReportSources,

    #[error("{0} is not configured (set it in the rc file or with ${1})")]
    Missing(&'static str, &'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid {
        name:       &'static str,
        value:      String,
    },
}

/// A report path that does not carry the segments needed to place its results.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReportPathError {
    #[error("no section found in {path:?}, the report path must contain one of: {available:?}")]
    MissingSection {
        path:       PathBuf,
        available:  Vec<String>,
    },

    #[error("no distribution found in {path:?}, the report path must contain one of: {available:?}")]
    MissingDistribution {
        path:       PathBuf,
        available:  Vec<String>,
    },
}

#[derive(Error, Debug)]
pub enum JunitError {
    #[error("error reading {path:?}: {source}")]
    Io {
        path:       PathBuf,
        #[source]
        source:     std::io::Error,
    },

    #[error("malformed xml in {path:?}: {source}")]
    Xml {
        path:       PathBuf,
        #[source]
        source:     quick_xml::Error,
    },
}
