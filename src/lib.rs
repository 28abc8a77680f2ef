use std::fs::read_to_string;
use std::path::PathBuf;
use serde_derive::Deserialize;
use toml;
use anyhow::Context;

pub mod api;
pub mod artifacts;
pub mod cli;
pub mod error;
pub mod junit;
pub mod lifecycle;
pub mod report;
pub mod results;
pub mod upload;

pub use api::{HttpClient, TestRail};
pub use error::{ApiError, ConfigError, JunitError, ReportPathError};

const RC_DEFAULT_PATH: &str = "/etc/testrail.toml";

fn default_artifacts_url() -> String {
    "http://artifacts/builds/".to_string()
}

/// On-disk form of the rc file; every key is optional so the environment can
/// fill in the rest.
#[derive(Deserialize, Default, Debug)]
struct RcFile {
    url:                    Option<String>,
    project_id:             Option<u64>,
    login:                  Option<String>,
    key:                    Option<String>,
    #[serde(default)]
    artifacts:              ArtifactsRc,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct ArtifactsRc {
    #[serde(default = "default_artifacts_url")]
    pub url:                String,
    #[serde(default = "default_artifacts_url")]
    pub old_url:            String,
    #[serde(default = "default_artifacts_url")]
    pub public_url:         String,
    #[serde(default)]
    pub login:              Option<String>,
    #[serde(default)]
    pub password:           Option<String>,
}

impl Default for ArtifactsRc {
    fn default() -> Self {
        ArtifactsRc {
            url:            default_artifacts_url(),
            old_url:        default_artifacts_url(),
            public_url:     default_artifacts_url(),
            login:          None,
            password:       None,
        }
    }
}

impl ArtifactsRc {
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.login, &self.password) {
            (Some(l), Some(p))  => Some((l, p)),
            _                   => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Testrailrc {
    pub url:                String,
    pub project_id:         u64,
    pub login:              String,
    pub key:                String,
    pub artifacts:          ArtifactsRc,
}

/// Builds the rc from optional file contents, with environment variables
/// (looked up through `env`) taking precedence over the file.
pub fn testrailrc_parse<F>(config: Option<&str>, env: F) -> anyhow::Result<Testrailrc>
where F: Fn(&str) -> Option<String>
{
    let mut rc: RcFile = match config {
        Some(c) => toml::from_str(c)?,
        None    => RcFile::default(),
    };

    if let Some(v) = env("TESTRAIL_URL")        { rc.url = Some(v); }
    if let Some(v) = env("TESTRAIL_LOGIN")      { rc.login = Some(v); }
    if let Some(v) = env("TESTRAIL_KEY")        { rc.key = Some(v); }
    if let Some(v) = env("ARTIFACTS_LOGIN")     { rc.artifacts.login = Some(v); }
    if let Some(v) = env("ARTIFACTS_PWD")       { rc.artifacts.password = Some(v); }
    if let Some(v) = env("TESTRAIL_PROJECT_ID") {
        let id = v.trim().parse()
            .map_err(|_| ConfigError::Invalid { name: "TESTRAIL_PROJECT_ID", value: v.clone() })?;
        rc.project_id = Some(id);
    }

    Ok(Testrailrc {
        url:        rc.url.ok_or(ConfigError::Missing("url", "TESTRAIL_URL"))?,
        project_id: rc.project_id.ok_or(ConfigError::Missing("project_id", "TESTRAIL_PROJECT_ID"))?,
        login:      rc.login.ok_or(ConfigError::Missing("login", "TESTRAIL_LOGIN"))?,
        key:        rc.key.ok_or(ConfigError::Missing("key", "TESTRAIL_KEY"))?,
        artifacts:  rc.artifacts,
    })
}

/// Reads `$TESTRAIL_CONFIG`, or `/etc/testrail.toml` if it exists, then
/// applies environment overrides.
pub fn testrailrc_read() -> anyhow::Result<Testrailrc> {
    let path = std::env::var_os("TESTRAIL_CONFIG")
        .map(PathBuf::from)
        .or_else(|| Some(PathBuf::from(RC_DEFAULT_PATH)).filter(|p| p.exists()));

    let config = match &path {
        Some(p) => Some(read_to_string(p).with_context(|| format!("reading {:?}", p))?),
        None    => None,
    };

    testrailrc_parse(config.as_deref(), |k| std::env::var(k).ok())
        .with_context(|| format!("loading testrail config{}",
                                 path.map(|p| format!(" from {:?}", p)).unwrap_or_default()))
}

/// Log setup shared by both binaries: `info` unless `RUST_LOG` says otherwise.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .init();
}
