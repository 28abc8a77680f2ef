//! Command line flags of both binaries, and their validation into the
//! commands the library runs. Nothing here touches the network.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;
use crate::lifecycle::{Action, LifecyclePolicy, Target, DEFAULT_EXCLUDE_PATTERNS, DEFAULT_RETENTION_SECS};
use crate::upload::{ReportSource, UploadCommand, UploadJob, DEFAULT_DISTRIBS};

#[derive(Parser, Debug)]
#[command(author, version, about = "Close or delete old TestRail runs")]
pub struct LifecycleArgs {
    /// Runs whose name contains one of these are never touched
    #[arg(short = 'x', long, num_args = 1..,
          default_values_t = DEFAULT_EXCLUDE_PATTERNS.map(String::from))]
    pub exclude:        Vec<String>,

    /// Minimum age in seconds before a run is acted on
    #[arg(short = 'r', long = "retention_time", default_value_t = DEFAULT_RETENTION_SECS)]
    pub retention_time: u64,

    #[arg(short, long, value_enum)]
    pub action:         Action,

    /// Repeat every N seconds instead of running once
    #[arg(short = 'u', long)]
    pub duration:       Option<u64>,

    #[arg(short, long, value_enum, default_value_t = Target::Runs)]
    pub target:         Target,

    /// Log what would be done without doing it
    #[arg(short = 'n', long = "dry_run")]
    pub dry_run:        bool,
}

impl LifecycleArgs {
    pub fn policy(&self) -> Result<LifecyclePolicy, ConfigError> {
        let interval = match self.duration {
            Some(0) => return Err(ConfigError::Invalid { name: "--duration", value: "0".to_string() }),
            Some(d) => Some(Duration::from_secs(d)),
            None    => None,
        };

        Ok(LifecyclePolicy {
            action:     self.action,
            target:     self.target,
            retention:  Duration::from_secs(self.retention_time),
            exclude:    self.exclude.clone(),
            interval,
            dry_run:    self.dry_run,
        })
    }
}

/// `-v` is the version being uploaded, so no automatic `--version` here.
#[derive(Parser, Debug)]
#[command(author, about = "Upload JUnit results to a TestRail plan")]
pub struct UploadArgs {
    /// Add results to the plan named after --version
    #[arg(short = 'u', long = "add_results")]
    pub add_results:            bool,

    /// Name of the TestRail suite holding the cases
    #[arg(short = 'c', long = "cases")]
    pub cases:                  Option<String>,

    /// Version string; also the plan name
    #[arg(short = 'v', long = "version")]
    pub version:                Option<String>,

    /// Build whose artifacts hold the reports
    #[arg(short = 'a', long = "artifacts")]
    pub artifacts:              Option<String>,

    /// JUnit reports, or directories of them
    #[arg(short = 'r', long = "reports", num_args = 1..)]
    pub reports:                Vec<PathBuf>,

    #[arg(short = 'd', long = "distrib", num_args = 1..,
          default_values_t = DEFAULT_DISTRIBS.map(String::from))]
    pub distrib:                Vec<String>,

    /// Where the reports can be browsed, shown in the upload description
    #[arg(short = 'l', long = "artifacts_location", num_args = 1..)]
    pub artifacts_location:     Vec<String>,

    #[arg(short = 'k', long = "close_plan")]
    pub close_plan:             bool,

    /// Close every open plan whose name starts with this
    #[arg(short = 'p', long = "close_pattern_plans")]
    pub close_pattern_plans:    Option<String>,

    /// Milestone of a newly created plan; defaults to the suite name
    #[arg(short = 'm', long = "milestone")]
    pub milestone:              Option<String>,

    /// Use the legacy artifacts server
    #[arg(short = 'o', long = "old_artifacts")]
    pub old_artifacts:          bool,

    /// Write the plan url to this file
    #[arg(short = 'f', long = "linkfile")]
    pub linkfile:               Option<PathBuf>,

    /// Sections whose reports are ignored
    #[arg(short = 'e', long = "exclude_sections", num_args = 1..)]
    pub exclude_sections:       Vec<String>,

    /// Artifacts url of the build; its parent replaces the configured base
    #[arg(short = 'b', long = "base_url")]
    pub base_url:               Option<String>,

    /// Why this upload happened, shown in the upload description
    #[arg(short = 'R', long = "reason", default_value = "")]
    pub reason:                 String,

    /// Close the runs that received results
    #[arg(short = 'C', long = "close_runs")]
    pub close_runs:             bool,

    /// Create cases for test names the suite does not have yet
    #[arg(short = 'A', long = "add_missing_cases")]
    pub add_missing_cases:      bool,
}

impl UploadArgs {
    pub fn validate(&self) -> Result<UploadCommand, ConfigError> {
        if !self.add_results {
            return match &self.close_pattern_plans {
                Some(p) => Ok(UploadCommand::ClosePlans(p.clone())),
                None    => Err(ConfigError::NothingToDo),
            };
        }

        let suite = self.cases.clone().ok_or(ConfigError::MissingArgument("--cases"))?;
        let version = self.version.clone().ok_or(ConfigError::MissingArgument("--version"))?;

        let source = match (&self.artifacts, self.reports.is_empty()) {
            (Some(_), false)    => return Err(ConfigError::ConflictingReportSources),
            (Some(a), true)     => ReportSource::Artifacts(a.clone()),
            (None, false)       => ReportSource::Reports(self.reports.clone()),
            (None, true)        => return Err(ConfigError::NoReportSource),
        };

        if self.distrib.is_empty() {
            return Err(ConfigError::MissingArgument("--distrib"));
        }

        Ok(UploadCommand::AddResults(UploadJob {
            milestone:              self.milestone.clone().unwrap_or_else(|| suite.clone()),
            suite,
            version,
            source,
            distribs:               self.distrib.clone(),
            exclude_sections:       self.exclude_sections.clone(),
            artifacts_location:     self.artifacts_location.clone(),
            old_artifacts:          self.old_artifacts,
            base_url:               self.base_url.clone(),
            reason:                 self.reason.clone(),
            add_missing_cases:      self.add_missing_cases,
            close_runs:             self.close_runs,
            close_plan:             self.close_plan,
            close_pattern_plans:    self.close_pattern_plans.clone(),
            linkfile:               self.linkfile.clone(),
        }))
    }
}
