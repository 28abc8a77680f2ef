//! Where a report's results belong.
//!
//! A local report carries its TestRail section and its distribution in its
//! path, e.g. `reports/centos7/report_zimbra_710.xml`. A name matches as a
//! *segment*: bounded on each side by the start or end of the path or by one
//! of `/ \ _ - .`, so section `fuse` matches `fuse_centos7.xml` but not
//! `confused.xml`. Sections compare case-sensitively, distributions
//! case-insensitively; the longest matching section wins.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use glob::Pattern;
use log::warn;
use serde_derive::Deserialize;

use crate::error::ReportPathError;

const SEPARATORS: &[char] = &['/', '\\', '_', '-', '.'];

pub const GLOBAL_REPORT_NAME: &str = "report.json";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReportTarget {
    pub section:    String,
    /// Lower-cased
    pub distrib:    String,
}

pub fn contains_segment(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }

    let is_sep = |c: Option<char>| c.map(|c| SEPARATORS.contains(&c)).unwrap_or(true);

    haystack.match_indices(needle).any(|(i, _)| {
        is_sep(haystack[..i].chars().next_back()) &&
            is_sep(haystack[i + needle.len()..].chars().next())
    })
}

/// Longest of `sections` occurring as a segment of `s`; first listed on ties.
pub fn find_section<'a>(s: &str, sections: &'a [String]) -> Option<&'a String> {
    sections.iter()
        .rev()
        .filter(|sec| contains_segment(s, sec))
        .max_by_key(|sec| sec.len())
}

pub fn infer_target(path: &Path, sections: &[String], distribs: &[String]) -> Result<ReportTarget, ReportPathError> {
    let p = path.to_string_lossy();

    let section = find_section(&p, sections)
        .ok_or_else(|| ReportPathError::MissingSection {
            path:       path.to_path_buf(),
            available:  sections.to_vec(),
        })?;

    let lower = p.to_lowercase();
    let distrib = distribs.iter()
        .map(|d| d.to_lowercase())
        .find(|d| contains_segment(&lower, d))
        .ok_or_else(|| ReportPathError::MissingDistribution {
            path:       path.to_path_buf(),
            available:  distribs.to_vec(),
        })?;

    Ok(ReportTarget { section: section.clone(), distrib })
}

#[derive(Debug, Default, PartialEq)]
pub struct ReportSet {
    pub junit:      Vec<PathBuf>,
    pub global:     Vec<PathBuf>,
}

fn glob_under(dir: &Path, pattern: &str) -> Vec<PathBuf> {
    let full = format!("{}/**/{}", Pattern::escape(&dir.to_string_lossy()), pattern);

    match glob::glob(&full) {
        Ok(paths) => paths
            .filter_map(|p| p.map_err(|e| warn!("error walking {:?}: {}", dir, e)).ok())
            .filter(|p| p.is_file())
            .collect(),
        Err(e) => {
            warn!("bad report directory {:?}: {}", dir, e);
            Vec::new()
        }
    }
}

/// Directories expand to every `*.xml` below them, plus any `report.json`
/// global reports. Plain paths are taken as they are, existing or not.
pub fn expand_paths(paths: &[PathBuf]) -> ReportSet {
    let mut junit   = BTreeSet::new();
    let mut global  = BTreeSet::new();

    for p in paths {
        if p.is_dir() {
            junit.extend(glob_under(p, "*.xml"));
            global.extend(glob_under(p, GLOBAL_REPORT_NAME));
        } else if p.file_name().map(|n| n == GLOBAL_REPORT_NAME).unwrap_or(false) {
            global.insert(p.clone());
        } else {
            junit.insert(p.clone());
        }
    }

    ReportSet {
        junit:  junit.into_iter().collect(),
        global: global.into_iter().collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailedStep {
    Setup,
    Requirements,
}

impl FailedStep {
    fn from_name(name: &str) -> Option<FailedStep> {
        match name {
            "setup"         => Some(FailedStep::Setup),
            "requirements"  => Some(FailedStep::Requirements),
            _               => None,
        }
    }
}

/// A task whose environment step failed, so none of its tests really ran.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct StepFailure {
    pub task:       String,
    pub distrib:    String,
    pub step:       FailedStep,
}

#[derive(Deserialize)]
struct GlobalTask {
    #[serde(default)]
    task_infos:     Option<TaskInfos>,
    steps:          Vec<GlobalStep>,
}

#[derive(Deserialize)]
struct TaskInfos {
    task_name:      String,
    permutation:    String,
}

#[derive(Deserialize)]
struct GlobalStep {
    step_name:      String,
    #[serde(default)]
    failed:         bool,
}

/// Failed `setup`/`requirements` steps of a global report; an error means
/// the file is not a global report at all.
pub fn parse_global_report(json: &str) -> Result<Vec<StepFailure>, serde_json::Error> {
    let tasks: Vec<GlobalTask> = serde_json::from_str(json)?;
    let mut ret = BTreeSet::new();

    for task in tasks {
        let infos = match &task.task_infos {
            Some(i) => i,
            None    => continue,
        };

        for step in task.steps.iter().filter(|s| s.failed) {
            if let Some(s) = FailedStep::from_name(&step.step_name) {
                ret.insert(StepFailure {
                    task:       infos.task_name.clone(),
                    distrib:    infos.permutation.to_lowercase(),
                    step:       s,
                });
            }
        }
    }

    Ok(ret.into_iter().collect())
}
