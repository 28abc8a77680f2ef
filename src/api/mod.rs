//! TestRail API v2 object model and the client seam both tools are written
//! against.
//!
//! [`TestRail`] lists the operations the lifecycle manager and the uploader
//! need; [`HttpClient`] is the implementation that talks to a real server.

use serde_derive::{Deserialize, Serialize};

use crate::error::ApiError;

mod http;
pub use http::HttpClient;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Run {
    pub id:             u64,
    pub name:           String,
    #[serde(default)]
    pub created_on:     Option<i64>,
    #[serde(default)]
    pub is_completed:   bool,
    #[serde(default)]
    pub url:            Option<String>,
    /// Configuration (distribution) name, set for runs that belong to a plan
    #[serde(default)]
    pub config:         Option<String>,
    #[serde(default)]
    pub entry_id:       Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub id:             String,
    #[serde(default)]
    pub suite_id:       Option<u64>,
    #[serde(default)]
    pub runs:           Vec<Run>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Plan {
    pub id:             u64,
    pub name:           String,
    #[serde(default)]
    pub created_on:     Option<i64>,
    #[serde(default)]
    pub is_completed:   bool,
    #[serde(default)]
    pub url:            Option<String>,
    /// Only populated by `get_plan`, not by `get_plans`
    #[serde(default)]
    pub entries:        Vec<PlanEntry>,
}

impl Plan {
    pub fn runs(&self) -> impl Iterator<Item = &Run> {
        self.entries.iter().flat_map(|e| e.runs.iter())
    }

    /// The run of this plan executed on `distrib`, compared case-insensitively.
    pub fn run_for_distrib(&self, distrib: &str) -> Option<&Run> {
        self.runs()
            .find(|r| r.config.as_deref()
                  .map(|c| c.eq_ignore_ascii_case(distrib))
                  .unwrap_or(false))
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Suite {
    pub id:             u64,
    pub name:           String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Section {
    pub id:             u64,
    pub name:           String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Case {
    pub id:             u64,
    pub title:          String,
    #[serde(default)]
    pub section_id:     Option<u64>,
    #[serde(default)]
    pub refs:           Option<String>,
}

impl Case {
    pub fn has_ref(&self, flag: &str) -> bool {
        self.refs.as_deref().map(|r| r.contains(flag)).unwrap_or(false)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub id:             u64,
    pub name:           String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ConfigGroup {
    pub id:             u64,
    pub name:           String,
    #[serde(default)]
    pub configs:        Vec<Config>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Milestone {
    pub id:             u64,
    pub name:           String,
    #[serde(default)]
    pub milestones:     Vec<Milestone>,
}

/// A case instantiated inside a run
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Test {
    pub id:             u64,
    pub case_id:        u64,
    #[serde(default)]
    pub title:          String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct NewPlan {
    pub name:           String,
    pub description:    String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone_id:   Option<u64>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct NewPlanRun {
    pub include_all:    bool,
    pub config_ids:     Vec<u64>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct NewPlanEntry {
    pub suite_id:       u64,
    pub include_all:    bool,
    pub config_ids:     Vec<u64>,
    pub runs:           Vec<NewPlanRun>,
}

impl NewPlanEntry {
    /// One run per configuration, each including every case of the suite.
    pub fn per_config(suite_id: u64, config_ids: Vec<u64>) -> NewPlanEntry {
        NewPlanEntry {
            suite_id,
            include_all:    true,
            runs:           config_ids.iter()
                .map(|id| NewPlanRun { include_all: true, config_ids: vec![*id] })
                .collect(),
            config_ids,
        }
    }
}

/// Result addressed by case id, for `add_results_for_cases`
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CaseResult {
    pub case_id:        u64,
    pub status_id:      u32,
    pub comment:        String,
    pub version:        String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed:        Option<String>,
}

/// Result addressed by test id, for `add_results`
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TestResult {
    pub test_id:        u64,
    pub status_id:      u32,
    pub comment:        String,
    pub version:        String,
}

pub trait TestRail {
    /// Runs of a project that are not part of a plan
    fn get_runs(&self, project_id: u64) -> Result<Vec<Run>, ApiError>;
    fn close_run(&self, run_id: u64) -> Result<(), ApiError>;
    fn delete_run(&self, run_id: u64) -> Result<(), ApiError>;

    fn get_plans(&self, project_id: u64, only_open: bool) -> Result<Vec<Plan>, ApiError>;
    fn get_plan(&self, plan_id: u64) -> Result<Plan, ApiError>;
    fn add_plan(&self, project_id: u64, plan: &NewPlan) -> Result<Plan, ApiError>;
    fn add_plan_entry(&self, plan_id: u64, entry: &NewPlanEntry) -> Result<PlanEntry, ApiError>;
    fn update_plan_entry(&self, plan_id: u64, entry_id: &str, description: &str) -> Result<(), ApiError>;
    fn close_plan(&self, plan_id: u64) -> Result<(), ApiError>;
    fn delete_plan(&self, plan_id: u64) -> Result<(), ApiError>;

    fn get_suites(&self, project_id: u64) -> Result<Vec<Suite>, ApiError>;
    fn get_sections(&self, project_id: u64, suite_id: u64) -> Result<Vec<Section>, ApiError>;
    fn get_cases(&self, project_id: u64, suite_id: u64) -> Result<Vec<Case>, ApiError>;
    fn add_case(&self, section_id: u64, title: &str) -> Result<Case, ApiError>;
    fn get_configs(&self, project_id: u64) -> Result<Vec<ConfigGroup>, ApiError>;
    fn get_milestones(&self, project_id: u64) -> Result<Vec<Milestone>, ApiError>;
    fn get_milestone(&self, milestone_id: u64) -> Result<Milestone, ApiError>;

    fn get_tests(&self, run_id: u64) -> Result<Vec<Test>, ApiError>;
    fn add_results_for_cases(&self, run_id: u64, results: &[CaseResult]) -> Result<(), ApiError>;
    fn add_results(&self, run_id: u64, results: &[TestResult]) -> Result<(), ApiError>;
}

pub fn find_suite(client: &dyn TestRail, project_id: u64, name: &str) -> Result<Option<Suite>, ApiError> {
    Ok(client.get_suites(project_id)?
        .into_iter()
        .find(|s| s.name == name))
}

/// The open plan named after `version`, with its entries loaded.
pub fn find_open_plan(client: &dyn TestRail, project_id: u64, version: &str) -> Result<Option<Plan>, ApiError> {
    let plan = client.get_plans(project_id, true)?
        .into_iter()
        .find(|p| p.name == version);

    match plan {
        Some(p) => Ok(Some(client.get_plan(p.id)?)),
        None    => Ok(None),
    }
}

pub fn open_plans_matching(client: &dyn TestRail, project_id: u64, prefix: &str) -> Result<Vec<Plan>, ApiError> {
    Ok(client.get_plans(project_id, true)?
        .into_iter()
        .filter(|p| p.name.starts_with(prefix))
        .collect())
}

/// Looks a milestone up by name, descending one level into sub-milestones.
pub fn find_milestone(client: &dyn TestRail, project_id: u64, name: &str) -> Result<Option<u64>, ApiError> {
    for parent in client.get_milestones(project_id)? {
        if parent.name == name {
            return Ok(Some(parent.id));
        }

        let children = if parent.milestones.is_empty() {
            client.get_milestone(parent.id)?.milestones
        } else {
            parent.milestones
        };

        if let Some(m) = children.iter().find(|m| m.name == name) {
            return Ok(Some(m.id));
        }
    }

    Ok(None)
}

pub fn plan_url(testrail_url: &str, plan_id: u64) -> String {
    format!("{}/index.php?/plans/view/{}", testrail_url.trim_end_matches('/'), plan_id)
}
