#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashSet;

use testrail_tools::api::*;
use testrail_tools::artifacts::{ArtifactSource, FetchedReports};
use testrail_tools::{ApiError, ArtifactsRc, Testrailrc};

pub const PROJECT: u64 = 1;
pub const DAY: i64 = 24 * 3600;

pub fn rc() -> Testrailrc {
    Testrailrc {
        url:        "https://testrail.example.com".into(),
        project_id: PROJECT,
        login:      "ci".into(),
        key:        "key".into(),
        artifacts:  ArtifactsRc::default(),
    }
}

pub fn run(id: u64, name: &str, created_on: Option<i64>, closed: bool) -> Run {
    Run {
        id,
        name:           name.into(),
        created_on,
        is_completed:   closed,
        url:            None,
        config:         None,
        entry_id:       None,
    }
}

pub fn case(id: u64, title: &str, section_id: u64) -> Case {
    Case { id, title: title.into(), section_id: Some(section_id), refs: None }
}

/// Calls that change server state, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CloseRun(u64),
    DeleteRun(u64),
    AddPlan(String, Option<u64>),
    AddPlanEntry(u64, Vec<u64>),
    UpdatePlanEntry(u64, String),
    ClosePlan(u64),
    DeletePlan(u64),
    AddCase(u64, String),
    AddResultsForCases(u64, Vec<u64>),
    AddResults(u64, Vec<u64>),
}

/// In-memory TestRail project
#[derive(Default)]
pub struct FakeTestRail {
    pub runs:           RefCell<Vec<Run>>,
    pub plans:          RefCell<Vec<Plan>>,
    pub suites:         Vec<Suite>,
    pub sections:       Vec<Section>,
    pub cases:          RefCell<Vec<Case>>,
    pub configs:        Vec<ConfigGroup>,
    pub milestones:     Vec<Milestone>,
    pub tests:          Vec<(u64, Test)>,
    pub calls:          RefCell<Vec<Call>>,
    /// Runs whose add_results_for_cases fails
    pub failing_runs:   HashSet<u64>,
    /// get_runs/get_plans answer with this error
    pub list_error:     Option<u16>,
}

fn not_found(what: &str, id: u64) -> ApiError {
    ApiError::NotFound { message: format!("{} {} not found", what, id) }
}

impl FakeTestRail {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    fn record(&self, c: Call) {
        self.calls.borrow_mut().push(c);
    }

    fn check_list(&self) -> Result<(), ApiError> {
        match self.list_error {
            Some(429)       => Err(ApiError::RateLimited { retry_after: Some(60) }),
            Some(status)    => Err(ApiError::Status { status, message: "injected".into() }),
            None            => Ok(()),
        }
    }
}

impl TestRail for FakeTestRail {
    fn get_runs(&self, _project_id: u64) -> Result<Vec<Run>, ApiError> {
        self.check_list()?;
        Ok(self.runs.borrow().clone())
    }

    fn close_run(&self, run_id: u64) -> Result<(), ApiError> {
        self.record(Call::CloseRun(run_id));
        let mut runs = self.runs.borrow_mut();
        let r = runs.iter_mut().find(|r| r.id == run_id).ok_or_else(|| not_found("run", run_id))?;
        r.is_completed = true;
        Ok(())
    }

    fn delete_run(&self, run_id: u64) -> Result<(), ApiError> {
        self.record(Call::DeleteRun(run_id));
        let mut runs = self.runs.borrow_mut();
        let before = runs.len();
        runs.retain(|r| r.id != run_id);
        if runs.len() == before { Err(not_found("run", run_id)) } else { Ok(()) }
    }

    fn get_plans(&self, _project_id: u64, only_open: bool) -> Result<Vec<Plan>, ApiError> {
        self.check_list()?;
        Ok(self.plans.borrow().iter()
           .filter(|p| !only_open || !p.is_completed)
           .map(|p| Plan { entries: Vec::new(), ..p.clone() })
           .collect())
    }

    fn get_plan(&self, plan_id: u64) -> Result<Plan, ApiError> {
        self.plans.borrow().iter()
            .find(|p| p.id == plan_id)
            .cloned()
            .ok_or_else(|| not_found("plan", plan_id))
    }

    fn add_plan(&self, _project_id: u64, plan: &NewPlan) -> Result<Plan, ApiError> {
        self.record(Call::AddPlan(plan.name.clone(), plan.milestone_id));
        let mut plans = self.plans.borrow_mut();
        let p = Plan {
            id:             100 + plans.len() as u64,
            name:           plan.name.clone(),
            created_on:     Some(0),
            is_completed:   false,
            url:            None,
            entries:        Vec::new(),
        };
        plans.push(p.clone());
        Ok(p)
    }

    fn add_plan_entry(&self, plan_id: u64, entry: &NewPlanEntry) -> Result<PlanEntry, ApiError> {
        self.record(Call::AddPlanEntry(plan_id, entry.config_ids.clone()));

        let names: Vec<(u64, String)> = self.configs.iter()
            .flat_map(|g| g.configs.iter().map(|c| (c.id, c.name.clone())))
            .collect();

        let mut plans = self.plans.borrow_mut();
        let plan = plans.iter_mut().find(|p| p.id == plan_id).ok_or_else(|| not_found("plan", plan_id))?;
        let e = PlanEntry {
            id:         format!("entry-{}", plan.entries.len()),
            suite_id:   Some(entry.suite_id),
            runs:       entry.runs.iter().enumerate().map(|(i, r)| Run {
                id:             plan_id * 10 + i as u64,
                name:           plan.name.clone(),
                created_on:     Some(0),
                is_completed:   false,
                url:            None,
                config:         names.iter()
                    .find(|(id, _)| r.config_ids.contains(id))
                    .map(|(_, n)| n.clone()),
                entry_id:       None,
            }).collect(),
        };
        plan.entries.push(e.clone());
        Ok(e)
    }

    fn update_plan_entry(&self, plan_id: u64, entry_id: &str, _description: &str) -> Result<(), ApiError> {
        self.record(Call::UpdatePlanEntry(plan_id, entry_id.to_string()));
        Ok(())
    }

    fn close_plan(&self, plan_id: u64) -> Result<(), ApiError> {
        self.record(Call::ClosePlan(plan_id));
        let mut plans = self.plans.borrow_mut();
        let p = plans.iter_mut().find(|p| p.id == plan_id).ok_or_else(|| not_found("plan", plan_id))?;
        p.is_completed = true;
        Ok(())
    }

    fn delete_plan(&self, plan_id: u64) -> Result<(), ApiError> {
        self.record(Call::DeletePlan(plan_id));
        self.plans.borrow_mut().retain(|p| p.id != plan_id);
        Ok(())
    }

    fn get_suites(&self, _project_id: u64) -> Result<Vec<Suite>, ApiError> {
        Ok(self.suites.clone())
    }

    fn get_sections(&self, _project_id: u64, _suite_id: u64) -> Result<Vec<Section>, ApiError> {
        Ok(self.sections.clone())
    }

    fn get_cases(&self, _project_id: u64, _suite_id: u64) -> Result<Vec<Case>, ApiError> {
        Ok(self.cases.borrow().clone())
    }

    fn add_case(&self, section_id: u64, title: &str) -> Result<Case, ApiError> {
        self.record(Call::AddCase(section_id, title.to_string()));
        let mut cases = self.cases.borrow_mut();
        let c = case(1000 + cases.len() as u64, title, section_id);
        cases.push(c.clone());
        Ok(c)
    }

    fn get_configs(&self, _project_id: u64) -> Result<Vec<ConfigGroup>, ApiError> {
        Ok(self.configs.clone())
    }

    fn get_milestones(&self, _project_id: u64) -> Result<Vec<Milestone>, ApiError> {
        Ok(self.milestones.clone())
    }

    fn get_milestone(&self, milestone_id: u64) -> Result<Milestone, ApiError> {
        self.milestones.iter()
            .find(|m| m.id == milestone_id)
            .cloned()
            .ok_or_else(|| not_found("milestone", milestone_id))
    }

    fn get_tests(&self, run_id: u64) -> Result<Vec<Test>, ApiError> {
        Ok(self.tests.iter()
           .filter(|(r, _)| *r == run_id)
           .map(|(_, t)| t.clone())
           .collect())
    }

    fn add_results_for_cases(&self, run_id: u64, results: &[CaseResult]) -> Result<(), ApiError> {
        self.record(Call::AddResultsForCases(run_id, results.iter().map(|r| r.case_id).collect()));
        if self.failing_runs.contains(&run_id) {
            return Err(ApiError::Status { status: 400, message: "injected".into() });
        }
        Ok(())
    }

    fn add_results(&self, run_id: u64, results: &[TestResult]) -> Result<(), ApiError> {
        self.record(Call::AddResults(run_id, results.iter().map(|r| r.test_id).collect()));
        Ok(())
    }
}

/// Artifact source that must not be reached
pub struct NoArtifacts;

impl ArtifactSource for NoArtifacts {
    fn fetch_reports(&self, url: &str, _distribs: &[String]) -> anyhow::Result<FetchedReports> {
        anyhow::bail!("unexpected artifact fetch from {}", url)
    }
}

/// Artifact listing served from memory: each fetch writes `files` into a
/// fresh temporary directory.
#[derive(Default)]
pub struct DirArtifacts {
    pub files:      Vec<(&'static str, &'static str)>,
    /// URLs fetched, with the distributions asked for
    pub fetched:    RefCell<Vec<(String, Vec<String>)>>,
}

impl ArtifactSource for DirArtifacts {
    fn fetch_reports(&self, url: &str, distribs: &[String]) -> anyhow::Result<FetchedReports> {
        self.fetched.borrow_mut().push((url.to_string(), distribs.to_vec()));

        let dir = tempfile::tempdir()?;
        let mut paths = Vec::new();
        for (rel, contents) in &self.files {
            let p = dir.path().join(rel);
            if let Some(parent) = p.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&p, contents)?;
            paths.push(p);
        }

        Ok(FetchedReports { dir: Some(dir), paths })
    }
}
