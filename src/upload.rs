//! Uploading JUnit results into the TestRail plan named after a version.
//!
//! The order of operations matters: every report is located, classified and
//! parsed, and the plan plus one run per needed distribution is resolved,
//! before the first result is posted. From then on failures are scoped to a
//! single batch or report.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use chrono::Local;
use log::{error, info, warn};

use crate::api::{self, NewPlan, NewPlanEntry, Plan, Section, Suite, TestRail};
use crate::artifacts::{artifacts_base, artifacts_url, public_location, ArtifactSource};
use crate::junit::{self, JunitCase};
use crate::report::{expand_paths, find_section, infer_target, parse_global_report, ReportTarget};
use crate::results::{map_results, step_result, CaseIndex, BATCH_SIZE};
use crate::Testrailrc;

pub const DEFAULT_DISTRIBS: [&str; 2] = ["xenial", "centos7"];

#[derive(Debug, Clone, PartialEq)]
pub enum ReportSource {
    /// Build name, appended to the artifacts base URL
    Artifacts(String),
    Reports(Vec<PathBuf>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadJob {
    pub suite:                  String,
    pub version:                String,
    pub milestone:              String,
    pub source:                 ReportSource,
    pub distribs:               Vec<String>,
    pub exclude_sections:       Vec<String>,
    pub artifacts_location:     Vec<String>,
    pub old_artifacts:          bool,
    pub base_url:               Option<String>,
    pub reason:                 String,
    pub add_missing_cases:      bool,
    pub close_runs:             bool,
    pub close_plan:             bool,
    pub close_pattern_plans:    Option<String>,
    pub linkfile:               Option<PathBuf>,
}

impl UploadJob {
    /// Where the uploaded results came from, as shown in the description
    pub fn location(&self, rc: &Testrailrc) -> String {
        match &self.source {
            ReportSource::Artifacts(a)                          => public_location(&rc.artifacts, a),
            ReportSource::Reports(_) if !self.artifacts_location.is_empty()
                                                                => self.artifacts_location.join(" "),
            ReportSource::Reports(r)                            => r.iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadCommand {
    AddResults(UploadJob),
    ClosePlans(String),
}

#[derive(Debug, Default, PartialEq)]
pub struct UploadSummary {
    pub plan_id:            Option<u64>,
    pub plan_url:           Option<String>,
    /// Reports whose results were all accepted
    pub reports_uploaded:   usize,
    /// Reports without a recognisable section or distribution
    pub reports_rejected:   usize,
    /// Reports in an excluded section
    pub reports_excluded:   usize,
    pub reports_unreadable: usize,
    pub results_submitted:  usize,
    pub results_failed:     usize,
    pub unmapped:           usize,
    pub cases_added:        usize,
    pub env_results:        usize,
    pub plans_closed:       usize,
}

fn hostname() -> String {
    std::env::var("HOSTNAME").ok()
        .or_else(|| std::fs::read_to_string("/proc/sys/kernel/hostname").ok())
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Markdown header prepended to every result comment and used as the plan
/// description.
pub fn upload_description(location: &str, reason: &str) -> String {
    format!("***\n\
             # Upload infos #\n\
             + Last upload: {}\n\
             + hostname: {}\n\
             + user: {}\n\
             + artifacts: [{}]({})\n\
             + reason: {}\n\
             ***\n",
            Local::now().format("%a %b %e %H:%M:%S %Y"),
            hostname(),
            username(),
            location, location,
            reason)
}

struct ParsedReport {
    path:       PathBuf,
    target:     ReportTarget,
    cases:      Vec<JunitCase>,
}

pub struct Uploader<'a> {
    pub client:     &'a dyn TestRail,
    pub rc:         &'a Testrailrc,
    pub artifacts:  &'a dyn ArtifactSource,
}

impl Uploader<'_> {
    pub fn run(&self, cmd: &UploadCommand) -> anyhow::Result<UploadSummary> {
        match cmd {
            UploadCommand::AddResults(job) => {
                let description = upload_description(&job.location(self.rc), &job.reason);
                self.add_results(job, &description)
            }
            UploadCommand::ClosePlans(pattern) => {
                let plans_closed = self.close_plans(pattern)?;
                Ok(UploadSummary { plans_closed, ..Default::default() })
            }
        }
    }

    /// Closes every open plan whose name starts with `pattern`; a plan that
    /// fails to close is logged and skipped.
    pub fn close_plans(&self, pattern: &str) -> anyhow::Result<usize> {
        let plans = api::open_plans_matching(self.client, self.rc.project_id, pattern)
            .with_context(|| format!("listing open plans matching {:?}", pattern))?;
        info!("{} open plans match {:?}", plans.len(), pattern);

        let mut count = 0;
        for p in plans {
            info!("Closing plan {}", p.name);
            match self.client.close_plan(p.id) {
                Ok(())  => count += 1,
                Err(e)  => warn!("plan {} not closed: {}", p.name, e),
            }
        }

        info!("{} plan(s) closed with pattern {}", count, pattern);
        Ok(count)
    }

    pub fn add_results(&self, job: &UploadJob, description: &str) -> anyhow::Result<UploadSummary> {
        let project = self.rc.project_id;
        let mut summary = UploadSummary::default();

        info!("Version: {}", job.version);
        info!("Suite: {}", job.suite);

        // Held until the end so downloaded reports stay on disk
        let (_fetched, paths) = match &job.source {
            ReportSource::Artifacts(a) => {
                let base = artifacts_base(&self.rc.artifacts, job.base_url.as_deref(), job.old_artifacts);
                let url = artifacts_url(&base, a);
                let fetched = self.artifacts.fetch_reports(&url, &job.distribs)
                    .with_context(|| format!("fetching reports from {}", url))?;
                let paths = fetched.paths.clone();
                (Some(fetched), paths)
            }
            ReportSource::Reports(r) => (None, r.clone()),
        };
        let set = expand_paths(&paths);

        let suite = api::find_suite(self.client, project, &job.suite)?
            .ok_or_else(|| anyhow!("no suite named {:?} in project {}", job.suite, project))?;
        let sections = self.client.get_sections(project, suite.id)?;
        let section_names: Vec<String> = sections.iter().map(|s| s.name.clone()).collect();
        info!("Sections: {:?}", section_names);

        let parsed = self.classify(job, &set.junit, &section_names, &mut summary);

        let mut index = CaseIndex::new(self.client.get_cases(project, suite.id)?);
        info!("{} cases in suite {}", index.len(), suite.name);

        if job.add_missing_cases {
            summary.cases_added = self.add_missing_cases(&sections, &parsed, &mut index);
        }

        let plan = self.resolve_plan(job, &suite, description)?;
        summary.plan_id = Some(plan.id);

        let needed: BTreeSet<&str> = parsed.iter().map(|r| r.target.distrib.as_str()).collect();
        let mut runs: BTreeMap<&str, u64> = BTreeMap::new();
        for d in needed {
            let run = plan.run_for_distrib(d)
                .ok_or_else(|| anyhow!("no run for distribution {} in plan {} (#{})", d, plan.name, plan.id))?;
            runs.insert(d, run.id);
        }

        let mut used_runs = BTreeSet::new();
        for r in &parsed {
            let run_id = runs[r.target.distrib.as_str()];
            let section_id = sections.iter().find(|s| s.name == r.target.section).map(|s| s.id);
            let mapped = map_results(&r.cases, &index, section_id, &job.version, description);
            summary.unmapped += mapped.unmapped.len();

            info!("{:?}: {} results for {}/{} in run {}",
                  r.path, mapped.results.len(), r.target.section, r.target.distrib, run_id);

            let mut ok = true;
            for batch in mapped.results.chunks(BATCH_SIZE) {
                match self.client.add_results_for_cases(run_id, batch) {
                    Ok(())  => summary.results_submitted += batch.len(),
                    Err(e)  => {
                        error!("{:?}: posting {} results to run {} failed: {}", r.path, batch.len(), run_id, e);
                        summary.results_failed += batch.len();
                        ok = false;
                    }
                }
            }

            if ok {
                summary.reports_uploaded += 1;
            }
            used_runs.insert(run_id);
        }

        if !set.global.is_empty() {
            info!("Check environment issues");
        }
        for g in &set.global {
            summary.env_results += self.tag_step_failures(g, job, &plan, &sections, &index, description);
        }

        if job.close_runs {
            for run_id in &used_runs {
                info!("Closing run {}", run_id);
                if let Err(e) = self.client.close_run(*run_id) {
                    warn!("run {} not closed: {}", run_id, e);
                }
            }
        }

        if job.close_plan {
            info!("Closing plan {}", plan.id);
            if let Err(e) = self.client.close_plan(plan.id) {
                warn!("plan {} not closed: {}", plan.id, e);
            }
        }

        if let Some(pattern) = &job.close_pattern_plans {
            match self.close_plans(pattern) {
                Ok(n)   => summary.plans_closed = n,
                Err(e)  => warn!("{:#}", e),
            }
        }

        let url = api::plan_url(&self.rc.url, plan.id);
        info!("Testrail plan: {}", url);

        if let Some(f) = &job.linkfile {
            std::fs::write(f, &url).with_context(|| format!("writing plan url to {:?}", f))?;
        }
        summary.plan_url = Some(url);

        info!("* Put {} results ({} failed, {} without a case) from {} reports; {} rejected, {} excluded, {} unreadable",
              summary.results_submitted, summary.results_failed, summary.unmapped,
              parsed.len(), summary.reports_rejected, summary.reports_excluded, summary.reports_unreadable);
        if summary.cases_added > 0 {
            info!("* Added {} new cases", summary.cases_added);
        }
        if summary.env_results > 0 {
            info!("* Tagged {} tests with environment failures", summary.env_results);
        }

        Ok(summary)
    }

    /// Places and parses every report. Anything wrong with one report only
    /// drops that report, and happens before any API mutation.
    fn classify(&self, job: &UploadJob, paths: &[PathBuf], sections: &[String],
                summary: &mut UploadSummary) -> Vec<ParsedReport> {
        let mut ret = Vec::new();

        for path in paths {
            let target = match infer_target(path, sections, &job.distribs) {
                Ok(t)   => t,
                Err(e)  => {
                    error!("{}", e);
                    summary.reports_rejected += 1;
                    continue;
                }
            };

            if job.exclude_sections.contains(&target.section) {
                info!("{:?}: section {} excluded, skipping", path, target.section);
                summary.reports_excluded += 1;
                continue;
            }

            match junit::parse_file(path) {
                Ok(cases) => ret.push(ParsedReport { path: path.clone(), target, cases }),
                Err(e) => {
                    error!("{}", e);
                    summary.reports_unreadable += 1;
                }
            }
        }

        ret
    }

    fn add_missing_cases(&self, sections: &[Section], parsed: &[ParsedReport], index: &mut CaseIndex) -> usize {
        let mut added = 0;

        for r in parsed {
            let section = match sections.iter().find(|s| s.name == r.target.section) {
                Some(s) => s,
                None    => continue,
            };

            for tc in &r.cases {
                let name = tc.full_name();
                if index.contains_in(&name, section.id) {
                    continue;
                }

                match self.client.add_case(section.id, &name) {
                    Ok(case) => {
                        info!("Added case {} in section {}", name, section.name);
                        index.insert(case);
                        added += 1;
                    }
                    Err(e) => warn!("{}: case not added: {}", name, e),
                }
            }
        }

        added
    }

    /// The open plan named after the version, created with one run per
    /// configuration if it does not exist yet.
    fn resolve_plan(&self, job: &UploadJob, suite: &Suite, description: &str) -> anyhow::Result<Plan> {
        let project = self.rc.project_id;

        let plan = match api::find_open_plan(self.client, project, &job.version)
            .with_context(|| format!("looking up plan {}", job.version))? {
            Some(p) => {
                info!("Plan already exists {}", p.name);
                p
            }
            None => {
                let milestone_id = api::find_milestone(self.client, project, &job.milestone)?;
                if milestone_id.is_none() {
                    warn!("milestone {:?} not found, creating plan without one", job.milestone);
                }

                info!("Add plan {}", job.version);
                let plan = self.client.add_plan(project, &NewPlan {
                    name:           job.version.clone(),
                    description:    description.to_string(),
                    milestone_id,
                }).with_context(|| format!("creating plan {}", job.version))?;

                let config_ids: Vec<u64> = self.client.get_configs(project)?
                    .into_iter()
                    .next()
                    .map(|g| g.configs.iter().map(|c| c.id).collect())
                    .unwrap_or_default();

                self.client.add_plan_entry(plan.id, &NewPlanEntry::per_config(suite.id, config_ids))
                    .with_context(|| format!("adding runs to plan {}", job.version))?;
                self.client.get_plan(plan.id)?
            }
        };

        for entry in &plan.entries {
            if let Err(e) = self.client.update_plan_entry(plan.id, &entry.id, description) {
                warn!("plan entry {} not updated: {}", entry.id, e);
            }
        }

        Ok(plan)
    }

    /// Marks the tests of tasks whose setup or requirements step failed.
    fn tag_step_failures(&self, path: &Path, job: &UploadJob, plan: &Plan, sections: &[Section],
                         index: &CaseIndex, description: &str) -> usize {
        let json = match std::fs::read_to_string(path) {
            Ok(j)   => j,
            Err(e)  => {
                error!("error reading {:?}: {}", path, e);
                return 0;
            }
        };

        let failures = match parse_global_report(&json) {
            Ok(f)   => f,
            Err(e)  => {
                info!("{:?} not a valid format for global report: {}", path, e);
                return 0;
            }
        };

        let names: Vec<String> = sections.iter()
            .map(|s| s.name.clone())
            .filter(|n| !job.exclude_sections.contains(n))
            .collect();

        let mut tagged = 0;
        for f in failures {
            let section = match find_section(&f.task, &names)
                .and_then(|n| sections.iter().find(|s| &s.name == n)) {
                Some(s) => s,
                None    => {
                    info!("No valid section found in testrail: {}", f.task);
                    continue;
                }
            };

            let run = match plan.run_for_distrib(&f.distrib) {
                Some(r) => r,
                None    => {
                    warn!("{}: no run for distribution {} in plan {}", f.task, f.distrib, plan.name);
                    continue;
                }
            };

            let tests = match self.client.get_tests(run.id) {
                Ok(t)   => t,
                Err(e)  => {
                    error!("listing tests of run {}: {}", run.id, e);
                    continue;
                }
            };

            let in_section: HashSet<u64> = index.in_section(section.id).collect();
            let results: Vec<_> = tests.iter()
                .filter(|t| in_section.contains(&t.case_id))
                .map(|t| step_result(t, f.step, &job.version, description))
                .collect();

            info!("Put env issues: {} - {} - {:?} ({} tests)", section.name, f.distrib, f.step, results.len());

            for batch in results.chunks(BATCH_SIZE) {
                match self.client.add_results(run.id, batch) {
                    Ok(())  => tagged += batch.len(),
                    Err(e)  => error!("posting env issues to run {} failed: {}", run.id, e),
                }
            }
        }

        tagged
    }
}
