//! Retention policy for old runs and plans: close them, or delete them
//! outright, once they are older than the retention time and their name
//! matches none of the exclude patterns.

use std::thread::sleep;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::api::{Plan, Run, TestRail};
use crate::error::ApiError;

pub const DEFAULT_EXCLUDE_PATTERNS: [&str; 5] = ["promoted", "rc", "pw", "postmerge", "post-merge"];
pub const DEFAULT_RETENTION_SECS: u64 = 30 * 24 * 3600;

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Action {
    /// Close open runs, leaving closed ones alone
    Close,
    /// Delete runs
    Garbage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Target {
    Runs,
    Plans,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LifecyclePolicy {
    pub action:         Action,
    pub target:         Target,
    pub retention:      Duration,
    pub exclude:        Vec<String>,
    /// Sweep again after this long; a single pass when unset
    pub interval:       Option<Duration>,
    pub dry_run:        bool,
}

/// The fields of a run or plan the policy looks at.
#[derive(Clone, Debug)]
struct Tracked {
    id:             u64,
    name:           String,
    created_on:     Option<i64>,
    is_completed:   bool,
    url:            Option<String>,
}

impl From<Run> for Tracked {
    fn from(r: Run) -> Self {
        Tracked { id: r.id, name: r.name, created_on: r.created_on, is_completed: r.is_completed, url: r.url }
    }
}

impl From<Plan> for Tracked {
    fn from(p: Plan) -> Self {
        Tracked { id: p.id, name: p.name, created_on: p.created_on, is_completed: p.is_completed, url: p.url }
    }
}

impl Tracked {
    fn label(&self) -> String {
        match &self.url {
            Some(url)   => format!("{} ({})", self.name, url),
            None        => format!("{} (#{})", self.name, self.id),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    Act,
    Malformed,
    TooYoung,
    Excluded,
    AlreadyClosed,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Ids closed or deleted (or that would have been, in a dry run)
    pub acted:          Vec<u64>,
    /// Names kept because of an exclude pattern
    pub excluded:       Vec<String>,
    pub already_closed: usize,
    pub too_young:      usize,
    pub malformed:      usize,
}

pub fn is_excluded(name: &str, exclude: &[String]) -> bool {
    exclude.iter().any(|p| name.contains(p.as_str()))
}

fn judge(policy: &LifecyclePolicy, item: &Tracked, now: DateTime<Utc>) -> Verdict {
    let created_on = match item.created_on {
        Some(t) => t,
        None    => return Verdict::Malformed,
    };

    let age = now.timestamp().saturating_sub(created_on);
    let retention = i64::try_from(policy.retention.as_secs()).unwrap_or(i64::MAX);
    if age <= retention {
        return Verdict::TooYoung;
    }

    if is_excluded(&item.name, &policy.exclude) {
        return Verdict::Excluded;
    }

    if policy.action == Action::Close && item.is_completed {
        return Verdict::AlreadyClosed;
    }

    Verdict::Act
}

fn list(client: &dyn TestRail, project_id: u64, target: Target) -> Result<Vec<Tracked>, ApiError> {
    Ok(match target {
        Target::Runs    => client.get_runs(project_id)?.into_iter().map(Tracked::from).collect(),
        Target::Plans   => client.get_plans(project_id, false)?.into_iter().map(Tracked::from).collect(),
    })
}

fn apply(client: &dyn TestRail, policy: &LifecyclePolicy, id: u64) -> Result<(), ApiError> {
    match (policy.action, policy.target) {
        (Action::Close,   Target::Runs)     => client.close_run(id),
        (Action::Close,   Target::Plans)    => client.close_plan(id),
        (Action::Garbage, Target::Runs)     => client.delete_run(id),
        (Action::Garbage, Target::Plans)    => client.delete_plan(id),
    }
}

/// One pass over every run (or plan) of the project. Any API error aborts
/// the pass; items already handled stay handled.
pub fn sweep(client: &dyn TestRail, project_id: u64, policy: &LifecyclePolicy,
             now: DateTime<Utc>) -> Result<SweepReport, ApiError> {
    let mut report = SweepReport::default();
    let verb = match policy.action {
        Action::Close   => "closing",
        Action::Garbage => "deleting",
    };

    for item in list(client, project_id, policy.target)? {
        match judge(policy, &item, now) {
            Verdict::Malformed => {
                warn!("skipping {}: no creation timestamp", item.label());
                report.malformed += 1;
            }
            Verdict::TooYoung       => report.too_young += 1,
            Verdict::AlreadyClosed  => report.already_closed += 1,
            Verdict::Excluded => {
                info!("keep {}", item.label());
                report.excluded.push(item.name);
            }
            Verdict::Act => {
                if policy.dry_run {
                    info!("would be {} {}", verb, item.label());
                } else {
                    info!("{} {}", verb, item.label());
                    apply(client, policy, item.id)?;
                }
                report.acted.push(item.id);
            }
        }
    }

    Ok(report)
}

/// Sweeps once, or forever with `policy.interval` between passes.
pub fn run(client: &dyn TestRail, project_id: u64, policy: &LifecyclePolicy) -> anyhow::Result<()> {
    info!("lifecycle: action={:?} target={:?} retention={}s exclude={:?}{}",
          policy.action, policy.target, policy.retention.as_secs(), policy.exclude,
          if policy.dry_run { " (dry run)" } else { "" });

    loop {
        let report = sweep(client, project_id, policy, Utc::now())?;

        info!("{} {} {}, {} kept by exclude patterns, {} already closed, {} within retention, {} malformed",
              report.acted.len(),
              match policy.target { Target::Runs => "runs", Target::Plans => "plans" },
              match policy.action { Action::Close => "closed", Action::Garbage => "deleted" },
              report.excluded.len(), report.already_closed, report.too_young, report.malformed);

        match policy.interval {
            None            => return Ok(()),
            Some(interval)  => {
                info!("Sleeping {}s...", interval.as_secs());
                sleep(interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = 24 * 3600;

    fn policy(action: Action) -> LifecyclePolicy {
        LifecyclePolicy {
            action,
            target:     Target::Runs,
            retention:  Duration::from_secs(15 * DAY as u64),
            exclude:    vec!["promoted".to_string(), "rc".to_string()],
            interval:   None,
            dry_run:    false,
        }
    }

    fn item(name: &str, age_days: Option<i64>, closed: bool, now: DateTime<Utc>) -> Tracked {
        Tracked {
            id:             1,
            name:           name.to_string(),
            created_on:     age_days.map(|d| now.timestamp() - d * DAY),
            is_completed:   closed,
            url:            None,
        }
    }

    #[test]
    fn verdicts() {
        let now = Utc::now();
        let p = policy(Action::Close);

        assert_eq!(judge(&p, &item("nightly", Some(20), false, now), now), Verdict::Act);
        assert_eq!(judge(&p, &item("nightly", Some(10), false, now), now), Verdict::TooYoung);
        assert_eq!(judge(&p, &item("nightly", None, false, now), now), Verdict::Malformed);
        assert_eq!(judge(&p, &item("7.4.0_rc2", Some(20), false, now), now), Verdict::Excluded);
        assert_eq!(judge(&p, &item("nightly", Some(20), true, now), now), Verdict::AlreadyClosed);
    }

    #[test]
    fn garbage_ignores_closed_state() {
        let now = Utc::now();
        let p = policy(Action::Garbage);
        assert_eq!(judge(&p, &item("nightly", Some(20), true, now), now), Verdict::Act);
    }

    #[test]
    fn exactly_retention_is_kept() {
        let now = Utc::now();
        let p = policy(Action::Garbage);
        assert_eq!(judge(&p, &item("nightly", Some(15), false, now), now), Verdict::TooYoung);
    }

    #[test]
    fn huge_retention_keeps_everything() {
        let now = Utc::now();
        let mut p = policy(Action::Garbage);
        p.retention = Duration::from_secs(u64::MAX);

        let mut young = item("nightly", None, false, now);
        young.created_on = Some(now.timestamp() - 3600);
        assert_eq!(judge(&p, &young, now), Verdict::TooYoung);
        assert_eq!(judge(&p, &item("nightly", Some(10_000), false, now), now), Verdict::TooYoung);

        let mut ancient = item("nightly", None, false, now);
        ancient.created_on = Some(i64::MIN);
        assert_eq!(judge(&p, &ancient, now), Verdict::TooYoung);
    }

    #[test]
    fn exclude_is_substring_match() {
        let ex: Vec<String> = DEFAULT_EXCLUDE_PATTERNS.iter().map(|s| s.to_string()).collect();
        assert!(is_excluded("staging-7.1.0.post-merge.00034526", &ex));
        assert!(is_excluded("promoted-7.2.0.0", &ex));
        assert!(!is_excluded("staging-7.1.0.nightly", &ex));
    }
}
