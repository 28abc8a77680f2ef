use std::collections::HashMap;

use log::warn;

use crate::api::{Case, CaseResult, Test, TestResult};
use crate::junit::{JunitCase, OutcomeKind};
use crate::report::FailedStep;

/// Largest number of results posted in one request
pub const BATCH_SIZE: usize = 1000;

pub const FLAKY_REF: &str = "flaky";
pub const KNOWN_FAILED_REF: &str = "known_failed";

/// TestRail result status ids, including the custom statuses configured on
/// the server (7 and up).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Passed              = 1,
    Failed              = 5,
    Skipped             = 6,
    KnownFailedOk       = 7,
    SetupFailed         = 8,
    RequirementsFailed  = 9,
    KnownFailed         = 10,
    FlakyPassed         = 11,
    FlakyFailed         = 12,
}

impl Status {
    pub fn id(self) -> u32 {
        self as u32
    }
}

/// Every case of a suite, looked up by title. Titles are only unique within
/// a section; a lookup without a section gets the first case listed.
pub struct CaseIndex {
    cases:      Vec<Case>,
    by_title:   HashMap<String, Vec<usize>>,
}

impl CaseIndex {
    pub fn new(cases: Vec<Case>) -> CaseIndex {
        let mut index = CaseIndex { cases: Vec::new(), by_title: HashMap::new() };
        for c in cases {
            index.insert(c);
        }
        index
    }

    pub fn get(&self, title: &str) -> Option<&Case> {
        self.get_in(title, None)
    }

    /// The case titled `title` in `section_id`, else the first with that title.
    pub fn get_in(&self, title: &str, section_id: Option<u64>) -> Option<&Case> {
        let idx = self.by_title.get(title)?;
        let mut cases = idx.iter().map(|i| &self.cases[*i]);
        let first = cases.clone().next();

        match section_id {
            Some(s) => cases.find(|c| c.section_id == Some(s)).or(first),
            None    => first,
        }
    }

    pub fn contains(&self, title: &str) -> bool {
        self.by_title.contains_key(title)
    }

    /// True if `section_id` has a case titled `title`
    pub fn contains_in(&self, title: &str, section_id: u64) -> bool {
        self.by_title.get(title)
            .map(|idx| idx.iter().any(|i| self.cases[*i].section_id == Some(section_id)))
            .unwrap_or(false)
    }

    pub fn insert(&mut self, case: Case) {
        self.by_title.entry(case.title.clone()).or_default().push(self.cases.len());
        self.cases.push(case);
    }

    /// Number of cases, duplicated titles included
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Ids of the cases in `section_id`
    pub fn in_section(&self, section_id: u64) -> impl Iterator<Item = u64> + '_ {
        self.cases.iter()
            .filter(move |c| c.section_id == Some(section_id))
            .map(|c| c.id)
    }
}

fn status_and_banner(tc: &JunitCase, case: &Case) -> (Status, Option<&'static str>) {
    let known_failed = case.has_ref(KNOWN_FAILED_REF);
    let flaky = case.has_ref(FLAKY_REF);

    match (tc.outcome, known_failed, flaky) {
        (OutcomeKind::Failed, true, _)      => (Status::KnownFailed,    Some("*** Known failed test ***")),
        (OutcomeKind::Passed, true, _)      => (Status::KnownFailedOk,  Some("*** Known failed test PASSED (!)***")),
        (OutcomeKind::Passed, false, true)  => (Status::FlakyPassed,    Some("*** flaky test OK ***")),
        (OutcomeKind::Failed, false, true)  => (Status::FlakyFailed,    Some("*** flaky test FAILED ***")),
        (OutcomeKind::Passed, ..)           => (Status::Passed,         None),
        (OutcomeKind::Failed, ..)           => (Status::Failed,         None),
        (OutcomeKind::Skipped, ..)          => (Status::Skipped,        None),
    }
}

/// Strips the leading whitespace common to every non-blank line.
fn dedent(s: &str) -> String {
    let indent = s.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    s.lines()
        .map(|l| l.get(indent..).unwrap_or_else(|| l.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn comment(tc: &JunitCase, description: &str, banner: Option<&str>) -> String {
    let mut c = String::new();

    if let Some(b) = banner {
        c.push_str(b);
        c.push('\n');
    }

    c.push_str(description);

    match tc.outcome {
        OutcomeKind::Passed => c.push_str("OK"),
        _ => {
            c.push_str(&format!("***\n# Error message\n{}\n***\n# Traceback\n{}\n***\n",
                                dedent(tc.message.as_deref().unwrap_or("")),
                                tc.trace.as_deref().unwrap_or("No trace")));
        }
    }
    c
}

pub fn case_result(tc: &JunitCase, case: &Case, version: &str, description: &str) -> CaseResult {
    let (status, banner) = status_and_banner(tc, case);
    let elapsed = tc.elapsed_secs();

    CaseResult {
        case_id:    case.id,
        status_id:  status.id(),
        comment:    comment(tc, description, banner),
        version:    version.to_string(),
        elapsed:    if elapsed > 0 { Some(format!("{}s", elapsed)) } else { None },
    }
}

#[derive(Debug, Default)]
pub struct Mapped {
    pub results:    Vec<CaseResult>,
    /// Test names with no case in the suite
    pub unmapped:   Vec<String>,
}

/// Maps a report's test cases to suite cases, preferring those of the
/// report's section.
pub fn map_results(cases: &[JunitCase], index: &CaseIndex, section_id: Option<u64>,
                   version: &str, description: &str) -> Mapped {
    let mut ret = Mapped::default();

    for tc in cases {
        let name = tc.full_name();
        match index.get_in(&name, section_id) {
            Some(case)  => ret.results.push(case_result(tc, case, version, description)),
            None        => {
                warn!("{}: no matching case in suite, skipping", name);
                ret.unmapped.push(name);
            }
        }
    }

    ret
}

pub fn step_result(test: &Test, step: FailedStep, version: &str, description: &str) -> TestResult {
    let (status, name) = match step {
        FailedStep::Setup           => (Status::SetupFailed, "setup"),
        FailedStep::Requirements    => (Status::RequirementsFailed, "requirements"),
    };

    TestResult {
        test_id:    test.id,
        status_id:  status.id(),
        comment:    format!("{}\n{} failed", description, name),
        version:    version.to_string(),
    }
}
