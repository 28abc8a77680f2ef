//! Minimal JUnit XML reader: just the `<testcase>` elements and whatever
//! failure/error/skipped child each one carries.

use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::JunitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JunitCase {
    pub classname:  String,
    pub name:       String,
    pub time:       Option<f64>,
    pub outcome:    OutcomeKind,
    /// `message` attribute of the failure/skipped element
    pub message:    Option<String>,
    /// Text body of the failure/skipped element
    pub trace:      Option<String>,
}

impl JunitCase {
    /// `classname.name`, the title TestRail cases are created with.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.classname, self.name)
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.time.filter(|t| t.is_finite() && *t > 0.0).map(|t| t as u64).unwrap_or(0)
    }
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, quick_xml::Error> {
    for a in e.attributes() {
        let a = a.map_err(quick_xml::Error::from)?;
        if a.key.as_ref() == key {
            return Ok(Some(a.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn new_case(e: &BytesStart<'_>) -> Result<JunitCase, quick_xml::Error> {
    Ok(JunitCase {
        classname:  attr(e, b"classname")?.unwrap_or_default(),
        name:       attr(e, b"name")?.unwrap_or_default(),
        time:       attr(e, b"time")?.and_then(|t| t.trim().parse().ok()),
        outcome:    OutcomeKind::Passed,
        message:    None,
        trace:      None,
    })
}

fn outcome_of(tag: &[u8]) -> Option<OutcomeKind> {
    match tag {
        b"failure" | b"error"   => Some(OutcomeKind::Failed),
        b"skipped"              => Some(OutcomeKind::Skipped),
        _                       => None,
    }
}

/// Only the first failure/error/skipped child of a testcase counts.
fn set_outcome(case: &mut JunitCase, kind: OutcomeKind, e: &BytesStart<'_>) -> Result<bool, quick_xml::Error> {
    if case.outcome != OutcomeKind::Passed {
        return Ok(false);
    }
    case.outcome = kind;
    case.message = attr(e, b"message")?;
    Ok(true)
}

pub fn parse_str(xml: &str) -> Result<Vec<JunitCase>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut ret = Vec::new();
    let mut current: Option<JunitCase> = None;
    let mut trace: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"testcase" => {
                current = Some(new_case(&e)?);
            }
            Event::Empty(e) if e.name().as_ref() == b"testcase" => {
                ret.push(new_case(&e)?);
            }
            Event::Start(e) => {
                if let (Some(case), Some(kind)) = (current.as_mut(), outcome_of(e.name().as_ref())) {
                    if set_outcome(case, kind, &e)? {
                        trace = Some(String::new());
                    }
                }
            }
            Event::Empty(e) => {
                if let (Some(case), Some(kind)) = (current.as_mut(), outcome_of(e.name().as_ref())) {
                    set_outcome(case, kind, &e)?;
                }
            }
            Event::Text(t) => {
                if let Some(buf) = trace.as_mut() {
                    buf.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some(buf) = trace.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::End(e) => {
                let tag = e.name();
                if tag.as_ref() == b"testcase" {
                    if let Some(case) = current.take() {
                        ret.push(case);
                    }
                } else if outcome_of(tag.as_ref()).is_some() {
                    if let (Some(case), Some(buf)) = (current.as_mut(), trace.take()) {
                        case.trace = Some(buf).filter(|b| !b.is_empty());
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    // "." is what an element with neither attribute would be named
    ret.retain(|c| !(c.classname.is_empty() && c.name.is_empty()));
    Ok(ret)
}

pub fn parse_file(path: &Path) -> Result<Vec<JunitCase>, JunitError> {
    let xml = std::fs::read_to_string(path)
        .map_err(|e| JunitError::Io { path: path.to_path_buf(), source: e })?;

    parse_str(&xml).map_err(|e| JunitError::Xml { path: path.to_path_buf(), source: e })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuites>
  <testsuite name="fuse" tests="5">
    <testcase classname="tests.fuse.test_io" name="test_read" time="1.75"/>
    <testcase classname="tests.fuse.test_io" name="test_write" time="12.3">
      <system-out>noise</system-out>
      <failure message="assert 1 == 2">Traceback (most recent call last):
  File &quot;test_io.py&quot;, line 3</failure>
    </testcase>
    <testcase classname="tests.fuse.test_io" name="test_error" time="0.1">
      <error message="boom"><![CDATA[RuntimeError: <boom>]]></error>
    </testcase>
    <testcase classname="tests.fuse.test_io" name="test_skip" time="0">
      <skipped message="not on xenial"/>
    </testcase>
    <testcase/>
  </testsuite>
</testsuites>"#;

    #[test]
    fn parses_outcomes() {
        let cases = parse_str(REPORT).unwrap();
        assert_eq!(cases.len(), 4);

        assert_eq!(cases[0].full_name(), "tests.fuse.test_io.test_read");
        assert_eq!(cases[0].outcome, OutcomeKind::Passed);
        assert_eq!(cases[0].elapsed_secs(), 1);

        assert_eq!(cases[1].outcome, OutcomeKind::Failed);
        assert_eq!(cases[1].message.as_deref(), Some("assert 1 == 2"));
        assert!(cases[1].trace.as_deref().unwrap().contains("File \"test_io.py\""));

        assert_eq!(cases[2].outcome, OutcomeKind::Failed);
        assert_eq!(cases[2].trace.as_deref(), Some("RuntimeError: <boom>"));

        assert_eq!(cases[3].outcome, OutcomeKind::Skipped);
        assert_eq!(cases[3].trace, None);
        assert_eq!(cases[3].elapsed_secs(), 0);
    }

    #[test]
    fn system_out_is_not_a_trace() {
        let cases = parse_str(REPORT).unwrap();
        assert!(!cases[1].trace.as_deref().unwrap().contains("noise"));
    }

    #[test]
    fn malformed_xml_is_an_error() {
        assert!(parse_str("<testsuite><testcase name='a'></testsuite>").is_err());
    }

    #[test]
    fn missing_file() {
        let err = parse_file(Path::new("/nonexistent/report.xml")).unwrap_err();
        assert!(matches!(err, JunitError::Io { .. }));
    }
}
