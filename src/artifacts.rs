//! Build artifacts: where they live and how their reports get to local disk.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context};
use log::{debug, info, warn};
use regex::Regex;
use reqwest::blocking::Client;
use tempfile::TempDir;
use url::Url;

use crate::report::{contains_segment, GLOBAL_REPORT_NAME};
use crate::ArtifactsRc;

/// Same recursion limit the artifacts were historically mirrored with
const MAX_DEPTH: usize = 10;

fn with_slash(s: &str) -> String {
    if s.ends_with('/') { s.to_string() } else { format!("{}/", s) }
}

/// Everything before the last `/`, like a shell `dirname`.
fn parent_dir(url: &str) -> &str {
    url.rsplit_once('/').map(|(p, _)| p).unwrap_or(url)
}

/// Base URL artifact names are appended to: the parent of `base_url` when
/// one is given, else the legacy or current artifacts URL from the rc.
pub fn artifacts_base(rc: &ArtifactsRc, base_url: Option<&str>, old_artifacts: bool) -> String {
    match base_url {
        Some(b)                 => format!("{}/", parent_dir(b)),
        None if old_artifacts   => with_slash(&rc.old_url),
        None                    => with_slash(&rc.url),
    }
}

pub fn artifacts_url(base: &str, artifacts: &str) -> String {
    format!("{}{}/", with_slash(base), artifacts.trim_matches('/'))
}

/// Browsable location of the artifacts, for upload descriptions.
pub fn public_location(rc: &ArtifactsRc, artifacts: &str) -> String {
    format!("{}{}", with_slash(&rc.public_url), artifacts.trim_matches('/'))
}

/// Report files pulled down from an artifacts listing. The files live as
/// long as `dir` does.
pub struct FetchedReports {
    pub dir:        Option<TempDir>,
    pub paths:      Vec<PathBuf>,
}

pub trait ArtifactSource {
    /// Downloads JUnit reports mentioning one of `distribs`, and any global
    /// report, from the listing at `url`.
    fn fetch_reports(&self, url: &str, distribs: &[String]) -> anyhow::Result<FetchedReports>;
}

pub struct HttpArtifacts {
    client:         Client,
    credentials:    Option<(String, String)>,
    href:           Regex,
}

impl HttpArtifacts {
    pub fn new(rc: &ArtifactsRc) -> anyhow::Result<HttpArtifacts> {
        Ok(HttpArtifacts {
            client:         Client::builder().timeout(Duration::from_secs(300)).build()?,
            credentials:    rc.credentials().map(|(l, p)| (l.to_string(), p.to_string())),
            href:           Regex::new(r#"href="([^"]+)""#)?,
        })
    }

    fn get(&self, url: &Url) -> anyhow::Result<reqwest::blocking::Response> {
        let mut req = self.client.get(url.clone());
        if let Some((login, pwd)) = &self.credentials {
            req = req.basic_auth(login, Some(pwd));
        }

        Ok(req.send()
           .with_context(|| format!("fetching {}", url))?
           .error_for_status()?)
    }

    fn links(&self, page: &Url, body: &str) -> Vec<Url> {
        self.href.captures_iter(body)
            .map(|c| c[1].to_string())
            .filter(|l| !l.contains('?') && !l.starts_with('#'))
            .filter_map(|l| page.join(&l).ok())
            .collect()
    }
}

fn is_below(root: &Url, u: &Url) -> bool {
    u.origin() == root.origin() &&
        u.path() != root.path() &&
        u.path().starts_with(root.path())
}

fn wanted(u: &Url, distribs: &[String]) -> bool {
    let path = u.path().to_lowercase();

    if path.ends_with(&format!("/{}", GLOBAL_REPORT_NAME)) {
        return true;
    }

    path.ends_with(".xml") &&
        distribs.iter().any(|d| contains_segment(&path, &d.to_lowercase()))
}

/// `u`'s path below `root`, without empty or dot components.
fn relative_path(root: &Url, u: &Url) -> PathBuf {
    u.path()[root.path().len()..]
        .split('/')
        .filter(|c| !c.is_empty() && *c != "." && *c != "..")
        .collect()
}

impl ArtifactSource for HttpArtifacts {
    fn fetch_reports(&self, url: &str, distribs: &[String]) -> anyhow::Result<FetchedReports> {
        let root = Url::parse(&with_slash(url)).with_context(|| format!("invalid artifacts url {}", url))?;
        let dir = tempfile::tempdir()?;

        info!("fetching reports from {}", root);

        // The root listing has to be readable, anything below it is best effort
        let body = self.get(&root)?.text()?;

        let mut seen: HashSet<Url> = HashSet::new();
        let mut queue: VecDeque<(Url, usize)> = self.links(&root, &body)
            .into_iter()
            .filter(|l| is_below(&root, l))
            .map(|l| (l, 1))
            .collect();
        let mut paths = Vec::new();

        while let Some((u, depth)) = queue.pop_front() {
            if !seen.insert(u.clone()) {
                continue;
            }

            if u.path().ends_with('/') {
                if depth >= MAX_DEPTH {
                    continue;
                }

                let body = match self.get(&u).and_then(|r| Ok(r.text()?)) {
                    Ok(b)   => b,
                    Err(e)  => { warn!("skipping listing {}: {:#}", u, e); continue; }
                };

                queue.extend(self.links(&u, &body)
                             .into_iter()
                             .filter(|l| is_below(&root, l))
                             .map(|l| (l, depth + 1)));
            } else if wanted(&u, distribs) {
                let dest = dir.path().join(relative_path(&root, &u));
                debug!("downloading {} => {:?}", u, dest);

                let bytes = match self.get(&u).and_then(|r| Ok(r.bytes()?)) {
                    Ok(b)   => b,
                    Err(e)  => { warn!("skipping {}: {:#}", u, e); continue; }
                };

                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&dest, &bytes).with_context(|| format!("writing {:?}", dest))?;
                paths.push(dest);
            }
        }

        if paths.is_empty() {
            return Err(anyhow!("no report found under {}", root));
        }

        info!("{} reports downloaded from {}", paths.len(), root);
        Ok(FetchedReports { dir: Some(dir), paths })
    }
}
