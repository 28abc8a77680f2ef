use std::time::Duration;

use log::debug;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use super::*;
use crate::Testrailrc;

const TIMEOUT_SECS: u64 = 120;

/// Blocking TestRail API v2 client. Every request is authenticated with the
/// login and API key from the rc file; nothing is retried.
pub struct HttpClient {
    client:     Client,
    /// `<testrail url>/index.php?`, which API paths and `_links.next` are appended to
    index:      String,
    login:      String,
    key:        String,
}

impl HttpClient {
    pub fn new(rc: &Testrailrc) -> Result<HttpClient, ApiError> {
        let index = format!("{}/index.php?", rc.url.trim_end_matches('/'));

        let client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .map_err(|e| ApiError::Network { url: index.clone(), source: e })?;

        Ok(HttpClient {
            client,
            index,
            login:  rc.login.clone(),
            key:    rc.key.clone(),
        })
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> String {
        api_url(&self.index, path, params)
    }

    fn send(&self, req: RequestBuilder, url: &str) -> Result<Value, ApiError> {
        let resp = req
            .basic_auth(&self.login, Some(&self.key))
            .header(CONTENT_TYPE, "application/json")
            .send()
            .map_err(|e| ApiError::Network { url: url.to_string(), source: e })?;

        let resp = check_status(resp)?;
        let body = resp.text()
            .map_err(|e| ApiError::Network { url: url.to_string(), source: e })?;

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|e| ApiError::InvalidResponse {
            url:        url.to_string(),
            message:    e.to_string(),
        })
    }

    fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T, ApiError> {
        let url = self.url(path, params);
        debug!("GET {}", url);

        let v = self.send(self.client.get(&url), &url)?;
        from_value(&url, v)
    }

    /// GET a bulk endpoint, following `_links.next` across pages.
    fn get_bulk<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)], key: &str) -> Result<Vec<T>, ApiError> {
        let mut url = self.url(path, params);
        let mut ret = Vec::new();

        loop {
            debug!("GET {}", url);
            let v = self.send(self.client.get(&url), &url)?;
            let (items, next) = split_page(&url, v, key)?;

            for i in items {
                ret.push(from_value(&url, i)?);
            }

            match next {
                Some(next) => url = format!("{}{}", self.index, next.trim_start_matches("/index.php?")),
                None       => break,
            }
        }

        Ok(ret)
    }

    fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value, ApiError> {
        let url = self.url(path, &[]);
        debug!("POST {}", url);

        self.send(self.client.post(&url).json(body), &url)
    }
}

pub(crate) fn api_url(index: &str, path: &str, params: &[(&str, String)]) -> String {
    let mut url = format!("{}/api/v2/{}", index, path);

    for (k, v) in params {
        url.push('&');
        url.push_str(k);
        url.push('=');
        url.push_str(v);
    }
    url
}

fn check_status(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let retry_after = resp.headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok());

    let message = resp.text()
        .ok()
        .map(|body| error_message(&body))
        .unwrap_or_default();

    Err(match status {
        StatusCode::UNAUTHORIZED |
        StatusCode::FORBIDDEN           => ApiError::Auth { status: status.as_u16(), message },
        StatusCode::NOT_FOUND           => ApiError::NotFound { message },
        StatusCode::TOO_MANY_REQUESTS   => ApiError::RateLimited { retry_after },
        _                               => ApiError::Status { status: status.as_u16(), message },
    })
}

/// TestRail reports failures as `{"error": "..."}`; fall back to the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

/// Bulk endpoints answer with either a bare array (older servers) or a
/// paginated envelope holding the items under `key`.
fn split_page(url: &str, v: Value, key: &str) -> Result<(Vec<Value>, Option<String>), ApiError> {
    match v {
        Value::Array(items) => Ok((items, None)),
        Value::Object(mut obj) => {
            let next = obj.get("_links")
                .and_then(|l| l.get("next"))
                .and_then(|n| n.as_str())
                .map(str::to_string);

            match obj.remove(key) {
                Some(Value::Array(items)) => Ok((items, next)),
                _ => Err(ApiError::InvalidResponse {
                    url:        url.to_string(),
                    message:    format!("expected an array under {:?}", key),
                }),
            }
        }
        _ => Err(ApiError::InvalidResponse {
            url:        url.to_string(),
            message:    "expected an array or a paginated object".to_string(),
        }),
    }
}

fn from_value<T: DeserializeOwned>(url: &str, v: Value) -> Result<T, ApiError> {
    serde_json::from_value(v).map_err(|e| ApiError::InvalidResponse {
        url:        url.to_string(),
        message:    e.to_string(),
    })
}

impl TestRail for HttpClient {
    fn get_runs(&self, project_id: u64) -> Result<Vec<Run>, ApiError> {
        self.get_bulk(&format!("get_runs/{}", project_id), &[], "runs")
    }

    fn close_run(&self, run_id: u64) -> Result<(), ApiError> {
        self.post(&format!("close_run/{}", run_id), &json!({})).map(|_| ())
    }

    fn delete_run(&self, run_id: u64) -> Result<(), ApiError> {
        self.post(&format!("delete_run/{}", run_id), &json!({})).map(|_| ())
    }

    fn get_plans(&self, project_id: u64, only_open: bool) -> Result<Vec<Plan>, ApiError> {
        let params = if only_open { vec![("is_completed", "0".to_string())] } else { Vec::new() };
        self.get_bulk(&format!("get_plans/{}", project_id), &params, "plans")
    }

    fn get_plan(&self, plan_id: u64) -> Result<Plan, ApiError> {
        self.get(&format!("get_plan/{}", plan_id), &[])
    }

    fn add_plan(&self, project_id: u64, plan: &NewPlan) -> Result<Plan, ApiError> {
        let path = format!("add_plan/{}", project_id);
        let v = self.post(&path, plan)?;
        from_value(&path, v)
    }

    fn add_plan_entry(&self, plan_id: u64, entry: &NewPlanEntry) -> Result<PlanEntry, ApiError> {
        let path = format!("add_plan_entry/{}", plan_id);
        let v = self.post(&path, entry)?;
        from_value(&path, v)
    }

    fn update_plan_entry(&self, plan_id: u64, entry_id: &str, description: &str) -> Result<(), ApiError> {
        let body = json!({ "include_all": true, "description": description });
        self.post(&format!("update_plan_entry/{}/{}", plan_id, entry_id), &body).map(|_| ())
    }

    fn close_plan(&self, plan_id: u64) -> Result<(), ApiError> {
        self.post(&format!("close_plan/{}", plan_id), &json!({})).map(|_| ())
    }

    fn delete_plan(&self, plan_id: u64) -> Result<(), ApiError> {
        self.post(&format!("delete_plan/{}", plan_id), &json!({})).map(|_| ())
    }

    fn get_suites(&self, project_id: u64) -> Result<Vec<Suite>, ApiError> {
        self.get_bulk(&format!("get_suites/{}", project_id), &[], "suites")
    }

    fn get_sections(&self, project_id: u64, suite_id: u64) -> Result<Vec<Section>, ApiError> {
        self.get_bulk(&format!("get_sections/{}", project_id),
                      &[("suite_id", suite_id.to_string())], "sections")
    }

    fn get_cases(&self, project_id: u64, suite_id: u64) -> Result<Vec<Case>, ApiError> {
        self.get_bulk(&format!("get_cases/{}", project_id),
                      &[("suite_id", suite_id.to_string())], "cases")
    }

    fn add_case(&self, section_id: u64, title: &str) -> Result<Case, ApiError> {
        let path = format!("add_case/{}", section_id);
        let v = self.post(&path, &json!({ "title": title }))?;
        from_value(&path, v)
    }

    fn get_configs(&self, project_id: u64) -> Result<Vec<ConfigGroup>, ApiError> {
        self.get_bulk(&format!("get_configs/{}", project_id), &[], "configs")
    }

    fn get_milestones(&self, project_id: u64) -> Result<Vec<Milestone>, ApiError> {
        self.get_bulk(&format!("get_milestones/{}", project_id), &[], "milestones")
    }

    fn get_milestone(&self, milestone_id: u64) -> Result<Milestone, ApiError> {
        self.get(&format!("get_milestone/{}", milestone_id), &[])
    }

    fn get_tests(&self, run_id: u64) -> Result<Vec<Test>, ApiError> {
        self.get_bulk(&format!("get_tests/{}", run_id), &[], "tests")
    }

    fn add_results_for_cases(&self, run_id: u64, results: &[CaseResult]) -> Result<(), ApiError> {
        self.post(&format!("add_results_for_cases/{}", run_id), &json!({ "results": results })).map(|_| ())
    }

    fn add_results(&self, run_id: u64, results: &[TestResult]) -> Result<(), ApiError> {
        self.post(&format!("add_results/{}", run_id), &json!({ "results": results })).map(|_| ())
    }
}
