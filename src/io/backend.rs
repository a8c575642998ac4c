//! Results backend REST client
//!
//! One pooled HTTP client for every backend call. Replies are JSON
//! `{status: "success" | ..., error?}`; anything other than success is a
//! rejection surfaced to the caller and never retried here.

use crate::domain::{DeviceEntry, RunPlan, SessionParams, SimulationStep};
use crate::domain::sim::RunOption;
use crate::infra::Config;
use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-success status in the reply body; shown to the user, no retry
    #[error("backend rejected {endpoint}: {message}")]
    Rejected { endpoint: String, message: String },
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

impl ApiReply {
    fn into_result(self, endpoint: &str) -> Result<(), BackendError> {
        if self.status == "success" {
            Ok(())
        } else {
            Err(BackendError::Rejected {
                endpoint: endpoint.to_string(),
                message: self.error.unwrap_or_else(|| self.status.clone()),
            })
        }
    }
}

#[derive(Debug, Deserialize)]
struct RunCreateReply {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    options: Vec<RunOption>,
    #[serde(default)]
    simsteps: Vec<SimulationStep>,
}

pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    refresh_path: String,
    run_create_path: String,
}

impl BackendClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        // Create HTTP client once for reuse (connection pooling)
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .http1_only()
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            http,
            base_url: config.backend_base_url().trim_end_matches('/').to_string(),
            refresh_path: config.refresh_path().to_string(),
            run_create_path: config.run_create_path().to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<(), BackendError> {
        let url = self.url(path);
        let reply: ApiReply = self
            .http
            .post(&url)
            .form(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        reply.into_result(path)
    }

    /// Push the full session parameter set
    pub async fn set_params(&self, params: &SessionParams) -> Result<(), BackendError> {
        let form: Vec<(&str, String)> = params.form_pairs();
        debug!(raceid = %params.raceid, "backend_set_params");
        self.post_form("/_setparams", &form).await
    }

    /// Apply a scanned-bib action (use/insert/delete) to a result row
    pub async fn scan_action(
        &self,
        action: &str,
        resultid: i64,
        scanid: i64,
    ) -> Result<(), BackendError> {
        let form = [
            ("action", action.to_string()),
            ("resultid", resultid.to_string()),
            ("scanid", scanid.to_string()),
        ];
        self.post_form("/_scanaction", &form).await
    }

    /// List the Bluetooth devices the backend knows about
    pub async fn bluetooth_devices(&self) -> Result<Vec<DeviceEntry>, BackendError> {
        let url = self.url("/_getbluetoothdevices");
        let devices: Vec<DeviceEntry> = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(devices)
    }

    /// Table refresh read; rows are opaque to the gateway
    pub async fn fetch_updates(
        &self,
        since: DateTime<Utc>,
    ) -> Result<serde_json::Value, BackendError> {
        let url = self.url(&self.refresh_path);
        let value: serde_json::Value = self
            .http
            .get(&url)
            .query(&[("since", since.to_rfc3339_opts(SecondsFormat::Secs, true))])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(value)
    }

    /// Create a new simulation run and fetch its step queue.
    ///
    /// The first returned option is the run just created.
    pub async fn create_simulation_run(
        &self,
        simulation_id: i64,
    ) -> Result<RunPlan, BackendError> {
        let url = self.url(&self.run_create_path);
        let reply: RunCreateReply = self
            .http
            .post(&url)
            .form(&[("simulation_id", simulation_id.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if reply.status != "success" {
            return Err(BackendError::Rejected {
                endpoint: self.run_create_path.clone(),
                message: reply.error.unwrap_or(reply.status),
            });
        }
        let Some(first) = reply.options.first() else {
            return Err(BackendError::Rejected {
                endpoint: self.run_create_path.clone(),
                message: "no run options returned".to_string(),
            });
        };

        let mut steps = reply.simsteps;
        steps.sort_by(|a, b| a.time.total_cmp(&b.time));

        Ok(RunPlan { run_id: first.value, options: reply.options.clone(), steps })
    }

    /// Execute one simulation step server-side.
    ///
    /// Step fields travel as jQuery-style bracket keys, matching what the
    /// step endpoint expects.
    pub async fn dispatch_step(
        &self,
        run_id: i64,
        step: &SimulationStep,
    ) -> Result<(), BackendError> {
        let mut form = vec![
            ("simulationrun_id", run_id.to_string()),
            ("step[time]", step.time.to_string()),
            ("step[etype]", step.etype.clone()),
        ];
        if let Some(bibno) = step.bibno {
            form.push(("step[bibno]", bibno.to_string()));
        }
        if let Some(tmpos) = step.tmpos {
            form.push(("step[tmpos]", tmpos.to_string()));
        }
        self.post_form("/admin/_simstep/rest", &form).await
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_reply_success() {
        let reply: ApiReply = serde_json::from_str(r#"{"status": "success"}"#).unwrap();
        assert!(reply.into_result("/_setparams").is_ok());
    }

    #[test]
    fn test_api_reply_rejection_carries_error_text() {
        let reply: ApiReply =
            serde_json::from_str(r#"{"status": "fail", "error": "permission denied"}"#).unwrap();
        match reply.into_result("/_setparams") {
            Err(BackendError::Rejected { endpoint, message }) => {
                assert_eq!(endpoint, "/_setparams");
                assert_eq!(message, "permission denied");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_run_create_reply_decode() {
        let reply: RunCreateReply = serde_json::from_str(
            r#"{
                "status": "success",
                "options": [
                    {"label": "run 2", "value": 2},
                    {"label": "run 1", "value": 1}
                ],
                "simsteps": [
                    {"id": 10, "time": 1.0, "etype": "timemachine", "tmpos": 1},
                    {"id": 11, "time": 3.0, "etype": "scan", "bibno": 101}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(reply.status, "success");
        assert_eq!(reply.options[0].value, 2);
        assert_eq!(reply.simsteps.len(), 2);
        assert!(reply.error.is_none());
    }
}
