use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::DestinationTable;
use crate::errors::SyncError;
use crate::models::Campaign;
use crate::warehouse::{TableInfo, TableLayout, Warehouse};

const MULTIPART_BOUNDARY: &str = "kayzen_campaign_sync_boundary";
const QUERY_TIMEOUT_MS: u64 = 10_000;

// https://cloud.google.com/bigquery/docs/reference/rest/v2/tables
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Table {
    #[serde(default)]
    clustering: Option<Clustering>,
    #[serde(default)]
    num_rows: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Clustering {
    #[serde(default)]
    fields: Vec<String>,
}

// https://cloud.google.com/bigquery/docs/reference/rest/v2/Job
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    status: Option<JobStatus>,
    #[serde(default)]
    statistics: Option<JobStatistics>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatistics {
    #[serde(default)]
    load: Option<LoadStatistics>,
    #[serde(default)]
    query: Option<QueryStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStatistics {
    #[serde(default)]
    output_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryStatistics {
    #[serde(default)]
    num_dml_affected_rows: Option<String>,
}

// https://cloud.google.com/bigquery/docs/reference/rest/v2/jobs/query
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    job_complete: Option<bool>,
    #[serde(default)]
    num_dml_affected_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// BigQuery REST v2 implementation of [`Warehouse`].
///
/// Rows are written with load jobs (newline-delimited JSON, schema
/// auto-detection) rather than streaming inserts, so the DML delete of the
/// next run never hits rows still in the streaming buffer.
pub struct BigQueryWarehouse {
    client: Client,
    base_url: String,
    access_token: String,
    destination: DestinationTable,
    location: Option<String>,
    job_timeout: Duration,
    poll_interval: Duration,
}

impl BigQueryWarehouse {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        destination: DestinationTable,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            access_token: access_token.into(),
            destination,
            location: None,
            job_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    pub fn with_job_timeout(mut self, job_timeout: Duration) -> Self {
        self.job_timeout = job_timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn project_url(&self) -> String {
        format!(
            "{}/bigquery/v2/projects/{}",
            self.base_url, self.destination.project
        )
    }

    fn table_url(&self) -> String {
        format!(
            "{}/datasets/{}/tables/{}",
            self.project_url(),
            self.destination.dataset,
            self.destination.table
        )
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/upload/bigquery/v2/projects/{}/jobs?uploadType=multipart",
            self.base_url, self.destination.project
        )
    }

    fn destination_reference(&self) -> Value {
        json!({
            "projectId": self.destination.project,
            "datasetId": self.destination.dataset,
            "tableId": self.destination.table,
        })
    }

    /// Polls `jobs.get` until the job is DONE or the job timeout elapses.
    async fn wait_for_job(&self, reference: &JobReference) -> Result<Job, SyncError> {
        let deadline = Instant::now() + self.job_timeout;
        let url = format!("{}/jobs/{}", self.project_url(), reference.job_id);
        let location = reference.location.clone().or_else(|| self.location.clone());

        loop {
            let mut request = self.client.get(&url).bearer_auth(&self.access_token);
            if let Some(location) = &location {
                request = request.query(&[("location", location.as_str())]);
            }

            let response = request.send().await.map_err(|e| {
                SyncError::Load(format!("Job {} status request failed: {}", reference.job_id, e))
            })?;
            if !response.status().is_success() {
                return Err(api_error(response, "Job status lookup").await);
            }

            let job: Job = response.json().await.map_err(|e| {
                SyncError::Load(format!("Failed to parse job {}: {}", reference.job_id, e))
            })?;
            if is_done(&job) {
                return check_job(job);
            }

            if Instant::now() >= deadline {
                return Err(SyncError::Load(format!(
                    "Job {} did not finish within {}s",
                    reference.job_id,
                    self.job_timeout.as_secs()
                )));
            }
            tracing::debug!("Waiting for BigQuery job {}", reference.job_id);
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    fn destination(&self) -> &DestinationTable {
        &self.destination
    }

    async fn describe_table(&self) -> Result<Option<TableInfo>, SyncError> {
        let response = self
            .client
            .get(self.table_url())
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| SyncError::Load(format!("Table lookup request failed: {}", e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(api_error(response, "Table lookup").await);
        }

        let table: Table = response
            .json()
            .await
            .map_err(|e| SyncError::Load(format!("Failed to parse table metadata: {}", e)))?;

        Ok(Some(TableInfo {
            clustering_fields: table.clustering.map(|c| c.fields).unwrap_or_default(),
            num_rows: table.num_rows.and_then(|n| n.parse().ok()),
        }))
    }

    async fn delete_ids(&self, ids: &[String]) -> Result<u64, SyncError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let array_values: Vec<Value> = ids.iter().map(|id| json!({ "value": id })).collect();
        let mut body = json!({
            "query": format!(
                "DELETE FROM {} WHERE CAST(id AS STRING) IN UNNEST(@ids)",
                self.destination.sql_identifier()
            ),
            "useLegacySql": false,
            "parameterMode": "NAMED",
            "queryParameters": [{
                "name": "ids",
                "parameterType": { "type": "ARRAY", "arrayType": { "type": "STRING" } },
                "parameterValue": { "arrayValues": array_values },
            }],
            "timeoutMs": QUERY_TIMEOUT_MS,
        });
        if let Some(location) = &self.location {
            body["location"] = json!(location);
        }

        let response = self
            .client
            .post(format!("{}/queries", self.project_url()))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::Load(format!("Delete request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(api_error(response, "Delete").await);
        }

        let query: QueryResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Load(format!("Failed to parse delete response: {}", e)))?;

        let affected = if query.job_complete == Some(true) {
            query.num_dml_affected_rows
        } else {
            let reference = query.job_reference.ok_or_else(|| {
                SyncError::Load("Delete response missing jobReference".to_string())
            })?;
            self.wait_for_job(&reference)
                .await?
                .statistics
                .and_then(|s| s.query)
                .and_then(|q| q.num_dml_affected_rows)
        };

        Ok(affected.and_then(|n| n.parse().ok()).unwrap_or(0))
    }

    async fn append(&self, rows: &[Campaign], create: Option<&TableLayout>) -> Result<u64, SyncError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut load = json!({
            "destinationTable": self.destination_reference(),
            "sourceFormat": "NEWLINE_DELIMITED_JSON",
            "autodetect": true,
            "writeDisposition": "WRITE_APPEND",
        });
        match create {
            Some(layout) => {
                load["createDisposition"] = json!("CREATE_IF_NEEDED");
                if !layout.clustering_fields.is_empty() {
                    load["clustering"] = json!({ "fields": layout.clustering_fields });
                }
            }
            None => {
                load["createDisposition"] = json!("CREATE_NEVER");
                load["schemaUpdateOptions"] = json!(["ALLOW_FIELD_ADDITION"]);
            }
        }

        let mut job = json!({ "configuration": { "load": load } });
        if let Some(location) = &self.location {
            job["jobReference"] = json!({ "location": location });
        }

        let body = multipart_body(&job, &newline_delimited(rows)?);

        let response = self
            .client
            .post(self.upload_url())
            .bearer_auth(&self.access_token)
            .header(
                CONTENT_TYPE,
                format!("multipart/related; boundary={}", MULTIPART_BOUNDARY),
            )
            .body(body)
            .send()
            .await
            .map_err(|e| SyncError::Load(format!("Load job request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(api_error(response, "Load job").await);
        }

        let job: Job = response
            .json()
            .await
            .map_err(|e| SyncError::Load(format!("Failed to parse load job: {}", e)))?;

        let finished = if is_done(&job) {
            check_job(job)?
        } else {
            let reference = job.job_reference.clone().ok_or_else(|| {
                SyncError::Load("Load job response missing jobReference".to_string())
            })?;
            self.wait_for_job(&reference).await?
        };

        let written = finished
            .statistics
            .and_then(|s| s.load)
            .and_then(|l| l.output_rows)
            .and_then(|n| n.parse().ok())
            .unwrap_or(rows.len() as u64);

        Ok(written)
    }

    async fn set_clustering(&self, fields: &[String]) -> Result<(), SyncError> {
        let body = json!({
            "clustering": Clustering { fields: fields.to_vec() },
        });

        let response = self
            .client
            .patch(self.table_url())
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::Load(format!("Clustering update request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(api_error(response, "Clustering update").await);
        }
        Ok(())
    }
}

fn is_done(job: &Job) -> bool {
    job.status.as_ref().is_some_and(|s| s.state == "DONE")
}

fn check_job(job: Job) -> Result<Job, SyncError> {
    if let Some(error) = job.status.as_ref().and_then(|s| s.error_result.as_ref()) {
        let job_id = job
            .job_reference
            .as_ref()
            .map(|r| r.job_id.as_str())
            .unwrap_or("<unknown>");
        return Err(SyncError::Load(format!(
            "Job {} failed: {} ({})",
            job_id,
            error.message.as_deref().unwrap_or("no message"),
            error.reason.as_deref().unwrap_or("unknown reason"),
        )));
    }
    Ok(job)
}

async fn api_error(response: Response, action: &str) -> SyncError {
    let status = response.status();
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    let message = serde_json::from_str::<ApiErrorBody>(&text)
        .map(|body| body.error.message)
        .unwrap_or(text);
    SyncError::Load(format!("{} failed ({}): {}", action, status, message))
}

fn newline_delimited(rows: &[Campaign]) -> Result<String, SyncError> {
    let lines = rows
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SyncError::Load(format!("Failed to serialize campaign: {}", e)))?;
    Ok(lines.join("\n"))
}

fn multipart_body(metadata: &Value, data: &str) -> String {
    format!(
        "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{meta}\r\n\
         --{b}\r\nContent-Type: application/octet-stream\r\n\r\n{data}\r\n\
         --{b}--\r\n",
        b = MULTIPART_BOUNDARY,
        meta = metadata,
        data = data,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newline_delimited_rows() {
        let rows = vec![
            Campaign::try_from(json!({"id": 1})).unwrap(),
            Campaign::try_from(json!({"id": 2, "name": "b"})).unwrap(),
        ];
        assert_eq!(
            newline_delimited(&rows).unwrap(),
            "{\"id\":1}\n{\"id\":2,\"name\":\"b\"}"
        );
    }

    #[test]
    fn test_multipart_body_layout() {
        let body = multipart_body(&json!({"a": 1}), "{\"id\":1}");
        assert!(body.starts_with("--kayzen_campaign_sync_boundary\r\n"));
        assert!(body.contains("application/json; charset=UTF-8\r\n\r\n{\"a\":1}\r\n"));
        assert!(body.contains("application/octet-stream\r\n\r\n{\"id\":1}\r\n"));
        assert!(body.ends_with("--kayzen_campaign_sync_boundary--\r\n"));
    }

    #[test]
    fn test_check_job_surfaces_error_result() {
        let job: Job = serde_json::from_value(json!({
            "jobReference": {"projectId": "p", "jobId": "job_1"},
            "status": {
                "state": "DONE",
                "errorResult": {"reason": "invalid", "message": "bad row"}
            }
        }))
        .unwrap();
        let err = check_job(job).unwrap_err();
        assert_eq!(
            err,
            SyncError::Load("Job job_1 failed: bad row (invalid)".to_string())
        );
    }

    #[test]
    fn test_urls() {
        let warehouse = BigQueryWarehouse::new(
            Client::new(),
            "https://bigquery.googleapis.com",
            "token",
            DestinationTable::new("proj", "ds", "tbl"),
        );
        assert_eq!(
            warehouse.table_url(),
            "https://bigquery.googleapis.com/bigquery/v2/projects/proj/datasets/ds/tables/tbl"
        );
        assert_eq!(
            warehouse.upload_url(),
            "https://bigquery.googleapis.com/upload/bigquery/v2/projects/proj/jobs?uploadType=multipart"
        );
    }
}
