//! The journal sync worker.
//!
//! Drains `PENDING` rows to the controller oldest first, then polls the
//! controller for rows waiting on an asynchronous job. A pass is triggered by
//! [`JournalSyncer::set_sync_event`] or by the sync timeout, whichever comes
//! first.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use mlnx_sdn_core::RowId;
use mlnx_sdn_store::{JournalRow, JournalState, JournalStore, NewJournalRow, Operation, RetryLimit};
use regex::Regex;
use serde::Deserialize;
use tokio::sync::Notify;

use crate::client::{ClientResult, Method, SdnClient, SdnResponse};
use crate::config::SdnConfig;
use crate::error::Result;
use crate::validation::DependencyValidator;

static JOB_ANCHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<a href="([a-zA-Z0-9/]+)">"#).expect("valid job link pattern"));

/// Job status document returned when polling a controller job.
#[derive(Debug, Deserialize)]
struct JobStatus {
    #[serde(rename = "Status")]
    status: Option<String>,
}

/// Relays journal rows to the controller.
pub struct JournalSyncer<S: JournalStore> {
    store: Arc<S>,
    client: Arc<dyn SdnClient>,
    validator: Arc<dyn DependencyValidator>,
    retry_limit: RetryLimit,
    sync_timeout: Duration,
    event: Notify,
}

impl<S: JournalStore + 'static> JournalSyncer<S> {
    /// Create a syncer using the retry bound and wake interval from `config`.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        client: Arc<dyn SdnClient>,
        validator: Arc<dyn DependencyValidator>,
        config: &SdnConfig,
    ) -> Self {
        Self {
            store,
            client,
            validator,
            retry_limit: config.retry_limit(),
            sync_timeout: config.sync_timeout(),
            event: Notify::new(),
        }
    }

    /// Wake the worker. Signals raised while a pass is running collapse into
    /// one further pass.
    pub fn set_sync_event(&self) {
        tracing::debug!("Sync event set");
        self.event.notify_one();
    }

    /// Record a state change as a `PENDING` row and wake the worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be stored.
    pub fn record(&self, row: NewJournalRow) -> Result<JournalRow> {
        let row = self.store.create_pending_row(row)?;
        tracing::debug!(
            row_id = %row.id,
            object_type = %row.object_type,
            object_uuid = %row.object_uuid,
            operation = %row.operation.as_str(),
            "Recorded journal row"
        );
        self.set_sync_event();
        Ok(row)
    }

    /// Run a store call on the blocking pool. Store transactions back off by
    /// sleeping under lock contention.
    async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> mlnx_sdn_store::Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || f(&store)).await??)
    }

    async fn set_state(&self, row: &JournalRow, state: JournalState) -> Result<JournalRow> {
        let row = row.clone();
        self.with_store(move |store| store.update_state(&row, state)).await
    }

    async fn count_retry(&self, row: &JournalRow) -> Result<JournalRow> {
        let row = row.clone();
        let limit = self.retry_limit;
        self.with_store(move |store| store.update_retry(&row, limit)).await
    }

    /// Run passes forever, waking on [`Self::set_sync_event`] or after the
    /// sync timeout.
    pub async fn run(self: Arc<Self>) {
        tracing::info!(
            sync_timeout_secs = self.sync_timeout.as_secs(),
            "Starting journal sync loop"
        );
        loop {
            if tokio::time::timeout(self.sync_timeout, self.event.notified())
                .await
                .is_err()
            {
                tracing::debug!("Sync timeout elapsed");
            }
            if let Err(e) = self.run_once().await {
                tracing::error!(error = %e, "Journal sync pass failed");
            }
        }
    }

    /// One full pass: drain pending rows, then poll monitored jobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or a validator errors out.
    pub async fn run_once(&self) -> Result<()> {
        tracing::debug!("Starting journal sync pass");
        self.sync_pending_rows().await?;
        self.sync_progress_rows().await?;
        tracing::debug!("Finished journal sync pass");
        Ok(())
    }

    /// Submit `PENDING` rows until none are left, the controller becomes
    /// unreachable, or a row already handled in this pass comes around again.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or a validator errors out.
    pub async fn sync_pending_rows(&self) -> Result<()> {
        let mut visited: HashSet<RowId> = HashSet::new();

        while let Some(row) = self
            .with_store(|store| store.acquire_oldest_pending_row())
            .await?
        {
            if visited.contains(&row.id) {
                tracing::debug!(row_id = %row.id, "Row already handled in this pass");
                self.set_state(&row, JournalState::Pending).await?;
                break;
            }

            let valid = match self.validator.validate(&row) {
                Ok(valid) => valid,
                Err(e) => {
                    self.set_state(&row, JournalState::Pending).await?;
                    return Err(e);
                }
            };
            if !valid {
                tracing::info!(
                    row_id = %row.id,
                    object_type = %row.object_type,
                    object_uuid = %row.object_uuid,
                    "Row has unmet dependencies, skipping"
                );
                self.set_state(&row, JournalState::Pending).await?;
                visited.insert(row.id);
                continue;
            }

            match self.submit(&row).await {
                Ok(response) => {
                    if !self.handle_submitted(&row, &response).await? {
                        visited.insert(row.id);
                    }
                }
                Err(e) if e.is_connectivity() => {
                    tracing::error!(row_id = %row.id, error = %e, "Controller unreachable, ending pass");
                    self.count_retry(&row).await?;
                    break;
                }
                Err(e) => {
                    tracing::error!(row_id = %row.id, error = %e, "Controller rejected row");
                    self.count_retry(&row).await?;
                    visited.insert(row.id);
                }
            }
        }
        Ok(())
    }

    /// Poll the controller for each `MONITORING` row's job.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn sync_progress_rows(&self) -> Result<()> {
        let rows = self
            .with_store(|store| store.list_monitoring_rows_oldest_first())
            .await?;
        if rows.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = rows.len(), "Polling monitored jobs");

        for row in rows {
            let Some(job_id) = row.job_id.as_deref() else {
                tracing::warn!(row_id = %row.id, "Monitored row has no job id");
                self.set_state(&row, JournalState::Pending).await?;
                continue;
            };

            match self.client.get(job_id.trim_matches('/')).await {
                Ok(response) => self.handle_job_status(&row, job_id, &response).await?,
                Err(e) if e.is_connectivity() => {
                    tracing::error!(row_id = %row.id, job_id, error = %e, "Controller unreachable, ending poll");
                    self.set_state(&row, JournalState::Pending).await?;
                    break;
                }
                Err(e) => {
                    tracing::error!(row_id = %row.id, job_id, error = %e, "Job poll failed");
                    self.set_state(&row, JournalState::Pending).await?;
                }
            }
        }
        Ok(())
    }

    async fn submit(&self, row: &JournalRow) -> ClientResult<SdnResponse> {
        let path = request_path(row);
        let body = Some(&row.data);
        tracing::debug!(
            row_id = %row.id,
            operation = %row.operation.as_str(),
            method = %http_method(row.operation),
            path = %path,
            "Sending row to controller"
        );
        match row.operation {
            Operation::Post | Operation::Add => self.client.post(&path, body).await,
            Operation::Put => self.client.put(&path, body).await,
            Operation::Delete => self.client.delete(&path, body).await,
        }
    }

    /// Apply a successful response. Returns `false` if the row went back to
    /// the queue.
    async fn handle_submitted(&self, row: &JournalRow, response: &SdnResponse) -> Result<bool> {
        if response.is_not_implemented()
            || (response.is_not_found() && row.operation == Operation::Delete)
        {
            tracing::debug!(row_id = %row.id, status = response.status, "Row completed without a job");
            self.set_state(row, JournalState::Completed).await?;
            return Ok(true);
        }

        if let Some(job_id) = extract_job_id(response) {
            tracing::info!(row_id = %row.id, job_id = %job_id, "Row submitted, monitoring job");
            let row = row.clone();
            self.with_store(move |store| store.start_monitoring(&row, &job_id))
                .await?;
            return Ok(true);
        }

        tracing::warn!(
            row_id = %row.id,
            status = response.status,
            "Controller response carries no job id, retrying row"
        );
        self.count_retry(row).await?;
        Ok(false)
    }

    async fn handle_job_status(&self, row: &JournalRow, job_id: &str, response: &SdnResponse) -> Result<()> {
        let status = match response.json::<JobStatus>() {
            Ok(job) => job.status,
            Err(e) => {
                tracing::error!(row_id = %row.id, job_id, error = %e, "Failed to parse job status");
                return Ok(());
            }
        };

        match status.as_deref() {
            Some("Completed") => {
                tracing::info!(row_id = %row.id, job_id, "Job completed");
                self.set_state(row, JournalState::Completed).await?;
            }
            Some("Pending" | "Running") => {
                tracing::debug!(row_id = %row.id, job_id, "Job still in progress");
            }
            other => {
                tracing::error!(row_id = %row.id, job_id, status = ?other, "Job did not complete, requeueing row");
                self.set_state(row, JournalState::Pending).await?;
            }
        }
        Ok(())
    }
}

/// The HTTP verb used to replay an operation.
#[must_use]
pub fn http_method(operation: Operation) -> Method {
    match operation {
        Operation::Post | Operation::Add => Method::POST,
        Operation::Put => Method::PUT,
        Operation::Delete => Method::DELETE,
    }
}

/// The controller path for a row: the object type, followed by the object
/// id unless the operation creates the object.
#[must_use]
pub fn request_path(row: &JournalRow) -> String {
    if row.operation.is_creation() {
        row.object_type.clone()
    } else {
        format!("{}/{}", row.object_type, row.object_uuid)
    }
}

/// Find the controller job id in a response.
///
/// The body may be a bare JSON string, an object with a `job_id` or `jobId`
/// field, or HTML linking to the job.
#[must_use]
pub fn extract_job_id(response: &SdnResponse) -> Option<String> {
    let from_json = match response.json::<serde_json::Value>() {
        Ok(serde_json::Value::String(job)) => Some(job),
        Ok(serde_json::Value::Object(map)) => map
            .get("job_id")
            .or_else(|| map.get("jobId"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string),
        _ => None,
    };
    from_json
        .or_else(|| {
            JOB_ANCHOR
                .captures(&response.text)
                .map(|caps| caps[1].to_string())
        })
        .filter(|job| !job.trim_matches('/').is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{HttpSdnClient, NoopSdnClient};
    use crate::validation::JournalDependencyValidator;
    use mlnx_sdn_store::RocksStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_store() -> (Arc<RocksStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (Arc::new(store), dir)
    }

    fn config_for(url: &str) -> SdnConfig {
        SdnConfig {
            url: url.to_string(),
            timeout_seconds: 2,
            ..SdnConfig::default()
        }
    }

    fn syncer_with(
        store: &Arc<RocksStore>,
        config: &SdnConfig,
        validator: Arc<dyn DependencyValidator>,
    ) -> JournalSyncer<RocksStore> {
        let client = Arc::new(HttpSdnClient::new(config).unwrap());
        JournalSyncer::new(Arc::clone(store), client, validator, config)
    }

    fn syncer_for(store: &Arc<RocksStore>, server: &MockServer) -> JournalSyncer<RocksStore> {
        let config = config_for(&format!("{}/neo", server.uri()));
        let validator = Arc::new(JournalDependencyValidator::new(Arc::clone(store)));
        syncer_with(store, &config, validator)
    }

    fn pending(
        store: &RocksStore,
        kind: &str,
        uuid: &str,
        operation: Operation,
    ) -> JournalRow {
        std::thread::sleep(Duration::from_millis(2));
        store
            .create_pending_row(NewJournalRow::new(kind, uuid, operation, json!({"id": uuid})))
            .unwrap()
    }

    fn reload(store: &RocksStore, row: &JournalRow) -> JournalRow {
        store.get_row(&row.id).unwrap().unwrap()
    }

    #[test]
    fn paths_and_methods() {
        let (store, _dir) = create_test_store();
        let path_for = |operation| request_path(&pending(&store, "port", "p1", operation));
        assert_eq!(path_for(Operation::Post), "port");
        assert_eq!(path_for(Operation::Add), "port");
        assert_eq!(path_for(Operation::Put), "port/p1");
        assert_eq!(path_for(Operation::Delete), "port/p1");

        assert_eq!(http_method(Operation::Add), Method::POST);
        assert_eq!(http_method(Operation::Put), Method::PUT);
        assert_eq!(http_method(Operation::Delete), Method::DELETE);
    }

    #[test]
    fn job_id_extraction() {
        let job = |text: &str| extract_job_id(&SdnResponse::new(200, text));
        assert_eq!(job(r#"{"job_id": "/jobs/42"}"#).as_deref(), Some("/jobs/42"));
        assert_eq!(job(r#"{"jobId": "jobs/7"}"#).as_deref(), Some("jobs/7"));
        assert_eq!(job(r#""/jobs/9""#).as_deref(), Some("/jobs/9"));
        assert_eq!(
            job(r#"<html><body><a href="/jobs/13">job</a></body></html>"#).as_deref(),
            Some("/jobs/13")
        );
        assert_eq!(job(""), None);
        assert_eq!(job(r#"{"status": "ok"}"#), None);
        assert_eq!(job(r#""/""#), None);
    }

    #[tokio::test]
    async fn not_implemented_completes_row() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/neo/cloudx/port"))
            .respond_with(ResponseTemplate::new(501))
            .expect(1)
            .mount(&server)
            .await;

        let (store, _dir) = create_test_store();
        let syncer = syncer_for(&store, &server);
        let row = pending(&store, "port", "p1", Operation::Post);

        syncer.run_once().await.unwrap();
        assert_eq!(reload(&store, &row).state, JournalState::Completed);
    }

    #[tokio::test]
    async fn delete_of_missing_object_completes_row() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/neo/cloudx/network/x"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let (store, _dir) = create_test_store();
        let syncer = syncer_for(&store, &server);
        let row = pending(&store, "network", "x", Operation::Delete);

        syncer.run_once().await.unwrap();
        assert_eq!(reload(&store, &row).state, JournalState::Completed);
    }

    #[tokio::test]
    async fn job_is_monitored_until_completed() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/neo/cloudx/port/p1"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({"job_id": "/jobs/42"})))
            .mount(&server)
            .await;

        let (store, _dir) = create_test_store();
        let syncer = syncer_for(&store, &server);
        let row = pending(&store, "port", "p1", Operation::Put);

        syncer.sync_pending_rows().await.unwrap();
        let monitored = reload(&store, &row);
        assert_eq!(monitored.state, JournalState::Monitoring);
        assert_eq!(monitored.job_id.as_deref(), Some("/jobs/42"));

        Mock::given(method("GET"))
            .and(path("/neo/jobs/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Status": "Running"})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        syncer.sync_progress_rows().await.unwrap();
        assert_eq!(reload(&store, &row).state, JournalState::Monitoring);

        Mock::given(method("GET"))
            .and(path("/neo/jobs/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Status": "Completed"})))
            .mount(&server)
            .await;
        syncer.sync_progress_rows().await.unwrap();
        assert_eq!(reload(&store, &row).state, JournalState::Completed);
    }

    #[tokio::test]
    async fn failed_job_requeues_row() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"<a href="/jobs/5">5</a>"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/neo/jobs/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Status": "Failed"})))
            .mount(&server)
            .await;

        let (store, _dir) = create_test_store();
        let syncer = syncer_for(&store, &server);
        let row = pending(&store, "network", "n1", Operation::Post);

        syncer.run_once().await.unwrap();
        let requeued = reload(&store, &row);
        assert_eq!(requeued.state, JournalState::Pending);
        assert_eq!(requeued.retry_count, 0);
    }

    #[tokio::test]
    async fn unparseable_job_status_keeps_monitoring() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!("/jobs/8")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let (store, _dir) = create_test_store();
        let syncer = syncer_for(&store, &server);
        let row = pending(&store, "network", "n1", Operation::Post);

        syncer.run_once().await.unwrap();
        assert_eq!(reload(&store, &row).state, JournalState::Monitoring);
    }

    #[tokio::test]
    async fn missing_job_id_counts_a_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .expect(1)
            .mount(&server)
            .await;

        let (store, _dir) = create_test_store();
        let syncer = syncer_for(&store, &server);
        let row = pending(&store, "network", "n1", Operation::Post);

        syncer.run_once().await.unwrap();
        let retried = reload(&store, &row);
        assert_eq!(retried.state, JournalState::Pending);
        assert_eq!(retried.retry_count, 1);
    }

    #[tokio::test]
    async fn http_error_moves_on_to_next_row() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/neo/cloudx/network/n1"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/neo/cloudx/network/n2"))
            .respond_with(ResponseTemplate::new(501))
            .expect(1)
            .mount(&server)
            .await;

        let (store, _dir) = create_test_store();
        let syncer = syncer_for(&store, &server);
        let failing = pending(&store, "network", "n1", Operation::Put);
        let passing = pending(&store, "network", "n2", Operation::Put);

        syncer.sync_pending_rows().await.unwrap();

        let failing = reload(&store, &failing);
        assert_eq!(failing.state, JournalState::Pending);
        assert_eq!(failing.retry_count, 1);
        assert_eq!(reload(&store, &passing).state, JournalState::Completed);
    }

    #[tokio::test]
    async fn unreachable_controller_fails_row_after_retries() {
        let (store, _dir) = create_test_store();
        let config = SdnConfig {
            retry_count: 2,
            ..config_for("http://127.0.0.1:9/neo")
        };
        let validator = Arc::new(JournalDependencyValidator::new(Arc::clone(&store)));
        let syncer = syncer_with(&store, &config, validator);
        let row = pending(&store, "port", "p1", Operation::Post);

        syncer.run_once().await.unwrap();
        assert_eq!(reload(&store, &row).retry_count, 1);
        assert_eq!(reload(&store, &row).state, JournalState::Pending);

        syncer.run_once().await.unwrap();
        assert_eq!(reload(&store, &row).retry_count, 2);

        syncer.run_once().await.unwrap();
        assert_eq!(reload(&store, &row).state, JournalState::Failed);
    }

    #[tokio::test]
    async fn unreachable_controller_requeues_monitored_rows() {
        let (store, _dir) = create_test_store();
        let syncer = syncer_with(
            &store,
            &config_for("http://127.0.0.1:9/neo"),
            Arc::new(JournalDependencyValidator::new(Arc::clone(&store))),
        );
        let row = pending(&store, "port", "p1", Operation::Post);
        let claimed = store.acquire_oldest_pending_row().unwrap().unwrap();
        store.start_monitoring(&claimed, "/jobs/1").unwrap();

        syncer.sync_progress_rows().await.unwrap();
        let requeued = reload(&store, &row);
        assert_eq!(requeued.state, JournalState::Pending);
        assert_eq!(requeued.retry_count, 0);
    }

    #[tokio::test]
    async fn invalid_rows_are_skipped_once_per_pass() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(501))
            .expect(1)
            .mount(&server)
            .await;

        let (store, _dir) = create_test_store();
        let checks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&checks);
        let validator = Arc::new(move |row: &JournalRow| -> Result<bool> {
            if row.object_uuid == "blocked" {
                counter.fetch_add(1, Ordering::SeqCst);
                return Ok(false);
            }
            Ok(true)
        });
        let config = config_for(&format!("{}/neo", server.uri()));
        let syncer = syncer_with(&store, &config, validator);

        let blocked = pending(&store, "port", "blocked", Operation::Post);
        let free = pending(&store, "port", "free", Operation::Post);

        syncer.sync_pending_rows().await.unwrap();

        let blocked = reload(&store, &blocked);
        assert_eq!(blocked.state, JournalState::Pending);
        assert_eq!(blocked.retry_count, 0);
        assert_eq!(reload(&store, &free).state, JournalState::Completed);
        assert_eq!(checks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn store_calls_run_off_the_runtime_thread() {
        let server = MockServer::start().await;
        let (store, _dir) = create_test_store();
        let syncer = syncer_for(&store, &server);

        let caller = std::thread::current().id();
        let worker = syncer
            .with_store(|_| Ok(std::thread::current().id()))
            .await
            .unwrap();
        assert_ne!(caller, worker);
    }

    #[tokio::test]
    async fn monitored_row_without_job_id_is_requeued() {
        let (store, _dir) = create_test_store();
        let config = SdnConfig::default();
        let syncer = JournalSyncer::new(
            Arc::clone(&store),
            Arc::new(NoopSdnClient::new()),
            Arc::new(JournalDependencyValidator::new(Arc::clone(&store))),
            &config,
        );
        let row = pending(&store, "port", "p1", Operation::Post);
        let claimed = store.acquire_oldest_pending_row().unwrap().unwrap();
        store.update_state(&claimed, JournalState::Monitoring).unwrap();

        syncer.sync_progress_rows().await.unwrap();
        assert_eq!(reload(&store, &row).state, JournalState::Pending);
    }

    #[tokio::test]
    async fn record_wakes_running_worker() {
        let (store, _dir) = create_test_store();
        let config = SdnConfig {
            sync_timeout_seconds: 3600,
            ..SdnConfig::default()
        };
        let syncer = Arc::new(JournalSyncer::new(
            Arc::clone(&store),
            Arc::new(NoopSdnClient::new()),
            Arc::new(JournalDependencyValidator::new(Arc::clone(&store))),
            &config,
        ));
        let worker = tokio::spawn(Arc::clone(&syncer).run());

        let row = syncer
            .record(NewJournalRow::new("network", "n1", Operation::Post, json!({})))
            .unwrap();

        let completed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if reload(&store, &row).state == JournalState::Completed {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        worker.abort();
        assert!(completed.is_ok());
    }
}
