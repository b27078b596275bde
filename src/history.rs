//! Scan history: backend client, local view and "scan saved" notifications.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{read_json, ApiClient};
use crate::model::{Diagnosis, ScanRecord, ScanType, Severity};
use crate::traits::{HistoryStore, ServiceError};

// ============================================================================
// HTTP client
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveScanRequest<'a> {
    user_id: &'a str,
    #[serde(rename = "type")]
    scan_type: ScanType,
    name: &'a str,
    severity: Severity,
    confidence: f64,
    image: &'a str,
    result_data: &'a Diagnosis,
}

pub struct HistoryClient {
    api: ApiClient,
}

impl HistoryClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl HistoryStore for HistoryClient {
    async fn save(&self, user_id: &str, record: &ScanRecord) -> Result<Vec<ScanRecord>, ServiceError> {
        let body = SaveScanRequest {
            user_id,
            scan_type: record.scan_type,
            name: &record.subject_name,
            severity: record.severity,
            confidence: record.confidence,
            image: &record.image_ref,
            result_data: &record.result_payload,
        };
        let response = self
            .api
            .http()
            .post(self.api.url("/api/scans/save"))
            .json(&body)
            .send()
            .await?;
        read_json(response).await
    }

    async fn list(&self, user_id: &str) -> Result<Vec<ScanRecord>, ServiceError> {
        let url = self
            .api
            .url(&format!("/api/scans/history/{}", urlencoding::encode(user_id)));
        let response = self.api.http().get(url).send().await?;
        read_json(response).await
    }

    async fn delete(&self, user_id: &str, scan_id: &str) -> Result<Vec<ScanRecord>, ServiceError> {
        let url = self.api.url(&format!(
            "/api/scans/delete/{}/{}",
            urlencoding::encode(user_id),
            urlencoding::encode(scan_id)
        ));
        let response = self.api.http().delete(url).send().await?;
        read_json(response).await
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Broadcast after a scan has been persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSaved {
    pub user_id: String,
    pub scan_id: Option<String>,
}

/// Saves scans and announces each save to every subscribed view.
pub struct HistoryRecorder<H: HistoryStore + ?Sized> {
    store: Arc<H>,
    events: broadcast::Sender<ScanSaved>,
}

impl<H: HistoryStore + ?Sized> HistoryRecorder<H> {
    pub fn new(store: Arc<H>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self { store, events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanSaved> {
        self.events.subscribe()
    }

    pub async fn record(&self, user_id: &str, record: &ScanRecord) -> Result<Vec<ScanRecord>, ServiceError> {
        let history = self.store.save(user_id, record).await?;
        let scan_id = history.first().and_then(|scan| scan.id.clone());
        info!(user_id, scan_id = ?scan_id, "Scan saved");

        // No subscribers is fine
        let _ = self.events.send(ScanSaved {
            user_id: user_id.to_string(),
            scan_id,
        });
        Ok(history)
    }
}

// ============================================================================
// View
// ============================================================================

/// One user's history as shown on screen.
///
/// Deletes are optimistic: the entry disappears immediately and the server's
/// returned list is adopted on success. On failure only the removed entry is
/// put back, at its old position, so a refresh that landed meanwhile is kept.
pub struct HistoryView<H: HistoryStore + ?Sized> {
    store: Arc<H>,
    user_id: String,
    filter: Option<ScanType>,
    items: Mutex<Vec<ScanRecord>>,
}

impl<H: HistoryStore + ?Sized> HistoryView<H> {
    pub fn new(store: Arc<H>, user_id: impl Into<String>) -> Self {
        Self {
            store,
            user_id: user_id.into(),
            filter: None,
            items: Mutex::new(Vec::new()),
        }
    }

    /// Shows only scans of `scan_type`.
    pub fn with_filter(mut self, scan_type: ScanType) -> Self {
        self.filter = Some(scan_type);
        self
    }

    fn items(&self) -> Result<MutexGuard<'_, Vec<ScanRecord>>, ServiceError> {
        self.items
            .lock()
            .map_err(|_| ServiceError::State("history view lock poisoned".to_string()))
    }

    /// Visible entries, filtered by type, newest first.
    pub fn entries(&self) -> Result<Vec<ScanRecord>, ServiceError> {
        let mut entries: Vec<ScanRecord> = self
            .items()?
            .iter()
            .filter(|scan| self.filter.map_or(true, |t| scan.scan_type == t))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
        Ok(entries)
    }

    pub async fn refresh(&self) -> Result<usize, ServiceError> {
        let items = self.store.list(&self.user_id).await?;
        let count = items.len();
        *self.items()? = items;
        debug!(user_id = %self.user_id, count, "History refreshed");
        Ok(count)
    }

    pub async fn delete(&self, scan_id: &str) -> Result<(), ServiceError> {
        let removed = {
            let mut items = self.items()?;
            let index = items.iter().position(|scan| scan.id.as_deref() == Some(scan_id));
            index.map(|index| (index, items.remove(index)))
        };

        match self.store.delete(&self.user_id, scan_id).await {
            Ok(items) => {
                *self.items()? = items;
                info!(user_id = %self.user_id, scan_id, "Scan deleted");
                Ok(())
            }
            Err(e) => {
                warn!(user_id = %self.user_id, scan_id, error = %e, "Delete failed, restoring entry");
                // Other updates may have landed meanwhile; only put back what this call took out
                if let Some((index, record)) = removed {
                    let mut items = self.items()?;
                    if !items.iter().any(|scan| scan.id.as_deref() == Some(scan_id)) {
                        let index = index.min(items.len());
                        items.insert(index, record);
                    }
                }
                Err(e)
            }
        }
    }
}

impl<H: HistoryStore + ?Sized + 'static> HistoryView<H> {
    /// Refreshes the view whenever a scan for this user is saved.
    ///
    /// The task ends when every recorder has been dropped.
    pub fn refresh_on_save(self: Arc<Self>, mut events: broadcast::Receiver<ScanSaved>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if event.user_id == self.user_id => {
                        if let Err(e) = self.refresh().await {
                            warn!(error = %e, "History refresh failed");
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Missed save notifications, refreshing");
                        if let Err(e) = self.refresh().await {
                            warn!(error = %e, "History refresh failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Backend {
        users: Mutex<HashMap<String, Vec<Value>>>,
        next_id: Mutex<u32>,
        fail_deletes: AtomicBool,
    }

    type Shared = Arc<Backend>;

    async fn save(State(backend): State<Shared>, Json(body): Json<Value>) -> Json<Vec<Value>> {
        let user_id = body["userId"].as_str().unwrap_or_default().to_string();
        let mut next = backend.next_id.lock().unwrap();
        *next += 1;
        let entry = json!({
            "_id": format!("scan-{}", *next),
            "scanType": body["type"],
            "name": body["name"],
            "severity": body["severity"],
            "confidence": body["confidence"],
            "image": body["image"],
            "resultData": body["resultData"],
            "date": Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, *next).unwrap(),
        });
        let mut users = backend.users.lock().unwrap();
        let history = users.entry(user_id).or_default();
        history.insert(0, entry);
        Json(history.clone())
    }

    async fn list(State(backend): State<Shared>, Path(user_id): Path<String>) -> Result<Json<Vec<Value>>, StatusCode> {
        let users = backend.users.lock().unwrap();
        users
            .get(&user_id)
            .cloned()
            .map(Json)
            .ok_or(StatusCode::NOT_FOUND)
    }

    async fn remove(
        State(backend): State<Shared>,
        Path((user_id, scan_id)): Path<(String, String)>,
    ) -> Result<Json<Vec<Value>>, (StatusCode, String)> {
        if backend.fail_deletes.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "Server Error deleting item".into()));
        }
        let mut users = backend.users.lock().unwrap();
        let history = users.entry(user_id).or_default();
        history.retain(|scan| scan["_id"] != scan_id.as_str());
        Ok(Json(history.clone()))
    }

    async fn serve(backend: Shared) -> ApiClient {
        let app = Router::new()
            .route("/api/scans/save", post(save))
            .route("/api/scans/history/:user_id", get(list))
            .route("/api/scans/delete/:user_id/:scan_id", delete(remove))
            .with_state(backend);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        ApiClient::with_client(reqwest::Client::new(), base)
    }

    fn record(disease: Option<&str>, pest: Option<&str>) -> ScanRecord {
        let diagnosis = Diagnosis {
            disease_name: disease.map(str::to_string),
            pest_name: pest.map(str::to_string),
            severity: Severity::Medium,
            confidence: Some(72.0),
            ..Default::default()
        };
        ScanRecord::from_diagnosis(diagnosis, "data:image/jpeg;base64,AAAA".into())
    }

    #[tokio::test]
    async fn test_save_notifies_and_view_filters_newest_first() {
        let backend: Shared = Arc::default();
        let store = Arc::new(HistoryClient::new(serve(backend.clone()).await));
        let recorder = HistoryRecorder::new(store.clone());
        let view = Arc::new(HistoryView::new(store, "u1").with_filter(ScanType::Disease));
        let follower = view.clone().refresh_on_save(recorder.subscribe());

        recorder.record("u1", &record(Some("Leaf Blight"), None)).await.unwrap();
        recorder.record("u1", &record(None, Some("Aphid"))).await.unwrap();
        let history = recorder.record("u1", &record(Some("Rust"), None)).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].id.as_deref(), Some("scan-3"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let names: Vec<String> = view.entries().unwrap().into_iter().map(|s| s.subject_name).collect();
        assert_eq!(names, vec!["Rust", "Leaf Blight"]);
        assert!((view.entries().unwrap()[0].confidence - 0.72).abs() < 1e-9);

        drop(recorder);
        follower.await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_adopts_server_list() {
        let backend: Shared = Arc::default();
        let store = Arc::new(HistoryClient::new(serve(backend.clone()).await));
        store.save("u1", &record(Some("Leaf Blight"), None)).await.unwrap();
        store.save("u1", &record(Some("Rust"), None)).await.unwrap();

        let view = HistoryView::new(store, "u1");
        view.refresh().await.unwrap();
        view.delete("scan-1").await.unwrap();

        let ids: Vec<_> = view.entries().unwrap().into_iter().filter_map(|s| s.id).collect();
        assert_eq!(ids, vec!["scan-2"]);
    }

    #[tokio::test]
    async fn test_failed_delete_restores_snapshot() {
        let backend: Shared = Arc::default();
        let store = Arc::new(HistoryClient::new(serve(backend.clone()).await));
        store.save("u1", &record(Some("Leaf Blight"), None)).await.unwrap();

        let view = HistoryView::new(store, "u1");
        view.refresh().await.unwrap();
        backend.fail_deletes.store(true, Ordering::SeqCst);

        let err = view.delete("scan-1").await.unwrap_err();
        assert!(matches!(err, ServiceError::Status { status: 500, .. }));
        assert_eq!(view.entries().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_refresh_that_landed_meanwhile() {
        let backend: Shared = Arc::default();
        let store = Arc::new(HistoryClient::new(serve(backend.clone()).await));
        store.save("u1", &record(Some("Leaf Blight"), None)).await.unwrap();

        let view = Arc::new(HistoryView::new(store.clone(), "u1"));
        view.refresh().await.unwrap();
        backend.fail_deletes.store(true, Ordering::SeqCst);

        let deleting = tokio::spawn({
            let view = view.clone();
            async move { view.delete("scan-1").await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(view.entries().unwrap().is_empty());

        store.save("u1", &record(Some("Rust"), None)).await.unwrap();
        view.refresh().await.unwrap();

        assert!(deleting.await.unwrap().is_err());
        let ids: Vec<_> = view.entries().unwrap().into_iter().filter_map(|s| s.id).collect();
        assert_eq!(ids, vec!["scan-2", "scan-1"]);
    }

    #[tokio::test]
    async fn test_failed_delete_reinserts_at_old_position() {
        let backend: Shared = Arc::default();
        let store = Arc::new(HistoryClient::new(serve(backend.clone()).await));
        for name in ["Leaf Blight", "Rust", "Mildew"] {
            store.save("u1", &record(Some(name), None)).await.unwrap();
        }

        let view = HistoryView::new(store, "u1");
        view.refresh().await.unwrap();
        backend.fail_deletes.store(true, Ordering::SeqCst);
        view.delete("scan-2").await.unwrap_err();

        let stored: Vec<_> = view.items().unwrap().iter().filter_map(|s| s.id.clone()).collect();
        assert_eq!(stored, vec!["scan-3", "scan-2", "scan-1"]);
    }

    #[test]
    fn test_poisoned_view_is_state_error() {
        let api = ApiClient::with_client(reqwest::Client::new(), "http://127.0.0.1:9");
        let view = Arc::new(HistoryView::new(Arc::new(HistoryClient::new(api)), "u1"));
        let poisoner = view.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.items.lock().unwrap();
            panic!("poison the view");
        })
        .join();

        assert!(matches!(view.entries(), Err(ServiceError::State(_))));
    }

    #[tokio::test]
    async fn test_unknown_user_is_status_error() {
        let store = HistoryClient::new(serve(Arc::default()).await);
        match store.list("ghost").await.unwrap_err() {
            ServiceError::Status { status, .. } => assert_eq!(status, 404),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
