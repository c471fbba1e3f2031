#![allow(dead_code)]

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Catalog served by the stub, mutable between requests.
#[derive(Default)]
pub struct StubCatalog {
    pub titles: Vec<Value>,
    /// Chapter list per title id
    pub chapters: HashMap<String, Value>,
    pub required_token: Option<String>,
}

/// Local HTTP provider speaking the `{data, pagination}` envelope.
pub struct ProviderStub {
    pub base_url: String,
    pub catalog: Arc<Mutex<StubCatalog>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ProviderStub {
    pub fn spawn(catalog: StubCatalog) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start provider stub");
        let base_url = format!("http://{}/api", server.server_addr());
        let catalog = Arc::new(Mutex::new(catalog));
        let shared = catalog.clone();

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            let request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };

            let (status, body) = {
                let catalog = shared.lock().unwrap();
                let auth = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Authorization"))
                    .map(|h| h.value.as_str().to_string());
                match &catalog.required_token {
                    Some(token) if auth.as_deref() != Some(format!("Bearer {}", token).as_str()) => {
                        (401, json!({"message": "Unauthenticated."}).to_string())
                    }
                    _ => route(&catalog, request.url()),
                }
            };
            let _ = request.respond(tiny_http::Response::from_string(body).with_status_code(status));
        });

        Self {
            base_url,
            catalog,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }
}

impl Drop for ProviderStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn query(url: &str) -> (String, HashMap<String, String>) {
    let (path, qs) = url.split_once('?').unwrap_or((url, ""));
    let params = qs
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    (path.to_string(), params)
}

fn paginate(items: &[Value], page: usize, per_page: usize) -> Value {
    let total_pages = items.len().div_ceil(per_page).max(1);
    let data: Vec<Value> = items.iter().skip((page - 1) * per_page).take(per_page).cloned().collect();
    let next = (page < total_pages).then(|| format!("?page={}", page + 1));
    json!({
        "data": data,
        "pagination": {
            "currentPage": page,
            "totalPages": total_pages,
            "total": items.len(),
            "links": {"next": next}
        }
    })
}

fn route(catalog: &StubCatalog, url: &str) -> (u16, String) {
    let (path, params) = query(url);
    let page = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1usize);
    let per_page = params.get("per_page").and_then(|p| p.parse().ok()).unwrap_or(20usize);

    if path == "/api/mangas" {
        return (200, paginate(&catalog.titles, page, per_page).to_string());
    }
    if let Some(id) = path.strip_prefix("/api/mangas/") {
        return match catalog.titles.iter().find(|t| t["id"].to_string().trim_matches('"') == id) {
            Some(title) => (200, json!({ "data": title }).to_string()),
            None => (404, json!({"message": "Not found"}).to_string()),
        };
    }
    if path == "/api/chapters" {
        let id = params.get("manga_id").cloned().unwrap_or_default();
        return match catalog.chapters.get(&id) {
            Some(Value::Array(items)) => (200, paginate(items, page, per_page).to_string()),
            // anything that is not a list is served raw, to exercise format errors
            Some(raw) => (200, json!({ "data": raw }).to_string()),
            None => (200, paginate(&[], page, per_page).to_string()),
        };
    }
    (404, "not found".to_string())
}
