//! In-process Base and Drive emulator for integration tests
//!
//! Serves `http://{addr}/base/{project}/{name}/...` and
//! `http://{addr}/drive/{project}/{name}/...` over HTTP/1.1, keeps everything
//! in memory and records every request it receives.

#![allow(dead_code)]

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use deta::base::{lookup, Item};
use deta::{Config, Deta};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use percent_encoding::percent_decode_str;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;

pub const PROJECT_ID: &str = "testproject";
pub const PROJECT_KEY: &str = "testproject_secret";

const DEFAULT_LIMIT: usize = 1000;
const MAX_PUT_ITEMS: usize = 25;
const MAX_DELETE_NAMES: usize = 1000;

/// One request as seen by the emulator
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    /// Raw (still percent-encoded) path
    pub path: String,
    pub query: HashMap<String, String>,
    pub body_len: usize,
}

impl Recorded {
    pub fn is(&self, method: Method, path_suffix: &str) -> bool {
        self.method == method && self.path.ends_with(path_suffix)
    }
}

#[derive(Debug, Default)]
struct Faults {
    fail_part: Option<u32>,
    fail_finish: bool,
    fail_abort: bool,
    locked: HashSet<String>,
}

#[derive(Debug)]
struct Upload {
    name: String,
    parts: BTreeMap<u32, Vec<u8>>,
    content_type: Option<String>,
}

#[derive(Debug, Clone)]
struct StoredFile {
    data: Vec<u8>,
    content_type: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    bases: HashMap<String, BTreeMap<String, Item>>,
    drives: HashMap<String, BTreeMap<String, StoredFile>>,
    uploads: HashMap<String, Upload>,
    requests: Vec<Recorded>,
    faults: Faults,
    next_id: u64,
}

/// Handle to a running emulator
#[derive(Clone)]
pub struct Emulator {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
}

impl Emulator {
    /// Bind to an ephemeral local port and serve on the current runtime
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State::default()));
        let service = EmulatorService {
            state: state.clone(),
        };

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let service = service.clone();
                tokio::spawn(async move {
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self { addr, state }
    }

    pub fn config(&self, project_key: &str) -> Config {
        Config {
            project_key: project_key.to_string(),
            base_endpoint: format!("http://{}/base", self.addr),
            drive_endpoint: format!("http://{}/drive", self.addr),
        }
    }

    /// Project pointed at this emulator with the accepted key
    pub fn deta(&self) -> Deta {
        self.deta_with_key(PROJECT_KEY)
    }

    pub fn deta_with_key(&self, project_key: &str) -> Deta {
        Deta::with_config(self.config(project_key)).unwrap()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.state().requests.clear();
    }

    /// Answer 500 to the upload of the given part number
    pub fn fail_part(&self, part: u32) {
        self.state().faults.fail_part = Some(part);
    }

    /// Answer 500 to every finish request
    pub fn fail_finish(&self) {
        self.state().faults.fail_finish = true;
    }

    /// Answer 502 to every abort request
    pub fn fail_abort(&self) {
        self.state().faults.fail_abort = true;
    }

    /// Report `name` as failed in delete responses and put responses
    pub fn lock(&self, name: &str) {
        self.state().faults.locked.insert(name.to_string());
    }

    pub fn open_uploads(&self) -> usize {
        self.state().uploads.len()
    }

    pub fn item(&self, base: &str, key: &str) -> Option<Item> {
        self.state().bases.get(base)?.get(key).cloned()
    }

    pub fn file(&self, drive: &str, name: &str) -> Option<Vec<u8>> {
        self.state()
            .drives
            .get(drive)?
            .get(name)
            .map(|file| file.data.clone())
    }
}

#[derive(Clone)]
struct EmulatorService {
    state: Arc<Mutex<State>>,
}

impl EmulatorService {
    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let query: HashMap<String, String> = req
            .uri()
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        let authorized = req
            .headers()
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            == Some(PROJECT_KEY);
        let content_type = req
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(_) => return error(StatusCode::BAD_REQUEST, "unreadable body"),
        };

        let mut state = self.state.lock().unwrap();
        state.requests.push(Recorded {
            method: method.clone(),
            path: path.clone(),
            query: query.clone(),
            body_len: body.len(),
        });

        if !authorized {
            return error(StatusCode::UNAUTHORIZED, "Unauthorized");
        }

        let segments: Vec<String> = path
            .trim_start_matches('/')
            .split('/')
            .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
            .collect();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();

        match segments.as_slice() {
            ["base", project, name, rest @ ..] if *project == PROJECT_ID => {
                state.base(&method, name, rest, &body)
            }
            ["drive", project, name, rest @ ..] if *project == PROJECT_ID => {
                let request = DriveRequest {
                    method: &method,
                    drive: name,
                    query: &query,
                    body: &body,
                    content_type: content_type.as_deref(),
                };
                state.drive(request, rest)
            }
            ["base", ..] | ["drive", ..] => error(StatusCode::UNAUTHORIZED, "Unauthorized"),
            _ => error(StatusCode::NOT_FOUND, "Not found"),
        }
    }
}

impl hyper::service::Service<Request<Incoming>> for EmulatorService {
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(req).await) })
    }
}

struct DriveRequest<'a> {
    method: &'a Method,
    drive: &'a str,
    query: &'a HashMap<String, String>,
    body: &'a Bytes,
    content_type: Option<&'a str>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn base(&mut self, method: &Method, name: &str, rest: &[&str], body: &Bytes) -> Response<Full<Bytes>> {
        let doc: Value = if body.is_empty() {
            Value::Null
        } else {
            match serde_json::from_slice(body) {
                Ok(doc) => doc,
                Err(_) => return error(StatusCode::BAD_REQUEST, "invalid json"),
            }
        };

        match (method.as_str(), rest) {
            ("PUT", ["items"]) => self.put_items(name, &doc),
            ("POST", ["items"]) => self.insert_item(name, &doc),
            ("GET", ["items", key]) => match self.bases.get(name).and_then(|b| b.get(*key)) {
                Some(item) => json_response(StatusCode::OK, Value::Object(item.clone())),
                None => error(StatusCode::NOT_FOUND, "Key not found"),
            },
            ("DELETE", ["items", key]) => {
                if let Some(base) = self.bases.get_mut(name) {
                    base.remove(*key);
                }
                json_response(StatusCode::OK, json!({ "key": key }))
            }
            ("PATCH", ["items", key]) => {
                let Some(item) = self.bases.get_mut(name).and_then(|b| b.get_mut(*key)) else {
                    return error(StatusCode::NOT_FOUND, "Key not found");
                };
                let mut updated = item.clone();
                match apply_update(&mut updated, &doc) {
                    Ok(()) => {
                        *item = updated;
                        json_response(StatusCode::OK, doc)
                    }
                    Err(msg) => error(StatusCode::BAD_REQUEST, &msg),
                }
            }
            ("POST", ["query"]) => self.query(name, &doc),
            _ => error(StatusCode::NOT_FOUND, "Not found"),
        }
    }

    fn put_items(&mut self, name: &str, doc: &Value) -> Response<Full<Bytes>> {
        let Some(items) = doc.get("items").and_then(Value::as_array) else {
            return error(StatusCode::BAD_REQUEST, "items missing");
        };
        if items.len() > MAX_PUT_ITEMS {
            return error(StatusCode::BAD_REQUEST, "too many items");
        }

        let mut processed = Vec::new();
        let mut failed = Vec::new();
        for item in items {
            let Some(mut item) = item.as_object().cloned() else {
                failed.push(item.clone());
                continue;
            };
            let key = match item.get("key") {
                Some(Value::String(key)) if !key.is_empty() => key.clone(),
                None => format!("{:012x}", self.next_id()),
                Some(_) => {
                    failed.push(Value::Object(item));
                    continue;
                }
            };
            if self.faults.locked.contains(&key) {
                failed.push(Value::Object(item));
                continue;
            }
            item.insert("key".to_string(), Value::String(key.clone()));
            self.bases
                .entry(name.to_string())
                .or_default()
                .insert(key, item.clone());
            processed.push(Value::Object(item));
        }

        json_response(
            StatusCode::MULTI_STATUS,
            json!({"processed": {"items": processed}, "failed": {"items": failed}}),
        )
    }

    fn insert_item(&mut self, name: &str, doc: &Value) -> Response<Full<Bytes>> {
        let Some(mut item) = doc.get("item").and_then(Value::as_object).cloned() else {
            return error(StatusCode::BAD_REQUEST, "item missing");
        };
        let key = match item.get("key").and_then(Value::as_str) {
            Some(key) => key.to_string(),
            None => format!("{:012x}", self.next_id()),
        };
        let base = self.bases.entry(name.to_string()).or_default();
        if base.contains_key(&key) {
            return error(StatusCode::CONFLICT, &format!("Key {} already exists", key));
        }
        item.insert("key".to_string(), Value::String(key.clone()));
        base.insert(key, item.clone());
        json_response(StatusCode::CREATED, Value::Object(item))
    }

    fn query(&mut self, name: &str, doc: &Value) -> Response<Full<Bytes>> {
        let groups: Vec<Map<String, Value>> = doc
            .get("query")
            .and_then(Value::as_array)
            .map(|groups| groups.iter().filter_map(Value::as_object).cloned().collect())
            .unwrap_or_default();
        let limit = doc
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_LIMIT);
        let last = doc.get("last").and_then(Value::as_str).unwrap_or("");

        let empty = BTreeMap::new();
        let base = self.bases.get(name).unwrap_or(&empty);

        let mut matched = Vec::new();
        for (key, item) in base.range::<str, _>((
            std::ops::Bound::Excluded(last),
            std::ops::Bound::Unbounded,
        )) {
            let mut hit = groups.is_empty();
            for group in &groups {
                match matches_group(item, group) {
                    Ok(true) => {
                        hit = true;
                        break;
                    }
                    Ok(false) => {}
                    Err(msg) => return error(StatusCode::BAD_REQUEST, &msg),
                }
            }
            if hit {
                matched.push((key.clone(), item.clone()));
            }
        }

        let more = matched.len() > limit;
        matched.truncate(limit);
        let last = if more {
            matched.last().map(|(key, _)| Value::String(key.clone()))
        } else {
            None
        };
        let items: Vec<Value> = matched.into_iter().map(|(_, item)| Value::Object(item)).collect();

        let mut paging = json!({ "size": items.len() });
        if let Some(last) = last {
            paging["last"] = last;
        }
        json_response(StatusCode::OK, json!({ "paging": paging, "items": items }))
    }

    fn drive(&mut self, req: DriveRequest<'_>, rest: &[&str]) -> Response<Full<Bytes>> {
        let name = req.query.get("name").cloned().unwrap_or_default();

        match (req.method.as_str(), rest) {
            ("POST", ["uploads"]) => {
                if name.is_empty() {
                    return error(StatusCode::BAD_REQUEST, "name missing");
                }
                let id = format!("upload-{}", self.next_id());
                self.uploads.insert(
                    id.clone(),
                    Upload {
                        name: name.clone(),
                        parts: BTreeMap::new(),
                        content_type: None,
                    },
                );
                json_response(StatusCode::ACCEPTED, json!({"upload_id": id, "name": name}))
            }
            ("POST", ["uploads", id, "parts"]) => {
                let Some(part) = req.query.get("part").and_then(|p| p.parse::<u32>().ok()) else {
                    return error(StatusCode::BAD_REQUEST, "part missing");
                };
                if self.faults.fail_part == Some(part) {
                    return error(StatusCode::INTERNAL_SERVER_ERROR, "part upload failed");
                }
                let Some(upload) = self.uploads.get_mut(*id) else {
                    return error(StatusCode::NOT_FOUND, "upload not found");
                };
                if upload.name != name {
                    return error(StatusCode::BAD_REQUEST, "name mismatch");
                }
                if upload.content_type.is_none() {
                    upload.content_type = req.content_type.map(str::to_string);
                }
                upload.parts.insert(part, req.body.to_vec());
                json_response(StatusCode::OK, json!({"name": name, "part": part}))
            }
            ("PATCH", ["uploads", id]) => {
                if self.faults.fail_finish {
                    return error(StatusCode::INTERNAL_SERVER_ERROR, "finish failed");
                }
                let Some(upload) = self.uploads.remove(*id) else {
                    return error(StatusCode::NOT_FOUND, "upload not found");
                };
                let data = upload.parts.into_values().flatten().collect();
                self.drives.entry(req.drive.to_string()).or_default().insert(
                    upload.name,
                    StoredFile {
                        data,
                        content_type: upload.content_type,
                    },
                );
                json_response(StatusCode::OK, json!({"name": name}))
            }
            ("DELETE", ["uploads", id]) => {
                if self.faults.fail_abort {
                    return error(StatusCode::BAD_GATEWAY, "abort failed");
                }
                match self.uploads.remove(*id) {
                    Some(_) => json_response(StatusCode::OK, json!({"name": name, "status": "ABORTED"})),
                    None => error(StatusCode::NOT_FOUND, "upload not found"),
                }
            }
            ("GET", ["files", "download"]) => {
                match self.drives.get(req.drive).and_then(|d| d.get(&name)) {
                    Some(file) => Response::builder()
                        .status(StatusCode::OK)
                        .header(
                            "content-type",
                            file.content_type.as_deref().unwrap_or("application/octet-stream"),
                        )
                        .body(Full::new(Bytes::from(file.data.clone())))
                        .unwrap(),
                    None => error(StatusCode::NOT_FOUND, "file not found"),
                }
            }
            ("GET", ["files"]) => self.list_files(req.drive, req.query),
            ("DELETE", ["files"]) => {
                let names: Vec<String> = serde_json::from_slice::<Value>(req.body)
                    .ok()
                    .and_then(|doc| doc.get("names").cloned())
                    .and_then(|names| serde_json::from_value(names).ok())
                    .unwrap_or_default();
                if names.is_empty() || names.len() > MAX_DELETE_NAMES {
                    return error(StatusCode::BAD_REQUEST, "bad names");
                }

                let mut deleted = Vec::new();
                let mut failed = Map::new();
                for name in names {
                    if self.faults.locked.contains(&name) {
                        failed.insert(name, json!("file is locked"));
                        continue;
                    }
                    if let Some(drive) = self.drives.get_mut(req.drive) {
                        drive.remove(&name);
                    }
                    deleted.push(name);
                }
                json_response(StatusCode::OK, json!({"deleted": deleted, "failed": failed}))
            }
            _ => error(StatusCode::NOT_FOUND, "Not found"),
        }
    }

    fn list_files(&self, drive: &str, query: &HashMap<String, String>) -> Response<Full<Bytes>> {
        let limit = query
            .get("limit")
            .and_then(|l| l.parse::<usize>().ok())
            .unwrap_or(DEFAULT_LIMIT);
        let prefix = query.get("prefix").map(String::as_str).unwrap_or("");
        let last = query.get("last").map(String::as_str).unwrap_or("");

        let mut names: Vec<String> = self
            .drives
            .get(drive)
            .map(|files| {
                files
                    .keys()
                    .filter(|name| name.starts_with(prefix) && name.as_str() > last)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let more = names.len() > limit;
        names.truncate(limit);
        let mut paging = json!({ "size": names.len() });
        if more {
            if let Some(last) = names.last() {
                paging["last"] = json!(last);
            }
        }
        json_response(StatusCode::OK, json!({ "paging": paging, "names": names }))
    }
}

fn json_response(status: StatusCode, body: Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

fn error(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, json!({ "errors": [message] }))
}

fn matches_group(item: &Item, group: &Map<String, Value>) -> Result<bool, String> {
    for (key, expected) in group {
        let (path, op) = key.split_once('?').unwrap_or((key.as_str(), "eq"));
        let actual = lookup(item, path);
        let hit = match op {
            "eq" => actual.is_some_and(|a| values_equal(a, expected)),
            "ne" => !actual.is_some_and(|a| values_equal(a, expected)),
            "gt" => compare(actual, expected) == Some(Ordering::Greater),
            "gte" => matches!(compare(actual, expected), Some(Ordering::Greater | Ordering::Equal)),
            "lt" => compare(actual, expected) == Some(Ordering::Less),
            "lte" => matches!(compare(actual, expected), Some(Ordering::Less | Ordering::Equal)),
            "contains" => contains(actual, expected),
            "not_contains" => !contains(actual, expected),
            "prefix" => match (actual.and_then(Value::as_str), expected.as_str()) {
                (Some(a), Some(p)) => a.starts_with(p),
                _ => false,
            },
            "range" => match expected.as_array().map(Vec::as_slice) {
                Some([low, high]) => {
                    matches!(compare(actual, low), Some(Ordering::Greater | Ordering::Equal))
                        && matches!(compare(actual, high), Some(Ordering::Less | Ordering::Equal))
                }
                _ => return Err(format!("range of {} needs two bounds", path)),
            },
            other => return Err(format!("invalid operator {}", other)),
        };
        if !hit {
            return Ok(false);
        }
    }
    Ok(true)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    let actual = actual?;
    match (actual.as_f64(), expected.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => match (actual.as_str(), expected.as_str()) {
            (Some(x), Some(y)) => Some(x.cmp(y)),
            _ => None,
        },
    }
}

fn contains(actual: Option<&Value>, expected: &Value) -> bool {
    match (actual, expected) {
        (Some(Value::String(s)), Value::String(sub)) => s.contains(sub.as_str()),
        (Some(Value::Array(list)), value) => list.iter().any(|v| values_equal(v, value)),
        _ => false,
    }
}

fn apply_update(item: &mut Item, doc: &Value) -> Result<(), String> {
    if let Some(set) = doc.get("set").and_then(Value::as_object) {
        for (path, value) in set {
            set_path(item, path, value.clone());
        }
    }
    if let Some(increment) = doc.get("increment").and_then(Value::as_object) {
        for (path, delta) in increment {
            let current = lookup(item, path).cloned().unwrap_or(json!(0));
            let sum = add(&current, delta).ok_or_else(|| format!("{} is not a number", path))?;
            set_path(item, path, sum);
        }
    }
    if let Some(append) = doc.get("append").and_then(Value::as_object) {
        for (path, values) in append {
            let mut list = current_list(item, path)?;
            list.extend(values.as_array().cloned().unwrap_or_default());
            set_path(item, path, Value::Array(list));
        }
    }
    if let Some(prepend) = doc.get("prepend").and_then(Value::as_object) {
        for (path, values) in prepend {
            let mut list = values.as_array().cloned().unwrap_or_default();
            list.extend(current_list(item, path)?);
            set_path(item, path, Value::Array(list));
        }
    }
    if let Some(delete) = doc.get("delete").and_then(Value::as_array) {
        for path in delete.iter().filter_map(Value::as_str) {
            remove_path(item, path);
        }
    }
    Ok(())
}

fn current_list(item: &Item, path: &str) -> Result<Vec<Value>, String> {
    match lookup(item, path) {
        None => Ok(Vec::new()),
        Some(Value::Array(list)) => Ok(list.clone()),
        Some(_) => Err(format!("{} is not a list", path)),
    }
}

fn add(a: &Value, b: &Value) -> Option<Value> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(json!(x + y));
    }
    Some(json!(a.as_f64()? + b.as_f64()?))
}

fn set_path(item: &mut Item, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else { return };
    let mut current = item;
    for segment in segments {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = entry.as_object_mut().unwrap();
    }
    current.insert(last.to_string(), value);
}

fn remove_path(item: &mut Item, path: &str) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else { return };
    let mut current = item;
    for segment in segments {
        match current.get_mut(segment).and_then(Value::as_object_mut) {
            Some(next) => current = next,
            None => return,
        }
    }
    current.remove(last);
}
