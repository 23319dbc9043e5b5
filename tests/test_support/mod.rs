#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use serde_json::json;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Nothing listens here; connections are refused straight away.
pub const UNREACHABLE_API: &str = "http://127.0.0.1:9/api/v1";

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos(),
        TEMP_SEQ.fetch_add(1, Ordering::SeqCst)
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub struct Sidecar {
    pub child: Child,
    pub stdin: ChildStdin,
    pub reader: BufReader<ChildStdout>,
}

impl Sidecar {
    pub fn request(&mut self, id: &str, method: &str, params: serde_json::Value) -> serde_json::Value {
        request(&mut self.stdin, &mut self.reader, id, method, params)
    }

    pub fn request_ok(&mut self, id: &str, method: &str, params: serde_json::Value) -> serde_json::Value {
        request_ok(&mut self.stdin, &mut self.reader, id, method, params)
    }

    /// Sends a request that must fail and returns its error code.
    pub fn request_err(&mut self, id: &str, method: &str, params: serde_json::Value) -> String {
        let value = self.request(id, method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value["error"]["code"]
            .as_str()
            .expect("error code")
            .to_string()
    }

    /// Closes stdin and waits for a clean exit.
    pub fn shutdown(self) {
        let Sidecar {
            mut child, stdin, ..
        } = self;
        drop(stdin);
        let status = child.wait().expect("wait for sidecar");
        assert!(status.success(), "sidecar exited with {status}");
    }
}

pub fn spawn_sidecar() -> Sidecar {
    spawn_sidecar_with(&[])
}

pub fn spawn_sidecar_with(envs: &[(&str, &str)]) -> Sidecar {
    let exe = env!("CARGO_BIN_EXE_attendanced");
    let mut cmd = Command::new(exe);
    cmd.env("ATTENDANCED_API_BASE_URL", UNREACHABLE_API)
        .env("ATTENDANCED_REQUEST_TIMEOUT_SECS", "5")
        .env("ATTENDANCED_LOG", "attendanced=debug");
    for proxy in ["HTTP_PROXY", "http_proxy", "HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"] {
        cmd.env_remove(proxy);
    }
    for (k, v) in envs {
        cmd.env(k, v);
    }
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn attendanced");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    Sidecar {
        child,
        stdin,
        reader: BufReader::new(stdout),
    }
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

/// QR payload as the issuing side renders it, issued `age_secs` ago.
pub fn qr_payload(id: &str, age_secs: i64) -> String {
    let issued = chrono::Utc::now() - chrono::Duration::seconds(age_secs);
    json!({
        "id": id,
        "classId": 1,
        "subjectId": 2,
        "teacherId": 3,
        "date": "2025-04-21",
        "period": 1,
        "timestamp": issued.to_rfc3339(),
    })
    .to_string()
}

/// Selects `workspace` and grants both capabilities with a location fix.
pub fn ready_to_scan(sidecar: &mut Sidecar, workspace: &std::path::Path, online: bool) {
    sidecar.request_ok(
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy(), "online": online }),
    );
    sidecar.request_ok(
        "perm-cam",
        "permissions.changed",
        json!({ "capability": "camera", "state": "granted" }),
    );
    sidecar.request_ok(
        "perm-geo",
        "permissions.changed",
        json!({ "capability": "geolocation", "state": "granted" }),
    );
    sidecar.request_ok(
        "fix",
        "device.location",
        json!({ "latitude": -25.75, "longitude": 28.23, "accuracy": 15.0 }),
    );
}

/// Starts a scan for `student_id` and feeds it one decoded payload.
pub fn scan_once(sidecar: &mut Sidecar, tag: &str, student_id: i64, text: &str) -> serde_json::Value {
    sidecar.request_ok(
        &format!("{tag}-start"),
        "scan.start",
        json!({ "studentId": student_id }),
    );
    sidecar.request(&format!("{tag}-decode"), "scan.decode", json!({ "text": text }))
}

/// Polls `check` against fresh `sync.status` results until it holds.
pub fn wait_for_status(
    sidecar: &mut Sidecar,
    timeout: Duration,
    check: impl Fn(&serde_json::Value) -> bool,
) -> serde_json::Value {
    let deadline = Instant::now() + timeout;
    let mut n = 0;
    loop {
        n += 1;
        let status = sidecar.request_ok(&format!("poll-{n}"), "sync.status", json!({}));
        if check(&status) {
            return status;
        }
        assert!(Instant::now() < deadline, "condition not reached; last status {status}");
        thread::sleep(Duration::from_millis(25));
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub body: serde_json::Value,
}

struct StubState {
    fallback: (u16, String),
    requests: Mutex<Vec<RecordedRequest>>,
    script: Mutex<VecDeque<(u16, String)>>,
}

/// axum app standing in for the attendance API on an ephemeral port.
/// Replies come from a script; once it is empty, `fallback` is used.
pub struct StubApi {
    pub base_url: String,
    state: Arc<StubState>,
    _runtime: tokio::runtime::Runtime,
}

async fn record_and_reply(
    State(stub): State<Arc<StubState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Recorded before replying so the caller sees it once the reply lands.
    stub.requests.lock().expect("requests").push(RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        authorization: headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null),
    });
    let (status, payload) = stub
        .script
        .lock()
        .expect("script")
        .pop_front()
        .unwrap_or_else(|| stub.fallback.clone());
    let status = StatusCode::from_u16(status).expect("valid status");
    (status, [(header::CONTENT_TYPE, "application/json")], payload).into_response()
}

impl StubApi {
    pub fn start(fallback_status: u16, fallback_body: &str) -> StubApi {
        let state = Arc::new(StubState {
            fallback: (fallback_status, fallback_body.to_string()),
            requests: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
        });
        let app = Router::new()
            .route("/api/v1/attendance/qr", post(record_and_reply))
            .route("/api/v1/attendance/sync", post(record_and_reply))
            .with_state(Arc::clone(&state));

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("stub runtime");
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .expect("bind stub api");
        let addr = listener.local_addr().expect("stub addr");
        runtime.spawn(async move { axum::serve(listener, app).await.expect("serve stub api") });

        StubApi {
            base_url: format!("http://{addr}/api/v1"),
            state,
            _runtime: runtime,
        }
    }

    pub fn push_reply(&self, status: u16, body: &str) {
        self.state
            .script
            .lock()
            .expect("script")
            .push_back((status, body.to_string()));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().expect("requests").clone()
    }

    pub fn requests_to(&self, path_suffix: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path.ends_with(path_suffix))
            .collect()
    }
}
