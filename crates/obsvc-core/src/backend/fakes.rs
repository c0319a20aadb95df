//! In-process backend fake (testing and dry runs)
//!
//! `RecordingBackend` records every request it receives and answers from a
//! list of stubs. The first stub whose method, path and `cmd` query value
//! match wins; unmatched requests get `200` with an empty body.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{BackendClient, BackendError, BackendRequest, BackendResponse, Method};

#[derive(Debug, Clone)]
enum Reply {
    Respond(BackendResponse),
    Fail(BackendError),
}

#[derive(Debug, Clone)]
struct Stub {
    method: Method,
    path: String,
    cmd: Option<String>,
    delay: Option<Duration>,
    reply: Reply,
}

impl Stub {
    fn matches(&self, request: &BackendRequest) -> bool {
        self.method == request.method
            && self.path == request.path
            && match &self.cmd {
                Some(cmd) => request.query_value("cmd") == Some(cmd.as_str()),
                None => true,
            }
    }
}

/// Backend fake that records requests and replays canned responses.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    requests: Mutex<Vec<BackendRequest>>,
    stubs: Mutex<Vec<Stub>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(
        &self,
        method: Method,
        path: &str,
        cmd: Option<&str>,
        delay: Option<Duration>,
        reply: Reply,
    ) {
        self.stubs.lock().unwrap().push(Stub {
            method,
            path: path.to_string(),
            cmd: cmd.map(str::to_string),
            delay,
            reply,
        });
    }

    /// Answer matching requests with `response`.
    pub fn stub(&self, method: Method, path: &str, cmd: Option<&str>, response: BackendResponse) {
        self.push(method, path, cmd, None, Reply::Respond(response));
    }

    /// Answer matching requests with `response` after `delay`.
    pub fn stub_delayed(
        &self,
        method: Method,
        path: &str,
        cmd: Option<&str>,
        delay: Duration,
        response: BackendResponse,
    ) {
        self.push(method, path, cmd, Some(delay), Reply::Respond(response));
    }

    /// Fail matching requests with a transport error.
    pub fn fail(&self, method: Method, path: &str, cmd: Option<&str>, error: BackendError) {
        self.push(method, path, cmd, None, Reply::Fail(error));
    }

    /// All requests received so far, in order.
    pub fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// `cmd` query values of received requests, in order.
    pub fn commands(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|r| r.query_value("cmd").map(str::to_string))
            .collect()
    }

    /// Received requests whose `cmd` equals `cmd`.
    pub fn requests_for(&self, cmd: &str) -> Vec<BackendRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.query_value("cmd") == Some(cmd))
            .collect()
    }
}

#[async_trait]
impl BackendClient for RecordingBackend {
    async fn send(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let stub = {
            let stubs = self.stubs.lock().unwrap();
            stubs.iter().find(|s| s.matches(&request)).cloned()
        };
        self.requests.lock().unwrap().push(request);

        let Some(stub) = stub else {
            return Ok(BackendResponse::ok(Vec::new()));
        };
        if let Some(delay) = stub.delay {
            tokio::time::sleep(delay).await;
        }
        match stub.reply {
            Reply::Respond(response) => Ok(response),
            Reply::Fail(error) => Err(error),
        }
    }
}
