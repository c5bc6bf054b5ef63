//! Scriptable fakes for exercising a client without a server: a transport
//! whose inbound frames the test injects, and an HTTP client answering from
//! canned routes. Used by the integration tests in `tests/`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};

use crate::client::Client;
use crate::config::ClientConfig;
use crate::net::{
    HttpClient, HttpRequest, HttpResponse, Transport, TransportEvent, TransportFactory,
};

/// A transport half that records outbound frames and forwards injected
/// events. Created by [`MockTransportFactory`].
pub struct MockTransport {
    state: Arc<Mutex<FactoryState>>,
    events: mpsc::Sender<TransportEvent>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, data: &[u8]) -> Result<(), anyhow::Error> {
        self.state.lock().unwrap().sent.push(data.to_vec());
        Ok(())
    }

    async fn disconnect(&self) {
        let _ = self.events.send(TransportEvent::Disconnected).await;
    }
}

#[derive(Default)]
struct FactoryState {
    connections: u64,
    fail_connects: u32,
    current: Option<mpsc::Sender<TransportEvent>>,
    sent: Vec<Vec<u8>>,
    tokens: Vec<String>,
}

/// Hands out [`MockTransport`]s and keeps a handle to the most recent one so
/// a test can push frames at the client or kill the connection under it.
#[derive(Default)]
pub struct MockTransportFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.state.lock().unwrap().fail_connects = n;
    }

    /// Deliver one inbound frame to the client, as if the server pushed it.
    pub async fn inject_frame(&self, frame: &str) {
        let tx = self
            .state
            .lock()
            .unwrap()
            .current
            .clone()
            .expect("no live mock connection to inject into");
        tx.send(TransportEvent::DataReceived(Bytes::from(frame.to_string())))
            .await
            .expect("client stopped reading transport events");
    }

    /// Close the current connection from the server side.
    pub async fn drop_connection(&self) {
        let tx = self.state.lock().unwrap().current.clone();
        if let Some(tx) = tx {
            let _ = tx.send(TransportEvent::Disconnected).await;
        }
    }

    /// Every frame the client has sent, across all connections, as text.
    pub fn sent_frames(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect()
    }

    pub fn connection_count(&self) -> u64 {
        self.state.lock().unwrap().connections
    }

    /// The session tokens presented on each connection attempt.
    pub fn presented_tokens(&self) -> Vec<String> {
        self.state.lock().unwrap().tokens.clone()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create_transport(
        &self,
        session_token: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        let (tx, rx) = mpsc::channel(100);
        {
            let mut state = self.state.lock().unwrap();
            if state.fail_connects > 0 {
                state.fail_connects -= 1;
                return Err(anyhow::anyhow!("mock connection refused"));
            }
            state.connections += 1;
            state.tokens.push(session_token.to_string());
            state.current = Some(tx.clone());
        }
        let _ = tx.send(TransportEvent::Connected).await;
        Ok((
            Arc::new(MockTransport {
                state: self.state.clone(),
                events: tx,
            }),
            rx,
        ))
    }
}

/// One request as the mock HTTP client saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub body: Option<Vec<u8>>,
}

impl RecordedRequest {
    /// The path after `/api`, query string included.
    pub fn api_path(&self) -> &str {
        self.url
            .split_once("/api")
            .map(|(_, path)| path)
            .unwrap_or(&self.url)
    }
}

#[derive(Clone)]
struct CannedResponse {
    status: u16,
    body: Vec<u8>,
    headers: Vec<(String, String)>,
}

#[derive(Default)]
struct HttpState {
    routes: Vec<(String, String, CannedResponse)>,
    requests: Vec<RecordedRequest>,
}

/// Answers requests from registered routes; anything unrouted gets a 404
/// with a service-shaped error body. Records everything it is asked.
#[derive(Clone, Default)]
pub struct MockHttpClient {
    state: Arc<Mutex<HttpState>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a canned reply for `method` + the path after `/api`
    /// (e.g. `"/user/login"`, `"/rooms?own=true"`). Later registrations for
    /// the same route win.
    pub fn on(&self, method: &str, api_path: &str, status: u16, body: impl Into<Vec<u8>>) {
        self.on_with_headers(method, api_path, status, body, &[]);
    }

    pub fn on_with_headers(
        &self,
        method: &str,
        api_path: &str,
        status: u16,
        body: impl Into<Vec<u8>>,
        headers: &[(&str, &str)],
    ) {
        let canned = CannedResponse {
            status,
            body: body.into(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        let mut state = self.state.lock().unwrap();
        state
            .routes
            .retain(|(m, p, _)| !(m == method && p == api_path));
        state
            .routes
            .push((method.to_string(), api_path.to_string(), canned));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn request_count(&self, method: &str, api_path: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.method == method && r.api_path() == api_path)
            .count()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, anyhow::Error> {
        let recorded = RecordedRequest {
            method: request.method.clone(),
            url: request.url.clone(),
            body: request.body.clone(),
        };
        let canned = {
            let mut state = self.state.lock().unwrap();
            state.requests.push(recorded.clone());
            state
                .routes
                .iter()
                .find(|(m, p, _)| *m == recorded.method && recorded.api_path() == *p)
                .map(|(_, _, c)| c.clone())
        };
        match canned {
            Some(c) => {
                let mut response = HttpResponse::with_body(c.status, c.body);
                for (name, value) in c.headers {
                    response = response.with_header(name, value);
                }
                Ok(response)
            }
            None => Ok(HttpResponse::with_body(
                404,
                br#"{"message":"Error: Not found"}"#.to_vec(),
            )),
        }
    }
}

/// A client wired to fresh mocks, with timing tightened so tests run fast.
pub fn create_test_client() -> (Arc<Client>, Arc<MockTransportFactory>, Arc<MockHttpClient>) {
    let mut config = ClientConfig::new("http://chat.test");
    config.presence_grace = Duration::from_millis(80);
    config.presence_sweep_interval = Duration::from_millis(20);
    create_test_client_with_config(config)
}

pub fn create_test_client_with_config(
    config: ClientConfig,
) -> (Arc<Client>, Arc<MockTransportFactory>, Arc<MockHttpClient>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let transport_factory = Arc::new(MockTransportFactory::new());
    let http = Arc::new(MockHttpClient::new());
    let client = Client::new(config, transport_factory.clone(), http.clone());
    (client, transport_factory, http)
}

/// Stub the login route for `username`, answering with a profile and a
/// session cookie.
pub fn stub_login(http: &MockHttpClient, id: &str, username: &str, token: &str) {
    http.on_with_headers(
        "POST",
        "/user/login",
        200,
        format!(r#"{{"ID":"{id}","username":"{username}"}}"#),
        &[(
            "Set-Cookie",
            &format!("session_token={token}; Path=/; HttpOnly"),
        )],
    );
}

/// Receive the next event from a bus channel, panicking if none arrives in
/// a reasonable time.
pub async fn recv_event<T: Clone>(rx: &mut broadcast::Receiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a bus event")
        .expect("bus channel closed")
}

/// Poll `predicate` until it holds, panicking after a few seconds.
pub async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..500 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition was not reached in time");
}

static ROOM_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A unique hex id in the shape the service generates.
pub fn fresh_id(prefix: &str) -> String {
    let n = ROOM_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{prefix}{n:016x}")
}
