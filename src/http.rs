use anyhow::Result;
use async_trait::async_trait;
use ureq::Agent;

use crate::net::{HttpClient, HttpRequest, HttpResponse};

// Attachments cap at 20 MiB server-side; base64 data URLs inflate past that.
const BODY_LIMIT: u64 = 64 * 1024 * 1024;

/// HTTP client implementation using `ureq` for synchronous HTTP requests.
/// Since `ureq` is blocking, all requests are wrapped in `tokio::task::spawn_blocking`.
#[derive(Clone)]
pub struct UreqHttpClient {
    agent: Agent,
}

impl UreqHttpClient {
    pub fn new() -> Self {
        // Error statuses must come back as responses; the API speaks through
        // 4xx bodies ({"message": ..}).
        let agent: Agent = Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .into();
        Self { agent }
    }
}

impl Default for UreqHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UreqHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UreqHttpClient").finish()
    }
}

#[async_trait]
impl HttpClient for UreqHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let agent = self.agent.clone();
        // Since ureq is blocking, we must use spawn_blocking
        tokio::task::spawn_blocking(move || {
            let response = match request.method.as_str() {
                "GET" | "DELETE" => {
                    let mut req = if request.method == "GET" {
                        agent.get(&request.url)
                    } else {
                        agent.delete(&request.url)
                    };
                    for (key, value) in &request.headers {
                        req = req.header(key.as_str(), value.as_str());
                    }
                    req.call()?
                }
                "POST" | "PATCH" => {
                    let mut req = if request.method == "POST" {
                        agent.post(&request.url)
                    } else {
                        agent.patch(&request.url)
                    };
                    for (key, value) in &request.headers {
                        req = req.header(key.as_str(), value.as_str());
                    }
                    match request.body {
                        Some(body) => req.send(&body[..])?,
                        None => req.send_empty()?,
                    }
                }
                method => {
                    return Err(anyhow::anyhow!("Unsupported HTTP method: {}", method));
                }
            };

            let status_code = response.status().as_u16();
            let headers: Vec<(String, String)> = response
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        String::from_utf8_lossy(value.as_bytes()).into_owned(),
                    )
                })
                .collect();

            // Read the response body
            let body_bytes = response
                .into_body()
                .with_config()
                .limit(BODY_LIMIT)
                .read_to_vec()?;

            let mut out = HttpResponse::with_body(status_code, body_bytes);
            out.headers = headers;
            Ok(out)
        })
        .await?
    }
}
