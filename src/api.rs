//! Typed wrapper over the service's REST surface.
//!
//! The browser client leans on the browser's cookie store; here a one-slot
//! [`CookieJar`] fills that role. Every response passes through it so a
//! rotated `session_token` from any endpoint (most often `/api/user/refresh`)
//! is picked up, and every request replays the current token.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::anyhow;
use base64::Engine as _;
use log::debug;
use rand::RngCore;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::ApiError;
use crate::net::{HttpClient, HttpRequest, HttpResponse};
use crate::types::{ChatMessage, Id, RoomSummary, UserProfile};

pub const SESSION_COOKIE: &str = "session_token";

/// Holds the one cookie this service issues.
#[derive(Debug, Default, Clone)]
pub struct CookieJar {
    token: Arc<Mutex<Option<String>>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    pub fn clear(&self) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Pick up `Set-Cookie: session_token=..` from a response. An empty
    /// value is how the server revokes the cookie on logout.
    pub fn capture(&self, response: &HttpResponse) {
        for cookie in response.header_values("set-cookie") {
            let Some(rest) = cookie.trim().strip_prefix(SESSION_COOKIE) else {
                continue;
            };
            let Some(rest) = rest.strip_prefix('=') else {
                continue;
            };
            let value = rest.split(';').next().unwrap_or("").trim();
            if value.is_empty() {
                self.clear();
            } else {
                self.set(value);
            }
        }
    }
}

/// The room document as `/join` returns it: the summary plus the full
/// message history.
#[derive(Debug, Clone, Deserialize)]
pub struct JoinedRoom {
    #[serde(rename = "ID")]
    pub id: Id,
    pub name: String,
    #[serde(default)]
    pub author_id: Id,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

pub struct ApiClient {
    http: Arc<dyn HttpClient>,
    base_url: String,
    pub cookies: CookieJar,
}

impl ApiClient {
    pub fn new(http: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            cookies: CookieJar::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    async fn execute(&self, mut request: HttpRequest) -> Result<HttpResponse, ApiError> {
        if let Some(token) = self.cookies.get() {
            request = request.with_header("Cookie", format!("{SESSION_COOKIE}={token}"));
        }
        debug!(target: "Client/Api", "{} {}", request.method, request.url);
        let response = self.http.execute(request).await.map_err(ApiError::Http)?;
        self.cookies.capture(&response);
        Ok(response)
    }

    /// Map a non-success response to an error, stripping the `"Error: "`
    /// prefix the server bakes into its messages.
    fn error_for(status: u16, body: &str) -> ApiError {
        let message = serde_json::from_str::<ErrorBody>(body)
            .map(|b| b.message)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| body.trim().to_string());
        let message = message
            .strip_prefix("Error: ")
            .unwrap_or(&message)
            .to_string();
        if status == 401 || status == 403 {
            ApiError::Auth(message)
        } else {
            ApiError::Server { status, message }
        }
    }

    async fn request_json<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T, ApiError> {
        let response = self.execute(request).await?;
        let status = response.status_code;
        let text = response.body_string().map_err(ApiError::Http)?;
        if !(200..300).contains(&status) {
            return Err(Self::error_for(status, &text));
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Http(anyhow!("invalid response body: {e}")))
    }

    async fn request_unit(&self, request: HttpRequest) -> Result<(), ApiError> {
        let response = self.execute(request).await?;
        let status = response.status_code;
        if !(200..300).contains(&status) {
            let text = response.body_string().map_err(ApiError::Http)?;
            return Err(Self::error_for(status, &text));
        }
        Ok(())
    }

    /// Fetch a raw body plus its content type.
    async fn request_bytes(
        &self,
        request: HttpRequest,
    ) -> Result<(Vec<u8>, Option<String>), ApiError> {
        let mut response = self.execute(request).await?;
        let status = response.status_code;
        if !(200..300).contains(&status) {
            let text = response.body_string().map_err(ApiError::Http)?;
            return Err(Self::error_for(status, &text));
        }
        let content_type = response
            .header_values("content-type")
            .next()
            .map(|v| v.to_string());
        let bytes = response.body_into_vec().map_err(ApiError::Http)?;
        Ok((bytes, content_type))
    }

    fn json_body(value: &serde_json::Value) -> Result<Vec<u8>, ApiError> {
        serde_json::to_vec(value).map_err(|e| ApiError::Http(anyhow!(e)))
    }

    // --- accounts ---

    pub async fn login(&self, username: &str, password: &str) -> Result<UserProfile, ApiError> {
        let body = Self::json_body(&json!({"username": username, "password": password}))?;
        self.request_json(
            HttpRequest::post(self.url("/user/login"))
                .with_header("Content-Type", "application/json")
                .with_body(body),
        )
        .await
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<UserProfile, ApiError> {
        let body = Self::json_body(&json!({"username": username, "password": password}))?;
        self.request_json(
            HttpRequest::post(self.url("/user/register"))
                .with_header("Content-Type", "application/json")
                .with_body(body),
        )
        .await
    }

    /// Re-issue the session cookie and return the account it belongs to.
    pub async fn refresh(&self) -> Result<UserProfile, ApiError> {
        self.request_json(HttpRequest::post(self.url("/user/refresh")))
            .await
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        let result = self
            .request_unit(HttpRequest::post(self.url("/user/logout")))
            .await;
        self.cookies.clear();
        result
    }

    pub async fn delete_account(&self) -> Result<(), ApiError> {
        self.request_unit(HttpRequest::post(self.url("/user/deleteacc")))
            .await?;
        self.cookies.clear();
        Ok(())
    }

    pub async fn get_user(&self, id: &str) -> Result<UserProfile, ApiError> {
        self.request_json(HttpRequest::get(
            self.url(&format!("/user/{}", urlencoding::encode(id))),
        ))
        .await
    }

    pub async fn update_pfp(
        &self,
        data: &[u8],
        filename: &str,
        mime: &str,
    ) -> Result<(), ApiError> {
        let (content_type, body) = multipart_file("file", filename, mime, data);
        self.request_unit(
            HttpRequest::post(self.url("/updatepfp"))
                .with_header("Content-Type", content_type)
                .with_body(body),
        )
        .await
    }

    // --- rooms ---

    pub async fn list_rooms(&self, own: bool) -> Result<Vec<RoomSummary>, ApiError> {
        let path = if own { "/rooms?own=true" } else { "/rooms" };
        self.request_json(HttpRequest::get(self.url(path))).await
    }

    pub async fn create_room(&self, name: &str) -> Result<RoomSummary, ApiError> {
        let body = Self::json_body(&json!({"name": name}))?;
        self.request_json(
            HttpRequest::post(self.url("/room"))
                .with_header("Content-Type", "application/json")
                .with_body(body),
        )
        .await
    }

    pub async fn rename_room(&self, id: &str, name: &str) -> Result<RoomSummary, ApiError> {
        let body = Self::json_body(&json!({"name": name}))?;
        self.request_json(
            HttpRequest::patch(self.url(&format!("/room/{}", urlencoding::encode(id))))
                .with_header("Content-Type", "application/json")
                .with_body(body),
        )
        .await
    }

    pub async fn delete_room(&self, id: &str) -> Result<(), ApiError> {
        self.request_unit(HttpRequest::delete(
            self.url(&format!("/room/{}", urlencoding::encode(id))),
        ))
        .await
    }

    pub async fn join_room(&self, id: &str) -> Result<JoinedRoom, ApiError> {
        self.request_json(HttpRequest::post(
            self.url(&format!("/room/{}/join", urlencoding::encode(id))),
        ))
        .await
    }

    pub async fn leave_room(&self, id: &str) -> Result<(), ApiError> {
        self.request_unit(HttpRequest::post(
            self.url(&format!("/room/{}/leave", urlencoding::encode(id))),
        ))
        .await
    }

    /// The room's image as a data URL, or None when it has none.
    pub async fn room_image(&self, id: &str) -> Result<Option<String>, ApiError> {
        let request = HttpRequest::get(self.url(&format!("/room/{}/image", urlencoding::encode(id))));
        match self.request_bytes(request).await {
            Ok((bytes, content_type)) => Ok(Some(to_data_url(&bytes, content_type.as_deref()))),
            Err(ApiError::Server { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn set_room_image(
        &self,
        id: &str,
        data: &[u8],
        filename: &str,
        mime: &str,
    ) -> Result<(), ApiError> {
        let (content_type, body) = multipart_file("file", filename, mime, data);
        self.request_unit(
            HttpRequest::post(self.url(&format!("/room/{}/image", urlencoding::encode(id))))
                .with_header("Content-Type", content_type)
                .with_body(body),
        )
        .await
    }

    // --- attachments ---

    /// Second leg of the attachment handshake: ship the staged file to the
    /// message id the server granted.
    pub async fn upload_attachment(
        &self,
        room_id: &str,
        message_id: &str,
        data: &[u8],
        filename: &str,
        mime: &str,
    ) -> Result<(), ApiError> {
        let (content_type, body) = multipart_file("file", filename, mime, data);
        self.request_unit(
            HttpRequest::post(self.url(&format!(
                "/room/{}/{}/attachment",
                urlencoding::encode(room_id),
                urlencoding::encode(message_id)
            )))
            .with_header("Content-Type", content_type)
            .with_body(body),
        )
        .await
    }

    /// A stored attachment's raw bytes plus content type.
    pub async fn attachment_download(
        &self,
        message_id: &str,
    ) -> Result<(Vec<u8>, Option<String>), ApiError> {
        self.request_bytes(HttpRequest::get(self.url(&format!(
            "/attachment/download/{}",
            urlencoding::encode(message_id)
        ))))
        .await
    }

    /// An image attachment as a data URL, for inline rendering.
    pub async fn attachment_image(&self, message_id: &str) -> Result<String, ApiError> {
        let (bytes, content_type) = self
            .request_bytes(HttpRequest::get(self.url(&format!(
                "/attachment/image/{}",
                urlencoding::encode(message_id)
            ))))
            .await?;
        Ok(to_data_url(&bytes, content_type.as_deref()))
    }
}

fn to_data_url(bytes: &[u8], content_type: Option<&str>) -> String {
    let mime = content_type.unwrap_or("application/octet-stream");
    format!(
        "data:{mime};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// A single-file multipart/form-data body. Returns the Content-Type header
/// value (carrying the boundary) and the body bytes.
fn multipart_file(field: &str, filename: &str, mime: &str, data: &[u8]) -> (String, Vec<u8>) {
    let mut raw = [0u8; 16];
    rand::rng().fill_bytes(&mut raw);
    let boundary = format!("----chinwag{}", hex::encode(raw));

    let mut body = Vec::with_capacity(data.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {mime}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    (format!("multipart/form-data; boundary={boundary}"), body)
}
