//! MediaWiki action API client.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration as StdDuration;

use serde::de::DeserializeOwned;
use sha1::{Digest as _, Sha1};
use url::Url;

use super::error::{ApiError, FILE_UNCHANGED};
use super::form::{FORM_URLENCODED, Multipart, encode_form};
use super::types::{
    EditResponse, ErrorBody, FileInfo, FileStatus, ImageInfoResponse, LoginResponse,
    TokensResponse, UploadResponse,
};
use crate::http::reqwest_transport::ReqwestTransport;
use crate::http::{HttpRequest, HttpResponse, HttpTransport};
use crate::scheduler::{Priority, RequestScheduler};
use crate::sync::WriteOutcome;

/// Default `User-Agent` sent to the wiki.
pub const DEFAULT_USER_AGENT: &str = concat!("wikisync/", env!("CARGO_PKG_VERSION"));

/// Default edit and upload summary.
pub const DEFAULT_SUMMARY: &str = "Automated sync";

/// Attempts per authenticated write: the original plus one after a token refresh.
const MAX_TOKEN_ATTEMPTS: usize = 2;

const REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(60);

/// Wiki API client.
///
/// Every request, including downloads, is dispatched through the shared
/// [`RequestScheduler`]. Token requests run at [`Priority::High`], writes and
/// reads at [`Priority::Medium`].
#[derive(Clone)]
pub struct WikiClient {
    transport: Arc<dyn HttpTransport>,
    scheduler: RequestScheduler,
    api_url: Url,
    csrf_token: Arc<Mutex<Option<String>>>,
    summary: String,
}

impl std::fmt::Debug for WikiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WikiClient")
            .field("api_url", &self.api_url.as_str())
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl WikiClient {
    /// Create a client with a cookie-keeping reqwest transport.
    ///
    /// ```ignore
    /// let scheduler = RequestScheduler::per_minute(39);
    /// let client = WikiClient::new("https://example.fandom.com/api.php", DEFAULT_USER_AGENT, scheduler)?;
    /// client.login("Bot@sync", "secret").await?;
    /// ```
    pub fn new(
        api_url: &str,
        user_agent: &str,
        scheduler: RequestScheduler,
    ) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::with_session(user_agent, REQUEST_TIMEOUT)?;
        Self::new_with_transport(api_url, scheduler, Arc::new(transport))
    }

    pub fn new_with_transport(
        api_url: &str,
        scheduler: RequestScheduler,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            transport,
            scheduler,
            api_url: Url::parse(api_url)?,
            csrf_token: Arc::new(Mutex::new(None)),
            summary: DEFAULT_SUMMARY.to_string(),
        })
    }

    /// Set the summary attached to edits and uploads.
    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn api_url(&self) -> &str {
        self.api_url.as_str()
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn scheduler(&self) -> &RequestScheduler {
        &self.scheduler
    }

    fn query_url(&self, params: &[(&str, &str)]) -> String {
        let mut url = self.api_url.clone();
        url.query_pairs_mut()
            .extend_pairs(params)
            .append_pair("format", "json")
            .append_pair("formatversion", "2");
        url.into()
    }

    fn form_request(&self, params: &[(&str, &str)]) -> HttpRequest {
        let mut pairs = vec![("format", "json"), ("formatversion", "2")];
        pairs.extend_from_slice(params);
        HttpRequest::post(self.api_url.as_str(), FORM_URLENCODED, encode_form(&pairs))
    }

    /// Send `request` through the scheduler and check the HTTP status.
    async fn dispatch(
        &self,
        priority: Priority,
        request: HttpRequest,
    ) -> Result<HttpResponse, ApiError> {
        let transport = Arc::clone(&self.transport);
        let url = request.url.clone();
        let response = self
            .scheduler
            .schedule(priority, move || async move { transport.send(request).await })
            .await??;

        if !response.is_success() {
            return Err(ApiError::Status {
                status: response.status,
                url,
            });
        }
        Ok(response)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        priority: Priority,
        request: HttpRequest,
    ) -> Result<T, ApiError> {
        let response = self.dispatch(priority, request).await?;
        parse_response(&response.body)
    }

    /// Log in with a bot password. Session cookies are kept by the transport.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let url = self.query_url(&[("action", "query"), ("meta", "tokens"), ("type", "login")]);
        let tokens: TokensResponse = self.call(Priority::High, HttpRequest::get(url)).await?;
        let login_token = tokens
            .query
            .tokens
            .logintoken
            .ok_or_else(|| ApiError::LoginFailed("response carries no login token".to_string()))?;

        let request = self.form_request(&[
            ("action", "login"),
            ("lgname", username),
            ("lgpassword", password),
            ("lgtoken", login_token.as_str()),
        ]);
        let response: LoginResponse = self.call(Priority::High, request).await?;
        if response.login.result != "Success" {
            return Err(ApiError::LoginFailed(
                response.login.reason.unwrap_or(response.login.result),
            ));
        }

        // A token fetched before login belongs to the anonymous session.
        self.invalidate_token();
        tracing::info!(
            user = response.login.lgusername.as_deref().unwrap_or(username),
            "Logged in"
        );
        Ok(())
    }

    fn token_slot(&self) -> MutexGuard<'_, Option<String>> {
        self.csrf_token.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The cached CSRF token, fetching one at high priority if none is cached.
    pub async fn csrf_token(&self) -> Result<String, ApiError> {
        let cached = self.token_slot().clone();
        if let Some(token) = cached {
            return Ok(token);
        }

        let url = self.query_url(&[("action", "query"), ("meta", "tokens")]);
        let tokens: TokensResponse = self.call(Priority::High, HttpRequest::get(url)).await?;
        let token = tokens.query.tokens.csrftoken.ok_or_else(|| ApiError::Rejected {
            action: "token request".to_string(),
            detail: "response carries no csrftoken".to_string(),
        })?;

        *self.token_slot() = Some(token.clone());
        tracing::debug!("Fetched CSRF token");
        Ok(token)
    }

    /// Drop the cached token; the next write fetches a fresh one.
    pub fn invalidate_token(&self) {
        self.token_slot().take();
    }

    /// Run a token-bearing write, refreshing the token once if it is rejected.
    async fn authenticated<T, F>(&self, action: &str, build: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn(&str) -> HttpRequest + Send + Sync,
    {
        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            let token = self.csrf_token().await?;
            match self.call(Priority::Medium, build(&token)).await {
                Err(err) if err.is_bad_token() => {
                    self.invalidate_token();
                    tracing::debug!(action, attempt, "Token rejected, refreshing");
                }
                result => return result,
            }
        }

        tracing::warn!(action, "Token rejected again after refresh");
        Err(ApiError::AuthorizationExpired {
            action: action.to_string(),
        })
    }

    /// Create or replace a page.
    pub async fn edit_page(&self, title: &str, text: &str) -> Result<WriteOutcome, ApiError> {
        let response: EditResponse = self
            .authenticated("edit", |token| {
                self.form_request(&[
                    ("action", "edit"),
                    ("title", title),
                    ("text", text),
                    ("summary", self.summary.as_str()),
                    ("bot", "1"),
                    ("token", token),
                ])
            })
            .await?;

        let edit = response.edit;
        if edit.result != "Success" {
            return Err(ApiError::Rejected {
                action: format!("edit of {title}"),
                detail: edit.result,
            });
        }
        Ok(if edit.nochange {
            WriteOutcome::Unchanged
        } else {
            WriteOutcome::Written
        })
    }

    /// Upload a file, overwriting any existing revision.
    ///
    /// `text` becomes the file page content when the file is new.
    pub async fn upload_file(
        &self,
        file_name: &str,
        bytes: &[u8],
        mime: &str,
        text: Option<&str>,
    ) -> Result<WriteOutcome, ApiError> {
        let result: Result<UploadResponse, ApiError> = self
            .authenticated("upload", |token| {
                let mut form = Multipart::new()
                    .text("format", "json")
                    .text("formatversion", "2")
                    .text("action", "upload")
                    .text("filename", file_name)
                    .text("comment", &self.summary)
                    .text("ignorewarnings", "1");
                if let Some(text) = text {
                    form = form.text("text", text);
                }
                let (content_type, body) = form
                    .text("token", token)
                    .file("file", file_name, mime, bytes)
                    .finish();
                HttpRequest::post(self.api_url.as_str(), content_type, body)
            })
            .await;

        match result {
            Ok(response) if response.upload.result == "Success" => Ok(WriteOutcome::Written),
            Ok(response) => Err(ApiError::Rejected {
                action: format!("upload of {file_name}"),
                detail: response
                    .upload
                    .warnings
                    .map(|w| w.to_string())
                    .unwrap_or(response.upload.result),
            }),
            Err(err) if err.code() == Some(FILE_UNCHANGED) => Ok(WriteOutcome::Unchanged),
            Err(err) => Err(err),
        }
    }

    /// Look up current revisions of files. Results follow the server's order.
    pub async fn image_info(&self, file_names: &[&str]) -> Result<Vec<FileStatus>, ApiError> {
        if file_names.is_empty() {
            return Ok(Vec::new());
        }
        let titles = file_names
            .iter()
            .map(|name| file_title(name))
            .collect::<Vec<_>>()
            .join("|");
        let url = self.query_url(&[
            ("action", "query"),
            ("prop", "imageinfo"),
            ("iiprop", "sha1|url"),
            ("titles", titles.as_str()),
        ]);

        let response: ImageInfoResponse = self.call(Priority::Medium, HttpRequest::get(url)).await?;
        Ok(response
            .query
            .map(|q| q.pages.into_iter().map(FileStatus::from).collect())
            .unwrap_or_default())
    }

    /// Current revision of one file, or `None` if it does not exist.
    pub async fn file_info(&self, file_name: &str) -> Result<Option<FileInfo>, ApiError> {
        Ok(self
            .image_info(&[file_name])
            .await?
            .into_iter()
            .next()
            .and_then(|status| status.info))
    }

    /// Download a file revision and verify it against its advertised SHA-1.
    pub async fn download(&self, info: &FileInfo) -> Result<Vec<u8>, ApiError> {
        let response = self
            .dispatch(Priority::Medium, HttpRequest::get(&info.url))
            .await?;

        let actual = hex::encode(Sha1::digest(&response.body));
        if actual != info.sha1 {
            return Err(ApiError::ChecksumMismatch {
                file: info.title.clone(),
                expected: info.sha1.clone(),
                actual,
            });
        }
        Ok(response.body)
    }
}

fn file_title(name: &str) -> String {
    if name.starts_with("File:") {
        name.to_string()
    } else {
        format!("File:{name}")
    }
}

/// Decode an API payload, turning an `error` member into [`ApiError::Remote`].
fn parse_response<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    let mut value: serde_json::Value = serde_json::from_slice(body)?;
    if let Some(error) = value.get_mut("error").map(serde_json::Value::take) {
        let error: ErrorBody = serde_json::from_value(error)?;
        return Err(ApiError::Remote {
            code: error.code,
            info: error.info,
        });
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpMethod, MockTransport};
    use serde_json::json;
    use std::time::Duration;

    const API: &str = "https://wiki.test/api.php";

    fn client(transport: &MockTransport) -> WikiClient {
        WikiClient::new_with_transport(
            API,
            RequestScheduler::new(Duration::from_millis(10)),
            Arc::new(transport.clone()),
        )
        .unwrap()
    }

    fn token_url(client: &WikiClient) -> String {
        client.query_url(&[("action", "query"), ("meta", "tokens")])
    }

    fn push_csrf(transport: &MockTransport, client: &WikiClient, token: &str) {
        transport.push_json(
            HttpMethod::Get,
            token_url(client),
            json!({"query": {"tokens": {"csrftoken": token}}}),
        );
    }

    fn push_post(transport: &MockTransport, body: serde_json::Value) {
        transport.push_json(HttpMethod::Post, API, body);
    }

    fn bad_token() -> serde_json::Value {
        json!({"error": {"code": "badtoken", "info": "Invalid CSRF token."}})
    }

    fn posts(transport: &MockTransport) -> Vec<String> {
        transport
            .requests()
            .into_iter()
            .filter(|r| r.method == HttpMethod::Post)
            .map(|r| String::from_utf8_lossy(&r.body).into_owned())
            .collect()
    }

    #[test]
    fn query_url_appends_format_parameters() {
        let transport = MockTransport::new();
        let client = client(&transport);
        assert_eq!(
            token_url(&client),
            "https://wiki.test/api.php?action=query&meta=tokens&format=json&formatversion=2"
        );
    }

    #[test]
    fn parse_response_surfaces_error_member() {
        let err = parse_response::<serde_json::Value>(
            br#"{"error":{"code":"permissiondenied","info":"no"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Remote { ref code, .. } if code == "permissiondenied"));

        let err = parse_response::<serde_json::Value>(b"<html>").unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn login_clears_token_and_reports_failure() {
        let transport = MockTransport::new();
        let client = client(&transport);
        let login_url = client.query_url(&[("action", "query"), ("meta", "tokens"), ("type", "login")]);

        *client.token_slot() = Some("anonymous".to_string());
        transport.push_json(
            HttpMethod::Get,
            login_url.clone(),
            json!({"query": {"tokens": {"logintoken": "L+\\"}}}),
        );
        push_post(&transport, json!({"login": {"result": "Success", "lgusername": "Bot"}}));

        client.login("Bot@sync", "secret").await.unwrap();
        assert!(client.token_slot().is_none());

        let login_body = &posts(&transport)[0];
        assert!(login_body.contains("action=login"));
        assert!(login_body.contains("lgname=Bot%40sync"));
        assert!(login_body.contains("lgtoken=L%2B%5C"));

        transport.push_json(
            HttpMethod::Get,
            login_url,
            json!({"query": {"tokens": {"logintoken": "L"}}}),
        );
        push_post(&transport, json!({"login": {"result": "Failed", "reason": "Incorrect password"}}));
        let err = client.login("Bot@sync", "wrong").await.unwrap_err();
        assert!(matches!(err, ApiError::LoginFailed(ref r) if r == "Incorrect password"));
    }

    #[tokio::test(start_paused = true)]
    async fn csrf_token_is_cached() {
        let transport = MockTransport::new();
        let client = client(&transport);
        push_csrf(&transport, &client, "t1");

        assert_eq!(client.csrf_token().await.unwrap(), "t1");
        assert_eq!(client.csrf_token().await.unwrap(), "t1");
        assert_eq!(transport.requests().len(), 1);

        client.invalidate_token();
        push_csrf(&transport, &client, "t2");
        assert_eq!(client.csrf_token().await.unwrap(), "t2");
    }

    #[tokio::test(start_paused = true)]
    async fn write_retries_once_with_fresh_token() {
        let transport = MockTransport::new();
        let client = client(&transport);
        push_csrf(&transport, &client, "stale");
        push_csrf(&transport, &client, "fresh");
        push_post(&transport, bad_token());
        push_post(&transport, json!({"edit": {"result": "Success", "newrevid": 2}}));

        let outcome = client.edit_page("Module:X", "return {}").await.unwrap();
        assert_eq!(outcome, WriteOutcome::Written);

        let bodies = posts(&transport);
        assert_eq!(bodies.len(), 2);
        assert!(bodies[0].contains("token=stale"));
        assert!(bodies[1].contains("token=fresh"));
        assert!(bodies[1].ends_with("token=fresh"));
        assert_eq!(client.token_slot().as_deref(), Some("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn second_token_rejection_is_terminal() {
        let transport = MockTransport::new();
        let client = client(&transport);
        push_csrf(&transport, &client, "a");
        push_csrf(&transport, &client, "b");
        push_post(&transport, bad_token());
        push_post(&transport, bad_token());

        let err = client.edit_page("Module:X", "x").await.unwrap_err();
        assert!(matches!(err, ApiError::AuthorizationExpired { ref action } if action == "edit"));
        assert_eq!(posts(&transport).len(), 2);
        assert!(client.token_slot().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn other_api_errors_are_not_retried() {
        let transport = MockTransport::new();
        let client = client(&transport);
        push_csrf(&transport, &client, "t");
        push_post(
            &transport,
            json!({"error": {"code": "protectedpage", "info": "This page is protected."}}),
        );

        let err = client.edit_page("Module:X", "x").await.unwrap_err();
        assert_eq!(err.code(), Some("protectedpage"));
        assert_eq!(posts(&transport).len(), 1);
        assert_eq!(client.token_slot().as_deref(), Some("t"));
    }

    #[tokio::test(start_paused = true)]
    async fn edit_nochange_is_unchanged() {
        let transport = MockTransport::new();
        let client = client(&transport);
        push_csrf(&transport, &client, "t");
        push_post(&transport, json!({"edit": {"result": "Success", "nochange": true}}));

        let outcome = client.edit_page("Module:X", "same").await.unwrap();
        assert_eq!(outcome, WriteOutcome::Unchanged);
    }

    #[tokio::test(start_paused = true)]
    async fn upload_sends_multipart_and_maps_duplicate_to_unchanged() {
        let transport = MockTransport::new();
        let client = client(&transport).with_summary("sync run");
        push_csrf(&transport, &client, "t");
        push_post(&transport, json!({"upload": {"result": "Success", "filename": "A.jpeg"}}));
        push_post(
            &transport,
            json!({"error": {"code": "fileexists-no-change", "info": "duplicate"}}),
        );

        let first = client
            .upload_file("A.jpeg", b"jpeg bytes", "image/jpeg", Some("[[Category:Icons]]"))
            .await
            .unwrap();
        assert_eq!(first, WriteOutcome::Written);

        let second = client
            .upload_file("A.jpeg", b"jpeg bytes", "image/jpeg", None)
            .await
            .unwrap();
        assert_eq!(second, WriteOutcome::Unchanged);

        let requests: Vec<HttpRequest> = transport
            .requests()
            .into_iter()
            .filter(|r| r.method == HttpMethod::Post)
            .collect();
        let content_type = crate::http::header_get(&requests[0].headers, "content-type").unwrap();
        assert!(content_type.starts_with("multipart/form-data; boundary="));

        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("filename=\"A.jpeg\""));
        assert!(body.contains("Content-Type: image/jpeg"));
        assert!(body.contains("[[Category:Icons]]"));
        assert!(body.contains("sync run"));
        assert!(!String::from_utf8_lossy(&requests[1].body).contains("name=\"text\""));
    }

    #[tokio::test(start_paused = true)]
    async fn upload_warning_is_rejected() {
        let transport = MockTransport::new();
        let client = client(&transport);
        push_csrf(&transport, &client, "t");
        push_post(
            &transport,
            json!({"upload": {"result": "Warning", "warnings": {"duplicate": ["B.jpeg"]}}}),
        );

        let err = client
            .upload_file("A.jpeg", b"x", "image/jpeg", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Rejected { ref detail, .. } if detail.contains("duplicate")));
    }

    #[tokio::test(start_paused = true)]
    async fn image_info_and_verified_download() {
        let transport = MockTransport::new();
        let client = client(&transport);
        let info_url = client.query_url(&[
            ("action", "query"),
            ("prop", "imageinfo"),
            ("iiprop", "sha1|url"),
            ("titles", "File:Lock.png"),
        ]);
        transport.push_json(
            HttpMethod::Get,
            info_url,
            json!({"query": {"pages": [{
                "title": "File:Lock.png",
                "imageinfo": [{
                    "sha1": "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d",
                    "url": "https://img.test/Lock.png"
                }]
            }]}}),
        );
        transport.push_response(
            HttpMethod::Get,
            "https://img.test/Lock.png",
            HttpResponse {
                status: 200,
                headers: vec![],
                body: b"hello".to_vec(),
            },
        );
        transport.push_response(
            HttpMethod::Get,
            "https://img.test/Lock.png",
            HttpResponse {
                status: 200,
                headers: vec![],
                body: b"tampered".to_vec(),
            },
        );

        let info = client.file_info("Lock.png").await.unwrap().expect("file exists");
        assert_eq!(info.url, "https://img.test/Lock.png");

        assert_eq!(client.download(&info).await.unwrap(), b"hello");
        let err = client.download(&info).await.unwrap_err();
        assert!(matches!(err, ApiError::ChecksumMismatch { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_file_is_none() {
        let transport = MockTransport::new();
        let client = client(&transport);
        let info_url = client.query_url(&[
            ("action", "query"),
            ("prop", "imageinfo"),
            ("iiprop", "sha1|url"),
            ("titles", "File:Lock.png"),
        ]);
        transport.push_json(
            HttpMethod::Get,
            info_url,
            json!({"query": {"pages": [{"title": "File:Lock.png", "missing": true}]}}),
        );

        assert_eq!(client.file_info("File:Lock.png").await.unwrap(), None);
        assert!(client.image_info(&[]).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn server_errors_surface_as_status() {
        let transport = MockTransport::new();
        let client = client(&transport);
        transport.push_response(
            HttpMethod::Get,
            token_url(&client),
            HttpResponse {
                status: 503,
                headers: vec![],
                body: Vec::new(),
            },
        );

        let err = client.csrf_token().await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 503, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn token_requests_overtake_queued_reads() {
        let transport = MockTransport::new();
        let client = client(&transport);
        let scheduler = client.scheduler().clone();

        // The first dispatch starts the tick; both calls queue before the next one.
        scheduler.schedule(Priority::Low, || async {}).await.unwrap();
        let read = {
            let client = client.clone();
            tokio::spawn(async move { client.file_info("A.png").await })
        };
        let token = {
            let client = client.clone();
            tokio::spawn(async move { client.csrf_token().await })
        };

        let _ = read.await;
        let _ = token.await;

        let urls: Vec<String> = transport.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].contains("meta=tokens"), "{urls:?}");
        assert!(urls[1].contains("prop=imageinfo"), "{urls:?}");
    }
}
