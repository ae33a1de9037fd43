//! Blocking client for the wiki's `api.php` endpoint.
//!
//! The client keeps one cookie-backed session for its whole life and caches
//! one token per [`TokenKind`]. Nothing is retried: transport failures and
//! unexpected payloads are returned to the caller as they happen.

use std::collections::HashMap;
use std::fmt;

use reqwest::blocking::{Client, Response, multipart};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::config::SessionConfig;
use crate::error::{Result, ToolError};

const USER_AGENT: &str = concat!("wiki-user-export/", env!("CARGO_PKG_VERSION"));

/// Classes of action tokens the wiki hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Login,
    Csrf,
    UserRights,
    CreateAccount,
}

impl TokenKind {
    /// Value of the `type` parameter in a token query.
    pub fn query_type(self) -> &'static str {
        match self {
            TokenKind::Login => "login",
            TokenKind::Csrf => "csrf",
            TokenKind::UserRights => "userrights",
            TokenKind::CreateAccount => "createaccount",
        }
    }

    /// Key under `query.tokens` holding the token value.
    pub fn response_field(self) -> String {
        format!("{}token", self.query_type())
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.query_type())
    }
}

/// Token returned by [`TokenCache::get_or_fetch`], with whether it hit the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub value: String,
    pub fetched: bool,
}

/// Per-session token store. Entries live until the process exits.
#[derive(Debug, Default)]
pub struct TokenCache {
    tokens: HashMap<TokenKind, String>,
    fetches: usize,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: TokenKind) -> Option<&str> {
        self.tokens.get(&kind).map(String::as_str)
    }

    /// Returns the cached token for `kind`, calling `fetch` only on a miss.
    pub fn get_or_fetch<F>(&mut self, kind: TokenKind, fetch: F) -> Result<CachedToken>
    where
        F: FnOnce(TokenKind) -> Result<String>,
    {
        if let Some(value) = self.tokens.get(&kind) {
            return Ok(CachedToken {
                value: value.clone(),
                fetched: false,
            });
        }

        let value = fetch(kind)?;
        self.fetches += 1;
        self.tokens.insert(kind, value.clone());
        Ok(CachedToken {
            value,
            fetched: true,
        })
    }

    /// Number of fetches performed since the cache was created.
    pub fn fetch_count(&self) -> usize {
        self.fetches
    }
}

/// Account to register through `action=createaccount`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewAccount {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email: String,
}

/// Authenticated session against the wiki API.
pub struct WikiClient {
    http: Client,
    config: SessionConfig,
    tokens: TokenCache,
}

impl WikiClient {
    pub fn new(config: SessionConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .danger_accept_invalid_certs(!config.verify_tls());
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            config,
            tokens: TokenCache::new(),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    /// Returns the session's token of the given kind, querying the wiki on first use.
    pub fn get_token(&mut self, kind: TokenKind) -> Result<String> {
        Ok(self.resolve_token(kind)?.value)
    }

    /// Like [`get_token`](Self::get_token) but reports whether a query was issued.
    pub fn resolve_token(&mut self, kind: TokenKind) -> Result<CachedToken> {
        let http = &self.http;
        let endpoint = self.config.api_endpoint();
        let token = self
            .tokens
            .get_or_fetch(kind, |kind| fetch_token(http, &endpoint, kind))?;
        if token.fetched {
            debug!(%kind, "fetched token");
        }
        Ok(token)
    }

    /// Sends a GET to the API endpoint and parses the JSON reply.
    pub fn get(&self, params: &[(&str, &str)]) -> Result<Value> {
        let endpoint = self.config.api_endpoint();
        let response = self.http.get(&endpoint).query(params).send()?;
        parse_json(response, &endpoint)
    }

    /// Sends a form POST to the API endpoint and parses the JSON reply.
    pub fn post(&self, params: &[(&str, &str)]) -> Result<Value> {
        let endpoint = self.config.api_endpoint();
        let response = self.http.post(&endpoint).form(params).send()?;
        parse_json(response, &endpoint)
    }

    /// Sends a form POST carrying a token of `kind` under `token_param`.
    pub fn post_with_token(
        &mut self,
        kind: TokenKind,
        token_param: &str,
        token: Option<&str>,
        params: &[(&str, &str)],
    ) -> Result<Value> {
        let token = match token {
            Some(token) => token.to_string(),
            None => self.get_token(kind)?,
        };
        let mut body: Vec<(&str, &str)> = params.to_vec();
        body.push((token_param, token.as_str()));
        self.post(&body)
    }

    /// Sends a form POST to an arbitrary wiki URL and returns the raw body.
    pub fn post_form_bytes(&self, url: &str, params: &[(&str, &str)]) -> Result<Vec<u8>> {
        let response = self.http.post(url).form(params).send()?;
        let status = response.status();
        let body = response.bytes()?.to_vec();
        if !status.is_success() {
            return Err(ToolError::MalformedResponse {
                context: format!("{url} (HTTP {status})"),
                payload: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(body)
    }

    /// Performs the `clientlogin` handshake for the configured account.
    #[instrument(level = "info", skip_all, fields(username = %self.config.username()))]
    pub fn login(&mut self, token: Option<&str>, return_uri: Option<&str>) -> Result<Value> {
        let token = match token {
            Some(token) => token.to_string(),
            None => self.get_token(TokenKind::Login)?,
        };
        let return_uri = return_uri.unwrap_or(self.config.uri()).to_string();

        let data = self.post(&[
            ("action", "clientlogin"),
            ("username", self.config.username()),
            ("password", self.config.password()),
            ("loginreturnurl", return_uri.as_str()),
            ("logintoken", token.as_str()),
            ("format", "json"),
        ])?;

        if let Some(error) = data.get("error") {
            return Err(ToolError::Authentication(describe_api_error(error)));
        }

        let login = data.get("clientlogin");
        match login.and_then(|login| login.get("status")).and_then(Value::as_str) {
            Some("PASS") => {
                info!("logged in");
                Ok(data)
            }
            Some(status) => {
                let message = login
                    .and_then(|login| login.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("no message");
                Err(ToolError::Authentication(format!("status {status}: {message}")))
            }
            None => Err(ToolError::Authentication(format!(
                "response has no clientlogin status: {data}"
            ))),
        }
    }

    /// Uploads a file through `action=upload`, guarded by the CSRF token.
    #[instrument(level = "info", skip(self, data, token), fields(bytes = data.len()))]
    pub fn upload(&mut self, name: &str, data: Vec<u8>, token: Option<&str>) -> Result<Value> {
        let token = match token {
            Some(token) => token.to_string(),
            None => self.get_token(TokenKind::Csrf)?,
        };

        let file = multipart::Part::bytes(data)
            .file_name(name.to_string())
            .mime_str("application/octet-stream")?;
        let form = multipart::Form::new()
            .text("action", "upload")
            .text("filename", name.to_string())
            .text("token", token)
            .text("format", "json")
            .text("ignorewarnings", "1")
            .part("file", file);

        let endpoint = self.config.api_endpoint();
        let response = self.http.post(&endpoint).multipart(form).send()?;
        let data = parse_json(response, &endpoint)?;
        debug!(response = %data, "upload answered");
        Ok(data)
    }

    /// Registers a new account through `action=createaccount`.
    #[instrument(level = "info", skip(self, account, token), fields(username = %account.username))]
    pub fn create_account(
        &mut self,
        account: &NewAccount,
        token: Option<&str>,
        return_uri: Option<&str>,
    ) -> Result<Value> {
        let return_uri = return_uri.unwrap_or(self.config.uri()).to_string();
        self.post_with_token(
            TokenKind::CreateAccount,
            "createtoken",
            token,
            &[
                ("action", "createaccount"),
                ("username", account.username.as_str()),
                ("password", account.password.as_str()),
                ("retype", account.password.as_str()),
                ("email", account.email.as_str()),
                ("realname", ""),
                ("createreturnurl", return_uri.as_str()),
                ("format", "json"),
            ],
        )
    }

    /// Adds and removes group memberships through `action=userrights`.
    #[instrument(level = "info", skip(self, token))]
    pub fn change_user_groups(
        &mut self,
        user: &str,
        add: &[&str],
        remove: &[&str],
        token: Option<&str>,
    ) -> Result<Value> {
        let add = add.join("|");
        let remove = remove.join("|");
        let mut params = vec![("action", "userrights"), ("user", user), ("format", "json")];
        if !add.is_empty() {
            params.push(("add", add.as_str()));
        }
        if !remove.is_empty() {
            params.push(("remove", remove.as_str()));
        }
        self.post_with_token(TokenKind::UserRights, "token", token, &params)
    }
}

fn fetch_token(http: &Client, endpoint: &str, kind: TokenKind) -> Result<String> {
    let response = http
        .get(endpoint)
        .query(&[
            ("action", "query"),
            ("meta", "tokens"),
            ("type", kind.query_type()),
            ("format", "json"),
        ])
        .send()?;
    let data = parse_json(response, endpoint)?;

    let field = kind.response_field();
    data.get("query")
        .and_then(|query| query.get("tokens"))
        .and_then(|tokens| tokens.get(&field))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ToolError::Protocol(format!("token response has no {field}: {data}")))
}

fn parse_json(response: Response, context: &str) -> Result<Value> {
    let status = response.status();
    let body = response.text()?;
    serde_json::from_str(&body).map_err(|_| ToolError::MalformedResponse {
        context: format!("{context} (HTTP {status})"),
        payload: body,
    })
}

fn describe_api_error(error: &Value) -> String {
    let code = error.get("code").and_then(Value::as_str).unwrap_or("unknown");
    match error.get("info").and_then(Value::as_str) {
        Some(info) => format!("{code}: {info}"),
        None => code.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client_for(server: &MockServer) -> WikiClient {
        let config = SessionConfig::new(server.base_url(), "/api.php", "Admin", "adminpass")
            .expect("session config");
        WikiClient::new(config).expect("client")
    }

    fn mock_token<'a>(server: &'a MockServer, kind: &str, value: &str) -> httpmock::Mock<'a> {
        let field = format!("{kind}token");
        let value = value.to_string();
        let kind = kind.to_string();
        server.mock(move |when, then| {
            when.method(GET)
                .path("/api.php")
                .query_param("action", "query")
                .query_param("meta", "tokens")
                .query_param("type", kind.as_str())
                .query_param("format", "json");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({ "query": { "tokens": { field: value } } }));
        })
    }

    #[test]
    fn token_cache_fetches_once_per_kind() {
        let mut cache = TokenCache::new();
        let mut calls = 0;

        let first = cache
            .get_or_fetch(TokenKind::Csrf, |_| {
                calls += 1;
                Ok("abc+\\".to_string())
            })
            .expect("first");
        let second = cache
            .get_or_fetch(TokenKind::Csrf, |_| {
                calls += 1;
                Ok("other".to_string())
            })
            .expect("second");

        assert!(first.fetched);
        assert!(!second.fetched);
        assert_eq!(first.value, second.value);
        assert_eq!(calls, 1);
        assert_eq!(cache.fetch_count(), 1);
    }

    #[test]
    fn token_cache_does_not_store_failures() {
        let mut cache = TokenCache::new();
        let error = cache
            .get_or_fetch(TokenKind::Login, |_| Err(ToolError::Protocol("nope".into())))
            .unwrap_err();
        assert!(matches!(error, ToolError::Protocol(_)));
        assert_eq!(cache.get(TokenKind::Login), None);
        assert_eq!(cache.fetch_count(), 0);
    }

    #[test]
    fn token_kinds_map_to_wire_names() {
        assert_eq!(TokenKind::UserRights.response_field(), "userrightstoken");
        assert_eq!(TokenKind::CreateAccount.query_type(), "createaccount");
    }

    #[test]
    fn second_token_lookup_issues_no_query() {
        let server = MockServer::start();
        let token_mock = mock_token(&server, "login", "login-token+\\");
        let mut client = client_for(&server);

        let first = client.resolve_token(TokenKind::Login).expect("first lookup");
        let second = client.resolve_token(TokenKind::Login).expect("second lookup");

        token_mock.assert_calls(1);
        assert!(first.fetched);
        assert!(!second.fetched);
        assert_eq!(first.value, "login-token+\\");
        assert_eq!(first.value, second.value);
    }

    #[test]
    fn missing_token_field_is_a_protocol_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api.php");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({ "query": { "tokens": {} } }));
        });
        let mut client = client_for(&server);

        let error = client.get_token(TokenKind::Csrf).unwrap_err();
        assert!(matches!(error, ToolError::Protocol(_)));
    }

    #[test]
    fn login_resolves_token_and_passes() {
        let server = MockServer::start();
        let token_mock = mock_token(&server, "login", "lt");
        let login_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api.php")
                .form_urlencoded_tuple("action", "clientlogin")
                .form_urlencoded_tuple("username", "Admin")
                .form_urlencoded_tuple("password", "adminpass")
                .form_urlencoded_tuple("logintoken", "lt");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({
                    "clientlogin": { "status": "PASS", "username": "Admin" }
                }));
        });
        let mut client = client_for(&server);

        client.login(None, None).expect("login");

        token_mock.assert_calls(1);
        login_mock.assert();
    }

    #[test]
    fn login_failure_status_is_authentication_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api.php");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({
                    "clientlogin": { "status": "FAIL", "message": "Incorrect password" }
                }));
        });
        let mut client = client_for(&server);

        let error = client.login(Some("lt"), None).unwrap_err();
        match error {
            ToolError::Authentication(message) => assert!(message.contains("Incorrect password")),
            other => panic!("expected an authentication error, got {other:?}"),
        }
    }

    #[test]
    fn login_error_field_is_authentication_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api.php");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({
                    "error": { "code": "badtoken", "info": "Invalid CSRF token." }
                }));
        });
        let mut client = client_for(&server);

        let error = client.login(Some("lt"), None).unwrap_err();
        match error {
            ToolError::Authentication(message) => assert!(message.contains("badtoken")),
            other => panic!("expected an authentication error, got {other:?}"),
        }
    }

    #[test]
    fn unreachable_wiki_is_a_network_error() {
        let config = SessionConfig::new("http://127.0.0.1:1", "/api.php", "Admin", "pw")
            .expect("session config");
        let mut client = WikiClient::new(config).expect("client");

        let error = client.login(Some("lt"), None).unwrap_err();
        assert!(matches!(error, ToolError::Network(_)));
    }

    #[test]
    fn non_json_upload_reply_keeps_payload() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api.php");
            then.status(500).body("<html>Internal error</html>");
        });
        let mut client = client_for(&server);

        let error = client
            .upload("Users.xlsx", b"data".to_vec(), Some("csrf"))
            .unwrap_err();
        assert!(matches!(
            error,
            ToolError::MalformedResponse { ref payload, .. } if payload.contains("Internal error")
        ));
    }

    #[test]
    fn upload_resolves_csrf_token() {
        let server = MockServer::start();
        let token_mock = mock_token(&server, "csrf", "csrf-token");
        let upload_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api.php")
                .body_includes("csrf-token")
                .body_includes("ignorewarnings");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({
                    "upload": { "result": "Success", "filename": "Users.xlsx" }
                }));
        });
        let mut client = client_for(&server);

        let data = client
            .upload("Users.xlsx", b"data".to_vec(), None)
            .expect("upload");

        token_mock.assert_calls(1);
        upload_mock.assert();
        assert_eq!(data["upload"]["result"], "Success");
    }

    #[test]
    fn user_groups_are_pipe_joined() {
        let server = MockServer::start();
        let token_mock = mock_token(&server, "userrights", "ur");
        let rights_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api.php")
                .form_urlencoded_tuple("action", "userrights")
                .form_urlencoded_tuple("user", "FirstBot")
                .form_urlencoded_tuple("add", "bot|sysop")
                .form_urlencoded_tuple("token", "ur");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({ "userrights": { "user": "FirstBot" } }));
        });
        let mut client = client_for(&server);

        client
            .change_user_groups("FirstBot", &["bot", "sysop"], &[], None)
            .expect("userrights");

        token_mock.assert_calls(1);
        rights_mock.assert();
    }

    #[test]
    fn create_account_sends_retype_and_token() {
        let server = MockServer::start();
        let account_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api.php")
                .form_urlencoded_tuple("action", "createaccount")
                .form_urlencoded_tuple("username", "User1")
                .form_urlencoded_tuple("retype", "password")
                .form_urlencoded_tuple("createtoken", "ct");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({ "createaccount": { "status": "PASS" } }));
        });
        let mut client = client_for(&server);
        let account = NewAccount {
            username: "User1".into(),
            password: "password".into(),
            email: "user1@domain.tld".into(),
        };

        client
            .create_account(&account, Some("ct"), None)
            .expect("createaccount");

        account_mock.assert();
    }
}
