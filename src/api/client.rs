use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use super::Backend;
use crate::config::ServerConfig;
use crate::core::errors::FetchError;
use crate::core::models::Role;
use crate::core::session::Session;

/// REST client for the scan platform's `/api/v1` surface.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct CreateTaskRequest<'a> {
    target: &'a str,
    template: &'a str,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    username: &'a str,
    password: &'a str,
    role: &'a str,
}

#[derive(Serialize)]
struct RoleUpdate<'a> {
    role: &'a str,
}

#[derive(Serialize)]
struct PasswordReset<'a> {
    password: &'a str,
}

impl HttpBackend {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str, session: Option<&Session>) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match session {
            Some(session) => builder.header(reqwest::header::AUTHORIZATION, session.bearer()),
            None => builder,
        }
    }

    /// Send a request and decode its JSON body, classifying failures.
    async fn send(&self, request: RequestBuilder) -> Result<Value, FetchError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let url = response.url().path().to_string();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            tracing::debug!("{} answered {}: {}", url, status, body);
            return Err(FetchError::from_status(status.as_u16(), error_message(&body, status)));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body)
            .map_err(|e| FetchError::Network(format!("undecodable response from {}: {}", url, e)))
    }

    async fn get_records(&self, session: &Session, path: &str) -> Result<Vec<Value>, FetchError> {
        tracing::debug!("GET {}", path);
        let body = self.send(self.request(Method::GET, path, Some(session))).await?;
        into_records(body, path)
    }

    /// `POST /auth/login`, returning the issued token.
    pub async fn login(&self, username: &str, password: &str) -> Result<String, FetchError> {
        let request = self
            .request(Method::POST, "auth/login", None)
            .json(&LoginRequest { username, password });
        let body = self.send(request).await?;

        Ok(body
            .get("token")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// `GET /user/info` using a freshly issued token.
    pub async fn user_info(&self, token: &str) -> Result<Value, FetchError> {
        let request = self
            .request(Method::GET, "user/info", None)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", token));
        self.send(request).await
    }

    pub async fn logout(&self, session: &Session) -> Result<(), FetchError> {
        self.send(self.request(Method::POST, "auth/logout", Some(session)))
            .await
            .map(|_| ())
    }

    /// `POST /tasks`, returning the new task id when the server reports one.
    pub async fn create_task(&self, session: &Session, target: &str, template: &str) -> Result<Option<u64>, FetchError> {
        let request = self
            .request(Method::POST, "tasks", Some(session))
            .json(&CreateTaskRequest { target, template });
        let body = self.send(request).await?;

        Ok(body
            .get("task_id")
            .or_else(|| body.get("taskId"))
            .and_then(Value::as_u64))
    }

    pub async fn delete_task(&self, session: &Session, task_id: u64) -> Result<(), FetchError> {
        let path = format!("tasks/{}", task_id);
        self.send(self.request(Method::DELETE, &path, Some(session)))
            .await
            .map(|_| ())
    }

    /// `GET /tasks/{id}`: one task record.
    pub async fn task_detail(&self, session: &Session, task_id: u64) -> Result<Value, FetchError> {
        self.get_object(session, &format!("tasks/{}", task_id)).await
    }

    /// `GET /results/{id}`: one finding record.
    pub async fn finding_detail(&self, session: &Session, finding_id: u64) -> Result<Value, FetchError> {
        self.get_object(session, &format!("results/{}", finding_id)).await
    }

    /// `GET /results/export/{task_id}`: `{task_id, results}` document.
    pub async fn export_findings(&self, session: &Session, task_id: u64) -> Result<Value, FetchError> {
        self.get_object(session, &format!("results/export/{}", task_id)).await
    }

    pub async fn list_users(&self, session: &Session) -> Result<Vec<Value>, FetchError> {
        self.get_records(session, "admin/users").await
    }

    /// `POST /auth/register` on behalf of an admin.
    pub async fn register_user(&self, session: &Session, username: &str, password: &str, role: Role) -> Result<(), FetchError> {
        let request = self
            .request(Method::POST, "auth/register", Some(session))
            .json(&RegisterRequest { username, password, role: role.as_str() });
        self.send(request).await.map(|_| ())
    }

    pub async fn delete_user(&self, session: &Session, user_id: u64) -> Result<(), FetchError> {
        let path = format!("admin/users/{}", user_id);
        self.send(self.request(Method::DELETE, &path, Some(session)))
            .await
            .map(|_| ())
    }

    /// `PUT /admin/users/{id}` with the new role.
    pub async fn update_user_role(&self, session: &Session, user_id: u64, role: Role) -> Result<(), FetchError> {
        let path = format!("admin/users/{}", user_id);
        let request = self
            .request(Method::PUT, &path, Some(session))
            .json(&RoleUpdate { role: role.as_str() });
        self.send(request).await.map(|_| ())
    }

    /// `PUT /admin/users/{id}/password`.
    pub async fn reset_user_password(&self, session: &Session, user_id: u64, password: &str) -> Result<(), FetchError> {
        let path = format!("admin/users/{}/password", user_id);
        let request = self
            .request(Method::PUT, &path, Some(session))
            .json(&PasswordReset { password });
        self.send(request).await.map(|_| ())
    }

    async fn get_object(&self, session: &Session, path: &str) -> Result<Value, FetchError> {
        tracing::debug!("GET {}", path);
        match self.send(self.request(Method::GET, path, Some(session))).await? {
            body @ Value::Object(_) => Ok(body),
            other => Err(FetchError::Network(format!(
                "expected an object from {}, got {}",
                path,
                kind_of(&other)
            ))),
        }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn list_own_tasks(&self, session: &Session) -> Result<Vec<Value>, FetchError> {
        self.get_records(session, "tasks").await
    }

    async fn list_all_tasks(&self, session: &Session) -> Result<Vec<Value>, FetchError> {
        self.get_records(session, "admin/tasks").await
    }

    async fn list_all_findings(&self, session: &Session) -> Result<Vec<Value>, FetchError> {
        self.get_records(session, "admin/results").await
    }

    async fn list_task_findings(&self, session: &Session, task_id: u64) -> Result<Vec<Value>, FetchError> {
        self.get_records(session, &format!("results/task/{}", task_id)).await
    }
}

fn transport_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Network(format!("request timed out: {}", err))
    } else if err.is_decode() {
        FetchError::Network(format!("failed to read response: {}", err))
    } else {
        FetchError::Network(format!("request failed: {}", err))
    }
}

/// Prefer the server's own diagnostic (`{"error": ..}` or `{"message": ..}`).
fn error_message(body: &str, status: StatusCode) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        ["error", "message"]
            .iter()
            .find_map(|key| value.get(key).and_then(Value::as_str).map(str::to_string))
    });

    from_json
        .or_else(|| Some(body.trim().to_string()).filter(|text| !text.is_empty()))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string())
}

/// A list endpoint answers with an array; Go encodes an empty slice as `null`.
fn into_records(body: Value, path: &str) -> Result<Vec<Value>, FetchError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(FetchError::Network(format!(
            "expected a list from {}, got {}",
            path,
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
