//! Remote agent service client.
//!
//! [`AgentService`] is the seam between the orchestrator and the multi-agent
//! backend. [`HttpAgentService`] speaks the backend's HTTP protocol:
//!
//! - `POST {base}/apps/{app}/users/{user}/sessions` with `{}` returns `{"id": ...}`
//! - `POST {base}/run` with the instruction returns an array of events
//!
//! Any non-success status, timeout, or undecodable body is a
//! [`CoreError::Transport`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::config::RemoteConfig;
use crate::error::CoreError;
use crate::extract::AgentEvent;

/// Longest response body excerpt kept in a transport error.
const ERROR_BODY_LIMIT: usize = 512;

/// The remote multi-agent service, as seen by the orchestrator.
#[async_trait]
pub trait AgentService: Send + Sync + fmt::Debug {
    /// Identifier of the user the service acts for.
    fn user_id(&self) -> &str;

    /// Create a remote session and return its opaque id.
    async fn create_session(&self) -> Result<String, CoreError>;

    /// Send one instruction within a session and return the response events.
    async fn run(&self, session_id: &str, instruction: &str)
    -> Result<Vec<AgentEvent>, CoreError>;
}

#[derive(Debug, Deserialize)]
struct SessionCreated {
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunRequest<'a> {
    app_name: &'a str,
    user_id: &'a str,
    session_id: &'a str,
    new_message: NewMessage<'a>,
}

#[derive(Debug, Serialize)]
struct NewMessage<'a> {
    role: &'static str,
    parts: [MessagePart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct MessagePart<'a> {
    text: &'a str,
}

/// [`AgentService`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAgentService {
    client: reqwest::Client,
    remote: RemoteConfig,
}

impl HttpAgentService {
    /// Create a client for `remote`, applying its request timeout.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Transport` if the HTTP client cannot be built.
    pub fn new(remote: RemoteConfig) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(remote.timeout())
            .build()
            .map_err(|e| CoreError::Transport {
                operation: "build http client",
                status: None,
                message: e.to_string(),
            })?;
        Ok(Self { client, remote })
    }

    /// Returns the remote settings in use.
    pub fn remote(&self) -> &RemoteConfig {
        &self.remote
    }

    fn base_url(&self) -> &str {
        self.remote.base_url.trim_end_matches('/')
    }

    fn sessions_url(&self) -> String {
        format!(
            "{}/apps/{}/users/{}/sessions",
            self.base_url(),
            self.remote.app_name,
            self.remote.user_id
        )
    }

    fn run_url(&self) -> String {
        format!("{}/run", self.base_url())
    }

    /// POST `body` as JSON and decode a JSON response.
    async fn post_json<B, T>(
        &self,
        operation: &'static str,
        url: &str,
        body: &B,
    ) -> Result<T, CoreError>
    where
        B: Serialize + ?Sized,
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(operation, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(operation, status = status.as_u16(), "remote call rejected");
            return Err(CoreError::Transport {
                operation,
                status: Some(status.as_u16()),
                message: excerpt(&body),
            });
        }

        response.json::<T>().await.map_err(|e| CoreError::Transport {
            operation,
            status: Some(status.as_u16()),
            message: format!("invalid response body: {e}"),
        })
    }
}

#[async_trait]
impl AgentService for HttpAgentService {
    fn user_id(&self) -> &str {
        &self.remote.user_id
    }

    #[instrument(skip(self), fields(app = %self.remote.app_name))]
    async fn create_session(&self) -> Result<String, CoreError> {
        let created: SessionCreated = self
            .post_json("create session", &self.sessions_url(), &serde_json::json!({}))
            .await?;
        debug!(session_id = %created.id, "remote session created");
        Ok(created.id)
    }

    #[instrument(skip(self, instruction), fields(instruction_len = instruction.len()))]
    async fn run(
        &self,
        session_id: &str,
        instruction: &str,
    ) -> Result<Vec<AgentEvent>, CoreError> {
        let request = RunRequest {
            app_name: &self.remote.app_name,
            user_id: &self.remote.user_id,
            session_id,
            new_message: NewMessage {
                role: "user",
                parts: [MessagePart { text: instruction }],
            },
        };
        let events: Vec<AgentEvent> = self.post_json("run", &self.run_url(), &request).await?;
        debug!(events = events.len(), "remote run finished");
        Ok(events)
    }
}

fn transport_error(operation: &'static str, e: &reqwest::Error) -> CoreError {
    let message = if e.is_timeout() {
        format!("request timed out: {e}")
    } else {
        e.to_string()
    };
    error!(operation, error = %message, "remote call failed");
    CoreError::Transport {
        operation,
        status: e.status().map(|s| s.as_u16()),
        message,
    }
}

fn excerpt(body: &str) -> String {
    let body = body.trim();
    if body.len() <= ERROR_BODY_LIMIT {
        return body.to_owned();
    }
    let mut end = ERROR_BODY_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    /// Accept one connection, answer it, and return the raw request.
    async fn serve_once(
        status: u16,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = listener.local_addr().expect("should have addr");
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("should accept");
            let request = read_request(&mut stream).await;
            let response = format!(
                "HTTP/1.1 {status} Status\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream
                .write_all(response.as_bytes())
                .await
                .expect("should write response");
            let _ = stream.shutdown().await;
            request
        });
        (format!("http://{addr}"), handle)
    }

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0_u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.expect("should read");
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn service(base_url: String) -> HttpAgentService {
        HttpAgentService::new(RemoteConfig {
            base_url,
            timeout_secs: 5,
            ..Default::default()
        })
        .expect("should build client")
    }

    #[test]
    fn test_should_build_endpoint_urls() {
        let svc = service("http://localhost:8000/".to_owned());
        assert_eq!(
            svc.sessions_url(),
            "http://localhost:8000/apps/manager/users/user_123/sessions"
        );
        assert_eq!(svc.run_url(), "http://localhost:8000/run");
        assert_eq!(svc.user_id(), "user_123");
    }

    #[test]
    fn test_should_serialize_run_request() {
        let request = RunRequest {
            app_name: "manager",
            user_id: "user_123",
            session_id: "s-1",
            new_message: NewMessage {
                role: "user",
                parts: [MessagePart { text: "hello" }],
            },
        };
        let value = serde_json::to_value(&request).expect("should serialize");
        assert_eq!(
            value,
            serde_json::json!({
                "appName": "manager",
                "userId": "user_123",
                "sessionId": "s-1",
                "newMessage": {"role": "user", "parts": [{"text": "hello"}]}
            })
        );
    }

    #[test]
    fn test_should_truncate_long_error_bodies() {
        let long = "é".repeat(ERROR_BODY_LIMIT);
        let short = excerpt(&long);
        assert!(short.ends_with("..."));
        assert!(short.len() <= ERROR_BODY_LIMIT + 3);
        assert_eq!(excerpt("  oops "), "oops");
    }

    #[tokio::test]
    async fn test_should_create_session() {
        let (base, server) = serve_once(200, r#"{"id":"abc-123","state":{}}"#).await;
        let id = service(base).create_session().await.expect("should create");
        assert_eq!(id, "abc-123");

        let request = server.await.expect("server should finish");
        assert!(request.starts_with("POST /apps/manager/users/user_123/sessions "));
        assert!(request.ends_with("{}"));
    }

    #[tokio::test]
    async fn test_should_post_instruction_and_decode_events() {
        let (base, server) = serve_once(
            200,
            r#"[{"author":"manager","content":{"role":"model","parts":[{"text":"A-roll Video URL: https://cdn/a.mp4"}]}}]"#,
        )
        .await;
        let events = service(base)
            .run("s-1", "Run aroll")
            .await
            .expect("should run");
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].texts().collect::<Vec<_>>(),
            vec!["A-roll Video URL: https://cdn/a.mp4"]
        );

        let request = server.await.expect("server should finish");
        assert!(request.starts_with("POST /run "));
        assert!(request.contains(r#""sessionId":"s-1""#));
        assert!(request.contains(r#""text":"Run aroll""#));
    }

    #[tokio::test]
    async fn test_should_map_error_status_to_transport() {
        let (base, _server) = serve_once(500, r#"{"detail":"boom"}"#).await;
        let err = service(base)
            .run("s-1", "Run market agent")
            .await
            .expect_err("should fail");
        match err {
            CoreError::Transport {
                operation,
                status,
                message,
            } => {
                assert_eq!(operation, "run");
                assert_eq!(status, Some(500));
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_should_map_unexpected_body_to_transport() {
        let (base, _server) = serve_once(200, r#"{"not":"a list"}"#).await;
        let err = service(base)
            .run("s-1", "Run script agent")
            .await
            .expect_err("should fail");
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_should_time_out_slow_service() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = listener.local_addr().expect("should have addr");
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("should accept");
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            drop(stream);
        });

        let svc = HttpAgentService::new(RemoteConfig {
            base_url: format!("http://{addr}"),
            timeout_secs: 1,
            ..Default::default()
        })
        .expect("should build client");

        let err = svc.create_session().await.expect_err("should time out");
        assert!(err.is_transport());
        assert!(err.to_string().contains("timed out"), "got: {err}");
    }

    #[tokio::test]
    async fn test_should_fail_on_unreachable_service() {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = listener.local_addr().expect("should have addr");
        drop(listener);

        let err = service(format!("http://{addr}"))
            .create_session()
            .await
            .expect_err("should fail");
        assert!(err.is_transport());
    }
}
