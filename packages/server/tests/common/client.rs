//! In-process API client for integration tests.
//!
//! Drives the real router (auth middleware included) without binding a
//! socket, one `oneshot` per request.

use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

pub struct ApiClient {
    app: Router,
}

/// A JSON response: status plus parsed body (Null when the body is empty).
#[derive(Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// A raw response, for non-JSON endpoints like artifact fetch.
#[derive(Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub bytes: Vec<u8>,
}

impl ApiClient {
    pub fn new(app: Router) -> Self {
        Self { app }
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> ApiResponse {
        self.request(Method::GET, path, token, None, None).await
    }

    pub async fn post(&self, path: &str, token: Option<&str>, body: Option<Value>) -> ApiResponse {
        self.request(Method::POST, path, token, None, body).await
    }

    pub async fn post_with_lease(
        &self,
        path: &str,
        token: Option<&str>,
        lease: &str,
        body: Option<Value>,
    ) -> ApiResponse {
        self.request(Method::POST, path, token, Some(lease), body)
            .await
    }

    pub async fn get_raw(
        &self,
        path: &str,
        token: Option<&str>,
        lease: Option<&str>,
    ) -> RawResponse {
        let response = self
            .send(Method::GET, path, token, lease, None)
            .await;

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read response body")
            .to_vec();

        RawResponse {
            status,
            headers,
            bytes,
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        lease: Option<&str>,
        body: Option<Value>,
    ) -> ApiResponse {
        let response = self.send(method, path, token, lease, body).await;

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read response body");

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };

        ApiResponse { status, body }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        lease: Option<&str>,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(path);

        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        if let Some(lease) = lease {
            builder = builder.header("x-lease-token", lease);
        }

        let request = match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string()))
                .expect("failed to build request"),
            None => builder.body(Body::empty()).expect("failed to build request"),
        };

        self.app
            .clone()
            .oneshot(request)
            .await
            .expect("request failed")
    }
}
