//! HTTP executor.
//!
//! An [`HttpEndpoint`] sends one request per execution through a shared
//! `reqwest::Client` and validates the response status. The target is built
//! from an explicit base URL plus a path, so different load tests in the same
//! process can target different hosts.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::errors::{ErrorCategory, ExecutionError};
use crate::executor::{ExecutionResponse, Executor, ExecutorOptions, ExecutorRef};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpEndpointError {
    #[error("endpoint name can't be empty")]
    EmptyName,

    #[error("invalid URL for endpoint '{name}': {message}")]
    InvalidUrl { name: String, message: String },

    #[error("invalid HTTP method '{0}'")]
    InvalidMethod(String),

    #[error("invalid header '{name}': {message}")]
    InvalidHeader { name: String, message: String },
}

/// How a response status is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseValidation {
    /// Any response counts as a success.
    None,

    /// Only 2xx counts as a success.
    #[default]
    Status2xx,

    /// Only this exact status counts as a success.
    ExpectStatus(u16),
}

impl ResponseValidation {
    pub fn check(&self, status: u16) -> Result<(), ExecutionError> {
        let message = match *self {
            ResponseValidation::None => return Ok(()),
            ResponseValidation::Status2xx if (200..300).contains(&status) => return Ok(()),
            ResponseValidation::ExpectStatus(expected) if status == expected => return Ok(()),
            ResponseValidation::Status2xx => format!("non 2xx status code: {}", status),
            ResponseValidation::ExpectStatus(expected) => {
                format!("expected status {}, got {}", expected, status)
            }
        };

        Err(ExecutionError {
            category: ErrorCategory::from_status_code(status).unwrap_or(ErrorCategory::OtherError),
            status_code: Some(status),
            message,
        })
    }
}

/// Joins `path` onto `base` as a path suffix, keeping any path `base` has.
pub fn join_url(base: &Url, path: &str) -> Result<Url, String> {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return Ok(base.clone());
    }
    Url::parse(&format!("{}/{}", base.as_str().trim_end_matches('/'), path))
        .map_err(|e| e.to_string())
}

pub struct HttpEndpoint {
    name: String,
    options: ExecutorOptions,
    client: reqwest::Client,
    url: Url,
    method: Method,
    headers: HeaderMap,
    body: Option<String>,
    basic_auth: Option<(String, Option<String>)>,
    validation: ResponseValidation,
}

impl HttpEndpoint {
    pub fn builder(
        name: impl Into<String>,
        client: reqwest::Client,
        base_url: Url,
    ) -> HttpEndpointBuilder {
        HttpEndpointBuilder {
            name: name.into(),
            options: ExecutorOptions::default(),
            client,
            base_url,
            path: String::new(),
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
            basic_auth: None,
            validation: ResponseValidation::default(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }
}

#[async_trait]
impl Executor for HttpEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> ExecutorOptions {
        self.options
    }

    async fn execute(&self) -> ExecutionResponse {
        let mut request = self
            .client
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone());
        if let Some(body) = &self.body {
            request = request.body(body.clone());
        }
        if let Some((username, password)) = &self.basic_auth {
            request = request.basic_auth(username, password.as_ref());
        }

        match request.send().await {
            Ok(mut response) => {
                let status = response.status().as_u16();

                // Drain the body so the connection can be reused.
                while let Ok(Some(_chunk)) = response.chunk().await {}

                debug!(
                    endpoint = %self.name,
                    url = %self.url,
                    status_code = status,
                    "Request completed"
                );

                let data = json!({ "url": self.url.as_str(), "status": status });
                match self.validation.check(status) {
                    Ok(()) => ExecutionResponse::success(&self.name).with_data(data),
                    Err(e) => ExecutionResponse::failure(&self.name, e).with_data(data),
                }
            }
            Err(e) => {
                let error = ExecutionError::from_reqwest(&e);
                debug!(
                    endpoint = %self.name,
                    url = %self.url,
                    error = %e,
                    error_category = error.category.label(),
                    "Request failed"
                );
                ExecutionResponse::failure(&self.name, error)
                    .with_data(json!({ "url": self.url.as_str() }))
            }
        }
    }
}

pub struct HttpEndpointBuilder {
    name: String,
    options: ExecutorOptions,
    client: reqwest::Client,
    base_url: Url,
    path: String,
    method: String,
    headers: Vec<(String, String)>,
    body: Option<String>,
    basic_auth: Option<(String, Option<String>)>,
    validation: ResponseValidation,
}

impl HttpEndpointBuilder {
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.basic_auth = Some((username.into(), password));
        self
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.options.weight = weight;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn validation(mut self, validation: ResponseValidation) -> Self {
        self.validation = validation;
        self
    }

    pub fn build(self) -> Result<HttpEndpoint, HttpEndpointError> {
        if self.name.is_empty() {
            return Err(HttpEndpointError::EmptyName);
        }

        let url = join_url(&self.base_url, &self.path).map_err(|message| {
            HttpEndpointError::InvalidUrl {
                name: self.name.clone(),
                message,
            }
        })?;

        let method = Method::from_bytes(self.method.trim().to_uppercase().as_bytes())
            .map_err(|_| HttpEndpointError::InvalidMethod(self.method.clone()))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let invalid = |message: String| HttpEndpointError::InvalidHeader {
                name: name.clone(),
                message,
            };
            let header_name =
                HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| invalid(e.to_string()))?;
            let header_value =
                HeaderValue::from_str(value.trim()).map_err(|e| invalid(e.to_string()))?;
            headers.append(header_name, header_value);
        }

        Ok(HttpEndpoint {
            name: self.name,
            options: self.options,
            client: self.client,
            url,
            method,
            headers,
            body: self.body,
            basic_auth: self.basic_auth,
            validation: self.validation,
        })
    }

    pub fn build_ref(self) -> Result<ExecutorRef, HttpEndpointError> {
        Ok(std::sync::Arc::new(self.build()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(url: &str) -> Url {
        Url::parse(url).unwrap()
    }

    #[test]
    fn test_join_url_keeps_base_path() {
        assert_eq!(
            join_url(&base("http://localhost:8080/api"), "/users").unwrap().as_str(),
            "http://localhost:8080/api/users"
        );
        assert_eq!(
            join_url(&base("http://localhost:8080/api/"), "users?page=2")
                .unwrap()
                .as_str(),
            "http://localhost:8080/api/users?page=2"
        );
        assert_eq!(
            join_url(&base("http://localhost:8080"), "").unwrap().as_str(),
            "http://localhost:8080/"
        );
    }

    #[test]
    fn test_validation() {
        assert!(ResponseValidation::Status2xx.check(204).is_ok());

        let err = ResponseValidation::Status2xx.check(302).unwrap_err();
        assert_eq!(err.category, ErrorCategory::OtherError);
        assert_eq!(err.status_code, Some(302));

        let err = ResponseValidation::Status2xx.check(503).unwrap_err();
        assert_eq!(err.category, ErrorCategory::ServerError);

        assert!(ResponseValidation::ExpectStatus(404).check(404).is_ok());
        let err = ResponseValidation::ExpectStatus(201).check(200).unwrap_err();
        assert_eq!(err.message, "expected status 201, got 200");

        assert!(ResponseValidation::None.check(500).is_ok());
    }

    #[test]
    fn test_builder_validation() {
        let client = reqwest::Client::new();
        let root = base("http://localhost");

        assert_eq!(
            HttpEndpoint::builder("", client.clone(), root.clone())
                .build()
                .err(),
            Some(HttpEndpointError::EmptyName)
        );
        assert!(matches!(
            HttpEndpoint::builder("bad", client.clone(), root.clone())
                .method("NOT A METHOD")
                .build(),
            Err(HttpEndpointError::InvalidMethod(_))
        ));
        assert!(matches!(
            HttpEndpoint::builder("bad", client.clone(), root.clone())
                .header("X Bad", "1")
                .build(),
            Err(HttpEndpointError::InvalidHeader { .. })
        ));

        let endpoint = HttpEndpoint::builder("ok", client, root)
            .path("health")
            .method("post")
            .weight(3)
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        assert_eq!(endpoint.method(), &Method::POST);
        assert_eq!(endpoint.url().as_str(), "http://localhost/health");
        assert_eq!(endpoint.options().weight, 3);
        assert_eq!(endpoint.options().timeout, Some(Duration::from_secs(2)));
    }
}
