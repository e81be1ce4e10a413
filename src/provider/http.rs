// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! JSON/HTTP hypervisor client.
//!
//! Talks to a hypervisor gateway that exposes the VM operations as REST endpoints:
//!
//! | Operation | Method | Path |
//! |-----------|--------|------|
//! | lookup by ID | GET | `/api/v1/vms/{moid}` |
//! | lookup by name | GET | `/api/v1/namespaces/{ns}/vms/{name}` |
//! | create | POST | `/api/v1/vms` |
//! | reconfigure | POST | `/api/v1/vms/{moid}/reconfigure` |
//! | power | POST | `/api/v1/vms/{moid}/power` |
//! | delete | DELETE | `/api/v1/vms/{moid}` |
//! | recommend | POST | `/api/v1/placement/recommendations` |
//! | resolve network | POST | `/api/v1/namespaces/{ns}/networks/resolve` |
//!
//! HTTP 429 and 5xx are retried with [`http_backoff`](crate::reconcilers::retry::http_backoff);
//! 404 maps to [`ProviderError::NotFound`], 400/422 to [`ProviderError::InvalidRequest`].

use async_trait::async_trait;
use reqwest::{Client as HttpClient, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use super::{CreateVmRequest, ObservedVm, PlacementRequest, PowerOp, Recommendation, VmLookup, VmProvider};
use crate::crd::NetworkInterface;
use crate::reconcilers::retry::{
    http_backoff_with_budget, is_retryable_http_status, HTTP_MAX_ELAPSED_TIME_SECS,
};
use crate::vm_errors::ProviderError;
use crate::vsphere::{ConfigSpec, ResolvedNetwork};

/// Build the gateway base URL, defaulting to `http://` when no scheme is given.
pub(crate) fn build_api_url(server: &str) -> String {
    if server.starts_with("http://") || server.starts_with("https://") {
        server.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", server.trim_end_matches('/'))
    }
}

/// Outcome of a single HTTP attempt.
enum Attempt {
    Retry(ProviderError),
    Fail(ProviderError),
}

/// Hypervisor client backed by `reqwest`.
#[derive(Clone)]
pub struct HttpVmProvider {
    client: HttpClient,
    base_url: String,
    token: Option<String>,
    retry_budget: Duration,
}

impl HttpVmProvider {
    pub fn new(client: HttpClient, server: &str, token: Option<String>) -> Self {
        Self {
            client,
            base_url: build_api_url(server),
            token,
            retry_budget: Duration::from_secs(HTTP_MAX_ELAPSED_TIME_SECS),
        }
    }

    /// Limit the total time spent retrying one call.
    #[must_use]
    pub fn with_retry_budget(mut self, budget: Duration) -> Self {
        self.retry_budget = budget;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call<B, T>(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ProviderError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let text = self.send(operation, method, path, body).await?;
        serde_json::from_str(&text).map_err(|e| ProviderError::Fault {
            operation: operation.to_string(),
            message: format!("invalid response body: {e}"),
        })
    }

    async fn send<B>(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<String, ProviderError>
    where
        B: Serialize + ?Sized + Sync,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut backoff = http_backoff_with_budget(self.retry_budget);
        let start_time = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let err = match self.send_once(operation, method.clone(), &url, body).await {
                Ok(text) => {
                    if attempt > 1 {
                        debug!(
                            operation,
                            url = %url,
                            attempt,
                            elapsed = ?start_time.elapsed(),
                            "Hypervisor call succeeded after retries"
                        );
                    }
                    return Ok(text);
                }
                Err(Attempt::Fail(e)) => return Err(e),
                Err(Attempt::Retry(e)) => e,
            };

            if let Some(duration) = backoff.next_backoff() {
                warn!(
                    operation,
                    url = %url,
                    attempt,
                    retry_after = ?duration,
                    error = %err,
                    "Retryable hypervisor error, will retry"
                );
                tokio::time::sleep(duration).await;
            } else {
                error!(
                    operation,
                    url = %url,
                    attempt,
                    elapsed = ?start_time.elapsed(),
                    error = %err,
                    "Backoff exhausted, giving up"
                );
                return Err(err);
            }
        }
    }

    async fn send_once<B>(
        &self,
        operation: &str,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<String, Attempt>
    where
        B: Serialize + ?Sized + Sync,
    {
        debug!(operation, method = %method, url = %url, "Hypervisor request");

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            Attempt::Retry(ProviderError::Fault {
                operation: operation.to_string(),
                message: format!("failed to send request: {e}"),
            })
        })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status.is_success() {
            return Ok(text);
        }

        let message = format!("HTTP {}: {}", status.as_u16(), text.trim());
        Err(match status {
            StatusCode::NOT_FOUND => Attempt::Fail(ProviderError::NotFound(url.to_string())),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Attempt::Fail(ProviderError::InvalidRequest {
                    operation: operation.to_string(),
                    message,
                })
            }
            s if is_retryable_http_status(s) => Attempt::Retry(ProviderError::Fault {
                operation: operation.to_string(),
                message,
            }),
            _ => Attempt::Fail(ProviderError::Fault {
                operation: operation.to_string(),
                message,
            }),
        })
    }
}

#[async_trait]
impl VmProvider for HttpVmProvider {
    async fn lookup_vm(&self, lookup: &VmLookup) -> Result<Option<ObservedVm>, ProviderError> {
        let path = match &lookup.unique_id {
            Some(moid) => format!("/api/v1/vms/{moid}"),
            None => format!("/api/v1/namespaces/{}/vms/{}", lookup.namespace, lookup.name),
        };
        match self
            .call::<(), ObservedVm>("lookup_vm", Method::GET, &path, None)
            .await
        {
            Ok(vm) => Ok(Some(vm)),
            Err(ProviderError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_vm(&self, request: &CreateVmRequest) -> Result<ObservedVm, ProviderError> {
        self.call("create_vm", Method::POST, "/api/v1/vms", Some(request))
            .await
    }

    async fn reconfigure(&self, moid: &str, spec: &ConfigSpec) -> Result<(), ProviderError> {
        let path = format!("/api/v1/vms/{moid}/reconfigure");
        self.send("reconfigure", Method::POST, &path, Some(spec))
            .await
            .map(|_| ())
    }

    async fn power_op(&self, moid: &str, op: PowerOp) -> Result<(), ProviderError> {
        let path = format!("/api/v1/vms/{moid}/power");
        let body = json!({ "operation": op });
        self.send("power_op", Method::POST, &path, Some(&body))
            .await
            .map(|_| ())
    }

    async fn delete_vm(&self, moid: &str) -> Result<(), ProviderError> {
        let path = format!("/api/v1/vms/{moid}");
        self.send::<()>("delete_vm", Method::DELETE, &path, None)
            .await
            .map(|_| ())
    }

    async fn recommend(
        &self,
        request: &PlacementRequest,
    ) -> Result<Vec<Recommendation>, ProviderError> {
        self.call(
            "recommend",
            Method::POST,
            "/api/v1/placement/recommendations",
            Some(request),
        )
        .await
    }

    async fn resolve_network(
        &self,
        namespace: &str,
        interface: &NetworkInterface,
    ) -> Result<ResolvedNetwork, ProviderError> {
        let path = format!("/api/v1/namespaces/{namespace}/networks/resolve");
        self.call("resolve_network", Method::POST, &path, Some(interface))
            .await
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod http_tests;
