//! Downstream service invocation seam
//!
//! Actions reach other microservices exclusively through this trait, bound
//! into the [`ActionContext`](super::ActionContext). Production wiring
//! plugs the platform's RPC helper in here; tests use a stub.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// A single downstream call
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    /// Target application id in the service mesh
    pub app_id: String,

    /// Method path on the target service
    pub path: String,

    /// HTTP method
    pub method: String,

    /// Query parameters
    pub params: Option<Value>,

    /// Request body
    pub data: Option<Value>,

    pub timeout: Duration,
}

impl ServiceRequest {
    pub fn new(app_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            path: path.into(),
            method: "GET".to_string(),
            params: None,
            data: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout = Duration::from_secs(seconds);
        self
    }
}

/// Error from a downstream service invocation
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    /// The call could not be made (connection, resolution, serialization)
    #[error("service call to {app_id} failed: {detail}")]
    Transport { app_id: String, detail: String },

    /// The downstream service answered with a failure status
    #[error("service {app_id} returned status {status}: {detail}")]
    Status {
        app_id: String,
        status: u16,
        detail: String,
    },

    /// The call exceeded its timeout
    #[error("service call to {app_id} timed out after {timeout:?}")]
    Timeout { app_id: String, timeout: Duration },
}

/// Invoker for downstream microservice calls
#[async_trait]
pub trait ServiceInvoker: Send + Sync + 'static {
    async fn invoke(&self, request: ServiceRequest) -> Result<Value, ServiceError>;
}

/// Invoker that rejects every call
///
/// Default wiring for deployments whose actions never leave the process.
#[derive(Debug, Default, Clone)]
pub struct NoServices;

#[async_trait]
impl ServiceInvoker for NoServices {
    async fn invoke(&self, request: ServiceRequest) -> Result<Value, ServiceError> {
        Err(ServiceError::Transport {
            app_id: request.app_id,
            detail: "no service invoker configured".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = ServiceRequest::new("models", "models/import")
            .method("POST")
            .data(serde_json::json!({"uri": "org/model"}))
            .timeout_seconds(30);

        assert_eq!(request.method, "POST");
        assert_eq!(request.timeout, Duration::from_secs(30));
        assert!(request.params.is_none());
    }

    #[tokio::test]
    async fn test_no_services_rejects() {
        let invoker = NoServices;
        let result = invoker.invoke(ServiceRequest::new("models", "x")).await;
        assert!(matches!(result, Err(ServiceError::Transport { .. })));
    }
}
