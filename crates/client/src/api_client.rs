//! HTTP API client with bearer-token authentication.

use hms_shared::{
    ApiError, DialysisMachine, InventoryItem, LabRequest, LabStatus, MachineStatus,
    NewLabRequest, NewPrescription, Prescription, PrescriptionStatus, StatusUpdate,
    StockAdjustment, Validate,
};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::BackendConfig;
use crate::stores::Domain;

/// HTTP client for the hospital backend's REST API.
///
/// Credentials are carried explicitly: set a token with [`with_token`](Self::with_token).
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// Create a client for the configured backend
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.origin().to_string(),
            token: None,
        }
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Attach a bearer token to every request
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let rb = self.client.request(method, self.url(path));
        match &self.token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    /// Send a request and return the response body, or an error for non-2xx.
    async fn execute(&self, rb: RequestBuilder) -> Result<String, ApiError> {
        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            crate::log_warn!("Request failed with HTTP {}", status);
            return Err(ApiError::Http { status, body: text });
        }
        Ok(text)
    }

    async fn send_json<TReq: Serialize + ?Sized, TRes: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let body_bytes =
            serde_json::to_vec(body).map_err(|e| ApiError::Deserialize(e.to_string()))?;
        let rb = self
            .request(method, path)
            .body(body_bytes)
            .header("Content-Type", "application/json");
        let text = self.execute(rb).await?;
        parse_body(&text)
    }

    /// Make a GET request
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let text = self.execute(self.request(Method::GET, path)).await?;
        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }

    /// Make a POST request with JSON body
    pub async fn post_json<TReq: Serialize + ?Sized, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        self.send_json(Method::POST, path, body).await
    }

    /// Make a PUT request with JSON body
    pub async fn put_json<TReq: Serialize + ?Sized, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        self.send_json(Method::PUT, path, body).await
    }

    /// Make a PATCH request with JSON body
    pub async fn patch_json<TReq: Serialize + ?Sized, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        self.send_json(Method::PATCH, path, body).await
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(self.request(Method::DELETE, path)).await?;
        Ok(())
    }

    // --- Domain API methods ---

    /// Fetch the full collection of a domain entity
    pub async fn list<T: Domain>(&self) -> Result<Vec<T>, ApiError> {
        self.get_json(T::COLLECTION_PATH).await
    }

    pub async fn create_prescription(
        &self,
        prescription: &NewPrescription,
    ) -> Result<Prescription, ApiError> {
        prescription.validate().map_err(ApiError::Validation)?;
        self.post_json(Prescription::COLLECTION_PATH, prescription)
            .await
    }

    pub async fn update_prescription_status(
        &self,
        id: &str,
        status: PrescriptionStatus,
    ) -> Result<Prescription, ApiError> {
        let path = format!("{}/{}/status", Prescription::COLLECTION_PATH, id);
        self.patch_json(&path, &StatusUpdate { status }).await
    }

    /// Apply a stock delta to an inventory item
    pub async fn adjust_stock(&self, adjustment: &StockAdjustment) -> Result<InventoryItem, ApiError> {
        adjustment.validate().map_err(ApiError::Validation)?;
        let path = format!(
            "{}/{}/adjustments",
            InventoryItem::COLLECTION_PATH,
            adjustment.item_id
        );
        self.post_json(&path, adjustment).await
    }

    pub async fn create_lab_request(&self, request: &NewLabRequest) -> Result<LabRequest, ApiError> {
        request.validate().map_err(ApiError::Validation)?;
        self.post_json(LabRequest::COLLECTION_PATH, request).await
    }

    pub async fn update_lab_status(&self, id: &str, status: LabStatus) -> Result<LabRequest, ApiError> {
        let path = format!("{}/{}/status", LabRequest::COLLECTION_PATH, id);
        self.patch_json(&path, &StatusUpdate { status }).await
    }

    pub async fn update_machine_status(
        &self,
        id: &str,
        status: MachineStatus,
    ) -> Result<DialysisMachine, ApiError> {
        let path = format!("{}/{}/status", DialysisMachine::COLLECTION_PATH, id);
        self.patch_json(&path, &StatusUpdate { status }).await
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new(&BackendConfig::default())
    }
}

/// Empty bodies (204 and friends) parse as JSON `null`.
fn parse_body<TRes: DeserializeOwned>(text: &str) -> Result<TRes, ApiError> {
    let text = if text.trim().is_empty() { "null" } else { text };
    serde_json::from_str(text).map_err(|e| ApiError::Deserialize(e.to_string()))
}
