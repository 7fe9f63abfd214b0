//! HTTP client for Kubernetes-style API servers.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::ClusterConfig;
use crate::error::{ApiError, ApplyKitError, Result, TransportError};
use crate::object::{LiveObjectHandle, Object};
use crate::patch::PatchEnvelope;
use crate::resource::RestMapping;

use super::{DeleteOptions, ObjectList, ObjectStore};

/// Path of the OpenAPI v2 document.
const OPENAPI_PATH: &str = "/openapi/v2";

/// Status body returned with non-success responses.
#[derive(Debug, Default, Deserialize)]
struct StatusBody {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListBody {
    #[serde(default)]
    items: Vec<Object>,
    #[serde(default)]
    metadata: ListMeta,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMeta {
    resource_version: Option<String>,
}

/// REST client for the object store.
#[derive(Debug, Clone)]
pub struct RestClient {
    /// HTTP client.
    client: Client,
    /// Server base URL without trailing slash.
    base_url: String,
    /// Bearer token.
    token: Option<String>,
}

impl RestClient {
    /// Creates a client from connection settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| TransportError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.server.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    /// Returns the collection URL of a kind.
    #[must_use]
    pub fn collection_url(&self, mapping: &RestMapping, namespace: Option<&str>) -> String {
        let gvk = &mapping.gvk;
        let mut url = if gvk.group.is_empty() {
            format!("{}/api/{}", self.base_url, gvk.version)
        } else {
            format!("{}/apis/{}/{}", self.base_url, gvk.group, gvk.version)
        };
        if let (true, Some(ns)) = (mapping.is_namespaced(), namespace) {
            url.push_str("/namespaces/");
            url.push_str(ns);
        }
        url.push('/');
        url.push_str(&mapping.resource);
        url
    }

    /// Returns the URL of a single object.
    #[must_use]
    pub fn object_url(&self, handle: &LiveObjectHandle) -> String {
        format!(
            "{}/{}",
            self.collection_url(&handle.mapping, handle.namespace()),
            handle.name
        )
    }

    /// Fetches the OpenAPI v2 document describing the server's kinds.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn openapi_document(&self) -> Result<Vec<u8>> {
        let url = format!("{}{OPENAPI_PATH}", self.base_url);
        let response = self.send(self.client.get(url), "openapi", "v2").await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::network(format!("Failed to read response: {e}")))?;
        Ok(bytes.to_vec())
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    /// Sends a request and maps non-success statuses to errors.
    async fn send(&self, request: RequestBuilder, resource: &str, name: &str) -> Result<Response> {
        let response = self
            .authorize(request)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| TransportError::network(format!("Request failed: {e}")))?;

        let status = response.status();
        trace!("{} {}/{} -> {}", response.url(), resource, name, status);
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body, resource, name))
    }

    async fn decode(response: Response) -> Result<Object> {
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::network(format!("Failed to read response: {e}")))?;
        Object::from_slice(&bytes).map_err(|e| {
            TransportError::InvalidResponse {
                message: format!("Failed to parse object: {e}"),
            }
            .into()
        })
    }
}

/// Maps an error response onto the error taxonomy.
fn status_error(status: StatusCode, body: &str, resource: &str, name: &str) -> ApplyKitError {
    let parsed: StatusBody = serde_json::from_str(body).unwrap_or_default();
    let message = if parsed.message.is_empty() {
        body.to_string()
    } else {
        parsed.message
    };

    match status {
        StatusCode::NOT_FOUND => ApiError::not_found(resource, name).into(),
        StatusCode::CONFLICT if parsed.reason == "AlreadyExists" => ApiError::AlreadyExists {
            resource: resource.to_string(),
            name: name.to_string(),
        }
        .into(),
        StatusCode::CONFLICT => ApiError::conflict(name, message).into(),
        StatusCode::UNPROCESSABLE_ENTITY => ApiError::Invalid {
            name: name.to_string(),
            message,
        }
        .into(),
        _ => ApiError::Status {
            code: status.as_u16(),
            reason: parsed.reason,
            message,
        }
        .into(),
    }
}

#[async_trait]
impl ObjectStore for RestClient {
    async fn get(&self, handle: &LiveObjectHandle) -> Result<Object> {
        debug!("GET {}", handle.describe());
        let response = self
            .send(self.client.get(self.object_url(handle)), &handle.mapping.resource, &handle.name)
            .await?;
        Self::decode(response).await
    }

    async fn create(&self, mapping: &RestMapping, namespace: Option<&str>, object: &Object) -> Result<Object> {
        let name = object.name().or_else(|| object.generate_name()).unwrap_or_default();
        debug!("POST {}/{}", mapping.resource, name);
        let request = self
            .client
            .post(self.collection_url(mapping, namespace))
            .json(object);
        let response = self.send(request, &mapping.resource, name).await?;
        Self::decode(response).await
    }

    async fn replace(&self, handle: &LiveObjectHandle, object: &Object) -> Result<Object> {
        debug!("PUT {}", handle.describe());
        let request = self.client.put(self.object_url(handle)).json(object);
        let response = self.send(request, &handle.mapping.resource, &handle.name).await?;
        Self::decode(response).await
    }

    async fn patch(&self, handle: &LiveObjectHandle, patch: &PatchEnvelope) -> Result<Object> {
        debug!("PATCH {} ({})", handle.describe(), patch.patch_type);
        let request = self
            .client
            .patch(self.object_url(handle))
            .header(header::CONTENT_TYPE, patch.patch_type.content_type())
            .body(patch.bytes.clone());
        let response = self.send(request, &handle.mapping.resource, &handle.name).await?;
        Self::decode(response).await
    }

    async fn delete(&self, handle: &LiveObjectHandle, options: &DeleteOptions) -> Result<()> {
        debug!("DELETE {}", handle.describe());
        let request = self.client.delete(self.object_url(handle)).json(options);
        self.send(request, &handle.mapping.resource, &handle.name).await?;
        Ok(())
    }

    async fn list(&self, mapping: &RestMapping, namespace: Option<&str>) -> Result<ObjectList> {
        debug!("LIST {} in {}", mapping.resource, namespace.unwrap_or("all namespaces"));
        let response = self
            .send(self.client.get(self.collection_url(mapping, namespace)), &mapping.resource, "")
            .await?;
        let body: ListBody = response.json().await.map_err(|e| TransportError::InvalidResponse {
            message: format!("Failed to parse list: {e}"),
        })?;
        Ok(ObjectList {
            items: body.items,
            resource_version: body.metadata.resource_version,
        })
    }

    fn backend_type(&self) -> &'static str {
        "rest"
    }
}
