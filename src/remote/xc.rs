//! HTTP implementation of [`RemoteConfig`] for the control plane's config API.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Response};
use serde_json::Value;

use super::{RemoteConfig, RemoteError};
use crate::config::RemoteSettings;
use crate::models::payload::form_name;
use crate::models::ResourceKind;

const TENANT_HEADER: &str = "x-volterra-apigw-tenant";
const ORIGIN_POOLS: &str = "origin_pools";
const APP_FIREWALLS: &str = "app_firewalls";

/// Client for `{base}/api/config/namespaces/{namespace}/...`.
pub struct XcClient {
    http: Client,
    base_url: String,
    namespace: String,
}

impl XcClient {
    /// Fails when the token or tenant cannot be sent as a header.
    pub fn new(settings: &RemoteSettings) -> Result<Self, RemoteError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let token = format!("APIToken {}", settings.api_token);
        headers.insert(AUTHORIZATION, header_value("LBREV_REMOTE_API_TOKEN", &token)?);
        headers.insert(TENANT_HEADER, header_value("LBREV_REMOTE_TENANT", &settings.tenant)?);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| RemoteError::new("http client", None, e.to_string()))?;

        Ok(Self {
            http,
            base_url: settings.base_url.clone(),
            namespace: settings.namespace.clone(),
        })
    }

    fn collection_url(&self, collection: &str) -> String {
        format!(
            "{}/api/config/namespaces/{}/{}",
            self.base_url, self.namespace, collection
        )
    }

    async fn get(&self, collection: &str, name: &str) -> Result<Value, RemoteError> {
        let resource = format!("{}/{}", collection, name);
        let resp = self
            .http
            .get(format!("{}/{}", self.collection_url(collection), name))
            .query(&[("response_format", "GET_RSP_FORMAT_FOR_REPLACE")])
            .send()
            .await
            .map_err(|e| RemoteError::new(&resource, None, e.to_string()))?;

        let resp = check(resp, &resource).await?;
        resp.json()
            .await
            .map_err(|e| RemoteError::new(&resource, None, format!("invalid JSON: {}", e)))
    }

    async fn put(&self, collection: &str, name: &str, form: &Value) -> Result<(), RemoteError> {
        let resource = format!("{}/{}", collection, name);
        tracing::debug!("Replacing {}", resource);
        let resp = self
            .http
            .put(format!("{}/{}", self.collection_url(collection), name))
            .json(form)
            .send()
            .await
            .map_err(|e| RemoteError::new(&resource, None, e.to_string()))?;

        check(resp, &resource).await.map(|_| ())
    }
}

// The value itself stays out of the error: it may be a credential.
fn header_value(variable: &str, value: &str) -> Result<HeaderValue, RemoteError> {
    HeaderValue::from_str(value)
        .map_err(|_| RemoteError::new(variable, None, "not a valid HTTP header value"))
}

async fn check(resp: Response, resource: &str) -> Result<Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(RemoteError::new(resource, Some(status.as_u16()), body))
}

fn named<'a>(collection: &str, form: &'a Value) -> Result<&'a str, RemoteError> {
    form_name(form).ok_or_else(|| {
        RemoteError::new(collection, None, "replace form has no metadata.name")
    })
}

#[async_trait]
impl RemoteConfig for XcClient {
    async fn list(&self, kind: ResourceKind) -> Result<Vec<String>, RemoteError> {
        let collection = kind.spec().collection;
        let resp = self
            .http
            .get(self.collection_url(collection))
            .query(&[("report_fields", "string")])
            .send()
            .await
            .map_err(|e| RemoteError::new(collection, None, e.to_string()))?;

        let body: Value = check(resp, collection)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::new(collection, None, format!("invalid JSON: {}", e)))?;

        Ok(body
            .get("items")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch(&self, kind: ResourceKind, name: &str) -> Result<Value, RemoteError> {
        self.get(kind.spec().collection, name).await
    }

    async fn fetch_origin_pool(&self, name: &str) -> Result<Value, RemoteError> {
        self.get(ORIGIN_POOLS, name).await
    }

    async fn fetch_firewall(&self, name: &str) -> Result<Value, RemoteError> {
        self.get(APP_FIREWALLS, name).await
    }

    async fn push(&self, kind: ResourceKind, name: &str, form: &Value) -> Result<(), RemoteError> {
        self.put(kind.spec().collection, name, form).await
    }

    async fn push_origin_pool(&self, form: &Value) -> Result<(), RemoteError> {
        let name = named(ORIGIN_POOLS, form)?;
        self.put(ORIGIN_POOLS, name, form).await
    }

    async fn push_firewall(&self, form: &Value) -> Result<(), RemoteError> {
        let name = named(APP_FIREWALLS, form)?;
        self.put(APP_FIREWALLS, name, form).await
    }
}
