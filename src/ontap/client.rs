//! ONTAP management API client.
//!
//! Collectors talk to the controller through the [`Connection`] trait: a
//! request tree goes in, a response tree comes out. The production
//! implementation [`ZapiClient`] posts XML to the management endpoint over
//! HTTPS with basic auth; tests substitute scripted responses.

use crate::config::OntapConfig;
use crate::error::{AgentError, Result};
use crate::ontap::node::Node;
use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait Connection: Send + Sync {
    /// Send one request tree and return the controller's results element.
    async fn invoke(&self, request: &Node) -> Result<Node>;

    /// Clustered ONTAP vs 7-mode; decides query names and pagination.
    fn is_clustered(&self) -> bool;

    /// One step of a paginated query. Pass `"initial"` on the first call
    /// and the returned tag on subsequent calls; a `None` response means
    /// the iteration is complete.
    async fn invoke_batch(&self, request: &Node, tag: &str) -> Result<(Option<Node>, String)> {
        if tag.is_empty() {
            return Ok((None, String::new()));
        }
        let mut request = request.clone();
        if tag != "initial" {
            request.set_child_content("tag", tag);
        }
        let response = self.invoke(&request).await?;
        let next_tag = response
            .child_content("next-tag")
            .unwrap_or_default()
            .to_string();
        Ok((Some(response), next_tag))
    }
}

/// HTTPS client for the ONTAP management endpoint.
pub struct ZapiClient {
    config: OntapConfig,
    http: reqwest::Client,
    url: String,
}

impl ZapiClient {
    pub fn new(config: OntapConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        let scheme = if config.use_tls { "https" } else { "http" };
        let url = format!(
            "{}://{}/servlets/netapp.servlets.admin.XMLrequest_filer",
            scheme, config.addr
        );

        Ok(ZapiClient { config, http, url })
    }

    /// Hostname of the controller, used as the `cluster` global label.
    pub fn name(&self) -> &str {
        self.config
            .addr
            .split(':')
            .next()
            .unwrap_or(&self.config.addr)
    }

    fn envelope(&self, request: &Node) -> Result<String> {
        Ok(format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <netapp version=\"1.3\" xmlns=\"http://www.netapp.com/filer/admin\">{}</netapp>",
            request.to_xml()?
        ))
    }
}

#[async_trait]
impl Connection for ZapiClient {
    async fn invoke(&self, request: &Node) -> Result<Node> {
        let body = self.envelope(request)?;
        debug!(api = request.name(), "invoking");

        let response = self
            .http
            .post(&self.url)
            .basic_auth(
                &self.config.username,
                Some(self.config.password.expose_secret()),
            )
            .header("Content-Type", "text/xml")
            .body(body)
            .send()
            .await?
            .error_for_status()?;

        let text = response.text().await?;
        let document = Node::from_xml(&text)?;

        let results = document
            .child("results")
            .cloned()
            .ok_or_else(|| AgentError::InvalidResponse("no results element".into()))?;

        match results.attr("status") {
            Some("passed") => Ok(results),
            _ => Err(AgentError::Api {
                errno: results.attr("errno").unwrap_or_default().to_string(),
                reason: results.attr("reason").unwrap_or("unknown failure").to_string(),
            }),
        }
    }

    fn is_clustered(&self) -> bool {
        self.config.clustered
    }
}
