//! Minimal typed view of Marathon app definitions
//!
//! Only the fields the domain extractor needs are modeled (`id`, `labels`
//! and enough port structure to count service ports); everything else in the
//! Marathon payload is ignored for forward compatibility.

use std::collections::HashMap;

use serde::Deserialize;

/// Response body of `GET /v2/apps`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppsResponse {
    #[serde(default)]
    pub apps: Vec<App>,
}

/// One Marathon application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Present on apps with host networking; `None` when the app declares
    /// ports through its container instead.
    #[serde(default)]
    pub port_definitions: Option<Vec<PortDefinition>>,
    #[serde(default)]
    pub container: Option<Container>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortDefinition {
    #[serde(default)]
    pub port: Option<u32>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    #[serde(default)]
    pub port_mappings: Vec<PortMapping>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    #[serde(default)]
    pub container_port: Option<u32>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl App {
    /// Number of service ports, taken from `portDefinitions` when declared
    /// and from the container's `portMappings` otherwise.
    pub fn port_count(&self) -> usize {
        match &self.port_definitions {
            Some(definitions) => definitions.len(),
            None => self
                .container
                .as_ref()
                .map(|c| c.port_mappings.len())
                .unwrap_or(0),
        }
    }
}
