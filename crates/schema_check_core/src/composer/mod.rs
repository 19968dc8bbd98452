//! Federation composer adapter.
//!
//! The merge algorithm sits behind the `Composer` trait so the orchestrator can
//! run against the built-in `FederationComposer` or a test double. A failed
//! composition fails only the target it was run for.

pub mod contract;
pub mod federation;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::normalize::NormalizedSchema;
use crate::types::{Subgraph, TagFilter};

pub use federation::FederationComposer;

/// One subgraph as handed to the composer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubgraphInput {
    pub name: String,
    pub url: String,
    pub sdl: String,
    pub subscription_url: Option<String>,
    pub subscription_protocol: Option<String>,
}

impl SubgraphInput {
    /// Build from a catalog subgraph, optionally overriding its SDL.
    pub fn from_subgraph(subgraph: &Subgraph, sdl_override: Option<&str>) -> Self {
        Self {
            name: subgraph.name.clone(),
            url: subgraph.routing_url.clone(),
            sdl: sdl_override
                .map(str::to_string)
                .or_else(|| subgraph.sdl.clone())
                .unwrap_or_default(),
            subscription_url: subgraph.subscription_url.clone(),
            subscription_protocol: subgraph.subscription_protocol.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionError {
    pub code: String,
    pub message: String,
    pub subgraph: Option<String>,
}

impl CompositionError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            subgraph: None,
        }
    }

    pub fn in_subgraph(code: &str, subgraph: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            subgraph: Some(subgraph.to_string()),
        }
    }
}

impl std::fmt::Display for CompositionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.subgraph {
            Some(s) => write!(f, "[{}] {}: {}", self.code, s, self.message),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

/// Router-facing metadata for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfiguration {
    pub type_name: String,
    pub field_name: String,
    pub argument_names: Vec<String>,
    pub requires_authentication: bool,
    /// OR of AND-groups of scopes, as in `@requiresScopes(scopes: [["a", "b"]])`.
    pub required_scopes: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubgraphConfig {
    pub name: String,
    pub url: String,
    pub subscription_url: Option<String>,
    pub subscription_protocol: Option<String>,
    pub sdl_digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposedSchema {
    /// Merged schema with `@tag` / `@inaccessible` still applied.
    pub schema: NormalizedSchema,
    /// Merged schema with inaccessible elements removed.
    pub client_schema: NormalizedSchema,
    pub federated_sdl: String,
    pub federated_client_sdl: String,
    pub field_configurations: Vec<FieldConfiguration>,
    pub subgraph_config_by_name: BTreeMap<String, SubgraphConfig>,
}

/// The external merge algorithm.
pub trait Composer: Send + Sync {
    /// Merge an ordered, name-unique subgraph list.
    fn compose(
        &self,
        subgraphs: &[SubgraphInput],
    ) -> std::result::Result<ComposedSchema, Vec<CompositionError>>;

    /// Derive a contract from an already composed base without re-merging.
    fn apply_contract(
        &self,
        base: &ComposedSchema,
        filter: &TagFilter,
    ) -> std::result::Result<ComposedSchema, Vec<CompositionError>> {
        contract::apply_tag_filter(base, filter)
    }
}
