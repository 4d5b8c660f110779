//! Entity types, the nodes of the architecture graph.
//!
//! An [`Entity`] is only ever produced by the merger. Discovery agents submit
//! [`EntityObservation`]s, which carry no version or provenance of their own;
//! the merger folds them into the stored entity.

use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::discovery::DiscoveryMetadata;

/// Caller-assigned, stable entity identifier.
pub type EntityId = String;

/// Highest priority an entity may carry.
pub const PRIORITY_HIGHEST: u8 = 1;
/// Lowest priority an entity may carry.
pub const PRIORITY_LOWEST: u8 = 5;

// ─── EntityType ──────────────────────────────────────────────────────────────

/// The architectural role of an entity.
///
/// The taxonomy is open: anything not in the known set is carried verbatim as
/// [`EntityType::Custom`]. On the wire an entity type is a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityType {
  Service,
  Controller,
  Repository,
  Entity,
  Component,
  Module,
  Configuration,
  Middleware,
  Utility,
  Model,
  Interface,
  Handler,
  Gateway,
  Client,
  Factory,
  Provider,
  Validator,
  Mapper,
  Dto,
  Event,
  Listener,
  Scheduler,
  Job,
  Test,
  /// A type outside the known set. Never holds a known name, so it survives
  /// the trip through its wire string; build it with [`EntityType::custom`].
  Custom(String),
}

impl EntityType {
  /// The type named `name`: a known variant when the name is one, otherwise
  /// [`EntityType::Custom`].
  pub fn custom(name: impl Into<String>) -> Self { Self::from(name.into()) }

  pub fn as_str(&self) -> &str {
    match self {
      Self::Service => "Service",
      Self::Controller => "Controller",
      Self::Repository => "Repository",
      Self::Entity => "Entity",
      Self::Component => "Component",
      Self::Module => "Module",
      Self::Configuration => "Configuration",
      Self::Middleware => "Middleware",
      Self::Utility => "Utility",
      Self::Model => "Model",
      Self::Interface => "Interface",
      Self::Handler => "Handler",
      Self::Gateway => "Gateway",
      Self::Client => "Client",
      Self::Factory => "Factory",
      Self::Provider => "Provider",
      Self::Validator => "Validator",
      Self::Mapper => "Mapper",
      Self::Dto => "Dto",
      Self::Event => "Event",
      Self::Listener => "Listener",
      Self::Scheduler => "Scheduler",
      Self::Job => "Job",
      Self::Test => "Test",
      Self::Custom(name) => name,
    }
  }
}

impl FromStr for EntityType {
  type Err = std::convert::Infallible;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(match s {
      "Service" => Self::Service,
      "Controller" => Self::Controller,
      "Repository" => Self::Repository,
      "Entity" => Self::Entity,
      "Component" => Self::Component,
      "Module" => Self::Module,
      "Configuration" => Self::Configuration,
      "Middleware" => Self::Middleware,
      "Utility" => Self::Utility,
      "Model" => Self::Model,
      "Interface" => Self::Interface,
      "Handler" => Self::Handler,
      "Gateway" => Self::Gateway,
      "Client" => Self::Client,
      "Factory" => Self::Factory,
      "Provider" => Self::Provider,
      "Validator" => Self::Validator,
      "Mapper" => Self::Mapper,
      "Dto" => Self::Dto,
      "Event" => Self::Event,
      "Listener" => Self::Listener,
      "Scheduler" => Self::Scheduler,
      "Job" => Self::Job,
      "Test" => Self::Test,
      other => Self::Custom(other.to_owned()),
    })
  }
}

impl From<String> for EntityType {
  fn from(s: String) -> Self {
    match s.parse() {
      Ok(t) => t,
      Err(never) => match never {},
    }
  }
}

impl From<EntityType> for String {
  fn from(t: EntityType) -> Self { t.as_str().to_owned() }
}

impl fmt::Display for EntityType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ─── Analysis payload ────────────────────────────────────────────────────────

/// Richer structured findings about an entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisData {
  /// How many call sites or references the discovering agent counted.
  pub usage_count:       Option<u64>,
  /// Base types, nearest first.
  #[serde(default)]
  pub inheritance_chain: Vec<String>,
  #[serde(default)]
  pub business_rules:    Vec<String>,
  /// Design patterns recognised in the entity (e.g. "singleton").
  #[serde(default)]
  pub patterns:          Vec<String>,
  /// Escape hatch for findings that don't fit the fields above.
  #[serde(default)]
  pub annotations:       serde_json::Map<String, serde_json::Value>,
}

impl AnalysisData {
  pub fn is_empty(&self) -> bool {
    self.usage_count.is_none()
      && self.inheritance_chain.is_empty()
      && self.business_rules.is_empty()
      && self.patterns.is_empty()
      && self.annotations.is_empty()
  }
}

// ─── EntityObservation ───────────────────────────────────────────────────────

/// One agent's view of an entity, as submitted to the merge engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityObservation {
  pub id:               EntityId,
  pub entity_type:      EntityType,
  pub location:         String,
  #[serde(default = "default_priority")]
  pub priority:         u8,
  #[serde(default)]
  pub processed:        bool,
  #[serde(default)]
  pub chain_context:    String,
  #[serde(default)]
  pub business_context: String,
  #[serde(default)]
  pub domain_context:   Option<String>,
  #[serde(default)]
  pub dependencies:     BTreeSet<EntityId>,
  #[serde(default)]
  pub dependents:       BTreeSet<EntityId>,
  /// When the agent saw the entity change; defaults to the discovery time.
  #[serde(default)]
  pub last_modified:    Option<DateTime<Utc>>,
  #[serde(default)]
  pub analysis_data:    Option<AnalysisData>,
}

fn default_priority() -> u8 { 3 }

impl EntityObservation {
  /// Convenience constructor with all optional fields set to their defaults.
  pub fn new(
    id: impl Into<EntityId>,
    entity_type: EntityType,
    location: impl Into<String>,
  ) -> Self {
    Self {
      id: id.into(),
      entity_type,
      location: location.into(),
      priority: default_priority(),
      processed: false,
      chain_context: String::new(),
      business_context: String::new(),
      domain_context: None,
      dependencies: BTreeSet::new(),
      dependents: BTreeSet::new(),
      last_modified: None,
      analysis_data: None,
    }
  }

  pub fn with_dependencies<I, T>(mut self, ids: I) -> Self
  where
    I: IntoIterator<Item = T>,
    T: Into<EntityId>,
  {
    self.dependencies.extend(ids.into_iter().map(Into::into));
    self
  }

  pub fn with_dependents<I, T>(mut self, ids: I) -> Self
  where
    I: IntoIterator<Item = T>,
    T: Into<EntityId>,
  {
    self.dependents.extend(ids.into_iter().map(Into::into));
    self
  }

  pub fn with_business_context(mut self, text: impl Into<String>) -> Self {
    self.business_context = text.into();
    self
  }
}

// ─── Entity ──────────────────────────────────────────────────────────────────

/// A merged, persisted graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
  pub id:               EntityId,
  pub entity_type:      EntityType,
  pub location:         String,
  /// 1 is highest, 5 is lowest.
  pub priority:         u8,
  pub processed:        bool,
  pub chain_context:    String,
  pub business_context: String,
  pub domain_context:   Option<String>,
  pub dependencies:     BTreeSet<EntityId>,
  pub dependents:       BTreeSet<EntityId>,
  pub last_modified:    DateTime<Utc>,
  pub analysis_data:    Option<AnalysisData>,
  pub discovery:        DiscoveryMetadata,
}

impl Entity {
  /// Number of distinct neighbours across both adjacency sets.
  pub fn degree(&self) -> usize {
    self.dependencies.union(&self.dependents).count()
  }

  pub fn version(&self) -> u64 { self.discovery.version }
}
