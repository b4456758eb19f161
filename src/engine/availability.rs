//! Region Availability Filter
//!
//! Answers whether a service is deployed in a region. Workers consult it
//! before spawning any remote call for that region.
//!
//! The default map is embedded in the binary (`src/resources/service_regions.json`).
//! A map can also be loaded from a file or downloaded once from a URL.

use crate::error::AvailabilityError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::sync::OnceCell;

/// Embedded default service map (compiled into the binary)
const EMBEDDED_SERVICE_MAP: &str = include_str!("../resources/service_regions.json");

/// Capability used by workers to gate a region
#[async_trait]
pub trait ServiceAvailability: Send + Sync {
    async fn is_available(&self, service: &str, region: &str) -> Result<bool, AvailabilityError>;

    /// Every region the provider knows about, sorted
    async fn known_regions(&self) -> Result<Vec<String>, AvailabilityError> {
        Ok(Vec::new())
    }
}

/// Service entry from JSON
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServiceDef {
    #[serde(default)]
    pub regions: HashSet<String>,
    /// Global services answer from every region
    #[serde(default)]
    pub global: bool,
}

/// Root structure of a service map file
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StaticServiceMap {
    #[serde(default)]
    pub services: HashMap<String, ServiceDef>,
}

impl StaticServiceMap {
    /// The map compiled into the binary
    pub fn embedded() -> Result<Self, AvailabilityError> {
        Self::from_json(EMBEDDED_SERVICE_MAP)
    }

    pub fn from_json(content: &str) -> Result<Self, AvailabilityError> {
        serde_json::from_str(content).map_err(|e| AvailabilityError::Load(e.to_string()))
    }

    /// Load a map from a JSON file on disk
    pub fn from_file(path: &Path) -> Result<Self, AvailabilityError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AvailabilityError::Load(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    pub fn with_service(mut self, service: &str, def: ServiceDef) -> Self {
        self.services.insert(service.to_string(), def);
        self
    }

    /// Every region named by any service, sorted
    pub fn all_regions(&self) -> Vec<String> {
        let mut regions: Vec<String> = self
            .services
            .values()
            .flat_map(|def| def.regions.iter().cloned())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        regions.sort();
        regions
    }

    pub fn lookup(&self, service: &str, region: &str) -> Result<bool, AvailabilityError> {
        let def = self
            .services
            .get(service)
            .ok_or_else(|| AvailabilityError::UnknownService(service.to_string()))?;
        Ok(def.global || def.regions.contains(region))
    }
}

#[async_trait]
impl ServiceAvailability for StaticServiceMap {
    async fn is_available(&self, service: &str, region: &str) -> Result<bool, AvailabilityError> {
        self.lookup(service, region)
    }

    async fn known_regions(&self) -> Result<Vec<String>, AvailabilityError> {
        Ok(self.all_regions())
    }
}

/// Service map downloaded on first use and reused for the rest of the run.
///
/// A failed download is remembered too, so a broken URL costs one request,
/// not one per region.
#[derive(Debug)]
pub struct RemoteServiceMap {
    url: String,
    http: reqwest::Client,
    map: OnceCell<Result<StaticServiceMap, AvailabilityError>>,
}

impl RemoteServiceMap {
    pub fn new(url: &str, http: reqwest::Client) -> Self {
        Self {
            url: url.to_string(),
            http,
            map: OnceCell::new(),
        }
    }

    async fn map(&self) -> Result<&StaticServiceMap, AvailabilityError> {
        match self.map.get_or_init(|| self.download()).await {
            Ok(map) => Ok(map),
            Err(e) => Err(e.clone()),
        }
    }

    async fn download(&self) -> Result<StaticServiceMap, AvailabilityError> {
        tracing::debug!("Downloading service map from {}", self.url);
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AvailabilityError::Load(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AvailabilityError::Load(format!(
                "service map request failed: {}",
                status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AvailabilityError::Load(e.to_string()))?;
        StaticServiceMap::from_json(&body)
    }
}

#[async_trait]
impl ServiceAvailability for RemoteServiceMap {
    async fn is_available(&self, service: &str, region: &str) -> Result<bool, AvailabilityError> {
        self.map().await?.lookup(service, region)
    }

    async fn known_regions(&self) -> Result<Vec<String>, AvailabilityError> {
        Ok(self.map().await?.all_regions())
    }
}

/// Availability gate with the fail-open-to-skip policy: a lookup failure is
/// logged and the region is treated as unavailable. Never aborts the run.
pub async fn region_available(
    provider: &dyn ServiceAvailability,
    module: &str,
    service: &str,
    region: &str,
) -> bool {
    match provider.is_available(service, region).await {
        Ok(available) => {
            if !available {
                tracing::debug!(module = %module, "{} is not available in {}, skipping", service, region);
            }
            available
        }
        Err(e) => {
            tracing::error!(module = %module, "Availability lookup for {} in {} failed: {}", service, region, e);
            false
        }
    }
}
