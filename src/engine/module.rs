//! Module contract
//!
//! A module is one resource kind (container registries, DNS zones). It
//! knows which service gates it, how to fetch and transform one region, and
//! how its records are laid out for output and loot.

use crate::api::CachedApi;
use crate::error::ScanError;
use crate::loot::LootFile;
use async_trait::async_trait;

/// Unit of work handed to exactly one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionTask {
    pub region: String,
    pub account: String,
}

/// What one region produced. `errors` holds failures that did not stop the
/// region (one zone of many, say); the records gathered around them are kept.
#[derive(Debug)]
pub struct RegionOutput<T> {
    pub records: Vec<T>,
    pub errors: Vec<ScanError>,
}

impl<T> RegionOutput<T> {
    pub fn partial(records: Vec<T>, errors: Vec<ScanError>) -> Self {
        Self { records, errors }
    }
}

impl<T> From<Vec<T>> for RegionOutput<T> {
    fn from(records: Vec<T>) -> Self {
        Self {
            records,
            errors: Vec::new(),
        }
    }
}

#[async_trait]
pub trait ScanModule: Send + Sync + 'static {
    type Record: Send + 'static;

    /// Short name used in logs, progress lines and file names
    fn name(&self) -> &'static str;

    /// Service looked up in the availability map
    fn service(&self) -> &'static str;

    /// What one task covers, for the progress line
    fn unit(&self) -> &'static str {
        "regions"
    }

    /// Regions to fan out over. Global services override this.
    fn regions(&self, configured: &[String]) -> Vec<String> {
        configured.to_vec()
    }

    /// Fetch and transform one region. All remote calls go through `api`.
    /// `Err` means the region produced nothing usable.
    async fn fetch_region(
        &self,
        api: &CachedApi,
        task: &RegionTask,
    ) -> Result<RegionOutput<Self::Record>, ScanError>;

    /// Column headers of the output table
    fn header(&self) -> Vec<&'static str>;

    /// One output row per record, aligned with [`ScanModule::header`]
    fn row(&self, record: &Self::Record) -> Vec<String>;

    /// Follow-up artifacts derived from the final inventory
    fn loot(&self, _records: &[Self::Record]) -> Vec<LootFile> {
        Vec::new()
    }
}
