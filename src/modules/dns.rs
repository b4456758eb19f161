//! DNS zones
//!
//! DNS is a global service, so this module runs a single task against the
//! `global` pseudo-region. It pages through hosted zones, then through each
//! zone's record sets, and emits one record per value.

use crate::api::{CachedApi, ListRequest};
use crate::engine::module::{RegionOutput, RegionTask, ScanModule};
use crate::error::ScanError;
use crate::loot::LootFile;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Pseudo-region for global services
pub const GLOBAL_REGION: &str = "global";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneConfig {
    #[serde(default)]
    pub private_zone: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawZone {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub config: ZoneConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawValue {
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasTarget {
    pub dns_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecordSet {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    #[serde(default)]
    pub resource_records: Vec<RawValue>,
    #[serde(default)]
    pub alias_target: Option<AliasTarget>,
}

/// One DNS record value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DnsRecord {
    pub service: String,
    pub zone: String,
    pub name: String,
    pub record_type: String,
    pub value: String,
    pub private_zone: bool,
}

impl DnsRecord {
    fn is_address(&self) -> bool {
        self.record_type == "A" || self.record_type == "AAAA"
    }
}

/// Flatten one record set into one record per value (aliases included)
pub fn expand_record_set(zone: &RawZone, set: &RawRecordSet) -> Vec<DnsRecord> {
    let make = |value: &str| DnsRecord {
        service: "DNS".to_string(),
        zone: zone.name.clone(),
        name: set.name.clone(),
        record_type: set.record_type.clone(),
        value: value.to_string(),
        private_zone: zone.config.private_zone,
    };

    let mut records: Vec<DnsRecord> = set.resource_records.iter().map(|r| make(&r.value)).collect();
    if let Some(alias) = &set.alias_target {
        records.push(make(&alias.dns_name));
    }
    records
}

/// DNS module
#[derive(Debug, Default)]
pub struct DnsModule;

impl DnsModule {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ScanModule for DnsModule {
    type Record = DnsRecord;

    fn name(&self) -> &'static str {
        "dns"
    }

    fn service(&self) -> &'static str {
        "dns"
    }

    fn unit(&self) -> &'static str {
        "tasks"
    }

    fn regions(&self, _configured: &[String]) -> Vec<String> {
        vec![GLOBAL_REGION.to_string()]
    }

    async fn fetch_region(
        &self,
        api: &CachedApi,
        task: &RegionTask,
    ) -> Result<RegionOutput<DnsRecord>, ScanError> {
        let region = task.region.as_str();

        let raw = api
            .list_all(&ListRequest::new(region, "hostedzones"))
            .await
            .map_err(|e| ScanError::fetch(region, e))?;

        // A zone that cannot be read is reported; the other zones still count.
        let mut records = Vec::new();
        let mut errors = Vec::new();
        for item in raw.iter() {
            let zone: RawZone = match serde_json::from_value(item.clone()) {
                Ok(zone) => zone,
                Err(e) => {
                    errors.push(ScanError::transform(region, format!("hosted zone: {}", e)));
                    continue;
                }
            };

            let request = ListRequest::new(region, "recordsets").with_parent(&zone.id);
            let sets = match api.list_all(&request).await {
                Ok(sets) => sets,
                Err(e) => {
                    tracing::warn!(module = "dns", "Record sets of zone {} unavailable: {}", zone.id, e);
                    errors.push(ScanError::fetch(region, e));
                    continue;
                }
            };

            for item in sets.iter() {
                match serde_json::from_value::<RawRecordSet>(item.clone()) {
                    Ok(set) => records.extend(expand_record_set(&zone, &set)),
                    Err(e) => errors.push(ScanError::transform(
                        region,
                        format!("record set in {}: {}", zone.id, e),
                    )),
                }
            }
        }

        Ok(RegionOutput::partial(records, errors))
    }

    fn header(&self) -> Vec<&'static str> {
        vec!["Service", "Name", "Type", "Value", "PrivateZone"]
    }

    fn row(&self, record: &DnsRecord) -> Vec<String> {
        vec![
            record.service.clone(),
            record.name.clone(),
            record.record_type.clone(),
            record.value.clone(),
            if record.private_zone { "True" } else { "False" }.to_string(),
        ]
    }

    fn loot(&self, records: &[DnsRecord]) -> Vec<LootFile> {
        if records.is_empty() {
            return Vec::new();
        }

        let mut public = String::new();
        let mut private = String::new();
        for record in records.iter().filter(|r| r.is_address()) {
            let target = if record.private_zone { &mut private } else { &mut public };
            target.push_str(&record.name);
            target.push('\n');
        }

        let hint = "Feed these A records into nmap and something like gowitness or aquatone.";
        vec![
            LootFile::new("dns-A-records-public-zones.txt", public).with_hint(hint),
            LootFile::new("dns-A-records-private-zones.txt", private).with_hint(hint),
        ]
    }
}
