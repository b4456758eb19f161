//! Scripted remote API shared by the engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use regionsweep::api::{ListCache, ListRequest, Page, RemoteApi};
use regionsweep::engine::availability::ServiceDef;
use regionsweep::engine::{EngineSettings, RunContext, StaticServiceMap};
use regionsweep::error::ApiError;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type Key = (String, String, Option<String>);

/// Remote side answering from a fixed script. Records how many calls
/// overlap and when each region's calls ran.
#[derive(Default)]
pub struct ScriptedApi {
    responses: HashMap<Key, Result<Vec<Value>, ApiError>>,
    delay: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub calls: AtomicUsize,
    intervals: Mutex<Vec<(String, Instant, Instant)>>,
}

impl ScriptedApi {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn respond(
        mut self,
        region: &str,
        resource: &str,
        parent: Option<&str>,
        response: Result<Vec<Value>, ApiError>,
    ) -> Self {
        self.responses.insert(
            (
                region.to_string(),
                resource.to_string(),
                parent.map(str::to_string),
            ),
            response,
        );
        self
    }

    /// A region with one repository holding `images`
    pub fn registry(self, region: &str, repository: &str, images: Vec<Value>) -> Self {
        let uri = format!("111.registry.example.com/{}", repository);
        self.respond(
            region,
            "repositories",
            None,
            Ok(vec![json!({"repositoryName": repository, "repositoryUri": uri})]),
        )
        .respond(region, "images", Some(repository), Ok(images))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// First start and last end of the calls made for each region
    pub fn region_spans(&self) -> Vec<(String, Instant, Instant)> {
        let intervals = self.intervals.lock().unwrap();
        let mut spans: HashMap<String, (Instant, Instant)> = HashMap::new();
        for (region, start, end) in intervals.iter() {
            let span = spans.entry(region.clone()).or_insert((*start, *end));
            span.0 = span.0.min(*start);
            span.1 = span.1.max(*end);
        }
        let mut spans: Vec<_> = spans.into_iter().map(|(r, (s, e))| (r, s, e)).collect();
        spans.sort_by_key(|(_, start, _)| *start);
        spans
    }
}

#[async_trait]
impl RemoteApi for ScriptedApi {
    async fn list(&self, request: &ListRequest, _token: Option<&str>) -> Result<Page, ApiError> {
        let start = Instant::now();
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.intervals
            .lock()
            .unwrap()
            .push((request.region.clone(), start, Instant::now()));

        let key = (
            request.region.clone(),
            request.resource.clone(),
            request.parent.clone(),
        );
        let items = self.responses.get(&key).cloned().unwrap_or(Ok(Vec::new()))?;
        Ok(Page {
            items,
            next_token: None,
        })
    }
}

pub fn image(tag: &str, pushed_at: &str) -> Value {
    json!({"imageTags": [tag], "imagePushedAt": pushed_at, "imageSizeInBytes": 1024})
}

/// Registry deployed in exactly `regions`
pub fn availability(regions: &[String]) -> StaticServiceMap {
    StaticServiceMap::default().with_service(
        "registry",
        ServiceDef {
            regions: regions.iter().cloned().collect(),
            global: false,
        },
    )
}

pub fn regions(names: &[&str]) -> Vec<String> {
    names.iter().map(|r| r.to_string()).collect()
}

pub fn zone(id: &str, private: bool) -> Value {
    json!({"id": id, "name": format!("{}.example.", id.to_lowercase()), "config": {"privateZone": private}})
}

/// Fresh context where only the global DNS service is deployed
pub fn dns_context(api: Arc<ScriptedApi>) -> RunContext {
    let api: Arc<dyn RemoteApi> = api;
    RunContext::new(
        api,
        Arc::new(ListCache::new()),
        Arc::new(StaticServiceMap::default().with_service(
            "dns",
            ServiceDef {
                global: true,
                ..ServiceDef::default()
            },
        )),
        "111122223333",
        EngineSettings {
            quiet: true,
            ..EngineSettings::default()
        },
    )
}

/// Fresh context with its own cache
pub fn context(api: Arc<ScriptedApi>, available: &[String], concurrency: usize) -> RunContext {
    let api: Arc<dyn RemoteApi> = api;
    RunContext::new(
        api,
        Arc::new(ListCache::new()),
        Arc::new(availability(available)),
        "111122223333",
        EngineSettings {
            concurrency,
            quiet: true,
            progress_interval: Duration::from_millis(5),
            ..EngineSettings::default()
        },
    )
}
