//! Orchestrator
//!
//! Fans one worker out per region, bounded by a semaphore of `concurrency`
//! permits, and fans their records back in through the aggregator.
//!
//! Shutdown order is fixed:
//! 1. join every worker,
//! 2. stop the progress reporter and wait for its acknowledgment,
//! 3. stop the aggregator and wait for its acknowledgment (the inventory).

use super::aggregator::{Aggregator, RecordSender};
use super::availability::{region_available, ServiceAvailability};
use super::context::RunContext;
use super::counter::{CommandCounter, CommandCounts, TaskGuard};
use super::module::{RegionTask, ScanModule};
use super::progress::{NullSink, ProgressReporter, ProgressSink, TerminalSink};
use crate::api::CachedApi;
use crate::error::{ApiError, ScanError};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Outcome of one module run
#[derive(Debug)]
pub struct RunReport<T> {
    pub module: &'static str,
    /// Records in completion order
    pub records: Vec<T>,
    pub counts: CommandCounts,
    pub errors: Vec<ScanError>,
    pub elapsed: Duration,
}

impl<T> RunReport<T> {
    pub fn has_errors(&self) -> bool {
        self.counts.error > 0 || !self.errors.is_empty()
    }
}

/// Everything one worker needs, cloned per task
struct Worker<M: ScanModule> {
    module: Arc<M>,
    api: CachedApi,
    availability: Arc<dyn ServiceAvailability>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    records: RecordSender<M::Record>,
}

impl<M: ScanModule> Worker<M> {
    fn cancelled(region: &str, guard: TaskGuard) -> Vec<ScanError> {
        guard.fail();
        vec![ScanError::fetch(region, ApiError::Cancelled)]
    }

    /// Returns every error the region produced; empty on success or skip
    async fn run(self, task: RegionTask, mut guard: TaskGuard) -> Vec<ScanError> {
        let name = self.module.name();

        let available = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Self::cancelled(&task.region, guard),
            available = region_available(
                self.availability.as_ref(),
                name,
                self.module.service(),
                &task.region,
            ) => available,
        };
        if !available {
            guard.skip();
            return Vec::new();
        }

        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Self::cancelled(&task.region, guard),
            permit = self.permits.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return Self::cancelled(&task.region, guard),
            },
        };

        guard.start();
        tracing::debug!(module = %name, "Fetching {}", task.region);

        match self.module.fetch_region(&self.api, &task).await {
            Ok(output) => {
                let count = output.records.len();
                for record in output.records {
                    if self.records.send(record).await.is_err() {
                        tracing::error!(module = %name, "Aggregator closed before {} finished sending", task.region);
                        break;
                    }
                }
                tracing::debug!(module = %name, "{} produced {} records", task.region, count);

                if output.errors.is_empty() {
                    guard.complete();
                } else {
                    for e in &output.errors {
                        tracing::error!(module = %name, "{}", e);
                    }
                    guard.fail();
                }
                output.errors
            }
            Err(e) => {
                tracing::error!(module = %name, "{}", e);
                guard.fail();
                vec![e]
            }
        }
    }
}

/// Run `module` over `regions` and return its consolidated inventory
pub async fn run_module<M: ScanModule>(
    module: Arc<M>,
    regions: &[String],
    ctx: &RunContext,
) -> RunReport<M::Record> {
    let sink: Box<dyn ProgressSink> = if ctx.settings.quiet {
        Box::new(NullSink)
    } else {
        Box::new(TerminalSink)
    };
    run_module_with_sink(module, regions, ctx, sink).await
}

/// [`run_module`] with an explicit progress sink
pub async fn run_module_with_sink<M: ScanModule, S: ProgressSink>(
    module: Arc<M>,
    regions: &[String],
    ctx: &RunContext,
    sink: S,
) -> RunReport<M::Record> {
    let started = Instant::now();
    let name = module.name();
    let regions = module.regions(regions);
    let concurrency = ctx.settings.concurrency.max(1);

    tracing::info!(
        module = %name,
        run = %ctx.run_id,
        "Enumerating {} {} for account {} with {} workers",
        regions.len(),
        module.unit(),
        ctx.account(),
        concurrency
    );

    let counter = Arc::new(CommandCounter::new());
    let reporter = ProgressReporter::spawn(
        name,
        module.unit(),
        counter.clone(),
        ctx.settings.progress_interval,
        sink,
    );
    let (aggregator, records) = Aggregator::spawn(ctx.settings.channel_capacity);
    let permits = Arc::new(Semaphore::new(concurrency));

    let mut workers = JoinSet::new();
    for region in regions {
        let task = RegionTask {
            region: region.clone(),
            account: ctx.account().to_string(),
        };
        let guard = TaskGuard::enqueue(counter.clone());
        let worker = Worker {
            module: module.clone(),
            api: ctx.api.clone(),
            availability: ctx.availability.clone(),
            permits: permits.clone(),
            cancel: ctx.cancel_token().clone(),
            records: records.clone(),
        };

        workers.spawn(async move {
            match AssertUnwindSafe(worker.run(task, guard)).catch_unwind().await {
                Ok(errors) => errors,
                Err(_) => vec![ScanError::WorkerPanic { region }],
            }
        });
    }
    drop(records);

    let mut errors = Vec::new();
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(region_errors) => {
                for e in &region_errors {
                    if let ScanError::WorkerPanic { .. } = e {
                        tracing::error!(module = %name, "{}", e);
                    }
                }
                errors.extend(region_errors);
            }
            Err(e) => tracing::error!(module = %name, "Worker task failed: {}", e),
        }
    }

    reporter.stop().await;
    let records = aggregator.stop().await;
    let counts = counter.snapshot();

    let stats = ctx.api.cache().stats();
    tracing::info!(
        module = %name,
        "Finished: {} records, {} complete, {} errors, {} skipped (cache: {} lookups, {} hits)",
        records.len(),
        counts.complete,
        counts.error,
        counts.skipped,
        stats.lookups,
        stats.hits()
    );

    RunReport {
        module: name,
        records,
        counts,
        errors,
        elapsed: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ListCache, ListRequest, Page, RemoteApi};
    use crate::engine::availability::{ServiceDef, StaticServiceMap};
    use crate::engine::context::EngineSettings;
    use crate::engine::module::RegionOutput;
    use crate::error::AvailabilityError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Remote side scripted per region; tracks overlapping calls
    #[derive(Default)]
    struct Scripted {
        responses: HashMap<String, Result<Vec<Value>, ApiError>>,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteApi for Scripted {
        async fn list(&self, request: &ListRequest, _token: Option<&str>) -> Result<Page, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let items = self
                .responses
                .get(&request.region)
                .cloned()
                .unwrap_or(Ok(Vec::new()))?;
            Ok(Page {
                items,
                next_token: None,
            })
        }
    }

    /// Emits every listed item as a record
    struct Echo;

    #[async_trait]
    impl ScanModule for Echo {
        type Record = (String, Value);

        fn name(&self) -> &'static str {
            "echo"
        }

        fn service(&self) -> &'static str {
            "echo"
        }

        async fn fetch_region(
            &self,
            api: &CachedApi,
            task: &RegionTask,
        ) -> Result<RegionOutput<Self::Record>, ScanError> {
            let items = api
                .list_all(&ListRequest::new(&task.region, "things"))
                .await
                .map_err(|e| ScanError::fetch(&task.region, e))?;
            Ok(items
                .iter()
                .map(|item| (task.region.clone(), item.clone()))
                .collect::<Vec<_>>()
                .into())
        }

        fn header(&self) -> Vec<&'static str> {
            vec!["Region", "Item"]
        }

        fn row(&self, record: &Self::Record) -> Vec<String> {
            vec![record.0.clone(), record.1.to_string()]
        }
    }

    struct Panics;

    #[async_trait]
    impl ScanModule for Panics {
        type Record = ();

        fn name(&self) -> &'static str {
            "panics"
        }

        fn service(&self) -> &'static str {
            "echo"
        }

        async fn fetch_region(
            &self,
            _api: &CachedApi,
            task: &RegionTask,
        ) -> Result<RegionOutput<()>, ScanError> {
            if task.region == "bad" {
                panic!("transform bug");
            }
            Ok(vec![()].into())
        }

        fn header(&self) -> Vec<&'static str> {
            vec![]
        }

        fn row(&self, _: &()) -> Vec<String> {
            vec![]
        }
    }

    fn context(api: Arc<Scripted>, regions: &[&str], concurrency: usize) -> RunContext {
        let map = StaticServiceMap::default().with_service(
            "echo",
            ServiceDef {
                regions: regions.iter().map(|r| r.to_string()).collect(),
                global: false,
            },
        );
        RunContext::new(
            api,
            Arc::new(ListCache::new()),
            Arc::new(map),
            "123456789012",
            EngineSettings {
                concurrency,
                channel_capacity: 1,
                progress_interval: Duration::from_millis(5),
                quiet: true,
                call_timeout: None,
            },
        )
    }

    fn regions(names: &[&str]) -> Vec<String> {
        names.iter().map(|r| r.to_string()).collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_records_from_all_regions_are_aggregated() {
        let mut api = Scripted::default();
        api.responses.insert("a".into(), Ok(vec![json!(1), json!(2)]));
        api.responses.insert("b".into(), Ok(vec![json!(3)]));
        api.responses.insert("c".into(), Ok(vec![]));
        let api = Arc::new(api);
        let ctx = context(api.clone(), &["a", "b", "c"], 2);

        let report = run_module(Arc::new(Echo), &regions(&["a", "b", "c"]), &ctx).await;

        assert_eq!(report.records.len(), 3);
        assert_eq!(report.counts.complete, 3);
        assert_eq!(report.counts.error, 0);
        assert!(report.counts.is_settled());
        assert!(!report.has_errors());
    }

    #[tokio::test]
    async fn test_unavailable_region_is_skipped_without_calls() {
        let api = Arc::new(Scripted::default());
        let ctx = context(api.clone(), &["a"], 4);

        let report = run_module(Arc::new(Echo), &regions(&["a", "z"]), &ctx).await;

        assert_eq!(report.counts.complete, 1);
        assert_eq!(report.counts.skipped, 1);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failed_region_does_not_affect_others() {
        let mut api = Scripted::default();
        api.responses.insert("a".into(), Ok(vec![json!(1)]));
        api.responses.insert(
            "c".into(),
            Err(ApiError::Status {
                status: 500,
                message: String::new(),
            }),
        );
        let ctx = context(Arc::new(api), &["a", "c"], 2);

        let report = run_module(Arc::new(Echo), &regions(&["a", "c"]), &ctx).await;

        assert_eq!(report.counts.error, 1);
        assert_eq!(report.counts.complete, 1);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].region(), "c");
        assert!(report.records.iter().all(|(region, _)| region == "a"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_limit_is_respected() {
        let api = Arc::new(Scripted {
            delay: Duration::from_millis(10),
            ..Default::default()
        });
        let names: Vec<String> = (0..12).map(|i| format!("r{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        let ctx = context(api.clone(), &refs, 3);

        let report = run_module(Arc::new(Echo), &names, &ctx).await;

        assert_eq!(report.counts.complete, 12);
        assert!(api.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_cancelled_run_still_completes() {
        let api = Arc::new(Scripted {
            delay: Duration::from_secs(3600),
            ..Default::default()
        });
        let ctx = context(api, &["a", "b", "c"], 1);
        let cancel = ctx.cancel_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let report = run_module(Arc::new(Echo), &regions(&["a", "b", "c"]), &ctx).await;

        assert_eq!(report.counts.error, 3);
        assert!(report.errors.iter().all(|e| e.is_cancelled()));
        assert!(report.counts.is_settled());
    }

    /// Availability lookup that never answers
    struct Hanging;

    #[async_trait]
    impl ServiceAvailability for Hanging {
        async fn is_available(&self, _service: &str, _region: &str) -> Result<bool, AvailabilityError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancel_releases_workers_stuck_on_availability() {
        let api: Arc<dyn RemoteApi> = Arc::new(Scripted::default());
        let ctx = RunContext::new(
            api,
            Arc::new(ListCache::new()),
            Arc::new(Hanging),
            "123456789012",
            EngineSettings {
                quiet: true,
                ..EngineSettings::default()
            },
        );
        let _deadline = ctx.cancel_after(Duration::from_millis(20));

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            run_module(Arc::new(Echo), &regions(&["a", "b"]), &ctx),
        )
        .await
        .expect("run should end once cancelled");

        assert_eq!(report.counts.error, 2);
        assert!(report.counts.is_settled());
        assert!(report.errors.iter().all(|e| e.is_cancelled()));
    }

    /// Emits one record and one error for every region
    struct HalfBroken;

    #[async_trait]
    impl ScanModule for HalfBroken {
        type Record = String;

        fn name(&self) -> &'static str {
            "half"
        }

        fn service(&self) -> &'static str {
            "echo"
        }

        async fn fetch_region(
            &self,
            _api: &CachedApi,
            task: &RegionTask,
        ) -> Result<RegionOutput<String>, ScanError> {
            Ok(RegionOutput::partial(
                vec![task.region.clone()],
                vec![ScanError::transform(&task.region, "one part failed")],
            ))
        }

        fn header(&self) -> Vec<&'static str> {
            vec!["Region"]
        }

        fn row(&self, record: &String) -> Vec<String> {
            vec![record.clone()]
        }
    }

    #[tokio::test]
    async fn test_partial_output_keeps_records_and_errors() {
        let ctx = context(Arc::new(Scripted::default()), &["a"], 1);

        let report = run_module(Arc::new(HalfBroken), &regions(&["a"]), &ctx).await;

        assert_eq!(report.records, vec!["a".to_string()]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.counts.error, 1);
        assert!(report.has_errors());
    }

    #[tokio::test]
    async fn test_worker_panic_is_contained() {
        let ctx = context(Arc::new(Scripted::default()), &["good", "bad"], 2);

        let report = run_module(Arc::new(Panics), &regions(&["good", "bad"]), &ctx).await;

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.counts.complete, 1);
        assert_eq!(report.counts.error, 1);
        assert!(matches!(
            report.errors.as_slice(),
            [ScanError::WorkerPanic { region }] if region == "bad"
        ));
    }

    #[tokio::test]
    async fn test_empty_region_list() {
        let ctx = context(Arc::new(Scripted::default()), &[], 2);
        let report = run_module(Arc::new(Echo), &[], &ctx).await;
        assert!(report.records.is_empty());
        assert_eq!(report.counts, CommandCounts::default());
    }
}
