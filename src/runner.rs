//! Composition root for a load test: wires the credential service, the
//! dispatcher and the workers for each scenario, then hands results to the
//! report writer.

use crate::config::{LoadTestConfig, RunConfig, ScenarioConfig};
use crate::credentials::{CredentialService, HttpKeyManager, KeyData, KeyManager};
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::error::{Error, Result};
use crate::metrics::MetricsCollector;
use crate::output::{create_writer, ReportWriter};
use crate::progress::RunProgress;
use crate::record::ResultSink;
use crate::report::{summarize, RunMetadata, Summary};
use crate::target::build_target;
use crate::worker::Worker;
use chrono::Local;
use indicatif::MultiProgress;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

const PROGRESS_PERIOD: Duration = Duration::from_millis(250);

/// What one finished scenario produced.
#[derive(Debug)]
pub struct ScenarioOutcome {
    pub name: String,
    pub dispatch: DispatchReport,
    pub metadata: RunMetadata,
    pub summary: Summary,
    pub report_path: Option<PathBuf>,
}

pub struct Runner {
    config: LoadTestConfig,
    client: Client,
    manager: Arc<dyn KeyManager>,
    multi: Option<Arc<MultiProgress>>,
}

impl Runner {
    pub fn new(config: LoadTestConfig) -> Result<Self> {
        let manager = HttpKeyManager::new(
            &config.key_manager.base_url,
            Duration::from_millis(config.key_manager.timeout_ms),
        )?;
        Self::with_key_manager(config, Arc::new(manager))
    }

    pub fn with_key_manager(config: LoadTestConfig, manager: Arc<dyn KeyManager>) -> Result<Self> {
        let client = build_client(&config)?;
        Ok(Self {
            config,
            client,
            manager,
            multi: None,
        })
    }

    pub fn with_progress(mut self, multi: Arc<MultiProgress>) -> Self {
        self.multi = Some(multi);
        self
    }

    pub fn config(&self) -> &LoadTestConfig {
        &self.config
    }

    /// Asks the key manager once per pool for a key.
    pub async fn probe(&self) -> Vec<(String, Result<Option<KeyData>>)> {
        let mut results = Vec::new();
        for pool in self.config.pools() {
            let result = self.manager.fetch(&pool, &self.config.key_manager.region).await;
            results.push((pool, result));
        }
        results
    }

    /// Runs every scenario in order. Stops early once `stop` turns true.
    pub async fn run(&self, stop: watch::Receiver<bool>) -> Result<Vec<ScenarioOutcome>> {
        self.log_connectivity().await;

        let service = CredentialService::start(
            self.manager.clone(),
            &self.config.key_manager.region,
            self.config.pools(),
            Duration::from_millis(self.config.key_manager.refresh_interval_ms),
        )?;
        let mut writer = create_writer(&self.config.output, self.multi.clone())?;

        let result = self
            .run_scenarios(&service, writer.as_mut(), stop)
            .await;

        if let Err(e) = writer.close().await {
            log::warn!("Closing report writer failed: {}", e);
        }
        service.shutdown().await;
        result
    }

    async fn run_scenarios(
        &self,
        service: &CredentialService,
        writer: &mut dyn ReportWriter,
        mut stop: watch::Receiver<bool>,
    ) -> Result<Vec<ScenarioOutcome>> {
        let mut outcomes = Vec::new();
        let total = self.config.scenarios.len();

        for (position, scenario) in self.config.scenarios.iter().enumerate() {
            if *stop.borrow() {
                log::info!("Stop requested, skipping remaining scenarios");
                break;
            }

            match self.run_scenario(scenario, service, writer, stop.clone()).await? {
                Some(outcome) => outcomes.push(outcome),
                None => continue,
            }

            if position + 1 < total && self.config.pause_between_secs > 0 {
                let pause = Duration::from_secs(self.config.pause_between_secs);
                log::info!("Pausing {:?} before next scenario", pause);
                tokio::select! {
                    _ = sleep(pause) => {}
                    _ = stop.wait_for(|stopped| *stopped) => {}
                }
            }
        }

        Ok(outcomes)
    }

    /// Runs one scenario. Returns `None` when its target could not be built.
    pub async fn run_scenario(
        &self,
        scenario: &ScenarioConfig,
        service: &CredentialService,
        writer: &mut dyn ReportWriter,
        stop: watch::Receiver<bool>,
    ) -> Result<Option<ScenarioOutcome>> {
        let target = match build_target(&scenario.target) {
            Ok(target) => target,
            Err(e) => {
                log::error!("Skipping scenario '{}': {}", scenario.name, e);
                return Ok(None);
            }
        };
        let credentials = service.cache(&scenario.pool).ok_or_else(|| {
            Error::Internal(format!("no credential cache for pool '{}'", scenario.pool))
        })?;

        let run_config = Arc::new(self.config.run_config(scenario));
        log_plan(&run_config);

        let metrics = MetricsCollector::new();
        let sink = ResultSink::new();
        let worker = Arc::new(Worker::new(
            target,
            credentials,
            self.client.clone(),
            sink.clone(),
            metrics.clone(),
            run_config.clone(),
        ));
        let dispatcher = Dispatcher::new(
            run_config.interval(),
            run_config.duration,
            run_config.tick,
            run_config.join_timeout,
            metrics.clone(),
        );

        let progress = match &self.multi {
            Some(multi) => Some(RunProgress::start(
                multi,
                &scenario.name,
                run_config.expected_requests(),
                metrics.watch(PROGRESS_PERIOD),
            )?),
            None => None,
        };

        let started_at = Local::now();
        let dispatch = dispatcher.run(worker, stop).await?;
        if let Some(progress) = progress {
            progress.finish(&metrics.snapshot());
        }

        let results = sink.snapshot().await;
        let metadata = RunMetadata::new(&run_config, dispatch.elapsed, started_at);
        let summary = summarize(&results, &metadata);

        let report_path = match &summary {
            Summary::NoData => {
                log::warn!("No data recorded for '{}', no report written", scenario.name);
                None
            }
            Summary::Completed(run_summary) => {
                log::info!(
                    "'{}': {} results, {:.1}% success, {:.1} rpm achieved, errors: {}",
                    scenario.name,
                    run_summary.total,
                    run_summary.success_rate,
                    run_summary.achieved_rpm,
                    run_summary.error_categories
                );
                writer.write(&metadata, run_summary).await?
            }
        };

        Ok(Some(ScenarioOutcome {
            name: scenario.name.clone(),
            dispatch,
            metadata,
            summary,
            report_path,
        }))
    }

    async fn log_connectivity(&self) {
        let Some(pool) = self.config.pools().into_iter().next() else {
            return;
        };
        match self.manager.fetch(&pool, &self.config.key_manager.region).await {
            Ok(Some(_)) => log::info!(
                "Key manager reachable at {} (pool '{}' returned a key)",
                self.config.key_manager.base_url,
                pool
            ),
            Ok(None) => log::warn!(
                "Key manager reachable at {} but pool '{}' has no key",
                self.config.key_manager.base_url,
                pool
            ),
            Err(e) => log::warn!(
                "Key manager at {} not reachable: {}",
                self.config.key_manager.base_url,
                e
            ),
        }
    }
}

fn build_client(config: &LoadTestConfig) -> Result<Client> {
    let mut builder = Client::builder();
    if let Some(proxy) = &config.request.proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }
    Ok(builder.build()?)
}

fn log_plan(config: &RunConfig) {
    log::info!(
        "Starting '{}': {} rpm for {:?} (interval {:?}, ~{} requests, pool '{}', key refresh every {:?})",
        config.test_name,
        config.target_rate_per_minute,
        config.duration,
        config.interval(),
        config.expected_requests(),
        config.pool,
        config.refresh_interval
    );
}
