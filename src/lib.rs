pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod output;
pub mod progress;
pub mod record;
pub mod report;
pub mod runner;
pub mod target;
pub mod worker;

pub use credentials::{Credential, CredentialCache, CredentialService, HttpKeyManager, KeyManager};
pub use dispatcher::{DispatchReport, Dispatcher, DispatcherState, Task};
pub use config::{LoadTestConfig, RunConfig};
pub use error::{Error, Result};
pub use metrics::collector::MetricsCollector;
pub use metrics::snapshot::MetricsSnapshot;
pub use record::{Outcome, RequestResult, ResultSink};
pub use report::{summarize, RunMetadata, RunSummary, Summary};
pub use runner::{Runner, ScenarioOutcome};
pub use worker::Worker;
