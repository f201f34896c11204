use loadgen::config::ConfigLoader;
use loadgen::runner::Runner;
use loadgen::{LoadTestConfig, Outcome, ScenarioOutcome};
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY: &str = "test-key-0123456789";

struct Harness {
    key_manager: MockServer,
    service: MockServer,
    reports: TempDir,
}

impl Harness {
    async fn new() -> Self {
        Self {
            key_manager: MockServer::start().await,
            service: MockServer::start().await,
            reports: tempfile::tempdir().unwrap(),
        }
    }

    async fn serve_key(&self) {
        Mock::given(method("GET"))
            .and(path("/api/translation/keys/get"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": { "key": KEY, "region": "eastasia" }
            })))
            .mount(&self.key_manager)
            .await;
    }

    async fn accept_reports(&self) {
        Mock::given(method("POST"))
            .and(path("/api/translation/keys/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .mount(&self.key_manager)
            .await;
    }

    async fn respond_with(&self, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/translate"))
            .respond_with(response)
            .mount(&self.service)
            .await;
    }

    fn config(&self, rpm: u32, duration_secs: u64) -> LoadTestConfig {
        let yaml = format!(
            r#"
name: integration
key_manager:
  base_url: {km}/api
  refresh_interval_ms: 200
rate:
  target_rpm: {rpm}
  duration_secs: {duration_secs}
  tick_ms: 20
request:
  timeout_ms: 2000
credentials:
  max_attempts: 3
  retry_interval_ms: 100
join_timeout_secs: 5
pause_between_secs: 0
output:
  type: csv
  dir: {dir}
scenarios:
  - name: TextTranslation
    pool: translation
    target:
      kind: translation
      endpoint: {svc}/translate
      from: en
      to: de
      text: hello world
"#,
            km = self.key_manager.uri(),
            svc = self.service.uri(),
            dir = self.reports.path().display(),
        );
        ConfigLoader::parse(&yaml, "yaml").unwrap()
    }

    async fn status_reports(&self) -> Vec<Value> {
        self.key_manager
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|request| request.url.path().ends_with("/keys/status"))
            .map(|request| request.body_json::<Value>().unwrap())
            .collect()
    }
}

async fn run(config: LoadTestConfig) -> Vec<ScenarioOutcome> {
    let (_stop_tx, stop_rx) = watch::channel(false);
    Runner::new(config).unwrap().run(stop_rx).await.unwrap()
}

fn translated() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!([{ "translations": [{ "text": "hallo welt", "to": "de" }] }]))
}

#[tokio::test]
async fn steady_rate_all_successful() {
    let harness = Harness::new().await;
    harness.serve_key().await;
    harness.accept_reports().await;
    harness.respond_with(translated()).await;

    let outcomes = run(harness.config(600, 2)).await;
    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];

    assert!((18..=21).contains(&outcome.dispatch.dispatched), "{:?}", outcome.dispatch);
    let summary = outcome.summary.completed().unwrap();
    assert_eq!(summary.total, outcome.dispatch.dispatched);
    assert_eq!(summary.success, summary.total);
    assert_eq!(summary.success_rate, 100.0);
    assert_eq!(summary.total_chars, summary.success * "hallo welt".chars().count() as u64);
    assert_eq!(summary.error_categories.to_string(), "none");
    assert!(harness.status_reports().await.is_empty());

    let report = outcome.report_path.as_ref().unwrap();
    assert!(report.starts_with(harness.reports.path()));
    let content = std::fs::read_to_string(report).unwrap();
    assert_eq!(content.lines().count(), 2);
}

#[tokio::test]
async fn every_call_rate_limited() {
    let harness = Harness::new().await;
    harness.serve_key().await;
    harness.accept_reports().await;
    harness.respond_with(ResponseTemplate::new(429)).await;

    let outcomes = run(harness.config(300, 1)).await;
    let summary = outcomes[0].summary.completed().unwrap();

    assert_eq!(summary.success, 0);
    assert_eq!(summary.success_rate, 0.0);
    assert_eq!(summary.achieved_rpm, 0.0);
    assert_eq!(summary.outcome_counts[&Outcome::RateLimited], summary.total);
    assert!(summary.error_categories.to_string().starts_with("rate_limited:"));

    let reports = harness.status_reports().await;
    assert_eq!(reports.len() as u64, summary.total);
    for report in reports {
        assert_eq!(report["code"], 429);
        assert_eq!(report["key"], KEY);
    }
}

#[tokio::test]
async fn key_manager_never_hands_out_a_key() {
    let harness = Harness::new().await;
    Mock::given(method("GET"))
        .and(path("/api/translation/keys/get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "pool exhausted"
        })))
        .mount(&harness.key_manager)
        .await;
    Mock::given(method("POST"))
        .and(path("/translate"))
        .respond_with(translated())
        .expect(0)
        .mount(&harness.service)
        .await;

    let outcomes = run(harness.config(300, 1)).await;
    let summary = outcomes[0].summary.completed().unwrap();

    assert!(summary.total > 0);
    assert_eq!(summary.outcome_counts[&Outcome::CredentialUnavailable], summary.total);
    assert!(harness.status_reports().await.is_empty());
}

#[tokio::test]
async fn rejected_key_and_malformed_body_are_reported() {
    let harness = Harness::new().await;
    harness.serve_key().await;
    harness.accept_reports().await;
    Mock::given(method("POST"))
        .and(path("/translate"))
        .respond_with(ResponseTemplate::new(403))
        .up_to_n_times(1)
        .mount(&harness.service)
        .await;
    harness
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "unexpected": true })))
        .await;

    let outcomes = run(harness.config(300, 1)).await;
    let summary = outcomes[0].summary.completed().unwrap();

    assert_eq!(summary.success, 0);
    assert_eq!(summary.outcome_counts[&Outcome::CredentialInvalid], 1);
    assert_eq!(
        summary.outcome_counts[&Outcome::MalformedResponse],
        summary.total - 1
    );

    let codes: Vec<u64> = harness
        .status_reports()
        .await
        .iter()
        .map(|report| report["code"].as_u64().unwrap())
        .collect();
    assert_eq!(codes.len() as u64, summary.total);
    assert_eq!(codes.iter().filter(|code| **code == 403).count(), 1);
    assert_eq!(codes.iter().filter(|code| **code == 200).count() as u64, summary.total - 1);
}

#[tokio::test]
async fn stop_signal_ends_the_run_early() {
    let harness = Harness::new().await;
    harness.serve_key().await;
    harness.respond_with(translated()).await;

    let (stop_tx, stop_rx) = watch::channel(false);
    let runner = Runner::new(harness.config(600, 30)).unwrap();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        stop_tx.send(true).unwrap();
    });

    let started = std::time::Instant::now();
    let outcomes = runner.run(stop_rx).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(outcomes[0].dispatch.dispatched < 20);
}

#[tokio::test]
async fn scenario_with_missing_audio_is_skipped() {
    let harness = Harness::new().await;
    harness.serve_key().await;
    harness.respond_with(translated()).await;

    let mut config = harness.config(300, 1);
    let mut broken = config.scenarios[0].clone();
    broken.name = "SpeechRecognition".to_string();
    broken.target = serde_json::from_value(json!({
        "kind": "speech_recognition",
        "endpoint": format!("{}/speech", harness.service.uri()),
        "audio": { "file": harness.reports.path().join("missing.wav") },
    }))
    .unwrap();
    config.scenarios.insert(0, broken);

    let outcomes = run(config).await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].name, "TextTranslation");
}

#[tokio::test]
async fn slow_service_times_out() {
    let harness = Harness::new().await;
    harness.serve_key().await;
    harness.accept_reports().await;
    harness
        .respond_with(translated().set_delay(Duration::from_secs(1)))
        .await;

    let mut config = harness.config(300, 1);
    config.request.timeout_ms = 200;
    let outcomes = run(config).await;
    let summary = outcomes[0].summary.completed().unwrap();

    assert!(summary.total > 0);
    assert_eq!(summary.outcome_counts[&Outcome::Timeout], summary.total);
    assert_eq!(summary.error_categories.to_string(), format!("timeout:{}", summary.total));

    let reports = harness.status_reports().await;
    assert_eq!(reports.len() as u64, summary.total);
    for report in reports {
        assert_eq!(report["code"], 408);
    }
}

#[tokio::test]
async fn unreachable_service_is_a_connection_error() {
    let harness = Harness::new().await;
    harness.serve_key().await;
    harness.accept_reports().await;

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let closed = format!("http://127.0.0.1:{}/translate", listener.local_addr().unwrap().port());
    drop(listener);

    let mut config = harness.config(300, 1);
    config.scenarios[0].target = serde_json::from_value(json!({
        "kind": "translation",
        "endpoint": closed,
        "text": "hello world",
    }))
    .unwrap();
    let outcomes = run(config).await;
    let summary = outcomes[0].summary.completed().unwrap();

    assert!(summary.total > 0);
    assert_eq!(summary.outcome_counts[&Outcome::TransportError], summary.total);
    assert_eq!(
        summary.error_categories.to_string(),
        format!("connection:{}", summary.total)
    );

    let reports = harness.status_reports().await;
    assert_eq!(reports.len() as u64, summary.total);
    for report in reports {
        assert_eq!(report["code"], 500);
        assert_eq!(report["note"], "Connection error");
    }
}

#[tokio::test]
async fn synthetic_speech_translation_uploads_generated_audio() {
    let harness = Harness::new().await;
    harness.serve_key().await;
    Mock::given(method("POST"))
        .and(path("/transcribe"))
        .and(query_param("api-version", "2024-11-15"))
        .and(header("Ocp-Apim-Subscription-Key", KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "combinedPhrases": [{ "text": "beep" }]
        })))
        .mount(&harness.service)
        .await;

    let mut config = harness.config(300, 1);
    config.scenarios[0].name = "SpeechTranslation".to_string();
    config.scenarios[0].target = serde_json::from_value(json!({
        "kind": "transcription",
        "endpoint": format!("{}/transcribe", harness.service.uri()),
        "api_version": "2024-11-15",
        "audio": { "synthetic": {} },
    }))
    .unwrap();
    let outcomes = run(config).await;
    assert_eq!(outcomes[0].name, "SpeechTranslation");
    let summary = outcomes[0].summary.completed().unwrap();
    assert_eq!(summary.success, summary.total);

    let uploads: Vec<_> = harness
        .service
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|request| request.url.path() == "/transcribe")
        .collect();
    assert_eq!(uploads.len() as u64, summary.total);
    let body = &uploads[0].body;
    let riff = body.windows(4).position(|window| window == b"RIFF").unwrap();
    // 44-byte header plus two seconds of 16 kHz 16-bit samples
    assert!(body.len() > riff + 44 + 64_000);
    assert!(String::from_utf8_lossy(body).contains("filename=\"test_audio.wav\""));
}
