use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoadTestConfig {
    #[serde(default)]
    #[validate(length(min = 1))]
    pub name: String,

    #[serde(default)]
    #[validate]
    pub key_manager: KeyManagerConfig,

    #[serde(default)]
    #[validate]
    pub rate: RateConfig,

    #[serde(default)]
    #[validate]
    pub request: RequestConfig,

    #[serde(default)]
    #[validate]
    pub credentials: CredentialConfig,

    #[serde(default = "default_join_timeout")]
    #[validate(range(min = 1))]
    pub join_timeout_secs: u64,

    #[serde(default = "default_pause")]
    pub pause_between_secs: u64,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    #[validate(length(min = 1))]
    pub scenarios: Vec<ScenarioConfig>,

    /// Optional path to a parent configuration file to inherit from
    #[serde(default)]
    pub extends: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct KeyManagerConfig {
    #[serde(default = "default_key_manager_url")]
    #[validate(length(min = 1))]
    pub base_url: String,

    #[serde(default = "default_region")]
    #[validate(length(min = 1))]
    pub region: String,

    #[serde(default = "default_refresh_interval")]
    #[validate(range(min = 1))]
    pub refresh_interval_ms: u64,

    #[serde(default = "default_key_manager_timeout")]
    #[validate(range(min = 1))]
    pub timeout_ms: u64,
}

impl Default for KeyManagerConfig {
    fn default() -> Self {
        Self {
            base_url: default_key_manager_url(),
            region: default_region(),
            refresh_interval_ms: default_refresh_interval(),
            timeout_ms: default_key_manager_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RateConfig {
    /// Requests fired per minute, evenly spaced.
    #[serde(default = "default_target_rpm")]
    #[validate(range(min = 0.001))]
    pub target_rpm: f64,

    #[serde(default = "default_duration")]
    #[validate(range(min = 1))]
    pub duration_secs: u64,

    /// Upper bound on how long the dispatcher sleeps between checks.
    #[serde(default = "default_tick")]
    #[validate(range(min = 1))]
    pub tick_ms: u64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            target_rpm: default_target_rpm(),
            duration_secs: default_duration(),
            tick_ms: default_tick(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RequestConfig {
    #[serde(default = "default_request_timeout")]
    #[validate(range(min = 1))]
    pub timeout_ms: u64,

    /// Proxy for calls to the target service; the key manager is always reached directly.
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_request_timeout(),
            proxy: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CredentialConfig {
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1))]
    pub max_attempts: u32,

    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: u64,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_interval_ms: default_retry_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputConfig {
    Console,
    Csv {
        #[serde(default = "default_output_dir")]
        dir: String,
    },
    Json {
        #[serde(default = "default_output_dir")]
        dir: String,
    },
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig::Csv {
            dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ScenarioConfig {
    #[validate(length(min = 1))]
    pub name: String,

    /// Key manager pool path segment; empty means the manager's root pool.
    #[serde(default)]
    pub pool: String,

    #[serde(default)]
    #[validate(range(min = 0.001))]
    pub target_rpm: Option<f64>,

    #[serde(default)]
    #[validate(range(min = 1))]
    pub duration_secs: Option<u64>,

    pub target: TargetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetConfig {
    Translation {
        #[serde(default = "default_translation_endpoint")]
        endpoint: String,
        #[serde(default = "default_translation_from")]
        from: String,
        #[serde(default = "default_translation_to")]
        to: String,
        text: String,
    },
    SpeechRecognition {
        #[serde(default = "default_recognition_endpoint")]
        endpoint: String,
        audio: AudioSource,
        #[serde(default = "default_recognition_language")]
        language: String,
        #[serde(default = "default_sample_rate")]
        sample_rate: u32,
    },
    Transcription {
        #[serde(default = "default_transcription_endpoint")]
        endpoint: String,
        #[serde(default = "default_transcription_api_version")]
        api_version: String,
        audio: AudioSource,
        #[serde(default = "default_transcription_locales")]
        locales: Vec<String>,
    },
}

/// Where a speech target's payload comes from.
///
/// `synthetic` generates a 16-bit mono sine tone in memory, so a scenario can
/// run without any audio on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioSource {
    File(PathBuf),
    Synthetic {
        #[serde(default = "default_tone_seconds")]
        seconds: f64,
        #[serde(default = "default_tone_frequency")]
        frequency_hz: f64,
        #[serde(default = "default_tone_sample_rate")]
        sample_rate: u32,
    },
}

impl TargetConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            TargetConfig::Translation { .. } => "translation",
            TargetConfig::SpeechRecognition { .. } => "speech_recognition",
            TargetConfig::Transcription { .. } => "transcription",
        }
    }
}

/// Immutable parameters of one scenario run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub test_name: String,
    pub pool: String,
    pub target_rate_per_minute: f64,
    pub duration: Duration,
    pub request_timeout: Duration,
    /// Background key refresh period of the pool's cache.
    pub refresh_interval: Duration,
    pub max_credential_retries: u32,
    pub credential_retry_interval: Duration,
    pub join_timeout: Duration,
    pub tick: Duration,
}

impl RunConfig {
    /// Spacing between two emitted requests.
    pub fn interval(&self) -> Duration {
        Duration::from_nanos((60_000_000_000.0 / self.target_rate_per_minute).round() as u64)
    }

    pub fn expected_requests(&self) -> u64 {
        (self.target_rate_per_minute * self.duration.as_secs_f64() / 60.0).floor() as u64
    }
}

impl LoadTestConfig {
    pub fn run_config(&self, scenario: &ScenarioConfig) -> RunConfig {
        RunConfig {
            test_name: scenario.name.clone(),
            pool: scenario.pool.clone(),
            target_rate_per_minute: scenario.target_rpm.unwrap_or(self.rate.target_rpm),
            duration: Duration::from_secs(scenario.duration_secs.unwrap_or(self.rate.duration_secs)),
            request_timeout: Duration::from_millis(self.request.timeout_ms),
            refresh_interval: Duration::from_millis(self.key_manager.refresh_interval_ms),
            max_credential_retries: self.credentials.max_attempts,
            credential_retry_interval: Duration::from_millis(self.credentials.retry_interval_ms),
            join_timeout: Duration::from_secs(self.join_timeout_secs),
            tick: Duration::from_millis(self.rate.tick_ms),
        }
    }

    /// Distinct key manager pools referenced by the scenarios, in order.
    pub fn pools(&self) -> Vec<String> {
        let mut pools: Vec<String> = Vec::new();
        for scenario in &self.scenarios {
            if !pools.contains(&scenario.pool) {
                pools.push(scenario.pool.clone());
            }
        }
        pools
    }
}

fn default_join_timeout() -> u64 {
    30
}

fn default_pause() -> u64 {
    5
}

fn default_key_manager_url() -> String {
    "http://localhost:3019/api".to_string()
}

fn default_region() -> String {
    "eastasia".to_string()
}

fn default_refresh_interval() -> u64 {
    500
}

fn default_key_manager_timeout() -> u64 {
    10_000
}

fn default_target_rpm() -> f64 {
    1000.0
}

fn default_duration() -> u64 {
    60
}

fn default_tick() -> u64 {
    100
}

fn default_request_timeout() -> u64 {
    45_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_interval() -> u64 {
    1000
}

fn default_tone_seconds() -> f64 {
    2.0
}

fn default_tone_frequency() -> f64 {
    440.0
}

fn default_tone_sample_rate() -> u32 {
    16_000
}

fn default_output_dir() -> String {
    "test_results".to_string()
}

fn default_translation_endpoint() -> String {
    "https://api.cognitive.microsofttranslator.com/translate".to_string()
}

fn default_translation_from() -> String {
    "en".to_string()
}

fn default_translation_to() -> String {
    "zh-Hans".to_string()
}

fn default_recognition_endpoint() -> String {
    "https://{region}.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1"
        .to_string()
}

fn default_recognition_language() -> String {
    "zh-CN".to_string()
}

fn default_sample_rate() -> u32 {
    16_000
}

fn default_transcription_endpoint() -> String {
    "https://{region}.cognitiveservices.azure.com/speechtotext/transcriptions:transcribe".to_string()
}

fn default_transcription_api_version() -> String {
    "2024-11-15".to_string()
}

fn default_transcription_locales() -> Vec<String> {
    vec!["en-US".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(rpm: Option<f64>, duration: Option<u64>) -> ScenarioConfig {
        ScenarioConfig {
            name: "TextTranslation".to_string(),
            pool: "translation".to_string(),
            target_rpm: rpm,
            duration_secs: duration,
            target: TargetConfig::Translation {
                endpoint: default_translation_endpoint(),
                from: "en".to_string(),
                to: "zh-Hans".to_string(),
                text: "hello".to_string(),
            },
        }
    }

    fn config(scenarios: Vec<ScenarioConfig>) -> LoadTestConfig {
        LoadTestConfig {
            name: "azure".to_string(),
            key_manager: KeyManagerConfig::default(),
            rate: RateConfig::default(),
            request: RequestConfig::default(),
            credentials: CredentialConfig::default(),
            join_timeout_secs: default_join_timeout(),
            pause_between_secs: default_pause(),
            output: OutputConfig::default(),
            scenarios,
            extends: None,
        }
    }

    #[test]
    fn scenario_overrides_rate_and_duration() {
        let cfg = config(vec![scenario(Some(600.0), Some(10))]);
        let run = cfg.run_config(&cfg.scenarios[0]);
        assert_eq!(run.interval(), Duration::from_millis(100));
        assert_eq!(run.duration, Duration::from_secs(10));
        assert_eq!(run.expected_requests(), 100);
        assert_eq!(run.pool, "translation");
    }

    #[test]
    fn run_config_falls_back_to_global_rate() {
        let cfg = config(vec![scenario(None, None)]);
        let run = cfg.run_config(&cfg.scenarios[0]);
        assert_eq!(run.target_rate_per_minute, 1000.0);
        assert_eq!(run.expected_requests(), 1000);
        assert_eq!(run.interval(), Duration::from_millis(60));
        assert_eq!(run.refresh_interval, Duration::from_millis(default_refresh_interval()));
    }

    #[test]
    fn pools_are_deduplicated_in_order() {
        let mut speech = scenario(None, None);
        speech.pool = String::new();
        let cfg = config(vec![scenario(None, None), speech, scenario(None, None)]);
        assert_eq!(cfg.pools(), vec!["translation".to_string(), String::new()]);
    }

    #[test]
    fn synthetic_audio_defaults_to_two_second_a4() {
        let yaml = r#"
name: SpeechTranslation
pool: translation
target:
  kind: transcription
  audio: { synthetic: {} }
"#;
        let scenario: ScenarioConfig = serde_yaml::from_str(yaml).unwrap();
        match scenario.target {
            TargetConfig::Transcription { audio, locales, .. } => {
                assert_eq!(
                    audio,
                    AudioSource::Synthetic {
                        seconds: 2.0,
                        frequency_hz: 440.0,
                        sample_rate: 16_000,
                    }
                );
                assert_eq!(locales, vec!["en-US".to_string()]);
            }
            other => panic!("unexpected target {:?}", other),
        }
    }
}
