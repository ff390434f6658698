//! 설정 관리 — logminer.toml 파싱 및 런타임 설정
//!
//! [`LogminerConfig`]는 엔진과 데몬의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`LOGMINER_ENGINE_FLUSH_INTERVAL_MS=5000` 형식)
//! 3. 설정 파일 (`logminer.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), logminer_core::error::LogminerError> {
//! use logminer_core::config::LogminerConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = LogminerConfig::load("logminer.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = LogminerConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, LogminerError};

/// Logminer 통합 설정
///
/// `logminer.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogminerConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 로그 마이닝 엔진 설정
    #[serde(default)]
    pub engine: EngineConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl LogminerConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, LogminerError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LogminerError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LogminerError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                LogminerError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, LogminerError> {
        toml::from_str(toml_str).map_err(|e| {
            LogminerError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `LOGMINER_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "LOGMINER_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "LOGMINER_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.data_dir, "LOGMINER_GENERAL_DATA_DIR");
        override_string(&mut self.general.rules_dir, "LOGMINER_GENERAL_RULES_DIR");

        // Engine
        override_u64(
            &mut self.engine.flush_interval_ms,
            "LOGMINER_ENGINE_FLUSH_INTERVAL_MS",
        );
        override_u64(
            &mut self.engine.expiry_sweep_interval_ms,
            "LOGMINER_ENGINE_EXPIRY_SWEEP_INTERVAL_MS",
        );
        override_u64(
            &mut self.engine.rewatch_interval_secs,
            "LOGMINER_ENGINE_REWATCH_INTERVAL_SECS",
        );
        override_usize(
            &mut self.engine.read_buffer_size,
            "LOGMINER_ENGINE_READ_BUFFER_SIZE",
        );
        override_usize(
            &mut self.engine.line_channel_capacity,
            "LOGMINER_ENGINE_LINE_CHANNEL_CAPACITY",
        );
        override_string(&mut self.engine.library_db, "LOGMINER_ENGINE_LIBRARY_DB");
        override_string(&mut self.engine.record_db, "LOGMINER_ENGINE_RECORD_DB");
        override_string(&mut self.engine.rule_db, "LOGMINER_ENGINE_RULE_DB");
        override_string(
            &mut self.engine.rule_collection,
            "LOGMINER_ENGINE_RULE_COLLECTION",
        );
        override_bool(
            &mut self.engine.auto_enable_rules,
            "LOGMINER_ENGINE_AUTO_ENABLE_RULES",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "LOGMINER_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "LOGMINER_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "LOGMINER_METRICS_PORT");
        override_string(&mut self.metrics.endpoint, "LOGMINER_METRICS_ENDPOINT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), LogminerError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        let intervals = [
            ("engine.flush_interval_ms", self.engine.flush_interval_ms),
            (
                "engine.expiry_sweep_interval_ms",
                self.engine.expiry_sweep_interval_ms,
            ),
            (
                "engine.rewatch_interval_secs",
                self.engine.rewatch_interval_secs,
            ),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0".to_owned()));
            }
        }

        if self.engine.read_buffer_size == 0 {
            return Err(invalid(
                "engine.read_buffer_size",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.engine.line_channel_capacity == 0 {
            return Err(invalid(
                "engine.line_channel_capacity",
                "must be greater than 0".to_owned(),
            ));
        }

        let names = [
            ("engine.library_db", &self.engine.library_db),
            ("engine.record_db", &self.engine.record_db),
            ("engine.rule_db", &self.engine.rule_db),
            ("engine.rule_collection", &self.engine.rule_collection),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                return Err(invalid(field, "must not be empty".to_owned()));
            }
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid(
                "metrics.port",
                "must be non-zero when metrics are enabled".to_owned(),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> LogminerError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 파일 저장소 루트 디렉토리
    pub data_dir: String,
    /// 부팅 시 로드할 룰 파일(`*.json`) 디렉토리
    pub rules_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            data_dir: "/var/lib/logminer".to_owned(),
            rules_dir: "/etc/logminer/rules".to_owned(),
        }
    }
}

/// 로그 마이닝 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 오프셋 플러시 주기 (밀리초)
    pub flush_interval_ms: u64,
    /// 만료 파일 정리 주기 (밀리초)
    pub expiry_sweep_interval_ms: u64,
    /// 이벤트 누락 대비 재확인 주기 (초)
    pub rewatch_interval_secs: u64,
    /// 파일 읽기 버퍼 크기 (바이트)
    pub read_buffer_size: usize,
    /// 팔로워 라인 채널 용량
    pub line_channel_capacity: usize,
    /// 오프셋 저장 데이터베이스 (컬렉션 = 룰 이름)
    pub library_db: String,
    /// 감사 레코드 저장 데이터베이스
    pub record_db: String,
    /// 룰 레코드 저장 데이터베이스
    pub rule_db: String,
    /// 룰 레코드 컬렉션
    pub rule_collection: String,
    /// 룰 디렉토리에서 새로 로드한 룰을 활성 상태로 등록할지 여부
    pub auto_enable_rules: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 2000,
            expiry_sweep_interval_ms: 1000,
            rewatch_interval_secs: 10,
            read_buffer_size: 4096,
            line_channel_capacity: 1,
            library_db: "audit_lib".to_owned(),
            record_db: "logrecord".to_owned(),
            rule_db: "audit_rule".to_owned(),
            rule_collection: "data".to_owned(),
            auto_enable_rules: true,
        }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 리스닝 주소
    pub listen_addr: String,
    /// 리스닝 포트
    pub port: u16,
    /// 스크레이프 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}
