//! 추출 룰 데이터 타입
//!
//! 룰 텍스트(JSON)에서 역직렬화되는 구조체들을 정의합니다.

use serde::{Deserialize, Serialize};

use logminer_core::types::SystemType;

use crate::error::LogMiningError;

/// 추출 룰 -- 감시 위치, 대상 파일, 라인 파싱 방법을 기술합니다.
///
/// # JSON 스키마
/// ```json
/// {
///   "dir": "/logs",
///   "filePattern": "(\\d+\\.\\d+\\.\\d+\\.\\d+.*\\.log)",
///   "host": "(\\d+\\.\\d+\\.\\d+\\.\\d+)",
///   "logDate": "(\\d+-\\d+-\\d+)",
///   "device": "route",
///   "systemType": "switch",
///   "linePattern": "",
///   "linePrefixPattern": "(\\w+  \\d \\d+:\\d+:\\d+ \\w+ \\w+: )",
///   "columnPattern": { "UserName": 6, "IpAddr": "(\\(\\d+.\\d+.\\d+.\\d+\\))" }
/// }
/// ```
///
/// 자식 디렉토리마다 `dir`만 바꾼 사본을 사용하므로 로드 후에는 변경하지 않습니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleOptions {
    /// 파일 이름에서 호스트를 추출하는 정규식
    pub host: String,
    /// 파일 이름에서 로그 날짜를 추출하는 정규식
    pub log_date: String,
    /// 레코드에 기록할 장비 태그
    pub device: String,
    /// 레코드에 기록할 장비 유형
    pub system_type: SystemType,
    /// 감시할 루트 디렉토리
    pub dir: String,
    /// 대상 파일 이름 정규식
    pub file_pattern: String,
    /// 라인 유효성 정규식 (빈 값은 모든 라인 허용)
    pub line_pattern: String,
    /// 라인 접두부 정규식 (매칭 부분을 제거한 나머지가 Operation)
    pub line_prefix_pattern: String,
    /// 필드별 추출 방법
    pub column_pattern: ColumnPattern,
}

impl RuleOptions {
    /// 룰 텍스트를 파싱하고 검증합니다.
    pub fn from_json(name: &str, text: &str) -> Result<Self, LogMiningError> {
        let rule: Self = serde_json::from_str(text).map_err(|e| LogMiningError::RuleParse {
            name: name.to_owned(),
            reason: e.to_string(),
        })?;
        rule.validate()?;
        Ok(rule)
    }

    /// 룰을 JSON 텍스트로 직렬화합니다.
    pub fn to_json(&self) -> Result<String, LogMiningError> {
        serde_json::to_string(self).map_err(|e| LogMiningError::RuleValidation {
            field: "(rule)".to_owned(),
            reason: e.to_string(),
        })
    }

    /// 감시 디렉토리만 바꾼 사본을 반환합니다.
    pub fn for_dir(&self, dir: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            ..self.clone()
        }
    }

    /// 룰의 구조적 유효성을 검증합니다. 정규식 컴파일은 [`CompiledRule`](super::CompiledRule)이 수행합니다.
    pub fn validate(&self) -> Result<(), LogMiningError> {
        if self.dir.trim().is_empty() {
            return Err(LogMiningError::RuleValidation {
                field: "dir".to_owned(),
                reason: "watched directory must not be empty".to_owned(),
            });
        }

        for (field, spec) in self.column_pattern.fields() {
            if let ColumnSpec::Position(0) = spec {
                return Err(LogMiningError::RuleValidation {
                    field: format!("columnPattern.{}", field.as_str()),
                    reason: "positional index is 1-based".to_owned(),
                });
            }
        }

        Ok(())
    }
}

/// 필드 하나의 추출 방법
///
/// 숫자는 위치 인덱스, 문자열은 정규식으로 해석합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnSpec {
    /// 공백으로 나눈 토큰의 1부터 시작하는 위치
    Position(u64),
    /// 라인 전체에서 첫 번째 매칭
    Regex(String),
}

/// 추출 대상 필드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnField {
    /// 사용자 이름
    UserName,
    /// 접속 주소
    IpAddr,
    /// 상태 값
    State,
    /// 라인 내 시각
    DateTime,
}

impl ColumnField {
    /// 룰 텍스트에서 쓰는 필드 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserName => "UserName",
            Self::IpAddr => "IpAddr",
            Self::State => "State",
            Self::DateTime => "DateTime",
        }
    }
}

/// 필드별 추출 방법 모음
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnPattern {
    /// 사용자 이름
    #[serde(rename = "UserName", skip_serializing_if = "Option::is_none")]
    pub user_name: Option<ColumnSpec>,
    /// 접속 주소
    #[serde(rename = "IpAddr", skip_serializing_if = "Option::is_none")]
    pub ip_addr: Option<ColumnSpec>,
    /// 상태 값
    #[serde(rename = "State", skip_serializing_if = "Option::is_none")]
    pub state: Option<ColumnSpec>,
    /// 라인 내 시각
    #[serde(rename = "DateTime", skip_serializing_if = "Option::is_none")]
    pub date_time: Option<ColumnSpec>,
}

impl ColumnPattern {
    /// 설정된 필드를 고정된 순서로 나열합니다.
    pub fn fields(&self) -> Vec<(ColumnField, &ColumnSpec)> {
        [
            (ColumnField::UserName, self.user_name.as_ref()),
            (ColumnField::IpAddr, self.ip_addr.as_ref()),
            (ColumnField::State, self.state.as_ref()),
            (ColumnField::DateTime, self.date_time.as_ref()),
        ]
        .into_iter()
        .filter_map(|(field, spec)| spec.map(|s| (field, s)))
        .collect()
    }
}
