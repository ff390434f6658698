//! 도메인 타입 — 감사 레코드와 장비 유형

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 로그를 생성한 장비 유형
///
/// 추출 로직은 유형과 무관하게 동일하며, 값은 레코드에 기록되는 용도로만 쓰입니다.
/// 대소문자 구분 없이 파싱하고 대문자로 직렬화합니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SystemType {
    /// 서버 (기본값)
    #[default]
    Server,
    /// 네트워크 스위치
    Switch,
    /// 애플리케이션
    App,
}

impl SystemType {
    /// 직렬화 이름을 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "SERVER",
            Self::Switch => "SWITCH",
            Self::App => "APP",
        }
    }
}

impl fmt::Display for SystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "SERVER" => Ok(Self::Server),
            "SWITCH" => Ok(Self::Switch),
            "APP" => Ok(Self::App),
            other => Err(format!("unknown system type: {other}")),
        }
    }
}

impl TryFrom<String> for SystemType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SystemType> for String {
    fn from(value: SystemType) -> Self {
        value.as_str().to_owned()
    }
}

/// 감사 로그 레코드
///
/// 한 라인에서 추출한 결과입니다. `host`와 `date`는 파일 이름에서 얻어
/// 호출자가 채우며, 나머지는 룰 엔진이 채웁니다. 추출하지 못한 필드는 빈 문자열입니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AuditRecord {
    /// 로그 발생 호스트
    pub host: String,
    /// 로그 파일 날짜 (`YYYY-MM-DD`)
    pub date: String,
    /// 장비 태그
    pub device: String,
    /// 장비 유형
    pub system_type: SystemType,
    /// 라인 내 시각 문자열
    pub date_time: String,
    /// 접속 주소
    pub ip_addr: String,
    /// 접두부를 제거한 나머지 본문
    pub operation: String,
    /// 상태 값
    pub state: String,
    /// 사용자 이름
    pub user_name: String,
}
