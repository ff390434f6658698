//! 룰 엔진 -- 선언적 룰로 로그 라인을 감사 레코드로 변환
//!
//! 룰은 감시 디렉토리, 대상 파일 패턴, 파일 이름에서 호스트/날짜를 얻는 패턴,
//! 라인 검증/접두부 패턴, 필드별 추출 방법으로 구성됩니다.
//!
//! # 추출 흐름
//! ```text
//! raw line -> linePattern 검사 -> linePrefixPattern 제거 (나머지 = Operation)
//!          -> columnPattern 필드별 추출 (원본 라인 기준) -> Device/SystemType 부여
//! ```
//!
//! # 아키텍처
//! - [`CompiledRule`]: 정규식을 미리 컴파일한 룰, 라인 추출 수행
//! - [`loader`]: 룰 디렉토리의 JSON 파일 로딩
//! - [`types`]: 룰 데이터 구조 정의

pub mod loader;
pub mod matcher;
pub mod types;

pub use loader::{LoadedRule, RuleLoader};
pub use matcher::CompiledRule;
pub use types::{ColumnField, ColumnPattern, ColumnSpec, RuleOptions};

use logminer_core::types::AuditRecord;

use crate::error::LogMiningError;

/// 룰 텍스트를 컴파일하여 라인 하나를 시험 추출합니다.
///
/// 파일 I/O나 저장소 접근 없이 룰을 검증하는 용도입니다.
pub fn dry_run(name: &str, rule_text: &str, line: &[u8]) -> Result<AuditRecord, LogMiningError> {
    let rule = CompiledRule::compile(RuleOptions::from_json(name, rule_text)?)?;
    rule.extract(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_extracts_without_io() {
        let text = r#"{"dir": "/nonexistent", "linePrefixPattern": "^\\S+ ", "columnPattern": {"UserName": 2}}"#;
        let record = dry_run("t", text, b"host01 alice logged in").unwrap();
        assert_eq!(record.user_name, "alice");
        assert_eq!(record.operation, "alice logged in");
    }

    #[test]
    fn dry_run_reports_rule_errors() {
        assert!(dry_run("t", "{}", b"line").is_err());
        assert!(dry_run("t", r#"{"dir": "/x", "linePattern": "(["}"#, b"line").is_err());
    }
}
