//! 룰 매칭 로직 -- 라인 검증, 접두부 제거, 필드 추출
//!
//! [`CompiledRule`]은 룰의 모든 정규식을 로딩 시 한 번만 컴파일하여 보관합니다.
//! 한 라인의 추출 실패는 그 라인에만 영향을 주며 호출자에게 에러로 전달됩니다.

use std::path::Path;

use regex::Regex;

use logminer_core::types::AuditRecord;

use super::types::{ColumnField, ColumnSpec, RuleOptions};
use crate::error::LogMiningError;

/// 필드 추출기
#[derive(Debug, Clone)]
enum Extractor {
    /// 라인 전체에서 첫 번째 매칭
    Regex(Regex),
    /// 공백으로 나눈 토큰의 0부터 시작하는 인덱스
    Position(usize),
}

impl Extractor {
    fn extract(&self, line: &str) -> Option<String> {
        match self {
            Self::Regex(re) => re.find(line).map(|m| m.as_str().to_owned()),
            Self::Position(idx) => line.split_whitespace().nth(*idx).map(str::to_owned),
        }
    }
}

/// 컴파일된 룰
///
/// # 사용 예시
/// ```ignore
/// let rule = CompiledRule::compile(RuleOptions::from_json("rule1", text)?)?;
/// let record = rule.extract(b"Jan  7 14:21:09 mongo521 root: ...")?;
/// ```
#[derive(Debug, Clone)]
pub struct CompiledRule {
    options: RuleOptions,
    file: Regex,
    host: Regex,
    log_date: Regex,
    line: Regex,
    prefix: Regex,
    columns: Vec<(ColumnField, Extractor)>,
}

impl CompiledRule {
    /// 룰의 정규식을 모두 컴파일합니다.
    ///
    /// # Errors
    /// 구조 검증 실패 또는 정규식 컴파일 실패 시 [`LogMiningError::RuleValidation`]
    pub fn compile(options: RuleOptions) -> Result<Self, LogMiningError> {
        options.validate()?;

        let file = compile_field("filePattern", &options.file_pattern)?;
        let host = compile_field("host", &options.host)?;
        let log_date = compile_field("logDate", &options.log_date)?;
        let line = compile_field("linePattern", &options.line_pattern)?;
        let prefix = compile_field("linePrefixPattern", &options.line_prefix_pattern)?;

        let mut columns = Vec::new();
        for (field, spec) in options.column_pattern.fields() {
            let extractor = match spec {
                ColumnSpec::Regex(pattern) => Extractor::Regex(compile_field(
                    &format!("columnPattern.{}", field.as_str()),
                    pattern,
                )?),
                ColumnSpec::Position(pos) => {
                    let idx = usize::try_from(pos.saturating_sub(1)).map_err(|_| {
                        LogMiningError::RuleValidation {
                            field: format!("columnPattern.{}", field.as_str()),
                            reason: format!("position {pos} is out of range"),
                        }
                    })?;
                    Extractor::Position(idx)
                }
            };
            columns.push((field, extractor));
        }

        Ok(Self {
            options,
            file,
            host,
            log_date,
            line,
            prefix,
            columns,
        })
    }

    /// 원본 룰 옵션을 반환합니다.
    pub fn options(&self) -> &RuleOptions {
        &self.options
    }

    /// 감시 디렉토리만 바꾼 룰을 반환합니다. 정규식은 재컴파일하지 않습니다.
    pub fn for_dir(&self, dir: impl Into<String>) -> Self {
        Self {
            options: self.options.for_dir(dir),
            ..self.clone()
        }
    }

    /// 파일 이름이 대상 패턴에 맞는지 확인합니다.
    pub fn matches_file(&self, file_name: &str) -> bool {
        self.file.is_match(file_name)
    }

    /// 파일 경로의 이름 부분에서 호스트를 추출합니다. 매칭이 없으면 빈 문자열입니다.
    pub fn host_of(&self, path: &Path) -> String {
        first_match(&self.host, &file_name_of(path))
    }

    /// 파일 경로의 이름 부분에서 로그 날짜를 추출합니다. 매칭이 없으면 빈 문자열입니다.
    pub fn date_of(&self, path: &Path) -> String {
        first_match(&self.log_date, &file_name_of(path))
    }

    /// 라인 하나를 감사 레코드로 변환합니다.
    ///
    /// 1. 라인 유효성 패턴 검사 (`LineRejected`)
    /// 2. 접두부 패턴 검사 후 매칭 문자열을 제거한 나머지를 Operation으로 사용 (`PrefixMismatch`)
    /// 3. 각 컬럼은 접두부를 제거하기 전의 원본 라인에서 추출하며, 실패한 필드는 비워 둡니다.
    /// 4. Device, SystemType을 룰에서 복사합니다.
    ///
    /// Host와 Date는 호출자가 채웁니다.
    pub fn extract(&self, raw: &[u8]) -> Result<AuditRecord, LogMiningError> {
        let raw = trim_line_ending(raw);
        if raw.is_empty() {
            return Err(LogMiningError::EmptyLine);
        }
        let line = String::from_utf8_lossy(raw);

        if !self.line.is_match(&line) {
            return Err(LogMiningError::LineRejected);
        }

        let prefix = self
            .prefix
            .find(&line)
            .ok_or(LogMiningError::PrefixMismatch)?
            .as_str();
        let operation = if prefix.is_empty() {
            line.trim_matches(' ').to_owned()
        } else {
            line.replace(prefix, "").trim_matches(' ').to_owned()
        };

        let mut record = AuditRecord {
            device: self.options.device.clone(),
            system_type: self.options.system_type,
            operation,
            ..Default::default()
        };

        for (field, extractor) in &self.columns {
            let Some(value) = extractor.extract(&line) else {
                continue;
            };
            match field {
                ColumnField::UserName => record.user_name = value,
                ColumnField::IpAddr => record.ip_addr = value,
                ColumnField::State => record.state = value,
                ColumnField::DateTime => record.date_time = value,
            }
        }

        Ok(record)
    }
}

fn compile_field(field: &str, pattern: &str) -> Result<Regex, LogMiningError> {
    Regex::new(pattern).map_err(|e| LogMiningError::RuleValidation {
        field: field.to_owned(),
        reason: format!("invalid regex: {e}"),
    })
}

fn first_match(re: &Regex, haystack: &str) -> String {
    re.find(haystack)
        .map(|m| m.as_str().to_owned())
        .unwrap_or_default()
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn trim_line_ending(raw: &[u8]) -> &[u8] {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    raw.strip_suffix(b"\r").unwrap_or(raw)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::rule::types::ColumnPattern;
    use logminer_core::types::SystemType;

    const SERVER_LINE: &[u8] = b"Jan  7 14:21:09 mongo521 root: root     pts/0        2019-01-07 14:19 (10.10.3.133) [432662]: scp -r /data/backup root@10.10.3.134:/data\n";

    fn server_rule() -> CompiledRule {
        CompiledRule::compile(RuleOptions {
            host: r"(\d+\.\d+\.\d+\.\d+)".to_owned(),
            log_date: r"(\d+-\d+-\d+)".to_owned(),
            device: "mongo".to_owned(),
            system_type: SystemType::Server,
            dir: "/logs".to_owned(),
            file_pattern: r"(\d+\.\d+\.\d+\.\d+.*\.log)".to_owned(),
            line_pattern: String::new(),
            line_prefix_pattern: r"(\w+  \d \d+:\d+:\d+ \w+ \w+: \w+     \w+/\d+        \d+-\d+-\d+ \d+:\d+ \(\d+.\d+.\d+.\d+\) \[\d+\]:)".to_owned(),
            column_pattern: ColumnPattern {
                user_name: Some(ColumnSpec::Position(6)),
                ip_addr: Some(ColumnSpec::Regex(r"(\(\d+.\d+.\d+.\d+\))".to_owned())),
                state: Some(ColumnSpec::Regex(r"(\[\d+\])".to_owned())),
                date_time: Some(ColumnSpec::Regex(r"(\w+  \d \d+:\d+:\d+)".to_owned())),
            },
        })
        .unwrap()
    }

    #[test]
    fn extracts_all_fields_from_server_line() {
        let record = server_rule().extract(SERVER_LINE).unwrap();
        assert_eq!(record.user_name, "root");
        assert_eq!(record.ip_addr, "(10.10.3.133)");
        assert_eq!(record.state, "[432662]");
        assert_eq!(record.date_time, "Jan  7 14:21:09");
        assert_eq!(
            record.operation,
            "scp -r /data/backup root@10.10.3.134:/data"
        );
        assert_eq!(record.device, "mongo");
        assert_eq!(record.system_type, SystemType::Server);
        // Host/Date는 호출자 책임
        assert!(record.host.is_empty());
        assert!(record.date.is_empty());
    }

    #[test]
    fn empty_line_is_rejected() {
        let err = server_rule().extract(b"\n").unwrap_err();
        assert!(matches!(err, LogMiningError::EmptyLine));
    }

    #[test]
    fn line_pattern_mismatch_is_line_rejected() {
        let mut options = server_rule().options().clone();
        options.line_pattern = "mongo\\d+".to_owned();
        let rule = CompiledRule::compile(options).unwrap();
        let err = rule.extract(b"Jan  7 14:21:09 web01 nginx: GET /").unwrap_err();
        assert!(matches!(err, LogMiningError::LineRejected));
    }

    #[test]
    fn missing_prefix_is_prefix_mismatch() {
        let err = server_rule().extract(b"no prefix here").unwrap_err();
        assert!(matches!(err, LogMiningError::PrefixMismatch));
    }

    #[test]
    fn unmatched_regex_field_leaves_only_that_field_empty() {
        let mut options = server_rule().options().clone();
        options.column_pattern.state = Some(ColumnSpec::Regex(r"<\d+>".to_owned()));
        let record = CompiledRule::compile(options)
            .unwrap()
            .extract(SERVER_LINE)
            .unwrap();
        assert!(record.state.is_empty());
        assert_eq!(record.user_name, "root");
        assert_eq!(record.ip_addr, "(10.10.3.133)");
    }

    #[test]
    fn out_of_range_position_leaves_field_empty() {
        let mut options = server_rule().options().clone();
        options.column_pattern.user_name = Some(ColumnSpec::Position(500));
        let record = CompiledRule::compile(options)
            .unwrap()
            .extract(SERVER_LINE)
            .unwrap();
        assert!(record.user_name.is_empty());
    }

    #[test]
    fn position_collapses_whitespace_runs() {
        let rule = CompiledRule::compile(RuleOptions {
            dir: "/logs".to_owned(),
            column_pattern: ColumnPattern {
                state: Some(ColumnSpec::Position(3)),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();
        let record = rule.extract(b"a    b \t  c d").unwrap();
        assert_eq!(record.state, "c");
    }

    #[test]
    fn empty_prefix_pattern_keeps_whole_line_as_operation() {
        let rule = CompiledRule::compile(RuleOptions {
            dir: "/logs".to_owned(),
            ..Default::default()
        })
        .unwrap();
        let record = rule.extract(b"  hello world  \r\n").unwrap();
        assert_eq!(record.operation, "hello world");
    }

    #[test]
    fn extraction_is_deterministic() {
        let rule = server_rule();
        let a = serde_json::to_vec(&rule.extract(SERVER_LINE).unwrap()).unwrap();
        let b = serde_json::to_vec(&rule.extract(SERVER_LINE).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn invalid_regex_names_field() {
        let err = CompiledRule::compile(RuleOptions {
            dir: "/logs".to_owned(),
            line_prefix_pattern: "([".to_owned(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("linePrefixPattern"));
    }

    #[test]
    fn host_and_date_come_from_file_name() {
        let rule = server_rule();
        let path = PathBuf::from("/logs/10.10.2.104_2019-01-07_host-route.log");
        assert!(rule.matches_file("10.10.2.104_2019-01-07_host-route.log"));
        assert_eq!(rule.host_of(&path), "10.10.2.104");
        assert_eq!(rule.date_of(&path), "2019-01-07");
        assert!(!rule.matches_file("syslog"));
    }

    #[test]
    fn for_dir_keeps_compiled_patterns() {
        let rule = server_rule();
        let child = rule.for_dir("/logs/sub");
        assert_eq!(child.options().dir, "/logs/sub");
        assert!(child.extract(SERVER_LINE).is_ok());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn extract_arbitrary_bytes_does_not_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
                let _ = server_rule().extract(&bytes);
            }

            #[test]
            fn extract_is_idempotent(words in prop::collection::vec("[a-z0-9.()]{1,12}", 1..12)) {
                let rule = server_rule();
                let line = format!("Jan  7 14:21:09 mongo521 root: {}", words.join(" "));
                prop_assert_eq!(rule.extract(line.as_bytes()).ok(), rule.extract(line.as_bytes()).ok());
            }

            #[test]
            fn failing_field_does_not_affect_others(tail in "[a-z ]{0,40}") {
                let line = format!(
                    "Jan  7 14:21:09 mongo521 root: root     pts/0        2019-01-07 14:19 (10.10.3.133) [432662]: {tail}"
                );
                let baseline = server_rule().extract(line.as_bytes()).unwrap();

                let mut options = server_rule().options().clone();
                options.column_pattern.state = Some(ColumnSpec::Regex("<never>".to_owned()));
                let record = CompiledRule::compile(options).unwrap().extract(line.as_bytes()).unwrap();

                prop_assert!(record.state.is_empty());
                prop_assert_eq!(record.user_name, baseline.user_name);
                prop_assert_eq!(record.ip_addr, baseline.ip_addr);
                prop_assert_eq!(record.date_time, baseline.date_time);
                prop_assert_eq!(record.operation, baseline.operation);
            }
        }
    }
}
