//! 룰 파일 로더 -- JSON 룰 파일을 디스크에서 로드합니다.
//!
//! 룰 디렉토리 내의 `.json` 파일을 스캔하고 파싱합니다.
//! 룰 이름은 파일 이름(확장자 제외)입니다.
//! 개별 파일 파싱 실패는 경고 로그를 남기고 건너뜁니다.

use std::path::Path;

use crate::error::LogMiningError;

use super::types::RuleOptions;

/// 룰 파일 로더 설정
const MAX_RULE_FILE_SIZE: u64 = 1024 * 1024; // 1MB
const MAX_RULES_COUNT: usize = 10_000;

/// 디스크에서 읽은 룰
#[derive(Debug, Clone)]
pub struct LoadedRule {
    /// 룰 이름 (파일 이름)
    pub name: String,
    /// 원본 룰 텍스트
    pub text: String,
    /// 파싱된 룰
    pub options: RuleOptions,
}

/// 룰 파일 로더
pub struct RuleLoader;

impl RuleLoader {
    /// 디렉토리에서 모든 JSON 룰 파일을 로드합니다.
    ///
    /// 결과는 룰 이름 순으로 정렬됩니다.
    ///
    /// # Errors
    /// - 디렉토리를 읽을 수 없는 경우
    /// - 룰 수가 `MAX_RULES_COUNT`를 초과하는 경우
    pub async fn load_directory(dir: impl AsRef<Path>) -> Result<Vec<LoadedRule>, LogMiningError> {
        let dir = dir.as_ref();

        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| LogMiningError::RuleLoad {
                path: dir.display().to_string(),
                reason: format!("failed to read directory: {e}"),
            })?;

        let mut rules = Vec::new();

        while let Some(entry) =
            entries
                .next_entry()
                .await
                .map_err(|e| LogMiningError::RuleLoad {
                    path: dir.display().to_string(),
                    reason: format!("failed to read directory entry: {e}"),
                })?
        {
            let path = entry.path();

            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }

            match Self::load_file(&path).await {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to load rule file, skipping"
                    );
                }
            }

            if rules.len() > MAX_RULES_COUNT {
                return Err(LogMiningError::RuleLoad {
                    path: dir.display().to_string(),
                    reason: format!("too many rules: max {MAX_RULES_COUNT}"),
                });
            }
        }

        rules.sort_by(|a, b| a.name.cmp(&b.name));

        tracing::info!(
            dir = %dir.display(),
            count = rules.len(),
            "loaded rule files"
        );

        Ok(rules)
    }

    /// 단일 JSON 파일에서 룰을 로드합니다.
    pub async fn load_file(path: impl AsRef<Path>) -> Result<LoadedRule, LogMiningError> {
        let path = path.as_ref();

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| LogMiningError::RuleLoad {
                path: path.display().to_string(),
                reason: "rule file has no name".to_owned(),
            })?;

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| LogMiningError::RuleLoad {
                path: path.display().to_string(),
                reason: format!("failed to read file metadata: {e}"),
            })?;

        if metadata.len() > MAX_RULE_FILE_SIZE {
            return Err(LogMiningError::RuleLoad {
                path: path.display().to_string(),
                reason: format!(
                    "file too large: {} bytes (max: {MAX_RULE_FILE_SIZE})",
                    metadata.len()
                ),
            });
        }

        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LogMiningError::RuleLoad {
                path: path.display().to_string(),
                reason: format!("failed to read file: {e}"),
            })?;

        let options = RuleOptions::from_json(&name, &text)?;
        Ok(LoadedRule {
            name,
            text,
            options,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_json_files_and_skips_others() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), r#"{"dir": "/logs/b"}"#).unwrap();
        std::fs::write(dir.path().join("a.json"), r#"{"dir": "/logs/a"}"#).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let rules = RuleLoader::load_directory(dir.path()).await.unwrap();
        let names: Vec<_> = rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(rules[0].options.dir, "/logs/a");
    }

    #[tokio::test]
    async fn invalid_rule_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.json"), r#"{"dir": "/logs"}"#).unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();

        let rules = RuleLoader::load_directory(dir.path()).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "good");
    }

    #[tokio::test]
    async fn load_nonexistent_directory_returns_error() {
        let result = RuleLoader::load_directory("/nonexistent/path/rules").await;
        assert!(result.is_err());
    }
}
