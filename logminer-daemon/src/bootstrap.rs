//! Boot-time rule replay.
//!
//! 1. Load `*.json` rule files from the rules directory into the catalog
//! 2. Copy every catalog record into the rule store
//! 3. Start a worker for every record that was enabled when the daemon last ran
//!
//! A single bad rule never aborts the boot; it is logged and skipped.

use std::path::Path;

use anyhow::Result;

use logminer_core::store::RuleStore;
use logminer_log_mining::{RuleLoader, Scheduler};

/// Outcome of [`restore`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    /// Rule files committed to the catalog.
    pub loaded: usize,
    /// Rules whose worker was started.
    pub started: Vec<String>,
    /// Enabled rules whose worker failed to start.
    pub failed: Vec<String>,
}

/// Replay rules into the scheduler.
///
/// Rule files that are new to the catalog are enabled when `auto_enable` is set;
/// existing records keep their enabled flag.
///
/// # Errors
///
/// Returns an error only if the catalog itself cannot be read.
pub async fn restore(
    scheduler: &Scheduler,
    rules_dir: &Path,
    auto_enable: bool,
) -> Result<RestoreReport> {
    let mut report = RestoreReport::default();
    let catalog = scheduler.catalog();

    if rules_dir.is_dir() {
        let loaded = RuleLoader::load_directory(rules_dir)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load rules directory: {}", e))?;

        for rule in loaded {
            let known = catalog.get(&rule.name).is_ok();
            match catalog.commit(&rule.name, &rule.text) {
                Ok(record) => {
                    report.loaded += 1;
                    if !known && auto_enable && !record.isopen {
                        if let Err(e) = catalog.set_enabled(&record.name, true) {
                            tracing::warn!(rule = %record.name, error = %e, "failed to enable rule");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(rule = %rule.name, error = %e, "failed to commit rule, skipping");
                }
            }
        }
    } else {
        tracing::warn!(
            dir = %rules_dir.display(),
            "rules directory not found, using persisted catalog only"
        );
    }

    let records = catalog
        .all()
        .map_err(|e| anyhow::anyhow!("failed to read rule catalog: {}", e))?;

    for record in &records {
        if let Err(e) = scheduler
            .rule_store()
            .set(&record.name, record.value.clone())
        {
            tracing::warn!(rule = %record.name, error = %e, "failed to register rule text");
        }
    }

    for record in records.iter().filter(|r| r.isopen) {
        match scheduler.add(&record.name).await {
            Ok(_) => report.started.push(record.name.clone()),
            Err(e) => {
                tracing::error!(rule = %record.name, error = %e, "failed to start worker");
                report.failed.push(record.name.clone());
            }
        }
    }

    tracing::info!(
        loaded = report.loaded,
        started = report.started.len(),
        failed = report.failed.len(),
        "rule replay complete"
    );

    Ok(report)
}
