use actix_web::web;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;
use std::time::Duration;

use super::static_store::{StaticStore, StorageError};
use crate::config::RetentionConfig;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub failed: usize,
}

impl StaticStore {
    /// Deletes stored uploads and overlays last modified more than `max_age` ago.
    pub fn sweep_older_than(&self, max_age: Duration) -> Result<SweepReport, StorageError> {
        let max_age = chrono::Duration::from_std(max_age)
            .unwrap_or_else(|_| chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut report = SweepReport::default();
        for dir in [self.uploads_dir(), self.results_dir()] {
            sweep_dir(&dir, cutoff, &mut report)?;
        }
        Ok(report)
    }
}

fn sweep_dir(
    dir: &Path,
    cutoff: DateTime<Utc>,
    report: &mut SweepReport,
) -> Result<(), StorageError> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let modified = match entry.metadata().and_then(|m| {
            if m.is_file() {
                m.modified().map(Some)
            } else {
                Ok(None)
            }
        }) {
            Ok(Some(modified)) => DateTime::<Utc>::from(modified),
            Ok(None) => continue,
            Err(e) => {
                log::warn!("Skipping {} during sweep: {}", path.display(), e);
                report.failed += 1;
                continue;
            }
        };
        if modified > cutoff {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => report.removed += 1,
            Err(e) => {
                log::warn!("Failed to remove expired file {}: {}", path.display(), e);
                report.failed += 1;
            }
        }
    }
    Ok(())
}

/// Starts the periodic sweep on the current actix runtime. Returns `false`
/// when retention is disabled.
pub fn spawn_sweeper(store: StaticStore, config: &RetentionConfig) -> bool {
    let Some(max_age_secs) = config.max_age_secs else {
        log::info!("Retention disabled; stored files are kept indefinitely");
        return false;
    };
    let max_age = Duration::from_secs(max_age_secs);
    let period = Duration::from_secs(config.sweep_interval_secs);
    log::info!(
        "Retention enabled: removing files older than {}s every {}s",
        max_age_secs,
        config.sweep_interval_secs
    );

    actix_web::rt::spawn(async move {
        let mut interval = actix_web::rt::time::interval(period);
        loop {
            interval.tick().await;
            let store = store.clone();
            match web::block(move || store.sweep_older_than(max_age)).await {
                Ok(Ok(report)) if report.removed > 0 || report.failed > 0 => {
                    log::info!(
                        "Retention sweep removed {} file(s), {} failure(s)",
                        report.removed,
                        report.failed
                    );
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => log::error!("Retention sweep failed: {}", e),
                Err(e) => log::error!("Retention sweep task failed: {}", e),
            }
        }
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::SystemTime;

    fn age(path: &Path, by: Duration) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[test]
    fn removes_only_expired_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = StaticStore::new(dir.path());
        store.ensure_layout().unwrap();

        let old_upload = store.save_upload(b"old", "png").unwrap();
        let fresh_upload = store.save_upload(b"new", "png").unwrap();
        let old_overlay = store.gradcam_slot(&old_upload).unwrap();
        fs::write(&old_overlay.path, b"overlay").unwrap();
        age(&old_upload.path, Duration::from_secs(7200));
        age(&old_overlay.path, Duration::from_secs(7200));

        let report = store.sweep_older_than(Duration::from_secs(3600)).unwrap();
        assert_eq!(report, SweepReport { removed: 2, failed: 0 });
        assert!(!old_upload.path.exists());
        assert!(!old_overlay.path.exists());
        assert!(fresh_upload.path.exists());
    }

    #[test]
    fn missing_directories_are_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = StaticStore::new(dir.path().join("absent"));
        let report = store.sweep_older_than(Duration::from_secs(1)).unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[test]
    fn disabled_retention_spawns_nothing() {
        let store = StaticStore::new("unused");
        assert!(!spawn_sweeper(store, &RetentionConfig::default()));
    }

    #[actix_web::test]
    async fn enabled_sweeper_removes_expired_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = StaticStore::new(dir.path());
        store.ensure_layout().unwrap();
        let expired = store.save_upload(b"old", "png").unwrap();
        let fresh = store.save_upload(b"new", "png").unwrap();
        age(&expired.path, Duration::from_secs(7200));

        let config = RetentionConfig {
            max_age_secs: Some(3600),
            sweep_interval_secs: 1,
        };
        assert!(spawn_sweeper(store, &config));

        for _ in 0..50 {
            if !expired.path.exists() {
                break;
            }
            actix_web::rt::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(!expired.path.exists());
        assert!(fresh.path.exists());
    }
}
