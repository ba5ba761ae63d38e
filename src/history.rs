//! Creates backups around mutations, restores any record, handles
//! rollback-of-rollback via protection files, sweeps expired records, and
//! enforces the reference-counting invariants by delegating every
//! structural change to the archive store.
//!
//! Single instance, guarded by its own mutex - every public method takes
//! it for the duration of the operation it covers, per the single-writer
//! archive model.

use crate::archive::{self, Archive, OperationPayload};
use crate::config::ConfigFile;
use crate::error::SteadyDnsError;
use crate::service::ServiceController;
use log::warn;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

pub(crate) fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub struct HistoryManager {
    config: ConfigFile,
    lock: Mutex<()>,
    /// Injected after the Service Controller is constructed, to break the
    /// construction cycle between the two.
    reloader: Mutex<Option<Arc<ServiceController>>>,
}

impl HistoryManager {
    pub fn new(config: ConfigFile) -> Self {
        Self {
            config,
            lock: Mutex::new(()),
            reloader: Mutex::new(None),
        }
    }

    pub async fn set_reloader(&self, controller: Arc<ServiceController>) {
        *self.reloader.lock().await = Some(controller);
    }

    fn archive_path(&self) -> PathBuf {
        self.config.archive_path()
    }

    fn backup_dir(&self) -> PathBuf {
        self.config.backup_dir()
    }

    /// Drops every record whose expiry has passed. Best-effort: a failure
    /// here never blocks the caller's backup.
    async fn sweep_expired(&self) {
        let path = self.archive_path();
        let now = now_unix();
        let result = tokio::task::spawn_blocking(move || -> Result<(), SteadyDnsError> {
            let archive = match Archive::open(&path)? {
                Some(a) => a,
                None => return Ok(()),
            };
            let keep: Vec<u64> = archive
                .records
                .iter()
                .filter(|r| r.expiry >= now)
                .map(|r| r.record_id)
                .collect();
            if keep.len() != archive.records.len() {
                archive::rebuild(&path, &keep)?;
            }
            Ok(())
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("expiry sweep failed: {err}"),
            Err(err) => warn!("expiry sweep task panicked: {err}"),
        }
    }

    async fn append_record(
        &self,
        operation: &str,
        domain: &str,
        payload: OperationPayload,
        files: Vec<(String, Vec<u8>)>,
    ) -> Result<u64, SteadyDnsError> {
        let path = self.archive_path();
        let now = now_unix();
        let expiry = now + self.config.backup_expiry_days * 86400;
        let operation = operation.to_string();
        let domain = domain.to_string();
        tokio::task::spawn_blocking(move || {
            archive::append_new_record(&path, &operation, &domain, payload, &files, now, expiry)
        })
        .await
        .map_err(|err| SteadyDnsError::Generic(format!("backup task panicked: {err}")))?
    }

    /// Reads each path's current content as the pre-image and appends a
    /// new record. Used by create/update/delete - never by rollback,
    /// which already holds its file contents in memory.
    pub async fn create_backup(
        &self,
        operation: &str,
        domain: &str,
        payload: OperationPayload,
        file_paths: &[PathBuf],
    ) -> Result<u64, SteadyDnsError> {
        self.sweep_expired().await;
        let mut files = Vec::new();
        for path in file_paths {
            match std::fs::read(path) {
                Ok(bytes) => files.push((path.display().to_string(), bytes)),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        let _guard = self.lock.lock().await;
        self.append_record(operation, domain, payload, files).await
    }

    /// Appends a record from already-in-memory file contents, supplied by
    /// a caller (restore/rollback) that captured them before mutating disk.
    pub async fn create_backup_embedded(
        &self,
        operation: &str,
        domain: &str,
        payload: OperationPayload,
        files: Vec<(String, Vec<u8>)>,
    ) -> Result<u64, SteadyDnsError> {
        self.sweep_expired().await;
        let _guard = self.lock.lock().await;
        self.append_record(operation, domain, payload, files).await
    }

    /// Restores the on-disk state captured by `record_id`. If that record
    /// is itself a rollback, delegates to [`Self::restore_rollback`].
    pub async fn restore_backup(&self, record_id: u64) -> Result<(), SteadyDnsError> {
        let guard = self.lock.lock().await;
        let path = self.archive_path();
        let backup_dir = self.backup_dir();

        std::fs::create_dir_all(&backup_dir)?;
        let protection_path = backup_dir.join(format!("rollback.{record_id}"));
        archive::copy_whole_file(&path, &protection_path)?;
        self.prune_protection_files()?;

        Archive::verify(&path)?;
        let snapshot = Archive::open(&path)?
            .ok_or_else(|| SteadyDnsError::NotFound("archive is empty".to_string()))?;
        let metadata = snapshot.read_record_metadata(&path, record_id)?;

        if matches!(metadata.payload, OperationPayload::Rollback { .. }) {
            drop(guard);
            return self.restore_rollback(record_id, metadata).await;
        }

        let mut pre_image = Vec::new();
        let main_config_path = self.config.main_config_path.clone();
        if let Ok(bytes) = std::fs::read(&main_config_path) {
            pre_image.push((main_config_path.display().to_string(), bytes));
        }
        let mut current_zone_files = Vec::new();
        if self.config.zone_dir.exists() {
            for entry in std::fs::read_dir(&self.config.zone_dir)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    let file_path = entry.path();
                    if let Ok(bytes) = std::fs::read(&file_path) {
                        pre_image.push((file_path.display().to_string(), bytes));
                    }
                    current_zone_files.push(file_path);
                }
            }
        }

        let target_paths: HashSet<String> =
            metadata.files.iter().map(|f| f.filename.clone()).collect();
        for file in &metadata.files {
            let file_path = PathBuf::from(&file.filename);
            let current_hash = std::fs::read(&file_path).ok().map(|b| archive::sha256_hex(&b));
            if current_hash.as_deref() != Some(file.content_hash.as_str()) {
                let content = snapshot.decode_block(&path, &file.content_hash)?;
                if let Some(parent) = file_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&file_path, content)?;
            }
        }
        for file_path in &current_zone_files {
            if !target_paths.contains(&file_path.display().to_string()) {
                std::fs::remove_file(file_path).ok();
            }
        }

        drop(guard);

        let rollback_payload = OperationPayload::Rollback {
            rollback_record_id: record_id,
            rollback_operation: metadata.payload.operation_name().to_string(),
            rollback_domain: metadata.domain.clone(),
            restore_from_embedded: false,
        };
        let rb_id = self
            .create_backup_embedded("rollback", &metadata.domain, rollback_payload, pre_image)
            .await?;

        {
            let _guard = self.lock.lock().await;
            let keep_ids: Vec<u64> = Archive::open(&path)?
                .ok_or_else(|| SteadyDnsError::NotFound("archive is empty".to_string()))?
                .records
                .iter()
                .map(|r| r.record_id)
                .filter(|id| *id < record_id || *id == rb_id)
                .collect();
            archive::rebuild(&path, &keep_ids)?;
        }

        self.reload_best_effort().await;
        Ok(())
    }

    async fn restore_rollback(
        &self,
        rollback_record_id: u64,
        metadata: archive::RecordMetadata,
    ) -> Result<(), SteadyDnsError> {
        let original_record_id = match &metadata.payload {
            OperationPayload::Rollback {
                rollback_record_id: original,
                ..
            } => *original,
            _ => return Err(SteadyDnsError::Validation("not a rollback record".to_string())),
        };
        let path = self.archive_path();
        let backup_dir = self.backup_dir();
        let protection_path = backup_dir.join(format!("rollback.{original_record_id}"));

        if protection_path.exists() {
            let _guard = self.lock.lock().await;
            let snapshot = Archive::open(&path)?
                .ok_or_else(|| SteadyDnsError::NotFound("archive is empty".to_string()))?;
            for file in &metadata.files {
                let file_path = PathBuf::from(&file.filename);
                let content = snapshot.decode_block(&path, &file.content_hash)?;
                if let Some(parent) = file_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&file_path, content)?;
            }
            std::fs::copy(&protection_path, &path)?;
            std::fs::remove_file(&protection_path).ok();

            let keep_ids: Vec<u64> = Archive::open(&path)?
                .ok_or_else(|| SteadyDnsError::NotFound("archive is empty".to_string()))?
                .records
                .iter()
                .map(|r| r.record_id)
                .filter(|id| *id < rollback_record_id)
                .collect();
            archive::rebuild(&path, &keep_ids)?;
            drop(_guard);
            self.reload_best_effort().await;
            return Ok(());
        }

        if metadata.files.is_empty() {
            return Err(SteadyDnsError::Generic(
                "backup expired, cannot undo".to_string(),
            ));
        }

        let mut pre_image = Vec::new();
        {
            let _guard = self.lock.lock().await;
            std::fs::create_dir_all(&backup_dir)?;
            let new_protection = backup_dir.join(format!("rollback.{rollback_record_id}"));
            archive::copy_whole_file(&path, &new_protection)?;
            self.prune_protection_files()?;

            for file in &metadata.files {
                let file_path = PathBuf::from(&file.filename);
                if let Ok(bytes) = std::fs::read(&file_path) {
                    pre_image.push((file.filename.clone(), bytes));
                }
            }

            let snapshot = Archive::open(&path)?
                .ok_or_else(|| SteadyDnsError::NotFound("archive is empty".to_string()))?;
            for file in &metadata.files {
                let file_path = PathBuf::from(&file.filename);
                let content = snapshot.decode_block(&path, &file.content_hash)?;
                if let Some(parent) = file_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&file_path, content)?;
            }
        }

        let rb2_payload = OperationPayload::Rollback {
            rollback_record_id,
            rollback_operation: "rollback".to_string(),
            rollback_domain: metadata.domain.clone(),
            restore_from_embedded: true,
        };
        let rb2_id = self
            .create_backup_embedded("rollback", &metadata.domain, rb2_payload, pre_image)
            .await?;

        {
            let _guard = self.lock.lock().await;
            let keep_ids: Vec<u64> = Archive::open(&path)?
                .ok_or_else(|| SteadyDnsError::NotFound("archive is empty".to_string()))?
                .records
                .iter()
                .map(|r| r.record_id)
                .filter(|id| *id < original_record_id || *id == rb2_id)
                .collect();
            archive::rebuild(&path, &keep_ids)?;
        }

        self.reload_best_effort().await;
        Ok(())
    }

    /// Decrements refcounts for the record's files, drops it from the
    /// index, and rebuilds. Deletes the archive file entirely if it ends
    /// up empty.
    pub async fn delete_backup_record(&self, record_id: u64) -> Result<(), SteadyDnsError> {
        let _guard = self.lock.lock().await;
        let path = self.archive_path();
        let keep_ids: Vec<u64> = match Archive::open(&path)? {
            Some(archive) => archive
                .records
                .iter()
                .map(|r| r.record_id)
                .filter(|id| *id != record_id)
                .collect(),
            None => return Ok(()),
        };
        if keep_ids.is_empty() {
            std::fs::remove_file(&path).ok();
            return Ok(());
        }
        archive::rebuild(&path, &keep_ids)
    }

    pub fn list_protection_files(&self) -> Result<Vec<PathBuf>, SteadyDnsError> {
        let dir = self.backup_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.starts_with("rollback."))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// When more than `protection_file_cap` protection files exist,
    /// deletes the oldest by mtime until the cap is satisfied.
    pub fn prune_protection_files(&self) -> Result<(), SteadyDnsError> {
        let mut files = self.list_protection_files()?;
        if files.len() <= self.config.protection_file_cap {
            return Ok(());
        }
        files.sort_by_key(|path| {
            std::fs::metadata(path)
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        });
        let excess = files.len() - self.config.protection_file_cap;
        for path in files.into_iter().take(excess) {
            std::fs::remove_file(path).ok();
        }
        Ok(())
    }

    async fn reload_best_effort(&self) {
        let controller = self.reloader.lock().await.clone();
        if let Some(controller) = controller {
            if let Err(err) = controller.reload().await {
                warn!("reload after history operation failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zones::{Record, RecordType, Soa, Zone};

    fn test_config(dir: &std::path::Path) -> ConfigFile {
        let mut config = ConfigFile::default();
        config.working_dir = dir.to_path_buf();
        config.zone_dir = dir.join("zones");
        config.main_config_path = dir.join("named.conf.local");
        config.backup_expiry_days = 30;
        config.protection_file_cap = 2;
        config
    }

    fn test_zone(domain: &str) -> Zone {
        Zone {
            domain: domain.to_string(),
            file_path: PathBuf::from(format!("/tmp/{domain}.zone")),
            allow_query: "any".to_string(),
            comment: None,
            soa: Soa::malformed_default("2026073101".to_string()),
            records: vec![Record {
                id: uuid::Uuid::new_v4(),
                name: "@".to_string(),
                rrtype: RecordType::A,
                value: "192.0.2.1".to_string(),
                ttl: 0,
                priority: None,
                comment: None,
            }],
        }
    }

    #[tokio::test]
    async fn test_create_then_restore_then_undo() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("zones")).unwrap();
        let config = test_config(dir.path());
        std::fs::write(&config.main_config_path, "// nothing here\n").unwrap();

        let manager = HistoryManager::new(config.clone());
        let zone_path = config.zone_dir.join("example.com.zone");
        std::fs::write(&zone_path, "zone content v1").unwrap();
        std::fs::write(&config.main_config_path, "zone \"example.com\" IN {};\n").unwrap();

        let record_id = manager
            .create_backup(
                "create",
                "example.com",
                OperationPayload::Create { zone: test_zone("example.com") },
                &[config.main_config_path.clone(), zone_path.clone()],
            )
            .await
            .unwrap();

        std::fs::write(&zone_path, "zone content v2").unwrap();
        manager.restore_backup(record_id).await.unwrap();
        assert_eq!(std::fs::read_to_string(&zone_path).unwrap(), "zone content v1");

        let archive = Archive::open(&config.archive_path()).unwrap().unwrap();
        assert_eq!(archive.records.len(), 1);
        let rollback_id = archive.records[0].record_id;
        assert_eq!(archive.records[0].operation, "rollback");

        std::fs::write(&zone_path, "zone content v3").unwrap();
        manager.restore_backup(rollback_id).await.unwrap();
        assert_eq!(std::fs::read_to_string(&zone_path).unwrap(), "zone content v2");
    }

    #[tokio::test]
    async fn test_expiry_sweep_drops_only_expired() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("zones")).unwrap();
        let mut config = test_config(dir.path());
        config.backup_expiry_days = -1; // expires instantly
        let manager = HistoryManager::new(config.clone());

        let zone_path = config.zone_dir.join("old.zone");
        std::fs::write(&zone_path, "old content").unwrap();
        manager
            .create_backup(
                "create",
                "old.example.com",
                OperationPayload::Create { zone: test_zone("old.example.com") },
                &[zone_path.clone()],
            )
            .await
            .unwrap();

        config.backup_expiry_days = 30;
        let manager = HistoryManager::new(config.clone());
        let zone_path2 = config.zone_dir.join("new.zone");
        std::fs::write(&zone_path2, "new content").unwrap();
        manager
            .create_backup(
                "create",
                "new.example.com",
                OperationPayload::Create { zone: test_zone("new.example.com") },
                &[zone_path2.clone()],
            )
            .await
            .unwrap();

        let archive = Archive::open(&config.archive_path()).unwrap().unwrap();
        assert_eq!(archive.records.len(), 1);
        assert_eq!(archive.records[0].domain, "new.example.com");
    }

    #[test]
    fn test_protection_file_cap_prunes_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::create_dir_all(config.backup_dir()).unwrap();
        for id in 1..=3 {
            let path = config.backup_dir().join(format!("rollback.{id}"));
            std::fs::write(&path, b"data").unwrap();
        }
        let manager = HistoryManager::new(config);
        manager.prune_protection_files().unwrap();
        assert_eq!(manager.list_protection_files().unwrap().len(), 2);
    }
}
