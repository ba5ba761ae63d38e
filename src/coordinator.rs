//! Orchestrates create/update/delete against a zone: validates record
//! invariants, wraps the mutation in a backup-then-apply-then-validate
//! transaction, and asks the Service Controller to reload on success.
//!
//! Guarded by its own mutex, distinct from the archive's - the two are
//! allowed to overlap in principle, but in practice every mutation also
//! touches the archive via the History Manager, which serialises there.

use crate::archive::OperationPayload;
use crate::config::ConfigFile;
use crate::config_editor;
use crate::error::SteadyDnsError;
use crate::history::HistoryManager;
use crate::service::ServiceController;
use crate::validator;
use crate::zonefile;
use crate::zones::{Record, RecordType, Soa, Zone};
use log::warn;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub struct ZoneMutationCoordinator {
    config: ConfigFile,
    history: Arc<HistoryManager>,
    service: Arc<ServiceController>,
    lock: Mutex<()>,
}

fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}

fn merge_soa(previous: &Soa, incoming: &Soa) -> Soa {
    Soa {
        primary_ns: if incoming.primary_ns.is_empty() {
            previous.primary_ns.clone()
        } else {
            incoming.primary_ns.clone()
        },
        admin_email: if incoming.admin_email.is_empty() {
            previous.admin_email.clone()
        } else {
            incoming.admin_email.clone()
        },
        serial: previous.serial.clone(),
        refresh: if incoming.refresh == 0 { previous.refresh } else { incoming.refresh },
        retry: if incoming.retry == 0 { previous.retry } else { incoming.retry },
        expire: if incoming.expire == 0 { previous.expire } else { incoming.expire },
        minimum: if incoming.minimum == 0 { previous.minimum } else { incoming.minimum },
    }
}

impl ZoneMutationCoordinator {
    pub fn new(config: ConfigFile, history: Arc<HistoryManager>, service: Arc<ServiceController>) -> Self {
        Self {
            config,
            history,
            service,
            lock: Mutex::new(()),
        }
    }

    fn list_zone_files(&self) -> Result<Vec<PathBuf>, SteadyDnsError> {
        if !self.config.zone_dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.config.zone_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        Ok(files)
    }

    fn find_zone_file(&self, domain: &str) -> Option<PathBuf> {
        let candidate = self.config.zone_dir.join(format!("{domain}.zone"));
        candidate.exists().then_some(candidate)
    }

    fn snapshot_paths(&self) -> Result<Vec<PathBuf>, SteadyDnsError> {
        let mut paths = vec![self.config.main_config_path.clone()];
        paths.extend(self.list_zone_files()?);
        Ok(paths)
    }

    async fn write_zone_file(&self, zone: &Zone) -> Result<(), SteadyDnsError> {
        let rendered = zonefile::render(zone);
        if let Some(parent) = zone.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&zone.file_path, rendered)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&zone.file_path, std::fs::Permissions::from_mode(0o644))?;
        }
        if self.config.zone_file_owner.is_some() || self.config.zone_file_group.is_some() {
            if let Err(err) = self.chown_zone_file(&zone.file_path).await {
                warn!("failed to chown zone file {}: {err}", zone.file_path.display());
            }
        }
        Ok(())
    }

    async fn chown_zone_file(&self, path: &Path) -> Result<(), SteadyDnsError> {
        let owner = self.config.zone_file_owner.clone().unwrap_or_default();
        let group = self.config.zone_file_group.clone().unwrap_or_default();
        let spec = match (owner.is_empty(), group.is_empty()) {
            (false, false) => format!("{owner}:{group}"),
            (false, true) => owner,
            (true, false) => format!(":{group}"),
            (true, true) => return Ok(()),
        };
        let output = tokio::process::Command::new("chown")
            .arg(spec)
            .arg(path)
            .output()
            .await?;
        if !output.status.success() {
            return Err(SteadyDnsError::Generic(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }
        Ok(())
    }

    async fn validate_all(&self, zone: &Zone) -> Result<(), SteadyDnsError> {
        if let Some(command) = &self.config.check_conf_command {
            validator::validate_main_config(
                command,
                &self.config.main_config_path.display().to_string(),
                self.config.subprocess_timeout_secs,
            )
            .await?;
        }
        if let Some(command) = &self.config.check_zone_command {
            validator::validate_zone(
                command,
                &zone.domain,
                &zone.file_path.display().to_string(),
                self.config.subprocess_timeout_secs,
            )
            .await?;
        }
        Ok(())
    }

    /// Writes back every file captured by `record_id`'s pre-image,
    /// deletes any zone file the pre-image doesn't mention (a file that
    /// only exists because the now-aborted mutation created it), and
    /// discards the backup record. Used on every apply-or-validate
    /// failure path.
    async fn restore_from_backup_and_discard(&self, record_id: u64) -> Result<(), SteadyDnsError> {
        let path = self.config.archive_path();
        let archive = crate::archive::Archive::open(&path)?
            .ok_or_else(|| SteadyDnsError::NotFound("archive is empty".to_string()))?;
        let metadata = archive.read_record_metadata(&path, record_id)?;
        for file in &metadata.files {
            let content = archive.decode_block(&path, &file.content_hash)?;
            let file_path = PathBuf::from(&file.filename);
            if let Some(parent) = file_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&file_path, content)?;
        }
        for file_path in self.list_zone_files()? {
            if !metadata
                .files
                .iter()
                .any(|f| f.filename == file_path.display().to_string())
            {
                std::fs::remove_file(&file_path).ok();
            }
        }
        self.history.delete_backup_record(record_id).await?;
        Ok(())
    }

    async fn reload_best_effort(&self) {
        if let Err(err) = self.service.reload().await {
            warn!("reload after mutation failed (on-disk state is already committed): {err}");
        }
    }

    pub async fn create_zone(&self, mut zone: Zone) -> Result<Zone, SteadyDnsError> {
        if Zone::is_system_zone(&zone.domain) {
            return Err(SteadyDnsError::SystemZone(zone.domain));
        }
        let _guard = self.lock.lock().await;

        for record in &mut zone.records {
            if record.id.is_nil() {
                record.id = Uuid::new_v4();
            }
        }

        if !zone.records.iter().any(|r| r.rrtype == RecordType::NS) {
            zone.records.push(Record {
                id: Uuid::new_v4(),
                name: "@".to_string(),
                rrtype: RecordType::NS,
                value: zone.soa.primary_ns.clone(),
                ttl: 0,
                priority: None,
                comment: None,
            });
        }
        let ns_at_apex = zone
            .records
            .iter()
            .any(|r| r.rrtype == RecordType::NS && r.name == "@");
        let address_at_apex = zone
            .records
            .iter()
            .any(|r| matches!(r.rrtype, RecordType::A | RecordType::AAAA) && r.name == "@");
        if ns_at_apex && !address_at_apex {
            zone.records.push(Record {
                id: Uuid::new_v4(),
                name: "@".to_string(),
                rrtype: RecordType::A,
                value: "127.0.0.1".to_string(),
                ttl: 0,
                priority: None,
                comment: None,
            });
        }

        if let Some(conflict) = zone.has_cname_conflict() {
            return Err(SteadyDnsError::Validation(format!(
                "CNAME conflict at {conflict}"
            )));
        }

        zone.soa.serial = crate::serial::next_serial(today(), None);

        let file_paths = self.snapshot_paths()?;
        let record_id = self
            .history
            .create_backup(
                "create",
                &zone.domain,
                OperationPayload::Create { zone: zone.clone() },
                &file_paths,
            )
            .await?;

        let applied: Result<(), SteadyDnsError> = async {
            self.write_zone_file(&zone).await?;
            let content = std::fs::read_to_string(&self.config.main_config_path).unwrap_or_default();
            let updated = config_editor::insert_zone(&content, &zone)?;
            std::fs::write(&self.config.main_config_path, updated)?;
            self.validate_all(&zone).await?;
            Ok(())
        }
        .await;

        if let Err(err) = applied {
            self.restore_from_backup_and_discard(record_id).await?;
            return Err(err);
        }

        self.reload_best_effort().await;
        Ok(zone)
    }

    pub async fn update_zone(&self, mut zone: Zone) -> Result<Zone, SteadyDnsError> {
        if Zone::is_system_zone(&zone.domain) {
            return Err(SteadyDnsError::SystemZone(zone.domain));
        }
        let _guard = self.lock.lock().await;

        if !zone.file_path.exists() {
            return Err(SteadyDnsError::NotFound(format!(
                "zone {} does not exist",
                zone.domain
            )));
        }

        for record in &mut zone.records {
            if record.id.is_nil() {
                record.id = Uuid::new_v4();
            }
        }
        if let Some(conflict) = zone.has_cname_conflict() {
            return Err(SteadyDnsError::Validation(format!(
                "CNAME conflict at {conflict}"
            )));
        }

        let existing_contents = std::fs::read_to_string(&zone.file_path)?;
        let previous = zonefile::parse_to_zone(
            &existing_contents,
            &zone.domain,
            zone.file_path.clone(),
            &zone.allow_query,
        );
        zone.soa = merge_soa(&previous.soa, &zone.soa);
        zone.soa.serial = crate::serial::next_serial(today(), Some(&previous.soa.serial));

        let file_paths = self.snapshot_paths()?;
        let record_id = self
            .history
            .create_backup(
                "update",
                &zone.domain,
                OperationPayload::Update { zone: zone.clone() },
                &file_paths,
            )
            .await?;

        let applied: Result<(), SteadyDnsError> = async {
            self.write_zone_file(&zone).await?;
            let content = std::fs::read_to_string(&self.config.main_config_path)?;
            let updated = config_editor::update_zone(&content, &zone)?;
            std::fs::write(&self.config.main_config_path, updated)?;
            self.validate_all(&zone).await?;
            Ok(())
        }
        .await;

        if let Err(err) = applied {
            self.restore_from_backup_and_discard(record_id).await?;
            return Err(err);
        }

        self.reload_best_effort().await;
        Ok(zone)
    }

    pub async fn delete_zone(&self, domain: &str) -> Result<(), SteadyDnsError> {
        if Zone::is_system_zone(domain) {
            return Err(SteadyDnsError::SystemZone(domain.to_string()));
        }
        let _guard = self.lock.lock().await;

        let zone_path = self
            .find_zone_file(domain)
            .ok_or_else(|| SteadyDnsError::NotFound(format!("zone {domain} does not exist")))?;

        let file_paths = self.snapshot_paths()?;
        let record_id = self
            .history
            .create_backup(
                "delete",
                domain,
                OperationPayload::Delete { domain: domain.to_string() },
                &file_paths,
            )
            .await?;

        let applied: Result<(), SteadyDnsError> = async {
            std::fs::remove_file(&zone_path)?;
            let content = std::fs::read_to_string(&self.config.main_config_path)?;
            let updated = config_editor::remove_zone(&content, domain)?;
            std::fs::write(&self.config.main_config_path, updated)?;
            if let Some(command) = &self.config.check_conf_command {
                validator::validate_main_config(
                    command,
                    &self.config.main_config_path.display().to_string(),
                    self.config.subprocess_timeout_secs,
                )
                .await?;
            }
            Ok(())
        }
        .await;

        if let Err(err) = applied {
            self.restore_from_backup_and_discard(record_id).await?;
            return Err(err);
        }

        self.reload_best_effort().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zones::RecordType;

    fn test_config(dir: &std::path::Path) -> ConfigFile {
        let mut config = ConfigFile::default();
        config.working_dir = dir.to_path_buf();
        config.zone_dir = dir.join("zones");
        config.main_config_path = dir.join("named.conf.local");
        config
    }

    fn coordinator(dir: &std::path::Path) -> ZoneMutationCoordinator {
        let config = test_config(dir);
        std::fs::create_dir_all(&config.zone_dir).unwrap();
        std::fs::write(&config.main_config_path, "// system zones only\n").unwrap();
        let history = Arc::new(HistoryManager::new(config.clone()));
        let service = Arc::new(ServiceController::new(config.clone()));
        ZoneMutationCoordinator::new(config, history, service)
    }

    fn new_zone(dir: &std::path::Path, domain: &str) -> Zone {
        Zone {
            domain: domain.to_string(),
            file_path: dir.join("zones").join(format!("{domain}.zone")),
            allow_query: "any".to_string(),
            comment: None,
            soa: Soa {
                primary_ns: "ns1.example.com.".to_string(),
                admin_email: "admin.example.com.".to_string(),
                serial: String::new(),
                refresh: 3600,
                retry: 1800,
                expire: 604800,
                minimum: 86400,
            },
            records: vec![
                Record {
                    id: Uuid::nil(),
                    name: "@".to_string(),
                    rrtype: RecordType::A,
                    value: "1.2.3.4".to_string(),
                    ttl: 0,
                    priority: None,
                    comment: None,
                },
                Record {
                    id: Uuid::nil(),
                    name: "www".to_string(),
                    rrtype: RecordType::CNAME,
                    value: "example.com.".to_string(),
                    ttl: 0,
                    priority: None,
                    comment: None,
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_create_zone_writes_file_and_config_block() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path());
        let zone = new_zone(dir.path(), "example.com");

        let created = coordinator.create_zone(zone).await.unwrap();
        assert!(created.soa.serial.ends_with("01"));
        assert!(created.file_path.exists());

        let config_content = std::fs::read_to_string(&coordinator.config.main_config_path).unwrap();
        assert!(config_content.contains("zone \"example.com\" IN"));

        let archive = crate::archive::Archive::open(&coordinator.config.archive_path())
            .unwrap()
            .unwrap();
        assert_eq!(archive.records.len(), 1);
        assert_eq!(archive.records[0].operation, "create");
    }

    #[tokio::test]
    async fn test_create_rejects_system_zone() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path());
        let zone = new_zone(dir.path(), "localhost");
        let err = coordinator.create_zone(zone).await.unwrap_err();
        assert!(matches!(err, SteadyDnsError::SystemZone(_)));
    }

    #[tokio::test]
    async fn test_update_rejects_cname_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path());
        let zone = new_zone(dir.path(), "example.com");
        let created = coordinator.create_zone(zone).await.unwrap();

        let mut conflicting = created.clone();
        conflicting.records.push(Record {
            id: Uuid::new_v4(),
            name: "@".to_string(),
            rrtype: RecordType::CNAME,
            value: "other.example.".to_string(),
            ttl: 0,
            priority: None,
            comment: None,
        });

        let archive_before = crate::archive::Archive::open(&coordinator.config.archive_path())
            .unwrap()
            .unwrap()
            .records
            .len();

        let err = coordinator.update_zone(conflicting).await.unwrap_err();
        assert!(matches!(err, SteadyDnsError::Validation(_)));

        let archive_after = crate::archive::Archive::open(&coordinator.config.archive_path())
            .unwrap()
            .unwrap()
            .records
            .len();
        assert_eq!(archive_before, archive_after, "no backup should be committed");
    }

    #[tokio::test]
    async fn test_serial_increments_on_update() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path());
        let zone = new_zone(dir.path(), "example.com");
        let created = coordinator.create_zone(zone).await.unwrap();
        assert!(created.soa.serial.ends_with("01"));

        let mut updated_zone = created.clone();
        updated_zone.records[0].value = "5.6.7.8".to_string();
        let updated = coordinator.update_zone(updated_zone).await.unwrap();
        assert!(updated.soa.serial.ends_with("02"));
    }

    #[tokio::test]
    async fn test_delete_zone_removes_file_and_block() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path());
        let zone = new_zone(dir.path(), "example.com");
        let created = coordinator.create_zone(zone).await.unwrap();
        assert!(created.file_path.exists());

        coordinator.delete_zone("example.com").await.unwrap();
        assert!(!created.file_path.exists());
        let config_content = std::fs::read_to_string(&coordinator.config.main_config_path).unwrap();
        assert!(!config_content.contains("zone \"example.com\""));
    }
}
