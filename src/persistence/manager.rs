use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use strum::{Display, IntoStaticStr};

use crate::{
    config::CoreConfig,
    error::{CoreResult, PersistenceError},
    persistence::{
        codec::{self, Decoded},
        snapshot::PersistedSnapshot,
    },
};

/// Where a restored snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum RestoreSource {
    Main,
    Backup,
    /// Neither file was usable; defaults were constructed.
    Fresh,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Restored {
    pub snapshot: PersistedSnapshot,
    pub source: RestoreSource,
    /// Format version of the file read, `None` for a fresh state.
    pub version: Option<u32>,
}

/// Reads and writes snapshots under the configured directory.
///
/// Callers must serialize `save`/`load`: a save cycle assumes exclusive
/// access to the main, backup and temporary paths.
#[derive(Debug, Clone)]
pub struct PersistenceManager {
    cfg: CoreConfig,
}

impl PersistenceManager {
    pub fn new(cfg: CoreConfig) -> Self {
        Self { cfg }
    }

    pub fn main_path(&self) -> PathBuf {
        self.cfg.persistence.main_path()
    }

    pub fn backup_path(&self) -> PathBuf {
        self.cfg.persistence.backup_path()
    }

    pub fn temp_path(&self) -> PathBuf {
        self.cfg.persistence.temp_path()
    }

    // ============================================================================================
    // Save
    // ============================================================================================

    /// Writes a snapshot durably.
    ///
    /// 1. Encode, write and fsync the temporary path.
    /// 2. Re-read the temporary file and verify magic, version and checksum.
    /// 3. Copy the current main file to the backup path, if it verifies.
    /// 4. Rename the temporary file over the main file.
    ///
    /// A failure at any step leaves the existing main file untouched.
    #[tracing::instrument(skip(self, snapshot), fields(path = %self.main_path().display()))]
    pub fn save(&self, snapshot: &PersistedSnapshot) -> CoreResult<()> {
        let main = self.main_path();
        let backup = self.backup_path();
        let temp = self.temp_path();

        fs::create_dir_all(&self.cfg.persistence.directory).map_err(|e| {
            PersistenceError::WriteFailed {
                path: self.cfg.persistence.directory.display().to_string(),
                msg: e.to_string(),
            }
        })?;

        // 1. Temp file
        let bytes = codec::encode(snapshot);
        write_synced(&temp, &bytes).map_err(|e| PersistenceError::WriteFailed {
            path: temp.display().to_string(),
            msg: e.to_string(),
        })?;

        // 2. Verify what actually landed on disk
        let written = fs::read(&temp).map_err(|e| PersistenceError::ReadFailed {
            path: temp.display().to_string(),
            msg: e.to_string(),
        })?;
        if let Err(e) = codec::verify(&written) {
            let _ = fs::remove_file(&temp);
            return Err(PersistenceError::VerifyFailed {
                path: temp.display().to_string(),
                msg: e.to_string(),
            }
            .into());
        }

        // 3. Rotate the previous good main file into the backup slot
        if main.exists() {
            match fs::read(&main).map(|b| codec::verify(&b)) {
                Ok(Ok(_)) => {
                    fs::copy(&main, &backup)
                        .and_then(|_| File::open(&backup)?.sync_all())
                        .map_err(|e| PersistenceError::WriteFailed {
                            path: backup.display().to_string(),
                            msg: e.to_string(),
                        })?;
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Main snapshot is damaged; keeping previous backup");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Main snapshot unreadable; keeping previous backup");
                }
            }
        }

        // 4. Atomic replace
        fs::rename(&temp, &main).map_err(|e| PersistenceError::ReplaceFailed {
            path: main.display().to_string(),
            msg: e.to_string(),
        })?;

        tracing::info!(
            bytes = bytes.len(),
            version = codec::CURRENT_VERSION,
            saved_at = %snapshot.saved_at,
            config = %self.cfg.fingerprint().unwrap_or_default(),
            "Snapshot saved"
        );
        Ok(())
    }

    // ============================================================================================
    // Load
    // ============================================================================================

    /// Reads and decodes one snapshot file, surfacing any failure.
    pub fn read_file(&self, path: &Path) -> CoreResult<Decoded> {
        let bytes = fs::read(path).map_err(|e| PersistenceError::ReadFailed {
            path: path.display().to_string(),
            msg: e.to_string(),
        })?;
        Ok(codec::decode(&bytes, &self.cfg)?)
    }

    /// Restores the most recent usable snapshot: main, then backup, then a
    /// fresh default state. Never fails.
    #[tracing::instrument(skip(self), fields(path = %self.main_path().display()))]
    pub fn load(&self, now: DateTime<Utc>) -> Restored {
        let candidates = [
            (self.main_path(), RestoreSource::Main),
            (self.backup_path(), RestoreSource::Backup),
        ];

        for (path, source) in candidates {
            if !path.exists() {
                tracing::debug!(source = %source, "No snapshot file");
                continue;
            }
            match self.read_file(&path) {
                Ok(decoded) => {
                    if decoded.is_migrated() {
                        tracing::info!(
                            from = decoded.version,
                            to = codec::CURRENT_VERSION,
                            "Migrated snapshot from older format"
                        );
                    }
                    tracing::info!(source = %source, version = decoded.version, "Snapshot loaded");
                    return Restored {
                        snapshot: decoded.snapshot,
                        source,
                        version: Some(decoded.version),
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        source = %source,
                        error = %e,
                        "Snapshot rejected; trying next source"
                    );
                }
            }
        }

        tracing::warn!("No usable snapshot; starting from defaults");
        Restored {
            snapshot: PersistedSnapshot::fresh(&self.cfg, now),
            source: RestoreSource::Fresh,
            version: None,
        }
    }
}

/// Writes `bytes` and flushes them to the device before returning, so a
/// rename that follows never exposes a partially written file.
fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{breaker::BreakerStatus, config::PersistenceConfig, error::CoreError};
    use chrono::TimeZone;

    // ========================================================================
    // Test Setup & Helpers
    // ========================================================================

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    fn manager(name: &str) -> (PersistenceManager, PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "quantum_core_manager_{name}_{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        let cfg = CoreConfig::default()
            .with_persistence(PersistenceConfig::default().with_directory(&dir));
        (PersistenceManager::new(cfg), dir)
    }

    fn trained(peak: f64) -> PersistedSnapshot {
        let mut snap = PersistedSnapshot::fresh(&CoreConfig::default(), now());
        snap.agents[0].challenger[2].q_sell = -0.3;
        snap.agents[0].challenger[2].trades = 4;
        snap.breaker.peak_equity = peak;
        snap
    }

    // ========================================================================
    // Tests
    // ========================================================================

    #[test]
    fn save_then_load_from_main() {
        let (m, dir) = manager("main");
        let snap = trained(1_000.0);
        m.save(&snap).unwrap();

        assert!(!m.temp_path().exists());
        let restored = m.load(now());
        assert_eq!(restored.source, RestoreSource::Main);
        assert_eq!(restored.version, Some(codec::CURRENT_VERSION));
        assert_eq!(restored.snapshot, snap);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn synced_write_replaces_previous_contents() {
        let (_, dir) = manager("synced");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("file.bin");

        write_synced(&path, &[7u8; 64]).unwrap();
        write_synced(&path, &[1, 2, 3]).unwrap();
        assert_eq!(fs::read(&path).unwrap(), vec![1, 2, 3]);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn second_save_rotates_backup_and_corrupt_main_falls_back() {
        let (m, dir) = manager("backup");
        let first = trained(1_000.0);
        let second = trained(2_000.0);
        m.save(&first).unwrap();
        m.save(&second).unwrap();

        // Flip one payload byte in main
        let mut bytes = fs::read(m.main_path()).unwrap();
        bytes[20] ^= 0xFF;
        fs::write(m.main_path(), &bytes).unwrap();

        let err = m.read_file(&m.main_path()).unwrap_err();
        assert!(err.is_integrity_failure());

        let restored = m.load(now());
        assert_eq!(restored.source, RestoreSource::Backup);
        assert_eq!(restored.snapshot, first);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn both_files_damaged_yields_fresh_state() {
        let (m, dir) = manager("fresh");
        fs::create_dir_all(&dir).unwrap();
        fs::write(m.main_path(), b"garbage").unwrap();
        fs::write(m.backup_path(), b"QCOR").unwrap();

        let restored = m.load(now());
        assert_eq!(restored.source, RestoreSource::Fresh);
        assert_eq!(restored.version, None);
        assert_eq!(restored.snapshot.breaker.status, BreakerStatus::Live);
        assert_eq!(restored.snapshot.agents[0].live[0].trades, 0);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_directory_loads_fresh() {
        let (m, _dir) = manager("missing");
        assert_eq!(m.load(now()).source, RestoreSource::Fresh);
        assert!(matches!(
            m.read_file(&m.main_path()),
            Err(CoreError::Persistence(PersistenceError::ReadFailed { .. }))
        ));
    }
}
