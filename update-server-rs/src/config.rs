use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// Root of the live installation the pipeline backs up and overlays.
    pub install_root: PathBuf,
    /// Service-owned state (database, lock file); kept outside the
    /// installation tree so updates and backups never touch it.
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub lock_path: PathBuf,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let install_root = PathBuf::from(
            std::env::var("INSTALL_ROOT").unwrap_or_else(|_| "/var/www/app".into()),
        );
        let data_dir =
            PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".into()));

        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            db_path: data_dir.join("update-server.db"),
            lock_path: data_dir.join("update.lock"),
            install_root,
            data_dir,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
        }
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.install_root.join("backups")
    }

    pub fn updates_dir(&self) -> PathBuf {
        self.install_root.join("updates")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.install_root.join("temp")
    }
}
