use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Directory containing the SCRFD and ArcFace ONNX models.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Root of the reference photo tree.
    pub photo_dir: PathBuf,
    /// Optional site policy book overlaying the built-in presets.
    pub policy_file: Option<PathBuf>,
    /// JSON-lines log written when the database rejects an entry.
    pub audit_fallback: PathBuf,
    /// Device id recorded on every log entry.
    pub device_id: String,
    /// Gallery size from which matching fans out across threads.
    pub parallel_min: usize,
}

impl Config {
    /// Load configuration from `DOORWARD_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = doorward_core::data_dir();

        Self {
            model_dir: env_path("DOORWARD_MODEL_DIR").unwrap_or_else(doorward_core::default_model_dir),
            db_path: env_path("DOORWARD_DB_PATH").unwrap_or_else(|| data_dir.join("doorward.db")),
            photo_dir: env_path("DOORWARD_PHOTO_DIR").unwrap_or_else(|| data_dir.join("faces")),
            policy_file: env_path("DOORWARD_POLICY_FILE"),
            audit_fallback: env_path("DOORWARD_AUDIT_FALLBACK")
                .unwrap_or_else(|| data_dir.join("access_log.jsonl")),
            device_id: std::env::var("DOORWARD_DEVICE_ID")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| doorward_core::audit::DEFAULT_DEVICE_ID.to_string()),
            parallel_min: env_usize("DOORWARD_PARALLEL_MIN", 256),
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
