use serde::{Deserialize, Serialize};

use attic_core::Partition;
use attic_core::protocol::DEFAULT_MAX_UPLOAD_SIZE;

/// Runtime knobs of the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Cap on a single uploaded blob, reported as `maxUploadSize`.
    pub max_upload_size: u64,
    /// Realm used in `WWW-Authenticate` challenges.
    pub realm: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            realm: "attic".to_owned(),
        }
    }
}

/// On-disk TOML configuration for `atticd`. Command-line flags take
/// precedence over every field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    pub listen: Option<String>,
    /// Credential spec, same syntax as `CAMLI_AUTH`.
    pub auth: Option<String>,
    pub max_upload_size: Option<u64>,
    pub store: Option<FileStoreConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStoreConfig {
    pub root: String,
    #[serde(default)]
    pub queue_partitions: Vec<Partition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_config_parses() {
        let cfg: FileConfig = toml::from_str(
            r#"
            listen = "127.0.0.1:3179"
            auth = "userpass:alice:pw"

            [store]
            root = "/var/lib/attic"
            queue_partitions = ["idx", "mirror"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.listen.as_deref(), Some("127.0.0.1:3179"));
        let store = cfg.store.unwrap();
        assert_eq!(store.queue_partitions.len(), 2);
        assert_eq!(store.queue_partitions[0].name(), "idx");
    }

    #[test]
    fn bad_partition_name_rejected() {
        let err = toml::from_str::<FileConfig>(
            r#"
            [store]
            root = "/tmp/x"
            queue_partitions = ["Not-Valid"]
            "#,
        );
        assert!(err.is_err());
    }
}
