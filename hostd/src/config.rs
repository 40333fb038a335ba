use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_url: String,
    pub host_id: String,
    pub data_root: PathBuf,
    pub local_socket: PathBuf,
    pub token_path: PathBuf,
    pub redaction_extra_regex: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let server_url =
            std::env::var("TETHER_SERVER_URL").unwrap_or_else(|_| "ws://127.0.0.1:8787".into());
        let host_id = std::env::var("TETHER_HOST_ID")
            .unwrap_or_else(|_| format!("host-{}", uuid::Uuid::new_v4()));

        let data_root = std::env::var("TETHER_DATA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
                PathBuf::from(home).join(".tether")
            });

        let local_socket = std::env::var("TETHER_LOCAL_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_root.join("tetherd.sock"));

        let token_path = std::env::var("TETHER_TOKEN_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_root.join("token"));

        let redaction_extra_regex = std::env::var("TETHER_REDACTION_EXTRA_REGEX")
            .ok()
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Self {
            server_url,
            host_id,
            data_root,
            local_socket,
            token_path,
            redaction_extra_regex,
        }
    }
}
