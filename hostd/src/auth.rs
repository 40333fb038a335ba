use std::path::PathBuf;
use std::sync::Mutex;

/// Credential seam for the transport. Token issuance lives outside this
/// process; the daemon only ever asks for the current token and, after an
/// authentication failure, whether a fresh one can be obtained.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;

    /// Try to obtain a fresh credential. Returns true when a new token is
    /// available and the caller should reconnect immediately.
    fn refresh(&self) -> bool;
}

/// Reads the token from `TETHER_TOKEN`, falling back to a token file the
/// surrounding application keeps up to date. `refresh` re-reads the file and
/// reports whether it changed since the last token handed out.
pub struct FileTokenProvider {
    path: PathBuf,
    last: Mutex<Option<String>>,
}

impl FileTokenProvider {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            last: Mutex::new(None),
        }
    }

    fn read(&self) -> Option<String> {
        if let Ok(tok) = std::env::var("TETHER_TOKEN") {
            let tok = tok.trim().to_string();
            if !tok.is_empty() {
                return Some(tok);
            }
        }
        std::fs::read_to_string(&self.path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

impl TokenProvider for FileTokenProvider {
    fn token(&self) -> Option<String> {
        let tok = self.read();
        *self.last.lock().expect("token lock") = tok.clone();
        tok
    }

    fn refresh(&self) -> bool {
        let fresh = self.read();
        let mut last = self.last.lock().expect("token lock");
        let changed = fresh.is_some() && fresh != *last;
        if changed {
            *last = fresh;
        }
        changed
    }
}
