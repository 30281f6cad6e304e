//! Where the connection token comes from when the caller does not pass one

use std::fs;
use std::path::{Path, PathBuf};

/// Cookie / key name holding the token
pub const TOKEN_KEY: &str = "token";

/// Ambient credential lookup, consulted only when `connect` gets no token
pub trait CredentialStore: Send + Sync {
    /// Current token, if any
    fn load(&self) -> Option<String>;
}

/// No stored credential; connections are anonymous unless given a token
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

impl CredentialStore for NoCredentials {
    fn load(&self) -> Option<String> {
        None
    }
}

/// Fixed token
#[derive(Debug, Clone)]
pub struct StaticCredential(pub String);

impl CredentialStore for StaticCredential {
    fn load(&self) -> Option<String> {
        non_empty(&self.0)
    }
}

/// Token read from an environment variable on every lookup
#[derive(Debug, Clone)]
pub struct EnvCredentialStore {
    var: String,
}

impl EnvCredentialStore {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialStore for EnvCredentialStore {
    fn load(&self) -> Option<String> {
        std::env::var(&self.var).ok().and_then(|v| non_empty(&v))
    }
}

/// Token read from a file on every lookup.
///
/// The file holds either a cookie string (`a=1; token=abc`) or the bare
/// token. Read failures are logged and treated as "no credential".
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Option<String> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "no stored credential");
                return None;
            }
        };
        let contents = contents.trim();
        if contents.contains('=') {
            cookie_value(contents, TOKEN_KEY)
        } else {
            non_empty(contents)
        }
    }
}

/// Value of `name` in a `k=v; k2=v2` cookie string
pub fn cookie_value(cookies: &str, name: &str) -> Option<String> {
    cookies
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .and_then(|(_, value)| non_empty(value))
}

/// Explicit token first, then the store
pub fn resolve_token(explicit: Option<&str>, store: &dyn CredentialStore) -> Option<String> {
    explicit.and_then(non_empty).or_else(|| store.load())
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cookie_value() {
        assert_eq!(
            cookie_value("theme=dark; token=abc.def.ghi; lang=en", "token"),
            Some("abc.def.ghi".to_string())
        );
        assert_eq!(cookie_value("theme=dark", "token"), None);
        assert_eq!(cookie_value("token=", "token"), None);
        assert_eq!(cookie_value("mytoken=x; token=y", "token"), Some("y".to_string()));
    }

    #[test]
    fn test_explicit_token_wins() {
        let store = StaticCredential("stored".to_string());
        assert_eq!(resolve_token(Some("given"), &store), Some("given".to_string()));
        assert_eq!(resolve_token(Some("  "), &store), Some("stored".to_string()));
        assert_eq!(resolve_token(None, &store), Some("stored".to_string()));
        assert_eq!(resolve_token(None, &NoCredentials), None);
    }

    #[test]
    fn test_file_store_cookie_and_bare() {
        let mut cookie_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(cookie_file, "session=1; token=from-cookie").unwrap();
        let store = FileCredentialStore::new(cookie_file.path());
        assert_eq!(store.load(), Some("from-cookie".to_string()));

        let mut bare_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(bare_file, "bare-token").unwrap();
        let store = FileCredentialStore::new(bare_file.path());
        assert_eq!(store.load(), Some("bare-token".to_string()));
    }

    #[test]
    fn test_missing_file_is_no_credential() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("absent"));
        assert_eq!(store.load(), None);
    }
}
