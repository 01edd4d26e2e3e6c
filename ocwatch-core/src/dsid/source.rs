//! DSID credential sources
//!
//! A credential source yields the freshest DSID known to the system. The
//! controller reads the handoff file written by `ocwatch poll`; the poller
//! itself reads the browser's cookie store.

use crate::error::CredentialError;
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use rusqlite::{OpenFlags, OptionalExtension};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default bound on a single credential read
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Something that can produce the current DSID
pub trait CredentialSource {
    /// Fetch the current DSID, or an error if none is available right now
    fn get(&self) -> impl Future<Output = Result<String, CredentialError>> + Send;
}

/// Reads the DSID from a handoff file
#[derive(Debug, Clone)]
pub struct FileCredentialSource {
    path: PathBuf,
    timeout: Duration,
}

impl FileCredentialSource {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialSource for FileCredentialSource {
    #[tracing::instrument(skip(self), fields(path = %self.path.display()))]
    async fn get(&self) -> Result<String, CredentialError> {
        let contents = tokio::time::timeout(self.timeout, tokio::fs::read_to_string(&self.path))
            .await
            .map_err(|_| CredentialError::Timeout(self.timeout))??;
        Ok(contents.trim_end().to_string())
    }
}

/// Reads the DSID straight out of a Chromium `Cookies` SQLite database
///
/// Plaintext values and Linux `v10` encrypted values are supported. Values
/// that cannot be decrypted (keyring backed `v11`) are reported as
/// [`CredentialError::Encrypted`].
#[derive(Debug, Clone)]
pub struct CookieStoreSource {
    path: PathBuf,
    host: String,
    cookie_name: String,
    timeout: Duration,
}

impl CookieStoreSource {
    pub fn new(
        path: impl Into<PathBuf>,
        host: impl Into<String>,
        cookie_name: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            host: host.into(),
            cookie_name: cookie_name.into(),
            timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn read_blocking(
        path: &Path,
        host: &str,
        cookie_name: &str,
    ) -> Result<String, CredentialError> {
        // A running browser holds the database with an exclusive lock; an
        // immutable open reads the file without taking any lock at all.
        let conn = rusqlite::Connection::open_with_flags(
            immutable_uri(path)?,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let row: Option<(String, Vec<u8>)> = conn
            .query_row(
                "SELECT value, encrypted_value FROM cookies \
                 WHERE host_key = ?1 AND name = ?2 \
                 ORDER BY last_access_utc DESC LIMIT 1",
                rusqlite::params![host, cookie_name],
                |row| {
                    let value: String = row.get(0)?;
                    let encrypted: Option<Vec<u8>> = row.get(1)?;
                    Ok((value, encrypted.unwrap_or_default()))
                },
            )
            .optional()?;

        match row {
            Some((value, _)) if !value.is_empty() => Ok(value),
            Some((_, encrypted)) if !encrypted.is_empty() => {
                let prefixed = store_version(&conn) >= HOST_DIGEST_MIN_VERSION;
                decrypt_v10(&encrypted, prefixed).ok_or_else(|| CredentialError::Encrypted {
                    host: host.to_string(),
                    name: cookie_name.to_string(),
                })
            }
            _ => Err(CredentialError::NotFound {
                host: host.to_string(),
                name: cookie_name.to_string(),
            }),
        }
    }
}

/// Cookie store schema version from which decrypted values start with a
/// SHA-256 digest of the host key
const HOST_DIGEST_MIN_VERSION: i64 = 24;
const HOST_DIGEST_LEN: usize = 32;

/// `file:` URI that opens the database with `immutable=1`
fn immutable_uri(path: &Path) -> Result<String, CredentialError> {
    let absolute = std::fs::canonicalize(path)?;
    let mut uri = url::Url::from_file_path(&absolute).map_err(|()| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("not a usable cookie store path: {}", absolute.display()),
        )
    })?;
    uri.set_query(Some("immutable=1"));
    Ok(uri.into())
}

/// Schema version from the `meta` table, 0 when absent
fn store_version(conn: &rusqlite::Connection) -> i64 {
    conn.query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| {
        row.get::<_, String>(0)
    })
    .ok()
    .and_then(|v| v.parse().ok())
    .unwrap_or(0)
}

/// Decrypt a Linux `v10` cookie value
///
/// `v10` values are encrypted with the fixed "peanuts" password used when no
/// keyring is available. `v11` values need the keyring secret and are not
/// handled.
fn decrypt_v10(encrypted: &[u8], host_digest_prefixed: bool) -> Option<String> {
    let payload = encrypted.strip_prefix(b"v10")?;
    let plain = Aes128CbcDec::new(&v10_key().into(), &V10_IV.into())
        .decrypt_padded_vec_mut::<Pkcs7>(payload)
        .ok()?;
    let plain = if host_digest_prefixed {
        plain.get(HOST_DIGEST_LEN..)?.to_vec()
    } else {
        plain
    };
    String::from_utf8(plain).ok()
}

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const V10_PASSWORD: &[u8] = b"peanuts";
const V10_SALT: &[u8] = b"saltysalt";
const V10_IV: [u8; 16] = [b' '; 16];

fn v10_key() -> [u8; 16] {
    let mut key = [0u8; 16];
    pbkdf2::pbkdf2_hmac::<sha1::Sha1>(V10_PASSWORD, V10_SALT, 1, &mut key);
    key
}

impl CredentialSource for CookieStoreSource {
    #[tracing::instrument(skip(self), fields(host = %self.host, cookie = %self.cookie_name))]
    async fn get(&self) -> Result<String, CredentialError> {
        let path = self.path.clone();
        let host = self.host.clone();
        let cookie_name = self.cookie_name.clone();

        let read = tokio::task::spawn_blocking(move || {
            Self::read_blocking(&path, &host, &cookie_name)
        });

        match tokio::time::timeout(self.timeout, read).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(CredentialError::Io(std::io::Error::other(join_err))),
            Err(_) => {
                debug!("Cookie store read exceeded {:?}", self.timeout);
                Err(CredentialError::Timeout(self.timeout))
            }
        }
    }
}
