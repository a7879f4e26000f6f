//! Object store adapters
//!
//! Audio blobs and battle metadata live in two logical buckets. The
//! adapter is a tagged union: a filesystem-backed bucket for single-host
//! deployments (public URLs served by an external file server) and an
//! HTTP object-store client for everything else. Audio keys are written
//! once and never overwritten; metadata keys are overwritten on every
//! battle mutation.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the remote bucket bearer token.
pub const BUCKET_TOKEN_ENV: &str = "SOUNDCLASH_BUCKET_TOKEN";

const REMOTE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("object '{0}' not found")]
    NotFound(String),

    #[error("object '{0}' already exists")]
    AlreadyExists(String),

    #[error("bucket has no public URL configured")]
    NoPublicUrl,

    #[error("storage IO for '{key}': {reason}")]
    Io { key: String, reason: String },
}

/// How a blob is written.
#[derive(Debug, Clone, Copy)]
pub struct PutOptions {
    pub content_type: &'static str,
    /// World-readable (local adapter file mode, remote adapter ACL hint).
    pub public: bool,
    pub allow_overwrite: bool,
}

impl PutOptions {
    /// Immutable audio blob: public, write-once.
    pub fn audio() -> Self {
        Self {
            content_type: "audio/mpeg",
            public: true,
            allow_overwrite: false,
        }
    }

    /// Mutable battle record: private, overwritten on each mutation.
    pub fn metadata() -> Self {
        Self {
            content_type: "application/json",
            public: false,
            allow_overwrite: true,
        }
    }
}

/// A blob store.
pub enum Bucket {
    Local(LocalBucket),
    Remote(RemoteBucket),
}

impl Bucket {
    pub async fn put(&self, key: &str, bytes: &[u8], opts: PutOptions) -> Result<(), BucketError> {
        match self {
            Bucket::Local(bucket) => bucket.put(key, bytes, opts).await,
            Bucket::Remote(bucket) => bucket.put(key, bytes, opts).await,
        }
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, BucketError> {
        match self {
            Bucket::Local(bucket) => bucket.get(key).await,
            Bucket::Remote(bucket) => bucket.get(key).await,
        }
    }

    /// URL where the object can be fetched by clients.
    pub fn get_url(&self, key: &str) -> Result<String, BucketError> {
        match self {
            Bucket::Local(bucket) => bucket.get_url(key),
            Bucket::Remote(bucket) => Ok(bucket.get_url(key)),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), BucketError> {
        match self {
            Bucket::Local(bucket) => bucket.delete(key).await,
            Bucket::Remote(bucket) => bucket.delete(key).await,
        }
    }
}

/// Filesystem adapter. Keys are flat file names under `root`.
pub struct LocalBucket {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalBucket {
    pub fn new(root: PathBuf, public_base_url: Option<String>) -> std::io::Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            public_base_url,
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    async fn put(&self, key: &str, bytes: &[u8], opts: PutOptions) -> Result<(), BucketError> {
        let path = self.path_for(key);
        if !opts.allow_overwrite && path.exists() {
            return Err(BucketError::AlreadyExists(key.to_string()));
        }
        tokio::fs::write(&path, bytes).await.map_err(|e| BucketError::Io {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = if opts.public { 0o644 } else { 0o600 };
            let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode));
        }

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BucketError> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BucketError::NotFound(key.to_string()))
            }
            Err(e) => Err(BucketError::Io {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn get_url(&self, key: &str) -> Result<String, BucketError> {
        let base = self.public_base_url.as_ref().ok_or(BucketError::NoPublicUrl)?;
        Ok(format!("{}/{}", base.trim_end_matches('/'), key))
    }

    async fn delete(&self, key: &str) -> Result<(), BucketError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BucketError::NotFound(key.to_string()))
            }
            Err(e) => Err(BucketError::Io {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// HTTP object-store adapter: `PUT/GET/DELETE {endpoint}/{bucket}/{key}`.
///
/// Write-once semantics use `If-None-Match: *`; a 412 from the store means
/// the key already exists.
pub struct RemoteBucket {
    http: reqwest::Client,
    endpoint: String,
    bucket: String,
    token: Option<String>,
}

impl RemoteBucket {
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, BucketError> {
        let http = reqwest::Client::builder()
            .timeout(REMOTE_TIMEOUT)
            .build()
            .map_err(|e| BucketError::Io {
                key: String::new(),
                reason: format!("HTTP client: {}", e),
            })?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            token,
        })
    }

    /// Token resolved from `SOUNDCLASH_BUCKET_TOKEN` when present.
    pub fn from_env(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Result<Self, BucketError> {
        Self::new(endpoint, bucket, std::env::var(BUCKET_TOKEN_ENV).ok())
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn put(&self, key: &str, bytes: &[u8], opts: PutOptions) -> Result<(), BucketError> {
        let mut request = self
            .http
            .put(self.object_url(key))
            .header(reqwest::header::CONTENT_TYPE, opts.content_type)
            .body(bytes.to_vec());
        if !opts.allow_overwrite {
            request = request.header(reqwest::header::IF_NONE_MATCH, "*");
        }
        let response = self.authorize(request).send().await.map_err(|e| BucketError::Io {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            reqwest::StatusCode::PRECONDITION_FAILED => {
                Err(BucketError::AlreadyExists(key.to_string()))
            }
            status => Err(BucketError::Io {
                key: key.to_string(),
                reason: format!("store returned {}", status),
            }),
        }
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BucketError> {
        let response = self
            .authorize(self.http.get(self.object_url(key)))
            .send()
            .await
            .map_err(|e| BucketError::Io {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        match response.status() {
            status if status.is_success() => {
                response.bytes().await.map(|b| b.to_vec()).map_err(|e| BucketError::Io {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            }
            reqwest::StatusCode::NOT_FOUND => Err(BucketError::NotFound(key.to_string())),
            status => Err(BucketError::Io {
                key: key.to_string(),
                reason: format!("store returned {}", status),
            }),
        }
    }

    fn get_url(&self, key: &str) -> String {
        self.object_url(key)
    }

    async fn delete(&self, key: &str) -> Result<(), BucketError> {
        let response = self
            .authorize(self.http.delete(self.object_url(key)))
            .send()
            .await
            .map_err(|e| BucketError::Io {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            reqwest::StatusCode::NOT_FOUND => Err(BucketError::NotFound(key.to_string())),
            status => Err(BucketError::Io {
                key: key.to_string(),
                reason: format!("store returned {}", status),
            }),
        }
    }
}
