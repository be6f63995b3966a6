/*!
 * Object storage URI parsing
 *
 * Recognised forms:
 *   s3://bucket/key
 *   gs://bucket/key
 *   azure://container/blob
 *   https://<account>.blob.core.windows.net/container/blob
 *   mem://bucket/key          (process-local in-memory store, used by tests)
 *
 * Anything else is treated as a filesystem path.
 */

use std::fmt;

use url::Url;

/// Storage technology behind a parsed URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    S3,
    Gcs,
    Azure,
    /// In-memory store shared process-wide; exists for the test suite.
    Memory,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::S3 => write!(f, "s3"),
            Scheme::Gcs => write!(f, "gs"),
            Scheme::Azure => write!(f, "azure"),
            Scheme::Memory => write!(f, "mem"),
        }
    }
}

/// A parsed object storage location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageUri {
    pub scheme: Scheme,
    /// Bucket (S3/GCS) or container (Azure)
    pub bucket: String,
    /// Object key within the bucket
    pub key: String,
    /// Endpoint override, from the URI host or the environment
    pub endpoint: Option<String>,
    /// Storage account, for Azure https form
    pub account: Option<String>,
}

impl StorageUri {
    /// Parse `path` as an object storage URI; `None` means it is a plain
    /// filesystem path.
    pub fn parse(path: &str) -> Option<Self> {
        if !path.contains("://") {
            return None;
        }

        // has a scheme marker but is not a well-formed URI
        let url = Url::parse(path).ok()?;

        // a malformed object URI (e.g. a bucket with no key) is treated as a
        // filesystem path, which will surface FileAccessError at read time
        match url.scheme() {
            "s3" => split_bucket_key(&url).map(|(bucket, key)| Self {
                scheme: Scheme::S3,
                bucket,
                key,
                endpoint: std::env::var("RUNAI_STREAMER_S3_ENDPOINT").ok(),
                account: None,
            }),
            "gs" => split_bucket_key(&url).map(|(bucket, key)| Self {
                scheme: Scheme::Gcs,
                bucket,
                key,
                endpoint: None,
                account: None,
            }),
            "azure" => split_bucket_key(&url).map(|(bucket, key)| Self {
                scheme: Scheme::Azure,
                bucket,
                key,
                endpoint: std::env::var("AZURE_STORAGE_ENDPOINT").ok(),
                account: std::env::var("AZURE_STORAGE_ACCOUNT_NAME").ok(),
            }),
            "mem" => split_bucket_key(&url).map(|(bucket, key)| Self {
                scheme: Scheme::Memory,
                bucket,
                key,
                endpoint: None,
                account: None,
            }),
            "https" => parse_azure_https(&url),
            _ => None,
        }
    }
}

/// `https://<account>.blob.core.windows.net/container/blob`
fn parse_azure_https(url: &Url) -> Option<StorageUri> {
    let host = url.host_str()?;

    let account = match host.strip_suffix(".blob.core.windows.net") {
        Some(account) if !account.is_empty() => account.to_string(),
        _ => return None,
    };

    let mut segments = url.path().trim_start_matches('/').splitn(2, '/');
    let container = segments.next().unwrap_or_default();
    let blob = segments.next().unwrap_or_default();

    if container.is_empty() || blob.is_empty() {
        return None;
    }

    Some(StorageUri {
        scheme: Scheme::Azure,
        bucket: container.to_string(),
        key: blob.to_string(),
        endpoint: Some(format!("https://{}", host)),
        account: Some(account),
    })
}

fn split_bucket_key(url: &Url) -> Option<(String, String)> {
    let bucket = url.host_str().unwrap_or_default().to_string();
    let key = url.path().trim_start_matches('/').to_string();

    if bucket.is_empty() || key.is_empty() {
        return None;
    }

    Some((bucket, key))
}

impl fmt::Display for StorageUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.key)
    }
}
