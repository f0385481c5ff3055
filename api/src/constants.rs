//! Application constants

/// Multipart field the client sends every photo under
pub const FILES_FIELD: &str = "files";

/// Default ceiling on the whole request body (200 MB)
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 200 * 1024 * 1024;

/// Default listen port
pub const DEFAULT_PORT: u16 = 3000;

/// MIME type recorded when a part carries no Content-Type
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// Google's published signing keys for ID tokens
pub const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";

/// Both issuer spellings Google puts in ID tokens
pub const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

/// How long fetched signing keys are trusted before a refetch (1 hour)
pub const JWKS_CACHE_SECS: u64 = 60 * 60;

/// Folder name used under LOCAL_STORAGE_PATH when DRIVE_FOLDER_ID is unset
pub const DEFAULT_LOCAL_FOLDER: &str = "uploads";

/// Minimum gap between refetches triggered by an unknown key id
pub const JWKS_MIN_REFRESH_SECS: u64 = 60;
