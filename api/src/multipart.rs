//! Streaming multipart/form-data decoding for upload bodies.
//!
//! Parts are pulled one at a time from the body stream. Only parts that carry
//! a filename are kept; plain form fields are skipped. The whole body is
//! capped, and going over the cap fails decoding like any other malformed
//! body.

use bytes::Bytes;
use futures::Stream;
use multer::{Constraints, Multipart, SizeLimit};

use crate::constants::DEFAULT_MIME;

/// One uploaded file, fully buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("not a multipart body: {0}")]
    NotMultipart(multer::Error),
    #[error("malformed multipart body: {0}")]
    Malformed(#[from] multer::Error),
}

pub struct PartDecoder<'r> {
    inner: Multipart<'r>,
}

impl<'r> PartDecoder<'r> {
    pub fn new<S, O, E>(stream: S, content_type: &str, limit: u64) -> Result<Self, DecodeError>
    where
        S: Stream<Item = Result<O, E>> + Send + 'r,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'r,
    {
        let boundary = multer::parse_boundary(content_type).map_err(DecodeError::NotMultipart)?;
        let constraints = Constraints::new().size_limit(SizeLimit::new().whole_stream(limit));
        Ok(Self {
            inner: Multipart::with_constraints(stream, boundary, constraints),
        })
    }

    /// Next file part, or `None` once the closing boundary is reached.
    pub async fn next_file(&mut self) -> Result<Option<FilePart>, DecodeError> {
        while let Some(field) = self.inner.next_field().await? {
            let Some(file_name) = field
                .file_name()
                .filter(|name| !name.is_empty())
                .map(str::to_string)
            else {
                tracing::debug!(field = ?field.name(), "Skipping non-file form field");
                continue;
            };

            let field_name = field.name().unwrap_or_default().to_string();
            let mime_type = field
                .content_type()
                .map(|mime| mime.to_string())
                .unwrap_or_else(|| DEFAULT_MIME.to_string());
            let bytes = field.bytes().await?;

            return Ok(Some(FilePart {
                field: field_name,
                file_name,
                mime_type,
                bytes,
            }));
        }
        Ok(None)
    }
}

/// Decodes the whole body before anything is forwarded, so a body that
/// breaks halfway never leaves a partial batch in storage.
pub async fn collect_files<'r, S, O, E>(
    stream: S,
    content_type: &str,
    limit: u64,
) -> Result<Vec<FilePart>, DecodeError>
where
    S: Stream<Item = Result<O, E>> + Send + 'r,
    O: Into<Bytes> + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + 'r,
{
    let mut decoder = PartDecoder::new(stream, content_type, limit)?;
    let mut files = Vec::new();
    while let Some(file) = decoder.next_file().await? {
        files.push(file);
    }
    Ok(files)
}
