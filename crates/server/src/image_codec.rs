//! Base64 image transport for the predict endpoint.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("invalid base64 image data: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("image data is empty")]
    Empty,

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Decode a base64 payload (optionally a `data:` URL) and write it to `path`.
pub async fn decode_to_file(payload: &str, path: &Path) -> Result<u64, CodecError> {
    let bytes = decode(payload)?;
    tokio::fs::write(path, &bytes)
        .await
        .map_err(|source| CodecError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(bytes.len() as u64)
}

/// Read `path` and return its contents as standard base64.
pub async fn encode_file(path: &Path) -> Result<String, CodecError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| CodecError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(STANDARD.encode(bytes))
}

fn decode(payload: &str) -> Result<Vec<u8>, CodecError> {
    // Browsers send canvas captures as `data:image/jpeg;base64,<data>`.
    let data = match payload.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => payload,
    };
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(CodecError::Empty);
    }
    Ok(STANDARD.decode(compact)?)
}
