use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataUriError {
    #[error("Not a data URI")]
    NotDataUri,
    #[error("Data URI is not base64 encoded")]
    NotBase64,
    #[error("Invalid base64 payload: {0}")]
    InvalidPayload(String),
}

pub fn to_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Splits `data:<mime>;base64,<payload>` into its MIME type and bytes.
pub fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>), DataUriError> {
    let rest = uri.strip_prefix("data:").ok_or(DataUriError::NotDataUri)?;
    let (meta, payload) = rest.split_once(',').ok_or(DataUriError::NotDataUri)?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or(DataUriError::NotBase64)?;
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| DataUriError::InvalidPayload(e.to_string()))?;
    Ok((mime.to_string(), bytes))
}

/// Best-effort MIME sniffing for the two formats the camera and uploads produce.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else {
        "image/jpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_uri_round_trip() {
        let uri = to_data_uri("image/png", &[1, 2, 3]);
        assert!(uri.starts_with("data:image/png;base64,"));
        let (mime, bytes) = decode_data_uri(&uri).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[test]
    fn test_rejects_non_base64_uri() {
        assert_eq!(
            decode_data_uri("data:text/plain,hello"),
            Err(DataUriError::NotBase64)
        );
        assert_eq!(
            decode_data_uri("https://example.com/a.png"),
            Err(DataUriError::NotDataUri)
        );
    }
}
