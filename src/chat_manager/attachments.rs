use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::ImageFormat;

use super::types::Attachment;
use crate::error::ChatError;

const DATA_URL_PREFIX: &str = "data:image/";
const BASE64_MARKER: &str = ";base64,";
const ALLOWED_SUBTYPES: &[&str] = &["jpeg", "jpg", "png", "gif", "webp", "bmp"];
const MIN_PAYLOAD_CHARS: usize = 50;

fn invalid(index: usize, reason: impl Into<String>) -> ChatError {
    ChatError::InvalidAttachment {
        index,
        reason: reason.into(),
    }
}

fn check_remote(index: usize, raw: &str) -> Result<(), ChatError> {
    let parsed = url::Url::parse(raw).map_err(|e| invalid(index, format!("bad url: {}", e)))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(()),
        _ => Err(invalid(index, "only http(s) references are accepted")),
    }
}

fn check_data_url(index: usize, raw: &str, max_bytes: usize) -> Result<(), ChatError> {
    let rest = &raw[DATA_URL_PREFIX.len()..];
    let (subtype, payload) = rest
        .split_once(BASE64_MARKER)
        .ok_or_else(|| invalid(index, "data url is not base64 encoded"))?;

    let subtype = subtype.to_ascii_lowercase();
    if !ALLOWED_SUBTYPES.contains(&subtype.as_str()) {
        return Err(invalid(index, format!("unsupported image type {}", subtype)));
    }
    if payload.len() < MIN_PAYLOAD_CHARS {
        return Err(invalid(index, "image payload is too short"));
    }

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| invalid(index, format!("payload is not valid base64: {}", e)))?;
    if bytes.len() > max_bytes {
        return Err(invalid(
            index,
            format!("image is {} bytes, limit is {}", bytes.len(), max_bytes),
        ));
    }

    let detected = image::guess_format(&bytes)
        .map_err(|_| invalid(index, "payload has no recognizable image signature"))?;
    let declared = ImageFormat::from_extension(&subtype);
    if declared != Some(detected) {
        return Err(invalid(
            index,
            format!("declared {} but payload is {:?}", subtype, detected),
        ));
    }
    Ok(())
}

/// Checks one attachment and returns a copy marked as validated.
pub fn validate_attachment(
    index: usize,
    attachment: &Attachment,
    max_bytes: usize,
) -> Result<Attachment, ChatError> {
    let raw = attachment.url.trim();
    if raw.starts_with(DATA_URL_PREFIX) {
        check_data_url(index, raw, max_bytes)?;
    } else if raw.starts_with("http://") || raw.starts_with("https://") {
        check_remote(index, raw)?;
    } else {
        return Err(invalid(index, "not an image data url or http(s) reference"));
    }

    let mut validated = attachment.clone();
    validated.url = raw.to_string();
    validated.validated = true;
    Ok(validated)
}

/// Validates all attachments; the first failure rejects the whole set.
pub fn validate_attachments(
    attachments: &[Attachment],
    max_count: usize,
    max_bytes: usize,
) -> Result<Vec<Attachment>, ChatError> {
    if attachments.len() > max_count {
        return Err(ChatError::TooManyAttachments {
            count: attachments.len(),
            max: max_count,
        });
    }
    attachments
        .iter()
        .enumerate()
        .map(|(i, a)| validate_attachment(i, a, max_bytes))
        .collect()
}

#[cfg(test)]
pub(crate) fn png_data_url() -> String {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend(std::iter::repeat(0u8).take(40));
    format!("data:image/png;base64,{}", STANDARD.encode(bytes))
}
