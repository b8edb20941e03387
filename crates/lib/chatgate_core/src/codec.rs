//! URL-safe base64 without padding, as used by token segments.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

/// Encodes without padding; decodes padded or unpadded input.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode bytes as an unpadded base64url string.
pub fn b64url_encode(data: impl AsRef<[u8]>) -> String {
    URL_SAFE_LENIENT.encode(data)
}

/// Decode a base64url string, returning `None` on malformed input.
pub fn b64url_decode(s: &str) -> Option<Vec<u8>> {
    URL_SAFE_LENIENT.decode(s).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_omits_padding() {
        assert_eq!(b64url_encode(b"a"), "YQ");
        assert_eq!(b64url_encode([0xfb, 0xff]), "-_8");
    }

    #[test]
    fn decode_accepts_padded_and_unpadded() {
        assert_eq!(b64url_decode("YQ").as_deref(), Some(&b"a"[..]));
        assert_eq!(b64url_decode("YQ==").as_deref(), Some(&b"a"[..]));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(b64url_decode("not base64!").is_none());
        assert!(b64url_decode("+/8").is_none());
    }
}
