//! 🖼️ Transport Encoder: page bytes in, base64 text out.
//!
//! The inference endpoint wants images inline as `data:` URLs, so every page
//! gets read, base64'd, and labelled with a content type. That's it. No resizing,
//! no re-encoding, no "helpful" JPEG recompression at quality 12.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;

use crate::common::{InputItem, Payload};
use crate::error::EncodingError;

/// 🏷️ What we call it when the bytes refuse to introduce themselves.
/// The deployed OCR model was only ever fed PNG labels, and it coped.
pub const FALLBACK_CONTENT_TYPE: &str = "image/png";

/// 📦 One item, wire-ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedItem {
    pub id: String,
    pub content_type: String,
    /// base64 text, standard alphabet, padded
    pub data: String,
}

impl EncodedItem {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.content_type, self.data)
    }
}

/// 🚀 Encode one item. The only way this fails is if a file-backed payload
/// can't be read.
pub async fn encode(item: &InputItem) -> Result<EncodedItem, EncodingError> {
    let bytes = match item.payload() {
        Payload::Bytes(bytes) => std::borrow::Cow::Borrowed(bytes.as_slice()),
        Payload::File(path) => {
            let bytes = tokio::fs::read(path).await.map_err(|source| EncodingError::Unreadable {
                id: item.id().to_string(),
                path: path.clone(),
                source,
            })?;
            std::borrow::Cow::Owned(bytes)
        }
    };

    let content_type = item
        .content_type()
        .map(str::to_string)
        .unwrap_or_else(|| sniff_content_type(&bytes).to_string());

    Ok(EncodedItem {
        id: item.id().to_string(),
        content_type,
        data: BASE64_STANDARD.encode(&bytes),
    })
}

/// 👃 Guess the image type from its first few bytes.
pub fn sniff_content_type(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        [b'I', b'I', 0x2A, 0x00, ..] | [b'M', b'M', 0x00, 0x2A, ..] => "image/tiff",
        _ => FALLBACK_CONTENT_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A_TINY_PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[tokio::test]
    async fn the_one_where_bytes_become_a_data_url() {
        let item = InputItem::from_bytes("page_1", A_TINY_PNG_HEADER.to_vec());
        let encoded = encode(&item).await.expect("💀 in-memory bytes cannot be unreadable");

        assert_eq!(encoded.id, "page_1");
        assert_eq!(encoded.content_type, "image/png");
        assert_eq!(encoded.data, "iVBORw0KGgo=");
        assert_eq!(encoded.data_url(), "data:image/png;base64,iVBORw0KGgo=");
    }

    #[tokio::test]
    async fn the_one_where_the_file_is_read_when_it_is_needed() {
        let dir = tempfile::tempdir().expect("💀 tempdir refused to exist");
        let path = dir.path().join("page_7.jpg");
        std::fs::write(&path, [0xFF, 0xD8, 0xFF, 0xE0, 0x00]).expect("💀 could not write fixture");

        let encoded = encode(&InputItem::from_file("page_7", &path))
            .await
            .expect("💀 the file is right there");

        assert_eq!(encoded.content_type, "image/jpeg");
        assert_eq!(encoded.data, BASE64_STANDARD.encode([0xFF, 0xD8, 0xFF, 0xE0, 0x00]));
    }

    #[tokio::test]
    async fn the_one_where_the_file_ghosted_us() {
        let dir = tempfile::tempdir().expect("💀 tempdir refused to exist");
        let item = InputItem::from_file("page_404", dir.path().join("nope.png"));

        let err = encode(&item).await.expect_err("a missing file should not encode");
        let EncodingError::Unreadable { id, .. } = err;
        assert_eq!(id, "page_404");
    }

    #[tokio::test]
    async fn the_one_where_an_explicit_content_type_beats_sniffing() {
        let item = InputItem::from_bytes("p", A_TINY_PNG_HEADER.to_vec()).with_content_type("image/x-custom");
        let encoded = encode(&item).await.expect("💀 should encode");
        assert_eq!(encoded.content_type, "image/x-custom");
    }

    #[test]
    fn the_one_where_the_nose_knows() {
        assert_eq!(sniff_content_type(b"GIF89a..."), "image/gif");
        assert_eq!(sniff_content_type(b"RIFF\x10\x00\x00\x00WEBPVP8 "), "image/webp");
        assert_eq!(sniff_content_type(b"II\x2A\x00rest"), "image/tiff");
        assert_eq!(sniff_content_type(b"MM\x00\x2Arest"), "image/tiff");
        assert_eq!(sniff_content_type(b"who knows"), FALLBACK_CONTENT_TYPE);
        assert_eq!(sniff_content_type(&[]), FALLBACK_CONTENT_TYPE);
    }
}
