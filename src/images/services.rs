use anyhow::Context;
use uuid::Uuid;

use crate::inference::{ImageFormat, NormalizedImage};
use crate::storage::StorageClient;

const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];

/// Format by magic bytes, ignoring whatever the client declared.
pub fn sniff_format(body: &[u8]) -> Option<ImageFormat> {
    if body.starts_with(JPEG_MAGIC) {
        Some(ImageFormat::Jpeg)
    } else if body.starts_with(PNG_MAGIC) {
        Some(ImageFormat::Png)
    } else {
        None
    }
}

/// Decodes the whole upload on the blocking pool. Catches bodies whose
/// signature is right but whose content is not an image.
pub async fn decode_check(upload: &NormalizedImage) -> anyhow::Result<()> {
    let bytes = upload.bytes.clone();
    let codec = match upload.format {
        ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        ImageFormat::Png => image::ImageFormat::Png,
    };
    tokio::task::spawn_blocking(move || image::load_from_memory_with_format(&bytes, codec))
        .await
        .context("image decoder task")?
        .with_context(|| format!("decode {}", upload.format.mime()))?;
    Ok(())
}

pub fn source_image_key(user_id: Uuid, prediction_id: Uuid, format: ImageFormat) -> String {
    format!("predictions/{}/{}.{}", user_id, prediction_id, format.ext())
}

/// Writes the validated upload to object storage and returns its key.
pub async fn store_source_image(
    storage: &dyn StorageClient,
    user_id: Uuid,
    prediction_id: Uuid,
    image: &NormalizedImage,
) -> anyhow::Result<String> {
    let key = source_image_key(user_id, prediction_id, image.format);
    storage
        .put_object(&key, image.bytes.clone(), image.format.mime())
        .await
        .with_context(|| format!("put_object {}", key))?;
    Ok(key)
}

#[cfg(test)]
mod image_tests {
    use super::*;
    use crate::storage::fake::FakeStorage;
    use bytes::Bytes;

    #[test]
    fn test_sniff_format() {
        assert_eq!(sniff_format(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]), Some(ImageFormat::Jpeg));
        assert_eq!(
            sniff_format(b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR"),
            Some(ImageFormat::Png)
        );
        assert_eq!(sniff_format(b"GIF89a"), None);
        assert_eq!(sniff_format(&[0xFF, 0xD8]), None);
        assert_eq!(sniff_format(&[]), None);
    }

    fn encoded(format: image::ImageFormat) -> Bytes {
        let pixels = image::RgbImage::from_pixel(4, 4, image::Rgb([60, 140, 40]));
        let mut out = std::io::Cursor::new(Vec::new());
        pixels.write_to(&mut out, format).unwrap();
        Bytes::from(out.into_inner())
    }

    #[tokio::test]
    async fn test_decode_check() {
        let png = NormalizedImage {
            bytes: encoded(image::ImageFormat::Png),
            format: ImageFormat::Png,
        };
        assert!(decode_check(&png).await.is_ok());

        let header_only = NormalizedImage {
            bytes: Bytes::from_static(b"\x89PNG\r\n\x1a\n"),
            format: ImageFormat::Png,
        };
        let err = decode_check(&header_only).await.unwrap_err();
        assert!(format!("{:#}", err).contains("decode image/png"));

        let magic_only = NormalizedImage {
            bytes: Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xE0]),
            format: ImageFormat::Jpeg,
        };
        assert!(decode_check(&magic_only).await.is_err());
    }

    #[tokio::test]
    async fn test_store_source_image() {
        let storage = FakeStorage::default();
        let user_id = Uuid::new_v4();
        let prediction_id = Uuid::new_v4();
        let image = NormalizedImage {
            bytes: Bytes::from_static(b"\x89PNG\r\n\x1a\n"),
            format: ImageFormat::Png,
        };

        let key = store_source_image(&storage, user_id, prediction_id, &image)
            .await
            .unwrap();
        assert_eq!(key, format!("predictions/{}/{}.png", user_id, prediction_id));
        let stored = storage.objects.get(&key).unwrap();
        assert_eq!(stored.1, "image/png");
    }
}
