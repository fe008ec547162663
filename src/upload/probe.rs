use super::errors::{Result, UploadError};
use super::types::{read_head, FileHandle};

/// How much of the payload is read when looking for the image header.
/// JPEG files with large EXIF blocks put their SOF marker far in.
const PROBE_LIMIT: usize = 256 * 1024;

/// Read the pixel dimensions of an image payload from its header.
pub async fn probe_dimensions(file: &FileHandle) -> Result<(u32, u32)> {
    let head = read_head(&file.source, PROBE_LIMIT).await?;
    dimensions_from_header(&head)
}

pub fn dimensions_from_header(data: &[u8]) -> Result<(u32, u32)> {
    if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        png_dimensions(data)
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        gif_dimensions(data)
    } else if data.starts_with(&[0xFF, 0xD8]) {
        jpeg_dimensions(data)
    } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        webp_dimensions(data)
    } else {
        Err(probe_error("unrecognised image format"))
    }
}

fn probe_error(message: &str) -> UploadError {
    UploadError::DimensionProbe(message.to_string())
}

fn be_u16(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn le_u16(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn le_u24(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 3).map(|b| u32::from_le_bytes([b[0], b[1], b[2], 0]))
}

fn png_dimensions(data: &[u8]) -> Result<(u32, u32)> {
    // IHDR is always the first chunk
    if data.get(12..16) != Some(b"IHDR".as_slice()) {
        return Err(probe_error("png without IHDR"));
    }
    match (be_u32(data, 16), be_u32(data, 20)) {
        (Some(width), Some(height)) => Ok((width, height)),
        _ => Err(probe_error("truncated png header")),
    }
}

fn gif_dimensions(data: &[u8]) -> Result<(u32, u32)> {
    match (le_u16(data, 6), le_u16(data, 8)) {
        (Some(width), Some(height)) => Ok((width as u32, height as u32)),
        _ => Err(probe_error("truncated gif header")),
    }
}

fn jpeg_dimensions(data: &[u8]) -> Result<(u32, u32)> {
    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return Err(probe_error("corrupt jpeg marker"));
        }
        let marker = data[pos + 1];
        // fill bytes
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        // standalone markers carry no length
        if marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            pos += 2;
            continue;
        }

        let length = be_u16(data, pos + 2).ok_or_else(|| probe_error("truncated jpeg segment"))? as usize;
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            let height = be_u16(data, pos + 5);
            let width = be_u16(data, pos + 7);
            return match (width, height) {
                (Some(width), Some(height)) => Ok((width as u32, height as u32)),
                _ => Err(probe_error("truncated jpeg frame header")),
            };
        }
        if marker == 0xDA {
            break;
        }
        pos += 2 + length;
    }

    Err(probe_error("no jpeg frame header found"))
}

fn webp_dimensions(data: &[u8]) -> Result<(u32, u32)> {
    let truncated = || probe_error("truncated webp header");
    match data.get(12..16) {
        Some(b"VP8 ") => {
            let width = le_u16(data, 26).ok_or_else(truncated)? & 0x3FFF;
            let height = le_u16(data, 28).ok_or_else(truncated)? & 0x3FFF;
            Ok((width as u32, height as u32))
        }
        Some(b"VP8L") => {
            let b = data.get(21..25).ok_or_else(truncated)?;
            let bits = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            Ok(((bits & 0x3FFF) + 1, ((bits >> 14) & 0x3FFF) + 1))
        }
        Some(b"VP8X") => {
            let width = le_u24(data, 24).ok_or_else(truncated)? + 1;
            let height = le_u24(data, 27).ok_or_else(truncated)? + 1;
            Ok((width, height))
        }
        _ => Err(probe_error("unknown webp chunk")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn png_header(width: u32, height: u32) -> Vec<u8> {
        let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
        data.extend_from_slice(&13u32.to_be_bytes());
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&[8, 6, 0, 0, 0]);
        data
    }

    #[test]
    fn test_png_dimensions() {
        assert_eq!(dimensions_from_header(&png_header(640, 480)).unwrap(), (640, 480));
    }

    #[test]
    fn test_gif_dimensions() {
        let mut data = b"GIF89a".to_vec();
        data.extend_from_slice(&320u16.to_le_bytes());
        data.extend_from_slice(&200u16.to_le_bytes());
        assert_eq!(dimensions_from_header(&data).unwrap(), (320, 200));
    }

    #[test]
    fn test_jpeg_dimensions_skips_app_segments() {
        let mut data = vec![0xFF, 0xD8];
        // APP0 with a 16 byte payload
        data.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
        data.extend_from_slice(&[0u8; 14]);
        // SOF0: length, precision, height, width
        data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08]);
        data.extend_from_slice(&1080u16.to_be_bytes());
        data.extend_from_slice(&1920u16.to_be_bytes());
        data.extend_from_slice(&[0u8; 10]);

        assert_eq!(dimensions_from_header(&data).unwrap(), (1920, 1080));
    }

    #[test]
    fn test_webp_extended_dimensions() {
        let mut data = b"RIFF\0\0\0\0WEBPVP8X".to_vec();
        data.extend_from_slice(&[0u8; 8]);
        data.extend_from_slice(&[0xFF, 0x03, 0x00]);
        data.extend_from_slice(&[0x1F, 0x02, 0x00]);
        assert_eq!(dimensions_from_header(&data).unwrap(), (1024, 544));
    }

    #[test]
    fn test_unknown_and_truncated_headers() {
        assert!(matches!(
            dimensions_from_header(b"not an image"),
            Err(UploadError::DimensionProbe(_))
        ));
        assert!(dimensions_from_header(&png_header(1, 1)[..18]).is_err());
        assert!(dimensions_from_header(&[0xFF, 0xD8, 0xFF, 0xDA, 0x00, 0x02]).is_err());
    }

    #[tokio::test]
    async fn test_probe_in_memory_file() {
        let file = FileHandle::from_bytes("a.png", "image/png", Bytes::from(png_header(12, 34)));
        assert_eq!(probe_dimensions(&file).await.unwrap(), (12, 34));
    }
}
