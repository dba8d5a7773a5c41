//! IDX形式（MNIST系データセットの配布形式）の読み込み
//!
//! ヘッダはビッグエンディアンの u32 列:
//! - 画像: magic `0x00000803`, 件数, 行数, 列数, 以降ピクセル(u8)
//! - ラベル: magic `0x00000801`, 件数, 以降ラベル(u8)

use thiserror::Error;

use super::{GLYPH_PIXELS, GLYPH_SIZE};

pub const IMAGES_MAGIC: u32 = 0x0000_0803;
pub const LABELS_MAGIC: u32 = 0x0000_0801;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdxError {
    #[error("IDX header truncated: need {needed} bytes, got {actual}")]
    TruncatedHeader { needed: usize, actual: usize },
    #[error("unexpected IDX magic {found:#010x} (expected {expected:#010x})")]
    BadMagic { expected: u32, found: u32 },
    #[error("unsupported glyph geometry {rows}x{cols} (expected 28x28)")]
    BadGeometry { rows: usize, cols: usize },
    #[error("IDX payload holds {actual} bytes but header declares {declared}")]
    PayloadMismatch { declared: usize, actual: usize },
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn check_header(bytes: &[u8], header_len: usize, magic: u32) -> Result<usize, IdxError> {
    if bytes.len() < header_len {
        return Err(IdxError::TruncatedHeader {
            needed: header_len,
            actual: bytes.len(),
        });
    }
    let found = read_u32(bytes, 0);
    if found != magic {
        return Err(IdxError::BadMagic {
            expected: magic,
            found,
        });
    }
    Ok(read_u32(bytes, 4) as usize)
}

/// 画像ファイルを解析し、1枚ずつ 28x28 のバイト列として返す
pub fn parse_images(bytes: &[u8]) -> Result<Vec<[u8; GLYPH_PIXELS]>, IdxError> {
    let count = check_header(bytes, 16, IMAGES_MAGIC)?;
    let rows = read_u32(bytes, 8) as usize;
    let cols = read_u32(bytes, 12) as usize;
    if rows != GLYPH_SIZE || cols != GLYPH_SIZE {
        return Err(IdxError::BadGeometry { rows, cols });
    }

    let payload = &bytes[16..];
    let declared = count * GLYPH_PIXELS;
    if payload.len() != declared {
        return Err(IdxError::PayloadMismatch {
            declared,
            actual: payload.len(),
        });
    }

    Ok(payload
        .chunks_exact(GLYPH_PIXELS)
        .map(|chunk| {
            let mut glyph = [0u8; GLYPH_PIXELS];
            glyph.copy_from_slice(chunk);
            glyph
        })
        .collect())
}

/// ラベルファイルを解析する
pub fn parse_labels(bytes: &[u8]) -> Result<Vec<u8>, IdxError> {
    let count = check_header(bytes, 8, LABELS_MAGIC)?;
    let payload = &bytes[8..];
    if payload.len() != count {
        return Err(IdxError::PayloadMismatch {
            declared: count,
            actual: payload.len(),
        });
    }
    Ok(payload.to_vec())
}

#[cfg(test)]
pub(crate) fn encode_images(images: &[[u8; GLYPH_PIXELS]]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(16 + images.len() * GLYPH_PIXELS);
    bytes.extend_from_slice(&IMAGES_MAGIC.to_be_bytes());
    bytes.extend_from_slice(&(images.len() as u32).to_be_bytes());
    bytes.extend_from_slice(&(GLYPH_SIZE as u32).to_be_bytes());
    bytes.extend_from_slice(&(GLYPH_SIZE as u32).to_be_bytes());
    for image in images {
        bytes.extend_from_slice(image);
    }
    bytes
}

#[cfg(test)]
pub(crate) fn encode_labels(labels: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(8 + labels.len());
    bytes.extend_from_slice(&LABELS_MAGIC.to_be_bytes());
    bytes.extend_from_slice(&(labels.len() as u32).to_be_bytes());
    bytes.extend_from_slice(labels);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_images() {
        let mut first = [0u8; GLYPH_PIXELS];
        first[0] = 255;
        first[GLYPH_PIXELS - 1] = 7;
        let second = [128u8; GLYPH_PIXELS];

        let images = parse_images(&encode_images(&[first, second])).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0][0], 255);
        assert_eq!(images[0][GLYPH_PIXELS - 1], 7);
        assert!(images[1].iter().all(|&p| p == 128));
    }

    #[test]
    fn test_parse_labels() {
        let labels = parse_labels(&encode_labels(&[1, 26, 13])).unwrap();
        assert_eq!(labels, vec![1, 26, 13]);
    }

    #[test]
    fn test_rejects_wrong_magic() {
        let bytes = encode_labels(&[1, 2]);
        assert_eq!(
            parse_images(&bytes),
            Err(IdxError::TruncatedHeader {
                needed: 16,
                actual: 10
            })
        );

        let mut bytes = encode_images(&[[0u8; GLYPH_PIXELS]]);
        bytes[3] = 0x01;
        assert!(matches!(
            parse_images(&bytes),
            Err(IdxError::BadMagic { found: 0x0801, .. })
        ));
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let mut bytes = encode_images(&[[0u8; GLYPH_PIXELS]]);
        bytes[11] = 32;
        assert_eq!(
            parse_images(&bytes),
            Err(IdxError::BadGeometry { rows: 32, cols: 28 })
        );
    }

    #[test]
    fn test_rejects_short_payload() {
        let mut bytes = encode_labels(&[1, 2, 3]);
        bytes.pop();
        assert_eq!(
            parse_labels(&bytes),
            Err(IdxError::PayloadMismatch {
                declared: 3,
                actual: 2
            })
        );
    }
}
