//! 手書き入力の画像化
//!
//! キャンバス座標のストロークや画像ファイルを、分類器が学習した
//! 28x28 の「黒地に白い線」のグリフに変換します。

pub mod glyph;
pub mod strokes;

pub use glyph::{glyph_from_image, glyph_pixels, load_glyph_image, save_debug_png};
pub use strokes::{parse_strokes, strokes_to_glyph, Point, Stroke, PEN_WIDTH};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrokeError {
    #[error("no stroke with at least two points")]
    NoStrokes,
    #[error("stroke {stroke} point {index} has a non-finite coordinate")]
    NonFinite { stroke: usize, index: usize },
    #[error("invalid stroke JSON: {0}")]
    Json(#[from] serde_json::Error),
}
