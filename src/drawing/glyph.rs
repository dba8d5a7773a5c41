//! 画像ファイルとグリフの相互変換

use image::{imageops::FilterType, GrayImage, ImageResult};
use std::path::Path;

use crate::dataset::GLYPH_SIZE;
use crate::preprocess::normalize_pixel;

/// 画像をグレースケール化して 28x28（最近傍）に縮める
///
/// 白地に黒で描かれた画像は `invert` で黒地に白へ反転します。
pub fn glyph_from_image(image: &image::DynamicImage, invert: bool) -> GrayImage {
    let gray = image.to_luma8();
    let mut glyph = image::imageops::resize(
        &gray,
        GLYPH_SIZE as u32,
        GLYPH_SIZE as u32,
        FilterType::Nearest,
    );
    if invert {
        image::imageops::invert(&mut glyph);
    }
    glyph
}

/// 画像ファイルを読み込んでグリフにする
pub fn load_glyph_image(path: &Path, invert: bool) -> ImageResult<GrayImage> {
    Ok(glyph_from_image(&image::open(path)?, invert))
}

/// 学習時と同じ正規化を掛けた分類器への入力
pub fn glyph_pixels(glyph: &GrayImage) -> Vec<f32> {
    glyph.pixels().map(|p| normalize_pixel(p[0])).collect()
}

/// 確認用にグリフをPNGで保存
pub fn save_debug_png(glyph: &GrayImage, path: &Path) -> ImageResult<()> {
    glyph.save_with_format(path, image::ImageFormat::Png)
}
