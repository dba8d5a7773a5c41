//! ストロークのラスタライズ
//!
//! 全点のバウンディングボックスを長辺基準で等倍に縮め、
//! 2ピクセルの余白を残して 28x28 に描きます。

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::dataset::GLYPH_SIZE;
use crate::drawing::StrokeError;

/// ペン幅（ピクセル）
pub const PEN_WIDTH: f32 = 2.0;

/// 余白（ピクセル）
const MARGIN: f32 = 2.0;

/// 線分を打点する間隔（ピクセル）
const STEP: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

pub type Stroke = Vec<Point>;

/// `[[{"x": 0, "y": 0}, ...], ...]` 形式のJSONを読む
pub fn parse_strokes(json: &str) -> Result<Vec<Stroke>, StrokeError> {
    Ok(serde_json::from_str(json)?)
}

/// ストロークを 28x28 のグリフに描く（黒地に白）
///
/// 2点未満のストロークは無視します。
pub fn strokes_to_glyph(strokes: &[Stroke]) -> Result<GrayImage, StrokeError> {
    let usable: Vec<&Stroke> = strokes.iter().filter(|s| s.len() >= 2).collect();
    if usable.is_empty() {
        return Err(StrokeError::NoStrokes);
    }

    for (stroke, points) in strokes.iter().enumerate() {
        if let Some(index) = points
            .iter()
            .position(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(StrokeError::NonFinite { stroke, index });
        }
    }

    let mut min = Point::new(f32::INFINITY, f32::INFINITY);
    let mut max = Point::new(f32::NEG_INFINITY, f32::NEG_INFINITY);
    for p in usable.iter().flat_map(|s| s.iter()) {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
    }

    let size = GLYPH_SIZE as f32;
    let box_size = (max.x - min.x).max(max.y - min.y);
    let scale = |p: &Point| -> Point {
        if box_size > 0.0 {
            Point::new(
                (p.x - min.x) / box_size * (size - 2.0 * MARGIN) + MARGIN,
                (p.y - min.y) / box_size * (size - 2.0 * MARGIN) + MARGIN,
            )
        } else {
            // 1点だけの入力は中央に置く
            Point::new(size / 2.0, size / 2.0)
        }
    };

    let mut glyph = GrayImage::new(GLYPH_SIZE as u32, GLYPH_SIZE as u32);
    for stroke in usable {
        for segment in stroke.windows(2) {
            draw_segment(&mut glyph, scale(&segment[0]), scale(&segment[1]));
        }
    }
    Ok(glyph)
}

fn draw_segment(glyph: &mut GrayImage, from: Point, to: Point) {
    let length = ((to.x - from.x).powi(2) + (to.y - from.y).powi(2)).sqrt();
    let steps = (length / STEP).ceil().max(1.0) as usize;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        stamp(
            glyph,
            Point::new(from.x + (to.x - from.x) * t, from.y + (to.y - from.y) * t),
        );
    }
}

/// 丸いペン先で1点打つ
fn stamp(glyph: &mut GrayImage, center: Point) {
    let radius = PEN_WIDTH / 2.0;
    let (width, height) = glyph.dimensions();

    let x0 = (center.x - radius).floor().max(0.0) as u32;
    let y0 = (center.y - radius).floor().max(0.0) as u32;
    let x1 = ((center.x + radius).ceil() as u32).min(width);
    let y1 = ((center.y + radius).ceil() as u32).min(height);

    for y in y0..y1 {
        for x in x0..x1 {
            let dx = x as f32 + 0.5 - center.x;
            let dy = y as f32 + 0.5 - center.y;
            if dx * dx + dy * dy <= radius * radius {
                glyph.put_pixel(x, y, Luma([255]));
            }
        }
    }
}
