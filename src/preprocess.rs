//! 前処理
//!
//! ラベルを 1..=26 から 0..=25 に詰め、ピクセル値を 1/255 倍して 0.0..=1.0 に収め、
//! 末尾にチャンネル次元を付けた `[rows, 28, 28, 1]` 形状のデータを作ります。
//! 副作用のない純粋な変換で、学習用と評価用に同じように適用します。

use burn_dataset::Dataset;
use thiserror::Error;

use crate::dataset::{RawSplit, Split, GLYPH_PIXELS, GLYPH_SIZE, SOURCE_LABEL_MAX, SOURCE_LABEL_MIN};

/// 出力チャンネル数（グレースケール）
pub const CHANNELS: usize = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreprocessError {
    #[error("{split} example {index} has label {label}, outside 1..=26")]
    LabelOutOfRange { split: Split, index: usize, label: u8 },
}

/// 前処理済みの1サンプル
#[derive(Debug, Clone, PartialEq)]
pub struct LetterItem {
    /// 行優先のピクセル値（0.0..=1.0）
    pub image: Vec<f32>,
    /// 0..=25
    pub label: usize,
}

/// 前処理済みの分割データ
///
/// `images` は `[rows, 28, 28, 1]` を行優先で平坦化したもの。
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSplit {
    split: Split,
    images: Vec<f32>,
    labels: Vec<u8>,
}

impl PreparedSplit {
    pub fn split(&self) -> Split {
        self.split
    }

    pub fn images(&self) -> &[f32] {
        &self.images
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    pub fn rows(&self) -> usize {
        self.labels.len()
    }

    pub fn shape(&self) -> [usize; 4] {
        [self.rows(), GLYPH_SIZE, GLYPH_SIZE, CHANNELS]
    }

    pub fn image(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(GLYPH_PIXELS * CHANNELS)?;
        self.images.get(start..start + GLYPH_PIXELS * CHANNELS)
    }
}

impl Dataset<LetterItem> for PreparedSplit {
    fn get(&self, index: usize) -> Option<LetterItem> {
        let image = self.image(index)?.to_vec();
        let label = *self.labels.get(index)? as usize;
        Some(LetterItem { image, label })
    }

    fn len(&self) -> usize {
        self.rows()
    }
}

pub fn rebase_label(label: u8) -> Option<u8> {
    (SOURCE_LABEL_MIN..=SOURCE_LABEL_MAX)
        .contains(&label)
        .then(|| label - SOURCE_LABEL_MIN)
}

pub fn normalize_pixel(pixel: u8) -> f32 {
    pixel as f32 / 255.0
}

/// 分割データに前処理を適用する
pub fn preprocess(raw: &RawSplit) -> Result<PreparedSplit, PreprocessError> {
    let labels = raw
        .labels()
        .iter()
        .enumerate()
        .map(|(index, &label)| {
            rebase_label(label).ok_or(PreprocessError::LabelOutOfRange {
                split: raw.split(),
                index,
                label,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let images = raw
        .images()
        .iter()
        .flat_map(|image| image.iter().copied().map(normalize_pixel))
        .collect();

    Ok(PreparedSplit {
        split: raw.split(),
        images,
        labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DatasetSource, SyntheticLetters};

    #[test]
    fn test_zero_images_labelled_one() {
        let raw = RawSplit::new(Split::Train, vec![[0u8; GLYPH_PIXELS]; 1000], vec![1; 1000]).unwrap();
        let prepared = preprocess(&raw).unwrap();

        assert_eq!(prepared.labels.len(), 1000);
        assert!(prepared.labels.iter().all(|&l| l == 0));
        assert_eq!(prepared.shape(), [1000, 28, 28, 1]);
        assert_eq!(prepared.images.len(), 1000 * 28 * 28);
        assert!(prepared.images.iter().all(|&p| p == 0.0));
    }

    #[test]
    fn test_ranges_after_preprocessing() {
        let raw = SyntheticLetters::new(200, 0, 3).load(Split::Train).unwrap();
        let prepared = preprocess(&raw).unwrap();

        assert!(prepared.labels.iter().all(|&l| l <= 25));
        assert!(prepared.images.iter().all(|&p| (0.0..=1.0).contains(&p)));
        for (raw_label, label) in raw.labels().iter().zip(&prepared.labels) {
            assert_eq!(*raw_label, label + 1);
        }
    }

    #[test]
    fn test_extreme_values() {
        let mut image = [0u8; GLYPH_PIXELS];
        image[5] = 255;
        let raw = RawSplit::new(Split::Test, vec![image], vec![26]).unwrap();
        let prepared = preprocess(&raw).unwrap();

        assert_eq!(prepared.labels, vec![25]);
        assert_eq!(prepared.images[5], 1.0);
        assert_eq!(prepared.images[4], 0.0);
    }

    #[test]
    fn test_rejects_out_of_range_labels() {
        let raw = RawSplit::new(Split::Test, vec![[0u8; GLYPH_PIXELS]; 2], vec![3, 0]).unwrap();
        assert_eq!(
            preprocess(&raw),
            Err(PreprocessError::LabelOutOfRange {
                split: Split::Test,
                index: 1,
                label: 0
            })
        );

        assert_eq!(rebase_label(27), None);
    }

    #[test]
    fn test_every_row_has_an_image() {
        use crate::dataset::DatasetError;

        // 画像2枚にラベル3つの分割は作れない
        assert!(matches!(
            RawSplit::new(Split::Train, vec![[0u8; GLYPH_PIXELS]; 2], vec![1, 2, 3]),
            Err(DatasetError::LengthMismatch {
                images: 2,
                labels: 3,
                ..
            })
        ));

        let raw = SyntheticLetters::new(7, 0, 5).load(Split::Train).unwrap();
        let prepared = preprocess(&raw).unwrap();
        assert_eq!(prepared.images().len(), prepared.len() * GLYPH_PIXELS);
        assert!((0..prepared.len()).all(|i| prepared.get(i).is_some()));
        assert!(prepared.get(prepared.len()).is_none());
    }

    #[test]
    fn test_dataset_access() {
        let mut image = [0u8; GLYPH_PIXELS];
        image[0] = 51;
        let raw = RawSplit::new(Split::Train, vec![[0u8; GLYPH_PIXELS], image], vec![1, 2]).unwrap();
        let prepared = preprocess(&raw).unwrap();

        assert_eq!(prepared.len(), 2);
        let item = prepared.get(1).unwrap();
        assert_eq!(item.label, 1);
        assert_eq!(item.image.len(), GLYPH_PIXELS);
        assert!((item.image[0] - 0.2).abs() < 1e-6);
        assert!(prepared.get(2).is_none());
    }
}
