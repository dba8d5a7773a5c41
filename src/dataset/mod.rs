//! 手書き文字データセットの読み込み
//!
//! 学習用・評価用の2分割をそれぞれ `RawSplit`（画像とラベルの同じ長さの列）として取得します。

pub mod emnist;
pub mod idx;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

pub use emnist::EmnistLetters;
pub use idx::IdxError;

/// 画像の一辺（ピクセル）
pub const GLYPH_SIZE: usize = 28;

/// 1枚あたりのピクセル数
pub const GLYPH_PIXELS: usize = GLYPH_SIZE * GLYPH_SIZE;

/// 元データのラベル範囲（1 = 'a', 26 = 'z'）
pub const SOURCE_LABEL_MIN: u8 = 1;
pub const SOURCE_LABEL_MAX: u8 = 26;

/// データセットの分割
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to download {url}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("I/O error on {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("archive member {member} is unreadable")]
    Archive {
        member: String,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("malformed IDX data in {member}")]
    Format {
        member: String,
        #[source]
        source: IdxError,
    },
    #[error("{split} split has {images} images but {labels} labels")]
    LengthMismatch {
        split: Split,
        images: usize,
        labels: usize,
    },
    #[error("no cache directory available; set dataset.cache_path")]
    NoCacheDir,
}

/// 読み込んだままの分割データ
///
/// `images[i]` と `labels[i]` が1つのサンプルに対応します。
#[derive(Debug, Clone, PartialEq)]
pub struct RawSplit {
    split: Split,
    images: Vec<[u8; GLYPH_PIXELS]>,
    labels: Vec<u8>,
}

impl RawSplit {
    pub fn new(
        split: Split,
        images: Vec<[u8; GLYPH_PIXELS]>,
        labels: Vec<u8>,
    ) -> Result<Self, DatasetError> {
        if images.len() != labels.len() {
            return Err(DatasetError::LengthMismatch {
                split,
                images: images.len(),
                labels: labels.len(),
            });
        }
        Ok(Self {
            split,
            images,
            labels,
        })
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn images(&self) -> &[[u8; GLYPH_PIXELS]] {
        &self.images
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// 全画像を転置する（EMNISTは列優先で格納されている）
    pub fn transposed(mut self) -> Self {
        for image in &mut self.images {
            transpose_glyph(image);
        }
        self
    }
}

pub fn transpose_glyph(image: &mut [u8; GLYPH_PIXELS]) {
    for y in 0..GLYPH_SIZE {
        for x in (y + 1)..GLYPH_SIZE {
            image.swap(y * GLYPH_SIZE + x, x * GLYPH_SIZE + y);
        }
    }
}

/// 分割データの取得元
pub trait DatasetSource {
    fn load(&self, split: Split) -> Result<RawSplit, DatasetError>;
}

/// 読み込み済みデータをそのまま返すソース
pub struct InMemorySource {
    train: RawSplit,
    test: RawSplit,
}

impl InMemorySource {
    pub fn new(train: RawSplit, test: RawSplit) -> Self {
        Self { train, test }
    }
}

impl DatasetSource for InMemorySource {
    fn load(&self, split: Split) -> Result<RawSplit, DatasetError> {
        Ok(match split {
            Split::Train => self.train.clone(),
            Split::Test => self.test.clone(),
        })
    }
}

/// シード固定の合成データ（オフライン実行・テスト用）
///
/// ラベル `l` の画像には `l` 本目の行を中心に横線を引くので、
/// 小さなモデルでも区別できる程度の構造を持ちます。
#[derive(Debug, Clone)]
pub struct SyntheticLetters {
    pub train_len: usize,
    pub test_len: usize,
    pub seed: u64,
}

impl SyntheticLetters {
    pub fn new(train_len: usize, test_len: usize, seed: u64) -> Self {
        Self {
            train_len,
            test_len,
            seed,
        }
    }

    fn generate(&self, split: Split, len: usize) -> Result<RawSplit, DatasetError> {
        let seed = match split {
            Split::Train => self.seed,
            Split::Test => self.seed.wrapping_add(1),
        };
        let mut rng = StdRng::seed_from_u64(seed);

        let mut images = Vec::with_capacity(len);
        let mut labels = Vec::with_capacity(len);
        for _ in 0..len {
            let label = rng.gen_range(SOURCE_LABEL_MIN..=SOURCE_LABEL_MAX);
            let mut image = [0u8; GLYPH_PIXELS];
            let row = label as usize;
            for x in 2..(GLYPH_SIZE - 2) {
                image[row * GLYPH_SIZE + x] = rng.gen_range(200..=255);
            }
            for pixel in image.iter_mut() {
                if *pixel == 0 && rng.gen_bool(0.02) {
                    *pixel = rng.gen_range(0..64);
                }
            }
            images.push(image);
            labels.push(label);
        }

        RawSplit::new(split, images, labels)
    }
}

impl DatasetSource for SyntheticLetters {
    fn load(&self, split: Split) -> Result<RawSplit, DatasetError> {
        let len = match split {
            Split::Train => self.train_len,
            Split::Test => self.test_len,
        };
        self.generate(split, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_split_rejects_length_mismatch() {
        let result = RawSplit::new(Split::Test, vec![[0u8; GLYPH_PIXELS]; 3], vec![1, 2]);
        assert!(matches!(
            result,
            Err(DatasetError::LengthMismatch {
                split: Split::Test,
                images: 3,
                labels: 2
            })
        ));
    }

    #[test]
    fn test_transpose_glyph() {
        let mut image = [0u8; GLYPH_PIXELS];
        image[3] = 9; // (y=0, x=3)
        transpose_glyph(&mut image);
        assert_eq!(image[3 * GLYPH_SIZE], 9);
        assert_eq!(image[3], 0);
    }

    #[test]
    fn test_synthetic_is_deterministic() {
        let source = SyntheticLetters::new(50, 10, 7);
        let a = source.load(Split::Train).unwrap();
        let b = source.load(Split::Train).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 50);
        assert!(a
            .labels()
            .iter()
            .all(|l| (SOURCE_LABEL_MIN..=SOURCE_LABEL_MAX).contains(l)));

        let test = source.load(Split::Test).unwrap();
        assert_eq!(test.len(), 10);
        assert_eq!(test.split(), Split::Test);
    }

    #[test]
    fn test_in_memory_source() {
        let train = RawSplit::new(Split::Train, vec![[1u8; GLYPH_PIXELS]], vec![3]).unwrap();
        let test = RawSplit::new(Split::Test, vec![], vec![]).unwrap();
        let source = InMemorySource::new(train.clone(), test);
        assert_eq!(source.load(Split::Train).unwrap(), train);
        assert!(source.load(Split::Test).unwrap().is_empty());
    }
}
