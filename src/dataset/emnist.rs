//! EMNIST letters の取得
//!
//! NISTが配布する `gzip.zip` を一度だけダウンロードしてキャッシュし、
//! 中の `gzip/emnist-letters-*-ubyte.gz` を展開してIDX形式として読み込みます。
//! キャッシュの場所は Python の `emnist` パッケージと同じ `~/.cache/emnist/emnist.zip` です。

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use zip::ZipArchive;

use super::{idx, DatasetError, DatasetSource, RawSplit, Split};

pub const DEFAULT_URL: &str = "https://biometrics.nist.gov/cs_links/EMNIST/gzip.zip";

const DATASET_NAME: &str = "letters";

/// EMNIST letters データセット
#[derive(Debug, Clone)]
pub struct EmnistLetters {
    url: String,
    cache_path: PathBuf,
    transpose: bool,
}

impl EmnistLetters {
    pub fn new(url: impl Into<String>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            cache_path: cache_path.into(),
            transpose: false,
        }
    }

    /// 既定のURLとキャッシュパスを使う
    pub fn with_defaults() -> Result<Self, DatasetError> {
        Ok(Self::new(DEFAULT_URL, default_cache_path()?))
    }

    pub fn with_transpose(mut self, transpose: bool) -> Self {
        self.transpose = transpose;
        self
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// キャッシュが無ければアーカイブをダウンロードする
    fn ensure_archive(&self) -> Result<(), DatasetError> {
        if self.cache_path.exists() {
            return Ok(());
        }

        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent).map_err(|source| DatasetError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }

        info!("Downloading EMNIST archive from {}", self.url);
        let download_err = |source| DatasetError::Download {
            url: self.url.clone(),
            source,
        };
        let response = reqwest::blocking::get(&self.url)
            .and_then(|r| r.error_for_status())
            .map_err(download_err)?;

        let total = response.content_length().unwrap_or(0);
        save_download(response, total, &self.cache_path)?;
        info!("Saved EMNIST archive to {}", self.cache_path.display());
        Ok(())
    }

    fn read_member(archive: &mut ZipArchive<File>, member: &str) -> Result<Vec<u8>, DatasetError> {
        let entry = archive
            .by_name(member)
            .map_err(|source| DatasetError::Archive {
                member: member.to_string(),
                source,
            })?;

        let mut bytes = Vec::new();
        GzDecoder::new(entry)
            .read_to_end(&mut bytes)
            .map_err(|source| DatasetError::Io {
                path: member.to_string(),
                source,
            })?;
        Ok(bytes)
    }
}

impl DatasetSource for EmnistLetters {
    fn load(&self, split: Split) -> Result<RawSplit, DatasetError> {
        self.ensure_archive()?;

        let file = File::open(&self.cache_path).map_err(|source| DatasetError::Io {
            path: self.cache_path.display().to_string(),
            source,
        })?;
        let mut archive = ZipArchive::new(file).map_err(|source| DatasetError::Archive {
            member: self.cache_path.display().to_string(),
            source,
        })?;

        let images_member = member_name(split, "images-idx3");
        let labels_member = member_name(split, "labels-idx1");

        let images = idx::parse_images(&Self::read_member(&mut archive, &images_member)?)
            .map_err(|source| DatasetError::Format {
                member: images_member.clone(),
                source,
            })?;
        let labels = idx::parse_labels(&Self::read_member(&mut archive, &labels_member)?)
            .map_err(|source| DatasetError::Format {
                member: labels_member.clone(),
                source,
            })?;

        let raw = RawSplit::new(split, images, labels)?;
        info!("Loaded {} {} examples", raw.len(), split);

        Ok(if self.transpose { raw.transposed() } else { raw })
    }
}

/// 読み込んだ内容を `<cache>.zip.part` に書き、書き終えてからキャッシュの位置へ移動する
///
/// 途中で失敗した場合は書きかけのファイルを消します。
fn save_download<R: Read>(reader: R, total: u64, cache_path: &Path) -> Result<(), DatasetError> {
    let progress = ProgressBar::new(total);
    progress.set_style(
        ProgressStyle::with_template(
            "{msg} [{elapsed_precise}] [{wide_bar}] {bytes}/{total_bytes} ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    progress.set_message("emnist.zip");

    let partial = cache_path.with_extension("zip.part");
    let io_err = |path: &Path| {
        let path = path.display().to_string();
        move |source| DatasetError::Io { path, source }
    };

    let mut output = File::create(&partial).map_err(io_err(&partial))?;
    let copied = io::copy(&mut progress.wrap_read(reader), &mut output);
    drop(output);
    if let Err(source) = copied {
        progress.abandon();
        if let Err(e) = fs::remove_file(&partial) {
            warn!("Failed to remove {}: {}", partial.display(), e);
        }
        return Err(io_err(&partial)(source));
    }
    progress.finish();

    fs::rename(&partial, cache_path).map_err(io_err(cache_path))
}

/// アーカイブ内のメンバー名
pub fn member_name(split: Split, kind: &str) -> String {
    format!("gzip/emnist-{DATASET_NAME}-{}-{kind}-ubyte.gz", split.as_str())
}

pub fn default_cache_path() -> Result<PathBuf, DatasetError> {
    let home = dirs::home_dir().ok_or(DatasetError::NoCacheDir)?;
    Ok(home.join(".cache").join("emnist").join("emnist.zip"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{idx, GLYPH_PIXELS};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn write_archive(path: &Path, train_labels: &[u8]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();

        let mut image = [0u8; GLYPH_PIXELS];
        image[1] = 200; // (y=0, x=1)
        let images = vec![image; train_labels.len()];

        for (split, labels) in [(Split::Train, train_labels), (Split::Test, &[5u8][..])] {
            let images = &images[..labels.len()];
            writer
                .start_file(member_name(split, "images-idx3"), options)
                .unwrap();
            writer.write_all(&gzip(&idx::encode_images(images))).unwrap();
            writer
                .start_file(member_name(split, "labels-idx1"), options)
                .unwrap();
            writer.write_all(&gzip(&idx::encode_labels(labels))).unwrap();
        }
        writer.finish().unwrap();
    }

    /// 指定バイト数を返した後に失敗するリーダー
    struct FailingReader {
        remaining: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"));
            }
            let n = buf.len().min(self.remaining);
            buf[..n].fill(0xAB);
            self.remaining -= n;
            Ok(n)
        }
    }

    #[test]
    fn test_save_download_moves_finished_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("emnist.zip");
        let body = vec![7u8; 4096];

        save_download(&body[..], body.len() as u64, &cache).unwrap();
        assert_eq!(fs::read(&cache).unwrap(), body);
        assert!(!dir.path().join("emnist.zip.part").exists());
    }

    #[test]
    fn test_failed_download_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("emnist.zip");

        let result = save_download(FailingReader { remaining: 1000 }, 5000, &cache);
        assert!(matches!(result, Err(DatasetError::Io { .. })));
        assert!(!cache.exists());
        assert!(!dir.path().join("emnist.zip.part").exists());
    }

    #[test]
    fn test_member_name() {
        assert_eq!(
            member_name(Split::Train, "images-idx3"),
            "gzip/emnist-letters-train-images-idx3-ubyte.gz"
        );
        assert_eq!(
            member_name(Split::Test, "labels-idx1"),
            "gzip/emnist-letters-test-labels-idx1-ubyte.gz"
        );
    }

    #[test]
    fn test_loads_cached_archive_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("emnist.zip");
        write_archive(&cache, &[1, 2, 26]);

        // URLは使われない（キャッシュ済み）
        let source = EmnistLetters::new("http://127.0.0.1:9/unused.zip", &cache);
        let train = source.load(Split::Train).unwrap();
        assert_eq!(train.labels(), vec![1, 2, 26]);
        assert_eq!(train.images().len(), 3);
        assert_eq!(train.images()[0][1], 200);

        let test = source.load(Split::Test).unwrap();
        assert_eq!(test.labels(), vec![5]);
    }

    #[test]
    fn test_transpose_option() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("emnist.zip");
        write_archive(&cache, &[1]);

        let source = EmnistLetters::new("http://127.0.0.1:9/unused.zip", &cache).with_transpose(true);
        let train = source.load(Split::Train).unwrap();
        assert_eq!(train.images()[0][1], 0);
        assert_eq!(train.images()[0][28], 200);
    }

    #[test]
    fn test_missing_member_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("emnist.zip");
        let writer = zip::ZipWriter::new(File::create(&cache).unwrap());
        writer.finish().unwrap();

        let source = EmnistLetters::new("http://127.0.0.1:9/unused.zip", &cache);
        assert!(matches!(
            source.load(Split::Train),
            Err(DatasetError::Archive { .. })
        ));
    }
}
