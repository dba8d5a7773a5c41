//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラスラベル、層構成など）
//! - model.bin       - モデルの重み（バイナリ）

use anyhow::{Context, Result};
use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};
use tracing::info;

use crate::ml::LetterClassifier;
use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// 保存先のパスを `.tar.gz` に揃える
pub fn archive_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, bytes: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, bytes)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 保存したファイルのパスを返します。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = archive_path(output_path);

    // 親ディレクトリが存在しない場合は作成
    if let Some(parent) = tar_gz_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
    }

    let tar_gz_file = File::create(&tar_gz_path)
        .with_context(|| format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    append_entry(&mut tar_builder, METADATA_ENTRY, metadata.to_json_string()?.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    tar_builder
        .into_inner()
        .context("Failed to finalize tar.gz archive")?
        .finish()
        .context("Failed to flush gzip stream")?;

    Ok(tar_gz_path)
}

/// 学習済みモデルを重みのバイト列に変換して保存
pub fn save_trained_model<B: Backend>(
    output_path: &Path,
    model: LetterClassifier<B>,
    metadata: &ModelMetadata,
) -> Result<PathBuf> {
    // f16にせずf32精度のまま保存する
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let model_binary = recorder
        .record(model.into_record(), ())
        .map_err(|e| anyhow::anyhow!("Failed to serialize model weights: {:?}", e))?;

    let path = save_model_with_metadata(output_path, metadata, &model_binary)?;
    info!(
        "モデルを保存しました: {} ({:.2} MB)",
        path.display(),
        model_binary.len() as f64 / 1024.0 / 1024.0
    );
    Ok(path)
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let (metadata, _) = read_entries(tar_gz_path, false)?;
    metadata.ok_or_else(|| anyhow::anyhow!("metadata.json not found in tar.gz archive"))
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    match read_entries(tar_gz_path, true)? {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        (None, _) => Err(anyhow::anyhow!("metadata.json not found in tar.gz archive")),
        (_, None) => Err(anyhow::anyhow!("model.bin not found in tar.gz archive")),
    }
}

fn read_entries(
    tar_gz_path: &Path,
    with_model: bool,
) -> Result<(Option<ModelMetadata>, Option<Vec<u8>>)> {
    let tar_gz_file = File::open(tar_gz_path)
        .with_context(|| format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;

    let decoder = GzDecoder::new(tar_gz_file);
    let mut archive = Archive::new(decoder);

    let mut metadata_opt: Option<ModelMetadata> = None;
    let mut model_binary_opt: Option<Vec<u8>> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();

        match path.as_str() {
            METADATA_ENTRY => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                metadata_opt = Some(ModelMetadata::from_json_string(&json_str)?);
                if !with_model {
                    break;
                }
            }
            MODEL_ENTRY if with_model => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                model_binary_opt = Some(buffer);
            }
            _ => {}
        }
    }

    Ok((metadata_opt, model_binary_opt))
}

/// メタデータをログに出す
pub fn print_metadata_info(metadata: &ModelMetadata) {
    info!("クラスラベル: {}", metadata.class_labels.join(", "));
    info!(
        "モデル入力サイズ: {0}x{0}x{1}",
        metadata.image_size, metadata.channels
    );
    info!("層数: {}", metadata.layers.len());
    info!("学習エポック数: {}", metadata.num_epochs);
    if let Some(ref metrics) = metadata.final_metrics {
        info!(
            "最終エポック: val_loss {:.4}, val_accuracy {:.4}",
            metrics.valid_loss, metrics.valid_accuracy
        );
    }
    info!("学習日時: {}", metadata.trained_at);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{ModelConfig, CLASS_NAMES};

    fn metadata() -> ModelMetadata {
        ModelMetadata::new(
            &ModelConfig::letters(),
            CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            5,
            None,
        )
    }

    #[test]
    fn test_archive_path() {
        assert_eq!(
            archive_path(Path::new("out/model")),
            PathBuf::from("out/model.tar.gz")
        );
        assert_eq!(
            archive_path(Path::new("out/model.tar.gz")),
            PathBuf::from("out/model.tar.gz")
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = metadata();
        let path = save_model_with_metadata(&dir.path().join("nested/letters"), &metadata, &[1, 2, 3]).unwrap();
        assert!(path.ends_with("nested/letters.tar.gz"));

        let (loaded, binary) = load_model_with_metadata(&path).unwrap();
        assert_eq!(loaded, metadata);
        assert_eq!(binary, vec![1, 2, 3]);

        assert_eq!(load_metadata(&path).unwrap(), metadata);
    }

    #[test]
    fn test_missing_archive_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_metadata(&dir.path().join("absent.tar.gz")).is_err());
    }
}
