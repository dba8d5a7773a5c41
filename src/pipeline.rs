//! 読み込み → 前処理 → 学習 →（任意で）保存 の一連の流れ

use anyhow::{Context, Result};
use burn::{
    module::{AutodiffModule, Module},
    tensor::backend::AutodiffBackend,
};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::dataset::{DatasetSource, Split};
use crate::ml::{train_model, EpochMetrics, ModelConfig, TrainingContext, TrainingReport, CLASS_NAMES};
use crate::model::{save_trained_model, AppConfig, ModelMetadata};
use crate::preprocess::preprocess;

/// パイプラインの実行結果
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub report: TrainingReport,
    /// 保存したモデルのパス（保存しなかった場合は `None`）
    pub exported: Option<PathBuf>,
}

/// データを読み込んでモデルを学習する
pub fn run<B, F>(
    ctx: &TrainingContext<B>,
    source: &dyn DatasetSource,
    config: &AppConfig,
    on_epoch: F,
) -> Result<PipelineOutcome>
where
    B: AutodiffBackend,
    F: FnMut(&EpochMetrics),
{
    info!("データセットを読み込んでいます...");
    let train_raw = source.load(Split::Train).context("学習用データの読み込みに失敗しました")?;
    let test_raw = source.load(Split::Test).context("評価用データの読み込みに失敗しました")?;
    info!("学習用: {} 件, 評価用: {} 件", train_raw.len(), test_raw.len());

    let train = preprocess(&train_raw)?;
    let test = preprocess(&test_raw)?;
    drop(train_raw);
    drop(test_raw);

    let model_config = ModelConfig::letters();
    let model = ctx.build_model(&model_config)?;
    info!("モデルを構築しました（パラメータ数: {}）", model.num_params());

    let (model, report) = train_model(ctx, model, train, test, &config.training, on_epoch)?;

    let exported = match config.model.export_path.as_deref() {
        Some(path) => {
            let metadata = ModelMetadata::new(
                &model_config,
                CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
                config.training.num_epochs,
                report.last().cloned(),
            );
            Some(save_trained_model(Path::new(path), model.valid(), &metadata)?)
        }
        None => None,
    };

    Ok(PipelineOutcome { report, exported })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{InMemorySource, RawSplit, SyntheticLetters, GLYPH_PIXELS};
    use crate::model::load_metadata;
    use burn_autodiff::Autodiff;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = Autodiff<NdArray<f32>>;

    fn config(epochs: usize) -> AppConfig {
        let mut config = AppConfig::default();
        config.training.num_epochs = epochs;
        config.training.batch_size = 8;
        config
    }

    #[test]
    fn test_run_without_export_writes_nothing() {
        let ctx = TrainingContext::<TestBackend>::new(NdArrayDevice::default(), 1);
        let source = SyntheticLetters::new(16, 8, 3);

        let mut epochs = 0;
        let outcome = run(&ctx, &source, &config(2), |_| epochs += 1).unwrap();
        assert_eq!(epochs, 2);
        assert_eq!(outcome.report.epochs.len(), 2);
        assert!(outcome.exported.is_none());
    }

    #[test]
    fn test_run_exports_archive() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = TrainingContext::<TestBackend>::new(NdArrayDevice::default(), 1);
        let source = SyntheticLetters::new(8, 4, 5);
        let mut config = config(1);
        config.model.export_path = Some(dir.path().join("letters").to_string_lossy().into_owned());

        let outcome = run(&ctx, &source, &config, |_| {}).unwrap();
        let path = outcome.exported.unwrap();
        assert!(path.exists());

        let metadata = load_metadata(&path).unwrap();
        assert_eq!(metadata.class_labels.len(), 26);
        assert_eq!(metadata.num_epochs, 1);
        let saved = metadata.final_metrics.unwrap();
        let last = outcome.report.last().unwrap();
        assert_eq!(saved.epoch, 1);
        assert!((saved.valid_loss - last.valid_loss).abs() < 1e-9);
    }

    #[test]
    fn test_bad_label_stops_before_training() {
        let ctx = TrainingContext::<TestBackend>::new(NdArrayDevice::default(), 1);
        let train = RawSplit::new(Split::Train, vec![[0u8; GLYPH_PIXELS]; 2], vec![1, 27]).unwrap();
        let test = RawSplit::new(Split::Test, vec![[0u8; GLYPH_PIXELS]; 1], vec![1]).unwrap();
        let source = InMemorySource::new(train, test);

        let mut called = false;
        let result = run(&ctx, &source, &config(1), |_| called = true);
        assert!(result.is_err());
        assert!(!called);
    }
}
