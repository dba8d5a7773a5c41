//! モデル学習
//!
//! Adam + クロスエントロピーで固定エポック数だけ学習し、
//! 各エポックの終わりに評価用データで損失と正解率を計算します。

use anyhow::Result;
use burn::{
    data::dataloader::{batcher::Batcher, DataLoaderBuilder},
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
    train::ClassificationOutput,
};
use burn_dataset::Dataset;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::GLYPH_SIZE;
use crate::ml::{LetterClassifier, TrainingContext};
use crate::model::TrainingSettings;
use crate::preprocess::{LetterItem, PreparedSplit, CHANNELS};

/// バッチャー
#[derive(Clone)]
pub struct LetterBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> LetterBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct LetterBatch<B: Backend> {
    /// [batch_size, channels, size, size]
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> Batcher<B, LetterItem, LetterBatch<B>> for LetterBatcher<B> {
    fn batch(&self, items: Vec<LetterItem>, _device: &B::Device) -> LetterBatch<B> {
        let batch_size = items.len();
        let mut all_pixels = Vec::with_capacity(batch_size * CHANNELS * GLYPH_SIZE * GLYPH_SIZE);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            all_pixels.extend_from_slice(&item.image);
            targets_vec.push(item.label as i64);
        }

        // [N, H, W, C] -> [N, C, H, W]
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device)
            .reshape([batch_size, GLYPH_SIZE, GLYPH_SIZE, CHANNELS])
            .permute([0, 3, 1, 2]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        LetterBatch { images, targets }
    }
}

/// 1エポック分の指標
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1始まり
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub valid_loss: f64,
    pub valid_accuracy: f64,
}

/// 学習結果（要求エポック数と同じ件数の指標）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingReport {
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingReport {
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }
}

/// サンプル数で重み付けした損失と正解数の累積
#[derive(Debug, Default)]
struct RunningStats {
    loss_sum: f64,
    correct: usize,
    seen: usize,
}

impl RunningStats {
    fn update<B: Backend>(&mut self, item: &ClassificationOutput<B>) {
        let [batch_size, _] = item.output.dims();
        let loss = item.loss.clone().into_scalar().elem::<f64>();
        let correct = item
            .output
            .clone()
            .argmax(1)
            .reshape([batch_size])
            .equal(item.targets.clone())
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>();

        self.loss_sum += loss * batch_size as f64;
        self.correct += correct as usize;
        self.seen += batch_size;
    }

    fn loss(&self) -> f64 {
        self.loss_sum / self.seen as f64
    }

    fn accuracy(&self) -> f64 {
        self.correct as f64 / self.seen as f64
    }
}

/// モデル学習を実行
///
/// 学習データはエポックごとにシャッフルされ（シードはコンテキストから）、
/// エポック終了ごとに `on_epoch` が呼ばれます。
pub fn train_model<B, F>(
    ctx: &TrainingContext<B>,
    model: LetterClassifier<B>,
    train: PreparedSplit,
    test: PreparedSplit,
    settings: &TrainingSettings,
    mut on_epoch: F,
) -> Result<(LetterClassifier<B>, TrainingReport)>
where
    B: AutodiffBackend,
    F: FnMut(&EpochMetrics),
{
    if train.is_empty() {
        anyhow::bail!("training split is empty");
    }
    if test.is_empty() {
        anyhow::bail!("test split is empty");
    }
    if settings.batch_size == 0 {
        anyhow::bail!("batch size must be at least 1");
    }

    info!(
        "Train on {} samples, validate on {} samples",
        train.len(),
        test.len()
    );
    info!(
        "エポック数: {}, バッチサイズ: {}, 学習率: {}",
        settings.num_epochs, settings.batch_size, settings.learning_rate
    );

    let batcher_train = LetterBatcher::<B>::new(ctx.device().clone());
    let batcher_valid = LetterBatcher::<B::InnerBackend>::new(ctx.device().clone());

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(settings.batch_size)
        .shuffle(ctx.seed())
        .num_workers(settings.num_workers)
        .build(train);

    let dataloader_valid = DataLoaderBuilder::new(batcher_valid)
        .batch_size(settings.batch_size)
        .num_workers(settings.num_workers)
        .build(test);

    let mut optim = AdamConfig::new()
        .with_beta_1(0.9)
        .with_beta_2(0.999)
        .with_epsilon(1e-7)
        .init();

    let mut model = model;
    let mut report = TrainingReport::default();

    for epoch in 1..=settings.num_epochs {
        let mut train_stats = RunningStats::default();
        for (iteration, batch) in dataloader_train.iter().enumerate() {
            let item = model.forward_classification(batch.images, batch.targets);
            train_stats.update(&item);

            let grads = GradientsParams::from_grads(item.loss.backward(), &model);
            model = optim.step(settings.learning_rate, model, grads);

            if (iteration + 1) % 500 == 0 {
                debug!(
                    "Epoch {} iteration {}: loss={:.4}",
                    epoch,
                    iteration + 1,
                    train_stats.loss()
                );
            }
        }

        let model_valid = model.valid();
        let mut valid_stats = RunningStats::default();
        for batch in dataloader_valid.iter() {
            let item = model_valid.forward_classification(batch.images, batch.targets);
            valid_stats.update(&item);
        }

        let metrics = EpochMetrics {
            epoch,
            train_loss: train_stats.loss(),
            train_accuracy: train_stats.accuracy(),
            valid_loss: valid_stats.loss(),
            valid_accuracy: valid_stats.accuracy(),
        };
        info!(
            "Epoch {}/{} - loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4}",
            epoch,
            settings.num_epochs,
            metrics.train_loss,
            metrics.train_accuracy,
            metrics.valid_loss,
            metrics.valid_accuracy
        );

        on_epoch(&metrics);
        report.epochs.push(metrics);
    }

    Ok((model, report))
}
