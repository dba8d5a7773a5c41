//! EMNIST letters で手書き英字分類器を学習するCLI
//!
//! 引数なしで実行すると、データセットを取得して5エポック学習し、
//! エポックごとの損失と正解率を表示します（ファイルは保存しません）。

use anyhow::{Context, Result};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use letter_trainer_lib::dataset::{DatasetSource, EmnistLetters, SyntheticLetters};
use letter_trainer_lib::drawing::{self, glyph_pixels, save_debug_png};
use letter_trainer_lib::ml::{class_index, class_label, InferenceEngine, TrainingContext};
use letter_trainer_lib::model::{print_metadata_info, AppConfig, DeviceType};
use letter_trainer_lib::pipeline;
use letter_trainer_lib::recognizer::grade;

#[derive(Parser)]
#[command(name = "letter_trainer")]
#[command(about = "Train and run a handwritten letter classifier on EMNIST letters", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// JSON config file (default: ./letter_trainer.json if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Compute device
    #[arg(long, value_enum, global = true)]
    device: Option<DeviceArg>,

    /// Save the trained model as a .tar.gz archive
    #[arg(long)]
    export: Option<PathBuf>,

    /// Train on N seeded synthetic examples instead of EMNIST
    #[arg(long)]
    synthetic: Option<usize>,

    /// Number of epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Mini-batch size
    #[arg(long)]
    batch_size: Option<usize>,
}

#[derive(Subcommand)]
enum Command {
    /// Classify a drawing with an exported model
    Classify {
        /// Model archive written by --export
        #[arg(long)]
        model: PathBuf,

        /// Strokes as JSON: [[{"x": .., "y": ..}, ...], ...]
        #[arg(long, conflicts_with = "image", required_unless_present = "image")]
        strokes: Option<PathBuf>,

        /// Image file of a single letter
        #[arg(long)]
        image: Option<PathBuf>,

        /// Invert the image (for dark ink on a light background)
        #[arg(long, requires = "image")]
        invert: bool,

        /// Letter the drawing is supposed to be
        #[arg(long)]
        target: Option<char>,

        /// Write the 28x28 model input as PNG
        #[arg(long)]
        debug_png: Option<PathBuf>,

        /// Number of candidates to print
        #[arg(long, default_value_t = 3)]
        top: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DeviceArg {
    Cpu,
    Wgpu,
}

impl From<DeviceArg> for DeviceType {
    fn from(arg: DeviceArg) -> Self {
        match arg {
            DeviceArg::Cpu => DeviceType::Cpu,
            DeviceArg::Wgpu => DeviceType::Wgpu,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => AppConfig::load_or_default(AppConfig::default_path()),
    };
    if let Some(device) = cli.device {
        config.device_type = device.into();
    }

    match cli.command {
        Some(Command::Classify {
            model,
            strokes,
            image,
            invert,
            target,
            debug_png,
            top,
        }) => {
            let input = match (strokes, image) {
                (Some(path), _) => Input::Strokes(path),
                (None, Some(path)) => Input::Image { path, invert },
                (None, None) => anyhow::bail!("either --strokes or --image is required"),
            };
            let request = ClassifyRequest {
                model,
                input,
                target,
                debug_png,
                top,
            };
            match config.device_type {
                DeviceType::Cpu => classify::<NdArray<f32>>(NdArrayDevice::default(), &request),
                DeviceType::Wgpu => classify_wgpu(&request),
            }
        }
        None => {
            if let Some(epochs) = cli.epochs {
                config.training.num_epochs = epochs;
            }
            if let Some(batch_size) = cli.batch_size {
                config.training.batch_size = batch_size;
            }
            if let Some(export) = &cli.export {
                config.model.export_path = Some(export.to_string_lossy().into_owned());
            }
            config.display();

            let source: Box<dyn DatasetSource> = match cli.synthetic {
                Some(n) => {
                    info!("合成データで学習します: {} 件", n);
                    Box::new(SyntheticLetters::new(n, (n / 5).max(1), config.training.seed))
                }
                None => {
                    let cache_path = match &config.dataset.cache_path {
                        Some(path) => PathBuf::from(path),
                        None => letter_trainer_lib::dataset::emnist::default_cache_path()?,
                    };
                    Box::new(
                        EmnistLetters::new(config.dataset.url.clone(), cache_path)
                            .with_transpose(config.dataset.transpose),
                    )
                }
            };

            match config.device_type {
                DeviceType::Cpu => train::<Autodiff<NdArray<f32>>>(
                    NdArrayDevice::default(),
                    source.as_ref(),
                    &config,
                ),
                DeviceType::Wgpu => train_wgpu(source.as_ref(), &config),
            }
        }
    }
}

fn train<B: AutodiffBackend>(
    device: B::Device,
    source: &dyn DatasetSource,
    config: &AppConfig,
) -> Result<()> {
    let ctx = TrainingContext::<B>::new(device, config.training.seed);
    let outcome = pipeline::run(&ctx, source, config, |_| {})?;

    if let Some(last) = outcome.report.last() {
        info!(
            "学習完了: val_loss {:.4}, val_accuracy {:.4}",
            last.valid_loss, last.valid_accuracy
        );
    }
    if let Some(path) = outcome.exported {
        info!("モデル: {}", path.display());
    }
    Ok(())
}

#[cfg(feature = "wgpu")]
fn train_wgpu(source: &dyn DatasetSource, config: &AppConfig) -> Result<()> {
    use burn_wgpu::{Wgpu, WgpuDevice};
    train::<Autodiff<Wgpu>>(WgpuDevice::default(), source, config)
}

#[cfg(not(feature = "wgpu"))]
fn train_wgpu(_source: &dyn DatasetSource, _config: &AppConfig) -> Result<()> {
    anyhow::bail!("WGPU backend is not available: rebuild with `--features wgpu`")
}

enum Input {
    Strokes(PathBuf),
    Image { path: PathBuf, invert: bool },
}

struct ClassifyRequest {
    model: PathBuf,
    input: Input,
    target: Option<char>,
    debug_png: Option<PathBuf>,
    top: usize,
}

fn load_input(input: &Input) -> Result<image::GrayImage> {
    match input {
        Input::Strokes(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read strokes: {}", path.display()))?;
            let strokes = drawing::parse_strokes(&json)?;
            Ok(drawing::strokes_to_glyph(&strokes)?)
        }
        Input::Image { path, invert } => drawing::load_glyph_image(path, *invert)
            .with_context(|| format!("Failed to load image: {}", path.display())),
    }
}

fn classify<B: Backend>(device: B::Device, request: &ClassifyRequest) -> Result<()> {
    let engine = InferenceEngine::<B>::load(&request.model, device)
        .with_context(|| format!("Failed to load model: {}", request.model.display()))?;
    print_metadata_info(engine.metadata());

    let glyph = load_input(&request.input)?;
    if let Some(path) = &request.debug_png {
        save_debug_png(&glyph, path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("モデル入力を保存しました: {}", path.display());
    }

    let ranking = engine.rank(&glyph_pixels(&glyph))?;
    for (rank, prediction) in ranking.iter().take(request.top).enumerate() {
        println!("{}. {} ({:.3})", rank + 1, prediction.label, prediction.confidence);
    }

    if let Some(target) = request.target {
        let label = class_index(target)
            .and_then(class_label)
            .with_context(|| format!("target must be a letter A-Z, got {:?}", target))?;
        println!("{}: {}", label, grade(&ranking, label));
    }
    Ok(())
}

#[cfg(feature = "wgpu")]
fn classify_wgpu(request: &ClassifyRequest) -> Result<()> {
    use burn_wgpu::{Wgpu, WgpuDevice};
    classify::<Wgpu>(WgpuDevice::default(), request)
}

#[cfg(not(feature = "wgpu"))]
fn classify_wgpu(_request: &ClassifyRequest) -> Result<()> {
    anyhow::bail!("WGPU backend is not available: rebuild with `--features wgpu`")
}
