pub mod context;
pub mod inference;
pub mod layers;
pub mod ml_model;
pub mod training;

pub use context::TrainingContext;
pub use inference::{InferenceEngine, Prediction};
pub use layers::{letter_stack, Activation, LayerSpec, TopologyError};
pub use ml_model::{class_index, class_label, LetterClassifier, ModelConfig, CLASS_NAMES, IMAGE_SIZE, NUM_CLASSES};
pub use training::{train_model, EpochMetrics, LetterBatch, LetterBatcher, TrainingReport};
