// 手書き英字分類器の学習と推論
pub mod dataset;
pub mod preprocess;
pub mod ml;
pub mod model;

// 手書き入力の認識
pub mod drawing;
pub mod recognizer;

pub mod pipeline;
