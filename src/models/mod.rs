//! Classifiers and the serving-side model components

pub mod classifier;
pub mod forest;
pub mod gbdt;
pub mod inference;
pub mod loader;
pub mod tree;

pub use classifier::{Classifier, Model, ModelParams};
pub use forest::{ForestParams, RandomForest};
pub use gbdt::{BoostingParams, GradientBoostedTrees};
pub use inference::InferenceEngine;
pub use loader::{BundleSelector, ModelLoader};
