//! Tabular Risk Pipeline Library
//!
//! Trains binary classifiers on tabular data (fraud, churn) and serves
//! them behind a feature contract shared by training and inference: the
//! same schema and fitted vectorizer that shaped the training matrix are
//! bundled with the model and applied to every request.

pub mod artifact;
pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluation;
pub mod matrix;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod schema;
pub mod server;
pub mod store;
pub mod training;
pub mod types;
pub mod vectorizer;

pub use artifact::ArtifactBundle;
pub use config::AppConfig;
pub use dataset::Dataset;
pub use error::{PipelineError, Result};
pub use models::{Classifier, InferenceEngine, Model, ModelParams};
pub use schema::{FeatureSchema, SchemaOptions};
pub use training::Trainer;
pub use types::{Decision, FieldValue, Prediction, Record};
pub use vectorizer::{DictVectorizer, VectorizerBinding};
