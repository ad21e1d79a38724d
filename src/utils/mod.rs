//! Shared helpers for preprocessing and execution provider handling

pub mod preprocessing;
pub mod providers;

pub use preprocessing::{ImageSize, Preprocessor, PreprocessorConfig};
pub use providers::{
    check_environment, EnvironmentProbe, ExecutionProviderManager, ProviderInfo, RuntimeProbe,
};
