//! Conversion of command-line arguments into a [`PipelineConfig`]

use crate::cli::main_impl::{Cli, CliMaskResampling};
use crate::{
    config::{MaskResampling, PipelineConfig},
    utils::ExecutionProviderManager,
};
use anyhow::{Context, Result};
use std::path::PathBuf;

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the pipeline configuration
    ///
    /// Values from `--config` form the base; explicit flags override them.
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let mut config = match &cli.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(provider) = &cli.execution_provider {
            let (backend_type, execution_provider) =
                ExecutionProviderManager::parse_provider_string(provider)
                    .context("Invalid execution provider format")?;
            config.backend_type = backend_type;
            config.execution_provider = execution_provider;
        }
        if let Some(variant) = &cli.variant {
            config.variant.clone_from(variant);
        }
        if cli.require_accelerator {
            config.require_accelerator = true;
        }
        if let Some(cache_dir) = &cli.cache_dir {
            config.cache_dir = Some(PathBuf::from(cache_dir));
        }
        if let Some(threads) = cli.threads {
            config.intra_threads = threads;
        }
        if let Some(resampling) = cli.mask_resampling {
            config.mask_resampling = match resampling {
                CliMaskResampling::Nearest => MaskResampling::Nearest,
                CliMaskResampling::Bilinear => MaskResampling::Bilinear,
            };
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Reject flag combinations that cannot be honored
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if cli.input.is_empty() && !cli.only_download {
            anyhow::bail!("At least one input is required");
        }
        if let Some(pattern) = &cli.pattern {
            glob::Pattern::new(pattern)
                .with_context(|| format!("Invalid file pattern '{pattern}'"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendType, ExecutionProvider};
    use clap::Parser;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("rmbg").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = CliConfigBuilder::from_cli(&parse(&["photo.jpg"])).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = parse(&[
            "--execution-provider",
            "tract:cpu",
            "--variant",
            "fp32",
            "--threads",
            "4",
            "--mask-resampling",
            "nearest",
            "photo.jpg",
        ]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();

        assert_eq!(config.backend_type, BackendType::Tract);
        assert_eq!(config.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(config.weight_file(), "onnx/model.onnx");
        assert_eq!(config.intra_threads, 4);
        assert_eq!(config.mask_resampling, MaskResampling::Nearest);
    }

    #[test]
    fn test_config_file_is_base() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("rmbg.json");
        std::fs::write(&path, r#"{ "variant": "fp32", "intra_threads": 2 }"#).unwrap();

        let cli = parse(&["--config", path.to_str().unwrap(), "--threads", "8", "a.png"]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(config.variant, "fp32");
        assert_eq!(config.intra_threads, 8);
    }

    #[test]
    fn test_invalid_provider_is_rejected() {
        let cli = parse(&["--execution-provider", "tract:cuda", "a.png"]);
        assert!(CliConfigBuilder::from_cli(&cli).is_err());
    }

    #[test]
    fn test_validate_cli() {
        assert!(CliConfigBuilder::validate_cli(&parse(&["--only-download"])).is_ok());
        assert!(CliConfigBuilder::validate_cli(&parse(&["--pattern", "[", "a.png"])).is_err());
        assert!(CliConfigBuilder::validate_cli(&parse(&["--pattern", "*.jpg", "dir"])).is_ok());
    }
}
