//! Execution provider parsing and host capability probing

use crate::config::{BackendType, ExecutionProvider, PipelineConfig};
use crate::error::{Result, RmbgError};

/// Information about an execution provider
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub execution_provider: ExecutionProvider,
    pub available: bool,
    pub description: String,
}

/// Reports which hardware-accelerated execution providers the host offers
pub trait EnvironmentProbe: Send + Sync + std::fmt::Debug {
    fn is_available(&self, provider: ExecutionProvider) -> bool;

    /// Whether any accelerator (CUDA or `CoreML`) can be used
    fn has_accelerator(&self) -> bool {
        self.is_available(ExecutionProvider::Cuda) || self.is_available(ExecutionProvider::CoreMl)
    }
}

/// Probe backed by ONNX Runtime's provider registry
#[derive(Debug, Default, Clone, Copy)]
pub struct RuntimeProbe;

impl EnvironmentProbe for RuntimeProbe {
    fn is_available(&self, provider: ExecutionProvider) -> bool {
        match provider {
            ExecutionProvider::Auto | ExecutionProvider::Cpu => true,
            #[cfg(feature = "onnx")]
            ExecutionProvider::Cuda | ExecutionProvider::CoreMl => {
                crate::backends::OnnxBackend::provider_available(provider)
            },
            #[cfg(not(feature = "onnx"))]
            ExecutionProvider::Cuda | ExecutionProvider::CoreMl => false,
        }
    }
}

/// Fail fast when the configured compute backend cannot run on this host
///
/// Runs before any download: an explicitly requested accelerator must be present,
/// and `require_accelerator` demands at least one.
///
/// # Errors
/// - `EnvironmentUnsupported` describing the missing capability
pub fn check_environment(config: &PipelineConfig, probe: &dyn EnvironmentProbe) -> Result<()> {
    let requested = config.execution_provider;

    if config.backend_type == BackendType::Onnx
        && requested.is_accelerated()
        && !probe.is_available(requested)
    {
        return Err(RmbgError::environment_unsupported(format!(
            "execution provider '{requested}' is not available on this host"
        )));
    }

    if config.require_accelerator {
        if config.backend_type == BackendType::Tract {
            return Err(RmbgError::environment_unsupported(
                "the Tract backend cannot use a hardware accelerator",
            ));
        }
        if !probe.has_accelerator() {
            return Err(RmbgError::environment_unsupported(
                "no hardware-accelerated execution provider (CUDA, CoreML) is available",
            ));
        }
    }

    log::debug!(
        "Environment check passed for {}",
        ExecutionProviderManager::provider_to_string(config.backend_type, requested)
    );
    Ok(())
}

/// Utility for parsing and listing execution providers
pub struct ExecutionProviderManager;

impl ExecutionProviderManager {
    /// Parse execution provider string in format "backend:provider"
    ///
    /// ```rust
    /// use rmbg::utils::ExecutionProviderManager;
    /// use rmbg::{BackendType, ExecutionProvider};
    ///
    /// let (backend, provider) = ExecutionProviderManager::parse_provider_string("onnx:cuda").unwrap();
    /// assert_eq!(backend, BackendType::Onnx);
    /// assert_eq!(provider, ExecutionProvider::Cuda);
    /// ```
    ///
    /// # Errors
    /// - Unknown backend or provider name
    pub fn parse_provider_string(provider_str: &str) -> Result<(BackendType, ExecutionProvider)> {
        let Some((backend, provider)) = provider_str.split_once(':') else {
            return match provider_str {
                "onnx" => Ok((BackendType::Onnx, ExecutionProvider::Auto)),
                "tract" => Ok((BackendType::Tract, ExecutionProvider::Cpu)),
                _ => Err(RmbgError::invalid_config(
                    "Invalid provider format. Use backend:provider (e.g., onnx:auto, tract:cpu)",
                )),
            };
        };

        match backend {
            "onnx" => {
                let execution_provider = match provider {
                    "auto" => ExecutionProvider::Auto,
                    "cpu" => ExecutionProvider::Cpu,
                    "cuda" => ExecutionProvider::Cuda,
                    "coreml" => ExecutionProvider::CoreMl,
                    _ => {
                        return Err(RmbgError::invalid_config(format!(
                            "Unknown ONNX provider: {provider}. Supported: auto, cpu, cuda, coreml"
                        )));
                    },
                };
                Ok((BackendType::Onnx, execution_provider))
            },
            "tract" => match provider {
                "cpu" => Ok((BackendType::Tract, ExecutionProvider::Cpu)),
                _ => Err(RmbgError::invalid_config(format!(
                    "Unknown Tract provider: {provider}. Tract only supports 'cpu'"
                ))),
            },
            _ => Err(RmbgError::invalid_config(format!(
                "Unknown backend: {backend}. Supported backends: onnx, tract"
            ))),
        }
    }

    /// All provider combinations with their availability on this host
    #[must_use]
    pub fn list_all_providers(probe: &dyn EnvironmentProbe) -> Vec<ProviderInfo> {
        let onnx_enabled = cfg!(feature = "onnx");
        let tract_enabled = cfg!(feature = "tract");

        let onnx = |provider: ExecutionProvider, description: &str| ProviderInfo {
            name: Self::provider_to_string(BackendType::Onnx, provider),
            backend_type: BackendType::Onnx,
            execution_provider: provider,
            available: onnx_enabled && probe.is_available(provider),
            description: if onnx_enabled {
                description.to_string()
            } else {
                format!("{description} (feature disabled)")
            },
        };

        vec![
            onnx(
                ExecutionProvider::Auto,
                "ONNX Runtime with auto-selected provider",
            ),
            onnx(ExecutionProvider::Cpu, "ONNX Runtime CPU execution"),
            onnx(ExecutionProvider::Cuda, "ONNX Runtime CUDA GPU acceleration"),
            onnx(
                ExecutionProvider::CoreMl,
                "ONNX Runtime CoreML (Apple Silicon) acceleration",
            ),
            ProviderInfo {
                name: "tract:cpu".to_string(),
                backend_type: BackendType::Tract,
                execution_provider: ExecutionProvider::Cpu,
                available: tract_enabled,
                description: if tract_enabled {
                    "Pure Rust CPU inference via Tract".to_string()
                } else {
                    "Pure Rust CPU inference via Tract (feature disabled)".to_string()
                },
            },
        ]
    }

    /// Convert backend type and execution provider back to string
    #[must_use]
    pub fn provider_to_string(backend_type: BackendType, provider: ExecutionProvider) -> String {
        format!("{backend_type}:{provider}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FixedProbe {
        cuda: bool,
        coreml: bool,
    }

    impl EnvironmentProbe for FixedProbe {
        fn is_available(&self, provider: ExecutionProvider) -> bool {
            match provider {
                ExecutionProvider::Auto | ExecutionProvider::Cpu => true,
                ExecutionProvider::Cuda => self.cuda,
                ExecutionProvider::CoreMl => self.coreml,
            }
        }
    }

    const NO_GPU: FixedProbe = FixedProbe {
        cuda: false,
        coreml: false,
    };

    #[test]
    fn test_parse_onnx_providers() {
        let cases = [
            ("onnx:auto", ExecutionProvider::Auto),
            ("onnx:cpu", ExecutionProvider::Cpu),
            ("onnx:cuda", ExecutionProvider::Cuda),
            ("onnx:coreml", ExecutionProvider::CoreMl),
        ];
        for (input, expected) in cases {
            let (backend, provider) = ExecutionProviderManager::parse_provider_string(input).unwrap();
            assert_eq!(backend, BackendType::Onnx);
            assert_eq!(provider, expected);
        }
    }

    #[test]
    fn test_parse_tract_and_bare_backends() {
        assert_eq!(
            ExecutionProviderManager::parse_provider_string("tract:cpu").unwrap(),
            (BackendType::Tract, ExecutionProvider::Cpu)
        );
        assert_eq!(
            ExecutionProviderManager::parse_provider_string("tract").unwrap(),
            (BackendType::Tract, ExecutionProvider::Cpu)
        );
        assert_eq!(
            ExecutionProviderManager::parse_provider_string("onnx").unwrap(),
            (BackendType::Onnx, ExecutionProvider::Auto)
        );
        assert!(ExecutionProviderManager::parse_provider_string("tract:cuda").is_err());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(ExecutionProviderManager::parse_provider_string("invalid").is_err());
        assert!(ExecutionProviderManager::parse_provider_string("onnx:invalid").is_err());
        assert!(ExecutionProviderManager::parse_provider_string("invalid:auto").is_err());
    }

    #[test]
    fn test_provider_to_string() {
        assert_eq!(
            ExecutionProviderManager::provider_to_string(BackendType::Onnx, ExecutionProvider::CoreMl),
            "onnx:coreml"
        );
    }

    #[test]
    fn test_auto_passes_without_accelerator() {
        let config = PipelineConfig::default();
        assert!(check_environment(&config, &NO_GPU).is_ok());
    }

    #[test]
    fn test_explicit_missing_accelerator_is_unsupported() {
        let config = PipelineConfig::builder()
            .execution_provider(ExecutionProvider::Cuda)
            .build()
            .unwrap();
        let err = check_environment(&config, &NO_GPU).unwrap_err();
        assert!(matches!(err, RmbgError::EnvironmentUnsupported(_)));
        assert!(err.is_fatal());

        let cuda = FixedProbe {
            cuda: true,
            coreml: false,
        };
        assert!(check_environment(&config, &cuda).is_ok());
    }

    #[test]
    fn test_require_accelerator() {
        let config = PipelineConfig::builder()
            .require_accelerator(true)
            .build()
            .unwrap();
        assert!(check_environment(&config, &NO_GPU).is_err());

        let coreml = FixedProbe {
            cuda: false,
            coreml: true,
        };
        assert!(check_environment(&config, &coreml).is_ok());

        let tract = PipelineConfig::builder()
            .backend_type(BackendType::Tract)
            .execution_provider(ExecutionProvider::Cpu)
            .require_accelerator(true)
            .build()
            .unwrap();
        assert!(check_environment(&tract, &coreml).is_err());
    }

    #[test]
    fn test_list_all_providers() {
        let providers = ExecutionProviderManager::list_all_providers(&NO_GPU);
        let names: Vec<&str> = providers.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            ["onnx:auto", "onnx:cpu", "onnx:cuda", "onnx:coreml", "tract:cpu"]
        );
        let cuda = providers.iter().find(|p| p.name == "onnx:cuda").unwrap();
        assert!(!cuda.available);
    }
}
