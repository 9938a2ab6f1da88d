//! Concrete `ProviderInstance`/`ProviderCheck` implementations (C6): SAP
//! HANA, Microsoft SQL Server, and Prometheus-format exporters.
//!
//! This is the only crate in the workspace that links against the
//! data-source drivers themselves (`hdbconnect`, `odbc-api`); everything
//! above it (`sapmon-core`'s engine, `sapmon-cli`) stays polymorphic over
//! `dyn ProviderInstance` / `dyn ProviderCheck`.

pub mod hana;
pub mod mssql;
pub mod prometheus;
mod timeout;

use sapmon_core::model::ProviderType;
use sapmon_core::registry::ProviderRegistry;

/// Register every known provider-type factory. Called once at startup by
/// `sapmon-cli` before the registry is handed to the config loader.
pub fn register_all(registry: &mut ProviderRegistry) {
    registry.register(ProviderType::SapHana, |name| Box::new(hana::HanaInstance::new(name)));
    registry.register(ProviderType::MsSqlServer, |name| Box::new(mssql::MssqlInstance::new(name)));
    registry.register(ProviderType::PrometheusGeneric, |name| {
        Box::new(prometheus::PrometheusInstance::new(name, ProviderType::PrometheusGeneric))
    });
    registry.register(ProviderType::PrometheusHaCluster, |name| {
        Box::new(prometheus::PrometheusInstance::new(name, ProviderType::PrometheusHaCluster))
    });
    registry.register(ProviderType::PrometheusNode, |name| {
        Box::new(prometheus::PrometheusInstance::new(name, ProviderType::PrometheusNode))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_all_populates_every_provider_type() {
        let mut registry = ProviderRegistry::new();
        register_all(&mut registry);
        for provider_type in [
            ProviderType::SapHana,
            ProviderType::MsSqlServer,
            ProviderType::PrometheusGeneric,
            ProviderType::PrometheusHaCluster,
            ProviderType::PrometheusNode,
        ] {
            let descriptor = sapmon_core::model::ProviderDescriptor {
                name: "probe".into(),
                provider_type: provider_type.as_str().into(),
                properties: serde_json::Map::new(),
                metadata: serde_json::Map::new(),
            };
            // We only check that a factory exists (UnknownProviderType would
            // be returned otherwise); parse_properties is expected to fail
            // on the empty properties map supplied here.
            let err = registry
                .make_instance(
                    &descriptor,
                    &sapmon_core::secrets::NoopSecretResolver,
                    std::path::Path::new("/nonexistent"),
                    sapmon_core::registry::MakeInstanceOptions::default(),
                )
                .unwrap_err();
            assert!(!matches!(err, sapmon_core::error::SapmonError::UnknownProviderType(_)));
        }
    }
}
