//! Secret-store client (C1) and compute-metadata/auth client (C2) for the
//! SAP Monitor collector agent.
//!
//! Both clients talk to out-of-scope external collaborators (an Azure Key
//! Vault instance and the Azure Instance Metadata Service); this crate owns
//! only the HTTP plumbing and the `sapmon_core::secrets` trait
//! implementations `sapmon-cli` wires in at startup.

pub mod keyvault;
pub mod metadata;

pub use keyvault::{KeyVaultReferenceResolver, KeyVaultSecretStore};
pub use metadata::{BearerTokenSource, MetadataClient};
