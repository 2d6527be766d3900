//! # hwcrypto-core
//!
//! Hardware-backed P-256 key management with biometric-gated signing.
//!
//! Keys are created in (or imported into) the platform's secure hardware,
//! bound to a strong biometric, and used one signature per user
//! authentication. Private key material never leaves the hardware once
//! stored.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HardwareCrypto                          │
//! │                                                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │ Capability   │  │ AliasRegistry│  │ PEM codec    │      │
//! │  │ detection    │  │ (1 op/alias) │  │ (import)     │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │              AuthenticatedSigner                  │      │
//! │  │   (prompt, cancel, timeout, one-shot signature)   │      │
//! │  └──────────────────────────────────────────────────┘      │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │              SecureKeyStore                       │      │
//! │  │  (StrongBox / TEE / Secure Enclave / emulated)    │      │
//! │  └──────────────────────────────────────────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Properties
//!
//! - **Fail-closed**: unsupported devices reject every operation
//! - **Hardware-enforced**: keys whose auth requirement is not enforced by
//!   secure hardware are deleted and rejected (except on emulators)
//! - **One auth, one signature**: no authentication validity window
//!
//! ## Example
//!
//! ```rust,ignore
//! use hwcrypto_core::{HardwareCrypto, HardwareCryptoConfig};
//!
//! let crypto = HardwareCrypto::new(&HardwareCryptoConfig::default())?;
//! crypto.generate_key_pair("login")?;
//! let public_key = crypto.export_public_key("login")?;
//! let signature = crypto.sign("login", b"challenge").await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::doc_markdown)] // Allow product names without backticks
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::missing_panics_doc)] // Panic documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

mod api;
pub mod config;
pub mod error;
pub mod registry;
pub mod signer;

pub use api::{HardwareCrypto, SignFuture};
pub use config::{default_store_dir, HardwareCryptoConfig, PromptConfig};
pub use error::HardwareCryptoError;
pub use registry::{AliasGuard, AliasRegistry};
pub use signer::{cancel_pair, AuthenticatedSigner, CancelHandle, CancelSignal, SignState};

pub use hwcrypto_keystore::{HardwareType, PlatformCapabilities};
