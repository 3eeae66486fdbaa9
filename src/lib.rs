//! fakehttp-ipt6 - IPv6 rule provisioning for FakeHTTP
//!
//! Installs the ip6tables `mangle` chains that divert a narrow slice of IPv6
//! TCP traffic into an NFQUEUE, where the FakeHTTP inspection process injects
//! decoy packets. Everything it creates lives in two chains, `FAKEHTTP` and
//! `FAKEHTTP_R`, and can be removed again from any state.
//!
//! # Architecture
//!
//! - [`core`] - Rule set construction and the setup/cleanup driver
//! - [`elevation`] - Privilege escalation for ip6tables invocations
//! - [`config`] - Configuration persistence and validation
//! - [`audit`] - Audit logging for all privileged operations
//! - [`validators`] - Input validation
//! - [`utils`] - Utility functions (XDG directories, interfaces)
//!
//! # Example
//!
//! ```no_run
//! use fakehttp_ipt6::{Ip6tablesExecutor, Provisioner, RuntimeParameters};
//!
//! # async fn run() -> fakehttp_ipt6::Result<()> {
//! let params = RuntimeParameters {
//!     mark: 0x8000,
//!     mask: 0x8000,
//!     queue_num: 512,
//!     interfaces: vec!["eth0".to_string()],
//!     all_interfaces: false,
//! };
//!
//! let provisioner = Provisioner::new(Ip6tablesExecutor::new());
//! if let Err(e) = provisioner.setup(&params).await {
//!     provisioner.cleanup().await;
//!     return Err(e);
//! }
//! # Ok(())
//! # }
//! ```

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod elevation;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use core::error::{Error, ErrorTranslation, Result};
pub use core::executor::{ExecStatus, Executor, Ip6tablesExecutor};
pub use core::provision::{Provisioner, SetupReport, Step};
pub use core::rules::{RulePlan, RuntimeParameters, Stage};
