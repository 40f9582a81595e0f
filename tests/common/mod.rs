//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{workers, TestEnv, DATA_MODULE};
//!
//! #[tokio::test]
//! async fn test_serialize() {
//!     let env = TestEnv::spawn(workers(1));
//!     env.register_module(DATA_MODULE, CompilationStage::AfterCodegen);
//!     // submit jobs through env.handle
//!     env.shutdown().await;
//! }
//! ```

mod constants;
mod doubles;
mod fixtures;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use constants::*;
#[allow(unused_imports)]
pub use doubles::{PersistCall, RecordingLocking, RecordingPersistence};
#[allow(unused_imports)]
pub use fixtures::{gated_single_worker, module_name, workers, TestEnv};
