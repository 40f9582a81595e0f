//! Specific background job implementations.

pub mod serialize_module;

pub use serialize_module::{SerializeModuleJob, SERIALIZE_MODULE_JOB_PRIORITY};
