//! Module serialization background job.
//!
//! Writes the compiled representation of one module to the module cache so
//! later runs can load it instead of recompiling.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobPriority},
};
use crate::compiler::{is_ready_for_persistence, QualifiedName};
use crate::locking::WriteCompilationLockGuard;
use std::fmt;
use tracing::{debug, warn};

/// Priority of [`SerializeModuleJob`], lower values run first.
pub const SERIALIZE_MODULE_JOB_PRIORITY: JobPriority = 1000;

/// Background job that persists a single module's compiled IR.
///
/// The module is looked up when the job runs, not when it is submitted, so a
/// module that is unloaded in between is skipped. Modules that have not yet
/// been through code generation are skipped as well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializeModuleJob {
    module_name: QualifiedName,
}

impl SerializeModuleJob {
    pub fn new(module_name: QualifiedName) -> Self {
        Self { module_name }
    }

    pub fn module_name(&self) -> &QualifiedName {
        &self.module_name
    }
}

impl fmt::Display for SerializeModuleJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerializeModuleJob({})", self.module_name)
    }
}

impl BackgroundJob for SerializeModuleJob {
    type Output = ();

    fn kind(&self) -> &'static str {
        "serialize_module"
    }

    fn name(&self) -> String {
        self.to_string()
    }

    fn priority(&self) -> JobPriority {
        SERIALIZE_MODULE_JOB_PRIORITY
    }

    fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
        let use_global_cache = ctx.is_use_global_cache();

        // Released on every return path and while unwinding
        let _lock = WriteCompilationLockGuard::acquire(ctx.locking.as_ref(), self.to_string());

        let Some(module) = ctx.modules.find_module_by_name(&self.module_name) else {
            debug!(
                "Module [{}] is no longer loaded, nothing to serialize.",
                self.module_name
            );
            return Ok(());
        };

        let stage = module.compilation_stage();
        if !is_ready_for_persistence(stage) {
            warn!(
                "Attempt to serialize the module [{}] at stage [{}].",
                self.module_name, stage
            );
            return Ok(());
        }

        ctx.persistence
            .serialize_module(&module.compiled_representation(), use_global_cache, false)?;

        debug!("Serialized module [{}]", self.module_name);
        Ok(())
    }
}
