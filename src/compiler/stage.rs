use serde::{Deserialize, Serialize};

/// Position of a module in the compiler pipeline.
///
/// Variants are declared in pipeline order, so the derived `Ord` is the
/// pipeline order. A module only moves forward through these stages unless
/// it is explicitly reset for recompilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompilationStage {
    Initial,
    AfterParsing,
    AfterImportResolution,
    AfterGlobalTypes,
    AfterStaticPasses,
    AfterRuntimeStubs,
    AfterCodegen,
    AfterSerialization,
}

/// Minimum stage a module must reach before its IR may be written to the cache.
pub const PERSISTENCE_THRESHOLD: CompilationStage = CompilationStage::AfterCodegen;

impl CompilationStage {
    pub const ALL: [CompilationStage; 8] = [
        CompilationStage::Initial,
        CompilationStage::AfterParsing,
        CompilationStage::AfterImportResolution,
        CompilationStage::AfterGlobalTypes,
        CompilationStage::AfterStaticPasses,
        CompilationStage::AfterRuntimeStubs,
        CompilationStage::AfterCodegen,
        CompilationStage::AfterSerialization,
    ];

    /// Whether this stage comes strictly before `target` in the pipeline.
    pub fn is_before(self, target: CompilationStage) -> bool {
        self < target
    }

    /// Whether this stage is `target` or any later stage.
    pub fn is_at_least(self, target: CompilationStage) -> bool {
        !self.is_before(target)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompilationStage::Initial => "initial",
            CompilationStage::AfterParsing => "after_parsing",
            CompilationStage::AfterImportResolution => "after_import_resolution",
            CompilationStage::AfterGlobalTypes => "after_global_types",
            CompilationStage::AfterStaticPasses => "after_static_passes",
            CompilationStage::AfterRuntimeStubs => "after_runtime_stubs",
            CompilationStage::AfterCodegen => "after_codegen",
            CompilationStage::AfterSerialization => "after_serialization",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == s)
    }
}

impl std::fmt::Display for CompilationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a module at `stage` can be persisted.
///
/// A `false` result is the normal answer for a module that is still being
/// compiled, possibly on another thread.
pub fn is_ready_for_persistence(stage: CompilationStage) -> bool {
    stage.is_at_least(PERSISTENCE_THRESHOLD)
}
