//! Shared constants for end-to-end tests

// ============================================================================
// Test Module Names
// ============================================================================

/// Module that has been through code generation in most fixtures
pub const DATA_MODULE: &str = "Standard.Base.Data";

/// Second ready module
pub const TEXT_MODULE: &str = "Standard.Base.Text";

/// Module registered in a project namespace
pub const PROJECT_MODULE: &str = "local.Project.Main";

/// Never registered
pub const MISSING_MODULE: &str = "Standard.Base.Missing";

// ============================================================================
// Timing
// ============================================================================

/// Time a recording persistence backend spends inside each write
pub const SLOW_WRITE_MILLIS: u64 = 20;
