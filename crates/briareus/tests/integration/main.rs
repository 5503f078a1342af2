/// Helpers.
mod common;

/// CLI validation tests that don't require forge access.
mod cli;

/// Tests exercising the `--offline` forge-refusal path.
mod offline;
