//! Builder adapters: translate a `BldConfig` set into a concrete build
//! system's native configuration form (SPEC_FULL.md §6, "Builder jobset").
//!
//! Only the Hydra dialect is implemented, per the distilled spec's own
//! "(for reference)" framing — other builders are out of scope.

pub(crate) mod hydra;
