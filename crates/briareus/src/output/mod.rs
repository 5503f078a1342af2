//! Stage output rendering (SPEC_FULL.md §6). The fact list and the Hydra
//! jobset each have one canonical wire form (ASCII fact lines, JSON
//! respectively) and are serialized directly by `main.rs`/`builder::hydra`;
//! the analysis report is the one stage with a choice of encoding, covered
//! by the two submodules here.

pub(crate) mod json;
pub(crate) mod plain;
