//! Workspace root package.
//!
//! Exists so development tooling (git hooks) can be installed for the whole
//! workspace. All functionality lives in `crates/`.
