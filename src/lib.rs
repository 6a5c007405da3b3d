// SPDX-License-Identifier: MIT OR Apache-2.0
//! Workspace umbrella for Tollgate.
//!
//! The gateway lives in the `crates/` members; this package hosts the
//! workspace-level end-to-end scenarios under `tests/`.
