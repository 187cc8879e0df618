//! Shared primitives for the nbboot workspace.

pub mod supervisor_state;
