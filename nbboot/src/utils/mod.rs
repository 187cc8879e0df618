//! Cross-cutting helpers shared by the driver and tests.

pub mod logging;
