//! Tauri commands exposing the core to the desktop shell.
//!
//! Each module here is a thin IPC adapter: it translates `String`-keyed
//! Tauri arguments into the core's typed requests, runs the blocking or
//! async core call, and maps [`crate::error::CoreError`] down to the
//! `String` Tauri's `Result<T, String>` convention expects. No protocol,
//! flashing, or parsing logic lives in this module — that's the job of
//! [`crate::msp`], [`crate::flash`], [`crate::firmware`], [`crate::board`],
//! [`crate::cache`], and [`crate::download`].

pub mod device;
pub mod dfu;
pub mod firmware;
pub mod settings;
