// This module defines error types for the vaxis adapter using the thiserror
// crate for idiomatic Rust error handling. AdapterError is the main error enum
// covering the failure classes of the adapter: signal classification problems
// found while resolving a circuit's port layout, nonzero exits from the
// external verilator/make toolchain, buffer shape mismatches caught before any
// native call, register lookup failures, and use of an instance after it was
// closed. Each variant carries relevant context (signal and bus names, widths,
// failing program and exit status) for debugging. The module also provides
// AdapterResult<T> as a convenience type alias for Result<T, AdapterError>.

//! Error types for the vaxis adapter.
//!
//! Using thiserror for more idiomatic error handling.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Main error type for layout resolution, builds and native calls.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("unrecognized signal: {name}")]
    UnrecognizedSignal { name: String },

    #[error("signal {name} must be 1 bit wide, found {width}")]
    WidthMismatch { name: String, width: u32 },

    #[error("bus {bus} declares its {role} signal twice")]
    DuplicateRole { bus: String, role: &'static str },

    #[error("bus {bus} mixes input and output signals")]
    DirectionConflict { bus: String },

    #[error("bus {bus} is missing its {role} signal")]
    MissingHandshake { bus: String, role: &'static str },

    #[error("signal {name} has the wrong direction for {role}")]
    SignalDirection { name: String, role: &'static str },

    #[error("register {name} is {width} bits wide, at most 64 are supported")]
    RegisterTooWide { name: String, width: u32 },

    #[error("register {name} declares conflicting widths {first} and {second}")]
    RegisterWidthConflict { name: String, first: u32, second: u32 },

    #[error("register {name} declares din without a dset strobe")]
    MissingStrobe { name: String },

    #[error("{program} failed with {status}")]
    ToolchainFailed { program: String, status: ExitStatus },

    #[error("{program} did not produce {path:?}")]
    MissingOutput { program: &'static str, path: PathBuf },

    #[error("expected {expected} {kind} buffers, got {got}")]
    PortCountMismatch {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("buffer for bus {bus} is {len} words, not a multiple of {vlen}")]
    ShapeMismatch { bus: String, len: usize, vlen: usize },

    #[error("unknown register: {name}")]
    UnknownRegister { name: String },

    #[error("register {name} is not writable")]
    RegisterNotWritable { name: String },

    #[error("instance used after close")]
    StaleHandle,

    #[error("at least one source file is required")]
    NoSources,

    #[error("missing source file: {0:?}")]
    MissingSource(PathBuf),

    #[error("failed to load artifact {path:?}: {source}")]
    LoadFailed {
        path: PathBuf,
        source: libloading::Error,
    },

    #[error("artifact config is not valid JSON: {0}")]
    BadConfig(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;
