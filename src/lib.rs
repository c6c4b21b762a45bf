//! vaxis - Verilated AXI-Stream adapters for dataflow hosts.
//!
//! vaxis takes a verilog component with AXI-Stream style handshake ports,
//! compiles it with Verilator, wraps the result in a generated clock-stepping
//! glue layer and drives the compiled artifact as a buffer-oriented
//! processing stage: the caller hands in word buffers, the adapter feeds the
//! circuit one transfer per clock cycle and reports how many items were
//! consumed and produced.
//!
//! # Primary Usage
//!
//! ```ignore
//! use vaxis::{Module, ParameterSet};
//!
//! let module = Module::new(["axis_copy.v"])?;
//! let params: ParameterSet = [("DATA_WIDTH", 32)].into_iter().collect();
//!
//! // Compiles on first use, cached by parameter content afterwards.
//! let mut instance = module.instantiate(&params)?;
//!
//! let input = [1, 2, 3];
//! let mut output = [0i32; 8];
//! let (consumed, produced) = instance.work(&[&input], &mut [&mut output])?;
//! let count = instance.read_register("counter")?;
//! ```
//!
//! # Architecture
//!
//! - [`ports`] - signal layout discovery from the verilated header
//! - [`params`] - ordered parameter sets and content addressing
//! - [`flight`] - single-flight build coordination
//! - [`codegen`] - C++ glue generation from the validated layout
//! - [`module`] - the build pipeline (verilate, compile, cache, load)
//! - [`bridge`] - artifact loading and native call marshalling
//! - [`config`] - the self-describing artifact configuration
//! - [`error`] - the error taxonomy shared by all of the above

pub mod bridge;
pub mod codegen;
pub mod config;
pub mod error;
pub mod flight;
pub mod module;
pub mod params;
pub mod ports;

// Re-export the common types.
pub use bridge::{Instance, NativeArtifact};
pub use codegen::DEFAULT_IDLE_LIMIT;
pub use config::BlockConfig;
pub use error::{AdapterError, AdapterResult};
pub use flight::BuildCoordinator;
pub use module::Module;
pub use params::{ParamValue, ParameterSet};
pub use ports::{Bus, Direction, PortMap, Register};
