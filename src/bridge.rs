// This module is the only place that touches raw memory across the boundary
// into a compiled artifact. NativeArtifact loads the shared object, binds all
// exported operations eagerly with their exact argument and return shapes
// (signed 64-bit size arrays, 32-bit signed data words, raw buffer pointers),
// and reads back the embedded config JSON so a loaded artifact describes its
// own layout. Instance owns one live circuit state: it validates every
// caller-supplied buffer against the discovered word counts before any native
// call, keeps reusable argument arrays sized to the bus counts, never retains
// buffer pointers past a call, and destroys the native state exactly once no
// matter how often it is closed or dropped.

//! Artifact loading and native call marshalling.

use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;

use libloading::Library;

use crate::config::BlockConfig;
use crate::error::{AdapterError, AdapterResult};
use crate::ports::Bus;

// The exported ABI of a generated artifact. Verilated models use 4-byte wide
// characters for the config string on the platforms this adapter targets.
type ConfigFn = unsafe extern "C" fn() -> *const u32;
type CreateFn = unsafe extern "C" fn() -> *mut c_void;
type DestroyFn = unsafe extern "C" fn(*mut c_void);
type ResetFn = unsafe extern "C" fn(*mut c_void);
type WorkFn = unsafe extern "C" fn(
    *mut c_void,
    *mut i64,
    *mut i64,
    *mut *const i32,
    *mut *mut i32,
);
type ReadRegisterFn = unsafe extern "C" fn(*mut c_void, u32) -> u64;
type WriteRegisterFn = unsafe extern "C" fn(*mut c_void, u32, u64);

/// A loaded, self-describing compiled artifact.
///
/// All exports are resolved once at load time so later calls cannot fail on
/// symbol lookup; the library handle is kept alive alongside the resolved
/// function pointers.
pub struct NativeArtifact {
    path: PathBuf,
    config: BlockConfig,
    // Field order matters only for Drop: the pointers are plain copies and
    // the library must outlive every call made through them, which holding
    // it in the same Arc guarantees.
    _library: Library,
    create_block: CreateFn,
    destroy_block: DestroyFn,
    reset_block: ResetFn,
    work_block: WorkFn,
    read_register: ReadRegisterFn,
    write_register: WriteRegisterFn,
}

impl NativeArtifact {
    /// Load an artifact, resolve its exports and parse the embedded config.
    pub fn load(path: &Path) -> AdapterResult<Arc<Self>> {
        let failed = |source| AdapterError::LoadFailed {
            path: path.to_path_buf(),
            source,
        };

        let library = unsafe { Library::new(path) }.map_err(failed)?;

        let config_fn = unsafe { *library.get::<ConfigFn>(b"config").map_err(failed)? };
        let create_block =
            unsafe { *library.get::<CreateFn>(b"create_block").map_err(failed)? };
        let destroy_block =
            unsafe { *library.get::<DestroyFn>(b"destroy_block").map_err(failed)? };
        let reset_block =
            unsafe { *library.get::<ResetFn>(b"reset_block").map_err(failed)? };
        let work_block = unsafe { *library.get::<WorkFn>(b"work_block").map_err(failed)? };
        let read_register =
            unsafe { *library.get::<ReadRegisterFn>(b"read_register").map_err(failed)? };
        let write_register = unsafe {
            *library
                .get::<WriteRegisterFn>(b"write_register")
                .map_err(failed)?
        };

        let text = unsafe { decode_wide(config_fn()) };
        let config: BlockConfig = serde_json::from_str(&text)?;

        log::debug!("loaded artifact {}", path.display());
        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            config,
            _library: library,
            create_block,
            destroy_block,
            reset_block,
            work_block,
            read_register,
            write_register,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The layout and parameter set this artifact was built from.
    pub fn config(&self) -> &BlockConfig {
        &self.config
    }

    /// Create a running instance of the circuit, performing the initial
    /// reset.
    pub fn instantiate(self: &Arc<Self>) -> AdapterResult<Instance> {
        Instance::new(self.clone())
    }
}

/// Decode a NUL-terminated wide string returned by the artifact.
unsafe fn decode_wide(mut ptr: *const u32) -> String {
    let mut out = String::new();
    while !ptr.is_null() && *ptr != 0 {
        out.push(char::from_u32(*ptr).unwrap_or(char::REPLACEMENT_CHARACTER));
        ptr = ptr.add(1);
    }
    out
}

/// Item counts for a list of flat buffers, each interpreted as
/// `[n_items x vlen]` rows of one bus. Rejects any buffer whose length is
/// not an exact multiple of its bus's word count before a single word
/// crosses the native boundary.
fn item_counts(buses: &[Bus], lens: &[usize]) -> AdapterResult<Vec<i64>> {
    let mut counts = Vec::with_capacity(lens.len());
    for (bus, &len) in buses.iter().zip(lens) {
        let vlen = bus.vlen();
        if vlen == 0 {
            // A handshake-only bus carries no words, so a flat buffer cannot
            // express any items for it.
            if len != 0 {
                return Err(AdapterError::ShapeMismatch {
                    bus: bus.name.clone(),
                    len,
                    vlen,
                });
            }
            counts.push(0);
        } else if len % vlen != 0 {
            return Err(AdapterError::ShapeMismatch {
                bus: bus.name.clone(),
                len,
                vlen,
            });
        } else {
            counts.push((len / vlen) as i64);
        }
    }
    Ok(counts)
}

/// One live handle to a loaded artifact: the opaque native state plus the
/// resolved bus/register metadata.
///
/// Deliberately not `Send`: a work call is single-threaded and runs to its
/// idle-bound exit.
pub struct Instance {
    artifact: Arc<NativeArtifact>,
    handle: *mut c_void,
    input_vlens: Vec<usize>,
    output_vlens: Vec<usize>,
    reg_indices: HashMap<String, usize>,
    // Reusable native-call argument buffers, sized to the bus counts.
    input_sizes: Vec<i64>,
    output_sizes: Vec<i64>,
    input_items: Vec<*const i32>,
    output_items: Vec<*mut i32>,
}

impl Instance {
    fn new(artifact: Arc<NativeArtifact>) -> AdapterResult<Self> {
        let config = artifact.config();
        let input_vlens = config.input_vlens.clone();
        let output_vlens = config.output_vlens.clone();
        let reg_indices = config
            .ports
            .registers
            .iter()
            .enumerate()
            .map(|(idx, reg)| (reg.name.clone(), idx))
            .collect();

        let handle = unsafe { (artifact.create_block)() };
        let mut instance = Self {
            input_sizes: vec![0; input_vlens.len()],
            output_sizes: vec![0; output_vlens.len()],
            input_items: vec![ptr::null(); input_vlens.len()],
            output_items: vec![ptr::null_mut(); output_vlens.len()],
            artifact,
            handle,
            input_vlens,
            output_vlens,
            reg_indices,
        };
        instance.reset()?;
        Ok(instance)
    }

    fn live_handle(&self) -> AdapterResult<*mut c_void> {
        if self.handle.is_null() {
            return Err(AdapterError::StaleHandle);
        }
        Ok(self.handle)
    }

    pub fn config(&self) -> &BlockConfig {
        self.artifact.config()
    }

    pub fn input_vlens(&self) -> &[usize] {
        &self.input_vlens
    }

    pub fn output_vlens(&self) -> &[usize] {
        &self.output_vlens
    }

    pub fn input_buses(&self) -> Vec<&str> {
        self.config().ports.inputs.iter().map(|b| b.name.as_str()).collect()
    }

    pub fn output_buses(&self) -> Vec<&str> {
        self.config().ports.outputs.iter().map(|b| b.name.as_str()).collect()
    }

    pub fn register_names(&self) -> Vec<&str> {
        self.config()
            .ports
            .registers
            .iter()
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Reset the circuit: handshake lines dropped, reset asserted across
    /// four clock half-cycles, then released.
    pub fn reset(&mut self) -> AdapterResult<()> {
        let handle = self.live_handle()?;
        unsafe { (self.artifact.reset_block)(handle) };
        Ok(())
    }

    /// Drive the circuit with the given buffers and return the number of
    /// consumed and produced items per bus.
    ///
    /// Every buffer is a flat `&[i32]` holding `n_items x vlen` words in row
    /// order for its bus, in the sorted bus order of the layout. Buffer
    /// pointers are only used for the duration of the call.
    pub fn work(
        &mut self,
        inputs: &[&[i32]],
        outputs: &mut [&mut [i32]],
    ) -> AdapterResult<(Vec<usize>, Vec<usize>)> {
        let handle = self.live_handle()?;

        if inputs.len() != self.input_vlens.len() {
            return Err(AdapterError::PortCountMismatch {
                kind: "input",
                expected: self.input_vlens.len(),
                got: inputs.len(),
            });
        }
        if outputs.len() != self.output_vlens.len() {
            return Err(AdapterError::PortCountMismatch {
                kind: "output",
                expected: self.output_vlens.len(),
                got: outputs.len(),
            });
        }

        let config = self.artifact.config();
        let input_lens: Vec<usize> = inputs.iter().map(|b| b.len()).collect();
        let output_lens: Vec<usize> = outputs.iter().map(|b| b.len()).collect();
        let original_inputs = item_counts(&config.ports.inputs, &input_lens)?;
        let original_outputs = item_counts(&config.ports.outputs, &output_lens)?;

        self.input_sizes.copy_from_slice(&original_inputs);
        self.output_sizes.copy_from_slice(&original_outputs);
        for (slot, buffer) in self.input_items.iter_mut().zip(inputs) {
            *slot = buffer.as_ptr();
        }
        for (slot, buffer) in self.output_items.iter_mut().zip(outputs.iter_mut()) {
            *slot = buffer.as_mut_ptr();
        }

        unsafe {
            (self.artifact.work_block)(
                handle,
                self.input_sizes.as_mut_ptr(),
                self.output_sizes.as_mut_ptr(),
                self.input_items.as_mut_ptr(),
                self.output_items.as_mut_ptr(),
            );
        }

        // The sizes arrays now hold the remaining counts.
        let consumed = original_inputs
            .iter()
            .zip(&self.input_sizes)
            .map(|(original, remaining)| (original - remaining) as usize)
            .collect();
        let produced = original_outputs
            .iter()
            .zip(&self.output_sizes)
            .map(|(original, remaining)| (original - remaining) as usize)
            .collect();

        for slot in &mut self.input_items {
            *slot = ptr::null();
        }
        for slot in &mut self.output_items {
            *slot = ptr::null_mut();
        }

        Ok((consumed, produced))
    }

    /// Read a register by name, widened to 64 bits.
    pub fn read_register(&self, name: &str) -> AdapterResult<u64> {
        let handle = self.live_handle()?;
        let idx = *self
            .reg_indices
            .get(name)
            .ok_or_else(|| AdapterError::UnknownRegister {
                name: name.to_string(),
            })?;
        Ok(unsafe { (self.artifact.read_register)(handle, idx as u32) })
    }

    /// Write a register by name; the register must expose a settable data
    /// role.
    pub fn write_register(&mut self, name: &str, value: u64) -> AdapterResult<()> {
        let handle = self.live_handle()?;
        let idx = *self
            .reg_indices
            .get(name)
            .ok_or_else(|| AdapterError::UnknownRegister {
                name: name.to_string(),
            })?;
        if !self.artifact.config().ports.registers[idx].din {
            return Err(AdapterError::RegisterNotWritable {
                name: name.to_string(),
            });
        }
        unsafe { (self.artifact.write_register)(handle, idx as u32, value) };
        Ok(())
    }

    /// Destroy the native state. Safe to call more than once; later calls
    /// are no-ops and any other operation afterwards reports a stale handle.
    pub fn close(&mut self) {
        if !self.handle.is_null() {
            unsafe { (self.artifact.destroy_block)(self.handle) };
            self.handle = ptr::null_mut();
        }
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus(name: &str, tdata: u32, tuser: u32, tlast: u32) -> Bus {
        Bus {
            name: name.to_string(),
            tdata,
            tuser,
            tlast,
        }
    }

    #[test]
    fn test_item_counts_accepts_exact_rows() {
        let buses = [bus("in", 32, 0, 0), bus("aux", 40, 0, 1)];
        let counts = item_counts(&buses, &[5, 12]).unwrap();
        // aux carries 40+1 bits in 2+1 words per item
        assert_eq!(counts, vec![5, 4]);
    }

    #[test]
    fn test_item_counts_rejects_ragged_buffer() {
        let buses = [bus("in", 40, 0, 0)];
        let err = item_counts(&buses, &[5]).unwrap_err();
        assert!(matches!(
            err,
            AdapterError::ShapeMismatch { bus, len: 5, vlen: 2 } if bus == "in"
        ));
    }

    #[test]
    fn test_item_counts_handshake_only_bus() {
        let buses = [bus("trigger", 0, 0, 0)];
        assert_eq!(item_counts(&buses, &[0]).unwrap(), vec![0]);
        assert!(item_counts(&buses, &[3]).is_err());
    }

    #[test]
    fn test_decode_wide() {
        let text: Vec<u32> = "axis \"copy\"".chars().map(|c| c as u32).chain([0]).collect();
        let decoded = unsafe { decode_wide(text.as_ptr()) };
        assert_eq!(decoded, "axis \"copy\"");

        assert_eq!(unsafe { decode_wide(ptr::null()) }, "");
    }
}
