// This module is the build pipeline for one verilog component: it owns the
// source list, invokes the external verilator compiler to produce the C++
// model and its port-declaration header, resolves the signal layout from that
// header, generates and compiles the glue wrapper into a shared object, and
// loads the result. Every product is content-addressed: the object directory
// name hashes the parameter set (and the idle bound baked into the glue), so
// equal configurations share one artifact and changed configurations never
// reuse a stale one. Rebuild decisions always compare modification times of
// the sources (and of the adapter executable itself) against the artifact;
// existence alone is never trusted. All build work for one key runs under the
// single-flight coordinator, and the in-memory layout and artifact caches are
// only refreshed inside those guarded jobs.

//! Build pipeline and caching for verilated circuit modules.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use sha2::{Digest, Sha256};

use crate::bridge::NativeArtifact;
use crate::codegen::{self, DEFAULT_IDLE_LIMIT};
use crate::config::BlockConfig;
use crate::error::{AdapterError, AdapterResult};
use crate::flight::{self, BuildCoordinator};
use crate::params::ParameterSet;
use crate::ports::{self, PortMap};

/// Manages the parsing and compilation of one verilog module.
///
/// A module is cheap to keep around: layouts and loaded artifacts are cached
/// by modification time, so repeated queries never re-invoke the toolchain
/// while the products on disk are current.
pub struct Module {
    sources: Vec<PathBuf>,
    component: String,
    build_dir: PathBuf,
    idle_limit: u32,
    coordinator: Arc<BuildCoordinator>,
    ports_cache: Mutex<HashMap<PathBuf, (PortMap, SystemTime)>>,
    lib_cache: Mutex<HashMap<PathBuf, (Arc<NativeArtifact>, SystemTime)>>,
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("sources", &self.sources)
            .field("component", &self.component)
            .field("build_dir", &self.build_dir)
            .field("idle_limit", &self.idle_limit)
            .finish_non_exhaustive()
    }
}

impl Module {
    /// Create a module from verilog sources. The component name defaults to
    /// the first source's file stem and the build directory to `build`
    /// beside it.
    pub fn new(
        sources: impl IntoIterator<Item = impl Into<PathBuf>>,
    ) -> AdapterResult<Self> {
        let mut resolved = Vec::new();
        for source in sources {
            let source = source.into();
            let source = fs::canonicalize(&source)
                .map_err(|_| AdapterError::MissingSource(source.clone()))?;
            resolved.push(source);
        }
        let first = resolved.first().ok_or(AdapterError::NoSources)?;

        let component = first
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "block".to_string());
        let build_dir = first
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("build");
        fs::create_dir_all(&build_dir)?;

        Ok(Self {
            sources: resolved,
            component,
            build_dir,
            idle_limit: DEFAULT_IDLE_LIMIT,
            coordinator: flight::global(),
            ports_cache: Mutex::new(HashMap::new()),
            lib_cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_component(mut self, component: &str) -> Self {
        self.component = component.to_string();
        self
    }

    pub fn with_build_dir(mut self, build_dir: impl Into<PathBuf>) -> AdapterResult<Self> {
        self.build_dir = build_dir.into();
        fs::create_dir_all(&self.build_dir)?;
        Ok(self)
    }

    /// Change the idle-cycle bound baked into the generated glue. The bound
    /// is part of the artifact fingerprint.
    pub fn with_idle_limit(mut self, idle_limit: u32) -> Self {
        self.idle_limit = idle_limit;
        self
    }

    /// Inject a build coordinator, e.g. one scoped to a test.
    pub fn with_coordinator(mut self, coordinator: Arc<BuildCoordinator>) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn idle_limit(&self) -> u32 {
        self.idle_limit
    }

    /// The content-addressed object directory for one configuration.
    pub fn object_dir(&self, params: &ParameterSet) -> PathBuf {
        let mut hasher = Sha256::new();
        params.hash_into(&mut hasher);
        hasher.update(self.idle_limit.to_le_bytes());
        let digest = hasher.finalize();
        let mut hash = String::with_capacity(32);
        for byte in digest.iter().take(16) {
            hash.push_str(&format!("{:02x}", byte));
        }
        self.build_dir.join(format!("{}-{}", self.component, hash))
    }

    /// Resolve the signal layout for one configuration, invoking the circuit
    /// compiler only when the generated header is missing or stale.
    pub fn ports(&self, params: &ParameterSet) -> AdapterResult<PortMap> {
        let obj_dir = self.object_dir(params);
        let key = obj_dir.to_string_lossy().into_owned();
        self.coordinator.run_once(&key, || {
            self.verilator_job(params, &obj_dir)?;
            self.parse_ports_job(&obj_dir)
        })
    }

    /// Words per transfer for every input bus, in sorted bus order.
    pub fn input_vlens(&self, params: &ParameterSet) -> AdapterResult<Vec<usize>> {
        Ok(self.ports(params)?.input_vlens())
    }

    /// Words per transfer for every output bus, in sorted bus order.
    pub fn output_vlens(&self, params: &ParameterSet) -> AdapterResult<Vec<usize>> {
        Ok(self.ports(params)?.output_vlens())
    }

    /// Bit widths of every register, in sorted register order.
    pub fn register_widths(&self, params: &ParameterSet) -> AdapterResult<Vec<u32>> {
        Ok(self.ports(params)?.register_widths())
    }

    /// Build (as needed) and load the native artifact for one configuration.
    pub fn library(&self, params: &ParameterSet) -> AdapterResult<Arc<NativeArtifact>> {
        let obj_dir = self.object_dir(params);
        let key = obj_dir.to_string_lossy().into_owned();
        self.coordinator.run_once(&key, || {
            self.verilator_job(params, &obj_dir)?;
            self.compile_job(params, &obj_dir)?;
            self.load_job(&obj_dir)
        })
    }

    /// Build, load and instantiate in one step, including the initial reset.
    pub fn instantiate(&self, params: &ParameterSet) -> AdapterResult<crate::bridge::Instance> {
        self.library(params)?.instantiate()
    }

    fn header_path(&self, obj_dir: &Path) -> PathBuf {
        obj_dir.join(format!("{}.h", self.component))
    }

    fn lib_path(&self, obj_dir: &Path) -> PathBuf {
        obj_dir.join(format!("lib{}.so", self.component))
    }

    /// Newest modification time across the sources and the adapter binary
    /// itself; regenerating the glue after an adapter upgrade matters as
    /// much as after a source edit.
    fn newest_input_mtime(&self) -> AdapterResult<SystemTime> {
        let mut newest = SystemTime::UNIX_EPOCH;
        if let Ok(exe) = std::env::current_exe() {
            if let Ok(meta) = fs::metadata(exe) {
                newest = newest.max(meta.modified()?);
            }
        }
        for source in &self.sources {
            newest = newest.max(fs::metadata(source)?.modified()?);
        }
        Ok(newest)
    }

    /// An artifact is stale when it is missing or any input is newer.
    fn is_stale(&self, artifact: &Path) -> AdapterResult<bool> {
        let meta = match fs::metadata(artifact) {
            Ok(meta) => meta,
            Err(_) => return Ok(true),
        };
        Ok(self.newest_input_mtime()? > meta.modified()?)
    }

    /// Run the circuit compiler for one configuration unless the generated
    /// header is already current. A stale object directory is cleared first
    /// so no mixed-generation products survive.
    fn verilator_job(&self, params: &ParameterSet, obj_dir: &Path) -> AdapterResult<()> {
        fs::create_dir_all(obj_dir)?;

        let header = self.header_path(obj_dir);
        if !self.is_stale(&header)? {
            log::debug!("header {} is current", header.display());
            return Ok(());
        }
        if header.exists() {
            for entry in fs::read_dir(obj_dir)? {
                fs::remove_file(entry?.path())?;
            }
        }

        let mut command = Command::new("verilator");
        command
            .current_dir(&self.build_dir)
            .args([
                "-cc",
                "--exe",
                "-CFLAGS",
                "-fPIC",
                "-LDFLAGS",
                "-shared",
                "-Wno-lint",
                "--prefix",
            ])
            .arg(&self.component)
            .arg("--Mdir")
            .arg(obj_dir)
            .arg("-o")
            .arg(format!("lib{}.so", self.component));
        for (name, value) in params.iter() {
            command.arg(format!("-G{}={}", name, value.to_override()));
        }
        for source in &self.sources {
            command.arg(source);
        }
        command.arg("wrapper.cpp");

        log::info!("running {:?}", command);
        let status = command.status()?;
        if !status.success() {
            return Err(AdapterError::ToolchainFailed {
                program: "verilator".to_string(),
                status,
            });
        }
        if !header.exists() {
            return Err(AdapterError::MissingOutput {
                program: "verilator",
                path: header,
            });
        }
        Ok(())
    }

    /// Parse the generated header, reusing the cached layout while the file
    /// is unchanged on disk.
    fn parse_ports_job(&self, obj_dir: &Path) -> AdapterResult<PortMap> {
        let header = self.header_path(obj_dir);
        let mtime = fs::metadata(&header)?.modified()?;

        if let Some((ports, cached)) = self.ports_cache.lock().unwrap().get(&header) {
            if *cached == mtime {
                return Ok(ports.clone());
            }
        }

        let ports = ports::parse_metadata(&header)?;
        self.ports_cache
            .lock()
            .unwrap()
            .insert(header, (ports.clone(), mtime));
        Ok(ports)
    }

    /// Generate the wrapper and compile the verilated sources into a shared
    /// object, unless the library is already current.
    fn compile_job(&self, params: &ParameterSet, obj_dir: &Path) -> AdapterResult<()> {
        let lib = self.lib_path(obj_dir);
        if !self.is_stale(&lib)? {
            log::debug!("artifact {} is current", lib.display());
            return Ok(());
        }
        if lib.exists() {
            fs::remove_file(&lib)?;
        }

        let ports = self.parse_ports_job(obj_dir)?;
        let config = BlockConfig::new(&self.component, params, &ports);
        let wrapper = codegen::render_wrapper(&config, self.idle_limit)?;
        fs::write(obj_dir.join("wrapper.cpp"), wrapper)?;

        let mut command = Command::new("make");
        command
            .current_dir(obj_dir)
            .arg("-j4")
            .arg("-f")
            .arg(format!("{}.mk", self.component));

        log::info!("running {:?}", command);
        let status = command.status()?;
        if !status.success() {
            return Err(AdapterError::ToolchainFailed {
                program: "make".to_string(),
                status,
            });
        }
        if !lib.exists() {
            return Err(AdapterError::MissingOutput {
                program: "make",
                path: lib,
            });
        }
        Ok(())
    }

    /// Load the shared object, reusing the cached handle while the file is
    /// unchanged on disk.
    fn load_job(&self, obj_dir: &Path) -> AdapterResult<Arc<NativeArtifact>> {
        let lib = self.lib_path(obj_dir);
        let mtime = fs::metadata(&lib)?.modified()?;

        if let Some((artifact, cached)) = self.lib_cache.lock().unwrap().get(&lib) {
            if *cached == mtime {
                return Ok(artifact.clone());
            }
        }

        let artifact = NativeArtifact::load(&lib)?;
        self.lib_cache
            .lock()
            .unwrap()
            .insert(lib, (artifact.clone(), mtime));
        Ok(artifact)
    }
}
