//! Artifact builder and inspector binary.
//!
//! Resolves a component's port layout (invoking verilator as needed), and
//! unless asked for the layout only, builds and loads the native artifact
//! and prints its self-describing configuration.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use vaxis::{AdapterResult, Module, ParamValue, ParameterSet};

#[derive(Parser)]
#[command(name = "vaxisgen", about = "Build and inspect verilated stream adapters")]
struct Args {
    /// Verilog source files; the first one names the component.
    #[arg(required = true)]
    sources: Vec<PathBuf>,

    /// Parameter overrides as NAME=VALUE pairs, applied in order.
    #[arg(short = 'G', long = "param", value_name = "NAME=VALUE")]
    params: Vec<String>,

    /// Override the component name derived from the first source.
    #[arg(long)]
    component: Option<String>,

    /// Override the build directory placed beside the first source.
    #[arg(long)]
    build_dir: Option<PathBuf>,

    /// Idle-cycle bound baked into the generated glue.
    #[arg(long)]
    idle_limit: Option<u32>,

    /// Only resolve and print the port layout, skip the native build.
    #[arg(long)]
    ports_only: bool,
}

fn parse_params(pairs: &[String]) -> Result<ParameterSet, String> {
    let mut params = ParameterSet::new();
    for pair in pairs {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", pair))?;
        // Integers pass through as numbers, anything else as a string.
        match value.parse::<i64>() {
            Ok(number) => params.set(name, number),
            Err(_) => params.set(name, ParamValue::Str(value.to_string())),
        };
    }
    Ok(params)
}

fn run(args: &Args) -> AdapterResult<String> {
    let mut module = Module::new(&args.sources)?;
    if let Some(component) = &args.component {
        module = module.with_component(component);
    }
    if let Some(build_dir) = &args.build_dir {
        module = module.with_build_dir(build_dir)?;
    }
    if let Some(idle_limit) = args.idle_limit {
        module = module.with_idle_limit(idle_limit);
    }

    let params = match parse_params(&args.params) {
        Ok(params) => params,
        Err(message) => {
            eprintln!("error: {}", message);
            std::process::exit(2);
        }
    };

    if args.ports_only {
        let ports = module.ports(&params)?;
        Ok(serde_json::to_string_pretty(&ports)?)
    } else {
        let artifact = module.library(&params)?;
        Ok(serde_json::to_string_pretty(artifact.config())?)
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(report) => {
            println!("{}", report);
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("error: {}", error);
            ExitCode::FAILURE
        }
    }
}
