//! Self-describing artifact configuration.
//!
//! Every compiled artifact embeds a JSON description of the layout and the
//! parameter set it was built from and returns it from its `config()`
//! export. A loaded artifact therefore never relies on the caller keeping
//! the layout in sync out-of-band.

use serde::{Deserialize, Serialize};

use crate::params::ParameterSet;
use crate::ports::PortMap;

/// The JSON payload baked into the generated glue and read back by the
/// bridge after loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockConfig {
    pub component: String,
    pub params: ParameterSet,
    #[serde(flatten)]
    pub ports: PortMap,
    pub input_vlens: Vec<usize>,
    pub output_vlens: Vec<usize>,
    pub reg_widths: Vec<u32>,
}

impl BlockConfig {
    pub fn new(component: &str, params: &ParameterSet, ports: &PortMap) -> Self {
        Self {
            component: component.to_string(),
            params: params.clone(),
            input_vlens: ports.input_vlens(),
            output_vlens: ports.output_vlens(),
            reg_widths: ports.register_widths(),
            ports: ports.clone(),
        }
    }
}
