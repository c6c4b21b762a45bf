// This module renders the C++ glue layer that adapts one verilated circuit
// model to the buffer-oriented call protocol. The glue is generated from the
// validated bus/register model, never from raw signal strings: one wrapper
// template carries named section placeholders, and every section is produced
// by iterating the sorted port map. The emitted work_block function steps the
// circuit clock in a three-stage loop (load inputs and raise readiness, pulse
// the falling edge, capture outputs, pulse the rising edge, retire accepted
// inputs) until a fixed number of consecutive idle cycles shows that no more
// progress is possible, then writes the remaining item counts back into the
// size arrays. Word packing is fixed: fields up to 32 bits take one word,
// up to 64 bits two words low-word-first, wider fields one word per 32 bits
// with the final word masked to the declared width.

//! Glue-source generation for verilated stream adapters.

use crate::config::BlockConfig;
use crate::error::AdapterResult;
use crate::ports::{words, Bus};

/// Default idle bound: the work loop exits after this many consecutive
/// cycles without data movement.
pub const DEFAULT_IDLE_LIMIT: u32 = 100;

const WRAPPER_TEMPLATE: &str = r#"// Generated, do not modify!

#include <cassert>
#include "{component}.h"

const wchar_t *CONFIG = L"{config}";

extern "C" const wchar_t *config()
{
    return CONFIG;
}

struct Block
{
    const wchar_t *config = CONFIG;
    {component} impl;
};

extern "C" Block *create_block()
{
    return new Block();
}

extern "C" void destroy_block(Block *block)
{
    assert(block != nullptr && block->config == CONFIG);
    block->config = nullptr;
    delete block;
}

void set_clocks(Block *block, int value)
{
{set_clocks}}

void set_resets(Block *block, int value)
{
{set_resets}}

extern "C" void reset_block(Block *block)
{
    assert(block != nullptr && block->config == CONFIG);

    set_resets(block, 1);
{axis_disable}
    for (int i = 0; i < 4; i++)
    {
        set_clocks(block, i & 1);
        block->impl.eval();
    }

    set_resets(block, 0);
}

QData get_qdata(const int32_t *input)
{
    uint32_t data0 = input[0];
    uint32_t data1 = input[1];
    return ((uint64_t)data1 << 32) | data0;
}

void set_qdata(int32_t *output, QData data)
{
    output[0] = (uint64_t)data;
    output[1] = (uint64_t)data >> 32;
}

extern "C" void work_block(Block *block,
                           int64_t *input_sizes,
                           int64_t *output_sizes,
                           int32_t **input_items,
                           int32_t **output_items)
{
    assert(block != nullptr && block->config == CONFIG);

{read_sizes}
    int idle = 0;
    while (idle < {idle_limit})
    {
        idle += 1;

{axis_stage1}
        set_clocks(block, 0);
        block->impl.eval();

{axis_stage2}
        set_clocks(block, 1);
        block->impl.eval();

{axis_stage3}    }

{write_sizes}}

extern "C" uint64_t read_register(Block *block, uint32_t reg)
{
    assert(block != nullptr && block->config == CONFIG);
    uint64_t value = 0;

{read_regs}
    return value;
}

extern "C" void write_register(Block *block, uint32_t reg, uint64_t value)
{
    assert(block != nullptr && block->config == CONFIG);
    (void)reg;
    (void)value;

{write_regs}}
"#;

/// Render the complete wrapper source for one circuit configuration.
pub fn render_wrapper(config: &BlockConfig, idle_limit: u32) -> AdapterResult<String> {
    let sections = [
        ("component", config.component.clone()),
        ("config", escaped_config(config)?),
        ("idle_limit", idle_limit.to_string()),
        ("set_clocks", set_clocks(config)),
        ("set_resets", set_resets(config)),
        ("axis_disable", axis_disable(config)),
        ("read_sizes", read_sizes(config)),
        ("axis_stage1", axis_stage1(config)),
        ("axis_stage2", axis_stage2(config)),
        ("axis_stage3", axis_stage3(config)),
        ("write_sizes", write_sizes(config)),
        ("read_regs", read_regs(config)),
        ("write_regs", write_regs(config)),
    ];

    let mut out = WRAPPER_TEMPLATE.to_string();
    for (key, value) in sections {
        out = out.replace(&format!("{{{}}}", key), &value);
    }
    Ok(out)
}

/// The embedded config JSON, escaped for a C++ wide string literal.
fn escaped_config(config: &BlockConfig) -> AdapterResult<String> {
    let json = serde_json::to_string(config)?;
    Ok(json.replace('\\', "\\\\").replace('"', "\\\""))
}

fn mask32(width: u32) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1u32 << width) - 1
    }
}

fn mask64(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

fn set_clocks(config: &BlockConfig) -> String {
    let mut out = String::new();
    for name in &config.ports.clocks {
        out.push_str(&format!("    block->impl.{} = value;\n", name));
    }
    out
}

fn set_resets(config: &BlockConfig) -> String {
    let mut out = String::new();
    for name in &config.ports.resets {
        out.push_str(&format!("    block->impl.{} = value;\n", name));
    }
    for name in &config.ports.resetns {
        out.push_str(&format!(
            "    block->impl.{} = value == 0 ? 1 : 0;\n",
            name
        ));
    }
    out
}

fn axis_disable(config: &BlockConfig) -> String {
    let mut out = String::new();
    for bus in &config.ports.inputs {
        out.push_str(&format!("    block->impl.{}_tvalid = 0;\n", bus.name));
    }
    for bus in &config.ports.outputs {
        out.push_str(&format!("    block->impl.{}_tready = 0;\n", bus.name));
    }
    out
}

fn read_sizes(config: &BlockConfig) -> String {
    let mut out = String::new();
    for (idx, bus) in config.ports.inputs.iter().enumerate() {
        let name = &bus.name;
        out.push_str(&format!("    int64_t {name}_size = input_sizes[{idx}];\n"));
        out.push_str(&format!(
            "    const int32_t *{name}_data = input_items[{idx}];\n"
        ));
        out.push_str(&format!("    bool {name}_step;\n"));
    }
    for (idx, bus) in config.ports.outputs.iter().enumerate() {
        let name = &bus.name;
        out.push_str(&format!("    int64_t {name}_size = output_sizes[{idx}];\n"));
        out.push_str(&format!(
            "    int32_t *{name}_data = output_items[{idx}];\n"
        ));
    }
    out
}

/// Per-field input loads for one bus, advancing the word offset. Fields up
/// to 32 bits load one word, up to 64 bits two words through get_qdata,
/// wider fields one word per array element.
fn load_fields(bus: &Bus) -> String {
    let mut out = String::new();
    let name = &bus.name;
    let mut offset = 0usize;
    for (port, width) in [("tdata", bus.tdata), ("tuser", bus.tuser), ("tlast", bus.tlast)] {
        if width == 0 {
            continue;
        }
        if width <= 32 {
            out.push_str(&format!(
                "            block->impl.{name}_{port} = {name}_data[{offset}];\n"
            ));
            offset += 1;
        } else if width <= 64 {
            out.push_str(&format!(
                "            block->impl.{name}_{port} = get_qdata({name}_data + {offset});\n"
            ));
            offset += 2;
        } else {
            for index in 0..words(width) {
                out.push_str(&format!(
                    "            block->impl.{name}_{port}[{index}] = {name}_data[{offset}];\n"
                ));
                offset += 1;
            }
        }
    }
    debug_assert_eq!(offset, bus.vlen());
    out
}

/// Per-field output stores for one bus, each field masked to its declared
/// width.
fn store_fields(bus: &Bus) -> String {
    let mut out = String::new();
    let name = &bus.name;
    let mut offset = 0usize;
    for (port, width) in [("tdata", bus.tdata), ("tuser", bus.tuser), ("tlast", bus.tlast)] {
        if width == 0 {
            continue;
        }
        if width <= 32 {
            let mask = mask32(width);
            out.push_str(&format!(
                "            {name}_data[{offset}] = block->impl.{name}_{port} & 0x{mask:x}u;\n"
            ));
            offset += 1;
        } else if width <= 64 {
            let mask = mask64(width);
            out.push_str(&format!(
                "            set_qdata({name}_data + {offset}, block->impl.{name}_{port} & 0x{mask:x}ul);\n"
            ));
            offset += 2;
        } else {
            let count = words(width);
            for index in 0..count - 1 {
                out.push_str(&format!(
                    "            {name}_data[{offset}] = block->impl.{name}_{port}[{index}];\n"
                ));
                offset += 1;
            }
            let index = count - 1;
            let mask = mask32(width - 32 * (count as u32 - 1));
            out.push_str(&format!(
                "            {name}_data[{offset}] = block->impl.{name}_{port}[{index}] & 0x{mask:x}u;\n"
            ));
            offset += 1;
        }
    }
    debug_assert_eq!(offset, bus.vlen());
    out
}

fn axis_stage1(config: &BlockConfig) -> String {
    let mut out = String::new();
    for bus in &config.ports.inputs {
        let name = &bus.name;
        let vlen = bus.vlen();
        out.push_str(&format!(
            "        if (block->impl.{name}_tvalid == 0 && {name}_size > 0)\n"
        ));
        out.push_str("        {\n");
        out.push_str(&load_fields(bus));
        out.push_str(&format!("            block->impl.{name}_tvalid = 1;\n"));
        out.push_str(&format!("            {name}_data += {vlen};\n"));
        out.push_str(&format!("            {name}_size -= 1;\n"));
        out.push_str("            idle = 0;\n");
        out.push_str("        }\n");
    }
    for bus in &config.ports.outputs {
        let name = &bus.name;
        out.push_str(&format!(
            "        block->impl.{name}_tready = {name}_size > 0 ? 1 : 0;\n"
        ));
    }
    out
}

fn axis_stage2(config: &BlockConfig) -> String {
    let mut out = String::new();
    for bus in &config.ports.inputs {
        let name = &bus.name;
        out.push_str(&format!(
            "        {name}_step = (block->impl.{name}_tvalid != 0 && block->impl.{name}_tready != 0);\n"
        ));
    }
    for bus in &config.ports.outputs {
        let name = &bus.name;
        let vlen = bus.vlen();
        out.push_str(&format!(
            "        if (block->impl.{name}_tvalid != 0 && block->impl.{name}_tready != 0)\n"
        ));
        out.push_str("        {\n");
        out.push_str(&store_fields(bus));
        out.push_str(&format!("            {name}_data += {vlen};\n"));
        out.push_str(&format!("            {name}_size -= 1;\n"));
        out.push_str("            idle = 0;\n");
        out.push_str("        }\n");
    }
    out
}

fn axis_stage3(config: &BlockConfig) -> String {
    let mut out = String::new();
    for bus in &config.ports.inputs {
        let name = &bus.name;
        out.push_str(&format!("        if ({name}_step)\n"));
        out.push_str(&format!("            block->impl.{name}_tvalid = 0;\n"));
    }
    out
}

/// Write back the remaining (unconsumed/unfilled) counts; the bridge derives
/// consumed and produced as original minus remaining.
fn write_sizes(config: &BlockConfig) -> String {
    let mut out = String::new();
    for (idx, bus) in config.ports.inputs.iter().enumerate() {
        let name = &bus.name;
        out.push_str(&format!("    input_sizes[{idx}] = {name}_size;\n"));
    }
    for (idx, bus) in config.ports.outputs.iter().enumerate() {
        let name = &bus.name;
        out.push_str(&format!("    output_sizes[{idx}] = {name}_size;\n"));
    }
    out
}

fn read_regs(config: &BlockConfig) -> String {
    let mut out = String::new();
    for (idx, reg) in config.ports.registers.iter().enumerate() {
        if !reg.dout {
            continue;
        }
        let name = &reg.name;
        out.push_str(&format!("    if (reg == {idx})\n"));
        out.push_str(&format!("        value = block->impl.{name}_dout;\n"));
    }
    out
}

/// Register write path: mask the value to the declared width, drive din,
/// strobe dset across one full clock cycle, release and settle.
fn write_regs(config: &BlockConfig) -> String {
    let mut out = String::new();
    for (idx, reg) in config.ports.registers.iter().enumerate() {
        if !reg.din {
            continue;
        }
        let name = &reg.name;
        let mask = mask64(reg.width);
        out.push_str(&format!("    if (reg == {idx})\n"));
        out.push_str("    {\n");
        out.push_str(&format!(
            "        block->impl.{name}_din = value & 0x{mask:x}ul;\n"
        ));
        out.push_str(&format!("        block->impl.{name}_dset = 1;\n"));
        out.push_str("        for (int i = 0; i < 2; i++)\n");
        out.push_str("        {\n");
        out.push_str("            set_clocks(block, i & 1);\n");
        out.push_str("            block->impl.eval();\n");
        out.push_str("        }\n");
        out.push_str(&format!("        block->impl.{name}_dset = 0;\n"));
        out.push_str("        block->impl.eval();\n");
        out.push_str("    }\n");
    }
    out
}
