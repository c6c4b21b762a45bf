// This module turns the port declarations found in a verilated C++ header into
// the structured bus/register model the rest of the adapter works with. The
// header declares every top-level port with a VL_IN/VL_OUT macro; each line is
// parsed into a (direction, name, width) tuple and classified by name suffix
// into clocks, resets, streaming buses and debug registers. Classification is
// strict: a signal that fits no category, a handshake signal with the wrong
// width, or a bus missing its valid/ready pair is a fatal configuration error.
// Buses and registers are sorted by name so word and register indices are
// deterministic, which is the ordering contract callers rely on when they
// supply buffer lists or look registers up by index.

//! Signal layout discovery for verilated circuit models.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AdapterError, AdapterResult};

/// Carrier width of one buffer word.
pub const WORD_BITS: u32 = 32;

/// Number of 32-bit words needed to carry `width` bits; 0 for an absent field.
pub fn words(width: u32) -> usize {
    ((width + WORD_BITS - 1) / WORD_BITS) as usize
}

/// Port direction as declared by the circuit compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn flipped(self) -> Self {
        match self {
            Direction::In => Direction::Out,
            Direction::Out => Direction::In,
        }
    }
}

/// One streaming channel: a group of signals sharing a prefix and ending in
/// the handshake/payload suffixes tvalid, tready, tdata, tuser, tlast.
///
/// Field values are bit widths, 0 when the signal is absent. Validity and
/// readiness are mandatory and always 1 bit, so only the payload widths are
/// recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bus {
    pub name: String,
    pub tdata: u32,
    pub tuser: u32,
    pub tlast: u32,
}

impl Bus {
    /// Words per transfer: each payload field is rounded up to whole words
    /// independently (a 1-bit tlast still occupies a full word).
    pub fn vlen(&self) -> usize {
        words(self.tdata) + words(self.tuser) + words(self.tlast)
    }
}

/// An internal state-exposure point, grouped from the dout/din/dset suffixes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    pub name: String,
    pub width: u32,
    pub dout: bool,
    pub din: bool,
    pub dset: bool,
}

/// The resolved signal layout of one circuit configuration.
///
/// All lists are sorted by name; bus and register positions in these lists
/// are the indices used on the native call boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMap {
    pub clocks: Vec<String>,
    pub resets: Vec<String>,
    pub resetns: Vec<String>,
    pub inputs: Vec<Bus>,
    pub outputs: Vec<Bus>,
    pub registers: Vec<Register>,
}

impl PortMap {
    pub fn input_vlens(&self) -> Vec<usize> {
        self.inputs.iter().map(Bus::vlen).collect()
    }

    pub fn output_vlens(&self) -> Vec<usize> {
        self.outputs.iter().map(Bus::vlen).collect()
    }

    pub fn register_widths(&self) -> Vec<u32> {
        self.registers.iter().map(|r| r.width).collect()
    }
}

/// Parse one header line of the form `VL_IN8(name,msb,0)` / `VL_OUT(...)` /
/// `VL_INW(name,msb,0,words)`. Returns `None` for lines that do not match
/// the port-macro pattern; those are ignored by the caller.
pub fn parse_port_line(line: &str) -> Option<(Direction, String, u32)> {
    let rest = line.trim_start().strip_prefix("VL_")?;
    let (direction, rest) = if let Some(r) = rest.strip_prefix("IN") {
        (Direction::In, r)
    } else if let Some(r) = rest.strip_prefix("OUT") {
        (Direction::Out, r)
    } else {
        return None;
    };

    // Optional storage-class suffix between the macro name and the argument
    // list: 8, 16, 32, 64 for packed scalars, W for wide word arrays.
    let rest = ["8", "16", "32", "64", "W"]
        .iter()
        .find_map(|s| rest.strip_prefix(s))
        .unwrap_or(rest);

    let rest = rest.strip_prefix('(')?;
    let args = &rest[..rest.find(')')?];
    let mut parts = args.split(',');

    let name = parts.next()?.trim();
    if name.is_empty()
        || !name
            .bytes()
            .all(|b| b == b'_' || b.is_ascii_alphanumeric())
    {
        return None;
    }
    let msb: u32 = parts.next()?.trim().parse().ok()?;
    let lsb: u32 = parts.next()?.trim().parse().ok()?;
    if let Some(extra) = parts.next() {
        // The W variant carries a trailing word count and nothing more.
        extra.trim().parse::<u32>().ok()?;
        if parts.next().is_some() {
            return None;
        }
    }
    if lsb != 0 {
        return None;
    }

    Some((direction, name.to_string(), msb + 1))
}

const BUS_ROLES: [&str; 5] = ["tvalid", "tready", "tdata", "tuser", "tlast"];
const REG_ROLES: [&str; 3] = ["dout", "din", "dset"];

#[derive(Default)]
struct BusAcc {
    direction: Option<Direction>,
    tvalid: Option<u32>,
    tready: Option<u32>,
    tdata: Option<u32>,
    tuser: Option<u32>,
    tlast: Option<u32>,
}

#[derive(Default)]
struct RegAcc {
    width: Option<u32>,
    dout: bool,
    din: bool,
    dset: bool,
}

/// Classify a list of declared ports into a [`PortMap`].
///
/// Classification order: clock suffix, reset suffix, active-low reset
/// suffix, bus suffix, register suffix; anything else is a fatal
/// unrecognized-signal error. Suffix matching is case-insensitive, names
/// keep their declared case.
pub fn build_port_map(
    signals: impl IntoIterator<Item = (Direction, String, u32)>,
) -> AdapterResult<PortMap> {
    let mut clocks = Vec::new();
    let mut resets = Vec::new();
    let mut resetns = Vec::new();
    let mut buses: HashMap<String, BusAcc> = HashMap::new();
    let mut regs: HashMap<String, RegAcc> = HashMap::new();

    for (direction, name, width) in signals {
        let lname = name.to_ascii_lowercase();

        if lname.ends_with("clock") || lname.ends_with("clk") {
            expect_scalar_input(&name, direction, width, "clock")?;
            clocks.push(name);
        } else if lname.ends_with("reset") || lname.ends_with("rst") {
            expect_scalar_input(&name, direction, width, "reset")?;
            resets.push(name);
        } else if lname.ends_with("resetn") || lname.ends_with("rstn") {
            expect_scalar_input(&name, direction, width, "resetn")?;
            resetns.push(name);
        } else if let Some((bus, role)) = split_suffix(&name, &lname, &BUS_ROLES) {
            classify_bus_signal(&mut buses, bus, role, direction, &name, width)?;
        } else if let Some((reg, role)) = split_suffix(&name, &lname, &REG_ROLES) {
            classify_reg_signal(&mut regs, reg, role, direction, &name, width)?;
        } else {
            return Err(AdapterError::UnrecognizedSignal { name });
        }
    }

    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    for (name, acc) in buses {
        if acc.tvalid.is_none() {
            return Err(AdapterError::MissingHandshake {
                bus: name,
                role: "tvalid",
            });
        }
        if acc.tready.is_none() {
            return Err(AdapterError::MissingHandshake {
                bus: name,
                role: "tready",
            });
        }
        let bus = Bus {
            name,
            tdata: acc.tdata.unwrap_or(0),
            tuser: acc.tuser.unwrap_or(0),
            tlast: acc.tlast.unwrap_or(0),
        };
        match acc.direction.unwrap_or(Direction::In) {
            Direction::In => inputs.push(bus),
            Direction::Out => outputs.push(bus),
        }
    }

    let mut registers = Vec::new();
    for (name, acc) in regs {
        if acc.din && !acc.dset {
            return Err(AdapterError::MissingStrobe { name });
        }
        registers.push(Register {
            name,
            width: acc.width.unwrap_or(0),
            dout: acc.dout,
            din: acc.din,
            dset: acc.dset,
        });
    }

    clocks.sort();
    resets.sort();
    resetns.sort();
    inputs.sort_by(|a, b| a.name.cmp(&b.name));
    outputs.sort_by(|a, b| a.name.cmp(&b.name));
    registers.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(PortMap {
        clocks,
        resets,
        resetns,
        inputs,
        outputs,
        registers,
    })
}

/// Read a verilated header and resolve its port layout. Lines that are not
/// port declarations are skipped; declarations that cannot be classified
/// fail the whole parse.
pub fn parse_metadata(path: &Path) -> AdapterResult<PortMap> {
    let text = fs::read_to_string(path)?;
    build_port_map(text.lines().filter_map(parse_port_line))
}

fn expect_scalar_input(
    name: &str,
    direction: Direction,
    width: u32,
    role: &'static str,
) -> AdapterResult<()> {
    if direction != Direction::In {
        return Err(AdapterError::SignalDirection {
            name: name.to_string(),
            role,
        });
    }
    if width != 1 {
        return Err(AdapterError::WidthMismatch {
            name: name.to_string(),
            width,
        });
    }
    Ok(())
}

/// Match `name` against `prefix_<role>` for any of the given roles, using the
/// lowercased name for the comparison. Returns the prefix with its original
/// case plus the matched role.
fn split_suffix<'a>(
    name: &str,
    lname: &str,
    roles: &[&'a str],
) -> Option<(String, &'a str)> {
    for &role in roles {
        let tail = format!("_{}", role);
        if lname.ends_with(&tail) && lname.len() > tail.len() {
            return Some((name[..name.len() - tail.len()].to_string(), role));
        }
    }
    None
}

fn classify_bus_signal(
    buses: &mut HashMap<String, BusAcc>,
    bus: String,
    role: &'static str,
    direction: Direction,
    name: &str,
    width: u32,
) -> AdapterResult<()> {
    if matches!(role, "tvalid" | "tready" | "tlast") && width != 1 {
        return Err(AdapterError::WidthMismatch {
            name: name.to_string(),
            width,
        });
    }

    // Readiness flows against the bus: an input bus's tready is an output of
    // the circuit and vice versa.
    let effective = if role == "tready" {
        direction.flipped()
    } else {
        direction
    };

    let acc = buses.entry(bus.clone()).or_default();
    match acc.direction {
        None => acc.direction = Some(effective),
        Some(d) if d != effective => {
            return Err(AdapterError::DirectionConflict { bus });
        }
        Some(_) => {}
    }

    let slot = match role {
        "tvalid" => &mut acc.tvalid,
        "tready" => &mut acc.tready,
        "tdata" => &mut acc.tdata,
        "tuser" => &mut acc.tuser,
        _ => &mut acc.tlast,
    };
    if slot.is_some() {
        return Err(AdapterError::DuplicateRole { bus, role });
    }
    *slot = Some(width);
    Ok(())
}

fn classify_reg_signal(
    regs: &mut HashMap<String, RegAcc>,
    reg: String,
    role: &'static str,
    direction: Direction,
    name: &str,
    width: u32,
) -> AdapterResult<()> {
    let expected = if role == "dout" {
        Direction::Out
    } else {
        Direction::In
    };
    if direction != expected {
        return Err(AdapterError::SignalDirection {
            name: name.to_string(),
            role,
        });
    }

    let acc = regs.entry(reg.clone()).or_default();
    let flag = match role {
        "dout" => &mut acc.dout,
        "din" => &mut acc.din,
        _ => &mut acc.dset,
    };
    if *flag {
        return Err(AdapterError::DuplicateRole { bus: reg, role });
    }
    *flag = true;

    if role == "dset" {
        if width != 1 {
            return Err(AdapterError::WidthMismatch {
                name: name.to_string(),
                width,
            });
        }
        return Ok(());
    }

    if width > 64 {
        return Err(AdapterError::RegisterTooWide { name: reg, width });
    }
    match acc.width {
        None => acc.width = Some(width),
        Some(w) if w != width => {
            return Err(AdapterError::RegisterWidthConflict {
                name: reg,
                first: w,
                second: width,
            });
        }
        Some(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(dir: Direction, name: &str, width: u32) -> (Direction, String, u32) {
        (dir, name.to_string(), width)
    }

    #[test]
    fn test_parse_port_line_variants() {
        assert_eq!(
            parse_port_line("    VL_IN8(clk,0,0);"),
            Some((Direction::In, "clk".to_string(), 1))
        );
        assert_eq!(
            parse_port_line("VL_OUT(out_tdata,31,0);"),
            Some((Direction::Out, "out_tdata".to_string(), 32))
        );
        assert_eq!(
            parse_port_line("VL_IN64(in_tdata,63,0);"),
            Some((Direction::In, "in_tdata".to_string(), 64))
        );
        assert_eq!(
            parse_port_line("VL_INW(in_tdata,95,0,3);"),
            Some((Direction::In, "in_tdata".to_string(), 96))
        );
    }

    #[test]
    fn test_parse_port_line_ignores_noise() {
        assert_eq!(parse_port_line("#include \"verilated.h\""), None);
        assert_eq!(parse_port_line("VL_SIG(foo,3,0);"), None);
        assert_eq!(parse_port_line("// VL_commentary"), None);
        // non-zero lsb is outside the supported pattern
        assert_eq!(parse_port_line("VL_IN(in_tdata,15,8);"), None);
        assert_eq!(parse_port_line("VL_IN8(&clk,0,0);"), None);
    }

    fn copy_circuit() -> Vec<(Direction, String, u32)> {
        vec![
            sig(Direction::In, "clk", 1),
            sig(Direction::In, "rst", 1),
            sig(Direction::In, "in_tvalid", 1),
            sig(Direction::Out, "in_tready", 1),
            sig(Direction::In, "in_tdata", 32),
            sig(Direction::Out, "out_tvalid", 1),
            sig(Direction::In, "out_tready", 1),
            sig(Direction::Out, "out_tdata", 32),
        ]
    }

    #[test]
    fn test_copy_circuit_classification() {
        let map = build_port_map(copy_circuit()).unwrap();
        assert_eq!(map.clocks, vec!["clk"]);
        assert_eq!(map.resets, vec!["rst"]);
        assert!(map.resetns.is_empty());
        assert_eq!(map.inputs.len(), 1);
        assert_eq!(map.inputs[0].name, "in");
        assert_eq!(map.inputs[0].tdata, 32);
        assert_eq!(map.outputs.len(), 1);
        assert_eq!(map.outputs[0].name, "out");
        assert_eq!(map.input_vlens(), vec![1]);
        assert_eq!(map.output_vlens(), vec![1]);
    }

    #[test]
    fn test_word_count_monotonicity() {
        for (width, expect) in [(1, 1), (31, 1), (32, 1), (33, 2), (64, 2), (65, 3), (96, 3)] {
            let bus = Bus {
                name: "b".into(),
                tdata: width,
                tuser: 0,
                tlast: 0,
            };
            assert_eq!(bus.vlen(), expect, "width {}", width);
        }
    }

    #[test]
    fn test_vlen_sums_fields_independently() {
        let bus = Bus {
            name: "b".into(),
            tdata: 33,
            tuser: 4,
            tlast: 1,
        };
        assert_eq!(bus.vlen(), 4);
    }

    #[test]
    fn test_deterministic_ordering() {
        let mut signals = copy_circuit();
        signals.extend([
            sig(Direction::In, "aux_tvalid", 1),
            sig(Direction::Out, "aux_tready", 1),
            sig(Direction::In, "aux_tdata", 8),
        ]);
        let forward = build_port_map(signals.clone()).unwrap();
        signals.reverse();
        let backward = build_port_map(signals).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward.inputs[0].name, "aux");
        assert_eq!(forward.inputs[1].name, "in");
    }

    #[test]
    fn test_suffix_matching_is_case_insensitive() {
        let map = build_port_map(vec![
            sig(Direction::In, "CLK", 1),
            sig(Direction::In, "RST", 1),
            sig(Direction::In, "In_TVALID", 1),
            sig(Direction::Out, "In_TREADY", 1),
        ])
        .unwrap();
        assert_eq!(map.clocks, vec!["CLK"]);
        assert_eq!(map.inputs[0].name, "In");
    }

    #[test]
    fn test_unrecognized_signal_fails() {
        let err = build_port_map(vec![sig(Direction::In, "mystery", 4)]).unwrap_err();
        assert!(matches!(err, AdapterError::UnrecognizedSignal { name } if name == "mystery"));
    }

    #[test]
    fn test_wide_handshake_fails() {
        let err = build_port_map(vec![sig(Direction::In, "in_tvalid", 2)]).unwrap_err();
        assert!(matches!(err, AdapterError::WidthMismatch { width: 2, .. }));
    }

    #[test]
    fn test_missing_ready_fails() {
        let err = build_port_map(vec![
            sig(Direction::In, "in_tvalid", 1),
            sig(Direction::In, "in_tdata", 8),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            AdapterError::MissingHandshake { role: "tready", .. }
        ));
    }

    #[test]
    fn test_duplicate_role_fails() {
        let err = build_port_map(vec![
            sig(Direction::In, "in_tdata", 8),
            sig(Direction::In, "in_tdata", 8),
        ])
        .unwrap_err();
        assert!(matches!(err, AdapterError::DuplicateRole { role: "tdata", .. }));
    }

    #[test]
    fn test_direction_conflict_fails() {
        // in_tready as a circuit input would make the bus an output bus,
        // conflicting with in_tvalid driving it as an input bus.
        let err = build_port_map(vec![
            sig(Direction::In, "in_tvalid", 1),
            sig(Direction::In, "in_tready", 1),
        ])
        .unwrap_err();
        assert!(matches!(err, AdapterError::DirectionConflict { bus } if bus == "in"));
    }

    #[test]
    fn test_register_grouping() {
        let map = build_port_map(vec![
            sig(Direction::Out, "counter_dout", 32),
            sig(Direction::Out, "sample_dout", 16),
            sig(Direction::In, "sample_din", 16),
            sig(Direction::In, "sample_dset", 1),
        ])
        .unwrap();
        assert_eq!(map.register_widths(), vec![32, 16]);
        assert_eq!(map.registers[0].name, "counter");
        assert!(map.registers[0].dout && !map.registers[0].din);
        assert!(map.registers[1].din && map.registers[1].dset);
    }

    #[test]
    fn test_din_without_strobe_fails() {
        let err = build_port_map(vec![sig(Direction::In, "gain_din", 8)]).unwrap_err();
        assert!(matches!(err, AdapterError::MissingStrobe { name } if name == "gain"));
    }

    #[test]
    fn test_register_width_rules() {
        let err = build_port_map(vec![sig(Direction::Out, "wide_dout", 65)]).unwrap_err();
        assert!(matches!(err, AdapterError::RegisterTooWide { width: 65, .. }));

        let err = build_port_map(vec![
            sig(Direction::Out, "gain_dout", 8),
            sig(Direction::In, "gain_din", 16),
            sig(Direction::In, "gain_dset", 1),
        ])
        .unwrap_err();
        assert!(matches!(err, AdapterError::RegisterWidthConflict { .. }));
    }
}
