//! Layout discovery against an on-disk verilated header.

use std::fs;

use vaxis::ports::parse_metadata;
use vaxis::AdapterError;

const MONITOR_HEADER: &str = r#"// Verilated -*- C++ -*-
#ifndef _axis_monitor_H_
#define _axis_monitor_H_

#include "verilated_heavy.h"

class axis_monitor : public VerilatedModule {
  public:
    // PORTS
    VL_IN8(clk,0,0);
    VL_IN8(rst,0,0);
    VL_IN8(in_tvalid,0,0);
    VL_OUT8(in_tready,0,0);
    VL_IN8(in_tdata,7,0);
    VL_IN8(in_tlast,0,0);
    VL_OUT8(out_tvalid,0,0);
    VL_IN8(out_tready,0,0);
    VL_OUT8(out_tdata,7,0);
    VL_OUT8(out_tlast,0,0);
    VL_OUT(counter_dout,31,0);
    VL_OUT16(sample_dout,15,0);
    VL_IN16(sample_din,15,0);
    VL_IN8(sample_dset,0,0);

    // LOCAL SIGNALS
    IData axis_monitor__DOT__count;

    void eval();
};

#endif
"#;

#[test]
fn header_resolves_to_full_model() {
    let dir = tempfile::tempdir().unwrap();
    let header = dir.path().join("axis_monitor.h");
    fs::write(&header, MONITOR_HEADER).unwrap();

    let map = parse_metadata(&header).unwrap();

    assert_eq!(map.clocks, vec!["clk"]);
    assert_eq!(map.resets, vec!["rst"]);
    assert!(map.resetns.is_empty());

    assert_eq!(map.inputs.len(), 1);
    assert_eq!(map.inputs[0].name, "in");
    assert_eq!(map.inputs[0].tdata, 8);
    assert_eq!(map.inputs[0].tlast, 1);

    assert_eq!(map.outputs.len(), 1);
    assert_eq!(map.outputs[0].name, "out");

    // data and last each round up to a full word
    assert_eq!(map.input_vlens(), vec![2]);
    assert_eq!(map.output_vlens(), vec![2]);

    assert_eq!(map.register_widths(), vec![32, 16]);
    assert_eq!(map.registers[0].name, "counter");
    assert!(map.registers[0].dout);
    assert!(!map.registers[0].din);
    assert_eq!(map.registers[1].name, "sample");
    assert!(map.registers[1].din && map.registers[1].dset && map.registers[1].dout);
}

#[test]
fn non_port_lines_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let header = dir.path().join("quiet.h");
    fs::write(
        &header,
        "// nothing but commentary\nIData some__DOT__local;\n#define X 1\n",
    )
    .unwrap();

    let map = parse_metadata(&header).unwrap();
    assert!(map.clocks.is_empty());
    assert!(map.inputs.is_empty());
    assert!(map.outputs.is_empty());
    assert!(map.registers.is_empty());
}

#[test]
fn unclassifiable_port_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let header = dir.path().join("bad.h");
    fs::write(&header, "    VL_IN8(mystery_wire,0,0);\n").unwrap();

    let err = parse_metadata(&header).unwrap_err();
    assert!(matches!(
        err,
        AdapterError::UnrecognizedSignal { name } if name == "mystery_wire"
    ));
}

#[test]
fn missing_header_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = parse_metadata(&dir.path().join("absent.h")).unwrap_err();
    assert!(matches!(err, AdapterError::Io(_)));
}
