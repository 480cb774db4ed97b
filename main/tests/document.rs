//! Document emission tests over a small synthetic image.
//!
//! Downstream consumers path into the JSON by field name, so these tests pin
//! the shapes they rely on: attribute maps keyed by DW_AT_* names, location
//! objects tagged by kind, unwind rows keyed by register number.

use object::Architecture;
use serde_json::Value;

use parser::{File, Sections};

fn uleb(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

fn abbrev_decl(
    out: &mut Vec<u8>,
    code: u64,
    tag: gimli::DwTag,
    has_children: bool,
    attrs: &[(gimli::DwAt, gimli::DwForm)],
) {
    uleb(out, code);
    uleb(out, u64::from(tag.0));
    out.push(u8::from(has_children));
    for &(at, form) in attrs {
        uleb(out, u64::from(at.0));
        uleb(out, u64::from(form.0));
    }
    out.push(0);
    out.push(0);
}

/// One unit: a subprogram holding a variable at a literal address, a
/// variable with an unknown opcode in its expression, and a register-located
/// variable (trivial expression).
fn build_image() -> (Vec<u8>, Vec<u8>) {
    let mut abbrev = Vec::new();
    abbrev_decl(
        &mut abbrev,
        1,
        gimli::DW_TAG_compile_unit,
        true,
        &[(gimli::DW_AT_name, gimli::DW_FORM_string)],
    );
    abbrev_decl(
        &mut abbrev,
        2,
        gimli::DW_TAG_subprogram,
        true,
        &[(gimli::DW_AT_name, gimli::DW_FORM_string)],
    );
    abbrev_decl(
        &mut abbrev,
        3,
        gimli::DW_TAG_variable,
        false,
        &[
            (gimli::DW_AT_name, gimli::DW_FORM_string),
            (gimli::DW_AT_location, gimli::DW_FORM_exprloc),
        ],
    );
    abbrev.push(0);

    let mut body = Vec::new();
    let mut die = |code: u64, name: &str, expr: Option<&[u8]>| {
        uleb(&mut body, code);
        body.extend_from_slice(name.as_bytes());
        body.push(0);
        if let Some(expr) = expr {
            uleb(&mut body, expr.len() as u64);
            body.extend_from_slice(expr);
        }
    };
    die(1, "emit.c", None);
    die(2, "main", None);
    // DW_OP_addr 0x2010
    die(
        3,
        "at_addr",
        Some(&[
            gimli::DW_OP_addr.0,
            0x10,
            0x20,
            0x00,
            0x00,
            0x00,
            0x00,
            0x00,
            0x00,
        ]),
    );
    // An unassigned opcode byte.
    die(3, "broken", Some(&[0xab]));
    // DW_OP_reg5: a trivial single-opcode expression.
    die(3, "in_reg", Some(&[gimli::DW_OP_reg0.0 + 5]));
    body.push(0); // close subprogram
    body.push(0); // close unit

    let mut info = Vec::new();
    info.extend_from_slice(&((7 + body.len()) as u32).to_le_bytes());
    info.extend_from_slice(&4u16.to_le_bytes());
    info.extend_from_slice(&0u32.to_le_bytes());
    info.push(8);
    info.extend_from_slice(&body);
    (abbrev, info)
}

fn frame_section() -> Vec<u8> {
    // CIE: version 1, "", code align 1, data align -8, RA 16,
    // DW_CFA_def_cfa r7+8; FDE [0x1000,0x1010): advance 4, RA at cfa-8.
    let cie = [
        0x01, 0x00, 0x01, 0x78, 0x10, //
        0x0c, 0x07, 0x08, //
        0x00, 0x00, 0x00,
    ];
    let fde = [
        0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
        0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
        0x44, 0x90, 0x01, //
        0x00,
    ];
    let mut out = Vec::new();
    out.extend_from_slice(&((cie.len() + 4) as u32).to_le_bytes());
    out.extend_from_slice(&u32::MAX.to_le_bytes());
    out.extend_from_slice(&cie);
    out.extend_from_slice(&((fde.len() + 4) as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&fde);
    out
}

fn document_with(options: &dwex::Options, frame: bool) -> Value {
    let (abbrev, info) = build_image();
    let frame_bytes = frame_section();
    let sections = Sections {
        debug_info: &info,
        debug_abbrev: &abbrev,
        debug_frame: if frame { &frame_bytes } else { &[] },
        ..Sections::default()
    };
    let file = File::from_sections("emit-test", Architecture::X86_64, &sections).unwrap();
    dwex::document(&file, options)
}

fn variables(doc: &Value) -> &Vec<Value> {
    doc["units"][0]["root"]["children"][0]["children"]
        .as_array()
        .expect("subprogram children")
}

#[test]
fn resolved_locations_are_pathable() {
    let doc = document_with(&dwex::Options::default(), false);

    assert_eq!(doc["units"][0]["name"], "emit.c");
    assert_eq!(doc["units"][0]["root"]["tag"], "DW_TAG_compile_unit");

    let vars = variables(&doc);
    assert_eq!(vars.len(), 3);
    let location = &vars[0]["attributes"]["DW_AT_location"]["location"];
    assert_eq!(location["kind"], "address");
    assert_eq!(location["address"], 0x2010);

    let in_reg = &vars[2]["attributes"]["DW_AT_location"]["location"];
    assert_eq!(in_reg["kind"], "register");
    assert_eq!(in_reg["register"], 5);
    assert_eq!(in_reg["name"], "rdi");
}

#[test]
fn unknown_opcode_marks_only_that_attribute() {
    let doc = document_with(&dwex::Options::default(), false);
    let vars = variables(&doc);

    let broken = &vars[1];
    assert_eq!(broken["attributes"]["DW_AT_name"]["value"], "broken");
    let location = &broken["attributes"]["DW_AT_location"]["location"];
    assert_eq!(location["kind"], "unresolved");
    assert_eq!(location["error"]["kind"], "UnsupportedOpcode");

    // The failure also lands in the run-level summary.
    let errors = doc["errors"].as_array().unwrap();
    assert!(errors
        .iter()
        .any(|e| e["kind"] == "UnsupportedOpcode"));
    // And the sibling attributes are untouched.
    assert_eq!(
        vars[0]["attributes"]["DW_AT_location"]["location"]["kind"],
        "address"
    );
}

#[test]
fn raw_mode_emits_bytecode() {
    let options = dwex::Options {
        raw_expressions: true,
        ..dwex::Options::default()
    };
    let doc = document_with(&options, false);
    let vars = variables(&doc);
    assert_eq!(
        vars[0]["attributes"]["DW_AT_location"]["bytes"],
        "031020000000000000"
    );
    assert!(vars[0]["attributes"]["DW_AT_location"]
        .get("location")
        .is_none());
}

#[test]
fn complex_only_suppresses_trivial_expressions() {
    let options = dwex::Options {
        complex_only: true,
        ..dwex::Options::default()
    };
    let doc = document_with(&options, false);
    let vars = variables(&doc);
    // A single DW_OP_reg5 is trivial.
    assert_eq!(
        vars[2]["attributes"]["DW_AT_location"]["suppressed"],
        true
    );
    // A single DW_OP_addr is trivial too.
    assert_eq!(
        vars[0]["attributes"]["DW_AT_location"]["suppressed"],
        true
    );
}

#[test]
fn no_traverse_emits_unit_metadata_only() {
    let options = dwex::Options {
        no_traverse: true,
        ..dwex::Options::default()
    };
    let doc = document_with(&options, false);
    let root = &doc["units"][0]["root"];
    // Root attributes are still resolved, children are omitted entirely.
    assert_eq!(root["attributes"]["DW_AT_name"]["value"], "emit.c");
    assert!(root.get("children").is_none());
}

#[test]
fn frame_info_attaches_unwind_rows() {
    let options = dwex::Options {
        frame_info: true,
        ..dwex::Options::default()
    };
    let doc = document_with(&options, true);

    let frame = &doc["frame"];
    assert_eq!(frame["section"], ".debug_frame");
    assert_eq!(frame["cies"].as_array().unwrap().len(), 1);

    let fde = &frame["fdes"][0];
    assert_eq!(fde["initial_location"], 0x1000);
    let rows = fde["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["start"], 0x1000);
    assert_eq!(rows[0]["end"], 0x1004);
    assert_eq!(rows[0]["cfa"]["rule"], "register_offset");
    assert_eq!(rows[0]["cfa"]["register"], 7);
    assert_eq!(rows[1]["start"], 0x1004);
    assert_eq!(rows[1]["end"], 0x1010);
    assert_eq!(rows[1]["registers"]["16"]["rule"], "offset");
    assert_eq!(rows[1]["registers"]["16"]["offset"], -8);
}

#[test]
fn frame_is_omitted_unless_requested() {
    let doc = document_with(&dwex::Options::default(), true);
    assert!(doc.get("frame").is_none());
}
