//! Serializes the parsed model into the output document.
//!
//! The walk mirrors the depth-first order the tree was built in. Nothing in
//! here fails: attributes that could not be resolved are emitted as explicit
//! markers, and every diagnostic lands both on its record and in the
//! run-level summary.

use log::debug;
use serde_json::{json, Map, Value};

use parser::{
    evaluate, operation_count, AttrValue, CfaRule, CompileUnit, Diagnostic, Die, DwAt,
    EvalContext, FrameSection, Location, Register, RegisterRule,
};

use crate::Options;

/// Builds the whole document for one extracted file.
pub fn document(file: &parser::File<'_>, options: &Options) -> Value {
    let mut emitter = Emitter {
        file,
        options,
        errors: Vec::new(),
    };

    let mut units = Vec::new();
    for unit in file.units() {
        units.push(emitter.unit(unit));
    }

    let frame = if options.frame_info {
        file.frame().map(|frame| emitter.frame(frame))
    } else {
        None
    };

    for diagnostic in file.diagnostics() {
        emitter.record(None, diagnostic);
    }

    let mut doc = Map::new();
    doc.insert("file".into(), json!(file.path()));
    doc.insert("machine".into(), json!(format!("{:?}", file.machine())));
    doc.insert("address_size".into(), json!(file.address_size()));
    doc.insert("units".into(), Value::Array(units));
    if let Some(frame) = frame {
        doc.insert("frame".into(), frame);
    }
    doc.insert("errors".into(), Value::Array(emitter.errors));
    Value::Object(doc)
}

struct Emitter<'a, 'input> {
    file: &'a parser::File<'input>,
    options: &'a Options,
    /// The run-level failure summary.
    errors: Vec<Value>,
}

impl<'a, 'input> Emitter<'a, 'input> {
    fn record(&mut self, sink: Option<&mut Vec<Value>>, diagnostic: &Diagnostic) {
        let value = json!({
            "kind": diagnostic.kind(),
            "scope": diagnostic.scope,
            "message": diagnostic.error.to_string(),
        });
        if let Some(sink) = sink {
            sink.push(value.clone());
        }
        self.errors.push(value);
    }

    fn push_error(&mut self, scope: String, kind: &'static str, message: String) {
        self.errors.push(json!({
            "kind": kind,
            "scope": scope,
            "message": message,
        }));
    }

    fn unit(&mut self, unit: &CompileUnit<'input>) -> Value {
        let mut errors = Vec::new();
        for diagnostic in &unit.diagnostics {
            self.record(Some(&mut errors), diagnostic);
        }

        let root = match unit.root_die() {
            Some(root) => self.die(unit, root),
            None => Value::Null,
        };

        let mut obj = Map::new();
        obj.insert("offset".into(), json!(unit.offset));
        obj.insert("version".into(), json!(unit.version));
        obj.insert("address_size".into(), json!(unit.address_size));
        obj.insert("offset_size".into(), json!(unit.offset_size));
        obj.insert("abbrev_offset".into(), json!(unit.abbrev_offset));
        if let Some(name) = unit.name() {
            obj.insert("name".into(), json!(name));
        }
        obj.insert("root".into(), root);
        obj.insert("errors".into(), Value::Array(errors));
        Value::Object(obj)
    }

    fn die(&mut self, unit: &CompileUnit<'input>, die: &Die<'input>) -> Value {
        let mut attrs = Map::new();
        for (at, value) in &die.attrs {
            attrs.insert(at.to_string(), self.attr(unit, die, *at, value));
        }

        let mut obj = Map::new();
        obj.insert("offset".into(), json!(die.offset));
        obj.insert("tag".into(), json!(die.tag.to_string()));
        obj.insert("attributes".into(), Value::Object(attrs));
        if !self.options.no_traverse {
            let mut children = Vec::new();
            for &child in &die.children {
                children.push(self.die(unit, unit.die(child)));
            }
            obj.insert("children".into(), Value::Array(children));
        }
        Value::Object(obj)
    }

    fn attr(
        &mut self,
        unit: &CompileUnit<'input>,
        die: &Die<'input>,
        at: DwAt,
        value: &AttrValue<'input>,
    ) -> Value {
        match value {
            AttrValue::Addr(value) => json!({ "kind": "address", "value": value }),
            AttrValue::Udata(value) => json!({ "kind": "udata", "value": value }),
            AttrValue::Sdata(value) => json!({ "kind": "sdata", "value": value }),
            AttrValue::Flag(value) => json!({ "kind": "flag", "value": value }),
            AttrValue::String(value) => json!({ "kind": "string", "value": value }),
            AttrValue::Block(bytes) => json!({ "kind": "block", "bytes": hex(bytes) }),
            AttrValue::SecOffset(value) => json!({ "kind": "sec_offset", "value": value }),
            AttrValue::TypeSignature(value) => {
                json!({ "kind": "type_signature", "value": value })
            }
            AttrValue::StrIndex(index) => json!({ "kind": "strx", "index": index }),
            AttrValue::AddrIndex(index) => json!({ "kind": "addrx", "index": index }),
            AttrValue::Ref(offset) => self.reference(*offset),
            AttrValue::Exprloc(bytes) => self.exprloc(unit, die, at, bytes),
        }
    }

    /// Reference attributes resolve through the global offset index; a miss
    /// was already diagnosed at parse time, so here it just becomes an
    /// explicit marker.
    fn reference(&mut self, offset: u64) -> Value {
        match self.file.index().resolve(offset) {
            Some(handle) => {
                let target = self.file.units()[handle.unit].die(handle.die);
                let mut resolved = Map::new();
                resolved.insert("tag".into(), json!(target.tag.to_string()));
                if let Some(name) = target.name() {
                    resolved.insert("name".into(), json!(name));
                }
                json!({ "kind": "ref", "offset": offset, "resolved": Value::Object(resolved) })
            }
            None => json!({ "kind": "ref", "offset": offset, "unresolved": true }),
        }
    }

    fn exprloc(
        &mut self,
        unit: &CompileUnit<'input>,
        die: &Die<'input>,
        at: DwAt,
        bytes: &[u8],
    ) -> Value {
        let address_size = if unit.address_size != 0 {
            unit.address_size
        } else {
            self.file.address_size()
        };

        let mut obj = Map::new();
        obj.insert("kind".into(), json!("exprloc"));

        if self.options.complex_only {
            let trivial = operation_count(bytes, self.file.endian(), address_size)
                .map(|count| count <= 1)
                .unwrap_or(false);
            if trivial {
                debug!(
                    "suppressing trivial {} expression of DIE at {:#x}",
                    at, die.offset
                );
                obj.insert("suppressed".into(), json!(true));
                return Value::Object(obj);
            }
        }

        if self.options.raw_expressions {
            obj.insert("bytes".into(), json!(hex(bytes)));
            return Value::Object(obj);
        }

        let ctx = EvalContext {
            address_size,
            ..EvalContext::default()
        };
        match evaluate(bytes, self.file.endian(), &ctx) {
            Ok(location) => {
                obj.insert("location".into(), self.location(&location));
            }
            Err(error) => {
                let scope = format!("{} of DIE at {:#x}", at, die.offset);
                obj.insert(
                    "location".into(),
                    json!({
                        "kind": "unresolved",
                        "error": { "kind": error.kind(), "message": error.to_string() },
                    }),
                );
                self.push_error(scope, error.kind(), error.to_string());
            }
        }
        Value::Object(obj)
    }

    fn location(&self, location: &Location<'_>) -> Value {
        match location {
            Location::Register { register } => self.register(*register),
            Location::Address { address } => json!({ "kind": "address", "address": address }),
            Location::Value { value } => json!({ "kind": "value", "value": value }),
            Location::ImplicitValue { bytes } => {
                json!({ "kind": "implicit_value", "bytes": hex(bytes) })
            }
            Location::Composite { pieces } => {
                let pieces: Vec<Value> = pieces
                    .iter()
                    .map(|piece| {
                        json!({
                            "byte_size": piece.byte_size,
                            "location": self.location(&piece.location),
                        })
                    })
                    .collect();
                json!({ "kind": "composite", "pieces": pieces })
            }
            Location::OptimizedOut => json!({ "kind": "optimized_out" }),
            Location::Unsupported { reason } => {
                json!({ "kind": "unsupported", "reason": reason })
            }
        }
    }

    fn register(&self, register: Register) -> Value {
        let mut obj = Map::new();
        obj.insert("kind".into(), json!("register"));
        obj.insert("register".into(), json!(register.0));
        if let Some(name) = self.file.register_name(register) {
            obj.insert("name".into(), json!(name));
        }
        Value::Object(obj)
    }

    fn frame(&mut self, frame: &FrameSection<'input>) -> Value {
        let mut errors = Vec::new();
        for diagnostic in &frame.diagnostics {
            self.record(Some(&mut errors), diagnostic);
        }

        let mut cies = Vec::new();
        for cie in frame.cies() {
            cies.push(json!({
                "offset": cie.offset,
                "version": cie.version,
                "augmentation": cie.augmentation,
                "code_alignment": cie.code_alignment,
                "data_alignment": cie.data_alignment,
                "return_address_register": self.register(cie.return_address_register),
            }));
        }

        let mut fdes = Vec::new();
        for fde in frame.fdes() {
            let mut obj = Map::new();
            obj.insert("offset".into(), json!(fde.offset));
            obj.insert("cie".into(), json!(fde.cie_offset));
            obj.insert("initial_location".into(), json!(fde.initial_location));
            obj.insert("address_range".into(), json!(fde.address_range));
            match frame.unwind_table(fde) {
                Ok(rows) => {
                    let rows: Vec<Value> = rows.iter().map(|row| self.row(row)).collect();
                    obj.insert("rows".into(), Value::Array(rows));
                }
                Err(error) => {
                    obj.insert(
                        "rows".into(),
                        json!({
                            "kind": "unresolved",
                            "error": { "kind": error.kind(), "message": error.to_string() },
                        }),
                    );
                    self.push_error(
                        format!("FDE at {:#x}", fde.offset),
                        error.kind(),
                        error.to_string(),
                    );
                }
            }
            fdes.push(Value::Object(obj));
        }

        json!({
            "section": frame.kind.section_name(),
            "cies": cies,
            "fdes": fdes,
            "errors": errors,
        })
    }

    fn row(&self, row: &parser::UnwindRow<'_>) -> Value {
        let cfa = match &row.cfa {
            CfaRule::Undefined => json!({ "rule": "undefined" }),
            CfaRule::RegisterAndOffset { register, offset } => {
                let mut obj = Map::new();
                obj.insert("rule".into(), json!("register_offset"));
                obj.insert("register".into(), json!(register.0));
                if let Some(name) = self.file.register_name(*register) {
                    obj.insert("name".into(), json!(name));
                }
                obj.insert("offset".into(), json!(offset));
                Value::Object(obj)
            }
            CfaRule::Expression(bytes) => self.rule_expression("expression", bytes),
        };

        let mut registers = Map::new();
        for (&number, rule) in &row.registers {
            registers.insert(number.to_string(), self.register_rule(rule));
        }

        json!({
            "start": row.start,
            "end": row.end,
            "cfa": cfa,
            "registers": registers,
        })
    }

    fn register_rule(&self, rule: &RegisterRule<'_>) -> Value {
        match rule {
            RegisterRule::Undefined => json!({ "rule": "undefined" }),
            RegisterRule::SameValue => json!({ "rule": "same_value" }),
            RegisterRule::Offset(offset) => json!({ "rule": "offset", "offset": offset }),
            RegisterRule::ValOffset(offset) => {
                json!({ "rule": "val_offset", "offset": offset })
            }
            RegisterRule::Register(register) => {
                let mut obj = Map::new();
                obj.insert("rule".into(), json!("register"));
                obj.insert("register".into(), json!(register.0));
                if let Some(name) = self.file.register_name(*register) {
                    obj.insert("name".into(), json!(name));
                }
                Value::Object(obj)
            }
            RegisterRule::Expression(bytes) => self.rule_expression("expression", bytes),
            RegisterRule::ValExpression(bytes) => self.rule_expression("val_expression", bytes),
        }
    }

    /// Expression-based frame rules go through the evaluator like any other
    /// expression; the CFA is not known statically, so these usually come
    /// back as `unsupported` unless the expression is self-contained.
    fn rule_expression(&self, rule: &'static str, bytes: &[u8]) -> Value {
        let mut obj = Map::new();
        obj.insert("rule".into(), json!(rule));
        if self.options.raw_expressions {
            obj.insert("bytes".into(), json!(hex(bytes)));
            return Value::Object(obj);
        }
        let ctx = EvalContext {
            address_size: self.file.address_size(),
            ..EvalContext::default()
        };
        match evaluate(bytes, self.file.endian(), &ctx) {
            Ok(location) => {
                obj.insert("location".into(), self.location(&location));
            }
            Err(error) => {
                obj.insert(
                    "location".into(),
                    json!({
                        "kind": "unresolved",
                        "error": { "kind": error.kind(), "message": error.to_string() },
                    }),
                );
            }
        }
        Value::Object(obj)
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}
