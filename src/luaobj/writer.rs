//! Property tree → luaobj.
//!
//! [`LuaObjWriter::compile`] turns an [`InibinFile`] into a chunk that
//! rebuilds it as a table in register 0:
//!
//! ```text
//! NEWTABLE R0
//! SETTABLE R0 K(key) K(value)          ; Lua Globals / Main Chunk sections
//! LOADK    R1 K(section)               ; every other section
//! NEWTABLE R2
//! SETTABLE R2 K(key) K(value) ...
//! SETTABLE R0 K(section) R2
//! RETURN   R0 2
//! ```
//!
//! A table filled in register `t` uses `t + 1` for a key and `t + 2` for a
//! value that cannot be an RK operand: a constant past index 255 or a
//! nested table.

use std::collections::HashMap;
use std::io::{Cursor, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::debug;

use super::opcode::{Instruction, Opcode, MAX_BX, MAX_RK_INDEX, RK_CONSTANT};
use super::{Chunk, Constant, LuaObjError, HEADER, TAG_BOOL, TAG_NIL, TAG_NUMBER, TAG_STRING};
use crate::model::{InibinFile, Table, TableKey, Value};

/// Source name stamped on compiled chunks.
pub const GENERATED_SOURCE: &str = "@Generated";
/// Section-name prefixes whose properties are set directly on the root table.
pub const ROOT_SECTION_PREFIXES: [&str; 2] = ["Lua Globals", "Main Chunk"];

/// Registers a compiled chunk may use; the rest of the 256-slot file is
/// left as headroom.
const REGISTER_LIMIT: usize = 250;

pub struct LuaObjWriter;

impl LuaObjWriter {
    /// Compile `file` and serialize the result, header included.
    pub fn write(file: &InibinFile) -> Result<Vec<u8>, LuaObjError> {
        let chunk = Self::compile(file)?;
        Self::serialize(&chunk)
    }

    pub fn compile(file: &InibinFile) -> Result<Chunk, LuaObjError> {
        let mut c = Compiler::default();
        c.emit(Instruction::abc(Opcode::NewTable, 0, 0, 0));

        for section in &file.sections {
            if ROOT_SECTION_PREFIXES.iter().any(|p| section.name.starts_with(p)) {
                for p in &section.properties {
                    c.field(0, &TableKey::parse(&p.display_name()), &p.value)?;
                }
                continue;
            }

            let key = c.constant(Constant::String(section.name.clone()));
            c.load_constant(1, key)?;
            c.emit(Instruction::abc(Opcode::NewTable, 2, 0, 0));
            c.touch(2)?;
            for p in &section.properties {
                c.field(2, &TableKey::parse(&p.display_name()), &p.value)?;
            }
            let key_op = if key <= MAX_RK_INDEX { key + RK_CONSTANT } else { 1 };
            c.emit(Instruction::abc(Opcode::SetTable, 0, key_op, 2));
        }

        c.emit(Instruction::abc(Opcode::Return, 0, 2, 0));

        let chunk = Chunk {
            source_name:    Some(GENERATED_SOURCE.to_owned()),
            is_vararg:      2,
            max_stack_size: (c.max_register + 1).max(2) as u8,
            instructions:   c.code,
            constants:      c.constants,
            ..Chunk::default()
        };
        debug!(
            sections = file.sections.len(),
            instructions = chunk.instructions.len(),
            constants = chunk.constants.len(),
            "compiled luaobj chunk"
        );
        Ok(chunk)
    }

    /// Serialize any chunk tree, prototypes and debug info included.
    pub fn serialize(chunk: &Chunk) -> Result<Vec<u8>, LuaObjError> {
        let mut out = Cursor::new(Vec::new());
        Self::serialize_to(chunk, &mut out)?;
        Ok(out.into_inner())
    }

    pub fn serialize_to<W: Write>(chunk: &Chunk, w: &mut W) -> Result<(), LuaObjError> {
        w.write_all(&HEADER)?;
        write_chunk(w, chunk)
    }
}

// ── Compiler ─────────────────────────────────────────────────────────────────

/// Dedup key for the constant pool; numbers compare by bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Nil,
    Bool(bool),
    Number(u64),
    String(String),
}

#[derive(Default)]
struct Compiler {
    code:         Vec<u32>,
    constants:    Vec<Constant>,
    index:        HashMap<ConstKey, usize>,
    max_register: usize,
}

impl Compiler {
    fn emit(&mut self, ins: Instruction) {
        self.code.push(ins.0);
    }

    fn touch(&mut self, reg: usize) -> Result<(), LuaObjError> {
        if reg >= REGISTER_LIMIT {
            return Err(LuaObjError::TableTooDeep);
        }
        self.max_register = self.max_register.max(reg);
        Ok(())
    }

    /// Pool index of `value`, adding it on first use.
    fn constant(&mut self, value: Constant) -> usize {
        let key = match &value {
            Constant::Nil       => ConstKey::Nil,
            Constant::Bool(b)   => ConstKey::Bool(*b),
            // -0.0 shares the 0.0 slot, as it would as a table key.
            Constant::Number(n) => ConstKey::Number(if *n == 0.0 { 0 } else { n.to_bits() }),
            Constant::String(s) => ConstKey::String(s.clone()),
        };
        let next = self.constants.len();
        let idx = *self.index.entry(key).or_insert(next);
        if idx == next {
            self.constants.push(value);
        }
        idx
    }

    fn load_constant(&mut self, reg: usize, idx: usize) -> Result<(), LuaObjError> {
        if idx > MAX_BX {
            return Err(LuaObjError::ConstantPoolOverflow(self.constants.len()));
        }
        self.touch(reg)?;
        self.emit(Instruction::abx(Opcode::LoadK, reg, idx));
        Ok(())
    }

    /// RK operand for constant `idx`, going through `scratch` when the index
    /// does not fit.
    fn constant_operand(&mut self, idx: usize, scratch: usize) -> Result<usize, LuaObjError> {
        if idx <= MAX_RK_INDEX {
            Ok(idx + RK_CONSTANT)
        } else {
            self.load_constant(scratch, idx)?;
            Ok(scratch)
        }
    }

    /// Emit `R[t][key] = value`.
    fn field(&mut self, t: usize, key: &TableKey, value: &Value) -> Result<(), LuaObjError> {
        let value_op = match value_constant(value) {
            Some(k) => {
                let idx = self.constant(k);
                self.constant_operand(idx, t + 2)?
            }
            None => {
                self.table(t + 2, value)?;
                t + 2
            }
        };
        let key_idx = self.constant(key_constant(key));
        let key_op = self.constant_operand(key_idx, t + 1)?;
        self.emit(Instruction::abc(Opcode::SetTable, t, key_op, value_op));
        Ok(())
    }

    /// Build a table for a vector or nested table value in register `t`.
    fn table(&mut self, t: usize, value: &Value) -> Result<(), LuaObjError> {
        self.touch(t)?;
        self.emit(Instruction::abc(Opcode::NewTable, t, 0, 0));
        match value {
            Value::Vec2(v) => self.array(t, v),
            Value::Vec3(v) => self.array(t, v),
            Value::Vec4(v) => self.array(t, v),
            Value::Table(entries) => self.entries(t, entries),
            _ => Ok(()),
        }
    }

    fn array(&mut self, t: usize, components: &[f32]) -> Result<(), LuaObjError> {
        for (i, c) in components.iter().enumerate() {
            self.field(t, &TableKey::Index(i as i64 + 1), &Value::Float(*c))?;
        }
        Ok(())
    }

    fn entries(&mut self, t: usize, entries: &Table) -> Result<(), LuaObjError> {
        for (k, v) in entries {
            self.field(t, k, v)?;
        }
        Ok(())
    }
}

fn key_constant(key: &TableKey) -> Constant {
    match key {
        TableKey::Index(i) => Constant::Number(*i as f64),
        TableKey::Name(n)  => Constant::String(n.clone()),
    }
}

/// Scalar values become constants; vectors and tables need a register.
fn value_constant(value: &Value) -> Option<Constant> {
    match value {
        Value::Int32(v)     => Some(Constant::Number(f64::from(*v))),
        Value::Float(v)     => Some(Constant::Number(f64::from(*v))),
        Value::ByteDiv10(v) => Some(Constant::Number(f64::from(*v))),
        Value::Int16(v)     => Some(Constant::Number(f64::from(*v))),
        Value::Byte(v)      => Some(Constant::Number(f64::from(*v))),
        Value::Bool(v)      => Some(Constant::Bool(*v)),
        Value::String(v)    => Some(Constant::String(v.clone())),
        Value::Vec2(_) | Value::Vec3(_) | Value::Vec4(_) | Value::Table(_) => None,
    }
}

// ── Serialization ────────────────────────────────────────────────────────────

fn write_count<W: Write>(w: &mut W, n: usize) -> Result<(), LuaObjError> {
    w.write_u32::<LittleEndian>(n as u32)?;
    Ok(())
}

fn write_chunk<W: Write>(w: &mut W, chunk: &Chunk) -> Result<(), LuaObjError> {
    write_string(w, chunk.source_name.as_deref())?;
    w.write_i32::<LittleEndian>(chunk.line_defined)?;
    w.write_i32::<LittleEndian>(chunk.last_line_defined)?;
    w.write_u8(chunk.upvalue_count)?;
    w.write_u8(chunk.param_count)?;
    w.write_u8(chunk.is_vararg)?;
    w.write_u8(chunk.max_stack_size)?;

    write_count(w, chunk.instructions.len())?;
    for ins in &chunk.instructions {
        w.write_u32::<LittleEndian>(*ins)?;
    }

    write_count(w, chunk.constants.len())?;
    for constant in &chunk.constants {
        match constant {
            Constant::Nil => w.write_u8(TAG_NIL)?,
            Constant::Bool(b) => {
                w.write_u8(TAG_BOOL)?;
                w.write_u8(u8::from(*b))?;
            }
            Constant::Number(n) => {
                w.write_u8(TAG_NUMBER)?;
                w.write_f64::<LittleEndian>(*n)?;
            }
            Constant::String(s) => {
                w.write_u8(TAG_STRING)?;
                write_string(w, Some(s))?;
            }
        }
    }

    write_count(w, chunk.prototypes.len())?;
    for proto in &chunk.prototypes {
        write_chunk(w, proto)?;
    }

    write_count(w, chunk.source_lines.len())?;
    for line in &chunk.source_lines {
        w.write_i32::<LittleEndian>(*line)?;
    }

    write_count(w, chunk.locals.len())?;
    for local in &chunk.locals {
        write_string(w, local.name.as_deref())?;
        w.write_i32::<LittleEndian>(local.start_pc)?;
        w.write_i32::<LittleEndian>(local.end_pc)?;
    }

    write_count(w, chunk.upvalues.len())?;
    for upvalue in &chunk.upvalues {
        write_string(w, upvalue.as_deref())?;
    }
    Ok(())
}

fn write_string<W: Write>(w: &mut W, s: Option<&str>) -> Result<(), LuaObjError> {
    match s {
        None => w.write_u32::<LittleEndian>(0)?,
        Some(s) => {
            w.write_u32::<LittleEndian>(s.len() as u32 + 1)?;
            w.write_all(s.as_bytes())?;
            w.write_u8(0)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::luaobj::{tree_from_state, Interpreter, LuaObjReader, LocalVar, LUA_GLOBALS_SECTION};
    use crate::model::ValueType;
    use std::rc::Rc;

    fn run(file: &InibinFile) -> InibinFile {
        let bytes = LuaObjWriter::write(file).unwrap();
        let chunk = LuaObjReader::read(&bytes).unwrap();
        let mut vm = Interpreter::new();
        vm.interpret(&chunk);
        tree_from_state(&vm)
    }

    #[test]
    fn single_section_echo() {
        let mut file = InibinFile::new();
        file.add_property("Data", "X", Value::Float(1.0), ValueType::Float);

        let chunk = LuaObjWriter::compile(&file).unwrap();
        assert_eq!(chunk.source_name.as_deref(), Some(GENERATED_SOURCE));
        let ops: Vec<_> = chunk.instructions.iter().map(|w| Instruction(*w).opcode().unwrap()).collect();
        assert_eq!(
            ops,
            [Opcode::NewTable, Opcode::LoadK, Opcode::NewTable, Opcode::SetTable, Opcode::SetTable, Opcode::Return]
        );
        // LOADK carries a plain Bx.
        assert_eq!(Instruction(chunk.instructions[1]).bx(), 0);

        let back = run(&file);
        assert_eq!(back.sections.len(), 1);
        let data = back.section("Data").unwrap();
        assert_eq!(data.properties[0].name.as_deref(), Some("X"));
        assert_eq!(data.properties[0].value, Value::Int32(1));
    }

    #[test]
    fn globals_and_index_keys() {
        let mut file = InibinFile::new();
        file.add_property(LUA_GLOBALS_SECTION, "Scale", Value::Float(0.5), ValueType::Float);
        file.add_property("List", "[1]", Value::String("a".into()), ValueType::String);
        file.add_property("List", "[2]", Value::String("a".into()), ValueType::String);

        let chunk = LuaObjWriter::compile(&file).unwrap();
        // "a" is pooled once; the index keys are numbers.
        assert_eq!(chunk.constants.iter().filter(|c| **c == Constant::String("a".into())).count(), 1);
        assert!(chunk.constants.contains(&Constant::Number(2.0)));

        let back = run(&file);
        let names: Vec<_> = back.sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, [LUA_GLOBALS_SECTION, "List"]);
        let list = back.section("List").unwrap();
        assert_eq!(list.properties[1].name.as_deref(), Some("[2]"));
    }

    #[test]
    fn vectors_and_nested_tables() {
        let mut nested = Table::new();
        nested.insert(TableKey::Name("On".into()), Value::Bool(true));
        let mut file = InibinFile::new();
        file.add_property("S", "Color", Value::Vec3([1.0, 0.5, 0.25]), ValueType::Vec3Float);
        file.add_property("S", "Opts", Value::Table(nested.clone()), ValueType::Table);

        let back = run(&file);
        let s = back.section("S").unwrap();
        let color = s.properties.iter().find(|p| p.name.as_deref() == Some("Color")).unwrap();
        let expected: Table = [
            (TableKey::Index(1), Value::Int32(1)),
            (TableKey::Index(2), Value::Float(0.5)),
            (TableKey::Index(3), Value::Float(0.25)),
        ]
        .into_iter()
        .collect();
        assert_eq!(color.value, Value::Table(expected));
        let opts = s.properties.iter().find(|p| p.name.as_deref() == Some("Opts")).unwrap();
        assert_eq!(opts.value, Value::Table(nested));
    }

    #[test]
    fn large_constant_pool_uses_scratch_registers() {
        let mut file = InibinFile::new();
        for i in 0..300 {
            file.add_property("Big", &format!("K{i}"), Value::Int32(1000 + i), ValueType::Int32);
        }
        let chunk = LuaObjWriter::compile(&file).unwrap();
        assert!(chunk.constants.len() > 256);
        assert!(chunk.max_stack_size >= 5);

        let back = run(&file);
        let big = back.section("Big").unwrap();
        assert_eq!(big.properties.len(), 300);
        let k299 = big.properties.iter().find(|p| p.name.as_deref() == Some("K299")).unwrap();
        assert_eq!(k299.value, Value::Int32(1299));
    }

    #[test]
    fn serialize_round_trips_read_chunks() {
        let chunk = Chunk {
            source_name:  Some("@x.lua".into()),
            line_defined: 3,
            max_stack_size: 4,
            instructions: vec![Instruction::abc(Opcode::Return, 0, 1, 0).0],
            constants:    vec![Constant::Nil, Constant::Bool(false), Constant::String("s".into())],
            prototypes:   vec![Rc::new(Chunk { source_name: None, upvalues: vec![Some("u".into()), None], ..Chunk::default() })],
            source_lines: vec![1, 2],
            locals:       vec![LocalVar { name: Some("i".into()), start_pc: 0, end_pc: 1 }],
            ..Chunk::default()
        };
        let bytes = LuaObjWriter::serialize(&chunk).unwrap();
        assert_eq!(&bytes[..HEADER.len()], &HEADER);
        let back = LuaObjReader::read(&bytes).unwrap();
        assert_eq!(back, chunk);
        assert_eq!(LuaObjWriter::serialize(&back).unwrap(), bytes);
    }
}
