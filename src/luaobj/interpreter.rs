//! Best-effort executor for the table-building subset of Lua 5.1.
//!
//! The machine state is one 256-slot register file plus one global table,
//! owned by [`Interpreter`].  Supported: `MOVE LOADK LOADBOOL LOADNIL
//! NEWTABLE CLOSURE SETGLOBAL GETGLOBAL SETTABLE GETTABLE SETLIST RETURN`.
//! Every other opcode is a logged no-op.  A fault while executing one
//! instruction (non-table target, bad index, ...) discards that instruction
//! and execution continues with the next one.  Closures are stored, never
//! called.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, warn};

use super::opcode::{Instruction, Opcode, RK_CONSTANT};
use super::{Chunk, Constant};

pub const REGISTER_COUNT: usize = 256;
/// Array slots assigned per `SETLIST` block.
pub const FIELDS_PER_FLUSH: usize = 50;

// ── Values ───────────────────────────────────────────────────────────────────

pub type TableRef = Rc<RefCell<LuaTable>>;

#[derive(Debug, Clone, Default)]
pub enum LuaValue {
    #[default]
    Nil,
    Bool(bool),
    Number(f64),
    String(String),
    Table(TableRef),
    Function(Rc<Chunk>),
}

impl LuaValue {
    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    pub fn new_table() -> Self {
        LuaValue::Table(Rc::new(RefCell::new(LuaTable::default())))
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            LuaValue::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            LuaValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&Constant> for LuaValue {
    fn from(c: &Constant) -> Self {
        match c {
            Constant::Nil       => LuaValue::Nil,
            Constant::Bool(b)   => LuaValue::Bool(*b),
            Constant::Number(n) => LuaValue::Number(*n),
            Constant::String(s) => LuaValue::String(s.clone()),
        }
    }
}

/// Table key.  Nil, NaN, tables and functions are not valid keys here.
/// Ordering: numbers ascending, then `false`/`true`, then strings.
#[derive(Debug, Clone)]
pub enum LuaKey {
    Number(f64),
    Bool(bool),
    String(String),
}

impl LuaKey {
    pub fn from_value(value: &LuaValue) -> Option<Self> {
        match value {
            LuaValue::Number(n) if n.is_nan() => None,
            // -0.0 and 0.0 are the same key.
            LuaValue::Number(n) => Some(LuaKey::Number(if *n == 0.0 { 0.0 } else { *n })),
            LuaValue::Bool(b)   => Some(LuaKey::Bool(*b)),
            LuaValue::String(s) => Some(LuaKey::String(s.clone())),
            _ => None,
        }
    }

    pub fn name(s: &str) -> Self {
        LuaKey::String(s.to_owned())
    }

    fn rank(&self) -> u8 {
        match self {
            LuaKey::Number(_) => 0,
            LuaKey::Bool(_)   => 1,
            LuaKey::String(_) => 2,
        }
    }
}

impl Ord for LuaKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (LuaKey::Number(a), LuaKey::Number(b)) => a.total_cmp(b),
            (LuaKey::Bool(a), LuaKey::Bool(b))     => a.cmp(b),
            (LuaKey::String(a), LuaKey::String(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for LuaKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for LuaKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LuaKey {}

#[derive(Debug, Clone, Default)]
pub struct LuaTable {
    entries: BTreeMap<LuaKey, LuaValue>,
}

impl LuaTable {
    pub fn get(&self, key: &LuaKey) -> Option<&LuaValue> {
        self.entries.get(key)
    }

    /// Assigning nil removes the key.
    pub fn set(&mut self, key: LuaKey, value: LuaValue) {
        if value.is_nil() {
            self.entries.remove(&key);
        } else {
            self.entries.insert(key, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LuaKey, &LuaValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Per-instruction faults ───────────────────────────────────────────────────

#[derive(Error, Debug)]
enum StepError {
    #[error("register {0} does not hold a table")]
    NotATable(usize),
    #[error("register {0} out of range")]
    RegisterOutOfRange(usize),
    #[error("constant {0} out of range")]
    ConstantOutOfRange(usize),
    #[error("prototype {0} out of range")]
    PrototypeOutOfRange(usize),
    #[error("nil, NaN, table or function used as a table key")]
    InvalidKey,
    #[error("SETLIST block word missing")]
    MissingSetListBlock,
}

enum Flow {
    Next,
    Return,
}

// ── Interpreter ──────────────────────────────────────────────────────────────

pub struct Interpreter {
    registers: Vec<LuaValue>,
    globals:   LuaTable,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            registers: vec![LuaValue::Nil; REGISTER_COUNT],
            globals:   LuaTable::default(),
        }
    }

    /// Run `chunk` until `RETURN` or the end of its code and return the
    /// global table.  Never fails: faulting instructions are skipped.
    pub fn interpret(&mut self, chunk: &Chunk) -> &LuaTable {
        let code = &chunk.instructions;
        let mut pc = 0;
        let mut skipped = 0usize;

        while pc < code.len() {
            let ins = Instruction(code[pc]);
            pc += 1;
            match self.step(chunk, ins, &mut pc) {
                Ok(Flow::Next) => {}
                Ok(Flow::Return) => break,
                Err(e) => {
                    skipped += 1;
                    debug!(pc = pc - 1, error = %e, "instruction skipped");
                }
            }
        }

        debug!(source = chunk.label(), globals = self.globals.len(), skipped, "interpretation finished");
        &self.globals
    }

    pub fn globals(&self) -> &LuaTable {
        &self.globals
    }

    pub fn register(&self, idx: usize) -> Option<&LuaValue> {
        self.registers.get(idx)
    }

    fn reg(&self, idx: usize) -> Result<&LuaValue, StepError> {
        self.registers.get(idx).ok_or(StepError::RegisterOutOfRange(idx))
    }

    fn set_reg(&mut self, idx: usize, value: LuaValue) -> Result<(), StepError> {
        let slot = self.registers.get_mut(idx).ok_or(StepError::RegisterOutOfRange(idx))?;
        *slot = value;
        Ok(())
    }

    fn table_at(&self, idx: usize) -> Result<TableRef, StepError> {
        self.reg(idx)?.as_table().cloned().ok_or(StepError::NotATable(idx))
    }

    fn constant(chunk: &Chunk, idx: usize) -> Result<LuaValue, StepError> {
        chunk
            .constants
            .get(idx)
            .map(LuaValue::from)
            .ok_or(StepError::ConstantOutOfRange(idx))
    }

    /// RK operand: constant `x - 256` above 255, register `x` otherwise.
    /// A constant index past the pool reads as nil.
    fn rk(&self, chunk: &Chunk, x: usize) -> LuaValue {
        if x >= RK_CONSTANT {
            chunk.constants.get(x - RK_CONSTANT).map(LuaValue::from).unwrap_or_default()
        } else {
            self.registers.get(x).cloned().unwrap_or_default()
        }
    }

    fn step(&mut self, chunk: &Chunk, ins: Instruction, pc: &mut usize) -> Result<Flow, StepError> {
        let (a, b, c, bx) = (ins.a(), ins.b(), ins.c(), ins.bx());

        let Some(op) = ins.opcode() else {
            warn!(opcode = ins.raw_opcode(), "unknown opcode ignored");
            return Ok(Flow::Next);
        };

        match op {
            Opcode::Move => {
                let v = self.reg(b)?.clone();
                self.set_reg(a, v)?;
            }
            Opcode::LoadK => {
                let v = Self::constant(chunk, bx)?;
                self.set_reg(a, v)?;
            }
            Opcode::LoadBool => {
                self.set_reg(a, LuaValue::Bool(b != 0))?;
                if c != 0 {
                    *pc += 1;
                }
            }
            Opcode::LoadNil => {
                if b >= REGISTER_COUNT {
                    return Err(StepError::RegisterOutOfRange(b));
                }
                for r in a..=b {
                    self.registers[r] = LuaValue::Nil;
                }
            }
            Opcode::NewTable => {
                self.set_reg(a, LuaValue::new_table())?;
            }
            Opcode::Closure => {
                let proto = chunk.prototypes.get(bx).ok_or(StepError::PrototypeOutOfRange(bx))?;
                self.set_reg(a, LuaValue::Function(Rc::clone(proto)))?;
            }
            Opcode::SetGlobal => {
                let key = LuaKey::from_value(&Self::constant(chunk, bx)?).ok_or(StepError::InvalidKey)?;
                let v = self.reg(a)?.clone();
                self.globals.set(key, v);
            }
            Opcode::GetGlobal => {
                let key = LuaKey::from_value(&Self::constant(chunk, bx)?).ok_or(StepError::InvalidKey)?;
                let v = self.globals.get(&key).cloned().unwrap_or_default();
                self.set_reg(a, v)?;
            }
            Opcode::SetTable => {
                let table = self.table_at(a)?;
                let key = LuaKey::from_value(&self.rk(chunk, b)).ok_or(StepError::InvalidKey)?;
                let v = self.rk(chunk, c);
                table.borrow_mut().set(key, v);
            }
            Opcode::GetTable => {
                let key = LuaKey::from_value(&self.rk(chunk, c));
                let v = match (self.reg(b)?.as_table(), key) {
                    (Some(t), Some(k)) => t.borrow().get(&k).cloned().unwrap_or_default(),
                    _ => LuaValue::Nil,
                };
                self.set_reg(a, v)?;
            }
            Opcode::SetList => {
                let block = if c == 0 {
                    let word = chunk.instructions.get(*pc).ok_or(StepError::MissingSetListBlock)?;
                    *pc += 1;
                    *word as usize
                } else {
                    c
                };
                let table = self.table_at(a)?;
                let base = block.saturating_sub(1) * FIELDS_PER_FLUSH;
                for i in 1..=b {
                    let v = self.reg(a + i)?.clone();
                    table.borrow_mut().set(LuaKey::Number((base + i) as f64), v);
                }
            }
            Opcode::Return => return Ok(Flow::Return),
            Opcode::GetUpval
            | Opcode::SetUpval
            | Opcode::SelfOp
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Pow
            | Opcode::Unm
            | Opcode::Not
            | Opcode::Len
            | Opcode::Concat
            | Opcode::Jmp
            | Opcode::Eq
            | Opcode::Lt
            | Opcode::Le
            | Opcode::Test
            | Opcode::TestSet
            | Opcode::Call
            | Opcode::TailCall
            | Opcode::ForLoop
            | Opcode::ForPrep
            | Opcode::TForLoop
            | Opcode::Close
            | Opcode::VarArg => {
                warn!(opcode = ?op, "unsupported opcode ignored");
            }
        }
        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::luaobj::opcode::Instruction as I;

    fn chunk(code: &[I], constants: Vec<Constant>) -> Chunk {
        Chunk {
            instructions: code.iter().map(|i| i.0).collect(),
            constants,
            max_stack_size: 8,
            ..Chunk::default()
        }
    }

    fn number_at(table: &LuaTable, key: LuaKey) -> Option<f64> {
        table.get(&key).and_then(LuaValue::as_number)
    }

    #[test]
    fn settable_into_register_table() {
        let c = chunk(
            &[
                I::abc(Opcode::NewTable, 0, 0, 0),
                I::abc(Opcode::SetTable, 0, RK_CONSTANT, RK_CONSTANT + 1),
                I::abc(Opcode::Return, 0, 1, 0),
            ],
            vec![Constant::String("X".into()), Constant::Number(1.0)],
        );
        let mut vm = Interpreter::new();
        assert!(vm.interpret(&c).is_empty());
        let t = vm.register(0).and_then(LuaValue::as_table).unwrap().borrow().clone();
        assert_eq!(t.len(), 1);
        assert_eq!(number_at(&t, LuaKey::name("X")), Some(1.0));
    }

    #[test]
    fn globals_and_moves() {
        let c = chunk(
            &[
                I::abx(Opcode::LoadK, 0, 1),
                I::abc(Opcode::Move, 1, 0, 0),
                I::abx(Opcode::SetGlobal, 1, 0),
                I::abx(Opcode::GetGlobal, 2, 0),
                I::abx(Opcode::SetGlobal, 2, 2),
                I::abx(Opcode::GetGlobal, 3, 3),
            ],
            vec![
                Constant::String("A".into()),
                Constant::Number(7.0),
                Constant::String("B".into()),
                Constant::String("Missing".into()),
            ],
        );
        let mut vm = Interpreter::new();
        let globals = vm.interpret(&c);
        assert_eq!(number_at(globals, LuaKey::name("A")), Some(7.0));
        assert_eq!(number_at(globals, LuaKey::name("B")), Some(7.0));
        assert!(vm.register(3).unwrap().is_nil());
    }

    #[test]
    fn loadbool_skips_next() {
        let c = chunk(
            &[
                I::abc(Opcode::LoadBool, 0, 1, 1),
                I::abx(Opcode::SetGlobal, 0, 1),
                I::abx(Opcode::SetGlobal, 0, 0),
            ],
            vec![Constant::String("Kept".into()), Constant::String("Skipped".into())],
        );
        let mut vm = Interpreter::new();
        let globals = vm.interpret(&c);
        assert!(matches!(globals.get(&LuaKey::name("Kept")), Some(LuaValue::Bool(true))));
        assert!(globals.get(&LuaKey::name("Skipped")).is_none());
    }

    #[test]
    fn setlist_with_extended_block_word() {
        let c = chunk(
            &[
                I::abc(Opcode::NewTable, 0, 2, 0),
                I::abx(Opcode::LoadK, 1, 0),
                I::abx(Opcode::LoadK, 2, 1),
                I::abc(Opcode::SetList, 0, 2, 0),
                I(2),
                I::abx(Opcode::SetGlobal, 0, 2),
            ],
            vec![Constant::Number(10.0), Constant::Number(20.0), Constant::String("T".into())],
        );
        let mut vm = Interpreter::new();
        let globals = vm.interpret(&c);
        let t = globals.get(&LuaKey::name("T")).and_then(LuaValue::as_table).unwrap().borrow().clone();
        assert_eq!(number_at(&t, LuaKey::Number(51.0)), Some(10.0));
        assert_eq!(number_at(&t, LuaKey::Number(52.0)), Some(20.0));
    }

    #[test]
    fn setlist_block_from_c() {
        let c = chunk(
            &[
                I::abc(Opcode::NewTable, 0, 2, 0),
                I::abx(Opcode::LoadK, 1, 0),
                I::abx(Opcode::LoadK, 2, 1),
                I::abc(Opcode::SetList, 0, 2, 1),
                I::abx(Opcode::SetGlobal, 0, 2),
            ],
            vec![Constant::Number(10.0), Constant::Number(20.0), Constant::String("T".into())],
        );
        let mut vm = Interpreter::new();
        let globals = vm.interpret(&c);
        let t = globals.get(&LuaKey::name("T")).and_then(LuaValue::as_table).unwrap().borrow().clone();
        assert_eq!(t.len(), 2);
        assert_eq!(number_at(&t, LuaKey::Number(1.0)), Some(10.0));
        assert_eq!(number_at(&t, LuaKey::Number(2.0)), Some(20.0));
    }

    #[test]
    fn loadnil_clears_inclusive_range() {
        let c = chunk(
            &[
                I::abx(Opcode::LoadK, 0, 0),
                I::abx(Opcode::LoadK, 1, 0),
                I::abx(Opcode::LoadK, 2, 0),
                I::abx(Opcode::LoadK, 3, 0),
                I::abc(Opcode::LoadNil, 1, 2, 0),
            ],
            vec![Constant::Number(1.0)],
        );
        let mut vm = Interpreter::new();
        vm.interpret(&c);
        assert_eq!(vm.register(0).and_then(LuaValue::as_number), Some(1.0));
        assert!(vm.register(1).unwrap().is_nil());
        assert!(vm.register(2).unwrap().is_nil());
        assert_eq!(vm.register(3).and_then(LuaValue::as_number), Some(1.0));
    }

    #[test]
    fn unknown_and_faulting_instructions_do_not_abort() {
        let c = chunk(
            &[
                I::abx(Opcode::LoadK, 0, 0),
                I::abc(Opcode::Add, 0, 0, 0),
                I(63),
                // Register 5 is nil: SETTABLE faults and is skipped.
                I::abc(Opcode::SetTable, 5, RK_CONSTANT, RK_CONSTANT),
                I::abx(Opcode::LoadK, 9, 99),
                I::abx(Opcode::SetGlobal, 0, 1),
            ],
            vec![Constant::Number(3.0), Constant::String("Done".into())],
        );
        let mut vm = Interpreter::new();
        let globals = vm.interpret(&c);
        assert_eq!(number_at(globals, LuaKey::name("Done")), Some(3.0));
    }

    #[test]
    fn return_stops_execution() {
        let c = chunk(
            &[I::abc(Opcode::Return, 0, 1, 0), I::abx(Opcode::SetGlobal, 0, 0)],
            vec![Constant::String("Never".into())],
        );
        let mut vm = Interpreter::new();
        assert!(vm.interpret(&c).is_empty());
    }

    #[test]
    fn closure_stores_prototype() {
        let mut c = chunk(
            &[I::abx(Opcode::Closure, 0, 0), I::abx(Opcode::SetGlobal, 0, 0)],
            vec![Constant::String("F".into())],
        );
        c.prototypes.push(Rc::new(Chunk { source_name: Some("inner".into()), ..Chunk::default() }));
        let mut vm = Interpreter::new();
        let globals = vm.interpret(&c);
        assert!(matches!(globals.get(&LuaKey::name("F")), Some(LuaValue::Function(f)) if f.label() == "inner"));
    }

    #[test]
    fn closures_share_their_prototype() {
        let mut c = chunk(&[I::abx(Opcode::Closure, 0, 0), I::abx(Opcode::Closure, 1, 0)], vec![]);
        c.prototypes.push(Rc::new(Chunk::default()));
        let mut vm = Interpreter::new();
        vm.interpret(&c);
        match (vm.register(0), vm.register(1)) {
            (Some(LuaValue::Function(f)), Some(LuaValue::Function(g))) => {
                assert!(Rc::ptr_eq(f, g));
                assert!(Rc::ptr_eq(f, &c.prototypes[0]));
            }
            other => panic!("expected two closures, got {other:?}"),
        }
    }

    #[test]
    fn gettable_reads_or_nils() {
        let c = chunk(
            &[
                I::abc(Opcode::NewTable, 0, 0, 0),
                I::abc(Opcode::SetTable, 0, RK_CONSTANT, RK_CONSTANT + 1),
                I::abc(Opcode::GetTable, 1, 0, RK_CONSTANT),
                I::abc(Opcode::GetTable, 2, 0, RK_CONSTANT + 1),
                I::abc(Opcode::GetTable, 3, 4, RK_CONSTANT),
            ],
            vec![Constant::String("k".into()), Constant::Number(5.0)],
        );
        let mut vm = Interpreter::new();
        vm.interpret(&c);
        assert_eq!(vm.register(1).and_then(LuaValue::as_number), Some(5.0));
        assert!(vm.register(2).unwrap().is_nil());
        assert!(vm.register(3).unwrap().is_nil());
    }

    #[test]
    fn key_normalisation() {
        assert_eq!(LuaKey::from_value(&LuaValue::Number(-0.0)), Some(LuaKey::Number(0.0)));
        assert!(LuaKey::from_value(&LuaValue::Number(f64::NAN)).is_none());
        assert!(LuaKey::from_value(&LuaValue::Nil).is_none());
        assert!(LuaKey::Number(100.0) < LuaKey::Bool(false));
        assert!(LuaKey::Bool(true) < LuaKey::name("a"));
    }
}
