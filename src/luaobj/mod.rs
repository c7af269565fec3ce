//! `.luaobj` containers: precompiled Lua 5.1 chunks whose only job is to
//! build tables of configuration values.
//!
//! # Layout
//! ```text
//! 1B 4C 75 61     signature "\x1bLua"
//! u8  version     0x51
//! u8  format      0
//! u8  endianness  1 (little)
//! u8  sizeof(int) 4, sizeof(size_t) 4, sizeof(Instruction) 4, sizeof(lua_Number) 8
//! u8  integral    0
//! chunk
//! ```
//! A chunk is: source name (u32 length including NUL, 0 = absent), two
//! `i32` line numbers, four `u8` counts/flags, then count-prefixed arrays
//! of instructions, tagged constants, nested chunks, source lines, locals
//! (name + two `i32` pc bounds) and upvalue names.
//!
//! Only the handful of opcodes needed to rebuild table literals are
//! interpreted; see [`interpreter`].

pub mod interpreter;
pub mod opcode;
pub mod reader;
pub mod tree;
pub mod writer;

use std::io;
use std::rc::Rc;
use thiserror::Error;

pub use interpreter::{Interpreter, LuaKey, LuaTable, LuaValue};
pub use opcode::{Instruction, Opcode};
pub use reader::LuaObjReader;
pub use tree::{tree_from_state, tree_from_table, LUA_GLOBALS_SECTION};
pub use writer::LuaObjWriter;

pub const SIGNATURE: &[u8; 4] = b"\x1bLua";
pub const VERSION: u8 = 0x51;
pub const FORMAT: u8 = 0;
pub const LITTLE_ENDIAN: u8 = 1;
pub const SIZEOF_INT: u8 = 4;
pub const SIZEOF_SIZE_T: u8 = 4;
pub const SIZEOF_INSTRUCTION: u8 = 4;
pub const SIZEOF_NUMBER: u8 = 8;
pub const INTEGRAL: u8 = 0;

/// Deepest prototype nesting accepted on read, as `LUAI_MAXCCALLS`.
pub const MAX_NESTING: usize = 200;

/// The complete header as written.
pub const HEADER: [u8; 12] = [
    SIGNATURE[0], SIGNATURE[1], SIGNATURE[2], SIGNATURE[3],
    VERSION, FORMAT, LITTLE_ENDIAN,
    SIZEOF_INT, SIZEOF_SIZE_T, SIZEOF_INSTRUCTION, SIZEOF_NUMBER,
    INTEGRAL,
];

// Constant tags.
pub const TAG_NIL: u8 = 0;
pub const TAG_BOOL: u8 = 1;
pub const TAG_NUMBER: u8 = 3;
pub const TAG_STRING: u8 = 4;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum LuaObjError {
    #[error("Invalid signature: not a luaobj file")]
    InvalidSignature,
    #[error("Unsupported Lua version: {0:#04x}")]
    UnsupportedVersion(u8),
    #[error("Unsupported {field}: {value}")]
    UnsupportedLayout { field: &'static str, value: u8 },
    #[error("Truncated data")]
    TruncatedData,
    #[error("Unknown constant type: {0}")]
    UnknownConstantType(u8),
    #[error("Constant pool overflow: {0} constants")]
    ConstantPoolOverflow(usize),
    #[error("Prototypes nested {0} levels deep")]
    NestingTooDeep(usize),
    #[error("Table nesting exceeds the register file")]
    TableTooDeep,
    #[error("IO error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for LuaObjError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => LuaObjError::TruncatedData,
            _ => LuaObjError::Io(e),
        }
    }
}

// ── Chunk model ──────────────────────────────────────────────────────────────

/// Entry of a chunk's constant pool.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Nil,
    Bool(bool),
    Number(f64),
    String(String),
}

/// Debug record of one local variable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalVar {
    pub name:     Option<String>,
    pub start_pc: i32,
    pub end_pc:   i32,
}

/// One function prototype.  Nested prototypes are shared with the closures
/// the interpreter builds from them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Chunk {
    pub source_name:       Option<String>,
    pub line_defined:      i32,
    pub last_line_defined: i32,
    pub upvalue_count:     u8,
    pub param_count:       u8,
    pub is_vararg:         u8,
    pub max_stack_size:    u8,
    pub instructions:      Vec<u32>,
    pub constants:         Vec<Constant>,
    pub prototypes:        Vec<Rc<Chunk>>,
    pub source_lines:      Vec<i32>,
    pub locals:            Vec<LocalVar>,
    pub upvalues:          Vec<Option<String>>,
}

impl Chunk {
    /// Source name for diagnostics.
    pub fn label(&self) -> &str {
        self.source_name.as_deref().filter(|s| !s.is_empty()).unwrap_or("chunk")
    }
}
