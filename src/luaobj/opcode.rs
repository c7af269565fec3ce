//! Lua 5.1 instruction encoding.
//!
//! ```text
//!  31      23 22     14 13    6 5    0
//! |    B     |    C    |   A   |  op  |
//! |        Bx          |   A   |  op  |
//! ```
//! `B`/`C` operands above 255 refer to constant `x - 256` ("RK" operands).

/// Operand bit marking an RK operand as a constant index.
pub const RK_CONSTANT: usize = 256;
/// Largest constant index an RK operand can address.
pub const MAX_RK_INDEX: usize = RK_CONSTANT - 1;
/// Largest value of the combined `Bx` operand.
pub const MAX_BX: usize = (1 << 18) - 1;

/// Every Lua 5.1 opcode.  Only a subset is executed; the rest are
/// recognised so they can be reported by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Move = 0,
    LoadK,
    LoadBool,
    LoadNil,
    GetUpval,
    GetGlobal,
    GetTable,
    SetGlobal,
    SetUpval,
    SetTable,
    NewTable,
    SelfOp,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
    Not,
    Len,
    Concat,
    Jmp,
    Eq,
    Lt,
    Le,
    Test,
    TestSet,
    Call,
    TailCall,
    Return,
    ForLoop,
    ForPrep,
    TForLoop,
    SetList,
    Close,
    Closure,
    VarArg,
}

impl Opcode {
    const ALL: [Opcode; 38] = [
        Opcode::Move, Opcode::LoadK, Opcode::LoadBool, Opcode::LoadNil,
        Opcode::GetUpval, Opcode::GetGlobal, Opcode::GetTable, Opcode::SetGlobal,
        Opcode::SetUpval, Opcode::SetTable, Opcode::NewTable, Opcode::SelfOp,
        Opcode::Add, Opcode::Sub, Opcode::Mul, Opcode::Div,
        Opcode::Mod, Opcode::Pow, Opcode::Unm, Opcode::Not,
        Opcode::Len, Opcode::Concat, Opcode::Jmp, Opcode::Eq,
        Opcode::Lt, Opcode::Le, Opcode::Test, Opcode::TestSet,
        Opcode::Call, Opcode::TailCall, Opcode::Return, Opcode::ForLoop,
        Opcode::ForPrep, Opcode::TForLoop, Opcode::SetList, Opcode::Close,
        Opcode::Closure, Opcode::VarArg,
    ];

    pub fn from_u8(raw: u8) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }
}

/// One raw instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction(pub u32);

impl Instruction {
    #[inline]
    pub fn raw_opcode(self) -> u8 {
        (self.0 & 0x3F) as u8
    }

    #[inline]
    pub fn opcode(self) -> Option<Opcode> {
        Opcode::from_u8(self.raw_opcode())
    }

    #[inline]
    pub fn a(self) -> usize {
        ((self.0 >> 6) & 0xFF) as usize
    }

    #[inline]
    pub fn c(self) -> usize {
        ((self.0 >> 14) & 0x1FF) as usize
    }

    #[inline]
    pub fn b(self) -> usize {
        ((self.0 >> 23) & 0x1FF) as usize
    }

    #[inline]
    pub fn bx(self) -> usize {
        ((self.0 >> 14) & 0x3FFFF) as usize
    }

    /// Encode an `A B C` instruction.  Operands are masked to their widths.
    pub fn abc(op: Opcode, a: usize, b: usize, c: usize) -> Self {
        let word = (op as u32)
            | ((a as u32 & 0xFF) << 6)
            | ((c as u32 & 0x1FF) << 14)
            | ((b as u32 & 0x1FF) << 23);
        Instruction(word)
    }

    /// Encode an `A Bx` instruction.
    pub fn abx(op: Opcode, a: usize, bx: usize) -> Self {
        let word = (op as u32) | ((a as u32 & 0xFF) << 6) | ((bx as u32 & 0x3FFFF) << 14);
        Instruction(word)
    }
}
