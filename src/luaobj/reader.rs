use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::rc::Rc;
use tracing::debug;

use super::{
    Chunk, Constant, LocalVar, LuaObjError, FORMAT, INTEGRAL, LITTLE_ENDIAN, MAX_NESTING, SIGNATURE,
    SIZEOF_INSTRUCTION, SIZEOF_INT, SIZEOF_NUMBER, SIZEOF_SIZE_T, TAG_BOOL, TAG_NIL, TAG_NUMBER, TAG_STRING, VERSION,
};

/// Parses a luaobj container into its main [`Chunk`].
pub struct LuaObjReader;

impl LuaObjReader {
    pub fn read(bytes: &[u8]) -> Result<Chunk, LuaObjError> {
        Self::read_from(Cursor::new(bytes))
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Chunk, LuaObjError> {
        let mut signature = [0u8; 4];
        reader
            .read_exact(&mut signature)
            .map_err(|_| LuaObjError::InvalidSignature)?;
        if &signature != SIGNATURE {
            return Err(LuaObjError::InvalidSignature);
        }

        let version = reader.read_u8()?;
        if version != VERSION {
            return Err(LuaObjError::UnsupportedVersion(version));
        }

        let layout: [(&'static str, u8); 7] = [
            ("format", FORMAT),
            ("endianness", LITTLE_ENDIAN),
            ("sizeof(int)", SIZEOF_INT),
            ("sizeof(size_t)", SIZEOF_SIZE_T),
            ("sizeof(Instruction)", SIZEOF_INSTRUCTION),
            ("sizeof(lua_Number)", SIZEOF_NUMBER),
            ("integral flag", INTEGRAL),
        ];
        for (field, expected) in layout {
            let value = reader.read_u8()?;
            if value != expected {
                return Err(LuaObjError::UnsupportedLayout { field, value });
            }
        }

        let chunk = read_chunk(&mut reader, 0)?;
        debug!(
            source = chunk.label(),
            instructions = chunk.instructions.len(),
            constants = chunk.constants.len(),
            prototypes = chunk.prototypes.len(),
            "read luaobj chunk"
        );
        Ok(chunk)
    }
}

fn read_count<R: Read>(reader: &mut R) -> Result<u32, LuaObjError> {
    Ok(reader.read_u32::<LittleEndian>()?)
}

fn read_chunk<R: Read>(reader: &mut R, depth: usize) -> Result<Chunk, LuaObjError> {
    if depth > MAX_NESTING {
        return Err(LuaObjError::NestingTooDeep(depth));
    }
    let mut chunk = Chunk {
        source_name:       read_string(reader)?,
        line_defined:      reader.read_i32::<LittleEndian>()?,
        last_line_defined: reader.read_i32::<LittleEndian>()?,
        upvalue_count:     reader.read_u8()?,
        param_count:       reader.read_u8()?,
        is_vararg:         reader.read_u8()?,
        max_stack_size:    reader.read_u8()?,
        ..Chunk::default()
    };

    // Arrays grow as they are read so a corrupt count fails on EOF
    // instead of allocating up front.
    for _ in 0..read_count(reader)? {
        chunk.instructions.push(reader.read_u32::<LittleEndian>()?);
    }
    for _ in 0..read_count(reader)? {
        chunk.constants.push(read_constant(reader)?);
    }
    for _ in 0..read_count(reader)? {
        chunk.prototypes.push(Rc::new(read_chunk(reader, depth + 1)?));
    }
    for _ in 0..read_count(reader)? {
        chunk.source_lines.push(reader.read_i32::<LittleEndian>()?);
    }
    for _ in 0..read_count(reader)? {
        chunk.locals.push(LocalVar {
            name:     read_string(reader)?,
            start_pc: reader.read_i32::<LittleEndian>()?,
            end_pc:   reader.read_i32::<LittleEndian>()?,
        });
    }
    for _ in 0..read_count(reader)? {
        chunk.upvalues.push(read_string(reader)?);
    }
    Ok(chunk)
}

fn read_constant<R: Read>(reader: &mut R) -> Result<Constant, LuaObjError> {
    match reader.read_u8()? {
        TAG_NIL    => Ok(Constant::Nil),
        TAG_BOOL   => Ok(Constant::Bool(reader.read_u8()? != 0)),
        TAG_NUMBER => Ok(Constant::Number(reader.read_f64::<LittleEndian>()?)),
        TAG_STRING => Ok(Constant::String(read_string(reader)?.unwrap_or_default())),
        other      => Err(LuaObjError::UnknownConstantType(other)),
    }
}

/// Length-prefixed string whose length counts the trailing NUL.
/// Length 0 encodes an absent string.
fn read_string<R: Read>(reader: &mut R) -> Result<Option<String>, LuaObjError> {
    let size = reader.read_u32::<LittleEndian>()? as usize;
    if size == 0 {
        return Ok(None);
    }
    let mut bytes = Vec::new();
    reader.by_ref().take(size as u64).read_to_end(&mut bytes)?;
    if bytes.len() != size {
        return Err(LuaObjError::TruncatedData);
    }
    bytes.pop();
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}
