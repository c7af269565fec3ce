use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;
use tracing::debug;

use super::{scaled_to_byte, InibinError};
use crate::model::{InibinFile, Property, Value, ValueType, INIBIN_VERSION};

/// Encodes an [`InibinFile`] as Inibin v2.
///
/// Sections are flattened and every type block is emitted sorted by hash
/// ascending; neither section membership nor insertion order survives.
pub struct InibinWriter;

/// One property scheduled for a type block.
struct Entry<'a> {
    property:      &'a Property,
    string_offset: u16,
}

impl InibinWriter {
    pub fn write(file: &InibinFile) -> Result<Vec<u8>, InibinError> {
        let mut out = Vec::new();
        Self::write_to(&mut out, file)?;
        Ok(out)
    }

    pub fn write_to<W: Write>(mut writer: W, file: &InibinFile) -> Result<(), InibinError> {
        if file.version != INIBIN_VERSION {
            return Err(InibinError::UnsupportedVersion(file.version));
        }

        let mut blocks: Vec<Vec<Entry<'_>>> = ValueType::BLOCK_TYPES.iter().map(|_| Vec::new()).collect();
        let mut string_block = Vec::new();

        for property in file.properties() {
            let id = property.ty.block_id().ok_or(InibinError::NoBlockForType {
                hash: property.hash,
                ty:   property.ty,
            })?;
            if !property.ty.accepts(&property.value) {
                return Err(InibinError::EncodingTypeMismatch { hash: property.hash, ty: property.ty });
            }

            let mut string_offset = 0;
            if let Value::String(text) = &property.value {
                string_offset = u16::try_from(string_block.len()).map_err(|_| {
                    InibinError::TooLarge(format!("string block exceeds {} bytes", u16::MAX))
                })?;
                string_block.extend_from_slice(text.as_bytes());
                string_block.push(0);
            }
            blocks[id as usize].push(Entry { property, string_offset });
        }

        let strings_len = u16::try_from(string_block.len())
            .map_err(|_| InibinError::TooLarge(format!("string block exceeds {} bytes", u16::MAX)))?;

        let mut flags = 0u16;
        for (id, entries) in blocks.iter_mut().enumerate() {
            if !entries.is_empty() {
                flags |= 1 << id;
                entries.sort_by_key(|e| e.property.hash);
            }
        }

        writer.write_u8(INIBIN_VERSION)?;
        writer.write_u16::<LittleEndian>(strings_len)?;
        writer.write_u16::<LittleEndian>(flags)?;

        for (ty, entries) in ValueType::BLOCK_TYPES.iter().zip(&blocks) {
            if entries.is_empty() {
                continue;
            }
            write_block(&mut writer, *ty, entries)?;
            debug!(ty = %ty, count = entries.len(), "encoded block");
        }

        writer.write_all(&string_block)?;
        Ok(())
    }
}

// ── Block writers ────────────────────────────────────────────────────────────

fn write_block<W: Write>(writer: &mut W, ty: ValueType, entries: &[Entry<'_>]) -> Result<(), InibinError> {
    let count = u16::try_from(entries.len())
        .map_err(|_| InibinError::TooLarge(format!("{} {ty} properties", entries.len())))?;
    writer.write_u16::<LittleEndian>(count)?;
    for e in entries {
        writer.write_u32::<LittleEndian>(e.property.hash)?;
    }

    match ty {
        ValueType::String => {
            for e in entries {
                writer.write_u16::<LittleEndian>(e.string_offset)?;
            }
        }
        ValueType::Bool => {
            let mut bits = vec![0u8; entries.len().div_ceil(8)];
            for (i, e) in entries.iter().enumerate() {
                if matches!(e.property.value, Value::Bool(true)) {
                    bits[i / 8] |= 1 << (i % 8);
                }
            }
            writer.write_all(&bits)?;
        }
        _ => {
            for e in entries {
                write_value(writer, ty, &e.property.value)?;
            }
        }
    }
    Ok(())
}

fn write_value<W: Write>(writer: &mut W, ty: ValueType, value: &Value) -> Result<(), InibinError> {
    let byte_scaled = matches!(
        ty,
        ValueType::Vec2ByteDiv10 | ValueType::Vec3ByteDiv10 | ValueType::Vec4ByteDiv10
    );
    match value {
        Value::Int32(v)     => writer.write_i32::<LittleEndian>(*v)?,
        Value::Float(v)     => writer.write_f32::<LittleEndian>(*v)?,
        Value::ByteDiv10(v) => writer.write_u8(scaled_to_byte(*v))?,
        Value::Int16(v)     => writer.write_i16::<LittleEndian>(*v)?,
        Value::Byte(v)      => writer.write_u8(*v)?,
        Value::Vec2(v)      => write_components(writer, v, byte_scaled)?,
        Value::Vec3(v)      => write_components(writer, v, byte_scaled)?,
        Value::Vec4(v)      => write_components(writer, v, byte_scaled)?,
        Value::Bool(_) | Value::String(_) | Value::Table(_) => {
            return Err(InibinError::NoBlockForType { hash: 0, ty })
        }
    }
    Ok(())
}

fn write_components<W: Write>(writer: &mut W, components: &[f32], byte_scaled: bool) -> Result<(), InibinError> {
    for c in components {
        if byte_scaled {
            writer.write_u8(scaled_to_byte(*c))?;
        } else {
            writer.write_f32::<LittleEndian>(*c)?;
        }
    }
    Ok(())
}
