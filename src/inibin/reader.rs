use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use tracing::debug;

use super::{byte_to_scaled, InibinError, TYPE_SLOTS};
use crate::model::{InibinFile, Property, Section, Value, ValueType, INIBIN_VERSION, RAW_SECTION};

/// Decodes Inibin v2 bytes into a flat, unnamed property list.
pub struct InibinReader;

impl InibinReader {
    pub fn read(bytes: &[u8]) -> Result<InibinFile, InibinError> {
        Self::read_from(Cursor::new(bytes))
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<InibinFile, InibinError> {
        let version = reader
            .read_u8()
            .map_err(|_| InibinError::MalformedHeader("empty input".into()))?;
        match version {
            INIBIN_VERSION => {}
            1 => return Err(InibinError::VersionOneUnsupported),
            other => return Err(InibinError::UnsupportedVersion(other)),
        }

        let short_header = |_| InibinError::MalformedHeader("header shorter than 5 bytes".into());
        let strings_len = reader.read_u16::<LittleEndian>().map_err(short_header)?;
        let flags = reader.read_u16::<LittleEndian>().map_err(short_header)?;
        debug!(strings_len, flags = format_args!("{flags:#06x}"), "inibin header");

        let mut properties = Vec::new();
        for id in 0..TYPE_SLOTS {
            if flags & (1 << id) == 0 {
                continue;
            }
            let ty = ValueType::from_block_id(id).ok_or(InibinError::UnsupportedType(id))?;
            let before = properties.len();
            match ty {
                ValueType::Bool   => read_bools(&mut reader, &mut properties)?,
                ValueType::String => read_strings(&mut reader, strings_len, &mut properties)?,
                _                 => read_fixed(&mut reader, ty, &mut properties)?,
            }
            debug!(ty = %ty, count = properties.len() - before, "decoded block");
        }

        let mut file = InibinFile { version, sections: Vec::new() };
        if !properties.is_empty() {
            file.sections.push(Section {
                hash: 0,
                name: RAW_SECTION.to_owned(),
                properties,
            });
        }
        Ok(file)
    }
}

// ── Block readers ────────────────────────────────────────────────────────────

fn read_keys<R: Read>(reader: &mut R) -> Result<Vec<u32>, InibinError> {
    let count = reader.read_u16::<LittleEndian>()?;
    (0..count)
        .map(|_| reader.read_u32::<LittleEndian>().map_err(InibinError::from))
        .collect()
}

fn read_fixed<R: Read>(reader: &mut R, ty: ValueType, out: &mut Vec<Property>) -> Result<(), InibinError> {
    let keys = read_keys(reader)?;
    for hash in keys {
        let value = read_value(reader, ty)?;
        out.push(Property::new(hash, value, ty));
    }
    Ok(())
}

fn read_value<R: Read>(reader: &mut R, ty: ValueType) -> Result<Value, InibinError> {
    Ok(match ty {
        ValueType::Int32         => Value::Int32(reader.read_i32::<LittleEndian>()?),
        ValueType::Float         => Value::Float(reader.read_f32::<LittleEndian>()?),
        ValueType::ByteDiv10     => Value::ByteDiv10(byte_to_scaled(reader.read_u8()?)),
        ValueType::Int16         => Value::Int16(reader.read_i16::<LittleEndian>()?),
        ValueType::Byte          => Value::Byte(reader.read_u8()?),
        ValueType::Vec2ByteDiv10 => Value::Vec2(read_scaled(reader)?),
        ValueType::Vec3ByteDiv10 => Value::Vec3(read_scaled(reader)?),
        ValueType::Vec4ByteDiv10 => Value::Vec4(read_scaled(reader)?),
        ValueType::Vec2Float     => {
            let mut v = [0f32; 2];
            reader.read_f32_into::<LittleEndian>(&mut v)?;
            Value::Vec2(v)
        }
        ValueType::Vec3Float     => {
            let mut v = [0f32; 3];
            reader.read_f32_into::<LittleEndian>(&mut v)?;
            Value::Vec3(v)
        }
        ValueType::Vec4Float     => {
            let mut v = [0f32; 4];
            reader.read_f32_into::<LittleEndian>(&mut v)?;
            Value::Vec4(v)
        }
        // Dispatched to their own readers; no fixed-size payload.
        ValueType::Bool | ValueType::String | ValueType::Table => {
            return Err(InibinError::UnsupportedType(ty.block_id().unwrap_or(u8::MAX)))
        }
    })
}

fn read_scaled<R: Read, const N: usize>(reader: &mut R) -> Result<[f32; N], InibinError> {
    let mut raw = [0u8; N];
    reader.read_exact(&mut raw)?;
    Ok(raw.map(byte_to_scaled))
}

fn read_bools<R: Read>(reader: &mut R, out: &mut Vec<Property>) -> Result<(), InibinError> {
    let keys = read_keys(reader)?;
    let mut bits = vec![0u8; keys.len().div_ceil(8)];
    reader.read_exact(&mut bits)?;

    for (i, hash) in keys.into_iter().enumerate() {
        let set = (bits[i / 8] >> (i % 8)) & 1 == 1;
        out.push(Property::new(hash, Value::Bool(set), ValueType::Bool));
    }
    Ok(())
}

fn read_strings<R: Read>(reader: &mut R, strings_len: u16, out: &mut Vec<Property>) -> Result<(), InibinError> {
    let keys = read_keys(reader)?;
    let offsets = keys
        .iter()
        .map(|_| reader.read_u16::<LittleEndian>())
        .collect::<Result<Vec<u16>, _>>()?;

    let mut block = vec![0u8; strings_len as usize];
    reader.read_exact(&mut block)?;

    for (hash, offset) in keys.into_iter().zip(offsets) {
        let start = offset as usize;
        let tail = block.get(start..).ok_or_else(|| {
            InibinError::MalformedHeader(format!(
                "string offset {start} outside the {strings_len}-byte string block"
            ))
        })?;
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        let text = String::from_utf8_lossy(&tail[..end]).into_owned();
        out.push(Property::new(hash, Value::String(text), ValueType::String));
    }
    Ok(())
}
