//! In-memory property model shared by the Inibin codec, the section
//! organizer, the heuristic resolver and the luaobj path.
//!
//! A [`Property`] is identified by its hash; the name is derived and may be
//! absent until a dictionary or the resolver supplies it.  Sections exist
//! only in memory: the Inibin v2 wire format has a single flat property list.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dictionary::NameDictionary;
use crate::hash::{hash, hash_pair};

/// Section the reader places every decoded property into.
pub const RAW_SECTION: &str = "Unknown Section";
/// Section for dictionary names without a `section*` prefix.
pub const GLOBALS_SECTION: &str = "Globals";
/// Section for hashes the dictionary cannot name.
pub const UNKNOWNS_SECTION: &str = "Unknowns";
/// Name prefix synthesized for unresolved hashes.
pub const UNKNOWN_PREFIX: &str = "Unknown_";

/// The only Inibin format version this crate reads and writes.
pub const INIBIN_VERSION: u8 = 2;

// ── ValueType ────────────────────────────────────────────────────────────────

/// Type tag of a property.  Ids 0..=12 are Inibin block ids; `Table` only
/// occurs in trees built from luaobj files and has no Inibin block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueType {
    Int32,
    Float,
    ByteDiv10,
    Int16,
    Byte,
    Bool,
    Vec3ByteDiv10,
    Vec3Float,
    Vec2ByteDiv10,
    Vec2Float,
    Vec4ByteDiv10,
    Vec4Float,
    String,
    Table,
}

impl ValueType {
    /// Every type with an Inibin block, in ascending block id order.
    pub const BLOCK_TYPES: [ValueType; 13] = [
        ValueType::Int32,
        ValueType::Float,
        ValueType::ByteDiv10,
        ValueType::Int16,
        ValueType::Byte,
        ValueType::Bool,
        ValueType::Vec3ByteDiv10,
        ValueType::Vec3Float,
        ValueType::Vec2ByteDiv10,
        ValueType::Vec2Float,
        ValueType::Vec4ByteDiv10,
        ValueType::Vec4Float,
        ValueType::String,
    ];

    /// Resolve an Inibin block id.  Ids 13..=15 are reserved and unknown.
    pub fn from_block_id(id: u8) -> Option<Self> {
        Self::BLOCK_TYPES.get(id as usize).copied()
    }

    /// Inibin block id, or `None` for types that cannot be stored in Inibin.
    pub fn block_id(self) -> Option<u8> {
        match self {
            ValueType::Table => None,
            other => Some(other as u8),
        }
    }

    /// Human-readable name (diagnostics only).
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Int32         => "int32",
            ValueType::Float         => "float",
            ValueType::ByteDiv10     => "byte/10",
            ValueType::Int16         => "int16",
            ValueType::Byte          => "byte",
            ValueType::Bool          => "bool",
            ValueType::Vec3ByteDiv10 => "vec3 byte/10",
            ValueType::Vec3Float     => "vec3 float",
            ValueType::Vec2ByteDiv10 => "vec2 byte/10",
            ValueType::Vec2Float     => "vec2 float",
            ValueType::Vec4ByteDiv10 => "vec4 byte/10",
            ValueType::Vec4Float     => "vec4 float",
            ValueType::String        => "string",
            ValueType::Table         => "table",
        }
    }

    /// Component count for vector types.
    pub fn arity(self) -> Option<usize> {
        match self {
            ValueType::Vec2ByteDiv10 | ValueType::Vec2Float => Some(2),
            ValueType::Vec3ByteDiv10 | ValueType::Vec3Float => Some(3),
            ValueType::Vec4ByteDiv10 | ValueType::Vec4Float => Some(4),
            _ => None,
        }
    }

    /// Whether `value` has the runtime shape this tag declares.
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ValueType::Int32, Value::Int32(_))
                | (ValueType::Float, Value::Float(_))
                | (ValueType::ByteDiv10, Value::ByteDiv10(_))
                | (ValueType::Int16, Value::Int16(_))
                | (ValueType::Byte, Value::Byte(_))
                | (ValueType::Bool, Value::Bool(_))
                | (ValueType::Vec2ByteDiv10 | ValueType::Vec2Float, Value::Vec2(_))
                | (ValueType::Vec3ByteDiv10 | ValueType::Vec3Float, Value::Vec3(_))
                | (ValueType::Vec4ByteDiv10 | ValueType::Vec4Float, Value::Vec4(_))
                | (ValueType::String, Value::String(_))
                | (ValueType::Table, Value::Table(_))
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Value ────────────────────────────────────────────────────────────────────

/// Ordered table used for nested luaobj values.
pub type Table = BTreeMap<TableKey, Value>;

/// Key of a nested table: array-style integer index or a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TableKey {
    Index(i64),
    Name(String),
}

impl TableKey {
    /// Parse a display key: `"[N]"` is an integer index, anything else a name.
    pub fn parse(text: &str) -> Self {
        text.strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .and_then(|inner| inner.parse::<i64>().ok())
            .map(TableKey::Index)
            .unwrap_or_else(|| TableKey::Name(text.to_owned()))
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKey::Index(i) => write!(f, "[{i}]"),
            TableKey::Name(n)  => f.write_str(n),
        }
    }
}

impl From<String> for TableKey {
    fn from(s: String) -> Self {
        TableKey::parse(&s)
    }
}

impl From<TableKey> for String {
    fn from(k: TableKey) -> Self {
        k.to_string()
    }
}

/// Closed sum type over every value a property can hold.
///
/// `ByteDiv10` values and the byte-scaled vectors are stored decoded; the
/// writer re-encodes them with a truncating `(value * 10) as u8`, so values
/// with more than one decimal are lossy by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int32(i32),
    Float(f32),
    ByteDiv10(f32),
    Int16(i16),
    Byte(u8),
    Bool(bool),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    String(String),
    Table(Table),
}

#[derive(Error, Debug, PartialEq)]
pub enum ParseValueError {
    #[error("cannot parse '{text}' as {ty}")]
    Invalid { text: String, ty: ValueType },
    #[error("{ty} needs {expected} components, got {found}")]
    WrongArity { ty: ValueType, expected: usize, found: usize },
    #[error("{0} values cannot be entered as text")]
    Unsupported(ValueType),
}

impl Value {
    /// The tag a freshly created property holding this value would carry.
    pub fn natural_type(&self) -> ValueType {
        match self {
            Value::Int32(_)     => ValueType::Int32,
            Value::Float(_)     => ValueType::Float,
            Value::ByteDiv10(_) => ValueType::ByteDiv10,
            Value::Int16(_)     => ValueType::Int16,
            Value::Byte(_)      => ValueType::Byte,
            Value::Bool(_)      => ValueType::Bool,
            Value::Vec2(_)      => ValueType::Vec2Float,
            Value::Vec3(_)      => ValueType::Vec3Float,
            Value::Vec4(_)      => ValueType::Vec4Float,
            Value::String(_)    => ValueType::String,
            Value::Table(_)     => ValueType::Table,
        }
    }

    /// Parse user-edited text into a value of type `ty`.
    ///
    /// Floats use `.` as the decimal separator regardless of locale; vector
    /// components are separated by spaces and/or commas.
    pub fn parse(text: &str, ty: ValueType) -> Result<Self, ParseValueError> {
        let invalid = || ParseValueError::Invalid { text: text.to_owned(), ty };
        let trimmed = text.trim();

        if let Some(expected) = ty.arity() {
            let parts = trimmed
                .split([' ', ','])
                .filter(|p| !p.is_empty())
                .map(|p| p.parse::<f32>().map_err(|_| invalid()))
                .collect::<Result<Vec<f32>, _>>()?;
            if parts.len() != expected {
                return Err(ParseValueError::WrongArity { ty, expected, found: parts.len() });
            }
            return Ok(match expected {
                2 => Value::Vec2([parts[0], parts[1]]),
                3 => Value::Vec3([parts[0], parts[1], parts[2]]),
                _ => Value::Vec4([parts[0], parts[1], parts[2], parts[3]]),
            });
        }

        match ty {
            ValueType::Int32     => trimmed.parse().map(Value::Int32).map_err(|_| invalid()),
            ValueType::Float     => trimmed.parse().map(Value::Float).map_err(|_| invalid()),
            ValueType::ByteDiv10 => trimmed.parse().map(Value::ByteDiv10).map_err(|_| invalid()),
            ValueType::Int16     => trimmed.parse().map(Value::Int16).map_err(|_| invalid()),
            ValueType::Byte      => trimmed.parse().map(Value::Byte).map_err(|_| invalid()),
            ValueType::Bool      => match trimmed.to_ascii_lowercase().as_str() {
                "true"  => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _       => Err(invalid()),
            },
            ValueType::String    => Ok(Value::String(text.to_owned())),
            other                => Err(ParseValueError::Unsupported(other)),
        }
    }
}

fn write_components(f: &mut fmt::Formatter<'_>, components: &[f32]) -> fmt::Result {
    for (i, c) in components.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{c}")?;
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int32(v)     => write!(f, "{v}"),
            Value::Float(v)     => write!(f, "{v}"),
            Value::ByteDiv10(v) => write!(f, "{v}"),
            Value::Int16(v)     => write!(f, "{v}"),
            Value::Byte(v)      => write!(f, "{v}"),
            Value::Bool(v)      => write!(f, "{v}"),
            Value::Vec2(v)      => write_components(f, v),
            Value::Vec3(v)      => write_components(f, v),
            Value::Vec4(v)      => write_components(f, v),
            Value::String(v)    => f.write_str(v),
            Value::Table(t)     => {
                f.write_str("{")?;
                for (i, (k, v)) in t.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k} = {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

// ── Property / Section / File ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub hash:  u32,
    pub name:  Option<String>,
    pub value: Value,
    pub ty:    ValueType,
}

impl Property {
    /// An unnamed property as the reader produces it.
    pub fn new(hash: u32, value: Value, ty: ValueType) -> Self {
        Self { hash, name: None, value, ty }
    }

    /// The name, or the synthesized `Unknown_<hash>` when absent.
    pub fn display_name(&self) -> Cow<'_, str> {
        match &self.name {
            Some(n) => Cow::Borrowed(n.as_str()),
            None    => Cow::Owned(unknown_name(self.hash)),
        }
    }

    /// True when no real name has been resolved for this hash.
    pub fn is_unresolved(&self) -> bool {
        self.name
            .as_deref()
            .map_or(true, |n| n.is_empty() || n.starts_with(UNKNOWN_PREFIX))
    }
}

/// `Unknown_<hash>` in decimal.
pub fn unknown_name(hash: u32) -> String {
    format!("{UNKNOWN_PREFIX}{hash}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub hash:       u32,
    pub name:       String,
    pub properties: Vec<Property>,
}

impl Section {
    /// Empty section whose hash is `hash(name)`.
    pub fn named(name: &str) -> Self {
        Self { hash: hash(name), name: name.to_owned(), properties: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InibinFile {
    pub version:  u8,
    pub sections: Vec<Section>,
}

impl Default for InibinFile {
    fn default() -> Self {
        Self { version: INIBIN_VERSION, sections: Vec::new() }
    }
}

/// Alphabetical section order: case-insensitive first, then lower case
/// before upper case on names that differ only in case.
pub(crate) fn sort_sections(sections: &mut [Section]) {
    sections.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| b.name.cmp(&a.name))
    });
}

impl InibinFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every property across all sections, in section order.
    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.sections.iter().flat_map(|s| s.properties.iter())
    }

    pub fn property_count(&self) -> usize {
        self.sections.iter().map(|s| s.properties.len()).sum()
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn section_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.name == name)
    }

    /// First property carrying `hash`, with the name of its section.
    pub fn find_hash(&self, hash: u32) -> Option<(&str, &Property)> {
        self.sections.iter().find_map(|s| {
            s.properties
                .iter()
                .find(|p| p.hash == hash)
                .map(|p| (s.name.as_str(), p))
        })
    }

    /// Return the section called `name`, creating it (and re-sorting the
    /// section list) when absent.
    pub fn find_or_create_section(&mut self, name: &str) -> &mut Section {
        if self.section(name).is_none() {
            self.sections.push(Section::named(name));
            sort_sections(&mut self.sections);
        }
        // Present by construction.
        let idx = self
            .sections
            .iter()
            .position(|s| s.name == name)
            .unwrap_or(self.sections.len() - 1);
        &mut self.sections[idx]
    }

    /// Add a named property; its hash is `hash_pair(section, name)`.
    pub fn add_property(&mut self, section: &str, name: &str, value: Value, ty: ValueType) -> u32 {
        let hash = hash_pair(section, name);
        self.find_or_create_section(section).properties.push(Property {
            hash,
            name: Some(name.to_owned()),
            value,
            ty,
        });
        hash
    }

    /// Add a property by raw hash, placed wherever the dictionary routes it.
    pub fn add_raw(&mut self, hash: u32, value: Value, ty: ValueType, dictionary: &NameDictionary) {
        let mut property = Property::new(hash, value, ty);
        let section = crate::organize::route(&mut property, dictionary);
        self.find_or_create_section(&section).properties.push(property);
    }

    /// Remove the first property carrying `hash`.  Empty sections are kept.
    pub fn remove_property(&mut self, hash: u32) -> Option<Property> {
        self.sections.iter_mut().find_map(|s| {
            s.properties
                .iter()
                .position(|p| p.hash == hash)
                .map(|idx| s.properties.remove(idx))
        })
    }

    /// Sections and properties matching `query` (case-insensitive).
    ///
    /// A section whose name matches keeps all its properties; otherwise only
    /// properties whose name, formatted value or decimal hash match are kept.
    pub fn filter(&self, query: &str) -> InibinFile {
        let query = query.to_lowercase();
        if query.trim().is_empty() {
            return self.clone();
        }

        let sections = self
            .sections
            .iter()
            .filter_map(|s| {
                if s.name.to_lowercase().contains(&query) {
                    return Some(s.clone());
                }
                let properties: Vec<Property> = s
                    .properties
                    .iter()
                    .filter(|p| {
                        p.name.as_deref().is_some_and(|n| n.to_lowercase().contains(&query))
                            || p.value.to_string().to_lowercase().contains(&query)
                            || p.hash.to_string().contains(&query)
                    })
                    .cloned()
                    .collect();
                (!properties.is_empty()).then(|| Section {
                    hash: s.hash,
                    name: s.name.clone(),
                    properties,
                })
            })
            .collect();

        InibinFile { version: self.version, sections }
    }

    /// `name = value` listing, one `[section]` header per section.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push_str(&format!("[{}]\n", section.name));
            for p in &section.properties {
                out.push_str(&format!("{} = {}\n", p.display_name(), p.value));
            }
            out.push('\n');
        }
        out
    }
}
