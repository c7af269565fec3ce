//! High-level [`Document`] API: the primary embedding surface.
//!
//! ```no_run
//! use inibin::document::{Document, LoadOptions};
//! use inibin::model::{Value, ValueType};
//!
//! let mut doc = Document::open("champion.inibin", &LoadOptions::default())?;
//! doc.file_mut().add_property("Data", "AttackRange", Value::Float(550.0), ValueType::Float);
//! doc.save("champion.inibin")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::dictionary::{DictionaryError, NameDictionary};
use crate::inibin::{InibinError, InibinReader, InibinWriter};
use crate::luaobj::{tree_from_state, Interpreter, LuaObjError, LuaObjReader, LuaObjWriter};
use crate::model::{InibinFile, Value, ValueType};
use crate::organize::organize;
use crate::resolver::{load_vocabulary, HeuristicResolver, ResolveReport};

pub const DEFAULT_DICTIONARY: &str = "inibin_dict.txt";
pub const DEFAULT_TROYBIN_DICTIONARY: &str = "troybin_dict.txt";
pub const DEFAULT_VOCABULARY: &str = "troy_properties.txt";

// ── FileKind ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// `.inibin`: Inibin v2 with a static dictionary.
    Inibin,
    /// `.troybin`: Inibin v2 particle file with dynamically named sections.
    Troybin,
    /// `.luaobj`: precompiled Lua 5.1 chunk.
    LuaObj,
}

impl FileKind {
    /// Detect the kind from the file extension (case-insensitive).
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "inibin"  => Some(FileKind::Inibin),
            "troybin" => Some(FileKind::Troybin),
            "luaobj"  => Some(FileKind::LuaObj),
            _ => None,
        }
    }
}

// ── LoadOptions ───────────────────────────────────────────────────────────────

/// Configuration for [`Document::open`].  Missing rule and vocabulary files
/// are treated as empty.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Rule file used for `.inibin`.
    pub dictionary:               Option<PathBuf>,
    /// Rule file used for `.troybin`.
    pub troybin_dictionary:       Option<PathBuf>,
    /// Property vocabulary for the heuristic resolver.
    pub vocabulary:               Option<PathBuf>,
    /// Run the heuristic resolver on `.troybin` files.
    pub resolve_dynamic_sections: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            dictionary:               Some(PathBuf::from(DEFAULT_DICTIONARY)),
            troybin_dictionary:       Some(PathBuf::from(DEFAULT_TROYBIN_DICTIONARY)),
            vocabulary:               Some(PathBuf::from(DEFAULT_VOCABULARY)),
            resolve_dynamic_sections: true,
        }
    }
}

impl LoadOptions {
    /// No dictionaries, no resolver: every property lands in `Unknowns`.
    pub fn bare() -> Self {
        Self {
            dictionary:               None,
            troybin_dictionary:       None,
            vocabulary:               None,
            resolve_dynamic_sections: false,
        }
    }

    fn dictionary_for(&self, kind: FileKind) -> Option<&Path> {
        match kind {
            FileKind::Inibin  => self.dictionary.as_deref(),
            FileKind::Troybin => self.troybin_dictionary.as_deref(),
            FileKind::LuaObj  => None,
        }
    }
}

// ── DocumentError ─────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Unrecognised file type: {0}")]
    UnknownKind(PathBuf),
    #[error("Cannot read vocabulary {path}: {source}")]
    Vocabulary { path: String, source: io::Error },
    #[error(transparent)]
    Inibin(#[from] InibinError),
    #[error(transparent)]
    LuaObj(#[from] LuaObjError),
    #[error(transparent)]
    Dictionary(#[from] DictionaryError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Document ──────────────────────────────────────────────────────────────────

/// One decoded file with the names and sections recovered for it.
pub struct Document {
    kind:       FileKind,
    file:       InibinFile,
    dictionary: NameDictionary,
    report:     Option<ResolveReport>,
}

impl Document {
    pub fn open<P: AsRef<Path>>(path: P, options: &LoadOptions) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        let kind = FileKind::from_path(path).ok_or_else(|| DocumentError::UnknownKind(path.to_owned()))?;
        let bytes = fs::read(path)?;
        debug!(path = %path.display(), ?kind, bytes = bytes.len(), "opening document");
        Self::from_bytes(kind, &bytes, options)
    }

    pub fn from_bytes(kind: FileKind, bytes: &[u8], options: &LoadOptions) -> Result<Self, DocumentError> {
        let dictionary = match options.dictionary_for(kind) {
            Some(path) => load_dictionary(path)?,
            None => NameDictionary::new(),
        };

        let (file, report) = match kind {
            FileKind::Inibin => (organize(&InibinReader::read(bytes)?, &dictionary), None),
            FileKind::Troybin => {
                let mut file = organize(&InibinReader::read(bytes)?, &dictionary);
                let report = match (&options.vocabulary, options.resolve_dynamic_sections) {
                    (Some(path), true) => {
                        let resolver = HeuristicResolver::new(read_vocabulary(path)?);
                        Some(resolver.resolve(&mut file))
                    }
                    _ => None,
                };
                (file, report)
            }
            FileKind::LuaObj => {
                let chunk = LuaObjReader::read(bytes)?;
                let mut vm = Interpreter::new();
                vm.interpret(&chunk);
                (tree_from_state(&vm), None)
            }
        };

        Ok(Self { kind, file, dictionary, report })
    }

    /// Wrap an already built tree, e.g. one assembled in code.
    pub fn from_file(kind: FileKind, file: InibinFile) -> Self {
        Self { kind, file, dictionary: NameDictionary::new(), report: None }
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn file(&self) -> &InibinFile {
        &self.file
    }

    pub fn file_mut(&mut self) -> &mut InibinFile {
        &mut self.file
    }

    pub fn into_file(self) -> InibinFile {
        self.file
    }

    pub fn dictionary(&self) -> &NameDictionary {
        &self.dictionary
    }

    pub fn dictionary_mut(&mut self) -> &mut NameDictionary {
        &mut self.dictionary
    }

    /// What the heuristic resolver did, when it ran.
    pub fn resolve_report(&self) -> Option<&ResolveReport> {
        self.report.as_ref()
    }

    /// Add a property by raw hash, named and placed by this document's
    /// dictionary.
    pub fn add_raw(&mut self, hash: u32, value: Value, ty: ValueType) {
        self.file.add_raw(hash, value, ty, &self.dictionary);
    }

    /// Encode in the document's own format.  Inibin output is flat: sections
    /// are not stored.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DocumentError> {
        Ok(match self.kind {
            FileKind::Inibin | FileKind::Troybin => InibinWriter::write(&self.file)?,
            FileKind::LuaObj => LuaObjWriter::write(&self.file)?,
        })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), DocumentError> {
        let path = path.as_ref();
        let mut out = BufWriter::new(File::create(path)?);
        match self.kind {
            FileKind::Inibin | FileKind::Troybin => InibinWriter::write_to(&mut out, &self.file)?,
            FileKind::LuaObj => {
                let chunk = LuaObjWriter::compile(&self.file)?;
                LuaObjWriter::serialize_to(&chunk, &mut out)?;
            }
        }
        out.flush()?;
        debug!(path = %path.display(), kind = ?self.kind, "saved document");
        Ok(())
    }
}

/// A missing rule file yields an empty dictionary.
fn load_dictionary(path: &Path) -> Result<NameDictionary, DictionaryError> {
    match NameDictionary::load(path) {
        Err(DictionaryError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "dictionary not found, continuing without names");
            Ok(NameDictionary::new())
        }
        other => other,
    }
}

fn read_vocabulary(path: &Path) -> Result<Vec<String>, DocumentError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(load_vocabulary(&text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "vocabulary not found, resolver disabled");
            Ok(Vec::new())
        }
        Err(source) => Err(DocumentError::Vocabulary { path: path.display().to_string(), source }),
    }
}
