//! Reverse lookup from hash to human name.
//!
//! Rule files are UTF-8 text, one rule per line.  Lines starting with `#`
//! or `//` are comments.  `Section*Property` registers the composite hash;
//! a bare `Name` registers `hash(Name)`.  The first name registered for a
//! hash wins; later collisions are ignored.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::hash::{hash, hash_pair, SECTION_SEPARATOR};

#[derive(Error, Debug)]
pub enum DictionaryError {
    #[error("cannot read dictionary {path}: {source}")]
    Io { path: String, source: io::Error },
}

#[derive(Debug, Clone, Default)]
pub struct NameDictionary {
    hash_to_name: HashMap<u32, String>,
}

impl NameDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dictionary from rule-file text.
    pub fn from_rules(text: &str) -> Self {
        let mut dict = Self::new();
        dict.extend_rules(text);
        dict
    }

    /// Load a rule file.  The caller decides whether a missing file is fatal.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DictionaryError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| DictionaryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let dict = Self::from_rules(&text);
        debug!(path = %path.display(), entries = dict.len(), "loaded dictionary");
        Ok(dict)
    }

    /// Register every rule in `text`.
    pub fn extend_rules(&mut self, text: &str) {
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
                continue;
            }
            match line.split_once(SECTION_SEPARATOR) {
                Some((section, property)) => {
                    // `a*b*c` is not a valid rule.
                    if !property.contains(SECTION_SEPARATOR) {
                        self.add_pair(section, property);
                    }
                }
                None => self.add(line),
            }
        }
    }

    /// Register a bare name under `hash(name)`.
    pub fn add(&mut self, name: &str) {
        self.hash_to_name.entry(hash(name)).or_insert_with(|| name.to_owned());
    }

    /// Register `section*property` under the composite hash.
    pub fn add_pair(&mut self, section: &str, property: &str) {
        self.hash_to_name
            .entry(hash_pair(section, property))
            .or_insert_with(|| format!("{section}{SECTION_SEPARATOR}{property}"));
    }

    pub fn get_name(&self, hash: u32) -> Option<&str> {
        self.hash_to_name.get(&hash).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.hash_to_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hash_to_name.is_empty()
    }

    /// Brute-force `sections × properties` for `target`.  The first matching
    /// pair is registered and returned as `section*property`.
    pub fn try_guess_hash<S, P>(&mut self, target: u32, sections: &[S], properties: &[P]) -> Option<String>
    where
        S: AsRef<str>,
        P: AsRef<str>,
    {
        for section in sections {
            for property in properties {
                let (section, property) = (section.as_ref(), property.as_ref());
                if hash_pair(section, property) == target {
                    self.add_pair(section, property);
                    return Some(format!("{section}{SECTION_SEPARATOR}{property}"));
                }
            }
        }
        None
    }
}
