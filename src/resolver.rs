//! Recovery of dynamically named sections in troybin files.
//!
//! Particle files name some of their sections at runtime: the `System`
//! section lists them as `GroupPart*` string values.  Properties in those
//! sections cannot be named from a static dictionary, so every unresolved
//! hash is matched against `hash_pair(group, candidate)` over the cross
//! product of group names and a vocabulary of common property names.
//! Ties go to the first pair in iteration order (groups outer, vocabulary
//! inner).

use std::collections::HashMap;

use tracing::{debug, info};

use crate::hash::{hash, hash_pair};
use crate::model::{sort_sections, InibinFile, Section, Value};

/// Name of the section listing the dynamic groups.
pub const SYSTEM_SECTION: &str = "System";
/// Prefix of the `System` properties naming dynamic groups.
pub const GROUP_PART_PREFIX: &str = "GroupPart";

/// Outcome of one [`HeuristicResolver::resolve`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// Dynamic group names found in `System`, in declaration order.
    pub groups:   Vec<String>,
    /// Properties renamed and moved into a group section.
    pub resolved: usize,
}

#[derive(Debug, Clone, Default)]
pub struct HeuristicResolver {
    vocabulary: Vec<String>,
}

/// Parse a vocabulary file: one property name per line, blanks skipped.
pub fn load_vocabulary(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect()
}

impl HeuristicResolver {
    /// Duplicate vocabulary entries are dropped; first occurrence keeps its place.
    pub fn new<I, S>(vocabulary: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut words: Vec<String> = Vec::new();
        for word in vocabulary {
            let word = word.into();
            if !words.contains(&word) {
                words.push(word);
            }
        }
        Self { vocabulary: words }
    }

    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    /// Rename and regroup every unresolved property whose hash matches a
    /// `group × vocabulary` pair, then drop empty sections and re-sort.
    pub fn resolve(&self, file: &mut InibinFile) -> ResolveReport {
        let groups = dynamic_groups(file);
        if groups.is_empty() {
            debug!("no dynamic groups declared; nothing to resolve");
            return ResolveReport::default();
        }

        // First pair wins, matching the order a nested scan would find.
        let mut candidates: HashMap<u32, (usize, usize)> = HashMap::new();
        for (gi, group) in groups.iter().enumerate() {
            for (vi, word) in self.vocabulary.iter().enumerate() {
                candidates.entry(hash_pair(group, word)).or_insert((gi, vi));
            }
        }

        let mut moved = Vec::new();
        for section in &mut file.sections {
            let mut kept = Vec::with_capacity(section.properties.len());
            for mut property in section.properties.drain(..) {
                let hit = property
                    .is_unresolved()
                    .then(|| candidates.get(&property.hash))
                    .flatten();
                match hit {
                    Some(&(gi, vi)) => {
                        property.name = Some(self.vocabulary[vi].clone());
                        moved.push((gi, property));
                    }
                    None => kept.push(property),
                }
            }
            section.properties = kept;
        }

        let resolved = moved.len();
        for (gi, property) in moved {
            let group = &groups[gi];
            let target = match file.sections.iter().position(|s| &s.name == group) {
                Some(idx) => idx,
                None => {
                    file.sections.push(Section { hash: hash(group), name: group.clone(), properties: Vec::new() });
                    file.sections.len() - 1
                }
            };
            file.sections[target].properties.push(property);
        }

        file.sections.retain(|s| !s.properties.is_empty());
        sort_sections(&mut file.sections);

        info!(groups = groups.len(), resolved, "resolved dynamic sections");
        ResolveReport { groups, resolved }
    }
}

/// Group names declared by `GroupPart*` string properties of `System`.
fn dynamic_groups(file: &InibinFile) -> Vec<String> {
    let system_hash = hash(SYSTEM_SECTION);
    let Some(system) = file
        .sections
        .iter()
        .find(|s| s.hash == system_hash || s.name == SYSTEM_SECTION)
    else {
        return Vec::new();
    };

    let mut groups: Vec<String> = Vec::new();
    for property in &system.properties {
        let is_group_part = property
            .name
            .as_deref()
            .is_some_and(|n| n.starts_with(GROUP_PART_PREFIX));
        if let (true, Value::String(group)) = (is_group_part, &property.value) {
            if !group.trim().is_empty() && !groups.contains(group) {
                groups.push(group.clone());
            }
        }
    }
    groups
}
