//! Groups the reader's flat property list into named sections.

use std::collections::HashMap;

use crate::dictionary::NameDictionary;
use crate::hash::SECTION_SEPARATOR;
use crate::model::{sort_sections, unknown_name, InibinFile, Property, Section, GLOBALS_SECTION, UNKNOWNS_SECTION};

/// Name `property` from the dictionary and return the section it belongs in.
///
/// `section*property` names route to `section`; bare names to `Globals`;
/// unknown hashes to `Unknowns` with a synthesized `Unknown_<hash>` name.
pub fn route(property: &mut Property, dictionary: &NameDictionary) -> String {
    match dictionary.get_name(property.hash) {
        Some(known) => match known.split_once(SECTION_SEPARATOR) {
            Some((section, name)) => {
                property.name = Some(name.to_owned());
                section.to_owned()
            }
            None => {
                property.name = Some(known.to_owned());
                GLOBALS_SECTION.to_owned()
            }
        },
        None => {
            property.name = Some(unknown_name(property.hash));
            UNKNOWNS_SECTION.to_owned()
        }
    }
}

/// Rebuild `file` with every property routed into its named section.
/// Sections are created on first use and returned in alphabetical order.
pub fn organize(file: &InibinFile, dictionary: &NameDictionary) -> InibinFile {
    let mut sections: Vec<Section> = Vec::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();

    for property in file.properties() {
        let mut property = property.clone();
        let name = route(&mut property, dictionary);
        let idx = *by_name.entry(name).or_insert_with_key(|name| {
            sections.push(Section::named(name));
            sections.len() - 1
        });
        sections[idx].properties.push(property);
    }

    sort_sections(&mut sections);
    InibinFile { version: file.version, sections }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{hash, hash_pair};
    use crate::model::{Value, ValueType, RAW_SECTION};

    fn raw(hashes: &[u32]) -> InibinFile {
        InibinFile {
            version:  2,
            sections: vec![Section {
                hash:       0,
                name:       RAW_SECTION.into(),
                properties: hashes
                    .iter()
                    .map(|h| Property::new(*h, Value::Int32(0), ValueType::Int32))
                    .collect(),
            }],
        }
    }

    #[test]
    fn routes_by_dictionary() {
        let dict = NameDictionary::from_rules("Data*BaseHP\nSpells*Cooldown\nVersion\n");
        let file = raw(&[hash_pair("Spells", "Cooldown"), hash("Version"), 12345, hash_pair("Data", "BaseHP")]);
        let organized = organize(&file, &dict);

        let names: Vec<_> = organized.sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Data", "Globals", "Spells", "Unknowns"]);

        let data = organized.section("Data").unwrap();
        assert_eq!(data.hash, hash("Data"));
        assert_eq!(data.properties[0].name.as_deref(), Some("BaseHP"));
        assert_eq!(organized.section("Globals").unwrap().properties[0].name.as_deref(), Some("Version"));
        assert_eq!(organized.section("Unknowns").unwrap().properties[0].name.as_deref(), Some("Unknown_12345"));
    }

    #[test]
    fn leaves_input_untouched() {
        let dict = NameDictionary::new();
        let file = raw(&[1, 2]);
        let organized = organize(&file, &dict);
        assert!(file.properties().all(|p| p.name.is_none()));
        assert_eq!(organized.property_count(), 2);
        assert_eq!(organized.sections.len(), 1);
    }
}
