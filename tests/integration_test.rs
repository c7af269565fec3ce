use inibin::document::{Document, FileKind, LoadOptions};
use inibin::hash::{hash, hash_pair};
use inibin::luaobj::{tree_from_state, Interpreter, LuaObjReader, LuaObjWriter, LUA_GLOBALS_SECTION};
use inibin::model::{InibinFile, Value, ValueType, UNKNOWNS_SECTION};
use inibin::{organize, HeuristicResolver, InibinReader, InibinWriter, NameDictionary};
use std::fs;
use tempfile::{tempdir, Builder};

const RULES: &str = "\
Data*BaseHP
Data*AttackRange
Data*Name
Data*IsMelee
Data*Color
Version
";

fn sample_file() -> InibinFile {
    let mut file = InibinFile::new();
    file.add_property("Data", "BaseHP", Value::Int32(530), ValueType::Int32);
    file.add_property("Data", "AttackRange", Value::Float(550.0), ValueType::Float);
    file.add_property("Data", "Name", Value::String("Annie".into()), ValueType::String);
    file.add_property("Data", "IsMelee", Value::Bool(false), ValueType::Bool);
    file.add_property("Data", "Color", Value::Vec3([0.5, 1.0, 2.5]), ValueType::Vec3ByteDiv10);
    // A bare rule names `hash("Version")` and routes it to `Globals`.
    file.add_raw(hash("Version"), Value::ByteDiv10(1.2), ValueType::ByteDiv10, &NameDictionary::from_rules(RULES));
    file
}

#[test]
fn test_organized_round_trip_through_bytes() {
    let dict = NameDictionary::from_rules(RULES);
    let bytes = InibinWriter::write(&sample_file()).unwrap();

    let organized = organize(&InibinReader::read(&bytes).unwrap(), &dict);
    let names: Vec<_> = organized.sections.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["Data", "Globals"]);

    let data = organized.section("Data").unwrap();
    assert_eq!(data.properties.len(), 5);
    let (_, hp) = organized.find_hash(hash_pair("Data", "BaseHP")).unwrap();
    assert_eq!(hp.name.as_deref(), Some("BaseHP"));
    assert_eq!(hp.value, Value::Int32(530));

    let (section, version) = organized.find_hash(hash("Version")).unwrap();
    assert_eq!(section, "Globals");
    assert_eq!(version.value, Value::ByteDiv10(1.2));
}

#[test]
fn test_write_read_write_is_stable() {
    // Sections are flattened on write, so the second encoding of the
    // organized tree must equal the first.
    let dict = NameDictionary::from_rules(RULES);
    let first = InibinWriter::write(&sample_file()).unwrap();
    let organized = organize(&InibinReader::read(&first).unwrap(), &dict);
    let second = InibinWriter::write(&organized).unwrap();
    assert_eq!(first, second);
    assert_eq!(organize(&InibinReader::read(&second).unwrap(), &dict), organized);

    let unorganized = InibinReader::read(&first).unwrap();
    assert_eq!(InibinWriter::write(&unorganized).unwrap(), first);
}

#[test]
fn test_unknown_hashes_survive() {
    let mut file = InibinFile::new();
    file.add_raw(0xDEAD_BEEF, Value::Int16(-7), ValueType::Int16, &NameDictionary::new());
    assert_eq!(file.sections[0].name, UNKNOWNS_SECTION);

    let bytes = InibinWriter::write(&file).unwrap();
    let back = organize(&InibinReader::read(&bytes).unwrap(), &NameDictionary::new());
    let p = &back.section(UNKNOWNS_SECTION).unwrap().properties[0];
    assert_eq!(p.hash, 0xDEAD_BEEF);
    assert_eq!(p.display_name(), "Unknown_3735928559");
    assert_eq!(p.value, Value::Int16(-7));
}

#[test]
fn test_troybin_dynamic_sections_are_deterministic() {
    let mut file = InibinFile::new();
    file.add_property("System", "GroupPart1", Value::String("Spark".into()), ValueType::String);
    file.add_property("System", "GroupPart2", Value::String("Smoke".into()), ValueType::String);
    file.add_property("Spark", "Lifetime", Value::Float(2.0), ValueType::Float);
    file.add_property("Smoke", "Lifetime", Value::Float(4.0), ValueType::Float);
    file.add_property("Smoke", "Rate", Value::Int32(30), ValueType::Int32);
    let bytes = InibinWriter::write(&file).unwrap();

    let dict = NameDictionary::from_rules("System*GroupPart1\nSystem*GroupPart2\n");
    let resolver = HeuristicResolver::new(["Rate", "Lifetime"]);

    let run = || {
        let mut organized = organize(&InibinReader::read(&bytes).unwrap(), &dict);
        let report = resolver.resolve(&mut organized);
        (organized, report)
    };
    let (a, report) = run();
    let (b, _) = run();
    assert_eq!(a, b);
    assert_eq!(report.groups, ["Spark", "Smoke"]);
    assert_eq!(report.resolved, 3);

    let names: Vec<_> = a.sections.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["Smoke", "Spark", "System"]);
    assert_eq!(a.section("Smoke").unwrap().properties.len(), 2);
    assert!(a.section(UNKNOWNS_SECTION).is_none());
}

#[test]
fn test_luaobj_echo_through_bytes() {
    let mut file = InibinFile::new();
    file.add_property(LUA_GLOBALS_SECTION, "Speed", Value::Float(1.5), ValueType::Float);
    file.add_property("Data", "X", Value::Float(1.0), ValueType::Float);
    file.add_property("Data", "[1]", Value::String("first".into()), ValueType::String);

    let bytes = LuaObjWriter::write(&file).unwrap();
    assert_eq!(&bytes[..4], b"\x1bLua");

    let chunk = LuaObjReader::read(&bytes).unwrap();
    let mut vm = Interpreter::new();
    vm.interpret(&chunk);
    let back = tree_from_state(&vm);

    let names: Vec<_> = back.sections.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, [LUA_GLOBALS_SECTION, "Data"]);
    let data = back.section("Data").unwrap();
    let keys: Vec<_> = data.properties.iter().map(|p| p.display_name().into_owned()).collect();
    assert_eq!(keys, ["[1]", "X"]);
    assert_eq!(back.section(LUA_GLOBALS_SECTION).unwrap().properties[0].value, Value::Float(1.5));

    // The compiled chunk re-serializes byte for byte.
    assert_eq!(LuaObjWriter::serialize(&chunk).unwrap(), bytes);
}

#[test]
fn test_document_save_and_open() {
    let dir = tempdir().unwrap();
    let dict_path = dir.path().join("dict.txt");
    fs::write(&dict_path, RULES).unwrap();
    let options = LoadOptions { dictionary: Some(dict_path), ..LoadOptions::bare() };

    let path = dir.path().join("annie.inibin");
    Document::from_file(FileKind::Inibin, sample_file()).save(&path).unwrap();

    let mut doc = Document::open(&path, &options).unwrap();
    assert_eq!(doc.kind(), FileKind::Inibin);
    assert_eq!(doc.file().property_count(), 6);
    assert_eq!(doc.file().section("Data").unwrap().properties.len(), 5);

    doc.add_raw(hash_pair("Data", "Name"), Value::String("Tibbers".into()), ValueType::String);
    let removed = doc.file_mut().remove_property(hash_pair("Data", "Name")).unwrap();
    assert_eq!(removed.value, Value::String("Annie".into()));
    doc.save(&path).unwrap();

    let reopened = Document::open(&path, &options).unwrap();
    let (_, name) = reopened.file().find_hash(hash_pair("Data", "Name")).unwrap();
    assert_eq!(name.value, Value::String("Tibbers".into()));
}

#[test]
fn test_document_luaobj_file() {
    let temp = Builder::new().suffix(".luaobj").tempfile().unwrap();
    let mut file = InibinFile::new();
    file.add_property("Config", "Enabled", Value::Bool(true), ValueType::Bool);
    Document::from_file(FileKind::LuaObj, file).save(temp.path()).unwrap();

    let doc = Document::open(temp.path(), &LoadOptions::bare()).unwrap();
    let (section, p) = doc.file().find_hash(hash_pair("Config", "Enabled")).unwrap();
    assert_eq!(section, "Config");
    assert_eq!(p.value, Value::Bool(true));
}

#[test]
fn test_truncated_inputs_fail_cleanly() {
    let bytes = InibinWriter::write(&sample_file()).unwrap();
    for len in [0, 3, bytes.len() / 2, bytes.len() - 1] {
        assert!(InibinReader::read(&bytes[..len]).is_err(), "prefix of {len} bytes decoded");
    }

    let lua = LuaObjWriter::write(&sample_file()).unwrap();
    for len in [0, 8, lua.len() / 2, lua.len() - 1] {
        assert!(LuaObjReader::read(&lua[..len]).is_err(), "prefix of {len} bytes decoded");
    }
}
