//! Interpreter state → [`InibinFile`].
//!
//! Non-table entries of the root table go to the `Lua Globals` section,
//! which comes first; each table entry becomes its own section.  Numeric
//! keys are shown as `[N]`.  Tables nested deeper than one level stay as
//! [`Value::Table`].  Functions have no property representation and are
//! dropped.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use tracing::debug;

use super::interpreter::{Interpreter, LuaKey, LuaTable, LuaValue};
use crate::hash::hash_pair;
use crate::model::{InibinFile, Property, Section, Table, TableKey, Value};

/// Section holding the non-table root entries.
pub const LUA_GLOBALS_SECTION: &str = "Lua Globals";

/// Convert whatever the chunk built: the globals when it set any, else the
/// table it left in register 0.
pub fn tree_from_state(interpreter: &Interpreter) -> InibinFile {
    if !interpreter.globals().is_empty() {
        return tree_from_table(interpreter.globals());
    }
    match interpreter.register(0).and_then(LuaValue::as_table) {
        Some(root) => tree_from_table(&root.borrow()),
        None => InibinFile::new(),
    }
}

pub fn tree_from_table(root: &LuaTable) -> InibinFile {
    let mut globals = Section::named(LUA_GLOBALS_SECTION);
    let mut sections = Vec::new();
    let mut visiting = HashSet::new();

    for (key, value) in root.iter() {
        let name = key_name(key);
        match value {
            LuaValue::Table(table) => {
                let mut section = Section::named(&name);
                if visiting.insert(Rc::as_ptr(table)) {
                    for (k, v) in table.borrow().iter() {
                        let prop_name = key_name(k);
                        if let Some(value) = convert(v, &mut visiting) {
                            section.properties.push(named_property(&name, prop_name, value));
                        }
                    }
                    visiting.remove(&Rc::as_ptr(table));
                }
                sections.push(section);
            }
            other => {
                if let Some(value) = convert(other, &mut visiting) {
                    globals.properties.push(named_property(LUA_GLOBALS_SECTION, name, value));
                }
            }
        }
    }

    if !globals.properties.is_empty() {
        sections.insert(0, globals);
    }
    debug!(sections = sections.len(), "converted lua state to property tree");
    InibinFile { sections, ..InibinFile::new() }
}

fn named_property(section: &str, name: String, value: Value) -> Property {
    let ty = value.natural_type();
    Property { hash: hash_pair(section, &name), name: Some(name), value, ty }
}

/// Display form of a table key: `[N]` for numbers.
fn key_name(key: &LuaKey) -> String {
    match key {
        LuaKey::Number(n) => format!("[{n}]"),
        LuaKey::Bool(b)   => b.to_string(),
        LuaKey::String(s) => s.clone(),
    }
}

fn table_key(key: &LuaKey) -> TableKey {
    match key {
        LuaKey::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => TableKey::Index(*n as i64),
        other => TableKey::Name(key_name(other)),
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n >= i32::MIN as f64 && n <= i32::MAX as f64 {
        Value::Int32(n as i32)
    } else {
        Value::Float(n as f32)
    }
}

/// `None` for nil, functions and tables already on the conversion path.
fn convert(value: &LuaValue, visiting: &mut HashSet<*const RefCell<LuaTable>>) -> Option<Value> {
    match value {
        LuaValue::Nil | LuaValue::Function(_) => None,
        LuaValue::Bool(b)   => Some(Value::Bool(*b)),
        LuaValue::Number(n) => Some(number_value(*n)),
        LuaValue::String(s) => Some(Value::String(s.clone())),
        LuaValue::Table(t) => {
            let ptr = Rc::as_ptr(t);
            if !visiting.insert(ptr) {
                return None;
            }
            let mut table = Table::new();
            for (k, v) in t.borrow().iter() {
                if let Some(v) = convert(v, visiting) {
                    table.insert(table_key(k), v);
                }
            }
            visiting.remove(&ptr);
            Some(Value::Table(table))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash;
    use crate::model::ValueType;

    fn table(entries: Vec<(LuaKey, LuaValue)>) -> LuaValue {
        let mut t = LuaTable::default();
        for (k, v) in entries {
            t.set(k, v);
        }
        LuaValue::Table(Rc::new(RefCell::new(t)))
    }

    #[test]
    fn globals_first_then_table_sections() {
        let mut root = LuaTable::default();
        root.set(LuaKey::name("Version"), LuaValue::Number(3.0));
        root.set(LuaKey::name("Scale"), LuaValue::Number(0.5));
        root.set(
            LuaKey::name("Items"),
            table(vec![
                (LuaKey::Number(2.0), LuaValue::String("b".into())),
                (LuaKey::Number(1.0), LuaValue::String("a".into())),
            ]),
        );
        root.set(LuaKey::name("Fn"), LuaValue::Function(Rc::default()));

        let file = tree_from_table(&root);
        let names: Vec<_> = file.sections.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, [LUA_GLOBALS_SECTION, "Items"]);

        let globals = &file.sections[0];
        assert_eq!(globals.properties.len(), 2);
        assert_eq!(globals.properties[0].name.as_deref(), Some("Scale"));
        assert_eq!(globals.properties[0].value, Value::Float(0.5));
        assert_eq!(globals.properties[1].value, Value::Int32(3));
        assert_eq!(globals.properties[1].ty, ValueType::Int32);

        let items = &file.sections[1];
        assert_eq!(items.hash, hash("Items"));
        let keys: Vec<_> = items.properties.iter().map(|p| p.name.clone().unwrap()).collect();
        assert_eq!(keys, ["[1]", "[2]"]);
        assert_eq!(items.properties[0].hash, hash_pair("Items", "[1]"));
    }

    #[test]
    fn deeper_tables_stay_nested() {
        let mut root = LuaTable::default();
        root.set(
            LuaKey::name("Outer"),
            table(vec![(
                LuaKey::name("Inner"),
                table(vec![(LuaKey::Number(1.0), LuaValue::Bool(true))]),
            )]),
        );
        let file = tree_from_table(&root);
        let inner = &file.section("Outer").unwrap().properties[0];
        assert_eq!(inner.ty, ValueType::Table);
        let expected: Table = [(TableKey::Index(1), Value::Bool(true))].into_iter().collect();
        assert_eq!(inner.value, Value::Table(expected));
    }

    #[test]
    fn cycles_are_cut() {
        let inner = Rc::new(RefCell::new(LuaTable::default()));
        inner.borrow_mut().set(LuaKey::name("Self"), LuaValue::Table(inner.clone()));
        inner.borrow_mut().set(LuaKey::name("X"), LuaValue::Number(1.0));
        let mut root = LuaTable::default();
        root.set(LuaKey::name("T"), LuaValue::Table(inner.clone()));

        let file = tree_from_table(&root);
        let props = &file.section("T").unwrap().properties;
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].name.as_deref(), Some("X"));
        // Break the cycle so the test does not leak.
        inner.borrow_mut().set(LuaKey::name("Self"), LuaValue::Nil);
    }

    #[test]
    fn empty_state_gives_empty_file() {
        let vm = Interpreter::new();
        assert!(tree_from_state(&vm).sections.is_empty());
    }
}
