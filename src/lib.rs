pub mod hash;
pub mod model;
pub mod dictionary;
pub mod inibin;
pub mod organize;
pub mod resolver;
pub mod luaobj;
pub mod document;

pub use hash::{hash, hash_pair, hash_with_seed};
pub use model::{InibinFile, Property, Section, Value, ValueType};
pub use dictionary::NameDictionary;
pub use inibin::{InibinError, InibinReader, InibinWriter};
pub use organize::organize;
pub use resolver::{HeuristicResolver, ResolveReport};
pub use luaobj::{Chunk, Interpreter, LuaObjError, LuaObjReader, LuaObjWriter};
pub use document::{Document, DocumentError, FileKind, LoadOptions};
