use cranelift_entity::{entity_impl, PrimaryMap};

use crate::{
    debug::{DebugInfo, DebugVarId},
    function::Function,
    types::Type,
};

/// A module-level global variable or constant
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalId(u32);
entity_impl!(GlobalId, "global");

/// The initialiser of a global
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalInit {
    /// Zero-initialised storage
    Zero,
    Int(i64),
    /// A NUL-terminated string constant
    Str(String),
}

#[derive(Debug, Clone)]
pub struct GlobalData {
    pub name: String,
    pub ty: Type,
    /// `None` marks an external declaration; such globals are never inspected
    pub init: Option<GlobalInit>,
    pub constant: bool,
    /// The debug record for this global, when the front end attached one
    pub debug_var: Option<DebugVarId>,
}

/// A parsed IR module with debug metadata, ready for instrumentation
#[derive(Debug)]
pub struct Module {
    /// The source file this module was compiled from, e.g. `list.c`
    pub source_file: String,
    pub functions: Vec<Function>,
    pub globals: PrimaryMap<GlobalId, GlobalData>,
    pub debug: DebugInfo,
}

impl Module {
    pub fn new(source_file: impl Into<String>) -> Self {
        Self {
            source_file: source_file.into(),
            functions: Vec::new(),
            globals: PrimaryMap::new(),
            debug: DebugInfo::default(),
        }
    }

    pub fn add_function(&mut self, function: Function) -> usize {
        self.functions.push(function);
        self.functions.len() - 1
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn declare_global(&mut self, data: GlobalData) -> GlobalId {
        self.globals.push(data)
    }

    /// Interns a NUL-terminated string constant, reusing an existing one with
    /// the same contents
    pub fn intern_string(&mut self, s: &str) -> GlobalId {
        intern_string(&mut self.globals, s)
    }
}

/// [`Module::intern_string`] over a split-borrowed globals map, for callers
/// that hold other parts of the module mutably
pub fn intern_string(globals: &mut PrimaryMap<GlobalId, GlobalData>, s: &str) -> GlobalId {
    if let Some((id, _)) = globals
        .iter()
        .find(|(_, g)| matches!(&g.init, Some(GlobalInit::Str(existing)) if existing == s))
    {
        return id;
    }
    let index = globals.len();
    globals.push(GlobalData {
        name: format!("str.{index}"),
        ty: Type::array(Type::I8, s.len() as u64 + 1),
        init: Some(GlobalInit::Str(s.to_string())),
        constant: true,
        debug_var: None,
    })
}
