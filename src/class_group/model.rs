//! Decoded class-group object model (SPEC_FULL.md §3). Every borrowed
//! reference here is tied to the owning `ClassGroup`'s arena lifetime.

#[derive(Debug, Clone, Copy)]
pub struct ExternalReference<'a> {
    pub name: &'a str,
    pub system_type: u16,
    pub type_word: u16,
    pub unnamed1: u16,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccessFlags {
    pub constant: bool,
    pub indirect: bool,
    pub user_defined: bool,
}

#[derive(Debug, Clone)]
pub struct Variable<'a> {
    pub read_access: Option<&'a str>,
    pub write_access: Option<&'a str>,
    pub type_name: &'a str,
    pub name: &'a str,
    pub dimensions: Option<&'a str>,
    pub initial_values: Vec<&'a str>,
    pub flags: AccessFlags,
}

#[derive(Debug, Clone)]
pub struct Argument<'a> {
    pub access: Option<&'a str>,
    pub type_name: &'a str,
    pub name: Option<&'a str>,
    pub dimensions: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Function,
    Subroutine,
    Event,
}

#[derive(Debug, Clone)]
pub struct Script<'a> {
    pub name: &'a str,
    pub access: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub external_name: Option<&'a str>,
    pub library: Option<&'a str>,
    pub return_type: Option<&'a str>,
    pub event_type: Option<&'a str>,
    pub local_variables: Vec<Variable<'a>>,
    pub arguments: Vec<Argument<'a>>,
    pub throws: Vec<&'a str>,
    pub method_id: u16,
    pub method_number: u16,
    pub event: bool,
    pub hidden: bool,
    pub system: bool,
    pub rpc: bool,
    pub in_ancestor: bool,
    pub code: Option<&'a [u8]>,
    pub debug_lines: Vec<(u16, u16)>,
    pub resources: Option<crate::data_table::DataTable>,
}

impl Script<'_> {
    #[must_use]
    pub fn implemented(&self) -> bool {
        self.code.is_some()
    }

    #[must_use]
    pub fn kind(&self) -> ScriptKind {
        if self.event {
            ScriptKind::Event
        } else if self.return_type.is_some() {
            ScriptKind::Function
        } else {
            ScriptKind::Subroutine
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassDefinition<'a> {
    pub ancestor: &'a str,
    pub parent: Option<&'a str>,
    pub autoinstantiate: bool,
    pub instance_variables: Vec<Variable<'a>>,
    pub scripts: Vec<Script<'a>>,
}

#[derive(Debug, Clone)]
pub struct Enumeration<'a> {
    pub values: Vec<(&'a str, u16)>,
}

#[derive(Debug, Clone)]
pub enum TypeKind<'a> {
    Enum(Enumeration<'a>),
    Class(ClassDefinition<'a>),
    InitSource,
    SharedSource,
    GlobalSource,
}

#[derive(Debug, Clone)]
pub struct TypeEntry<'a> {
    pub name: &'a str,
    pub kind: TypeKind<'a>,
}

/// The decoded content of one library entry (SPEC_FULL.md §3).
pub struct ClassGroup<'a> {
    pub compiler_version: u16,
    pub global_variables: Vec<Variable<'a>>,
    pub types: Vec<TypeEntry<'a>>,
}

impl<'a> ClassGroup<'a> {
    #[must_use]
    pub fn class_types(&self) -> impl Iterator<Item = (&str, &ClassDefinition<'a>)> {
        self.types.iter().filter_map(|t| match &t.kind {
            TypeKind::Class(c) => Some((t.name, c)),
            _ => None,
        })
    }
}
