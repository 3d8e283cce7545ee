//! The type universe: which classes exist, and how they relate to each other
//!
//! Computing stack map frames requires merging reference types coming from different control
//! flow paths, which in turn requires knowing superclasses and interfaces. Since the classes
//! being rewritten refer to types they don't define, the universe of known types is supplied
//! from the outside through [`TypeUniverse`]. [`ClassGraph`] is the usual implementation: an
//! append-only graph seeded with the core Java library types and extended with class file
//! headers.

use crate::jvm::class_file::ClassFile;
use crate::jvm::{BinaryName, ClassAccessFlags, Error};
use elsa::map::FrozenMap;
use std::collections::HashMap;
use std::fmt;
use typed_arena::Arena;

mod assignable;
mod java_lib_types;

pub use assignable::*;

/// Header information about a class or interface
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ClassData {
    /// Name of the class
    pub name: BinaryName,

    /// Superclass is only ever missing for `java/lang/Object` itself
    ///
    /// Interfaces have `java/lang/Object` as their superclass.
    pub superclass: Option<BinaryName>,

    /// Interfaces implemented (or super-interfaces)
    pub interfaces: Vec<BinaryName>,

    /// Is this an interface?
    pub is_interface: bool,
}

impl ClassData {
    pub fn new(name: BinaryName, superclass: BinaryName, is_interface: bool) -> ClassData {
        ClassData {
            name,
            superclass: Some(superclass),
            interfaces: vec![],
            is_interface,
        }
    }

    /// Extract the header of a parsed class file
    pub fn from_class_file(class: &ClassFile) -> Result<ClassData, Error> {
        Ok(ClassData {
            name: class.class_name()?,
            superclass: class.super_class_name()?,
            interfaces: class.interface_names()?,
            is_interface: class.access_flags.contains(ClassAccessFlags::INTERFACE),
        })
    }
}

/// A type could not be found in the type universe
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TypeNotFound(pub BinaryName);

impl fmt::Display for TypeNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type '{}' could not be resolved", self.0)
    }
}

impl std::error::Error for TypeNotFound {}

/// Source of class headers
///
/// Queries are read-only, so a universe shared between threads only has to support concurrent
/// reads (the `HashMap` implementation below is `Sync`).
pub trait TypeUniverse {
    fn resolve(&self, name: &BinaryName) -> Result<&ClassData, TypeNotFound>;
}

impl TypeUniverse for HashMap<BinaryName, ClassData> {
    fn resolve(&self, name: &BinaryName) -> Result<&ClassData, TypeNotFound> {
        self.get(name).ok_or_else(|| TypeNotFound(name.clone()))
    }
}

pub struct ClassGraphArenas {
    class_arena: Arena<ClassData>,
}

impl ClassGraphArenas {
    pub fn new() -> Self {
        ClassGraphArenas {
            class_arena: Arena::new(),
        }
    }
}

impl Default for ClassGraphArenas {
    fn default() -> Self {
        ClassGraphArenas::new()
    }
}

/// Tracks the relationships between classes/interfaces
///
/// The graph only ever grows, so it can hand out references to class data while still accepting
/// new classes through a shared reference.
pub struct ClassGraph<'g> {
    arenas: &'g ClassGraphArenas,
    classes: FrozenMap<&'g BinaryName, &'g ClassData>,
}

impl<'g> ClassGraph<'g> {
    /// New empty graph
    pub fn new(arenas: &'g ClassGraphArenas) -> Self {
        ClassGraph {
            arenas,
            classes: FrozenMap::new(),
        }
    }

    pub fn lookup_class(&self, name: &BinaryName) -> Option<&ClassData> {
        self.classes.get(name)
    }

    /// Add a new class to the class graph
    ///
    /// If a class by the same name is already present, the graph is left unchanged and the
    /// existing entry is returned.
    pub fn add_class(&self, data: ClassData) -> &ClassData {
        if let Some(existing) = self.classes.get(&data.name) {
            return existing;
        }
        let data: &'g ClassData = self.arenas.class_arena.alloc(data);
        self.classes.insert(&data.name, data)
    }

    /// Add the header of a parsed class file
    pub fn add_class_file(&self, class: &ClassFile) -> Result<&ClassData, Error> {
        Ok(self.add_class(ClassData::from_class_file(class)?))
    }

    /// Add standard types to the class graph
    pub fn insert_java_library_types(&self) {
        java_lib_types::add_to_graph(self)
    }
}

impl<'g> TypeUniverse for ClassGraph<'g> {
    fn resolve(&self, name: &BinaryName) -> Result<&ClassData, TypeNotFound> {
        self.lookup_class(name)
            .ok_or_else(|| TypeNotFound(name.clone()))
    }
}
