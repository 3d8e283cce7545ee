use crate::jvm::class_graph::{ClassData, TypeNotFound, TypeUniverse};
use crate::jvm::{BinaryName, FieldType, RefType};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Subtyping queries over a type universe
///
/// Every query resolves the classes it needs on demand, so a query touching a class missing from
/// the universe fails with [`TypeNotFound`].
#[derive(Clone, Copy)]
pub struct TypeHierarchy<'u> {
    universe: &'u dyn TypeUniverse,
}

impl<'u> TypeHierarchy<'u> {
    pub fn new(universe: &'u dyn TypeUniverse) -> TypeHierarchy<'u> {
        TypeHierarchy { universe }
    }

    pub fn resolve(&self, name: &BinaryName) -> Result<&'u ClassData, TypeNotFound> {
        self.universe.resolve(name)
    }

    pub fn is_interface(&self, name: &BinaryName) -> Result<bool, TypeNotFound> {
        Ok(self.resolve(name)?.is_interface)
    }

    /// Is the first class assignable to the second?
    ///
    /// This does a traversal of super types to find the second class.
    pub fn is_assignable(
        &self,
        sub_type: &BinaryName,
        super_type: &BinaryName,
    ) -> Result<bool, TypeNotFound> {
        let sub_class = self.resolve(sub_type)?;
        if sub_type == super_type || super_type == &BinaryName::OBJECT {
            return Ok(true);
        }

        let mut supertypes_to_visit: Vec<&ClassData> = vec![sub_class];
        let mut dont_revisit: HashSet<&BinaryName> = HashSet::new();
        dont_revisit.insert(sub_type);

        // Optimization: if the super type is a class, then skip visiting interfaces
        let super_is_class: bool = !self.is_interface(super_type)?;

        while let Some(class_data) = supertypes_to_visit.pop() {
            if &class_data.name == super_type {
                return Ok(true);
            }

            // Enqueue next types to visit
            if let Some(superclass) = &class_data.superclass {
                if dont_revisit.insert(superclass) {
                    supertypes_to_visit.push(self.resolve(superclass)?);
                }
            }
            if !super_is_class {
                for interface in &class_data.interfaces {
                    if dont_revisit.insert(interface) {
                        supertypes_to_visit.push(self.resolve(interface)?);
                    }
                }
            }
        }

        Ok(false)
    }

    /// Nearest class both arguments are assignable to
    ///
    /// When one class is assignable to the other, the more general one is returned. Otherwise,
    /// if either one is an interface, there is no single best answer and `java/lang/Object` is
    /// returned. Otherwise, the superclass chain of the first class is walked until reaching a
    /// class the second one is assignable to.
    pub fn common_super_class(
        &self,
        class1: &BinaryName,
        class2: &BinaryName,
    ) -> Result<BinaryName, TypeNotFound> {
        self.resolve(class1)?;
        self.resolve(class2)?;
        if self.is_assignable(class2, class1)? {
            return Ok(class1.clone());
        }
        if self.is_assignable(class1, class2)? {
            return Ok(class2.clone());
        }
        if self.is_interface(class1)? || self.is_interface(class2)? {
            return Ok(BinaryName::OBJECT);
        }

        let mut current = self.resolve(class1)?;
        loop {
            let superclass = match &current.superclass {
                Some(superclass) => superclass,
                None => return Ok(BinaryName::OBJECT),
            };
            if self.is_assignable(class2, superclass)? {
                return Ok(superclass.clone());
            }
            current = self.resolve(superclass)?;
        }
    }

    /// Is one reference type assignable to another?
    ///
    /// This matches the semantics of the prolog predicate `isJavaAssignable(sub_type,
    /// super_type)` in the JVM verifier specification.
    pub fn is_ref_assignable(
        &self,
        sub_type: &RefType,
        super_type: &RefType,
    ) -> Result<bool, TypeNotFound> {
        Ok(match (sub_type, super_type) {
            // Special superclass and interfaces of all arrays
            (RefType::PrimitiveArray(_) | RefType::ObjectArray(_), RefType::Object(name)) => {
                is_array_type_assignable(name)
            }

            // Primitive arrays must match in dimension and type
            (RefType::PrimitiveArray(arr1), RefType::PrimitiveArray(arr2)) => arr1 == arr2,

            // Higher dimensional primitive arrays can be subtypes of object arrays
            (RefType::PrimitiveArray(arr1), RefType::ObjectArray(arr2)) => {
                match arr1.additional_dimensions.cmp(&arr2.additional_dimensions) {
                    Ordering::Less | Ordering::Equal => false,
                    Ordering::Greater => is_array_type_assignable(&arr2.element_type),
                }
            }

            // Cursed (unsound) covariance of arrays
            (RefType::ObjectArray(arr1), RefType::ObjectArray(arr2)) => {
                match arr1.additional_dimensions.cmp(&arr2.additional_dimensions) {
                    Ordering::Less => false,
                    Ordering::Equal => {
                        self.is_assignable(&arr1.element_type, &arr2.element_type)?
                    }
                    Ordering::Greater => is_array_type_assignable(&arr2.element_type),
                }
            }

            // Object-to-object assignability holds if there is a path through super type edges
            (RefType::Object(cls1), RefType::Object(cls2)) => self.is_assignable(cls1, cls2)?,

            _ => false,
        })
    }

    /// Least precise reference type that two reference types can be merged into
    ///
    /// Classes merge to their common superclass, arrays of references merge element-wise, and
    /// anything else merges to `java/lang/Object`.
    pub fn merge_ref_types(&self, type1: &RefType, type2: &RefType) -> Result<RefType, TypeNotFound> {
        if type1 == type2 {
            return Ok(type1.clone());
        }
        match (type1, type2) {
            (RefType::Object(cls1), RefType::Object(cls2)) => {
                Ok(RefType::Object(self.common_super_class(cls1, cls2)?))
            }
            _ => match (type1.element_type(), type2.element_type()) {
                (Some(FieldType::Ref(elem1)), Some(FieldType::Ref(elem2))) => {
                    let merged = self.merge_ref_types(&elem1, &elem2)?;
                    Ok(RefType::array(FieldType::Ref(merged)))
                }
                _ => Ok(RefType::OBJECT),
            },
        }
    }
}

/// Check if arrays can be assigned to a super type
///
/// This bakes in knowledge of the small, finite set of super types arrays have.
fn is_array_type_assignable(super_type: &BinaryName) -> bool {
    super_type == &BinaryName::OBJECT
        || super_type == &BinaryName::CLONEABLE
        || super_type == &BinaryName::SERIALIZABLE
}

#[cfg(test)]
mod test {
    use crate::jvm::class_graph::{ClassData, ClassGraph, ClassGraphArenas, TypeHierarchy};
    use crate::jvm::{BinaryName, FieldType, RefType};
    use std::collections::HashMap;

    fn name(name: &str) -> BinaryName {
        name.parse().unwrap()
    }

    #[test]
    fn simple_classes() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        class_graph.insert_java_library_types();
        let hierarchy = TypeHierarchy::new(&class_graph);

        let object = &BinaryName::OBJECT;
        let string = &BinaryName::STRING;
        let charsequence = &BinaryName::CHARSEQUENCE;

        assert!(hierarchy.is_assignable(object, object).unwrap());
        assert!(hierarchy.is_assignable(string, object).unwrap());
        assert!(!hierarchy.is_assignable(object, string).unwrap());
        assert!(hierarchy.is_assignable(string, charsequence).unwrap());
        assert!(!hierarchy.is_assignable(charsequence, string).unwrap());
    }

    #[test]
    fn transitive_classes() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        class_graph.insert_java_library_types();
        let hierarchy = TypeHierarchy::new(&class_graph);

        let number = &BinaryName::NUMBER;
        let integer = &BinaryName::INTEGER;
        let runtime = &BinaryName::RUNTIMEEXCEPTION;
        let throwable = &BinaryName::THROWABLE;

        assert!(hierarchy.is_assignable(integer, number).unwrap());
        assert!(!hierarchy.is_assignable(number, integer).unwrap());
        assert!(hierarchy.is_assignable(runtime, throwable).unwrap());
        assert!(hierarchy
            .is_assignable(integer, &BinaryName::SERIALIZABLE)
            .unwrap());
    }

    #[test]
    fn common_super_classes() {
        let mut universe: HashMap<BinaryName, ClassData> = HashMap::new();
        let mut add = |class: ClassData| {
            universe.insert(class.name.clone(), class);
        };
        add(ClassData {
            name: BinaryName::OBJECT,
            superclass: None,
            interfaces: vec![],
            is_interface: false,
        });
        add(ClassData::new(name("p/InterfaceA"), BinaryName::OBJECT, true));
        add(ClassData::new(name("p/InterfaceB"), BinaryName::OBJECT, true));
        add(ClassData::new(name("p/Base"), BinaryName::OBJECT, false));
        add(ClassData {
            interfaces: vec![name("p/InterfaceA")],
            ..ClassData::new(name("p/SubclassX"), name("p/Base"), false)
        });
        add(ClassData::new(name("p/SubclassY"), name("p/Base"), false));
        add(ClassData::new(name("p/SubclassZ"), name("p/SubclassY"), false));
        let hierarchy = TypeHierarchy::new(&universe);

        // Unrelated interfaces
        assert_eq!(
            hierarchy
                .common_super_class(&name("p/InterfaceA"), &name("p/InterfaceB"))
                .unwrap(),
            BinaryName::OBJECT
        );

        // Siblings
        assert_eq!(
            hierarchy
                .common_super_class(&name("p/SubclassX"), &name("p/SubclassY"))
                .unwrap(),
            name("p/Base")
        );
        assert_eq!(
            hierarchy
                .common_super_class(&name("p/SubclassZ"), &name("p/SubclassX"))
                .unwrap(),
            name("p/Base")
        );

        // One assignable to the other
        assert_eq!(
            hierarchy
                .common_super_class(&name("p/SubclassZ"), &name("p/SubclassY"))
                .unwrap(),
            name("p/SubclassY")
        );
        assert_eq!(
            hierarchy
                .common_super_class(&name("p/SubclassX"), &name("p/InterfaceA"))
                .unwrap(),
            name("p/InterfaceA")
        );

        // Missing types are reported by name
        let missing = hierarchy
            .common_super_class(&name("p/Base"), &name("p/Missing"))
            .unwrap_err();
        assert_eq!(missing.0, name("p/Missing"));
        let missing = hierarchy
            .common_super_class(&name("p/Missing"), &BinaryName::OBJECT)
            .unwrap_err();
        assert_eq!(missing.0, name("p/Missing"));
        assert!(hierarchy
            .is_assignable(&name("p/Missing"), &BinaryName::OBJECT)
            .is_err());
    }

    #[test]
    fn arrays() {
        let arenas = ClassGraphArenas::new();
        let class_graph = ClassGraph::new(&arenas);
        class_graph.insert_java_library_types();
        let hierarchy = TypeHierarchy::new(&class_graph);

        let object = &RefType::OBJECT;
        let int_array = &RefType::array(FieldType::int());
        let long_array = &RefType::array(FieldType::long());
        let integer_array = &RefType::array(FieldType::object(BinaryName::INTEGER));
        let number_array = &RefType::array(FieldType::object(BinaryName::NUMBER));
        let nested_int_array = &RefType::array(FieldType::array(FieldType::int()));
        let object_array = &RefType::array(FieldType::object(BinaryName::OBJECT));
        let long_object_array = RefType::array(FieldType::object(name("java/lang/Long")));

        assert!(hierarchy.is_ref_assignable(int_array, object).unwrap());
        assert!(!hierarchy.is_ref_assignable(object, int_array).unwrap());
        assert!(!hierarchy.is_ref_assignable(int_array, long_array).unwrap());
        assert!(hierarchy
            .is_ref_assignable(integer_array, number_array)
            .unwrap());
        assert!(!hierarchy
            .is_ref_assignable(number_array, integer_array)
            .unwrap());
        assert!(hierarchy
            .is_ref_assignable(nested_int_array, object_array)
            .unwrap());

        assert_eq!(
            hierarchy
                .merge_ref_types(integer_array, &long_object_array)
                .unwrap(),
            number_array.clone()
        );
        assert_eq!(
            hierarchy.merge_ref_types(int_array, long_array).unwrap(),
            RefType::OBJECT
        );
    }
}
