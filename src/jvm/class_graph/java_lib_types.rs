use super::{ClassData, ClassGraph};
use crate::jvm::BinaryName;

/// `(name, superclass, interfaces, is_interface)`
///
/// Classes appear after their superclass and interfaces. This is only the part of the JDK that
/// compiled code commonly merges types across; anything else has to come from the classpath.
const JAVA_TYPES: &[(&str, Option<&str>, &[&str], bool)] = &[
    ("java/lang/Object", None, &[], false),
    ("java/io/Serializable", Some("java/lang/Object"), &[], true),
    ("java/lang/Cloneable", Some("java/lang/Object"), &[], true),
    ("java/lang/Comparable", Some("java/lang/Object"), &[], true),
    ("java/lang/CharSequence", Some("java/lang/Object"), &[], true),
    ("java/lang/Runnable", Some("java/lang/Object"), &[], true),
    ("java/lang/AutoCloseable", Some("java/lang/Object"), &[], true),
    ("java/io/Closeable", Some("java/lang/Object"), &["java/lang/AutoCloseable"], true),
    ("java/lang/Iterable", Some("java/lang/Object"), &[], true),
    ("java/util/Collection", Some("java/lang/Object"), &["java/lang/Iterable"], true),
    ("java/util/List", Some("java/lang/Object"), &["java/util/Collection"], true),
    ("java/util/Set", Some("java/lang/Object"), &["java/util/Collection"], true),
    ("java/util/Map", Some("java/lang/Object"), &[], true),
    ("java/util/Iterator", Some("java/lang/Object"), &[], true),
    (
        "java/lang/String",
        Some("java/lang/Object"),
        &["java/io/Serializable", "java/lang/Comparable", "java/lang/CharSequence"],
        false,
    ),
    (
        "java/lang/StringBuilder",
        Some("java/lang/Object"),
        &["java/io/Serializable", "java/lang/CharSequence"],
        false,
    ),
    ("java/lang/Class", Some("java/lang/Object"), &["java/io/Serializable"], false),
    ("java/lang/Number", Some("java/lang/Object"), &["java/io/Serializable"], false),
    ("java/lang/Integer", Some("java/lang/Number"), &["java/lang/Comparable"], false),
    ("java/lang/Long", Some("java/lang/Number"), &["java/lang/Comparable"], false),
    ("java/lang/Float", Some("java/lang/Number"), &["java/lang/Comparable"], false),
    ("java/lang/Double", Some("java/lang/Number"), &["java/lang/Comparable"], false),
    ("java/lang/Short", Some("java/lang/Number"), &["java/lang/Comparable"], false),
    ("java/lang/Byte", Some("java/lang/Number"), &["java/lang/Comparable"], false),
    (
        "java/lang/Character",
        Some("java/lang/Object"),
        &["java/io/Serializable", "java/lang/Comparable"],
        false,
    ),
    (
        "java/lang/Boolean",
        Some("java/lang/Object"),
        &["java/io/Serializable", "java/lang/Comparable"],
        false,
    ),
    ("java/lang/Throwable", Some("java/lang/Object"), &["java/io/Serializable"], false),
    ("java/lang/Exception", Some("java/lang/Throwable"), &[], false),
    ("java/lang/Error", Some("java/lang/Throwable"), &[], false),
    ("java/lang/RuntimeException", Some("java/lang/Exception"), &[], false),
    ("java/lang/InterruptedException", Some("java/lang/Exception"), &[], false),
    ("java/io/IOException", Some("java/lang/Exception"), &[], false),
    ("java/lang/AssertionError", Some("java/lang/Error"), &[], false),
    (
        "java/lang/IllegalArgumentException",
        Some("java/lang/RuntimeException"),
        &[],
        false,
    ),
    (
        "java/lang/IllegalStateException",
        Some("java/lang/RuntimeException"),
        &[],
        false,
    ),
    (
        "java/lang/NullPointerException",
        Some("java/lang/RuntimeException"),
        &[],
        false,
    ),
    (
        "java/lang/ArithmeticException",
        Some("java/lang/RuntimeException"),
        &[],
        false,
    ),
    (
        "java/lang/UnsupportedOperationException",
        Some("java/lang/RuntimeException"),
        &[],
        false,
    ),
    ("java/lang/invoke/MethodHandle", Some("java/lang/Object"), &[], false),
    ("java/lang/invoke/MethodType", Some("java/lang/Object"), &["java/io/Serializable"], false),
];

pub fn add_to_graph(class_graph: &ClassGraph<'_>) {
    for &(name, superclass, interfaces, is_interface) in JAVA_TYPES {
        class_graph.add_class(ClassData {
            name: BinaryName::name(name),
            superclass: superclass.map(BinaryName::name),
            interfaces: interfaces.iter().copied().map(BinaryName::name).collect(),
            is_interface,
        });
    }
}
