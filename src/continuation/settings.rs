/// Knobs for [`super::ClassTransformer`]
#[derive(Debug, Clone)]
pub struct Settings {
    /// Emit a `StackMapTable` for rewritten methods
    ///
    /// Frames are only ever emitted for class files of version 50 and above, since older
    /// verifiers infer them.
    pub compute_frames: bool,

    /// Fail on allocation idioms the provenance analysis does not recognize
    ///
    /// By default, an initializer whose receiver cannot be traced back to an allocation through
    /// one of the known idioms is left alone, counted, and logged as a warning.
    pub strict_idioms: bool,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            compute_frames: true,
            strict_idioms: false,
        }
    }
}
