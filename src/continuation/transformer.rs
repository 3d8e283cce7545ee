use super::{ContinuationMethod, Error, Failure, MethodRef, Settings};
use crate::jvm::class_file::{ClassFile, Code, ConstantsPool, Method, Version};
use crate::jvm::class_graph::TypeUniverse;
use crate::jvm::{BinaryName, Name, UnqualifiedName};
use log::debug;

/// Inserts the actual state capture and restore logic around suspension points
///
/// The injector gets called once per rewritten method, after allocations have been relocated and
/// the body has been verified. It may freely edit the body: frames and maxima are recomputed
/// afterwards.
pub trait SuspensionInjector {
    fn inject(&self, method: &mut ContinuationMethod) -> Result<(), Failure>;
}

/// Injector leaving methods as they are
pub struct NoopInjector;

impl SuspensionInjector for NoopInjector {
    fn inject(&self, _method: &mut ContinuationMethod) -> Result<(), Failure> {
        Ok(())
    }
}

/// Decides which methods get rewritten
pub type MethodFilter<'a> = Box<dyn Fn(&MethodRef) -> bool + 'a>;

/// What happened to one method
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodOutcome {
    /// Rejected by the method filter
    NotSelected,

    /// No code, no instructions, or no suspension points: left byte-for-byte untouched
    Trivial,

    Rewritten {
        suspension_points: usize,
        relocated: usize,
        skipped_idioms: usize,
        max_stack: u16,
        max_locals: u16,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodReport {
    pub method: MethodRef,
    pub outcome: MethodOutcome,
}

/// Summary of the rewriting of a class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformReport {
    pub class: BinaryName,
    pub methods: Vec<MethodReport>,
}

impl TransformReport {
    pub fn rewritten(&self) -> usize {
        self.methods
            .iter()
            .filter(|report| matches!(report.outcome, MethodOutcome::Rewritten { .. }))
            .count()
    }

    /// Initializer receivers which matched no known allocation idiom, across all methods
    pub fn skipped_idioms(&self) -> usize {
        self.methods
            .iter()
            .map(|report| match report.outcome {
                MethodOutcome::Rewritten { skipped_idioms, .. } => skipped_idioms,
                _ => 0,
            })
            .sum()
    }
}

/// Rewrites every selected method of a class so that it is ready for a [`SuspensionInjector`]
///
/// Methods are processed one after another, and any failure aborts the whole class: there is no
/// partially rewritten output.
pub struct ClassTransformer<'a> {
    universe: &'a dyn TypeUniverse,
    settings: Settings,
    filter: MethodFilter<'a>,
    injector: Box<dyn SuspensionInjector + 'a>,
}

impl<'a> ClassTransformer<'a> {
    /// Transformer selecting every method except initializers
    pub fn new(universe: &'a dyn TypeUniverse, settings: Settings) -> ClassTransformer<'a> {
        ClassTransformer {
            universe,
            settings,
            filter: Box::new(|method: &MethodRef| {
                method.name != UnqualifiedName::INIT.as_str()
                    && method.name != UnqualifiedName::CLINIT.as_str()
            }),
            injector: Box::new(NoopInjector),
        }
    }

    pub fn with_filter(mut self, filter: impl Fn(&MethodRef) -> bool + 'a) -> Self {
        self.filter = Box::new(filter);
        self
    }

    pub fn with_injector(mut self, injector: impl SuspensionInjector + 'a) -> Self {
        self.injector = Box::new(injector);
        self
    }

    /// Rewrite a serialized class
    pub fn transform(&self, bytes: &[u8]) -> Result<Vec<u8>, Error> {
        let mut class = ClassFile::parse(bytes)?;
        self.transform_class(&mut class)?;
        Ok(class.to_bytes()?)
    }

    /// Rewrite a parsed class in place
    pub fn transform_class(&self, class: &mut ClassFile) -> Result<TransformReport, Error> {
        let class_name = class.class_name()?;
        let version = class.version;
        let constants = &mut class.constants;

        let mut methods = vec![];
        for method in class.methods.iter_mut() {
            let method_ref = MethodRef {
                owner: class_name.to_string(),
                name: method.name(constants)?.to_owned(),
                descriptor: method.descriptor(constants)?.to_owned(),
            };
            let outcome = if (self.filter)(&method_ref) {
                self.transform_method(&class_name, method, constants, version)
                    .map_err(|failure| Error::Method {
                        method: method_ref.clone(),
                        failure,
                    })?
            } else {
                MethodOutcome::NotSelected
            };
            debug!("{}: {:?}", method_ref, outcome);
            methods.push(MethodReport {
                method: method_ref,
                outcome,
            });
        }

        Ok(TransformReport {
            class: class_name,
            methods,
        })
    }

    fn transform_method(
        &self,
        class_name: &BinaryName,
        method: &mut Method,
        constants: &mut ConstantsPool,
        version: Version,
    ) -> Result<MethodOutcome, Failure> {
        let code_index = match method.find_attribute::<Code>(constants) {
            Some(index) => index,
            None => return Ok(MethodOutcome::Trivial),
        };
        let code: Code = method.attributes[code_index]
            .decode()
            .map_err(Failure::Analysis)?;

        let mut continuation = ContinuationMethod::decode(class_name, method, &code, constants)?;
        if continuation.is_trivial() {
            return Ok(MethodOutcome::Trivial);
        }

        continuation.relocate_allocations(&self.settings)?;
        continuation.verify(self.universe)?;
        self.injector.inject(&mut continuation)?;

        let suspension_points = continuation.suspension_points.len();
        let relocated = continuation.relocation.relocated;
        let skipped_idioms = continuation.provenance.skipped.len();
        let code = continuation.into_code(self.universe, constants, version, &self.settings)?;
        let outcome = MethodOutcome::Rewritten {
            suspension_points,
            relocated,
            skipped_idioms,
            max_stack: code.max_stack,
            max_locals: code.max_locals,
        };
        method.attributes[code_index] = constants.get_attribute(code).map_err(Failure::encoding)?;
        Ok(outcome)
    }
}
