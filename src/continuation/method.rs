use super::{
    find_relocations, relocate_allocations, Failure, ProvenanceReport, RelocationSummary, Settings,
    SuspensionClassifier, SuspensionPoint,
};
use crate::jvm;
use crate::jvm::class_file::{
    Attribute, BytecodeArray, Code, ConstantsPool, ExceptionHandler, LineNumber, LineNumberTable,
    LocalVariable, LocalVariableTable, LocalVariableTypeTable, Method, Version,
};
use crate::jvm::class_graph::{TypeHierarchy, TypeUniverse};
use crate::jvm::code::{
    decode_method, emit, layout, Insn, InsnId, Layout, LocalVariableRange, MethodBody,
};
use crate::jvm::verifier::{analyze, fill_dead_code, stack_map_table, Frames, TypeInterpreter, VType};
use crate::jvm::{BinaryName, RefType};
use log::debug;

/// A method going through the rewrite
///
/// This is the model handed to a [`super::SuspensionInjector`]: once allocations have been
/// relocated and the body verified, every suspension point is addressable by its label and no
/// uninitialized reference is live across any of them.
#[derive(Debug)]
pub struct ContinuationMethod {
    pub body: MethodBody,

    /// Suspension calls with their guarding labels, in program order
    pub suspension_points: Vec<SuspensionPoint>,

    /// `invokespecial <init>` calls, in program order
    pub initializer_calls: Vec<InsnId>,

    /// Outcome of the provenance analysis (empty until allocations are relocated)
    pub provenance: ProvenanceReport,

    pub relocation: RelocationSummary,

    /// Verification types before each node, as of the last call to `verify`
    pub frames: Option<Frames<VType>>,
}

impl ContinuationMethod {
    /// Wrap a body that was built up with a [`SuspensionClassifier`]
    pub fn new(body: MethodBody, classifier: SuspensionClassifier) -> ContinuationMethod {
        ContinuationMethod {
            body,
            suspension_points: classifier.suspension_points,
            initializer_calls: classifier.initializer_calls,
            provenance: ProvenanceReport::default(),
            relocation: RelocationSummary::default(),
            frames: None,
        }
    }

    /// Decode the code of a method, tagging suspension points along the way
    pub fn decode(
        owner: &BinaryName,
        method: &Method,
        code: &Code,
        constants: &ConstantsPool,
    ) -> Result<ContinuationMethod, Failure> {
        let mut classifier = SuspensionClassifier::new();
        let body = decode_method(owner, method, code, constants, &mut classifier)
            .map_err(Failure::analysis)?;
        Ok(ContinuationMethod::new(body, classifier))
    }

    /// Methods without code or without suspension points need no rewriting at all
    pub fn is_trivial(&self) -> bool {
        !self.body.has_instructions() || self.suspension_points.is_empty()
    }

    /// Move every traceable allocation right in front of its initializer call
    pub fn relocate_allocations(&mut self, settings: &Settings) -> Result<(), Failure> {
        let report = find_relocations(&self.body, &self.initializer_calls)?;
        if settings.strict_idioms && !report.skipped.is_empty() {
            return Err(Failure::InternalConsistency(format!(
                "{} initializer receiver(s) produced by unrecognized allocation idioms",
                report.skipped.len()
            )));
        }

        self.relocation = relocate_allocations(&mut self.body, &report.relocations)?;
        debug!(
            "{}.{}: {} suspension point(s), {} allocation(s) relocated, {} idiom(s) skipped",
            self.body.owner,
            self.body.name,
            self.suspension_points.len(),
            self.relocation.relocated,
            report.skipped.len()
        );
        self.provenance = report;
        Ok(())
    }

    /// Run the verifying interpreter over the body
    ///
    /// Any failure here means the rewritten body is not something the JVM would accept. The
    /// recorded maxima are raised to what the analysis found.
    pub fn verify(&mut self, universe: &dyn TypeUniverse) -> Result<&Frames<VType>, Failure> {
        let frames = self.analyze_types(universe)?;
        self.body.max_stack = self.body.max_stack.max(frames.max_stack);
        self.body.max_locals = self.body.max_locals.max(frames.max_locals);
        Ok(self.frames.insert(frames))
    }

    fn analyze_types(&self, universe: &dyn TypeUniverse) -> Result<Frames<VType>, Failure> {
        let interpreter = TypeInterpreter::new(
            TypeHierarchy::new(universe),
            RefType::Object(self.body.owner.clone()),
        );
        analyze(&self.body, &interpreter).map_err(|err| Failure::analysis(jvm::Error::from(err)))
    }

    /// Assemble the body back into a `Code` attribute
    ///
    /// Frames are recomputed one last time (whatever was injected since `verify` gets covered),
    /// unreachable code is neutralized, and debug tables are re-emitted against the new offsets.
    pub fn into_code(
        mut self,
        universe: &dyn TypeUniverse,
        constants: &mut ConstantsPool,
        version: Version,
        settings: &Settings,
    ) -> Result<Code, Failure> {
        let mut frames = self.analyze_types(universe)?;
        let dead_runs = fill_dead_code(&mut self.body, &frames);
        if dead_runs > 0 {
            debug!(
                "{}.{}: replaced {} unreachable run(s)",
                self.body.owner, self.body.name, dead_runs
            );
            frames = self.analyze_types(universe)?;
        }
        let body = &self.body;

        let max_stack = body.max_stack.max(frames.max_stack);
        let max_stack = u16::try_from(max_stack)
            .map_err(|_| Failure::Encoding(jvm::Error::MethodCodeMaxStackOverflow(max_stack)))?;
        let max_locals = body.max_locals.max(frames.max_locals);
        let max_locals = u16::try_from(max_locals)
            .map_err(|_| Failure::Encoding(jvm::Error::MethodCodeMaxLocalsOverflow(max_locals)))?;

        let layout = layout(body).map_err(Failure::encoding)?;
        let code_array = BytecodeArray(emit(body, &layout).map_err(Failure::encoding)?);

        let mut exception_table = vec![];
        for block in &body.try_catch_blocks {
            let start = label_pc(&layout, block.start)?;
            let end = label_pc(&layout, block.end)?;
            if start >= end {
                continue;
            }
            exception_table.push(ExceptionHandler {
                start_pc: start,
                end_pc: end,
                handler_pc: label_pc(&layout, block.handler)?,
                catch_type: block.catch_type.as_ref().map(|(index, _)| *index),
            });
        }

        let mut attributes: Vec<Attribute> = vec![];
        if settings.compute_frames && version.uses_stack_map_frames() {
            let table =
                stack_map_table(body, &frames, &layout, constants).map_err(Failure::encoding)?;
            if !table.0.is_empty() {
                attributes.push(constants.get_attribute(table).map_err(Failure::encoding)?);
            }
        }

        let line_numbers = line_number_entries(body, &layout)?;
        if !line_numbers.is_empty() {
            let table = LineNumberTable(line_numbers);
            attributes.push(constants.get_attribute(table).map_err(Failure::encoding)?);
        }
        let local_variables = local_variable_entries(&body.local_variables, &layout)?;
        if !local_variables.is_empty() {
            let table = LocalVariableTable(local_variables);
            attributes.push(constants.get_attribute(table).map_err(Failure::encoding)?);
        }
        let local_variable_types = local_variable_entries(&body.local_variable_types, &layout)?;
        if !local_variable_types.is_empty() {
            let table = LocalVariableTypeTable(local_variable_types);
            attributes.push(constants.get_attribute(table).map_err(Failure::encoding)?);
        }

        Ok(Code {
            max_stack,
            max_locals,
            code_array,
            exception_table,
            attributes,
        })
    }
}

fn pc(offset: usize) -> Result<u16, Failure> {
    u16::try_from(offset).map_err(|_| Failure::Encoding(jvm::Error::MethodCodeOverflow(offset)))
}

fn label_pc(layout: &Layout, label: jvm::code::Label) -> Result<u16, Failure> {
    pc(layout.label_offset(label).map_err(Failure::encoding)?)
}

/// Line number markers at their new offsets (markers after the last instruction are dropped)
fn line_number_entries(body: &MethodBody, layout: &Layout) -> Result<Vec<LineNumber>, Failure> {
    let mut entries = vec![];
    for (id, insn) in body.instructions.iter() {
        if let Insn::LineNumber(line) = insn {
            let offset = layout.offsets[&id];
            if offset < layout.code_length {
                entries.push(LineNumber {
                    start_pc: pc(offset)?,
                    line_number: *line,
                });
            }
        }
    }
    Ok(entries)
}

fn local_variable_entries(
    ranges: &[LocalVariableRange],
    layout: &Layout,
) -> Result<Vec<LocalVariable>, Failure> {
    let mut entries = vec![];
    for range in ranges {
        let start = label_pc(layout, range.start)?;
        let end = label_pc(layout, range.end)?;
        if start < end {
            entries.push(LocalVariable {
                start_pc: start,
                length: end - start,
                name_index: range.name_index,
                type_index: range.type_index,
                index: range.index,
            });
        }
    }
    Ok(entries)
}
