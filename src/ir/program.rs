//! In-memory IR graph provider.
//!
//! [`Program`] stores functions, values and operations in flat arenas indexed by their ids
//! and implements [`IrGraph`]. It is built with [`ProgramBuilder`], which validates the SSA
//! shape as operations are added: operand counts, operands belonging to the same function,
//! known callees.
//!
//! # Example
//!
//! ```rust
//! use layoutscope::ir::{IrGraph, Opcode, ProgramBuilder};
//!
//! // void set_len(struct s *p) { p->len = 0; }
//! let mut builder = ProgramBuilder::new();
//! let f = builder.function("set_len", &[8]);
//! let p = builder.param(f, 0)?;
//! let eight = builder.constant(f, 8, 8);
//! let field = builder.op(f, Opcode::PtrSub, &[p, eight], 8)?;
//! let zero = builder.constant(f, 0, 4);
//! builder.store(f, field, zero)?;
//! builder.ret(f, &[])?;
//! let program = builder.build();
//!
//! assert_eq!(program.formal_parameters(f)?.len(), 1);
//! assert_eq!(program.descendants(p).len(), 1);
//! # Ok::<(), layoutscope::Error>(())
//! ```

use crate::{
    ir::{FunctionId, IrGraph, OpId, Opcode, Operation, Value, ValueId, ValueKind},
    Error, Result,
};

/// Location assigned to the first operation when no explicit location is given.
const LOCATION_BASE: u64 = 0x1000;

/// Distance between consecutive auto-assigned locations.
const LOCATION_STEP: u64 = 4;

#[derive(Debug, Clone)]
struct FunctionData {
    name: String,
    params: Vec<ValueId>,
    call_sites: Vec<OpId>,
    return_sites: Vec<OpId>,
}

/// An immutable, fully built value graph for a set of functions.
#[derive(Debug, Clone, Default)]
pub struct Program {
    functions: Vec<FunctionData>,
    values: Vec<Value>,
    operations: Vec<Operation>,
    /// Consumer edges, indexed by value id.
    uses: Vec<Vec<OpId>>,
}

impl Program {
    /// Returns the number of functions.
    #[must_use]
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Returns the number of values across all functions.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Returns the number of operations across all functions.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Looks a function up by name.
    #[must_use]
    pub fn function_by_name(&self, name: &str) -> Option<FunctionId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(FunctionId::new)
    }

    fn function_data(&self, function: FunctionId) -> Result<&FunctionData> {
        self.functions
            .get(function.index())
            .ok_or(Error::FunctionNotFound(function))
    }
}

impl IrGraph for Program {
    fn functions(&self) -> Vec<FunctionId> {
        (0..self.functions.len()).map(FunctionId::new).collect()
    }

    fn function_name(&self, function: FunctionId) -> Result<&str> {
        Ok(&self.function_data(function)?.name)
    }

    fn formal_parameters(&self, function: FunctionId) -> Result<&[ValueId]> {
        Ok(&self.function_data(function)?.params)
    }

    fn value(&self, id: ValueId) -> Result<&Value> {
        self.values.get(id.index()).ok_or(Error::ValueNotFound(id))
    }

    fn operation(&self, id: OpId) -> Result<&Operation> {
        self.operations
            .get(id.index())
            .ok_or(Error::OperationNotFound(id))
    }

    fn descendants(&self, value: ValueId) -> &[OpId] {
        self.uses.get(value.index()).map_or(&[], Vec::as_slice)
    }

    fn call_sites(&self, function: FunctionId) -> Result<&[OpId]> {
        Ok(&self.function_data(function)?.call_sites)
    }

    fn return_sites(&self, function: FunctionId) -> Result<&[OpId]> {
        Ok(&self.function_data(function)?.return_sites)
    }
}

/// Incremental, validating constructor for [`Program`].
///
/// Operations receive sequential code locations starting at `0x1000` in steps of 4 unless a
/// location is set explicitly with [`at`](ProgramBuilder::at).
#[derive(Debug)]
pub struct ProgramBuilder {
    program: Program,
    next_location: u64,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: Program::default(),
            next_location: LOCATION_BASE,
        }
    }

    /// Adds a function with one formal parameter per entry of `param_sizes`.
    pub fn function(&mut self, name: impl Into<String>, param_sizes: &[u8]) -> FunctionId {
        let function = FunctionId::new(self.program.functions.len());
        self.program.functions.push(FunctionData {
            name: name.into(),
            params: Vec::with_capacity(param_sizes.len()),
            call_sites: Vec::new(),
            return_sites: Vec::new(),
        });

        for (index, &size) in param_sizes.iter().enumerate() {
            let param = self.push_value(function, ValueKind::Parameter(index), size, None);
            self.program.functions[function.index()].params.push(param);
        }

        function
    }

    /// Returns the formal parameter at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown functions or out-of-range indices.
    pub fn param(&self, function: FunctionId, index: usize) -> Result<ValueId> {
        self.program
            .function_data(function)?
            .params
            .get(index)
            .copied()
            .ok_or_else(|| malformed_error!("{} has no parameter {}", function, index))
    }

    /// Sets the code location of the next operation; later operations continue from it.
    pub fn at(&mut self, location: u64) -> &mut Self {
        self.next_location = location;
        self
    }

    /// Adds a literal constant.
    pub fn constant(&mut self, function: FunctionId, value: i64, size: u8) -> ValueId {
        self.push_value(function, ValueKind::Constant(value), size, None)
    }

    /// Adds a fixed address.
    pub fn address(&mut self, function: FunctionId, address: u64, size: u8) -> ValueId {
        self.push_value(function, ValueKind::Address(address), size, None)
    }

    /// Adds a value without a definition that is not a formal parameter.
    pub fn input(&mut self, function: FunctionId, size: u8) -> ValueId {
        self.push_value(function, ValueKind::Input, size, None)
    }

    /// Adds an operation defining a new value of `size` bytes and returns that value.
    ///
    /// `Phi` is accepted here when all predecessors are already known; use
    /// [`phi`](Self::phi) for merges with back edges.
    ///
    /// # Errors
    ///
    /// Returns an error for opcodes without an output (`Store`, `Return`, `Call`), wrong
    /// operand counts, or operands that do not belong to `function`.
    pub fn op(
        &mut self,
        function: FunctionId,
        opcode: Opcode,
        inputs: &[ValueId],
        size: u8,
    ) -> Result<ValueId> {
        if matches!(opcode, Opcode::Call) || opcode.never_has_output() {
            return Err(malformed_error!(
                "{} must be added through its dedicated builder method",
                opcode
            ));
        }

        let kind = if opcode == Opcode::Phi {
            ValueKind::Phi
        } else {
            ValueKind::Operation
        };
        let (_, output) = self.push_op(function, opcode, inputs, Some((kind, size)), None)?;
        output.ok_or_else(|| malformed_error!("{} did not define a value", opcode))
    }

    /// Adds a phi merge without inputs; predecessors are attached with
    /// [`add_phi_input`](Self::add_phi_input) once they exist.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown functions.
    pub fn phi(&mut self, function: FunctionId, size: u8) -> Result<ValueId> {
        let (_, output) =
            self.push_op(function, Opcode::Phi, &[], Some((ValueKind::Phi, size)), None)?;
        output.ok_or_else(|| malformed_error!("phi did not define a value"))
    }

    /// Appends a predecessor value to a phi merge.
    ///
    /// # Errors
    ///
    /// Returns an error if `phi` is not a phi output or `input` belongs to another function.
    pub fn add_phi_input(&mut self, phi: ValueId, input: ValueId) -> Result<()> {
        let phi_value = self.program.value(phi)?;
        let function = phi_value.function;
        let op = match (phi_value.kind, phi_value.definition) {
            (ValueKind::Phi, Some(op)) => op,
            _ => return Err(malformed_error!("{} is not a phi output", phi)),
        };
        self.check_operand(function, input)?;

        self.program.operations[op.index()].inputs.push(input);
        self.record_use(input, op);
        Ok(())
    }

    /// Adds a memory read of `size` bytes from `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if `address` belongs to another function.
    pub fn load(&mut self, function: FunctionId, address: ValueId, size: u8) -> Result<ValueId> {
        self.op(function, Opcode::Load, &[address], size)
    }

    /// Adds a memory write of `value` to `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if an operand belongs to another function.
    pub fn store(&mut self, function: FunctionId, address: ValueId, value: ValueId) -> Result<OpId> {
        let (op, _) = self.push_op(function, Opcode::Store, &[address, value], None, None)?;
        Ok(op)
    }

    /// Adds a call. `callee` is `None` for unresolved indirect calls; `output_size` is `None`
    /// for calls whose result is unused or void.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown callees or foreign operands.
    pub fn call(
        &mut self,
        function: FunctionId,
        callee: Option<FunctionId>,
        args: &[ValueId],
        output_size: Option<u8>,
    ) -> Result<(OpId, Option<ValueId>)> {
        if let Some(callee) = callee {
            self.program.function_data(callee)?;
        }

        let output = output_size.map(|size| (ValueKind::Operation, size));
        let (op, value) = self.push_op(function, Opcode::Call, args, output, callee)?;
        self.program.functions[function.index()].call_sites.push(op);
        Ok((op, value))
    }

    /// Adds a return of `values` (empty for void functions).
    ///
    /// # Errors
    ///
    /// Returns an error for foreign operands.
    pub fn ret(&mut self, function: FunctionId, values: &[ValueId]) -> Result<OpId> {
        let (op, _) = self.push_op(function, Opcode::Return, values, None, None)?;
        self.program.functions[function.index()].return_sites.push(op);
        Ok(op)
    }

    /// Finishes construction.
    #[must_use]
    pub fn build(self) -> Program {
        self.program
    }

    fn push_value(
        &mut self,
        function: FunctionId,
        kind: ValueKind,
        size: u8,
        definition: Option<OpId>,
    ) -> ValueId {
        let id = ValueId::new(self.program.values.len());
        self.program.values.push(Value {
            id,
            function,
            kind,
            size,
            definition,
        });
        self.program.uses.push(Vec::new());
        id
    }

    fn push_op(
        &mut self,
        function: FunctionId,
        opcode: Opcode,
        inputs: &[ValueId],
        output: Option<(ValueKind, u8)>,
        callee: Option<FunctionId>,
    ) -> Result<(OpId, Option<ValueId>)> {
        self.program.function_data(function)?;
        if let Some(arity) = opcode.arity() {
            if inputs.len() != arity {
                return Err(malformed_error!(
                    "{} takes {} operand(s), got {}",
                    opcode,
                    arity,
                    inputs.len()
                ));
            }
        }
        for &input in inputs {
            self.check_operand(function, input)?;
        }

        let id = OpId::new(self.program.operations.len());
        let output = output.map(|(kind, size)| self.push_value(function, kind, size, Some(id)));

        self.program.operations.push(Operation {
            id,
            function,
            opcode,
            inputs: inputs.to_vec(),
            output,
            location: self.next_location,
            callee,
        });
        self.next_location += LOCATION_STEP;

        for &input in inputs {
            self.record_use(input, id);
        }

        Ok((id, output))
    }

    fn check_operand(&self, function: FunctionId, input: ValueId) -> Result<()> {
        let value = self.program.value(input)?;
        if value.function != function {
            return Err(malformed_error!(
                "{} belongs to {}, not {}",
                input,
                value.function,
                function
            ));
        }
        Ok(())
    }

    fn record_use(&mut self, input: ValueId, op: OpId) {
        let uses = &mut self.program.uses[input.index()];
        if !uses.contains(&op) {
            uses.push(op);
        }
    }
}
