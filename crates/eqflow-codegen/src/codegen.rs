//! LLVM IR emission for lowered equation functions.
//!
//! [`emit_function`] turns a [`FunctionDef`] into two LLVM functions:
//!
//! - `<name>_llvm`: the typed entry point. Inputs are `double` parameters,
//!   outputs are `double*` parameters read on entry (an accumulating write
//!   adds to the prior value) and written back before returning.
//! - `<name>_packed`: takes one `double*` buffer holding every argument in
//!   binder order, passes inputs by value and outputs by address, and calls
//!   the typed entry point. Rust calls every equation through this one
//!   function-pointer shape regardless of arity.
//!
//! Every parameter lives in its own stack slot for the duration of the
//! body; the optimizer promotes them to registers.

use std::collections::HashMap;

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::types::BasicMetadataTypeEnum;
use inkwell::values::{BasicMetadataValueEnum, FloatValue, FunctionValue, IntValue, PointerValue};
use inkwell::{AddressSpace, FloatPredicate};

use eqflow_core::{BinOp, CmpOp, MathFn, UnaryOp};

use crate::ast::{ArgRole, CallTarget, Expr, FunctionDef, Stmt};
use crate::error::CodegenError;
use crate::runtime;

/// Names of the functions emitted for one definition.
#[derive(Debug, Clone)]
pub struct EmittedNames {
    pub typed: String,
    pub packed: String,
}

impl EmittedNames {
    pub fn for_function(name: &str) -> Self {
        EmittedNames {
            typed: format!("{}_llvm", name),
            packed: format!("{}_packed", name),
        }
    }
}

/// Host addresses that declared-but-undefined functions must resolve to.
pub type SymbolMap = HashMap<String, usize>;

fn llvm_err(e: impl std::fmt::Display) -> CodegenError {
    CodegenError::LlvmError(e.to_string())
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Emits the typed and packed functions for `def` into `module`.
///
/// Returns the symbols that the execution engine must map: math shims with
/// no LLVM intrinsic and every external the body calls.
pub fn emit_function<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    builder: &Builder<'ctx>,
    def: &FunctionDef,
) -> Result<SymbolMap, CodegenError> {
    let names = EmittedNames::for_function(&def.name);
    let f64_type = context.f64_type();
    let ptr_type = context.ptr_type(AddressSpace::default());

    // 1. Typed signature in binder order.
    let param_types: Vec<BasicMetadataTypeEnum<'ctx>> = def
        .params
        .iter()
        .map(|p| match p.role {
            ArgRole::Input => f64_type.into(),
            ArgRole::Target => ptr_type.into(),
        })
        .collect();
    let fn_type = context.void_type().fn_type(&param_types, false);
    let function = module.add_function(&names.typed, fn_type, None);

    let entry = context.append_basic_block(function, "entry");
    builder.position_at_end(entry);

    // 2. One stack slot per parameter; outputs start from the caller's value.
    let mut slots = Vec::with_capacity(def.params.len());
    for (i, param) in def.params.iter().enumerate() {
        let incoming = function
            .get_nth_param(i as u32)
            .ok_or_else(|| llvm_err(format!("missing parameter {}", i)))?;
        let slot = builder
            .build_alloca(f64_type, &format!("{}_slot", param.key))
            .map_err(llvm_err)?;
        let initial = match param.role {
            ArgRole::Input => incoming,
            ArgRole::Target => builder
                .build_load(f64_type, incoming.into_pointer_value(), &format!("{}_in", param.key))
                .map_err(llvm_err)?,
        };
        builder.build_store(slot, initial).map_err(llvm_err)?;
        slots.push(slot);
    }

    // 3. Body.
    let mut emitter = Emitter {
        context,
        module,
        builder,
        function,
        slots,
        symbols: SymbolMap::new(),
    };
    emitter.emit_body(&def.body)?;

    // 4. Write outputs back through their pointers.
    for (i, param) in def.params.iter().enumerate() {
        if param.role != ArgRole::Target {
            continue;
        }
        let out = function
            .get_nth_param(i as u32)
            .ok_or_else(|| llvm_err(format!("missing parameter {}", i)))?
            .into_pointer_value();
        let value = emitter.load_slot(i)?;
        builder.build_store(out, value).map_err(llvm_err)?;
    }
    builder.build_return(None).map_err(llvm_err)?;

    let symbols = emitter.symbols;
    emit_packed_adapter(context, module, builder, def, function, &names.packed)?;
    Ok(symbols)
}

/// `void <name>_packed(double* args)` forwarding to the typed function.
fn emit_packed_adapter<'ctx>(
    context: &'ctx Context,
    module: &Module<'ctx>,
    builder: &Builder<'ctx>,
    def: &FunctionDef,
    typed: FunctionValue<'ctx>,
    name: &str,
) -> Result<FunctionValue<'ctx>, CodegenError> {
    let f64_type = context.f64_type();
    let ptr_type = context.ptr_type(AddressSpace::default());
    let i64_type = context.i64_type();

    let fn_type = context.void_type().fn_type(&[ptr_type.into()], false);
    let adapter = module.add_function(name, fn_type, None);
    let entry = context.append_basic_block(adapter, "entry");
    builder.position_at_end(entry);

    let buffer = adapter
        .get_nth_param(0)
        .ok_or_else(|| llvm_err("packed adapter has no buffer parameter"))?
        .into_pointer_value();

    let mut args: Vec<BasicMetadataValueEnum<'ctx>> = Vec::with_capacity(def.params.len());
    for (i, param) in def.params.iter().enumerate() {
        let index = i64_type.const_int(i as u64, false);
        let elem = unsafe {
            builder
                .build_in_bounds_gep(f64_type, buffer, &[index], &format!("arg_{}", i))
                .map_err(llvm_err)?
        };
        match param.role {
            ArgRole::Input => {
                let value = builder
                    .build_load(f64_type, elem, &format!("{}_val", param.key))
                    .map_err(llvm_err)?;
                args.push(value.into());
            }
            ArgRole::Target => args.push(elem.into()),
        }
    }

    builder.build_call(typed, &args, "").map_err(llvm_err)?;
    builder.build_return(None).map_err(llvm_err)?;
    Ok(adapter)
}

// ---------------------------------------------------------------------------
// Body emission
// ---------------------------------------------------------------------------

struct Emitter<'a, 'ctx> {
    context: &'ctx Context,
    module: &'a Module<'ctx>,
    builder: &'a Builder<'ctx>,
    function: FunctionValue<'ctx>,
    slots: Vec<PointerValue<'ctx>>,
    symbols: SymbolMap,
}

impl<'a, 'ctx> Emitter<'a, 'ctx> {
    fn load_slot(&self, slot: usize) -> Result<FloatValue<'ctx>, CodegenError> {
        let ptr = self.slot(slot)?;
        Ok(self
            .builder
            .build_load(self.context.f64_type(), ptr, &format!("load_{}", slot))
            .map_err(llvm_err)?
            .into_float_value())
    }

    fn slot(&self, slot: usize) -> Result<PointerValue<'ctx>, CodegenError> {
        self.slots
            .get(slot)
            .copied()
            .ok_or_else(|| llvm_err(format!("no stack slot for parameter {}", slot)))
    }

    fn store_slot(&self, slot: usize, value: FloatValue<'ctx>) -> Result<(), CodegenError> {
        self.builder
            .build_store(self.slot(slot)?, value)
            .map_err(llvm_err)?;
        Ok(())
    }

    fn emit_body(&mut self, body: &[Stmt]) -> Result<(), CodegenError> {
        for stmt in body {
            match stmt {
                Stmt::Assign { target, value } => {
                    let v = self.emit_scalar(value)?;
                    self.store_slot(target.slot, v)?;
                }
                Stmt::AugAssign { target, value } => {
                    let v = self.emit_scalar(value)?;
                    let prior = self.load_slot(target.slot)?;
                    let sum = self
                        .builder
                        .build_float_add(prior, v, "acc")
                        .map_err(llvm_err)?;
                    self.store_slot(target.slot, sum)?;
                }
                Stmt::AssignTuple { targets, value } => {
                    let values = self.emit_values(value)?;
                    for (t, v) in targets.iter().zip(values) {
                        self.store_slot(t.slot, v)?;
                    }
                }
                Stmt::If { test, body } => self.emit_if(test, body)?,
                // Outputs are written back after the body.
                Stmt::Return(_) => {}
            }
        }
        Ok(())
    }

    fn emit_if(&mut self, test: &[Expr], body: &[Stmt]) -> Result<(), CodegenError> {
        let mut cond: Option<IntValue<'ctx>> = None;
        for t in test {
            let v = self.emit_scalar(t)?;
            let b = self.is_true(v)?;
            cond = Some(match cond {
                Some(acc) => self.builder.build_and(acc, b, "all").map_err(llvm_err)?,
                None => b,
            });
        }
        let cond = cond.ok_or_else(|| CodegenError::InvalidGraph("empty condition".into()))?;

        let then_bb = self.context.append_basic_block(self.function, "then");
        let merge_bb = self.context.append_basic_block(self.function, "endif");
        self.builder
            .build_conditional_branch(cond, then_bb, merge_bb)
            .map_err(llvm_err)?;

        self.builder.position_at_end(then_bb);
        self.emit_body(body)?;
        self.builder
            .build_unconditional_branch(merge_bb)
            .map_err(llvm_err)?;

        self.builder.position_at_end(merge_bb);
        Ok(())
    }

    fn emit_values(&mut self, expr: &Expr) -> Result<Vec<FloatValue<'ctx>>, CodegenError> {
        match expr {
            Expr::Call { callee, args } => self.emit_call(callee, args),
            other => Ok(vec![self.emit_scalar(other)?]),
        }
    }

    fn emit_scalar(&mut self, expr: &Expr) -> Result<FloatValue<'ctx>, CodegenError> {
        let f64_type = self.context.f64_type();
        match expr {
            Expr::Const(v) => Ok(f64_type.const_float(*v)),
            Expr::Var(r) => self.load_slot(r.slot),
            Expr::Binary { op, lhs, rhs } => {
                let l = self.emit_scalar(lhs)?;
                let r = self.emit_scalar(rhs)?;
                self.emit_binary(*op, l, r)
            }
            Expr::Unary { op, operand } => {
                let v = self.emit_scalar(operand)?;
                match op {
                    UnaryOp::Neg => self.builder.build_float_neg(v, "fneg").map_err(llvm_err),
                    UnaryOp::Pos => Ok(v),
                    UnaryOp::Not => {
                        let zero = f64_type.const_zero();
                        let is_zero = self
                            .builder
                            .build_float_compare(FloatPredicate::OEQ, v, zero, "is_zero")
                            .map_err(llvm_err)?;
                        self.to_float(is_zero)
                    }
                }
            }
            Expr::Call { callee, args } => {
                let mut values = self.emit_call(callee, args)?;
                if values.is_empty() {
                    return Err(llvm_err(format!(
                        "call to '{}' produced no value",
                        callee.name()
                    )));
                }
                Ok(values.swap_remove(0))
            }
            Expr::Select {
                condition,
                then,
                otherwise,
            } => {
                let c = self.emit_scalar(condition)?;
                let c = self.is_true(c)?;
                let t = self.emit_scalar(then)?;
                let e = self.emit_scalar(otherwise)?;
                Ok(self
                    .builder
                    .build_select(c, t, e, "select")
                    .map_err(llvm_err)?
                    .into_float_value())
            }
            Expr::Compare {
                left,
                ops,
                comparators,
            } => {
                let mut lhs = self.emit_scalar(left)?;
                let mut all: Option<IntValue<'ctx>> = None;
                for (op, c) in ops.iter().zip(comparators) {
                    let rhs = self.emit_scalar(c)?;
                    let b = self
                        .builder
                        .build_float_compare(predicate(*op), lhs, rhs, "cmp")
                        .map_err(llvm_err)?;
                    all = Some(match all {
                        Some(acc) => self.builder.build_and(acc, b, "chain").map_err(llvm_err)?,
                        None => b,
                    });
                    lhs = rhs;
                }
                match all {
                    Some(b) => self.to_float(b),
                    None => Ok(f64_type.const_float(1.0)),
                }
            }
        }
    }

    fn emit_binary(
        &mut self,
        op: BinOp,
        l: FloatValue<'ctx>,
        r: FloatValue<'ctx>,
    ) -> Result<FloatValue<'ctx>, CodegenError> {
        let b = self.builder;
        match op {
            BinOp::Add => b.build_float_add(l, r, "fadd").map_err(llvm_err),
            BinOp::Sub => b.build_float_sub(l, r, "fsub").map_err(llvm_err),
            BinOp::Mul => b.build_float_mul(l, r, "fmul").map_err(llvm_err),
            BinOp::Div => b.build_float_div(l, r, "fdiv").map_err(llvm_err),
            BinOp::Mod => {
                // frem truncates; shift by the divisor when the signs disagree
                let f64_type = self.context.f64_type();
                let zero = f64_type.const_float(0.0);
                let rem = b.build_float_rem(l, r, "frem").map_err(llvm_err)?;
                let nonzero = b
                    .build_float_compare(FloatPredicate::ONE, rem, zero, "rem_nz")
                    .map_err(llvm_err)?;
                let rem_neg = b
                    .build_float_compare(FloatPredicate::OLT, rem, zero, "rem_neg")
                    .map_err(llvm_err)?;
                let div_neg = b
                    .build_float_compare(FloatPredicate::OLT, r, zero, "div_neg")
                    .map_err(llvm_err)?;
                let differ = b.build_xor(rem_neg, div_neg, "sign_differ").map_err(llvm_err)?;
                let fix = b.build_and(nonzero, differ, "rem_fix").map_err(llvm_err)?;
                let shifted = b.build_float_add(rem, r, "rem_adj").map_err(llvm_err)?;
                Ok(b
                    .build_select(fix, shifted, rem, "fmod")
                    .map_err(llvm_err)?
                    .into_float_value())
            }
            BinOp::Pow => self.emit_math(MathFn::Pow, &[l, r]),
        }
    }

    fn emit_call(
        &mut self,
        callee: &CallTarget,
        args: &[Expr],
    ) -> Result<Vec<FloatValue<'ctx>>, CodegenError> {
        let mut values = Vec::with_capacity(args.len());
        for a in args {
            values.push(self.emit_scalar(a)?);
        }
        match callee {
            CallTarget::Math(m) => Ok(vec![self.emit_math(*m, &values)?]),
            CallTarget::External(f) => {
                let f64_type = self.context.f64_type();
                let ptr_type = self.context.ptr_type(AddressSpace::default());
                let i64_type = self.context.i64_type();

                let decl = match self.module.get_function(&f.name) {
                    Some(existing) => existing,
                    None => {
                        let fn_type = self
                            .context
                            .void_type()
                            .fn_type(&[ptr_type.into(), ptr_type.into()], false);
                        self.module.add_function(&f.name, fn_type, None)
                    }
                };
                self.symbols.insert(f.name.clone(), f.func as usize);

                let arg_len = i64_type.const_int(f.arity.max(1) as u64, false);
                let out_len = i64_type.const_int(f.outputs.max(1) as u64, false);
                let arg_buf = self
                    .builder
                    .build_array_alloca(f64_type, arg_len, "ext_args")
                    .map_err(llvm_err)?;
                let out_buf = self
                    .builder
                    .build_array_alloca(f64_type, out_len, "ext_out")
                    .map_err(llvm_err)?;
                for (i, v) in values.iter().enumerate() {
                    let elem = self.element(arg_buf, i)?;
                    self.builder.build_store(elem, *v).map_err(llvm_err)?;
                }
                self.builder
                    .build_call(decl, &[arg_buf.into(), out_buf.into()], "")
                    .map_err(llvm_err)?;

                let mut out = Vec::with_capacity(f.outputs);
                for i in 0..f.outputs {
                    let elem = self.element(out_buf, i)?;
                    out.push(
                        self.builder
                            .build_load(f64_type, elem, &format!("{}_{}", f.name, i))
                            .map_err(llvm_err)?
                            .into_float_value(),
                    );
                }
                Ok(out)
            }
        }
    }

    /// Calls an LLVM intrinsic where one exists, otherwise a host shim.
    fn emit_math(
        &mut self,
        m: MathFn,
        args: &[FloatValue<'ctx>],
    ) -> Result<FloatValue<'ctx>, CodegenError> {
        let f64_type = self.context.f64_type();
        let name = match intrinsic_name(m) {
            Some(intrinsic) => intrinsic.to_string(),
            None => {
                let (symbol, addr) = runtime::math_shim(m)
                    .ok_or_else(|| llvm_err(format!("no native lowering for '{}'", m.name())))?;
                self.symbols.insert(symbol.to_string(), addr);
                symbol.to_string()
            }
        };

        let decl = match self.module.get_function(&name) {
            Some(f) => f,
            None => {
                let params: Vec<BasicMetadataTypeEnum<'ctx>> = vec![f64_type.into(); m.arity()];
                self.module
                    .add_function(&name, f64_type.fn_type(&params, false), None)
            }
        };

        let call_args: Vec<BasicMetadataValueEnum<'ctx>> =
            args.iter().map(|a| (*a).into()).collect();
        let result = self
            .builder
            .build_call(decl, &call_args, m.name())
            .map_err(llvm_err)?
            .try_as_basic_value()
            .basic()
            .ok_or_else(|| llvm_err(format!("{} returned void", name)))?;
        Ok(result.into_float_value())
    }

    fn element(
        &self,
        base: PointerValue<'ctx>,
        i: usize,
    ) -> Result<PointerValue<'ctx>, CodegenError> {
        let index = self.context.i64_type().const_int(i as u64, false);
        unsafe {
            self.builder
                .build_in_bounds_gep(self.context.f64_type(), base, &[index], "elem")
                .map_err(llvm_err)
        }
    }

    fn is_true(&self, v: FloatValue<'ctx>) -> Result<IntValue<'ctx>, CodegenError> {
        let zero = self.context.f64_type().const_zero();
        self.builder
            .build_float_compare(FloatPredicate::UNE, v, zero, "truthy")
            .map_err(llvm_err)
    }

    fn to_float(&self, b: IntValue<'ctx>) -> Result<FloatValue<'ctx>, CodegenError> {
        self.builder
            .build_unsigned_int_to_float(b, self.context.f64_type(), "bool")
            .map_err(llvm_err)
    }
}

fn predicate(op: CmpOp) -> FloatPredicate {
    match op {
        CmpOp::Eq => FloatPredicate::OEQ,
        CmpOp::Ne => FloatPredicate::UNE,
        CmpOp::Lt => FloatPredicate::OLT,
        CmpOp::Le => FloatPredicate::OLE,
        CmpOp::Gt => FloatPredicate::OGT,
        CmpOp::Ge => FloatPredicate::OGE,
    }
}

/// LLVM intrinsic for a built-in, if there is a portable one.
fn intrinsic_name(m: MathFn) -> Option<&'static str> {
    match m {
        MathFn::Sin => Some("llvm.sin.f64"),
        MathFn::Cos => Some("llvm.cos.f64"),
        MathFn::Exp => Some("llvm.exp.f64"),
        MathFn::Log => Some("llvm.log.f64"),
        MathFn::Sqrt => Some("llvm.sqrt.f64"),
        MathFn::Abs => Some("llvm.fabs.f64"),
        MathFn::Floor => Some("llvm.floor.f64"),
        MathFn::Ceil => Some("llvm.ceil.f64"),
        MathFn::Pow => Some("llvm.pow.f64"),
        MathFn::Min => Some("llvm.minnum.f64"),
        MathFn::Max => Some("llvm.maxnum.f64"),
        MathFn::Tan | MathFn::Atan | MathFn::Tanh | MathFn::Atan2 => None,
    }
}
