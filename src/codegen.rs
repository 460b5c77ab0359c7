//! Function lowering
//!
//! A [`FunctionLowering`] turns one [`FunctionScope`] into a
//! [`FunctionElement`]. Compile jobs call it from worker threads, so
//! implementations only read the shared [`CompilationContext`] and build
//! their result locally.
//!
//! [`BytecodeLowering`] emits an accumulator-style instruction listing:
//! parameters live in `v0..vN`, locals and temporaries follow.

use crate::compiler::CompilationContext;
use crate::diagnostics::{Diagnostic, DiagnosticError, DiagnosticKind, SourcePosition, Suggestion};
use crate::frontend::{BinaryOp, Expr, FunctionScope, Stmt};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Built-in functions callable with any number of arguments
pub const BUILTINS: &[&str] = &["print"];

/// The compiled form of one function-level scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionElement {
    pub name: String,
    pub params: usize,
    pub registers: usize,
    pub instructions: Vec<String>,
}

/// Code generation for one scope
pub trait FunctionLowering: Send + Sync {
    fn lower(
        &self,
        context: &CompilationContext,
        scope: &FunctionScope,
    ) -> Result<FunctionElement, DiagnosticError>;
}

/// Reference lowering to the textual bytecode listing
#[derive(Debug, Default, Clone, Copy)]
pub struct BytecodeLowering;

impl FunctionLowering for BytecodeLowering {
    fn lower(
        &self,
        context: &CompilationContext,
        scope: &FunctionScope,
    ) -> Result<FunctionElement, DiagnosticError> {
        let mut emitter = Emitter::new(context, scope);
        emitter.lower_body()?;
        Ok(emitter.finish())
    }
}

struct Emitter<'a> {
    context: &'a CompilationContext,
    scope: &'a FunctionScope,
    /// Parameters, then `let` bindings in declaration order
    locals: IndexMap<&'a str, usize>,
    next_register: usize,
    max_register: usize,
    instructions: Vec<String>,
}

impl<'a> Emitter<'a> {
    fn new(context: &'a CompilationContext, scope: &'a FunctionScope) -> Self {
        let locals: IndexMap<&str, usize> = scope
            .params
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let next_register = scope.params.len();
        Self {
            context,
            scope,
            locals,
            next_register,
            max_register: next_register,
            instructions: Vec::new(),
        }
    }

    fn emit(&mut self, instruction: impl Into<String>) {
        self.instructions.push(instruction.into());
    }

    fn alloc_register(&mut self) -> usize {
        let register = self.next_register;
        self.next_register += 1;
        self.max_register = self.max_register.max(self.next_register);
        register
    }

    fn semantic_error(&self, diagnostic: Diagnostic) -> DiagnosticError {
        self.context.diagnostics().throw(diagnostic)
    }

    fn lower_body(&mut self) -> Result<(), DiagnosticError> {
        let scope = self.scope;
        let mut returned = false;
        for stmt in &scope.body {
            if returned {
                self.context
                    .diagnostics()
                    .log_warning("Unreachable code", stmt.position().clone());
                break;
            }
            returned = self.lower_stmt(stmt)?;
        }
        if !returned {
            self.emit("return.void");
        }
        Ok(())
    }

    /// Returns true when the statement ends the function
    fn lower_stmt(&mut self, stmt: &'a Stmt) -> Result<bool, DiagnosticError> {
        match stmt {
            Stmt::Let {
                name,
                value,
                position,
            } => {
                self.lower_expr(value)?;
                if self.scope.is_global() {
                    self.emit(format!("stglobal {name}"));
                } else {
                    if self.locals.contains_key(name.as_str()) {
                        return Err(self.semantic_error(Diagnostic::new(
                            DiagnosticKind::Semantic,
                            format!("Variable `{name}` is already declared"),
                            position.clone(),
                        )));
                    }
                    let register = self.alloc_register();
                    self.locals.insert(name.as_str(), register);
                    self.emit(format!("sta v{register}"));
                }
                Ok(false)
            }
            Stmt::Return { value, position } => {
                if self.scope.is_global() {
                    return Err(self.semantic_error(Diagnostic::new(
                        DiagnosticKind::Semantic,
                        "Return statement outside of a function",
                        position.clone(),
                    )));
                }
                match value {
                    Some(value) => {
                        self.lower_expr(value)?;
                        self.emit("return");
                    }
                    None => self.emit("return.void"),
                }
                Ok(true)
            }
            Stmt::Expr { expr, .. } => {
                self.lower_expr(expr)?;
                Ok(false)
            }
        }
    }

    /// Leaves the value of `expr` in the accumulator
    fn lower_expr(&mut self, expr: &'a Expr) -> Result<(), DiagnosticError> {
        match expr {
            Expr::Number(value) => self.emit(format!("ldai {value}")),
            Expr::Str(value) => self.emit(format!("lda.str {value:?}")),
            Expr::Ident { name, position } => self.lower_ident(name, position)?,
            Expr::Neg(operand) => {
                self.lower_expr(operand)?;
                self.emit("neg");
            }
            Expr::Binary { op, lhs, rhs } => {
                self.lower_expr(lhs)?;
                let saved = self.next_register;
                let register = self.alloc_register();
                self.emit(format!("sta v{register}"));
                self.lower_expr(rhs)?;
                let mnemonic = match op {
                    BinaryOp::Add => "add2",
                    BinaryOp::Sub => "sub2",
                    BinaryOp::Mul => "mul2",
                    BinaryOp::Div => "div2",
                };
                self.emit(format!("{mnemonic} v{register}"));
                self.next_register = saved;
            }
            Expr::Call {
                callee,
                args,
                position,
            } => self.lower_call(callee, args, position)?,
        }
        Ok(())
    }

    fn lower_ident(&mut self, name: &str, position: &SourcePosition) -> Result<(), DiagnosticError> {
        if let Some(&register) = self.locals.get(name) {
            self.emit(format!("lda v{register}"));
            return Ok(());
        }
        let context = self.context;
        let program = context.program();
        if program.globals.iter().any(|global| global == name) {
            self.emit(format!("ldglobal {name}"));
            return Ok(());
        }
        if program.functions.contains_key(name) {
            return Err(self.semantic_error(Diagnostic::new(
                DiagnosticKind::Semantic,
                format!("Function `{name}` cannot be used as a value"),
                position.clone(),
            )));
        }
        Err(self.semantic_error(self.unresolved(name, position)))
    }

    fn lower_call(
        &mut self,
        callee: &str,
        args: &'a [Expr],
        position: &SourcePosition,
    ) -> Result<(), DiagnosticError> {
        let builtin = BUILTINS.contains(&callee);
        if !builtin {
            let context = self.context;
            match context.program().functions.get(callee) {
                Some(&arity) if arity != args.len() => {
                    return Err(self.semantic_error(Diagnostic::new(
                        DiagnosticKind::Semantic,
                        format!(
                            "Expected {arity} arguments for `{callee}`, got {}",
                            args.len()
                        ),
                        position.clone(),
                    )));
                }
                Some(_) => {}
                None => return Err(self.semantic_error(self.unresolved(callee, position))),
            }
        }

        let saved = self.next_register;
        let mut registers = Vec::with_capacity(args.len());
        for arg in args {
            self.lower_expr(arg)?;
            let register = self.alloc_register();
            self.emit(format!("sta v{register}"));
            registers.push(format!("v{register}"));
        }
        self.next_register = saved;

        let opcode = if builtin { "call.builtin" } else { "call" };
        if registers.is_empty() {
            self.emit(format!("{opcode} {callee}"));
        } else {
            self.emit(format!("{opcode} {callee}, {}", registers.join(", ")));
        }
        Ok(())
    }

    /// Unresolved reference, with a suggestion when a name differs only in case
    fn unresolved(&self, name: &str, position: &SourcePosition) -> Diagnostic {
        let diagnostic = Diagnostic::new(
            DiagnosticKind::Semantic,
            format!("Unresolved reference `{name}`"),
            position.clone(),
        );
        let program = self.context.program();
        let candidates = self
            .locals
            .keys()
            .copied()
            .chain(program.globals.iter().map(String::as_str))
            .chain(program.functions.keys().map(String::as_str));
        match candidates
            .into_iter()
            .find(|candidate| candidate.eq_ignore_ascii_case(name))
        {
            Some(candidate) => diagnostic.with_suggestion(
                Suggestion::new(format!("a name `{candidate}` exists"))
                    .with_replacement(candidate),
            ),
            None => diagnostic,
        }
    }

    fn finish(self) -> FunctionElement {
        FunctionElement {
            name: self.scope.name.clone(),
            params: self.scope.params.len(),
            registers: self.max_register,
            instructions: self.instructions,
        }
    }
}
