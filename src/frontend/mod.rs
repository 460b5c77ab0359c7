//! Front end: parse and bind one source file into function-level scopes
//!
//! Scope 0 of every [`SourceProgram`] is the module initialiser
//! ([`GLOBAL_SCOPE_NAME`]) holding the top-level statements; it is followed by
//! one scope per top-level `function`, in source order.

pub mod lexer;

use crate::diagnostics::{DiagnosticEngine, DiagnosticError, SourcePosition};
use indexmap::IndexMap;
use lexer::{Token, TokenKind};

/// Name of the module initialiser scope
pub const GLOBAL_SCOPE_NAME: &str = "ETSGLOBAL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Number(i64),
    Str(String),
    Ident {
        name: String,
        position: SourcePosition,
    },
    Call {
        callee: String,
        args: Vec<Expr>,
        position: SourcePosition,
    },
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    Let {
        name: String,
        value: Expr,
        position: SourcePosition,
    },
    Return {
        value: Option<Expr>,
        position: SourcePosition,
    },
    Expr {
        expr: Expr,
        position: SourcePosition,
    },
}

impl Stmt {
    pub fn position(&self) -> &SourcePosition {
        match self {
            Stmt::Let { position, .. } | Stmt::Return { position, .. } | Stmt::Expr { position, .. } => {
                position
            }
        }
    }
}

/// One function-level scope, the unit a compile job lowers
#[derive(Debug, Clone)]
pub struct FunctionScope {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub position: SourcePosition,
}

impl FunctionScope {
    pub fn is_global(&self) -> bool {
        self.name == GLOBAL_SCOPE_NAME
    }
}

/// A parsed and bound source file
#[derive(Debug, Clone)]
pub struct SourceProgram {
    pub path: String,
    pub module: String,
    pub scopes: Vec<FunctionScope>,
    /// Function name -> parameter count
    pub functions: IndexMap<String, usize>,
    /// Names bound by top-level `let`
    pub globals: Vec<String>,
}

impl SourceProgram {
    pub fn global_scope(&self) -> &FunctionScope {
        &self.scopes[0]
    }
}

/// Parse `source` and bind its top-level names
pub fn parse_source(
    path: &str,
    module: &str,
    source: &str,
    diagnostics: &DiagnosticEngine,
) -> Result<SourceProgram, DiagnosticError> {
    let tokens = lexer::lex(path, source, diagnostics)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        file: path,
        diagnostics,
    };
    let (global, functions) = parser.parse_program()?;
    bind(path, module, global, functions, diagnostics)
}

fn bind(
    path: &str,
    module: &str,
    global: Vec<Stmt>,
    functions: Vec<FunctionScope>,
    diagnostics: &DiagnosticEngine,
) -> Result<SourceProgram, DiagnosticError> {
    let mut signatures = IndexMap::new();
    for function in &functions {
        if function.name == GLOBAL_SCOPE_NAME {
            return Err(diagnostics.throw_semantic_error(
                format!("`{GLOBAL_SCOPE_NAME}` is a reserved name"),
                function.position.clone(),
            ));
        }
        if signatures
            .insert(function.name.clone(), function.params.len())
            .is_some()
        {
            return Err(diagnostics.throw_semantic_error(
                format!("Duplicate function `{}`", function.name),
                function.position.clone(),
            ));
        }
    }

    let globals = global
        .iter()
        .filter_map(|stmt| match stmt {
            Stmt::Let { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect();

    let mut scopes = Vec::with_capacity(functions.len() + 1);
    scopes.push(FunctionScope {
        name: GLOBAL_SCOPE_NAME.to_string(),
        params: Vec::new(),
        body: global,
        position: SourcePosition::new(path, 1, 1),
    });
    scopes.extend(functions);

    tracing::debug!(file = path, scopes = scopes.len(), "bound source");
    Ok(SourceProgram {
        path: path.to_string(),
        module: module.to_string(),
        scopes,
        functions: signatures,
        globals,
    })
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    file: &'a str,
    diagnostics: &'a DiagnosticEngine,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn position(&self) -> SourcePosition {
        let token = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        SourcePosition::new(self.file, token.line, token.column)
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    fn error(&self, message: impl Into<String>) -> DiagnosticError {
        self.diagnostics.throw_syntax_error(message, self.position())
    }

    fn expect(&mut self, expected: TokenKind) -> Result<(), DiagnosticError> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!(
                "Expected {}, found {}",
                expected.describe(),
                self.peek().describe()
            )))
        }
    }

    fn expect_ident(&mut self) -> Result<String, DiagnosticError> {
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("Expected identifier, found {}", other.describe()))),
        }
    }

    fn skip_terminators(&mut self) {
        while matches!(self.peek(), TokenKind::Newline | TokenKind::Semi) {
            self.advance();
        }
    }

    fn skip_newlines(&mut self) {
        while *self.peek() == TokenKind::Newline {
            self.advance();
        }
    }

    fn parse_program(&mut self) -> Result<(Vec<Stmt>, Vec<FunctionScope>), DiagnosticError> {
        let mut global = Vec::new();
        let mut functions = Vec::new();
        loop {
            self.skip_terminators();
            match self.peek() {
                TokenKind::Eof => break,
                TokenKind::Function => functions.push(self.parse_function()?),
                _ => global.push(self.parse_statement()?),
            }
        }
        Ok((global, functions))
    }

    fn parse_function(&mut self) -> Result<FunctionScope, DiagnosticError> {
        let position = self.position();
        self.expect(TokenKind::Function)?;
        let name = self.expect_ident()?;
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        self.skip_newlines();
        if *self.peek() != TokenKind::RParen {
            loop {
                self.skip_newlines();
                params.push(self.expect_ident()?);
                self.skip_newlines();
                if *self.peek() == TokenKind::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        self.skip_newlines();
        self.expect(TokenKind::LBrace)?;

        let mut body = Vec::new();
        loop {
            self.skip_terminators();
            match self.peek() {
                TokenKind::RBrace => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => {
                    return Err(self.error(format!("Unterminated body of function `{name}`")));
                }
                TokenKind::Function => {
                    return Err(self.error("Nested functions are not supported"));
                }
                _ => body.push(self.parse_statement()?),
            }
        }

        Ok(FunctionScope {
            name,
            params,
            body,
            position,
        })
    }

    fn parse_statement(&mut self) -> Result<Stmt, DiagnosticError> {
        let position = self.position();
        let stmt = match self.peek() {
            TokenKind::Let => {
                self.advance();
                let name = self.expect_ident()?;
                self.expect(TokenKind::Eq)?;
                let value = self.parse_expr()?;
                Stmt::Let {
                    name,
                    value,
                    position,
                }
            }
            TokenKind::Return => {
                self.advance();
                let value = match self.peek() {
                    TokenKind::Newline | TokenKind::Semi | TokenKind::RBrace | TokenKind::Eof => None,
                    _ => Some(self.parse_expr()?),
                };
                Stmt::Return { value, position }
            }
            _ => Stmt::Expr {
                expr: self.parse_expr()?,
                position,
            },
        };

        match self.peek() {
            TokenKind::Newline | TokenKind::Semi => {
                self.advance();
            }
            TokenKind::RBrace | TokenKind::Eof => {}
            other => {
                return Err(self.error(format!(
                    "Expected end of statement, found {}",
                    other.describe()
                )));
            }
        }
        Ok(stmt)
    }

    fn parse_expr(&mut self) -> Result<Expr, DiagnosticError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_term(&mut self) -> Result<Expr, DiagnosticError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, DiagnosticError> {
        if *self.peek() == TokenKind::Minus {
            self.advance();
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, DiagnosticError> {
        let position = self.position();
        match self.advance() {
            TokenKind::Number(value) => Ok(Expr::Number(value)),
            TokenKind::Str(value) => Ok(Expr::Str(value)),
            TokenKind::Ident(name) => {
                if *self.peek() != TokenKind::LParen {
                    return Ok(Expr::Ident { name, position });
                }
                self.advance();
                let mut args = Vec::new();
                self.skip_newlines();
                if *self.peek() != TokenKind::RParen {
                    loop {
                        self.skip_newlines();
                        args.push(self.parse_expr()?);
                        self.skip_newlines();
                        if *self.peek() == TokenKind::Comma {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Call {
                    callee: name,
                    args,
                    position,
                })
            }
            TokenKind::LParen => {
                self.skip_newlines();
                let expr = self.parse_expr()?;
                self.skip_newlines();
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            other => Err(self
                .diagnostics
                .throw_syntax_error(format!("Unexpected {}", other.describe()), position)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Result<SourceProgram, DiagnosticError> {
        let engine = DiagnosticEngine::new();
        parse_source("main.ets", "main", src, &engine)
    }

    #[test]
    fn test_global_scope_comes_first() {
        let program = parse("function f() { return 1 }\nlet x = 2\n").unwrap();
        assert_eq!(program.scopes.len(), 2);
        assert!(program.scopes[0].is_global());
        assert_eq!(program.scopes[1].name, "f");
        assert_eq!(program.globals, vec!["x".to_string()]);
    }

    #[test]
    fn test_function_params_and_signature() {
        let program = parse("function add(a, b) {\n  return a + b\n}").unwrap();
        assert_eq!(program.scopes[1].params, vec!["a", "b"]);
        assert_eq!(program.functions.get("add"), Some(&2));
    }

    #[test]
    fn test_precedence() {
        let program = parse("let x = 1 + 2 * 3").unwrap();
        let Stmt::Let { value, .. } = &program.scopes[0].body[0] else {
            panic!("expected let");
        };
        assert!(matches!(
            value,
            Expr::Binary {
                op: BinaryOp::Add,
                ..
            }
        ));
    }

    #[test]
    fn test_unterminated_function() {
        let err = parse("function f() {\n let x = 1\n").unwrap_err();
        assert!(err.message().contains("Unterminated body"));
    }

    #[test]
    fn test_duplicate_function() {
        let err = parse("function f() {}\nfunction f() {}").unwrap_err();
        assert_eq!(err.message(), "Duplicate function `f`");
        assert_eq!(err.position().line, 2);
    }

    #[test]
    fn test_missing_statement_end() {
        let err = parse("let x = 1 2").unwrap_err();
        assert!(err.message().starts_with("Expected end of statement"));
    }
}
