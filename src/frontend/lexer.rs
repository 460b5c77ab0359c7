//! Tokenizer

use crate::diagnostics::{DiagnosticEngine, DiagnosticError, SourcePosition};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Ident(String),
    Number(i64),
    Str(String),
    // Keywords
    Function,
    Let,
    Return,
    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Eq,
    Plus,
    Minus,
    Star,
    Slash,
    Newline,
    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("identifier `{name}`"),
            TokenKind::Number(n) => format!("number `{n}`"),
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::Function => "`function`".to_string(),
            TokenKind::Let => "`let`".to_string(),
            TokenKind::Return => "`return`".to_string(),
            TokenKind::LParen => "`(`".to_string(),
            TokenKind::RParen => "`)`".to_string(),
            TokenKind::LBrace => "`{`".to_string(),
            TokenKind::RBrace => "`}`".to_string(),
            TokenKind::Comma => "`,`".to_string(),
            TokenKind::Semi => "`;`".to_string(),
            TokenKind::Eq => "`=`".to_string(),
            TokenKind::Plus => "`+`".to_string(),
            TokenKind::Minus => "`-`".to_string(),
            TokenKind::Star => "`*`".to_string(),
            TokenKind::Slash => "`/`".to_string(),
            TokenKind::Newline => "end of line".to_string(),
            TokenKind::Eof => "end of file".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

/// Tokenize `source`. Lexical errors are thrown as syntax diagnostics.
pub fn lex(
    file: &str,
    source: &str,
    diagnostics: &DiagnosticEngine,
) -> Result<Vec<Token>, DiagnosticError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let (mut line, mut column) = (1usize, 1usize);

    while let Some(&c) = chars.peek() {
        let (start_line, start_column) = (line, column);
        let position = || SourcePosition::new(file, start_line, start_column);

        let kind = match c {
            '\n' => {
                chars.next();
                line += 1;
                column = 1;
                tokens.push(Token {
                    kind: TokenKind::Newline,
                    line: start_line,
                    column: start_column,
                });
                continue;
            }
            c if c.is_whitespace() => {
                chars.next();
                column += 1;
                continue;
            }
            '/' => {
                chars.next();
                column += 1;
                if chars.peek() == Some(&'/') {
                    // line comment
                    while chars.peek().is_some_and(|&c| c != '\n') {
                        chars.next();
                        column += 1;
                    }
                    continue;
                }
                TokenKind::Slash
            }
            '"' => {
                chars.next();
                column += 1;
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('"') => {
                            column += 1;
                            break;
                        }
                        Some('\n') | None => {
                            return Err(
                                diagnostics.throw_syntax_error("Unterminated string literal", position())
                            );
                        }
                        Some(c) => {
                            column += 1;
                            value.push(c);
                        }
                    }
                }
                TokenKind::Str(value)
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                    digits.push(d);
                    chars.next();
                    column += 1;
                }
                let value = digits.parse::<i64>().map_err(|_| {
                    diagnostics.throw_syntax_error(
                        format!("Number literal `{digits}` is out of range"),
                        position(),
                    )
                })?;
                TokenKind::Number(value)
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut ident = String::new();
                while let Some(&d) = chars
                    .peek()
                    .filter(|d| d.is_alphanumeric() || **d == '_' || **d == '$')
                {
                    ident.push(d);
                    chars.next();
                    column += 1;
                }
                match ident.as_str() {
                    "function" => TokenKind::Function,
                    "let" => TokenKind::Let,
                    "return" => TokenKind::Return,
                    _ => TokenKind::Ident(ident),
                }
            }
            _ => {
                chars.next();
                column += 1;
                match c {
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    '{' => TokenKind::LBrace,
                    '}' => TokenKind::RBrace,
                    ',' => TokenKind::Comma,
                    ';' => TokenKind::Semi,
                    '=' => TokenKind::Eq,
                    '+' => TokenKind::Plus,
                    '-' => TokenKind::Minus,
                    '*' => TokenKind::Star,
                    other => {
                        return Err(diagnostics.throw_syntax_error(
                            format!("Unexpected character `{other}`"),
                            position(),
                        ));
                    }
                }
            }
        };

        tokens.push(Token {
            kind,
            line: start_line,
            column: start_column,
        });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        line,
        column,
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let engine = DiagnosticEngine::new();
        lex("t.ets", src, &engine)
            .expect("lexing failed")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_keywords_and_idents() {
        assert_eq!(
            kinds("function f"),
            vec![
                TokenKind::Function,
                TokenKind::Ident("f".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_comment_is_skipped() {
        assert_eq!(
            kinds("1 // two\n3"),
            vec![
                TokenKind::Number(1),
                TokenKind::Newline,
                TokenKind::Number(3),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_positions() {
        let engine = DiagnosticEngine::new();
        let tokens = lex("t.ets", "let\n  x", &engine).unwrap();
        assert_eq!((tokens[2].line, tokens[2].column), (2, 3));
    }

    #[test]
    fn test_unterminated_string() {
        let engine = DiagnosticEngine::new();
        let err = lex("t.ets", "\"abc", &engine).unwrap_err();
        assert_eq!(err.message(), "Unterminated string literal");
        assert_eq!(err.position().column, 1);
        assert!(engine.is_any_error());
    }

    #[test]
    fn test_unexpected_character() {
        let engine = DiagnosticEngine::new();
        let err = lex("t.ets", "let x = 1 # 2", &engine).unwrap_err();
        assert_eq!(err.position(), &SourcePosition::new("t.ets", 1, 11));
    }
}
