//! ErgoScript tokenizer: converts script text into a token stream
//!
//! Handles: keywords, identifiers, Int/Long literals, string literals,
//! operators and punctuation, `@` annotations.
//! Comments (`//` and `/* */`) are discarded.
//!
//! Guarantees:
//! - Deterministic: same input always produces same token stream
//! - Every token records whether a line break preceded it, which the
//!   parser needs for statement separation inside blocks

use super::CompileError;

/// Token types for ErgoScript syntax
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    Val,
    Def,
    If,
    Else,

    // Literals
    IntLiteral(i64),
    LongLiteral(i64),
    StringLiteral(String),
    BooleanLiteral(bool),

    // Punctuation
    LParen,    // (
    RParen,    // )
    LBrace,    // {
    RBrace,    // }
    LBracket,  // [
    RBracket,  // ]
    Comma,     // ,
    Colon,     // :
    Semicolon, // ;
    Dot,       // .
    Arrow,     // =>
    Assign,    // =
    At,        // @

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    AndAnd,
    OrOr,
    Bang,

    Identifier(String),
    Eof,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Token::Val => write!(f, "'val'"),
            Token::Def => write!(f, "'def'"),
            Token::If => write!(f, "'if'"),
            Token::Else => write!(f, "'else'"),
            Token::IntLiteral(n) => write!(f, "{}", n),
            Token::LongLiteral(n) => write!(f, "{}L", n),
            Token::StringLiteral(s) => write!(f, "\"{}\"", s),
            Token::BooleanLiteral(b) => write!(f, "{}", b),
            Token::Identifier(name) => write!(f, "'{}'", name),
            Token::Eof => write!(f, "end of input"),
            other => write!(f, "'{}'", other.symbol()),
        }
    }
}

impl Token {
    fn symbol(&self) -> &'static str {
        match self {
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Comma => ",",
            Token::Colon => ":",
            Token::Semicolon => ";",
            Token::Dot => ".",
            Token::Arrow => "=>",
            Token::Assign => "=",
            Token::At => "@",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::Gt => ">",
            Token::Le => "<=",
            Token::Ge => ">=",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Bang => "!",
            _ => "?",
        }
    }
}

/// Position in source text for error reporting
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Token with source position
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
    pub newline_before: bool,
}

/// Tokenizer for ErgoScript source text
pub struct Tokenizer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
    saw_newline: bool,
}

impl Tokenizer {
    pub fn new(text: &str) -> Self {
        Tokenizer {
            input: text.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
            saw_newline: false,
        }
    }

    /// Tokenize the entire input into a stream of spanned tokens
    pub fn tokenize(&mut self) -> Result<Vec<SpannedToken>, CompileError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace_and_comments()?;

            let newline_before = std::mem::take(&mut self.saw_newline);
            if self.is_at_end() {
                tokens.push(SpannedToken {
                    token: Token::Eof,
                    span: self.current_span(),
                    newline_before,
                });
                break;
            }

            let (token, span) = self.next_token()?;
            tokens.push(SpannedToken {
                token,
                span,
                newline_before,
            });
        }

        Ok(tokens)
    }

    // ── Character helpers ──────────────────────────────────

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_ahead(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.input.get(self.position).copied();
        if let Some(c) = ch {
            self.position += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
                self.saw_newline = true;
            } else {
                self.column += 1;
            }
        }
        ch
    }

    fn current_span(&self) -> Span {
        Span {
            line: self.line,
            column: self.column,
            offset: self.position,
        }
    }

    fn error_at(span: &Span, message: String) -> CompileError {
        CompileError::at(message, span.line, span.column)
    }

    // ── Whitespace & Comments ──────────────────────────────

    fn skip_whitespace_and_comments(&mut self) -> Result<(), CompileError> {
        loop {
            while let Some(ch) = self.peek() {
                if ch.is_whitespace() {
                    self.advance();
                } else {
                    break;
                }
            }

            if self.peek() == Some('/') && self.peek_ahead(1) == Some('/') {
                while let Some(ch) = self.peek() {
                    if ch == '\n' {
                        break;
                    }
                    self.advance();
                }
                continue;
            }

            if self.peek() == Some('/') && self.peek_ahead(1) == Some('*') {
                let span = self.current_span();
                self.advance();
                self.advance();
                loop {
                    match self.advance() {
                        None => {
                            return Err(Self::error_at(
                                &span,
                                "Unterminated block comment".to_string(),
                            ))
                        }
                        Some('*') if self.peek() == Some('/') => {
                            self.advance();
                            break;
                        }
                        Some(_) => {}
                    }
                }
                continue;
            }

            break;
        }
        Ok(())
    }

    // ── Main dispatch ──────────────────────────────────────

    fn next_token(&mut self) -> Result<(Token, Span), CompileError> {
        let span = self.current_span();
        let ch = match self.peek() {
            Some(c) => c,
            None => return Ok((Token::Eof, span)),
        };
        let next = self.peek_ahead(1);

        let (token, width) = match (ch, next) {
            ('=', Some('>')) => (Token::Arrow, 2),
            ('=', Some('=')) => (Token::EqEq, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('&', Some('&')) => (Token::AndAnd, 2),
            ('|', Some('|')) => (Token::OrOr, 2),
            ('=', _) => (Token::Assign, 1),
            ('!', _) => (Token::Bang, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('{', _) => (Token::LBrace, 1),
            ('}', _) => (Token::RBrace, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            (',', _) => (Token::Comma, 1),
            (':', _) => (Token::Colon, 1),
            (';', _) => (Token::Semicolon, 1),
            ('.', _) => (Token::Dot, 1),
            ('@', _) => (Token::At, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('"', _) => return self.read_string(span),
            (c, _) if c.is_ascii_digit() => return self.read_number(span),
            (c, _) if c.is_alphabetic() || c == '_' => {
                return self.read_identifier_or_keyword(span)
            }
            _ => {
                return Err(Self::error_at(
                    &span,
                    format!("Unexpected character '{}' at {}", ch, span),
                ))
            }
        };

        for _ in 0..width {
            self.advance();
        }
        Ok((token, span))
    }

    // ── String literals ────────────────────────────────────

    fn read_string(&mut self, span: Span) -> Result<(Token, Span), CompileError> {
        self.advance(); // consume opening "
        let mut value = String::new();

        loop {
            match self.advance() {
                None | Some('\n') => {
                    return Err(Self::error_at(
                        &span,
                        format!("Unterminated string starting at {}", span),
                    ));
                }
                Some('"') => break,
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some(c) => {
                        return Err(Self::error_at(
                            &self.current_span(),
                            format!("Invalid escape sequence '\\{}'", c),
                        ));
                    }
                    None => {
                        return Err(Self::error_at(
                            &self.current_span(),
                            "Unterminated escape sequence".to_string(),
                        ));
                    }
                },
                Some(c) => value.push(c),
            }
        }

        Ok((Token::StringLiteral(value), span))
    }

    // ── Numbers ────────────────────────────────────────────

    fn read_number(&mut self, span: Span) -> Result<(Token, Span), CompileError> {
        let start = self.position;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }
        let text: String = self.input[start..self.position]
            .iter()
            .filter(|c| **c != '_')
            .collect();

        let is_long = matches!(self.peek(), Some('L') | Some('l'));
        if is_long {
            self.advance();
        }

        let val: i64 = text.parse().map_err(|_| {
            Self::error_at(&span, format!("Invalid integer literal '{}'", text))
        })?;

        let token = if is_long {
            Token::LongLiteral(val)
        } else {
            Token::IntLiteral(val)
        };
        Ok((token, span))
    }

    // ── Identifiers & Keywords ─────────────────────────────

    fn read_identifier_or_keyword(&mut self, span: Span) -> Result<(Token, Span), CompileError> {
        let start = self.position;

        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }

        let text: String = self.input[start..self.position].iter().collect();

        let token = match text.as_str() {
            "val" => Token::Val,
            "def" => Token::Def,
            "if" => Token::If,
            "else" => Token::Else,
            "true" => Token::BooleanLiteral(true),
            "false" => Token::BooleanLiteral(false),
            _ => Token::Identifier(text),
        };

        Ok((token, span))
    }
}

/// Tokenize, returning an empty stream instead of an error.
///
/// Used where a best-effort look at the token stream is enough.
pub fn tokenize_lenient(text: &str) -> Vec<SpannedToken> {
    Tokenizer::new(text).tokenize().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(input: &str) -> Vec<Token> {
        Tokenizer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|st| st.token)
            .collect()
    }

    fn tokenize_err(input: &str) -> String {
        Tokenizer::new(input).tokenize().unwrap_err().to_string()
    }

    // ── Keywords & literals ────────────────────────────

    #[test]
    fn test_tokenize_keywords() {
        assert_eq!(
            tokenize("val def if else"),
            vec![Token::Val, Token::Def, Token::If, Token::Else, Token::Eof]
        );
    }

    #[test]
    fn test_tokenize_numbers() {
        assert_eq!(
            tokenize("42 1000000L 1_000"),
            vec![
                Token::IntLiteral(42),
                Token::LongLiteral(1_000_000),
                Token::IntLiteral(1000),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_tokenize_string_with_escapes() {
        assert_eq!(
            tokenize(r#""a\"b\n""#),
            vec![Token::StringLiteral("a\"b\n".into()), Token::Eof]
        );
    }

    #[test]
    fn test_tokenize_booleans_and_identifiers() {
        assert_eq!(
            tokenize("true HEIGHT false"),
            vec![
                Token::BooleanLiteral(true),
                Token::Identifier("HEIGHT".into()),
                Token::BooleanLiteral(false),
                Token::Eof
            ]
        );
    }

    // ── Operators ──────────────────────────────────────

    #[test]
    fn test_tokenize_two_char_operators() {
        assert_eq!(
            tokenize("== != <= >= && || =>"),
            vec![
                Token::EqEq,
                Token::NotEq,
                Token::Le,
                Token::Ge,
                Token::AndAnd,
                Token::OrOr,
                Token::Arrow,
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_tokenize_annotation() {
        assert_eq!(
            tokenize("@contract def"),
            vec![
                Token::At,
                Token::Identifier("contract".into()),
                Token::Def,
                Token::Eof
            ]
        );
    }

    // ── Comments & positions ───────────────────────────

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            tokenize("a // line\n/* block\n comment */ b"),
            vec![
                Token::Identifier("a".into()),
                Token::Identifier("b".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_newline_before_is_recorded() {
        let tokens = Tokenizer::new("a\n  b c").tokenize().unwrap();
        assert!(!tokens[0].newline_before);
        assert!(tokens[1].newline_before);
        assert!(!tokens[2].newline_before);
        assert_eq!(tokens[1].span.line, 2);
        assert_eq!(tokens[1].span.column, 3);
    }

    #[test]
    fn test_newline_inside_comment_counts() {
        let tokens = Tokenizer::new("a /* x\n */ b").tokenize().unwrap();
        assert!(tokens[1].newline_before);
    }

    // ── Errors ─────────────────────────────────────────

    #[test]
    fn test_unterminated_string() {
        assert!(tokenize_err("\"abc").contains("Unterminated string"));
    }

    #[test]
    fn test_unexpected_character() {
        let err = Tokenizer::new("a # b").tokenize().unwrap_err();
        assert!(err.message.contains("Unexpected character '#'"));
        assert_eq!(err.position, Some((1, 3)));
    }

    #[test]
    fn test_lenient_tokenize_never_fails() {
        assert!(tokenize_lenient("\"open").is_empty());
        assert_eq!(tokenize_lenient("x").len(), 2);
    }

    #[test]
    fn test_determinism_100_iterations() {
        let input = "{ val x = SELF.value\n x > 100L && HEIGHT >= 5 }";
        let first = tokenize(input);
        for _ in 0..100 {
            assert_eq!(tokenize(input), first);
        }
    }
}
