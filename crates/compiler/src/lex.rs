//! Single-pass scanner for Spyre source text.
//!
//! Produces a flat `Vec<Token>` rather than the doubly-linked list the
//! original tool used — the parser's "one-token rewind" becomes `cursor -=
//! 1` over this vector, and forward look-ahead is just indexing.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    If,
    Else,
    Elif,
    While,
    Do,
    For,
    Func,
    Return,
    Switch,
    Case,
    Break,
    Continue,
    Struct,
    Cfunc,
}

impl Keyword {
    fn from_word(word: &str) -> Option<Keyword> {
        Some(match word {
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "elif" => Keyword::Elif,
            "while" => Keyword::While,
            "do" => Keyword::Do,
            "for" => Keyword::For,
            "func" => Keyword::Func,
            "return" => Keyword::Return,
            "switch" => Keyword::Switch,
            "case" => Keyword::Case,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "struct" => Keyword::Struct,
            "cfunc" => Keyword::Cfunc,
            _ => return None,
        })
    }
}

/// A multi-character punctuator. Each variant is a distinct tag, as required
/// by the data model, rather than reconstructed from single-char punctuators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    // single-char
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Excl,
    Tilde,
    Assign,
    Gt,
    Lt,
    Comma,
    Semi,
    Colon,
    Dot,
    OpenParen,
    CloseParen,
    OpenBrace,
    CloseBrace,
    OpenBracket,
    CloseBracket,
    // multi-char
    AndAnd,
    OrOr,
    Shl,
    Shr,
    PlusPlus,
    MinusMinus,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    AmpEq,
    PipeEq,
    CaretEq,
    ShrEq,
    ShlEq,
    EqEq,
    NotEq,
    GtEq,
    LtEq,
    Arrow,
    Walrus,
    Ellipsis,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Keyword(Keyword),
    Integer(i64),
    Float(f64),
    Str(Vec<u8>),
    Identifier(String),
    Punct(Punct),
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// The exact source slice this token was scanned from (escapes still
    /// encoded, for diagnostics and for the lexer round-trip invariant).
    pub lexeme: String,
    pub line: u32,
}

impl Token {
    pub fn is_punct(&self, p: Punct) -> bool {
        matches!(&self.kind, TokenKind::Punct(k) if *k == p)
    }

    pub fn is_keyword(&self, k: Keyword) -> bool {
        matches!(&self.kind, TokenKind::Keyword(kw) if *kw == k)
    }

    pub fn identifier(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Identifier(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    UnterminatedString { line: u32 },
    UnterminatedComment { line: u32 },
    UnexpectedCharacter { ch: char, line: u32 },
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::UnterminatedString { line } => write!(f, "line {line}: unterminated string literal"),
            LexError::UnterminatedComment { line } => write!(f, "line {line}: unterminated block comment"),
            LexError::UnexpectedCharacter { ch, line } => write!(f, "line {line}: unexpected character '{ch}'"),
        }
    }
}

impl std::error::Error for LexError {}

struct Scanner<'a> {
    chars: Vec<char>,
    src: &'a str,
    i: usize,
    line: u32,
    tokens: Vec<Token>,
}

/// Three-char-and-shorter punctuators, longest match first.
const MULTI: &[(&str, Punct)] = &[
    ("...", Punct::Ellipsis),
    (">>=", Punct::ShrEq),
    ("<<=", Punct::ShlEq),
    ("&&", Punct::AndAnd),
    ("||", Punct::OrOr),
    ("<<", Punct::Shl),
    (">>", Punct::Shr),
    ("++", Punct::PlusPlus),
    ("--", Punct::MinusMinus),
    ("+=", Punct::PlusEq),
    ("-=", Punct::MinusEq),
    ("*=", Punct::StarEq),
    ("/=", Punct::SlashEq),
    ("%=", Punct::PercentEq),
    ("&=", Punct::AmpEq),
    ("|=", Punct::PipeEq),
    ("^=", Punct::CaretEq),
    ("==", Punct::EqEq),
    ("!=", Punct::NotEq),
    (">=", Punct::GtEq),
    ("<=", Punct::LtEq),
    ("->", Punct::Arrow),
    (":=", Punct::Walrus),
];

fn single_punct(c: char) -> Option<Punct> {
    Some(match c {
        '+' => Punct::Plus,
        '-' => Punct::Minus,
        '*' => Punct::Star,
        '/' => Punct::Slash,
        '%' => Punct::Percent,
        '&' => Punct::Amp,
        '|' => Punct::Pipe,
        '^' => Punct::Caret,
        '!' => Punct::Excl,
        '~' => Punct::Tilde,
        '=' => Punct::Assign,
        '>' => Punct::Gt,
        '<' => Punct::Lt,
        ',' => Punct::Comma,
        ';' => Punct::Semi,
        ':' => Punct::Colon,
        '.' => Punct::Dot,
        '(' => Punct::OpenParen,
        ')' => Punct::CloseParen,
        '{' => Punct::OpenBrace,
        '}' => Punct::CloseBrace,
        '[' => Punct::OpenBracket,
        ']' => Punct::CloseBracket,
        _ => return None,
    })
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Scanner { chars: src.chars().collect(), src, i: 0, line: 1, tokens: Vec::new() }
    }

    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.i + ahead).copied()
    }

    fn rest_starts_with(&self, s: &str) -> bool {
        s.chars().enumerate().all(|(k, c)| self.peek(k) == Some(c))
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        while let Some(c) = self.peek(0) {
            let start_line = self.line;
            match c {
                '\n' => {
                    self.line += 1;
                    self.i += 1;
                }
                ' ' | '\t' | '\r' => self.i += 1,
                '/' if self.peek(1) == Some('*') => self.skip_block_comment()?,
                '/' if self.peek(1) == Some('/') => {
                    while self.peek(0).is_some() && self.peek(0) != Some('\n') {
                        self.i += 1;
                    }
                }
                '"' => self.scan_string()?,
                _ if c.is_ascii_digit() => self.scan_number(),
                _ if c.is_alphabetic() || c == '_' => self.scan_word(),
                _ => {
                    if let Some((text, punct)) = MULTI.iter().find(|(text, _)| self.rest_starts_with(text)) {
                        self.tokens.push(Token {
                            kind: TokenKind::Punct(*punct),
                            lexeme: text.to_string(),
                            line: start_line,
                        });
                        self.i += text.len();
                    } else if let Some(p) = single_punct(c) {
                        self.tokens.push(Token { kind: TokenKind::Punct(p), lexeme: c.to_string(), line: start_line });
                        self.i += 1;
                    } else {
                        return Err(LexError::UnexpectedCharacter { ch: c, line: self.line });
                    }
                }
            }
        }
        let _ = self.src;
        Ok(self.tokens)
    }

    fn skip_block_comment(&mut self) -> Result<(), LexError> {
        let start_line = self.line;
        self.i += 2;
        loop {
            match self.peek(0) {
                None => return Err(LexError::UnterminatedComment { line: start_line }),
                Some('*') if self.peek(1) == Some('/') => {
                    self.i += 2;
                    return Ok(());
                }
                Some('\n') => {
                    self.line += 1;
                    self.i += 1;
                }
                Some(_) => self.i += 1,
            }
        }
    }

    fn scan_string(&mut self) -> Result<(), LexError> {
        let start_line = self.line;
        let start = self.i;
        self.i += 1;
        let mut bytes = Vec::new();
        loop {
            match self.peek(0) {
                None => return Err(LexError::UnterminatedString { line: start_line }),
                Some('"') => {
                    self.i += 1;
                    break;
                }
                Some('\\') => {
                    self.i += 1;
                    let escaped = self.peek(0).ok_or(LexError::UnterminatedString { line: start_line })?;
                    bytes.push(match escaped {
                        'n' => b'\n',
                        't' => b'\t',
                        '"' => b'"',
                        '0' => 0,
                        '\\' => b'\\',
                        '\'' => b'\'',
                        other => other as u8,
                    });
                    self.i += 1;
                }
                Some(other) => {
                    if other == '\n' {
                        self.line += 1;
                    }
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
                    self.i += 1;
                }
            }
        }
        let lexeme: String = self.chars[start..self.i].iter().collect();
        self.tokens.push(Token { kind: TokenKind::Str(bytes), lexeme, line: start_line });
        Ok(())
    }

    fn scan_number(&mut self) {
        let start_line = self.line;
        let start = self.i;
        let mut is_float = false;
        while let Some(c) = self.peek(0) {
            if c.is_ascii_digit() {
                self.i += 1;
            } else if c == '.' && !is_float && self.peek(1).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.i += 1;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.i].iter().collect();
        let kind = if is_float {
            TokenKind::Float(text.parse().unwrap_or(0.0))
        } else {
            TokenKind::Integer(text.parse().unwrap_or(0))
        };
        self.tokens.push(Token { kind, lexeme: text, line: start_line });
    }

    fn scan_word(&mut self) {
        let start_line = self.line;
        let start = self.i;
        while let Some(c) = self.peek(0) {
            if c.is_alphanumeric() || c == '_' {
                self.i += 1;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.i].iter().collect();
        let kind = match Keyword::from_word(&text) {
            Some(k) => TokenKind::Keyword(k),
            None => TokenKind::Identifier(text.clone()),
        };
        self.tokens.push(Token { kind, lexeme: text, line: start_line });
    }
}

pub fn lex(source: &str) -> Result<Vec<Token>, LexError> {
    Scanner::new(source).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_keywords_and_identifiers() {
        let tokens = lex("if x while").unwrap();
        assert!(tokens[0].is_keyword(Keyword::If));
        assert_eq!(tokens[1].identifier(), Some("x"));
        assert!(tokens[2].is_keyword(Keyword::While));
    }

    #[test]
    fn distinguishes_int_and_float_literals() {
        let tokens = lex("42 3.5").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Integer(42));
        assert_eq!(tokens[1].kind, TokenKind::Float(3.5));
    }

    #[test]
    fn multi_char_punctuators_are_distinct_tags() {
        let tokens = lex("a == b != c >= d <= e -> f").unwrap();
        let puncts: Vec<_> = tokens.iter().filter_map(|t| match &t.kind {
            TokenKind::Punct(p) => Some(*p),
            _ => None,
        }).collect();
        assert_eq!(puncts, vec![Punct::EqEq, Punct::NotEq, Punct::GtEq, Punct::LtEq, Punct::Arrow]);
    }

    #[test]
    fn block_comments_are_skipped_and_count_newlines() {
        let tokens = lex("/* a\nb */ x").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].line, 2);
    }

    #[test]
    fn string_escapes_decode() {
        let tokens = lex(r#""a\nb\"c""#).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Str(b"a\nb\"c".to_vec()));
    }

    #[test]
    fn unterminated_string_reports_opening_line() {
        let err = lex("x\n\"oops").unwrap_err();
        assert_eq!(err, LexError::UnterminatedString { line: 2 });
    }

    #[test]
    fn unterminated_comment_reports_opening_line() {
        let err = lex("/* never closes").unwrap_err();
        assert_eq!(err, LexError::UnterminatedComment { line: 1 });
    }
}
