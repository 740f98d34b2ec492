//! Lua 5.4 tokenizer.
//!
//! Works on raw bytes so that non-UTF-8 string contents never abort a scan.
//! String literals are decoded (escapes applied) and stored lossily as UTF-8;
//! only their constant value matters to the passes.

use super::SyntaxError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Name(String),
    Str(String),
    Int(i64),
    Float(f64),

    // Keywords
    And,
    Break,
    Do,
    Else,
    Elseif,
    End,
    False,
    For,
    Function,
    Goto,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,

    // Symbols
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    Caret,
    Hash,
    Amp,
    Tilde,
    Pipe,
    Shl,
    Shr,
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    Assign,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    DoubleColon,
    Semi,
    Colon,
    Comma,
    Dot,
    Concat,
    Ellipsis,

    Eof,
}

impl Token {
    /// Short rendering for error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Name(n) => format!("'{}'", n),
            Token::Str(_) => "string".to_string(),
            Token::Int(_) | Token::Float(_) => "number".to_string(),
            Token::Eof => "<eof>".to_string(),
            other => format!("{:?}", other).to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: u32,
}

fn keyword(word: &str) -> Option<Token> {
    Some(match word {
        "and" => Token::And,
        "break" => Token::Break,
        "do" => Token::Do,
        "else" => Token::Else,
        "elseif" => Token::Elseif,
        "end" => Token::End,
        "false" => Token::False,
        "for" => Token::For,
        "function" => Token::Function,
        "goto" => Token::Goto,
        "if" => Token::If,
        "in" => Token::In,
        "local" => Token::Local,
        "nil" => Token::Nil,
        "not" => Token::Not,
        "or" => Token::Or,
        "repeat" => Token::Repeat,
        "return" => Token::Return,
        "then" => Token::Then,
        "true" => Token::True,
        "until" => Token::Until,
        "while" => Token::While,
        _ => return None,
    })
}

/// Tokenize a whole chunk. The result always ends with [`Token::Eof`].
pub fn tokenize(src: &[u8]) -> Result<Vec<Spanned>, SyntaxError> {
    let mut lexer = Lexer {
        src,
        pos: 0,
        line: 1,
    };
    // Skip a leading shebang line, as the reference interpreter does.
    if src.starts_with(b"#") {
        while let Some(c) = lexer.peek() {
            if c == b'\n' || c == b'\r' {
                break;
            }
            lexer.pos += 1;
        }
    }

    let mut tokens = Vec::new();
    loop {
        let spanned = lexer.next_token()?;
        let done = spanned.token == Token::Eof;
        tokens.push(spanned);
        if done {
            return Ok(tokens);
        }
    }
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.line, message)
    }

    /// Consume one newline sequence (`\n`, `\r`, `\r\n` or `\n\r`).
    fn newline(&mut self) {
        let first = self.src[self.pos];
        self.pos += 1;
        if let Some(next) = self.peek()
            && (next == b'\n' || next == b'\r')
            && next != first
        {
            self.pos += 1;
        }
        self.line += 1;
    }

    fn skip_trivia(&mut self) -> Result<(), SyntaxError> {
        while let Some(c) = self.peek() {
            match c {
                b'\n' | b'\r' => self.newline(),
                b' ' | b'\t' | 0x0b | 0x0c => self.pos += 1,
                b'-' if self.peek_at(1) == Some(b'-') => {
                    self.pos += 2;
                    if self.peek() == Some(b'[')
                        && let Some(level) = self.long_bracket_level()
                    {
                        self.long_bracket(level, "comment")?;
                    } else {
                        while let Some(c) = self.peek() {
                            if c == b'\n' || c == b'\r' {
                                break;
                            }
                            self.pos += 1;
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// If positioned at `[`, `[=`, `[==`... followed by `[`, return the level.
    fn long_bracket_level(&self) -> Option<usize> {
        let mut level = 0;
        while self.peek_at(1 + level) == Some(b'=') {
            level += 1;
        }
        (self.peek_at(1 + level) == Some(b'[')).then_some(level)
    }

    /// Read a long bracket body; positioned at the opening `[`.
    fn long_bracket(&mut self, level: usize, what: &str) -> Result<Vec<u8>, SyntaxError> {
        let start_line = self.line;
        self.pos += level + 2;
        if matches!(self.peek(), Some(b'\n' | b'\r')) {
            self.newline();
        }
        let mut body = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return Err(SyntaxError::new(
                        start_line,
                        format!("unfinished long {}", what),
                    ));
                }
                Some(b']') => {
                    let closes = (0..level).all(|i| self.peek_at(1 + i) == Some(b'='))
                        && self.peek_at(1 + level) == Some(b']');
                    if closes {
                        self.pos += level + 2;
                        return Ok(body);
                    }
                    body.push(b']');
                    self.pos += 1;
                }
                Some(b'\n' | b'\r') => {
                    self.newline();
                    body.push(b'\n');
                }
                Some(c) => {
                    body.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn next_token(&mut self) -> Result<Spanned, SyntaxError> {
        self.skip_trivia()?;
        let line = self.line;
        let Some(c) = self.peek() else {
            return Ok(Spanned {
                token: Token::Eof,
                line,
            });
        };

        let token = match c {
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c.is_ascii_alphanumeric() || c == b'_' {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                let word = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
                keyword(&word).unwrap_or(Token::Name(word))
            }
            b'0'..=b'9' => self.number()?,
            b'.' if matches!(self.peek_at(1), Some(b'0'..=b'9')) => self.number()?,
            b'"' | b'\'' => self.short_string(c)?,
            b'[' => match self.long_bracket_level() {
                Some(level) => {
                    let body = self.long_bracket(level, "string")?;
                    Token::Str(String::from_utf8_lossy(&body).into_owned())
                }
                None => self.symbol(1, Token::LBracket),
            },
            _ => self.operator(c)?,
        };
        Ok(Spanned { token, line })
    }

    fn symbol(&mut self, width: usize, token: Token) -> Token {
        self.pos += width;
        token
    }

    fn operator(&mut self, c: u8) -> Result<Token, SyntaxError> {
        let next = self.peek_at(1);
        Ok(match (c, next) {
            (b'.', Some(b'.')) if self.peek_at(2) == Some(b'.') => self.symbol(3, Token::Ellipsis),
            (b'.', Some(b'.')) => self.symbol(2, Token::Concat),
            (b'.', _) => self.symbol(1, Token::Dot),
            (b'=', Some(b'=')) => self.symbol(2, Token::Eq),
            (b'=', _) => self.symbol(1, Token::Assign),
            (b'~', Some(b'=')) => self.symbol(2, Token::Ne),
            (b'~', _) => self.symbol(1, Token::Tilde),
            (b'<', Some(b'=')) => self.symbol(2, Token::Le),
            (b'<', Some(b'<')) => self.symbol(2, Token::Shl),
            (b'<', _) => self.symbol(1, Token::Lt),
            (b'>', Some(b'=')) => self.symbol(2, Token::Ge),
            (b'>', Some(b'>')) => self.symbol(2, Token::Shr),
            (b'>', _) => self.symbol(1, Token::Gt),
            (b'/', Some(b'/')) => self.symbol(2, Token::DoubleSlash),
            (b'/', _) => self.symbol(1, Token::Slash),
            (b':', Some(b':')) => self.symbol(2, Token::DoubleColon),
            (b':', _) => self.symbol(1, Token::Colon),
            (b'+', _) => self.symbol(1, Token::Plus),
            (b'-', _) => self.symbol(1, Token::Minus),
            (b'*', _) => self.symbol(1, Token::Star),
            (b'%', _) => self.symbol(1, Token::Percent),
            (b'^', _) => self.symbol(1, Token::Caret),
            (b'#', _) => self.symbol(1, Token::Hash),
            (b'&', _) => self.symbol(1, Token::Amp),
            (b'|', _) => self.symbol(1, Token::Pipe),
            (b'(', _) => self.symbol(1, Token::LParen),
            (b')', _) => self.symbol(1, Token::RParen),
            (b'{', _) => self.symbol(1, Token::LBrace),
            (b'}', _) => self.symbol(1, Token::RBrace),
            (b']', _) => self.symbol(1, Token::RBracket),
            (b';', _) => self.symbol(1, Token::Semi),
            (b',', _) => self.symbol(1, Token::Comma),
            _ => return Err(self.error(format!("unexpected character 0x{:02x}", c))),
        })
    }

    fn number(&mut self) -> Result<Token, SyntaxError> {
        let start = self.pos;
        let token = if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X'))
        {
            self.pos += 2;
            self.hex_number()?
        } else {
            self.decimal_number(start)?
        };
        if let Some(c) = self.peek()
            && (c.is_ascii_alphanumeric() || c == b'_' || c == b'.')
        {
            return Err(self.error("malformed number"));
        }
        Ok(token)
    }

    fn decimal_number(&mut self, start: usize) -> Result<Token, SyntaxError> {
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                b'0'..=b'9' => self.pos += 1,
                b'.' if !is_float => {
                    is_float = true;
                    self.pos += 1;
                }
                b'e' | b'E' => {
                    is_float = true;
                    self.pos += 1;
                    if matches!(self.peek(), Some(b'+' | b'-')) {
                        self.pos += 1;
                    }
                    if !matches!(self.peek(), Some(b'0'..=b'9')) {
                        return Err(self.error("malformed number"));
                    }
                    while matches!(self.peek(), Some(b'0'..=b'9')) {
                        self.pos += 1;
                    }
                    break;
                }
                _ => break,
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .map_err(|_| self.error("malformed number"))?;
        if !is_float && let Ok(value) = text.parse::<i64>() {
            return Ok(Token::Int(value));
        }
        // Decimal integers that overflow become floats.
        text.parse::<f64>()
            .map(Token::Float)
            .map_err(|_| self.error("malformed number"))
    }

    fn hex_number(&mut self) -> Result<Token, SyntaxError> {
        let mut mantissa: u64 = 0;
        let mut float_mantissa = 0.0f64;
        let mut exponent: i32 = 0;
        let mut any_digit = false;
        let mut is_float = false;
        let mut seen_dot = false;

        while let Some(c) = self.peek() {
            if let Some(d) = (c as char).to_digit(16) {
                mantissa = mantissa.wrapping_mul(16).wrapping_add(d as u64);
                float_mantissa = float_mantissa * 16.0 + d as f64;
                if seen_dot {
                    exponent -= 4;
                }
                any_digit = true;
                self.pos += 1;
            } else if c == b'.' && !seen_dot {
                seen_dot = true;
                is_float = true;
                self.pos += 1;
            } else {
                break;
            }
        }
        if !any_digit {
            return Err(self.error("malformed number"));
        }
        if matches!(self.peek(), Some(b'p' | b'P')) {
            is_float = true;
            self.pos += 1;
            let negative = match self.peek() {
                Some(b'-') => {
                    self.pos += 1;
                    true
                }
                Some(b'+') => {
                    self.pos += 1;
                    false
                }
                _ => false,
            };
            let mut value: i32 = 0;
            let mut digits = false;
            while let Some(c @ b'0'..=b'9') = self.peek() {
                value = value.saturating_mul(10).saturating_add((c - b'0') as i32);
                digits = true;
                self.pos += 1;
            }
            if !digits {
                return Err(self.error("malformed number"));
            }
            exponent = exponent.saturating_add(if negative { -value } else { value });
        }

        if is_float {
            Ok(Token::Float(float_mantissa * 2f64.powi(exponent)))
        } else {
            // Hex integers wrap around modulo 2^64.
            Ok(Token::Int(mantissa as i64))
        }
    }

    fn short_string(&mut self, quote: u8) -> Result<Token, SyntaxError> {
        self.pos += 1;
        let mut out = Vec::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error("unfinished string"));
            };
            match c {
                _ if c == quote => {
                    self.pos += 1;
                    break;
                }
                b'\n' | b'\r' => return Err(self.error("unfinished string")),
                b'\\' => {
                    self.pos += 1;
                    self.escape(&mut out)?;
                }
                _ => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
        Ok(Token::Str(String::from_utf8_lossy(&out).into_owned()))
    }

    /// Positioned just after the backslash.
    fn escape(&mut self, out: &mut Vec<u8>) -> Result<(), SyntaxError> {
        let Some(c) = self.peek() else {
            return Err(self.error("unfinished string"));
        };
        let simple = match c {
            b'a' => Some(0x07),
            b'b' => Some(0x08),
            b'f' => Some(0x0c),
            b'n' => Some(b'\n'),
            b'r' => Some(b'\r'),
            b't' => Some(b'\t'),
            b'v' => Some(0x0b),
            b'\\' => Some(b'\\'),
            b'"' => Some(b'"'),
            b'\'' => Some(b'\''),
            _ => None,
        };
        if let Some(byte) = simple {
            out.push(byte);
            self.pos += 1;
            return Ok(());
        }

        match c {
            b'\n' | b'\r' => {
                self.newline();
                out.push(b'\n');
            }
            b'x' => {
                self.pos += 1;
                let mut value = 0u8;
                for _ in 0..2 {
                    let digit = self
                        .peek()
                        .and_then(|d| (d as char).to_digit(16))
                        .ok_or_else(|| self.error("hexadecimal digit expected"))?;
                    value = value * 16 + digit as u8;
                    self.pos += 1;
                }
                out.push(value);
            }
            b'z' => {
                self.pos += 1;
                while let Some(c) = self.peek() {
                    match c {
                        b'\n' | b'\r' => self.newline(),
                        b' ' | b'\t' | 0x0b | 0x0c => self.pos += 1,
                        _ => break,
                    }
                }
            }
            b'0'..=b'9' => {
                let mut value: u32 = 0;
                let mut count = 0;
                while count < 3
                    && let Some(d @ b'0'..=b'9') = self.peek()
                {
                    value = value * 10 + (d - b'0') as u32;
                    count += 1;
                    self.pos += 1;
                }
                let byte = u8::try_from(value).map_err(|_| self.error("decimal escape too large"))?;
                out.push(byte);
            }
            b'u' => {
                self.pos += 1;
                if self.peek() != Some(b'{') {
                    return Err(self.error("missing '{' in \\u{xxxx}"));
                }
                self.pos += 1;
                let mut value: u64 = 0;
                let mut digits = 0;
                while let Some(d) = self.peek().and_then(|d| (d as char).to_digit(16)) {
                    value = value * 16 + d as u64;
                    if value > 0x7FFF_FFFF {
                        return Err(self.error("UTF-8 value too large"));
                    }
                    digits += 1;
                    self.pos += 1;
                }
                if digits == 0 || self.peek() != Some(b'}') {
                    return Err(self.error("malformed \\u{xxxx} escape"));
                }
                self.pos += 1;
                let ch = char::from_u32(value as u32).unwrap_or(char::REPLACEMENT_CHARACTER);
                let mut buf = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            }
            _ => return Err(self.error("invalid escape sequence")),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        tokenize(src.as_bytes())
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_names_keywords_and_symbols() {
        assert_eq!(
            tokens("local x = a.b .. c ... ~= ::"),
            vec![
                Token::Local,
                Token::Name("x".into()),
                Token::Assign,
                Token::Name("a".into()),
                Token::Dot,
                Token::Name("b".into()),
                Token::Concat,
                Token::Name("c".into()),
                Token::Ellipsis,
                Token::Ne,
                Token::DoubleColon,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens("3 3.0 0xff 1e2 .5 0x1p4 9223372036854775808"),
            vec![
                Token::Int(3),
                Token::Float(3.0),
                Token::Int(255),
                Token::Float(100.0),
                Token::Float(0.5),
                Token::Float(16.0),
                Token::Float(9223372036854775808.0),
                Token::Eof,
            ]
        );
        assert!(tokenize(b"3x").is_err());
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            tokens(r#""a\tb" 'it\'s' "\x41\65\u{48}" "x\z
                   y""#),
            vec![
                Token::Str("a\tb".into()),
                Token::Str("it's".into()),
                Token::Str("AAH".into()),
                Token::Str("xy".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_long_strings_and_comments_track_lines() {
        let spanned = tokenize(b"--[==[ one\ntwo ]==]\nx = [[\nfirst\nsecond]]\ny").unwrap();
        let lines: Vec<(Token, u32)> = spanned.into_iter().map(|s| (s.token, s.line)).collect();
        assert_eq!(lines[0], (Token::Name("x".into()), 3));
        assert_eq!(lines[2], (Token::Str("first\nsecond".into()), 3));
        assert_eq!(lines[3], (Token::Name("y".into()), 6));
    }

    #[test]
    fn test_unfinished_string_reports_line() {
        let err = tokenize(b"x = 1\ny = 'oops\n").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_shebang_is_skipped() {
        assert_eq!(
            tokens("#!/usr/bin/env lua\nreturn"),
            vec![Token::Return, Token::Eof]
        );
    }
}
