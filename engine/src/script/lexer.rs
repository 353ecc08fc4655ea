use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    Kw(Keyword),
    Sym(Sym),
    Newline,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Try,
    Except,
    As,
    Finally,
    With,
    Def,
    Class,
    Return,
    Pass,
    Break,
    Continue,
    Raise,
    Del,
    And,
    Or,
    Not,
    True,
    False,
    None,
}

impl Keyword {
    fn from_word(word: &str) -> Option<Self> {
        let kw = match word {
            "if" => Keyword::If,
            "elif" => Keyword::Elif,
            "else" => Keyword::Else,
            "while" => Keyword::While,
            "for" => Keyword::For,
            "in" => Keyword::In,
            "try" => Keyword::Try,
            "except" => Keyword::Except,
            "as" => Keyword::As,
            "finally" => Keyword::Finally,
            "with" => Keyword::With,
            "def" => Keyword::Def,
            "class" => Keyword::Class,
            "return" => Keyword::Return,
            "pass" => Keyword::Pass,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "raise" => Keyword::Raise,
            "del" => Keyword::Del,
            "and" => Keyword::And,
            "or" => Keyword::Or,
            "not" => Keyword::Not,
            "True" => Keyword::True,
            "False" => Keyword::False,
            "None" => Keyword::None,
            _ => return None,
        };
        Some(kw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sym {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semi,
    Dot,
    Assign,
    PlusAssign,
    MinusAssign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    SlashSlash,
    Percent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

/// Split script source into tokens. Newlines inside `(…)` and `[…]` are
/// dropped; elsewhere each run of line breaks becomes one `Newline`.
pub fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(src).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    nesting: usize,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            line: 1,
            nesting: 0,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok, line: usize) {
        self.tokens.push(Token { tok, line });
    }

    fn push_newline(&mut self) {
        let redundant = matches!(
            self.tokens.last(),
            None | Some(Token {
                tok: Tok::Newline,
                ..
            })
        );
        if !redundant {
            self.push(Tok::Newline, self.line);
        }
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        while let Some(c) = self.peek() {
            match c {
                '\n' => {
                    if self.nesting == 0 {
                        self.push_newline();
                    }
                    self.pos += 1;
                    self.line += 1;
                }
                ' ' | '\t' | '\r' => self.pos += 1,
                '#' => {
                    while matches!(self.peek(), Some(c) if c != '\n') {
                        self.pos += 1;
                    }
                }
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '\'' | '"' => self.string(c)?,
                c if c.is_ascii_digit() => self.number()?,
                c if c.is_alphabetic() || c == '_' => self.word(),
                _ => self.symbol(c)?,
            }
        }
        self.push_newline();
        let line = self.line;
        self.push(Tok::Eof, line);
        Ok(self.tokens)
    }

    fn word(&mut self) {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        let tok = match Keyword::from_word(&word) {
            Some(kw) => Tok::Kw(kw),
            None => Tok::Name(word),
        };
        self.push(tok, self.line);
    }

    fn number(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let mut is_float = false;
        self.digits();
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            self.digits();
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some('+' | '-')));
            if matches!(self.peek_at(1 + sign), Some(c) if c.is_ascii_digit()) {
                is_float = true;
                self.pos += 1 + sign;
                self.digits();
            }
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        let tok = if is_float {
            text.parse::<f64>()
                .map(Tok::Float)
                .map_err(|_| ParseError::new(self.line, format!("invalid number literal {}", text)))?
        } else {
            text.parse::<i64>().map(Tok::Int).map_err(|_| {
                ParseError::new(self.line, format!("integer literal {} is out of range", text))
            })?
        };
        self.push(tok, self.line);
        Ok(())
    }

    fn digits(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '_') {
            self.pos += 1;
        }
    }

    fn string(&mut self, quote: char) -> Result<(), ParseError> {
        let line = self.line;
        self.pos += 1;
        let mut value = String::new();
        loop {
            let c = self
                .peek()
                .ok_or_else(|| ParseError::new(line, "unterminated string literal"))?;
            self.pos += 1;
            match c {
                '\n' => return Err(ParseError::new(line, "unterminated string literal")),
                '\\' => {
                    let escaped = self
                        .peek()
                        .ok_or_else(|| ParseError::new(line, "unterminated string literal"))?;
                    self.pos += 1;
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        '0' => value.push('\0'),
                        '\\' | '\'' | '"' => value.push(escaped),
                        '\n' => self.line += 1,
                        other => {
                            value.push('\\');
                            value.push(other);
                        }
                    }
                }
                c if c == quote => break,
                c => value.push(c),
            }
        }
        self.push(Tok::Str(value), line);
        Ok(())
    }

    fn symbol(&mut self, c: char) -> Result<(), ParseError> {
        let next = self.peek_at(1);
        let (sym, width) = match (c, next) {
            ('=', Some('=')) => (Sym::Eq, 2),
            ('!', Some('=')) => (Sym::Ne, 2),
            ('<', Some('=')) => (Sym::Le, 2),
            ('>', Some('=')) => (Sym::Ge, 2),
            ('+', Some('=')) => (Sym::PlusAssign, 2),
            ('-', Some('=')) => (Sym::MinusAssign, 2),
            ('/', Some('/')) => (Sym::SlashSlash, 2),
            ('(', _) => (Sym::LParen, 1),
            (')', _) => (Sym::RParen, 1),
            ('[', _) => (Sym::LBracket, 1),
            (']', _) => (Sym::RBracket, 1),
            ('{', _) => (Sym::LBrace, 1),
            ('}', _) => (Sym::RBrace, 1),
            (',', _) => (Sym::Comma, 1),
            (':', _) => (Sym::Colon, 1),
            (';', _) => (Sym::Semi, 1),
            ('.', _) => (Sym::Dot, 1),
            ('=', _) => (Sym::Assign, 1),
            ('<', _) => (Sym::Lt, 1),
            ('>', _) => (Sym::Gt, 1),
            ('+', _) => (Sym::Plus, 1),
            ('-', _) => (Sym::Minus, 1),
            ('*', _) => (Sym::Star, 1),
            ('/', _) => (Sym::Slash, 1),
            ('%', _) => (Sym::Percent, 1),
            _ => {
                return Err(ParseError::new(
                    self.line,
                    format!("unexpected character {:?}", c),
                ))
            }
        };
        match sym {
            Sym::LParen | Sym::LBracket => self.nesting += 1,
            Sym::RParen | Sym::RBracket => self.nesting = self.nesting.saturating_sub(1),
            _ => {}
        }
        self.pos += width;
        self.push(Tok::Sym(sym), self.line);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn comments_and_front_matter_are_skipped() {
        assert_eq!(
            toks("#| arg: count:int=3\nx = 1 # trailing\n"),
            vec![
                Tok::Name("x".into()),
                Tok::Sym(Sym::Assign),
                Tok::Int(1),
                Tok::Newline,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn newlines_inside_brackets_are_ignored() {
        let tokens = toks("f(1,\n  2)\n[3,\n4]");
        assert_eq!(tokens.iter().filter(|t| **t == Tok::Newline).count(), 2);
    }

    #[test]
    fn two_character_operators_win() {
        assert_eq!(
            toks("a //= b"),
            vec![
                Tok::Name("a".into()),
                Tok::Sym(Sym::SlashSlash),
                Tok::Sym(Sym::Assign),
                Tok::Name("b".into()),
                Tok::Newline,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn numbers_and_escapes() {
        assert_eq!(
            toks(r#"1.5 2e3 42 'it\'s\n'"#)[..4],
            [
                Tok::Float(1.5),
                Tok::Float(2000.0),
                Tok::Int(42),
                Tok::Str("it's\n".into())
            ]
        );
    }

    #[test]
    fn errors_carry_line_numbers() {
        let err = tokenize("x = 1\ny = 'open\n").unwrap_err();
        assert_eq!(err.line, 2);
        let err = tokenize("\n\nz = $").unwrap_err();
        assert_eq!(err.line, 3);
    }
}
