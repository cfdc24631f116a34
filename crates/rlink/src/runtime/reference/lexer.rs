use crate::errors::BridgeError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    If,
    Else,
    True,
    False,
    Null,
    Inf,
    NaN,
    Na,
    LeftAssign,
    SuperAssign,
    RightAssign,
    Equals,
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Colon,
    Dollar,
    EqualEqual,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Bang,
    Amp,
    AmpAmp,
    Pipe,
    PipePipe,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    DoubleLBracket,
    RBracket,
    Comma,
    Semicolon,
    Newline,
    Eof,
}

impl TokenKind {
    /// Token text as R reports it in "unexpected ..." messages
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Number(_) => "numeric constant".to_string(),
            TokenKind::Str(_) => "string constant".to_string(),
            TokenKind::Ident(_) => "symbol".to_string(),
            TokenKind::If => "'if'".to_string(),
            TokenKind::Else => "'else'".to_string(),
            TokenKind::True
            | TokenKind::False
            | TokenKind::Null
            | TokenKind::Inf
            | TokenKind::NaN
            | TokenKind::Na => "numeric constant".to_string(),
            TokenKind::Newline => "end of line".to_string(),
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::LeftAssign => "assignment".to_string(),
            TokenKind::SuperAssign => "assignment".to_string(),
            TokenKind::RightAssign => "assignment".to_string(),
            TokenKind::Equals => "'='".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Caret => "^",
            TokenKind::Colon => ":",
            TokenKind::Dollar => "$",
            TokenKind::EqualEqual => "==",
            TokenKind::NotEqual => "!=",
            TokenKind::Less => "<",
            TokenKind::LessEqual => "<=",
            TokenKind::Greater => ">",
            TokenKind::GreaterEqual => ">=",
            TokenKind::Bang => "!",
            TokenKind::Amp => "&",
            TokenKind::AmpAmp => "&&",
            TokenKind::Pipe => "|",
            TokenKind::PipePipe => "||",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::DoubleLBracket => "[[",
            TokenKind::RBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            _ => "?",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

pub fn parse_error(line: usize, column: usize, message: &str) -> BridgeError {
    BridgeError::Parse(format!("<text>:{}:{}: {}", line, column, message))
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
    /// Open delimiters; newlines are insignificant inside `(` and `[`
    nesting: Vec<char>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            column: 0,
            nesting: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, BridgeError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek() == Some(&expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn newlines_significant(&self) -> bool {
        matches!(self.nesting.last(), None | Some('{'))
    }

    fn next_token(&mut self) -> Result<Token, BridgeError> {
        loop {
            match self.chars.peek().copied() {
                Some(' ' | '\t' | '\r' | '\u{c}') => {
                    self.bump();
                }
                Some('#') => {
                    while self.chars.peek().is_some_and(|c| *c != '\n') {
                        self.bump();
                    }
                }
                Some('\n') if !self.newlines_significant() => {
                    self.bump();
                }
                _ => break,
            }
        }

        let (line, column) = (self.line, self.column + 1);
        let token = |kind| Token { kind, line, column };

        let Some(c) = self.bump() else {
            return Ok(token(TokenKind::Eof));
        };

        let kind = match c {
            '\n' => TokenKind::Newline,
            '0'..='9' => self.number(c, line, column)?,
            '.' if self.chars.peek().is_some_and(char::is_ascii_digit) => {
                self.number(c, line, column)?
            }
            '"' | '\'' => TokenKind::Str(self.string(c, line, column)?),
            '`' => TokenKind::Ident(self.backtick(line, column)?),
            c if c.is_alphabetic() || c == '.' => self.word(c),
            '<' => {
                if self.eat('-') {
                    TokenKind::LeftAssign
                } else if self.eat('<') {
                    if self.eat('-') {
                        TokenKind::SuperAssign
                    } else {
                        return Err(parse_error(line, column, "unexpected '<'"));
                    }
                } else if self.eat('=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                }
            }
            '-' => {
                if self.eat('>') {
                    TokenKind::RightAssign
                } else {
                    TokenKind::Minus
                }
            }
            '>' => {
                if self.eat('=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                }
            }
            '=' => {
                if self.eat('=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equals
                }
            }
            '!' => {
                if self.eat('=') {
                    TokenKind::NotEqual
                } else {
                    TokenKind::Bang
                }
            }
            '&' => {
                if self.eat('&') {
                    TokenKind::AmpAmp
                } else {
                    TokenKind::Amp
                }
            }
            '|' => {
                if self.eat('|') {
                    TokenKind::PipePipe
                } else {
                    TokenKind::Pipe
                }
            }
            '+' => TokenKind::Plus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '^' => TokenKind::Caret,
            ':' => TokenKind::Colon,
            '$' => TokenKind::Dollar,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '(' => {
                self.nesting.push('(');
                TokenKind::LParen
            }
            '{' => {
                self.nesting.push('{');
                TokenKind::LBrace
            }
            '[' => {
                self.nesting.push('[');
                if self.eat('[') {
                    self.nesting.push('[');
                    TokenKind::DoubleLBracket
                } else {
                    TokenKind::LBracket
                }
            }
            ')' | '}' | ']' => {
                self.nesting.pop();
                match c {
                    ')' => TokenKind::RParen,
                    '}' => TokenKind::RBrace,
                    _ => TokenKind::RBracket,
                }
            }
            other => {
                return Err(parse_error(
                    line,
                    column,
                    &format!("unexpected input '{}'", other),
                ))
            }
        };
        Ok(token(kind))
    }

    fn number(&mut self, first: char, line: usize, column: usize) -> Result<TokenKind, BridgeError> {
        let mut text = String::from(first);
        if first == '0' && self.chars.peek().is_some_and(|c| *c == 'x' || *c == 'X') {
            self.bump();
            let mut digits = String::new();
            while let Some(c) = self.chars.peek().copied().filter(char::is_ascii_hexdigit) {
                digits.push(c);
                self.bump();
            }
            self.eat('L');
            return u64::from_str_radix(&digits, 16)
                .map(|n| TokenKind::Number(n as f64))
                .map_err(|_| parse_error(line, column, "malformed hexadecimal constant"));
        }

        while let Some(c) = self.chars.peek().copied() {
            if c.is_ascii_digit() || c == '.' {
                text.push(c);
                self.bump();
            } else if c == 'e' || c == 'E' {
                text.push(c);
                self.bump();
                if let Some(sign) = self.chars.peek().copied().filter(|s| *s == '+' || *s == '-') {
                    text.push(sign);
                    self.bump();
                }
            } else {
                break;
            }
        }
        // Integer suffix; the reference runtime stores all numbers as doubles
        self.eat('L');
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| parse_error(line, column, &format!("malformed number '{}'", text)))
    }

    fn string(&mut self, quote: char, line: usize, column: usize) -> Result<String, BridgeError> {
        let mut value = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(parse_error(line, column, "unexpected INCOMPLETE_STRING"));
            };
            match c {
                c if c == quote => return Ok(value),
                '\\' => value.push(self.escape(line, column)?),
                c => value.push(c),
            }
        }
    }

    fn escape(&mut self, line: usize, column: usize) -> Result<char, BridgeError> {
        let Some(c) = self.bump() else {
            return Err(parse_error(line, column, "unexpected INCOMPLETE_STRING"));
        };
        let simple = match c {
            'n' => Some('\n'),
            't' => Some('\t'),
            'r' => Some('\r'),
            '0' => None,
            'a' => Some('\u{7}'),
            'b' => Some('\u{8}'),
            'f' => Some('\u{c}'),
            'v' => Some('\u{b}'),
            '\\' | '"' | '\'' | '`' | ' ' => Some(c),
            'x' => return self.hex_escape(2, false, line, column),
            'u' => return self.hex_escape(4, true, line, column),
            'U' => return self.hex_escape(8, true, line, column),
            _ => {
                return Err(parse_error(
                    line,
                    column,
                    &format!("'\\{}' is an unrecognized escape in character string", c),
                ))
            }
        };
        simple.ok_or_else(|| parse_error(line, column, "nul character not allowed"))
    }

    fn hex_escape(
        &mut self,
        max_digits: usize,
        braces_allowed: bool,
        line: usize,
        column: usize,
    ) -> Result<char, BridgeError> {
        let braced = braces_allowed && self.eat('{');
        let mut digits = String::new();
        while digits.len() < max_digits {
            match self.chars.peek().copied().filter(char::is_ascii_hexdigit) {
                Some(d) => {
                    digits.push(d);
                    self.bump();
                }
                None => break,
            }
        }
        if braced && !self.eat('}') {
            return Err(parse_error(line, column, "invalid \\u{xxxx} sequence"));
        }
        let code = u32::from_str_radix(&digits, 16)
            .map_err(|_| parse_error(line, column, "malformed hex escape"))?;
        if code == 0 {
            return Err(parse_error(line, column, "nul character not allowed"));
        }
        char::from_u32(code).ok_or_else(|| parse_error(line, column, "invalid unicode escape"))
    }

    fn backtick(&mut self, line: usize, column: usize) -> Result<String, BridgeError> {
        let mut name = String::new();
        loop {
            match self.bump() {
                Some('`') => return Ok(name),
                Some('\\') => name.push(self.escape(line, column)?),
                Some(c) => name.push(c),
                None => return Err(parse_error(line, column, "unexpected INCOMPLETE_STRING")),
            }
        }
    }

    fn word(&mut self, first: char) -> TokenKind {
        let mut word = String::from(first);
        while let Some(c) = self
            .chars
            .peek()
            .copied()
            .filter(|c| c.is_alphanumeric() || *c == '.' || *c == '_')
        {
            word.push(c);
            self.bump();
        }
        match word.as_str() {
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "TRUE" => TokenKind::True,
            "FALSE" => TokenKind::False,
            "NULL" => TokenKind::Null,
            "Inf" => TokenKind::Inf,
            "NaN" => TokenKind::NaN,
            "NA" => TokenKind::Na,
            _ => TokenKind::Ident(word),
        }
    }
}
