pub mod tokens;

pub use tokens::*;

/// Hand-rolled tokenizer for the small YAML subset the config loader needs:
/// scalars, quoted strings, nested maps/lists via indentation, and inline
/// `[...]`/`{...}` collections. Borrows from `source` throughout — no
/// allocation on the hot path.
#[derive(Debug)]
pub struct Tokenizer<'a> {
    source: &'a str,
    pos: usize,
    at_line_start: bool,
    line: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            at_line_start: true,
            line: 1,
        }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn peek_byte(&self) -> Option<u8> {
        self.rest().as_bytes().first().copied()
    }

    pub fn next_token(&mut self) -> Result<Token<'a>, LexerError> {
        if self.at_line_start {
            let indent = self.consume_indent();
            self.at_line_start = false;
            // A blank or comment-only line carries no indentation meaning;
            // fold straight into the next real token instead of reporting
            // a spurious Indent.
            if matches!(self.peek_byte(), Some(b'\n') | Some(b'#') | None) {
                return self.next_token();
            }
            return Ok(Token::Indent(indent));
        }

        self.skip_inline_whitespace();

        let Some(b) = self.peek_byte() else {
            return Ok(Token::Eof);
        };

        match b {
            b'\n' => {
                self.pos += 1;
                self.line += 1;
                self.at_line_start = true;
                Ok(Token::NewLine)
            }
            b'#' => {
                // Comment runs to end of line; the newline is picked up
                // on the next call.
                while !matches!(self.peek_byte(), Some(b'\n') | None) {
                    self.pos += 1;
                }
                self.next_token()
            }
            b'-' => {
                self.pos += 1;
                Ok(Token::Dash)
            }
            b',' => {
                self.pos += 1;
                Ok(Token::Comma)
            }
            b':' => {
                self.pos += 1;
                Ok(Token::Colon)
            }
            b'[' => {
                self.pos += 1;
                Ok(Token::OpenBracket)
            }
            b']' => {
                self.pos += 1;
                Ok(Token::CloseBracket)
            }
            b'{' => {
                self.pos += 1;
                Ok(Token::OpenBrace)
            }
            b'}' => {
                self.pos += 1;
                Ok(Token::CloseBrace)
            }
            b'"' | b'\'' => self.read_quoted(b),
            _ => Ok(self.read_identifier()),
        }
    }

    fn consume_indent(&mut self) -> usize {
        let mut n = 0;
        while self.peek_byte() == Some(b' ') {
            n += 1;
            self.pos += 1;
        }
        n
    }

    fn skip_inline_whitespace(&mut self) {
        while matches!(self.peek_byte(), Some(b' ') | Some(b'\t')) {
            self.pos += 1;
        }
    }

    fn read_quoted(&mut self, quote: u8) -> Result<Token<'a>, LexerError> {
        let start_line = self.line;
        self.pos += 1;
        let start = self.pos;
        loop {
            match self.peek_byte() {
                Some(b) if b == quote => {
                    let value = &self.source[start..self.pos];
                    self.pos += 1;
                    return Ok(Token::Scalar(value));
                }
                Some(b'\n') | None => {
                    return Err(LexerError::UnterminatedString { line: start_line });
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    /// A bare word. Stops at structural punctuation so `key: value` and
    /// `[a, b]` tokenize without quoting.
    fn read_identifier(&mut self) -> Token<'a> {
        let start = self.pos;
        while let Some(b) = self.peek_byte() {
            if matches!(b, b':' | b',' | b'\n' | b'#' | b'[' | b']' | b'{' | b'}') {
                break;
            }
            self.pos += 1;
        }
        let raw = &self.source[start..self.pos];
        let trimmed = raw.trim_end_matches([' ', '\t']);
        if trimmed.is_empty() {
            Token::Scalar(trimmed)
        } else {
            Token::Identifier(trimmed)
        }
    }
}
