pub mod from_yaml;
pub use from_yaml::*;
use std::collections::BTreeMap;

use crate::lexer::{LexerError, Token, Tokenizer};

pub mod lexer;

#[derive(Debug)]
pub enum YamlValue<'a> {
    Map(BTreeMap<&'a str, YamlValue<'a>>),
    List(Vec<YamlValue<'a>>),
    Scalar(&'a str),
}

impl<'a> YamlValue<'a> {
    pub fn get(&self, key: &str) -> Option<&YamlValue<'a>> {
        if let YamlValue::Map(m) = self {
            m.get(key)
        } else {
            None
        }
    }

    pub fn index(&self, i: usize) -> Option<&YamlValue<'a>> {
        if let YamlValue::List(l) = self {
            l.get(i)
        } else {
            None
        }
    }
}

/// Crate-wide parse error. Wraps lexer failures and surfaces the parser's
/// own structural complaints (bad indentation, missing colons, duplicate
/// keys) as `Generic` — mirrors the shape of the app-level `CleanError` the
/// binary crate wraps this in.
#[derive(Debug)]
pub enum YamlError {
    Lexer(LexerError),
    Generic(String),
}

impl std::fmt::Display for YamlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            YamlError::Lexer(e) => write!(f, "{}", e),
            YamlError::Generic(s) => write!(f, "{}", s),
        }
    }
}

impl std::error::Error for YamlError {}

impl From<LexerError> for YamlError {
    fn from(e: LexerError) -> Self {
        YamlError::Lexer(e)
    }
}

pub struct Parser<'a> {
    pub tokenizer: Tokenizer<'a>,
    pub lookahead: Token<'a>,
    pub indent_stack: Vec<usize>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Result<Self, YamlError> {
        let mut tokenizer = Tokenizer::new(source);
        let first = tokenizer.next_token()?;
        Ok(Self {
            tokenizer,
            lookahead: first,
            indent_stack: vec![0],
        })
    }

    fn skip_junk(&mut self) -> Result<(), YamlError> {
        while let Token::NewLine = self.lookahead {
            self.advance()?
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<(), YamlError> {
        self.lookahead = self.tokenizer.next_token()?;
        Ok(())
    }

    pub fn parse(&mut self) -> Result<YamlValue<'a>, YamlError> {
        self.skip_junk()?;

        // If the file starts with an Indent, consume it before parsing the first value
        if let Token::Indent(n) = self.lookahead {
            let start_indent = n;
            self.advance()?;
            self.parse_value(start_indent)
        } else {
            self.parse_value(0)
        }
    }

    pub fn parse_value(&mut self, current_indent: usize) -> Result<YamlValue<'a>, YamlError> {
        self.skip_junk()?;

        match &self.lookahead {
            Token::Indent(n) => {
                let n_val = *n;
                // If the indent is deeper than our current scope, it's a new block (Map/List)
                if n_val > current_indent {
                    self.advance()?; // Consume the indent
                    if matches!(self.lookahead, Token::Dash) {
                        return self.parse_list(n_val, current_indent);
                    }
                    return self.parse_value(n_val);
                }
                // If it's a dedent or sibling, we stop here.
                // This allows the parent map/list to see the Indent token.
                Ok(YamlValue::Scalar(""))
            }
            Token::Dash => self.parse_list(current_indent, current_indent),

            Token::OpenBracket => self.parse_bracket_list(),
            Token::OpenBrace => self.parse_brace_map(),

            Token::Identifier(s) => {
                let val = *s;
                self.advance()?;
                if matches!(self.lookahead, Token::Colon) {
                    // If it's a key: value pair, start a map
                    self.parse_map(val, current_indent)
                } else {
                    Ok(YamlValue::Scalar(val))
                }
            }
            Token::Scalar(s) => {
                let val = *s;
                self.advance()?;
                Ok(YamlValue::Scalar(val))
            }
            other => Err(YamlError::Generic(format!("expected value, found {:?}", other))),
        }
    }

    pub fn parse_list(
        &mut self,
        list_indent: usize,
        parent_indent: usize,
    ) -> Result<YamlValue<'a>, YamlError> {
        let mut items = Vec::new();

        loop {
            if !matches!(self.lookahead, Token::Dash) {
                break;
            }
            self.advance()?; // Consume '-'
            items.push(self.parse_value(list_indent + 2)?);
            self.skip_junk()?;

            if let Token::Indent(n) = self.lookahead {
                let n_val = n;

                if n_val == list_indent {
                    self.advance()?;
                    if matches!(self.lookahead, Token::Dash) {
                        continue;
                    } else {
                        return Err(YamlError::Generic(format!(
                            "expected '-' for list item, found {:?}",
                            self.lookahead
                        )));
                    }
                } else if n_val <= parent_indent {
                    // Dedent — the list has ended.
                    break;
                } else {
                    return Err(YamlError::Generic(format!(
                        "sequence items must start at the same column (expected {}, found {})",
                        list_indent, n_val
                    )));
                }
            } else if !matches!(self.lookahead, Token::Dash) {
                break;
            }
        }
        Ok(YamlValue::List(items))
    }

    pub fn parse_brace_map(&mut self) -> Result<YamlValue<'a>, YamlError> {
        self.advance()?;
        let mut map = BTreeMap::new();
        while !matches!(self.lookahead, Token::CloseBrace) && !matches!(self.lookahead, Token::Eof)
        {
            if matches!(self.lookahead, Token::Indent(_)) || matches!(self.lookahead, Token::NewLine)
            {
                self.advance()?;
                continue;
            }

            let key = match self.lookahead {
                Token::Identifier(s) => {
                    let key = s;
                    self.advance()?;
                    key
                }
                _ => return Err(YamlError::Generic("expected identifier".into())),
            };

            if !matches!(self.lookahead, Token::Colon) {
                return Err(YamlError::Generic("expected colon".into()));
            }
            self.advance()?;

            let value = self.parse_value(0)?;
            map.insert(key, value);

            if matches!(self.lookahead, Token::Comma) {
                self.advance()?;
                while matches!(self.lookahead, Token::Indent(_)) || matches!(self.lookahead, Token::NewLine)
                {
                    self.advance()?;
                }
            }
        }

        if !matches!(self.lookahead, Token::CloseBrace) {
            return Err(YamlError::Generic("expected closing brace '}'".into()));
        }

        self.advance()?;
        Ok(YamlValue::Map(map))
    }

    fn parse_bracket_list(&mut self) -> Result<YamlValue<'a>, YamlError> {
        self.advance()?;

        let mut items = Vec::new();
        while !matches!(self.lookahead, Token::CloseBracket) && !matches!(self.lookahead, Token::Eof)
        {
            if matches!(self.lookahead, Token::Indent(_)) || matches!(self.lookahead, Token::NewLine)
            {
                self.advance()?;
                continue;
            }

            items.push(self.parse_value(0)?);

            if matches!(self.lookahead, Token::Comma) {
                self.advance()?;
                while matches!(self.lookahead, Token::Indent(_)) || matches!(self.lookahead, Token::NewLine)
                {
                    self.advance()?;
                }
            }
        }

        if !matches!(self.lookahead, Token::CloseBracket) {
            return Err(YamlError::Generic("expected closing bracket ']'".into()));
        }

        self.advance()?;
        Ok(YamlValue::List(items))
    }

    pub fn parse_map(
        &mut self,
        first_key: &'a str,
        map_indent: usize, // The indent level of the keys in this map
    ) -> Result<YamlValue<'a>, YamlError> {
        let mut map = BTreeMap::new();
        let mut current_key = first_key;

        loop {
            if !matches!(self.lookahead, Token::Colon) {
                return Err(YamlError::Generic(format!(
                    "expected ':' after '{}', found {:?}",
                    current_key, self.lookahead
                )));
            }
            self.advance()?; // Consume ':'
            self.skip_junk()?;

            let value = self.parse_value(map_indent)?;

            if map.insert(current_key, value).is_some() {
                return Err(YamlError::Generic(format!("duplicate key found: {}", current_key)));
            }

            self.skip_junk()?;

            if let Token::Indent(n) = self.lookahead {
                if n == map_indent {
                    self.advance()?; // Consume the Indent

                    match self.lookahead {
                        Token::Identifier(s) => {
                            current_key = s;
                            self.advance()?; // Consume the Key
                            continue;
                        }
                        _ => {
                            return Err(YamlError::Generic(format!(
                                "expected identifier for map key, found {:?}",
                                self.lookahead
                            )));
                        }
                    }
                } else if n > map_indent {
                    return Err(YamlError::Generic(format!(
                        "map keys must align at the same column (expected {}, found {})",
                        map_indent, n
                    )));
                } else {
                    // Dedent or end of map
                    break;
                }
            }

            break;
        }
        Ok(YamlValue::Map(map))
    }
}
