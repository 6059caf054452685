//! Valve KeyValues text parser
//!
//! Gamedata files shipped for Source servers use the KeyValues format:
//!
//! ```text
//! "Games"
//! {
//!     "csgo"
//!     {
//!         "Offsets"
//!         {
//!             "OnDamagedByExplosion"
//!             {
//!                 "windows"   "335"
//!                 "linux"     "336"
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! Only the subset needed for gamedata is supported: quoted and bare tokens,
//! nested sections, `//` comments, escape sequences in quoted strings, and
//! `[$CONDITION]` suffixes (parsed and discarded).

use super::GamedataError;

/// A value in a KeyValues tree
#[derive(Debug, Clone, PartialEq)]
pub enum KvValue {
    /// Leaf string value
    Str(String),
    /// Nested section, keys in file order (duplicates allowed)
    Section(Vec<KvPair>),
}

/// A key with its value and the line it was declared on
#[derive(Debug, Clone, PartialEq)]
pub struct KvPair {
    pub key: String,
    pub value: KvValue,
    /// 1-based line of the key, `None` for trees built from JSON
    pub line: Option<usize>,
}

impl KvPair {
    pub fn section(&self) -> Option<&[KvPair]> {
        match &self.value {
            KvValue::Section(children) => Some(children),
            KvValue::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            KvValue::Str(s) => Some(s),
            KvValue::Section(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Str(String),
    Conditional,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            line: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() || c == '\u{feff}' {
                self.bump();
            } else if c == '/' {
                // Only `//` starts a comment; a lone slash is part of a bare token
                let mut lookahead = self.chars.clone();
                lookahead.next();
                if lookahead.peek() != Some(&'/') {
                    return;
                }
                while let Some(c) = self.chars.peek() {
                    if *c == '\n' {
                        break;
                    }
                    self.bump();
                }
            } else {
                return;
            }
        }
    }

    /// Next token with the line it starts on
    fn next_token(&mut self) -> Result<Option<(Token, usize)>, GamedataError> {
        self.skip_trivia();
        let line = self.line;

        let Some(c) = self.bump() else {
            return Ok(None);
        };

        let token = match c {
            '{' => Token::Open,
            '}' => Token::Close,
            '"' => Token::Str(self.quoted(line)?),
            '[' => {
                loop {
                    match self.bump() {
                        Some(']') => break,
                        Some('\n') | None => {
                            return Err(GamedataError::parse(line, "unterminated conditional"))
                        }
                        Some(_) => {}
                    }
                }
                Token::Conditional
            }
            first => {
                let mut bare = String::from(first);
                while let Some(&c) = self.chars.peek() {
                    if c.is_whitespace() || matches!(c, '{' | '}' | '"') {
                        break;
                    }
                    bare.push(c);
                    self.bump();
                }
                Token::Str(bare)
            }
        };

        Ok(Some((token, line)))
    }

    fn quoted(&mut self, start_line: usize) -> Result<String, GamedataError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('\\') => out.push('\\'),
                    Some('"') => out.push('"'),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => break,
                },
                Some(c) => out.push(c),
                None => break,
            }
        }
        Err(GamedataError::parse(start_line, "unterminated string"))
    }
}

/// Deepest section nesting accepted; real gamedata stays under ten
const MAX_DEPTH: usize = 64;

struct Parser<'a> {
    lexer: Lexer<'a>,
    peeked: Option<(Token, usize)>,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn next(&mut self) -> Result<Option<(Token, usize)>, GamedataError> {
        match self.peeked.take() {
            Some(t) => Ok(Some(t)),
            None => self.lexer.next_token(),
        }
    }

    fn peek(&mut self) -> Result<Option<&(Token, usize)>, GamedataError> {
        if self.peeked.is_none() {
            self.peeked = self.lexer.next_token()?;
        }
        Ok(self.peeked.as_ref())
    }

    fn skip_conditional(&mut self) -> Result<(), GamedataError> {
        if matches!(self.peek()?, Some((Token::Conditional, _))) {
            self.next()?;
        }
        Ok(())
    }

    fn section(&mut self, opened_at: Option<usize>) -> Result<Vec<KvPair>, GamedataError> {
        let mut pairs = Vec::new();

        loop {
            let Some((token, line)) = self.next()? else {
                return match opened_at {
                    Some(open_line) => Err(GamedataError::parse(
                        open_line,
                        "section is never closed (missing '}')",
                    )),
                    None => Ok(pairs),
                };
            };

            let key = match token {
                Token::Str(key) => key,
                Token::Close if opened_at.is_some() => return Ok(pairs),
                Token::Close => return Err(GamedataError::parse(line, "unexpected '}'")),
                Token::Open => return Err(GamedataError::parse(line, "expected a key, found '{'")),
                Token::Conditional => {
                    return Err(GamedataError::parse(line, "conditional without a key"))
                }
            };

            self.skip_conditional()?;

            let value = match self.next()? {
                Some((Token::Open, open_line)) => {
                    if self.depth >= MAX_DEPTH {
                        return Err(GamedataError::parse(open_line, "sections nested too deeply"));
                    }
                    self.depth += 1;
                    let children = self.section(Some(open_line))?;
                    self.depth -= 1;
                    KvValue::Section(children)
                }
                Some((Token::Str(value), _)) => KvValue::Str(value),
                Some((_, line)) => {
                    return Err(GamedataError::parse(
                        line,
                        format!("expected a value or section for key \"{}\"", key),
                    ))
                }
                None => {
                    return Err(GamedataError::parse(
                        line,
                        format!("missing value for key \"{}\"", key),
                    ))
                }
            };

            self.skip_conditional()?;

            pairs.push(KvPair {
                key,
                value,
                line: Some(line),
            });
        }
    }
}

/// Parse a KeyValues document into its top-level pairs
pub fn parse(input: &str) -> Result<Vec<KvPair>, GamedataError> {
    let mut parser = Parser {
        lexer: Lexer::new(input),
        peeked: None,
        depth: 0,
    };
    parser.section(None)
}

/// Convert a JSON document into the same tree shape
///
/// Objects become sections, scalars become strings. Arrays become sections
/// keyed by index, so sections that hold lists (signature bytes, address
/// read chains) load; an array where an offset is expected still fails when
/// the entry is validated.
pub fn from_json(value: &serde_json::Value) -> Result<Vec<KvPair>, GamedataError> {
    match value {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(key, value)| json_pair(key.clone(), value))
            .collect(),
        _ => Err(GamedataError::InvalidEntry(
            "gamedata root must be an object".to_string(),
        )),
    }
}

fn json_pair(key: String, value: &serde_json::Value) -> Result<KvPair, GamedataError> {
    let value = match value {
        serde_json::Value::Object(_) => KvValue::Section(from_json(value)?),
        serde_json::Value::Array(items) => KvValue::Section(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| json_pair(i.to_string(), item))
                .collect::<Result<_, _>>()?,
        ),
        serde_json::Value::String(s) => KvValue::Str(s.clone()),
        serde_json::Value::Number(n) => KvValue::Str(n.to_string()),
        serde_json::Value::Bool(b) => KvValue::Str(if *b { "1" } else { "0" }.into()),
        serde_json::Value::Null => KvValue::Str(String::new()),
    };
    Ok(KvPair {
        key,
        value,
        line: None,
    })
}
