//! Tokenizer and parser for the `users`, `labels` and `keywords` options.
//!
//! ```text
//! labels   := label-clause ("," label-clause)*
//! label-clause := value "=" value ":" value
//! users    := actor-clause ("," actor-clause)*
//! actor-clause := value ":" value
//! keywords := value ("," value)*
//! value    := bare-word | quoted-string
//! ```
//!
//! Bare words run up to whitespace or one of `=:,"'`. Quoted strings use
//! either quote character and may contain anything but that quote.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("at offset {offset}: {message}")]
pub(crate) struct GrammarError {
    pub offset: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Bare(String),
    Quoted(String),
    Equals,
    Colon,
    Comma,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Bare(word) => format!("{word:?}"),
            Token::Quoted(text) => format!("\"{text}\""),
            Token::Equals => "'='".to_string(),
            Token::Colon => "':'".to_string(),
            Token::Comma => "','".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Spanned {
    token: Token,
    offset: usize,
}

fn tokenize(input: &str) -> Result<Vec<Spanned>, GrammarError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some(&(offset, c)) = chars.peek() {
        let token = match c {
            _ if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '=' => {
                chars.next();
                Token::Equals
            }
            ':' => {
                chars.next();
                Token::Colon
            }
            ',' => {
                chars.next();
                Token::Comma
            }
            '"' | '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some((_, q)) if q == c => break,
                        Some((_, other)) => text.push(other),
                        None => {
                            return Err(GrammarError {
                                offset,
                                message: "quoted text must end with a matching quote".to_string(),
                            })
                        }
                    }
                }
                Token::Quoted(text)
            }
            _ => {
                let mut word = String::new();
                while let Some(&(_, w)) = chars.peek() {
                    if w.is_whitespace() || "=:,\"'".contains(w) {
                        break;
                    }
                    word.push(w);
                    chars.next();
                }
                Token::Bare(word)
            }
        };
        tokens.push(Spanned { token, offset });
    }
    Ok(tokens)
}

/// A written value, remembering whether it was quoted: `*` is a wildcard
/// but `"*"` is not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Value {
    Bare(String),
    Quoted(String),
}

impl Value {
    pub(crate) fn into_text(self) -> String {
        match self {
            Value::Bare(text) | Value::Quoted(text) => text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LabelClause {
    pub field: String,
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ActorClause {
    pub source: Value,
    pub target: Value,
}

struct Parser {
    tokens: Vec<Spanned>,
    position: usize,
    end: usize,
}

impl Parser {
    fn new(input: &str) -> Result<Parser, GrammarError> {
        Ok(Parser {
            tokens: tokenize(input)?,
            position: 0,
            end: input.len(),
        })
    }

    fn at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn error(&self, expected: &str) -> GrammarError {
        match self.tokens.get(self.position) {
            Some(spanned) => GrammarError {
                offset: spanned.offset,
                message: format!("expected {expected} instead of {}", spanned.token.describe()),
            },
            None => GrammarError {
                offset: self.end,
                message: format!("expected {expected} but the text ends"),
            },
        }
    }

    fn value(&mut self, expected: &str) -> Result<Value, GrammarError> {
        let value = match self.tokens.get(self.position).map(|s| &s.token) {
            Some(Token::Bare(word)) => Value::Bare(word.clone()),
            Some(Token::Quoted(text)) => Value::Quoted(text.clone()),
            _ => return Err(self.error(expected)),
        };
        self.position += 1;
        Ok(value)
    }

    fn punct(&mut self, wanted: Token) -> Result<(), GrammarError> {
        match self.tokens.get(self.position) {
            Some(spanned) if spanned.token == wanted => {
                self.position += 1;
                Ok(())
            }
            _ => Err(self.error(&wanted.describe())),
        }
    }

    /// Clauses separated by commas; an empty input has none.
    fn list<T>(
        &mut self,
        mut clause: impl FnMut(&mut Parser) -> Result<T, GrammarError>,
    ) -> Result<Vec<T>, GrammarError> {
        let mut clauses = Vec::new();
        if self.at_end() {
            return Ok(clauses);
        }
        loop {
            clauses.push(clause(&mut *self)?);
            if self.at_end() {
                return Ok(clauses);
            }
            self.punct(Token::Comma)?;
        }
    }
}

pub(crate) fn parse_label_clauses(input: &str) -> Result<Vec<LabelClause>, GrammarError> {
    Parser::new(input)?.list(|p| {
        let field = p.value("a ticket field")?.into_text();
        p.punct(Token::Equals)?;
        let value = p.value("a field value")?.into_text();
        p.punct(Token::Colon)?;
        let label = p.value("a label")?.into_text();
        Ok(LabelClause { field, value, label })
    })
}

pub(crate) fn parse_actor_clauses(input: &str) -> Result<Vec<ActorClause>, GrammarError> {
    Parser::new(input)?.list(|p| {
        let source = p.value("a source user")?;
        p.punct(Token::Colon)?;
        let target = p.value("a target user")?;
        Ok(ActorClause { source, target })
    })
}

pub(crate) fn parse_keyword_list(input: &str) -> Result<Vec<String>, GrammarError> {
    Parser::new(input)?.list(|p| Ok(p.value("a keyword")?.into_text()))
}
