//! Query language for tree search
//!
//! ```text
//! chara mdl            both words appear in the path (case-insensitive)
//! exd OR music         either word; `|` works too
//! chara -e0001         `-` or `!` negates the next term
//! (bg | cut) lgb       parentheses group
//! "Root.exl"           quoted text matches case-sensitively
//! *.mdl  c01??e*       wildcards match the whole path or the whole name
//! ```

use crate::cancel::CancellationToken;
use crate::{Result, VfsError};
use std::time::Instant;

/// Result of matching one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The entry satisfies the query
    Matched,
    /// The entry does not satisfy the query
    NotMatched,
    /// Matching ran past the entry deadline
    TimedOut,
    /// The search was cancelled while matching
    Cancelled,
}

/// Text a query is matched against
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    /// Full path without a trailing `/`
    pub path: &'a str,
    /// Last path segment
    pub name: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Contains(String),
    Exact(String),
    Glob(Vec<u8>),
    Not(Box<Expr>),
    All(Vec<Expr>),
    Any(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Or,
    Not,
    Word(String),
    Quoted(String),
}

/// A parsed search query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    text: String,
    expr: Expr,
}

fn invalid(reason: impl Into<String>) -> VfsError {
    VfsError::InvalidQuery(reason.into())
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | '|' | '-' | '!' => {
                chars.next();
                tokens.push(match c {
                    '(' => Token::Open,
                    ')' => Token::Close,
                    '|' => Token::Or,
                    _ => Token::Not,
                });
            }
            '"' => {
                chars.next();
                let mut quoted = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(c) => quoted.push(c),
                        None => return Err(invalid("unterminated quote")),
                    }
                }
                if quoted.is_empty() {
                    return Err(invalid("empty quoted term"));
                }
                tokens.push(Token::Quoted(quoted));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '(' | ')' | '|' | '"') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(if word == "OR" {
                    Token::Or
                } else {
                    Token::Word(word)
                });
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn any(&mut self) -> Result<Expr> {
        let mut terms = vec![self.all()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            terms.push(self.all()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::Any(terms)
        })
    }

    fn all(&mut self) -> Result<Expr> {
        let mut terms = Vec::new();
        while let Some(token) = self.peek() {
            if matches!(token, Token::Or | Token::Close) {
                break;
            }
            terms.push(self.unary()?);
        }
        match terms.len() {
            0 => Err(invalid("expected a term")),
            1 => Ok(terms.remove(0)),
            _ => Ok(Expr::All(terms)),
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Not) => Ok(Expr::Not(Box::new(self.unary()?))),
            Some(Token::Open) => {
                let inner = self.any()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(invalid("unclosed parenthesis")),
                }
            }
            Some(Token::Word(word)) => Ok(term(&word)),
            Some(Token::Quoted(text)) => Ok(Expr::Exact(text)),
            Some(Token::Close | Token::Or) | None => Err(invalid("expected a term")),
        }
    }
}

fn term(word: &str) -> Expr {
    let lowered = word.to_lowercase();
    if word.contains(['*', '?']) {
        Expr::Glob(lowered.into_bytes())
    } else {
        Expr::Contains(lowered)
    }
}

impl Query {
    /// Parse a query; empty or malformed queries are rejected
    pub fn parse(text: &str) -> Result<Self> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            return Err(invalid("empty query"));
        }

        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.any()?;
        if parser.pos < parser.tokens.len() {
            return Err(invalid("unexpected ')'"));
        }

        Ok(Self {
            text: text.to_string(),
            expr,
        })
    }

    /// The text the query was parsed from
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Match one entry, giving up once `deadline` passes or `cancel` fires
    pub fn matches(&self, candidate: Candidate<'_>, deadline: Instant, cancel: &CancellationToken) -> MatchOutcome {
        let mut matcher = Matcher {
            path: candidate.path,
            path_lower: candidate.path.to_lowercase(),
            name_lower: candidate.name.to_lowercase(),
            deadline,
            cancel,
            steps: 0,
        };
        match matcher.eval(&self.expr) {
            Ok(true) => MatchOutcome::Matched,
            Ok(false) => MatchOutcome::NotMatched,
            Err(interrupt) => interrupt,
        }
    }
}

/// Steps between deadline checks inside a wildcard match
const CHECK_INTERVAL: u32 = 64;

struct Matcher<'a> {
    path: &'a str,
    path_lower: String,
    name_lower: String,
    deadline: Instant,
    cancel: &'a CancellationToken,
    steps: u32,
}

impl Matcher<'_> {
    fn check(&self) -> std::result::Result<(), MatchOutcome> {
        if self.cancel.is_cancelled() {
            Err(MatchOutcome::Cancelled)
        } else if Instant::now() >= self.deadline {
            Err(MatchOutcome::TimedOut)
        } else {
            Ok(())
        }
    }

    fn tick(&mut self) -> std::result::Result<(), MatchOutcome> {
        self.steps += 1;
        if self.steps % CHECK_INTERVAL == 0 {
            self.check()?;
        }
        Ok(())
    }

    fn eval(&mut self, expr: &Expr) -> std::result::Result<bool, MatchOutcome> {
        self.check()?;
        match expr {
            Expr::Contains(text) => Ok(self.path_lower.contains(text.as_str())),
            Expr::Exact(text) => Ok(self.path.contains(text.as_str())),
            Expr::Glob(pattern) => {
                let path = std::mem::take(&mut self.path_lower);
                let name = std::mem::take(&mut self.name_lower);
                let mut result = self.glob(pattern, path.as_bytes());
                if result == Ok(false) {
                    result = self.glob(pattern, name.as_bytes());
                }
                self.path_lower = path;
                self.name_lower = name;
                result
            }
            Expr::Not(inner) => Ok(!self.eval(inner)?),
            Expr::All(terms) => {
                for term in terms {
                    if !self.eval(term)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Expr::Any(terms) => {
                for term in terms {
                    if self.eval(term)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    /// `*` matches any run of bytes, `?` exactly one
    fn glob(&mut self, pattern: &[u8], text: &[u8]) -> std::result::Result<bool, MatchOutcome> {
        let (mut p, mut t) = (0, 0);
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            self.tick()?;
            match pattern.get(p) {
                Some(b'*') => {
                    backtrack = Some((p, t));
                    p += 1;
                }
                Some(&c) if c == b'?' || c == text[t] => {
                    p += 1;
                    t += 1;
                }
                _ => match backtrack {
                    Some((star, from)) => {
                        p = star + 1;
                        t = from + 1;
                        backtrack = Some((star, from + 1));
                    }
                    None => return Ok(false),
                },
            }
        }

        Ok(pattern[p..].iter().all(|&c| c == b'*'))
    }
}
