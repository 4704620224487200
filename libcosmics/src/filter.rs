use std::str::FromStr;

use super::error::FilterError;
use super::table::{Column, EventTable};

/// Comparison operators allowed in a trigger expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Greater,
    Less,
    GreaterEq,
    LessEq,
    Eq,
    NotEq,
}

impl CmpOp {
    fn apply(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            CmpOp::Greater => lhs > rhs,
            CmpOp::Less => lhs < rhs,
            CmpOp::GreaterEq => lhs >= rhs,
            CmpOp::LessEq => lhs <= rhs,
            CmpOp::Eq => lhs == rhs,
            CmpOp::NotEq => lhs != rhs,
        }
    }

    /// The operator seen from the other side of the comparison,
    /// so `7 < nhit_slab` can be stored as `nhit_slab > 7`.
    fn flipped(&self) -> CmpOp {
        match self {
            CmpOp::Greater => CmpOp::Less,
            CmpOp::Less => CmpOp::Greater,
            CmpOp::GreaterEq => CmpOp::LessEq,
            CmpOp::LessEq => CmpOp::GreaterEq,
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::NotEq => CmpOp::NotEq,
        }
    }
}

/// A trigger expression parsed once into a fixed set of nodes: comparisons of
/// a scalar column against a literal, combined with `&` and `|`.
///
/// The original analysis code re-interpreted the expression string against
/// every batch; parsing up front makes unknown columns and malformed
/// expressions hard failures before any data is read.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Cmp {
        column: String,
        op: CmpOp,
        value: f64,
    },
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
}

/// Remove all whitespace from a trigger expression. Two triggers that differ
/// only in whitespace select the same events and share the same cache entry.
pub fn normalize_trigger(trigger: &str) -> String {
    trigger.split_whitespace().collect()
}

/// Substitute the filename-hostile comparison characters in a normalized
/// trigger, yielding the cache file stem.
pub fn trigger_to_filename(trigger_cleaned: &str) -> String {
    trigger_cleaned
        .replace('>', "_greater_than_")
        .replace('<', "_smaller_than_")
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Op(CmpOp),
    And,
    Or,
    LParen,
    RParen,
}

fn tokenize(expression: &str) -> Result<Vec<Token>, FilterError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expression.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' => {
                tokens.push(Token::And);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Or);
                i += 1;
            }
            '>' | '<' | '=' | '!' => {
                let two = chars.get(i + 1) == Some(&'=');
                let op = match (c, two) {
                    ('>', true) => CmpOp::GreaterEq,
                    ('>', false) => CmpOp::Greater,
                    ('<', true) => CmpOp::LessEq,
                    ('<', false) => CmpOp::Less,
                    ('=', true) => CmpOp::Eq,
                    ('!', true) => CmpOp::NotEq,
                    _ => return Err(FilterError::BadCharacter(c, i)),
                };
                tokens.push(Token::Op(op));
                i += if two { 2 } else { 1 };
            }
            // No binary arithmetic in this grammar: a sign can only open
            // a numeric literal.
            c if c.is_ascii_digit()
                || c == '.'
                || ((c == '+' || c == '-')
                    && matches!(chars.get(i + 1), Some(d) if d.is_ascii_digit() || *d == '.')) =>
            {
                let start = i;
                if c == '+' || c == '-' {
                    i += 1;
                }
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || chars[i] == '.'
                        || chars[i] == 'e'
                        || chars[i] == 'E'
                        || ((chars[i] == '+' || chars[i] == '-')
                            && matches!(chars[i - 1], 'e' | 'E')))
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| FilterError::BadToken(text))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => return Err(FilterError::BadCharacter(c, i)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Result<Token, FilterError> {
        let token = self
            .tokens
            .get(self.position)
            .cloned()
            .ok_or(FilterError::UnexpectedEnd)?;
        self.position += 1;
        Ok(token)
    }

    // or := and ('|' and)*
    fn parse_or(&mut self) -> Result<Filter, FilterError> {
        let mut node = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.position += 1;
            let rhs = self.parse_and()?;
            node = Filter::Or(Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    // and := atom ('&' atom)*
    fn parse_and(&mut self) -> Result<Filter, FilterError> {
        let mut node = self.parse_atom()?;
        while self.peek() == Some(&Token::And) {
            self.position += 1;
            let rhs = self.parse_atom()?;
            node = Filter::And(Box::new(node), Box::new(rhs));
        }
        Ok(node)
    }

    // atom := '(' or ')' | ident op number | number op ident
    fn parse_atom(&mut self) -> Result<Filter, FilterError> {
        match self.next()? {
            Token::LParen => {
                let node = self.parse_or()?;
                match self.next()? {
                    Token::RParen => Ok(node),
                    token => Err(FilterError::BadToken(format!("{token:?}"))),
                }
            }
            Token::Ident(column) => {
                let op = self.expect_op()?;
                match self.next()? {
                    Token::Number(value) => Ok(Filter::Cmp { column, op, value }),
                    token => Err(FilterError::BadToken(format!("{token:?}"))),
                }
            }
            Token::Number(value) => {
                let op = self.expect_op()?;
                match self.next()? {
                    Token::Ident(column) => Ok(Filter::Cmp {
                        column,
                        op: op.flipped(),
                        value,
                    }),
                    token => Err(FilterError::BadToken(format!("{token:?}"))),
                }
            }
            token => Err(FilterError::BadToken(format!("{token:?}"))),
        }
    }

    fn expect_op(&mut self) -> Result<CmpOp, FilterError> {
        match self.next()? {
            Token::Op(op) => Ok(op),
            token => Err(FilterError::BadToken(format!("{token:?}"))),
        }
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let tokens = tokenize(expression)?;
        if tokens.is_empty() {
            return Err(FilterError::EmptyExpression);
        }
        let mut parser = Parser {
            tokens,
            position: 0,
        };
        let filter = parser.parse_or()?;
        if parser.position != parser.tokens.len() {
            let rest: Vec<String> = parser.tokens[parser.position..]
                .iter()
                .map(|t| format!("{t:?}"))
                .collect();
            return Err(FilterError::TrailingInput(rest.join(" ")));
        }
        Ok(filter)
    }
}

impl Filter {
    /// Evaluate the predicate against every row of a batch.
    pub fn evaluate(&self, batch: &EventTable) -> Result<Vec<bool>, FilterError> {
        match self {
            Filter::Cmp { column, op, value } => {
                let values = match batch.column(column) {
                    Some(Column::Scalar(values)) => values,
                    Some(Column::Jagged { .. }) => {
                        return Err(FilterError::NotScalar(column.clone()))
                    }
                    None => return Err(FilterError::UnknownColumn(column.clone())),
                };
                Ok(values.iter().map(|v| op.apply(*v, *value)).collect())
            }
            Filter::And(lhs, rhs) => {
                let left = lhs.evaluate(batch)?;
                let right = rhs.evaluate(batch)?;
                Ok(left.iter().zip(right).map(|(l, r)| *l && r).collect())
            }
            Filter::Or(lhs, rhs) => {
                let left = lhs.evaluate(batch)?;
                let right = rhs.evaluate(batch)?;
                Ok(left.iter().zip(right).map(|(l, r)| *l || r).collect())
            }
        }
    }
}
