// $filter / $orderby text parser.
//
// Precedence, lowest first: or, and, comparison and has, add/sub,
// mul/div/mod, not and unary minus, primary.

use super::expression::{
    BinaryOperator, Expression, Lambda, MemberPath, MemberSegment, MethodKind, OrderByItem,
    SortDirection, UnaryOperator,
};
use std::sync::LazyLock;
use tracing::debug;

/// Deepest expression tree the parser accepts.
pub const MAX_NESTING_DEPTH: usize = 256;

static GUID_PREFIX_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .expect("guid prefix pattern")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Expression is empty")]
    Empty,

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Unexpected token '{token}' at position {position}")]
    UnexpectedToken { token: String, position: usize },

    #[error("Unterminated string literal starting at position {0}")]
    UnterminatedString(usize),

    #[error("Unknown function '{0}'")]
    UnknownMethod(String),

    #[error("Function '{method}' expects {expected} arguments, found {found}")]
    InvalidArity {
        method: MethodKind,
        expected: String,
        found: usize,
    },

    #[error("Invalid lambda expression: {0}")]
    InvalidLambda(String),

    #[error("Expression nesting exceeds {0} levels")]
    TooDeep(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    LParen,
    RParen,
    Comma,
    Slash,
    Colon,
    Equals,
    Minus,
    Word(String),
    Literal(String),
    EnumLiteral { type_name: String, body: String },
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    position: usize,
}

impl Token {
    fn text(&self) -> String {
        match &self.kind {
            TokenKind::LParen => "(".into(),
            TokenKind::RParen => ")".into(),
            TokenKind::Comma => ",".into(),
            TokenKind::Slash => "/".into(),
            TokenKind::Colon => ":".into(),
            TokenKind::Equals => "=".into(),
            TokenKind::Minus => "-".into(),
            TokenKind::Word(w) | TokenKind::Literal(w) => w.clone(),
            TokenKind::EnumLiteral { type_name, body } => format!("{}'{}'", type_name, body),
        }
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$' || c == '@'
}

fn is_value_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '+' | '-')
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < input.len() {
        let rest = &input[pos..];
        let Some(c) = rest.chars().next() else { break };

        if c.is_whitespace() {
            pos += c.len_utf8();
            continue;
        }

        let single = match c {
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            ',' => Some(TokenKind::Comma),
            '/' => Some(TokenKind::Slash),
            ':' => Some(TokenKind::Colon),
            '=' => Some(TokenKind::Equals),
            _ => None,
        };
        if let Some(kind) = single {
            tokens.push(Token { kind, position: pos });
            pos += 1;
            continue;
        }

        if c == '\'' {
            let end = quoted_end(input, pos)?;
            tokens.push(Token {
                kind: TokenKind::Literal(input[pos..end].to_string()),
                position: pos,
            });
            pos = end;
            continue;
        }

        if let Some(m) = GUID_PREFIX_RE.find(rest) {
            let after = rest[m.end()..].chars().next();
            if after.is_none_or(|c| !is_value_char(c)) {
                tokens.push(Token {
                    kind: TokenKind::Literal(m.as_str().to_string()),
                    position: pos,
                });
                pos += m.end();
                continue;
            }
        }

        let starts_value = c.is_ascii_digit()
            || (c == '-' && rest[1..].starts_with(|n: char| n.is_ascii_digit()))
            || (rest.starts_with("-INF") && !rest[4..].starts_with(is_identifier_char));
        if starts_value {
            let len = rest[1..]
                .find(|ch: char| !is_value_char(ch))
                .map_or(rest.len(), |i| i + 1);
            tokens.push(Token {
                kind: TokenKind::Literal(rest[..len].to_string()),
                position: pos,
            });
            pos += len;
            continue;
        }

        if c == '-' {
            tokens.push(Token {
                kind: TokenKind::Minus,
                position: pos,
            });
            pos += 1;
            continue;
        }

        if is_identifier_char(c) {
            let len = rest.find(|ch: char| !is_identifier_char(ch)).unwrap_or(rest.len());
            let word = &rest[..len];
            let start = pos;
            pos += len;

            if input[pos..].starts_with('\'') {
                let end = quoted_end(input, pos)?;
                let quoted = &input[pos..end];
                let kind = if word.eq_ignore_ascii_case("duration") || word.eq_ignore_ascii_case("binary") {
                    TokenKind::Literal(format!("{}{}", word, quoted))
                } else {
                    TokenKind::EnumLiteral {
                        type_name: word.to_string(),
                        body: quoted[1..quoted.len() - 1].replace("''", "'"),
                    }
                };
                tokens.push(Token { kind, position: start });
                pos = end;
            } else {
                tokens.push(Token {
                    kind: TokenKind::Word(word.to_string()),
                    position: start,
                });
            }
            continue;
        }

        return Err(ParseError::UnexpectedToken {
            token: c.to_string(),
            position: pos,
        });
    }

    Ok(tokens)
}

/// Byte offset just past the closing quote of a literal starting at `start`.
fn quoted_end(input: &str, start: usize) -> Result<usize, ParseError> {
    let bytes = input.as_bytes();
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            return Ok(i + 1);
        }
        i += 1;
    }
    Err(ParseError::UnterminatedString(start))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    lambda_variables: Vec<String>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            lambda_variables: Vec::new(),
        }
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn next(&mut self) -> Result<Token, ParseError> {
        let token = self.tokens.get(self.pos).cloned().ok_or(ParseError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn unexpected(&self) -> ParseError {
        match self.tokens.get(self.pos) {
            Some(token) => ParseError::UnexpectedToken {
                token: token.text(),
                position: token.position,
            },
            None => ParseError::UnexpectedEnd,
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ParseError> {
        if self.peek() == Some(&kind) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek_keyword(&self) -> Option<&str> {
        match self.peek() {
            Some(TokenKind::Word(w)) => Some(w.as_str()),
            _ => None,
        }
    }

    /// Run `parse` one recursion level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, ParseError>) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(ParseError::TooDeep(MAX_NESTING_DEPTH));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Join a left-associative chain link, bounding the height of the tree.
    fn link(op: BinaryOperator, left: Expression, right: Expression) -> Result<Expression, ParseError> {
        let expr = Expression::binary(op, left, right);
        if expr.depth() > MAX_NESTING_DEPTH {
            return Err(ParseError::TooDeep(MAX_NESTING_DEPTH));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expression, ParseError> {
        self.nested(Self::parse_disjunction)
    }

    fn parse_disjunction(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_and()?;
        while self.peek_keyword() == Some("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Self::link(BinaryOperator::Or, left, right)?;
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_comparison()?;
        while self.peek_keyword() == Some("and") {
            self.pos += 1;
            let right = self.parse_comparison()?;
            left = Self::link(BinaryOperator::And, left, right)?;
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_additive()?;
        while let Some(op) = self
            .peek_keyword()
            .and_then(BinaryOperator::from_keyword)
            .filter(|op| op.is_comparison() || *op == BinaryOperator::Has)
        {
            self.pos += 1;
            let right = self.parse_additive()?;
            left = Self::link(op, left, right)?;
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_multiplicative()?;
        while let Some(op) = self
            .peek_keyword()
            .and_then(BinaryOperator::from_keyword)
            .filter(|op| matches!(op, BinaryOperator::Add | BinaryOperator::Sub))
        {
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = Self::link(op, left, right)?;
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self
            .peek_keyword()
            .and_then(BinaryOperator::from_keyword)
            .filter(|op| matches!(op, BinaryOperator::Mul | BinaryOperator::Div | BinaryOperator::Mod))
        {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Self::link(op, left, right)?;
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression, ParseError> {
        if self.peek_keyword() == Some("not") {
            self.pos += 1;
            let operand = self.nested(Self::parse_unary)?;
            return Ok(Expression::unary(UnaryOperator::Not, operand));
        }
        if self.peek() == Some(&TokenKind::Minus) {
            self.pos += 1;
            let operand = self.nested(Self::parse_unary)?;
            return Ok(Expression::unary(UnaryOperator::Minus, operand));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expression, ParseError> {
        let token = self.next()?;
        match token.kind {
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Literal(text) => Ok(Expression::Literal(text)),
            TokenKind::EnumLiteral { type_name, body } => Ok(Expression::Enum {
                type_name,
                members: body.split(',').map(|m| m.trim().to_string()).collect(),
            }),
            TokenKind::Word(word) => self.parse_word(word, token.position),
            _ => {
                self.pos -= 1;
                Err(self.unexpected())
            }
        }
    }

    fn parse_word(&mut self, word: String, position: usize) -> Result<Expression, ParseError> {
        match word.as_str() {
            "true" | "false" | "null" | "INF" | "NaN" => return Ok(Expression::Literal(word)),
            _ => {}
        }
        if let Some(alias) = word.strip_prefix('@') {
            return Ok(Expression::Alias(alias.to_string()));
        }
        if word == "$it" || word == "$root" {
            if word == "$it" && self.peek() == Some(&TokenKind::Slash) {
                self.pos += 1;
                let first = self.expect_word()?;
                return self.parse_member_path(first, Vec::new());
            }
            return Ok(Expression::LambdaReference(word));
        }

        let followed_by_paren = self.peek() == Some(&TokenKind::LParen);
        if word.contains('.') {
            if followed_by_paren {
                let segment = self.parse_function(word)?;
                return self.continue_member_path(vec![segment]);
            }
            return Ok(Expression::TypeLiteral(word));
        }
        if followed_by_paren && !self.lambda_variables.contains(&word) {
            let method = MethodKind::from_name(&word).ok_or_else(|| ParseError::UnknownMethod(word.clone()))?;
            return self.parse_method(method);
        }
        if word.starts_with('$') {
            return Err(ParseError::UnexpectedToken { token: word, position });
        }
        self.parse_member_path(word, Vec::new())
    }

    fn expect_word(&mut self) -> Result<String, ParseError> {
        match self.peek().cloned() {
            Some(TokenKind::Word(word)) => {
                self.pos += 1;
                Ok(word)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn parse_method(&mut self, method: MethodKind) -> Result<Expression, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        if self.peek() != Some(&TokenKind::RParen) {
            loop {
                args.push(self.parse_or()?);
                if self.peek() == Some(&TokenKind::Comma) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;

        let (min, max) = method.arity();
        if args.len() < min || args.len() > max {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{} to {}", min, max)
            };
            return Err(ParseError::InvalidArity {
                method,
                expected,
                found: args.len(),
            });
        }
        Ok(Expression::MethodCall { method, args })
    }

    fn parse_function(&mut self, name: String) -> Result<MemberSegment, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut parameters = Vec::new();
        if self.peek() != Some(&TokenKind::RParen) {
            loop {
                let parameter = self.expect_word()?;
                self.expect(TokenKind::Equals)?;
                parameters.push((parameter, self.parse_or()?));
                if self.peek() == Some(&TokenKind::Comma) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(MemberSegment::Function { name, parameters })
    }

    fn parse_member_path(&mut self, first: String, mut segments: Vec<MemberSegment>) -> Result<Expression, ParseError> {
        if self.lambda_variables.contains(&first) {
            segments.push(MemberSegment::LambdaVariable(first));
        } else if first.contains('.') && self.peek() == Some(&TokenKind::LParen) {
            segments.push(self.parse_function(first)?);
        } else {
            segments.push(MemberSegment::Property(first));
        }
        self.continue_member_path(segments)
    }

    fn continue_member_path(&mut self, mut segments: Vec<MemberSegment>) -> Result<Expression, ParseError> {
        while self.peek() == Some(&TokenKind::Slash) {
            self.pos += 1;
            let word = self.expect_word()?;
            let followed_by_paren = self.peek() == Some(&TokenKind::LParen);
            let segment = match word.as_str() {
                "any" | "all" if followed_by_paren => {
                    let lambda = self.parse_lambda(&word)?;
                    if word == "any" {
                        MemberSegment::Any(lambda)
                    } else {
                        MemberSegment::All(lambda)
                    }
                }
                _ if word.contains('.') && followed_by_paren => self.parse_function(word)?,
                _ if word.starts_with('$') => {
                    self.pos -= 1;
                    return Err(self.unexpected());
                }
                _ => MemberSegment::Property(word),
            };
            segments.push(segment);
        }
        Ok(Expression::Member(MemberPath::new(segments)))
    }

    fn parse_lambda(&mut self, quantifier: &str) -> Result<Lambda, ParseError> {
        self.expect(TokenKind::LParen)?;
        if self.peek() == Some(&TokenKind::RParen) {
            self.pos += 1;
            if quantifier == "all" {
                return Err(ParseError::InvalidLambda("all() requires a predicate".into()));
            }
            return Ok(Lambda {
                variable: String::new(),
                predicate: None,
            });
        }

        let variable = self.expect_word()?;
        if variable.contains('.') || variable.starts_with('$') {
            return Err(ParseError::InvalidLambda(format!("'{}' is not a valid variable name", variable)));
        }
        self.expect(TokenKind::Colon)?;

        self.lambda_variables.push(variable.clone());
        let predicate = self.parse_or();
        self.lambda_variables.pop();
        let predicate = predicate?;

        self.expect(TokenKind::RParen)?;
        Ok(Lambda {
            variable,
            predicate: Some(Box::new(predicate)),
        })
    }
}

/// Parse a `$filter` expression.
pub fn parse_filter(text: &str) -> Result<Expression, ParseError> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(ParseError::Empty);
    }
    let mut parser = Parser::new(tokens);
    let expression = parser.parse_or()?;
    if !parser.at_end() {
        return Err(parser.unexpected());
    }
    if expression.depth() > MAX_NESTING_DEPTH {
        return Err(ParseError::TooDeep(MAX_NESTING_DEPTH));
    }
    debug!(filter = text, "parsed filter expression");
    Ok(expression)
}

/// Parse a comma-separated `$orderby` list.
pub fn parse_orderby(text: &str) -> Result<Vec<OrderByItem>, ParseError> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(ParseError::Empty);
    }
    let mut parser = Parser::new(tokens);
    let mut items = Vec::new();
    loop {
        let expression = parser.parse_or()?;
        if expression.depth() > MAX_NESTING_DEPTH {
            return Err(ParseError::TooDeep(MAX_NESTING_DEPTH));
        }
        let explicit = match parser.peek_keyword() {
            Some("asc") => Some(SortDirection::Ascending),
            Some("desc") => Some(SortDirection::Descending),
            _ => None,
        };
        if explicit.is_some() {
            parser.pos += 1;
        }
        items.push(OrderByItem {
            expression,
            direction: explicit.unwrap_or_default(),
        });

        if parser.at_end() {
            break;
        }
        parser.expect(TokenKind::Comma)?;
    }
    debug!(orderby = text, keys = items.len(), "parsed orderby");
    Ok(items)
}
