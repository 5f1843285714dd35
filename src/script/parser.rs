//=============================================
// script/parser.rs
//=============================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Recursive descent parser for the embedded Script language
// Objective: Transform token streams into statements and expressions
//            consumed by the evaluator
//=============================================

//=============================================
//            Section 1: Imports
//=============================================

use std::sync::Arc;

use super::ast::{
    AssignTarget, BinaryOp, Expr, ImportNames, Literal, Program, Statement, Stmt, UnaryOp,
};
use super::tokenizer::{Position, Token, TokenKind, Tokenizer};

//=============================================
//            Section 2: Parse Errors
//=============================================

#[derive(Debug, Clone)]
pub enum ParseError {
    UnexpectedToken {
        expected: String,
        found: TokenKind,
        position: Position,
    },
    UnexpectedEndOfInput {
        expected: String,
        position: Position,
    },
    InvalidSyntax {
        message: String,
        position: Position,
    },
    /// Nesting exceeded the parser's limit. Not a syntax error.
    TooDeep { position: Position },
}

impl ParseError {
    pub fn is_syntax(&self) -> bool {
        !matches!(self, ParseError::TooDeep { .. })
    }

    pub fn position(&self) -> Position {
        match self {
            ParseError::UnexpectedToken { position, .. }
            | ParseError::UnexpectedEndOfInput { position, .. }
            | ParseError::InvalidSyntax { position, .. }
            | ParseError::TooDeep { position } => *position,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::UnexpectedToken {
                expected,
                found,
                position,
            } => {
                write!(
                    f,
                    "Expected {} but found {} at line {}, column {}",
                    expected, found, position.line, position.column
                )
            }
            ParseError::UnexpectedEndOfInput { expected, position } => {
                write!(
                    f,
                    "Unexpected end of input, expected {} at line {}, column {}",
                    expected, position.line, position.column
                )
            }
            ParseError::InvalidSyntax { message, position } => {
                write!(
                    f,
                    "Invalid syntax: {} at line {}, column {}",
                    message, position.line, position.column
                )
            }
            ParseError::TooDeep { position } => {
                write!(
                    f,
                    "too many nested expressions at line {}, column {}",
                    position.line, position.column
                )
            }
        }
    }
}

impl std::error::Error for ParseError {}

//=============================================
//            Section 3: Entry Points
//=============================================

/// Parse a sequence of statements.
pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let tokens = Tokenizer::new(source).tokenize()?;
    Parser::new(tokens).program()
}

/// Parse exactly one expression.
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    let tokens = Tokenizer::new(source).tokenize()?;
    let mut parser = Parser::new(tokens);
    parser.skip_separators();
    let expr = parser.expression()?;
    parser.skip_separators();
    parser.expect_end()?;
    Ok(expr)
}

//=============================================
//            Section 4: Parser State
//=============================================

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    expr_depth: usize,
}

/// Nested sub-expressions (parentheses, calls, unary operators) accepted in
/// one expression. Each level costs a full descent of the precedence chain.
pub const MAX_EXPRESSION_DEPTH: usize = 50;

/// Height accepted for an operator or postfix chain. Chains are parsed in a
/// loop but evaluated and dropped recursively.
pub const MAX_TREE_HEIGHT: usize = 200;

impl Parser {
    //Function: new
    //Purpose: Initialize parser with token stream and reset cursor
    //Inputs: tokens: Vec<Token>
    //Returns: Self
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            expr_depth: 0,
        }
    }

    //=============================================
    //            Section 5: Statement Parsing
    //=============================================

    //Function: program
    //Purpose: Consume all tokens into a list of line-tagged statements
    //Inputs: &mut self
    //Returns: Result<Program, ParseError>
    pub fn program(&mut self) -> Result<Program, ParseError> {
        let mut statements = Vec::new();
        self.skip_separators();
        while !self.is_at_end() {
            let line = self.peek().position.line;
            let stmt = self.statement()?;
            statements.push(Statement { line, stmt });
            self.end_of_statement()?;
            self.skip_separators();
        }
        Ok(Program { statements })
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        match self.peek().kind {
            TokenKind::Import => {
                self.advance();
                let path = self.dotted_name()?;
                let alias = self.optional_alias()?;
                Ok(Stmt::Import { path, alias })
            }
            TokenKind::From => {
                self.advance();
                let path = self.dotted_name()?;
                self.consume(&TokenKind::Import, "'import'")?;
                let names = self.import_names()?;
                Ok(Stmt::FromImport { path, names })
            }
            TokenKind::Raise => {
                self.advance();
                if self.at_statement_end() {
                    Ok(Stmt::Raise(None))
                } else {
                    Ok(Stmt::Raise(Some(self.expression()?)))
                }
            }
            TokenKind::Pass => {
                self.advance();
                Ok(Stmt::Pass)
            }
            _ => {
                let position = self.peek().position;
                let expr = self.expression()?;
                if !self.matches(&TokenKind::Equal) {
                    return Ok(Stmt::Expr(expr));
                }
                let target = match expr {
                    Expr::Name(name) => AssignTarget::Name(name),
                    Expr::Attribute { object, name } => AssignTarget::Attribute {
                        object: *object,
                        name,
                    },
                    Expr::Index { object, index } => AssignTarget::Index {
                        object: *object,
                        index: *index,
                    },
                    _ => {
                        return Err(ParseError::InvalidSyntax {
                            message: "can't assign to this expression".to_string(),
                            position,
                        });
                    }
                };
                let value = self.expression()?;
                Ok(Stmt::Assign { target, value })
            }
        }
    }

    fn import_names(&mut self) -> Result<ImportNames, ParseError> {
        if self.matches(&TokenKind::Star) {
            return Ok(ImportNames::All);
        }
        let parenthesized = self.matches(&TokenKind::LeftParen);
        let mut names = Vec::new();
        loop {
            let name = self.identifier("imported name")?;
            let alias = self.optional_alias()?;
            names.push((name, alias));
            if !self.matches(&TokenKind::Comma) {
                break;
            }
            if parenthesized && self.check(&TokenKind::RightParen) {
                break;
            }
        }
        if parenthesized {
            self.consume(&TokenKind::RightParen, "')'")?;
        }
        Ok(ImportNames::Listed(names))
    }

    fn optional_alias(&mut self) -> Result<Option<String>, ParseError> {
        if self.matches(&TokenKind::As) {
            Ok(Some(self.identifier("alias")?))
        } else {
            Ok(None)
        }
    }

    fn dotted_name(&mut self) -> Result<String, ParseError> {
        let mut path = self.identifier("module name")?;
        while self.matches(&TokenKind::Dot) {
            path.push('.');
            path.push_str(&self.identifier("module name")?);
        }
        Ok(path)
    }

    //=============================================
    //            Section 6: Expression Parsing
    //=============================================

    //Function: expression
    //Purpose: Parse a full expression, guarding against runaway nesting
    //Inputs: &mut self
    //Returns: Result<Expr, ParseError>
    pub fn expression(&mut self) -> Result<Expr, ParseError> {
        self.expr_depth += 1;
        if self.expr_depth > MAX_EXPRESSION_DEPTH {
            return Err(ParseError::TooDeep {
                position: self.peek().position,
            });
        }
        let result = if self.check(&TokenKind::Lambda) {
            self.lambda()
        } else {
            self.or_expr()
        };
        self.expr_depth -= 1;
        result
    }

    fn lambda(&mut self) -> Result<Expr, ParseError> {
        self.advance();
        let mut params = Vec::new();
        if !self.check(&TokenKind::Colon) {
            loop {
                params.push(self.identifier("parameter name")?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::Colon, "':'")?;
        let body = self.expression()?;
        Ok(Expr::Lambda {
            params,
            body: Arc::new(body),
        })
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and_expr()?;
        let mut height = left.height();
        while self.matches(&TokenKind::Or) {
            let right = self.and_expr()?;
            height = self.grown(height, right.height())?;
            left = Expr::Logical {
                and: false,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.not_expr()?;
        let mut height = left.height();
        while self.matches(&TokenKind::And) {
            let right = self.not_expr()?;
            height = self.grown(height, right.height())?;
            left = Expr::Logical {
                and: true,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.matches(&TokenKind::Not) {
            let operand = self.nested(Self::not_expr)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.additive()?;
        let mut height = left.height();
        loop {
            let op = match self.peek().kind {
                TokenKind::EqualEqual => BinaryOp::Equal,
                TokenKind::NotEqual => BinaryOp::NotEqual,
                TokenKind::Less => BinaryOp::Less,
                TokenKind::Greater => BinaryOp::Greater,
                TokenKind::LessEqual => BinaryOp::LessEqual,
                TokenKind::GreaterEqual => BinaryOp::GreaterEqual,
                TokenKind::In => BinaryOp::In,
                TokenKind::Not if self.check_next(&TokenKind::In) => {
                    self.advance();
                    BinaryOp::NotIn
                }
                _ => break,
            };
            self.advance();
            let right = self.additive()?;
            height = self.grown(height, right.height())?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;
        let mut height = left.height();
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Subtract,
                _ => break,
            };
            self.advance();
            let right = self.term()?;
            height = self.grown(height, right.height())?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        let mut height = left.height();
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Multiply,
                TokenKind::Slash => BinaryOp::Divide,
                TokenKind::Percent => BinaryOp::Modulo,
                _ => break,
            };
            self.advance();
            let right = self.unary()?;
            height = self.grown(height, right.height())?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.matches(&TokenKind::Minus) {
            let operand = self.nested(Self::unary)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Negate,
                operand: Box::new(operand),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        let mut height = expr.height();
        loop {
            if self.matches(&TokenKind::Dot) {
                let name = self.identifier("attribute name")?;
                height = self.grown(height, 0)?;
                expr = Expr::Attribute {
                    object: Box::new(expr),
                    name,
                };
            } else if self.matches(&TokenKind::LeftParen) {
                let args = self.arguments(&TokenKind::RightParen)?;
                let widest = args.iter().map(Expr::height).max().unwrap_or(0);
                height = self.grown(height, widest)?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else if self.matches(&TokenKind::LeftBracket) {
                let index = self.expression()?;
                self.consume(&TokenKind::RightBracket, "']'")?;
                height = self.grown(height, index.height())?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        let literal = match token.kind {
            TokenKind::Integer(v) => Literal::Int(v),
            TokenKind::Long(v) => Literal::Long(v),
            TokenKind::Float(v) => Literal::Float(v),
            TokenKind::String(ref s) => {
                let mut text = s.clone();
                self.advance();
                // adjacent literals concatenate
                while let TokenKind::String(next) = &self.peek().kind {
                    text.push_str(next);
                    self.advance();
                }
                return Ok(Expr::Literal(Literal::Str(text)));
            }
            TokenKind::None => Literal::None,
            TokenKind::True => Literal::Bool(true),
            TokenKind::False => Literal::Bool(false),
            TokenKind::Identifier(ref name) => {
                let name = name.clone();
                self.advance();
                return Ok(Expr::Name(name));
            }
            TokenKind::LeftParen => {
                self.advance();
                return self.parenthesized();
            }
            _ => return Err(self.unexpected("expression")),
        };
        self.advance();
        Ok(Expr::Literal(literal))
    }

    fn parenthesized(&mut self) -> Result<Expr, ParseError> {
        if self.matches(&TokenKind::RightParen) {
            return Ok(Expr::Tuple(Vec::new()));
        }
        let first = self.expression()?;
        if self.matches(&TokenKind::RightParen) {
            return Ok(first);
        }
        self.consume(&TokenKind::Comma, "',' or ')'")?;
        let mut items = vec![first];
        items.extend(self.arguments(&TokenKind::RightParen)?);
        Ok(Expr::Tuple(items))
    }

    fn arguments(&mut self, close: &TokenKind) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        while !self.check(close) {
            args.push(self.expression()?);
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.consume(close, &format!("'{}'", close_symbol(close)))?;
        Ok(args)
    }

    fn nested(
        &mut self,
        parse: fn(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        self.expr_depth += 1;
        if self.expr_depth > MAX_EXPRESSION_DEPTH {
            return Err(ParseError::TooDeep {
                position: self.peek().position,
            });
        }
        let result = parse(self);
        self.expr_depth -= 1;
        result
    }

    /// Height of a node joining a `left` chain with a `right` operand.
    fn grown(&self, left: usize, right: usize) -> Result<usize, ParseError> {
        let height = left.max(right) + 1;
        if height > MAX_TREE_HEIGHT {
            return Err(ParseError::TooDeep {
                position: self.peek().position,
            });
        }
        Ok(height)
    }

    //=============================================
    //            Section 7: Token Navigation
    //=============================================

    fn skip_separators(&mut self) {
        while matches!(
            self.peek().kind,
            TokenKind::Newline | TokenKind::Semicolon
        ) {
            self.advance();
        }
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof
        )
    }

    fn end_of_statement(&mut self) -> Result<(), ParseError> {
        if self.at_statement_end() {
            Ok(())
        } else {
            Err(self.unexpected("end of statement"))
        }
    }

    fn expect_end(&mut self) -> Result<(), ParseError> {
        if self.is_at_end() {
            Ok(())
        } else {
            Err(self.unexpected("end of expression"))
        }
    }

    fn identifier(&mut self, what: &str) -> Result<String, ParseError> {
        if let TokenKind::Identifier(name) = &self.peek().kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.unexpected(what))
        }
    }

    fn consume(&mut self, kind: &TokenKind, expected: &str) -> Result<(), ParseError> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        if token.kind == TokenKind::Eof {
            ParseError::UnexpectedEndOfInput {
                expected: expected.to_string(),
                position: token.position,
            }
        } else {
            ParseError::UnexpectedToken {
                expected: expected.to_string(),
                found: token.kind.clone(),
                position: token.position,
            }
        }
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn check_next(&self, kind: &TokenKind) -> bool {
        self.tokens
            .get(self.current + 1)
            .is_some_and(|token| &token.kind == kind)
    }

    fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.current.min(last)]
    }

    fn advance(&mut self) {
        if self.current < self.tokens.len() {
            self.current += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn close_symbol(kind: &TokenKind) -> &'static str {
    match kind {
        TokenKind::RightParen => ")",
        TokenKind::RightBracket => "]",
        _ => "?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_import_with_alias() {
        let program = parse_program("import java.util.ArrayList as AL").expect("parse");
        assert_eq!(
            program.statements[0].stmt,
            Stmt::Import {
                path: "java.util.ArrayList".into(),
                alias: Some("AL".into())
            }
        );
    }

    #[test]
    fn parses_from_import_lists_and_star() {
        let program = parse_program("from java.util import (ArrayList, List,)\nfrom a import *")
            .expect("parse");
        assert!(matches!(
            &program.statements[0].stmt,
            Stmt::FromImport { names: ImportNames::Listed(names), .. } if names.len() == 2
        ));
        assert!(matches!(
            &program.statements[1].stmt,
            Stmt::FromImport {
                names: ImportNames::All,
                ..
            }
        ));
    }

    #[test]
    fn records_statement_lines() {
        let program = parse_program("x = 1\n\ny = x + 1; z = 3").expect("parse");
        let lines: Vec<usize> = program.statements.iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![1, 3, 3]);
    }

    #[test]
    fn incomplete_call_is_a_syntax_error() {
        let err = parse_program("f(1,").expect_err("incomplete");
        assert!(err.is_syntax());
    }

    #[test]
    fn deep_nesting_is_not_a_syntax_error() {
        let depth = MAX_EXPRESSION_DEPTH;
        let source = format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
        let err = parse_expression(&source).expect_err("too deep");
        assert!(!err.is_syntax());

        let accepted = depth - 1;
        let source = format!("{}1{}", "(".repeat(accepted), ")".repeat(accepted));
        assert_eq!(parse_expression(&source).expect("within limit"), Expr::Literal(Literal::Int(1)));
    }

    #[test]
    fn long_operator_chains_are_bounded() {
        let within = format!("1{}", " + 1".repeat(MAX_TREE_HEIGHT - 1));
        assert_eq!(parse_expression(&within).expect("within limit").height(), MAX_TREE_HEIGHT);
        let beyond = format!("1{}", " + 1".repeat(MAX_TREE_HEIGHT));
        assert!(!parse_expression(&beyond).expect_err("too tall").is_syntax());
        let attributes = format!("a{}", ".b".repeat(MAX_TREE_HEIGHT));
        assert!(!parse_expression(&attributes).expect_err("too tall").is_syntax());
    }

    #[test]
    fn membership_operators_parse_as_comparisons() {
        let expr = parse_expression("a not in b").expect("parse");
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::NotIn, .. }));
        let expr = parse_expression("not a in b").expect("parse");
        assert!(matches!(expr, Expr::Unary { op: UnaryOp::Not, .. }));
    }

    #[test]
    fn lambda_binds_loosest() {
        let expr = parse_expression("lambda a, b: a + b").expect("parse");
        assert!(matches!(expr, Expr::Lambda { ref params, .. } if params.len() == 2));
    }

    #[test]
    fn assignment_to_call_is_rejected() {
        assert!(parse_program("f() = 1").is_err());
    }
}
