//! Recursive-descent, precedence-climbing parser (spec.md §4.2).
//!
//! Parse errors do not abort the parse: each bad construct is recorded as an
//! [`AstNode::Error`] node and the parser resynchronizes at the next
//! statement boundary, so a single run surfaces every syntax error in the
//! file instead of just the first one.

use crate::ast::{AssignTarget, AstNode, BinaryOp, Parameter, Pattern, Span, SporeCase, UnaryOp};
use crate::token::{Keyword, Operator, Punctuation, Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<String>,
}

type PResult<T> = Result<T, ()>;

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0, errors: Vec::new() }
    }

    /// Parses a whole program, returning every top-level statement. Parse
    /// errors are embedded as `AstNode::Error` nodes rather than failing the
    /// whole parse.
    pub fn parse_program(&mut self) -> Vec<AstNode> {
        let mut statements = Vec::new();
        while !self.is_at_end() {
            match self.statement() {
                Ok(stmt) => statements.push(stmt),
                Err(()) => {
                    let span = self.current_span();
                    let msg = self.errors.pop().unwrap_or_else(|| "syntax error".to_owned());
                    statements.push(AstNode::Error { message: msg, span });
                    self.synchronize();
                }
            }
        }
        statements
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    // ---- token stream helpers ----

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn current_span(&self) -> Span {
        Span::new(self.peek().line, self.peek().column)
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if !self.is_at_end() {
            self.pos += 1;
        }
        tok
    }

    fn check_keyword(&self, kw: Keyword) -> bool {
        matches!(&self.peek().kind, TokenKind::Keyword(k) if *k == kw)
    }

    fn check_op(&self, op: Operator) -> bool {
        matches!(&self.peek().kind, TokenKind::Operator(o) if *o == op)
    }

    fn check_punct(&self, p: Punctuation) -> bool {
        matches!(&self.peek().kind, TokenKind::Punctuation(pc) if *pc == p)
    }

    fn match_keyword(&mut self, kw: Keyword) -> bool {
        if self.check_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_op(&mut self, op: Operator) -> bool {
        if self.check_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_punct(&mut self, p: Punctuation) -> bool {
        if self.check_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: Punctuation) -> PResult<()> {
        if self.match_punct(p) {
            Ok(())
        } else {
            self.error(format!("expected {p:?}, found {:?}", self.peek().kind))
        }
    }

    fn expect_identifier(&mut self) -> PResult<String> {
        match self.advance().kind {
            TokenKind::Identifier(name) => Ok(name),
            other => self.error(format!("expected identifier, found {other:?}")),
        }
    }

    fn error<T>(&mut self, message: String) -> PResult<T> {
        self.errors.push(message);
        Err(())
    }

    /// Skips tokens until the next statement boundary (`;` or a statement
    /// keyword), so one syntax error doesn't cascade into spurious ones.
    fn synchronize(&mut self) {
        while !self.is_at_end() {
            if self.match_punct(Punctuation::Semicolon) {
                return;
            }
            if matches!(
                &self.peek().kind,
                TokenKind::Keyword(
                    Keyword::Let
                        | Keyword::Function
                        | Keyword::If
                        | Keyword::While
                        | Keyword::For
                        | Keyword::Return
                        | Keyword::Class
                        | Keyword::Import
                )
            ) {
                return;
            }
            self.advance();
        }
    }

    // ---- statements ----

    fn statement(&mut self) -> PResult<AstNode> {
        let span = self.current_span();
        if self.match_keyword(Keyword::Let) {
            return self.variable_declaration(span, false);
        }
        if self.match_keyword(Keyword::Const) {
            let name = self.expect_identifier()?;
            self.expect_eq()?;
            let value = self.expression()?;
            self.match_punct(Punctuation::Semicolon);
            return Ok(AstNode::ConstDeclaration { name, value: Box::new(value), span });
        }
        if self.check_keyword(Keyword::Function) {
            return self.function_declaration(span);
        }
        if self.match_keyword(Keyword::If) {
            return self.if_statement(span);
        }
        if self.match_keyword(Keyword::While) {
            return self.while_statement(span);
        }
        if self.match_keyword(Keyword::For) {
            return self.for_statement(span);
        }
        if self.match_keyword(Keyword::Return) {
            let value = if self.check_punct(Punctuation::Semicolon) || self.check_punct(Punctuation::RBrace) {
                None
            } else {
                Some(Box::new(self.expression()?))
            };
            self.match_punct(Punctuation::Semicolon);
            return Ok(AstNode::Return(value, span));
        }
        if self.match_keyword(Keyword::Break) {
            self.match_punct(Punctuation::Semicolon);
            return Ok(AstNode::Break(span));
        }
        if self.match_keyword(Keyword::Continue) {
            self.match_punct(Punctuation::Semicolon);
            return Ok(AstNode::Continue(span));
        }
        if self.match_keyword(Keyword::Throw) {
            let value = self.expression()?;
            self.match_punct(Punctuation::Semicolon);
            return Ok(AstNode::Throw(Box::new(value), span));
        }
        if self.match_keyword(Keyword::Try) {
            return self.try_statement(span);
        }
        if self.match_keyword(Keyword::Import) {
            return self.import_statement(span);
        }
        if self.match_keyword(Keyword::Use) {
            return self.use_statement(span);
        }
        if self.match_keyword(Keyword::Module) {
            return self.module_statement(span);
        }
        if self.match_keyword(Keyword::Package) {
            let name = self.expect_identifier()?;
            self.match_punct(Punctuation::Semicolon);
            return Ok(AstNode::PackageDef { name, span });
        }
        if self.match_keyword(Keyword::Class) {
            return self.class_statement(span);
        }
        if self.check_punct(Punctuation::LBrace) {
            return self.block();
        }
        let expr = self.expression()?;
        self.match_punct(Punctuation::Semicolon);
        Ok(expr)
    }

    fn expect_eq(&mut self) -> PResult<()> {
        if self.match_op(Operator::Assign) {
            Ok(())
        } else {
            self.error("expected '='".to_owned())
        }
    }

    fn variable_declaration(&mut self, span: Span, _force_mut: bool) -> PResult<AstNode> {
        // `let` bindings are mutable; immutability is `const`'s job (see the
        // `Keyword::Const` arm in `statement`). An optional leading `mut` is
        // accepted and ignored, for readability at the call site.
        self.match_keyword(Keyword::Mut);
        let mutable = true;
        let export = false;
        let private = false;
        let name = self.expect_identifier()?;
        let type_annotation = if self.match_punct(Punctuation::Colon) { Some(self.expect_identifier()?) } else { None };
        let initializer = if self.match_op(Operator::Assign) { Some(Box::new(self.expression()?)) } else { None };
        self.match_punct(Punctuation::Semicolon);
        Ok(AstNode::VariableDeclaration { name, type_annotation, initializer, mutable, export, private, span })
    }

    fn function_declaration(&mut self, span: Span) -> PResult<AstNode> {
        self.match_keyword(Keyword::Function);
        let name = Some(self.expect_identifier()?);
        let parameters = self.parameter_list()?;
        let return_type = if self.match_punct(Punctuation::Arrow) { Some(self.expect_identifier()?) } else { None };
        let body = Box::new(self.block()?);
        Ok(AstNode::Function { name, generic_params: Vec::new(), parameters, return_type, body, export: false, private: false, span })
    }

    fn parameter_list(&mut self) -> PResult<Vec<Parameter>> {
        self.expect_punct(Punctuation::LParen)?;
        let mut params = Vec::new();
        if !self.check_punct(Punctuation::RParen) {
            loop {
                let name = self.expect_identifier()?;
                let type_annotation = if self.match_punct(Punctuation::Colon) { Some(self.expect_identifier()?) } else { None };
                let default = if self.match_op(Operator::Assign) { Some(Box::new(self.expression()?)) } else { None };
                params.push(Parameter { name, type_annotation, default });
                if !self.match_punct(Punctuation::Comma) {
                    break;
                }
            }
        }
        self.expect_punct(Punctuation::RParen)?;
        Ok(params)
    }

    fn if_statement(&mut self, span: Span) -> PResult<AstNode> {
        let condition = Box::new(self.expression()?);
        let then_branch = Box::new(self.block()?);
        let mut elseif_branches = Vec::new();
        let mut else_branch = None;
        loop {
            if self.match_keyword(Keyword::ElseIf) {
                let cond = self.expression()?;
                let body = self.block()?;
                elseif_branches.push((cond, body));
            } else if self.match_keyword(Keyword::Else) {
                else_branch = Some(Box::new(self.block()?));
                break;
            } else {
                break;
            }
        }
        Ok(AstNode::If { condition, then_branch, elseif_branches, else_branch, span })
    }

    fn while_statement(&mut self, span: Span) -> PResult<AstNode> {
        let condition = Box::new(self.expression()?);
        let body = Box::new(self.block()?);
        Ok(AstNode::While { condition, body, span })
    }

    fn for_statement(&mut self, span: Span) -> PResult<AstNode> {
        let iterator_name = self.expect_identifier()?;
        if !self.match_keyword(Keyword::In) {
            return self.error("expected 'in' in for loop".to_owned());
        }
        let collection = Box::new(self.expression()?);
        let body = Box::new(self.block()?);
        Ok(AstNode::For { iterator_name, collection, body, span })
    }

    fn try_statement(&mut self, span: Span) -> PResult<AstNode> {
        let try_block = Box::new(self.block()?);
        let mut catch_variable = None;
        let mut catch_block = None;
        if self.match_keyword(Keyword::Catch) {
            if self.match_punct(Punctuation::LParen) {
                catch_variable = Some(self.expect_identifier()?);
                self.expect_punct(Punctuation::RParen)?;
            }
            catch_block = Some(Box::new(self.block()?));
        }
        let finally_block = if self.match_keyword(Keyword::Finally) { Some(Box::new(self.block()?)) } else { None };
        Ok(AstNode::TryCatchFinally { try_block, catch_variable, catch_block, finally_block, span })
    }

    fn import_statement(&mut self, span: Span) -> PResult<AstNode> {
        let module = self.expect_identifier()?;
        let alias = if self.match_keyword(Keyword::As) { Some(self.expect_identifier()?) } else { None };
        self.match_punct(Punctuation::Semicolon);
        Ok(AstNode::Import { module, alias, span })
    }

    fn use_statement(&mut self, span: Span) -> PResult<AstNode> {
        let library = self.expect_identifier()?;
        let mut specific_items = Vec::new();
        let mut specific_aliases = Vec::new();
        let mut alias = None;
        if self.match_punct(Punctuation::Colon) {
            loop {
                specific_items.push(self.expect_identifier()?);
                specific_aliases.push(if self.match_keyword(Keyword::As) { Some(self.expect_identifier()?) } else { None });
                if !self.match_punct(Punctuation::Comma) {
                    break;
                }
            }
        } else if self.match_keyword(Keyword::As) {
            alias = Some(self.expect_identifier()?);
        }
        self.match_punct(Punctuation::Semicolon);
        Ok(AstNode::Use { library, alias, specific_items, specific_aliases, span })
    }

    fn module_statement(&mut self, span: Span) -> PResult<AstNode> {
        let name = self.expect_identifier()?;
        self.expect_punct(Punctuation::LBrace)?;
        let mut body = Vec::new();
        while !self.check_punct(Punctuation::RBrace) && !self.is_at_end() {
            body.push(self.statement()?);
        }
        self.expect_punct(Punctuation::RBrace)?;
        Ok(AstNode::ModuleDef { name, body, span })
    }

    fn class_statement(&mut self, span: Span) -> PResult<AstNode> {
        let name = self.expect_identifier()?;
        let parent = if self.match_keyword(Keyword::Extends) { Some(self.expect_identifier()?) } else { None };
        self.expect_punct(Punctuation::LBrace)?;
        let mut body = Vec::new();
        while !self.check_punct(Punctuation::RBrace) && !self.is_at_end() {
            body.push(self.statement()?);
        }
        self.expect_punct(Punctuation::RBrace)?;
        Ok(AstNode::Class { name, parent, body, span })
    }

    fn block(&mut self) -> PResult<AstNode> {
        let span = self.current_span();
        self.expect_punct(Punctuation::LBrace)?;
        let mut statements = Vec::new();
        while !self.check_punct(Punctuation::RBrace) && !self.is_at_end() {
            match self.statement() {
                Ok(s) => statements.push(s),
                Err(()) => {
                    let espan = self.current_span();
                    let msg = self.errors.pop().unwrap_or_else(|| "syntax error".to_owned());
                    statements.push(AstNode::Error { message: msg, span: espan });
                    self.synchronize();
                }
            }
        }
        self.expect_punct(Punctuation::RBrace)?;
        Ok(AstNode::Block(statements, span))
    }

    // ---- expressions (precedence climbing) ----

    fn expression(&mut self) -> PResult<AstNode> {
        self.assignment()
    }

    fn assignment(&mut self) -> PResult<AstNode> {
        let span = self.current_span();
        let expr = self.logic_or()?;
        if self.match_op(Operator::Assign) {
            let value = Box::new(self.assignment()?);
            let target = Self::expr_to_assign_target(expr)?;
            return Ok(AstNode::Assignment { target, value, span });
        }
        Ok(expr)
    }

    fn expr_to_assign_target(expr: AstNode) -> PResult<AssignTarget> {
        match expr {
            AstNode::Identifier(name, _) => Ok(AssignTarget::Identifier(name)),
            AstNode::ArrayAccess { collection, index, .. } => Ok(AssignTarget::Index { collection, index }),
            AstNode::MemberAccess { object, property, .. } => Ok(AssignTarget::Member { object, property }),
            _ => Err(()),
        }
    }

    fn logic_or(&mut self) -> PResult<AstNode> {
        let mut left = self.logic_and()?;
        while self.check_op(Operator::OrOr) {
            let span = self.current_span();
            self.advance();
            let right = self.logic_and()?;
            left = AstNode::Binary { op: BinaryOp::Or, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn logic_and(&mut self) -> PResult<AstNode> {
        let mut left = self.bit_or()?;
        while self.check_op(Operator::AndAnd) {
            let span = self.current_span();
            self.advance();
            let right = self.bit_or()?;
            left = AstNode::Binary { op: BinaryOp::And, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn bit_or(&mut self) -> PResult<AstNode> {
        let mut left = self.bit_xor()?;
        while self.check_op(Operator::Pipe) {
            let span = self.current_span();
            self.advance();
            let right = self.bit_xor()?;
            left = AstNode::Binary { op: BinaryOp::BitOr, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn bit_xor(&mut self) -> PResult<AstNode> {
        let mut left = self.bit_and()?;
        while self.check_op(Operator::Caret) || self.check_op(Operator::XorXor) {
            let span = self.current_span();
            let op = if self.check_op(Operator::XorXor) { BinaryOp::Xor } else { BinaryOp::BitXor };
            self.advance();
            let right = self.bit_and()?;
            left = AstNode::Binary { op, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn bit_and(&mut self) -> PResult<AstNode> {
        let mut left = self.equality()?;
        while self.check_op(Operator::Amp) {
            let span = self.current_span();
            self.advance();
            let right = self.equality()?;
            left = AstNode::Binary { op: BinaryOp::BitAnd, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn equality(&mut self) -> PResult<AstNode> {
        let mut left = self.comparison()?;
        loop {
            let op = if self.check_op(Operator::EqEq) {
                BinaryOp::Eq
            } else if self.check_op(Operator::NotEq) {
                BinaryOp::NotEq
            } else {
                break;
            };
            let span = self.current_span();
            self.advance();
            let right = self.comparison()?;
            left = AstNode::Binary { op, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn comparison(&mut self) -> PResult<AstNode> {
        let mut left = self.range()?;
        loop {
            let op = if self.check_op(Operator::Lt) {
                BinaryOp::Lt
            } else if self.check_op(Operator::LtEq) {
                BinaryOp::LtEq
            } else if self.check_op(Operator::Gt) {
                BinaryOp::Gt
            } else if self.check_op(Operator::GtEq) {
                BinaryOp::GtEq
            } else {
                break;
            };
            let span = self.current_span();
            self.advance();
            let right = self.range()?;
            left = AstNode::Binary { op, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn range(&mut self) -> PResult<AstNode> {
        let left = self.shift()?;
        let span = self.current_span();
        if self.match_op(Operator::DotDot) {
            let right = self.shift()?;
            if self.match_op(Operator::Amp) || self.match_keyword(Keyword::By) {
                let step = self.shift()?;
                return Ok(AstNode::RangeWithStep {
                    start: Box::new(left),
                    end: Box::new(right),
                    step: Box::new(step),
                    inclusive: false,
                    span,
                });
            }
            return Ok(AstNode::Binary { op: BinaryOp::Range, left: Box::new(left), right: Box::new(right), span });
        }
        if self.match_op(Operator::DotDotEq) {
            let right = self.shift()?;
            return Ok(AstNode::Binary { op: BinaryOp::RangeInclusive, left: Box::new(left), right: Box::new(right), span });
        }
        Ok(left)
    }

    fn shift(&mut self) -> PResult<AstNode> {
        let mut left = self.term()?;
        loop {
            let op = if self.check_op(Operator::Shl) {
                BinaryOp::Shl
            } else if self.check_op(Operator::Shr) {
                BinaryOp::Shr
            } else {
                break;
            };
            let span = self.current_span();
            self.advance();
            let right = self.term()?;
            left = AstNode::Binary { op, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn term(&mut self) -> PResult<AstNode> {
        let mut left = self.factor()?;
        loop {
            let op = if self.check_op(Operator::Plus) {
                BinaryOp::Add
            } else if self.check_op(Operator::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };
            let span = self.current_span();
            self.advance();
            let right = self.factor()?;
            left = AstNode::Binary { op, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn factor(&mut self) -> PResult<AstNode> {
        let mut left = self.power()?;
        loop {
            let op = if self.check_op(Operator::Star) {
                BinaryOp::Mul
            } else if self.check_op(Operator::Slash) {
                BinaryOp::Div
            } else if self.check_op(Operator::Percent) {
                BinaryOp::Mod
            } else {
                break;
            };
            let span = self.current_span();
            self.advance();
            let right = self.power()?;
            left = AstNode::Binary { op, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn power(&mut self) -> PResult<AstNode> {
        let left = self.unary()?;
        let span = self.current_span();
        if self.match_op(Operator::StarStar) {
            // right-associative
            let right = self.power()?;
            return Ok(AstNode::Binary { op: BinaryOp::Pow, left: Box::new(left), right: Box::new(right), span });
        }
        Ok(left)
    }

    fn unary(&mut self) -> PResult<AstNode> {
        let span = self.current_span();
        if let TokenKind::Operator(op) = self.peek().kind {
            if let Ok(uop) = UnaryOp::try_from(op) {
                if matches!(op, Operator::Plus | Operator::Minus | Operator::Not | Operator::Tilde) {
                    self.advance();
                    let operand = self.unary()?;
                    return Ok(AstNode::Unary { op: uop, operand: Box::new(operand), span });
                }
            }
        }
        self.postfix()
    }

    fn postfix(&mut self) -> PResult<AstNode> {
        let mut expr = self.primary()?;
        loop {
            let span = self.current_span();
            if self.match_punct(Punctuation::LParen) {
                let mut args = Vec::new();
                if !self.check_punct(Punctuation::RParen) {
                    loop {
                        args.push(self.expression()?);
                        if !self.match_punct(Punctuation::Comma) {
                            break;
                        }
                    }
                }
                self.expect_punct(Punctuation::RParen)?;
                expr = AstNode::Call { callee: Box::new(expr), args, span };
            } else if self.match_punct(Punctuation::LBracket) {
                let index = self.expression()?;
                self.expect_punct(Punctuation::RBracket)?;
                expr = AstNode::ArrayAccess { collection: Box::new(expr), index: Box::new(index), span };
            } else if self.match_op(Operator::Dot) {
                let property = self.expect_identifier()?;
                expr = AstNode::MemberAccess { object: Box::new(expr), property, span };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> PResult<AstNode> {
        let span = self.current_span();
        match self.peek().kind.clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(AstNode::Number(n, span))
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(AstNode::Str(s, span))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(AstNode::Identifier(name, span))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(AstNode::Bool(true, span))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(AstNode::Bool(false, span))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Ok(AstNode::Null(span))
            }
            TokenKind::Keyword(Keyword::Function) => self.function_declaration(span),
            TokenKind::Keyword(Keyword::Lambda) => self.lambda_expression(span),
            TokenKind::Keyword(Keyword::Await) => {
                self.advance();
                let inner = self.unary()?;
                Ok(AstNode::Await(Box::new(inner), span))
            }
            TokenKind::Keyword(Keyword::Promise) => {
                self.advance();
                let inner = self.block()?;
                Ok(AstNode::Promise(Box::new(inner), span))
            }
            TokenKind::Keyword(Keyword::Spore) => self.spore_expression(span),
            TokenKind::Punctuation(Punctuation::LParen) => {
                self.advance();
                let inner = self.expression()?;
                self.expect_punct(Punctuation::RParen)?;
                Ok(inner)
            }
            TokenKind::Punctuation(Punctuation::LBracket) => self.array_literal(span),
            TokenKind::Punctuation(Punctuation::LBrace) => self.hashmap_or_set_literal(span),
            _ => {
                let found = self.advance().kind;
                self.error(format!("unexpected token {found:?}"))
            }
        }
    }

    fn lambda_expression(&mut self, span: Span) -> PResult<AstNode> {
        self.match_keyword(Keyword::Lambda);
        let parameters = self.parameter_list()?;
        self.expect_punct(Punctuation::Arrow).or_else(|()| self.error("expected '->' after lambda parameters".to_owned()))?;
        let body = if self.check_punct(Punctuation::LBrace) { Box::new(self.block()?) } else { Box::new(self.expression()?) };
        Ok(AstNode::Lambda { parameters, body, span })
    }

    fn array_literal(&mut self, span: Span) -> PResult<AstNode> {
        self.expect_punct(Punctuation::LBracket)?;
        let mut elements = Vec::new();
        if !self.check_punct(Punctuation::RBracket) {
            loop {
                elements.push(self.expression()?);
                if !self.match_punct(Punctuation::Comma) {
                    break;
                }
            }
        }
        self.expect_punct(Punctuation::RBracket)?;
        Ok(AstNode::ArrayLiteral(elements, span))
    }

    /// `{}` is an empty hashmap; `{a, b}` is a set; `{a: 1, b: 2}` a hashmap —
    /// disambiguated by whether the first element is followed by `:`.
    fn hashmap_or_set_literal(&mut self, span: Span) -> PResult<AstNode> {
        self.expect_punct(Punctuation::LBrace)?;
        if self.match_punct(Punctuation::RBrace) {
            return Ok(AstNode::HashMapLiteral { keys: Vec::new(), values: Vec::new(), span });
        }
        let first_key = self.expression()?;
        if self.match_punct(Punctuation::Colon) {
            let mut keys = vec![first_key];
            let mut values = vec![self.expression()?];
            while self.match_punct(Punctuation::Comma) {
                if self.check_punct(Punctuation::RBrace) {
                    break;
                }
                keys.push(self.expression()?);
                self.expect_punct(Punctuation::Colon)?;
                values.push(self.expression()?);
            }
            self.expect_punct(Punctuation::RBrace)?;
            Ok(AstNode::HashMapLiteral { keys, values, span })
        } else {
            let mut elements = vec![first_key];
            while self.match_punct(Punctuation::Comma) {
                if self.check_punct(Punctuation::RBrace) {
                    break;
                }
                elements.push(self.expression()?);
            }
            self.expect_punct(Punctuation::RBrace)?;
            Ok(AstNode::SetLiteral(elements, span))
        }
    }

    fn spore_expression(&mut self, span: Span) -> PResult<AstNode> {
        self.match_keyword(Keyword::Spore);
        let subject = Box::new(self.expression()?);
        self.expect_punct(Punctuation::LBrace)?;
        let mut cases = Vec::new();
        let mut root_case = None;
        while !self.check_punct(Punctuation::RBrace) && !self.is_at_end() {
            let case_span = self.current_span();
            if self.check_punct(Punctuation::Colon) {
                self.advance();
                root_case = Some(Box::new(self.block()?));
                continue;
            }
            let pattern = self.pattern()?;
            let is_lambda_style = self.match_op(Operator::FatArrow);
            if is_lambda_style {
                let body = Box::new(self.expression()?);
                self.match_punct(Punctuation::Comma);
                cases.push(SporeCase { pattern, body, is_lambda_style, span: case_span });
            } else {
                self.expect_punct(Punctuation::Colon)?;
                let body = Box::new(self.block()?);
                cases.push(SporeCase { pattern, body, is_lambda_style, span: case_span });
            }
        }
        self.expect_punct(Punctuation::RBrace)?;
        Ok(AstNode::Spore { subject, cases, root_case, span })
    }

    fn pattern(&mut self) -> PResult<Pattern> {
        let base = self.pattern_primary()?;
        if self.match_keyword(Keyword::If) {
            let condition = Box::new(self.expression()?);
            return Ok(Pattern::Guard { inner: Box::new(base), condition });
        }
        Ok(base)
    }

    fn pattern_primary(&mut self) -> PResult<Pattern> {
        let span = self.current_span();
        match self.peek().kind.clone() {
            TokenKind::Identifier(name) if name == "_" => {
                self.advance();
                Ok(Pattern::Wildcard)
            }
            TokenKind::Identifier(name) => {
                self.advance();
                // `Type` patterns look like bare identifiers too; the
                // evaluator resolves identifier-vs-type-name at match time
                // using the set of declared class/builtin type names.
                if name.chars().next().is_some_and(char::is_uppercase) {
                    Ok(Pattern::Type(name))
                } else {
                    Ok(Pattern::Identifier(name))
                }
            }
            TokenKind::Punctuation(Punctuation::LBracket) => {
                self.advance();
                let mut elements = Vec::new();
                let mut rest = None;
                if !self.check_punct(Punctuation::RBracket) {
                    loop {
                        if self.match_op(Operator::DotDot) {
                            rest = Some(self.expect_identifier()?);
                            break;
                        }
                        elements.push(self.pattern_primary()?);
                        if !self.match_punct(Punctuation::Comma) {
                            break;
                        }
                    }
                }
                self.expect_punct(Punctuation::RBracket)?;
                Ok(Pattern::ArrayDestructure { elements, rest })
            }
            _ => {
                let expr = self.term()?;
                let _ = span;
                if self.match_op(Operator::DotDot) {
                    let end = self.term()?;
                    return Ok(Pattern::Range { start: Box::new(expr), end: Box::new(end), inclusive: false });
                }
                if self.match_op(Operator::DotDotEq) {
                    let end = self.term()?;
                    return Ok(Pattern::Range { start: Box::new(expr), end: Box::new(end), inclusive: true });
                }
                Ok(Pattern::Literal(Box::new(expr)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(src: &str) -> Vec<AstNode> {
        let tokens = Lexer::new(src).tokenize();
        Parser::new(tokens).parse_program()
    }

    #[test]
    fn parses_let_and_arithmetic() {
        let program = parse("let x = 1 + 2 * 3;");
        assert_eq!(program.len(), 1);
        assert!(matches!(&program[0], AstNode::VariableDeclaration { name, .. } if name == "x"));
    }

    #[test]
    fn precedence_multiplies_before_adds() {
        let program = parse("let x = 1 + 2 * 3;");
        let AstNode::VariableDeclaration { initializer: Some(init), .. } = &program[0] else { panic!() };
        let AstNode::Binary { op: BinaryOp::Add, right, .. } = init.as_ref() else { panic!("expected top-level add") };
        assert!(matches!(right.as_ref(), AstNode::Binary { op: BinaryOp::Mul, .. }));
    }

    #[test]
    fn function_call_and_member_chain() {
        let program = parse("foo.bar(1, 2)[0];");
        assert!(!program[0].is_error());
    }

    #[test]
    fn malformed_input_yields_error_node_not_panic() {
        let program = parse("let = ;");
        assert!(program.iter().any(AstNode::is_error));
    }

    #[test]
    fn spore_lambda_and_block_cases() {
        let program = parse("spore x { 1 => \"one\", _: { return 0; } }");
        assert!(!program[0].is_error());
        assert!(matches!(&program[0], AstNode::Spore { cases, .. } if cases.len() == 2));
    }

    #[test]
    fn stepped_range_accepts_both_amp_and_by_spelling() {
        let amp = parse("0..10&2;");
        assert!(matches!(&amp[0], AstNode::RangeWithStep { inclusive: false, .. }));

        let by = parse("0..10 by 2;");
        assert!(matches!(&by[0], AstNode::RangeWithStep { inclusive: false, .. }));
    }
}
