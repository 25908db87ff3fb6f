use super::builtins;
use super::lexer::{tokenize, Spanned, Token};
use super::{BinaryOp, CompileError, Expr, Stmt, Value, ROW_VARIABLE};
use crate::row::RowLayout;
use crate::schema::ColumnType;

pub(crate) struct Compiled {
    pub locals: usize,
    pub assigned: Vec<usize>,
    pub hints: Vec<(String, ColumnType)>,
}

/// Recursive-descent parser that resolves names while it parses.
pub(crate) struct Parser<'a> {
    tokens: Vec<Spanned>,
    pos: usize,
    layout: &'a mut RowLayout,
    locals: Vec<String>,
    assigned: Vec<usize>,
    hints: Vec<(String, ColumnType)>,
}

type PResult<T> = Result<T, CompileError>;

impl<'a> Parser<'a> {
    pub fn new(src: &str, layout: &'a mut RowLayout) -> PResult<Self> {
        Ok(Self {
            tokens: tokenize(src)?,
            pos: 0,
            layout,
            locals: Vec::new(),
            assigned: Vec::new(),
            hints: Vec::new(),
        })
    }

    pub fn finish(self) -> Compiled {
        Compiled {
            locals: self.locals.len(),
            assigned: self.assigned,
            hints: self.hints,
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        let i = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[i].token
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos].offset
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].token.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> PResult<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(message, self.offset())
    }

    /// A single expression, optionally followed by `;`.
    pub fn filter(&mut self) -> PResult<Expr> {
        let expr = self.expression()?;
        while self.eat(&Token::Semi) {}
        if *self.peek() != Token::Eof {
            return Err(self.error("unexpected input after expression"));
        }
        Ok(expr)
    }

    pub fn program(&mut self) -> PResult<Vec<Stmt>> {
        let mut body = Vec::new();
        while *self.peek() != Token::Eof {
            if self.eat(&Token::Semi) {
                continue;
            }
            body.push(self.statement()?);
        }
        Ok(body)
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(Token::LBrace, "'{'")?;
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Token::RBrace => {
                    self.advance();
                    return Ok(body);
                }
                Token::Eof => return Err(self.error("expected '}'")),
                Token::Semi => {
                    self.advance();
                }
                _ => body.push(self.statement()?),
            }
        }
    }

    fn declare(&mut self, name: &str) -> usize {
        match self.locals.iter().position(|l| l == name) {
            Some(i) => i,
            None => {
                self.locals.push(name.to_string());
                self.locals.len() - 1
            }
        }
    }

    fn statement(&mut self) -> PResult<Stmt> {
        match self.peek().clone() {
            Token::Let => {
                self.advance();
                let name = match self.advance() {
                    Token::Ident(n) if n != ROW_VARIABLE => n,
                    _ => return Err(self.error("expected a variable name after 'let'")),
                };
                self.expect(Token::Assign, "'='")?;
                let value = self.expression()?;
                let slot = self.declare(&name);
                Ok(Stmt::SetLocal(slot, value))
            }
            Token::If => self.if_statement(),
            Token::Ident(name) if name != ROW_VARIABLE && *self.peek_at(1) == Token::Assign => {
                self.advance();
                self.advance();
                let value = self.expression()?;
                let slot = self.declare(&name);
                Ok(Stmt::SetLocal(slot, value))
            }
            _ => {
                let target_offset = self.offset();
                let expr = self.expression()?;
                if !self.eat(&Token::Assign) {
                    return Ok(Stmt::Eval(expr));
                }
                let value = self.expression()?;
                match expr {
                    Expr::Field(slot) => {
                        if !self.assigned.contains(&slot) {
                            self.assigned.push(slot);
                        }
                        Ok(Stmt::SetField(slot, value))
                    }
                    Expr::Local(slot) => Ok(Stmt::SetLocal(slot, value)),
                    _ => Err(CompileError::new("invalid assignment target", target_offset)),
                }
            }
        }
    }

    fn if_statement(&mut self) -> PResult<Stmt> {
        self.expect(Token::If, "'if'")?;
        let cond = self.expression()?;
        let then = self.block()?;
        let otherwise = if self.eat(&Token::Else) {
            if *self.peek() == Token::If {
                vec![self.if_statement()?]
            } else {
                self.block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If(cond, then, otherwise))
    }

    fn expression(&mut self) -> PResult<Expr> {
        let cond = self.coalesce()?;
        if self.eat(&Token::Question) {
            let a = self.expression()?;
            self.expect(Token::Colon, "':'")?;
            let b = self.expression()?;
            return Ok(Expr::Cond(Box::new(cond), Box::new(a), Box::new(b)));
        }
        Ok(cond)
    }

    fn coalesce(&mut self) -> PResult<Expr> {
        let mut left = self.or()?;
        while self.eat(&Token::Coalesce) {
            let right = self.or()?;
            left = Expr::Coalesce(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn or(&mut self) -> PResult<Expr> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> PResult<Expr> {
        let mut left = self.equality()?;
        while self.eat(&Token::And) {
            let right = self.equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn binary_level(
        &mut self,
        ops: &[(Token, BinaryOp)],
        next: fn(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let mut left = next(self)?;
        'outer: loop {
            for (tok, op) in ops {
                if self.eat(tok) {
                    let right = next(self)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn equality(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[(Token::Eq, BinaryOp::Eq), (Token::Ne, BinaryOp::Ne)],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[
                (Token::Le, BinaryOp::Le),
                (Token::Lt, BinaryOp::Lt),
                (Token::Ge, BinaryOp::Ge),
                (Token::Gt, BinaryOp::Gt),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[
                (Token::Star, BinaryOp::Mul),
                (Token::Slash, BinaryOp::Div),
                (Token::Percent, BinaryOp::Rem),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> PResult<Expr> {
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat(&Token::Plus) {
            return self.unary();
        }
        self.power()
    }

    fn power(&mut self) -> PResult<Expr> {
        let base = self.primary()?;
        if self.eat(&Token::Caret) {
            // right associative; the exponent may carry its own sign
            let exp = self.unary()?;
            return Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn field(&mut self) -> PResult<Expr> {
        match self.advance() {
            Token::Dot => match self.advance() {
                Token::Ident(name) => Ok(Expr::Field(self.layout.slot(&name))),
                _ => Err(self.error("expected a field name after 'r.'")),
            },
            Token::LBracket => {
                let name = match self.advance() {
                    Token::Str(s) => s,
                    _ => return Err(self.error("field index must be a string literal")),
                };
                self.expect(Token::RBracket, "']'")?;
                Ok(Expr::Field(self.layout.slot(&name)))
            }
            _ => Err(self.error(format!(
                "'{ROW_VARIABLE}' must be followed by '.field' or '[\"field\"]'"
            ))),
        }
    }

    fn call(&mut self, name: &str, offset: usize) -> PResult<Expr> {
        self.expect(Token::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.expression()?);
                if self.eat(&Token::RParen) {
                    break;
                }
                self.expect(Token::Comma, "',' or ')'")?;
            }
        }

        let hint = match name {
            "numeric" => Some(ColumnType::Numeric),
            "category" | "categorical" => Some(ColumnType::Categorical),
            _ => None,
        };
        if let Some(kind) = hint {
            return match args.as_slice() {
                [Expr::Lit(Value::Text(col))] => {
                    self.hints.push((col.clone(), kind));
                    Ok(Expr::Lit(Value::Null))
                }
                _ => Err(CompileError::new(
                    format!("{name}() takes one column name string"),
                    offset,
                )),
            };
        }

        let builtin = builtins::lookup(name)
            .ok_or_else(|| CompileError::new(format!("unknown function '{name}'"), offset))?;
        let n = args.len();
        if n < builtin.min_args || builtin.max_args.is_some_and(|max| n > max) {
            return Err(CompileError::new(
                format!("{name}() does not take {n} argument(s)"),
                offset,
            ));
        }
        Ok(Expr::Call(builtin, args))
    }

    fn primary(&mut self) -> PResult<Expr> {
        let offset = self.offset();
        match self.advance() {
            Token::Num(n) => Ok(Expr::Lit(Value::Num(n))),
            Token::Str(s) => Ok(Expr::Lit(Value::Text(s))),
            Token::True => Ok(Expr::Lit(Value::Bool(true))),
            Token::False => Ok(Expr::Lit(Value::Bool(false))),
            Token::Null => Ok(Expr::Lit(Value::Null)),
            Token::LParen => {
                let e = self.expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(e)
            }
            Token::Ident(name) if name == ROW_VARIABLE => self.field(),
            Token::Ident(name) => {
                if *self.peek() == Token::LParen {
                    return self.call(&name, offset);
                }
                match self.locals.iter().position(|l| *l == name) {
                    Some(i) => Ok(Expr::Local(i)),
                    None => Err(CompileError::new(
                        format!("unknown identifier '{name}' (fields are read as {ROW_VARIABLE}.{name})"),
                        offset,
                    )),
                }
            }
            Token::Eof => Err(CompileError::new("unexpected end of input", offset)),
            other => Err(CompileError::new(
                format!("unexpected token {other:?}"),
                offset,
            )),
        }
    }
}
