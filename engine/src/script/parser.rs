use std::rc::Rc;

use super::ast::{BinOp, CmpOp, Expr, FunctionDef, Handler, Param, Program, Stmt, StmtKind, Target};
use super::lexer::{tokenize, Keyword, Sym, Tok, Token};
use crate::error::ParseError;
use crate::literal::Literal;

/// Deepest combined nesting of blocks and bracketed expressions.
const MAX_NESTING: usize = 100;

/// Parse a whole build script.
pub fn parse_program(src: &str) -> Result<Program, ParseError> {
    let mut parser = Parser::new(tokenize(src)?);
    let mut body = Vec::new();
    loop {
        parser.skip_terminators();
        if parser.at(&Tok::Eof) {
            break;
        }
        body.push(parser.statement()?);
    }
    Ok(Program { body })
}

/// Parse a single expression, such as a parameter default.
pub fn parse_expression(src: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(tokenize(src)?);
    parser.skip_newlines();
    let expr = parser.expression()?;
    parser.skip_newlines();
    if !parser.at(&Tok::Eof) {
        return Err(parser.unexpected("end of expression"));
    }
    Ok(expr)
}

#[derive(Debug, Clone, Copy, Default)]
struct Context {
    loops: usize,
    in_function: bool,
    in_class: bool,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    ctx: Context,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            ctx: Context::default(),
            depth: 0,
        }
    }

    fn nested<T>(
        &mut self,
        what: &str,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::new(
                self.line(),
                format!("{} nested too deeply", what),
            ));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn at_sym(&self, sym: Sym) -> bool {
        self.at(&Tok::Sym(sym))
    }

    fn at_kw(&self, kw: Keyword) -> bool {
        self.at(&Tok::Kw(kw))
    }

    fn eat_sym(&mut self, sym: Sym) -> bool {
        let hit = self.at_sym(sym);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn eat_kw(&mut self, kw: Keyword) -> bool {
        let hit = self.at_kw(kw);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn expect_sym(&mut self, sym: Sym, what: &str) -> Result<(), ParseError> {
        if self.eat_sym(sym) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_name(&mut self, what: &str) -> Result<String, ParseError> {
        match self.peek().clone() {
            Tok::Name(name) => {
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError::new(
            self.line(),
            format!("expected {}, found {}", expected, describe(self.peek())),
        )
    }

    fn skip_newlines(&mut self) {
        while self.at(&Tok::Newline) {
            self.pos += 1;
        }
    }

    fn skip_terminators(&mut self) {
        while self.at(&Tok::Newline) || self.at_sym(Sym::Semi) {
            self.pos += 1;
        }
    }

    /// Continuation keywords (`elif`, `else`, `except`, `finally`) may sit on the
    /// line after a closing brace.
    fn continues_with(&mut self, kw: Keyword) -> bool {
        let mut probe = self.pos;
        while matches!(self.tokens.get(probe), Some(Token { tok: Tok::Newline, .. })) {
            probe += 1;
        }
        let hit = matches!(self.tokens.get(probe), Some(Token { tok: Tok::Kw(k), .. }) if *k == kw);
        if hit {
            self.pos = probe + 1;
        }
        hit
    }

    fn end_simple(&mut self) -> Result<(), ParseError> {
        match self.peek() {
            Tok::Newline | Tok::Sym(Sym::Semi) => {
                self.pos += 1;
                Ok(())
            }
            Tok::Sym(Sym::RBrace) | Tok::Eof => Ok(()),
            _ => Err(self.unexpected("end of statement")),
        }
    }

    fn block(&mut self, ctx: Context) -> Result<Vec<Stmt>, ParseError> {
        self.nested("block", |parser| parser.block_body(ctx))
    }

    fn block_body(&mut self, ctx: Context) -> Result<Vec<Stmt>, ParseError> {
        self.expect_sym(Sym::LBrace, "'{'")?;
        let saved = std::mem::replace(&mut self.ctx, ctx);
        let mut body = Vec::new();
        let result = loop {
            self.skip_terminators();
            if self.eat_sym(Sym::RBrace) {
                break Ok(body);
            }
            if self.at(&Tok::Eof) {
                break Err(ParseError::new(self.line(), "unclosed block, expected '}'"));
            }
            match self.statement() {
                Ok(stmt) => body.push(stmt),
                Err(err) => break Err(err),
            }
        };
        self.ctx = saved;
        result
    }

    fn same_context(&self) -> Context {
        self.ctx
    }

    fn loop_context(&self) -> Context {
        Context {
            loops: self.ctx.loops + 1,
            ..self.ctx
        }
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        let kind = match self.peek() {
            Tok::Kw(Keyword::If) => self.if_stmt()?,
            Tok::Kw(Keyword::While) => {
                self.pos += 1;
                let cond = self.expression()?;
                let body = self.block(self.loop_context())?;
                StmtKind::While { cond, body }
            }
            Tok::Kw(Keyword::For) => self.for_stmt()?,
            Tok::Kw(Keyword::Try) => self.try_stmt()?,
            Tok::Kw(Keyword::With) => {
                self.pos += 1;
                let context = self.expression()?;
                let name = if self.eat_kw(Keyword::As) {
                    Some(self.expect_name("a name after 'as'")?)
                } else {
                    None
                };
                let body = self.block(self.same_context())?;
                StmtKind::With {
                    context,
                    name,
                    body,
                }
            }
            Tok::Kw(Keyword::Def) => self.def_stmt()?,
            Tok::Kw(Keyword::Class) => {
                self.pos += 1;
                let name = self.expect_name("a class name")?;
                let body = self.block(Context {
                    loops: 0,
                    in_function: false,
                    in_class: true,
                })?;
                StmtKind::Class { name, body }
            }
            Tok::Kw(Keyword::Return) => {
                if self.ctx.in_class && !self.ctx.in_function {
                    return Err(ParseError::new(line, "'return' outside function in class body"));
                }
                self.pos += 1;
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.end_simple()?;
                StmtKind::Return(value)
            }
            Tok::Kw(Keyword::Raise) => {
                self.pos += 1;
                let value = self.expression()?;
                self.end_simple()?;
                StmtKind::Raise(value)
            }
            Tok::Kw(Keyword::Del) => {
                self.pos += 1;
                let expr = self.expression()?;
                let target = into_target(expr, line)?;
                self.end_simple()?;
                StmtKind::Del(target)
            }
            Tok::Kw(Keyword::Pass) => {
                self.pos += 1;
                self.end_simple()?;
                StmtKind::Pass
            }
            Tok::Kw(kw @ (Keyword::Break | Keyword::Continue)) => {
                let kw = *kw;
                if self.ctx.loops == 0 {
                    let word = if kw == Keyword::Break { "break" } else { "continue" };
                    return Err(ParseError::new(line, format!("'{}' outside loop", word)));
                }
                self.pos += 1;
                self.end_simple()?;
                if kw == Keyword::Break {
                    StmtKind::Break
                } else {
                    StmtKind::Continue
                }
            }
            _ => self.simple_stmt(line)?,
        };
        Ok(Stmt { line, kind })
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek(),
            Tok::Newline | Tok::Eof | Tok::Sym(Sym::Semi) | Tok::Sym(Sym::RBrace)
        )
    }

    fn simple_stmt(&mut self, line: usize) -> Result<StmtKind, ParseError> {
        let expr = self.expression()?;
        let kind = if self.eat_sym(Sym::Assign) {
            let target = into_target(expr, line)?;
            let value = self.expression()?;
            StmtKind::Assign { target, value }
        } else if self.at_sym(Sym::PlusAssign) || self.at_sym(Sym::MinusAssign) {
            let op = if self.eat_sym(Sym::PlusAssign) {
                BinOp::Add
            } else {
                self.pos += 1;
                BinOp::Sub
            };
            let target = into_target(expr, line)?;
            let value = self.expression()?;
            StmtKind::AugAssign { target, op, value }
        } else {
            StmtKind::Expr(expr)
        };
        self.end_simple()?;
        Ok(kind)
    }

    fn if_stmt(&mut self) -> Result<StmtKind, ParseError> {
        self.pos += 1;
        let mut branches = Vec::new();
        let cond = self.expression()?;
        branches.push((cond, self.block(self.same_context())?));
        let mut orelse = Vec::new();
        loop {
            if self.continues_with(Keyword::Elif) {
                let cond = self.expression()?;
                branches.push((cond, self.block(self.same_context())?));
            } else if self.continues_with(Keyword::Else) {
                orelse = self.block(self.same_context())?;
                break;
            } else {
                break;
            }
        }
        Ok(StmtKind::If { branches, orelse })
    }

    fn for_stmt(&mut self) -> Result<StmtKind, ParseError> {
        self.pos += 1;
        let mut vars = vec![self.expect_name("a loop variable")?];
        while self.eat_sym(Sym::Comma) {
            vars.push(self.expect_name("a loop variable")?);
        }
        if !self.eat_kw(Keyword::In) {
            return Err(self.unexpected("'in'"));
        }
        let iter = self.expression()?;
        let body = self.block(self.loop_context())?;
        Ok(StmtKind::For { vars, iter, body })
    }

    fn try_stmt(&mut self) -> Result<StmtKind, ParseError> {
        let line = self.line();
        self.pos += 1;
        let body = self.block(self.same_context())?;
        let handler = if self.continues_with(Keyword::Except) {
            let name = if self.eat_kw(Keyword::As) {
                Some(self.expect_name("a name after 'as'")?)
            } else {
                None
            };
            let body = self.block(self.same_context())?;
            Some(Handler { name, body })
        } else {
            None
        };
        let has_finally = self.continues_with(Keyword::Finally);
        let finally = if has_finally {
            self.block(self.same_context())?
        } else {
            Vec::new()
        };
        if handler.is_none() && !has_finally {
            return Err(ParseError::new(line, "'try' needs an 'except' or 'finally' block"));
        }
        Ok(StmtKind::Try {
            body,
            handler,
            finally,
        })
    }

    fn def_stmt(&mut self) -> Result<StmtKind, ParseError> {
        let line = self.line();
        self.pos += 1;
        let name = self.expect_name("a function name")?;
        self.expect_sym(Sym::LParen, "'('")?;
        let mut params: Vec<Param> = Vec::new();
        while !self.at_sym(Sym::RParen) {
            let param = self.expect_name("a parameter name")?;
            if params.iter().any(|p| p.name == param) {
                return Err(ParseError::new(
                    line,
                    format!("duplicate parameter '{}' in '{}'", param, name),
                ));
            }
            let default = if self.eat_sym(Sym::Assign) {
                Some(self.expression()?)
            } else {
                None
            };
            if default.is_none() && params.iter().any(|p| p.default.is_some()) {
                return Err(ParseError::new(
                    line,
                    "parameter without a default follows parameter with a default",
                ));
            }
            params.push(Param {
                name: param,
                default,
            });
            if !self.eat_sym(Sym::Comma) {
                break;
            }
        }
        self.expect_sym(Sym::RParen, "')'")?;
        let body = self.block(Context {
            loops: 0,
            in_function: true,
            in_class: false,
        })?;
        Ok(StmtKind::Def(Rc::new(FunctionDef { name, params, body })))
    }

    pub(super) fn expression(&mut self) -> Result<Expr, ParseError> {
        self.nested("expression", Self::or_expr)
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.and_expr()?;
        while self.eat_kw(Keyword::Or) {
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.not_expr()?;
        while self.eat_kw(Keyword::And) {
            let rhs = self.not_expr()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.eat_kw(Keyword::Not) {
            let inner = self.nested("expression", Self::not_expr)?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.additive()?;
        let op = match self.peek() {
            Tok::Sym(Sym::Eq) => CmpOp::Eq,
            Tok::Sym(Sym::Ne) => CmpOp::Ne,
            Tok::Sym(Sym::Lt) => CmpOp::Lt,
            Tok::Sym(Sym::Le) => CmpOp::Le,
            Tok::Sym(Sym::Gt) => CmpOp::Gt,
            Tok::Sym(Sym::Ge) => CmpOp::Ge,
            Tok::Kw(Keyword::In) => CmpOp::In,
            Tok::Kw(Keyword::Not)
                if matches!(self.tokens.get(self.pos + 1), Some(Token { tok: Tok::Kw(Keyword::In), .. })) =>
            {
                self.pos += 1;
                CmpOp::NotIn
            }
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.additive()?;
        Ok(Expr::Compare(op, Box::new(lhs), Box::new(rhs)))
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Sym(Sym::Plus) => BinOp::Add,
                Tok::Sym(Sym::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Tok::Sym(Sym::Star) => BinOp::Mul,
                Tok::Sym(Sym::Slash) => BinOp::Div,
                Tok::Sym(Sym::SlashSlash) => BinOp::FloorDiv,
                Tok::Sym(Sym::Percent) => BinOp::Mod,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat_sym(Sym::Minus) {
            let inner = self.nested("expression", Self::unary)?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        if self.eat_sym(Sym::Plus) {
            return self.nested("expression", Self::unary);
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.atom()?;
        loop {
            if self.eat_sym(Sym::Dot) {
                let name = self.expect_name("an attribute name")?;
                expr = Expr::Attr(Box::new(expr), name);
            } else if self.eat_sym(Sym::LParen) {
                let (args, kwargs) = self.call_args()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.eat_sym(Sym::LBracket) {
                let index = self.expression()?;
                self.expect_sym(Sym::RBracket, "']'")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), ParseError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.at_sym(Sym::RParen) {
            let keyword = match (self.peek(), self.tokens.get(self.pos + 1)) {
                (
                    Tok::Name(name),
                    Some(Token {
                        tok: Tok::Sym(Sym::Assign),
                        ..
                    }),
                ) => Some(name.clone()),
                _ => None,
            };
            if let Some(name) = keyword {
                self.pos += 2;
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(ParseError::new(
                        self.line(),
                        format!("keyword argument '{}' repeated", name),
                    ));
                }
                kwargs.push((name, self.expression()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(ParseError::new(
                        self.line(),
                        "positional argument follows keyword argument",
                    ));
                }
                args.push(self.expression()?);
            }
            if !self.eat_sym(Sym::Comma) {
                break;
            }
        }
        self.expect_sym(Sym::RParen, "')'")?;
        Ok((args, kwargs))
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        let expr = match self.peek().clone() {
            Tok::Int(value) => Expr::Const(Literal::Int(value)),
            Tok::Float(value) => Expr::Const(Literal::Float(value)),
            Tok::Str(mut value) => {
                self.pos += 1;
                while let Tok::Str(next) = self.peek() {
                    value.push_str(next);
                    self.pos += 1;
                }
                return Ok(Expr::Const(Literal::Str(value)));
            }
            Tok::Name(name) => Expr::Name(name),
            Tok::Kw(Keyword::True) => Expr::Const(Literal::Bool(true)),
            Tok::Kw(Keyword::False) => Expr::Const(Literal::Bool(false)),
            Tok::Kw(Keyword::None) => Expr::Const(Literal::None),
            Tok::Sym(Sym::LParen) => {
                self.pos += 1;
                let inner = self.expression()?;
                self.expect_sym(Sym::RParen, "')'")?;
                return Ok(inner);
            }
            Tok::Sym(Sym::LBracket) => {
                self.pos += 1;
                let mut items = Vec::new();
                while !self.at_sym(Sym::RBracket) {
                    items.push(self.expression()?);
                    if !self.eat_sym(Sym::Comma) {
                        break;
                    }
                }
                self.expect_sym(Sym::RBracket, "']'")?;
                return Ok(Expr::List(items));
            }
            Tok::Sym(Sym::LBrace) => return self.dict(),
            _ => return Err(self.unexpected("an expression")),
        };
        self.pos += 1;
        Ok(expr)
    }

    fn dict(&mut self) -> Result<Expr, ParseError> {
        self.pos += 1;
        let mut pairs = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat_sym(Sym::RBrace) {
                break;
            }
            let key = self.expression()?;
            self.skip_newlines();
            self.expect_sym(Sym::Colon, "':'")?;
            self.skip_newlines();
            let value = self.expression()?;
            pairs.push((key, value));
            self.skip_newlines();
            if !self.eat_sym(Sym::Comma) {
                self.skip_newlines();
                self.expect_sym(Sym::RBrace, "'}'")?;
                break;
            }
        }
        Ok(Expr::Dict(pairs))
    }
}

fn into_target(expr: Expr, line: usize) -> Result<Target, ParseError> {
    match expr {
        Expr::Name(name) => Ok(Target::Name(name)),
        Expr::Attr(obj, name) => Ok(Target::Attr(*obj, name)),
        Expr::Index(obj, index) => Ok(Target::Index(*obj, *index)),
        _ => Err(ParseError::new(line, "cannot assign to expression")),
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Int(v) => format!("number {}", v),
        Tok::Float(v) => format!("number {}", v),
        Tok::Str(_) => "string".to_string(),
        Tok::Name(name) => format!("name '{}'", name),
        Tok::Kw(kw) => format!("keyword '{}'", format!("{:?}", kw).to_lowercase()),
        Tok::Sym(sym) => format!("'{}'", sym_text(*sym)),
        Tok::Newline => "end of line".to_string(),
        Tok::Eof => "end of input".to_string(),
    }
}

fn sym_text(sym: Sym) -> &'static str {
    match sym {
        Sym::LParen => "(",
        Sym::RParen => ")",
        Sym::LBracket => "[",
        Sym::RBracket => "]",
        Sym::LBrace => "{",
        Sym::RBrace => "}",
        Sym::Comma => ",",
        Sym::Colon => ":",
        Sym::Semi => ";",
        Sym::Dot => ".",
        Sym::Assign => "=",
        Sym::PlusAssign => "+=",
        Sym::MinusAssign => "-=",
        Sym::Eq => "==",
        Sym::Ne => "!=",
        Sym::Lt => "<",
        Sym::Le => "<=",
        Sym::Gt => ">",
        Sym::Ge => ">=",
        Sym::Plus => "+",
        Sym::Minus => "-",
        Sym::Star => "*",
        Sym::Slash => "/",
        Sym::SlashSlash => "//",
        Sym::Percent => "%",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<StmtKind> {
        parse_program(src)
            .unwrap()
            .body
            .into_iter()
            .map(|s| s.kind)
            .collect()
    }

    #[test]
    fn statements_keep_their_source_lines() {
        let program = parse_program("x = 1\n\n# note\ny = 2; z = 3\n").unwrap();
        let lines: Vec<usize> = program.body.iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![1, 4, 4]);
    }

    #[test]
    fn subscript_assignment_becomes_index_target() {
        let body = kinds("c.environ['X'] = '1'");
        assert!(matches!(
            &body[0],
            StmtKind::Assign {
                target: Target::Index(Expr::Attr(_, attr), Expr::Const(Literal::Str(key))),
                ..
            } if attr == "environ" && key == "X"
        ));
    }

    #[test]
    fn else_may_follow_on_next_line() {
        let body = kinds("if a {\n  b()\n}\nelse {\n  c()\n}\n");
        match &body[0] {
            StmtKind::If { branches, orelse } => {
                assert_eq!(branches.len(), 1);
                assert_eq!(orelse.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn not_in_and_precedence() {
        let expr = parse_expression("not a in b or 1 + 2 * 3 == 7").unwrap();
        assert!(matches!(expr, Expr::Or(_, _)));
        let expr = parse_expression("x not in y").unwrap();
        assert!(matches!(expr, Expr::Compare(CmpOp::NotIn, _, _)));
    }

    #[test]
    fn multiline_dict_literal() {
        let expr = parse_expression("{\n 'a': 1,\n 'b': [2,\n 3],\n}").unwrap();
        match expr {
            Expr::Dict(pairs) => assert_eq!(pairs.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn keyword_arguments() {
        let expr = parse_expression("c.run(['ls'], user='root', capture=True)").unwrap();
        match expr {
            Expr::Call { args, kwargs, .. } => {
                assert_eq!(args.len(), 1);
                let names: Vec<&str> = kwargs.iter().map(|(k, _)| k.as_str()).collect();
                assert_eq!(names, vec!["user", "capture"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn return_in_class_body_is_rejected() {
        let err = parse_program("class Build {\n  return 1\n}").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(parse_program("class Build {\n  def f() { return 1 }\n}").is_ok());
    }

    #[test]
    fn loop_control_outside_loop_is_rejected() {
        assert!(parse_program("break").is_err());
        assert!(parse_program("while True { def f() { continue } }").is_err());
        assert!(parse_program("for x in [1] { if x { break } }").is_ok());
    }

    #[test]
    fn try_requires_a_handler() {
        assert!(parse_program("try { x() }").is_err());
        assert!(parse_program("try { x() } finally { y() }").is_ok());
        assert!(parse_program("try { x() }\nexcept as e { print(e) }").is_ok());
    }

    #[test]
    fn empty_finally_block_still_counts() {
        let body = kinds("try { c.commit() } finally { }");
        match &body[0] {
            StmtKind::Try {
                handler, finally, ..
            } => {
                assert!(handler.is_none());
                assert!(finally.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(parse_program("try {
  x()
}
finally {
}
").is_ok());
    }

    #[test]
    fn nesting_is_bounded() {
        let deep = format!("{}1{}", "(".repeat(MAX_NESTING + 1), ")".repeat(MAX_NESTING + 1));
        let err = parse_expression(&deep).unwrap_err();
        assert_eq!(err.message, "expression nested too deeply");

        let shallow = format!("{}1{}", "(".repeat(MAX_NESTING / 2), ")".repeat(MAX_NESTING / 2));
        assert!(parse_expression(&shallow).is_ok());
        assert!(parse_expression(&"-".repeat(MAX_NESTING * 2)).is_err());
    }

    #[test]
    fn invalid_targets_are_rejected() {
        let err = parse_program("f() = 1").unwrap_err();
        assert_eq!(err.message, "cannot assign to expression");
    }

    #[test]
    fn missing_brace_is_reported() {
        let err = parse_program("if x {\n  y = 1\n").unwrap_err();
        assert!(err.message.contains("unclosed block"));
    }
}
