//! Recursive-descent parser for Lua 5.4.
//!
//! Every recursive production goes through [`Parser::enter`], so nesting is
//! bounded by `max_depth` and a hostile input fails with a syntax error
//! instead of exhausting the stack. Each token is consumed once; parsing is
//! linear in the input.

use super::SyntaxError;
use super::ast::{
    BinOp, Block, Expr, Field, FuncBody, FuncName, ReturnStat, Stat, UNARY_PRIORITY, UnOp,
};
use super::lexer::{Spanned, Token, tokenize};

/// Parse a whole chunk.
pub fn parse_chunk(src: &[u8], max_depth: usize) -> Result<Block, SyntaxError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        max_depth,
    };
    let block = parser.block()?;
    match parser.peek() {
        Token::Eof => Ok(block),
        other => Err(parser.error(format!("'<eof>' expected near {}", other.describe()))),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

type PResult<T> = Result<T, SyntaxError>;

static EOF: Token = Token::Eof;

fn block_follow(token: &Token) -> bool {
    matches!(
        token,
        Token::Else | Token::Elseif | Token::End | Token::Until | Token::Eof
    )
}

fn binary_op(token: &Token) -> Option<BinOp> {
    Some(match token {
        Token::Or => BinOp::Or,
        Token::And => BinOp::And,
        Token::Lt => BinOp::Lt,
        Token::Gt => BinOp::Gt,
        Token::Le => BinOp::Le,
        Token::Ge => BinOp::Ge,
        Token::Ne => BinOp::Ne,
        Token::Eq => BinOp::Eq,
        Token::Pipe => BinOp::BOr,
        Token::Tilde => BinOp::BXor,
        Token::Amp => BinOp::BAnd,
        Token::Shl => BinOp::Shl,
        Token::Shr => BinOp::Shr,
        Token::Concat => BinOp::Concat,
        Token::Plus => BinOp::Add,
        Token::Minus => BinOp::Sub,
        Token::Star => BinOp::Mul,
        Token::Slash => BinOp::Div,
        Token::DoubleSlash => BinOp::IDiv,
        Token::Percent => BinOp::Mod,
        Token::Caret => BinOp::Pow,
        _ => return None,
    })
}

fn unary_op(token: &Token) -> Option<UnOp> {
    Some(match token {
        Token::Minus => UnOp::Neg,
        Token::Not => UnOp::Not,
        Token::Hash => UnOp::Len,
        Token::Tilde => UnOp::BNot,
        _ => return None,
    })
}

impl Parser {
    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .or_else(|| self.tokens.last())
            .map_or(&EOF, |s| &s.token)
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|s| s.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.line(), message)
    }

    fn check(&mut self, expected: Token) -> PResult<()> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!(
                "{} expected near {}",
                expected.describe(),
                self.peek().describe()
            )))
        }
    }

    fn accept(&mut self, expected: Token) -> bool {
        if *self.peek() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    fn name(&mut self) -> PResult<String> {
        if let Token::Name(name) = self.peek() {
            let name = name.clone();
            self.advance();
            return Ok(name);
        }
        Err(self.error(format!(
            "<name> expected near {}",
            self.peek().describe()
        )))
    }

    fn enter(&mut self) -> PResult<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(self.error(format!(
                "nesting deeper than {} levels",
                self.max_depth
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // ==================== Statements ====================

    fn block(&mut self) -> PResult<Block> {
        self.enter()?;
        let mut block = Block::default();
        loop {
            if *self.peek() == Token::Return {
                block.ret = Some(self.return_stat()?);
                break;
            }
            if block_follow(self.peek()) {
                break;
            }
            if let Some(stat) = self.statement()? {
                block.stats.push(stat);
            }
        }
        self.leave();
        Ok(block)
    }

    fn return_stat(&mut self) -> PResult<ReturnStat> {
        let line = self.line();
        self.advance();
        let exprs = if block_follow(self.peek()) || *self.peek() == Token::Semi {
            Vec::new()
        } else {
            self.expr_list()?
        };
        self.accept(Token::Semi);
        if !block_follow(self.peek()) {
            return Err(self.error(format!(
                "'<eof>' expected near {}",
                self.peek().describe()
            )));
        }
        Ok(ReturnStat { exprs, line })
    }

    fn statement(&mut self) -> PResult<Option<Stat>> {
        let line = self.line();
        let stat = match self.peek() {
            Token::Semi => {
                self.advance();
                return Ok(None);
            }
            Token::If => self.if_stat()?,
            Token::While => {
                self.advance();
                let cond = self.expr()?;
                self.check(Token::Do)?;
                let body = self.block()?;
                self.check(Token::End)?;
                Stat::While { cond, body }
            }
            Token::Do => {
                self.advance();
                let body = self.block()?;
                self.check(Token::End)?;
                Stat::Do(body)
            }
            Token::For => self.for_stat()?,
            Token::Repeat => {
                self.advance();
                let body = self.block()?;
                self.check(Token::Until)?;
                let cond = self.expr()?;
                Stat::Repeat { body, cond }
            }
            Token::Function => {
                self.advance();
                let mut path = vec![self.name()?];
                while self.accept(Token::Dot) {
                    path.push(self.name()?);
                }
                let method = if self.accept(Token::Colon) {
                    Some(self.name()?)
                } else {
                    None
                };
                let func = self.func_body(line, method.is_some())?;
                Stat::Function {
                    name: FuncName { path, method, line },
                    func,
                }
            }
            Token::Local => {
                self.advance();
                if self.accept(Token::Function) {
                    let name = self.name()?;
                    let func = self.func_body(line, false)?;
                    Stat::LocalFunction { name, func }
                } else {
                    self.local_stat(line)?
                }
            }
            Token::DoubleColon => {
                self.advance();
                let label = self.name()?;
                self.check(Token::DoubleColon)?;
                Stat::Label(label)
            }
            Token::Break => {
                self.advance();
                Stat::Break
            }
            Token::Goto => {
                self.advance();
                Stat::Goto(self.name()?)
            }
            _ => self.expr_stat()?,
        };
        Ok(Some(stat))
    }

    fn if_stat(&mut self) -> PResult<Stat> {
        let mut branches = Vec::new();
        let mut otherwise = None;
        // Positioned at `if`; later iterations at `elseif`.
        loop {
            self.advance();
            let cond = self.expr()?;
            self.check(Token::Then)?;
            let body = self.block()?;
            branches.push((cond, body));
            match self.peek() {
                Token::Elseif => continue,
                Token::Else => {
                    self.advance();
                    otherwise = Some(self.block()?);
                    self.check(Token::End)?;
                    break;
                }
                _ => {
                    self.check(Token::End)?;
                    break;
                }
            }
        }
        Ok(Stat::If {
            branches,
            otherwise,
        })
    }

    fn for_stat(&mut self) -> PResult<Stat> {
        self.advance();
        let first = self.name()?;
        if self.accept(Token::Assign) {
            let start = self.expr()?;
            self.check(Token::Comma)?;
            let limit = self.expr()?;
            let step = if self.accept(Token::Comma) {
                Some(self.expr()?)
            } else {
                None
            };
            self.check(Token::Do)?;
            let body = self.block()?;
            self.check(Token::End)?;
            return Ok(Stat::NumericFor {
                var: first,
                start,
                limit,
                step,
                body,
            });
        }

        let mut vars = vec![first];
        while self.accept(Token::Comma) {
            vars.push(self.name()?);
        }
        self.check(Token::In)?;
        let exprs = self.expr_list()?;
        self.check(Token::Do)?;
        let body = self.block()?;
        self.check(Token::End)?;
        Ok(Stat::GenericFor { vars, exprs, body })
    }

    fn local_stat(&mut self, line: u32) -> PResult<Stat> {
        let mut names = Vec::new();
        loop {
            names.push(self.name()?);
            // Attribute: <const> or <close>
            if self.accept(Token::Lt) {
                let attrib = self.name()?;
                if attrib != "const" && attrib != "close" {
                    return Err(self.error(format!("unknown attribute '{}'", attrib)));
                }
                self.check(Token::Gt)?;
            }
            if !self.accept(Token::Comma) {
                break;
            }
        }
        let exprs = if self.accept(Token::Assign) {
            self.expr_list()?
        } else {
            Vec::new()
        };
        Ok(Stat::Local { names, exprs, line })
    }

    fn expr_stat(&mut self) -> PResult<Stat> {
        let first = self.suffixed_expr()?;
        if matches!(self.peek(), Token::Assign | Token::Comma) {
            let mut targets = vec![first];
            while self.accept(Token::Comma) {
                targets.push(self.suffixed_expr()?);
            }
            self.check(Token::Assign)?;
            let exprs = self.expr_list()?;
            if targets
                .iter()
                .any(|t| !matches!(t, Expr::Name { .. } | Expr::Index { .. }))
            {
                return Err(self.error("syntax error near '='"));
            }
            return Ok(Stat::Assign { targets, exprs });
        }
        if matches!(first, Expr::Call { .. } | Expr::Method { .. }) {
            Ok(Stat::Call(first))
        } else {
            Err(self.error(format!("syntax error near {}", self.peek().describe())))
        }
    }

    fn func_body(&mut self, line: u32, is_method: bool) -> PResult<FuncBody> {
        self.enter()?;
        let mut params = Vec::new();
        if is_method {
            params.push("self".to_string());
        }
        let mut vararg = false;
        self.check(Token::LParen)?;
        if *self.peek() != Token::RParen {
            loop {
                match self.peek() {
                    Token::Name(_) => params.push(self.name()?),
                    Token::Ellipsis => {
                        self.advance();
                        vararg = true;
                        break;
                    }
                    other => {
                        return Err(self.error(format!(
                            "<name> expected near {}",
                            other.describe()
                        )));
                    }
                }
                if !self.accept(Token::Comma) {
                    break;
                }
            }
        }
        self.check(Token::RParen)?;
        let body = self.block()?;
        self.check(Token::End)?;
        self.leave();
        Ok(FuncBody {
            params,
            vararg,
            body,
            line,
        })
    }

    // ==================== Expressions ====================

    fn expr_list(&mut self) -> PResult<Vec<Expr>> {
        let mut exprs = vec![self.expr()?];
        while self.accept(Token::Comma) {
            exprs.push(self.expr()?);
        }
        Ok(exprs)
    }

    fn expr(&mut self) -> PResult<Expr> {
        self.sub_expr(0)
    }

    fn sub_expr(&mut self, limit: u8) -> PResult<Expr> {
        self.enter()?;
        let mut lhs = match unary_op(self.peek()) {
            Some(op) => {
                self.advance();
                let operand = self.sub_expr(UNARY_PRIORITY)?;
                Expr::Unary {
                    op,
                    operand: Box::new(operand),
                }
            }
            None => self.simple_expr()?,
        };
        while let Some(op) = binary_op(self.peek()) {
            let (left, right) = op.priority();
            if left <= limit {
                break;
            }
            self.advance();
            let rhs = self.sub_expr(right)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.leave();
        Ok(lhs)
    }

    fn simple_expr(&mut self) -> PResult<Expr> {
        let expr = match self.peek() {
            Token::Int(i) => Expr::Int(*i),
            Token::Float(f) => Expr::Float(*f),
            Token::Str(s) => Expr::Str(s.clone()),
            Token::Nil => Expr::Nil,
            Token::True => Expr::True,
            Token::False => Expr::False,
            Token::Ellipsis => Expr::Vararg,
            Token::LBrace => return self.table(),
            Token::Function => {
                let line = self.line();
                self.advance();
                return Ok(Expr::Function(Box::new(self.func_body(line, false)?)));
            }
            _ => return self.suffixed_expr(),
        };
        self.advance();
        Ok(expr)
    }

    fn primary_expr(&mut self) -> PResult<Expr> {
        let line = self.line();
        match self.peek() {
            Token::Name(_) => Ok(Expr::Name {
                name: self.name()?,
                line,
            }),
            Token::LParen => {
                self.advance();
                let inner = self.expr()?;
                self.check(Token::RParen)?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            other => Err(self.error(format!("unexpected symbol near {}", other.describe()))),
        }
    }

    fn suffixed_expr(&mut self) -> PResult<Expr> {
        let mut expr = self.primary_expr()?;
        loop {
            let line = self.line();
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let key = self.name()?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        key: Box::new(Expr::Str(key)),
                        line,
                    };
                }
                Token::LBracket => {
                    self.advance();
                    let key = self.expr()?;
                    self.check(Token::RBracket)?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        key: Box::new(key),
                        line,
                    };
                }
                Token::Colon => {
                    self.advance();
                    let method = self.name()?;
                    let args = self.call_args()?;
                    expr = Expr::Method {
                        object: Box::new(expr),
                        method,
                        args,
                        line,
                    };
                }
                Token::LParen | Token::Str(_) | Token::LBrace => {
                    let args = self.call_args()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        line,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn call_args(&mut self) -> PResult<Vec<Expr>> {
        match self.peek() {
            Token::Str(s) => {
                let arg = Expr::Str(s.clone());
                self.advance();
                Ok(vec![arg])
            }
            Token::LBrace => Ok(vec![self.table()?]),
            Token::LParen => {
                self.advance();
                if self.accept(Token::RParen) {
                    return Ok(Vec::new());
                }
                let args = self.expr_list()?;
                self.check(Token::RParen)?;
                Ok(args)
            }
            other => Err(self.error(format!(
                "function arguments expected near {}",
                other.describe()
            ))),
        }
    }

    fn table(&mut self) -> PResult<Expr> {
        self.enter()?;
        self.check(Token::LBrace)?;
        let mut fields = Vec::new();
        while *self.peek() != Token::RBrace {
            let named = matches!(self.peek(), Token::Name(_)) && *self.peek_at(1) == Token::Assign;
            let field = if named {
                let key = self.name()?;
                self.advance();
                Field::Named {
                    key,
                    value: self.expr()?,
                }
            } else if self.accept(Token::LBracket) {
                let key = self.expr()?;
                self.check(Token::RBracket)?;
                self.check(Token::Assign)?;
                Field::Keyed {
                    key,
                    value: self.expr()?,
                }
            } else {
                Field::Positional(self.expr()?)
            };
            fields.push(field);
            if !self.accept(Token::Comma) && !self.accept(Token::Semi) {
                break;
            }
        }
        self.check(Token::RBrace)?;
        self.leave();
        Ok(Expr::Table(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Block {
        parse_chunk(src.as_bytes(), 200).unwrap()
    }

    #[test]
    fn test_local_and_call() {
        let block = parse("local o = os\no.execute('ls')");
        assert_eq!(block.stats.len(), 2);
        assert!(matches!(&block.stats[0], Stat::Local { names, line: 1, .. } if names == &["o"]));
        match &block.stats[1] {
            Stat::Call(Expr::Call { callee, line, .. }) => {
                assert_eq!(*line, 2);
                assert!(matches!(callee.as_ref(), Expr::Index { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_operator_precedence() {
        let block = parse("return 1 + 2 * 3 .. 'x' .. 'y'");
        let ret = block.ret.unwrap();
        // Concat binds looser than +, and is right-associative.
        match &ret.exprs[0] {
            Expr::Binary {
                op: BinOp::Concat,
                lhs,
                rhs,
            } => {
                assert!(matches!(lhs.as_ref(), Expr::Binary { op: BinOp::Add, .. }));
                assert!(matches!(rhs.as_ref(), Expr::Binary { op: BinOp::Concat, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }

        let ret = parse("return -x ^ 2").ret.unwrap();
        assert!(matches!(&ret.exprs[0], Expr::Unary { op: UnOp::Neg, operand } if matches!(operand.as_ref(), Expr::Binary { op: BinOp::Pow, .. })));
    }

    #[test]
    fn test_descriptor_shape() {
        let block = parse(
            r#"
local function run(args) return args.x end
return {
  name = "echo",
  parameters = { { name = "x", type = "string"; required = true } },
  ["run"] = run,
}
"#,
        );
        assert!(matches!(&block.stats[0], Stat::LocalFunction { name, .. } if name == "run"));
        let ret = block.ret.unwrap();
        assert_eq!(ret.line, 3);
        match &ret.exprs[0] {
            Expr::Table(fields) => {
                assert_eq!(fields.len(), 3);
                assert!(matches!(&fields[2], Field::Keyed { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_control_flow_statements() {
        let block = parse(
            r#"
for i = 1, 10, 2 do if i > 3 then break elseif i then goto done else end end
for k, v in pairs(t) do end
while true do repeat local z <const> = 1 until z end
::done::
function a.b:c(...) return ... end
x, y.z = 1, 2
"#,
        );
        assert_eq!(block.stats.len(), 6);
        assert!(matches!(&block.stats[4], Stat::Function { name, func } if name.method.as_deref() == Some("c") && func.params == vec!["self"] && func.vararg));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse_chunk(b"local = 1", 200).is_err());
        assert!(parse_chunk(b"x", 200).is_err());
        assert!(parse_chunk(b"f() = 1", 200).is_err());
        assert!(parse_chunk(b"return 1 x = 2", 200).is_err());
        let err = parse_chunk(b"\n\nif x then", 200).unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_depth_limit() {
        let deep = format!("return {}1{}", "(".repeat(500), ")".repeat(500));
        let err = parse_chunk(deep.as_bytes(), 200).unwrap_err();
        assert!(err.message.contains("nesting"));

        let tables = format!("return {}{}", "{".repeat(300), "}".repeat(300));
        assert!(parse_chunk(tables.as_bytes(), 200).is_err());
        assert!(parse_chunk(tables.as_bytes(), 1000).is_ok());
    }
}
