use super::lexer::{parse_error, Lexer, Token, TokenKind};
use crate::errors::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Range,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    AndAnd,
    Or,
    OrOr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Na,
    Ident(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Arg>,
    },
    Dollar {
        object: Box<Expr>,
        name: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        single: bool,
    },
    Block(Vec<Expr>),
    If {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
}

/// Binding powers, loosest first
const BP_EQUALS: u8 = 1;
const BP_LEFT_ASSIGN: u8 = 2;
const BP_RIGHT_ASSIGN: u8 = 3;
const BP_OR: u8 = 4;
const BP_AND: u8 = 5;
const BP_NOT: u8 = 6;
const BP_COMPARE: u8 = 7;
const BP_ADD: u8 = 8;
const BP_MUL: u8 = 9;
const BP_RANGE: u8 = 10;
const BP_UNARY: u8 = 11;
const BP_POW: u8 = 12;
const BP_POSTFIX: u8 = 13;

/// Deepest expression tree the parser builds. Operator chains count one level
/// per operator since they nest on the left.
pub const MAX_NESTING: usize = 128;

/// Parse a whole program into its top-level expressions
pub fn parse_program(source: &str) -> Result<Vec<Expr>, BridgeError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    parser.program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map_or(&TokenKind::Eof, |t| &t.kind)
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        self.tokens
            .get(self.pos + offset)
            .map_or(&TokenKind::Eof, |t| &t.kind)
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn position(&self) -> (usize, usize) {
        self.tokens
            .get(self.pos)
            .map_or((1, 1), |t| (t.line, t.column))
    }

    fn unexpected(&self) -> BridgeError {
        let (line, column) = self.position();
        parse_error(
            line,
            column,
            &format!("unexpected {}", self.peek().describe()),
        )
    }

    fn nest(&mut self) -> Result<(), BridgeError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            let (line, column) = self.position();
            return Err(parse_error(line, column, "contextstack overflow"));
        }
        Ok(())
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), BridgeError> {
        if self.peek() == kind {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn skip_newlines(&mut self) {
        while *self.peek() == TokenKind::Newline {
            self.advance();
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn program(&mut self) -> Result<Vec<Expr>, BridgeError> {
        let mut exprs = Vec::new();
        self.skip_separators();
        while *self.peek() != TokenKind::Eof {
            exprs.push(self.expression(0)?);
            match self.peek() {
                TokenKind::Newline | TokenKind::Semicolon => self.skip_separators(),
                TokenKind::Eof => {}
                _ => return Err(self.unexpected()),
            }
        }
        Ok(exprs)
    }

    fn block(&mut self) -> Result<Expr, BridgeError> {
        let mut exprs = Vec::new();
        self.skip_separators();
        while *self.peek() != TokenKind::RBrace {
            exprs.push(self.expression(0)?);
            match self.peek() {
                TokenKind::Newline | TokenKind::Semicolon => self.skip_separators(),
                TokenKind::RBrace => {}
                _ => return Err(self.unexpected()),
            }
        }
        self.advance();
        Ok(Expr::Block(exprs))
    }

    fn expression(&mut self, min_bp: u8) -> Result<Expr, BridgeError> {
        let entered = self.depth;
        let result = self.nested_expression(min_bp);
        self.depth = entered;
        result
    }

    fn nested_expression(&mut self, min_bp: u8) -> Result<Expr, BridgeError> {
        self.nest()?;
        let mut lhs = self.prefix()?;

        loop {
            let token = self.peek().clone();

            if let Some(bp) = postfix_binding_power(&token) {
                if bp < min_bp {
                    break;
                }
                self.nest()?;
                lhs = self.postfix(lhs, &token)?;
                continue;
            }

            let Some((l_bp, r_bp)) = infix_binding_power(&token) else {
                break;
            };
            if l_bp < min_bp {
                break;
            }
            self.nest()?;
            self.advance();
            self.skip_newlines();
            let rhs = self.expression(r_bp)?;

            lhs = match token {
                TokenKind::LeftAssign | TokenKind::SuperAssign | TokenKind::Equals => {
                    Expr::Assign {
                        target: Box::new(lhs),
                        value: Box::new(rhs),
                    }
                }
                TokenKind::RightAssign => Expr::Assign {
                    target: Box::new(rhs),
                    value: Box::new(lhs),
                },
                other => Expr::Binary {
                    op: binary_op(&other).ok_or_else(|| self.unexpected())?,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            };
        }

        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, BridgeError> {
        let expr = match self.peek().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Expr::Number(n)
            }
            TokenKind::Inf => {
                self.advance();
                Expr::Number(f64::INFINITY)
            }
            TokenKind::NaN => {
                self.advance();
                Expr::Number(f64::NAN)
            }
            TokenKind::Str(s) => {
                self.advance();
                Expr::Str(s)
            }
            TokenKind::True => {
                self.advance();
                Expr::Bool(true)
            }
            TokenKind::False => {
                self.advance();
                Expr::Bool(false)
            }
            TokenKind::Null => {
                self.advance();
                Expr::Null
            }
            TokenKind::Na => {
                self.advance();
                Expr::Na
            }
            TokenKind::Ident(name) => {
                self.advance();
                Expr::Ident(name)
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression(0)?;
                self.expect(&TokenKind::RParen)?;
                inner
            }
            TokenKind::LBrace => {
                self.advance();
                self.block()?
            }
            TokenKind::If => self.if_expression()?,
            TokenKind::Minus | TokenKind::Plus | TokenKind::Bang => {
                let token = self.advance();
                let (op, bp) = match token {
                    TokenKind::Minus => (UnaryOp::Neg, BP_UNARY),
                    TokenKind::Plus => (UnaryOp::Plus, BP_UNARY),
                    _ => (UnaryOp::Not, BP_NOT),
                };
                let operand = self.expression(bp)?;
                Expr::Unary {
                    op,
                    operand: Box::new(operand),
                }
            }
            _ => return Err(self.unexpected()),
        };
        Ok(expr)
    }

    fn if_expression(&mut self) -> Result<Expr, BridgeError> {
        self.advance();
        self.expect(&TokenKind::LParen)?;
        let condition = self.expression(0)?;
        self.expect(&TokenKind::RParen)?;
        self.skip_newlines();
        let then = self.expression(0)?;

        // `else` may follow on a later line only inside braces; at top level
        // the newline has already ended the statement
        let mut lookahead = 0;
        while *self.peek_at(lookahead) == TokenKind::Newline {
            lookahead += 1;
        }
        let inside_braces = self.tokens[..self.pos]
            .iter()
            .fold(0i32, |depth, t| match t.kind {
                TokenKind::LBrace => depth + 1,
                TokenKind::RBrace => depth - 1,
                _ => depth,
            })
            > 0;
        let otherwise = if *self.peek_at(lookahead) == TokenKind::Else
            && (lookahead == 0 || inside_braces)
        {
            self.pos += lookahead + 1;
            self.skip_newlines();
            Some(Box::new(self.expression(0)?))
        } else {
            None
        };

        Ok(Expr::If {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise,
        })
    }

    fn postfix(&mut self, lhs: Expr, token: &TokenKind) -> Result<Expr, BridgeError> {
        self.advance();
        let expr = match token {
            TokenKind::LParen => Expr::Call {
                callee: Box::new(lhs),
                args: self.arguments()?,
            },
            TokenKind::Dollar => {
                let name = match self.advance() {
                    TokenKind::Ident(name) | TokenKind::Str(name) => name,
                    _ => {
                        self.pos -= 1;
                        return Err(self.unexpected());
                    }
                };
                Expr::Dollar {
                    object: Box::new(lhs),
                    name,
                }
            }
            TokenKind::LBracket => {
                let index = self.expression(0)?;
                self.expect(&TokenKind::RBracket)?;
                Expr::Index {
                    object: Box::new(lhs),
                    index: Box::new(index),
                    single: false,
                }
            }
            _ => {
                let index = self.expression(0)?;
                self.expect(&TokenKind::RBracket)?;
                self.expect(&TokenKind::RBracket)?;
                Expr::Index {
                    object: Box::new(lhs),
                    index: Box::new(index),
                    single: true,
                }
            }
        };
        Ok(expr)
    }

    fn arguments(&mut self) -> Result<Vec<Arg>, BridgeError> {
        let mut args = Vec::new();
        if *self.peek() == TokenKind::RParen {
            self.advance();
            return Ok(args);
        }
        loop {
            let name = match (self.peek().clone(), self.peek_at(1)) {
                (TokenKind::Ident(name) | TokenKind::Str(name), TokenKind::Equals) => {
                    self.pos += 2;
                    Some(name)
                }
                _ => None,
            };
            // Argument values bind tighter than `=`
            let value = self.expression(BP_LEFT_ASSIGN)?;
            args.push(Arg { name, value });
            match self.advance() {
                TokenKind::Comma => {}
                TokenKind::RParen => return Ok(args),
                _ => {
                    self.pos -= 1;
                    return Err(self.unexpected());
                }
            }
        }
    }
}

fn postfix_binding_power(token: &TokenKind) -> Option<u8> {
    match token {
        TokenKind::LParen | TokenKind::Dollar | TokenKind::LBracket | TokenKind::DoubleLBracket => {
            Some(BP_POSTFIX)
        }
        _ => None,
    }
}

/// (left, right) binding powers; right-associative operators repeat the left
fn infix_binding_power(token: &TokenKind) -> Option<(u8, u8)> {
    let bp = match token {
        TokenKind::Equals => (BP_EQUALS, BP_EQUALS),
        TokenKind::LeftAssign | TokenKind::SuperAssign => (BP_LEFT_ASSIGN, BP_LEFT_ASSIGN),
        TokenKind::RightAssign => (BP_RIGHT_ASSIGN, BP_RIGHT_ASSIGN + 1),
        TokenKind::Pipe | TokenKind::PipePipe => (BP_OR, BP_OR + 1),
        TokenKind::Amp | TokenKind::AmpAmp => (BP_AND, BP_AND + 1),
        TokenKind::EqualEqual
        | TokenKind::NotEqual
        | TokenKind::Less
        | TokenKind::LessEqual
        | TokenKind::Greater
        | TokenKind::GreaterEqual => (BP_COMPARE, BP_COMPARE + 1),
        TokenKind::Plus | TokenKind::Minus => (BP_ADD, BP_ADD + 1),
        TokenKind::Star | TokenKind::Slash => (BP_MUL, BP_MUL + 1),
        TokenKind::Colon => (BP_RANGE, BP_RANGE + 1),
        TokenKind::Caret => (BP_POW, BP_POW),
        _ => return None,
    };
    Some(bp)
}

fn binary_op(token: &TokenKind) -> Option<BinaryOp> {
    let op = match token {
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Caret => BinaryOp::Pow,
        TokenKind::Colon => BinaryOp::Range,
        TokenKind::EqualEqual => BinaryOp::Eq,
        TokenKind::NotEqual => BinaryOp::Ne,
        TokenKind::Less => BinaryOp::Lt,
        TokenKind::LessEqual => BinaryOp::Le,
        TokenKind::Greater => BinaryOp::Gt,
        TokenKind::GreaterEqual => BinaryOp::Ge,
        TokenKind::Amp => BinaryOp::And,
        TokenKind::AmpAmp => BinaryOp::AndAnd,
        TokenKind::Pipe => BinaryOp::Or,
        TokenKind::PipePipe => BinaryOp::OrOr,
        _ => return None,
    };
    Some(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(source: &str) -> Expr {
        let mut exprs = parse_program(source).unwrap();
        assert_eq!(exprs.len(), 1, "expected a single expression");
        exprs.remove(0)
    }

    #[test]
    fn test_unary_minus_binds_tighter_than_range() {
        let expr = parse_one("-1:3");
        assert!(matches!(
            expr,
            Expr::Binary {
                op: BinaryOp::Range,
                ..
            }
        ));
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        let expr = parse_one("-2^2");
        assert!(matches!(
            expr,
            Expr::Unary {
                op: UnaryOp::Neg,
                ..
            }
        ));
    }

    #[test]
    fn test_right_assign_swaps_sides() {
        assert_eq!(
            parse_one("1 -> x"),
            Expr::Assign {
                target: Box::new(Expr::Ident("x".into())),
                value: Box::new(Expr::Number(1.0)),
            }
        );
    }

    #[test]
    fn test_named_call_arguments() {
        let Expr::Call { args, .. } = parse_one(r#"paste(Y$firstName, Y$lastName, sep=" ")"#) else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 3);
        assert_eq!(args[2].name.as_deref(), Some("sep"));
        assert!(matches!(args[0].value, Expr::Dollar { ref name, .. } if name == "firstName"));
    }

    #[test]
    fn test_separators_split_statements() {
        let exprs =
            parse_program("sen = paste('My name is',Name,'!\\n',sep=''); cat(sen);\n\n").unwrap();
        assert_eq!(exprs.len(), 2);
    }

    #[test]
    fn test_else_on_next_line_inside_braces() {
        let expr = parse_one("{ if (TRUE) 1\n else 2 }");
        let Expr::Block(body) = expr else {
            panic!("expected block");
        };
        assert!(matches!(body[0], Expr::If { otherwise: Some(_), .. }));
    }

    #[test]
    fn test_double_bracket_index() {
        assert!(matches!(
            parse_one("x[[2]]"),
            Expr::Index { single: true, .. }
        ));
    }

    #[test]
    fn test_parse_errors_carry_position() {
        let err = parse_program("cat(doesNotExist))").unwrap_err();
        let BridgeError::Parse(message) = err else {
            panic!("expected parse error");
        };
        assert_eq!(message, "<text>:1:18: unexpected ')'");
    }

    #[test]
    fn test_deep_nesting_is_parse_error() {
        let source = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
        let Err(BridgeError::Parse(message)) = parse_program(&source) else {
            panic!("expected parse error");
        };
        assert!(message.ends_with("contextstack overflow"), "{}", message);

        let chain = vec!["1"; 1000].join(" + ");
        assert!(matches!(parse_program(&chain), Err(BridgeError::Parse(_))));
        assert!(matches!(parse_program(&"-".repeat(1000)), Err(BridgeError::Parse(_))));

        let shallow = format!("{}1{}", "(".repeat(50), ")".repeat(50));
        assert_eq!(parse_one(&shallow), Expr::Number(1.0));
        assert!(parse_program(&vec!["1"; 50].join(" + ")).is_ok());
    }

    #[test]
    fn test_incomplete_expression_is_parse_error() {
        assert!(matches!(
            parse_program("x <- "),
            Err(BridgeError::Parse(_))
        ));
    }
}
