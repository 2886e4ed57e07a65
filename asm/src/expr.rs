use tracing::trace;

use crate::{
    lexer::{self, BinaryOp, OpKind, Operator, Token, TokenKind, UnaryOp},
    symtab::Symtab,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExprError {
    #[error("syntax error: {msg}")]
    Syntax { msg: String, remainder: String },

    #[error("unterminated string: `\"{partial}`")]
    UnterminatedString { partial: String },

    #[error("undefined symbol: \"{0}\"")]
    UndefinedSymbol(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("negative shift count: {0}")]
    NegativeShift(i32),

    #[error("value requested before evaluation")]
    NotEvaluated,
}

impl ExprError {
    /// Only a missing symbol can be fixed by the caller and retried.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::UndefinedSymbol(_))
    }

    fn syntax<S: Into<String>>(msg: S, remainder: &str) -> Self {
        Self::Syntax {
            msg: msg.into(),
            remainder: remainder.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Number,
    String(String),
    Identifier(String),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
}

/// An expression tree. Every node owns its children outright.
///
/// Evaluation results are cached in the nodes themselves, so a tree that
/// failed on a missing symbol can be evaluated again later and only the
/// unresolved parts are revisited.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    kind: NodeKind,
    value: i32,
    evaluated: bool,
}

enum Pending {
    Paren,
    Op(Operator),
}

impl Node {
    #[inline]
    pub fn number(value: i32) -> Self {
        Self {
            kind: NodeKind::Number,
            value,
            evaluated: true,
        }
    }

    #[inline]
    pub fn string(text: String) -> Self {
        let value = text.bytes().next().map(i32::from).unwrap_or(0);
        Self {
            kind: NodeKind::String(text),
            value,
            evaluated: true,
        }
    }

    #[inline]
    pub fn identifier(name: String) -> Self {
        Self {
            kind: NodeKind::Identifier(name),
            value: 0,
            evaluated: false,
        }
    }

    #[inline]
    fn unary(op: UnaryOp, child: Node) -> Self {
        Self {
            kind: NodeKind::Unary(op, Box::new(child)),
            value: 0,
            evaluated: false,
        }
    }

    #[inline]
    fn binary(op: BinaryOp, lhs: Node, rhs: Node) -> Self {
        Self {
            kind: NodeKind::Binary(op, Box::new(lhs), Box::new(rhs)),
            value: 0,
            evaluated: false,
        }
    }

    #[inline]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    #[inline]
    pub fn is_evaluated(&self) -> bool {
        self.evaluated
    }

    /// The text of a string literal leaf.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::String(text) => Some(text),
            _ => None,
        }
    }

    /// Parses an infix expression from the front of `text`.
    ///
    /// Parsing stops at the end of the text or at an expression terminator,
    /// and whatever follows is handed back alongside the tree.
    pub fn parse(text: &str) -> Result<(Self, &str), ExprError> {
        let mut operands = Vec::new();
        let mut operators = Vec::new();
        let mut prev = TokenKind::Nil;
        let mut rest = text;

        loop {
            let (token, remainder) = lexer::next_token(rest, prev)?;
            prev = token.kind();
            match token {
                Token::Nil => {
                    rest = remainder;
                    break;
                }

                Token::Number(value) => operands.push(Self::number(value)),

                Token::String(text) => operands.push(Self::string(text)),

                Token::Identifier(name) => operands.push(Self::identifier(name)),

                Token::ParenOpen => operators.push(Pending::Paren),

                Token::ParenClose => loop {
                    match operators.pop() {
                        Some(Pending::Paren) => break,
                        Some(Pending::Op(op)) => Self::reduce(&mut operands, op, rest)?,
                        None => return Err(ExprError::syntax("mismatched parentheses", rest)),
                    }
                },

                Token::Operator(op) => {
                    while let Some(&Pending::Op(top)) = operators.last() {
                        if !top.binds_before(op) {
                            break;
                        }
                        operators.pop();
                        Self::reduce(&mut operands, top, rest)?;
                    }
                    operators.push(Pending::Op(op));
                }
            }
            rest = remainder;
        }

        while let Some(pending) = operators.pop() {
            match pending {
                Pending::Paren => return Err(ExprError::syntax("mismatched parentheses", rest)),
                Pending::Op(op) => Self::reduce(&mut operands, op, rest)?,
            }
        }

        match (operands.pop(), operands.is_empty()) {
            (Some(root), true) => Ok((root, rest)),
            (None, _) => Err(ExprError::syntax("expected an expression", rest)),
            (Some(_), false) => Err(ExprError::syntax("malformed expression", rest)),
        }
    }

    fn reduce(operands: &mut Vec<Node>, op: Operator, rest: &str) -> Result<(), ExprError> {
        let too_few = || ExprError::syntax(format!("too few operands for \"{op}\""), rest);
        let node = match op.kind() {
            OpKind::Unary(op) => {
                let child = operands.pop().ok_or_else(too_few)?;
                Self::unary(op, child)
            }
            OpKind::Binary(op) => {
                let rhs = operands.pop().ok_or_else(too_few)?;
                let lhs = operands.pop().ok_or_else(too_few)?;
                Self::binary(op, lhs, rhs)
            }
        };
        operands.push(node);
        Ok(())
    }

    /// Resolves the tree against `symtab`, bottom-up.
    ///
    /// Nodes that already hold a value are not recomputed. On a missing
    /// symbol the failing subtree and every node above it stay unevaluated
    /// so a later call picks up from there.
    pub fn eval(&mut self, symtab: &Symtab) -> Result<i32, ExprError> {
        if self.evaluated {
            return Ok(self.value);
        }

        let value = match &mut self.kind {
            NodeKind::Number | NodeKind::String(_) => self.value,

            NodeKind::Identifier(name) => match symtab.get(name) {
                Some(value) => value,
                None => return Err(ExprError::UndefinedSymbol(name.clone())),
            },

            NodeKind::Unary(op, child) => apply_unary(*op, child.eval(symtab)?),

            NodeKind::Binary(op, lhs, rhs) => {
                let lhs = lhs.eval(symtab)?;
                let rhs = rhs.eval(symtab)?;
                apply_binary(*op, lhs, rhs)?
            }
        };

        trace!(kind = ?self.kind, value, "resolved expression");
        self.value = value;
        self.evaluated = true;
        Ok(value)
    }

    #[inline]
    pub fn value(&self) -> Result<i32, ExprError> {
        if self.evaluated {
            Ok(self.value)
        } else {
            Err(ExprError::NotEvaluated)
        }
    }

    /// Names of every identifier referenced in the tree, left to right.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_identifiers(&mut names);
        names
    }

    fn collect_identifiers<'a>(&'a self, names: &mut Vec<&'a str>) {
        match &self.kind {
            NodeKind::Number | NodeKind::String(_) => {}
            NodeKind::Identifier(name) => names.push(name),
            NodeKind::Unary(_, child) => child.collect_identifiers(names),
            NodeKind::Binary(_, lhs, rhs) => {
                lhs.collect_identifiers(names);
                rhs.collect_identifiers(names);
            }
        }
    }
}

fn apply_unary(op: UnaryOp, value: i32) -> i32 {
    match op {
        UnaryOp::Neg => value.wrapping_neg(),
        UnaryOp::Pos => value,
        UnaryOp::LowByte => value & 0xFF,
        UnaryOp::HighByte => (value >> 8) & 0xFF,
    }
}

fn apply_binary(op: BinaryOp, lhs: i32, rhs: i32) -> Result<i32, ExprError> {
    Ok(match op {
        BinaryOp::Mul => lhs.wrapping_mul(rhs),
        BinaryOp::Div => {
            if rhs == 0 {
                return Err(ExprError::DivisionByZero);
            }
            lhs.wrapping_div(rhs)
        }
        BinaryOp::Add => lhs.wrapping_add(rhs),
        BinaryOp::Sub => lhs.wrapping_sub(rhs),
        // Shifting out every bit leaves zero, or the sign for `>>`
        BinaryOp::ShiftLeft => lhs.checked_shl(shift_count(rhs)?).unwrap_or(0),
        BinaryOp::ShiftRight => lhs
            .checked_shr(shift_count(rhs)?)
            .unwrap_or(if lhs < 0 { -1 } else { 0 }),
        BinaryOp::And => lhs & rhs,
        BinaryOp::Or => lhs | rhs,
    })
}

#[inline]
fn shift_count(rhs: i32) -> Result<u32, ExprError> {
    u32::try_from(rhs).map_err(|_| ExprError::NegativeShift(rhs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(text: &str) -> i32 {
        let (mut node, rest) = Node::parse(text).unwrap();
        assert_eq!("", rest);
        node.eval(&Symtab::new()).unwrap()
    }

    #[test]
    fn numbers() {
        assert_eq!(1234, eval("1234"));
        assert_eq!(4660, eval("0x1234"));
        assert_eq!(4660, eval("$1234"));
    }

    #[test]
    fn malformed_hex() {
        let err = Node::parse("0xw").unwrap_err();
        assert!(matches!(err, ExprError::Syntax { remainder, .. } if remainder == "w"));
    }

    #[test]
    fn root_operator() {
        let (node, rest) = Node::parse("1+2").unwrap();
        assert!(matches!(node.kind(), NodeKind::Binary(BinaryOp::Add, _, _)));
        assert_eq!("", rest);
    }

    #[test]
    fn precedence() {
        assert_eq!(21, eval("4*3+9"));
        assert_eq!(21, eval("9+4*3"));
        assert_eq!(48, eval("4*(3+9)"));
        assert_eq!(3, eval("1|2&6"));
        assert_eq!(32, eval("1<<2+3"));
    }

    #[test]
    fn associativity() {
        assert_eq!(3, eval("1+2"));
        assert_eq!(6, eval("1+2+3"));
        assert_eq!(2, eval("3-1"));
        assert_eq!(0, eval("4-2-2"));
        assert_eq!(3, eval("4-(2-1)"));
        assert_eq!(2, eval("16/4/2"));
    }

    #[test]
    fn unary() {
        assert_eq!(-4, eval("-4"));
        assert_eq!(-4, eval("- 4"));
        assert_eq!(4, eval("--4"));
        assert_eq!(-6, eval("-(2*3)"));
        assert_eq!(-6, eval("2*-3"));
        assert_eq!(2, eval("+2"));
        assert_eq!(0x34, eval("<$1234"));
        assert_eq!(0x12, eval(">$1234"));
        assert_eq!(0x13, eval(">$1234+1"));
    }

    #[test]
    fn whitespace() {
        assert_eq!(14, eval(" 2 * ( 3 + 4 ) "));
    }

    #[test]
    fn strings() {
        let (mut node, _) = Node::parse("\"A\"").unwrap();
        assert!(node.is_evaluated());
        assert_eq!(Some("A"), node.as_str());
        assert_eq!(Ok(65), node.eval(&Symtab::new()));
    }

    #[test]
    fn stops_at_terminator() {
        let (mut node, rest) = Node::parse("1+2, 3").unwrap();
        assert_eq!(", 3", rest);
        assert_eq!(Ok(3), node.eval(&Symtab::new()));

        let (_, rest) = Node::parse("label ; comment").unwrap();
        assert_eq!("; comment", rest);
    }

    #[test]
    fn mismatched_parens() {
        assert!(matches!(Node::parse("(1+2"), Err(ExprError::Syntax { .. })));
        assert!(matches!(Node::parse("1+2)"), Err(ExprError::Syntax { .. })));
    }

    #[test]
    fn too_few_operands() {
        let err = Node::parse("1+").unwrap_err();
        assert!(matches!(err, ExprError::Syntax { msg, .. } if msg.contains("too few")));
        assert!(matches!(Node::parse("*4"), Err(ExprError::Syntax { .. })));
    }

    #[test]
    fn malformed() {
        assert!(matches!(Node::parse("1 2"), Err(ExprError::Syntax { .. })));
        assert!(matches!(Node::parse(""), Err(ExprError::Syntax { .. })));
    }

    #[test]
    fn unterminated_string() {
        assert!(matches!(
            Node::parse("\"abc"),
            Err(ExprError::UnterminatedString { partial }) if partial == "abc"
        ));
    }

    #[test]
    fn division_by_zero() {
        let (mut node, _) = Node::parse("1/(2-2)").unwrap();
        assert_eq!(Err(ExprError::DivisionByZero), node.eval(&Symtab::new()));
        assert!(!ExprError::DivisionByZero.is_recoverable());
    }

    #[test]
    fn shifts() {
        assert_eq!(32, eval("1<<5"));
        assert_eq!(4, eval("256>>6"));
        assert_eq!(0, eval("1<<32"));
        assert_eq!(0, eval("256>>40"));
        assert_eq!(-1, eval("-256>>40"));
        assert_eq!(-128, eval("-256>>1"));
        assert_eq!(i32::MIN, eval("1<<31"));
    }

    #[test]
    fn negative_shift() {
        let (mut node, _) = Node::parse("1<<-1").unwrap();
        let err = node.eval(&Symtab::new()).unwrap_err();
        assert_eq!(ExprError::NegativeShift(-1), err);
        assert!(!err.is_recoverable());

        let (mut node, _) = Node::parse("8>>(0-2)").unwrap();
        assert_eq!(Err(ExprError::NegativeShift(-2)), node.eval(&Symtab::new()));
    }

    #[test]
    fn value_before_eval() {
        let (node, _) = Node::parse("1+2").unwrap();
        assert_eq!(Err(ExprError::NotEvaluated), node.value());
    }

    #[test]
    fn deferred_binding() {
        let mut symtab = Symtab::new();
        let (mut node, _) = Node::parse("1+four").unwrap();

        let err = node.eval(&symtab).unwrap_err();
        assert_eq!(ExprError::UndefinedSymbol("four".into()), err);
        assert!(err.is_recoverable());
        assert!(!node.is_evaluated());
        match node.kind() {
            NodeKind::Binary(BinaryOp::Add, lhs, rhs) => {
                assert!(lhs.is_evaluated());
                assert!(!rhs.is_evaluated());
            }
            kind => panic!("unexpected root {kind:?}"),
        }

        symtab.insert("four", 4);
        assert_eq!(Ok(5), node.eval(&symtab));
        assert_eq!(Ok(5), node.value());
    }

    #[test]
    fn resolved_values_are_kept() {
        let mut symtab = Symtab::new();
        symtab.insert("a", 1);
        let (mut node, _) = Node::parse("a+b").unwrap();
        assert!(node.eval(&symtab).is_err());

        // the cached value of "a" survives a later rebinding
        let mut symtab = Symtab::new();
        symtab.insert("a", 100);
        symtab.insert("b", 2);
        assert_eq!(Ok(3), node.eval(&symtab));
    }

    #[test]
    fn identifiers() {
        let (node, _) = Node::parse("lo + (hi << 8) - lo").unwrap();
        assert_eq!(vec!["lo", "hi", "lo"], node.identifiers());
    }
}
