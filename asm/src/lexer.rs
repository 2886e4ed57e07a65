use std::fmt::{self, Display, Formatter};

use crate::expr::ExprError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Operator {
    Neg,
    Pos,
    LowByte,
    HighByte,
    Mul,
    Div,
    Add,
    Sub,
    ShiftLeft,
    ShiftRight,
    And,
    Or,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    LowByte,
    HighByte,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Add,
    Sub,
    ShiftLeft,
    ShiftRight,
    And,
    Or,
}

/// An operator split by arity, as it is stored in an expression tree.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpKind {
    Unary(UnaryOp),
    Binary(BinaryOp),
}

/// Static description of an operator: how it is written and how it groups.
///
/// Lower precedence numbers bind tighter.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OpEntry {
    pub symbol: &'static str,
    pub precedence: u8,
    pub arity: u8,
    pub left_assoc: bool,
}

impl OpEntry {
    const fn unary(symbol: &'static str) -> Self {
        Self {
            symbol,
            precedence: 1,
            arity: 1,
            left_assoc: false,
        }
    }

    const fn binary(symbol: &'static str, precedence: u8) -> Self {
        Self {
            symbol,
            precedence,
            arity: 2,
            left_assoc: true,
        }
    }
}

pub const OPERATORS: [Operator; 12] = [
    Operator::Neg,
    Operator::Pos,
    Operator::LowByte,
    Operator::HighByte,
    Operator::Mul,
    Operator::Div,
    Operator::Add,
    Operator::Sub,
    Operator::ShiftLeft,
    Operator::ShiftRight,
    Operator::And,
    Operator::Or,
];

impl Operator {
    pub const fn entry(self) -> OpEntry {
        match self {
            Self::Neg => OpEntry::unary("-"),
            Self::Pos => OpEntry::unary("+"),
            Self::LowByte => OpEntry::unary("<"),
            Self::HighByte => OpEntry::unary(">"),
            Self::Mul => OpEntry::binary("*", 2),
            Self::Div => OpEntry::binary("/", 2),
            Self::Add => OpEntry::binary("+", 3),
            Self::Sub => OpEntry::binary("-", 3),
            Self::ShiftLeft => OpEntry::binary("<<", 4),
            Self::ShiftRight => OpEntry::binary(">>", 4),
            Self::And => OpEntry::binary("&", 5),
            Self::Or => OpEntry::binary("|", 6),
        }
    }

    pub const fn kind(self) -> OpKind {
        match self {
            Self::Neg => OpKind::Unary(UnaryOp::Neg),
            Self::Pos => OpKind::Unary(UnaryOp::Pos),
            Self::LowByte => OpKind::Unary(UnaryOp::LowByte),
            Self::HighByte => OpKind::Unary(UnaryOp::HighByte),
            Self::Mul => OpKind::Binary(BinaryOp::Mul),
            Self::Div => OpKind::Binary(BinaryOp::Div),
            Self::Add => OpKind::Binary(BinaryOp::Add),
            Self::Sub => OpKind::Binary(BinaryOp::Sub),
            Self::ShiftLeft => OpKind::Binary(BinaryOp::ShiftLeft),
            Self::ShiftRight => OpKind::Binary(BinaryOp::ShiftRight),
            Self::And => OpKind::Binary(BinaryOp::And),
            Self::Or => OpKind::Binary(BinaryOp::Or),
        }
    }

    #[inline]
    pub fn is_unary(self) -> bool {
        matches!(self.kind(), OpKind::Unary(_))
    }

    /// Whether `self`, sitting on the operator stack, has to be reduced
    /// before `incoming` is pushed.
    #[inline]
    pub fn binds_before(self, incoming: Operator) -> bool {
        let top = self.entry();
        let incoming = incoming.entry();
        if top.left_assoc {
            top.precedence <= incoming.precedence
        } else {
            top.precedence < incoming.precedence
        }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entry().symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Nil,
    Number(i32),
    String(String),
    Identifier(String),
    Operator(Operator),
    ParenOpen,
    ParenClose,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Nil,
    Number,
    String,
    Identifier,
    Operator,
    ParenOpen,
    ParenClose,
}

impl Token {
    #[inline]
    pub fn kind(&self) -> TokenKind {
        match self {
            Self::Nil => TokenKind::Nil,
            Self::Number(_) => TokenKind::Number,
            Self::String(_) => TokenKind::String,
            Self::Identifier(_) => TokenKind::Identifier,
            Self::Operator(_) => TokenKind::Operator,
            Self::ParenOpen => TokenKind::ParenOpen,
            Self::ParenClose => TokenKind::ParenClose,
        }
    }
}

impl TokenKind {
    #[inline]
    pub fn can_precede_unary(self) -> bool {
        matches!(self, Self::Nil | Self::Operator | Self::ParenOpen)
    }
}

#[inline]
pub fn is_space(c: char) -> bool {
    c == ' ' || c == '\t'
}

#[inline]
pub fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

#[inline]
pub fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Reads one token from the front of `text`.
///
/// `prev` is the kind of the token read just before this one and decides
/// whether an operator symbol is read as unary or binary. Whitespace after
/// the token is consumed. An empty buffer, or one that starts with an
/// expression terminator (`,` or `;`), yields [`Token::Nil`] and is returned
/// untouched.
pub fn next_token(text: &str, prev: TokenKind) -> Result<(Token, &str), ExprError> {
    let text = text.trim_start_matches(is_space);
    let c = match text.chars().next() {
        None | Some(',' | ';') => return Ok((Token::Nil, text)),
        Some(c) => c,
    };

    let (token, rest) = match c {
        '0'..='9' | '$' => number(text)?,
        '-' if prev.can_precede_unary() && starts_number(&text[1..]) => number(text)?,
        '"' => string(text)?,
        '(' => (Token::ParenOpen, &text[1..]),
        ')' => (Token::ParenClose, &text[1..]),
        _ if is_identifier_start(c) => {
            let end = text.find(|c: char| !is_identifier_char(c)).unwrap_or(text.len());
            let (name, rest) = text.split_at(end);
            (Token::Identifier(name.to_string()), rest)
        }
        _ => operator(text, prev)?,
    };
    Ok((token, rest.trim_start_matches(is_space)))
}

#[inline]
fn starts_number(text: &str) -> bool {
    matches!(text.chars().next(), Some('0'..='9' | '$'))
}

fn number(text: &str) -> Result<(Token, &str), ExprError> {
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (radix, rest) = if let Some(rest) = rest.strip_prefix('$') {
        (16, rest)
    } else if let Some(rest) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        (16, rest)
    } else {
        (10, rest)
    };

    let end = rest.find(|c: char| !c.is_digit(radix)).unwrap_or(rest.len());
    let (digits, remainder) = rest.split_at(end);
    let kind = if radix == 16 { "hexadecimal" } else { "decimal" };
    if digits.is_empty() || remainder.starts_with(is_identifier_char) {
        return Err(ExprError::Syntax {
            msg: format!(
                "malformed {kind} number: `{}`",
                &text[..text.len() - remainder.len()]
            ),
            remainder: remainder.to_string(),
        });
    }

    let value = i64::from_str_radix(digits, radix)
        .ok()
        .map(|value| if negative { -value } else { value })
        .and_then(|value| i32::try_from(value).ok())
        .ok_or_else(|| ExprError::Syntax {
            msg: format!(
                "{kind} number out of range: `{}`",
                &text[..text.len() - remainder.len()]
            ),
            remainder: remainder.to_string(),
        })?;
    Ok((Token::Number(value), remainder))
}

fn string(text: &str) -> Result<(Token, &str), ExprError> {
    let mut value = String::new();
    let mut chars = text.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((Token::String(value), &text[i + 1..])),

            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 'r')) => value.push('\r'),
                Some((_, 't')) => value.push('\t'),
                Some((_, '0')) => value.push('\0'),
                Some((_, '\\')) => value.push('\\'),
                Some((_, '"')) => value.push('"'),
                Some((i, c)) => {
                    return Err(ExprError::Syntax {
                        msg: format!("unrecognized string escape: `\\{c}`"),
                        remainder: text[i + c.len_utf8()..].to_string(),
                    })
                }
                None => break,
            },

            _ => value.push(c),
        }
    }
    Err(ExprError::UnterminatedString { partial: value })
}

fn operator(text: &str, prev: TokenKind) -> Result<(Token, &str), ExprError> {
    let unary = prev.can_precede_unary();
    OPERATORS
        .iter()
        .copied()
        .filter(|op| text.starts_with(op.entry().symbol))
        .filter(|op| unary || !op.is_unary())
        .max_by_key(|op| (op.entry().symbol.len(), op.is_unary() == unary))
        .map(|op| (Token::Operator(op), &text[op.entry().symbol.len()..]))
        .ok_or_else(|| {
            let end = text
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(text.len());
            ExprError::Syntax {
                msg: format!("unrecognized input: `{}`", &text[..end]),
                remainder: text.to_string(),
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(text: &str) -> (Token, &str) {
        next_token(text, TokenKind::Nil).unwrap()
    }

    #[test]
    fn empty() {
        assert_eq!((Token::Nil, ""), token(""));
        assert_eq!((Token::Nil, ""), token("   "));
    }

    #[test]
    fn terminators() {
        assert_eq!((Token::Nil, ",X"), token(",X"));
        assert_eq!((Token::Nil, "; comment"), token("  ; comment"));
    }

    #[test]
    fn base10() {
        assert_eq!((Token::Number(1234), ""), token("1234"));
    }

    #[test]
    fn base16() {
        assert_eq!((Token::Number(0x1234), ""), token("0x1234"));
        assert_eq!((Token::Number(0x1234), ""), token("$1234"));
        assert_eq!((Token::Number(0xcafe), ""), token("$CaFe"));
    }

    #[test]
    fn malformed_hex() {
        let err = next_token("0xw", TokenKind::Nil).unwrap_err();
        assert!(matches!(err, ExprError::Syntax { remainder, .. } if remainder == "w"));
    }

    #[test]
    fn malformed_decimal() {
        let err = next_token("12ab", TokenKind::Nil).unwrap_err();
        assert!(matches!(err, ExprError::Syntax { remainder, .. } if remainder == "ab"));
    }

    #[test]
    fn number_out_of_range() {
        assert!(matches!(
            next_token("$100000000", TokenKind::Nil),
            Err(ExprError::Syntax { .. })
        ));
    }

    #[test]
    fn trailing_whitespace() {
        assert_eq!(
            (Token::Number(1234), "and some other stuff"),
            token("1234 and some other stuff")
        );
    }

    #[test]
    fn string() {
        assert_eq!(
            (Token::String("string".into()), "and some other stuff"),
            token("\"string\" and some other stuff")
        );
        assert_eq!((Token::String("0x1234".into()), ""), token("\"0x1234\""));
    }

    #[test]
    fn string_escape() {
        assert_eq!(
            (Token::String("a\"b\n".into()), ""),
            token(r#""a\"b\n""#)
        );
        assert!(matches!(
            next_token(r#""\q""#, TokenKind::Nil),
            Err(ExprError::Syntax { .. })
        ));
    }

    #[test]
    fn unterminated_string() {
        let err = next_token("\"abc", TokenKind::Nil).unwrap_err();
        assert_eq!(
            ExprError::UnterminatedString {
                partial: "abc".into()
            },
            err
        );
    }

    #[test]
    fn identifier() {
        assert_eq!((Token::Identifier("four_4".into()), "+1"), token("four_4+1"));
    }

    #[test]
    fn unary_minus() {
        assert_eq!(
            (Token::Operator(Operator::Neg), "and some other stuff"),
            token("- and some other stuff")
        );
        assert_eq!(
            (Token::Operator(Operator::Neg), "x"),
            next_token("-x", TokenKind::ParenOpen).unwrap()
        );
    }

    #[test]
    fn negative_literal() {
        assert_eq!((Token::Number(-4), ""), token("-4"));
        assert_eq!((Token::Number(-16), ""), token("-$10"));
    }

    #[test]
    fn binary_minus() {
        assert_eq!(
            (Token::Operator(Operator::Sub), "4"),
            next_token("-4", TokenKind::Identifier).unwrap()
        );
        assert_eq!(
            (Token::Operator(Operator::Sub), "1"),
            next_token("-1", TokenKind::Number).unwrap()
        );
    }

    #[test]
    fn longest_match() {
        assert_eq!(
            (Token::Operator(Operator::ShiftLeft), "2"),
            next_token("<<2", TokenKind::Number).unwrap()
        );
        assert_eq!(
            (Token::Operator(Operator::LowByte), "label"),
            next_token("<label", TokenKind::Operator).unwrap()
        );
    }

    #[test]
    fn unary_only_after_value() {
        let err = next_token("<label", TokenKind::Identifier).unwrap_err();
        assert!(matches!(err, ExprError::Syntax { remainder, .. } if remainder == "<label"));
    }

    #[test]
    fn unrecognized() {
        let err = next_token("@here", TokenKind::Nil).unwrap_err();
        assert!(matches!(err, ExprError::Syntax { msg, .. } if msg.contains('@')));
    }

    #[test]
    fn parens() {
        assert_eq!((Token::ParenOpen, "1)"), token("( 1)"));
        assert_eq!(
            (Token::ParenClose, ""),
            next_token(")", TokenKind::Number).unwrap()
        );
    }

    #[test]
    fn arity() {
        for op in OPERATORS {
            let arity = match op.kind() {
                OpKind::Unary(_) => 1,
                OpKind::Binary(_) => 2,
            };
            assert_eq!(arity, op.entry().arity, "{op:?}");
        }
        assert_eq!(OpKind::Unary(UnaryOp::HighByte), Operator::HighByte.kind());
        assert_eq!(OpKind::Binary(BinaryOp::Sub), Operator::Sub.kind());
    }

    #[test]
    fn binding() {
        assert!(Operator::Mul.binds_before(Operator::Add));
        assert!(Operator::Add.binds_before(Operator::Add));
        assert!(!Operator::Add.binds_before(Operator::Mul));
        assert!(!Operator::Neg.binds_before(Operator::Neg));
        assert!(Operator::Neg.binds_before(Operator::Mul));
    }
}
