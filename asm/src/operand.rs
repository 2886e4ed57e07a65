use std::fmt::{self, Display, Formatter};

use crate::{
    expr::{ExprError, Node},
    lexer::{is_identifier_char, is_space},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AddressingMode {
    Accumulator,
    Absolute,
    AbsoluteXIndex,
    AbsoluteYIndex,
    Immediate,
    Implied,
    Indirect,
    XIndexedIndirect,
    IndirectYIndexed,
    Relative,
    Zeropage,
    ZeropageXIndexed,
    ZeropageYIndexed,
}

impl AddressingMode {
    #[inline]
    pub fn is_indirect(self) -> bool {
        matches!(
            self,
            Self::Indirect | Self::XIndexedIndirect | Self::IndirectYIndexed
        )
    }

    /// The modes an operand written in this mode may be encoded as,
    /// narrowest encoding first.
    pub fn candidates(self) -> &'static [AddressingMode] {
        match self {
            Self::Absolute => &[Self::Zeropage, Self::Absolute],
            Self::AbsoluteXIndex => &[Self::ZeropageXIndexed, Self::AbsoluteXIndex],
            Self::AbsoluteYIndex => &[Self::ZeropageYIndexed, Self::AbsoluteYIndex],
            Self::Implied => &[Self::Implied, Self::Accumulator],
            Self::Accumulator => &[Self::Accumulator],
            Self::Immediate => &[Self::Immediate],
            Self::Indirect => &[Self::Indirect],
            Self::XIndexedIndirect => &[Self::XIndexedIndirect],
            Self::IndirectYIndexed => &[Self::IndirectYIndexed],
            Self::Relative => &[Self::Relative],
            Self::Zeropage => &[Self::Zeropage],
            Self::ZeropageXIndexed => &[Self::ZeropageXIndexed],
            Self::ZeropageYIndexed => &[Self::ZeropageYIndexed],
        }
    }
}

impl Display for AddressingMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Accumulator => "accumulator",
                Self::Absolute => "absolute",
                Self::AbsoluteXIndex => "absolute,X",
                Self::AbsoluteYIndex => "absolute,Y",
                Self::Immediate => "immediate",
                Self::Implied => "implied",
                Self::Indirect => "indirect",
                Self::XIndexedIndirect => "(indirect,X)",
                Self::IndirectYIndexed => "(indirect),Y",
                Self::Relative => "relative",
                Self::Zeropage => "zeropage",
                Self::ZeropageXIndexed => "zeropage,X",
                Self::ZeropageYIndexed => "zeropage,Y",
            }
        )
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OperandError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("{0}")]
    Expr(#[from] ExprError),
}

#[inline]
fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

/// Splits an index register suffix (`,X` or `,Y`) off `text`.
fn index_suffix(text: &str) -> Option<(char, &str)> {
    for register in ['X', 'Y'] {
        if let Some(rest) = strip_prefix_ci(text, &format!(",{register}")) {
            if !rest.starts_with(is_identifier_char) {
                return Some((register, rest));
            }
        }
    }
    None
}

/// Works out the addressing mode from the shape of an operand.
///
/// Returns the mode, the text of the inner expression and whatever follows
/// the operand. Only syntax is considered here; narrowing an absolute
/// operand to zeropage happens once its value is known.
pub fn classify(text: &str) -> Result<(AddressingMode, &str, &str), OperandError> {
    let text = text.trim_matches(is_space);
    if text.is_empty() {
        return Ok((AddressingMode::Implied, "", text));
    }

    if let Some(rest) = text.strip_prefix('(') {
        let mut depth = 0usize;
        let end = rest
            .char_indices()
            .find(|&(_, c)| match c {
                '(' => {
                    depth += 1;
                    false
                }
                ')' if depth > 0 => {
                    depth -= 1;
                    false
                }
                ',' | ')' => depth == 0,
                _ => false,
            })
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let (inner, suffix) = rest.split_at(end);

        if let Some(rest) = strip_prefix_ci(suffix, ",X)") {
            return Ok((AddressingMode::XIndexedIndirect, inner, rest));
        }
        if let Some(rest) = strip_prefix_ci(suffix, "),Y") {
            return Ok((AddressingMode::IndirectYIndexed, inner, rest));
        }
        if let Some(rest) = suffix.strip_prefix(')') {
            return Ok((AddressingMode::Indirect, inner, rest));
        }
        return Err(OperandError::Syntax(format!(
            "incorrect indirect format: {text}"
        )));
    }

    if let Some(rest) = text.strip_prefix('#') {
        return Ok((AddressingMode::Immediate, rest, ""));
    }

    let end = text
        .find(|c: char| c == ',' || is_space(c))
        .unwrap_or(text.len());
    let (inner, suffix) = text.split_at(end);

    if inner.eq_ignore_ascii_case("a") && suffix.is_empty() {
        return Ok((AddressingMode::Accumulator, "", suffix));
    }

    match index_suffix(suffix) {
        Some(('X', rest)) => Ok((AddressingMode::AbsoluteXIndex, inner, rest)),
        Some((_, rest)) => Ok((AddressingMode::AbsoluteYIndex, inner, rest)),
        None if suffix.starts_with(',') => Err(OperandError::Syntax(format!(
            "incorrect index format: {text}"
        ))),
        None => Ok((AddressingMode::Absolute, inner, suffix.trim_start_matches(is_space))),
    }
}

/// A classified operand together with its parsed expression.
#[derive(Clone, Debug)]
pub struct Operand {
    pub mode: AddressingMode,
    pub expr: Option<Node>,
    pub immediate: bool,
    pub indirect: bool,
}

impl Operand {
    pub fn parse(text: &str) -> Result<(Self, &str), OperandError> {
        let (mode, inner, rest) = classify(text)?;
        let (expr, rest) = match mode {
            AddressingMode::Implied | AddressingMode::Accumulator => (None, rest),

            // The expression runs to the end of the operand, so anything it
            // leaves over is what follows the operand.
            AddressingMode::Immediate => {
                let (expr, rest) = Node::parse(inner)?;
                (Some(expr), rest)
            }

            _ => {
                let (expr, left) = Node::parse(inner)?;
                if !left.trim_matches(is_space).is_empty() {
                    return Err(OperandError::Syntax(format!(
                        "unexpected \"{left}\" in operand"
                    )));
                }
                (Some(expr), rest)
            }
        };

        Ok((
            Self {
                mode,
                expr,
                immediate: mode == AddressingMode::Immediate,
                indirect: mode.is_indirect(),
            },
            rest,
        ))
    }
}
