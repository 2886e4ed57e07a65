//! A single-pass assembler for the MOS 6502.
//!
//! Source lines are read by the [`assembler::Assembler`], operands are
//! classified by [`operand`], expressions go through the shunting-yard
//! parser in [`expr`] and instructions are encoded by [`opcode`]. Operands
//! that refer forward are patched in by the [`linker`].

pub mod assembler;
pub mod expr;
pub mod fileman;
pub mod lexer;
pub mod linker;
pub mod opcode;
pub mod operand;
pub mod symtab;

pub use assembler::{Assembler, AssemblerError, SourceLoc};
pub use expr::{ExprError, Node};
pub use linker::{Image, LinkerError};
pub use opcode::{encode_instruction, EncodeError, Mnemonic};
pub use operand::{classify, AddressingMode, Operand, OperandError};
pub use symtab::Symtab;
