use std::{
    fmt::{self, Display, Formatter},
    io::{BufRead, BufReader},
    mem,
    path::Path,
};

use tracing::{debug, trace};

use crate::{
    expr::{ExprError, Node},
    fileman::{FileManager, FileSystem},
    lexer::{is_identifier_char, is_identifier_start, is_space},
    linker::{Link, Module},
    opcode::{EncodeError, Mnemonic},
    operand::{AddressingMode, Operand, OperandError},
    symtab::Symtab,
};

#[cfg(test)]
mod tests;

pub const DEFAULT_ORIGIN: u16 = 0xC000;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceLoc {
    pub line: usize,
    pub column: usize,
}

impl Display for SourceLoc {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(thiserror::Error, Debug)]
#[error("{0}")]
pub struct AssemblerError(String);

impl From<ExprError> for AssemblerError {
    fn from(e: ExprError) -> Self {
        Self(format!("{e}"))
    }
}

impl From<OperandError> for AssemblerError {
    fn from(e: OperandError) -> Self {
        Self(format!("{e}"))
    }
}

impl From<EncodeError> for AssemblerError {
    fn from(e: EncodeError) -> Self {
        Self(format!("{e}"))
    }
}

type Located<T> = Result<T, (SourceLoc, AssemblerError)>;

/// Renders a diagnostic as
///
/// ```text
/// In "/abs/path/prog.asm"
///
/// prog.asm:3:9:
/// message
/// ```
pub fn trace_error<M: Display>(path: Option<&Path>, loc: SourceLoc, msg: M) -> String {
    match path {
        Some(path) => {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy())
                .unwrap_or_default();
            format!("In \"{}\"\n\n{name}:{loc}:\n{msg}", path.display())
        }
        None => format!("{loc}: {msg}"),
    }
}

/// Everything up to the first `;` that is not inside a string.
fn strip_comment(text: &str) -> &str {
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => return &text[..i],
            _ => {}
        }
    }
    text
}

struct Line<'a> {
    number: usize,
    code: &'a str,
}

impl<'a> Line<'a> {
    /// Location of `rest`, which must be a suffix of the line's code.
    #[inline]
    fn loc(&self, rest: &str) -> SourceLoc {
        SourceLoc {
            line: self.number,
            column: self.code.len() - rest.len() + 1,
        }
    }
}

#[inline]
fn expect_end(loc: SourceLoc, rest: &str) -> Located<()> {
    let rest = rest.trim_matches(is_space);
    if rest.is_empty() {
        Ok(())
    } else {
        Err((loc, AssemblerError(format!("Unexpected \"{rest}\""))))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum DataWidth {
    Byte,
    Word,
}

/// Single-pass line assembler.
///
/// Operands that refer to symbols not yet defined get their space reserved
/// and are recorded as [`Link`]s for the linker to fill in.
pub struct Assembler<S> {
    file_manager: FileManager<S>,
    symtab: Symtab,
    data: Vec<u8>,
    links: Vec<Link>,
    origin: u16,
    pending: Vec<(String, SourceLoc)>,
}

impl<S: FileSystem> Assembler<S> {
    pub fn new(file_system: S) -> Self {
        Self {
            file_manager: FileManager::new(file_system),
            symtab: Symtab::new(),
            data: Vec::new(),
            links: Vec::new(),
            origin: DEFAULT_ORIGIN,
            pending: Vec::new(),
        }
    }

    /// Load address used until the source sets its own with `.ORG`.
    #[inline]
    pub fn set_origin(&mut self, origin: u16) {
        self.origin = origin;
    }

    pub fn assemble<C: AsRef<Path>, P: AsRef<Path>>(
        mut self,
        cwd: C,
        path: P,
    ) -> Result<Module<S>, AssemblerError> {
        let path = path.as_ref();
        let reader = match self.file_manager.reader(cwd, path) {
            Ok(Some(reader)) => reader,
            Ok(None) => {
                return Err(AssemblerError(format!(
                    "File not found: \"{}\"",
                    path.display()
                )))
            }
            Err(e) => {
                return Err(AssemblerError(format!(
                    "Failed to open \"{}\" for reading: {e}",
                    path.display()
                )))
            }
        };

        if let Err((loc, e)) = self.parse_all(BufReader::new(reader)) {
            return Err(AssemblerError(trace_error(
                self.file_manager.path(),
                loc,
                e,
            )));
        }

        debug!(
            origin = self.origin,
            len = self.data.len(),
            holes = self.links.len(),
            "assembled"
        );
        let Self {
            file_manager,
            symtab,
            data,
            links,
            origin,
            ..
        } = self;
        Ok(Module::new(file_manager, symtab, origin, data, links))
    }

    fn parse_all<B: BufRead>(&mut self, reader: B) -> Located<()> {
        let mut last = 0;
        for (index, text) in reader.lines().enumerate() {
            last = index + 1;
            let text = text.map_err(|e| {
                (
                    SourceLoc {
                        line: last,
                        column: 1,
                    },
                    AssemblerError(format!("Failed to read line: {e}")),
                )
            })?;
            self.parse_line(&Line {
                number: last,
                code: strip_comment(&text),
            })?;
        }

        // Labels at the very end name the address after the program
        trace!(line = last, "end of input");
        self.bind_pending(self.here())
    }

    #[inline]
    fn here(&self) -> i32 {
        self.origin as i32 + self.data.len() as i32
    }

    fn define(&mut self, name: String, loc: SourceLoc, value: i32) -> Located<()> {
        if self.symtab.contains(&name) {
            return Err((
                loc,
                AssemblerError(format!("Symbol already defined: \"{name}\"")),
            ));
        }
        debug!(%name, value, "defined symbol");
        self.symtab.insert(name, value);
        Ok(())
    }

    fn bind_pending(&mut self, value: i32) -> Located<()> {
        for (name, loc) in mem::take(&mut self.pending) {
            self.define(name, loc, value)?;
        }
        Ok(())
    }

    fn touch(&mut self, expr: &Node, loc: SourceLoc) {
        for name in expr.identifiers() {
            self.symtab.touch(name, loc);
        }
    }

    fn emit(&mut self, loc: SourceLoc, bytes: &[u8]) -> Located<()> {
        if self.here() + bytes.len() as i32 > 0x10000 {
            return Err((
                loc,
                AssemblerError("Program does not fit in 64K".to_string()),
            ));
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Evaluates an expression that has to be known right now.
    fn solve(&mut self, line: &Line, text: &str) -> Located<i32> {
        let loc = line.loc(text.trim_start_matches(is_space));
        let (mut expr, rest) = Node::parse(text).map_err(|e| (loc, e.into()))?;
        expect_end(line.loc(rest), rest)?;
        self.touch(&expr, loc);
        expr.eval(&self.symtab).map_err(|e| {
            (
                loc,
                AssemblerError(format!("Expression could not be solved: {e}")),
            )
        })
    }

    fn parse_line(&mut self, line: &Line) -> Located<()> {
        let mut rest = line.code;
        let mut labeled = false;

        if rest.starts_with(|c: char| !is_space(c)) {
            let end = rest
                .find(|c: char| !is_identifier_char(c))
                .unwrap_or(rest.len());
            let (name, after) = rest.split_at(end);
            if !name.starts_with(is_identifier_start) {
                return Err((
                    line.loc(rest),
                    AssemblerError(format!("Invalid label: \"{}\"", rest.trim_end())),
                ));
            }
            self.pending.push((name.to_string(), line.loc(rest)));
            labeled = true;
            rest = after.strip_prefix(':').unwrap_or(after);
        }

        let stmt = rest.trim_start_matches(is_space);
        if stmt.is_empty() {
            return Ok(());
        }
        let loc = line.loc(stmt);

        if let Some(text) = stmt.strip_prefix('=') {
            return self.constant(line, loc, labeled, text);
        }

        let end = stmt
            .char_indices()
            .skip(1)
            .find(|&(_, c)| !is_identifier_char(c))
            .map(|(i, _)| i)
            .unwrap_or(stmt.len());
        let (word, text) = stmt.split_at(end);

        if word.starts_with('.') {
            match word.to_ascii_uppercase().as_str() {
                ".EQU" => self.constant(line, loc, labeled, text),
                ".ORG" => self.org(line, text),
                ".BYTE" => self.data(line, text, DataWidth::Byte),
                ".WORD" => self.data(line, text, DataWidth::Word),
                _ => Err((loc, AssemblerError(format!("Unknown directive: \"{word}\"")))),
            }
        } else {
            self.instruction(line, loc, word, text)
        }
    }

    fn constant(&mut self, line: &Line, loc: SourceLoc, labeled: bool, text: &str) -> Located<()> {
        if !labeled {
            return Err((
                loc,
                AssemblerError("Constant definition without a name".to_string()),
            ));
        }
        let value = self.solve(line, text)?;
        self.bind_pending(value)
    }

    fn org(&mut self, line: &Line, text: &str) -> Located<()> {
        let loc = line.loc(text.trim_start_matches(is_space));
        let value = self.solve(line, text)?;
        if !(0..=0xFFFF).contains(&value) {
            return Err((
                loc,
                AssemblerError(format!("Origin out of range: {value}")),
            ));
        }

        if self.data.is_empty() {
            debug!(origin = value, "set origin");
            self.origin = value as u16;
            return Ok(());
        }

        let here = self.here();
        if value < here {
            return Err((
                loc,
                AssemblerError(format!(
                    "Origin ${value:04X} is behind the current address ${here:04X}"
                )),
            ));
        }
        debug!(from = here, to = value, "padding to origin");
        self.data.resize(self.data.len() + (value - here) as usize, 0);
        Ok(())
    }

    fn data(&mut self, line: &Line, text: &str, width: DataWidth) -> Located<()> {
        self.bind_pending(self.here())?;

        let mut rest = text;
        loop {
            let arg = rest.trim_start_matches(is_space);
            let loc = line.loc(arg);
            let (mut expr, after) = Node::parse(arg).map_err(|e| (loc, e.into()))?;
            self.touch(&expr, loc);

            let string = match width {
                DataWidth::Byte => expr.as_str().map(|text| text.as_bytes().to_vec()),
                DataWidth::Word => None,
            };

            match string {
                Some(bytes) => self.emit(loc, &bytes)?,

                None => match expr.eval(&self.symtab) {
                    Ok(value) => {
                        let bytes = match width {
                            DataWidth::Byte if (-128..=255).contains(&value) => vec![value as u8],
                            DataWidth::Word if (0..=0xFFFF).contains(&value) => {
                                (value as u16).to_le_bytes().to_vec()
                            }
                            _ => {
                                return Err((
                                    loc,
                                    AssemblerError(format!(
                                        "Expression result ({value}) does not fit in a {}",
                                        if width == DataWidth::Byte { "byte" } else { "word" }
                                    )),
                                ))
                            }
                        };
                        self.emit(loc, &bytes)?;
                    }

                    Err(e) if e.is_recoverable() => {
                        let offset = self.data.len();
                        let link = match width {
                            DataWidth::Byte => {
                                self.emit(loc, &[0])?;
                                Link::byte(loc, offset, expr)
                            }
                            DataWidth::Word => {
                                self.emit(loc, &[0, 0])?;
                                Link::word(loc, offset, expr)
                            }
                        };
                        debug!(?loc, offset, "reserved data");
                        self.links.push(link);
                    }

                    Err(e) => return Err((loc, e.into())),
                },
            }

            let after = after.trim_start_matches(is_space);
            match after.strip_prefix(',') {
                Some(next) => rest = next,
                None => return expect_end(line.loc(after), after),
            }
        }
    }

    fn instruction(&mut self, line: &Line, loc: SourceLoc, word: &str, text: &str) -> Located<()> {
        let mnemonic = word.parse::<Mnemonic>().map_err(|e| (loc, e.into()))?;
        let operand_loc = line.loc(text.trim_start_matches(is_space));
        let (mut operand, rest) = Operand::parse(text).map_err(|e| (operand_loc, e.into()))?;
        expect_end(line.loc(rest), rest)?;

        // A label on the same line may be the operand, as in `loop BNE loop`
        self.bind_pending(self.here())?;
        let here = self.here();

        let mut value = None;
        if let Some(expr) = &mut operand.expr {
            self.touch(expr, operand_loc);
            value = match expr.eval(&self.symtab) {
                Ok(value) => Some(value),
                Err(e) if e.is_recoverable() => None,
                Err(e) => return Err((operand_loc, e.into())),
            };
        }

        let mut mode = operand.mode;
        if mnemonic.is_branch() && mode == AddressingMode::Absolute {
            mode = AddressingMode::Relative;
            value = value.map(|target| target.wrapping_sub(here + 2));
        }

        let form = mnemonic
            .select(mode, value)
            .map_err(|e| (operand_loc, e.into()))?;
        trace!(%mnemonic, mode = %form.mode, ?value, "encoding");

        let offset = self.data.len() + 1;
        self.emit(loc, &form.emit(value))?;

        if let (None, Some(expr)) = (value, operand.expr) {
            let link = match form.mode {
                AddressingMode::Relative => Link::relative(operand_loc, offset, here + 2, expr),
                AddressingMode::Immediate => Link::byte(operand_loc, offset, expr),
                _ if form.len == 2 => Link::zero_page(operand_loc, offset, expr),
                _ => Link::word(operand_loc, offset, expr),
            };
            debug!(loc = %operand_loc, offset, "reserved operand");
            self.links.push(link);
        }
        Ok(())
    }
}
