use std::io::{self, Write};

use tracing::debug;

use crate::{
    assembler::{trace_error, SourceLoc},
    expr::Node,
    fileman::{FileManager, FileSystem},
    symtab::Symtab,
};

#[derive(thiserror::Error, Debug)]
#[error("{0}")]
pub struct LinkerError(String);

/// Space reserved in the image for an operand that could not be solved
/// during assembly.
#[derive(Debug)]
pub enum Link {
    /// Immediate or data byte, signed or unsigned.
    Byte {
        loc: SourceLoc,
        offset: usize,
        expr: Node,
    },
    /// One-byte address.
    ZeroPage {
        loc: SourceLoc,
        offset: usize,
        expr: Node,
    },
    /// Branch target, stored as a displacement from `base`.
    Relative {
        loc: SourceLoc,
        offset: usize,
        base: i32,
        expr: Node,
    },
    Word {
        loc: SourceLoc,
        offset: usize,
        expr: Node,
    },
}

impl Link {
    #[inline]
    pub fn byte(loc: SourceLoc, offset: usize, expr: Node) -> Self {
        Self::Byte { loc, offset, expr }
    }

    #[inline]
    pub fn zero_page(loc: SourceLoc, offset: usize, expr: Node) -> Self {
        Self::ZeroPage { loc, offset, expr }
    }

    #[inline]
    pub fn relative(loc: SourceLoc, offset: usize, base: i32, expr: Node) -> Self {
        Self::Relative {
            loc,
            offset,
            base,
            expr,
        }
    }

    #[inline]
    pub fn word(loc: SourceLoc, offset: usize, expr: Node) -> Self {
        Self::Word { loc, offset, expr }
    }

    #[inline]
    pub fn loc(&self) -> SourceLoc {
        match self {
            Self::Byte { loc, .. }
            | Self::ZeroPage { loc, .. }
            | Self::Relative { loc, .. }
            | Self::Word { loc, .. } => *loc,
        }
    }
}

/// The output of one assembly pass, with its holes still open.
pub struct Module<S> {
    file_manager: FileManager<S>,
    symtab: Symtab,
    origin: u16,
    data: Vec<u8>,
    links: Vec<Link>,
}

impl<S: FileSystem> Module<S> {
    #[inline]
    pub fn new(
        file_manager: FileManager<S>,
        symtab: Symtab,
        origin: u16,
        data: Vec<u8>,
        links: Vec<Link>,
    ) -> Self {
        Self {
            file_manager,
            symtab,
            origin,
            data,
            links,
        }
    }

    #[inline]
    pub fn symtab(&self) -> &Symtab {
        &self.symtab
    }

    fn error<M: std::fmt::Display>(&self, loc: SourceLoc, msg: M) -> LinkerError {
        LinkerError(trace_error(self.file_manager.path(), loc, msg))
    }

    /// Fills every hole from the finished symbol table.
    pub fn link(mut self) -> Result<Image, LinkerError> {
        let undefined = self
            .symtab
            .references()
            .filter(|(name, _)| !self.symtab.contains(name))
            .min_by_key(|(_, loc)| **loc)
            .map(|(name, loc)| (name.to_string(), *loc));
        if let Some((name, loc)) = undefined {
            return Err(self.error(loc, format!("Undefined symbol: \"{name}\"")));
        }

        debug!(holes = self.links.len(), "linking");
        let links = std::mem::take(&mut self.links);
        for mut link in links {
            let loc = link.loc();
            let value = match &mut link {
                Link::Byte { expr, .. }
                | Link::ZeroPage { expr, .. }
                | Link::Relative { expr, .. }
                | Link::Word { expr, .. } => expr.eval(&self.symtab),
            }
            .map_err(|e| self.error(loc, format!("Expression could not be solved: {e}")))?;

            match link {
                Link::Byte { offset, .. } => {
                    if !(-128..=255).contains(&value) {
                        return Err(self.error(
                            loc,
                            format!("Expression result ({value}) does not fit in a byte"),
                        ));
                    }
                    self.data[offset] = value as u8;
                }

                Link::ZeroPage { offset, .. } => {
                    if !(0..=255).contains(&value) {
                        return Err(self.error(
                            loc,
                            format!("Address ({value}) does not fit in the zero page"),
                        ));
                    }
                    self.data[offset] = value as u8;
                }

                Link::Relative { offset, base, .. } => {
                    let displacement = value.wrapping_sub(base);
                    if !(-128..=127).contains(&displacement) {
                        return Err(self.error(
                            loc,
                            format!("Branch target out of range ({displacement} bytes)"),
                        ));
                    }
                    self.data[offset] = displacement as u8;
                }

                Link::Word { offset, .. } => {
                    if !(0..=65535).contains(&value) {
                        return Err(self.error(
                            loc,
                            format!("Expression result ({value}) does not fit in a word"),
                        ));
                    }
                    let bytes = (value as u16).to_le_bytes();
                    self.data[offset] = bytes[0];
                    self.data[offset + 1] = bytes[1];
                }
            }
        }

        Ok(Image {
            origin: self.origin,
            data: self.data,
        })
    }
}

/// A fully linked program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub origin: u16,
    pub data: Vec<u8>,
}

impl Image {
    /// Writes the image, optionally preceded by its load address (the PRG
    /// convention).
    pub fn write(&self, writer: &mut dyn Write, header: bool) -> io::Result<()> {
        if header {
            writer.write_all(&self.origin.to_le_bytes())?;
        }
        writer.write_all(&self.data)?;
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prg_header() {
        let image = Image {
            origin: 0xC000,
            data: vec![0xA9, 0x04, 0x60],
        };
        let mut out = Vec::new();
        image.write(&mut out, true).unwrap();
        assert_eq!(vec![0x00, 0xC0, 0xA9, 0x04, 0x60], out);

        let mut out = Vec::new();
        image.write(&mut out, false).unwrap();
        assert_eq!(vec![0xA9, 0x04, 0x60], out);
    }
}
