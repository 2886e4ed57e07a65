use std::{
    io::{self, Cursor},
    path::PathBuf,
};

use fxhash::FxHashMap;
use pretty_assertions::assert_eq;

use super::*;
use crate::linker::Image;

struct StringFileSystem {
    files: FxHashMap<PathBuf, String>,
}

impl StringFileSystem {
    #[inline]
    fn new<P: AsRef<Path>>(files: &[(P, &str)]) -> Self {
        let mut map = FxHashMap::default();
        for (path, s) in files {
            map.insert(path.as_ref().to_path_buf(), s.to_string());
        }
        Self { files: map }
    }
}

impl FileSystem for StringFileSystem {
    type Reader = Cursor<String>;

    #[inline]
    fn is_file(&self, path: &Path) -> io::Result<bool> {
        Ok(self.files.contains_key(path))
    }

    #[inline]
    fn open_read(&self, path: &Path) -> io::Result<Self::Reader> {
        Ok(Cursor::new(self.files.get(path).unwrap().clone()))
    }
}

fn assembler(source: &str) -> Assembler<StringFileSystem> {
    Assembler::new(StringFileSystem::new(&[("/test.asm", source)]))
}

fn assemble(source: &str) -> Result<Image, String> {
    assembler(source)
        .assemble("/", "test.asm")
        .map_err(|e| e.to_string())?
        .link()
        .map_err(|e| e.to_string())
}

fn data(source: &str) -> Vec<u8> {
    let image = assemble(source).unwrap();
    assert_eq!(DEFAULT_ORIGIN, image.origin);
    image.data
}

#[test]
fn immediate_and_absolute() {
    let data = data(
        r#"
        LDA #4
        STA $0200
        RTS
        "#,
    );

    #[rustfmt::skip]
    assert_eq!(vec![
        0xA9, 0x04,
        0x8D, 0x00, 0x02,
        0x60,
    ], data);
}

#[test]
fn backward_branch() {
    let source = r#"
start   LDX #0
loop    INX
        BNE loop
        RTS
"#;
    let module = assembler(source).assemble("/", "test.asm").unwrap();
    assert_eq!(Some(0xC000), module.symtab().get("start"));
    assert_eq!(Some(0xC002), module.symtab().get("loop"));

    #[rustfmt::skip]
    assert_eq!(vec![
        0xA2, 0x00,
        0xE8,
        0xD0, 0xFD,
        0x60,
    ], module.link().unwrap().data);
}

#[test]
fn forward_branch() {
    let data = data(
        r#"
        LDA #1
        BEQ done
        NOP
done    RTS
"#,
    );

    #[rustfmt::skip]
    assert_eq!(vec![
        0xA9, 0x01,
        0xF0, 0x01,
        0xEA,
        0x60,
    ], data);
}

#[test]
fn forward_jump() {
    let data = data(
        r#"
        JMP end
        NOP
end     RTS
"#,
    );

    #[rustfmt::skip]
    assert_eq!(vec![
        0x4C, 0x04, 0xC0,
        0xEA,
        0x60,
    ], data);
}

#[test]
fn forward_reference_reserves_widest_form() {
    let data = data(
        r#"
        LDA ptr
        LDA (ptr),Y
        RTS
ptr     = $10
"#,
    );

    #[rustfmt::skip]
    assert_eq!(vec![
        0xAD, 0x10, 0x00,
        0xB1, 0x10,
        0x60,
    ], data);
}

#[test]
fn constants() {
    let data = data(
        r#"
SCREEN  = $0400
COLOR   .EQU 1
ZP      = $FB
        LDA #COLOR
        STA SCREEN
        STA ZP
"#,
    );

    #[rustfmt::skip]
    assert_eq!(vec![
        0xA9, 0x01,
        0x8D, 0x00, 0x04,
        0x85, 0xFB,
    ], data);
}

#[test]
fn pending_labels() {
    let source = r#"
msg
        .BYTE "HI", 0
alias
value   = 7
        LDA msg
        LDA #alias
end
"#;
    let module = assembler(source).assemble("/", "test.asm").unwrap();
    assert_eq!(Some(0xC000), module.symtab().get("msg"));
    assert_eq!(Some(7), module.symtab().get("alias"));
    assert_eq!(Some(7), module.symtab().get("value"));
    assert_eq!(Some(0xC008), module.symtab().get("end"));

    #[rustfmt::skip]
    assert_eq!(vec![
        0x48, 0x49, 0x00,
        0xAD, 0x00, 0xC0,
        0xA9, 0x07,
    ], module.link().unwrap().data);
}

#[test]
fn origin() {
    let image = assemble(
        r#"
        .ORG $1000
        NOP
        .org $1003
        RTS
"#,
    )
    .unwrap();
    assert_eq!(0x1000, image.origin);
    assert_eq!(vec![0xEA, 0x00, 0x00, 0x60], image.data);

    let mut assembler = assembler("        RTS");
    assembler.set_origin(0x0801);
    let image = assembler.assemble("/", "test.asm").unwrap().link().unwrap();
    assert_eq!(0x0801, image.origin);
}

#[test]
fn data_directives() {
    let data = data(
        r#"
        .BYTE "AB", 1, <$1234, -1
        .WORD $1234, table
table   .byte ";"  ; comment
"#,
    );

    #[rustfmt::skip]
    assert_eq!(vec![
        0x41, 0x42, 0x01, 0x34, 0xFF,
        0x34, 0x12, 0x09, 0xC0,
        0x3B,
    ], data);
}

#[test]
fn accumulator_and_indirect() {
    let data = data(
        r#"
        ASL A
        ASL
        ROR a
        JMP ($1234)
        LDA ($20),Y
        LDA ($20,X)
        LDX $10,Y
"#,
    );

    #[rustfmt::skip]
    assert_eq!(vec![
        0x0A,
        0x0A,
        0x6A,
        0x6C, 0x34, 0x12,
        0xB1, 0x20,
        0xA1, 0x20,
        0xB6, 0x10,
    ], data);
}

#[test]
fn lowercase_and_colon() {
    let data = data(
        r#"
loop:   dex
        bne loop
"#,
    );
    assert_eq!(vec![0xCA, 0xD0, 0xFD], data);
}

#[test]
fn undefined_symbol() {
    let err = assemble(
        r#"
        JMP nowhere
"#,
    )
    .unwrap_err();
    assert_eq!(
        "In \"/test.asm\"\n\ntest.asm:2:13:\nUndefined symbol: \"nowhere\"",
        err
    );
}

#[test]
fn redefinition() {
    let err = assemble(
        r#"
a       NOP
a       NOP
"#,
    )
    .unwrap_err();
    assert!(err.contains("test.asm:3:1:"), "{err}");
    assert!(err.contains("Symbol already defined: \"a\""), "{err}");
}

#[test]
fn branch_out_of_range() {
    let err = assemble(
        r#"
start   NOP
        .ORG $C100
        BNE start
"#,
    )
    .unwrap_err();
    assert!(err.contains("out of range"), "{err}");

    let err = assemble(
        r#"
        BNE far
        .ORG $C100
far     NOP
"#,
    )
    .unwrap_err();
    assert!(err.contains("Branch target out of range"), "{err}");
}

#[test]
fn late_value_out_of_range() {
    let err = assemble(
        r#"
        LDA #big
big     = $100
"#,
    )
    .unwrap_err();
    assert!(err.contains("does not fit in a byte"), "{err}");
}

#[test]
fn invalid_instruction() {
    let err = assemble("        LDZ #1").unwrap_err();
    assert!(err.contains("invalid instruction: \"LDZ\""), "{err}");
}

#[test]
fn invalid_addressing_mode() {
    let err = assemble("        STA #1").unwrap_err();
    assert!(err.contains("invalid addressing mode for STA: immediate"), "{err}");
}

#[test]
fn invalid_indirect() {
    let err = assemble("        LDA (4,Z)").unwrap_err();
    assert!(err.contains("incorrect indirect format"), "{err}");
}

#[test]
fn unterminated_string() {
    let err = assemble("        .BYTE \"abc").unwrap_err();
    assert!(err.contains("unterminated string"), "{err}");
}

#[test]
fn origin_backwards() {
    let err = assemble(
        r#"
        NOP
        .ORG $0000
"#,
    )
    .unwrap_err();
    assert!(err.contains("behind the current address"), "{err}");
}

#[test]
fn constant_must_be_solvable() {
    let err = assemble(
        r#"
x       = later
later   NOP
"#,
    )
    .unwrap_err();
    assert!(err.contains("Expression could not be solved"), "{err}");
}

#[test]
fn unknown_directive() {
    let err = assemble("        .FILL 4").unwrap_err();
    assert!(err.contains("Unknown directive: \".FILL\""), "{err}");
}

#[test]
fn file_not_found() {
    let err = assembler("")
        .assemble("/", "missing.asm")
        .err()
        .unwrap()
        .to_string();
    assert_eq!("File not found: \"missing.asm\"", err);
}
