//! Bytecode container and program builder
//!
//! A compiled program is a single byte image:
//!
//! | Bytes | Content |
//! |-------|---------|
//! | 0-3   | magic `GLYP` |
//! | 4-7   | version, u32 LE |
//! | 8-11  | constant count, u32 LE |
//! | ...   | tagged constants, concatenated |
//! | +0-3  | instruction count, u32 LE |
//! | ...   | instruction bytes |
//!
//! The offset of the first instruction byte is the **header size**. Jump
//! operands in the finished image are absolute offsets into the whole image,
//! so the VM can assign them to its instruction pointer without adjustment.
//! The builder stores block-relative offsets during emission and adds the
//! header size in a single pass when the program is built.

use std::fmt;
use std::sync::Arc;

use super::opcodes::Opcode;
use crate::value::{tags, Value};

/// Magic bytes identifying a Glyph bytecode image
pub const MAGIC: [u8; 4] = *b"GLYP";

/// Current container format version
pub const VERSION: u32 = 1;

/// Placeholder written into unpatched jump operands
const JUMP_PLACEHOLDER: u32 = 0xFFFF_FFFF;

/// Errors decoding a bytecode image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerError {
    /// The image does not begin with `GLYP`
    BadMagic,
    /// The image declares a version this build does not understand
    UnsupportedVersion(u32),
    /// The image ended in the middle of a field
    UnexpectedEof,
    /// A constant begins with an unknown tag byte
    BadConstantTag(u8),
    /// A string constant holds invalid UTF-8
    InvalidUtf8,
    /// Bytes remain after the declared instruction block
    TrailingBytes(usize),
}

impl fmt::Display for ContainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "bad magic: not a Glyph bytecode image"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported bytecode version {}", v),
            Self::UnexpectedEof => write!(f, "unexpected end of bytecode image"),
            Self::BadConstantTag(t) => write!(f, "unknown constant tag 0x{:02x}", t),
            Self::InvalidUtf8 => write!(f, "string constant is not valid UTF-8"),
            Self::TrailingBytes(n) => write!(f, "{} trailing bytes after instruction block", n),
        }
    }
}

impl std::error::Error for ContainerError {}

/// A finished, immutable bytecode program
///
/// Programs are read-only after building and can be shared across
/// concurrently executing VMs via [`Arc`].
#[derive(Debug, Clone, PartialEq)]
pub struct BytecodeProgram {
    /// The complete image, header included
    image: Vec<u8>,
    /// Decoded constant pool
    constants: Vec<Value>,
    /// Container version
    version: u32,
    /// Offset of the first instruction byte (the header size)
    code_start: usize,
}

impl BytecodeProgram {
    /// The raw image bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.image
    }

    /// Offset of the first instruction byte
    #[inline]
    pub fn code_start(&self) -> usize {
        self.code_start
    }

    /// The instruction block
    #[inline]
    pub fn code(&self) -> &[u8] {
        &self.image[self.code_start..]
    }

    /// Total image length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.image.len()
    }

    /// Whether the instruction block is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.code_start == self.image.len()
    }

    /// Container version
    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// The constant pool
    #[inline]
    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    /// Fetch a constant by pool index
    #[inline]
    pub fn get_constant(&self, index: u32) -> Option<&Value> {
        self.constants.get(index as usize)
    }

    /// Read one image byte
    #[inline]
    pub fn read_byte(&self, offset: usize) -> Option<u8> {
        self.image.get(offset).copied()
    }

    /// Read a u32 operand at the given image offset
    #[inline]
    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        let bytes = self.image.get(offset..offset + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Find the pool slot holding the given string, if any
    ///
    /// Identifier names are interned as string constants, so this is how a
    /// host maps a pre-defined local's name to its binding key.
    pub fn constant_index_of_str(&self, name: &str) -> Option<u32> {
        self.constants
            .iter()
            .position(|c| matches!(c, Value::String(s) if s == name))
            .map(|i| i as u32)
    }

    /// Decode an image produced by [`ProgramBuilder::build`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ContainerError> {
        let mut pos = 0usize;
        if read_exact(bytes, &mut pos, 4)? != MAGIC {
            return Err(ContainerError::BadMagic);
        }
        let version = read_u32(bytes, &mut pos)?;
        if version != VERSION {
            return Err(ContainerError::UnsupportedVersion(version));
        }
        let constant_count = read_u32(bytes, &mut pos)? as usize;
        let mut constants = Vec::with_capacity(constant_count);
        for _ in 0..constant_count {
            constants.push(decode_constant(bytes, &mut pos)?);
        }
        let instruction_count = read_u32(bytes, &mut pos)? as usize;
        let code_start = pos;
        let remaining = bytes.len() - pos;
        if remaining < instruction_count {
            return Err(ContainerError::UnexpectedEof);
        }
        if remaining > instruction_count {
            return Err(ContainerError::TrailingBytes(remaining - instruction_count));
        }
        Ok(Self {
            image: bytes.to_vec(),
            constants,
            version,
            code_start,
        })
    }

    /// Disassemble the whole program to a string
    pub fn disassemble(&self) -> String {
        let mut output = String::new();
        output.push_str(&format!(
            "version: {}, constants: {}, header: {} bytes\n",
            self.version,
            self.constants.len(),
            self.code_start
        ));
        for (i, constant) in self.constants.iter().enumerate() {
            output.push_str(&format!("  const #{}: {}\n", i, constant));
        }
        let mut offset = self.code_start;
        while offset < self.image.len() {
            let (disasm, next) = self.disassemble_instruction(offset);
            output.push_str(&format!("{:04x} {}\n", offset, disasm));
            offset = next;
        }
        output
    }

    /// Disassemble one instruction at an absolute image offset,
    /// returning the rendering and the next offset
    pub fn disassemble_instruction(&self, offset: usize) -> (String, usize) {
        let Some(opcode) = self.read_byte(offset).and_then(Opcode::from_byte) else {
            let byte = self.read_byte(offset).unwrap_or(0);
            return (format!("??? (0x{:02x})", byte), offset + 1);
        };

        if !opcode.has_operand() {
            return (opcode.mnemonic().to_string(), offset + 1);
        }

        let operand = self.read_u32(offset + 1).unwrap_or(0);
        let rendered = if opcode.is_jump() {
            format!("{} -> {:04x}", opcode.mnemonic(), operand)
        } else {
            match opcode {
                Opcode::Push | Opcode::LoadVar | Opcode::StoreVar => {
                    let constant = self
                        .get_constant(operand)
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "???".to_string());
                    format!("{} #{} ({})", opcode.mnemonic(), operand, constant)
                }
                _ => format!("{} {}", opcode.mnemonic(), operand),
            }
        };
        (rendered, offset + 5)
    }
}

fn read_exact<'a>(bytes: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8], ContainerError> {
    let slice = bytes
        .get(*pos..*pos + n)
        .ok_or(ContainerError::UnexpectedEof)?;
    *pos += n;
    Ok(slice)
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> Result<u32, ContainerError> {
    let b = read_exact(bytes, pos, 4)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Decode one tagged constant
fn decode_constant(bytes: &[u8], pos: &mut usize) -> Result<Value, ContainerError> {
    let tag = read_exact(bytes, pos, 1)?[0];
    match tag {
        tags::NULL => Ok(Value::Null),
        tags::INT => {
            let b = read_exact(bytes, pos, 8)?;
            Ok(Value::Int(i64::from_le_bytes(b.try_into().expect("8 bytes"))))
        }
        tags::FLOAT => {
            let b = read_exact(bytes, pos, 8)?;
            Ok(Value::Float(f64::from_le_bytes(b.try_into().expect("8 bytes"))))
        }
        tags::BOOL => Ok(Value::Bool(read_exact(bytes, pos, 1)?[0] != 0)),
        tags::STRING => {
            let len = read_u32(bytes, pos)? as usize;
            let raw = read_exact(bytes, pos, len)?;
            let s = std::str::from_utf8(raw).map_err(|_| ContainerError::InvalidUtf8)?;
            Ok(Value::String(s.to_string()))
        }
        other => Err(ContainerError::BadConstantTag(other)),
    }
}

/// Label for a forward jump to be patched later
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpLabel {
    /// Offset of the operand bytes inside the instruction block
    operand_offset: usize,
}

/// Builder for constructing bytecode programs
///
/// Emission works in block-relative offsets; [`ProgramBuilder::build`]
/// serializes the header, adds the header size to every jump operand, and
/// produces the final image.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    code: Vec<u8>,
    constants: Vec<Value>,
    /// Jump labels handed out but not yet patched
    open_jumps: usize,
}

impl ProgramBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self {
            code: Vec::with_capacity(256),
            constants: Vec::new(),
            open_jumps: 0,
        }
    }

    /// Current block-relative offset (where the next instruction lands)
    #[inline]
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// Number of constants interned so far
    #[inline]
    pub fn constant_count(&self) -> usize {
        self.constants.len()
    }

    /// Emit an operand-less opcode
    pub fn emit(&mut self, opcode: Opcode) {
        debug_assert!(!opcode.has_operand(), "{:?} requires an operand", opcode);
        self.code.push(opcode.to_byte());
    }

    /// Emit an opcode with its u32 operand
    pub fn emit_with(&mut self, opcode: Opcode, operand: u32) {
        debug_assert!(opcode.has_operand(), "{:?} takes no operand", opcode);
        self.code.push(opcode.to_byte());
        self.code.extend_from_slice(&operand.to_le_bytes());
    }

    /// Intern a constant, returning its pool index
    ///
    /// Deduplication is by structural equality across all value variants, so
    /// equal values always share a slot. The scan is linear; pools stay small
    /// enough per entry point that this has never mattered.
    pub fn add_constant(&mut self, value: Value) -> u32 {
        debug_assert!(
            value.is_constant_representable(),
            "composite values cannot enter the pool"
        );
        if let Some(index) = self.constants.iter().position(|c| c == &value) {
            return index as u32;
        }
        let index = self.constants.len();
        if index > u32::MAX as usize {
            panic!("too many constants in program (max {})", u32::MAX);
        }
        self.constants.push(value);
        index as u32
    }

    /// Intern a constant and emit a `Push` of it
    pub fn emit_constant(&mut self, value: Value) -> u32 {
        let index = self.add_constant(value);
        self.emit_with(Opcode::Push, index);
        index
    }

    /// Emit a forward jump with a placeholder operand, returning a label to
    /// patch once the target offset is known
    pub fn emit_jump(&mut self, opcode: Opcode) -> JumpLabel {
        debug_assert!(opcode.is_jump());
        self.code.push(opcode.to_byte());
        let operand_offset = self.code.len();
        self.code.extend_from_slice(&JUMP_PLACEHOLDER.to_le_bytes());
        self.open_jumps += 1;
        JumpLabel { operand_offset }
    }

    /// Patch a label to jump to the current offset
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.current_offset();
        self.patch_jump_to(label, target);
    }

    /// Patch a label to jump to a specific block-relative offset
    pub fn patch_jump_to(&mut self, label: JumpLabel, target: usize) {
        let bytes = (target as u32).to_le_bytes();
        self.code[label.operand_offset..label.operand_offset + 4].copy_from_slice(&bytes);
        self.open_jumps -= 1;
    }

    /// Emit a jump to a known block-relative target (loop back-edges)
    pub fn emit_jump_to(&mut self, opcode: Opcode, target: usize) {
        debug_assert!(opcode.is_jump());
        self.emit_with(opcode, target as u32);
    }

    /// Finish the program: serialize the header and constants, then adjust
    /// every jump operand from block-relative to absolute image offsets
    ///
    /// Panics if any jump label handed out by [`Self::emit_jump`] was never
    /// patched; an unpatched placeholder is a compiler bug.
    pub fn build(mut self) -> BytecodeProgram {
        assert_eq!(
            self.open_jumps, 0,
            "unpatched jump placeholders at program build"
        );

        let mut image = Vec::with_capacity(self.code.len() + 64);
        image.extend_from_slice(&MAGIC);
        image.extend_from_slice(&VERSION.to_le_bytes());
        image.extend_from_slice(&(self.constants.len() as u32).to_le_bytes());
        for constant in &self.constants {
            constant.encode_constant(&mut image);
        }
        image.extend_from_slice(&(self.code.len() as u32).to_le_bytes());

        let header_size = image.len();
        adjust_jump_targets(&mut self.code, header_size);
        image.extend_from_slice(&self.code);

        BytecodeProgram {
            image,
            constants: self.constants,
            version: VERSION,
            code_start: header_size,
        }
    }

    /// Build and wrap in [`Arc`] for sharing across VM invocations
    pub fn build_arc(self) -> Arc<BytecodeProgram> {
        Arc::new(self.build())
    }
}

/// Add `header_size` to the operand of every jump instruction
///
/// One linear walk over the instruction block; instruction sizes are fixed
/// per opcode so no decoding state is needed.
fn adjust_jump_targets(code: &mut [u8], header_size: usize) {
    let mut offset = 0;
    while offset < code.len() {
        let Some(opcode) = Opcode::from_byte(code[offset]) else {
            offset += 1;
            continue;
        };
        if opcode.is_jump() {
            let operand_at = offset + 1;
            let raw = u32::from_le_bytes(
                code[operand_at..operand_at + 4].try_into().expect("4 bytes"),
            );
            let adjusted = raw + header_size as u32;
            code[operand_at..operand_at + 4].copy_from_slice(&adjusted.to_le_bytes());
        }
        offset += opcode.instruction_size();
    }
}
