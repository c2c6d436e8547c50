//! The bytecode module: header, instruction stream and function table.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! 0   8   magic "AVOCADO1"
//! 8   8   function table offset
//! 16  8   function count
//! 24  8   main entry offset
//! 32  ..  instructions
//! T   ..  function table
//! ```
//!
//! Each table entry is a name, an 8-byte entry offset, three flag bytes
//! (void, typed return, return type tag), an 8-byte parameter count and
//! the parameter names. Names are an 8-byte length followed by the bytes.

use std::collections::HashMap;

use bytes::Buf;
use tracing::debug;

use super::chunk::{Chunk, Label};
use crate::error::FormatError;
use crate::value::TypeTag;

pub const MAGIC: &[u8; 8] = b"AVOCADO1";
pub const HEADER_LEN: usize = 32;
/// Name of the implicit top-level function, always table entry 0.
pub const MAIN_FUNCTION: &str = "__main__";

const TABLE_OFFSET_FIELD: usize = 8;
const FUNCTION_COUNT_FIELD: usize = 16;
const MAIN_ENTRY_FIELD: usize = 24;

/// One function table entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionEntry {
    pub name: String,
    pub entry: u64,
    pub is_void: bool,
    pub has_typed_return: bool,
    pub return_type: TypeTag,
    pub params: Vec<String>,
}

impl FunctionEntry {
    /// The top-level function starting at the first instruction.
    pub fn main() -> Self {
        Self {
            name: MAIN_FUNCTION.to_string(),
            entry: HEADER_LEN as u64,
            is_void: true,
            has_typed_return: false,
            return_type: TypeTag::Int,
            params: Vec::new(),
        }
    }
}

/// A complete, immutable module image.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    image: Vec<u8>,
    table_offset: usize,
    main_entry: usize,
    functions: Vec<FunctionEntry>,
    index: HashMap<String, usize>,
}

impl Module {
    /// Append the function table to `chunk`, fill in the header and resolve
    /// every pending jump.
    pub fn assemble(mut chunk: Chunk, functions: Vec<FunctionEntry>) -> Result<Module, Label> {
        let table_offset = chunk.len();
        for function in &functions {
            chunk.emit_str(&function.name);
            chunk.emit_u64(function.entry);
            chunk.emit_u8(function.is_void as u8);
            chunk.emit_u8(function.has_typed_return as u8);
            chunk.emit_u8(function.return_type as u8);
            chunk.emit_u64(function.params.len() as u64);
            for param in &function.params {
                chunk.emit_str(param);
            }
        }

        chunk.patch_u64(TABLE_OFFSET_FIELD, table_offset as u64);
        chunk.patch_u64(FUNCTION_COUNT_FIELD, functions.len() as u64);
        chunk.patch_u64(MAIN_ENTRY_FIELD, HEADER_LEN as u64);
        chunk.resolve()?;

        Ok(Module::from_parts(
            chunk.into_bytes(),
            table_offset,
            HEADER_LEN,
            functions,
        ))
    }

    fn from_parts(
        image: Vec<u8>,
        table_offset: usize,
        main_entry: usize,
        functions: Vec<FunctionEntry>,
    ) -> Module {
        let index = functions
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Module {
            image,
            table_offset,
            main_entry,
            functions,
            index,
        }
    }

    /// Parse and validate a serialized module. Either the whole module
    /// loads or nothing does.
    pub fn from_bytes(bytes: &[u8]) -> Result<Module, FormatError> {
        let mut reader = Reader::new(bytes);

        if reader.bytes(MAGIC.len())? != MAGIC {
            return Err(FormatError::BadMagic);
        }
        let table_offset = reader.u64()?;
        let count = reader.u64()?;
        let main_entry = reader.u64()?;

        if table_offset < HEADER_LEN as u64 || table_offset > bytes.len() as u64 {
            return Err(FormatError::BadTableOffset(table_offset));
        }
        let table_offset = table_offset as usize;
        let in_code = |offset: u64| offset >= HEADER_LEN as u64 && offset <= table_offset as u64;
        if !in_code(main_entry) {
            return Err(FormatError::BadMainEntry(main_entry));
        }

        let mut reader = Reader::new(bytes);
        reader.skip_to(table_offset);
        let mut functions = Vec::new();
        let mut seen = HashMap::new();
        for _ in 0..count {
            let name = reader.name()?;
            let entry = reader.u64()?;
            let is_void = reader.u8()? != 0;
            let has_typed_return = reader.u8()? != 0;
            let tag_offset = reader.offset();
            let tag = reader.u8()?;
            let return_type = TypeTag::from_u8(tag).ok_or(FormatError::BadTypeTag {
                tag,
                offset: tag_offset,
            })?;
            let param_count = reader.u64()?;
            let mut params = Vec::new();
            for _ in 0..param_count {
                params.push(reader.name()?);
            }

            if !in_code(entry) {
                return Err(FormatError::BadEntry { name, entry });
            }
            if seen.insert(name.clone(), functions.len()).is_some() {
                return Err(FormatError::DuplicateFunction(name));
            }
            functions.push(FunctionEntry {
                name,
                entry,
                is_void,
                has_typed_return,
                return_type,
                params,
            });
        }

        if reader.remaining() > 0 {
            return Err(FormatError::TrailingBytes(reader.remaining()));
        }

        debug!(
            functions = functions.len(),
            bytes = bytes.len(),
            "loaded module"
        );
        Ok(Module::from_parts(
            bytes.to_vec(),
            table_offset,
            main_entry as usize,
            functions,
        ))
    }

    /// The serialized form; `Module::from_bytes(m.as_bytes())` yields `m`.
    pub fn as_bytes(&self) -> &[u8] {
        &self.image
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.image.clone()
    }

    /// Everything before the function table. Instruction offsets index
    /// directly into this slice.
    pub fn code(&self) -> &[u8] {
        &self.image[..self.table_offset]
    }

    pub fn table_offset(&self) -> usize {
        self.table_offset
    }

    pub fn main_entry(&self) -> usize {
        self.main_entry
    }

    pub fn functions(&self) -> &[FunctionEntry] {
        &self.functions
    }

    pub fn function(&self, name: &str) -> Option<&FunctionEntry> {
        self.index.get(name).map(|&i| &self.functions[i])
    }
}

/// Bounds-checked little-endian reader over a module image.
struct Reader<'a> {
    buf: &'a [u8],
    len: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            buf: bytes,
            len: bytes.len(),
        }
    }

    fn offset(&self) -> usize {
        self.len - self.buf.remaining()
    }

    fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn skip_to(&mut self, offset: usize) {
        let skip = offset.saturating_sub(self.offset()).min(self.buf.remaining());
        self.buf.advance(skip);
    }

    fn need(&self, n: usize) -> Result<(), FormatError> {
        if self.buf.remaining() < n {
            return Err(FormatError::Truncated {
                offset: self.offset(),
                needed: n,
            });
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8, FormatError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn u64(&mut self) -> Result<u64, FormatError> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        self.need(n)?;
        let buf: &'a [u8] = self.buf;
        let (head, tail) = buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn name(&mut self) -> Result<String, FormatError> {
        let len = self.u64()?;
        let at = self.offset();
        if len > self.remaining() as u64 {
            return Err(FormatError::Truncated {
                offset: at,
                needed: usize::try_from(len).unwrap_or(usize::MAX),
            });
        }
        let raw = self.bytes(len as usize)?;
        String::from_utf8(raw.to_vec()).map_err(|_| FormatError::InvalidUtf8(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::opcode::Op;
    use pretty_assertions::assert_eq;

    fn sample() -> Module {
        let mut chunk = Chunk::new();
        let skip = chunk.new_label();
        chunk.emit_jump(Op::Jump, skip);
        let entry = chunk.len() as u64;
        chunk.emit_op(Op::Get);
        chunk.emit_str("a");
        chunk.emit_op(Op::Return);
        chunk.bind(skip);
        chunk.emit_op(Op::Halt);

        let functions = vec![
            FunctionEntry::main(),
            FunctionEntry {
                name: "id".into(),
                entry,
                is_void: false,
                has_typed_return: true,
                return_type: TypeTag::Float,
                params: vec!["a".into()],
            },
        ];
        Module::assemble(chunk, functions).unwrap()
    }

    #[test]
    fn test_header_fields() {
        let module = sample();
        let bytes = module.as_bytes();
        assert_eq!(&bytes[..8], MAGIC);
        let field = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(raw)
        };
        assert_eq!(field(8), module.table_offset() as u64);
        assert_eq!(field(16), 2);
        assert_eq!(field(24), HEADER_LEN as u64);
    }

    #[test]
    fn test_round_trip_is_exact() {
        let module = sample();
        let loaded = Module::from_bytes(module.as_bytes()).unwrap();
        assert_eq!(loaded, module);
        assert_eq!(loaded.to_bytes(), module.to_bytes());
        assert_eq!(loaded.function("id").map(|f| f.params.clone()), Some(vec!["a".to_string()]));
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample().to_bytes();
        bytes[0] = b'X';
        assert!(matches!(Module::from_bytes(&bytes), Err(FormatError::BadMagic)));
    }

    #[test]
    fn test_truncated_header() {
        let bytes = sample().to_bytes();
        assert!(matches!(
            Module::from_bytes(&bytes[..20]),
            Err(FormatError::Truncated { .. })
        ));
    }

    #[test]
    fn test_truncated_table() {
        let bytes = sample().to_bytes();
        assert!(matches!(
            Module::from_bytes(&bytes[..bytes.len() - 3]),
            Err(FormatError::Truncated { .. })
        ));
    }

    #[test]
    fn test_table_offset_out_of_range() {
        let mut bytes = sample().to_bytes();
        bytes[8..16].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            Module::from_bytes(&bytes),
            Err(FormatError::BadTableOffset(_))
        ));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = sample().to_bytes();
        bytes.push(0);
        assert!(matches!(
            Module::from_bytes(&bytes),
            Err(FormatError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_bad_return_type_tag() {
        let module = sample();
        let mut bytes = module.to_bytes();
        // second entry: name "id" (8 + 2), entry (8), void, typed, then the tag
        let main_len = 8 + MAIN_FUNCTION.len() + 8 + 3 + 8;
        let tag_at = module.table_offset() + main_len + 8 + 2 + 8 + 2;
        bytes[tag_at] = 0x42;
        assert!(matches!(
            Module::from_bytes(&bytes),
            Err(FormatError::BadTypeTag { tag: 0x42, .. })
        ));
    }
}
