//! Growable instruction buffer with forward-jump patching.
//!
//! Jumps are emitted against a [`Label`] with a zeroed 8-byte operand and
//! the operand's position is recorded as a patch site. Labels are bound
//! once their target offset is known, and [`Chunk::resolve`] rewrites every
//! recorded site in one final pass.

use bytes::{BufMut, BytesMut};

use super::module::{HEADER_LEN, MAGIC};
use super::opcode::Op;

/// A jump target that may not be known yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Byte offset of a placeholder operand waiting for `label`'s target.
#[derive(Debug, Clone, Copy)]
struct PatchSite {
    offset: usize,
    label: Label,
}

/// The bytes of a module under construction, header included, so every
/// offset handed out is an absolute module offset.
#[derive(Debug)]
pub struct Chunk {
    code: BytesMut,
    labels: Vec<Option<u64>>,
    patches: Vec<PatchSite>,
}

impl Chunk {
    /// A chunk holding the magic and zeroed header fields.
    pub fn new() -> Self {
        let mut code = BytesMut::with_capacity(256);
        code.put_slice(MAGIC);
        code.put_bytes(0, HEADER_LEN - MAGIC.len());
        Self {
            code,
            labels: Vec::new(),
            patches: Vec::new(),
        }
    }

    /// Offset the next emitted byte will occupy.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn emit_op(&mut self, op: Op) -> usize {
        let offset = self.code.len();
        self.code.put_u8(op as u8);
        offset
    }

    pub fn emit_u8(&mut self, byte: u8) {
        self.code.put_u8(byte);
    }

    pub fn emit_u64(&mut self, n: u64) {
        self.code.put_u64_le(n);
    }

    pub fn emit_i64(&mut self, n: i64) {
        self.code.put_i64_le(n);
    }

    pub fn emit_f64(&mut self, n: f64) {
        self.code.put_f64_le(n);
    }

    /// Length-prefixed raw bytes.
    pub fn emit_str(&mut self, s: &str) {
        self.code.put_u64_le(s.len() as u64);
        self.code.put_slice(s.as_bytes());
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Fix `label` to the current offset.
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0] = Some(self.code.len() as u64);
    }

    /// Emit `op` with a placeholder target resolved from `label` later.
    pub fn emit_jump(&mut self, op: Op, label: Label) -> usize {
        let offset = self.emit_op(op);
        self.patches.push(PatchSite {
            offset: self.code.len(),
            label,
        });
        self.code.put_u64_le(0);
        offset
    }

    /// Swap the opcode byte at `offset`, keeping its operands.
    pub fn rewrite_op(&mut self, offset: usize, op: Op) {
        self.code[offset] = op as u8;
    }

    pub fn patch_u64(&mut self, offset: usize, value: u64) {
        self.code[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Rewrite every recorded patch site. Fails on the first label that
    /// was never bound; returns the number of sites rewritten otherwise.
    pub fn resolve(&mut self) -> Result<usize, Label> {
        let patches = std::mem::take(&mut self.patches);
        for site in &patches {
            let target = self.labels[site.label.0].ok_or(site.label)?;
            self.patch_u64(site.offset, target);
        }
        Ok(patches.len())
    }

    /// Patch sites still waiting for [`Chunk::resolve`].
    pub fn pending_patches(&self) -> usize {
        self.patches.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.code.to_vec()
    }
}

impl Default for Chunk {
    fn default() -> Self {
        Self::new()
    }
}
