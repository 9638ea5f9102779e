//! Serialized-value cursor over byte buffers.
//!
//! The cache layers treat attribute and event payloads as opaque,
//! length-delimited elements: they copy them verbatim, measure them, and
//! splice list chunks back into one array. This module is the boundary
//! where that happens. The framing is deliberately small and
//! self-describing (tag byte, fixed or length-prefixed payload, explicit
//! container terminator); the production wire codec can be swapped in
//! behind the same cursor surface.
//!
//! ```text
//! element ::= NULL
//!           | BOOL  byte
//!           | UINT  u64-le
//!           | BYTES u32-le-len payload
//!           | UTF8  u32-le-len payload
//!           | ARRAY element* END
//!           | STRUCT element* END
//! ```

use crate::error::{CacheError, Result};

const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_UINT: u8 = 0x04;
const TAG_BYTES: u8 = 0x10;
const TAG_UTF8: u8 = 0x11;
const TAG_ARRAY: u8 = 0x15;
const TAG_STRUCT: u8 = 0x16;
const TAG_END: u8 = 0x18;

/// Encoded size of an array's own framing (start tag + terminator),
/// excluding its members. Used when sizing reassembled lists.
pub const ARRAY_OVERHEAD: usize = 2;

/// Type tag of a serialized element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementType {
    Null,
    Bool,
    UnsignedInt,
    Bytes,
    Utf8,
    Array,
    Structure,
}

impl ElementType {
    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            TAG_NULL => Ok(ElementType::Null),
            TAG_BOOL => Ok(ElementType::Bool),
            TAG_UINT => Ok(ElementType::UnsignedInt),
            TAG_BYTES => Ok(ElementType::Bytes),
            TAG_UTF8 => Ok(ElementType::Utf8),
            TAG_ARRAY => Ok(ElementType::Array),
            TAG_STRUCT => Ok(ElementType::Structure),
            other => Err(CacheError::Malformed(format!(
                "unknown element tag 0x{other:02x}"
            ))),
        }
    }
}

/// Deepest container nesting accepted while measuring an element. Bounds
/// the recursion below against adversarially deep input.
const MAX_NESTING_DEPTH: usize = 32;

/// Total encoded length of the element starting at `pos`, terminator
/// included for containers.
fn element_len_at(buf: &[u8], pos: usize) -> Result<usize> {
    element_len_nested(buf, pos, 0)
}

fn element_len_nested(buf: &[u8], pos: usize, depth: usize) -> Result<usize> {
    let tag = *buf.get(pos).ok_or(CacheError::UnexpectedEnd)?;
    match tag {
        TAG_NULL => Ok(1),
        TAG_BOOL => {
            if pos + 2 > buf.len() {
                return Err(CacheError::UnexpectedEnd);
            }
            Ok(2)
        }
        TAG_UINT => {
            if pos + 9 > buf.len() {
                return Err(CacheError::UnexpectedEnd);
            }
            Ok(9)
        }
        TAG_BYTES | TAG_UTF8 => {
            if pos + 5 > buf.len() {
                return Err(CacheError::UnexpectedEnd);
            }
            let len =
                u32::from_le_bytes(buf[pos + 1..pos + 5].try_into().expect("4-byte slice"))
                    as usize;
            if pos + 5 + len > buf.len() {
                return Err(CacheError::UnexpectedEnd);
            }
            Ok(5 + len)
        }
        TAG_ARRAY | TAG_STRUCT => {
            if depth >= MAX_NESTING_DEPTH {
                return Err(CacheError::Malformed("container nesting too deep".into()));
            }
            let mut cursor = pos + 1;
            loop {
                let next = *buf.get(cursor).ok_or(CacheError::UnexpectedEnd)?;
                if next == TAG_END {
                    return Ok(cursor + 1 - pos);
                }
                cursor += element_len_nested(buf, cursor, depth + 1)?;
            }
        }
        TAG_END => Err(CacheError::Malformed(
            "container terminator outside a container".into(),
        )),
        other => Err(CacheError::Malformed(format!(
            "unknown element tag 0x{other:02x}"
        ))),
    }
}

/// Read cursor over a sequence of serialized elements.
///
/// The cursor starts *before* the first element; call [`next`] to advance.
/// Entering a container yields a sub-cursor scoped to its members, so the
/// outer cursor can simply continue with `next` afterwards.
///
/// [`next`]: ElementReader::next
#[derive(Clone, Debug)]
pub struct ElementReader<'a> {
    buf: &'a [u8],
    /// Start of the current element, once `next` has found one.
    pos: usize,
    /// End of the current element / start of the following one.
    end: usize,
    started: bool,
}

impl<'a> ElementReader<'a> {
    /// Cursor over a sequence of zero or more elements.
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            end: 0,
            started: false,
        }
    }

    /// Cursor positioned on a buffer holding exactly one element.
    ///
    /// Fails with [`CacheError::Malformed`] if the buffer holds anything
    /// other than one well-formed element.
    pub fn single(buf: &'a [u8]) -> Result<Self> {
        let len = element_len_at(buf, 0)?;
        if len != buf.len() {
            return Err(CacheError::Malformed(
                "trailing bytes after single element".into(),
            ));
        }
        let mut reader = Self::new(buf);
        reader.next()?;
        Ok(reader)
    }

    /// Advance to the next element at this nesting level.
    ///
    /// Returns `Ok(false)` at the end of the sequence.
    pub fn next(&mut self) -> Result<bool> {
        if self.end >= self.buf.len() {
            self.started = false;
            return Ok(false);
        }
        let len = element_len_at(self.buf, self.end)?;
        self.pos = self.end;
        self.end += len;
        self.started = true;
        Ok(true)
    }

    fn current(&self) -> Result<usize> {
        if self.started {
            Ok(self.pos)
        } else {
            Err(CacheError::InvalidArgument("cursor is not on an element"))
        }
    }

    /// Type of the current element.
    pub fn element_type(&self) -> Result<ElementType> {
        ElementType::from_tag(self.buf[self.current()?])
    }

    /// Exact encoded length of the current element, framing included.
    pub fn element_len(&self) -> Result<usize> {
        Ok(self.end - self.current()?)
    }

    /// Raw encoded bytes of the current element, framing included.
    pub fn element_bytes(&self) -> Result<&'a [u8]> {
        let pos = self.current()?;
        Ok(&self.buf[pos..self.end])
    }

    /// Sub-cursor over the members of the current container element.
    pub fn enter_container(&self) -> Result<ElementReader<'a>> {
        match self.element_type()? {
            ElementType::Array | ElementType::Structure => {}
            _ => return Err(CacheError::InvalidArgument("element is not a container")),
        }
        let pos = self.current()?;
        // Strip the start tag and the terminator.
        Ok(ElementReader::new(&self.buf[pos + 1..self.end - 1]))
    }

    /// Value of the current boolean element.
    pub fn bool_value(&self) -> Result<bool> {
        if self.element_type()? != ElementType::Bool {
            return Err(CacheError::InvalidArgument("element is not a bool"));
        }
        Ok(self.buf[self.current()? + 1] != 0)
    }

    /// Value of the current unsigned integer element.
    pub fn u64_value(&self) -> Result<u64> {
        if self.element_type()? != ElementType::UnsignedInt {
            return Err(CacheError::InvalidArgument("element is not an integer"));
        }
        let pos = self.current()?;
        Ok(u64::from_le_bytes(
            self.buf[pos + 1..pos + 9].try_into().expect("8-byte slice"),
        ))
    }

    /// Payload of the current byte-string element.
    pub fn bytes_value(&self) -> Result<&'a [u8]> {
        if self.element_type()? != ElementType::Bytes {
            return Err(CacheError::InvalidArgument("element is not a byte string"));
        }
        let pos = self.current()?;
        Ok(&self.buf[pos + 5..self.end])
    }

    /// Payload of the current UTF-8 string element.
    pub fn str_value(&self) -> Result<&'a str> {
        if self.element_type()? != ElementType::Utf8 {
            return Err(CacheError::InvalidArgument("element is not a string"));
        }
        let pos = self.current()?;
        std::str::from_utf8(&self.buf[pos + 5..self.end])
            .map_err(|e| CacheError::Malformed(format!("invalid utf-8 payload: {e}")))
    }

    /// Copy the current element verbatim into `writer`.
    pub fn copy_element(&self, writer: &mut ElementWriter) -> Result<()> {
        writer.put_raw(self.element_bytes()?)
    }
}

/// Write cursor producing a sequence of serialized elements.
///
/// An optional capacity bound makes overflow a first-class error instead
/// of an unbounded allocation; [`finalize`] right-sizes the output.
///
/// [`finalize`]: ElementWriter::finalize
#[derive(Debug)]
pub struct ElementWriter {
    buf: Vec<u8>,
    limit: Option<usize>,
    depth: usize,
}

impl ElementWriter {
    /// Unbounded writer.
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            limit: None,
            depth: 0,
        }
    }

    /// Writer that refuses to grow past `limit` encoded bytes, failing
    /// with [`CacheError::BufferTooSmall`].
    pub fn bounded(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit: Some(limit),
            depth: 0,
        }
    }

    /// Pre-size the backing buffer.
    pub fn reserve(&mut self, additional: usize) {
        self.buf.reserve(additional);
    }

    fn ensure(&mut self, additional: usize) -> Result<()> {
        if let Some(limit) = self.limit {
            if self.buf.len() + additional > limit {
                return Err(CacheError::BufferTooSmall);
            }
        }
        Ok(())
    }

    pub fn put_null(&mut self) -> Result<()> {
        self.ensure(1)?;
        self.buf.push(TAG_NULL);
        Ok(())
    }

    pub fn put_bool(&mut self, value: bool) -> Result<()> {
        self.ensure(2)?;
        self.buf.push(TAG_BOOL);
        self.buf.push(u8::from(value));
        Ok(())
    }

    pub fn put_u64(&mut self, value: u64) -> Result<()> {
        self.ensure(9)?;
        self.buf.push(TAG_UINT);
        self.buf.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn put_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.ensure(5 + value.len())?;
        self.buf.push(TAG_BYTES);
        self.buf
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(value);
        Ok(())
    }

    pub fn put_str(&mut self, value: &str) -> Result<()> {
        self.ensure(5 + value.len())?;
        self.buf.push(TAG_UTF8);
        self.buf
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    pub fn start_array(&mut self) -> Result<()> {
        self.ensure(1)?;
        self.buf.push(TAG_ARRAY);
        self.depth += 1;
        Ok(())
    }

    pub fn start_structure(&mut self) -> Result<()> {
        self.ensure(1)?;
        self.buf.push(TAG_STRUCT);
        self.depth += 1;
        Ok(())
    }

    pub fn end_container(&mut self) -> Result<()> {
        assert!(self.depth > 0, "end_container without an open container");
        self.ensure(1)?;
        self.buf.push(TAG_END);
        self.depth -= 1;
        Ok(())
    }

    /// Append pre-encoded element bytes verbatim.
    pub fn put_raw(&mut self, encoded: &[u8]) -> Result<()> {
        self.ensure(encoded.len())?;
        self.buf.extend_from_slice(encoded);
        Ok(())
    }

    /// Encoded bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Container nesting depth currently open.
    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    /// Truncate back to a previously recorded length and nesting depth.
    /// A failed write can leave a container open; rewinding must restore
    /// the depth along with the bytes or `finalize` would reject the
    /// otherwise valid remainder.
    pub(crate) fn rewind_to(&mut self, len: usize, depth: usize) {
        debug_assert!(len <= self.buf.len());
        self.buf.truncate(len);
        self.depth = depth;
    }

    /// Finish writing, shrinking the buffer to its exact size.
    pub fn finalize(mut self) -> Vec<u8> {
        assert!(self.depth == 0, "finalize with an open container");
        self.buf.shrink_to_fit();
        self.buf
    }
}

impl Default for ElementWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a single unsigned integer element.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut writer = ElementWriter::new();
    writer.put_u64(value).expect("unbounded write");
    writer.finalize()
}

/// Encode a single byte-string element.
pub fn encode_bytes(value: &[u8]) -> Vec<u8> {
    let mut writer = ElementWriter::new();
    writer.put_bytes(value).expect("unbounded write");
    writer.finalize()
}

/// Encode an array element whose members are unsigned integers.
pub fn encode_u64_array(values: &[u64]) -> Vec<u8> {
    let mut writer = ElementWriter::new();
    writer.start_array().expect("unbounded write");
    for value in values {
        writer.put_u64(*value).expect("unbounded write");
    }
    writer.end_container().expect("unbounded write");
    writer.finalize()
}
