pub const STREAM_MAGIC: &[u8; 8] = b"STASISGR";
pub const STREAM_VERSION_V1: u16 = 1;
pub const STREAM_ENDIANNESS_LITTLE: u8 = 1;

/// Header flag: the writer had inline code enabled, so closures in the body may carry their code
/// inline. Informational only; decoders check each inline closure against their own options.
pub const FLAG_INLINE_CODE: u32 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(pub u8);

impl Tag {
    pub const NIL: Tag = Tag(0x00);
    pub const BOOLEAN: Tag = Tag(0x01);
    pub const INTEGER: Tag = Tag(0x02);
    pub const FLOAT: Tag = Tag(0x03);
    pub const STRING: Tag = Tag(0x04);
    /// Registered host object, followed by its identifier.
    pub const PERMANENT_REF: Tag = Tag(0x05);
    /// Object already emitted earlier in the stream, followed by its index.
    pub const BACK_REF: Tag = Tag(0x06);
    /// First occurrence of a heap object: index, kind, kind header, children, `TERMINATOR`.
    pub const OBJECT: Tag = Tag(0x07);
    pub const TERMINATOR: Tag = Tag(0x08);
    /// Written once after the last root.
    pub const END: Tag = Tag(0xFF);

    pub fn name(self) -> Option<&'static str> {
        match self {
            Tag::NIL => Some("NIL"),
            Tag::BOOLEAN => Some("BOOLEAN"),
            Tag::INTEGER => Some("INTEGER"),
            Tag::FLOAT => Some("FLOAT"),
            Tag::STRING => Some("STRING"),
            Tag::PERMANENT_REF => Some("PERMANENT_REF"),
            Tag::BACK_REF => Some("BACK_REF"),
            Tag::OBJECT => Some("OBJECT"),
            Tag::TERMINATOR => Some("TERMINATOR"),
            Tag::END => Some("END"),
            _ => None,
        }
    }
}

/// Kind byte following an `OBJECT` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectKind {
    Table = 1,
    Closure = 2,
    Upvalue = 3,
    Userdata = 4,
}

impl ObjectKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(ObjectKind::Table),
            2 => Some(ObjectKind::Closure),
            3 => Some(ObjectKind::Upvalue),
            4 => Some(ObjectKind::Userdata),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::Table => "table",
            ObjectKind::Closure => "closure",
            ObjectKind::Upvalue => "upvalue",
            ObjectKind::Userdata => "userdata",
        }
    }
}

/// How a closure's code travels in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CodeForm {
    Named = 0,
    Inline = 1,
}

impl CodeForm {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CodeForm::Named),
            1 => Some(CodeForm::Inline),
            _ => None,
        }
    }
}

impl core::fmt::Display for Tag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(name) = self.name() {
            write!(f, "{name}(0x{:02X})", self.0)
        } else {
            write!(f, "Tag(0x{:02X})", self.0)
        }
    }
}

impl core::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
