use std::cmp::Ordering;
use std::hash::Hash;
use std::io::Write;

use tracing::{debug, trace};

use crate::error::{PersistError, Result};
use crate::format::{CodeForm, ObjectKind, Tag, FLAG_INLINE_CODE};
use crate::identity::WriteIdentityTable;
use crate::io::WriteLeExt;
use crate::model::{CodeImage, ValueModel};
use crate::record::write_stream_header;
use crate::registry::PermanentRegistry;
use crate::value::{Kind, Value};

/// Ordering applied to table entries before they are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyOrder {
    /// Keep the model's order when it declares insertion-ordered tables, sort otherwise.
    #[default]
    Auto,
    /// Always sort by the total key order.
    Sorted,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeOptions {
    /// Embed closure code when the code image can dump it, instead of a named reference.
    pub inline_code: bool,
    pub key_order: KeyOrder,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeStats {
    pub roots: u32,
    pub objects: u32,
    pub back_refs: u32,
    pub permanents: u32,
}

enum Task<H> {
    Emit(Value<H>),
    Close,
}

/// Walks a live value graph depth-first and writes the tagged stream.
///
/// The walk only reads from the model. On error the bytes written so far are not a valid
/// stream and must be discarded.
pub struct Encoder<'a, M: ValueModel, C> {
    model: &'a M,
    registry: &'a PermanentRegistry<M::Handle>,
    code: &'a C,
    options: EncodeOptions,
}

impl<'a, M, C> Encoder<'a, M, C>
where
    M: ValueModel,
    C: CodeImage<M::Code>,
{
    pub fn new(model: &'a M, registry: &'a PermanentRegistry<M::Handle>, code: &'a C) -> Self {
        Self {
            model,
            registry,
            code,
            options: EncodeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EncodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn encode<W: Write>(&self, w: &mut W, roots: &[Value<M::Handle>]) -> Result<EncodeStats> {
        let root_count: u32 = roots
            .len()
            .try_into()
            .map_err(|_| PersistError::Corrupt("too many roots"))?;
        let flags = if self.options.inline_code {
            FLAG_INLINE_CODE
        } else {
            0
        };
        write_stream_header(w, flags, root_count)?;

        let mut walk = Walk {
            ids: WriteIdentityTable::new(),
            stack: Vec::new(),
            stats: EncodeStats {
                roots: root_count,
                ..EncodeStats::default()
            },
        };

        for root in roots {
            walk.stack.push(Task::Emit(root.clone()));
            while let Some(task) = walk.stack.pop() {
                match task {
                    Task::Close => w.write_u8(Tag::TERMINATOR.0)?,
                    Task::Emit(value) => self.emit(w, value, &mut walk)?,
                }
            }
        }
        w.write_u8(Tag::END.0)?;

        walk.stats.objects = walk.ids.len() as u32;
        debug!(
            roots = walk.stats.roots,
            objects = walk.stats.objects,
            back_refs = walk.stats.back_refs,
            permanents = walk.stats.permanents,
            "encoded value graph"
        );
        Ok(walk.stats)
    }

    fn emit<W: Write>(
        &self,
        w: &mut W,
        value: Value<M::Handle>,
        walk: &mut Walk<M::Handle>,
    ) -> Result<()> {
        let object = match value {
            Value::Nil => return w.write_u8(Tag::NIL.0),
            Value::Boolean(b) => {
                w.write_u8(Tag::BOOLEAN.0)?;
                return w.write_u8(b as u8);
            }
            Value::Integer(i) => {
                w.write_u8(Tag::INTEGER.0)?;
                return w.write_i64_le(i);
            }
            Value::Float(f) => {
                w.write_u8(Tag::FLOAT.0)?;
                return w.write_f64_le(f);
            }
            Value::String(bytes) => {
                w.write_u8(Tag::STRING.0)?;
                return w.write_len_prefixed_bytes_u32(&bytes);
            }
            Value::Object(object) => object,
        };

        // Registered objects are never walked, even if their kind has a content encoding.
        if let Some(identifier) = self.registry.lookup_by_object(&object) {
            trace!(identifier, "permanent reference");
            walk.stats.permanents += 1;
            w.write_u8(Tag::PERMANENT_REF.0)?;
            return w.write_string_u32(identifier);
        }

        let kind = self.model.object_kind(&object);
        let object_kind = match kind {
            Kind::Table => ObjectKind::Table,
            Kind::Closure => ObjectKind::Closure,
            Kind::Upvalue => ObjectKind::Upvalue,
            Kind::Userdata => ObjectKind::Userdata,
            other => {
                return Err(PersistError::UnsupportedValue { kind: other.name() });
            }
        };

        let (index, first_visit) = walk.ids.assign(&object)?;
        if !first_visit {
            walk.stats.back_refs += 1;
            w.write_u8(Tag::BACK_REF.0)?;
            return w.write_u32_le(index);
        }
        trace!(index, kind = %object_kind, "object");

        w.write_u8(Tag::OBJECT.0)?;
        w.write_u32_le(index)?;
        w.write_u8(object_kind as u8)?;

        // Children are pushed in reverse so they pop in stream order, followed by the terminator.
        match object_kind {
            ObjectKind::Table => {
                let mut entries: Vec<_> = self
                    .model
                    .table_entries(&object)?
                    .filter(|(k, v)| !k.is_nil() && !v.is_nil())
                    .collect();
                if self.options.key_order == KeyOrder::Sorted || !M::ORDERED_TABLES {
                    entries.sort_by(|(a, _), (b, _)| compare_keys(a, b, &walk.ids));
                }
                let metatable = self.model.metatable(&object)?.unwrap_or(Value::Nil);

                walk.stack.push(Task::Close);
                for (key, value) in entries.into_iter().rev() {
                    walk.stack.push(Task::Emit(value));
                    walk.stack.push(Task::Emit(key));
                }
                walk.stack.push(Task::Emit(metatable));
            }
            ObjectKind::Closure => {
                let code = self.model.closure_code(&object)?;
                let inline = if self.options.inline_code {
                    self.code.dump_code(&code)
                } else {
                    None
                };
                match inline {
                    Some(bytes) => {
                        w.write_u8(CodeForm::Inline as u8)?;
                        w.write_len_prefixed_bytes_u32(&bytes)?;
                    }
                    None => {
                        let name = self
                            .code
                            .code_ref_of(&code)
                            .ok_or(PersistError::UnregisteredCode)?;
                        w.write_u8(CodeForm::Named as u8)?;
                        w.write_string_u32(&name)?;
                    }
                }

                let upvalues = self.model.closure_upvalues(&object)?;
                let count: u32 = upvalues
                    .len()
                    .try_into()
                    .map_err(|_| PersistError::Corrupt("too many upvalues"))?;
                w.write_u32_le(count)?;

                walk.stack.push(Task::Close);
                walk.stack
                    .extend(upvalues.into_iter().rev().map(Task::Emit));
            }
            ObjectKind::Upvalue => {
                let value = self.model.upvalue_get(&object)?;
                walk.stack.push(Task::Close);
                walk.stack.push(Task::Emit(value));
            }
            ObjectKind::Userdata => {
                let payload = self.model.userdata_payload(&object)?;
                w.write_len_prefixed_bytes_u32(&payload)?;
                let metatable = self.model.metatable(&object)?.unwrap_or(Value::Nil);
                walk.stack.push(Task::Close);
                walk.stack.push(Task::Emit(metatable));
            }
        }
        Ok(())
    }
}

struct Walk<H> {
    ids: WriteIdentityTable<H>,
    stack: Vec<Task<H>>,
    stats: EncodeStats,
}

fn key_rank<H>(key: &Value<H>) -> u8 {
    match key {
        Value::Nil => 0,
        Value::Boolean(_) => 1,
        Value::Integer(_) => 2,
        Value::Float(_) => 3,
        Value::String(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over table keys. Objects compare by identity index when both have one; objects
/// not yet visited sort after visited ones and otherwise keep the model's order.
fn compare_keys<H: Clone + Eq + Hash>(
    a: &Value<H>,
    b: &Value<H>,
    ids: &WriteIdentityTable<H>,
) -> Ordering {
    key_rank(a).cmp(&key_rank(b)).then_with(|| match (a, b) {
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Object(x), Value::Object(y)) => match (ids.index_of(x), ids.index_of(y)) {
            (Some(i), Some(j)) => i.cmp(&j),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
        _ => Ordering::Equal,
    })
}
