use std::io::Read;

use tracing::{debug, trace, warn};

use crate::error::{PersistError, Result};
use crate::identity::{Operand, PatchSite, ReadIdentityTable};
use crate::model::{CodeImage, ValueBuilder};
use crate::record::{CodeRecord, ObjectHeader, Record, RecordReader};
use crate::registry::PermanentRegistry;
use crate::value::Value;

/// Placeholder upvalues are allocated up front, so the declared count is capped independently of
/// `max_objects`.
const MAX_CLOSURE_UPVALUES: usize = 1 << 16;

#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    pub max_objects: usize,
    /// Upper bound for any single string, identifier, code blob or userdata payload.
    pub max_bytes_len: usize,
    /// Upper bound for objects open at the same time (nesting depth).
    pub max_depth: usize,
    pub allow_inline_code: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_objects: 1 << 24,
            max_bytes_len: 64 * 1024 * 1024,
            max_depth: 1 << 20,
            allow_inline_code: false,
        }
    }
}

#[derive(Debug)]
enum FrameState<H> {
    TableMetatable,
    TableKey,
    TableValue(Operand<H>),
    Closure { next: usize, count: usize },
    Upvalue { filled: bool },
    UserdataMetatable { filled: bool },
}

#[derive(Debug)]
struct Frame<H> {
    index: u32,
    object: H,
    state: FrameState<H>,
}

/// Rebuilds a value graph from a stream into a target interpreter.
///
/// On error the target has been partially mutated and must be discarded by the host.
pub struct Decoder<'a, M: ValueBuilder, C> {
    model: &'a mut M,
    registry: &'a PermanentRegistry<M::Handle>,
    code: &'a C,
    options: DecodeOptions,
}

impl<'a, M, C> Decoder<'a, M, C>
where
    M: ValueBuilder,
    C: CodeImage<M::Code>,
{
    pub fn new(
        model: &'a mut M,
        registry: &'a PermanentRegistry<M::Handle>,
        code: &'a C,
    ) -> Self {
        Self {
            model,
            registry,
            code,
            options: DecodeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DecodeOptions) -> Self {
        self.options = options;
        self
    }

    /// Decode every root in the stream, in the order they were encoded.
    pub fn decode<R: Read>(&mut self, r: R) -> Result<Vec<Value<M::Handle>>> {
        let mut reader = RecordReader::new(r, self.options.max_bytes_len)?;
        let header = reader.header();

        let mut ids = ReadIdentityTable::new();
        let mut frames = Vec::new();
        let mut roots = Vec::with_capacity((header.roots as usize).min(64));

        for position in 0..header.roots as usize {
            match self.read_tree(&mut reader, &mut ids, &mut frames)? {
                Operand::Ready(value) => roots.push(value),
                Operand::Pending(target) => {
                    roots.push(Value::Nil);
                    ids.defer(PatchSite::Root { position, target });
                }
            }
        }
        match reader.next_record()? {
            Record::End => {}
            _ => return Err(PersistError::Corrupt("trailing records after last root")),
        }
        reader.ensure_exhausted()?;

        let patches = ids.take_patches();
        let patch_count = patches.len();
        for site in patches {
            if let Err(err) = self.apply_patch(&ids, site, &mut roots) {
                if let PersistError::DanglingReference { index } = &err {
                    warn!(index, "pending patch targets an object the stream never produced");
                }
                return Err(err);
            }
        }
        if !ids.all_resolved() {
            return Err(PersistError::Corrupt("object left unterminated"));
        }

        debug!(
            roots = roots.len(),
            objects = ids.len(),
            patches = patch_count,
            "decoded value graph"
        );
        Ok(roots)
    }

    /// Read records until one complete value is available at the top level.
    fn read_tree<R: Read>(
        &mut self,
        reader: &mut RecordReader<R>,
        ids: &mut ReadIdentityTable<M::Handle>,
        frames: &mut Vec<Frame<M::Handle>>,
    ) -> Result<Operand<M::Handle>> {
        loop {
            let operand = match reader.next_record()? {
                Record::Nil => Operand::Ready(Value::Nil),
                Record::Boolean(b) => Operand::Ready(Value::Boolean(b)),
                Record::Integer(i) => Operand::Ready(Value::Integer(i)),
                Record::Float(f) => Operand::Ready(Value::Float(f)),
                Record::String(bytes) => Operand::Ready(Value::String(bytes)),
                Record::PermanentRef(identifier) => {
                    match self.registry.lookup_by_identifier(&identifier) {
                        Some(object) => Operand::Ready(Value::Object(object.clone())),
                        None => {
                            warn!(identifier = %identifier, "stream references unknown permanent");
                            return Err(PersistError::UnknownPermanent(identifier));
                        }
                    }
                }
                Record::BackRef(index) => ids.get_or_pending(index),
                Record::Object { index, header } => {
                    if ids.len() >= self.options.max_objects {
                        return Err(PersistError::LimitExceeded {
                            what: "object count",
                            limit: self.options.max_objects,
                        });
                    }
                    if frames.len() >= self.options.max_depth {
                        return Err(PersistError::LimitExceeded {
                            what: "nesting depth",
                            limit: self.options.max_depth,
                        });
                    }
                    let (object, state) = self.make_shell(header)?;
                    trace!(index, "reserved object");
                    ids.reserve(index, object.clone())?;
                    frames.push(Frame {
                        index,
                        object,
                        state,
                    });
                    continue;
                }
                Record::Terminator => {
                    let frame = frames
                        .pop()
                        .ok_or(PersistError::Corrupt("terminator outside object"))?;
                    finish(&frame.state)?;
                    ids.resolve(frame.index)?;
                    Operand::Ready(Value::Object(frame.object))
                }
                Record::End => return Err(PersistError::Corrupt("stream ended before all roots")),
            };

            match frames.last_mut() {
                None => return Ok(operand),
                Some(frame) => self.accept(frame, operand, ids)?,
            }
        }
    }

    fn make_shell(
        &mut self,
        header: ObjectHeader,
    ) -> Result<(M::Handle, FrameState<M::Handle>)> {
        let shell = match header {
            ObjectHeader::Table => (self.model.make_table()?, FrameState::TableMetatable),
            ObjectHeader::Closure { code, upvalues } => {
                let code = match code {
                    CodeRecord::Named(name) => self
                        .code
                        .resolve_code(&name)
                        .ok_or(PersistError::UnknownCode(name))?,
                    CodeRecord::Inline(bytes) => {
                        if !self.options.allow_inline_code {
                            return Err(PersistError::InlineCodeRejected);
                        }
                        self.code
                            .load_code(&bytes)
                            .ok_or(PersistError::Corrupt("inline code rejected by code image"))?
                    }
                };
                let count = upvalues as usize;
                let limit = self.options.max_objects.min(MAX_CLOSURE_UPVALUES);
                if count > limit {
                    return Err(PersistError::LimitExceeded {
                        what: "upvalue count",
                        limit,
                    });
                }
                let placeholders = vec![Value::Nil; count];
                (
                    self.model.make_closure(code, placeholders)?,
                    FrameState::Closure { next: 0, count },
                )
            }
            ObjectHeader::Upvalue => (
                self.model.make_upvalue(Value::Nil)?,
                FrameState::Upvalue { filled: false },
            ),
            ObjectHeader::Userdata { payload } => (
                self.model.make_userdata(payload)?,
                FrameState::UserdataMetatable { filled: false },
            ),
        };
        Ok(shell)
    }

    /// Hand one child value to the innermost open object.
    fn accept(
        &mut self,
        frame: &mut Frame<M::Handle>,
        operand: Operand<M::Handle>,
        ids: &mut ReadIdentityTable<M::Handle>,
    ) -> Result<()> {
        let object = frame.object.clone();
        let next = match std::mem::replace(&mut frame.state, FrameState::TableKey) {
            FrameState::TableMetatable => {
                self.metatable(&object, operand, ids)?;
                FrameState::TableKey
            }
            FrameState::TableKey => {
                if operand == Operand::Ready(Value::Nil) {
                    return Err(PersistError::Corrupt("nil table key"));
                }
                FrameState::TableValue(operand)
            }
            FrameState::TableValue(key) => {
                match (key, operand) {
                    (Operand::Ready(key), Operand::Ready(value)) => {
                        self.model.set_table_entry(&object, key, value)?;
                    }
                    (key, value) => ids.defer(PatchSite::TableEntry {
                        table: object,
                        key,
                        value,
                    }),
                }
                FrameState::TableKey
            }
            FrameState::Closure { next, count } => {
                if next >= count {
                    return Err(PersistError::Corrupt("closure has more upvalues than declared"));
                }
                match operand {
                    Operand::Ready(value) => {
                        self.model.set_closure_upvalue(&object, next, value)?
                    }
                    Operand::Pending(target) => ids.defer(PatchSite::ClosureUpvalue {
                        closure: object,
                        slot: next,
                        target,
                    }),
                }
                FrameState::Closure {
                    next: next + 1,
                    count,
                }
            }
            FrameState::Upvalue { filled } => {
                if filled {
                    return Err(PersistError::Corrupt("upvalue cell holds more than one value"));
                }
                match operand {
                    Operand::Ready(value) => self.model.set_upvalue(&object, value)?,
                    Operand::Pending(target) => ids.defer(PatchSite::UpvalueCell {
                        cell: object,
                        target,
                    }),
                }
                FrameState::Upvalue { filled: true }
            }
            FrameState::UserdataMetatable { filled } => {
                if filled {
                    return Err(PersistError::Corrupt("userdata has more than one child"));
                }
                self.metatable(&object, operand, ids)?;
                FrameState::UserdataMetatable { filled: true }
            }
        };
        frame.state = next;
        Ok(())
    }

    fn metatable(
        &mut self,
        object: &M::Handle,
        operand: Operand<M::Handle>,
        ids: &mut ReadIdentityTable<M::Handle>,
    ) -> Result<()> {
        match operand {
            Operand::Ready(Value::Nil) => {}
            Operand::Ready(metatable) => self.model.set_metatable(object, metatable)?,
            Operand::Pending(target) => ids.defer(PatchSite::Metatable {
                object: object.clone(),
                target,
            }),
        }
        Ok(())
    }

    fn apply_patch(
        &mut self,
        ids: &ReadIdentityTable<M::Handle>,
        site: PatchSite<M::Handle>,
        roots: &mut [Value<M::Handle>],
    ) -> Result<()> {
        match site {
            PatchSite::TableEntry { table, key, value } => {
                let key = ids.settle(key)?;
                let value = ids.settle(value)?;
                self.model.set_table_entry(&table, key, value)?;
                Ok(())
            }
            PatchSite::Metatable { object, target } => {
                let metatable = Value::Object(ids.target(target)?);
                self.model.set_metatable(&object, metatable)?;
                Ok(())
            }
            PatchSite::ClosureUpvalue {
                closure,
                slot,
                target,
            } => {
                let value = Value::Object(ids.target(target)?);
                self.model.set_closure_upvalue(&closure, slot, value)?;
                Ok(())
            }
            PatchSite::UpvalueCell { cell, target } => {
                let value = Value::Object(ids.target(target)?);
                self.model.set_upvalue(&cell, value)?;
                Ok(())
            }
            PatchSite::Root { position, target } => {
                let root = roots
                    .get_mut(position)
                    .ok_or(PersistError::Corrupt("root patch out of range"))?;
                *root = Value::Object(ids.target(target)?);
                Ok(())
            }
        }
    }
}

/// Check that an object's children are complete when its terminator arrives.
fn finish<H>(state: &FrameState<H>) -> Result<()> {
    match state {
        FrameState::TableKey => Ok(()),
        FrameState::TableMetatable => Err(PersistError::Corrupt("table missing metatable slot")),
        FrameState::TableValue(_) => Err(PersistError::Corrupt("table key without value")),
        FrameState::Closure { next, count } if next < count => {
            Err(PersistError::Corrupt("closure missing upvalues"))
        }
        FrameState::Closure { .. } => Ok(()),
        FrameState::Upvalue { filled: false } => Err(PersistError::Corrupt("empty upvalue cell")),
        FrameState::UserdataMetatable { filled: false } => {
            Err(PersistError::Corrupt("userdata missing metatable slot"))
        }
        FrameState::Upvalue { .. } | FrameState::UserdataMetatable { .. } => Ok(()),
    }
}
