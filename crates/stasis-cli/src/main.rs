#![forbid(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use stasis::{
    inspect_stream, restore_graph, save_graph, CodeRecord, DecodeOptions, EncodeOptions,
    KeyOrder, ObjectHeader, PermanentRegistry, Record, RecordReader, StreamSummary, Value,
};
use stasis_heap::{register_builtins, Heap, ObjRef, ProtoLibrary};

#[derive(Parser, Debug)]
#[command(name = "stasis", about = "Inspect and produce persisted interpreter value graphs.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarize a persisted stream without loading it into an interpreter
    Inspect {
        path: PathBuf,

        /// Print the summary as JSON
        #[arg(long, action = clap::ArgAction::SetTrue)]
        json: bool,

        /// Largest string, identifier or payload accepted from the stream
        #[arg(long, value_name = "BYTES", default_value_t = DecodeOptions::default().max_bytes_len)]
        max_bytes_len: usize,
    },

    /// List every record of a stream, indented by object nesting
    Dump {
        path: PathBuf,

        #[arg(long, value_name = "BYTES", default_value_t = DecodeOptions::default().max_bytes_len)]
        max_bytes_len: usize,
    },

    /// Write a sample graph (cycles, shared upvalues, builtins) and reload it as a check
    Demo {
        path: PathBuf,

        /// Embed closure code instead of naming it
        #[arg(long, action = clap::ArgAction::SetTrue)]
        inline_code: bool,

        /// Sort table keys instead of keeping insertion order
        #[arg(long, action = clap::ArgAction::SetTrue)]
        sorted: bool,

        /// Overwrite an existing output file
        #[arg(long, action = clap::ArgAction::SetTrue)]
        force: bool,
    },
}

#[derive(Debug, Serialize)]
struct SummaryJson {
    version: u16,
    flags: u32,
    roots: u32,
    records: u64,
    objects: u64,
    tables: u64,
    closures: u64,
    upvalues: u64,
    userdata: u64,
    back_refs: u64,
    scalars: u64,
    permanents: Vec<String>,
    named_code: Vec<String>,
    inline_code: u64,
    max_depth: usize,
}

impl From<&StreamSummary> for SummaryJson {
    fn from(s: &StreamSummary) -> Self {
        Self {
            version: s.version,
            flags: s.flags,
            roots: s.roots,
            records: s.records,
            objects: s.objects(),
            tables: s.tables,
            closures: s.closures,
            upvalues: s.upvalues,
            userdata: s.userdata,
            back_refs: s.back_refs,
            scalars: s.scalars,
            permanents: s.permanents.iter().cloned().collect(),
            named_code: s.named_code.iter().cloned().collect(),
            inline_code: s.inline_code,
            max_depth: s.max_depth,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match cli.command {
        Command::Inspect {
            path,
            json,
            max_bytes_len,
        } => {
            let summary = inspect_stream(open_input(&path)?, max_bytes_len)
                .with_context(|| format!("inspect {}", path.display()))?;
            if json {
                serde_json::to_writer_pretty(&mut out, &SummaryJson::from(&summary))?;
                writeln!(out)?;
            } else {
                print_summary(&mut out, &summary)?;
            }
        }
        Command::Dump {
            path,
            max_bytes_len,
        } => {
            dump_records(open_input(&path)?, &mut out, max_bytes_len)
                .with_context(|| format!("dump {}", path.display()))?;
        }
        Command::Demo {
            path,
            inline_code,
            sorted,
            force,
        } => {
            let options = EncodeOptions {
                inline_code,
                key_order: if sorted {
                    KeyOrder::Sorted
                } else {
                    KeyOrder::Auto
                },
            };
            write_demo(&path, options, force)?;
        }
    }
    Ok(())
}

fn open_input(path: &Path) -> anyhow::Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    Ok(BufReader::new(file))
}

fn print_summary(out: &mut impl Write, s: &StreamSummary) -> io::Result<()> {
    writeln!(out, "version:     {}", s.version)?;
    writeln!(out, "flags:       0x{:08x}", s.flags)?;
    writeln!(out, "roots:       {}", s.roots)?;
    writeln!(out, "records:     {}", s.records)?;
    writeln!(
        out,
        "objects:     {} (tables {}, closures {}, upvalues {}, userdata {})",
        s.objects(),
        s.tables,
        s.closures,
        s.upvalues,
        s.userdata
    )?;
    writeln!(out, "back refs:   {}", s.back_refs)?;
    writeln!(out, "scalars:     {}", s.scalars)?;
    writeln!(out, "max depth:   {}", s.max_depth)?;
    writeln!(out, "permanents:  {}", join(&s.permanents))?;
    writeln!(
        out,
        "code:        {} (inline {})",
        join(&s.named_code),
        s.inline_code
    )?;
    Ok(())
}

fn join<'a>(names: impl IntoIterator<Item = &'a String>) -> String {
    let names: Vec<&str> = names.into_iter().map(String::as_str).collect();
    if names.is_empty() {
        "-".to_string()
    } else {
        names.join(", ")
    }
}

fn dump_records<R: Read>(r: R, out: &mut impl Write, max_bytes_len: usize) -> anyhow::Result<()> {
    let mut reader = RecordReader::new(r, max_bytes_len)?;
    let header = reader.header();
    writeln!(
        out,
        "stream v{} flags=0x{:08x} roots={}",
        header.version, header.flags, header.roots
    )?;

    let mut open: Vec<u32> = Vec::new();
    loop {
        let record = reader.next_record()?;
        let indent = "  ".repeat(open.len());
        match record {
            Record::Object { index, header } => {
                writeln!(out, "{indent}#{index} {}", describe_object(&header))?;
                open.push(index);
            }
            Record::Terminator => {
                let Some(index) = open.pop() else {
                    bail!("terminator outside object");
                };
                writeln!(out, "{}end #{index}", "  ".repeat(open.len()))?;
            }
            Record::End => {
                if !open.is_empty() {
                    bail!("stream ended inside object #{}", open[open.len() - 1]);
                }
                reader.ensure_exhausted()?;
                writeln!(out, "end of stream")?;
                break;
            }
            other => writeln!(out, "{indent}{}", describe_scalar(&other))?,
        }
    }
    Ok(())
}

fn describe_object(header: &ObjectHeader) -> String {
    match header {
        ObjectHeader::Table => "table".to_string(),
        ObjectHeader::Upvalue => "upvalue".to_string(),
        ObjectHeader::Closure { code, upvalues } => match code {
            CodeRecord::Named(name) => format!("closure code={name} upvalues={upvalues}"),
            CodeRecord::Inline(bytes) => {
                format!("closure code=<inline {} bytes> upvalues={upvalues}", bytes.len())
            }
        },
        ObjectHeader::Userdata { payload } => format!("userdata payload={} bytes", payload.len()),
    }
}

fn describe_scalar(record: &Record) -> String {
    match record {
        Record::Nil => "nil".to_string(),
        Record::Boolean(b) => b.to_string(),
        Record::Integer(i) => format!("integer {i}"),
        Record::Float(f) => format!("float {f:?}"),
        Record::String(bytes) => format!("string {:?}", String::from_utf8_lossy(bytes)),
        Record::PermanentRef(identifier) => format!("permanent {identifier}"),
        Record::BackRef(index) => format!("ref #{index}"),
        Record::Object { .. } | Record::Terminator | Record::End => String::new(),
    }
}

struct DemoWorld {
    heap: Heap,
    registry: PermanentRegistry<ObjRef>,
    library: ProtoLibrary,
}

impl DemoWorld {
    fn new() -> stasis::Result<Self> {
        let mut heap = Heap::new();
        let mut registry = PermanentRegistry::new();
        register_builtins(&mut heap, &mut registry)?;
        let mut library = ProtoLibrary::new();
        library.define("counter.inc", vec![0x01, 0x10, 0x00]);
        library.define("counter.get", vec![0x02, 0x20]);
        Ok(Self {
            heap,
            registry,
            library,
        })
    }
}

/// Globals table holding a self reference, two closures over one counter cell, a class with a
/// self-indexing metatable and a userdata save slot.
fn build_demo(world: &mut DemoWorld) -> anyhow::Result<ObjRef> {
    let (Some(inc), Some(get)) = (
        world.library.get("counter.inc"),
        world.library.get("counter.get"),
    ) else {
        bail!("demo protos missing from library");
    };
    let print = world.registry.lookup_by_identifier("print").copied();
    let string_lib = world.registry.lookup_by_identifier("string").copied();

    let heap = &mut world.heap;
    let globals = heap.new_table();
    heap.table_set(globals, "_G", Value::Object(globals))?;
    if let (Some(print), Some(string_lib)) = (print, string_lib) {
        heap.table_set(globals, "print", Value::Object(print))?;
        heap.table_set(globals, "string", Value::Object(string_lib))?;
    }

    let count = heap.new_upvalue(Value::Integer(0));
    let inc = heap.new_closure(inc, &[count]);
    let get = heap.new_closure(get, &[count]);
    heap.table_set(globals, "inc", Value::Object(inc))?;
    heap.table_set(globals, "get", Value::Object(get))?;

    let class = heap.new_table();
    heap.table_set(class, "__index", Value::Object(class))?;
    heap.table_set(class, "name", "Player")?;
    let player = heap.new_table();
    heap.attach_metatable(player, Some(class))?;
    heap.table_set(player, "x", 12.5f64)?;
    heap.table_set(player, "y", -3.0f64)?;
    heap.table_set(player, "alive", true)?;
    heap.table_set(globals, "player", Value::Object(player))?;

    let slot = heap.new_userdata(b"slot-1".to_vec());
    heap.attach_metatable(slot, Some(class))?;
    heap.table_set(globals, "save_slot", Value::Object(slot))?;
    Ok(globals)
}

fn write_demo(path: &Path, options: EncodeOptions, force: bool) -> anyhow::Result<()> {
    let mut world = DemoWorld::new()?;
    let globals = build_demo(&mut world)?;

    let file = open_output(path, force).with_context(|| format!("create {}", path.display()))?;
    let mut w = BufWriter::new(file);
    let stats = save_graph(
        &mut w,
        &world.heap,
        &world.registry,
        &world.library,
        &[Value::Object(globals)],
        options,
    )
    .context("persist demo graph")?;
    w.flush()?;
    eprintln!(
        "wrote {}: {} objects, {} back refs, {} permanents",
        path.display(),
        stats.objects,
        stats.back_refs,
        stats.permanents
    );

    let mut fresh = DemoWorld::new()?;
    let decode = DecodeOptions {
        allow_inline_code: options.inline_code,
        ..DecodeOptions::default()
    };
    let roots = restore_graph(
        &mut open_input(path)?,
        &mut fresh.heap,
        &fresh.registry,
        &fresh.library,
        decode,
    )
    .context("reload demo graph")?;
    let Some(&Value::Object(loaded)) = roots.first() else {
        bail!("reloaded demo has no globals table");
    };
    if fresh.heap.table_get(loaded, "_G")? != Value::Object(loaded) {
        bail!("reloaded globals lost their self reference");
    }
    tracing::info!(objects = fresh.heap.len(), "reloaded demo graph");
    Ok(())
}

fn open_output(path: &Path, force: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    options.open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn demo_graph_dumps_with_balanced_nesting() {
        let mut world = DemoWorld::new().unwrap();
        let globals = build_demo(&mut world).unwrap();
        let mut bytes = Vec::new();
        save_graph(
            &mut bytes,
            &world.heap,
            &world.registry,
            &world.library,
            &[Value::Object(globals)],
            EncodeOptions::default(),
        )
        .unwrap();

        let mut out = Vec::new();
        dump_records(Cursor::new(&bytes), &mut out, 1 << 20).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "stream v1 flags=0x00000000 roots=1");
        assert_eq!(lines[1], "#0 table");
        assert_eq!(lines[2], "  nil");
        assert_eq!(lines[3], "  string \"_G\"");
        assert_eq!(lines[4], "  ref #0");
        assert!(lines.contains(&"  permanent print"));
        assert!(lines.contains(&"  #1 closure code=counter.inc upvalues=1"));
        assert!(lines.contains(&"    #2 upvalue"));
        assert!(lines.contains(&"  #3 closure code=counter.get upvalues=1"));
        assert!(lines.contains(&"    ref #2"), "shared counter cell");
        assert_eq!(lines[lines.len() - 2], "end #0");
        assert_eq!(lines[lines.len() - 1], "end of stream");
    }

    #[test]
    fn summary_json_lists_permanents() {
        let mut world = DemoWorld::new().unwrap();
        let globals = build_demo(&mut world).unwrap();
        let mut bytes = Vec::new();
        save_graph(
            &mut bytes,
            &world.heap,
            &world.registry,
            &world.library,
            &[Value::Object(globals)],
            EncodeOptions::default(),
        )
        .unwrap();

        let summary = inspect_stream(Cursor::new(&bytes), 1 << 20).unwrap();
        let json = serde_json::to_value(SummaryJson::from(&summary)).unwrap();
        assert_eq!(json["permanents"], serde_json::json!(["print", "string"]));
        assert_eq!(json["closures"], 2);
        assert_eq!(json["upvalues"], 1);
        assert_eq!(json["objects"], 7);
    }
}
