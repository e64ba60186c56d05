mod common;

use std::io::Cursor;

use common::World;
use stasis::{inspect_stream, EncodeOptions, PersistError, Record, RecordReader, Value};

#[test]
fn summary_counts_every_record_kind() {
    let mut src = World::new();
    let counter = src.library.get("counter").unwrap();
    let root = src.heap.new_table();
    let meta = src.heap.new_table();
    let ud = src.heap.new_userdata(vec![7; 3]);
    let cell = src.heap.new_upvalue(Value::Float(1.0));
    let f = src.heap.new_closure(counter, &[cell]);
    let g = src.heap.new_closure(src.library.get("greet").unwrap(), &[cell]);
    src.heap.attach_metatable(ud, Some(meta)).unwrap();
    src.heap.table_set(root, "ud", Value::Object(ud)).unwrap();
    src.heap.table_set(root, "f", Value::Object(f)).unwrap();
    src.heap.table_set(root, "g", Value::Object(g)).unwrap();
    src.heap.table_set(root, "self", Value::Object(root)).unwrap();
    src.heap
        .table_set(root, "out", Value::Object(src.builtins.print))
        .unwrap();

    let bytes = src.save(&[Value::Object(root), Value::Boolean(true)]);
    let summary = inspect_stream(Cursor::new(&bytes), 1 << 20).unwrap();

    assert_eq!(summary.roots, 2);
    assert_eq!(summary.tables, 2);
    assert_eq!(summary.userdata, 1);
    assert_eq!(summary.closures, 2);
    assert_eq!(summary.upvalues, 1);
    assert_eq!(summary.objects(), 6);
    // `self` and the second capture of `cell`.
    assert_eq!(summary.back_refs, 2);
    assert!(summary.permanents.contains("print"));
    assert_eq!(
        summary.named_code.iter().cloned().collect::<Vec<_>>(),
        vec!["counter".to_string(), "greet".to_string()]
    );
    assert_eq!(summary.inline_code, 0);
    assert_eq!(summary.max_depth, 3);
}

#[test]
fn inline_code_is_counted_and_flagged() {
    let mut src = World::new();
    let f = src.heap.new_closure(src.library.get("greet").unwrap(), &[]);
    let options = EncodeOptions {
        inline_code: true,
        ..EncodeOptions::default()
    };
    let bytes = src.try_save(&[Value::Object(f)], options).unwrap();
    let summary = inspect_stream(Cursor::new(&bytes), 1 << 20).unwrap();
    assert_eq!(summary.inline_code, 1);
    assert!(summary.named_code.is_empty());
    assert_eq!(summary.flags, stasis::FLAG_INLINE_CODE);
}

#[test]
fn record_reader_walks_records_in_stream_order() {
    let mut src = World::new();
    let root = src.heap.new_table();
    src.heap.table_set(root, 1i64, "one").unwrap();
    let bytes = src.save(&[Value::Object(root)]);

    let mut reader = RecordReader::new(Cursor::new(&bytes), 1024).unwrap();
    assert_eq!(reader.header().roots, 1);
    let mut records = Vec::new();
    while !reader.is_finished() {
        records.push(reader.next_record().unwrap());
    }
    assert!(matches!(records[0], Record::Object { index: 0, .. }));
    assert_eq!(
        records[1..],
        [
            Record::Nil,
            Record::Integer(1),
            Record::String(b"one".to_vec()),
            Record::Terminator,
            Record::End,
        ]
    );
    assert!(matches!(
        reader.next_record(),
        Err(PersistError::Corrupt("record read past end marker"))
    ));
}

#[test]
fn inspection_rejects_unbalanced_streams() {
    let src = World::new();
    let mut bytes = src.save(&[Value::Nil]);
    // Replace END with a stray terminator followed by END.
    let end = bytes.pop().unwrap();
    bytes.push(stasis::Tag::TERMINATOR.0);
    bytes.push(end);
    assert!(matches!(
        inspect_stream(Cursor::new(&bytes), 64),
        Err(PersistError::Corrupt("terminator outside object"))
    ));
}
