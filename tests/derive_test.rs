use condensed_encoder::category::{STRING, VARINT};
use condensed_encoder::*;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Condensed, Debug, Clone, PartialEq)]
struct GcEvent {
    id: i32,
    #[condensed(embedding = "reference")]
    name: String,
    duration: f32,
    young: bool,
}

fn gc_events() -> Vec<GcEvent> {
    (0..4)
        .map(|i| GcEvent {
            id: i,
            name: if i % 2 == 0 { "G1 Young" } else { "G1 Old" }.to_string(),
            duration: i as f32 * 0.5,
            young: i % 2 == 0,
        })
        .collect()
}

#[test]
fn encode_decode_round_trip() {
    init_logging();
    let events = gc_events();
    let bytes = encode(&events).unwrap();
    let decoded: Vec<GcEvent> = decode(bytes).unwrap();
    assert_eq!(decoded, events);
}

#[test]
fn derived_type_definition() {
    let mut out = OutputStream::new(Vec::new(), WriterOptions::default()).unwrap();
    let ty = out.type_of::<GcEvent>().unwrap();
    assert_eq!(ty.id(), 16);
    assert_eq!(ty.name(), "GcEvent");
    let TypeKind::Struct(spec) = ty.kind() else {
        panic!("expected a struct");
    };
    let fields: Vec<(&str, &str, Embedding)> = spec
        .fields()
        .iter()
        .map(|f| (f.name.as_str(), f.ty.name(), f.embedding))
        .collect();
    assert_eq!(
        fields,
        vec![
            ("id", "varint", Embedding::Inline),
            ("name", "string", Embedding::Reference),
            ("duration", "float", Embedding::Inline),
            ("young", "boolean", Embedding::Inline),
        ]
    );

    // defined once per stream
    let again = out.type_of::<GcEvent>().unwrap();
    assert!(std::rc::Rc::ptr_eq(&ty, &again));
    assert_eq!(out.registry().len(), 17);
}

#[test]
fn repeated_names_are_written_once() {
    let events = gc_events();
    let condensed = encode(&events).unwrap();

    let mut out = OutputStream::new(Vec::new(), WriterOptions::default()).unwrap();
    let string = out.registry().default_type(STRING).unwrap().clone();
    let varint = out.registry().default_type(VARINT).unwrap().clone();
    let float = out.registry().default_type(category::FLOAT).unwrap().clone();
    let boolean = out.registry().default_type(category::BOOLEAN).unwrap().clone();
    let mapping = StructMapping::new("GcEvent", "")
        .field("id", "", varint, Embedding::Inline, |e: &GcEvent| e.id)
        .field("name", "", string, Embedding::Inline, |e: &GcEvent| e.name.clone())
        .field("duration", "", float, Embedding::Inline, |e: &GcEvent| e.duration)
        .field("young", "", boolean, Embedding::Inline, |e: &GcEvent| e.young);
    let ty = mapping.define(&mut out).unwrap();
    for event in &events {
        out.write_instance(&ty, &mapping.to_value(event)).unwrap();
    }
    let inline = out.close().unwrap();
    assert!(condensed.len() < inline.len());

    let decoded: Vec<GcEvent> = decode(inline).unwrap();
    assert_eq!(decoded, events);
}

/// A garbage collection pause.
#[derive(Condensed, Debug, PartialEq)]
#[condensed(name = "jdk.GCPause")]
struct Pause {
    /// Pause length in milliseconds
    duration: i64,
    #[condensed(name = "gcName", description = "collector", embedding = "reference_per_type")]
    name: String,
    #[condensed(skip)]
    cached: u32,
}

#[test]
fn attributes_and_doc_comments() {
    let mut out = OutputStream::new(Vec::new(), WriterOptions::default()).unwrap();
    let ty = out.type_of::<Pause>().unwrap();
    assert_eq!(ty.name(), "jdk.GCPause");
    assert_eq!(Pause::type_name(), "jdk.GCPause");
    assert_eq!(ty.description(), "A garbage collection pause.");
    let TypeKind::Struct(spec) = ty.kind() else {
        panic!("expected a struct");
    };
    assert_eq!(spec.fields().len(), 2);
    let duration = spec.field("duration").unwrap();
    assert_eq!(duration.description, "Pause length in milliseconds");
    let name = spec.field("gcName").unwrap();
    assert_eq!(name.description, "collector");
    assert_eq!(name.embedding, Embedding::ReferencePerType);
    assert!(spec.field("cached").is_none());

    let pause = Pause {
        duration: 12,
        name: "G1".to_string(),
        cached: 99,
    };
    out.write(&pause).unwrap();
    let mut input = InputStream::from_bytes(out.close().unwrap()).unwrap();
    let read: Pause = input.read_as().unwrap().unwrap();
    assert_eq!(
        read,
        Pause {
            cached: 0,
            ..pause
        }
    );
}

/// A stack frame with its caller and callees.
#[derive(Condensed, Debug, PartialEq)]
struct Frame {
    method: String,
    line: i32,
    caller: Option<Box<Frame>>,
    children: Vec<Frame>,
}

fn leaf(method: &str, line: i32) -> Frame {
    Frame {
        method: method.to_string(),
        line,
        caller: None,
        children: Vec::new(),
    }
}

#[test]
fn recursive_types_are_defined_once() {
    let mut out = OutputStream::new(Vec::new(), WriterOptions::default()).unwrap();
    let frame = out.type_of::<Frame>().unwrap();
    assert_eq!(frame.id(), 16);
    let children = out.registry().get(17).unwrap();
    assert_eq!(children.name(), "Frame[]");
    assert_eq!(out.registry().len(), 18);

    let TypeKind::Struct(spec) = frame.kind() else {
        panic!("expected a struct");
    };
    let caller = spec.field("caller").unwrap();
    assert!(caller.ty.is_lazy());
    assert_eq!(caller.ty.id(), 16);
    assert_eq!(caller.embedding, Embedding::Reference);
    assert_eq!(spec.field("children").unwrap().ty.id(), 17);
}

#[test]
fn recursive_values_round_trip() {
    let main = leaf("main", 1);
    let run = Frame {
        method: "run".to_string(),
        line: 10,
        caller: Some(Box::new(leaf("main", 1))),
        children: vec![leaf("parse", 20), leaf("eval", 30)],
    };
    let frames = vec![main, run];
    let decoded: Vec<Frame> = decode(encode(&frames).unwrap()).unwrap();
    assert_eq!(decoded, frames);
}

#[test]
fn decoded_recursive_values_complete() {
    let frames = vec![Frame {
        method: "outer".to_string(),
        line: 1,
        caller: Some(Box::new(Frame {
            method: "outermost".to_string(),
            line: 0,
            caller: None,
            children: vec![leaf("sibling", 5)],
        })),
        children: vec![leaf("inner", 2)],
    }];
    let mut input = InputStream::from_bytes(encode(&frames).unwrap()).unwrap();
    let instance = input.read_next_instance().unwrap().unwrap();
    let record = instance.value.as_struct().unwrap();
    assert!(!record.is_resolved("caller"));

    let mut visited = std::collections::HashSet::new();
    instance.value.ensure_recursively_complete(&mut visited);
    assert!(record.is_resolved("caller"));
    // four frames, each with its own children list
    assert_eq!(visited.len(), 8);
    assert_eq!(Frame::from_value(&instance.value).unwrap(), frames.into_iter().next().unwrap());
}

#[derive(Condensed, Debug)]
struct Strict {
    #[condensed(embedding = "inline")]
    note: Option<String>,
}

#[test]
fn inline_options_reject_none() {
    let mut out = OutputStream::new(Vec::new(), WriterOptions::default()).unwrap();
    assert!(matches!(
        out.write(&Strict { note: None }),
        Err(CondensedError::NullNotAllowed { .. })
    ));
    out.write(&Strict {
        note: Some("ok".to_string()),
    })
    .unwrap();
    let mut input = InputStream::from_bytes(out.close().unwrap()).unwrap();
    let read: Strict = input.read_as().unwrap().unwrap();
    assert_eq!(read.note.as_deref(), Some("ok"));
}

#[derive(Condensed, Debug, PartialEq)]
struct Tagged {
    tags: Vec<String>,
    parent: Option<String>,
}

#[test]
fn options_and_vectors() {
    let records = vec![
        Tagged {
            tags: vec!["a".to_string(), "b".to_string()],
            parent: None,
        },
        Tagged {
            tags: Vec::new(),
            parent: Some("root".to_string()),
        },
    ];
    let decoded: Vec<Tagged> = decode(encode(&records).unwrap()).unwrap();
    assert_eq!(decoded, records);
    assert_eq!(<Vec<String>>::type_name(), "string[]");
}

#[test]
fn decoding_into_the_wrong_type_fails() {
    let bytes = encode(&gc_events()).unwrap();
    assert!(matches!(
        decode::<Pause>(bytes),
        Err(CondensedError::TypeMismatch { found: "null", .. })
    ));
    assert!(matches!(
        i8::from_value(&Value::Int(300)),
        Err(CondensedError::Decode(_))
    ));
    assert!(matches!(
        u32::from_value(&Value::from("1")),
        Err(CondensedError::TypeMismatch { found: "string", .. })
    ));
}
