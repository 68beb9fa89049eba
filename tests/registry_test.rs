use condensed_encoder::category::{self, ARRAY, BOOLEAN, INT, STRING, STRUCT, VARINT};
use condensed_encoder::*;
use std::rc::Rc;

fn string_type(registry: &TypeRegistry) -> Rc<CondensedType> {
    Rc::clone(registry.default_type(STRING).unwrap())
}

#[test]
fn bootstrap_slots() {
    let registry = TypeRegistry::new();
    assert_eq!(registry.len(), CATEGORY_SLOTS);
    assert!(registry.is_empty());
    for id in 0..6 {
        let ty = registry.get(id).unwrap();
        assert_eq!(ty.id(), id);
        assert_eq!(ty.category().id() as usize, id);
    }
    for id in 6..CATEGORY_SLOTS {
        assert!(matches!(
            registry.get(id),
            Err(CondensedError::NoSuchType { .. })
        ));
    }
    assert_eq!(registry.get(INT as usize).unwrap().name(), "int32");
    assert_eq!(registry.get(VARINT as usize).unwrap().name(), "varint");
    assert_eq!(registry.iter().count(), 6);
    assert_eq!(registry.custom_types().count(), 0);
}

#[test]
fn default_type_lookup() {
    let registry = TypeRegistry::new();
    assert_eq!(registry.default_type(BOOLEAN).unwrap().name(), "boolean");
    assert!(matches!(
        registry.default_type(ARRAY),
        Err(CondensedError::NoDefaultType { category: 6 })
    ));
    assert!(matches!(
        registry.default_type(STRUCT),
        Err(CondensedError::NoDefaultType { category: 7 })
    ));
    assert!(matches!(
        registry.default_type(8),
        Err(CondensedError::UnknownCategory(8))
    ));
    assert!(matches!(
        category::category(15),
        Err(CondensedError::UnknownCategory(15))
    ));
}

#[test]
fn registered_ids_are_sequential() {
    let mut registry = TypeRegistry::new();
    let first = registry
        .register(|id| {
            Ok(CondensedType::new(
                id,
                "u8",
                "",
                TypeKind::Int(IntSpec::new(1, false, Overflow::Saturate)),
            ))
        })
        .unwrap();
    let second = registry
        .register(|id| Ok(CondensedType::new(id, "ascii", "", TypeKind::String(StringSpec::new(TextEncoding::Ascii)))))
        .unwrap();
    assert_eq!(first.id(), 16);
    assert_eq!(second.id(), 17);
    assert!(!registry.is_empty());
    assert!(Rc::ptr_eq(registry.get(17).unwrap(), &second));
    assert_eq!(
        registry.custom_types().map(|t| t.name()).collect::<Vec<_>>(),
        vec!["u8", "ascii"]
    );
}

#[test]
fn failed_registration_frees_the_id() {
    let mut registry = TypeRegistry::new();
    let result = registry.register(|id| {
        Ok(CondensedType::new(
            id,
            "bad",
            "",
            TypeKind::Int(IntSpec::new(9, true, Overflow::Error)),
        ))
    });
    assert!(result.is_err());
    assert_eq!(registry.len(), CATEGORY_SLOTS);

    let result = registry.register(|_| Err(CondensedError::Encode("no".to_string())));
    assert!(result.is_err());
    assert_eq!(registry.len(), CATEGORY_SLOTS);
}

#[test]
fn fill_rejects_misuse() {
    let mut registry = TypeRegistry::new();
    assert!(matches!(
        registry.fill(CondensedType::new(3, "float2", "", TypeKind::Float)),
        Err(CondensedError::ReservedTypeId { id: 3 })
    ));
    assert!(matches!(
        registry.fill(CondensedType::new(16, "float2", "", TypeKind::Float)),
        Err(CondensedError::NoSuchType { id: 16 })
    ));

    let id = registry.reserve();
    registry
        .fill(CondensedType::new(id, "float2", "", TypeKind::Float))
        .unwrap();
    assert!(matches!(
        registry.fill(CondensedType::new(id, "float3", "", TypeKind::Float)),
        Err(CondensedError::DuplicateType { id: 16 })
    ));

    // a reference to an id that was never handed out
    let id = registry.reserve();
    let dangling = CondensedType::new(
        id,
        "dangling[]",
        "",
        TypeKind::Array(ArraySpec::new(TypeRef::lazy(99, "ghost"), Embedding::Inline)),
    );
    assert!(matches!(
        registry.fill(dangling),
        Err(CondensedError::NoSuchType { id: 99 })
    ));
}

#[test]
fn release_only_drops_the_last_empty_slot() {
    let mut registry = TypeRegistry::new();
    let a = registry.reserve();
    let b = registry.reserve();
    registry.release(a);
    assert_eq!(registry.len(), 18);
    registry.release(b);
    assert_eq!(registry.len(), 17);
    // default slots are never released
    let mut fresh = TypeRegistry::new();
    fresh.release(CATEGORY_SLOTS - 1);
    assert_eq!(fresh.len(), CATEGORY_SLOTS);
}

/// `Node { next: Node }`, built through a graph so the field refers back lazily.
fn define_linked(sink: &mut dyn TypeSink, graph: &mut TypeGraph<&'static str>) -> TypeRef {
    graph
        .define(sink, "Node", "Node", |sink, graph, id| {
            let next = graph.get(&"Node").unwrap();
            assert!(next.is_lazy());
            assert_eq!(next.id(), id);
            assert!(graph.is_in_progress(&"Node"));
            let label = sink.registry().default_type(STRING)?.clone();
            Ok(CondensedType::new(
                id,
                "Node",
                "a linked list node",
                TypeKind::Struct(StructSpec::new(vec![
                    Field::new("label", "", label, Embedding::Inline),
                    Field::new("next", "", next, Embedding::Reference),
                ])?),
            ))
        })
        .unwrap()
}

#[test]
fn graph_builds_self_referencing_types() {
    let mut registry = TypeRegistry::new();
    let mut graph = TypeGraph::new();
    let node = define_linked(&mut registry, &mut graph);
    assert!(!node.is_lazy());
    assert_eq!(node.id(), 16);
    assert!(!graph.is_in_progress(&"Node"));

    let ty = node.resolve(&registry).unwrap();
    let TypeKind::Struct(spec) = ty.kind() else {
        panic!("expected a struct, got {:?}", ty.kind());
    };
    let next = &spec.field("next").unwrap().ty;
    assert!(next.is_lazy());
    assert_eq!(next.resolve(&registry).unwrap().name(), "Node");

    // defined once
    let again = define_linked(&mut registry, &mut graph);
    assert_eq!(again.id(), 16);
    assert_eq!(registry.len(), 17);
}

/// `Class { methods: Method[] }` and `Method { owner: Class }`.
fn define_mutual(sink: &mut dyn TypeSink, graph: &mut TypeGraph<&'static str>) -> Result<TypeRef> {
    graph.define(sink, "Class", "Class", |sink, graph, class_id| {
        let methods = graph.define(&mut *sink, "Method[]", "Method[]", |sink, graph, array_id| {
            let method = graph.define(&mut *sink, "Method", "Method", |sink, graph, method_id| {
                let owner = graph.get(&"Class").unwrap();
                let name = sink.registry().default_type(STRING)?.clone();
                Ok(CondensedType::new(
                    method_id,
                    "Method",
                    "",
                    TypeKind::Struct(StructSpec::new(vec![
                        Field::new("name", "", name, Embedding::Inline),
                        Field::new("owner", "", owner, Embedding::ReferencePerType),
                    ])?),
                ))
            })?;
            Ok(CondensedType::new(
                array_id,
                "Method[]",
                "",
                TypeKind::Array(ArraySpec::new(method, Embedding::Inline)),
            ))
        })?;
        let name = string_type(sink.registry());
        Ok(CondensedType::new(
            class_id,
            "Class",
            "",
            TypeKind::Struct(StructSpec::new(vec![
                Field::new("name", "", name, Embedding::Inline),
                Field::new("methods", "", methods, Embedding::Inline),
            ])?),
        ))
    })
}

#[test]
fn mutually_recursive_types_stream_out_of_id_order() {
    let mut out = OutputStream::new(Vec::new(), WriterOptions::default()).unwrap();
    let mut graph = TypeGraph::new();
    let class = define_mutual(&mut out, &mut graph).unwrap();
    assert_eq!(class.id(), 16);
    let class = Rc::clone(out.registry().get(class.id()).unwrap());

    let value = Value::record(
        "Class",
        [
            ("name", Value::from("Object")),
            (
                "methods",
                Value::list([Value::record(
                    "Method",
                    [("name", Value::from("hashCode")), ("owner", Value::Null)],
                )]),
            ),
        ],
    );
    out.write_instance(&class, &value).unwrap();

    let mut input = InputStream::from_bytes(out.close().unwrap()).unwrap();
    let mut defined = Vec::new();
    let mut instances = Vec::new();
    while let Some(message) = input.read_next_message().unwrap() {
        match message {
            Message::TypeDefinition(ty) => defined.push((ty.id(), ty.name().to_string())),
            Message::Instance(instance) => instances.push(instance),
            Message::Start(_) => {}
        }
    }
    // innermost types are completed, and therefore written, first
    assert_eq!(
        defined,
        vec![
            (18, "Method".to_string()),
            (17, "Method[]".to_string()),
            (16, "Class".to_string()),
        ]
    );
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].ty.name(), "Class");
    assert_eq!(instances[0].value, value);

    let method = input.registry().get(18).unwrap();
    let TypeKind::Struct(spec) = method.kind() else {
        panic!("expected a struct");
    };
    let owner = &spec.field("owner").unwrap().ty;
    assert_eq!(owner.id(), 16);
    assert_eq!(owner.resolve(input.registry()).unwrap().name(), "Class");
}

#[test]
fn reader_rebuilds_the_writer_registry() {
    let mut out = OutputStream::new(Vec::new(), WriterOptions::default()).unwrap();
    let string = string_type(out.registry());
    let millis = out
        .define_type(|id| {
            Ok(CondensedType::new(
                id,
                "millis",
                "milliseconds since start",
                TypeKind::VarInt(VarIntSpec::unsigned().with_multiplier(1000)),
            ))
        })
        .unwrap();
    let names = out
        .define_type(|id| {
            Ok(CondensedType::new(
                id,
                "string[]",
                "",
                TypeKind::Array(ArraySpec::new(string.clone(), Embedding::Reference)),
            ))
        })
        .unwrap();
    let event = out
        .define_type(|id| {
            Ok(CondensedType::new(
                id,
                "Event",
                "a timed event",
                TypeKind::Struct(StructSpec::new(vec![
                    Field::new("time", "start time", millis.clone(), Embedding::Inline),
                    Field::new("tags", "", names.clone(), Embedding::Inline),
                ])?),
            ))
        })
        .unwrap();
    assert_eq!((millis.id(), names.id(), event.id()), (16, 17, 18));

    let describe = |registry: &TypeRegistry| -> Vec<(usize, &'static str, String, String)> {
        registry
            .custom_types()
            .map(|t| {
                (
                    t.id(),
                    t.category().name(),
                    t.name().to_string(),
                    t.description().to_string(),
                )
            })
            .collect()
    };
    let expected = describe(out.registry());

    let mut input = InputStream::from_bytes(out.close().unwrap()).unwrap();
    while input.read_next_message().unwrap().is_some() {}
    assert_eq!(describe(input.registry()), expected);

    let read_millis = input.registry().get(16).unwrap();
    let TypeKind::VarInt(spec) = read_millis.kind() else {
        panic!("expected a varint");
    };
    assert!(!spec.signed);
    assert_eq!(spec.multiplier, 1000);

    let read_event = input.registry().get(18).unwrap();
    let TypeKind::Struct(spec) = read_event.kind() else {
        panic!("expected a struct");
    };
    let time = spec.field("time").unwrap();
    assert_eq!(time.description, "start time");
    assert_eq!(time.ty.id(), 16);
    assert_eq!(spec.field("tags").unwrap().ty.name(), "string[]");
}

#[test]
fn structural_categories_are_not_primitive() {
    let primitive: Vec<&str> = category::categories()
        .filter(|c| c.is_primitive())
        .map(|c| c.name())
        .collect();
    assert_eq!(
        primitive,
        vec!["varint", "int", "boolean", "float", "bfloat16", "string"]
    );
    assert!(!category::category(ARRAY).unwrap().is_primitive());
    assert!(!category::category(STRUCT).unwrap().is_primitive());
}
