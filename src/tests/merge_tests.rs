use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dex::dex_file::{DexFile, RefResolver, ACC_CONSTRUCTOR, ACC_PUBLIC, ACC_STATIC};
use crate::dex::encoded_values::EncodedValue;
use crate::dex::ids::IndexKind;
use crate::dex::instructions::{index_operands, IndexOperand};
use crate::dex::mutf8::DexString;
use crate::dex::opcodes::ReferenceType;
use crate::dex::table_of_contents::{SectionKind, TableOfContents};
use crate::dex::{read_u2, read_u4, DexError, DexErrorKind, NO_INDEX};
use crate::merge::diagnostics::{Diagnostic, LogSink};
use crate::merge::{merge_dex, ClassOrder, CollisionPolicy, DexMerger, MergeOptions, MergedDex};
use crate::tests::fixtures::{field_ref, method_ref, ClassSpec, DexBuilder, Insn, MethodSpec, Value, OBJECT};

fn merge_all(inputs: &[&[u8]], options: MergeOptions) -> Result<MergedDex, DexError> {
    let mut merger = DexMerger::new(options);
    for input in inputs {
        merger.add(input)?;
    }
    merger.merge()
}

fn app() -> DexBuilder {
    let app = "Lcom/example/App;";
    DexBuilder::new().class(
        ClassSpec::new(app)
            .source_file("App.java")
            .annotated("Lcom/example/Keep;", "app")
            .static_field("TAG", "Ljava/lang/String;")
            .static_value(Value::Str("App".into()))
            .instance_field("count", "I")
            .method(MethodSpec::new("<init>", "V", &[]).direct(ACC_PUBLIC | ACC_CONSTRUCTOR).code(vec![
                Insn::InvokeDirect(0, method_ref(OBJECT, "<init>", "V", &[])),
                Insn::ReturnVoid,
            ]).debug(&[]))
            .method(MethodSpec::new("run", "V", &["Ljava/lang/String;"]).code(vec![
                Insn::ConstString(0, "hello".into()),
                Insn::SgetObject(1, field_ref(app, "TAG", "Ljava/lang/String;")),
                Insn::NewInstance(2, "Ljava/lang/StringBuilder;".into()),
                Insn::InvokeStatic(method_ref("Lcom/example/Util;", "helper", "V", &[])),
                Insn::ReturnVoid,
            ]).debug(&["message"]).catches("Ljava/io/IOException;")),
    ).class(
        ClassSpec::new("Lcom/example/Util;")
            .static_field("LIMIT", "I")
            .static_value(Value::Int(-3))
            .method(MethodSpec::new("helper", "V", &[]).direct(ACC_PUBLIC | ACC_STATIC).code(vec![Insn::ReturnVoid])),
    )
}

fn library() -> DexBuilder {
    DexBuilder::new().version(37).class(
        ClassSpec::new("Lorg/lib/Base;")
            .implements("Ljava/lang/Runnable;")
            .source_file("Base.java")
            .static_field("KIND", "Ljava/lang/Class;")
            .static_value(Value::Type("Lorg/lib/Base;".into()))
            .method(MethodSpec::new("run", "V", &[]).code(vec![
                Insn::ConstStringJumbo(0, "jumbo".into()),
                Insn::ConstString(1, "hello".into()),
                Insn::InvokeStatic(method_ref("Lcom/example/Util;", "helper", "V", &[])),
                Insn::ReturnVoid,
            ])),
    ).class(
        ClassSpec::new("Lorg/lib/Derived;")
            .extends("Lorg/lib/Base;")
            .annotated("Lcom/example/Keep;", "derived")
            .method(MethodSpec::new("size", "I", &["J", "[I"])),
    )
}

fn describe(dex: &DexFile, op: &IndexOperand) -> String {
    match op.reference_type {
        ReferenceType::String => dex.string(op.value),
        ReferenceType::Type => dex.type_desc(op.value),
        ReferenceType::Field => format!("{:?}", dex.field_ref(op.value)),
        ReferenceType::Method => format!("{:?}", dex.method_ref(op.value)),
        ReferenceType::MethodProto => dex.proto(op.value),
        other => format!("{:?}", other),
    }
}

/// Every reference a class makes, resolved to descriptors.
fn resolved_classes(dex: &DexFile) -> BTreeMap<String, Vec<String>> {
    let mut classes = BTreeMap::new();
    for i in 0..dex.class_defs.len() {
        let item = dex.class_def_item(i).expect("decode class");
        let mut refs = vec![];
        if item.superclass_idx != NO_INDEX {
            refs.push(dex.type_desc(item.superclass_idx));
        }
        refs.extend(item.interfaces.0.iter().map(|t| dex.type_desc(*t)));
        if item.source_file_idx != NO_INDEX {
            refs.push(dex.string(item.source_file_idx));
        }
        if let Some(directory) = &item.annotations {
            for entry in directory.class_annotations.iter().flat_map(|s| s.entries.iter()) {
                refs.push(dex.type_desc(entry.annotation.type_idx));
                for element in &entry.annotation.elements {
                    let value = match &element.value {
                        EncodedValue::String(idx) => dex.string(*idx),
                        other => format!("{:?}", other),
                    };
                    refs.push(format!("{}={}", dex.string(element.name_idx), value));
                }
            }
        }
        if let Some(data) = &item.class_data {
            for f in data.static_fields.iter().chain(&data.instance_fields) {
                refs.push(format!("{:?} {:x}", dex.field_ref(f.field_idx), f.access_flags));
            }
            for m in data.methods() {
                refs.push(format!("{:?} {:x}", dex.method_ref(m.method_idx), m.access_flags));
                if let Some(code) = &m.code {
                    for op in index_operands(&code.insns).expect("walk code") {
                        refs.push(describe(dex, &op));
                    }
                    for pair in code.handlers.iter().flat_map(|h| h.handlers.iter()) {
                        refs.push(dex.type_desc(pair.type_idx));
                    }
                    for name in code.debug_info.iter().flat_map(|d| d.parameter_names.iter()) {
                        refs.push(dex.string(*name));
                    }
                }
            }
        }
        if let Some(values) = &item.static_values {
            refs.push(format!("{} static values", values.len()));
        }
        classes.insert(dex.type_desc(item.class_idx), refs);
    }
    classes
}

#[test]
fn two_empty_classes() {
    let a = DexBuilder::new().class(ClassSpec::new("LA;")).build();
    let b = DexBuilder::new().class(ClassSpec::new("LB;")).build();
    let merged = merge_dex(&[&a, &b], CollisionPolicy::Fail, &mut LogSink).unwrap();

    let toc = TableOfContents::read_from(&merged).unwrap();
    assert_eq!(toc.header.class_defs_size, 2);
    assert_eq!(toc.header.field_ids_size, 0);
    assert_eq!(toc.header.field_ids_off, 0);
    assert!(!toc.get(SectionKind::FieldIds).exists());
    assert_eq!(toc.header.type_ids_size, 3);

    let dex = DexFile::from_bytes(&merged).unwrap();
    let names: Vec<&str> = dex.class_defs.iter().map(|c| dex.type_descriptor(c.class_idx).unwrap()).collect();
    assert_eq!(names, vec!["LA;", "LB;"]);
    assert_eq!(dex.type_desc(dex.class_defs[0].superclass_idx), OBJECT);
}

#[test]
fn single_input_comes_back_unchanged() {
    for builder in [app(), library()] {
        let bytes = builder.build();
        let merged = merge_all(&[&bytes], MergeOptions::default()).unwrap();
        assert_eq!(merged.bytes, bytes);
    }
}

#[test]
fn merging_merged_output_is_stable() {
    let a = app().build();
    let b = library().build();
    let merged = merge_all(&[&a, &b], MergeOptions::default()).unwrap();
    let again = merge_all(&[&merged.bytes], MergeOptions::default()).unwrap();
    assert_eq!(again.bytes, merged.bytes);
    assert_eq!(again.stats.classes, 4);
}

#[test]
fn references_resolve_to_the_same_symbols() {
    let a = app().build();
    let b = library().build();
    let merged = merge_all(&[&a, &b], MergeOptions::default()).unwrap();

    let mut expected = resolved_classes(&DexFile::from_bytes(&a).unwrap());
    expected.extend(resolved_classes(&DexFile::from_bytes(&b).unwrap()));
    let actual = resolved_classes(&DexFile::from_bytes(&merged.bytes).unwrap());
    assert_eq!(actual, expected);

    let dex = DexFile::from_bytes(&merged.bytes).unwrap();
    assert_eq!(dex.version(), 37);
    assert_eq!(&merged.bytes[..8], b"dex\n037\0");
    // "hello" is referenced by both inputs and stored once
    assert_eq!(dex.strings.iter().filter(|s| *s == "hello").count(), 1);
}

const WORDS: [&str; 12] = ["a", "b", "alpha", "Alpha", "z", "é", "\u{ffff}", "\u{10000}", "zz", "<init>", "", "x\u{0}y"];
const NAMES: [&str; 6] = ["run", "stop", "get", "set", "apply", "call"];

#[test]
fn unified_tables_are_exact_unions() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for round in 0..8 {
        let count = rng.random_range(1..5);
        let mut inputs = vec![];
        for k in 0..count {
            let mut builder = DexBuilder::new();
            for _ in 0..rng.random_range(0..6) {
                builder = builder.string(WORDS[rng.random_range(0..WORDS.len())]);
            }
            let mut names = BTreeSet::new();
            for _ in 0..rng.random_range(0..5) {
                names.insert(NAMES[rng.random_range(0..NAMES.len())]);
            }
            let mut generated = ClassSpec::new(&format!("Lgen/R{}C{};", round, k));
            for name in names {
                let target = method_ref("Lgen/Shared;", NAMES[rng.random_range(0..NAMES.len())], "V", &[]);
                generated = generated.method(MethodSpec::new(name, "V", &[]).code(vec![Insn::InvokeStatic(target), Insn::ReturnVoid]));
            }
            inputs.push(builder.class(generated).build());
        }

        let refs: Vec<&[u8]> = inputs.iter().map(|i| i.as_slice()).collect();
        let merged = merge_dex(&refs, CollisionPolicy::Fail, &mut LogSink).unwrap();
        let out = DexFile::from_bytes(&merged).unwrap();
        let parsed: Vec<DexFile> = inputs.iter().map(|i| DexFile::from_bytes(i).unwrap()).collect();

        let mut strings: Vec<DexString> = parsed.iter().flat_map(|d| d.strings.iter().cloned()).collect();
        strings.sort();
        strings.dedup();
        assert_eq!(out.strings, strings, "round {}", round);
        assert!(out.strings.windows(2).all(|w| w[0] < w[1]));

        let types: BTreeSet<String> = parsed.iter().flat_map(|d| (0..d.types.len() as u32).map(move |t| d.type_desc(t))).collect();
        let out_types: Vec<String> = (0..out.types.len() as u32).map(|t| out.type_desc(t)).collect();
        assert_eq!(out_types.iter().cloned().collect::<BTreeSet<_>>(), types);
        assert_eq!(out_types.len(), types.len());

        let methods: BTreeSet<_> = parsed.iter().flat_map(|d| (0..d.methods.len() as u32).map(move |m| d.method_ref(m))).collect();
        let out_methods: BTreeSet<_> = (0..out.methods.len() as u32).map(|m| out.method_ref(m)).collect();
        assert_eq!(out_methods, methods);
        assert_eq!(out.methods.len(), methods.len());
        assert!(out.methods.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn duplicate_class_fails_by_default() {
    let first = DexBuilder::new().class(ClassSpec::new("LDup;").source_file("First.java")).build();
    let second = DexBuilder::new()
        .class(ClassSpec::new("LDup;").source_file("Second.java"))
        .class(ClassSpec::new("LOther;"))
        .build();
    let mut diagnostics = Vec::new();
    let e = merge_dex(&[&first, &second], CollisionPolicy::Fail, &mut diagnostics).unwrap_err();
    assert_eq!(e.kind(), &DexErrorKind::DuplicateClass { descriptor: "LDup;".to_string() });
    assert!(diagnostics.is_empty());
}

#[test]
fn keep_first_reports_and_keeps_the_earlier_class() {
    let first = DexBuilder::new().class(ClassSpec::new("LDup;").source_file("First.java")).build();
    let second = DexBuilder::new()
        .class(ClassSpec::new("LDup;").source_file("Second.java"))
        .class(ClassSpec::new("LOther;"))
        .build();

    let mut diagnostics = Vec::new();
    let options = MergeOptions { collision_policy: CollisionPolicy::KeepFirst, ..MergeOptions::default() };
    let mut merger = DexMerger::new(options).with_sink(&mut diagnostics);
    merger.add(&first).unwrap().add(&second).unwrap();
    let merged = merger.merge().unwrap();

    assert_eq!(merged.stats.classes, 2);
    assert_eq!(merged.stats.classes_dropped, 1);
    assert_eq!(diagnostics, vec![Diagnostic::ClassCollision { descriptor: "LDup;".to_string(), kept_input: 0, dropped_input: 1 }]);

    let dex = DexFile::from_bytes(&merged.bytes).unwrap();
    let dup = dex.class_def_item(0).unwrap();
    assert_eq!(dex.type_desc(dup.class_idx), "LDup;");
    assert_eq!(dex.string(dup.source_file_idx), "First.java");
}

fn many_methods(class: &str, prefix: &str, count: usize) -> Vec<u8> {
    let mut generated = ClassSpec::new(class);
    for i in 0..count {
        generated = generated.method(MethodSpec::new(&format!("{}{:05}", prefix, i), "V", &[]));
    }
    DexBuilder::new().class(generated).build()
}

#[test]
fn method_table_overflow() {
    let a = many_methods("LA;", "a", 35_000);
    let b = many_methods("LB;", "b", 35_000);
    let e = merge_all(&[&a, &b], MergeOptions::default()).unwrap_err();
    assert!(e.is_index_overflow());
    assert_eq!(e.kind(), &DexErrorKind::IndexOverflow { index: IndexKind::Method, count: 70_000, limit: 65_536 });
}

#[test]
fn method_table_at_the_limit() {
    let a = many_methods("LA;", "a", 32_768);
    let b = many_methods("LB;", "b", 32_768);
    let merged = merge_all(&[&a, &b], MergeOptions::default()).unwrap();
    assert_eq!(merged.stats.methods, 65_536);
    assert_eq!(TableOfContents::read_from(&merged.bytes).unwrap().header.method_ids_size, 65_536);
}

#[test]
fn narrow_string_operand_overflow() {
    let code = ClassSpec::new("LUser;")
        .method(MethodSpec::new("greet", "V", &[]).code(vec![Insn::ConstString(0, "m".into()), Insn::ReturnVoid]));
    let user = DexBuilder::new().class(code).build();
    let mut filler = DexBuilder::new();
    for i in 0..70_000 {
        filler = filler.string(&format!("a{:05}", i));
    }
    let filler = filler.build();

    let e = merge_all(&[&user, &filler], MergeOptions::default()).unwrap_err();
    assert!(e.is_index_overflow(), "{}", e);
    assert!(matches!(e.kind(), DexErrorKind::IndexOverflow { index: IndexKind::String, .. }));
    assert!(e.to_string().contains("const-string"), "{}", e);

    // the jumbo form takes a 32-bit index
    let jumbo = ClassSpec::new("LUser;")
        .method(MethodSpec::new("greet", "V", &[]).code(vec![Insn::ConstStringJumbo(0, "m".into()), Insn::ReturnVoid]));
    let user = DexBuilder::new().class(jumbo).build();
    let merged = merge_all(&[&user, &filler], MergeOptions::default()).unwrap();
    let dex = DexFile::from_bytes(&merged.bytes).unwrap();
    let refs = resolved_classes(&dex);
    assert!(refs["LUser;"].contains(&"m".to_string()));
}

#[test]
fn sections_follow_the_layout_order() {
    let a = app().build();
    let b = library().build();
    let merged = merge_all(&[&a, &b], MergeOptions::default()).unwrap();
    let bytes = &merged.bytes;
    let toc = TableOfContents::read_from(bytes).unwrap();

    let order = [
        SectionKind::Header,
        SectionKind::StringIds,
        SectionKind::TypeIds,
        SectionKind::ProtoIds,
        SectionKind::FieldIds,
        SectionKind::MethodIds,
        SectionKind::ClassDefs,
        SectionKind::StringData,
        SectionKind::TypeLists,
        SectionKind::EncodedArrays,
        SectionKind::Annotations,
        SectionKind::AnnotationSets,
        SectionKind::AnnotationsDirectories,
        SectionKind::DebugInfo,
        SectionKind::Code,
        SectionKind::ClassData,
        SectionKind::MapList,
    ];
    let offsets: Vec<u32> = order.iter().map(|k| toc.get(*k).offset.expect("section present")).collect();
    assert!(offsets.windows(2).all(|w| w[0] < w[1]), "{:?}", offsets);
    for kind in order {
        assert_eq!(toc.get(kind).offset.unwrap_or(0) % kind.alignment(), 0, "{}", kind);
    }
    assert!(!toc.get(SectionKind::AnnotationSetRefLists).exists());
    assert_eq!(toc.header.data_off, toc.get(SectionKind::StringData).offset.unwrap());
    assert_eq!(toc.header.data_off + toc.header.data_size, bytes.len() as u32);

    // map entries: non-empty, sorted by offset
    let mut ix = toc.header.map_off as usize;
    let count = read_u4(bytes, &mut ix).unwrap();
    assert_eq!(count as usize, order.len());
    let mut last = 0;
    for _ in 0..count {
        let _kind = read_u2(bytes, &mut ix).unwrap();
        let _unused = read_u2(bytes, &mut ix).unwrap();
        let size = read_u4(bytes, &mut ix).unwrap();
        let offset = read_u4(bytes, &mut ix).unwrap();
        assert!(size > 0);
        assert!(offset >= last);
        last = offset;
    }
}

#[test]
fn supertypes_first_order() {
    let bytes = DexBuilder::new()
        .class(ClassSpec::new("LA;").extends("LZ;"))
        .class(ClassSpec::new("LZ;").implements("LM;"))
        .class(ClassSpec::new("LM;"))
        .build();
    let order_of = |class_order| {
        let merged = merge_all(&[&bytes], MergeOptions { class_order, ..MergeOptions::default() }).unwrap();
        let dex = DexFile::from_bytes(&merged.bytes).unwrap();
        dex.class_defs.iter().map(|c| dex.type_desc(c.class_idx)).collect::<Vec<_>>()
    };
    assert_eq!(order_of(ClassOrder::TypeIndex), vec!["LA;", "LM;", "LZ;"]);
    assert_eq!(order_of(ClassOrder::SupertypesFirst), vec!["LM;", "LZ;", "LA;"]);
}

#[test]
fn checksum_verification_is_optional() {
    let mut bytes = app().build();
    bytes[8] ^= 0xff;
    assert!(merge_all(&[&bytes], MergeOptions::default()).is_ok());

    let strict = MergeOptions { verify_input_checksums: true, ..MergeOptions::default() };
    let e = merge_all(&[&bytes], strict).unwrap_err();
    assert_eq!(e.to_string(), "Checksum mismatch for input 0");
}

#[test]
fn unpaired_surrogate_strings_are_merged() {
    let lone = DexString::from_units(vec![0x61, 0xd800]);
    assert!(!lone.is_unicode());
    let odd = DexBuilder::new()
        .class(ClassSpec::new("LA;").method(
            MethodSpec::new("odd", "V", &[]).code(vec![Insn::ConstString(0, lone.clone()), Insn::ReturnVoid]),
        ))
        .build();
    let merged = merge_all(&[&odd, &app().build()], MergeOptions::default()).unwrap();
    let dex = DexFile::from_bytes(&merged.bytes).unwrap();
    assert_eq!(dex.strings.iter().filter(|s| **s == lone).count(), 1);

    let class = dex.class_defs.iter().position(|c| dex.type_desc(c.class_idx) == "LA;").expect("LA; survives");
    let item = dex.class_def_item(class).unwrap();
    let code = item.class_data.as_ref().and_then(|d| d.methods().find_map(|m| m.code.as_ref())).expect("code");
    let operands = index_operands(&code.insns).unwrap();
    assert_eq!(operands.len(), 1);
    assert_eq!(dex.strings[operands[0].value as usize], lone);

    // 'a' then U+D800 as a three byte sequence
    let encoded = [0x02, 0x61, 0xed, 0xa0, 0x80, 0x00];
    assert!(merged.bytes.windows(encoded.len()).any(|w| w == encoded));
}

fn shared_debug_info() -> DexBuilder {
    DexBuilder::new().class(
        ClassSpec::new("Lcom/example/Shared;")
            .implements("Ljava/lang/Runnable;")
            .source_file("Shared.java")
            .static_field("NAME", "Ljava/lang/String;")
            .static_value(Value::Str("shared".into()))
            .method(MethodSpec::new("first", "V", &["I"]).code(vec![
                Insn::ConstString(0, "one".into()),
                Insn::InvokeStatic(method_ref("Lcom/example/Util;", "helper", "V", &[])),
                Insn::ReturnVoid,
            ]).debug(&["value"]))
            .method(MethodSpec::new("second", "V", &["I"]).code(vec![
                Insn::ConstString(0, "two".into()),
                Insn::ReturnVoid,
            ]).debug(&["value"]).catches("Ljava/io/IOException;")),
    )
}

#[test]
fn code_first_layout_is_accepted() {
    let builder = shared_debug_info();
    let canonical = builder.build();
    let code_first = builder.build_code_first();
    assert_ne!(code_first, canonical);

    let toc = TableOfContents::read_from(&code_first).unwrap();
    let offset = |kind: SectionKind| toc.get(kind).offset.expect("section present");
    assert!(offset(SectionKind::Code) < offset(SectionKind::DebugInfo));
    assert!(offset(SectionKind::TypeLists) < offset(SectionKind::StringData));
    assert!(offset(SectionKind::ClassData) > offset(SectionKind::StringData));
    assert_eq!(toc.get(SectionKind::Code).size, 2);
    assert_eq!(toc.get(SectionKind::DebugInfo).size, 1);

    // map entries follow file order, so code is listed ahead of string data
    let mut ix = toc.header.map_off as usize;
    let count = read_u4(&code_first, &mut ix).unwrap();
    let mut kinds = vec![];
    for _ in 0..count {
        kinds.push(SectionKind::from_type_code(read_u2(&code_first, &mut ix).unwrap()).unwrap());
        ix += 10;
    }
    let position = |kind| kinds.iter().position(|k| *k == kind).unwrap();
    assert!(position(SectionKind::Code) < position(SectionKind::StringData));

    let dex = DexFile::from_bytes(&code_first).unwrap();
    assert_eq!(resolved_classes(&dex), resolved_classes(&DexFile::from_bytes(&canonical).unwrap()));

    // a lone input comes back in canonical layout
    let merged = merge_all(&[&code_first], MergeOptions::default()).unwrap();
    assert_eq!(merged.bytes, canonical);
}

#[test]
fn code_first_and_canonical_inputs_merge() {
    let a = app().build();
    let b = shared_debug_info().build_code_first();
    let merged = merge_all(&[&b, &a], MergeOptions::default()).unwrap();

    let mut expected = resolved_classes(&DexFile::from_bytes(&a).unwrap());
    expected.extend(resolved_classes(&DexFile::from_bytes(&b).unwrap()));
    let dex = DexFile::from_bytes(&merged.bytes).unwrap();
    assert_eq!(resolved_classes(&dex), expected);
    assert_eq!(merged.stats.classes, 3);

    // the shared debug_info_item is written once per method
    let toc = TableOfContents::read_from(&merged.bytes).unwrap();
    assert_eq!(toc.get(SectionKind::DebugInfo).size, 4);
}
