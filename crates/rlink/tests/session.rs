use indexmap::IndexMap;
use parking_lot::Mutex;
use rlink::{
    is_session_live, Backend, BridgeError, CaptureSink, Config, OutputStream, Session,
    SessionBuilder, Value, Vector,
};
use serde_json::json;
use std::sync::Arc;
use std::thread;

/// The runtime guard is process-wide, so tests in this file take turns
static SERIAL: Mutex<()> = Mutex::new(());

fn builder(sink: &CaptureSink) -> SessionBuilder {
    SessionBuilder::new()
        .config(Config::default())
        .backend(Backend::Reference)
        .sink(sink.clone())
}

fn open(sink: &CaptureSink) -> Session {
    builder(sink).open().unwrap()
}

#[test]
fn test_vector_roundtrip() {
    let _serial = SERIAL.lock();
    let session = open(&CaptureSink::new());

    let vec = Value::from(vec![1.0, 2.0, 3.0]);
    session.assign("vec", &vec).unwrap();
    assert_eq!(session.fetch("vec").unwrap(), vec);

    let words = Value::from(vec!["a", "b"]);
    session.assign("words", &words).unwrap();
    assert_eq!(session.fetch("words").unwrap(), words);
}

#[test]
fn test_length_one_vector_comes_back_as_scalar() {
    let _serial = SERIAL.lock();
    let session = open(&CaptureSink::new());

    let single = Value::Vector(Vector::Numeric(vec![4.2]));
    session.assign("one", &single).unwrap();
    let fetched = session.fetch("one").unwrap();
    assert_eq!(fetched, Value::Number(4.2));
    assert_eq!(fetched.numbers(), single.numbers());
}

#[test]
fn test_bindings_are_isolated() {
    let _serial = SERIAL.lock();
    let session = open(&CaptureSink::new());

    session.assign("X", &Value::from(1.0)).unwrap();
    session.assign("Y", &Value::from("other")).unwrap();
    assert_eq!(session.fetch("X").unwrap(), Value::Number(1.0));

    session.assign("X", &Value::from(2.0)).unwrap();
    assert_eq!(session.fetch("X").unwrap(), Value::Number(2.0));
    assert_eq!(session.fetch("Y").unwrap(), Value::from("other"));
}

#[test]
fn test_evaluated_assignment_is_fetchable() {
    let _serial = SERIAL.lock();
    let session = open(&CaptureSink::new());

    assert_eq!(session.evaluate("x <- 1").unwrap(), Value::Number(1.0));
    assert_eq!(session.fetch("x").unwrap(), Value::Number(1.0));
}

#[test]
fn test_fetch_unbound_name_is_undefined_symbol() {
    let _serial = SERIAL.lock();
    let session = open(&CaptureSink::new());

    let err = session.fetch("doesNotExist").unwrap_err();
    assert!(matches!(err, BridgeError::UndefinedSymbol(ref name) if name == "doesNotExist"));
    assert_eq!(err.to_string(), "object 'doesNotExist' not found");
    assert!(session.is_live());
}

#[test]
fn test_record_fields_pasted_to_sink() {
    let _serial = SERIAL.lock();
    let sink = CaptureSink::new();
    let session = open(&sink);

    let person = Value::record([
        ("firstName", Value::from("John")),
        ("lastName", Value::from("Doe")),
        ("age", Value::from(50.0)),
    ]);
    session.assign("Y", &person).unwrap();
    let result = session
        .evaluate("Name = paste(Y$firstName, Y$lastName, sep=\" \"); cat(Name)")
        .unwrap();

    assert!(result.is_null());
    assert_eq!(sink.stdout(), "John Doe");
    assert_eq!(session.fetch("Name").unwrap(), Value::from("John Doe"));
    assert_eq!(session.evaluate("Y$age + 1").unwrap(), Value::from(51.0));
    assert_eq!(session.fetch("Y").unwrap(), person);
}

#[test]
fn test_record_roundtrip_keeps_field_order() {
    let _serial = SERIAL.lock();
    let session = open(&CaptureSink::new());

    let mut fields = IndexMap::new();
    fields.insert("zeta".to_string(), Value::from(1.0));
    fields.insert("alpha".to_string(), Value::from(vec![true, false]));
    fields.insert(
        "nested".to_string(),
        Value::record([("inner", Value::from("x"))]),
    );
    let record = Value::Record(fields);

    session.assign("rec", &record).unwrap();
    let fetched = session.fetch("rec").unwrap();
    assert_eq!(fetched, record);
    let keys: Vec<&String> = fetched.as_record().unwrap().keys().collect();
    assert_eq!(keys, vec!["zeta", "alpha", "nested"]);
}

#[test]
fn test_strings_are_byte_exact() {
    let _serial = SERIAL.lock();
    let session = open(&CaptureSink::new());

    let text = Value::from("naïve 日本 \"quoted\"\n\ttab");
    session.assign("s", &text).unwrap();
    assert_eq!(session.fetch("s").unwrap(), text);
}

#[test]
fn test_closed_session_rejects_operations() {
    let _serial = SERIAL.lock();
    let session = open(&CaptureSink::new());
    session.close().unwrap();

    assert!(matches!(session.evaluate("1"), Err(BridgeError::SessionClosed)));
    assert!(matches!(
        session.assign("x", &Value::from(1.0)),
        Err(BridgeError::SessionClosed)
    ));
    assert!(matches!(session.fetch("x"), Err(BridgeError::SessionClosed)));
    assert!(matches!(
        session.assign_json("x", &json!([1])),
        Err(BridgeError::SessionClosed)
    ));
    // Second close is a no-op
    session.close().unwrap();
}

#[test]
fn test_heterogeneous_json_leaves_no_binding() {
    let _serial = SERIAL.lock();
    let session = open(&CaptureSink::new());

    let err = session.assign_json("bad", &json!([1, "two", 3])).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::HeterogeneousSequence { index: 1, .. }
    ));
    assert!(matches!(
        session.fetch("bad"),
        Err(BridgeError::UndefinedSymbol(_))
    ));

    session
        .assign_json("good", &json!({"firstName": "John", "age": 42}))
        .unwrap();
    let fetched = session.fetch("good").unwrap();
    assert_eq!(fetched.to_json(), json!({"firstName": "John", "age": 42.0}));
}

#[test]
fn test_second_open_fails_until_close() {
    let _serial = SERIAL.lock();
    let sink = CaptureSink::new();
    let first = open(&sink);

    for _ in 0..3 {
        assert!(matches!(
            builder(&sink).open(),
            Err(BridgeError::AlreadyInitialized)
        ));
    }
    assert!(BridgeError::AlreadyInitialized.is_retryable());

    first.close().unwrap();
    let second = open(&sink);
    assert!(second.is_live());
}

#[test]
fn test_drop_releases_guard() {
    let _serial = SERIAL.lock();
    {
        let _session = open(&CaptureSink::new());
        assert!(is_session_live());
    }
    assert!(!is_session_live());
}

#[test]
fn test_parse_and_eval_errors() {
    let _serial = SERIAL.lock();
    let session = open(&CaptureSink::new());

    assert!(matches!(
        session.evaluate("cat(doesNotExist))"),
        Err(BridgeError::Parse(_))
    ));
    let err = session.evaluate("cat(doesNotExist)").unwrap_err();
    assert!(matches!(err, BridgeError::Eval(ref m) if m == "object 'doesNotExist' not found"));
    let err = session.evaluate("stop('custom failure')").unwrap_err();
    assert!(matches!(err, BridgeError::Eval(ref m) if m == "custom failure"));
    assert!(session.is_live());
}

#[test]
fn test_invalid_identifiers_are_rejected() {
    let _serial = SERIAL.lock();
    let session = open(&CaptureSink::new());

    for name in ["2x", "if", "a b", ""] {
        assert!(matches!(
            session.assign(name, &Value::from(1.0)),
            Err(BridgeError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            session.fetch(name),
            Err(BridgeError::InvalidIdentifier(_))
        ));
    }
}

#[test]
fn test_nul_string_is_unrepresentable() {
    let _serial = SERIAL.lock();
    let session = open(&CaptureSink::new());

    let err = session.assign("s", &Value::from("a\0b")).unwrap_err();
    assert!(matches!(err, BridgeError::UnrepresentableType(_)));
    assert!(matches!(
        session.fetch("s"),
        Err(BridgeError::UndefinedSymbol(_))
    ));
}

#[test]
fn test_depth_bound_applies() {
    let _serial = SERIAL.lock();
    let session = builder(&CaptureSink::new()).max_depth(2).open().unwrap();

    let deep = Value::record([(
        "a",
        Value::record([("b", Value::record([("c", Value::from(1.0))]))]),
    )]);
    assert!(matches!(
        session.assign("deep", &deep),
        Err(BridgeError::CyclicValue { depth: 2 })
    ));

    let shallow = Value::record([("a", Value::record([("b", Value::from(1.0))]))]);
    session.assign("shallow", &shallow).unwrap();
    assert_eq!(session.fetch("shallow").unwrap(), shallow);
}

#[test]
fn test_evaluate_returns_record_and_opaque() {
    let _serial = SERIAL.lock();
    let session = open(&CaptureSink::new());

    assert_eq!(
        session.evaluate("list(a = 1, b = 'x')").unwrap(),
        Value::record([("a", Value::from(1.0)), ("b", Value::from("x"))])
    );
    assert_eq!(
        session.evaluate("paste").unwrap(),
        Value::Opaque("function".to_string())
    );
    assert!(matches!(
        session.evaluate("c(a = 1)").unwrap(),
        Value::Opaque(_)
    ));
    assert!(session.evaluate("").unwrap().is_null());
}

#[test]
fn test_output_streams_keep_order() {
    let _serial = SERIAL.lock();
    let sink = CaptureSink::new();
    let session = open(&sink);

    session
        .evaluate("print(1); message('between'); cat('after\\n')")
        .unwrap();
    assert_eq!(
        sink.chunks(),
        vec![
            (OutputStream::Stdout, "[1] 1\n".to_string()),
            (OutputStream::Message, "between\n".to_string()),
            (OutputStream::Stdout, "after\n".to_string()),
        ]
    );
}

#[test]
fn test_closure_sink() {
    let _serial = SERIAL.lock();
    let seen = Arc::new(Mutex::new(String::new()));
    let writer = Arc::clone(&seen);
    let session = SessionBuilder::new()
        .config(Config::default())
        .backend(Backend::Reference)
        .sink(move |chunk: &str, _stream: OutputStream| writer.lock().push_str(chunk))
        .open()
        .unwrap();

    session.evaluate("cat('hello', 'world')").unwrap();
    assert_eq!(seen.lock().as_str(), "hello world");
}

#[test]
fn test_concurrent_callers_are_serialized() {
    let _serial = SERIAL.lock();
    let session = Arc::new(open(&CaptureSink::new()));
    session.evaluate("counter <- 0").unwrap();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                for _ in 0..25 {
                    session.evaluate("counter <- counter + 1").unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(session.fetch("counter").unwrap(), Value::Number(100.0));
}

#[test]
fn test_deep_nesting_fails_without_crashing() {
    let _serial = SERIAL.lock();
    let session = open(&CaptureSink::new());

    let nested = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
    assert!(matches!(
        session.evaluate(&nested),
        Err(BridgeError::Parse(ref m)) if m.ends_with("contextstack overflow")
    ));
    assert!(matches!(
        session.evaluate("matrix(1, 1e10, 1e10)"),
        Err(BridgeError::Eval(ref m)) if m == "too many elements specified"
    ));
    assert!(session.is_live());
    assert_eq!(session.evaluate("(((1)))").unwrap(), Value::from(1.0));
}
