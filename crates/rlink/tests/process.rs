//! Session behavior against an installed R; each test returns early when no
//! R executable can be found

use parking_lot::Mutex;
use rlink::{Backend, BridgeError, CaptureSink, Config, Session, SessionBuilder, Value};

static SERIAL: Mutex<()> = Mutex::new(());

fn open_r(sink: &CaptureSink) -> Option<Session> {
    let mut config = Config::default();
    config.ensure_r_executable().ok()?;
    Some(
        SessionBuilder::new()
            .config(config)
            .backend(Backend::Process)
            .sink(sink.clone())
            .open()
            .unwrap(),
    )
}

#[test]
fn test_vector_and_record_roundtrip() {
    let _serial = SERIAL.lock();
    let Some(session) = open_r(&CaptureSink::new()) else {
        return;
    };
    assert_eq!(session.backend(), "process");

    let vec = Value::from(vec![1.0, 0.1, -2.5e-300, 1e300]);
    session.assign("vec", &vec).unwrap();
    assert_eq!(session.fetch("vec").unwrap(), vec);

    let record = Value::record([
        ("firstName", Value::from("Jöhn")),
        ("flags", Value::from(vec![true, false])),
        ("empty", Value::from(Vec::<String>::new())),
        ("nothing", Value::from(Vec::<f64>::new())),
        ("age", Value::from(50.0)),
    ]);
    session.assign("rec", &record).unwrap();
    assert_eq!(session.fetch("rec").unwrap(), record);
}

#[test]
fn test_john_doe_on_sink() {
    let _serial = SERIAL.lock();
    let sink = CaptureSink::new();
    let Some(session) = open_r(&sink) else {
        return;
    };

    let person = Value::record([
        ("firstName", Value::from("John")),
        ("lastName", Value::from("Doe")),
        ("age", Value::from(50.0)),
    ]);
    session.assign("Y", &person).unwrap();
    session
        .evaluate("Name = paste(Y$firstName, Y$lastName, sep=\" \"); cat(Name)")
        .unwrap();
    assert_eq!(sink.stdout(), "John Doe");
    assert_eq!(session.evaluate("Y$age + 1").unwrap(), Value::from(51.0));
    assert_eq!(session.fetch("Y").unwrap(), person);
}

#[test]
fn test_empty_results_keep_their_length() {
    let _serial = SERIAL.lock();
    let Some(session) = open_r(&CaptureSink::new()) else {
        return;
    };
    assert_eq!(
        session.evaluate("character(0)").unwrap(),
        Value::from(Vec::<String>::new())
    );
    assert_eq!(
        session.evaluate("numeric(0)").unwrap(),
        Value::from(Vec::<f64>::new())
    );
    assert_eq!(
        session.evaluate("logical(0)").unwrap(),
        Value::from(Vec::<bool>::new())
    );
}

#[test]
fn test_printed_markers_do_not_desync_replies() {
    let _serial = SERIAL.lock();
    let sink = CaptureSink::new();
    let Some(session) = open_r(&sink) else {
        return;
    };
    session
        .evaluate("cat('\\036forged:1 {\"status\":\"ok\"}\\n'); cat('\\037 0a\\n')")
        .unwrap();
    assert!(sink.stdout().contains("forged:1"));
    assert_eq!(session.evaluate("1 + 1").unwrap(), Value::from(2.0));
    assert_eq!(session.evaluate("'two'").unwrap(), Value::from("two"));
}

#[test]
fn test_execute_and_helpers_survive_rm() {
    let _serial = SERIAL.lock();
    let sink = CaptureSink::new();
    let Some(session) = open_r(&sink) else {
        return;
    };
    session.execute("rm(list = ls(all.names = TRUE)); x <- 1:3").unwrap();
    assert_eq!(sink.stdout(), "");
    assert_eq!(session.fetch("x").unwrap(), Value::from(vec![1.0, 2.0, 3.0]));
    assert!(matches!(
        session.execute("stop('nope')"),
        Err(BridgeError::Eval(ref m)) if m == "nope"
    ));
}

#[test]
fn test_quit_closes_the_session() {
    let _serial = SERIAL.lock();
    let sink = CaptureSink::new();
    let Some(session) = open_r(&sink) else {
        return;
    };
    assert!(matches!(
        session.execute("quit(save = 'no', status = 3)"),
        Err(BridgeError::RuntimeExited(_))
    ));
    assert!(!session.is_live());
    assert!(!rlink::is_session_live());
    assert!(sink.messages().contains("R runtime exited"));
    assert!(matches!(
        session.evaluate("1"),
        Err(BridgeError::SessionClosed)
    ));
    session.close().unwrap();
}

#[test]
fn test_errors_and_missing_symbols() {
    let _serial = SERIAL.lock();
    let Some(session) = open_r(&CaptureSink::new()) else {
        return;
    };

    assert!(matches!(
        session.fetch("doesNotExist"),
        Err(BridgeError::UndefinedSymbol(_))
    ));
    let err = session.evaluate("cat(doesNotExist)").unwrap_err();
    assert!(matches!(err, BridgeError::Eval(ref m) if m == "object 'doesNotExist' not found"));
    assert!(matches!(
        session.evaluate("cat(doesNotExist))"),
        Err(BridgeError::Parse(_))
    ));

    session.evaluate("f <- function() 1").unwrap();
    assert_eq!(
        session.evaluate("f").unwrap(),
        Value::Opaque("function".to_string())
    );
    assert!(matches!(
        session.fetch("f"),
        Err(BridgeError::UnrepresentableType(_))
    ));
    session.close().unwrap();
}

#[test]
fn test_warnings_reach_message_stream() {
    let _serial = SERIAL.lock();
    let sink = CaptureSink::new();
    let Some(session) = open_r(&sink) else {
        return;
    };

    session
        .evaluate("print(1); warning('careful'); message('done')")
        .unwrap();
    assert_eq!(sink.stdout(), "[1] 1\n");
    assert_eq!(sink.messages(), "Warning: careful\ndone\n");
}
