// tests/task_stream.rs

mod common;
use crate::common::builders::TaskFileBuilder;
use crate::common::init_tracing;

use simplequeue::stream::{
    classify_line, strip_quotes, Directive, InflightTask, LineKind, StreamItem, TaskStream,
};
use simplequeue::types::Task;

fn inflight(command: &str) -> InflightTask {
    InflightTask {
        engine_id: "0".to_string(),
        host: "node1".to_string(),
        command: command.to_string(),
    }
}

#[test]
fn classify_skips_blanks_and_comments_but_keeps_directives() {
    assert_eq!(classify_line(""), None);
    assert_eq!(classify_line("   "), None);
    assert_eq!(classify_line("# just a comment"), None);
    assert_eq!(
        classify_line("  echo hi  "),
        Some(LineKind::Command("echo hi".to_string()))
    );
    assert_eq!(
        classify_line("#SQ_OP DRAIN"),
        Some(LineKind::Directive(Directive::Drain))
    );
    assert_eq!(
        classify_line("#SQ_OP drain"),
        Some(LineKind::Directive(Directive::Drain))
    );
}

#[test]
fn directive_with_wrong_shape_is_unrecognized() {
    assert_eq!(
        classify_line("#SQ_OP DRAIN now"),
        Some(LineKind::Directive(Directive::Unrecognized(
            "#SQ_OP DRAIN now".to_string()
        )))
    );
    assert_eq!(
        classify_line("#SQ_OP PAUSE"),
        Some(LineKind::Directive(Directive::Unrecognized(
            "#SQ_OP PAUSE".to_string()
        )))
    );
}

#[test]
fn strip_quotes_only_removes_matching_pair() {
    assert_eq!(strip_quotes("'echo a'"), Some("echo a"));
    assert_eq!(strip_quotes("\"echo b\""), Some("echo b"));
    assert_eq!(strip_quotes("'echo c\""), None);
    assert_eq!(strip_quotes("echo d"), None);
    assert_eq!(strip_quotes("'"), None);
    assert_eq!(strip_quotes("''"), Some(""));
}

#[tokio::test]
async fn next_yields_indexed_items_in_order() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = TaskFileBuilder::new()
        .comment("header")
        .task("echo a")
        .blank()
        .drain()
        .task("echo b")
        .write_to(dir.path(), "tasks.txt");

    let stream = TaskStream::open(&path).await.unwrap();

    let mut items = Vec::new();
    while let Some(item) = stream.next().await.unwrap() {
        items.push(item);
    }

    assert_eq!(
        items,
        vec![
            StreamItem::Task(Task {
                index: 0,
                command: "echo a".to_string()
            }),
            StreamItem::Directive {
                index: 1,
                directive: Directive::Drain
            },
            StreamItem::Task(Task {
                index: 2,
                command: "echo b".to_string()
            }),
        ]
    );
    // Not restartable.
    assert!(stream.next().await.unwrap().is_none());
}

#[tokio::test]
async fn missing_task_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = TaskStream::open(dir.path().join("nope.txt")).await;
    assert!(matches!(
        result,
        Err(simplequeue::errors::SqError::ConfigError(_))
    ));
}

#[tokio::test]
async fn dump_remaining_writes_inflight_then_unread_lines() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = TaskFileBuilder::new()
        .task("echo 0")
        .task("echo 1")
        .task("echo 2")
        .comment("not carried over")
        .drain()
        .task("echo 4")
        .write_to(dir.path(), "tasks.txt");

    let stream = TaskStream::open(&path).await.unwrap();

    // Read three tasks: 0 finishes, 1 stays in flight, 2 is handed back.
    for _ in 0..3 {
        stream.next().await.unwrap();
    }
    stream.set_inflight(0, inflight("echo 0"));
    stream.set_inflight(1, inflight("echo 1"));
    assert!(stream.set_done(0));
    stream
        .hand_back(Task {
            index: 2,
            command: "echo 2".to_string(),
        })
        .await;

    let written = stream.dump_remaining().await.unwrap();
    assert_eq!(written, 4);

    let remaining = std::fs::read_to_string(stream.remaining_path()).unwrap();
    assert_eq!(remaining, "echo 1\necho 2\n#SQ_OP DRAIN\necho 4\n");
    assert!(stream.inflight().is_empty());
}

#[tokio::test]
async fn dump_remaining_writes_quoted_commands_unquoted() {
    let dir = tempfile::tempdir().unwrap();
    let path = TaskFileBuilder::new()
        .task("'echo 0'")
        .task("\"echo 1\"")
        .task("'echo 2'")
        .write_to(dir.path(), "tasks.txt");

    let stream = TaskStream::open(&path).await.unwrap();
    let Some(StreamItem::Task(first)) = stream.next().await.unwrap() else {
        panic!("expected a task");
    };
    stream.next().await.unwrap();
    stream.set_inflight(1, inflight("echo 1"));
    stream.hand_back(first).await;

    stream.dump_remaining().await.unwrap();

    let remaining = std::fs::read_to_string(stream.remaining_path()).unwrap();
    assert_eq!(remaining, "echo 0\necho 1\necho 2\n");
}

#[tokio::test]
async fn dump_remaining_is_only_written_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = TaskFileBuilder::new()
        .task("echo a")
        .write_to(dir.path(), "tasks.txt");
    let stream = TaskStream::open(&path).await.unwrap();

    assert_eq!(stream.dump_remaining().await.unwrap(), 1);
    assert_eq!(stream.dump_remaining().await.unwrap(), 0);

    let remaining = std::fs::read_to_string(stream.remaining_path()).unwrap();
    assert_eq!(remaining, "echo a\n");
}

#[tokio::test]
async fn set_done_on_unknown_index_reports_false() {
    let dir = tempfile::tempdir().unwrap();
    let path = TaskFileBuilder::new()
        .task("echo a")
        .write_to(dir.path(), "tasks.txt");
    let stream = TaskStream::open(&path).await.unwrap();

    assert!(!stream.set_done(7));
}
