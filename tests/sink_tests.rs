use batchwerk::engine::{BatchService, TaskContext};
use batchwerk::pipeline::{Line, LineSource, ListBatchProcessor};
use batchwerk::sink::SqliteSink;
use batchwerk::types::BatchOpts;
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;

const INPUT: &str = "alpha\nbeta\r\n\ngamma\ndelta\nepsilon";

fn line(number: u64, text: &str) -> Line {
    Line {
        number,
        text: text.to_string(),
    }
}

// --- line source ---

#[test]
fn test_line_source_numbers_and_trims() {
    use batchwerk::pipeline::{ItemSource, Pull};
    let mut src = LineSource::new(Cursor::new("a\r\nb\n\nc"));
    let mut got = Vec::new();
    while let Pull::Item(l) = src.pull().unwrap() {
        got.push(l);
    }
    assert_eq!(got, vec![line(1, "a"), line(2, "b"), line(3, ""), line(4, "c")]);
}

#[test]
fn test_line_source_skip_empty_keeps_numbering() {
    use batchwerk::pipeline::{ItemSource, Pull};
    let mut src = LineSource::new(Cursor::new("a\n  \nb\n")).skip_empty(true);
    assert_eq!(src.pull().unwrap(), Pull::Item(line(1, "a")));
    assert_eq!(src.pull().unwrap(), Pull::Item(line(3, "b")));
    assert_eq!(src.pull().unwrap(), Pull::End);
}

// --- sqlite ---

#[test]
fn test_write_and_load_lines() {
    let dir = TempDir::new().unwrap();
    let sink = SqliteSink::open(&dir.path().join("out.db")).unwrap();
    let n = sink.write_lines(&[line(2, "two"), line(1, "one")]).unwrap();
    assert_eq!(n, 2);
    let rows = sink.load().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, 1);
    assert_eq!(rows[0].1, "one");
    assert_eq!(rows[0].2, blake3::hash(b"one").as_bytes().to_vec());
}

#[test]
fn test_sink_runs_as_service_job() {
    let dir = TempDir::new().unwrap();
    let sink = SqliteSink::open(&dir.path().join("out.db")).unwrap();
    let service = BatchService::new(BatchOpts::fixed(1)).unwrap();
    let handle = service
        .submit(vec![line(1, "x")], Arc::new(sink))
        .unwrap();
    assert!(handle.wait().is_completed());
    service.shutdown(true);
}

#[test]
fn test_processor_into_sqlite_and_rerun_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("lines.db");
    let service = Arc::new(BatchService::new(BatchOpts::fixed(2)).unwrap());

    for _ in 0..2 {
        let sink = SqliteSink::open(&db).unwrap();
        let proc = ListBatchProcessor::<Line, _>::list(Arc::clone(&service), 2, sink).unwrap();
        let report = proc
            .run(LineSource::new(Cursor::new(INPUT)).skip_empty(true))
            .unwrap();
        assert!(report.all_succeeded());
        assert_eq!(report.counts.items_seen, 5);
    }

    let check = SqliteSink::open(&db).unwrap();
    assert_eq!(check.count().unwrap(), 5);
    let rows = check.load().unwrap();
    let numbers: Vec<u64> = rows.iter().map(|r| r.0).collect();
    assert_eq!(numbers, vec![1, 2, 4, 5, 6]);
    assert_eq!(rows[1].1, "beta");
    for (_, text, hash) in &rows {
        assert_eq!(hash, &blake3::hash(text.as_bytes()).as_bytes().to_vec());
    }
    service.shutdown(true);
}

#[test]
fn test_cancelled_context_skips_write() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(SqliteSink::open(&dir.path().join("out.db")).unwrap());
    let service = BatchService::new(BatchOpts::fixed(1).with_queue_capacity(4)).unwrap();
    let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
    let blocker = Arc::new(move |_b: Vec<Line>, ctx: &TaskContext| -> anyhow::Result<()> {
        let _ = started_tx.send(());
        while !ctx.is_cancelled() {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        ctx.ensure_active()?;
        Ok(())
    });
    service.submit(vec![line(1, "block")], blocker).unwrap();
    started_rx.recv().unwrap();
    let queued = service
        .submit(vec![line(2, "never")], Arc::clone(&sink))
        .unwrap();
    service.shutdown(false);
    assert!(queued.wait().is_cancelled());
    assert_eq!(sink.count().unwrap(), 0);
    assert_eq!(sink.write_lines(&[line(3, "direct")]).unwrap(), 1);
}
