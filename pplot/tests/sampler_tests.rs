use pplot::collector::{FakeCollector, FakeProcess};
use pplot::record::{Field, SampleKind};
use pplot::sink::{DelimitedSink, MemorySink, NullSink, SinkOptions};
use pplot::{profile_process, Error, Outcome, Sampler, SessionOptions, StopReason};
use std::time::Duration;

const DEFAULT_HEADER: &str = "type,pid,elapsed_secs,cpu_time_user_secs,cpu_time_sys_secs,\
cpu_percent,threads_num,memory_rss_bytes,memory_vms_bytes";

fn fast() -> SessionOptions {
    SessionOptions {
        poll_interval: Duration::from_millis(10),
        ..SessionOptions::default()
    }
}

fn render(sink: DelimitedSink<Vec<u8>>) -> String {
    String::from_utf8(sink.into_inner().unwrap()).unwrap()
}

#[test]
fn test_vanished_child_is_skipped() {
    let collector = FakeCollector::new()
        .with_process(FakeProcess::new(1))
        .with_process(FakeProcess::child_of(2, 1))
        .with_process(FakeProcess::child_of(3, 1));
    collector.vanish_on_snapshot(2);
    let mut sink = MemorySink::new();
    let options = fast().with_max_iterations(Some(2));
    let summary = profile_process(&collector, 1, options, &mut sink).unwrap();
    assert_eq!(summary.outcome, Outcome::IterationLimitReached);
    assert_eq!(summary.ticks, 2);
    // main + child 3 on both ticks
    assert_eq!(summary.rows, 4);
    assert!(sink.rows.iter().all(|r| r[1] != Field::Int(2)));
}

#[test]
fn test_children_excluded_when_disabled() {
    let collector = FakeCollector::new()
        .with_process(FakeProcess::new(1))
        .with_process(FakeProcess::child_of(2, 1))
        .with_process(FakeProcess::child_of(3, 2));
    let options = SessionOptions {
        include_children: false,
        max_iterations: Some(2),
        ..fast()
    };
    let mut sink = MemorySink::new();
    let summary = profile_process(&collector, 1, options, &mut sink).unwrap();
    assert_eq!(summary.outcome, Outcome::IterationLimitReached);
    assert_eq!(summary.rows, 2);
    assert_eq!(sink.rows.len(), 2);
    assert!(sink.rows.iter().all(|r| r[0] == Field::Kind(SampleKind::Main)));
    assert_eq!(collector.snapshot_calls(2), 0);
    assert_eq!(collector.snapshot_calls(3), 0);
}

#[test]
fn test_null_sink_still_counts_rows() {
    let collector = FakeCollector::new()
        .with_process(FakeProcess::new(1))
        .with_process(FakeProcess::child_of(2, 1));
    let options = fast().with_max_iterations(Some(3));
    let summary = profile_process(&collector, 1, options, &mut NullSink).unwrap();
    assert_eq!(summary.ticks, 3);
    assert_eq!(summary.rows, 6);
}

#[test]
fn test_denied_open_files_renders_placeholder() {
    let collector = FakeCollector::new()
        .with_process(FakeProcess::new(1))
        .with_process(FakeProcess::child_of(2, 1).with_open_files(None));
    let options = SessionOptions {
        collect_open_files: true,
        max_iterations: Some(1),
        ..fast()
    };
    let mut sink = DelimitedSink::new(Vec::new(), &SinkOptions::default()).unwrap();
    profile_process(&collector, 1, options, &mut sink).unwrap();

    let text = render(sink);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], format!("{},files_num", DEFAULT_HEADER));
    assert!(lines[1].starts_with("main,1,"));
    assert!(lines[1].ends_with(",7"));
    assert!(lines[2].starts_with("child,2,"));
    assert!(lines[2].ends_with(",-"));
}

#[test]
fn test_custom_separator_and_placeholder() {
    let collector = FakeCollector::new().with_process(FakeProcess::new(1).with_open_files(None));
    let options = SessionOptions {
        collect_open_files: true,
        max_iterations: Some(1),
        ..fast()
    };
    let sink_options = SinkOptions {
        separator: ';',
        placeholder: "NA".into(),
    };
    let mut sink = DelimitedSink::new(Vec::new(), &sink_options).unwrap();
    profile_process(&collector, 1, options, &mut sink).unwrap();

    let text = render(sink);
    let row = text.lines().nth(1).unwrap();
    assert_eq!(row.split(';').count(), 10);
    assert!(row.ends_with(";NA"));
}

#[test]
fn test_elapsed_never_decreases() {
    let collector = FakeCollector::new().with_process(FakeProcess::new(1));
    let mut sink = MemorySink::new();
    profile_process(&collector, 1, fast().with_max_iterations(Some(4)), &mut sink).unwrap();
    let elapsed: Vec<f64> = sink
        .rows
        .iter()
        .map(|r| match r[2] {
            Field::Float(v) => v,
            ref other => panic!("unexpected elapsed field {:?}", other),
        })
        .collect();
    assert_eq!(elapsed.len(), 4);
    assert!(elapsed.windows(2).all(|w| w[0] <= w[1]));
    assert!(elapsed[0] >= 10.0);
}

#[test]
fn test_stop_predicate_is_checked_after_each_tick() {
    let collector = FakeCollector::new().with_process(FakeProcess::new(1));
    let mut calls = 0;
    let mut sink = MemorySink::new();
    let summary = {
        let mut sampler = Sampler::new(&collector, fast()).stop_when(|| {
            calls += 1;
            calls == 3
        });
        sampler.run(1, &mut sink).unwrap()
    };
    assert_eq!(summary.outcome, Outcome::Terminated(StopReason::StopRequested));
    assert_eq!(summary.ticks, 3);
    assert_eq!(sink.rows.len(), 3);
    assert_eq!(calls, 3);
}

#[test]
fn test_stop_predicate_wins_over_cap() {
    let collector = FakeCollector::new().with_process(FakeProcess::new(1));
    let mut sink = MemorySink::new();
    let summary = Sampler::new(&collector, fast().with_max_iterations(Some(1)))
        .stop_when(|| true)
        .run(1, &mut sink)
        .unwrap();
    assert_eq!(summary.outcome, Outcome::Terminated(StopReason::StopRequested));
}

#[test]
fn test_target_removed_mid_session() {
    let collector = FakeCollector::new().with_process(FakeProcess::new(1));
    let mut sink = MemorySink::new();
    let summary = Sampler::new(&collector, fast())
        .stop_when(|| {
            collector.remove(1);
            false
        })
        .run(1, &mut sink)
        .unwrap();
    assert_eq!(summary.outcome, Outcome::Terminated(StopReason::Exited));
    assert_eq!(summary.ticks, 1);
}

#[test]
fn test_unknown_target_writes_nothing() {
    let collector = FakeCollector::new();
    let mut sink = MemorySink::new();
    let result = profile_process(&collector, 42, fast(), &mut sink);
    assert!(matches!(result, Err(Error::TargetNotFound(42))));
    assert!(sink.header.is_none());
}

#[test]
fn test_unsupported_open_files_writes_nothing() {
    let collector = FakeCollector::new()
        .without_open_files_support()
        .with_process(FakeProcess::new(1));
    let options = SessionOptions {
        collect_open_files: true,
        ..fast()
    };
    let mut sink = MemorySink::new();
    let result = profile_process(&collector, 1, options, &mut sink);
    assert!(matches!(result, Err(Error::Configuration(_))));
    assert!(sink.header.is_none());
    assert_eq!(collector.snapshot_calls(1), 0);
}

#[test]
fn test_headers_can_be_disabled() {
    let collector = FakeCollector::new().with_process(FakeProcess::new(1));
    let options = SessionOptions {
        headers: false,
        max_iterations: Some(2),
        ..fast()
    };
    let mut sink = DelimitedSink::new(Vec::new(), &SinkOptions::default()).unwrap();
    profile_process(&collector, 1, options, &mut sink).unwrap();
    let text = render(sink);
    assert_eq!(text.lines().count(), 2);
    assert!(text.lines().all(|l| l.starts_with("main,1,")));
}

#[cfg(target_os = "linux")]
mod host {
    use super::*;
    use pplot::collector::LinuxProcessCollector;
    use std::process::{Command, Stdio};

    #[test]
    fn test_profile_self_for_two_iterations() {
        let collector = LinuxProcessCollector::new();
        let pid = std::process::id();
        let options = SessionOptions {
            poll_interval: Duration::from_millis(10),
            max_iterations: Some(2),
            // other tests spawn children of this process
            include_children: false,
            collect_open_files: true,
            ..SessionOptions::default()
        };
        let mut sink = DelimitedSink::new(Vec::new(), &SinkOptions::default()).unwrap();
        let summary = profile_process(&collector, pid, options, &mut sink).unwrap();
        assert_eq!(summary.outcome, Outcome::IterationLimitReached);
        assert_eq!(summary.rows, 2);

        let text = render(sink);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], format!("{},files_num", DEFAULT_HEADER));
        for line in &lines[1..] {
            let fields: Vec<&str> = line.split(',').collect();
            assert_eq!(fields.len(), 10);
            assert_eq!(fields[0], "main");
            assert_eq!(fields[1], pid.to_string());
            assert!(fields[9].parse::<u64>().unwrap() > 0);
        }
    }

    #[test]
    fn test_default_header_without_open_files() {
        let collector = LinuxProcessCollector::new();
        let options = SessionOptions {
            max_iterations: Some(1),
            include_children: false,
            ..fast()
        };
        let mut sink = DelimitedSink::new(Vec::new(), &SinkOptions::default()).unwrap();
        profile_process(&collector, std::process::id(), options, &mut sink).unwrap();
        let text = render(sink);
        assert_eq!(text.lines().next(), Some(DEFAULT_HEADER));
    }

    #[test]
    fn test_missing_host_process() {
        let collector = LinuxProcessCollector::new();
        let mut sink = MemorySink::new();
        let result = profile_process(&collector, 999_999_999, fast(), &mut sink);
        assert!(matches!(result, Err(Error::TargetNotFound(999_999_999))));
        assert!(sink.header.is_none());
    }

    #[test]
    fn test_shell_with_two_children() {
        let mut shell = Command::new("sh")
            .args(["-c", "sleep 2 & sleep 2 & wait"])
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        std::thread::sleep(Duration::from_millis(200));

        let collector = LinuxProcessCollector::new();
        let mut sink = MemorySink::new();
        let summary =
            profile_process(&collector, shell.id(), fast().with_max_iterations(Some(1)), &mut sink)
                .unwrap();
        shell.kill().unwrap();
        shell.wait().unwrap();

        assert_eq!(summary.rows, 3);
        assert_eq!(sink.rows[0][0].render("-"), "main");
        assert!(sink.rows[1..].iter().all(|r| r[0].render("-") == "child"));
        assert!(sink.rows.iter().all(|r| r[2] == sink.rows[0][2]));
    }

    #[test]
    fn test_exited_target_ends_session() {
        let mut child = Command::new("sleep").arg("0.2").spawn().unwrap();
        let pid = child.id();
        let collector = LinuxProcessCollector::new();
        let mut sink = MemorySink::new();
        // unreaped, the child turns into a zombie once it exits
        let summary = profile_process(&collector, pid, fast(), &mut sink).unwrap();
        child.wait().unwrap();
        assert_eq!(summary.outcome, Outcome::Terminated(StopReason::Zombie));
        assert!(summary.ticks >= 1);
    }
}
