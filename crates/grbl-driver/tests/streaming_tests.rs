//! End-to-end streaming against the scripted controller

use grbl_driver::{
    CycleExecutor, CycleObserver, CycleSummary, DriverError, ExecutorConfig, GrblLink,
    JobConfig, JobRunner, LinkConfig, PassContext, PollerConfig, RunControl, StatusPoller,
    StreamMode,
};
use grbl_serial::mock::MockController;
use grbl_tools::Ledger;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn fast_link() -> LinkConfig {
    LinkConfig {
        stall_timeout: Duration::from_secs(2),
        poll_timeout: Duration::from_millis(10),
        settle: Duration::from_millis(10),
    }
}

fn fast_poller() -> PollerConfig {
    PollerConfig {
        interval: Duration::from_millis(200),
    }
}

/// Two pieces separated by a travel move, starting at a rapid X/Y position
fn two_piece_program() -> Vec<String> {
    let mut lines = vec!["G90".to_string(), "G0 X0 Y0 ; start".to_string()];
    for _ in 0..2 {
        lines.extend(
            [
                "G91",
                "G1 X100 S800 F3000",
                "G1 Y5",
                "G1 X-100 S800",
                "G1 Y5",
                "G1 Y600 S0",
            ]
            .map(String::from),
        );
    }
    lines
}

#[derive(Default)]
struct SummaryLog {
    summaries: Vec<CycleSummary>,
}

impl CycleObserver for SummaryLog {
    fn cycle_finished(&mut self, summary: &CycleSummary) {
        self.summaries.push(summary.clone());
    }
}

fn ctx() -> PassContext {
    PassContext {
        cycle: 1,
        repeats: 1,
        pieces_before: 0,
    }
}

#[test]
fn test_handshake_then_stream() {
    let mock = MockController::new();
    let handle = mock.handle();
    let mut link = GrblLink::connect(mock, fast_link()).unwrap();
    assert_eq!(link.banner(), Some("Grbl 1.1h"));

    let config = ExecutorConfig::default();
    let control = RunControl::new(1);
    let outcome = CycleExecutor::new(&config, &control)
        .run_pass(&two_piece_program(), &mut link, &mut (), ctx())
        .unwrap();

    // the last line is a boundary: no extra trailing piece
    assert_eq!(outcome.stats.pieces, 2);
    assert_eq!(outcome.stats.error_count, 0);
    assert_eq!(handle.written_lines().len(), two_piece_program().len());
    assert_eq!(handle.written_lines()[1], "G0X0Y0");
}

#[test]
fn test_buffered_stream_never_overflows_controller() {
    let mock = MockController::new().with_execution_time(Duration::from_millis(1));
    let handle = mock.handle();
    let mut link = GrblLink::start(mock, fast_link()).unwrap();

    let program: Vec<String> = (0..300)
        .map(|i| format!("G1 X{}.250 Y{}.125 S{} F2400", i % 50, i % 7, (i * 13) % 1000))
        .collect();
    let config = ExecutorConfig::default();
    let control = RunControl::new(1);
    CycleExecutor::new(&config, &control)
        .run_pass(&program, &mut link, &mut (), ctx())
        .unwrap();

    assert!(handle.peak_occupancy() <= 127, "peak {}", handle.peak_occupancy());
    assert!(handle.peak_occupancy() > 40);

    // blocks reach the controller in program order
    let expected: Vec<String> = program
        .iter()
        .map(|l| l.replace(' ', "").to_uppercase())
        .collect();
    assert_eq!(handle.written_lines(), expected);

    let metrics = link.metrics();
    assert_eq!(metrics.tx_lines, 300);
    assert_eq!(metrics.rx_acks, 300);
    assert_eq!(metrics.unanswered(), 0);
}

#[test]
fn test_simple_mode_keeps_one_block_in_flight() {
    let mock = MockController::new().with_execution_time(Duration::from_millis(1));
    let handle = mock.handle();
    let mut link = GrblLink::start(mock, fast_link()).unwrap();

    let config = ExecutorConfig {
        mode: StreamMode::Simple,
        ..ExecutorConfig::default()
    };
    let control = RunControl::new(1);
    let program: Vec<String> = (0..20).map(|i| format!("G1 X{i}")).collect();
    CycleExecutor::new(&config, &control)
        .run_pass(&program, &mut link, &mut (), ctx())
        .unwrap();

    assert_eq!(handle.peak_occupancy(), "G1X19\n".len());
}

#[test]
fn test_error_threshold_over_link() {
    let responder = |line: &str| {
        if line.starts_with("G4") {
            "error:33".to_string()
        } else {
            "ok".to_string()
        }
    };
    let config = ExecutorConfig::default();
    let control = RunControl::new(1);

    let program: Vec<String> = ["G1 X1", "G4", "G1 X2", "G4", "G1 X3"].map(String::from).to_vec();
    let mut link = GrblLink::start(MockController::new().with_responder(responder), fast_link()).unwrap();
    let outcome = CycleExecutor::new(&config, &control)
        .run_pass(&program, &mut link, &mut (), ctx())
        .unwrap();
    assert_eq!(outcome.stats.error_count, 2);

    let program: Vec<String> = ["G4", "G1 X1", "G4", "G4", "G1 X2"].map(String::from).to_vec();
    let mut link = GrblLink::start(MockController::new().with_responder(responder), fast_link()).unwrap();
    let result = CycleExecutor::new(&config, &control).run_pass(&program, &mut link, &mut (), ctx());
    assert!(matches!(result, Err(DriverError::TooManyErrors { count: 3, .. })));
}

#[test]
fn test_machine_position_report_does_not_stop_stream() {
    let mock = MockController::new();
    let handle = mock.handle();
    handle.push_line("<Idle|MPos:0.000,0.000,0.000|FS:0,0>");
    let mut link = GrblLink::start(mock, fast_link()).unwrap();
    thread::sleep(Duration::from_millis(50));

    let config = ExecutorConfig::default();
    let control = RunControl::new(1);
    let outcome = CycleExecutor::new(&config, &control)
        .run_pass(&["G1 X10 S100".to_string()], &mut link, &mut (), ctx())
        .unwrap();

    assert_eq!(outcome.stats.pieces, 1);
    assert_eq!(link.metrics().rx_malformed, 1);
    assert_eq!(
        link.status().last_message.as_deref(),
        Some("<Idle|MPos:0.000,0.000,0.000|FS:0,0>")
    );
}

#[test]
fn test_poller_runs_while_active() {
    let mock = MockController::new();
    let handle = mock.handle();
    let link = GrblLink::start(mock, fast_link()).unwrap();
    let control = Arc::new(RunControl::new(1));

    control.set_run_active(true);
    let poller = StatusPoller::spawn(link.writer(), control.clone(), fast_poller()).unwrap();
    thread::sleep(Duration::from_millis(500));
    control.set_run_active(false);
    thread::sleep(Duration::from_millis(100));
    assert!(!poller.is_running());
    poller.stop();

    let requests = handle.realtime_bytes().iter().filter(|&&b| b == b'?').count();
    assert!((2..=4).contains(&requests), "{requests} status requests");
    assert!(link.status().report.is_some());
}

#[test]
fn test_job_records_each_cycle_and_resumes() {
    let dir = TempDir::new().unwrap();
    let ledger = Ledger::new(dir.path().join("stat.txt"));
    let config = JobConfig {
        program_name: "panel".to_string(),
        operator: Some("BOB".to_string()),
        repeats: 2,
        poller: fast_poller(),
        ..JobConfig::default()
    };

    let mock = MockController::new();
    let handle = mock.handle();
    let mut link = GrblLink::start(mock, fast_link()).unwrap();
    let runner = JobRunner::new(config.clone(), Some(ledger.clone())).unwrap();
    let report = runner.run(&mut link, &two_piece_program(), &mut ()).unwrap();

    assert_eq!(report.repeats_done, 2);
    assert_eq!(report.cycles_run, 2);
    assert_eq!(report.pieces_total, 4);
    assert!(!report.stopped_by_request);

    let records = ledger.read_all().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].pieces, 2);
    assert_eq!(records[0].x_mm, 400);
    // 1220 mm of Y per pass, counted again for the return to start
    assert_eq!(records[0].y_mm, 1220 * 2);
    assert_eq!(records[0].operator.as_deref(), Some("BOB"));

    // every cycle ends with a return to the start position
    let lines = handle.written_lines();
    assert_eq!(lines.iter().filter(|l| l.as_str() == "G0X0Y0").count(), 4);

    // a restart with a higher target continues the counters
    drop(link);
    let mut link = GrblLink::start(MockController::new(), fast_link()).unwrap();
    let runner = JobRunner::new(JobConfig { repeats: 3, ..config }, Some(ledger.clone())).unwrap();
    let report = runner.run(&mut link, &two_piece_program(), &mut ()).unwrap();
    assert_eq!(report.resumed.repeats_done, 2);
    assert_eq!(report.cycles_run, 1);
    assert_eq!(report.repeats_done, 3);
    assert_eq!(report.pieces_total, 6);
    assert_eq!(ledger.read_all().unwrap().len(), 3);
}

#[test]
fn test_stop_after_cycle_request() {
    let mut link = GrblLink::start(MockController::new(), fast_link()).unwrap();
    let runner = JobRunner::new(
        JobConfig {
            repeats: 5,
            poller: fast_poller(),
            ..JobConfig::default()
        },
        None,
    )
    .unwrap();
    runner.control().set_stop_after_cycle(true);

    let report = runner.run(&mut link, &two_piece_program(), &mut ()).unwrap();
    assert_eq!(report.cycles_run, 1);
    assert!(report.stopped_by_request);
}

#[test]
fn test_check_mode_rejection_aborts_before_streaming() {
    let mock = MockController::new().with_responder(|line| {
        if line == "$C" {
            "error:9".to_string()
        } else {
            "ok".to_string()
        }
    });
    let handle = mock.handle();
    let mut link = GrblLink::start(mock, fast_link()).unwrap();
    let runner = JobRunner::new(
        JobConfig {
            check_mode: true,
            poller: fast_poller(),
            ..JobConfig::default()
        },
        None,
    )
    .unwrap();

    let result = runner.run(&mut link, &two_piece_program(), &mut ());
    assert!(matches!(result, Err(DriverError::Rejected { .. })));
    assert_eq!(handle.written_lines(), vec!["$C".to_string()]);
}

#[test]
fn test_too_many_errors_stops_machine() {
    let mock = MockController::new().with_responder(|_| "error:20".to_string());
    let handle = mock.handle();
    let mut link = GrblLink::start(mock, fast_link()).unwrap();
    let runner = JobRunner::new(
        JobConfig {
            poller: fast_poller(),
            ..JobConfig::default()
        },
        None,
    )
    .unwrap();

    let result = runner.run(&mut link, &two_piece_program(), &mut ());
    assert!(matches!(result, Err(DriverError::TooManyErrors { .. })));

    thread::sleep(Duration::from_millis(50));
    let realtime = handle.realtime_bytes();
    assert!(realtime.ends_with(&[b'!', 0x18]), "{realtime:?}");
}

#[test]
fn test_piece_boundary_with_paren_comment() {
    let mock = MockController::new();
    let handle = mock.handle();
    let mut link = GrblLink::start(mock, fast_link()).unwrap();

    let program: Vec<String> = two_piece_program()
        .into_iter()
        .map(|l| if l == "G1 Y600 S0" { "G1 Y600 S0 (next piece)".to_string() } else { l })
        .collect();
    let config = ExecutorConfig::default();
    let control = RunControl::new(1);
    let outcome = CycleExecutor::new(&config, &control)
        .run_pass(&program, &mut link, &mut (), ctx())
        .unwrap();

    assert_eq!(outcome.stats.pieces, 2);
    assert_eq!(outcome.stats.y_distance, 1220.0);
    let lines = handle.written_lines();
    assert_eq!(lines.last().map(String::as_str), Some("G1Y600S0(NEXTPIECE)"));
}

#[test]
fn test_stop_after_piece_records_halted_cycle() {
    let dir = TempDir::new().unwrap();
    let ledger = Ledger::new(dir.path().join("stat.txt"));
    let mock = MockController::new();
    let handle = mock.handle();
    let mut link = GrblLink::start(mock, fast_link()).unwrap();
    let runner = JobRunner::new(
        JobConfig {
            program_name: "panel".to_string(),
            repeats: 3,
            poller: fast_poller(),
            ..JobConfig::default()
        },
        Some(ledger.clone()),
    )
    .unwrap();
    runner.control().set_stop_after_piece(true);

    let mut log = SummaryLog::default();
    let report = runner.run(&mut link, &two_piece_program(), &mut log).unwrap();

    assert!(report.stopped_by_request);
    assert_eq!(report.cycles_run, 1);
    assert_eq!(report.repeats_done, 1);
    assert_eq!(report.pieces_total, 1);

    // the halted cycle still gets its record
    let records = ledger.read_all().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].pieces, 1);
    assert_eq!(records[0].x_mm, 200);

    assert_eq!(log.summaries.len(), 1);
    assert!(log.summaries[0].halted);
    assert_eq!(log.summaries[0].pieces_cycle, 1);

    // nothing of the second piece was sent; the machine went back to the start
    let lines = handle.written_lines();
    assert!(!lines.iter().any(|l| l == "G1Y600S0"));
    assert_eq!(lines.iter().filter(|l| l.as_str() == "G1X100S800F3000").count(), 1);
    assert_eq!(&lines[lines.len() - 2..], ["G90", "G0X0Y0"]);
}

#[test]
fn test_return_to_start_waits_for_y_below_alert() {
    let mock = MockController::new();
    let handle = mock.handle();
    handle.set_machine_state("Run");
    handle.set_position(0.0, 800.0);
    let mut link = GrblLink::start(mock, fast_link()).unwrap();
    let runner = JobRunner::new(
        JobConfig {
            poller: fast_poller(),
            executor: ExecutorConfig {
                y_alert: Some(500.0),
                ..ExecutorConfig::default()
            },
            ..JobConfig::default()
        },
        None,
    )
    .unwrap();

    // still moving: only crossing back below the alert line ends the wait
    let started = Instant::now();
    let mover = handle.clone();
    let release = thread::spawn(move || {
        thread::sleep(Duration::from_millis(600));
        mover.set_position(0.0, 100.0);
    });

    let report = runner.run(&mut link, &two_piece_program(), &mut ()).unwrap();
    let elapsed = started.elapsed();
    release.join().unwrap();

    assert_eq!(report.cycles_run, 1);
    assert!(elapsed >= Duration::from_millis(600), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "returned after {elapsed:?}");
}

#[test]
fn test_home_every_schedule() {
    let mock = MockController::new();
    let handle = mock.handle();
    let mut link = GrblLink::start(mock, fast_link()).unwrap();
    let runner = JobRunner::new(
        JobConfig {
            repeats: 4,
            home: true,
            home_every: 2,
            poller: fast_poller(),
            ..JobConfig::default()
        },
        None,
    )
    .unwrap();

    let report = runner.run(&mut link, &two_piece_program(), &mut ()).unwrap();
    assert_eq!(report.cycles_run, 4);

    // $H first, after cycle 2 and after cycle 4; cycles 1 and 3 return to start
    let lines = handle.written_lines();
    let homes: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.as_str() == "$H")
        .map(|(i, _)| i)
        .collect();
    assert_eq!(homes.len(), 3);
    assert_eq!(homes[0], 0);
    assert_eq!(homes[2], lines.len() - 1);

    let starts_before = |end: usize| lines[..end].iter().filter(|l| l.as_str() == "G0X0Y0").count();
    // two program starts plus one return
    assert_eq!(starts_before(homes[1]), 3);
    // four program starts plus two returns
    assert_eq!(starts_before(homes[2]), 6);
}

#[test]
fn test_rejected_homing_stops_machine() {
    let mock = MockController::new().with_responder(|line| {
        if line == "$H" {
            "error:5".to_string()
        } else {
            "ok".to_string()
        }
    });
    let handle = mock.handle();
    let mut link = GrblLink::start(mock, fast_link()).unwrap();
    let runner = JobRunner::new(
        JobConfig {
            home: true,
            poller: fast_poller(),
            ..JobConfig::default()
        },
        None,
    )
    .unwrap();

    let result = runner.run(&mut link, &two_piece_program(), &mut ());
    assert!(matches!(result, Err(DriverError::Rejected { .. })));
    assert_eq!(handle.written_lines(), vec!["$H".to_string()]);

    thread::sleep(Duration::from_millis(50));
    let realtime = handle.realtime_bytes();
    assert!(realtime.ends_with(&[b'!', 0x18]), "{realtime:?}");
}
