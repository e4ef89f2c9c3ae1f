//! Sampling behaviour through the public API, with the process table faked
//! out so the numbers are known in advance.

use peakmem::process_table::{parse_ps_table, select_rows};
use peakmem::{
    CommandSpec, Coordinator, MemorySampler, MonitorConfig, Outcome, ProcessRow,
    ProcessTableQuery, QueryError, Scope,
};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Emulates `ps` output for a workload whose tree is the target plus two
/// workers, next to an unrelated process that must not be counted.
struct FakePs {
    rss: (u64, u64, u64),
}

impl ProcessTableQuery for FakePs {
    fn name(&self) -> &'static str {
        "fake-ps"
    }

    fn query(&mut self, target: u32) -> Result<Vec<ProcessRow>, QueryError> {
        let (own, first, second) = self.rss;
        let table = format!(
            "    1     0  9000\n{t} 1 {own}\n{a} {t} {first}\n{b} {t} {second}\n77777 1 123456\n",
            t = target,
            a = target + 100_000,
            b = target + 100_001,
        );
        let rows = parse_ps_table(&table)?;
        Ok(select_rows(rows, target, Scope::Tree))
    }
}

/// Allocates `held_kb`, holds it for a few ticks, then releases and exits
struct Workload {
    timeline: Vec<u64>,
    tick: usize,
    recorded: Arc<Mutex<Vec<u64>>>,
}

impl ProcessTableQuery for Workload {
    fn name(&self) -> &'static str {
        "workload"
    }

    fn query(&mut self, target: u32) -> Result<Vec<ProcessRow>, QueryError> {
        let rss = self.timeline[self.tick.min(self.timeline.len() - 1)];
        self.tick += 1;
        self.recorded.lock().unwrap().push(rss);
        Ok(vec![ProcessRow::new(target, 1, rss)])
    }
}

#[test]
fn test_tree_sum_from_ps_table() {
    let config = MonitorConfig::builder().interval_ms(20).build().unwrap();
    let report = Coordinator::new(config)
        .unwrap()
        .run_with_query(
            &CommandSpec::new("sh", ["-c", "sleep 0.1"]),
            FakePs {
                rss: (300, 4_000, 5_000),
            },
        )
        .unwrap();

    let peak = report.peak.unwrap();
    // the sum of the two workers and the target, not the largest of them
    assert_eq!(peak.rss_kb(), Some(9_300));
    assert_eq!(peak.processes(), 3);
    assert_eq!(report.outcome, Outcome::Exited(peakmem::ExitStatus::Code(0)));
}

#[test]
fn test_held_allocation_is_the_peak() {
    let held_kb = 50_000;
    let recorded = Arc::new(Mutex::new(Vec::new()));
    let query = Workload {
        timeline: vec![1_000, held_kb, held_kb, held_kb, 800, 0],
        tick: 0,
        recorded: recorded.clone(),
    };

    let handle = MemorySampler::start(query, 4321, Duration::from_millis(10)).unwrap();
    while recorded.lock().unwrap().len() < 6 {
        thread::sleep(Duration::from_millis(5));
    }
    handle.drain().unwrap();
    let peak = handle.stop().unwrap();

    assert!(peak.rss_kb().unwrap() >= held_kb);
    assert!(recorded.lock().unwrap().contains(&held_kb));
    assert_eq!(peak.ticks().skipped, 0);
}

#[test]
fn test_malformed_table_is_not_fatal() {
    struct Truncated;

    impl ProcessTableQuery for Truncated {
        fn name(&self) -> &'static str {
            "truncated"
        }

        fn query(&mut self, target: u32) -> Result<Vec<ProcessRow>, QueryError> {
            let rows = parse_ps_table(&format!("{} 1 100\n{} {}", target, target + 1, target))?;
            Ok(select_rows(rows, target, Scope::Tree))
        }
    }

    let config = MonitorConfig::builder().interval_ms(20).build().unwrap();
    let report = Coordinator::new(config)
        .unwrap()
        .run_with_query(&CommandSpec::new("sh", ["-c", "exit 9"]), Truncated)
        .unwrap();

    assert_eq!(report.exit_code(), 9);
    let ticks = report.peak.unwrap().ticks();
    assert!(ticks.attempted >= 1);
    assert_eq!(ticks.parse_failures, ticks.attempted);
}
