//! Process table queries
//!
//! A `ProcessTableQuery` returns the memory rows of a target process and its
//! descendants at one instant. Every backend reads the whole table and then
//! narrows it with [`select_rows`], so tree filtering behaves the same no
//! matter where the rows came from.

use crate::config::{Backend, Scope};
use crate::error::{PeakError, QueryError, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::process::{Command, Stdio};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

/// One row of the process table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessRow {
    pub pid: u32,
    pub ppid: u32,
    pub rss_kb: u64,
}

impl ProcessRow {
    pub fn new(pid: u32, ppid: u32, rss_kb: u64) -> Self {
        Self { pid, ppid, rss_kb }
    }
}

/// Source of memory rows for a process tree
pub trait ProcessTableQuery: Send {
    /// Short name used in log messages
    fn name(&self) -> &'static str;

    /// Check that the mechanism exists on this host before anything is spawned
    fn probe(&mut self) -> Result<()> {
        Ok(())
    }

    /// Rows for `target` and its descendants. An empty vector means none of
    /// them are currently visible.
    fn query(&mut self, target: u32) -> std::result::Result<Vec<ProcessRow>, QueryError>;
}

impl ProcessTableQuery for Box<dyn ProcessTableQuery> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn probe(&mut self) -> Result<()> {
        (**self).probe()
    }

    fn query(&mut self, target: u32) -> std::result::Result<Vec<ProcessRow>, QueryError> {
        (**self).query(target)
    }
}

/// Build the query for a configured backend
pub fn for_backend(backend: Backend, scope: Scope) -> Result<Box<dyn ProcessTableQuery>> {
    match backend {
        Backend::Ps => Ok(Box::new(PsQuery::new(scope))),
        Backend::Sysinfo => Ok(Box::new(SysinfoQuery::new(scope))),
        #[cfg(target_os = "linux")]
        Backend::Procfs => Ok(Box::new(ProcfsQuery::new(scope))),
        #[cfg(not(target_os = "linux"))]
        Backend::Procfs => Err(PeakError::QueryUnavailable(
            "procfs is only available on Linux".to_string(),
        )),
    }
}

/// Narrow a full table down to what `scope` asks for.
///
/// For `Scope::Tree` this keeps `target` and every process reachable from it
/// through parent links. Rows outside the tree are dropped.
pub fn select_rows(rows: Vec<ProcessRow>, target: u32, scope: Scope) -> Vec<ProcessRow> {
    if scope == Scope::System {
        return rows;
    }

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for row in &rows {
        if row.pid != row.ppid {
            children.entry(row.ppid).or_default().push(row.pid);
        }
    }

    let mut in_tree = HashSet::new();
    let mut queue = VecDeque::from([target]);
    while let Some(pid) = queue.pop_front() {
        if !in_tree.insert(pid) {
            continue;
        }
        if let Some(kids) = children.get(&pid) {
            queue.extend(kids.iter().copied());
        }
    }

    rows.into_iter()
        .filter(|row| in_tree.contains(&row.pid))
        .collect()
}

/// Parse `ps -o pid= -o ppid= -o rss=` output.
///
/// Any line that is not exactly three integers fails the whole table: a
/// truncated table would otherwise under-report the tree.
pub fn parse_ps_table(output: &str) -> std::result::Result<Vec<ProcessRow>, QueryError> {
    let mut rows = Vec::new();

    for (idx, line) in output.lines().enumerate() {
        let line_no = idx + 1;
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }
        if parts.len() != 3 {
            return Err(QueryError::parse(
                line_no,
                format!("expected 3 columns, found {}", parts.len()),
            ));
        }

        let pid = parts[0]
            .parse::<u32>()
            .map_err(|e| QueryError::parse(line_no, format!("pid '{}': {}", parts[0], e)))?;
        let ppid = parts[1]
            .parse::<u32>()
            .map_err(|e| QueryError::parse(line_no, format!("ppid '{}': {}", parts[1], e)))?;
        let rss_kb = parts[2]
            .parse::<u64>()
            .map_err(|e| QueryError::parse(line_no, format!("rss '{}': {}", parts[2], e)))?;

        rows.push(ProcessRow::new(pid, ppid, rss_kb));
    }

    Ok(rows)
}

/// Reads the table by running `ps`, the way the tool was first used inside
/// containers where `ps` agrees with the cgroup accounting.
pub struct PsQuery {
    scope: Scope,
    program: String,
}

impl PsQuery {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            program: "ps".to_string(),
        }
    }

    /// Use a different `ps` executable
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn read_table(&self) -> std::result::Result<String, QueryError> {
        // stdin must stay with the child, never with ps
        let output = Command::new(&self.program)
            .args(["-A", "-o", "pid=", "-o", "ppid=", "-o", "rss="])
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .output()?;

        if !output.status.success() {
            return Err(QueryError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        String::from_utf8(output.stdout).map_err(|_| QueryError::parse(0, "output is not UTF-8"))
    }
}

impl ProcessTableQuery for PsQuery {
    fn name(&self) -> &'static str {
        "ps"
    }

    fn probe(&mut self) -> Result<()> {
        let status = Command::new(&self.program)
            .args(["-o", "pid=", "-p", &std::process::id().to_string()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(PeakError::QueryUnavailable(
                format!("'{}' was not found on PATH", self.program),
            )),
            Err(e) => Err(PeakError::QueryUnavailable(format!(
                "'{}' could not be run: {}",
                self.program, e
            ))),
        }
    }

    fn query(&mut self, target: u32) -> std::result::Result<Vec<ProcessRow>, QueryError> {
        let table = parse_ps_table(&self.read_table()?)?;
        Ok(select_rows(table, target, self.scope))
    }
}

/// Reads the table in-process through sysinfo
pub struct SysinfoQuery {
    system: System,
    scope: Scope,
}

impl SysinfoQuery {
    pub fn new(scope: Scope) -> Self {
        Self {
            system: System::new(),
            scope,
        }
    }
}

impl ProcessTableQuery for SysinfoQuery {
    fn name(&self) -> &'static str {
        "sysinfo"
    }

    fn probe(&mut self) -> Result<()> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(PeakError::QueryUnavailable(
                "sysinfo does not support this platform".to_string(),
            ));
        }
        Ok(())
    }

    fn query(&mut self, target: u32) -> std::result::Result<Vec<ProcessRow>, QueryError> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );

        let table = self
            .system
            .processes()
            .iter()
            // threads share their process's memory
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(pid, process)| {
                ProcessRow::new(
                    pid.as_u32(),
                    process.parent().map(|p| p.as_u32()).unwrap_or(0),
                    process.memory() / 1024, // sysinfo reports bytes
                )
            })
            .collect();

        Ok(select_rows(table, target, self.scope))
    }
}

/// Walks /proc directly
#[cfg(target_os = "linux")]
pub struct ProcfsQuery {
    scope: Scope,
    page_kb: u64,
}

#[cfg(target_os = "linux")]
impl ProcfsQuery {
    pub fn new(scope: Scope) -> Self {
        // SAFETY: sysconf has no preconditions
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let page_kb = if page_size > 0 {
            page_size as u64 / 1024
        } else {
            4
        };
        Self { scope, page_kb }
    }
}

#[cfg(target_os = "linux")]
impl ProcessTableQuery for ProcfsQuery {
    fn name(&self) -> &'static str {
        "procfs"
    }

    fn probe(&mut self) -> Result<()> {
        if !std::path::Path::new("/proc/self/stat").exists() {
            return Err(PeakError::QueryUnavailable(
                "/proc is not mounted".to_string(),
            ));
        }
        Ok(())
    }

    fn query(&mut self, target: u32) -> std::result::Result<Vec<ProcessRow>, QueryError> {
        let processes =
            procfs::process::all_processes().map_err(|e| QueryError::Failed(e.to_string()))?;

        let mut table = Vec::new();
        for process in processes {
            // processes come and go while the directory is walked
            let Ok(process) = process else { continue };
            let stat = match process.stat() {
                Ok(stat) => stat,
                Err(procfs::ProcError::NotFound(_)) | Err(procfs::ProcError::PermissionDenied(_)) => {
                    continue
                }
                Err(e) => return Err(QueryError::Failed(e.to_string())),
            };
            table.push(ProcessRow::new(
                stat.pid as u32,
                stat.ppid as u32,
                stat.rss * self.page_kb,
            ));
        }

        Ok(select_rows(table, target, self.scope))
    }
}
