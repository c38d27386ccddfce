//! Console reporter
//!
//! Progress goes to stderr so `--json` output on stdout stays machine
//! readable. Download progress for both variants shares one live line that
//! is redrawn in place when stderr is a terminal.

use std::collections::BTreeMap;
use std::io::{IsTerminal, Stderr, Write, stderr};
use std::sync::Mutex;

use crossterm::{
    QueueableCommand,
    cursor::MoveToColumn,
    style::Stylize,
    terminal::{Clear, ClearType},
};
use rtmerge_core::Reporter;
use rtmerge_schema::RuntimeId;

use super::theme::{Theme, format_size};

#[derive(Debug, Clone, Copy)]
enum Transfer {
    Running { current: u64, total: Option<u64> },
    Done { size: u64 },
}

#[derive(Debug)]
pub struct ConsoleReporter {
    quiet: bool,
    live: bool,
    theme: Theme,
    transfers: Mutex<BTreeMap<RuntimeId, Transfer>>,
}

impl ConsoleReporter {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            live: !quiet && stderr().is_terminal(),
            theme: Theme::default(),
            transfers: Mutex::new(BTreeMap::new()),
        }
    }

    fn update(&self, runtime: &RuntimeId, transfer: Transfer) {
        if self.quiet {
            return;
        }
        let Ok(mut transfers) = self.transfers.lock() else {
            return;
        };
        transfers.insert(runtime.clone(), transfer);
        let all_done = transfers
            .values()
            .all(|t| matches!(t, Transfer::Done { .. }));

        let line = transfers
            .iter()
            .map(|(rid, t)| self.describe(rid, *t))
            .collect::<Vec<_>>()
            .join("   ");

        if self.live {
            let mut err = stderr();
            let _ = redraw(&mut err, &line, all_done);
        } else if let Transfer::Done { .. } = transfer {
            eprintln!("{}", self.describe(runtime, transfer));
        }
    }

    fn describe(&self, runtime: &RuntimeId, transfer: Transfer) -> String {
        let theme = &self.theme;
        let name = runtime.as_str().with(theme.colors.runtime);
        match transfer {
            Transfer::Running { current, total } => {
                let progress = match total {
                    Some(total) => format!("{} / {}", format_size(current), format_size(total)),
                    None => format_size(current),
                };
                format!(
                    "  {} {name} {}",
                    theme.icons.active.with(theme.colors.active),
                    progress.with(theme.colors.secondary)
                )
            }
            Transfer::Done { size } => format!(
                "  {} {name} {}",
                theme.icons.success.with(theme.colors.success),
                format_size(size).with(theme.colors.secondary)
            ),
        }
    }

    /// End the live line before printing anything else.
    fn settle(&self) {
        if !self.live {
            return;
        }
        if let Ok(mut transfers) = self.transfers.lock() {
            if transfers
                .values()
                .any(|t| matches!(t, Transfer::Running { .. }))
            {
                eprintln!();
            }
            transfers.retain(|_, t| matches!(t, Transfer::Running { .. }));
        }
    }
}

fn redraw(err: &mut Stderr, line: &str, finish: bool) -> std::io::Result<()> {
    err.queue(MoveToColumn(0))?;
    err.queue(Clear(ClearType::CurrentLine))?;
    write!(err, "{line}")?;
    if finish {
        writeln!(err)?;
    }
    err.flush()
}

impl Reporter for ConsoleReporter {
    fn section(&self, title: &str) {
        if self.quiet {
            return;
        }
        self.settle();
        eprintln!();
        eprintln!("{}", title.bold().with(self.theme.colors.header));
    }

    fn downloading(&self, runtime: &RuntimeId, current: u64, total: Option<u64>) {
        self.update(runtime, Transfer::Running { current, total });
    }

    fn fetched(&self, runtime: &RuntimeId, size: u64) {
        self.update(runtime, Transfer::Done { size });
    }

    fn info(&self, msg: &str) {
        if self.quiet {
            return;
        }
        self.settle();
        eprintln!("  {} {msg}", self.theme.icons.info);
    }

    fn success(&self, msg: &str) {
        if self.quiet {
            return;
        }
        self.settle();
        eprintln!(
            "  {} {msg}",
            self.theme.icons.success.with(self.theme.colors.success)
        );
    }

    fn warning(&self, msg: &str) {
        self.settle();
        eprintln!(
            "  {} {}",
            self.theme.icons.warning.with(self.theme.colors.warning),
            msg.with(self.theme.colors.warning)
        );
    }

    fn error(&self, msg: &str) {
        self.settle();
        eprintln!(
            "  {} {}",
            self.theme.icons.error.with(self.theme.colors.error),
            msg.with(self.theme.colors.error)
        );
    }
}
