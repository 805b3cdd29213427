/// Run progress reporting
///
/// The coordinator emits [`RunEvent`]s; a [`Reporter`] turns them into
/// terminal output. Colors are used only when the stream is a terminal.
use std::io::{self, IsTerminal, Write};

const BOLD: &str = "\x1b[1m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const ORANGE: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    TaskStart { id: String, message: String },
    TaskSkip { id: String },
    /// Would run, but this is a dry run
    TaskPending { id: String },
    TaskComplete { id: String },
    TaskFatal { detail: String },
}

pub trait Reporter {
    fn report(&mut self, event: &RunEvent);
}

/// Style helper; a no-op when ANSI output is off
struct Paint {
    ansi: bool,
}

impl Paint {
    fn apply(&self, style: &str, text: &str) -> String {
        if self.ansi {
            format!("{}{}{}", style, text, RESET)
        } else {
            text.to_string()
        }
    }
}

/// Prints every task header and its outcome
pub struct VerboseReporter {
    out: Box<dyn Write>,
    err: Box<dyn Write>,
    paint: Paint,
}

impl VerboseReporter {
    pub fn new(out: Box<dyn Write>, err: Box<dyn Write>, ansi: bool) -> Self {
        Self {
            out,
            err,
            paint: Paint { ansi },
        }
    }

    pub fn stdio() -> Self {
        Self::new(
            Box::new(io::stdout()),
            Box::new(io::stderr()),
            io::stdout().is_terminal(),
        )
    }
}

impl Reporter for VerboseReporter {
    fn report(&mut self, event: &RunEvent) {
        // Reporting must never abort a run; write errors are dropped.
        let _ = match event {
            RunEvent::TaskStart { id, message } => writeln!(
                self.out,
                "{}",
                self.paint.apply(BOLD, &format!("[{}]: {}", id, message))
            ),
            RunEvent::TaskSkip { .. } => {
                writeln!(self.out, "  {}", self.paint.apply(ORANGE, "Skipped"))
            }
            RunEvent::TaskPending { .. } => {
                writeln!(self.out, "  {}", self.paint.apply(ORANGE, "Pending"))
            }
            RunEvent::TaskComplete { .. } => {
                writeln!(self.out, "  {}", self.paint.apply(GREEN, "Completed"))
            }
            RunEvent::TaskFatal { detail } => detail
                .lines()
                .try_for_each(|line| writeln!(self.err, "  {}", self.paint.apply(RED, line))),
        };
        let _ = self.out.flush();
    }
}

/// Quiet unless something fails; then names the task that was running
pub struct SilentReporter {
    out: Box<dyn Write>,
    err: Box<dyn Write>,
    paint: Paint,
    current: Option<(String, String)>,
}

impl SilentReporter {
    pub fn new(out: Box<dyn Write>, err: Box<dyn Write>, ansi: bool) -> Self {
        Self {
            out,
            err,
            paint: Paint { ansi },
            current: None,
        }
    }

    pub fn stdio() -> Self {
        Self::new(
            Box::new(io::stdout()),
            Box::new(io::stderr()),
            io::stderr().is_terminal(),
        )
    }
}

impl Reporter for SilentReporter {
    fn report(&mut self, event: &RunEvent) {
        match event {
            RunEvent::TaskStart { id, message } => {
                self.current = Some((id.clone(), message.clone()));
            }
            RunEvent::TaskSkip { .. }
            | RunEvent::TaskPending { .. }
            | RunEvent::TaskComplete { .. } => self.current = None,
            RunEvent::TaskFatal { detail } => {
                let indent = match self.current.take() {
                    Some((id, message)) => {
                        let header = format!("[{}]: {}", id, message);
                        let _ = writeln!(self.out, "{}", self.paint.apply(BOLD, &header));
                        let _ = self.out.flush();
                        "  "
                    }
                    None => "",
                };
                for line in detail.lines() {
                    let _ = writeln!(self.err, "{}{}", indent, self.paint.apply(RED, line));
                }
            }
        }
    }
}
