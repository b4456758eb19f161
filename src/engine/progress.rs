//! Progress Reporter
//!
//! Long-lived task that periodically renders the command counter until the
//! orchestrator asks it to stop. Stopping is a handshake: the reporter draws
//! its final line and only then acknowledges, so nothing it prints can
//! interleave with the report that follows.

use super::counter::{CommandCounter, CommandCounts};
use crossterm::{
    cursor::MoveToColumn,
    style::Print,
    terminal::{Clear, ClearType},
    QueueableCommand,
};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const SPINNER: &[char] = &['|', '/', '-', '\\'];

/// Where progress lines go
pub trait ProgressSink: Send + 'static {
    /// Replace the current status line
    fn render(&mut self, line: &str) -> io::Result<()>;

    /// Draw the final line and release the terminal
    fn finish(&mut self, line: &str) -> io::Result<()>;
}

/// Renders on stderr, rewriting a single line in place
#[derive(Debug, Default)]
pub struct TerminalSink;

impl TerminalSink {
    fn draw(line: &str, newline: bool) -> io::Result<()> {
        let mut stderr = io::stderr();
        stderr
            .queue(MoveToColumn(0))?
            .queue(Clear(ClearType::CurrentLine))?
            .queue(Print(line))?;
        if newline {
            stderr.queue(Print("\n"))?;
        }
        stderr.flush()
    }
}

impl ProgressSink for TerminalSink {
    fn render(&mut self, line: &str) -> io::Result<()> {
        Self::draw(line, false)
    }

    fn finish(&mut self, line: &str) -> io::Result<()> {
        Self::draw(line, true)
    }
}

/// Discards everything (quiet mode)
#[derive(Debug, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn render(&mut self, _line: &str) -> io::Result<()> {
        Ok(())
    }

    fn finish(&mut self, _line: &str) -> io::Result<()> {
        Ok(())
    }
}

impl ProgressSink for Box<dyn ProgressSink> {
    fn render(&mut self, line: &str) -> io::Result<()> {
        (**self).render(line)
    }

    fn finish(&mut self, line: &str) -> io::Result<()> {
        (**self).finish(line)
    }
}

/// Human-readable status line for a counter snapshot
pub fn render_status(module: &str, unit: &str, counts: &CommandCounts) -> String {
    let mut line = format!(
        "[{}] Status: {}/{} {} complete",
        module,
        counts.finished(),
        counts.total(),
        unit
    );

    match (counts.error, counts.skipped) {
        (0, 0) => {}
        (e, 0) => line.push_str(&format!(" ({} errors)", e)),
        (0, s) => line.push_str(&format!(" ({} skipped)", s)),
        (e, s) => line.push_str(&format!(" ({} errors, {} skipped)", e, s)),
    }

    if !counts.is_settled() {
        line.push_str(&format!(
            " -- {} executing, {} pending",
            counts.executing, counts.pending
        ));
    }
    line
}

/// Handle to a running reporter
#[derive(Debug)]
pub struct ProgressReporter {
    stop_tx: oneshot::Sender<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    /// Spawn a reporter rendering `counter` every `interval`
    pub fn spawn<S: ProgressSink>(
        module: &str,
        unit: &str,
        counter: Arc<CommandCounter>,
        interval: Duration,
        mut sink: S,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<oneshot::Sender<()>>();
        let module = module.to_string();
        let unit = unit.to_string();
        let interval = interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut frame = 0usize;

            loop {
                tokio::select! {
                    ack = &mut stop_rx => {
                        let line = render_status(&module, &unit, &counter.snapshot());
                        if let Err(e) = sink.finish(&line) {
                            tracing::debug!("Progress render failed: {}", e);
                        }
                        if let Ok(ack) = ack {
                            let _ = ack.send(());
                        }
                        return;
                    }
                    _ = ticker.tick() => {
                        let spinner = SPINNER[frame % SPINNER.len()];
                        frame = frame.wrapping_add(1);
                        let line = format!(
                            "{} {}",
                            spinner,
                            render_status(&module, &unit, &counter.snapshot())
                        );
                        if let Err(e) = sink.render(&line) {
                            tracing::debug!("Progress render failed: {}", e);
                        }
                    }
                }
            }
        });

        Self { stop_tx, handle }
    }

    /// Ask the reporter to stop and wait until it has acknowledged
    pub async fn stop(self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.stop_tx.send(ack_tx).is_ok() {
            let _ = ack_rx.await;
        }
        if let Err(e) = self.handle.await {
            tracing::warn!("Progress reporter task ended abnormally: {}", e);
        }
    }
}
