//! Reports the outcome of each [Step] that runs on a node.
//!
//! The user picks a real or a fake [Report] implementation and calls its methods. Those call
//! [_starting] and [_report], which hold all of the logic and write to any writers they are given.
//! The real implementation locks stdout and stderr just before reporting and releases them as soon
//! as it is done, so hosts reporting at the same time don't interleave their output.

use crate::core::script::Step;
use async_trait::async_trait;
use std::fmt::Display;
use std::io::{self, Write};
use std::ops::DerefMut;
use std::process::Output;
use tokio::task;

/// Prints feedback about each [Step] run on a node to stdout/stderr to keep the user informed.
#[async_trait]
pub trait Report {
    /// Reports that a step is about to commence.
    async fn starting(&mut self, host: &str, step: &Step) -> io::Result<()>;

    /// Reports the outcome of a step.
    async fn report(&mut self, host: &str, step: &Step, output: &Output) -> io::Result<()>;
}

/// The real [Report] implementation. Uses the real stdout/stderr.
#[derive(Clone, Debug)]
pub struct Reporter;

#[async_trait]
impl Report for Reporter {
    async fn starting(&mut self, host: &str, step: &Step) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        task::block_in_place(move || _starting(&mut stdout, host, step))
    }

    async fn report(&mut self, host: &str, step: &Step, output: &Output) -> io::Result<()> {
        // Tokio's async IO has no locking, so the std handles are locked here and released when
        // reporting is done.
        let mut stdout = io::stdout().lock();
        let mut stderr = io::stderr().lock();
        task::block_in_place(move || _report(&mut stdout, &mut stderr, host, step, output))
    }
}

/// What ran, for a failure report.
fn script(step: &Step) -> String {
    match step {
        Step::Remote(segment) => segment.render(),
        Step::Upload { from, to } => format!("scp {} {to}\n", from.display()),
        Step::Local(fragment) => fragment.render(),
    }
}

/// The logic for reporting the outcome of a [Step], against any writers.
pub fn _report<OT: Write, ET: Write, O: DerefMut<Target = OT>, E: DerefMut<Target = ET>>(
    mut stdout: O,
    mut stderr: E,
    host: &str,
    step: &Step,
    output: &Output,
) -> io::Result<()> {
    fn write_indented(
        mut writer: impl Write,
        header: impl Display,
        content: impl AsRef<str>,
    ) -> io::Result<()> {
        writeln!(writer, "    {header}")?;
        for line in content.as_ref().lines() {
            writeln!(writer, "        {line}")?;
        }
        Ok(())
    }

    if output.status.success() {
        writeln!(&mut stdout, "[{host}] Completed {}", step.title())?;
    } else {
        writeln!(&mut stderr, "[{host}] Step failed. See below for details.")?;
    }

    if !output.stdout.is_empty() {
        write_indented(
            stdout.deref_mut(),
            "Captured stdout:",
            String::from_utf8_lossy(&output.stdout),
        )?;
    }

    if !output.stderr.is_empty() {
        write_indented(
            stderr.deref_mut(),
            "Captured stderr:",
            String::from_utf8_lossy(&output.stderr),
        )?;
    }

    if !output.status.success() {
        let exit_code_message = match output.status.code() {
            Some(i) => format!("exit code {i}"),
            None => "error".to_string(),
        };
        writeln!(
            &mut stderr,
            "[{host}] {} exited with {exit_code_message}:\n{}",
            step.title(),
            script(step),
        )?;
    }
    Ok(())
}

/// The logic for reporting that a [Step] is starting, against any writer.
pub fn _starting<OT: Write, O: DerefMut<Target = OT>>(
    mut stdout: O,
    host: &str,
    step: &Step,
) -> io::Result<()> {
    writeln!(
        &mut stdout,
        // The extra space lines up "Starting" with "Completed".
        "[{host}] Starting  {}",
        step.title(),
    )
}
