use gitweave_core::domain::ConflictSide;
use gitweave_core::ports::{ConfirmationPrompt, FileRefresher};
use std::collections::BTreeSet;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

fn describe(kept: ConflictSide) -> &'static str {
    match kept {
        ConflictSide::Local => "your local commits",
        ConflictSide::Upstream => "the upstream branch",
    }
}

/// Asks on stderr and reads a y/n answer from stdin
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirmation;

impl ConfirmationPrompt for StdinConfirmation {
    fn confirm_reversed_resolution(&self, kept: ConflictSide, files: &[PathBuf]) -> bool {
        let mut stderr = io::stderr();
        let _ = writeln!(
            stderr,
            "A rebase is in progress: this keeps the version from {} for {} file(s).",
            describe(kept),
            files.len()
        );
        for file in files {
            let _ = writeln!(stderr, "  {}", file.display());
        }
        let _ = write!(stderr, "Continue? [y/N] ");
        let _ = stderr.flush();

        let mut answer = String::new();
        if let Err(err) = io::stdin().lock().read_line(&mut answer) {
            warn!("Could not read confirmation: {}", err);
            return false;
        }
        matches!(answer.trim(), "y" | "Y" | "yes")
    }
}

/// Answers every prompt the same way (`--yes`, tests)
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl ConfirmationPrompt for FixedAnswer {
    fn confirm_reversed_resolution(&self, kept: ConflictSide, files: &[PathBuf]) -> bool {
        debug!(
            "Answering {} to keeping {} for {} file(s)",
            self.0,
            describe(kept),
            files.len()
        );
        self.0
    }
}

/// File view for a CLI: there is nothing to re-scan, so changed directories are logged
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingRefresher;

impl FileRefresher for LoggingRefresher {
    fn refresh(&self, directories: &BTreeSet<PathBuf>) {
        for directory in directories {
            debug!("Changed on disk: {}", directory.display());
        }
    }
}
