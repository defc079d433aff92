use crate::domain::ConflictSide;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Presentation-layer hook asked to re-scan directories after files changed on disk.
pub trait FileRefresher: Send + Sync {
    /// `directories` are absolute
    fn refresh(&self, directories: &BTreeSet<PathBuf>);
}

/// Asks a human to confirm a conflict resolution whose sides are reversed.
pub trait ConfirmationPrompt: Send + Sync {
    /// `kept` is the side the resolution will actually keep, from the user's point of view.
    fn confirm_reversed_resolution(&self, kept: ConflictSide, files: &[PathBuf]) -> bool;
}

/// Refresher for callers without a file view
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRefresh;

impl FileRefresher for NoRefresh {
    fn refresh(&self, _directories: &BTreeSet<PathBuf>) {}
}
