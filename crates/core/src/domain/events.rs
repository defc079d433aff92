use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The semantic action an [`EventInfo`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    OpenWorkingCopy,
    Commit,
    Stage,
    Unstage,
    Discard,
    Checkout,
    CreateBranch,
    DeleteBranch,
    Merge,
    MergeRestart,
    AbortMerge,
    AbortRebase,
    ContinueRebase,
    ResetToCommit,
    RevertCommit,
    StashCreate,
    StashApply,
    StashDrop,
    TagCommit,
    TagDelete,
    CheckoutFile,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::OpenWorkingCopy => "open-working-copy",
            OperationKind::Commit => "commit",
            OperationKind::Stage => "stage",
            OperationKind::Unstage => "unstage",
            OperationKind::Discard => "discard",
            OperationKind::Checkout => "checkout",
            OperationKind::CreateBranch => "create-branch",
            OperationKind::DeleteBranch => "delete-branch",
            OperationKind::Merge => "merge",
            OperationKind::MergeRestart => "merge-restart",
            OperationKind::AbortMerge => "abort-merge",
            OperationKind::AbortRebase => "abort-rebase",
            OperationKind::ContinueRebase => "continue-rebase",
            OperationKind::ResetToCommit => "reset-to-commit",
            OperationKind::RevertCommit => "revert-commit",
            OperationKind::StashCreate => "stash-create",
            OperationKind::StashApply => "stash-apply",
            OperationKind::StashDrop => "stash-drop",
            OperationKind::TagCommit => "tag-commit",
            OperationKind::TagDelete => "tag-delete",
            OperationKind::CheckoutFile => "checkout-file",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an operation touches, if anything worth reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    None,
    Files(Vec<PathBuf>),
    Branch(String),
}

/// One operation in flight, as seen by listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
    pub kind: OperationKind,
    pub payload: EventPayload,
}

impl EventInfo {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            payload: EventPayload::None,
        }
    }

    pub fn with_files(kind: OperationKind, files: &[PathBuf]) -> Self {
        Self {
            kind,
            payload: EventPayload::Files(files.to_vec()),
        }
    }

    pub fn with_branch(kind: OperationKind, branch: impl Into<String>) -> Self {
        Self {
            kind,
            payload: EventPayload::Branch(branch.into()),
        }
    }

    pub fn files(&self) -> &[PathBuf] {
        match &self.payload {
            EventPayload::Files(files) => files,
            _ => &[],
        }
    }

    pub fn branch(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Branch(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for EventInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            EventPayload::None => write!(f, "{}", self.kind),
            EventPayload::Files(files) => write!(f, "{} ({} files)", self.kind, files.len()),
            EventPayload::Branch(name) => write!(f, "{} {}", self.kind, name),
        }
    }
}
