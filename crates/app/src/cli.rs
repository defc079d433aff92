use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, PartialEq)]
#[command(name = "gitweave")]
#[command(about = "Serialized git operations with precise pull, push and stash outcomes")]
pub struct CliArgs {
    /// Working copy to operate on (overrides config)
    #[arg(long, global = true)]
    pub repo: Option<PathBuf>,

    /// Path to configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Answer yes to confirmation prompts
    #[arg(long, short, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Show staged, unstaged, untracked and conflicted files
    Status,
    /// Fetch from the upstream remote
    Fetch,
    /// Fetch and integrate the upstream branch
    Pull {
        /// Rebase local commits instead of merging (overrides config)
        #[arg(long)]
        rebase: bool,
        /// Update submodules after a successful pull
        #[arg(long)]
        submodules: bool,
    },
    /// Push the current branch
    Push,
    /// Commit the staged changes
    Commit {
        #[arg(short, long)]
        message: String,
    },
    Stage {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    Unstage {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Stash local changes
    StashSave {
        #[arg(short, long, default_value = "")]
        message: String,
        /// Include untracked files
        #[arg(long)]
        untracked: bool,
    },
    StashList,
    /// Apply a stash entry to the working copy
    StashApply {
        #[arg(default_value_t = 0)]
        index: usize,
        /// Drop the entry once applied
        #[arg(long)]
        pop: bool,
    },
    /// Abort the merge or rebase in progress and pull again
    MergeRestart,
    AbortMerge,
    AbortRebase,
    ContinueRebase,
    /// Keep your own version of conflicted files
    ResolveMine {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Keep the incoming version of conflicted files
    ResolveTheirs {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Tag a commit
    Tag {
        name: String,
        #[arg(default_value = "HEAD")]
        rev: String,
        /// Create an annotated tag with this message
        #[arg(short, long)]
        message: Option<String>,
    },
}
