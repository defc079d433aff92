#![allow(dead_code)]

use anyhow::Result;
use git2::{build::RepoBuilder, Oid, PushOptions, Repository, RepositoryInitOptions, Signature};
use gitweave::adapters::Git2Engine;
use gitweave_core::app::{ListenerRegistry, RepositorySession};
use gitweave_core::ports::NoRefresh;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// A bare `origin` on disk plus any number of clones of it
pub struct Fixture {
    dir: TempDir,
    pub remote: PathBuf,
}

impl Fixture {
    /// Creates the remote with `main` holding one commit of `files`.
    pub fn new(files: &[(&str, &str)]) -> Result<Self> {
        let dir = TempDir::new()?;
        let remote = dir.path().join("origin.git");
        let mut options = RepositoryInitOptions::new();
        options.bare(true).initial_head("main");
        Repository::init_opts(&remote, &options)?;

        let seed_path = dir.path().join("seed");
        let mut options = RepositoryInitOptions::new();
        options.initial_head("main");
        let seed = Repository::init_opts(&seed_path, &options)?;
        configure_user(&seed)?;
        seed.remote("origin", remote.to_str().unwrap_or_default())?;
        for (name, content) in files {
            write_file(&seed_path, name, content)?;
        }
        commit_all(&seed_path, "Initial commit")?;
        push_main(&seed_path)?;

        Ok(Self { dir, remote })
    }

    /// Clones the remote into a fresh working copy named `name`.
    pub fn clone_as(&self, name: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        let url = self.remote.to_str().unwrap_or_default().to_string();
        let repo = RepoBuilder::new().clone(&url, &path)?;
        configure_user(&repo)?;
        Ok(path)
    }

    pub fn remote_head(&self) -> Result<Oid> {
        let bare = Repository::open_bare(&self.remote)?;
        Ok(bare.refname_to_id("refs/heads/main")?)
    }
}

fn configure_user(repo: &Repository) -> Result<()> {
    let mut config = repo.config()?;
    config.set_str("user.name", "Test User")?;
    config.set_str("user.email", "test@example.com")?;
    Ok(())
}

pub fn write_file(workdir: &Path, name: &str, content: &str) -> Result<()> {
    let path = workdir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

pub fn read_file(workdir: &Path, name: &str) -> Result<String> {
    Ok(fs::read_to_string(workdir.join(name))?)
}

pub fn stage_file(workdir: &Path, name: &str) -> Result<()> {
    let repo = Repository::open(workdir)?;
    let mut index = repo.index()?;
    index.add_path(Path::new(name))?;
    index.write()?;
    Ok(())
}

/// Stages everything in the working copy and commits it on the current branch.
pub fn commit_all(workdir: &Path, message: &str) -> Result<Oid> {
    let repo = Repository::open(workdir)?;
    let mut index = repo.index()?;
    index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
    index.write()?;
    let tree = repo.find_tree(index.write_tree()?)?;
    let signature = Signature::now("Test User", "test@example.com")?;
    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        Err(_) => None,
    };
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    Ok(repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?)
}

/// Commits `content` to `name` and pushes main, bypassing the code under test.
pub fn commit_and_push(workdir: &Path, name: &str, content: &str, message: &str) -> Result<Oid> {
    write_file(workdir, name, content)?;
    let oid = commit_all(workdir, message)?;
    push_main(workdir)?;
    Ok(oid)
}

pub fn push_main(workdir: &Path) -> Result<()> {
    let repo = Repository::open(workdir)?;
    let mut remote = repo.find_remote("origin")?;
    let mut options = PushOptions::new();
    remote.push(&["refs/heads/main:refs/heads/main"], Some(&mut options))?;
    Ok(())
}

pub fn head_id(workdir: &Path) -> Result<Oid> {
    let repo = Repository::open(workdir)?;
    let id = repo.head()?.peel_to_commit()?.id();
    Ok(id)
}

pub fn engine(workdir: &Path) -> Result<Git2Engine> {
    Git2Engine::open(workdir, "origin")
}

pub fn session(workdir: &Path) -> Result<RepositorySession> {
    Ok(RepositorySession::new(
        Box::new(engine(workdir)?),
        Arc::new(ListenerRegistry::new()),
        Arc::new(NoRefresh),
    ))
}
