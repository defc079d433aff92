use super::credentials::to_git_credential;
use super::git::Git2Engine;
use anyhow::{bail, Context, Result};
use git2::{
    CredentialType, ErrorCode, FetchOptions, PushOptions, RemoteCallbacks, Repository,
    SubmoduleUpdateOptions,
};
use gitweave_core::domain::{LockFailure, PullMode};
use gitweave_core::ports::{
    AllowedCredentials, CredentialsProvider, FetchReport, Integration, PullReport, PushReport,
    RefUpdate,
};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Callbacks answering authentication requests from `credentials`
pub(crate) fn remote_callbacks(credentials: &dyn CredentialsProvider) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    let mut attempts = 0usize;
    callbacks.credentials(move |url, username_from_url, allowed| {
        attempts += 1;
        if attempts > 1 && !credentials.should_retry(attempts - 1) {
            return Err(git2::Error::from_str("authentication failed"));
        }
        let wanted = AllowedCredentials {
            user_pass: allowed.contains(CredentialType::USER_PASS_PLAINTEXT),
            ssh_key: allowed.contains(CredentialType::SSH_KEY),
            default: allowed.contains(CredentialType::DEFAULT),
        };
        match credentials.credentials(url, username_from_url, wanted) {
            Some(credential) => to_git_credential(credential),
            None => Err(git2::Error::from_str("no credentials available")),
        }
    });
    callbacks
}

/// Extracts the first single-quoted path from a libgit2 message
fn quoted_path(message: &str) -> Option<PathBuf> {
    let start = message.find('\'')? + 1;
    let len = message[start..].find('\'')?;
    Some(PathBuf::from(&message[start..start + len]))
}

/// Whether a failed ref update was caused by an existing `.lock` file.
///
/// libgit2 reports most of these with class Os and a generic code, naming the lock file.
fn is_lock_error(err: &git2::Error) -> bool {
    if err.code() == ErrorCode::Locked {
        return true;
    }
    let message = err.message();
    message.contains("failed to lock file")
        || quoted_path(message).is_some_and(|path| path.extension().is_some_and(|ext| ext == "lock"))
}

/// Ref name behind a `<git dir>/<ref>.lock` path
fn locked_ref(git_dir: &Path, lock_path: &Path) -> Option<String> {
    let relative = lock_path.strip_prefix(git_dir).ok()?;
    let name = relative.to_str()?.strip_suffix(".lock")?;
    Some(name.replace('\\', "/"))
}

impl Git2Engine {
    /// Remote name and tracking ref of the current branch's upstream.
    ///
    /// Falls back to `<default remote>/<branch>` when no upstream is configured.
    pub(crate) fn upstream_refs(&self) -> Result<(String, String)> {
        let branch = self.current_branch()?;
        let refname = format!("refs/heads/{}", branch);
        match (
            self.repo.branch_upstream_remote(&refname),
            self.repo.branch_upstream_name(&refname),
        ) {
            (Ok(remote), Ok(tracking)) => {
                let remote = remote
                    .as_str()
                    .context("Upstream remote name is not valid UTF-8")?
                    .to_string();
                let tracking = tracking
                    .as_str()
                    .context("Upstream ref name is not valid UTF-8")?
                    .to_string();
                Ok((remote, tracking))
            }
            _ => Ok((
                self.default_remote.clone(),
                format!("refs/remotes/{}/{}", self.default_remote, branch),
            )),
        }
    }

    fn lock_failure(&self, err: &git2::Error, tracking: &str) -> LockFailure {
        let git_dir = self.repo.path();
        let lock_path = quoted_path(err.message())
            .unwrap_or_else(|| git_dir.join(format!("{}.lock", tracking)));
        let ref_name = locked_ref(git_dir, &lock_path).unwrap_or_else(|| tracking.to_string());
        LockFailure {
            ref_name,
            exists: lock_path.exists(),
            lock_path,
        }
    }

    pub(crate) fn fetch_remote(
        &self,
        remote_name: &str,
        tracking: &str,
        credentials: &dyn CredentialsProvider,
    ) -> Result<FetchReport> {
        let mut remote = self
            .repo
            .find_remote(remote_name)
            .with_context(|| format!("Remote '{}' not found", remote_name))?;

        let mut options = FetchOptions::new();
        options.remote_callbacks(remote_callbacks(credentials));

        match remote.fetch(&[] as &[&str], Some(&mut options), None) {
            Ok(()) => {
                debug!("Fetched {}", remote_name);
                Ok(FetchReport::default())
            }
            Err(err) if is_lock_error(&err) => {
                let failure = self.lock_failure(&err, tracking);
                warn!("Fetch from {} hit a ref lock: {}", remote_name, err.message());
                Ok(FetchReport {
                    lock_failures: vec![failure],
                })
            }
            Err(err) => {
                Err(err).with_context(|| format!("Failed to fetch from remote {}", remote_name))
            }
        }
    }

    pub(crate) fn pull_upstream(
        &mut self,
        mode: PullMode,
        credentials: &dyn CredentialsProvider,
    ) -> Result<PullReport> {
        let (remote, tracking) = self.upstream_refs()?;
        let fetch = self.fetch_remote(&remote, &tracking, credentials)?;
        if !fetch.lock_failures.is_empty() {
            return Ok(PullReport {
                fetch,
                integration: Integration::None,
            });
        }

        let target = match self.repo.refname_to_id(&tracking) {
            Ok(oid) => oid,
            Err(e) if e.code() == ErrorCode::NotFound => {
                bail!("{} does not exist on {}; push the branch first", tracking, remote)
            }
            Err(e) => return Err(e.into()),
        };

        let integration = match mode {
            PullMode::Merge => Integration::Merge(self.merge_commit(target)?),
            PullMode::Rebase => Integration::Rebase(self.rebase_onto(target)?),
        };
        Ok(PullReport { fetch, integration })
    }

    fn push_refspec(
        &self,
        remote_name: &str,
        refspec: &str,
        credentials: &dyn CredentialsProvider,
    ) -> Result<Vec<RefUpdate>> {
        let mut remote = self
            .repo
            .find_remote(remote_name)
            .with_context(|| format!("Remote '{}' not found", remote_name))?;

        let updates = RefCell::new(Vec::new());
        {
            let mut callbacks = remote_callbacks(credentials);
            callbacks.push_update_reference(|refname, status| {
                updates.borrow_mut().push(RefUpdate {
                    refname: refname.to_string(),
                    status: status.map(str::to_string),
                });
                Ok(())
            });
            let mut options = PushOptions::new();
            options.remote_callbacks(callbacks);
            match remote.push(&[refspec], Some(&mut options)) {
                Ok(()) => {}
                // libgit2 refuses non-fast-forward updates before contacting the remote
                Err(e) if e.code() == ErrorCode::NotFastForward => {
                    let destination = refspec.rsplit(':').next().unwrap_or(refspec);
                    return Ok(vec![RefUpdate {
                        refname: destination.to_string(),
                        status: Some(e.message().to_string()),
                    }]);
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to push {} to {}", refspec, remote_name))
                }
            }
        }
        Ok(updates.into_inner())
    }

    pub(crate) fn push_branch(&mut self, credentials: &dyn CredentialsProvider) -> Result<PushReport> {
        let branch = self.current_branch()?;
        let (remote, _) = self.upstream_refs()?;
        let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch);
        let updates = self.push_refspec(&remote, &refspec, credentials)?;
        info!("Pushed {} to {} ({} ref updates)", branch, remote, updates.len());
        Ok(PushReport {
            remote,
            branch,
            updates,
        })
    }

    pub(crate) fn push_tag_ref(
        &mut self,
        name: &str,
        credentials: &dyn CredentialsProvider,
    ) -> Result<PushReport> {
        let remote = match self.upstream_refs() {
            Ok((remote, _)) => remote,
            Err(_) => self.default_remote.clone(),
        };
        let refspec = format!("refs/tags/{0}:refs/tags/{0}", name);
        let updates = self.push_refspec(&remote, &refspec, credentials)?;
        Ok(PushReport {
            remote,
            branch: name.to_string(),
            updates,
        })
    }
}

/// Initialises and updates every submodule, then recurses into each.
pub(crate) fn update_submodules(
    repo: &Repository,
    credentials: &dyn CredentialsProvider,
) -> Result<()> {
    for mut submodule in repo.submodules()? {
        let name = submodule.name().unwrap_or("<unnamed>").to_string();

        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(remote_callbacks(credentials));
        let mut options = SubmoduleUpdateOptions::new();
        options.fetch(fetch);

        submodule
            .update(true, Some(&mut options))
            .with_context(|| format!("Failed to update submodule {}", name))?;
        debug!("Updated submodule {}", name);

        let nested = submodule
            .open()
            .with_context(|| format!("Failed to open submodule {}", name))?;
        update_submodules(&nested, credentials)?;
    }
    Ok(())
}
