// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Poll a source work tree and react to changes.
//!
//! The watcher takes a fingerprint of the source work tree up front, then
//! re-fingerprints it once per interval. Whenever the fingerprint differs
//! from the last one seen, the change callback is invoked. Nothing is
//! invoked for the initial state.

use crate::git::{GitError, WorkTreeProbe};

use std::{path::Path, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Interval to fall back to when given a zero interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Watch source work tree until cancelled.
///
/// Returns the number of changes the callback handled.
///
/// # Errors
///
/// - Return [`WatchError::Probe`] if the work tree cannot be fingerprinted.
/// - Return [`WatchError::Callback`] if the change callback fails.
#[instrument(skip(probe, source_root, cancel, on_change), level = "debug")]
pub async fn watch<P, F, E>(
    probe: &P,
    source_root: &Path,
    interval: Duration,
    cancel: &CancellationToken,
    mut on_change: F,
) -> Result<usize>
where
    P: WorkTreeProbe,
    F: FnMut() -> std::result::Result<(), E>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let interval = if interval.is_zero() {
        DEFAULT_INTERVAL
    } else {
        interval
    };

    let mut state = probe.fingerprint(source_root)?;
    info!("watch {:?} every {interval:?}", source_root.display());

    let mut changes = 0;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("watch cancelled after {changes} changes");
                return Ok(changes);
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let next = probe.fingerprint(source_root)?;
        if next == state {
            continue;
        }

        info!("change detected in {:?}", source_root.display());
        state = next;
        on_change().map_err(|err| WatchError::Callback(err.into()))?;
        changes += 1;
    }
}

/// Watch error types.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Source work tree cannot be fingerprinted.
    #[error(transparent)]
    Probe(#[from] GitError),

    /// Change callback fails.
    #[error("failed to handle change")]
    Callback(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Friendly result alias :3
pub type Result<T, E = WatchError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::{
        io,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    /// Probe that reports a new fingerprint on scripted polls.
    struct ScriptedProbe {
        polls: AtomicUsize,
        script: Vec<&'static str>,
    }

    impl ScriptedProbe {
        fn new(script: Vec<&'static str>) -> Self {
            Self {
                polls: AtomicUsize::new(0),
                script,
            }
        }
    }

    impl WorkTreeProbe for ScriptedProbe {
        fn is_clean(&self, _path: &Path) -> crate::git::Result<bool> {
            Ok(true)
        }

        fn fingerprint(&self, _path: &Path) -> crate::git::Result<String> {
            let poll = self.polls.fetch_add(1, Ordering::SeqCst);
            let state = self.script.get(poll).or(self.script.last()).copied();
            match state {
                Some("broken") => Err(GitError::Open {
                    source: git2::Error::from_str("broken"),
                    path: "broken".into(),
                }),
                Some(state) => Ok(state.to_owned()),
                None => Ok(String::new()),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn callback_runs_once_per_change() -> anyhow::Result<()> {
        let probe = ScriptedProbe::new(vec!["a", "a", "b", "b", "c", "c"]);
        let cancel = CancellationToken::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5500)).await;
            stopper.cancel();
        });

        let counter = seen.clone();
        let changes = watch(
            &probe,
            Path::new("skills"),
            Duration::from_secs(1),
            &cancel,
            || -> io::Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .await?;

        assert_eq!(changes, 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_falls_back() -> anyhow::Result<()> {
        let probe = ScriptedProbe::new(vec!["a", "b"]);
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DEFAULT_INTERVAL - Duration::from_millis(1)).await;
            stopper.cancel();
        });

        let changes = watch(&probe, Path::new("skills"), Duration::ZERO, &cancel, || {
            Ok::<_, io::Error>(())
        })
        .await?;
        assert_eq!(changes, 0);

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_stops_watch() {
        let probe = ScriptedProbe::new(vec!["a", "broken"]);
        let cancel = CancellationToken::new();

        let result = watch(&probe, Path::new("skills"), Duration::from_secs(1), &cancel, || {
            Ok::<_, io::Error>(())
        })
        .await;
        assert!(matches!(result, Err(WatchError::Probe(..))));
    }

    #[tokio::test(start_paused = true)]
    async fn callback_failure_stops_watch() {
        let probe = ScriptedProbe::new(vec!["a", "b"]);
        let cancel = CancellationToken::new();

        let result = watch(&probe, Path::new("skills"), Duration::from_secs(1), &cancel, || {
            Err(io::Error::other("sync failed"))
        })
        .await;
        assert!(matches!(result, Err(WatchError::Callback(..))));
    }
}
