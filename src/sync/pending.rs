//! Handle returned by [`SyncLayer::perform`](super::SyncLayer::perform).
//!
//! A read served from cache completes twice: once immediately with what the
//! cache knew, and again when the remote answers and the entity and cache are
//! refreshed. `Pending` exposes both completion points.

use futures::future::BoxFuture;
use std::future::IntoFuture;
use tokio::task::JoinHandle;

use super::traits::Resolution;
use crate::error::SyncError;

pub struct Pending {
  immediate: Option<Resolution>,
  remote: RemoteTask,
}

enum RemoteTask {
  Spawned(JoinHandle<Result<Resolution, SyncError>>),
  /// Never dispatched
  Rejected(SyncError),
}

impl RemoteTask {
  fn is_finished(&self) -> bool {
    match self {
      RemoteTask::Spawned(handle) => handle.is_finished(),
      RemoteTask::Rejected(_) => true,
    }
  }
}

impl Pending {
  pub(crate) fn new(
    immediate: Option<Resolution>,
    remote: JoinHandle<Result<Resolution, SyncError>>,
  ) -> Self {
    Self {
      immediate,
      remote: RemoteTask::Spawned(remote),
    }
  }

  pub(crate) fn rejected(error: SyncError) -> Self {
    Self {
      immediate: None,
      remote: RemoteTask::Rejected(error),
    }
  }

  /// The cache-derived resolution, if the operation was served from cache.
  pub fn cached(&self) -> Option<&Resolution> {
    self.immediate.as_ref()
  }

  /// Whether the result is already available without waiting on the remote.
  pub fn is_resolved(&self) -> bool {
    self.immediate.is_some() || self.remote.is_finished()
  }

  /// The operation's result: the cached resolution when there is one,
  /// otherwise whatever the remote resolves or rejects with.
  ///
  /// The remote work keeps running in the background either way.
  pub async fn result(self) -> Result<Resolution, SyncError> {
    match self.immediate {
      Some(resolution) => Ok(resolution),
      None => join(self.remote).await,
    }
  }

  /// Wait for the remote to finish and its cache effects to be applied.
  pub async fn settled(self) -> Result<Resolution, SyncError> {
    join(self.remote).await
  }
}

async fn join(remote: RemoteTask) -> Result<Resolution, SyncError> {
  match remote {
    RemoteTask::Spawned(handle) => match handle.await {
      Ok(result) => result,
      Err(e) => Err(SyncError::Task(e.to_string())),
    },
    RemoteTask::Rejected(error) => Err(error),
  }
}

impl IntoFuture for Pending {
  type Output = Result<Resolution, SyncError>;
  type IntoFuture = BoxFuture<'static, Self::Output>;

  fn into_future(self) -> Self::IntoFuture {
    Box::pin(self.result())
  }
}

impl std::fmt::Debug for Pending {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Pending")
      .field("immediate", &self.immediate)
      .field("remote_finished", &self.remote.is_finished())
      .finish()
  }
}
