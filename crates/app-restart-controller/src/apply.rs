//! Applies a planned mutation under optimistic concurrency.
//!
//! [`with_conflict_retry`] fetches the latest object, asks the plan function for the desired
//! state of exactly that version and submits it as a compare-and-swap replace. A version
//! conflict restarts the cycle after a jittered exponential delay, until the
//! [`ConflictRetryPolicy`] gives up. An object deleted before the write ends the cycle as
//! [`Applied::Gone`], any other store failure is returned immediately.

use std::time::Duration;

use backoff::{ExponentialBackoff, backoff::Backoff};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    key::ObjectKey,
    signal::Cancellation,
    store::{Store, StoreError},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to fetch the latest version of {object}"))]
    Fetch {
        source: StoreError,
        object: ObjectKey,
    },

    #[snafu(display("failed to update {object}"))]
    Update {
        source: StoreError,
        object: ObjectKey,
    },

    #[snafu(display("gave up updating {object} after {attempts} conflicting attempts"))]
    ConflictRetriesExhausted {
        source: StoreError,
        object: ObjectKey,
        attempts: u32,
    },

    #[snafu(display("cancelled while updating {object}"))]
    Cancelled { object: ObjectKey },
}

/// The outcome of a successful [`with_conflict_retry`].
#[derive(Debug)]
pub enum Applied<K> {
    /// The mutation was written, this is the stored result.
    Updated(K),

    /// The plan declined to change the latest version of the object.
    Unchanged,

    /// The object was deleted before the mutation could be written.
    Gone,
}

/// Bounds the retries on version conflicts.
///
/// The defaults follow the customary Kubernetes client backoff for conflicts: start at 10ms,
/// multiply by 5 with 10% jitter, at most 4 attempts.
#[derive(Clone, Debug, PartialEq)]
pub struct ConflictRetryPolicy {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub randomization_factor: f64,
    pub max_interval: Duration,

    /// Stop retrying once this much time has passed since the first attempt. [`None`] only
    /// relies on [`Self::max_attempts`].
    pub max_elapsed_time: Option<Duration>,

    /// Total number of attempts, including the first one. Always at least one attempt is made.
    pub max_attempts: u32,
}

impl Default for ConflictRetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(10),
            multiplier: 5.0,
            randomization_factor: 0.1,
            max_interval: Duration::from_secs(1),
            max_elapsed_time: Some(Duration::from_secs(10)),
            max_attempts: 4,
        }
    }
}

impl ConflictRetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            randomization_factor: self.randomization_factor,
            multiplier: self.multiplier,
            max_interval: self.max_interval,
            max_elapsed_time: self.max_elapsed_time,
            ..ExponentialBackoff::default()
        }
    }
}

/// Writes `plan(latest)` for the object at `key`, retrying on version conflicts.
///
/// `first` is used instead of a fetch on the first attempt only, every retry fetches again.
/// `plan` is called once per attempt with the version about to be replaced and returns the
/// desired object, or [`None`] if no change is needed anymore. The desired object must keep
/// the resourceVersion of its input, which is what makes the replace a compare-and-swap.
///
/// Every store call and every delay between attempts is abandoned as soon as `cancellation`
/// fires.
pub async fn with_conflict_retry<K, P>(
    store: &dyn Store<K>,
    key: &ObjectKey,
    first: Option<K>,
    mut plan: P,
    policy: &ConflictRetryPolicy,
    cancellation: &Cancellation,
) -> Result<Applied<K>, Error>
where
    K: Send + Sync,
    P: FnMut(&K) -> Option<K> + Send,
{
    let mut backoff = policy.backoff();
    let mut prefetched = first;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let latest = match prefetched.take() {
            Some(latest) => latest,
            None => {
                let fetched = cancellation
                    .run(store.get(key))
                    .await
                    .context(CancelledSnafu { object: key.clone() })?
                    .context(FetchSnafu { object: key.clone() })?;

                let Some(latest) = fetched else {
                    tracing::debug!(object = %key, attempt, "object is gone, nothing to update");
                    return Ok(Applied::Gone);
                };
                latest
            }
        };

        let Some(desired) = plan(&latest) else {
            tracing::debug!(object = %key, attempt, "latest version needs no update");
            return Ok(Applied::Unchanged);
        };

        let conflict = match cancellation
            .run(store.replace(&desired))
            .await
            .context(CancelledSnafu { object: key.clone() })?
        {
            Ok(updated) => return Ok(Applied::Updated(updated)),
            Err(error) if error.is_conflict() => error,
            Err(error) if error.is_not_found() => {
                tracing::debug!(object = %key, attempt, "object was deleted before the update");
                return Ok(Applied::Gone);
            }
            Err(error) => return Err(error).context(UpdateSnafu { object: key.clone() }),
        };

        let delay = (attempt < policy.max_attempts)
            .then(|| backoff.next_backoff())
            .flatten();
        let Some(delay) = delay else {
            return Err(conflict).context(ConflictRetriesExhaustedSnafu {
                object: key.clone(),
                attempts: attempt,
            });
        };

        tracing::debug!(
            object = %key,
            attempt,
            delay = ?delay,
            "version conflict, retrying with the latest version"
        );
        cancellation
            .run(tokio::time::sleep(delay))
            .await
            .context(CancelledSnafu { object: key.clone() })?;
    }
}
