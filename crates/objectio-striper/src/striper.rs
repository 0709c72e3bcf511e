//! Virtual object operations
//!
//! [`Striper`] turns byte-range operations on a virtual object into calls on
//! its backing objects. Each operation issues at most one call per backing
//! object (see [`coalesce`]), so calls that touch the same object can never
//! be reordered. Independent objects are driven concurrently, bounded by
//! [`IoOptions::max_in_flight`].
//!
//! Multi-object mutations are not atomic. When a backing call fails after
//! others succeeded the error is a [`StriperError::PartialFailure`] listing
//! what completed; no rollback is attempted.

use crate::error::{CancelReason, OpContext, Operation, StriperError, StriperResult};
use crate::layout::{ObjectRef, coalesce, compute_segments, object_name};
use crate::size::ReclaimPlan;
use crate::store::{BackingStore, StoreError, StoreResult};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use objectio_common::config::IoConfig;
use objectio_common::{ObjectName, ObjectStat, StripingLayout};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default bound on concurrent backing calls per operation
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// Dispatch tuning
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoOptions {
    /// Concurrent backing calls per operation
    pub max_in_flight: usize,
    /// Deadline for each backing call
    pub op_timeout: Option<Duration>,
}

impl Default for IoOptions {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            op_timeout: None,
        }
    }
}

impl From<&IoConfig> for IoOptions {
    fn from(config: &IoConfig) -> Self {
        Self {
            max_in_flight: config.max_in_flight.max(1),
            op_timeout: config.op_timeout(),
        }
    }
}

/// Why one backing call did not succeed
#[derive(Debug)]
pub(crate) enum CallFailure {
    Store(StoreError),
    Cancelled(CancelReason),
}

/// Whether the calls of a batch change the store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CallKind {
    /// Reads and stats; nothing is applied, so nothing is reported completed
    ReadOnly,
    Mutation,
}

/// A backing call tagged with the object it targets
pub(crate) type Job<'a, T> = (String, BoxFuture<'a, StoreResult<T>>);

/// Outcome of one started job: its position, target object and result
type Outcome<T> = (usize, String, Result<T, CallFailure>);

/// Remember the failure to report; a cancellation outranks a store error
fn keep_failure(slot: &mut Option<(String, CallFailure)>, object: String, failure: CallFailure) {
    let replace = match slot {
        None => true,
        Some((_, CallFailure::Store(_))) => matches!(failure, CallFailure::Cancelled(_)),
        Some((_, CallFailure::Cancelled(_))) => false,
    };
    if replace {
        *slot = Some((object, failure));
    }
}

/// Turn a failed backing call into the operation's error
pub(crate) fn op_error(
    context: &OpContext,
    object: String,
    completed: Vec<String>,
    failure: CallFailure,
) -> StriperError {
    match failure {
        CallFailure::Cancelled(reason) => {
            warn!(%context, %object, completed = completed.len(), %reason, "Operation stopped");
            StriperError::Cancelled {
                context: context.clone(),
                reason,
                completed,
            }
        }
        CallFailure::Store(source) if completed.is_empty() => StriperError::Store {
            context: context.clone(),
            object,
            source,
        },
        CallFailure::Store(source) => {
            warn!(
                %context,
                %object,
                completed = completed.len(),
                error = %source,
                "Operation partially applied"
            );
            StriperError::PartialFailure {
                context: context.clone(),
                completed,
                object,
                source,
            }
        }
    }
}

fn check_name(name: &str) -> StriperResult<()> {
    ObjectName::new(name).map_err(objectio_common::Error::from)?;
    Ok(())
}

/// Handle for striped virtual objects on top of a [`BackingStore`]
///
/// The layout is fixed for the handle's lifetime and is not stored with the
/// objects: every handle touching a given virtual object must use the same
/// layout.
pub struct Striper<S> {
    store: Arc<S>,
    layout: StripingLayout,
    options: IoOptions,
    cancel: CancellationToken,
}

impl<S> Clone for Striper<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            layout: self.layout,
            options: self.options,
            cancel: self.cancel.clone(),
        }
    }
}

impl<S: BackingStore> Striper<S> {
    /// Create a handle with default I/O options
    pub fn new(store: Arc<S>, layout: StripingLayout) -> Self {
        Self {
            store,
            layout,
            options: IoOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the I/O options
    #[must_use]
    pub fn with_options(mut self, options: IoOptions) -> Self {
        self.options = options;
        self
    }

    /// Stop in-flight and future operations when `token` is cancelled
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Layout used by this handle
    pub const fn layout(&self) -> &StripingLayout {
        &self.layout
    }

    /// Underlying store
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// I/O options used by this handle
    pub const fn options(&self) -> &IoOptions {
        &self.options
    }

    pub(crate) fn object_name(&self, name: &str, object: ObjectRef) -> String {
        object_name(name, object, &self.layout)
    }

    /// Write `data` at logical `offset`
    ///
    /// Creates the virtual object if needed. A zero-length write is a no-op.
    #[instrument(skip(self, data), fields(length = data.len()))]
    pub async fn write(&self, name: &str, data: &[u8], offset: u64) -> StriperResult<()> {
        check_name(name)?;
        let context = OpContext::new(Operation::Write, name, offset, data.len() as u64);
        self.write_at(&context, data, offset).await
    }

    /// Append `data` at the current logical end
    ///
    /// The end is read first, so concurrent appends to one virtual object
    /// are not serialized against each other.
    #[instrument(skip(self, data), fields(length = data.len()))]
    pub async fn append(&self, name: &str, data: &[u8]) -> StriperResult<()> {
        check_name(name)?;
        let sizing = OpContext::new(Operation::Append, name, 0, data.len() as u64);
        let size = match self.logical_size(&sizing).await {
            Ok(size) => size,
            Err(e) if e.is_not_found() => 0,
            Err(e) => return Err(e),
        };

        let context = OpContext::new(Operation::Append, name, size, data.len() as u64);
        self.write_at(&context, data, size).await
    }

    /// Replace the whole content with `data`
    ///
    /// Backing objects beyond the new end are removed afterwards.
    #[instrument(skip(self, data), fields(length = data.len()))]
    pub async fn write_full(&self, name: &str, data: &[u8]) -> StriperResult<()> {
        check_name(name)?;
        let length = data.len() as u64;
        let context = OpContext::new(Operation::WriteFull, name, 0, length);
        let previous = self.last_object_set(&context).await?;

        let completed = if data.is_empty() {
            let anchor = self.object_name(name, ObjectRef::anchor(0));
            self.call(&context, &anchor, self.store.write_full(&anchor, data))
                .await?;
            vec![anchor]
        } else {
            let extents = coalesce(&compute_segments(&self.layout, 0, length)?);
            // Every extent starts at local offset 0 when the range does
            let (anchors, others): (Vec<_>, Vec<_>) = extents
                .iter()
                .map(|extent| {
                    (
                        extent.object.is_anchor(),
                        self.object_name(name, extent.object),
                        extent.gather(data),
                    )
                })
                .partition(|(is_anchor, _, _)| *is_anchor);

            // Anchors one at a time in ascending set order, so a failure never
            // leaves a gap in the anchor chain
            let mut completed = Vec::with_capacity(extents.len());
            for (_, object, payload) in &anchors {
                if let Err(failure) = self.guarded(self.store.write_full(object, payload)).await {
                    return Err(op_error(&context, object.clone(), completed, failure));
                }
                completed.push(object.clone());
            }

            let jobs = others
                .iter()
                .map(|(_, object, payload)| (object.clone(), self.store.write_full(object, payload)))
                .collect();
            self.dispatch_after(&context, CallKind::Mutation, completed, jobs)
                .await?
                .1
        };

        if let Some(previous) = previous {
            let plan = ReclaimPlan::shrink(&self.layout, length, previous, false);
            if !plan.is_empty() {
                debug!(
                    %context,
                    removals = plan.removals.len() + plan.anchors.len(),
                    "Removing backing objects past the new end"
                );
                self.reclaim(&context, plan, completed).await?;
            }
        }
        Ok(())
    }

    /// Read into `buf` from logical `offset`
    ///
    /// Returns the number of bytes read, which is short at the logical end
    /// and 0 at or past it. Unwritten ranges read as zeros.
    #[instrument(skip(self, buf), fields(length = buf.len()))]
    pub async fn read(&self, name: &str, buf: &mut [u8], offset: u64) -> StriperResult<usize> {
        check_name(name)?;
        let context = OpContext::new(Operation::Read, name, offset, buf.len() as u64);
        if offset.checked_add(buf.len() as u64).is_none() {
            return Err(StriperError::invalid_argument(format!(
                "range at offset {offset} with length {} overflows",
                buf.len()
            )));
        }

        let size = self.logical_size(&context).await?;
        if buf.is_empty() || offset >= size {
            return Ok(0);
        }

        let length = (size - offset).min(buf.len() as u64);
        let extents = coalesce(&compute_segments(&self.layout, offset, length)?);
        let names: Vec<String> = extents
            .iter()
            .map(|extent| self.object_name(name, extent.object))
            .collect();

        let store = &self.store;
        let jobs = extents
            .iter()
            .zip(&names)
            .map(|(extent, object)| {
                let call: BoxFuture<'_, StoreResult<Vec<u8>>> = Box::pin(async move {
                    // Objects never written inside the range are holes
                    match store
                        .read(object, extent.local_offset, extent.length as usize)
                        .await
                    {
                        Err(StoreError::NotFound) => Ok(Vec::new()),
                        other => other,
                    }
                });
                (object.clone(), call)
            })
            .collect();
        let chunks = self.dispatch(&context, CallKind::ReadOnly, jobs).await?;

        let dest = &mut buf[..length as usize];
        dest.fill(0);
        for (extent, chunk) in extents.iter().zip(&chunks) {
            extent.scatter(chunk, dest);
        }
        Ok(dest.len())
    }

    /// Read up to `length` bytes from logical `offset` into a new buffer
    pub async fn read_to_vec(&self, name: &str, length: usize, offset: u64) -> StriperResult<Vec<u8>> {
        let mut buf = vec![0u8; length];
        let n = self.read(name, &mut buf, offset).await?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Set the logical size to `size`
    ///
    /// Growing leaves the new range reading as zeros; shrinking drops data
    /// past `size` from the backing objects.
    #[instrument(skip(self))]
    pub async fn truncate(&self, name: &str, size: u64) -> StriperResult<()> {
        check_name(name)?;
        let context = OpContext::new(Operation::Truncate, name, size, 0);
        let Some(last_set) = self.last_object_set(&context).await? else {
            return Err(StriperError::NotFound { context });
        };
        let current = self.size_from(&context, last_set).await?;

        match size.cmp(&current) {
            Ordering::Equal => Ok(()),
            Ordering::Greater => {
                info!(%context, current, "Growing virtual object");
                // The last byte must exist for the new size to be observable
                self.write_at(&context, &[0], size - 1).await
            }
            Ordering::Less => {
                info!(%context, current, "Shrinking virtual object");
                if size > 0 {
                    // The object holding the new last byte may be a hole
                    let segments = compute_segments(&self.layout, size - 1, 1)?;
                    if let Some(segment) = segments.first() {
                        let object = self.object_name(name, segment.object);
                        self.call(&context, &object, self.store.create(&object))
                            .await?;
                    }
                }
                let plan = ReclaimPlan::shrink(&self.layout, size, last_set, true);
                self.reclaim(&context, plan, Vec::new()).await
            }
        }
    }

    /// Remove the virtual object and all its backing objects
    ///
    /// Removing an absent virtual object succeeds.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> StriperResult<()> {
        check_name(name)?;
        let context = OpContext::new(Operation::Delete, name, 0, 0);
        let Some(last_set) = self.last_object_set(&context).await? else {
            debug!(%context, "Virtual object already absent");
            return Ok(());
        };

        info!(%context, last_set, "Deleting virtual object");
        let plan = ReclaimPlan::delete(&self.layout, last_set);
        self.reclaim(&context, plan, Vec::new()).await
    }

    /// Logical size and latest modification time
    #[instrument(skip(self))]
    pub async fn stat(&self, name: &str) -> StriperResult<ObjectStat> {
        check_name(name)?;
        let context = OpContext::new(Operation::Stat, name, 0, 0);
        let Some(last_set) = self.last_object_set(&context).await? else {
            return Err(StriperError::NotFound { context });
        };
        let size = self.size_from(&context, last_set).await?;

        // mtime covers the object sets holding data below the size
        let extent_top = if size == 0 {
            0
        } else {
            self.layout.object_set_of(size - 1)
        };
        let stripe_count = self.layout.stripe_count();
        let objects: Vec<ObjectRef> = (0..=extent_top)
            .flat_map(|set| (0..stripe_count).map(move |index| ObjectRef::new(set, index)))
            .collect();
        let mtime = self
            .stat_objects(&context, &objects)
            .await?
            .into_iter()
            .flatten()
            .map(|stat| stat.mtime)
            .max();
        Ok(ObjectStat::new(size, mtime.unwrap_or_default()))
    }

    async fn write_at(&self, context: &OpContext, data: &[u8], offset: u64) -> StriperResult<()> {
        let segments = compute_segments(&self.layout, offset, data.len() as u64)?;
        if segments.is_empty() {
            return Ok(());
        }
        let extents = coalesce(&segments);
        let top_set = extents
            .iter()
            .map(|extent| extent.object.object_set)
            .max()
            .unwrap_or(0);
        self.ensure_anchors(context, top_set).await?;

        let payloads: Vec<(String, Cow<'_, [u8]>, u64)> = extents
            .iter()
            .map(|extent| {
                (
                    self.object_name(&context.name, extent.object),
                    extent.gather(data),
                    extent.local_offset,
                )
            })
            .collect();
        debug!(%context, objects = payloads.len(), "Dispatching writes");

        let jobs = payloads
            .iter()
            .map(|(object, payload, local_offset)| {
                (object.clone(), self.store.write(object, payload, *local_offset))
            })
            .collect();
        self.dispatch(context, CallKind::Mutation, jobs).await?;
        Ok(())
    }

    /// Run one backing call under the handle's cancellation token and
    /// per-call timeout
    pub(crate) async fn guarded<T>(
        &self,
        call: BoxFuture<'_, StoreResult<T>>,
    ) -> Result<T, CallFailure> {
        if self.cancel.is_cancelled() {
            return Err(CallFailure::Cancelled(CancelReason::Cancelled));
        }

        let bounded = async {
            match self.options.op_timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result.map_err(CallFailure::Store),
                    Err(_) => Err(CallFailure::Cancelled(CancelReason::TimedOut)),
                },
                None => call.await.map_err(CallFailure::Store),
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(CallFailure::Cancelled(CancelReason::Cancelled)),
            result = bounded => result,
        }
    }

    /// Run a single backing call
    pub(crate) async fn call<T>(
        &self,
        context: &OpContext,
        object: &str,
        call: BoxFuture<'_, StoreResult<T>>,
    ) -> StriperResult<T> {
        self.guarded(call)
            .await
            .map_err(|failure| op_error(context, object.to_string(), Vec::new(), failure))
    }

    /// Run jobs with at most `max_in_flight` calls in flight
    ///
    /// After a failure, `keep_issuing` decides whether jobs not yet started
    /// still go out. Calls already started are always awaited, so every
    /// call that reached the store is accounted for. Outcomes come back in
    /// completion order; jobs never started have none.
    async fn drive<'a, T>(
        &'a self,
        jobs: Vec<Job<'a, T>>,
        keep_issuing: impl Fn(&CallFailure) -> bool,
    ) -> Vec<Outcome<T>> {
        let limit = self.options.max_in_flight.max(1);
        let mut pending = jobs.into_iter().enumerate();
        let mut in_flight = FuturesUnordered::new();
        let mut outcomes = Vec::with_capacity(pending.len());
        let mut issuing = true;

        loop {
            while issuing && in_flight.len() < limit {
                let Some((index, (object, call))) = pending.next() else {
                    break;
                };
                in_flight.push(async move { (index, object, self.guarded(call).await) });
            }

            let Some((index, object, outcome)) = in_flight.next().await else {
                break;
            };
            if let Err(failure) = &outcome {
                issuing &= keep_issuing(failure);
            }
            outcomes.push((index, object, outcome));
        }
        outcomes
    }

    /// Run backing calls concurrently, stopping at the first failure
    ///
    /// Results come back in job order. Jobs not yet started when a call
    /// fails are never issued; calls already started finish, and for a
    /// [`CallKind::Mutation`] batch the ones that succeeded are reported as
    /// completed.
    pub(crate) async fn dispatch<'a, T>(
        &'a self,
        context: &OpContext,
        kind: CallKind,
        jobs: Vec<Job<'a, T>>,
    ) -> StriperResult<Vec<T>> {
        self.dispatch_after(context, kind, Vec::new(), jobs)
            .await
            .map(|(results, _)| results)
    }

    /// [`dispatch`](Self::dispatch) continuing an operation that already
    /// applied `completed`; on success also returns the full completed list
    async fn dispatch_after<'a, T>(
        &'a self,
        context: &OpContext,
        kind: CallKind,
        mut completed: Vec<String>,
        jobs: Vec<Job<'a, T>>,
    ) -> StriperResult<(Vec<T>, Vec<String>)> {
        let total = jobs.len();
        let mut results: Vec<Option<T>> = std::iter::repeat_with(|| None).take(total).collect();
        let mut failure = None;

        for (index, object, outcome) in self.drive(jobs, |_| false).await {
            match outcome {
                Ok(value) => {
                    if kind == CallKind::Mutation {
                        completed.push(object);
                    }
                    results[index] = Some(value);
                }
                Err(e) => keep_failure(&mut failure, object, e),
            }
        }

        if let Some((object, e)) = failure {
            return Err(op_error(context, object, completed, e));
        }
        Ok((results.into_iter().flatten().collect(), completed))
    }

    /// Carry out a [`ReclaimPlan`]
    ///
    /// Truncations and removals run concurrently and all of them are
    /// attempted unless the operation is cancelled; objects already gone
    /// count as reclaimed. Anchors go last, highest set first, and only when
    /// everything else succeeded, so a failed pass leaves every surviving
    /// object reachable for a retry.
    async fn reclaim(
        &self,
        context: &OpContext,
        plan: ReclaimPlan,
        mut completed: Vec<String>,
    ) -> StriperResult<()> {
        let name = &context.name;
        let targets: Vec<(String, Option<u64>)> = plan
            .truncations
            .iter()
            .map(|(object, size)| (self.object_name(name, *object), Some(*size)))
            .chain(
                plan.removals
                    .iter()
                    .map(|object| (self.object_name(name, *object), None)),
            )
            .collect();

        let jobs = targets
            .iter()
            .map(|(object, size)| {
                let call = match size {
                    Some(size) => self.store.truncate(object, *size),
                    None => self.store.remove(object),
                };
                (object.clone(), call)
            })
            .collect();

        let mut failure = None;
        let outcomes = self
            .drive(jobs, |e| !matches!(e, CallFailure::Cancelled(_)))
            .await;
        for (_, object, outcome) in outcomes {
            match outcome {
                Ok(()) | Err(CallFailure::Store(StoreError::NotFound)) => completed.push(object),
                Err(e) => {
                    if let CallFailure::Store(source) = &e {
                        warn!(%context, %object, error = %source, "Backing object not reclaimed");
                    }
                    keep_failure(&mut failure, object, e);
                }
            }
        }

        if let Some((object, e)) = failure {
            return Err(op_error(context, object, completed, e));
        }

        for anchor in &plan.anchors {
            let object = self.object_name(name, *anchor);
            match self.guarded(self.store.remove(&object)).await {
                Ok(()) | Err(CallFailure::Store(StoreError::NotFound)) => completed.push(object),
                Err(e) => return Err(op_error(context, object, completed, e)),
            }
        }
        debug!(%context, reclaimed = completed.len(), "Reclaimed backing objects");
        Ok(())
    }
}
