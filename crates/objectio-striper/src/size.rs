//! Size tracking
//!
//! The logical size of a virtual object is never stored. It is derived from
//! the sizes of its backing objects and the layout.
//!
//! The first backing object of each object set is that set's anchor. Every
//! mutation keeps the anchors dense: if any backing object of set `k`
//! exists, so do the anchors of sets `0..=k`. The last object set can
//! therefore be found by probing anchors alone, and a virtual object exists
//! exactly when the anchor of set 0 does.

use crate::error::{OpContext, StriperError, StriperResult};
use crate::layout::ObjectRef;
use crate::store::{BackingStore, StoreError, StoreResult};
use crate::striper::{CallFailure, CallKind, Striper, op_error};
use futures::future::BoxFuture;
use objectio_common::{ObjectStat, StripingLayout};
use tracing::debug;

/// Bytes of `object` that lie below logical offset `size`
#[must_use]
pub fn local_size_for(layout: &StripingLayout, object: ObjectRef, size: u64) -> u64 {
    let span = layout.object_set_span();
    let set_start = object.object_set.saturating_mul(span);
    if size <= set_start {
        return 0;
    }

    let stripe_unit = layout.stripe_unit();
    let stripe_count = layout.stripe_count();
    let within = (size - set_start).min(span);
    let full_stripes = within / stripe_unit;
    let partial = within % stripe_unit;

    let mut local = (full_stripes / stripe_count) * stripe_unit;
    let next = full_stripes % stripe_count;
    if object.stripe_index < next {
        local += stripe_unit;
    } else if object.stripe_index == next {
        local += partial;
    }
    local
}

/// Logical end (exclusive) of the data in `object` when it holds
/// `local_size` bytes; 0 for an empty object
#[must_use]
pub fn logical_end(layout: &StripingLayout, object: ObjectRef, local_size: u64) -> u64 {
    if local_size == 0 {
        return 0;
    }

    let stripe_unit = layout.stripe_unit();
    let last = local_size.min(layout.object_size()) - 1;
    let round = last / stripe_unit;
    let stripe_in_set = round * layout.stripe_count() + object.stripe_index;

    object
        .object_set
        .saturating_mul(layout.object_set_span())
        .saturating_add(stripe_in_set * stripe_unit + last % stripe_unit + 1)
}

/// Backing objects to truncate or remove when a virtual object shrinks or
/// is deleted
///
/// Anchors are listed separately, highest set first, so they can be removed
/// last and in order.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ReclaimPlan {
    pub truncations: Vec<(ObjectRef, u64)>,
    pub removals: Vec<ObjectRef>,
    pub anchors: Vec<ObjectRef>,
}

impl ReclaimPlan {
    /// Drop everything at or beyond `new_size`
    ///
    /// Objects of the object set holding the new last byte are truncated to
    /// their new local size when `truncate_boundary` is set (that set's
    /// anchor always stays); objects left without data are removed, as are
    /// all objects of later sets up to `last_set`.
    pub fn shrink(
        layout: &StripingLayout,
        new_size: u64,
        last_set: u64,
        truncate_boundary: bool,
    ) -> Self {
        let boundary = if new_size == 0 {
            0
        } else {
            layout.object_set_of(new_size - 1)
        };

        let mut plan = Self::default();
        for set in boundary..=last_set {
            for stripe_index in 0..layout.stripe_count() {
                let object = ObjectRef::new(set, stripe_index);
                if set > boundary {
                    if object.is_anchor() {
                        plan.anchors.push(object);
                    } else {
                        plan.removals.push(object);
                    }
                    continue;
                }

                let keep = local_size_for(layout, object, new_size);
                if keep > 0 || object.is_anchor() {
                    if truncate_boundary {
                        plan.truncations.push((object, keep));
                    }
                } else {
                    plan.removals.push(object);
                }
            }
        }
        plan.anchors.reverse();
        plan
    }

    /// Drop every backing object up to `last_set`
    pub fn delete(layout: &StripingLayout, last_set: u64) -> Self {
        let mut plan = Self::default();
        for set in 0..=last_set {
            for stripe_index in 0..layout.stripe_count() {
                let object = ObjectRef::new(set, stripe_index);
                if object.is_anchor() {
                    plan.anchors.push(object);
                } else {
                    plan.removals.push(object);
                }
            }
        }
        plan.anchors.reverse();
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.truncations.is_empty() && self.removals.is_empty() && self.anchors.is_empty()
    }
}

impl<S: BackingStore> Striper<S> {
    async fn anchor_exists(&self, context: &OpContext, object_set: u64) -> StriperResult<bool> {
        let object = self.object_name(&context.name, ObjectRef::anchor(object_set));
        match self.guarded(self.store().stat(&object)).await {
            Ok(_) => Ok(true),
            Err(CallFailure::Store(StoreError::NotFound)) => Ok(false),
            Err(failure) => Err(op_error(context, object, Vec::new(), failure)),
        }
    }

    /// Highest object set of the virtual object, `None` if it does not exist
    ///
    /// Exponential probing of anchors followed by a binary search.
    pub(crate) async fn last_object_set(&self, context: &OpContext) -> StriperResult<Option<u64>> {
        if !self.anchor_exists(context, 0).await? {
            return Ok(None);
        }

        let max_set = u64::MAX / self.layout().object_set_span();
        let mut present = 0u64;
        let mut step = 1u64;
        let mut absent = loop {
            let candidate = present.saturating_add(step).min(max_set);
            if candidate == present {
                return Ok(Some(present));
            }
            if self.anchor_exists(context, candidate).await? {
                present = candidate;
                step = step.saturating_mul(2);
            } else {
                break candidate;
            }
        };

        while absent - present > 1 {
            let mid = present + (absent - present) / 2;
            if self.anchor_exists(context, mid).await? {
                present = mid;
            } else {
                absent = mid;
            }
        }

        debug!(%context, last_set = present, "Located last object set");
        Ok(Some(present))
    }

    /// Make sure the anchors of sets `0..=top_set` exist
    pub(crate) async fn ensure_anchors(&self, context: &OpContext, top_set: u64) -> StriperResult<()> {
        if self.anchor_exists(context, top_set).await? {
            return Ok(());
        }

        let first_missing = self
            .last_object_set(context)
            .await?
            .map_or(0, |last| last + 1);

        // Bottom-up, so an interrupted pass never leaves a gap
        for object_set in first_missing..=top_set {
            let object = self.object_name(&context.name, ObjectRef::anchor(object_set));
            self.call(context, &object, self.store().create(&object))
                .await?;
        }
        Ok(())
    }

    /// Stat several backing objects; absent ones come back as `None`
    pub(crate) async fn stat_objects(
        &self,
        context: &OpContext,
        objects: &[ObjectRef],
    ) -> StriperResult<Vec<Option<ObjectStat>>> {
        let names: Vec<String> = objects
            .iter()
            .map(|object| self.object_name(&context.name, *object))
            .collect();

        let store = self.store();
        let jobs = names
            .iter()
            .map(|object| {
                let call: BoxFuture<'_, StoreResult<Option<ObjectStat>>> =
                    Box::pin(async move {
                        match store.stat(object).await {
                            Ok(stat) => Ok(Some(stat)),
                            Err(StoreError::NotFound) => Ok(None),
                            Err(e) => Err(e),
                        }
                    });
                (object.clone(), call)
            })
            .collect();

        self.dispatch(context, CallKind::ReadOnly, jobs).await
    }

    /// Logical size, scanning object sets downwards from `last_set` until one
    /// holds data
    pub(crate) async fn size_from(&self, context: &OpContext, last_set: u64) -> StriperResult<u64> {
        let layout = *self.layout();
        for object_set in (0..=last_set).rev() {
            let objects: Vec<ObjectRef> = (0..layout.stripe_count())
                .map(|stripe_index| ObjectRef::new(object_set, stripe_index))
                .collect();
            let stats = self.stat_objects(context, &objects).await?;

            let end = objects
                .iter()
                .zip(&stats)
                .filter_map(|(object, stat)| stat.map(|s| logical_end(&layout, *object, s.size)))
                .max()
                .unwrap_or(0);
            if end > 0 {
                return Ok(end);
            }
        }
        Ok(0)
    }

    /// Logical size of an existing virtual object
    pub(crate) async fn logical_size(&self, context: &OpContext) -> StriperResult<u64> {
        let Some(last_set) = self.last_object_set(context).await? else {
            return Err(StriperError::NotFound {
                context: context.clone(),
            });
        };
        self.size_from(context, last_set).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::compute_segments;
    use rand::Rng;

    fn layout(su: u64, sc: u64, os: u64) -> StripingLayout {
        StripingLayout::new(su, sc, os).unwrap()
    }

    #[test]
    fn test_local_size_for() {
        let l = layout(4096, 2, 8192);
        // 10000 bytes: stripes 0,1 full, stripe 2 holds 1808 bytes
        assert_eq!(local_size_for(&l, ObjectRef::new(0, 0), 10000), 4096 + 1808);
        assert_eq!(local_size_for(&l, ObjectRef::new(0, 1), 10000), 4096);
        assert_eq!(local_size_for(&l, ObjectRef::new(1, 0), 10000), 0);

        // A full set
        assert_eq!(local_size_for(&l, ObjectRef::new(0, 1), 16384), 8192);
        assert_eq!(local_size_for(&l, ObjectRef::new(0, 0), 99999), 8192);
        assert_eq!(local_size_for(&l, ObjectRef::new(1, 1), 16384 + 5000), 904);
    }

    #[test]
    fn test_logical_end() {
        let l = layout(4096, 2, 8192);
        assert_eq!(logical_end(&l, ObjectRef::new(0, 0), 0), 0);
        assert_eq!(logical_end(&l, ObjectRef::new(0, 0), 1), 1);
        assert_eq!(logical_end(&l, ObjectRef::new(0, 1), 1), 4097);
        assert_eq!(logical_end(&l, ObjectRef::new(0, 0), 5904), 10000);
        assert_eq!(logical_end(&l, ObjectRef::new(1, 1), 904), 16384 + 5000);
    }

    #[test]
    fn test_size_math_agrees_with_segments() {
        let mut rng = rand::thread_rng();
        for _ in 0..300 {
            let su = rng.gen_range(1..=32u64);
            let sc = rng.gen_range(1..=4u64);
            let os = su * rng.gen_range(1..=4u64);
            let l = layout(su, sc, os);
            let size = rng.gen_range(1..2000u64);

            // Local sizes implied by writing [0, size)
            let mut local = std::collections::HashMap::new();
            for seg in compute_segments(&l, 0, size).unwrap() {
                let end = local.entry(seg.object).or_insert(0u64);
                *end = (*end).max(seg.local_offset + seg.length);
            }

            let mut max_end = 0;
            for (object, local_size) in &local {
                assert_eq!(local_size_for(&l, *object, size), *local_size);
                max_end = max_end.max(logical_end(&l, *object, *local_size));
            }
            assert_eq!(max_end, size);
        }
    }

    #[test]
    fn test_shrink_plan() {
        let l = layout(4096, 2, 8192);
        // Three sets, shrink into the middle of set 1
        let plan = ReclaimPlan::shrink(&l, 16384 + 100, 2, true);
        assert_eq!(
            plan.truncations,
            vec![(ObjectRef::new(1, 0), 100)]
        );
        assert_eq!(
            plan.removals,
            vec![ObjectRef::new(1, 1), ObjectRef::new(2, 1)]
        );
        assert_eq!(plan.anchors, vec![ObjectRef::new(2, 0)]);
    }

    #[test]
    fn test_shrink_plan_to_zero_keeps_first_anchor() {
        let l = layout(4096, 2, 8192);
        let plan = ReclaimPlan::shrink(&l, 0, 1, true);
        assert_eq!(plan.truncations, vec![(ObjectRef::new(0, 0), 0)]);
        assert_eq!(
            plan.removals,
            vec![ObjectRef::new(0, 1), ObjectRef::new(1, 1)]
        );
        assert_eq!(plan.anchors, vec![ObjectRef::new(1, 0)]);
    }

    #[test]
    fn test_shrink_plan_without_boundary_truncation() {
        let l = layout(4096, 2, 8192);
        let plan = ReclaimPlan::shrink(&l, 100, 0, false);
        assert!(plan.truncations.is_empty());
        assert_eq!(plan.removals, vec![ObjectRef::new(0, 1)]);
        assert!(plan.anchors.is_empty());

        // Nothing beyond the new end
        let plan = ReclaimPlan::shrink(&l, 40000, 1, false);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_delete_plan_orders_anchors_descending() {
        let l = layout(4096, 3, 4096);
        let plan = ReclaimPlan::delete(&l, 2);
        assert!(plan.truncations.is_empty());
        assert_eq!(plan.removals.len(), 6);
        assert_eq!(
            plan.anchors,
            vec![ObjectRef::anchor(2), ObjectRef::anchor(1), ObjectRef::anchor(0)]
        );
    }
}
