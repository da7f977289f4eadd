//! Per-observer selection results and their reuse across frames.
//!
//! A [`ViewData`] holds the nodes selected for one observer, each with its
//! stitch flags and a cached rendering handle `H`. The [`ViewDataMap`]
//! pools views, binds them to observers, and lets one observer reuse
//! another's selection when their viewpoints are close enough.

use std::collections::VecDeque;

use glam::Vec3;
use rustc_hash::{FxHashMap, FxHashSet};
use tessera_math::Rect;

use crate::quadtree::NodeId;
use crate::stitch::StitchFlags;

/// Identifies whoever is looking at the terrain (a camera, a shadow map,
/// a preloader).
///
/// Ids with the top bit set are reserved for views stored through
/// [`ViewDataMap::store_view`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub u64);

impl ObserverId {
    const ANONYMOUS_BIT: u64 = 1 << 63;

    fn anonymous(n: u64) -> Self {
        Self(Self::ANONYMOUS_BIT | n)
    }

    pub fn is_anonymous(self) -> bool {
        self.0 & Self::ANONYMOUS_BIT != 0
    }
}

/// One selected node.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewDataEntry<H> {
    pub node: NodeId,
    pub stitch_flags: StitchFlags,
    /// Rendering handle resolved for this node and flags, if any.
    pub handle: Option<H>,
}

impl<H> ViewDataEntry<H> {
    fn new(node: NodeId) -> Self {
        Self {
            node,
            stitch_flags: StitchFlags::NONE,
            handle: None,
        }
    }

    /// Replace the node, dropping derived state. Returns whether it changed.
    fn set(&mut self, node: NodeId) -> bool {
        if self.node == node {
            return false;
        }
        self.node = node;
        self.stitch_flags = StitchFlags::NONE;
        self.handle = None;
        true
    }
}

/// The nodes selected for one observer.
///
/// Slots beyond [`len`](Self::len) keep their previous contents so that a
/// re-selection producing the same nodes in the same order keeps its
/// handles and reports no change.
#[derive(Clone, Debug)]
pub struct ViewData<H> {
    entries: Vec<ViewDataEntry<H>>,
    count: usize,
    previous_count: usize,
    nodes: FxHashSet<NodeId>,
    viewpoint: Option<Vec3>,
    active_region: Option<Rect>,
    last_used: f64,
    changed: bool,
    revision: u64,
}

impl<H> ViewData<H> {
    /// An empty view at world-update revision `revision`.
    pub fn new(revision: u64) -> Self {
        Self {
            entries: Vec::new(),
            count: 0,
            previous_count: 0,
            nodes: FxHashSet::default(),
            viewpoint: None,
            active_region: None,
            last_used: 0.0,
            changed: false,
            revision,
        }
    }

    /// Append `node` to the selection.
    pub fn add(&mut self, node: NodeId) {
        if self.count < self.entries.len() {
            if self.entries[self.count].set(node) {
                self.changed = true;
            }
        } else {
            self.entries.push(ViewDataEntry::new(node));
            self.changed = true;
        }
        self.count += 1;
        self.nodes.insert(node);
    }

    /// Rewind the selection for a new pass.
    ///
    /// Slots beyond the current count are cleared; slots below it are kept
    /// so the next pass can detect whether anything changed.
    pub fn reset(&mut self) {
        self.entries.truncate(self.count);
        self.previous_count = self.count;
        self.count = 0;
        self.nodes.clear();
        self.changed = false;
    }

    /// Drop everything, including the viewpoint.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.count = 0;
        self.previous_count = 0;
        self.nodes.clear();
        self.viewpoint = None;
        self.active_region = None;
        self.changed = false;
    }

    /// Drop all cached handles, keeping the selection.
    pub fn clear_handles(&mut self) {
        for entry in &mut self.entries {
            entry.handle = None;
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn entries(&self) -> &[ViewDataEntry<H>] {
        &self.entries[..self.count]
    }

    pub fn entries_mut(&mut self) -> &mut [ViewDataEntry<H>] {
        &mut self.entries[..self.count]
    }

    /// Whether `node` is part of the current selection.
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    /// True when the selection differs from the one before the last [`reset`](Self::reset).
    pub fn has_changed(&self) -> bool {
        self.changed || self.count != self.previous_count
    }

    pub fn mark_changed(&mut self) {
        self.changed = true;
    }

    /// Accept the current selection as the baseline for the next frame.
    ///
    /// Call once the frame's entries have been resolved and drawn, so a view
    /// reused unchanged on the next frame reports no change.
    pub fn mark_unchanged(&mut self) {
        self.changed = false;
        self.previous_count = self.count;
    }

    pub fn viewpoint(&self) -> Option<Vec3> {
        self.viewpoint
    }

    pub fn set_viewpoint(&mut self, viewpoint: Vec3) {
        self.viewpoint = Some(viewpoint);
    }

    pub fn active_region(&self) -> Option<&Rect> {
        self.active_region.as_ref()
    }

    pub fn set_active_region(&mut self, region: Option<Rect>) {
        self.active_region = region;
    }

    pub fn last_used(&self) -> f64 {
        self.last_used
    }

    pub fn set_last_used(&mut self, time: f64) {
        self.last_used = time;
    }

    /// World-update revision this selection was made at.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }

    /// Squared distance between the stored viewpoint and `viewpoint`, if
    /// this view can stand in for a request at `viewpoint`.
    fn reuse_distance_sq(
        &self,
        viewpoint: Vec3,
        active_region: Option<&Rect>,
        reuse_distance: f32,
        revision: u64,
    ) -> Option<f32> {
        let stored = self.viewpoint?;
        if self.active_region.as_ref() != active_region
            || self.is_empty()
            || self.revision != revision
        {
            return None;
        }
        let d2 = stored.distance_squared(viewpoint);
        (d2 < reuse_distance * reuse_distance).then_some(d2)
    }

    /// Whether this view can be reused as is for a request at `viewpoint`.
    pub fn suitable(
        &self,
        viewpoint: Vec3,
        active_region: Option<&Rect>,
        reuse_distance: f32,
        revision: u64,
    ) -> bool {
        self.reuse_distance_sq(viewpoint, active_region, reuse_distance, revision)
            .is_some()
    }
}

impl<H: Clone> ViewData<H> {
    /// Copy the selection, viewpoint, region and revision of `other`.
    ///
    /// Always marks this view as changed.
    pub fn copy_from(&mut self, other: &ViewData<H>) {
        self.entries.clear();
        self.entries.extend_from_slice(other.entries());
        self.count = other.count;
        self.previous_count = other.count;
        self.nodes = other.nodes.clone();
        self.viewpoint = other.viewpoint;
        self.active_region = other.active_region;
        self.revision = other.revision;
        self.changed = true;
    }
}

/// Pool of [`ViewData`] bound to observers.
pub struct ViewDataMap<H> {
    views: Vec<ViewData<H>>,
    unused: VecDeque<usize>,
    observers: FxHashMap<ObserverId, usize>,
    reuse_distance: f32,
    expiry_delay: f64,
    revision: u64,
    next_anonymous: u64,
}

impl<H: Clone> ViewDataMap<H> {
    /// `reuse_distance` is in world units, `expiry_delay` in seconds.
    pub fn new(reuse_distance: f32, expiry_delay: f64) -> Self {
        Self {
            views: Vec::new(),
            unused: VecDeque::new(),
            observers: FxHashMap::default(),
            reuse_distance,
            expiry_delay,
            revision: 0,
            next_anonymous: 0,
        }
    }

    fn allocate(&mut self) -> usize {
        match self.unused.pop_front() {
            Some(idx) => idx,
            None => {
                self.views.push(ViewData::new(self.revision));
                self.views.len() - 1
            }
        }
    }

    fn slot_for(&mut self, observer: ObserverId) -> usize {
        if let Some(&idx) = self.observers.get(&observer) {
            return idx;
        }
        let idx = self.allocate();
        self.observers.insert(observer, idx);
        idx
    }

    /// The view bound to `observer`, and whether it needs a new selection pass.
    ///
    /// When the observer's own view is too far away (or stale), the closest
    /// suitable view of another observer is copied instead. Only when none
    /// exists is `true` returned; the view then carries the new viewpoint and
    /// region, and the caller is expected to `reset` and re-select.
    pub fn get_view_data(
        &mut self,
        observer: ObserverId,
        viewpoint: Vec3,
        active_region: Option<Rect>,
    ) -> (&mut ViewData<H>, bool) {
        let idx = self.slot_for(observer);
        let region = active_region.as_ref();
        let (reuse, revision) = (self.reuse_distance, self.revision);

        if self.views[idx].suitable(viewpoint, region, reuse, revision) {
            return (&mut self.views[idx], false);
        }

        let best = self
            .observers
            .values()
            .filter(|&&other| other != idx)
            .filter_map(|&other| {
                self.views[other]
                    .reuse_distance_sq(viewpoint, region, reuse, revision)
                    .map(|d2| (other, d2))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(other, _)| other);

        if let Some(source) = best {
            let (target, source) = pair_mut(&mut self.views, idx, source);
            target.copy_from(source);
            tracing::trace!("Observer {:?} reused a neighbouring view", observer);
            return (target, false);
        }

        let view = &mut self.views[idx];
        view.set_viewpoint(viewpoint);
        view.set_active_region(active_region);
        if view.revision() != revision {
            view.clear_handles();
            view.set_revision(revision);
        }
        (view, true)
    }

    /// Take the view of `observer` out of the map for a frame.
    ///
    /// Same lookup as [`get_view_data`](Self::get_view_data), but the view is
    /// moved out so it can be resolved without holding on to the map. Until it
    /// comes back through [`checkin_view`](Self::checkin_view), the slot
    /// holds an empty view that no other observer reuses.
    pub fn checkout_view(
        &mut self,
        observer: ObserverId,
        viewpoint: Vec3,
        active_region: Option<Rect>,
        reference_time: f64,
    ) -> (ViewData<H>, bool) {
        let revision = self.revision;
        let (view, needs_update) = self.get_view_data(observer, viewpoint, active_region);
        view.set_last_used(reference_time);
        let mut placeholder = ViewData::new(revision);
        placeholder.set_last_used(reference_time);
        (std::mem::replace(view, placeholder), needs_update)
    }

    /// Return a view taken by [`checkout_view`](Self::checkout_view).
    ///
    /// If the observer's slot was released in the meantime, a new one is bound.
    pub fn checkin_view(&mut self, observer: ObserverId, view: ViewData<H>) {
        let idx = self.slot_for(observer);
        self.views[idx] = view;
    }

    /// A fresh view not bound to any observer.
    pub fn create_view(&self) -> ViewData<H> {
        ViewData::new(self.revision)
    }

    /// Store a copy of `view` under a new anonymous observer so later
    /// requests can reuse it.
    pub fn store_view(&mut self, view: &ViewData<H>, timestamp: f64) -> ObserverId {
        let observer = ObserverId::anonymous(self.next_anonymous);
        self.next_anonymous += 1;
        let idx = self.slot_for(observer);
        let stored = &mut self.views[idx];
        stored.copy_from(view);
        stored.set_last_used(timestamp);
        observer
    }

    /// Release views unused since `reference_time - expiry_delay` back into
    /// the pool. Returns how many were released.
    pub fn clear_unused_views(&mut self, reference_time: f64) -> usize {
        let expiry = self.expiry_delay;
        let views = &mut self.views;
        let unused = &mut self.unused;
        let before = self.observers.len();
        self.observers.retain(|_, &mut idx| {
            let view = &mut views[idx];
            if view.last_used() + expiry < reference_time {
                view.clear();
                unused.push_back(idx);
                false
            } else {
                true
            }
        });
        before - self.observers.len()
    }

    /// Release the view bound to `observer`, if any.
    pub fn remove(&mut self, observer: ObserverId) -> bool {
        match self.observers.remove(&observer) {
            Some(idx) => {
                self.views[idx].clear();
                self.unused.push_back(idx);
                true
            }
            None => false,
        }
    }

    /// Invalidate every stored selection.
    pub fn rebuild_views(&mut self) {
        self.revision += 1;
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Number of observers currently holding a view.
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn clear(&mut self) {
        self.views.clear();
        self.unused.clear();
        self.observers.clear();
    }

    pub fn set_reuse_distance(&mut self, reuse_distance: f32) {
        self.reuse_distance = reuse_distance;
    }

    pub fn set_expiry_delay(&mut self, expiry_delay: f64) {
        self.expiry_delay = expiry_delay;
    }
}

fn pair_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &T) {
    debug_assert_ne!(a, b);
    if a < b {
        let (lo, hi) = items.split_at_mut(b);
        (&mut lo[a], &hi[0])
    } else {
        let (lo, hi) = items.split_at_mut(a);
        (&mut hi[0], &lo[b])
    }
}
