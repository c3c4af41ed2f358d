//! Per-frame visibility and LOD selection.
//!
//! # Invariants
//! - Output arrays are sized once per frame from the sub-batch totals.
//! - Each sub-batch is culled independently; serial and parallel dispatch
//!   produce identical results.
//! - Visible indices within a sub-batch are ascending and local to it.

use std::ops::Range;

use bumpalo::collections::Vec as BumpVec;
use glam::Vec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use worldspace_common::{Aabb, Intersection, Plane, intersect_planes};

use crate::RenderError;
use crate::arena::FrameArena;
use crate::batch::{BatchGroup, BatchGroupId, InstanceStorage, Lod};
use crate::device::{BatchHandle, BufferHandle, MaterialHandle, MeshHandle};

/// Culling and light-map tier settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CullingConfig {
    /// Instances farther than this from the viewer are never drawn.
    pub cull_distance: f32,
    /// Cull sub-batches on worker threads.
    pub parallel: bool,
    /// Size of a dedicated worker pool; 0 uses the global rayon pool.
    pub worker_threads: usize,
    /// Instances within this distance use high-tier light-maps.
    pub hq_lightmap_distance: f32,
    /// Instances within this distance use medium-tier light-maps.
    pub mq_lightmap_distance: f32,
    /// Upper bound on instance buffer size, further clamped by the device.
    pub max_buffer_size: usize,
}

impl Default for CullingConfig {
    fn default() -> Self {
        Self {
            cull_distance: 384.0,
            parallel: true,
            worker_threads: 0,
            hq_lightmap_distance: 30.0,
            mq_lightmap_distance: 60.0,
            max_buffer_size: crate::DEFAULT_MAX_BUFFER_SIZE,
        }
    }
}

/// Where per-item work runs.
#[derive(Debug)]
pub enum Dispatch {
    Serial,
    /// The global rayon pool.
    Global,
    Pool(rayon::ThreadPool),
}

impl Dispatch {
    pub fn new(parallel: bool, worker_threads: usize) -> Result<Self, RenderError> {
        if !parallel {
            return Ok(Dispatch::Serial);
        }
        if worker_threads == 0 {
            return Ok(Dispatch::Global);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .thread_name(|i| format!("cull-{i}"))
            .build()?;
        Ok(Dispatch::Pool(pool))
    }

    pub fn is_parallel(&self) -> bool {
        !matches!(self, Dispatch::Serial)
    }
}

/// Run `f` over every item and wait for all of them.
pub fn parallel_for<T, F>(dispatch: &Dispatch, items: &mut [T], f: F)
where
    T: Send,
    F: Fn(&mut T) + Sync + Send,
{
    match dispatch {
        Dispatch::Serial => items.iter_mut().for_each(f),
        Dispatch::Global => items.par_iter_mut().for_each(f),
        Dispatch::Pool(pool) => pool.install(|| items.par_iter_mut().for_each(f)),
    }
}

/// Viewer state for one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameState<'p> {
    pub viewer: Vec3,
    /// Inner side is positive; an instance fully outside any plane is culled.
    pub planes: &'p [Plane],
}

/// One draw of one sub-batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCommand {
    pub group: BatchGroupId,
    pub lod: u32,
    pub batch: BatchHandle,
    pub buffer: BufferHandle,
    pub mesh: MeshHandle,
    pub material: MaterialHandle,
    pub bounds: Aabb,
    /// Start of this command's segment in [`DrawCommandSet::visible_instances`].
    pub visible_offset: u32,
    pub visible_count: u32,
}

/// Culling output, valid until the arena is reset.
#[derive(Debug, Clone, Copy)]
pub struct DrawCommandSet<'a> {
    commands: &'a [DrawCommand],
    visible_instances: &'a [u32],
}

impl<'a> DrawCommandSet<'a> {
    /// One command per sub-batch, including those with nothing visible.
    pub fn commands(&self) -> &'a [DrawCommand] {
        self.commands
    }

    /// Every sub-batch's segment of local instance indices, back to back.
    /// Only the first `visible_count` entries of a segment are meaningful.
    pub fn visible_instances(&self) -> &'a [u32] {
        self.visible_instances
    }

    pub fn visible(&self, command: &DrawCommand) -> &'a [u32] {
        let start = command.visible_offset as usize;
        &self.visible_instances[start..start + command.visible_count as usize]
    }

    /// Commands worth submitting.
    pub fn draws(&self) -> impl Iterator<Item = &'a DrawCommand> + 'a {
        self.commands.iter().filter(|c| c.visible_count > 0)
    }

    pub fn total_visible(&self) -> usize {
        self.commands.iter().map(|c| c.visible_count as usize).sum()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

struct CullParams<'p> {
    viewer: Vec3,
    planes: &'p [Plane],
    cull_distance_sq: f32,
}

struct CullJob<'g, 's> {
    instances: &'g InstanceStorage,
    lod: &'g Lod,
    range: Range<usize>,
    segment: &'s mut [u32],
    command: DrawCommand,
}

impl CullJob<'_, '_> {
    fn run(&mut self, params: &CullParams<'_>) {
        let positions = self.instances.positions();
        let bounds = self.instances.bounds();
        let mut visible = 0;
        for (local, i) in self.range.clone().enumerate() {
            let d2 = params.viewer.distance_squared(positions[i]);
            if d2 > params.cull_distance_sq {
                continue;
            }
            if intersect_planes(params.planes, &bounds[i]) == Intersection::Out {
                continue;
            }
            if !self.lod.accepts(d2) {
                continue;
            }
            self.segment[visible] = local as u32;
            visible += 1;
        }
        self.command.visible_count = visible as u32;
    }
}

/// Computes draw commands for resident batch groups.
#[derive(Debug)]
pub struct CullingEngine {
    cull_distance: f32,
    dispatch: Dispatch,
}

impl CullingEngine {
    pub fn new(config: &CullingConfig) -> Result<Self, RenderError> {
        Ok(Self {
            cull_distance: config.cull_distance,
            dispatch: Dispatch::new(config.parallel, config.worker_threads)?,
        })
    }

    pub fn cull_distance(&self) -> f32 {
        self.cull_distance
    }

    pub fn is_parallel(&self) -> bool {
        self.dispatch.is_parallel()
    }

    /// Cull every sub-batch of `groups`. Allocates only from `arena`.
    pub fn cull<'a>(&self, frame: &FrameState<'_>, groups: &[&BatchGroup], arena: &'a FrameArena) -> DrawCommandSet<'a> {
        let _span = tracing::info_span!("cull_frame").entered();
        let bump = arena.bump();

        let (command_count, slot_count) = groups
            .iter()
            .flat_map(|g| g.lods())
            .flat_map(|l| l.sub_batches())
            .fold((0usize, 0usize), |(commands, slots), sb| (commands + 1, slots + sb.len()));

        let visible: &'a mut [u32] = bump.alloc_slice_fill_copy(slot_count, 0);
        let commands: &'a [DrawCommand] = {
            let mut jobs = BumpVec::with_capacity_in(command_count, bump);
            let mut rest: &mut [u32] = &mut *visible;
            let mut offset = 0;
            for group in groups {
                for (lod_index, lod) in group.lods().iter().enumerate() {
                    for sb in lod.sub_batches() {
                        let (segment, tail) = std::mem::take(&mut rest).split_at_mut(sb.len());
                        rest = tail;
                        jobs.push(CullJob {
                            instances: group.instances(),
                            lod,
                            range: sb.range(),
                            segment,
                            command: DrawCommand {
                                group: group.id(),
                                lod: lod_index as u32,
                                batch: sb.batch(),
                                buffer: sb.buffer(),
                                mesh: lod.mesh(),
                                material: lod.material(),
                                bounds: sb.bounds(),
                                visible_offset: offset as u32,
                                visible_count: 0,
                            },
                        });
                        offset += sb.len();
                    }
                }
            }

            let params = CullParams {
                viewer: frame.viewer,
                planes: frame.planes,
                cull_distance_sq: self.cull_distance * self.cull_distance,
            };
            parallel_for(&self.dispatch, &mut jobs, |job| job.run(&params));
            bump.alloc_slice_fill_iter(jobs.iter().map(|j| j.command))
        };

        let set = DrawCommandSet {
            commands,
            visible_instances: visible,
        };
        tracing::trace!(
            commands = set.len(),
            visible = set.total_visible(),
            slots = slot_count,
            "cull complete"
        );
        set
    }
}
