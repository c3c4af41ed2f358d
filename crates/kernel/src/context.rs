use std::time::Duration;

use glam::{Mat4, Vec3};
use worldspace_assets::{AssetPath, AssetSource, WorldManifest, load_config};
use worldspace_common::{Frustum, Grid, Plane};
use worldspace_render::{
    BatchGroup, CullingEngine, DrawCommandSet, FrameArena, FrameState, FrameStats, FrameTimer, GpuDevice,
    LightmapUpdater, sub_batch_capacity,
};
use worldspace_stream::StreamManager;
use worldspace_terrain::{TerrainDraw, TerrainManager};

use crate::{ContextError, WorldRenderConfig};

/// What `initialize` found, passed to the `on_initialized` hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitSummary {
    pub world: String,
    pub manifest_chunks: usize,
    pub sub_batch_capacity: usize,
}

/// Draws for one frame, valid until the arena is reset.
#[derive(Debug, Clone, Copy)]
pub struct FrameOutput<'a> {
    pub objects: DrawCommandSet<'a>,
    pub terrain: &'a [TerrainDraw],
}

type InitHook = Box<dyn FnOnce(&InitSummary) + Send>;

struct Streaming {
    stream: StreamManager,
    terrain: TerrainManager,
}

/// Runtime state of one loaded world, created at world load and consumed by
/// [`WorldRenderContext::shutdown`] at world unload.
///
/// Per frame the host sets the cull center, calls [`update`] on the render
/// thread and then [`cull`] with its frustum planes.
///
/// [`update`]: WorldRenderContext::update
/// [`cull`]: WorldRenderContext::cull
pub struct WorldRenderContext<D: GpuDevice, S: AssetSource> {
    config: WorldRenderConfig,
    grid: Grid,
    device: D,
    source: S,
    culling: CullingEngine,
    lightmaps: LightmapUpdater,
    streaming: Option<Streaming>,
    cull_center: Vec3,
    stats: FrameStats,
    cull_timer: FrameTimer,
    on_initialized: Option<InitHook>,
}

impl<D: GpuDevice, S: AssetSource> WorldRenderContext<D, S> {
    pub fn new(config: WorldRenderConfig, device: D, source: S) -> Result<Self, ContextError> {
        config.validate()?;
        let grid = Grid::new(config.grid.clone())?;
        let culling = CullingEngine::new(&config.culling)?;
        let lightmaps = LightmapUpdater::from_config(&config.culling);
        let budget = Duration::from_secs_f32(config.cull_budget_ms / 1000.0);
        Ok(Self {
            config,
            grid,
            device,
            source,
            culling,
            lightmaps,
            streaming: None,
            cull_center: Vec3::ZERO,
            stats: FrameStats::default(),
            cull_timer: FrameTimer::new(budget, 120),
            on_initialized: None,
        })
    }

    /// Run `hook` once [`initialize`](Self::initialize) succeeds.
    pub fn on_initialized(&mut self, hook: impl FnOnce(&InitSummary) + Send + 'static) {
        self.on_initialized = Some(Box::new(hook));
    }

    /// Read the world manifest and create the streaming and terrain managers.
    pub fn initialize(&mut self) -> Result<InitSummary, ContextError> {
        if self.streaming.is_some() {
            return Err(ContextError::AlreadyInitialized);
        }
        let world = self.config.world_name.clone();
        let manifest: WorldManifest = load_config(&self.source, &AssetPath::world_manifest(&world))?;
        let capacity = sub_batch_capacity(self.config.culling.max_buffer_size, &self.device)?;
        let terrain = TerrainManager::new(self.config.terrain.clone(), self.grid.clone(), &world, &mut self.device)?;
        let stream = match StreamManager::new(
            self.config.stream.clone(),
            self.grid.clone(),
            &world,
            &manifest,
            capacity,
        ) {
            Ok(stream) => stream,
            Err(e) => {
                terrain.release(&mut self.device);
                return Err(e.into());
            }
        };
        self.streaming = Some(Streaming { stream, terrain });

        let summary = InitSummary {
            world,
            manifest_chunks: manifest.chunk_indices.len(),
            sub_batch_capacity: capacity,
        };
        tracing::debug!(
            world = %summary.world,
            chunks = summary.manifest_chunks,
            capacity,
            "world render context initialized"
        );
        if let Some(hook) = self.on_initialized.take() {
            hook(&summary);
        }
        Ok(summary)
    }

    pub fn is_initialized(&self) -> bool {
        self.streaming.is_some()
    }

    /// Viewer position used by the next update and cull.
    pub fn set_cull_center(&mut self, center: Vec3) {
        self.cull_center = center;
    }

    pub fn cull_center(&self) -> Vec3 {
        self.cull_center
    }

    /// Stream partitions, refresh terrain and retier light-maps around the
    /// cull center. Render thread only.
    pub fn update(&mut self) -> Result<(), ContextError> {
        let streaming = self.streaming.as_mut().ok_or(ContextError::NotInitialized)?;
        let center = self.cull_center;
        streaming.terrain.set_center(center, &self.source, &mut self.device)?;
        let (loaded, unloaded) =
            streaming
                .stream
                .update(center, &self.source, &mut streaming.terrain, &mut self.device);
        let lightmaps = self
            .lightmaps
            .update(center, streaming.stream.groups_mut(), &mut self.device)?;

        self.stats.partitions_loaded = loaded.len();
        self.stats.partitions_unloaded = unloaded.len();
        self.stats.resident_partitions = streaming.stream.resident_count();
        self.stats.lightmap_uploads = lightmaps.sub_batches_uploaded;
        self.stats.terrain_nodes = streaming.terrain.visible_node_count();
        Ok(())
    }

    /// Cull resident objects against `planes` and collect terrain draws.
    pub fn cull<'a>(&mut self, planes: &[Plane], arena: &'a FrameArena) -> Result<FrameOutput<'a>, ContextError> {
        let streaming = self.streaming.as_ref().ok_or(ContextError::NotInitialized)?;
        let bump = arena.bump();
        let mut groups: bumpalo::collections::Vec<'_, &BatchGroup> =
            bumpalo::collections::Vec::with_capacity_in(streaming.stream.group_count(), bump);
        groups.extend(streaming.stream.groups());

        let frame = FrameState {
            viewer: self.cull_center,
            planes,
        };
        let culling = &self.culling;
        let (objects, cull_time) = self.cull_timer.time(|| culling.cull(&frame, &groups, arena));
        let terrain = streaming.terrain.draws(arena);

        self.stats.draw_commands = objects.len();
        self.stats.draws_submitted = objects.draws().count() + terrain.len();
        self.stats.visible_instances = objects.total_visible();
        self.stats.cull_time = cull_time;
        tracing::trace!(
            commands = objects.len(),
            visible = objects.total_visible(),
            terrain = terrain.len(),
            ?cull_time,
            "frame culled"
        );
        Ok(FrameOutput { objects, terrain })
    }

    /// [`cull`](Self::cull) with planes extracted from a view-projection matrix.
    pub fn cull_view_projection<'a>(
        &mut self,
        view_projection: &Mat4,
        arena: &'a FrameArena,
    ) -> Result<FrameOutput<'a>, ContextError> {
        let frustum = Frustum::from_view_projection(view_projection);
        self.cull(&frustum.planes, arena)
    }

    /// One full frame: update, then cull.
    pub fn frame<'a>(&mut self, planes: &[Plane], arena: &'a FrameArena) -> Result<FrameOutput<'a>, ContextError> {
        self.update()?;
        self.cull(planes, arena)
    }

    /// Release every partition and terrain resource and hand back the device.
    pub fn shutdown(self) -> Result<D, ContextError> {
        let Self {
            mut device, streaming, ..
        } = self;
        if let Some(Streaming { mut stream, mut terrain }) = streaming {
            let unloaded = stream.unload_all(&mut terrain, &mut device);
            terrain.release(&mut device);
            unloaded?;
        }
        tracing::debug!("world render context shut down");
        Ok(device)
    }

    pub fn config(&self) -> &WorldRenderConfig {
        &self.config
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn stream(&self) -> Option<&StreamManager> {
        self.streaming.as_ref().map(|s| &s.stream)
    }

    pub fn terrain(&self) -> Option<&TerrainManager> {
        self.streaming.as_ref().map(|s| &s.terrain)
    }

    /// Counters of the most recent update and cull.
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn cull_timer(&self) -> &FrameTimer {
        &self.cull_timer
    }
}

impl<D: GpuDevice, S: AssetSource> std::fmt::Debug for WorldRenderContext<D, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldRenderContext")
            .field("world", &self.config.world_name)
            .field("initialized", &self.is_initialized())
            .field("cull_center", &self.cull_center)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
