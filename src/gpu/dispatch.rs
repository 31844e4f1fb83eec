//! Cálculo de tamaños de grupo y de grilla para los dispatch de cómputo.
//!
//! Pure arithmetic, no device access. Kernels bake the group shape into the
//! shader at startup; the grid is recomputed per frame from the image size.

use crate::error::{PipelineError, PipelineResult};

/// Hardware limits relevant to dispatch sizing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_invocations_per_group: u32,
    pub max_group_size_x: u32,
    pub max_group_size_y: u32,
}

impl DeviceLimits {
    #[cfg(feature = "wgpu")]
    pub fn from_wgpu(limits: &eframe::wgpu::Limits) -> Self {
        Self {
            max_invocations_per_group: limits.max_compute_invocations_per_workgroup,
            max_group_size_x: limits.max_compute_workgroup_size_x,
            max_group_size_y: limits.max_compute_workgroup_size_y,
        }
    }
}

impl Default for DeviceLimits {
    /// wgpu's default downlevel-independent limits.
    fn default() -> Self {
        Self {
            max_invocations_per_group: 256,
            max_group_size_x: 256,
            max_group_size_y: 256,
        }
    }
}

/// Execution width `w` and max threads per group `m`, validated once.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub execution_width: u32,
    pub max_threads_per_group: u32,
}

impl ExecutionLimits {
    /// Clamp the configured limits to what the device accepts and check that
    /// a 2-D group of `(w, m / w)` fits.
    pub fn resolve(
        execution_width: u32,
        max_threads_per_group: u32,
        device: DeviceLimits,
    ) -> PipelineResult<Self> {
        let m = max_threads_per_group.min(device.max_invocations_per_group);
        let [gx, gy] = group_2d(execution_width, m)?;
        if gx > device.max_group_size_x || gy > device.max_group_size_y {
            return Err(PipelineError::InvalidLimits(format!(
                "group {gx}x{gy} exceeds device limits {}x{}",
                device.max_group_size_x, device.max_group_size_y
            )));
        }
        Ok(Self {
            execution_width,
            max_threads_per_group: m,
        })
    }

    pub fn group_2d(&self) -> [u32; 2] {
        [
            self.execution_width,
            self.max_threads_per_group / self.execution_width,
        ]
    }
}

/// 1-D dispatch: `num_blocks` groups of `block_size` threads.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Dispatch1d {
    pub block_size: u32,
    pub num_blocks: u32,
}

/// 2-D dispatch: `grid` groups of `group` threads each.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Dispatch2d {
    pub group: [u32; 2],
    pub grid: [u32; 2],
}

impl Dispatch2d {
    /// Threads launched along each axis.
    pub fn coverage(&self) -> [u64; 2] {
        [
            self.group[0] as u64 * self.grid[0] as u64,
            self.group[1] as u64 * self.grid[1] as u64,
        ]
    }
}

/// Either shape, as recorded in an encoded pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    Linear(Dispatch1d),
    Grid(Dispatch2d),
}

impl Dispatch {
    /// Workgroup counts in wgpu's `(x, y, z)` order.
    pub fn workgroups(&self) -> [u32; 3] {
        match self {
            Dispatch::Linear(d) => [d.num_blocks, 1, 1],
            Dispatch::Grid(d) => [d.grid[0], d.grid[1], 1],
        }
    }
}

/// Round `n` up to the next multiple of `w`.
fn round_up(n: u64, w: u64) -> u64 {
    n.div_ceil(w) * w
}

/// Size a 1-D dispatch over `n` elements.
///
/// `n` is rounded up to a multiple of `w` so no warp runs partially idle,
/// then clamped to `m` (at least one thread) to get the block size. The
/// number of blocks covers the remainder.
pub fn dispatch_1d(n: u32, w: u32, m: u32) -> PipelineResult<Dispatch1d> {
    if w == 0 || m == 0 {
        return Err(PipelineError::InvalidLimits(format!(
            "execution width {w} and max threads {m} must be non-zero"
        )));
    }
    let rounded = round_up(n as u64, w as u64);
    let block_size = rounded.clamp(1, m as u64) as u32;
    let num_blocks = n.div_ceil(block_size);
    Ok(Dispatch1d {
        block_size,
        num_blocks,
    })
}

/// Group shape for 2-D kernels: `(w, m / w)`.
pub fn group_2d(w: u32, m: u32) -> PipelineResult<[u32; 2]> {
    if w == 0 {
        return Err(PipelineError::InvalidLimits("execution width is zero".into()));
    }
    let rows = m / w;
    if rows == 0 {
        return Err(PipelineError::InvalidLimits(format!(
            "max threads per group {m} is smaller than execution width {w}"
        )));
    }
    Ok([w, rows])
}

/// Size a 2-D dispatch covering a `width x height` image.
pub fn dispatch_2d(width: u32, height: u32, w: u32, m: u32) -> PipelineResult<Dispatch2d> {
    let group = group_2d(w, m)?;
    Ok(Dispatch2d {
        group,
        grid: [width.div_ceil(group[0]), height.div_ceil(group[1])],
    })
}
