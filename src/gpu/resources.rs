//! Caché de texturas y buffers de la GPU, creados bajo demanda y reutilizados entre frames.
//! Cada recurso vive en un slot por tipo; si cambian las dimensiones se recrea y los
//! handles anteriores quedan invalidados.

use std::collections::HashMap;

use super::backend::GpuBackend;
use super::types::{BufferKind, TextureKind};
use crate::error::{PipelineError, PipelineResult};

/// Identifies one allocation of a texture slot. Copyable and cheap; resolved
/// through [`ResourceCache::texture`] at encoding time.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle {
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    generation: u64,
}

impl TextureHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    pub kind: BufferKind,
    pub size: u64,
    generation: u64,
}

struct TextureSlot<T> {
    texture: T,
    handle: TextureHandle,
}

struct BufferSlot<T> {
    buffer: T,
    handle: BufferHandle,
}

/// One slot per texture and buffer kind, keyed by dimensions.
pub struct ResourceCache<B: GpuBackend> {
    textures: HashMap<TextureKind, TextureSlot<B::Texture>>,
    buffers: HashMap<BufferKind, BufferSlot<B::Buffer>>,
    next_generation: u64,
}

impl<B: GpuBackend> Default for ResourceCache<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: GpuBackend> ResourceCache<B> {
    pub fn new() -> Self {
        Self {
            textures: HashMap::new(),
            buffers: HashMap::new(),
            next_generation: 1,
        }
    }

    fn bump(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    /// Return the texture for `(kind, width, height)`, allocating it on first
    /// use and reallocating it when the dimensions change.
    pub fn get_or_create_texture(
        &mut self,
        backend: &B,
        kind: TextureKind,
        width: u32,
        height: u32,
    ) -> PipelineResult<TextureHandle> {
        if let Some(slot) = self.textures.get(&kind) {
            if slot.handle.width == width && slot.handle.height == height {
                return Ok(slot.handle);
            }
            tracing::info!(
                ?kind,
                old_width = slot.handle.width,
                old_height = slot.handle.height,
                width,
                height,
                "Resizing cached texture"
            );
        } else {
            tracing::debug!(?kind, width, height, "Allocating texture");
        }

        if width == 0 || height == 0 {
            return Err(PipelineError::TextureAllocation {
                kind,
                width,
                height,
                reason: "zero-sized texture".into(),
            });
        }

        let texture = backend.create_texture(kind, width, height)?;
        let handle = TextureHandle {
            kind,
            width,
            height,
            generation: self.bump(),
        };
        self.textures.insert(kind, TextureSlot { texture, handle });
        Ok(handle)
    }

    /// Return the buffer for `(kind, size)`, allocating or reallocating it.
    pub fn get_or_create_buffer(
        &mut self,
        backend: &B,
        kind: BufferKind,
        size: u64,
    ) -> PipelineResult<BufferHandle> {
        if let Some(slot) = self.buffers.get(&kind) {
            if slot.handle.size == size {
                return Ok(slot.handle);
            }
            tracing::info!(?kind, old_size = slot.handle.size, size, "Resizing cached buffer");
        } else {
            tracing::debug!(?kind, size, "Allocating buffer");
        }

        if size == 0 {
            return Err(PipelineError::BufferAllocation {
                kind,
                size,
                reason: "zero-sized buffer".into(),
            });
        }

        let buffer = backend.create_buffer(kind, size)?;
        let handle = BufferHandle {
            kind,
            size,
            generation: self.bump(),
        };
        self.buffers.insert(kind, BufferSlot { buffer, handle });
        Ok(handle)
    }

    /// Copy a discrete class mask into the segmentation buffer, byte for byte.
    pub fn upload_mask(&mut self, backend: &B, data: &[u8]) -> PipelineResult<BufferHandle> {
        self.upload(backend, BufferKind::SegmentationMask, data)
    }

    /// Copy raw probabilities into the buffer the conversion pass reads.
    pub fn upload_probabilities(&mut self, backend: &B, data: &[u8]) -> PipelineResult<BufferHandle> {
        self.upload(backend, BufferKind::Probabilities, data)
    }

    fn upload(&mut self, backend: &B, kind: BufferKind, data: &[u8]) -> PipelineResult<BufferHandle> {
        let handle = self.get_or_create_buffer(backend, kind, data.len() as u64)?;
        self.write_buffer(backend, handle, data)?;
        Ok(handle)
    }

    pub fn write_buffer(&self, backend: &B, handle: BufferHandle, data: &[u8]) -> PipelineResult<()> {
        let buffer = self.buffer(handle)?;
        if data.len() as u64 > handle.size {
            return Err(PipelineError::BufferAllocation {
                kind: handle.kind,
                size: handle.size,
                reason: format!("write of {} bytes does not fit", data.len()),
            });
        }
        backend.write_buffer(buffer, data);
        Ok(())
    }

    pub fn write_texture(
        &self,
        backend: &B,
        handle: TextureHandle,
        data: &[u8],
    ) -> PipelineResult<()> {
        let texture = self.texture(handle)?;
        let expected = handle.width as usize
            * handle.height as usize
            * handle.kind.format().bytes_per_pixel() as usize;
        if data.len() != expected {
            return Err(PipelineError::TextureAllocation {
                kind: handle.kind,
                width: handle.width,
                height: handle.height,
                reason: format!("upload of {} bytes, expected {expected}", data.len()),
            });
        }
        backend.write_texture(texture, handle.width, handle.height, data);
        Ok(())
    }

    /// Handle of the live texture in `kind`'s slot. A slot that was never
    /// filled is a missing resource.
    pub fn existing_texture(&self, kind: TextureKind) -> PipelineResult<TextureHandle> {
        self.textures
            .get(&kind)
            .map(|slot| slot.handle)
            .ok_or_else(|| PipelineError::MissingResource(format!("{kind:?} texture")))
    }

    pub fn existing_buffer(&self, kind: BufferKind) -> PipelineResult<BufferHandle> {
        self.buffers
            .get(&kind)
            .map(|slot| slot.handle)
            .ok_or_else(|| PipelineError::MissingResource(format!("{kind:?} buffer")))
    }

    /// Resolve a handle. Handles from before a resize are stale.
    pub fn texture(&self, handle: TextureHandle) -> PipelineResult<&B::Texture> {
        let slot = self
            .textures
            .get(&handle.kind)
            .ok_or_else(|| PipelineError::MissingResource(format!("{:?} texture", handle.kind)))?;
        if slot.handle.generation != handle.generation {
            return Err(PipelineError::StaleHandle(format!(
                "{:?} texture {}x{}",
                handle.kind, handle.width, handle.height
            )));
        }
        Ok(&slot.texture)
    }

    pub fn buffer(&self, handle: BufferHandle) -> PipelineResult<&B::Buffer> {
        let slot = self
            .buffers
            .get(&handle.kind)
            .ok_or_else(|| PipelineError::MissingResource(format!("{:?} buffer", handle.kind)))?;
        if slot.handle.generation != handle.generation {
            return Err(PipelineError::StaleHandle(format!(
                "{:?} buffer of {} bytes",
                handle.kind, handle.size
            )));
        }
        Ok(&slot.buffer)
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }
}
