//! Per-role reusable pixel buffers.
//!
//! Frame size is constant for long stretches of a live stream, so the
//! pipeline keeps one buffer per role and only reallocates when the
//! requested extent or pixel format changes. Contents are never cleared
//! between uses; every caller overwrites the whole buffer before reading.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use image::RgbImage;

use crate::error::{MatteError, Result};
use crate::frame::{Extent, PixelFormat};

/// What a pooled buffer is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRole {
    /// Frame converted to the engine's RGB input
    InputConverted,
    /// Composited mask
    MaskOutput,
}

impl BufferRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            BufferRole::InputConverted => "input-converted",
            BufferRole::MaskOutput => "mask-output",
        }
    }
}

/// Geometry a buffer is currently sized for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferTag {
    pub extent: Extent,
    pub format: PixelFormat,
}

/// Everything about a pooled buffer except its bytes
///
/// Kept by the coordinator while the bytes are lent to the engine as an
/// [`RgbImage`], so they can be returned to the pool afterwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferHeader {
    pub role: BufferRole,
    pub tag: BufferTag,
    /// Allocation serial number, unique per pool
    pub id: u64,
}

/// A reusable memory block tagged with its current geometry
#[derive(Debug)]
pub struct PooledBuffer {
    header: BufferHeader,
    data: Vec<u8>,
}

impl PooledBuffer {
    pub fn header(&self) -> BufferHeader {
        self.header
    }

    pub fn role(&self) -> BufferRole {
        self.header.role
    }

    pub fn tag(&self) -> BufferTag {
        self.header.tag
    }

    pub fn extent(&self) -> Extent {
        self.header.tag.extent
    }

    pub fn format(&self) -> PixelFormat {
        self.header.tag.format
    }

    pub fn id(&self) -> u64 {
        self.header.id
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read access; the borrow is the lock
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Write access; the borrow is the lock
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Lend the bytes out as an image without copying
    pub fn into_rgb_image(self) -> Result<(BufferHeader, RgbImage)> {
        let BufferTag { extent, format } = self.header.tag;
        if format != PixelFormat::Rgb8 {
            return Err(MatteError::UnsupportedFormat {
                format,
                usage: "engine input",
            });
        }
        let image = RgbImage::from_raw(extent.width, extent.height, self.data)
            .ok_or_else(|| MatteError::invalid_buffer("pooled buffer shorter than its tag"))?;
        Ok((self.header, image))
    }

    /// Rebuild a buffer from bytes previously lent out
    ///
    /// Returns `None` if the bytes no longer fit the header, e.g. when an
    /// engine worker died and handed back an empty image
    pub fn reclaim(header: BufferHeader, data: Vec<u8>) -> Option<Self> {
        (data.len() == header.tag.extent.byte_len(header.tag.format))
            .then_some(Self { header, data })
    }
}

/// Owns at most one buffer per [`BufferRole`]
///
/// The pool is `Send` but not `Sync`; it belongs to the pipeline
/// coordinator and is never shared with the engine worker
#[derive(Debug, Default)]
pub struct PixelBufferPool {
    slots: HashMap<BufferRole, PooledBuffer>,
    allocations: u64,
}

impl PixelBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow the buffer for `role`, reallocating only on a geometry change
    pub fn acquire(
        &mut self,
        role: BufferRole,
        extent: Extent,
        format: PixelFormat,
    ) -> &mut PooledBuffer {
        let tag = BufferTag { extent, format };
        let allocations = &mut self.allocations;
        match self.slots.entry(role) {
            Entry::Occupied(mut slot) => {
                if slot.get().tag() != tag {
                    slot.insert(allocate(allocations, role, tag));
                }
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(allocate(allocations, role, tag)),
        }
    }

    /// Take the buffer for `role` out of the pool
    ///
    /// Same reuse rule as [`acquire`](Self::acquire). While the buffer is
    /// checked out the slot is empty, so a second checkout allocates
    pub fn checkout(
        &mut self,
        role: BufferRole,
        extent: Extent,
        format: PixelFormat,
    ) -> PooledBuffer {
        let tag = BufferTag { extent, format };
        match self.slots.remove(&role) {
            Some(buffer) if buffer.tag() == tag => buffer,
            _ => allocate(&mut self.allocations, role, tag),
        }
    }

    /// Return a checked out buffer; whatever occupied its slot is dropped
    pub fn checkin(&mut self, buffer: PooledBuffer) {
        self.slots.insert(buffer.role(), buffer);
    }

    /// Current tag of the buffer held for `role`
    pub fn tag(&self, role: BufferRole) -> Option<BufferTag> {
        self.slots.get(&role).map(PooledBuffer::tag)
    }

    /// Number of buffers allocated since the pool was created
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Drop every idle buffer; lent out buffers come back through `checkin`
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

fn allocate(allocations: &mut u64, role: BufferRole, tag: BufferTag) -> PooledBuffer {
    *allocations += 1;
    tracing::debug!(
        "Allocating {} buffer {} {} (allocation #{})",
        role.as_str(),
        tag.extent,
        tag.format,
        allocations
    );
    PooledBuffer {
        header: BufferHeader {
            role,
            tag,
            id: *allocations,
        },
        data: vec![0; tag.extent.byte_len(tag.format)],
    }
}
