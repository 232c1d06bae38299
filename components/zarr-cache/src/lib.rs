//! Reference-counted, fixed-capacity LRU of open upstream pixel buffers.
//! All operations serialise under a single `parking_lot::Mutex` guarding
//! the LRU list, the entry table, and the per-buffer refcounts.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use zarr_model::{MetadataSource, PixelBuffer, PixelSource, ServiceError};

struct CacheEntry {
    image_id: i64,
    resolution: usize,
    buffer: Arc<dyn PixelBuffer>,
}

/// A buffer's identity, independent of how many entries or leases reference
/// it. Derived from the data pointer of the `Arc` so that two entries the
/// upstream happens to back with the same object share one refcount.
type BufferId = usize;

fn buffer_id(buffer: &Arc<dyn PixelBuffer>) -> BufferId {
    Arc::as_ptr(buffer) as *const () as usize
}

#[derive(Default)]
struct Inner {
    entries: Vec<CacheEntry>,
    /// How many cache entries currently point at this buffer.
    owner_refs: HashMap<BufferId, usize>,
    /// How many outstanding leases (via `BufferLease`) reference this buffer.
    lease_refs: HashMap<BufferId, usize>,
}

impl Inner {
    fn total_refs(&self, id: BufferId) -> usize {
        self.owner_refs.get(&id).copied().unwrap_or(0) + self.lease_refs.get(&id).copied().unwrap_or(0)
    }

    fn close_if_unreferenced(&mut self, id: BufferId, buffer: &Arc<dyn PixelBuffer>) {
        if self.total_refs(id) == 0 {
            self.owner_refs.remove(&id);
            self.lease_refs.remove(&id);
            buffer.close();
        }
    }

    fn evict_lru(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let evicted = self.entries.remove(0);
        let id = buffer_id(&evicted.buffer);
        if let Some(count) = self.owner_refs.get_mut(&id) {
            *count = count.saturating_sub(1);
        }
        tracing::debug!(
            image_id = evicted.image_id,
            resolution = evicted.resolution,
            "evicting pixel buffer cache entry"
        );
        self.close_if_unreferenced(id, &evicted.buffer);
    }
}

pub struct PixelBufferCache {
    capacity: usize,
    inner: Mutex<Inner>,
    metadata: Arc<dyn MetadataSource>,
    pixel_source: Arc<dyn PixelSource>,
}

impl PixelBufferCache {
    pub fn new(
        capacity: usize,
        metadata: Arc<dyn MetadataSource>,
        pixel_source: Arc<dyn PixelSource>,
    ) -> Self {
        PixelBufferCache {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
            metadata,
            pixel_source,
        }
    }

    /// Acquires a leased, resolution-scoped buffer for `(image_id,
    /// resolution)`. The caller must eventually drop the returned
    /// `BufferLease` (or call `release` on its buffer directly); dropping it
    /// releases the lease.
    pub fn acquire(
        self: &Arc<Self>,
        image_id: i64,
        resolution: usize,
    ) -> Result<BufferLease, ServiceError> {
        let buffer = self.acquire_buffer(image_id, resolution)?;
        Ok(BufferLease {
            buffer,
            cache: Arc::clone(self),
        })
    }

    fn acquire_buffer(
        &self,
        image_id: i64,
        resolution: usize,
    ) -> Result<Arc<dyn PixelBuffer>, ServiceError> {
        {
            let mut inner = self.inner.lock();
            if let Some(pos) = inner
                .entries
                .iter()
                .position(|e| e.image_id == image_id && e.resolution == resolution)
            {
                let entry = inner.entries.remove(pos);
                let buffer = Arc::clone(&entry.buffer);
                inner.entries.push(entry);
                let id = buffer_id(&buffer);
                *inner.lease_refs.entry(id).or_insert(0) += 1;
                tracing::debug!(image_id, resolution, "pixel buffer cache hit");
                return Ok(buffer);
            }
        }
        self.acquire_miss(image_id, resolution)
    }

    fn acquire_miss(
        &self,
        image_id: i64,
        resolution: usize,
    ) -> Result<Arc<dyn PixelBuffer>, ServiceError> {
        let pixels = self
            .metadata
            .get_pixels(image_id)
            .map_err(|_| ServiceError::not_found(format!("unknown image {image_id}")))?;
        let buffer = self
            .pixel_source
            .open_buffer(&pixels)
            .map_err(|_| ServiceError::not_found(format!("failed to open image {image_id}")))?;

        let levels = buffer.resolution_levels();
        if resolution >= levels {
            buffer.close();
            return Err(ServiceError::not_found(format!(
                "resolution {resolution} out of range for image {image_id} ({levels} levels)"
            )));
        }
        let upstream_level = levels - 1 - resolution;
        if buffer.set_resolution_level(upstream_level).is_err() {
            buffer.close();
            return Err(ServiceError::not_found(format!(
                "failed to set resolution level for image {image_id}"
            )));
        }

        let mut inner = self.inner.lock();
        if let Some(pos) = inner
            .entries
            .iter()
            .position(|e| e.image_id == image_id && e.resolution == resolution)
        {
            // A concurrent miss on the same key won the race and already
            // inserted an entry. Drop the buffer this call just opened and
            // lease the winner's instead, so at most one entry ever exists
            // per (image_id, resolution).
            let entry = inner.entries.remove(pos);
            let winner = Arc::clone(&entry.buffer);
            inner.entries.push(entry);
            let winner_id = buffer_id(&winner);
            *inner.lease_refs.entry(winner_id).or_insert(0) += 1;
            drop(inner);
            buffer.close();
            tracing::debug!(image_id, resolution, "pixel buffer cache miss race, using winner");
            return Ok(winner);
        }

        if inner.entries.len() >= self.capacity {
            inner.evict_lru();
        }
        let id = buffer_id(&buffer);
        *inner.owner_refs.entry(id).or_insert(0) += 1;
        *inner.lease_refs.entry(id).or_insert(0) += 1;
        inner.entries.push(CacheEntry {
            image_id,
            resolution,
            buffer: Arc::clone(&buffer),
        });
        tracing::debug!(image_id, resolution, "pixel buffer cache miss");
        Ok(buffer)
    }

    /// Decrements the lease count for `buffer`; closes it once its total
    /// refcount (owning entries + outstanding leases) reaches zero.
    pub fn release(&self, buffer: &Arc<dyn PixelBuffer>) {
        let id = buffer_id(buffer);
        let mut inner = self.inner.lock();
        if let Some(count) = inner.lease_refs.get_mut(&id) {
            *count = count.saturating_sub(1);
        }
        inner.close_if_unreferenced(id, buffer);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

/// An RAII lease on a cache buffer. `Deref`s to the underlying
/// `dyn PixelBuffer`; releases the lease on drop so early returns via `?`
/// cannot leak it.
pub struct BufferLease {
    buffer: Arc<dyn PixelBuffer>,
    cache: Arc<PixelBufferCache>,
}

impl BufferLease {
    pub fn buffer(&self) -> &Arc<dyn PixelBuffer> {
        &self.buffer
    }
}

impl Deref for BufferLease {
    type Target = dyn PixelBuffer;

    fn deref(&self) -> &Self::Target {
        self.buffer.as_ref()
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        self.cache.release(&self.buffer);
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use zarr_model::{Endianness, Pixels, Tile};

    use super::*;

    struct FakeBuffer {
        levels: usize,
        closed: Arc<AtomicBool>,
    }

    impl PixelBuffer for FakeBuffer {
        fn size_x(&self) -> u32 {
            1
        }
        fn size_y(&self) -> u32 {
            1
        }
        fn size_z(&self) -> u32 {
            1
        }
        fn size_c(&self) -> u32 {
            1
        }
        fn size_t(&self) -> u32 {
            1
        }
        fn byte_width(&self) -> u8 {
            1
        }
        fn is_signed(&self) -> bool {
            false
        }
        fn is_float(&self) -> bool {
            false
        }
        fn tile_size(&self) -> (u32, u32) {
            (1, 1)
        }
        fn resolution_levels(&self) -> usize {
            self.levels
        }
        fn resolution_descriptions(&self) -> Vec<(u32, u32)> {
            vec![(1, 1); self.levels]
        }
        fn set_resolution_level(&self, _level: usize) -> Result<(), ServiceError> {
            Ok(())
        }
        fn get_tile(
            &self,
            _z: u32,
            _c: u32,
            _t: u32,
            _x: u32,
            _y: u32,
            _w: u32,
            _h: u32,
        ) -> Result<Tile, ServiceError> {
            Ok(Tile {
                data: Vec::new(),
                endianness: Endianness::Little,
            })
        }
        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct TrackingPixelSource {
        levels: usize,
        opens: AtomicUsize,
        opened: Mutex<Vec<(i64, Arc<AtomicBool>)>>,
    }

    impl TrackingPixelSource {
        fn new(levels: usize) -> Self {
            TrackingPixelSource {
                levels,
                opens: AtomicUsize::new(0),
                opened: Mutex::new(Vec::new()),
            }
        }

        fn closed_flag_for(&self, image_id: i64) -> Arc<AtomicBool> {
            self.opened
                .lock()
                .iter()
                .find(|(id, _)| *id == image_id)
                .map(|(_, flag)| Arc::clone(flag))
                .expect("image was opened")
        }
    }

    impl PixelSource for TrackingPixelSource {
        fn open_buffer(&self, pixels: &Pixels) -> Result<Arc<dyn PixelBuffer>, ServiceError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let closed = Arc::new(AtomicBool::new(false));
            self.opened.lock().push((pixels.image_id, Arc::clone(&closed)));
            Ok(Arc::new(FakeBuffer {
                levels: self.levels,
                closed,
            }))
        }
    }

    struct FakeMetadataSource;

    impl MetadataSource for FakeMetadataSource {
        fn get_pixels(&self, image_id: i64) -> Result<Pixels, ServiceError> {
            Ok(Pixels {
                image_id,
                owner_id: 0,
                name: None,
                channels: Vec::new(),
                rendering_settings: Vec::new(),
            })
        }
        fn get_mask(&self, _mask_id: i64) -> Result<zarr_model::RawMask, ServiceError> {
            Err(ServiceError::not_found("unused in cache tests"))
        }
        fn get_roi(&self, _roi_id: i64) -> Result<zarr_model::RoiRecord, ServiceError> {
            Err(ServiceError::not_found("unused in cache tests"))
        }
        fn get_mask_ids_of_roi(&self, _roi_id: i64) -> Result<Vec<i64>, ServiceError> {
            Ok(Vec::new())
        }
        fn get_roi_ids_of_image(&self, _image_id: i64) -> Result<Vec<i64>, ServiceError> {
            Ok(Vec::new())
        }
        fn get_roi_ids_with_mask_of_image(&self, _image_id: i64) -> Result<Vec<i64>, ServiceError> {
            Ok(Vec::new())
        }
    }

    fn new_cache(capacity: usize, levels: usize) -> (Arc<PixelBufferCache>, Arc<TrackingPixelSource>) {
        let source = Arc::new(TrackingPixelSource::new(levels));
        let cache = Arc::new(PixelBufferCache::new(
            capacity,
            Arc::new(FakeMetadataSource),
            Arc::clone(&source) as Arc<dyn PixelSource>,
        ));
        (cache, source)
    }

    #[test]
    fn acquire_then_release_returns_same_buffer_for_same_key() {
        let (cache, _source) = new_cache(16, 3);
        let a = cache.acquire(1, 0).unwrap();
        let ptr_a = Arc::as_ptr(a.buffer()) as *const ();
        drop(a);
        let b = cache.acquire(1, 0).unwrap();
        let ptr_b = Arc::as_ptr(b.buffer()) as *const ();
        assert_eq!(ptr_a, ptr_b);
    }

    #[test]
    fn resolution_out_of_range_is_not_found_and_counts_as_an_open() {
        // acquiring 0,1,2 then 3 (out of range for a 3-level
        // image) reports not-found but still counts as an open attempt.
        let (cache, source) = new_cache(16, 3);
        for r in 0..3 {
            let lease = cache.acquire(1, r).unwrap();
            drop(lease);
        }
        let result = cache.acquire(1, 3);
        assert!(result.is_err());
        assert_eq!(source.opens.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn capacity_is_never_exceeded() {
        let (cache, _source) = new_cache(4, 1);
        for image_id in 0..10 {
            let lease = cache.acquire(image_id, 0).unwrap();
            drop(lease);
            assert!(cache.len() <= 4);
        }
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn eviction_closes_buffer_only_after_last_lease_released() {
        let (cache, source) = new_cache(1, 1);
        let lease_a = cache.acquire(1, 0).unwrap();
        let closed_a = source.closed_flag_for(1);

        // Evicts image 1's entry (capacity 1) while lease_a is still held.
        let lease_b = cache.acquire(2, 0).unwrap();
        assert!(!closed_a.load(Ordering::SeqCst), "buffer must stay open while leased");

        drop(lease_a);
        assert!(closed_a.load(Ordering::SeqCst), "buffer closes once its last lease drops");
        drop(lease_b);
    }

    #[test]
    fn twenty_capacity_scenario_keeps_reused_entries_and_evicts_the_rest() {
        // 20 distinct images at capacity 20, release all, then
        // re-acquire the even-indexed ones before opening four more images.
        // The untouched odd-indexed entries are the ones eviction claims.
        let (cache, source) = new_cache(20, 1);
        let mut leases: Vec<_> = (0..20).map(|id| cache.acquire(id, 0).unwrap()).collect();
        leases.clear(); // release all 20

        let even_flags: Vec<_> = (0..20)
            .step_by(2)
            .map(|id| source.closed_flag_for(id))
            .collect();
        let odd_flags: Vec<_> = (1..20)
            .step_by(2)
            .map(|id| source.closed_flag_for(id))
            .collect();

        let mut kept: Vec<_> = (0..20).step_by(2).map(|id| cache.acquire(id, 0).unwrap()).collect();
        for flag in &even_flags {
            assert!(!flag.load(Ordering::SeqCst), "re-acquired entries must not close");
        }

        let _new_entries: Vec<_> = (100..104).map(|id| cache.acquire(id, 0).unwrap()).collect();

        for flag in &odd_flags {
            assert!(flag.load(Ordering::SeqCst), "untouched entries are evicted to make room");
        }
        for flag in &even_flags {
            assert!(!flag.load(Ordering::SeqCst), "reused entries survive the eviction wave");
        }
        kept.clear();
    }
}
