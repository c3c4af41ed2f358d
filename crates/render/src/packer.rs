use std::ops::Range;

use crate::RenderError;
use crate::device::GpuDevice;
use crate::layout::{OBJECT_FIELDS, max_instances_per_buffer};

/// Instances per object sub-batch: the largest count whose buffer fits both
/// `max_buffer_size` and the device limit.
pub fn sub_batch_capacity(max_buffer_size: usize, device: &dyn GpuDevice) -> Result<usize, RenderError> {
    let limit = max_buffer_size.min(device.max_buffer_size());
    Ok(max_instances_per_buffer(&OBJECT_FIELDS, limit)?)
}

/// Split `count` instances into consecutive ranges of at most
/// `max_per_sub_batch`. Sub-batch `i` owns `[i * max, min((i + 1) * max, count))`.
///
/// Returns no ranges when `count` or `max_per_sub_batch` is zero.
pub fn split_ranges(count: usize, max_per_sub_batch: usize) -> Vec<Range<usize>> {
    if count == 0 || max_per_sub_batch == 0 {
        return Vec::new();
    }
    (0..count.div_ceil(max_per_sub_batch))
        .map(|i| {
            let start = i * max_per_sub_batch;
            start..(start + max_per_sub_batch).min(count)
        })
        .collect()
}
