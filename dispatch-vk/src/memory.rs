//! Minimal dedicated-allocation helper.
//!
//! `gfx2`'s own `vk::memory::linear_pool` sub-allocates a handful of large
//! blocks per frame; this backend has no frame loop of its own (callers own
//! framing, see `dispatch-core`'s concurrency model) and every buffer/image
//! it allocates is long-lived relative to a dispatch call, so one
//! `vkAllocateMemory` per resource is simple and correct rather than a
//! premature port of the pool allocator.

use ash::version::{DeviceV1_0, InstanceV1_0};
use ash::vk;

/// Finds a memory type index satisfying `type_bits` (from
/// `VkMemoryRequirements::memory_type_bits`) and carrying every flag in
/// `required`.
pub fn find_memory_type_index(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let props = unsafe { instance.get_physical_device_memory_properties(physical_device) };
    (0..props.memory_type_count).find(|&i| {
        let supported = type_bits & (1 << i) != 0;
        let has_flags = props.memory_types[i as usize].property_flags.contains(required);
        supported && has_flags
    })
}

/// Allocates dedicated memory for `buffer` and binds it, returning the
/// allocation. Caller owns freeing it with `device.free_memory`.
pub unsafe fn allocate_and_bind_buffer(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: &ash::Device,
    buffer: vk::Buffer,
    required: vk::MemoryPropertyFlags,
) -> vk::DeviceMemory {
    let requirements = device.get_buffer_memory_requirements(buffer);
    let type_index = find_memory_type_index(instance, physical_device, requirements.memory_type_bits, required)
        .expect("no suitable memory type for buffer allocation");
    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(type_index);
    let memory = device
        .allocate_memory(&alloc_info, None)
        .expect("vkAllocateMemory failed");
    device
        .bind_buffer_memory(buffer, memory, 0)
        .expect("vkBindBufferMemory failed");
    memory
}

/// Same as [`allocate_and_bind_buffer`] for an image.
pub unsafe fn allocate_and_bind_image(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: &ash::Device,
    image: vk::Image,
    required: vk::MemoryPropertyFlags,
) -> vk::DeviceMemory {
    let requirements = device.get_image_memory_requirements(image);
    let type_index = find_memory_type_index(instance, physical_device, requirements.memory_type_bits, required)
        .expect("no suitable memory type for image allocation");
    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(type_index);
    let memory = device
        .allocate_memory(&alloc_info, None)
        .expect("vkAllocateMemory failed");
    device
        .bind_image_memory(image, memory, 0)
        .expect("vkBindImageMemory failed");
    memory
}
