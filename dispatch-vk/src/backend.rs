//! `GpuBackend` implementation over a Vulkan 1.0 device.
//!
//! Grounded in `gfx2`'s `renderer::backend::vk::instance`/`queue` (instance
//! creation, debug callback routed through `log`, graphics/compute queue
//! family selection), simplified to the single combined queue this backend
//! needs (see the module doc in `lib.rs`). The descriptor-set/pipeline-layout
//! shape and the synchronous single-command-buffer submission model have no
//! direct teacher counterpart (the teacher's `vk` module never got past
//! `unimplemented!()`) and are instead grounded in `dispatch-gl`'s own
//! `backend.rs`, which this crate mirrors field-for-field wherever Vulkan's
//! more explicit object model allows it.

use crate::memory;
use crate::shader;
use ash::version::{DeviceV1_0, EntryV1_0, InstanceV1_0};
use ash::vk;
use config::Config;
use dispatch_core::backend::{
    BackendCaps, BlendFactor, BlendParams, GpuBackend, PassCreateParams, PassCreateResult,
    PassKind, PassRunParams, PrimitiveTopology, VertexAttribute,
};
use dispatch_core::descriptor::{Descriptor, DescriptorType};
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct VkTexture(pub vk::Image);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct VkBuffer(pub vk::Buffer);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct VkPass(pub u64);

struct TextureMeta {
    view: vk::ImageView,
    format: vk::Format,
    width: u32,
    height: u32,
    renderable: bool,
    storable: bool,
    current_layout: vk::ImageLayout,
    /// `Some` for images this backend allocated itself via [`VkBackend::create_texture`];
    /// `None` for images wrapped from caller-owned storage, which this backend
    /// never frees.
    owned_memory: Option<vk::DeviceMemory>,
}

struct BufferMeta {
    memory: vk::DeviceMemory,
    size: usize,
    mapped_ptr: *mut c_void,
}

/// A raster pipeline realized for one concrete target format. Creation is
/// deferred past `pass_create` (see [`PassMeta`]) because the target texture,
/// and therefore its `VkFormat`, is only known at `pass_run` time; the
/// dispatch cache's own `RasterMatchKey` already guarantees every call
/// through a given pass uses a format-compatible target, so this only ever
/// needs to be rebuilt once, on the pass's first run.
struct RasterPipeline {
    format: vk::Format,
    render_pass: vk::RenderPass,
    pipeline: vk::Pipeline,
}

struct PassMeta {
    kind: PassKind,
    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_set: vk::DescriptorSet,
    pipeline_layout: vk::PipelineLayout,
    // raster-only; null for compute passes.
    vertex_module: vk::ShaderModule,
    fragment_module: vk::ShaderModule,
    vertex_attributes: Vec<VertexAttribute>,
    vertex_stride: u32,
    topology: PrimitiveTopology,
    blend: Option<BlendParams>,
    load_target: bool,
    raster: Option<RasterPipeline>,
    // compute-only.
    compute_pipeline: Option<vk::Pipeline>,
}

unsafe extern "system" fn vulkan_debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _ty: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*data).p_message).to_string_lossy();
    let level = if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Info
    } else {
        log::Level::Debug
    };
    log::log!(level, "(VK) {}", message);
    vk::FALSE
}

fn select_physical_device(instance: &ash::Instance) -> vk::PhysicalDevice {
    let devices = unsafe {
        instance
            .enumerate_physical_devices()
            .expect("enumerate_physical_devices failed")
    };
    devices
        .into_iter()
        .max_by_key(|&d| {
            let props = unsafe { instance.get_physical_device_properties(d) };
            match props.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 2,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                _ => 0,
            }
        })
        .expect("no Vulkan physical device available")
}

/// Finds a single queue family supporting both graphics and compute. The
/// teacher's `queue::create_queue_configuration` splits these (plus transfer
/// and present) into separate families where available; this backend has no
/// swapchain and issues work synchronously from one thread, so one combined
/// queue is all it needs.
fn select_queue_family(properties: &[vk::QueueFamilyProperties]) -> u32 {
    properties
        .iter()
        .enumerate()
        .find(|(_, p)| {
            p.queue_flags
                .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .map(|(i, _)| i as u32)
        .expect("no queue family supports both graphics and compute")
}

fn create_descriptor_pool(device: &ash::Device) -> vk::DescriptorPool {
    let pool_sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 256,
        },
        vk::DescriptorPoolSize { ty: vk::DescriptorType::STORAGE_IMAGE, descriptor_count: 256 },
        vk::DescriptorPoolSize { ty: vk::DescriptorType::UNIFORM_BUFFER, descriptor_count: 256 },
        vk::DescriptorPoolSize { ty: vk::DescriptorType::STORAGE_BUFFER, descriptor_count: 256 },
        vk::DescriptorPoolSize { ty: vk::DescriptorType::UNIFORM_TEXEL_BUFFER, descriptor_count: 256 },
        vk::DescriptorPoolSize { ty: vk::DescriptorType::STORAGE_TEXEL_BUFFER, descriptor_count: 256 },
    ];
    let create_info = vk::DescriptorPoolCreateInfo::builder()
        .pool_sizes(&pool_sizes)
        .max_sets(256)
        .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);
    unsafe {
        device
            .create_descriptor_pool(&create_info, None)
            .expect("descriptor pool creation failed")
    }
}

fn vk_descriptor_type(ty: DescriptorType) -> vk::DescriptorType {
    match ty {
        DescriptorType::SampledImage => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DescriptorType::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        DescriptorType::UniformTexelBuffer => vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
        DescriptorType::StorageTexelBuffer => vk::DescriptorType::STORAGE_TEXEL_BUFFER,
    }
}

/// Format a texel buffer's `vk::BufferView` is created with. `Mat3`/`Mat4`
/// have no element-wise texel format and fall back to `Vec4`.
fn vk_texel_format(shape: dispatch_core::accumulator::VarShape) -> vk::Format {
    use dispatch_core::accumulator::VarShape;
    match shape {
        VarShape::Float => vk::Format::R32_SFLOAT,
        VarShape::Vec2 => vk::Format::R32G32_SFLOAT,
        VarShape::Vec3 => vk::Format::R32G32B32_SFLOAT,
        VarShape::Vec4 | VarShape::Mat3 | VarShape::Mat4 => vk::Format::R32G32B32A32_SFLOAT,
    }
}

fn vk_blend_factor(f: BlendFactor) -> vk::BlendFactor {
    match f {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
    }
}

pub struct VkBackend {
    entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: ash::extensions::ext::DebugUtils,
    debug_messenger: vk::DebugUtilsMessengerEXT,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue: vk::Queue,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    descriptor_pool: vk::DescriptorPool,
    default_sampler: vk::Sampler,
    caps: BackendCaps,
    next_id: u64,
    passes: HashMap<u64, PassMeta>,
    textures: HashMap<vk::Image, TextureMeta>,
    buffers: HashMap<vk::Buffer, BufferMeta>,
}

impl VkBackend {
    /// Creates an instance, device, and the fixed pool of objects every pass
    /// shares (descriptor pool, command buffer, default sampler). No
    /// swapchain or surface is created; the caller owns presentation.
    pub fn new(cfg: &Config) -> VkBackend {
        unsafe {
            let entry = ash::Entry::new().expect("failed to load Vulkan entry points");

            let app_name = CStr::from_bytes_with_nul(b"dispatch-vk\0").unwrap();
            let app_info = vk::ApplicationInfo::builder()
                .application_name(app_name)
                .engine_name(app_name)
                .api_version(vk::make_version(1, 0, 0));

            let layer_names: Vec<CString> = cfg
                .get::<Vec<String>>("dispatch.vk.layers")
                .unwrap_or_default()
                .into_iter()
                .map(|n| CString::new(n).unwrap())
                .collect();
            let layer_ptrs: Vec<*const c_char> = layer_names.iter().map(|n| n.as_ptr()).collect();
            let extension_ptrs = [ash::extensions::ext::DebugUtils::name().as_ptr()];

            let instance_create_info = vk::InstanceCreateInfo::builder()
                .application_info(&app_info)
                .enabled_layer_names(&layer_ptrs)
                .enabled_extension_names(&extension_ptrs);
            let instance = entry
                .create_instance(&instance_create_info, None)
                .expect("instance creation failed");

            let debug_utils = ash::extensions::ext::DebugUtils::new(&entry, &instance);
            let debug_create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vulkan_debug_callback));
            let debug_messenger = debug_utils
                .create_debug_utils_messenger(&debug_create_info, None)
                .expect("debug messenger creation failed");

            let physical_device = select_physical_device(&instance);
            let queue_family_properties =
                instance.get_physical_device_queue_family_properties(physical_device);
            let queue_family = select_queue_family(&queue_family_properties);

            let queue_priorities = [1.0f32];
            let queue_create_info = vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(queue_family)
                .queue_priorities(&queue_priorities)
                .build();
            let device_create_info =
                vk::DeviceCreateInfo::builder().queue_create_infos(std::slice::from_ref(&queue_create_info));
            let device = instance
                .create_device(physical_device, &device_create_info, None)
                .expect("device creation failed");
            let queue = device.get_device_queue(queue_family, 0);

            let command_pool_info = vk::CommandPoolCreateInfo::builder()
                .queue_family_index(queue_family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            let command_pool = device
                .create_command_pool(&command_pool_info, None)
                .expect("command pool creation failed");

            let command_buffer_info = vk::CommandBufferAllocateInfo::builder()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let command_buffer = device
                .allocate_command_buffers(&command_buffer_info)
                .expect("command buffer allocation failed")[0];

            let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
            let fence = device.create_fence(&fence_info, None).expect("fence creation failed");

            let descriptor_pool = create_descriptor_pool(&device);

            let sampler_info = vk::SamplerCreateInfo::builder()
                .mag_filter(vk::Filter::LINEAR)
                .min_filter(vk::Filter::LINEAR)
                .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE);
            let default_sampler =
                device.create_sampler(&sampler_info, None).expect("sampler creation failed");

            let props = instance.get_physical_device_properties(physical_device);
            log::debug!(
                "Vulkan device: {:?}",
                CStr::from_ptr(props.device_name.as_ptr())
            );

            VkBackend {
                caps: BackendCaps {
                    supports_global_uniforms: false,
                    supports_push_constants: true,
                    push_constant_budget: props.limits.max_push_constants_size.min(128),
                    supports_ubo: true,
                    ubo_budget: props.limits.max_uniform_buffer_range.min(16384),
                    ubo_offsets_require_version: 0,
                    glsl_version: 450,
                    glsl_es: false,
                    supports_subgroups: false,
                    supports_parallel_compute: true,
                    requires_explicit_bindings: true,
                },
                entry,
                instance,
                debug_utils,
                debug_messenger,
                physical_device,
                device,
                queue,
                command_pool,
                command_buffer,
                fence,
                descriptor_pool,
                default_sampler,
                next_id: 1,
                passes: HashMap::new(),
                textures: HashMap::new(),
                buffers: HashMap::new(),
            }
        }
    }

    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> vk::ImageView {
        let subresource = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(subresource);
        unsafe {
            self.device
                .create_image_view(&create_info, None)
                .expect("image view creation failed")
        }
    }

    fn insert_texture(
        &mut self,
        image: vk::Image,
        format: vk::Format,
        width: u32,
        height: u32,
        renderable: bool,
        storable: bool,
        owned_memory: Option<vk::DeviceMemory>,
    ) -> VkTexture {
        let view = self.create_image_view(image, format);
        self.textures.insert(
            image,
            TextureMeta {
                view,
                format,
                width,
                height,
                renderable,
                storable,
                current_layout: vk::ImageLayout::UNDEFINED,
                owned_memory,
            },
        );
        VkTexture(image)
    }

    /// Registers an image this backend didn't allocate itself (swapchain
    /// images, application-owned render targets) so it can answer
    /// `texture_is_renderable`/`texture_dimensions`/etc, mirroring
    /// `dispatch-gl::GlBackend::wrap_texture`.
    pub fn wrap_image(
        &mut self,
        image: vk::Image,
        format: vk::Format,
        width: u32,
        height: u32,
        renderable: bool,
        storable: bool,
    ) -> VkTexture {
        self.insert_texture(image, format, width, height, renderable, storable, None)
    }

    /// Allocates and binds a dedicated 2D image of `format`, for callers that
    /// want this backend to own the texture's lifetime rather than supply
    /// one. Free with [`VkBackend::destroy_texture`].
    pub fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: vk::Format,
        renderable: bool,
        storable: bool,
    ) -> VkTexture {
        let mut usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
        if renderable {
            usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if storable {
            usage |= vk::ImageUsageFlags::STORAGE;
        }
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D { width, height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe {
            self.device.create_image(&create_info, None).expect("image creation failed")
        };
        let memory = unsafe {
            memory::allocate_and_bind_image(
                &self.instance,
                self.physical_device,
                &self.device,
                image,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
        };
        self.insert_texture(image, format, width, height, renderable, storable, Some(memory))
    }

    pub fn destroy_texture(&mut self, texture: VkTexture) {
        if let Some(meta) = self.textures.remove(&texture.0) {
            unsafe {
                self.device.destroy_image_view(meta.view, None);
                if let Some(memory) = meta.owned_memory {
                    self.device.destroy_image(texture.0, None);
                    self.device.free_memory(memory, None);
                }
            }
        }
    }

    fn create_descriptor_set_layout(&self, types: &[DescriptorType]) -> vk::DescriptorSetLayout {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = types
            .iter()
            .enumerate()
            .map(|(i, ty)| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(i as u32)
                    .descriptor_type(vk_descriptor_type(*ty))
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::ALL)
                    .build()
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        unsafe {
            self.device
                .create_descriptor_set_layout(&create_info, None)
                .expect("descriptor set layout creation failed")
        }
    }

    fn create_pipeline_layout(
        &self,
        set_layout: vk::DescriptorSetLayout,
        push_constant_size: u32,
    ) -> vk::PipelineLayout {
        let set_layouts = [set_layout];
        let push_ranges = if push_constant_size > 0 {
            vec![vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::ALL,
                offset: 0,
                size: push_constant_size,
            }]
        } else {
            Vec::new()
        };
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        unsafe {
            self.device
                .create_pipeline_layout(&create_info, None)
                .expect("pipeline layout creation failed")
        }
    }

    fn allocate_descriptor_set(&self, layout: vk::DescriptorSetLayout) -> vk::DescriptorSet {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&layouts);
        unsafe {
            self.device
                .allocate_descriptor_sets(&alloc_info)
                .expect("descriptor set allocation failed")[0]
        }
    }

    /// Compiles and links a compute pipeline eagerly (no target-format
    /// dependency, unlike raster). Seeds and re-serializes a transient
    /// `VkPipelineCache` from `cached` so a caller persisting the returned
    /// bytes gets driver-level compile caching across runs, the Vulkan
    /// analogue of `dispatch-gl`'s `glGetProgramBinary` round trip.
    fn create_compute_pipeline(
        &self,
        module: vk::ShaderModule,
        layout: vk::PipelineLayout,
        cached: Option<&[u8]>,
    ) -> (vk::Pipeline, Vec<u8>) {
        let mut cache_info = vk::PipelineCacheCreateInfo::builder();
        if let Some(bytes) = cached {
            cache_info = cache_info.initial_data(bytes);
        }
        let cache = unsafe {
            self.device
                .create_pipeline_cache(&cache_info, None)
                .expect("pipeline cache creation failed")
        };

        let entry_point = CString::new("main").unwrap();
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(&entry_point)
            .build();
        let create_info = vk::ComputePipelineCreateInfo::builder().stage(stage).layout(layout).build();

        let pipeline = unsafe {
            self.device
                .create_compute_pipelines(cache, &[create_info], None)
                .expect("compute pipeline creation failed")[0]
        };
        let bytes = unsafe { self.device.get_pipeline_cache_data(cache).unwrap_or_default() };
        unsafe { self.device.destroy_pipeline_cache(cache, None) };
        (pipeline, bytes)
    }

    fn create_render_pass(&self, format: vk::Format, load_target: bool) -> vk::RenderPass {
        let attachment = vk::AttachmentDescription::builder()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(if load_target { vk::AttachmentLoadOp::LOAD } else { vk::AttachmentLoadOp::CLEAR })
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build();
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(std::slice::from_ref(&color_ref))
            .build();
        let attachments = [attachment];
        let subpasses = [subpass];
        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses);
        unsafe {
            self.device
                .create_render_pass(&create_info, None)
                .expect("render pass creation failed")
        }
    }

    fn create_graphics_pipeline(
        &self,
        vertex_module: vk::ShaderModule,
        fragment_module: vk::ShaderModule,
        pipeline_layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
        vertex_attributes: &[VertexAttribute],
        vertex_stride: u32,
        topology: PrimitiveTopology,
        blend: Option<BlendParams>,
    ) -> vk::Pipeline {
        let entry_point = CString::new("main").unwrap();
        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module)
                .name(&entry_point)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module)
                .name(&entry_point)
                .build(),
        ];

        let mut attribute_descriptions = Vec::with_capacity(vertex_attributes.len());
        let mut location = 0u32;
        for attr in vertex_attributes {
            attribute_descriptions.push(vk::VertexInputAttributeDescription {
                location,
                binding: 0,
                format: shader::attr_vk_format(attr),
                offset: attr.offset,
            });
            location += attr.format.location_count();
        }
        let binding_descriptions = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: vertex_stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let vk_topology = match topology {
            PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
            PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder().topology(vk_topology);

        let viewport = vk::Viewport { x: 0.0, y: 0.0, width: 1.0, height: 1.0, min_depth: 0.0, max_depth: 1.0 };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D { width: 1, height: 1 },
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(std::slice::from_ref(&viewport))
            .scissors(std::slice::from_ref(&scissor));

        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);

        let multisample =
            vk::PipelineMultisampleStateCreateInfo::builder().rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let write_mask =
            vk::ColorComponentFlags::R | vk::ColorComponentFlags::G | vk::ColorComponentFlags::B | vk::ColorComponentFlags::A;
        let blend_attachment = match blend {
            Some(b) => vk::PipelineColorBlendAttachmentState::builder()
                .blend_enable(true)
                .src_color_blend_factor(vk_blend_factor(b.src))
                .dst_color_blend_factor(vk_blend_factor(b.dst))
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk_blend_factor(b.src))
                .dst_alpha_blend_factor(vk_blend_factor(b.dst))
                .alpha_blend_op(vk::BlendOp::ADD)
                .color_write_mask(write_mask)
                .build(),
            None => vk::PipelineColorBlendAttachmentState::builder()
                .blend_enable(false)
                .color_write_mask(write_mask)
                .build(),
        };
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::builder().attachments(std::slice::from_ref(&blend_attachment));

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(pipeline_layout)
            .render_pass(render_pass)
            .subpass(0)
            .build();

        unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .expect("graphics pipeline creation failed")[0]
        }
    }

    /// Rebuilds the raster pipeline if this is the pass's first run, or if a
    /// previous run used a different target format (can only happen across
    /// distinct cache entries in practice, since one `RasterMatchKey`/pass is
    /// always run against format-consistent targets).
    fn ensure_raster_pipeline(&mut self, id: u64, format: vk::Format) {
        let needs_rebuild = match &self.passes.get(&id).unwrap().raster {
            Some(r) => r.format != format,
            None => true,
        };
        if !needs_rebuild {
            return;
        }

        if let Some(old) = self.passes.get_mut(&id).unwrap().raster.take() {
            unsafe {
                self.device.destroy_pipeline(old.pipeline, None);
                self.device.destroy_render_pass(old.render_pass, None);
            }
        }

        let (vertex_module, fragment_module, pipeline_layout, vertex_attributes, vertex_stride, topology, blend, load_target) = {
            let meta = self.passes.get(&id).unwrap();
            (
                meta.vertex_module,
                meta.fragment_module,
                meta.pipeline_layout,
                meta.vertex_attributes.clone(),
                meta.vertex_stride,
                meta.topology,
                meta.blend,
                meta.load_target,
            )
        };

        let render_pass = self.create_render_pass(format, load_target);
        let pipeline = self.create_graphics_pipeline(
            vertex_module,
            fragment_module,
            pipeline_layout,
            render_pass,
            &vertex_attributes,
            vertex_stride,
            topology,
            blend,
        );

        self.passes.get_mut(&id).unwrap().raster = Some(RasterPipeline { format, render_pass, pipeline });
    }

    fn transition_image(&mut self, image: vk::Image, new_layout: vk::ImageLayout) {
        let old_layout = match self.textures.get(&image) {
            Some(meta) => meta.current_layout,
            None => return,
        };
        if old_layout == new_layout {
            return;
        }
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE | vk::AccessFlags::MEMORY_READ)
            .dst_access_mask(vk::AccessFlags::MEMORY_WRITE | vk::AccessFlags::MEMORY_READ)
            .build();
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        self.textures.get_mut(&image).unwrap().current_layout = new_layout;
    }

    /// Writes every descriptor for this call into `set`. Called once per
    /// `pass_run` since the bound resources can change every call (unlike the
    /// pipeline/layout, which are fixed at `pass_create`).
    /// Returns the `vk::BufferView`s it had to create for texel-buffer
    /// descriptors (Vulkan addresses these through a view object, not a
    /// buffer range), for the caller to destroy once the submission this
    /// call's writes feed into has finished executing.
    fn update_descriptor_set(&self, set: vk::DescriptorSet, descriptors: &[Descriptor<Self>]) -> Vec<vk::BufferView> {
        let mut image_infos = Vec::with_capacity(descriptors.len());
        let mut buffer_infos = Vec::with_capacity(descriptors.len());
        let mut buffer_views = Vec::new();
        enum Info {
            Image(usize),
            Buffer(usize),
            View(usize),
        }
        let mut plan: Vec<(u32, vk::DescriptorType, Info)> = Vec::with_capacity(descriptors.len());

        for (i, descriptor) in descriptors.iter().enumerate() {
            let binding = i as u32;
            match *descriptor {
                Descriptor::SampledImage { texture, .. } => {
                    let view = self.textures.get(&texture.0).map(|t| t.view).unwrap_or(vk::ImageView::null());
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: self.default_sampler,
                        image_view: view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    });
                    plan.push((binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, Info::Image(image_infos.len() - 1)));
                }
                Descriptor::StorageImage { texture, .. } => {
                    let view = self.textures.get(&texture.0).map(|t| t.view).unwrap_or(vk::ImageView::null());
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: view,
                        image_layout: vk::ImageLayout::GENERAL,
                    });
                    plan.push((binding, vk::DescriptorType::STORAGE_IMAGE, Info::Image(image_infos.len() - 1)));
                }
                Descriptor::UniformBuffer { buffer, offset, size } => {
                    buffer_infos.push(vk::DescriptorBufferInfo { buffer: buffer.0, offset: offset as u64, range: size as u64 });
                    plan.push((binding, vk::DescriptorType::UNIFORM_BUFFER, Info::Buffer(buffer_infos.len() - 1)));
                }
                Descriptor::StorageBuffer { buffer, offset, size, .. } => {
                    buffer_infos.push(vk::DescriptorBufferInfo { buffer: buffer.0, offset: offset as u64, range: size as u64 });
                    plan.push((binding, vk::DescriptorType::STORAGE_BUFFER, Info::Buffer(buffer_infos.len() - 1)));
                }
                Descriptor::UniformTexelBuffer { buffer, offset, size, element } => {
                    let create_info = vk::BufferViewCreateInfo::builder()
                        .buffer(buffer.0)
                        .format(vk_texel_format(element))
                        .offset(offset as u64)
                        .range(size as u64);
                    let view = unsafe {
                        self.device
                            .create_buffer_view(&create_info, None)
                            .expect("buffer view creation failed")
                    };
                    buffer_views.push(view);
                    plan.push((binding, vk::DescriptorType::UNIFORM_TEXEL_BUFFER, Info::View(buffer_views.len() - 1)));
                }
                Descriptor::StorageTexelBuffer { buffer, offset, size, element, .. } => {
                    let create_info = vk::BufferViewCreateInfo::builder()
                        .buffer(buffer.0)
                        .format(vk_texel_format(element))
                        .offset(offset as u64)
                        .range(size as u64);
                    let view = unsafe {
                        self.device
                            .create_buffer_view(&create_info, None)
                            .expect("buffer view creation failed")
                    };
                    buffer_views.push(view);
                    plan.push((binding, vk::DescriptorType::STORAGE_TEXEL_BUFFER, Info::View(buffer_views.len() - 1)));
                }
            }
        }

        let writes: Vec<vk::WriteDescriptorSet> = plan
            .iter()
            .map(|(binding, ty, info)| {
                let mut w = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .dst_array_element(0)
                    .descriptor_type(*ty);
                w = match info {
                    Info::Image(idx) => w.image_info(std::slice::from_ref(&image_infos[*idx])),
                    Info::Buffer(idx) => w.buffer_info(std::slice::from_ref(&buffer_infos[*idx])),
                    Info::View(idx) => w.texel_buffer_view(std::slice::from_ref(&buffer_views[*idx])),
                };
                w.build()
            })
            .collect();

        unsafe {
            self.device.update_descriptor_sets(&writes, &[]);
        }
        buffer_views
    }
}

impl GpuBackend for VkBackend {
    type Texture = VkTexture;
    type Buffer = VkBuffer;
    type Pass = VkPass;

    fn caps(&self) -> BackendCaps {
        self.caps
    }

    /// Every descriptor shares Vulkan's one descriptor set, so the binding
    /// namespace is a single constant: binding number always equals
    /// positional index, unlike GL's four genuinely separate binding spaces.
    fn desc_namespace(&self, _ty: DescriptorType) -> usize {
        0
    }

    fn pass_create(&mut self, params: &PassCreateParams<'_, Self>) -> Option<PassCreateResult<Self>> {
        let descriptor_set_layout = self.create_descriptor_set_layout(params.descriptors);
        let pipeline_layout = self.create_pipeline_layout(descriptor_set_layout, params.push_constant_size);
        let descriptor_set = self.allocate_descriptor_set(descriptor_set_layout);

        let mut compiler = shaderc::Compiler::new()?;
        let (compute_pipeline, vertex_module, fragment_module, cached_program) = match params.kind {
            PassKind::Compute => {
                let compute_source = params.compute_source?;
                let spirv = shader::compile_to_spirv(&mut compiler, compute_source, shaderc::ShaderKind::Compute, "compute")
                    .map_err(|e| log::error!("compute shader compile failed: {}", e))
                    .ok()?;
                let module = shader::create_shader_module(&self.device, &spirv);
                let (pipeline, bytes) = self.create_compute_pipeline(module, pipeline_layout, params.cached_program);
                (Some(pipeline), vk::ShaderModule::null(), vk::ShaderModule::null(), Some(bytes))
            }
            PassKind::Raster => {
                let fragment_source = params.fragment_source?;
                let vertex_source = shader::builtin_vertex_source(
                    params.vertex_attributes,
                    params.projection,
                    params.descriptors.len() as u32,
                );
                let vs_spirv = shader::compile_to_spirv(&mut compiler, &vertex_source, shaderc::ShaderKind::Vertex, "vertex")
                    .map_err(|e| log::error!("vertex shader compile failed: {}", e))
                    .ok()?;
                let fs_spirv =
                    shader::compile_to_spirv(&mut compiler, fragment_source, shaderc::ShaderKind::Fragment, "fragment")
                        .map_err(|e| log::error!("fragment shader compile failed: {}", e))
                        .ok()?;
                let vm = shader::create_shader_module(&self.device, &vs_spirv);
                let fm = shader::create_shader_module(&self.device, &fs_spirv);
                // Pipeline realization is deferred to the first `pass_run`, once the
                // target format is known, so there is nothing to cache-seed yet.
                (None, vm, fm, None)
            }
        };

        let id = self.next_id;
        self.next_id += 1;
        self.passes.insert(
            id,
            PassMeta {
                kind: params.kind,
                descriptor_set_layout,
                descriptor_set,
                pipeline_layout,
                vertex_module,
                fragment_module,
                vertex_attributes: params.vertex_attributes.to_vec(),
                vertex_stride: params.vertex_stride,
                topology: params.topology,
                blend: params.blend,
                load_target: params.load_target,
                raster: None,
                compute_pipeline,
            },
        );

        Some(PassCreateResult { pass: VkPass(id), cached_program })
    }

    fn pass_run(&mut self, pass: Self::Pass, params: &PassRunParams<'_, Self>) {
        let (kind, pipeline_layout, descriptor_set, compute_pipeline) = {
            let meta = match self.passes.get(&pass.0) {
                Some(m) => m,
                None => {
                    log::error!("pass_run on unknown pass {:?}", pass);
                    return;
                }
            };
            (meta.kind, meta.pipeline_layout, meta.descriptor_set, meta.compute_pipeline)
        };

        let transient_buffer_views = self.update_descriptor_set(descriptor_set, params.descriptors);

        unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, u64::MAX)
                .expect("wait_for_fences failed");
            self.device.reset_fences(&[self.fence]).expect("reset_fences failed");
            self.device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .expect("reset_command_buffer failed");
            let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .begin_command_buffer(self.command_buffer, &begin_info)
                .expect("begin_command_buffer failed");
        }

        for descriptor in params.descriptors {
            match *descriptor {
                Descriptor::SampledImage { texture, .. } => {
                    self.transition_image(texture.0, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                }
                Descriptor::StorageImage { texture, .. } => {
                    self.transition_image(texture.0, vk::ImageLayout::GENERAL)
                }
                _ => {}
            }
        }

        let mut framebuffer = None;
        let mut transient_vertex_buffer: Option<VkBuffer> = None;

        match kind {
            PassKind::Compute => unsafe {
                let pipeline = compute_pipeline.expect("compute pass missing its pipeline");
                self.device.cmd_bind_pipeline(self.command_buffer, vk::PipelineBindPoint::COMPUTE, pipeline);
                self.device.cmd_bind_descriptor_sets(
                    self.command_buffer,
                    vk::PipelineBindPoint::COMPUTE,
                    pipeline_layout,
                    0,
                    &[descriptor_set],
                    &[],
                );
                if !params.push_constants.is_empty() {
                    self.device.cmd_push_constants(
                        self.command_buffer,
                        pipeline_layout,
                        vk::ShaderStageFlags::ALL,
                        0,
                        params.push_constants,
                    );
                }
                let (x, y, z) = params.compute_groups;
                self.device.cmd_dispatch(self.command_buffer, x, y, z);
            },
            PassKind::Raster => {
                let target = match params.target {
                    Some(t) => t,
                    None => {
                        log::error!("raster pass_run with no target");
                        unsafe {
                            self.device.end_command_buffer(self.command_buffer).ok();
                        }
                        return;
                    }
                };
                self.transition_image(target.0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

                let (width, height, format, view) = {
                    let meta = self.textures.get(&target.0).expect("raster target not registered with this backend");
                    (meta.width, meta.height, meta.format, meta.view)
                };
                self.ensure_raster_pipeline(pass.0, format);
                let (render_pass, pipeline) = {
                    let raster = self.passes.get(&pass.0).unwrap().raster.as_ref().unwrap();
                    (raster.render_pass, raster.pipeline)
                };

                let fb = unsafe {
                    let attachments = [view];
                    let create_info = vk::FramebufferCreateInfo::builder()
                        .render_pass(render_pass)
                        .attachments(&attachments)
                        .width(width)
                        .height(height)
                        .layers(1);
                    self.device
                        .create_framebuffer(&create_info, None)
                        .expect("framebuffer creation failed")
                };
                framebuffer = Some(fb);

                let (x, y, w, h) = params.scissor.unwrap_or((0, 0, width, height));
                let render_area = vk::Rect2D { offset: vk::Offset2D { x, y }, extent: vk::Extent2D { width: w, height: h } };
                let clear_values = [vk::ClearValue { color: vk::ClearColorValue { float32: [0.0, 0.0, 0.0, 0.0] } }];

                // Caller-supplied geometry takes priority; otherwise, if the
                // call carries raw vertex bytes (the implicit quad path, see
                // `dispatch::dispatch_finish`), stream them into a buffer
                // that lives only for this draw.
                transient_vertex_buffer = match (params.vertex_buffer, params.vertex_data.filter(|d| !d.is_empty())) {
                    (Some(_), _) => None,
                    (None, Some(data)) => {
                        let buf = self.buf_create(data.len(), false, true);
                        self.buf_write(buf, 0, data);
                        Some(buf)
                    }
                    (None, None) => None,
                };
                let vertex_buffer = params.vertex_buffer.or(transient_vertex_buffer);

                unsafe {
                    let begin = vk::RenderPassBeginInfo::builder()
                        .render_pass(render_pass)
                        .framebuffer(fb)
                        .render_area(render_area)
                        .clear_values(&clear_values);
                    self.device.cmd_begin_render_pass(self.command_buffer, &begin, vk::SubpassContents::INLINE);

                    let viewport = vk::Viewport {
                        x: 0.0,
                        y: 0.0,
                        width: width as f32,
                        height: height as f32,
                        min_depth: 0.0,
                        max_depth: 1.0,
                    };
                    self.device.cmd_set_viewport(self.command_buffer, 0, &[viewport]);
                    self.device.cmd_set_scissor(self.command_buffer, 0, &[render_area]);

                    self.device.cmd_bind_pipeline(self.command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
                    self.device.cmd_bind_descriptor_sets(
                        self.command_buffer,
                        vk::PipelineBindPoint::GRAPHICS,
                        pipeline_layout,
                        0,
                        &[descriptor_set],
                        &[],
                    );
                    if !params.push_constants.is_empty() {
                        self.device.cmd_push_constants(
                            self.command_buffer,
                            pipeline_layout,
                            vk::ShaderStageFlags::ALL,
                            0,
                            params.push_constants,
                        );
                    }
                    if let Some(buf) = vertex_buffer {
                        self.device.cmd_bind_vertex_buffers(self.command_buffer, 0, &[buf.0], &[0]);
                    }
                    if let Some(ib) = params.index_buffer {
                        self.device.cmd_bind_index_buffer(self.command_buffer, ib.0, 0, vk::IndexType::UINT32);
                        self.device.cmd_draw_indexed(self.command_buffer, params.vertex_count, 1, 0, 0, 0);
                    } else {
                        self.device.cmd_draw(self.command_buffer, params.vertex_count, 1, 0, 0);
                    }

                    self.device.cmd_end_render_pass(self.command_buffer);
                }
            }
        }

        unsafe {
            self.device.end_command_buffer(self.command_buffer).expect("end_command_buffer failed");
            let command_buffers = [self.command_buffer];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
            self.device
                .queue_submit(self.queue, &[submit_info], self.fence)
                .expect("queue_submit failed");
            self.device
                .wait_for_fences(&[self.fence], true, u64::MAX)
                .expect("wait_for_fences failed");
            if let Some(fb) = framebuffer {
                self.device.destroy_framebuffer(fb, None);
            }
        }
        if let Some(buf) = transient_vertex_buffer {
            self.buf_destroy(buf);
        }
        for view in transient_buffer_views {
            unsafe {
                self.device.destroy_buffer_view(view, None);
            }
        }
    }

    fn pass_destroy(&mut self, pass: Self::Pass) {
        if let Some(meta) = self.passes.remove(&pass.0) {
            unsafe {
                self.device.free_descriptor_sets(self.descriptor_pool, &[meta.descriptor_set]).ok();
                if meta.vertex_module != vk::ShaderModule::null() {
                    self.device.destroy_shader_module(meta.vertex_module, None);
                }
                if meta.fragment_module != vk::ShaderModule::null() {
                    self.device.destroy_shader_module(meta.fragment_module, None);
                }
                if let Some(pipeline) = meta.compute_pipeline {
                    self.device.destroy_pipeline(pipeline, None);
                }
                if let Some(raster) = meta.raster {
                    self.device.destroy_pipeline(raster.pipeline, None);
                    self.device.destroy_render_pass(raster.render_pass, None);
                }
                self.device.destroy_pipeline_layout(meta.pipeline_layout, None);
                self.device.destroy_descriptor_set_layout(meta.descriptor_set_layout, None);
            }
        }
    }

    fn buf_create(&mut self, size: usize, _uniform: bool, _host_writable: bool) -> Self::Buffer {
        let usage = vk::BufferUsageFlags::VERTEX_BUFFER
            | vk::BufferUsageFlags::INDEX_BUFFER
            | vk::BufferUsageFlags::UNIFORM_BUFFER
            | vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::TRANSFER_DST;
        let create_info = vk::BufferCreateInfo::builder()
            .size(size as u64)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        unsafe {
            let buffer = self.device.create_buffer(&create_info, None).expect("buffer creation failed");
            let memory = memory::allocate_and_bind_buffer(
                &self.instance,
                self.physical_device,
                &self.device,
                buffer,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            );
            let mapped_ptr = self
                .device
                .map_memory(memory, 0, size as u64, vk::MemoryMapFlags::empty())
                .expect("map_memory failed");
            self.buffers.insert(buffer, BufferMeta { memory, size, mapped_ptr });
            VkBuffer(buffer)
        }
    }

    fn buf_write(&mut self, buf: Self::Buffer, offset: usize, data: &[u8]) {
        if let Some(meta) = self.buffers.get(&buf.0) {
            debug_assert!(offset + data.len() <= meta.size, "buf_write out of bounds");
            unsafe {
                let dst = (meta.mapped_ptr as *mut u8).add(offset);
                std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
            }
        }
    }

    fn buf_destroy(&mut self, buf: Self::Buffer) {
        if let Some(meta) = self.buffers.remove(&buf.0) {
            unsafe {
                self.device.unmap_memory(meta.memory);
                self.device.destroy_buffer(buf.0, None);
                self.device.free_memory(meta.memory, None);
            }
        }
    }

    fn texture_is_renderable(&self, texture: Self::Texture) -> bool {
        self.textures.get(&texture.0).map(|t| t.renderable).unwrap_or(true)
    }

    fn texture_is_storable(&self, texture: Self::Texture) -> bool {
        self.textures.get(&texture.0).map(|t| t.storable).unwrap_or(false)
    }

    fn texture_dimensions(&self, texture: Self::Texture) -> (u32, u32) {
        self.textures.get(&texture.0).map(|t| (t.width, t.height)).unwrap_or((0, 0))
    }

    fn texture_format_tag(&self, texture: Self::Texture) -> u64 {
        self.textures.get(&texture.0).map(|t| t.format.as_raw() as u64).unwrap_or(0)
    }
}

impl Drop for VkBackend {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();

            for (_, meta) in self.passes.drain() {
                if meta.vertex_module != vk::ShaderModule::null() {
                    self.device.destroy_shader_module(meta.vertex_module, None);
                }
                if meta.fragment_module != vk::ShaderModule::null() {
                    self.device.destroy_shader_module(meta.fragment_module, None);
                }
                if let Some(pipeline) = meta.compute_pipeline {
                    self.device.destroy_pipeline(pipeline, None);
                }
                if let Some(raster) = meta.raster {
                    self.device.destroy_pipeline(raster.pipeline, None);
                    self.device.destroy_render_pass(raster.render_pass, None);
                }
                self.device.destroy_pipeline_layout(meta.pipeline_layout, None);
                self.device.destroy_descriptor_set_layout(meta.descriptor_set_layout, None);
            }
            for (image, meta) in self.textures.drain() {
                self.device.destroy_image_view(meta.view, None);
                if let Some(memory) = meta.owned_memory {
                    self.device.destroy_image(image, None);
                    self.device.free_memory(memory, None);
                }
            }
            for (buffer, meta) in self.buffers.drain() {
                self.device.unmap_memory(meta.memory);
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(meta.memory, None);
            }

            self.device.destroy_sampler(self.default_sampler, None);
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_fence(self.fence, None);
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.debug_utils.destroy_debug_utils_messenger(self.debug_messenger, None);
            self.instance.destroy_instance(None);
        }
        // entry has no destructor of its own; dropped along with self.
        let _ = &self.entry;
    }
}
