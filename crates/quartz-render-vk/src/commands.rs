//! Command pool and one-time recording of the static draw.

use ash::vk;

use crate::error::{Result, VkOp};

pub(crate) unsafe fn create_command_pool(
    device: &ash::Device,
    graphics_family: u32,
) -> Result<vk::CommandPool> {
    let info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: graphics_family,
        ..Default::default()
    };
    device.create_command_pool(&info, None).op("create_command_pool")
}

/// Allocates one primary buffer per swapchain image and records each once:
/// clear to opaque black, bind the pipeline, draw the three synthesized
/// vertices. The geometry is static, so the buffers replay unmodified
/// every frame.
pub(crate) unsafe fn record_command_buffers(
    device: &ash::Device,
    pool: vk::CommandPool,
    render_pass: vk::RenderPass,
    pipeline: vk::Pipeline,
    framebuffers: &[vk::Framebuffer],
    extent: vk::Extent2D,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: framebuffers.len() as u32,
        ..Default::default()
    };
    let buffers = device
        .allocate_command_buffers(&alloc_info)
        .op("allocate_command_buffers")?;

    let clear = vk::ClearValue {
        color: vk::ClearColorValue {
            float32: [0.0, 0.0, 0.0, 1.0],
        },
    };

    for (i, &cmd) in buffers.iter().enumerate() {
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            ..Default::default()
        };
        device.begin_command_buffer(cmd, &begin).op("begin_command_buffer")?;

        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass,
            framebuffer: framebuffers[i],
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_value_count: 1,
            p_clear_values: &clear,
            ..Default::default()
        };

        device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
        device.cmd_draw(cmd, 3, 1, 0, 0);
        device.cmd_end_render_pass(cmd);

        device.end_command_buffer(cmd).op("end_command_buffer")?;
    }

    Ok(buffers)
}
