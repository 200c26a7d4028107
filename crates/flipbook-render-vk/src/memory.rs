// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use flipbook_render::{DeviceError, RenderError};

/// Lowest memory type index allowed by `type_bits` that has all of `req`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    req: vk::MemoryPropertyFlags,
) -> Result<u32, RenderError> {
    (0..props.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && props.memory_types[i as usize].property_flags.contains(req)
        })
        .ok_or(RenderError::NoMemoryType {
            type_bits,
            flags: req,
        })
}

pub struct Allocation {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl Allocation {
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_buffer(self.buffer, None);
        device.free_memory(self.memory, None);
    }
}

pub unsafe fn create_buffer_and_memory(
    device: &ash::Device,
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    props: vk::MemoryPropertyFlags,
) -> Result<Allocation, RenderError> {
    let bci = vk::BufferCreateInfo {
        s_type: vk::StructureType::BUFFER_CREATE_INFO,
        size,
        usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    };
    let buffer = device
        .create_buffer(&bci, None)
        .map_err(|r| DeviceError::new("create_buffer", r))?;
    let req = device.get_buffer_memory_requirements(buffer);

    let memory = find_memory_type(mem_props, req.memory_type_bits, props).and_then(|ty| {
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: ty,
            ..Default::default()
        };
        device
            .allocate_memory(&mai, None)
            .map_err(|r| DeviceError::new("allocate_memory", r).into())
    });
    let memory = match memory {
        Ok(m) => m,
        Err(e) => {
            device.destroy_buffer(buffer, None);
            return Err(e);
        }
    };
    if let Err(r) = device.bind_buffer_memory(buffer, memory, 0) {
        device.destroy_buffer(buffer, None);
        device.free_memory(memory, None);
        return Err(DeviceError::new("bind_buffer_memory", r).into());
    }
    Ok(Allocation {
        buffer,
        memory,
        size,
    })
}

/// Copy `bytes` into host-visible, coherent memory.
pub unsafe fn write_mapped(
    device: &ash::Device,
    alloc: &Allocation,
    bytes: &[u8],
) -> Result<(), RenderError> {
    let ptr = device
        .map_memory(alloc.memory, 0, alloc.size, vk::MemoryMapFlags::empty())
        .map_err(|r| DeviceError::new("map_memory", r))?;
    let n = bytes.len().min(alloc.size as usize);
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), n);
    device.unmap_memory(alloc.memory);
    Ok(())
}

/// One-shot staging upload into a device-local buffer: host -> staging,
/// then staging -> dst on `queue`. Blocks until the copy finished.
pub unsafe fn upload_via_staging(
    device: &ash::Device,
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    queue: vk::Queue,
    cmd_pool: vk::CommandPool,
    usage: vk::BufferUsageFlags,
    bytes: &[u8],
) -> Result<Allocation, RenderError> {
    let size = bytes.len() as vk::DeviceSize;
    let staging = create_buffer_and_memory(
        device,
        mem_props,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;
    let result = write_mapped(device, &staging, bytes).and_then(|()| {
        let dst = create_buffer_and_memory(
            device,
            mem_props,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        match copy_once(device, queue, cmd_pool, staging.buffer, dst.buffer, size) {
            Ok(()) => Ok(dst),
            Err(e) => {
                dst.destroy(device);
                Err(e)
            }
        }
    });
    staging.destroy(device);
    result
}

unsafe fn copy_once(
    device: &ash::Device,
    queue: vk::Queue,
    cmd_pool: vk::CommandPool,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
) -> Result<(), RenderError> {
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: cmd_pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmd = device
        .allocate_command_buffers(&ai)
        .map_err(|r| DeviceError::new("allocate_command_buffers", r))?[0];

    let record_and_submit = || -> Result<(), DeviceError> {
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        device
            .begin_command_buffer(cmd, &bi)
            .map_err(|r| DeviceError::new("begin_command_buffer", r))?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        device.cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region));
        device
            .end_command_buffer(cmd)
            .map_err(|r| DeviceError::new("end_command_buffer", r))?;

        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        device
            .queue_submit(queue, std::slice::from_ref(&si), vk::Fence::null())
            .map_err(|r| DeviceError::new("queue_submit", r))?;
        device
            .queue_wait_idle(queue)
            .map_err(|r| DeviceError::new("queue_wait_idle", r))
    };
    let result = record_and_submit();
    device.free_command_buffers(cmd_pool, std::slice::from_ref(&cmd));
    Ok(result?)
}
