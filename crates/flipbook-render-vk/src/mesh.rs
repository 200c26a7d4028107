// SPDX-License-Identifier: CEPL-1.0
//! Indexed geometry uploaded once, plus one uniform buffer and descriptor set
//! per chain image.

use std::time::Instant;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use flipbook_render::{DeviceError, FrameBindings, RenderError, ResourceLoader};
use glam::{Mat4, Vec3};
use tracing::debug;

use crate::device::AshDevice;
use crate::memory::{self, Allocation};
use crate::pipeline::Vertex;

/// Two quads, one behind the other.
pub const QUADS_VERTS: &[Vertex] = &[
    Vertex { pos: [-0.5, -0.5, 0.0], color: [1.0, 0.0, 0.0] },
    Vertex { pos: [0.5, -0.5, 0.0], color: [0.0, 1.0, 0.0] },
    Vertex { pos: [0.5, 0.5, 0.0], color: [0.0, 0.0, 1.0] },
    Vertex { pos: [-0.5, 0.5, 0.0], color: [1.0, 1.0, 1.0] },
    Vertex { pos: [-0.5, -0.5, -0.5], color: [1.0, 0.0, 0.0] },
    Vertex { pos: [0.5, -0.5, -0.5], color: [0.0, 1.0, 0.0] },
    Vertex { pos: [0.5, 0.5, -0.5], color: [0.0, 0.0, 1.0] },
    Vertex { pos: [-0.5, 0.5, -0.5], color: [1.0, 1.0, 1.0] },
];
pub const QUADS_IDXS: &[u32] = &[0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4];

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct TransformUbo {
    pub mvp: [[f32; 4]; 4],
}

/// 90 degrees per second about +Z, seen from (2, 2, 2), 45 degree FOV.
/// Y is flipped for Vulkan clip space.
pub fn spin_mvp(seconds: f32, extent: vk::Extent2D) -> Mat4 {
    let model = Mat4::from_rotation_z(seconds * std::f32::consts::FRAC_PI_2);
    let view = Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z);
    let aspect = extent.width as f32 / extent.height.max(1) as f32;
    let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
    proj.y_axis.y *= -1.0;
    proj * view * model
}

pub struct MeshResources {
    vertices: Option<Allocation>,
    indices: Option<Allocation>,
    index_count: u32,
    uniforms: Vec<Allocation>,
    desc_pool: vk::DescriptorPool,
    desc_sets: Vec<vk::DescriptorSet>,
    start: Instant,
}

impl MeshResources {
    pub fn new(device: &AshDevice, verts: &[Vertex], idxs: &[u32]) -> Result<Self, RenderError> {
        let mut res = MeshResources {
            vertices: None,
            indices: None,
            index_count: 0,
            uniforms: Vec::new(),
            desc_pool: vk::DescriptorPool::null(),
            desc_sets: Vec::new(),
            start: Instant::now(),
        };
        if verts.is_empty() || idxs.is_empty() {
            return Ok(res);
        }
        let d = device.raw();
        unsafe {
            let vertices = memory::upload_via_staging(
                d,
                device.memory_properties(),
                device.queue(),
                device.command_pool(),
                vk::BufferUsageFlags::VERTEX_BUFFER,
                bytemuck::cast_slice(verts),
            )?;
            res.vertices = Some(vertices);
            let indices = memory::upload_via_staging(
                d,
                device.memory_properties(),
                device.queue(),
                device.command_pool(),
                vk::BufferUsageFlags::INDEX_BUFFER,
                bytemuck::cast_slice(idxs),
            );
            match indices {
                Ok(a) => res.indices = Some(a),
                Err(e) => {
                    res.destroy_geometry(d);
                    return Err(e);
                }
            }
        }
        res.index_count = idxs.len() as u32;
        debug!("mesh uploaded: {} vertices, {} indices", verts.len(), idxs.len());
        Ok(res)
    }

    pub fn quads(device: &AshDevice) -> Result<Self, RenderError> {
        Self::new(device, QUADS_VERTS, QUADS_IDXS)
    }

    unsafe fn destroy_per_image(&mut self, d: &ash::Device) {
        // Sets go with the pool.
        self.desc_sets.clear();
        if self.desc_pool != vk::DescriptorPool::null() {
            d.destroy_descriptor_pool(self.desc_pool, None);
            self.desc_pool = vk::DescriptorPool::null();
        }
        for u in self.uniforms.drain(..) {
            u.destroy(d);
        }
    }

    unsafe fn destroy_geometry(&mut self, d: &ash::Device) {
        if let Some(v) = self.vertices.take() {
            v.destroy(d);
        }
        if let Some(i) = self.indices.take() {
            i.destroy(d);
        }
        self.index_count = 0;
    }

    unsafe fn create_per_image(
        &mut self,
        device: &AshDevice,
        image_count: usize,
    ) -> Result<(), RenderError> {
        let d = device.raw();
        let ubo_size = std::mem::size_of::<TransformUbo>() as vk::DeviceSize;

        for _ in 0..image_count {
            self.uniforms.push(memory::create_buffer_and_memory(
                d,
                device.memory_properties(),
                ubo_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?);
        }

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: image_count as u32,
        }];
        let pool_ci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: image_count as u32,
            pool_size_count: pool_sizes.len() as u32,
            p_pool_sizes: pool_sizes.as_ptr(),
            ..Default::default()
        };
        self.desc_pool = d
            .create_descriptor_pool(&pool_ci, None)
            .map_err(|r| DeviceError::new("create_descriptor_pool", r))?;

        let layouts = vec![device.uniform_set_layout(); image_count];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.desc_pool,
            descriptor_set_count: image_count as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        self.desc_sets = d
            .allocate_descriptor_sets(&alloc)
            .map_err(|r| DeviceError::new("allocate_descriptor_sets", r))?;

        let infos: Vec<vk::DescriptorBufferInfo> = self
            .uniforms
            .iter()
            .map(|u| vk::DescriptorBufferInfo {
                buffer: u.buffer,
                offset: 0,
                range: ubo_size,
            })
            .collect();
        let writes: Vec<vk::WriteDescriptorSet> = self
            .desc_sets
            .iter()
            .zip(&infos)
            .map(|(&set, info)| vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_set: set,
                dst_binding: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                p_buffer_info: info,
                ..Default::default()
            })
            .collect();
        d.update_descriptor_sets(&writes, &[]);
        Ok(())
    }
}

impl ResourceLoader<AshDevice> for MeshResources {
    fn resize(&mut self, device: &mut AshDevice, image_count: usize) -> Result<(), RenderError> {
        unsafe {
            self.destroy_per_image(device.raw());
            if self.index_count == 0 || image_count == 0 {
                return Ok(());
            }
            if let Err(e) = self.create_per_image(device, image_count) {
                self.destroy_per_image(device.raw());
                return Err(e);
            }
        }
        Ok(())
    }

    fn update(
        &mut self,
        device: &mut AshDevice,
        image_index: usize,
        extent: vk::Extent2D,
    ) -> Result<(), RenderError> {
        let Some(ubo) = self.uniforms.get(image_index) else {
            return Ok(());
        };
        let t = self.start.elapsed().as_secs_f32();
        let data = TransformUbo {
            mvp: spin_mvp(t, extent).to_cols_array_2d(),
        };
        unsafe { memory::write_mapped(device.raw(), ubo, bytemuck::bytes_of(&data)) }
    }

    fn bindings(&self, image_index: usize) -> FrameBindings {
        match (&self.vertices, &self.indices, self.desc_sets.get(image_index)) {
            (Some(v), Some(i), Some(&set)) => FrameBindings {
                descriptor_set: set,
                vertex_buffer: v.buffer,
                index_buffer: i.buffer,
                index_count: self.index_count,
            },
            _ => FrameBindings::default(),
        }
    }

    fn release(&mut self, device: &mut AshDevice) {
        unsafe {
            let d = device.raw();
            self.destroy_per_image(d);
            self.destroy_geometry(d);
        }
    }
}
