//! Baked atlas on the GPU.

use octahedral::bake::{AddressMode, FilterMode};
use octahedral::{AtlasLayout, AtlasTexture, SamplerDesc};

pub const ATLAS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

pub struct GpuAtlas {
    _texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    /// `None` for the placeholder atlas.
    pub layout: Option<AtlasLayout>,
}

fn address_mode(m: AddressMode) -> wgpu::AddressMode {
    match m {
        AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
    }
}

fn filter_mode(m: FilterMode) -> wgpu::FilterMode {
    match m {
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

fn create_sampler(device: &wgpu::Device, desc: &SamplerDesc) -> wgpu::Sampler {
    let address = address_mode(desc.address_mode);
    let filter = filter_mode(desc.filter);
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("Atlas Sampler"),
        address_mode_u: address,
        address_mode_v: address,
        address_mode_w: address,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: if desc.mipmaps {
            filter
        } else {
            wgpu::FilterMode::Nearest
        },
        ..Default::default()
    })
}

impl GpuAtlas {
    pub fn upload(device: &wgpu::Device, queue: &wgpu::Queue, atlas: &AtlasTexture) -> Self {
        let (width, height) = atlas.image.dimensions();
        let texture = Self::write(device, queue, "Impostor Atlas", width, height, atlas.image.as_raw());
        Self {
            view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
            sampler: create_sampler(device, &atlas.sampler),
            layout: Some(atlas.layout),
            _texture: texture,
        }
    }

    /// 1×1 transparent atlas bound while a bake is still pending.
    pub fn placeholder(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let texture = Self::write(device, queue, "Placeholder Atlas", 1, 1, &[0; 4]);
        Self {
            view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
            sampler: create_sampler(device, &SamplerDesc::ATLAS),
            layout: None,
            _texture: texture,
        }
    }

    fn write(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        label: &str,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> wgpu::Texture {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: ATLAS_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            size,
        );
        texture
    }
}
