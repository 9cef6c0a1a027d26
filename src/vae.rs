//! Tiled VAE decoding for Mochi latents
//!
//! The Mochi VAE decodes a `[B, C, T, H, W]` latent tensor into video frames
//! at 8x spatial upscale. Decoding the whole tensor at once is memory-bound,
//! so this module can split the latents into overlapping spatial tiles and
//! temporal frame batches, decode each independently, and reassemble the
//! pieces with a linear cross-fade along tile seams:
//!
//! - [`TileGeometry`] derives tile sizes, strides and blend extents from the
//!   latent resolution and a [`DecodeConfig`].
//! - [`blend_v`]/[`blend_h`] cross-fade the shared border of two decoded
//!   tiles. They are pure functions returning a new tensor; a decoded tile
//!   is never mutated once produced.
//! - [`decode_latents`] is the entry point: it moves the decoder network to
//!   the compute device, picks the tiled or whole-tensor path, guarantees
//!   the network is offloaded again on every exit path, and normalizes the
//!   output to `[T*B, H, W, C]` frames in `[0, 1]`.
//!
//! The decoder network itself is opaque: anything implementing
//! [`VaeDecoder`] (tensor in, tensor out, movable between devices). Peak
//! memory of the tiled path scales with tile size times frame batch, at the
//! cost of one decoder invocation per (row, column, frame batch) triple.
//!
//! Callers must not run `decode_latents` concurrently on the same decoder
//! instance; the device moves are not synchronized internally.

use candle_core::{DType, Device, IndexOp, Result, Tensor, bail};
use tracing::debug;

use crate::config::{DecodeConfig, VAE_SPATIAL_SCALE};

/// Opaque VAE decoder network.
///
/// Maps a `[B, C, T, H, W]` latent tile to a decoded tile at
/// [`VAE_SPATIAL_SCALE`]x spatial resolution, and can be moved between
/// devices so the orchestrator can offload it when idle.
pub trait VaeDecoder {
    /// Decode a latent tile into sample space.
    fn decode(&self, latents: &Tensor) -> Result<Tensor>;

    /// Move the decoder weights to the given device.
    fn to_device(&mut self, device: &Device) -> Result<()>;
}

/// Tile geometry derived once per decode call.
///
/// All latent-space quantities are in latent pixels, all sample-space
/// quantities in decoded pixels. `overlap_*` is the stride between
/// successive tile origins in latent space; `blend_extent_*` the width of
/// the decoded cross-fade band; `row_limit_*` the non-blended portion of a
/// decoded tile kept after trimming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGeometry {
    pub tile_latent_min_height: usize,
    pub tile_latent_min_width: usize,
    pub overlap_height: usize,
    pub overlap_width: usize,
    pub blend_extent_height: usize,
    pub blend_extent_width: usize,
    pub row_limit_height: usize,
    pub row_limit_width: usize,
}

impl TileGeometry {
    /// Compute the geometry for a latent of the given spatial extent.
    ///
    /// In auto mode the overlap factors are fixed at 1/6 (height) and 1/5
    /// (width) and tiles default to half the decoded resolution per axis;
    /// the explicit tile/overlap configuration is ignored.
    pub fn plan(latent_height: usize, latent_width: usize, config: &DecodeConfig) -> Self {
        let (overlap_factor_height, overlap_factor_width) = if config.auto_tile_size {
            (1.0 / 6.0, 1.0 / 5.0)
        } else {
            (
                config.tile_overlap_factor_height,
                config.tile_overlap_factor_width,
            )
        };
        let (tile_sample_min_height, tile_sample_min_width) = if config.auto_tile_size {
            (
                (latent_height / 2) * VAE_SPATIAL_SCALE,
                (latent_width / 2) * VAE_SPATIAL_SCALE,
            )
        } else {
            (config.tile_sample_min_height, config.tile_sample_min_width)
        };

        let tile_latent_min_height = tile_sample_min_height / VAE_SPATIAL_SCALE;
        let tile_latent_min_width = tile_sample_min_width / VAE_SPATIAL_SCALE;

        let overlap_height =
            (tile_latent_min_height as f64 * (1.0 - overlap_factor_height)) as usize;
        let overlap_width = (tile_latent_min_width as f64 * (1.0 - overlap_factor_width)) as usize;

        let blend_extent_height = (tile_sample_min_height as f64 * overlap_factor_height) as usize;
        let blend_extent_width = (tile_sample_min_width as f64 * overlap_factor_width) as usize;

        let row_limit_height = tile_sample_min_height - blend_extent_height;
        let row_limit_width = tile_sample_min_width - blend_extent_width;

        Self {
            tile_latent_min_height,
            tile_latent_min_width,
            overlap_height,
            overlap_width,
            blend_extent_height,
            blend_extent_width,
            row_limit_height,
            row_limit_width,
        }
    }
}

/// Partition `num_frames` latent frames into `(start, end)` batches.
///
/// The remainder `num_frames % frame_batch_size` is absorbed by batch 0,
/// which is the only batch that may be larger; every later batch shifts
/// uniformly by the remainder. When `num_frames < frame_batch_size` no
/// batch is produced; the caller treats that as an error.
pub fn frame_ranges(num_frames: usize, frame_batch_size: usize) -> Vec<(usize, usize)> {
    let remainder = num_frames % frame_batch_size;
    (0..num_frames / frame_batch_size)
        .map(|k| {
            let start = frame_batch_size * k + if k == 0 { 0 } else { remainder };
            let end = frame_batch_size * (k + 1) + remainder;
            (start, end)
        })
        .collect()
}

fn cat_dim(xs: &[Tensor], dim: usize) -> Result<Tensor> {
    let refs: Vec<&Tensor> = xs.iter().collect();
    Tensor::cat(&refs, dim)
}

/// Linear ramp of `blend` weights 0/blend .. (blend-1)/blend, shaped to
/// broadcast along the given axis of a 5-D tensor.
fn blend_weights(blend: usize, axis: usize, like: &Tensor) -> Result<(Tensor, Tensor)> {
    let w = Tensor::arange(0u32, blend as u32, like.device())?
        .to_dtype(DType::F32)?
        .affine(1.0 / blend as f64, 0.0)?;
    let mut shape = [1usize; 5];
    shape[axis] = blend;
    let w = w.reshape(&shape[..])?.to_dtype(like.dtype())?;
    let one_minus = w.neg()?.affine(1.0, 1.0)?;
    Ok((w, one_minus))
}

/// Cross-fade the top rows of `tile` against the bottom rows of `above`.
///
/// For offset `y` in `[0, extent)` the result row is
/// `above[-extent + y] * (1 - y/extent) + tile[y] * (y/extent)`; the extent
/// clamps to the height of both tiles. Returns a new tensor, leaving both
/// inputs untouched.
pub fn blend_v(above: &Tensor, tile: &Tensor, blend_extent: usize) -> Result<Tensor> {
    let blend = blend_extent.min(above.dim(3)?).min(tile.dim(3)?);
    if blend == 0 {
        return Ok(tile.clone());
    }
    let (w, one_minus) = blend_weights(blend, 3, tile)?;

    let head = tile.i((.., .., .., 0..blend, ..))?;
    let tail = tile.i((.., .., .., blend.., ..))?;

    let above_height = above.dim(3)?;
    let above_tail = above.i((.., .., .., (above_height - blend)..above_height, ..))?;

    let mixed = above_tail
        .broadcast_mul(&one_minus)?
        .add(&head.broadcast_mul(&w)?)?;
    Tensor::cat(&[&mixed, &tail], 3)
}

/// Cross-fade the left columns of `tile` against the right columns of
/// `left`. Symmetric to [`blend_v`] along the width axis.
pub fn blend_h(left: &Tensor, tile: &Tensor, blend_extent: usize) -> Result<Tensor> {
    let blend = blend_extent.min(left.dim(4)?).min(tile.dim(4)?);
    if blend == 0 {
        return Ok(tile.clone());
    }
    let (w, one_minus) = blend_weights(blend, 4, tile)?;

    let head = tile.i((.., .., .., .., 0..blend))?;
    let tail = tile.i((.., .., .., .., blend..))?;

    let left_width = left.dim(4)?;
    let left_tail = left.i((.., .., .., .., (left_width - blend)..left_width))?;

    let mixed = left_tail
        .broadcast_mul(&one_minus)?
        .add(&head.broadcast_mul(&w)?)?;
    Tensor::cat(&[&mixed, &tail], 4)
}

/// Decode one spatial tile: slice each frame batch, run the decoder, and
/// concatenate the decoded batches along time.
fn decode_tile(
    vae: &dyn VaeDecoder,
    latents: &Tensor,
    row_start: usize,
    row_end: usize,
    col_start: usize,
    col_end: usize,
    ranges: &[(usize, usize)],
) -> Result<Tensor> {
    let mut batches = Vec::with_capacity(ranges.len());
    for &(start, end) in ranges {
        let tile = latents.i((.., .., start..end, row_start..row_end, col_start..col_end))?;
        batches.push(vae.decode(&tile)?);
    }
    cat_dim(&batches, 2)
}

/// Split the latents into overlapping tiles, decode them separately, and
/// reassemble with cross-faded seams.
fn tiled_decode(vae: &dyn VaeDecoder, latents: &Tensor, config: &DecodeConfig) -> Result<Tensor> {
    let (_batch, _channels, num_frames, height, width) = latents.dims5()?;

    let geometry = TileGeometry::plan(height, width, config);
    if geometry.tile_latent_min_height == 0 || geometry.tile_latent_min_width == 0 {
        bail!(
            "tile size collapses to zero for latent {}x{}; disable tiling or use explicit tile sizes",
            height,
            width
        );
    }
    if geometry.overlap_height == 0 || geometry.overlap_width == 0 {
        bail!("tile overlap factors leave no stride between tiles");
    }

    let ranges = frame_ranges(num_frames, config.frame_batch_size);
    if ranges.is_empty() {
        bail!(
            "frame_batch_size ({}) exceeds the latent frame count ({})",
            config.frame_batch_size,
            num_frames
        );
    }

    let mut rows: Vec<Vec<Tensor>> = Vec::new();
    for i in (0..height).step_by(geometry.overlap_height) {
        let row_end = (i + geometry.tile_latent_min_height).min(height);
        let mut row: Vec<Tensor> = Vec::new();
        for j in (0..width).step_by(geometry.overlap_width) {
            let col_end = (j + geometry.tile_latent_min_width).min(width);
            row.push(decode_tile(vae, latents, i, row_end, j, col_end, &ranges)?);
        }
        debug!(row = i, tiles = row.len(), "decoded tile row");
        rows.push(row);
    }

    // Row-major reassembly. The vertical pass reads the original decoded
    // tile of the row above, never a blended one, so interpolation error
    // does not compound across rows; the horizontal pass chains against the
    // current row's already-blended left neighbor.
    let mut result_rows: Vec<Tensor> = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let mut blended_row: Vec<Tensor> = Vec::with_capacity(row.len());
        let mut result_row: Vec<Tensor> = Vec::with_capacity(row.len());
        for (j, tile) in row.iter().enumerate() {
            let mut tile = tile.clone();
            if i > 0 {
                tile = blend_v(&rows[i - 1][j], &tile, geometry.blend_extent_height)?;
            }
            if j > 0 {
                tile = blend_h(&blended_row[j - 1], &tile, geometry.blend_extent_width)?;
            }
            blended_row.push(tile.clone());

            let keep_height = geometry.row_limit_height.min(tile.dim(3)?);
            let keep_width = geometry.row_limit_width.min(tile.dim(4)?);
            result_row.push(tile.i((.., .., .., 0..keep_height, 0..keep_width))?);
        }
        result_rows.push(cat_dim(&result_row, 4)?);
    }

    let decoded = cat_dim(&result_rows, 3)?;

    // Trimming keeps row_limit pixels per tile but the stride only advances
    // overlap * 8, so the concatenation can run a few pixels long; crop to
    // the exact sample resolution.
    let sample_height = height * VAE_SPATIAL_SCALE;
    let sample_width = width * VAE_SPATIAL_SCALE;
    decoded.i((.., .., .., 0..sample_height, 0..sample_width))
}

/// Rescale decoder output from `[-1, 1]` to `[0, 1]`, clamp, and rearrange
/// `[B, C, T, H, W]` into frame-major `[T*B, H, W, C]`.
fn postprocess(decoded: &Tensor) -> Result<Tensor> {
    let (batch, channels, frames, height, width) = decoded.dims5()?;
    let frames_01 = decoded
        .to_dtype(DType::F32)?
        .affine(0.5, 0.5)?
        .clamp(0.0f32, 1.0f32)?;
    frames_01
        .permute((2, 0, 3, 4, 1))?
        .contiguous()?
        .reshape((frames * batch, height, width, channels))
}

/// Decode a `[B, C, T, H, W]` latent tensor into `[T*B, H, W, C]` frames in
/// `[0, 1]`.
///
/// Moves the decoder network to `device` for the duration of the call and
/// back to `offload_device` afterwards. The offload is attempted on the
/// error path too; when decoding itself failed, that error wins over any
/// secondary offload failure.
pub fn decode_latents(
    vae: &mut dyn VaeDecoder,
    latents: &Tensor,
    config: &DecodeConfig,
    device: &Device,
    offload_device: &Device,
) -> Result<Tensor> {
    latents.dims5()?;
    if config.enable_tiling && config.frame_batch_size == 0 {
        bail!("frame_batch_size must be at least 1");
    }

    vae.to_device(device)?;
    let latents = latents.to_device(device)?;

    let decoded = if config.enable_tiling {
        tiled_decode(vae, &latents, config)
    } else {
        vae.decode(&latents)
    };

    let offload = vae.to_device(offload_device);
    let decoded = decoded?;
    offload?;

    postprocess(&decoded)
}
