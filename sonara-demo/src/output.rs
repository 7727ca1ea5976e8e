use anyhow::{Context as _, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use sonara_core::{EnableFlag, SonaraContext, SonaraContextDesc, Vec3};
use std::f32::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

const SAMPLE_RATE: u32 = 48_000;
const BLOCK: usize = 512;
const CHANNELS: u16 = 2;

/// Fills an interleaved stereo buffer, returning the number of frames written.
pub type FillCallback = dyn FnMut(&mut [f32]) -> usize + Send;

/// Renders a tone orbiting the listener, one context block at a time.
///
/// The device may ask for any number of frames, so whole blocks are rendered
/// into `pending` and handed out as requested.
struct OrbitRenderer {
    context: SonaraContext,
    input: Vec<f32>,
    pending: Vec<f32>,
    cursor: usize,
    phase: f32,
    angle: f32,
}

impl OrbitRenderer {
    fn new() -> Result<Self> {
        let desc = SonaraContextDesc::new()
            .max_sources(1)
            .sample_rate(SAMPLE_RATE)
            .buffer_length(BLOCK);
        let mut context = SonaraContext::new(desc)?;
        context.set_enabled(EnableFlag::SimpleRoomModeling, true);
        context.set_enabled(EnableFlag::LateReverberation, true);
        context.set_source_reverb_send(0, 0.5)?;
        Ok(Self {
            context,
            input: vec![0.0; BLOCK],
            pending: vec![0.0; 2 * BLOCK],
            cursor: 2 * BLOCK,
            phase: 0.0,
            angle: 0.0,
        })
    }

    fn render_block(&mut self) -> Result<()> {
        // One revolution every four seconds, two metres out
        self.angle += TAU * BLOCK as f32 / (4.0 * SAMPLE_RATE as f32);
        let position = Vec3::new(2.0 * self.angle.sin(), 0.0, -2.0 * self.angle.cos());
        self.context.set_source_position(0, position)?;

        let step = TAU * 440.0 / SAMPLE_RATE as f32;
        for x in &mut self.input {
            *x = 0.3 * self.phase.sin();
            self.phase = (self.phase + step) % TAU;
        }

        self.context
            .spatialize_mono_interleaved(0, &self.input, &mut self.pending)?;
        self.context
            .mix_in_shared_reverb_interleaved(&mut self.pending)?;
        self.cursor = 0;
        Ok(())
    }

    fn fill(&mut self, buffer: &mut [f32]) -> usize {
        let mut written = 0;
        while written < buffer.len() {
            if self.cursor >= self.pending.len() {
                if let Err(e) = self.render_block() {
                    log::error!("Render failed: {}", e);
                    buffer[written..].fill(0.0);
                    break;
                }
            }
            let n = (buffer.len() - written).min(self.pending.len() - self.cursor);
            buffer[written..written + n].copy_from_slice(&self.pending[self.cursor..self.cursor + n]);
            written += n;
            self.cursor += n;
        }
        written / CHANNELS as usize
    }
}

/// Output stream on the default device, driven by a fill callback.
pub struct OutputStream {
    stream: Option<cpal::Stream>,
    is_running: Arc<AtomicBool>,
    frames_processed: Arc<AtomicUsize>,
}

impl OutputStream {
    pub fn start(fill_callback: Box<FillCallback>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device available"))?;

        let config = cpal::StreamConfig {
            channels: CHANNELS,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };
        let default_config = device
            .default_output_config()
            .context("Failed to get default config")?;

        let is_running = Arc::new(AtomicBool::new(true));
        let frames_processed = Arc::new(AtomicUsize::new(0));
        let shared = (is_running.clone(), frames_processed.clone());

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => create_stream::<f32>(&device, &config, fill_callback, shared)?,
            cpal::SampleFormat::I16 => create_stream::<i16>(&device, &config, fill_callback, shared)?,
            cpal::SampleFormat::U16 => create_stream::<u16>(&device, &config, fill_callback, shared)?,
            other => return Err(anyhow!("Unsupported sample format {:?}", other)),
        };
        stream.play().context("Failed to start stream")?;

        log::info!(
            "Output stream started on {}",
            device.name().unwrap_or_else(|_| "unknown device".into())
        );
        Ok(Self {
            stream: Some(stream),
            is_running,
            frames_processed,
        })
    }

    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.is_running.store(false, Ordering::Relaxed);
            drop(stream);
        }
    }

    pub fn frames_processed(&self) -> usize {
        self.frames_processed.load(Ordering::Relaxed)
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn create_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut fill_callback: Box<FillCallback>,
    (is_running, frames_processed): (Arc<AtomicBool>, Arc<AtomicUsize>),
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let mut temp_buffer = Vec::<f32>::new();
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if !is_running.load(Ordering::Relaxed) {
                    for sample in data.iter_mut() {
                        *sample = T::from_sample(0.0f32);
                    }
                    return;
                }

                temp_buffer.resize(data.len(), 0.0);
                let frames_filled = fill_callback(&mut temp_buffer);
                for (sample, value) in data.iter_mut().zip(&temp_buffer) {
                    *sample = T::from_sample(*value);
                }
                frames_processed.fetch_add(frames_filled, Ordering::Relaxed);
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .context("Failed to build stream")?;
    Ok(stream)
}

/// Plays a tone orbiting the listener for `seconds`.
pub fn play_orbit(seconds: u64) -> Result<()> {
    let mut renderer = OrbitRenderer::new()?;
    let mut stream = OutputStream::start(Box::new(move |buffer| renderer.fill(buffer)))?;
    std::thread::sleep(Duration::from_secs(seconds));
    stream.stop();
    log::info!("Played {} frames", stream.frames_processed());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renderer_fills_odd_sizes() {
        let mut renderer = OrbitRenderer::new().unwrap();
        let mut buffer = vec![0.0f32; 2 * 300];
        assert_eq!(renderer.fill(&mut buffer), 300);
        let mut larger = vec![0.0f32; 2 * 1000];
        assert_eq!(renderer.fill(&mut larger), 1000);
        assert!(larger.iter().any(|s| *s != 0.0));
    }
}
