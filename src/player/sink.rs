//! 输出端抽象：音频设备、视频画面、OSD（字幕）以及音频可视化观察者
//!
//! 音频采用拉模式：平台回调线程调用 [`AudioCallback::fill_f32`]，
//! 从环形缓冲区取数据并就地应用音量/静音。

use crate::core::{AudioParams, Result, Subtitle, SubtitleRect, VideoFrame, PixelFormat};
use crate::player::ring_buffer::SampleRingBuffer;
use crossbeam::atomic::AtomicCell;
use log::{debug, info};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 低于这个值的音量视为静音
const SILENT_VOLUME: f32 = 1e-5;

/// 音量与静音状态（UI 写，音频回调读）
pub struct AudioControls {
    volume: AtomicCell<f32>,
    muted: AtomicBool,
}

impl AudioControls {
    pub fn new(volume: f32) -> Self {
        Self {
            volume: AtomicCell::new(volume.clamp(0.0, 1.0)),
            muted: AtomicBool::new(false),
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume.load()
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.store(volume.clamp(0.0, 1.0));
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn toggle_mute(&self) -> bool {
        !self.muted.fetch_xor(true, Ordering::Relaxed)
    }

    /// 实际增益（感知音量 v²），静音时为 None
    fn gain(&self) -> Option<f32> {
        let v = self.volume.load();
        let gain = v * v;
        if self.is_muted() || gain < SILENT_VOLUME {
            None
        } else {
            Some(gain)
        }
    }
}

/// 音频拉模式回调
///
/// 环形缓冲区放在读写锁里：回调线程和音频线程都只拿读锁（SPSC 并发读写），
/// 清空/重建缓冲区时拿写锁，相当于“锁住音频设备”。
#[derive(Clone)]
pub struct AudioCallback {
    ring: Arc<RwLock<Arc<SampleRingBuffer>>>,
    controls: Arc<AudioControls>,
}

impl AudioCallback {
    pub fn new(controls: Arc<AudioControls>) -> Self {
        Self {
            ring: Arc::new(RwLock::new(Arc::new(SampleRingBuffer::new(0)))),
            controls,
        }
    }

    /// 填充设备缓冲区，数据不足的部分为静音
    pub fn fill_f32(&self, out: &mut [f32]) {
        out.fill(0.0);
        let ring = self.ring.read();
        let to_read = ring.available_read().min(out.len());
        if to_read == 0 {
            return;
        }

        match self.controls.gain() {
            None => {
                ring.read(None, to_read);
            }
            Some(gain) => {
                ring.read(Some(&mut out[..to_read]), to_read);
                if (gain - 1.0).abs() > f32::EPSILON {
                    for sample in &mut out[..to_read] {
                        *sample *= gain;
                    }
                }
            }
        }
    }

    /// 字节形式的设备缓冲区（f32 本机字节序）
    pub fn fill_bytes(&self, out: &mut [u8]) {
        match bytemuck::try_cast_slice_mut::<u8, f32>(out) {
            Ok(samples) => self.fill_f32(samples),
            Err(_) => {
                // 未对齐时走临时缓冲
                let mut samples = vec![0.0f32; out.len() / std::mem::size_of::<f32>()];
                self.fill_f32(&mut samples);
                let bytes: &[u8] = bytemuck::cast_slice(&samples);
                out.fill(0);
                out[..bytes.len()].copy_from_slice(bytes);
            }
        }
    }

    pub fn ring(&self) -> Arc<SampleRingBuffer> {
        self.ring.read().clone()
    }

    /// 按设备参数重建缓冲区
    pub fn resize(&self, capacity: usize) {
        *self.ring.write() = Arc::new(SampleRingBuffer::new(capacity));
    }

    pub fn clear(&self) {
        self.ring.write().clear();
    }
}

/// 音频输出设备
pub trait AudioSink: Send {
    /// 打开设备，返回实际参数和设备缓冲区大小（帧）
    fn open(&mut self, wanted: AudioParams, callback: AudioCallback) -> Result<(AudioParams, usize)>;

    fn set_paused(&mut self, paused: bool);

    fn is_playing(&self) -> bool;

    fn close(&mut self);
}

/// 视频画面 + OSD 输出
///
/// 从视频线程调用，实现方自己负责线程安全（通常内部加锁后通知 UI 重绘）。
pub trait VideoSink: Send + Sync {
    fn set_opened(&self, _opened: bool) {}

    fn set_frame(&self, frame: VideoFrame);

    /// 设置字幕层（BGRA，尺寸与视频相同）
    fn set_overlay(&self, overlay: VideoFrame);

    fn remove_overlay(&self);

    fn request_redraw(&self);
}

/// 音频可视化观察者
pub trait AudioObserver: Send + Sync {
    /// 收到刚写入设备缓冲区的数据
    fn buffer_audio(&self, samples: &[f32], latency: f64, sample_rate: u32, channels: u16);

    fn start(&self) {}

    fn stop(&self) {}

    fn clear(&self) {}
}

/// 为每个音频流创建一个新的音频设备
pub type AudioSinkFactory = Arc<dyn Fn() -> Result<Box<dyn AudioSink>> + Send + Sync>;

/// 播放输出集合
#[derive(Clone)]
pub struct Outputs {
    pub audio: AudioSinkFactory,
    pub video: Arc<dyn VideoSink>,
    pub observers: Vec<Arc<dyn AudioObserver>>,
}

/// 把字幕光栅化为 BGRA 叠加层
///
/// 只处理位图矩形（裁剪到画面内）；文本/ASS 只写日志。没有可显示内容时返回 None。
pub fn rasterize_subtitle(sub: &Subtitle, width: u32, height: u32) -> Option<VideoFrame> {
    let (width, height) = if sub.width > 0 && sub.height > 0 {
        (sub.width, sub.height)
    } else {
        (width, height)
    };
    if width == 0 || height == 0 {
        return None;
    }

    let stride = width as usize * 4;
    let mut canvas = vec![0u8; stride * height as usize];
    let mut drawn = false;

    for rect in &sub.rects {
        match rect {
            SubtitleRect::Bitmap {
                x,
                y,
                width: w,
                height: h,
                bgra,
            } => {
                let x0 = (*x).min(width);
                let y0 = (*y).min(height);
                let cw = (*w).min(width - x0) as usize;
                let ch = (*h).min(height - y0) as usize;
                let src_stride = *w as usize * 4;
                for row in 0..ch {
                    let src = row * src_stride;
                    let dst = (y0 as usize + row) * stride + x0 as usize * 4;
                    if src + cw * 4 > bgra.len() {
                        break;
                    }
                    canvas[dst..dst + cw * 4].copy_from_slice(&bgra[src..src + cw * 4]);
                }
                drawn |= cw > 0 && ch > 0;
            }
            SubtitleRect::Text(text) => info!("💬 字幕: {}", text),
            SubtitleRect::Ass(line) => debug!("💬 ASS 字幕: {}", line),
        }
    }

    drawn.then(|| VideoFrame {
        pts: sub.pts,
        duration: 0.0,
        byte_pos: -1,
        width,
        height,
        format: PixelFormat::BGRA,
        data: canvas,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback_with(samples: &[f32], volume: f32) -> AudioCallback {
        let cb = AudioCallback::new(Arc::new(AudioControls::new(volume)));
        cb.resize(16);
        assert!(cb.ring().write(samples));
        cb
    }

    #[test]
    fn test_fill_pads_with_silence() {
        let cb = callback_with(&[0.5, 0.5], 1.0);
        let mut out = [1.0f32; 4];
        cb.fill_f32(&mut out);
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_volume_is_perceptual() {
        let cb = callback_with(&[1.0, -1.0], 0.5);
        let mut out = [0.0f32; 2];
        cb.fill_f32(&mut out);
        assert_eq!(out, [0.25, -0.25]);
    }

    #[test]
    fn test_muted_drops_samples() {
        let controls = Arc::new(AudioControls::new(1.0));
        let cb = AudioCallback::new(controls.clone());
        cb.resize(8);
        assert!(cb.ring().write(&[0.3; 4]));
        assert!(controls.toggle_mute());
        let mut out = [9.0f32; 4];
        cb.fill_f32(&mut out);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(cb.ring().available_read(), 0);
        assert!(!controls.toggle_mute());
    }

    #[test]
    fn test_fill_bytes() {
        let cb = callback_with(&[1.0], 1.0);
        let mut out = vec![0xffu8; 8];
        cb.fill_bytes(&mut out);
        assert_eq!(&out[..4], &1.0f32.to_ne_bytes());
        assert_eq!(&out[4..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_rasterize_clips_bitmap() {
        let sub = Subtitle {
            pts: 1.0,
            start_display_time: 0,
            end_display_time: 1000,
            width: 0,
            height: 0,
            rects: vec![SubtitleRect::Bitmap {
                x: 3,
                y: 1,
                width: 2,
                height: 2,
                bgra: vec![255; 16],
            }],
            uploaded: false,
        };
        let overlay = rasterize_subtitle(&sub, 4, 2).unwrap();
        assert_eq!((overlay.width, overlay.height), (4, 2));
        // 只有 (3,1) 一个像素落在画面内
        let lit = overlay.data.chunks(4).filter(|p| p[0] == 255).count();
        assert_eq!(lit, 1);
        assert_eq!(&overlay.data[(4 + 3) * 4..(4 + 3) * 4 + 4], &[255; 4]);
    }

    #[test]
    fn test_text_only_subtitle_has_no_overlay() {
        let sub = Subtitle {
            pts: 0.0,
            start_display_time: 0,
            end_display_time: 100,
            width: 0,
            height: 0,
            rects: vec![SubtitleRect::Text("hello".into())],
            uploaded: false,
        };
        assert!(rasterize_subtitle(&sub, 16, 16).is_none());
    }
}
