//! FFmpeg 后端（feature = "ffmpeg"）
//!
//! 本地文件和网络流都通过 libavformat 打开，解码使用 libavcodec，
//! 视频统一转换为 RGBA，音频统一转换为交错 f32，再由 [`SwrResampler`] 转成设备格式。
//! 打开和读包都挂着中断回调，关闭时阻塞在网络上的调用会立即返回。

use crate::core::{
    AudioFrame, AudioParams, Chapter, CompressedUnit, DecodedUnit, MediaSource, MediaType,
    PixelFormat, PlayerError, Result, StreamInfo, Subtitle, SubtitleRect, VideoFrame,
};
use crate::player::decoder::Decoder;
use crate::player::demuxer_source::{Demuxer, MediaBackend, SeekFlags};
use crate::player::log_ctx;
use crate::player::resample::Resampler;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, media, software, util};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::ffi::{c_int, c_void, CString};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 队列里流转的 FFmpeg 包
struct FfmpegPacket(ffmpeg::Packet);

fn rational_to_f64(r: util::rational::Rational) -> f64 {
    if r.denominator() == 0 {
        0.0
    } else {
        r.numerator() as f64 / r.denominator() as f64
    }
}

fn network_options(url: &str) -> ffmpeg::Dictionary<'static> {
    let mut options = ffmpeg::Dictionary::new();
    options.set("fflags", "+discardcorrupt+genpts");
    options.set("analyzeduration", "5000000");
    options.set("probesize", "10000000");
    options.set("timeout", "15000000");
    options.set("buffer_size", "8388608");
    options.set("rw_timeout", "8000000");
    options.set("reconnect", "1");
    options.set("reconnect_streamed", "1");
    options.set("reconnect_delay_max", "4");
    if url.contains(".m3u8") {
        info!("{} 🎬 HLS 流检测，应用 HLS 选项", log_ctx());
        options.set("live_start_index", "-1");
        options.set("max_reload", "10");
        options.set("http_persistent", "1");
    }
    options
}

/// libavformat 阻塞调用里轮询的中断回调，opaque 指向 abort 标志
unsafe extern "C" fn interrupt_callback(opaque: *mut c_void) -> c_int {
    if opaque.is_null() {
        return 0;
    }
    let abort = &*(opaque as *const AtomicBool);
    c_int::from(abort.load(Ordering::Acquire))
}

/// 打开输入并挂上中断回调
///
/// 回调持有 `abort` 的裸指针，返回的 Input 必须先于 `abort` 释放。
fn open_input(
    url: &str,
    options: Option<ffmpeg::Dictionary<'static>>,
    abort: &Arc<AtomicBool>,
) -> Result<format::context::Input> {
    let path = CString::new(url).map_err(|_| PlayerError::OpenError(format!("无效的地址: {}", url)))?;

    // SAFETY: 与 ffmpeg-next 的 input_with_dictionary 相同的调用顺序，
    // 只是在 avformat_open_input 之前设置了 interrupt_callback
    unsafe {
        let mut ps = ffmpeg::ffi::avformat_alloc_context();
        if ps.is_null() {
            return Err(PlayerError::OpenError("无法分配格式上下文".into()));
        }
        (*ps).interrupt_callback = ffmpeg::ffi::AVIOInterruptCB {
            callback: Some(interrupt_callback),
            opaque: Arc::as_ptr(abort) as *mut c_void,
        };

        let mut opts = options.map_or(ptr::null_mut(), |o| o.disown());
        let ret = ffmpeg::ffi::avformat_open_input(&mut ps, path.as_ptr(), ptr::null_mut(), &mut opts);
        drop(ffmpeg::Dictionary::own(opts));
        if ret < 0 {
            // 失败时 avformat_open_input 已经释放了 ps
            return Err(if abort.load(Ordering::Acquire) {
                PlayerError::Interrupted
            } else {
                PlayerError::OpenError(ffmpeg::Error::from(ret).to_string())
            });
        }

        let ret = ffmpeg::ffi::avformat_find_stream_info(ps, ptr::null_mut());
        if ret < 0 {
            ffmpeg::ffi::avformat_close_input(&mut ps);
            return Err(PlayerError::OpenError(format!("无法读取流信息: {}", ffmpeg::Error::from(ret))));
        }
        Ok(format::context::Input::wrap(ps))
    }
}

/// FFmpeg Demuxer
///
/// `input` 的中断回调引用 `abort`，字段顺序保证 `input` 先释放。
pub struct FfmpegDemuxer {
    input: format::context::Input,
    url: String,
    streams: Vec<StreamInfo>,
    chapters: Vec<Chapter>,
    abort: Arc<AtomicBool>,
    last_byte_pos: i64,
    realtime: bool,
    ts_discontinuous: bool,
}

// Input 只在 Demuxer 线程里使用
unsafe impl Send for FfmpegDemuxer {}

impl FfmpegDemuxer {
    fn open(url: &str, is_network: bool, abort: Arc<AtomicBool>) -> Result<(Self, HashMap<i32, codec::Parameters>)> {
        let options = if is_network {
            info!("{} 🌐 检测到网络流，应用网络选项", log_ctx());
            Some(network_options(url))
        } else {
            None
        };
        let input = open_input(url, options, &abort)?;

        let mut streams = Vec::new();
        let mut parameters = HashMap::new();
        for stream in input.streams() {
            let index = stream.index() as i32;
            let params = stream.parameters();
            let media_type = match params.medium() {
                media::Type::Video => MediaType::Video,
                media::Type::Audio => MediaType::Audio,
                media::Type::Subtitle => MediaType::Subtitle,
                _ => MediaType::Data,
            };

            let mut st = StreamInfo::new(index, media_type, params.id().name());
            st.time_base = rational_to_f64(stream.time_base());
            if stream.start_time() != ffmpeg::ffi::AV_NOPTS_VALUE {
                st.start_time = stream.start_time() as f64 * st.time_base;
            }
            if stream.duration() > 0 {
                st.duration = stream.duration() as f64 * st.time_base;
            }
            st.frame_rate = rational_to_f64(stream.avg_frame_rate());
            st.attached_pic = stream
                .disposition()
                .contains(format::stream::Disposition::ATTACHED_PIC);

            // SAFETY: codecpar 在 Input 存活期间有效
            unsafe {
                let par = params.as_ptr();
                st.width = (*par).width.max(0) as u32;
                st.height = (*par).height.max(0) as u32;
                st.sample_rate = (*par).sample_rate.max(0) as u32;
                st.channels = (*par).ch_layout.nb_channels.max(0) as u16;
            }

            streams.push(st);
            parameters.insert(index, params);
        }

        // 节目：流属于哪个节目（切换流时限制在同一节目内）
        // SAFETY: programs 数组由 libavformat 维护
        unsafe {
            let ctx = input.as_ptr();
            for p in 0..(*ctx).nb_programs as usize {
                let program = *(*ctx).programs.add(p);
                for s in 0..(*program).nb_stream_indexes as usize {
                    let index = *(*program).stream_index.add(s) as usize;
                    if let Some(st) = streams.get_mut(index) {
                        st.program = Some((*program).id as u32);
                    }
                }
            }
        }

        let chapters = input
            .chapters()
            .map(|c| {
                let tb = rational_to_f64(c.time_base());
                Chapter {
                    start: c.start() as f64 * tb,
                    end: c.end() as f64 * tb,
                }
            })
            .collect();

        let format_name = input.format().name().to_string();
        let ts_discontinuous = input.format().flags().contains(format::Flags::TS_DISCONT);
        let realtime = matches!(format_name.as_str(), "rtp" | "rtsp" | "sdp")
            || url.starts_with("rtp:")
            || url.starts_with("udp:");

        debug!(
            "{} 格式: {}, 时间戳不连续: {}, 实时: {}",
            log_ctx(),
            format_name,
            ts_discontinuous,
            realtime
        );

        Ok((
            Self {
                input,
                url: url.to_string(),
                streams,
                chapters,
                abort,
                last_byte_pos: -1,
                realtime,
                ts_discontinuous,
            },
            parameters,
        ))
    }
}

impl Demuxer for FfmpegDemuxer {
    fn read_unit(&mut self) -> Result<Option<CompressedUnit>> {
        if self.abort.load(Ordering::Acquire) {
            return Err(PlayerError::Interrupted);
        }

        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => return Ok(None),
            Err(ffmpeg::Error::Exit) => return Err(PlayerError::Interrupted),
            Err(e) => return Err(e.into()),
        }

        let stream_index = packet.stream() as i32;
        let size = packet.size();
        let duration = packet.duration();
        let byte_pos = packet.position() as i64;
        if byte_pos >= 0 {
            self.last_byte_pos = byte_pos;
        }
        Ok(Some(
            CompressedUnit::new(stream_index, Box::new(FfmpegPacket(packet)), size, duration)
                .with_byte_pos(byte_pos),
        ))
    }

    fn seek(&mut self, target: i64, min: i64, max: i64, flags: SeekFlags) -> Result<()> {
        let seek_flags = if flags.by_bytes {
            ffmpeg::ffi::AVSEEK_FLAG_BYTE as i32
        } else {
            0
        };
        // SAFETY: Input 独占，avformat_seek_file 只修改内部读取状态
        let ret = unsafe {
            ffmpeg::ffi::avformat_seek_file(self.input.as_mut_ptr(), -1, min, target, max, seek_flags)
        };
        if ret < 0 {
            return Err(PlayerError::SeekError(ffmpeg::Error::from(ret).to_string()));
        }
        Ok(())
    }

    fn duration(&self) -> Option<f64> {
        let duration = self.input.duration();
        (duration > 0).then(|| duration as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE))
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    fn start_time(&self) -> Option<f64> {
        // SAFETY: 只读字段
        let start = unsafe { (*self.input.as_ptr()).start_time };
        (start != ffmpeg::ffi::AV_NOPTS_VALUE).then(|| start as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE))
    }

    fn is_seekable(&self) -> bool {
        !self.realtime
    }

    fn ts_discontinuous(&self) -> bool {
        self.ts_discontinuous
    }

    fn prefers_byte_seek(&self) -> bool {
        self.ts_discontinuous && self.input.format().name() != "ogg"
    }

    fn byte_position(&self) -> i64 {
        self.last_byte_pos
    }

    fn byte_size(&self) -> Option<i64> {
        // SAFETY: pb 可能为空（无文件格式）
        let size = unsafe {
            let pb = (*self.input.as_ptr()).pb;
            if pb.is_null() {
                -1
            } else {
                ffmpeg::ffi::avio_size(pb)
            }
        };
        (size > 0).then_some(size)
    }

    fn bit_rate(&self) -> Option<u64> {
        let rate = self.input.bit_rate();
        (rate > 0).then_some(rate as u64)
    }

    fn is_realtime(&self) -> bool {
        self.realtime
    }

    fn pause(&mut self) {
        if let Err(e) = self.input.pause() {
            debug!("{} 暂停网络读取失败: {}", log_ctx(), e);
        }
    }

    fn play(&mut self) {
        if let Err(e) = self.input.play() {
            debug!("{} 恢复网络读取失败: {}", log_ctx(), e);
        }
    }

    fn attached_picture(&mut self, stream_index: i32) -> Option<CompressedUnit> {
        let stream = self.input.stream(stream_index as usize)?;
        let mut packet = ffmpeg::Packet::empty();
        // SAFETY: attached_pic 属于流，引用计数复制
        let ret = unsafe { ffmpeg::ffi::av_packet_ref(packet.as_mut_ptr(), &(*stream.as_ptr()).attached_pic) };
        if ret < 0 || packet.size() == 0 {
            return None;
        }
        let size = packet.size();
        Some(CompressedUnit::new(stream_index, Box::new(FfmpegPacket(packet)), size, 0))
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.url)
    }
}

enum CodecKind {
    Video {
        decoder: codec::decoder::Video,
        scaler: Option<software::scaling::Context>,
    },
    Audio {
        decoder: codec::decoder::Audio,
        converter: Option<software::resampling::Context>,
    },
    Subtitle {
        decoder: codec::decoder::Subtitle,
    },
}

/// FFmpeg 解码器（软件解码）
pub struct FfmpegDecoder {
    kind: CodecKind,
    stream: StreamInfo,
    eof: bool,
}

// 解码器只在一个线程里使用
unsafe impl Send for FfmpegDecoder {}

impl FfmpegDecoder {
    fn new(stream: &StreamInfo, parameters: codec::Parameters) -> Result<Self> {
        let context = codec::context::Context::from_parameters(parameters)?;
        let kind = match stream.media_type {
            MediaType::Video => CodecKind::Video {
                decoder: context.decoder().video()?,
                scaler: None,
            },
            MediaType::Audio => CodecKind::Audio {
                decoder: context.decoder().audio()?,
                converter: None,
            },
            MediaType::Subtitle => CodecKind::Subtitle {
                decoder: context.decoder().subtitle()?,
            },
            MediaType::Data => return Err(PlayerError::InvalidStream(stream.index)),
        };
        Ok(Self {
            kind,
            stream: stream.clone(),
            eof: false,
        })
    }

    fn packet(unit: &CompressedUnit) -> Result<&ffmpeg::Packet> {
        unit.payload_as::<FfmpegPacket>()
            .map(|p| &p.0)
            .ok_or_else(|| PlayerError::DecodeError(format!("流 #{} 的负载不是 FFmpeg 包", unit.stream_index)))
    }

    fn timestamp(&self, ts: Option<i64>) -> f64 {
        ts.map(|t| t as f64 * self.stream.time_base).unwrap_or(f64::NAN)
    }

    /// 哨兵包：flush 或者送 EOF 排空
    fn send(&mut self, unit: &CompressedUnit) -> Result<bool> {
        if unit.is_eof {
            let ret = match &mut self.kind {
                CodecKind::Video { decoder, .. } => decoder.send_eof(),
                CodecKind::Audio { decoder, .. } => decoder.send_eof(),
                CodecKind::Subtitle { .. } => Ok(()),
            };
            if let Err(e) = ret {
                debug!("{} 送 EOF 失败: {}", log_ctx(), e);
            }
            self.eof = true;
            return Ok(true);
        }
        if unit.is_flush {
            self.flush();
            return Ok(false);
        }

        let packet = Self::packet(unit)?;
        self.eof = false;
        let ret = match &mut self.kind {
            CodecKind::Video { decoder, .. } => decoder.send_packet(packet),
            CodecKind::Audio { decoder, .. } => decoder.send_packet(packet),
            CodecKind::Subtitle { .. } => Ok(()),
        };
        match ret {
            Ok(()) | Err(ffmpeg::Error::Eof) => Ok(true),
            Err(e) => Err(PlayerError::DecodeError(e.to_string())),
        }
    }

    fn convert_video(&mut self, frame: &util::frame::Video, byte_pos: i64) -> Result<VideoFrame> {
        let pts = self.timestamp(frame.timestamp());
        let duration = self.stream.frame_duration();
        let CodecKind::Video { scaler, .. } = &mut self.kind else {
            return Err(PlayerError::DecodeError("不是视频解码器".into()));
        };

        let width = frame.width();
        let height = frame.height();
        if scaler.is_none() {
            *scaler = Some(software::scaling::Context::get(
                frame.format(),
                width,
                height,
                util::format::Pixel::RGBA,
                width,
                height,
                software::scaling::Flags::BILINEAR,
            )?);
        }
        let mut rgba = util::frame::Video::empty();
        if let Some(scaler) = scaler.as_mut() {
            scaler.run(frame, &mut rgba)?;
        }

        let row = width as usize * 4;
        let stride = rgba.stride(0);
        let src = rgba.data(0);
        let mut data = vec![0u8; row * height as usize];
        for y in 0..height as usize {
            data[y * row..(y + 1) * row].copy_from_slice(&src[y * stride..y * stride + row]);
        }

        Ok(VideoFrame {
            pts,
            duration,
            byte_pos,
            width,
            height,
            format: PixelFormat::RGBA,
            data,
        })
    }

    fn convert_audio(&mut self, frame: &util::frame::Audio, byte_pos: i64) -> Result<AudioFrame> {
        let pts = self.timestamp(frame.timestamp());
        let CodecKind::Audio { converter, .. } = &mut self.kind else {
            return Err(PlayerError::DecodeError("不是音频解码器".into()));
        };

        let rate = frame.rate();
        let channels = frame.channels();
        if converter.is_none() {
            // 只做格式转换，采样率保持不变
            *converter = Some(software::resampling::Context::get(
                frame.format(),
                frame.channel_layout(),
                rate,
                util::format::Sample::F32(util::format::sample::Type::Packed),
                frame.channel_layout(),
                rate,
            )?);
        }
        let mut packed = util::frame::Audio::empty();
        if let Some(converter) = converter.as_mut() {
            converter.run(frame, &mut packed)?;
        }

        let len = packed.samples() * channels as usize;
        let bytes = packed.data(0);
        let data = bytes[..len * 4]
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect::<Vec<f32>>();

        Ok(AudioFrame {
            pts,
            duration: packed.samples() as f64 / rate.max(1) as f64,
            byte_pos,
            sample_rate: rate,
            channels,
            data,
        })
    }
}

/// 位图字幕：调色板索引转换为 BGRA
///
/// SAFETY: rect 必须是有效的位图字幕矩形
unsafe fn bitmap_rect(raw: *const ffmpeg::ffi::AVSubtitleRect) -> Option<SubtitleRect> {
    let width = (*raw).w.max(0) as u32;
    let height = (*raw).h.max(0) as u32;
    let pixels = (*raw).data[0];
    let palette = (*raw).data[1] as *const u32;
    if width == 0 || height == 0 || pixels.is_null() || palette.is_null() {
        return None;
    }
    let stride = (*raw).linesize[0].max(0) as usize;
    let mut bgra = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height as usize {
        for x in 0..width as usize {
            let index = *pixels.add(y * stride + x) as usize;
            // 调色板是 ARGB（本机字节序）
            bgra.extend_from_slice(&(*palette.add(index)).to_le_bytes());
        }
    }
    Some(SubtitleRect::Bitmap {
        x: (*raw).x.max(0) as u32,
        y: (*raw).y.max(0) as u32,
        width,
        height,
        bgra,
    })
}

impl Decoder for FfmpegDecoder {
    fn init(&mut self, stream: &StreamInfo) -> Result<()> {
        self.stream = stream.clone();
        self.eof = false;
        Ok(())
    }

    fn decode_audio(&mut self, unit: &CompressedUnit, out: &mut VecDeque<DecodedUnit>) -> Result<()> {
        if !self.send(unit)? {
            return Ok(());
        }
        loop {
            let mut frame = util::frame::Audio::empty();
            let received = match &mut self.kind {
                CodecKind::Audio { decoder, .. } => decoder.receive_frame(&mut frame),
                _ => return Err(PlayerError::DecodeError("不是音频解码器".into())),
            };
            match received {
                Ok(()) => out.push_back(DecodedUnit::Audio(self.convert_audio(&frame, unit.byte_pos)?)),
                Err(ffmpeg::Error::Eof) => {
                    self.eof = true;
                    break;
                }
                Err(_) => break,
            }
        }
        Ok(())
    }

    fn decode_video(&mut self, unit: &CompressedUnit, out: &mut VecDeque<DecodedUnit>) -> Result<()> {
        if !self.send(unit)? {
            return Ok(());
        }
        loop {
            let mut frame = util::frame::Video::empty();
            let received = match &mut self.kind {
                CodecKind::Video { decoder, .. } => decoder.receive_frame(&mut frame),
                _ => return Err(PlayerError::DecodeError("不是视频解码器".into())),
            };
            match received {
                Ok(()) => {
                    let converted = self.convert_video(&frame, unit.byte_pos)?;
                    if self.stream.attached_pic {
                        out.push_back(DecodedUnit::Attachment(converted));
                    } else {
                        out.push_back(DecodedUnit::Video(converted));
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    self.eof = true;
                    break;
                }
                Err(_) => break,
            }
        }
        Ok(())
    }

    fn decode_subtitle(&mut self, unit: &CompressedUnit, out: &mut VecDeque<Subtitle>) -> Result<()> {
        if unit.is_eof || unit.is_flush {
            self.send(unit)?;
            return Ok(());
        }
        let packet = Self::packet(unit)?;
        let packet_pts = self.timestamp(packet.pts());
        let CodecKind::Subtitle { decoder } = &mut self.kind else {
            return Err(PlayerError::DecodeError("不是字幕解码器".into()));
        };

        let mut subtitle = codec::subtitle::Subtitle::default();
        match decoder.decode(packet, &mut subtitle) {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(e) => return Err(PlayerError::DecodeError(e.to_string())),
        }

        let pts = subtitle
            .pts()
            .map(|p| p as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE))
            .unwrap_or(packet_pts);
        let mut rects = Vec::new();
        for rect in subtitle.rects() {
            match rect {
                codec::subtitle::Rect::Text(text) => rects.push(SubtitleRect::Text(text.get().to_string())),
                codec::subtitle::Rect::Ass(ass) => rects.push(SubtitleRect::Ass(ass.get().to_string())),
                codec::subtitle::Rect::Bitmap(bitmap) => {
                    // SAFETY: 类型已确认为位图
                    if let Some(bitmap) = unsafe { bitmap_rect(bitmap.as_ptr()) } {
                        rects.push(bitmap);
                    }
                }
                codec::subtitle::Rect::None(_) => {}
            }
        }

        let (width, height) = (self.stream.width, self.stream.height);
        out.push_back(Subtitle {
            pts,
            start_display_time: subtitle.start(),
            end_display_time: subtitle.end(),
            width,
            height,
            rects,
            uploaded: false,
        });
        Ok(())
    }

    fn flush(&mut self) {
        self.eof = false;
        match &mut self.kind {
            CodecKind::Video { decoder, .. } => decoder.flush(),
            CodecKind::Audio { decoder, .. } => decoder.flush(),
            CodecKind::Subtitle { decoder } => decoder.flush(),
        }
    }

    fn eof_state(&self) -> bool {
        self.eof
    }
}

fn packed_f32() -> util::format::Sample {
    util::format::Sample::F32(util::format::sample::Type::Packed)
}

fn channel_layout(channels: u16) -> util::channel_layout::ChannelLayout {
    match channels {
        1 => util::channel_layout::ChannelLayout::MONO,
        2 => util::channel_layout::ChannelLayout::STEREO,
        6 => util::channel_layout::ChannelLayout::_5POINT1,
        n => util::channel_layout::ChannelLayout::default(i32::from(n)),
    }
}

/// swresample 重采样器：交错 f32 转成设备的采样率和声道布局
pub struct SwrResampler {
    target: AudioParams,
    source: Option<AudioParams>,
    context: Option<software::resampling::Context>,
}

// SwrContext 只在音频线程里使用
unsafe impl Send for SwrResampler {}

impl SwrResampler {
    pub fn new(target: AudioParams) -> Result<Self> {
        if target.sample_rate == 0 || target.channels == 0 {
            return Err(PlayerError::ResampleError(format!(
                "无效的目标格式: {} Hz, {} 声道",
                target.sample_rate, target.channels
            )));
        }
        Ok(Self {
            target,
            source: None,
            context: None,
        })
    }
}

impl Resampler for SwrResampler {
    fn convert(&mut self, frame: &AudioFrame) -> Result<Vec<f32>> {
        if frame.sample_rate == 0 || frame.channels == 0 {
            return Err(PlayerError::ResampleError("输入帧格式无效".into()));
        }

        let source = AudioParams::new(frame.sample_rate, frame.channels);
        if self.source != Some(source) || self.context.is_none() {
            debug!(
                "{} 重采样: {} Hz {} 声道 -> {} Hz {} 声道",
                log_ctx(),
                source.sample_rate,
                source.channels,
                self.target.sample_rate,
                self.target.channels
            );
            self.context = Some(software::resampling::Context::get(
                packed_f32(),
                channel_layout(source.channels),
                source.sample_rate,
                packed_f32(),
                channel_layout(self.target.channels),
                self.target.sample_rate,
            )?);
            self.source = Some(source);
        }
        let Some(context) = self.context.as_mut() else {
            return Ok(Vec::new());
        };

        let samples = frame.nb_samples();
        let mut input = util::frame::Audio::new(packed_f32(), samples, channel_layout(source.channels));
        input.set_rate(source.sample_rate);
        let bytes: &[u8] = bytemuck::cast_slice(&frame.data[..samples * source.channels as usize]);
        input.data_mut(0)[..bytes.len()].copy_from_slice(bytes);

        // 输出帧按 swr 内部积压 + 本帧换算后的长度分配，避免剩余采样滞留在 swr 里
        let backlog = context.delay().map_or(0, |d| d.output.max(0) as usize);
        let capacity = backlog
            + samples * self.target.sample_rate as usize / source.sample_rate as usize
            + 32;
        let mut output = util::frame::Audio::new(packed_f32(), capacity, channel_layout(self.target.channels));
        context.run(&input, &mut output)?;

        let len = output.samples() * self.target.channels as usize;
        Ok(output.data(0)[..len * 4]
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect())
    }

    fn delay(&self) -> f64 {
        self.context
            .as_ref()
            .and_then(|context| context.delay())
            .map_or(0.0, |d| d.output.max(0) as f64 / self.target.sample_rate as f64)
    }

    fn reset(&mut self) {
        self.context = None;
        self.source = None;
    }
}

/// FFmpeg 媒体后端
///
/// 打开源时保存每个流的编解码参数，创建解码器时按流索引取出。
#[derive(Default)]
pub struct FfmpegBackend {
    parameters: Mutex<HashMap<i32, codec::Parameters>>,
}

// Parameters 只在持锁时访问
unsafe impl Send for FfmpegBackend {}
unsafe impl Sync for FfmpegBackend {}

impl FfmpegBackend {
    pub fn new() -> Result<Self> {
        ffmpeg::init()?;
        Ok(Self::default())
    }
}

impl MediaBackend for FfmpegBackend {
    fn open_demuxer(&self, source: &MediaSource, abort: Arc<AtomicBool>) -> Result<Box<dyn Demuxer>> {
        let (url, is_network) = match source {
            MediaSource::LocalFile(path) => (path.display().to_string(), false),
            MediaSource::NetworkStream(url) => (url.clone(), true),
            MediaSource::Synthetic(_) => {
                return Err(PlayerError::OpenError(format!("FFmpeg 后端不支持合成源: {}", source)))
            }
        };
        let (demuxer, parameters) = FfmpegDemuxer::open(&url, is_network, abort)?;
        info!("{} ✅ 已打开: {} ({} 个流)", log_ctx(), url, demuxer.streams.len());
        *self.parameters.lock() = parameters;
        Ok(Box::new(demuxer))
    }

    fn create_decoder(&self, stream: &StreamInfo) -> Result<Box<dyn Decoder>> {
        let parameters = self
            .parameters
            .lock()
            .get(&stream.index)
            .cloned()
            .ok_or(PlayerError::InvalidStream(stream.index))?;
        match FfmpegDecoder::new(stream, parameters) {
            Ok(decoder) => Ok(Box::new(decoder)),
            Err(e) => {
                warn!("{} ⚠️  无法为流 #{} 创建解码器: {}", log_ctx(), stream.index, e);
                Err(e)
            }
        }
    }

    fn create_resampler(&self, target: AudioParams) -> Result<Box<dyn Resampler>> {
        Ok(Box::new(SwrResampler::new(target)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_callback_follows_abort_flag() {
        let abort = Arc::new(AtomicBool::new(false));
        let opaque = Arc::as_ptr(&abort) as *mut c_void;
        assert_eq!(unsafe { interrupt_callback(opaque) }, 0);
        abort.store(true, Ordering::Release);
        assert_eq!(unsafe { interrupt_callback(opaque) }, 1);
        assert_eq!(unsafe { interrupt_callback(ptr::null_mut()) }, 0);
    }

    #[test]
    fn test_open_missing_file_fails() {
        let _ = ffmpeg::init();
        let abort = Arc::new(AtomicBool::new(false));
        assert!(open_input("/nonexistent/myy_playcore.mkv", None, &abort).is_err());
    }
}
