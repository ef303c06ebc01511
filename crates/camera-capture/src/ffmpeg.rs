//! FFmpeg command assembly
//!
//! Builds the decoder invocation
//! `ffmpeg <global> <decode> <input> -i <path> <scale> <output> pipe:`
//! from presets and explicit overrides, and probes the libva render nodes
//! for hardware-accelerated decode.

use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

use tracing::{debug, warn};

use edgescope_core::config::{
    Args, DetectConfig, SourceConfig, DEFAULT_GLOBAL_ARGS, DEFAULT_OUTPUT_ARGS,
};

/// Decoder binary on PATH.
pub const DECODER_BINARY: &str = "ffmpeg";

const RENDER_DEVICE_FALLBACK: &str = "/dev/dri/renderD128";

fn input_preset(name: &str) -> Option<&'static [&'static str]> {
    match name {
        "rtsp-generic" => Some(&[
            "-avoid_negative_ts",
            "make_zero",
            "-fflags",
            "+genpts+discardcorrupt",
            "-rtsp_transport",
            "tcp",
            "-timeout",
            "5000000",
            "-use_wallclock_as_timestamps",
            "1",
        ]),
        "mp4-generic" => Some(&[]),
        _ => None,
    }
}

fn hwaccel_decode_preset(selector: &str, gpu: &str) -> Option<Vec<String>> {
    let args: Vec<String> = match selector {
        "va-api" => vec![
            "-hwaccel_flags".into(),
            "allow_profile_mismatch".into(),
            "-hwaccel".into(),
            "vaapi".into(),
            "-hwaccel_device".into(),
            gpu.into(),
            "-hwaccel_output_format".into(),
            "vaapi".into(),
        ],
        "nvidia_cuda" => vec![
            "-hwaccel".into(),
            "cuda".into(),
            "-hwaccel_output_format".into(),
            "cuda".into(),
        ],
        "intel_quicksync_h264" => vec![
            "-hwaccel".into(),
            "qsv".into(),
            "-qsv_device".into(),
            gpu.into(),
            "-hwaccel_output_format".into(),
            "qsv".into(),
            "-c:v".into(),
            "h264_qsv".into(),
        ],
        "default" => vec![],
        _ => return None,
    };
    Some(args)
}

fn hwaccel_scale_preset(selector: &str, fps: u32, width: u32, height: u32) -> Vec<String> {
    let filter = match selector {
        "va-api" => format!(
            "fps={fps},scale_vaapi=w={width}:h={height}:format=nv12,hwdownload,format=nv12,format=yuv420p"
        ),
        "nvidia_cuda" => format!(
            "fps={fps},scale_cuda=w={width}:h={height}:format=nv12,hwdownload,format=nv12,format=yuv420p"
        ),
        "intel_quicksync_h264" => format!(
            "vpp_qsv=framerate={fps}:w={width}:h={height}:format=nv12,hwdownload,format=nv12,format=yuv420p"
        ),
        _ => format!("fps={fps},scale={width}:{height}"),
    };
    vec!["-r".to_string(), fps.to_string(), "-vf".to_string(), filter]
}

/// Picks the libva render node for hardware decode. The probe result is
/// cached for the process lifetime; constructed explicitly by the
/// orchestrator and handed to each capture supervisor.
#[derive(Debug, Default)]
pub struct LibvaGpuSelector {
    selected: OnceLock<String>,
}

impl LibvaGpuSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected_gpu(&self) -> &str {
        self.selected.get_or_init(Self::probe)
    }

    fn probe() -> String {
        if !Path::new("/dev/dri").exists() {
            return String::new();
        }

        let mut devices: Vec<String> = match std::fs::read_dir("/dev/dri") {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .filter(|n| n.starts_with("render"))
                .collect(),
            Err(_) => return String::new(),
        };
        devices.sort();

        if devices.len() < 2 {
            return RENDER_DEVICE_FALLBACK.to_string();
        }

        for device in &devices {
            match vainfo(device) {
                Ok(status) if status.success() => {
                    debug!("selected render node /dev/dri/{device}");
                    return format!("/dev/dri/{device}");
                }
                Ok(status) => {
                    debug!("{device} returned vainfo status {status}");
                }
                Err(e) => {
                    warn!("vainfo probe failed for {device}: {e}");
                }
            }
        }

        String::new()
    }
}

fn vainfo(device: &str) -> std::io::Result<std::process::ExitStatus> {
    Command::new("vainfo")
        .args(["--display", "drm", "--device", &format!("/dev/dri/{device}")])
        .output()
        .map(|out| out.status)
}

/// A decoder invocation: program plus argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl DecoderCommand {
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Assembles the full decoder command for one camera.
pub fn build_decoder_command(
    source: &SourceConfig,
    detect: &DetectConfig,
    gpu: &LibvaGpuSelector,
) -> DecoderCommand {
    let ffmpeg = &source.ffmpeg;
    let mut args: Vec<String> = Vec::new();

    if ffmpeg.global_args.is_empty() {
        args.extend(DEFAULT_GLOBAL_ARGS.iter().map(|s| s.to_string()));
    } else {
        args.extend(ffmpeg.global_args.to_args());
    }

    args.extend(resolve_hwaccel_decode(&ffmpeg.hwaccel_args, gpu));
    args.extend(resolve_input(&ffmpeg.input_args));

    args.push("-i".to_string());
    args.push(source.path.clone());

    let selector = ffmpeg.hwaccel_args.as_preset().unwrap_or("default");
    args.extend(hwaccel_scale_preset(selector, detect.fps, detect.width, detect.height));

    if ffmpeg.output_args.is_empty() {
        args.extend(DEFAULT_OUTPUT_ARGS.iter().map(|s| s.to_string()));
    } else {
        args.extend(ffmpeg.output_args.to_args());
    }

    args.push("pipe:".to_string());

    DecoderCommand {
        program: DECODER_BINARY.to_string(),
        args,
    }
}

fn resolve_hwaccel_decode(hwaccel: &Args, gpu: &LibvaGpuSelector) -> Vec<String> {
    if hwaccel.is_empty() {
        return Vec::new();
    }
    if let Some(selector) = hwaccel.as_preset() {
        if let Some(preset) = hwaccel_decode_preset(selector, gpu.selected_gpu()) {
            return preset;
        }
    }
    hwaccel.to_args()
}

fn resolve_input(input: &Args) -> Vec<String> {
    if input.is_empty() {
        return Vec::new();
    }
    if let Some(preset) = input.as_preset().and_then(input_preset) {
        return preset.iter().map(|s| s.to_string()).collect();
    }
    input.to_args()
}
