//! Audio file validation: the Validating stage.
//!
//! Checks run cheapest-first: extension, size, magic bytes, then a header
//! probe for the formats with a parseable container (WAV via `hound`, FLAC
//! via its STREAMINFO block). Compressed formats pass with unknown duration
//! and channel count; the duration limits only apply when a header reported
//! one. Every rejection is a [`StageError::Validation`], which the
//! orchestrator treats as fatal.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use calliq_core::StageError;
use calliq_settings::LimitSettings;
use sha2::{Digest, Sha256};
use tracing::debug;

/// File extensions the pipeline accepts, lowercase without the dot.
pub(crate) const ALLOWED_EXTENSIONS: [&str; 6] = ["mp3", "wav", "ogg", "flac", "m4a", "webm"];

/// Header fields recovered by the probe, when the container carries them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct AudioProbe {
    /// Duration in seconds.
    pub duration_secs: Option<f64>,
    /// Channel count.
    pub channels: Option<u16>,
}

/// Validate an audio file against the configured limits.
///
/// `file_name` is the original upload name and decides the expected format;
/// `path` is where the bytes actually live.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn validate_audio(
    path: &Path,
    file_name: &str,
    limits: &LimitSettings,
) -> Result<AudioProbe, StageError> {
    let extension = extension_of(file_name)?;

    let metadata = std::fs::metadata(path)
        .map_err(|e| StageError::Validation(format!("cannot stat file: {e}")))?;
    if metadata.len() == 0 {
        return Err(StageError::Validation("file is empty".into()));
    }
    let max_bytes = limits.max_file_size_mb * 1024 * 1024;
    if metadata.len() > max_bytes {
        return Err(StageError::Validation(format!(
            "file is {} bytes, limit is {} MB",
            metadata.len(),
            limits.max_file_size_mb
        )));
    }

    let magic = read_magic(path)?;
    if !matches_magic(extension, &magic) {
        return Err(StageError::Validation(format!(
            "file content does not match .{extension}"
        )));
    }

    let probe = probe_header(path, extension)?;
    if let Some(duration) = probe.duration_secs {
        if duration < limits.min_duration_secs as f64 {
            return Err(StageError::Validation(format!(
                "audio is {duration:.1}s, minimum is {}s",
                limits.min_duration_secs
            )));
        }
        if duration > limits.max_duration_secs as f64 {
            return Err(StageError::Validation(format!(
                "audio is {duration:.1}s, maximum is {}s",
                limits.max_duration_secs
            )));
        }
    }

    debug!(
        file_name,
        size_bytes = metadata.len(),
        duration_secs = probe.duration_secs,
        channels = probe.channels,
        "audio validated"
    );
    Ok(probe)
}

/// Streaming SHA-256 of a file, hex-encoded. The enqueue dedupe key.
pub(crate) fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn extension_of(file_name: &str) -> Result<&'static str, StageError> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .ok_or_else(|| StageError::Validation("file has no extension".into()))?;
    ALLOWED_EXTENSIONS
        .iter()
        .find(|allowed| **allowed == ext)
        .copied()
        .ok_or_else(|| StageError::Validation(format!("unsupported file type '.{ext}'")))
}

fn read_magic(path: &Path) -> Result<Vec<u8>, StageError> {
    let file =
        File::open(path).map_err(|e| StageError::Validation(format!("cannot read file: {e}")))?;
    let mut magic = Vec::with_capacity(12);
    let _ = file
        .take(12)
        .read_to_end(&mut magic)
        .map_err(|e| StageError::Validation(format!("cannot read file: {e}")))?;
    Ok(magic)
}

/// Whether the leading bytes look like the format the extension claims.
fn matches_magic(extension: &str, bytes: &[u8]) -> bool {
    match extension {
        "mp3" => {
            bytes.starts_with(b"\xff\xfb")
                || bytes.starts_with(b"\xff\xf3")
                || bytes.starts_with(b"\xff\xf2")
                || bytes.starts_with(b"ID3")
        }
        "wav" => bytes.starts_with(b"RIFF"),
        "ogg" => bytes.starts_with(b"OggS"),
        "flac" => bytes.starts_with(b"fLaC"),
        "m4a" => bytes.len() >= 8 && &bytes[4..8] == b"ftyp",
        "webm" => bytes.starts_with(b"\x1a\x45\xdf\xa3"),
        _ => false,
    }
}

/// Read duration and channel count from formats with a cheap header.
///
/// A parse failure here is a validation failure: the magic matched, so an
/// unreadable header means a truncated or corrupt file.
fn probe_header(path: &Path, extension: &str) -> Result<AudioProbe, StageError> {
    match extension {
        "wav" => probe_wav(path),
        "flac" => probe_flac(path),
        _ => Ok(AudioProbe {
            duration_secs: None,
            channels: None,
        }),
    }
}

fn probe_wav(path: &Path) -> Result<AudioProbe, StageError> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| StageError::Validation(format!("unreadable wav header: {e}")))?;
    let spec = reader.spec();
    let duration = f64::from(reader.duration()) / f64::from(spec.sample_rate);
    Ok(AudioProbe {
        duration_secs: Some(duration),
        channels: Some(spec.channels),
    })
}

/// Decode the fixed-layout STREAMINFO block that every FLAC stream opens with.
///
/// Layout after the 4-byte magic and 4-byte block header: 10 bytes of block
/// and frame sizes, then 8 packed bytes carrying the sample rate (20 bits),
/// channel count minus one (3 bits), bits per sample minus one (5 bits), and
/// total samples (36 bits).
#[allow(clippy::cast_precision_loss)]
fn probe_flac(path: &Path) -> Result<AudioProbe, StageError> {
    let mut file =
        File::open(path).map_err(|e| StageError::Validation(format!("cannot read file: {e}")))?;
    let mut header = [0u8; 42];
    file.read_exact(&mut header)
        .map_err(|e| StageError::Validation(format!("unreadable flac header: {e}")))?;

    if header[4] & 0x7F != 0 {
        return Err(StageError::Validation(
            "flac stream does not start with streaminfo".into(),
        ));
    }
    let info = &header[8..42];
    let sample_rate =
        (u32::from(info[10]) << 12) | (u32::from(info[11]) << 4) | (u32::from(info[12]) >> 4);
    let channels = u16::from((info[12] >> 1) & 0x07) + 1;
    let total_samples = (u64::from(info[13] & 0x0F) << 32)
        | (u64::from(info[14]) << 24)
        | (u64::from(info[15]) << 16)
        | (u64::from(info[16]) << 8)
        | u64::from(info[17]);

    let duration_secs = if sample_rate > 0 && total_samples > 0 {
        Some(total_samples as f64 / f64::from(sample_rate))
    } else {
        // Streaming encoders may leave the total unset; length stays unknown.
        None
    };
    Ok(AudioProbe {
        duration_secs,
        channels: Some(channels),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
