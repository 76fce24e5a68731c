use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use vellum_core::{Result, err};

use super::{Dim, Generated};

const BACKGROUND: Rgba<u8> = Rgba([0xF4, 0xF4, 0xF4, 0xFF]);
const FOREGROUND: Rgba<u8> = Rgba([0x4A, 0x4A, 0x6A, 0xFF]);
const MIDLINE: Rgba<u8> = Rgba([0xC0, 0xC0, 0xC8, 0xFF]);

/// Render a PCM waveform image from WAV bytes. Every audio generator
/// funnels through here: WAV sources directly, compressed formats after
/// the helper decodes them.
pub(super) fn thumbnail(wav: &[u8], dim: &Dim) -> Result<Generated> {
	let samples = parse_pcm(wav)?;
	if samples.is_empty() {
		return Err(err!(Request(InvalidParam("Audio stream holds no samples"))));
	}

	let width = dim.width.max(1);
	let height = dim.height.max(1);
	let mut image = RgbaImage::from_pixel(width, height, BACKGROUND);

	let mid = height / 2;
	for x in 0..width {
		image.put_pixel(x, mid, MIDLINE);
	}

	let bucket = (samples.len() / width as usize).max(1);
	for x in 0..width {
		let start = x as usize * bucket;
		if start >= samples.len() {
			break;
		}

		let end = (start + bucket).min(samples.len());
		let (mut lo, mut hi) = (0.0_f32, 0.0_f32);
		for &sample in &samples[start..end] {
			lo = lo.min(sample);
			hi = hi.max(sample);
		}

		let half = f32::from(u16::try_from(mid).unwrap_or(u16::MAX));
		let top = mid.saturating_sub((hi * half) as u32);
		let bottom = (mid + (-lo * half) as u32).min(height - 1);
		for y in top..=bottom {
			image.put_pixel(x, y, FOREGROUND);
		}
	}

	let mut bytes = Vec::new();
	DynamicImage::ImageRgba8(image).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;

	Ok(Generated::Bytes { bytes, content_type: "image/png" })
}

/// Minimal RIFF/WAVE reader for the PCM the decode helper emits: 8-bit and
/// 16-bit integer samples, any channel count (mixed down by taking the
/// first channel).
fn parse_pcm(bytes: &[u8]) -> Result<Vec<f32>> {
	if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
		return Err(err!(Request(InvalidParam("Not a RIFF/WAVE stream"))));
	}

	let mut offset = 12_usize;
	let mut format: Option<(u16, u16, u16)> = None; // (audio format, channels, bits)
	let mut data: Option<&[u8]> = None;

	while offset + 8 <= bytes.len() {
		let id = &bytes[offset..offset + 4];
		let len = u32::from_le_bytes(
			bytes[offset + 4..offset + 8]
				.try_into()
				.expect("sliced four bytes"),
		) as usize;

		let body_start = offset + 8;
		let body_end = body_start.saturating_add(len).min(bytes.len());
		let body = &bytes[body_start..body_end];

		match id {
			| b"fmt " if body.len() >= 16 => {
				let audio_format = u16::from_le_bytes([body[0], body[1]]);
				let channels = u16::from_le_bytes([body[2], body[3]]);
				let bits = u16::from_le_bytes([body[14], body[15]]);
				format = Some((audio_format, channels, bits));
			},
			| b"data" => {
				data = Some(body);
			},
			| _ => {},
		}

		// chunks are word-aligned
		offset = body_start + len + (len & 1);
	}

	let (audio_format, channels, bits) =
		format.ok_or_else(|| err!(Request(InvalidParam("WAVE stream missing fmt chunk"))))?;
	let data =
		data.ok_or_else(|| err!(Request(InvalidParam("WAVE stream missing data chunk"))))?;

	if audio_format != 1 {
		return Err(err!(Request(InvalidParam(
			"Unsupported WAVE encoding {audio_format}; expected integer PCM"
		))));
	}

	let channels = usize::from(channels.max(1));
	let mut samples = Vec::new();

	match bits {
		| 16 => {
			let stride = 2 * channels;
			samples.reserve(data.len() / stride);
			for frame in data.chunks_exact(stride) {
				let sample = i16::from_le_bytes([frame[0], frame[1]]);
				samples.push(f32::from(sample) / f32::from(i16::MAX));
			}
		},
		| 8 => {
			samples.reserve(data.len() / channels);
			for frame in data.chunks_exact(channels) {
				samples.push((f32::from(frame[0]) - 128.0) / 128.0);
			}
		},
		| other => {
			return Err(err!(Request(InvalidParam(
				"Unsupported WAVE sample width {other}"
			))));
		},
	}

	Ok(samples)
}

#[cfg(test)]
mod tests {
	use super::{Generated, parse_pcm, thumbnail};
	use crate::media::thumbnail::{Dim, Method};

	/// Tiny valid 16-bit mono WAV with a short sine-ish ramp.
	fn wav_fixture() -> Vec<u8> {
		let samples: Vec<i16> = (0..64)
			.map(|i| ((i - 32) * 1024) as i16)
			.collect();

		let data_len = samples.len() * 2;
		let mut wav = Vec::new();
		wav.extend_from_slice(b"RIFF");
		wav.extend_from_slice(&u32::try_from(36 + data_len).unwrap().to_le_bytes());
		wav.extend_from_slice(b"WAVE");
		wav.extend_from_slice(b"fmt ");
		wav.extend_from_slice(&16_u32.to_le_bytes());
		wav.extend_from_slice(&1_u16.to_le_bytes()); // pcm
		wav.extend_from_slice(&1_u16.to_le_bytes()); // mono
		wav.extend_from_slice(&8000_u32.to_le_bytes());
		wav.extend_from_slice(&16000_u32.to_le_bytes());
		wav.extend_from_slice(&2_u16.to_le_bytes());
		wav.extend_from_slice(&16_u16.to_le_bytes());
		wav.extend_from_slice(b"data");
		wav.extend_from_slice(&u32::try_from(data_len).unwrap().to_le_bytes());
		for sample in samples {
			wav.extend_from_slice(&sample.to_le_bytes());
		}

		wav
	}

	#[test]
	fn parses_pcm_samples() {
		let samples = parse_pcm(&wav_fixture()).unwrap();
		assert_eq!(samples.len(), 64);
		assert!(samples.iter().all(|s| (-1.0..=1.0).contains(s)));
	}

	#[test]
	fn renders_a_waveform_png() {
		let dim = Dim { width: 96, height: 96, method: Method::Scale, animated: false };
		let Generated::Bytes { bytes, content_type } =
			thumbnail(&wav_fixture(), &dim).unwrap()
		else {
			panic!("expected generated bytes");
		};

		assert_eq!(content_type, "image/png");
		let image = image::load_from_memory(&bytes).unwrap();
		assert_eq!((image.width(), image.height()), (96, 96));
	}

	#[test]
	fn rejects_non_wave_bytes() {
		assert!(parse_pcm(b"definitely not audio").is_err());
	}
}
