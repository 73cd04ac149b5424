use std::fs::File;
use std::io;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::source::{MemorySource, PcmSource, SourceOpener};
use super::types::{PcmFormat, SampleFormat};
use crate::error::{Error, Result};

/// Default [`SourceOpener`]: decodes local files with symphonia into interleaved `f32` PCM.
///
/// Accepts plain paths and `file://` URIs.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaOpener;

impl SourceOpener for SymphoniaOpener {
    fn open(&self, uri: &str) -> Result<Box<dyn PcmSource>> {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        let source = decode_file(Path::new(path)).map_err(|reason| Error::SourceOpen {
            uri: uri.to_string(),
            reason,
        })?;
        tracing::info!(
            uri,
            sample_rate = source.format().sample_rate,
            channels = source.format().channels,
            seconds = source.total_time().as_secs_f64(),
            "source opened"
        );
        Ok(Box::new(source))
    }
}

/// Decode an audio file fully into memory.
pub fn decode_file(path: &Path) -> std::result::Result<MemorySource, String> {
    let mut track = TrackDecoder::probe(path)?;
    let format = track.format;
    let mut bytes = Vec::new();
    while let Some(samples) = track.next_samples()? {
        bytes.extend_from_slice(&format.encode_samples(samples));
    }
    Ok(MemorySource::new(format, bytes))
}

/// The default track of a probed file, decoded packet by packet.
struct TrackDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    format: PcmFormat,
    buffer: Option<SampleBuffer<f32>>,
    label: String,
}

impl TrackDecoder {
    fn probe(path: &Path) -> std::result::Result<Self, String> {
        let file = File::open(path).map_err(|e| format!("Failed to open file: {e}"))?;
        let stream = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }
        let reader = symphonia::default::get_probe()
            .format(&hint, stream, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| format!("Failed to probe format: {e}"))?
            .format;

        let track = reader.default_track().ok_or("No default track found")?;
        let params = &track.codec_params;
        let sample_rate = params.sample_rate.ok_or("No sample rate in track")?;
        let channels = params.channels.map_or(2, |c| c.count() as u16);
        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| format!("Failed to create decoder: {e}"))?;
        let track_id = track.id;

        Ok(Self {
            reader,
            decoder,
            track_id,
            format: PcmFormat::new(sample_rate, channels, SampleFormat::F32),
            buffer: None,
            label: path.display().to_string(),
        })
    }

    /// Interleaved samples of the next decodable packet, or `None` at end of stream.
    /// Packets that fail to decode are skipped with a warning.
    fn next_samples(&mut self) -> std::result::Result<Option<&[f32]>, String> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(e) => return Err(format!("Error reading packet: {e}")),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::warn!(path = %self.label, "decode warning: {e}");
                    continue;
                }
                Err(e) => return Err(format!("Decode error: {e}")),
            };

            let spec = *decoded.spec();
            let frames = decoded.capacity();
            let buffer = match self.buffer.take() {
                Some(buf) if buf.capacity() >= frames * spec.channels.count() => {
                    self.buffer.insert(buf)
                }
                _ => self.buffer.insert(SampleBuffer::new(frames as u64, spec)),
            };
            buffer.copy_interleaved_ref(decoded);
            return Ok(Some(buffer.samples()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_a_source_open_failure() {
        let err = SymphoniaOpener
            .open("file:///definitely/not/here.wav")
            .err()
            .unwrap();
        match err {
            Error::SourceOpen { uri, reason } => {
                assert_eq!(uri, "file:///definitely/not/here.wav");
                assert!(reason.starts_with("Failed to open file"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
