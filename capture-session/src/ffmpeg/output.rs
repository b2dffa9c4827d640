use std::path::Path;

use ffmpeg_next::format;

use super::{
    encoder::{AudioContext, FfmpegAudioEncoder, FfmpegVideoEncoder, VideoContext},
    from_av, to_av,
};
use crate::{
    backend::{Container, OpenedOutput},
    format::Rational,
    packet::Packet,
    stream::{AUDIO_STREAM_INDEX, VIDEO_STREAM_INDEX},
};

/// Output file with one video and one audio stream. The header is written on
/// creation, the trailer by [`Container::write_trailer`]; dropping closes the
/// file.
pub struct FfmpegContainer {
    inner: format::context::Output,
    stream_time_bases: [Rational; 2],
    have_written_trailer: bool,
}

unsafe impl Send for FfmpegContainer {}

impl FfmpegContainer {
    pub fn open(
        path: &Path,
        video: VideoContext,
        audio: AudioContext,
    ) -> anyhow::Result<OpenedOutput<FfmpegVideoEncoder, FfmpegAudioEncoder, FfmpegContainer>>
    {
        let mut inner = format::output(&path)?;
        let global_header = inner
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);

        let video_codec = video.codec();
        let audio_codec = audio.codec();
        let video = video.open(global_header)?;
        let audio = audio.open(global_header)?;

        {
            let mut stream = inner.add_stream(video_codec)?;
            stream.set_parameters(video.context());
            stream.set_time_base(to_av(video.time_base()));
        }
        {
            let mut stream = inner.add_stream(audio_codec)?;
            stream.set_parameters(audio.context());
            stream.set_time_base(to_av(audio.time_base()));
        }
        inner.write_header()?;

        // the muxer may replace the requested time-bases while writing the header
        let stream_time_base = |index: usize| -> anyhow::Result<Rational> {
            inner
                .stream(index)
                .map(|s| from_av(s.time_base()))
                .ok_or(anyhow::anyhow!("stream not found: {}", index))
        };
        let stream_time_bases = [
            stream_time_base(VIDEO_STREAM_INDEX)?,
            stream_time_base(AUDIO_STREAM_INDEX)?,
        ];
        log::info!(
            "output {} opened, global header: {}, stream time-bases: {} / {}",
            path.display(),
            global_header,
            stream_time_bases[0],
            stream_time_bases[1]
        );

        Ok(OpenedOutput {
            video,
            audio,
            container: FfmpegContainer {
                inner,
                stream_time_bases,
                have_written_trailer: false,
            },
        })
    }
}

impl Container for FfmpegContainer {
    fn write_interleaved(&mut self, packet: Packet) -> anyhow::Result<()> {
        let out_time_base = *self
            .stream_time_bases
            .get(packet.index())
            .ok_or(anyhow::anyhow!("stream not found: {}", packet.index()))?;

        let mut p = ffmpeg_next::Packet::copy(packet.data());
        p.set_stream(packet.index());
        p.set_pts(packet.pts());
        p.set_dts(packet.dts());
        p.set_duration(packet.duration());
        if packet.is_key() {
            p.set_flags(ffmpeg_next::codec::packet::Flags::KEY);
        }
        p.set_position(-1);
        p.rescale_ts(to_av(packet.time_base()), to_av(out_time_base));
        p.write_interleaved(&mut self.inner)?;
        Ok(())
    }

    fn write_trailer(&mut self) -> anyhow::Result<()> {
        if !self.have_written_trailer {
            self.have_written_trailer = true;
            self.inner.write_trailer()?;
        }
        Ok(())
    }
}
