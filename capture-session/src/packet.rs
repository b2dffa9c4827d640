use bytes::Bytes;

use crate::format::Rational;

/// Encoded output of one encode call. Timestamps are expressed in
/// `time_base`, which is the producing encoder's time-base until the
/// container rescales them.
#[derive(Clone, Debug)]
pub struct Packet {
    stream_index: usize,
    data: Bytes,
    pts: Option<i64>,
    dts: Option<i64>,
    duration: i64,
    is_key: bool,
    time_base: Rational,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>, time_base: Rational) -> Self {
        Self {
            stream_index: 0,
            data: data.into(),
            pts: None,
            dts: None,
            duration: 0,
            is_key: false,
            time_base,
        }
    }

    pub fn with_pts(mut self, pts: Option<i64>) -> Self {
        self.pts = pts;
        self
    }

    pub fn with_dts(mut self, dts: Option<i64>) -> Self {
        self.dts = dts;
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_key(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    pub fn dts(&self) -> Option<i64> {
        self.dts
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn index(&self) -> usize {
        self.stream_index
    }

    pub fn set_stream(&mut self, index: usize) {
        self.stream_index = index;
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn is_key(&self) -> bool {
        self.is_key
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }
}
