use bon::Builder;
use flate2::write::GzEncoder;
use flate2::Compression;
use getset::CopyGetters;
use serde::{Deserialize, Serialize};
use std::io::Write;
use validator::Validate;

/// Default compression level (same as `gzip` without flags)
pub static DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Gzip settings for the archive stream
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Validate, Builder, CopyGetters, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[getset(get_copy = "pub")]
pub struct GzipConfig {
    /// 0 stores only, 9 is smallest and slowest
    #[validate(range(max = 9))]
    #[builder(default = DEFAULT_COMPRESSION_LEVEL)]
    level: u32,
}

impl Default for GzipConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl GzipConfig {
    pub fn build_compressor<W: Write>(&self, writer: W) -> GzEncoder<W> {
        tracing::debug!("Creating gzip compressor with level={}", self.level);
        GzEncoder::new(writer, Compression::new(self.level))
    }
}
