pub mod audio_buffer;
pub mod pcm_reader;
pub mod segment;

pub use audio_buffer::PcmBuffer;
pub use pcm_reader::recognize_pcm_file;
pub use segment::{Segment, SegmentCollector};
