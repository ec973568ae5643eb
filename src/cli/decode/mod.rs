mod decode_impl;
pub mod demux_thread;
pub mod output;
pub mod progress;

pub use decode_impl::cmd_decode;
