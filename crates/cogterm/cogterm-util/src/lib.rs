pub mod hexdump;
pub mod timestamp;

pub use hexdump::dump_lines;
pub use timestamp::now_ns;
