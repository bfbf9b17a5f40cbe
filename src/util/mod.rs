pub mod backoff;
pub mod duration;
pub mod regex_list;

pub use backoff::Backoff;
pub use duration::parse_duration;
pub use regex_list::{admitted, compile_regex_list, is_regex_pattern};
