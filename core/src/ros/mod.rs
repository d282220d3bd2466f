//! Reader for the tokenized ROSA `.ros` case format.

pub mod parser;
pub mod record;
pub mod token;

pub use parser::{parse_ros_bytes, parse_ros_file, parse_ros_text};
pub use record::{DisplayEntry, RosFile, Trajectory};
pub use token::{extract_sections, Section};
