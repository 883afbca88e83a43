pub mod dwell;
