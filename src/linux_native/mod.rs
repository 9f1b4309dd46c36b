mod backend;
mod sys;

pub use backend::LinuxBackend;
