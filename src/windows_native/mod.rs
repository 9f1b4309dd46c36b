mod backend;
mod win32;

pub use backend::WindowsBackend;
