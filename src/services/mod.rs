pub mod compositor;
pub mod credentials;
pub mod pdf;
pub mod qr;
pub mod queue;
pub mod renderer;
pub mod storage;
