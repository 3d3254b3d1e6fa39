//! Named worker pools referenced by the routing table (§4.4) and the
//! dispatcher's `worker_route` (§4.6). Kept as `&'static str` constants rather
//! than an enum: pools are an open set in principle (new worker kinds can be
//! added without a core change) even though the core ships a fixed catalog.

pub const CPU_EXTRACT: &str = "cpu-extract";
pub const CPU_LIGHT: &str = "cpu-light";
pub const CPU_IMAGE: &str = "cpu-image";
pub const CPU_ARCHIVE: &str = "cpu-archive";
pub const CPU_NER: &str = "cpu-ner";
pub const GPU_PADDLE: &str = "gpu-paddle";
pub const GPU_QWEN: &str = "gpu-qwen";
pub const GPU_WHISPER: &str = "gpu-whisper";
pub const GPU_EMBED: &str = "gpu-embed";
pub const IO_FILE: &str = "io-file";

/// All pools the core ships a worker for; used to validate a `worker_route`
/// at dispatch time.
pub const ALL: &[&str] = &[
    CPU_EXTRACT,
    CPU_LIGHT,
    CPU_IMAGE,
    CPU_ARCHIVE,
    CPU_NER,
    GPU_PADDLE,
    GPU_QWEN,
    GPU_WHISPER,
    GPU_EMBED,
    IO_FILE,
];
