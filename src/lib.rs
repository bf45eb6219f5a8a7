// Базовые модули
pub mod consts;
pub mod eocd;
pub mod idvalue;
pub mod section;

// Схемы канала
pub mod v1; // ZIP-комментарий (JAR-подпись)
pub mod v2; // APK Signing Block (схемы V2/V3)

// Конвейер, проверка, CLI
pub mod pipeline;
pub mod util;
pub mod verify;

pub mod cli;

// Удобные реэкспорты
pub use idvalue::IdValueMap;
pub use pipeline::{
    BatchOutcome, GenerateOptions, GenerationSummary, SigningScheme, WorkerPool,
};
pub use section::{ApkSectionInfo, ByteRegion};
pub use verify::{ApkVerifier, StructuralVerifier, VerifyResult};

/// Исход записи канала. Уже проставленный канал — не ошибка:
/// вызывающий сам решает, пропуск это или повод упасть.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    AlreadyTagged(String),
}
