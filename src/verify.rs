//! verify — адаптер проверки подписи выходного APK.
//!
//! Конвейер принимает любую реализацию `ApkVerifier` (в тестах —
//! заведомо падающую). Реализация по умолчанию структурная: она
//! заново разбирает контейнер и подтверждает присутствие записей
//! схем подписи, не проверяя криптографию (это работа внешнего
//! инструмента подписи).

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use crate::{v1, v2};

/// Какие схемы подписи несёт файл.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerifyResult {
    pub v1: bool,
    pub v2: bool,
    pub v3: bool,
}

impl VerifyResult {
    pub fn any(&self) -> bool {
        self.v1 || self.v2 || self.v3
    }
}

pub trait ApkVerifier: Sync {
    fn verify(&self, apk: &Path) -> Result<VerifyResult>;
}

/// Структурная проверка: повторный разбор контейнера без криптографии.
#[derive(Debug, Default)]
pub struct StructuralVerifier;

impl ApkVerifier for StructuralVerifier {
    fn verify(&self, apk: &Path) -> Result<VerifyResult> {
        Ok(VerifyResult {
            v1: v1::contains_v1_signature(apk),
            v2: v2::contains_v2_signature(apk),
            v3: v2::contains_v3_signature(apk),
        })
    }
}
