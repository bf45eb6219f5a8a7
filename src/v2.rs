//! v2 — канал как ID-Value запись внутри APK Signing Block (схемы
//! подписи V2/V3).
//!
//! Запись канала пересобирает signing block (с пересчётом verity
//! padding), после чего меняется смещение центрального каталога в
//! EOCD. Снимок секций при этом не мутируется: патчится копия EOCD,
//! и в файл назначения пишутся регионы в порядке
//! content (кроме low-memory) / новый блок / каталог / патченный EOCD.

use anyhow::{bail, Context, Result};
use log::{debug, info};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::consts::*;
use crate::eocd;
use crate::idvalue::{self, IdValueMap};
use crate::section::{self, ApkSectionInfo};
use crate::WriteOutcome;

/// Записать канал в signing block и выложить результат в dest.
///
/// Базовый файл должен быть реально подписан V2/V3 (присутствует ID
/// соответствующей схемы), иначе запись отклоняется до каких-либо
/// мутаций назначения.
pub fn write_channel(info: &ApkSectionInfo, dest: &Path, channel: &str) -> Result<WriteOutcome> {
    if channel.is_empty() {
        bail!("channel must not be empty");
    }

    let mut map = idvalue::decode(&info.signing_block.bytes)?;
    if !map.contains(APK_SIGNATURE_SCHEME_V2_BLOCK_ID)
        && !map.contains(APK_SIGNATURE_SCHEME_V3_BLOCK_ID)
    {
        bail!("APK Signing Block carries no v2/v3 signature, refusing to write channel");
    }
    if let Some(existing) = map.get(CHANNEL_BLOCK_ID) {
        if !existing.is_empty() {
            let existing = String::from_utf8_lossy(existing).into_owned();
            info!("base apk already has a channel '{}', skipping", existing);
            return Ok(WriteOutcome::AlreadyTagged(existing));
        }
    }

    map.insert(CHANNEL_BLOCK_ID, channel.as_bytes().to_vec());
    rewrite_signing_block(info, dest, &map)?;
    Ok(WriteOutcome::Written)
}

/// Удалить канальную запись из signing block. false — записи не было
/// (назначение не трогается).
pub fn remove_channel(info: &ApkSectionInfo, dest: &Path) -> Result<bool> {
    let mut map = idvalue::decode(&info.signing_block.bytes)?;
    if map.remove(CHANNEL_BLOCK_ID).is_none() {
        info!("{} has no channel id-value, nothing removed", dest.display());
        return Ok(false);
    }
    rewrite_signing_block(info, dest, &map)?;
    Ok(true)
}

/// Пересобрать signing block из карты и физически переписать файл
/// назначения. Снимок не мутируется: EOCD патчится в копии.
fn rewrite_signing_block(info: &ApkSectionInfo, dest: &Path, map: &IdValueMap) -> Result<()> {
    let new_block = idvalue::encode(map)?;
    let size_delta = new_block.len() as i64 - info.signing_block.len() as i64;
    debug!(
        "signing block rewritten: {} -> {} bytes (delta {})",
        info.signing_block.len(),
        new_block.len(),
        size_delta
    );

    // Патченная копия EOCD с новым смещением каталога.
    let mut patched_eocd = info.eocd.bytes.clone();
    let new_cd_offset = (info.central_dir.offset as i64 + size_delta) as u64;
    eocd::set_central_dir_offset(&mut patched_eocd, new_cd_offset)?;

    let new_len = (info.apk_size as i64 + size_delta) as u64;

    if info.low_memory {
        // В low-memory режиме назначение уже обязано содержать копию
        // базового APK: content-регион не буферизован и не пишется.
        let meta = std::fs::metadata(dest)
            .with_context(|| format!("destination {} missing in low-memory mode", dest.display()))?;
        if !meta.is_file() || meta.len() == 0 {
            bail!(
                "destination {} must already hold the base apk in low-memory mode",
                dest.display()
            );
        }
    } else if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut f = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(dest)
        .with_context(|| format!("open destination {}", dest.display()))?;

    if info.low_memory {
        f.seek(SeekFrom::Start(info.signing_block.offset))?;
    } else {
        let content = info
            .content_entries
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("content entries region missing"))?;
        f.seek(SeekFrom::Start(0))?;
        f.write_all(&content.bytes)?;
    }
    f.write_all(&new_block)?;
    f.write_all(&info.central_dir.bytes)?;
    f.write_all(&patched_eocd)?;

    let pos = f.stream_position()?;
    if pos != new_len {
        bail!(
            "channel write produced wrong file size: position {}, expected {}",
            pos,
            new_len
        );
    }
    f.set_len(new_len)?;
    f.sync_all()?;
    Ok(())
}

/// Значение ID-Value записи по идентификатору. None — нет signing
/// block или нет такой записи.
pub fn value_by_id(apk: &Path, id: u32) -> Option<Vec<u8>> {
    let block = match section::read_signing_block(apk) {
        Ok(b) => b,
        Err(e) => {
            debug!("{} has no readable signing block: {}", apk.display(), e);
            return None;
        }
    };
    let map = match idvalue::decode(&block.bytes) {
        Ok(m) => m,
        Err(e) => {
            debug!("{} signing block did not decode: {}", apk.display(), e);
            return None;
        }
    };
    map.get(id).map(|v| v.to_vec())
}

/// Прочитать канал из signing block. None — записи (или блока) нет.
pub fn read_channel(apk: &Path) -> Result<Option<String>> {
    match value_by_id(apk, CHANNEL_BLOCK_ID) {
        Some(bytes) if !bytes.is_empty() => {
            let channel = String::from_utf8(bytes)
                .with_context(|| format!("channel in {} is not valid UTF-8", apk.display()))?;
            Ok(Some(channel))
        }
        _ => Ok(None),
    }
}

/// Есть ли в signing block запись схемы подписи V2.
pub fn contains_v2_signature(apk: &Path) -> bool {
    value_by_id(apk, APK_SIGNATURE_SCHEME_V2_BLOCK_ID).is_some()
}

/// Есть ли в signing block запись схемы подписи V3.
pub fn contains_v3_signature(apk: &Path) -> bool {
    value_by_id(apk, APK_SIGNATURE_SCHEME_V3_BLOCK_ID).is_some()
}
