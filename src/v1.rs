//! v1 — канальная запись в ZIP-комментарии (для пакетов только с
//! JAR-подписью).
//!
//! Формат хвоста комментария:
//! [channel bytes][len u16 LE][V1_MAGIC 8 байт]
//!
//! Запись дописывается после существующего комментария, поле
//! comment_len в EOCD увеличивается на длину записи. Чтение идёт
//! строго от конца файла: если последних 8 байт не совпадают с
//! магией — канала нет (это не ошибка).

use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::consts::*;
use crate::eocd;
use crate::WriteOutcome;

/// Полная длина канальной записи в комментарии.
#[inline]
fn record_len(channel_bytes: usize) -> usize {
    channel_bytes + V1_LEN_FIELD_SIZE + V1_MAGIC.len()
}

fn open_rw(apk: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(apk)
        .with_context(|| format!("open apk for writing {}", apk.display()))
}

/// Дописать канал в ZIP-комментарий.
///
/// Если запись уже есть, файл не трогается: возвращается
/// `AlreadyTagged` с существующим значением.
pub fn write_channel(apk: &Path, channel: &str) -> Result<WriteOutcome> {
    if channel.is_empty() {
        bail!("channel must not be empty");
    }

    if contains_v1_magic(apk)? {
        let existing = read_channel(apk)?.unwrap_or_default();
        info!(
            "apk {} already has a channel '{}', skipping",
            apk.display(),
            existing
        );
        return Ok(WriteOutcome::AlreadyTagged(existing));
    }

    let mut f = open_rw(apk)?;
    let (eocd, eocd_offset) = eocd::find(&mut f)?;
    if eocd::is_zip64_locator_present(&mut f, eocd_offset)? {
        bail!("ZIP64 APK not supported");
    }

    let existing_comment_len = eocd::comment_length(&eocd)?;
    debug!(
        "apk {} comment length before write: {}",
        apk.display(),
        existing_comment_len
    );

    let comment = channel.as_bytes();
    let new_comment_len = existing_comment_len + record_len(comment.len());
    if new_comment_len > UINT16_MAX_VALUE {
        bail!(
            "channel record does not fit in ZIP comment: {} bytes (max {})",
            new_comment_len,
            UINT16_MAX_VALUE
        );
    }

    // 1. переписать поле comment_len в EOCD
    f.seek(SeekFrom::Start(
        eocd_offset + ZIP_EOCD_COMMENT_LENGTH_OFFSET as u64,
    ))?;
    f.write_u16::<LittleEndian>(new_comment_len as u16)?;
    // 2. дописать запись после существующего комментария
    f.seek(SeekFrom::Start(
        eocd_offset + (ZIP_EOCD_REC_MIN_SIZE + existing_comment_len) as u64,
    ))?;
    f.write_all(comment)?;
    f.write_u16::<LittleEndian>(comment.len() as u16)?;
    f.write_all(V1_MAGIC)?;
    f.sync_all()?;

    Ok(WriteOutcome::Written)
}

/// Прочитать канал из хвоста комментария. None — записи нет.
pub fn read_channel(apk: &Path) -> Result<Option<String>> {
    let mut f = File::open(apk).with_context(|| format!("open apk {}", apk.display()))?;
    let len = f.metadata()?.len();
    let tail = (V1_MAGIC.len() + V1_LEN_FIELD_SIZE) as u64;
    if len < tail {
        return Ok(None);
    }

    let mut magic = [0u8; 8];
    f.seek(SeekFrom::Start(len - V1_MAGIC.len() as u64))?;
    f.read_exact(&mut magic)?;
    if &magic != V1_MAGIC {
        return Ok(None);
    }

    f.seek(SeekFrom::Start(len - tail))?;
    let channel_len = f.read_u16::<LittleEndian>()? as u64;
    if channel_len == 0 || len < tail + channel_len {
        bail!(
            "malformed v1 channel record in {}: channel length {}",
            apk.display(),
            channel_len
        );
    }

    let mut bytes = vec![0u8; channel_len as usize];
    f.seek(SeekFrom::Start(len - tail - channel_len))?;
    f.read_exact(&mut bytes)?;
    let channel = String::from_utf8(bytes)
        .with_context(|| format!("v1 channel in {} is not valid UTF-8", apk.display()))?;
    Ok(Some(channel))
}

/// Убрать канальную запись: укоротить файл на её длину и вернуть
/// comment_len к прежнему значению. false — записи не было.
pub fn remove_channel(apk: &Path) -> Result<bool> {
    let channel = match read_channel(apk)? {
        Some(c) => c,
        None => {
            debug!("apk {} has no v1 channel record", apk.display());
            return Ok(false);
        }
    };

    let mut f = open_rw(apk)?;
    let len = f.metadata()?.len();
    let (eocd, eocd_offset) = eocd::find(&mut f)?;
    let comment_len = eocd::comment_length(&eocd)?;
    let removed = record_len(channel.len());
    if comment_len < removed {
        bail!(
            "EOCD comment length {} shorter than channel record {} in {}",
            comment_len,
            removed,
            apk.display()
        );
    }

    f.seek(SeekFrom::Start(
        eocd_offset + ZIP_EOCD_COMMENT_LENGTH_OFFSET as u64,
    ))?;
    f.write_u16::<LittleEndian>((comment_len - removed) as u16)?;
    f.set_len(len - removed as u64)?;
    f.sync_all()?;
    info!("removed v1 channel '{}' from {}", channel, apk.display());
    Ok(true)
}

/// Совпадают ли последние байты файла с V1-магией.
pub fn contains_v1_magic(apk: &Path) -> Result<bool> {
    let mut f = File::open(apk).with_context(|| format!("open apk {}", apk.display()))?;
    let len = f.metadata()?.len();
    if len < V1_MAGIC.len() as u64 {
        return Ok(false);
    }
    let mut magic = [0u8; 8];
    f.seek(SeekFrom::Start(len - V1_MAGIC.len() as u64))?;
    f.read_exact(&mut magic)?;
    Ok(&magic == V1_MAGIC)
}

/// Подписан ли пакет по схеме V1: есть запись манифеста и хотя бы один
/// файл подписи META-INF/<word>.SF.
pub fn contains_v1_signature(apk: &Path) -> bool {
    let f = match File::open(apk) {
        Ok(f) => f,
        Err(e) => {
            debug!("open {} failed: {}", apk.display(), e);
            return false;
        }
    };
    let archive = match ::zip::ZipArchive::new(f) {
        Ok(a) => a,
        Err(e) => {
            debug!("read zip entries of {} failed: {}", apk.display(), e);
            return false;
        }
    };

    let mut has_manifest = false;
    let mut has_sf = false;
    for name in archive.file_names() {
        if name == "META-INF/MANIFEST.MF" {
            has_manifest = true;
        } else if is_signature_entry(name) {
            has_sf = true;
        }
    }
    has_manifest && has_sf
}

// META-INF/\w+\.SF
fn is_signature_entry(name: &str) -> bool {
    let Some(rest) = name.strip_prefix("META-INF/") else {
        return false;
    };
    let Some(stem) = rest.strip_suffix(".SF") else {
        return false;
    };
    !stem.is_empty() && stem.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_entry_pattern() {
        assert!(is_signature_entry("META-INF/CERT.SF"));
        assert!(is_signature_entry("META-INF/MY_KEY0.SF"));
        assert!(!is_signature_entry("META-INF/CERT.RSA"));
        assert!(!is_signature_entry("META-INF/sub/CERT.SF"));
        assert!(!is_signature_entry("META-INF/.SF"));
        assert!(!is_signature_entry("CERT.SF"));
    }

    #[test]
    fn record_len_formula() {
        assert_eq!(record_len(2), 2 + 2 + 8);
    }
}
