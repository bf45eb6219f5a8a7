//! eocd — разбор конца ZIP-контейнера (EOCD) без интерпретации записей.
//!
//! EOCD ищется сканом назад от конца файла в окне
//! min(len, 22 + 65535) байт. Комментарий сам может содержать байты
//! сигнатуры, поэтому кандидат принимается только если его поле
//! comment_len точно закрывает файл: eocd_offset + 22 + comment_len == len.
//!
//! Все поля little-endian. ZIP64 не поддерживается: наличие локатора
//! ZIP64 EOCD перед найденным EOCD — ошибка разбора.

use anyhow::{anyhow, bail, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use crate::consts::*;

/// Найти EOCD: вернуть его байты (с комментарием) и абсолютное смещение.
pub fn find(f: &mut File) -> Result<(Vec<u8>, u64)> {
    let file_len = f.metadata()?.len();
    if file_len < ZIP_EOCD_REC_MIN_SIZE as u64 {
        bail!(
            "not a ZIP archive: file too small for EOCD ({} bytes)",
            file_len
        );
    }

    let window = file_len.min((ZIP_EOCD_REC_MIN_SIZE + UINT16_MAX_VALUE) as u64) as usize;
    let mut buf = vec![0u8; window];
    f.seek(SeekFrom::Start(file_len - window as u64))?;
    f.read_exact(&mut buf)?;

    let max_comment = window - ZIP_EOCD_REC_MIN_SIZE;
    for expected_comment_len in 0..=max_comment {
        let pos = window - ZIP_EOCD_REC_MIN_SIZE - expected_comment_len;
        if LittleEndian::read_u32(&buf[pos..pos + 4]) != ZIP_EOCD_REC_SIG {
            continue;
        }
        let actual_comment_len =
            LittleEndian::read_u16(&buf[pos + ZIP_EOCD_COMMENT_LENGTH_OFFSET..pos + ZIP_EOCD_COMMENT_LENGTH_OFFSET + 2])
                as usize;
        if actual_comment_len == expected_comment_len {
            let eocd_offset = file_len - (window - pos) as u64;
            return Ok((buf[pos..].to_vec(), eocd_offset));
        }
    }

    Err(anyhow!(
        "not an APK file: ZIP End of Central Directory record not found"
    ))
}

/// Есть ли локатор ZIP64 EOCD непосредственно перед EOCD.
pub fn is_zip64_locator_present(f: &mut File, eocd_offset: u64) -> Result<bool> {
    if eocd_offset < ZIP64_EOCD_LOCATOR_SIZE {
        return Ok(false);
    }
    let mut sig = [0u8; 4];
    f.seek(SeekFrom::Start(eocd_offset - ZIP64_EOCD_LOCATOR_SIZE))?;
    f.read_exact(&mut sig)?;
    Ok(LittleEndian::read_u32(&sig) == ZIP64_EOCD_LOCATOR_SIG)
}

#[inline]
fn check_eocd_len(eocd: &[u8]) -> Result<()> {
    if eocd.len() < ZIP_EOCD_REC_MIN_SIZE {
        bail!("EOCD record truncated: {} bytes", eocd.len());
    }
    Ok(())
}

/// Смещение центрального каталога, записанное в EOCD.
pub fn central_dir_offset(eocd: &[u8]) -> Result<u64> {
    check_eocd_len(eocd)?;
    Ok(LittleEndian::read_u32(&eocd[ZIP_EOCD_CENTRAL_DIR_OFFSET_OFFSET..]) as u64)
}

/// Размер центрального каталога, записанный в EOCD.
pub fn central_dir_size(eocd: &[u8]) -> Result<u64> {
    check_eocd_len(eocd)?;
    Ok(LittleEndian::read_u32(&eocd[ZIP_EOCD_CENTRAL_DIR_SIZE_OFFSET..]) as u64)
}

/// Длина ZIP-комментария, записанная в EOCD.
pub fn comment_length(eocd: &[u8]) -> Result<usize> {
    check_eocd_len(eocd)?;
    Ok(LittleEndian::read_u16(&eocd[ZIP_EOCD_COMMENT_LENGTH_OFFSET..]) as usize)
}

/// Переписать смещение центрального каталога в EOCD (in-place).
pub fn set_central_dir_offset(eocd: &mut [u8], offset: u64) -> Result<()> {
    check_eocd_len(eocd)?;
    if offset > u32::MAX as u64 {
        bail!("central directory offset {} does not fit in 32 bits", offset);
    }
    LittleEndian::write_u32(
        &mut eocd[ZIP_EOCD_CENTRAL_DIR_OFFSET_OFFSET..ZIP_EOCD_CENTRAL_DIR_OFFSET_OFFSET + 4],
        offset as u32,
    );
    Ok(())
}

/// Смещение центрального каталога с проверкой смежности:
/// cd_offset + cd_size должно равняться eocd_offset.
pub fn central_dir_offset_checked(eocd: &[u8], eocd_offset: u64) -> Result<u64> {
    let cd_offset = central_dir_offset(eocd)?;
    if cd_offset >= eocd_offset {
        bail!(
            "ZIP Central Directory offset out of range: {} (EOCD at {})",
            cd_offset,
            eocd_offset
        );
    }
    let cd_size = central_dir_size(eocd)?;
    if cd_offset + cd_size != eocd_offset {
        bail!("ZIP Central Directory is not immediately followed by End of Central Directory");
    }
    Ok(cd_offset)
}
