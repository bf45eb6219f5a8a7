//! section — локатор секций APK и снимок четырёх регионов файла.
//!
//! Порядок регионов в подписанном APK строго такой:
//! [content entries][APK Signing Block][central directory][EOCD].
//! Снимок хранит байты регионов с их абсолютными смещениями и
//! проверяет инвариант смежности: регионы стыкуются без дыр и в сумме
//! дают длину файла, а cd_offset внутри EOCD совпадает со смещением
//! региона центрального каталога.
//!
//! Регионы после построения не мутируются: писатели схем V2/V3 строят
//! новые буферы (в т.ч. патченную копию EOCD) и пишут их в файл.

use anyhow::{bail, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::consts::*;
use crate::eocd;

/// Непрерывный кусок файла: абсолютное смещение + байты.
#[derive(Debug, Clone)]
pub struct ByteRegion {
    pub offset: u64,
    pub bytes: Vec<u8>,
}

impl ByteRegion {
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Смещение первого байта за регионом.
    pub fn end(&self) -> u64 {
        self.offset + self.len()
    }
}

/// Снимок секций одного базового APK, переиспользуемый между записями
/// каналов.
#[derive(Debug)]
pub struct ApkSectionInfo {
    pub apk_size: u64,
    pub low_memory: bool,
    /// [0, signing_block.offset); в low-memory режиме не читается.
    pub content_entries: Option<ByteRegion>,
    pub signing_block: ByteRegion,
    pub central_dir: ByteRegion,
    pub eocd: ByteRegion,
}

impl ApkSectionInfo {
    /// Проверить инвариант: регионы смежны, их сумма равна размеру
    /// файла, cd_offset в EOCD указывает на регион центрального
    /// каталога.
    pub fn check(&self) -> Result<()> {
        match (&self.content_entries, self.low_memory) {
            (None, false) => bail!("content entries region missing outside low-memory mode"),
            (Some(c), _) => {
                if c.offset != 0 || c.end() != self.signing_block.offset {
                    bail!(
                        "content entries region [{}, {}) does not abut signing block at {}",
                        c.offset,
                        c.end(),
                        self.signing_block.offset
                    );
                }
            }
            (None, true) => {}
        }
        if self.signing_block.end() != self.central_dir.offset {
            bail!(
                "signing block [{}, {}) does not abut central directory at {}",
                self.signing_block.offset,
                self.signing_block.end(),
                self.central_dir.offset
            );
        }
        if self.central_dir.end() != self.eocd.offset {
            bail!(
                "central directory [{}, {}) does not abut EOCD at {}",
                self.central_dir.offset,
                self.central_dir.end(),
                self.eocd.offset
            );
        }
        if self.eocd.end() != self.apk_size {
            bail!(
                "EOCD [{}, {}) does not end at file size {}",
                self.eocd.offset,
                self.eocd.end(),
                self.apk_size
            );
        }
        self.check_eocd_central_dir_offset()
    }

    /// Смещение каталога, записанное в EOCD, должно совпадать с
    /// фактическим смещением региона.
    pub fn check_eocd_central_dir_offset(&self) -> Result<()> {
        let recorded = eocd::central_dir_offset(&self.eocd.bytes)?;
        if recorded != self.central_dir.offset {
            bail!(
                "central directory offset mismatch: EOCD records {}, region at {}",
                recorded,
                self.central_dir.offset
            );
        }
        Ok(())
    }
}

/// Найти APK Signing Block перед центральным каталогом и прочитать его
/// целиком (включая size-префикс и footer).
pub fn find_apk_signing_block(f: &mut File, central_dir_offset: u64) -> Result<ByteRegion> {
    // FORMAT:
    // @+0  uint64: size in bytes (excluding this field)
    // @+8  payload
    // @-24 uint64: size (same as above)
    // @-16 uint128: magic
    if central_dir_offset < APK_SIG_BLOCK_MIN_SIZE {
        bail!(
            "APK too small for APK Signing Block: central directory at {}",
            central_dir_offset
        );
    }

    let mut footer = [0u8; APK_SIG_BLOCK_FOOTER_SIZE];
    f.seek(SeekFrom::Start(central_dir_offset - APK_SIG_BLOCK_FOOTER_SIZE as u64))?;
    f.read_exact(&mut footer)?;
    if LittleEndian::read_u64(&footer[8..16]) != APK_SIG_BLOCK_MAGIC_LO
        || LittleEndian::read_u64(&footer[16..24]) != APK_SIG_BLOCK_MAGIC_HI
    {
        bail!("no APK Signing Block before ZIP Central Directory");
    }

    let size_in_footer = LittleEndian::read_u64(&footer[..8]);
    if size_in_footer < APK_SIG_BLOCK_FOOTER_SIZE as u64 || size_in_footer > i64::MAX as u64 - 8 {
        bail!("APK Signing Block size out of range: {}", size_in_footer);
    }
    let total_size = size_in_footer + 8;
    if total_size > central_dir_offset {
        bail!(
            "APK Signing Block offset out of range: block size {} exceeds central directory offset {}",
            total_size,
            central_dir_offset
        );
    }
    let block_offset = central_dir_offset - total_size;

    let mut bytes = vec![0u8; total_size as usize];
    f.seek(SeekFrom::Start(block_offset))?;
    f.read_exact(&mut bytes)?;

    let size_in_header = LittleEndian::read_u64(&bytes[..8]);
    if size_in_header != size_in_footer {
        bail!(
            "APK Signing Block sizes in header and footer do not match: {} vs {}",
            size_in_header,
            size_in_footer
        );
    }

    Ok(ByteRegion {
        offset: block_offset,
        bytes,
    })
}

/// Прочитать signing block по пути (для read/detect без снимка).
pub fn read_signing_block(apk: &Path) -> Result<ByteRegion> {
    let mut f = File::open(apk).with_context(|| format!("open apk {}", apk.display()))?;
    let (eocd, eocd_offset) = eocd::find(&mut f)?;
    if eocd::is_zip64_locator_present(&mut f, eocd_offset)? {
        bail!("ZIP64 APK not supported");
    }
    let central_dir_offset = eocd::central_dir_offset_checked(&eocd, eocd_offset)?;
    find_apk_signing_block(&mut f, central_dir_offset)
}

fn read_region(f: &mut File, offset: u64, len: u64) -> Result<ByteRegion> {
    let mut bytes = vec![0u8; len as usize];
    f.seek(SeekFrom::Start(offset))?;
    f.read_exact(&mut bytes)?;
    Ok(ByteRegion { offset, bytes })
}

/// Построить снимок секций базового APK.
///
/// low_memory=false просит буферизовать и content-регион; файл крупнее
/// LOW_MEMORY_APK_SIZE принудительно переводится в low-memory режим.
pub fn locate(apk: &Path, low_memory: bool) -> Result<ApkSectionInfo> {
    let mut f = File::open(apk).with_context(|| format!("open apk {}", apk.display()))?;
    let apk_size = f.metadata()?.len();

    let (eocd_bytes, eocd_offset) = eocd::find(&mut f)?;
    if eocd::is_zip64_locator_present(&mut f, eocd_offset)? {
        bail!("ZIP64 APK not supported");
    }
    let central_dir_offset = eocd::central_dir_offset_checked(&eocd_bytes, eocd_offset)?;

    let signing_block = find_apk_signing_block(&mut f, central_dir_offset)?;

    let mut low_memory = low_memory;
    if apk_size > LOW_MEMORY_APK_SIZE && !low_memory {
        // Переопределяем явную просьбу вызывающего: буфер такого
        // размера не выделяем.
        warn!(
            "apk {} is {} bytes (> {}), forcing low-memory mode",
            apk.display(),
            apk_size,
            LOW_MEMORY_APK_SIZE
        );
        low_memory = true;
    }

    let content_entries = if low_memory {
        None
    } else {
        Some(read_region(&mut f, 0, signing_block.offset)?)
    };
    let central_dir = read_region(&mut f, central_dir_offset, eocd_offset - central_dir_offset)?;
    let eocd = ByteRegion {
        offset: eocd_offset,
        bytes: eocd_bytes,
    };

    let info = ApkSectionInfo {
        apk_size,
        low_memory,
        content_entries,
        signing_block,
        central_dir,
        eocd,
    };
    info.check()?;
    debug!(
        "located sections of {}: signing block [{}, {}), central dir [{}, {}), eocd [{}, {})",
        apk.display(),
        info.signing_block.offset,
        info.signing_block.end(),
        info.central_dir.offset,
        info.central_dir.end(),
        info.eocd.offset,
        info.eocd.end()
    );
    Ok(info)
}
