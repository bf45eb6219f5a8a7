//! idvalue — чистый кодек последовательности ID-Value внутри
//! APK Signing Block. Никакого I/O, только арифметика над буферами.
//!
//! Формат блока (LE):
//! [size u64 (без этого поля)]
//! repeated: [len u64][id u32][value (len-4) bytes]
//! [size u64 (та же)][magic u128]
//!
//! Карта упорядоченная, ключи уникальны: повторная вставка заменяет
//! значение на месте, сохраняя позицию. Padding-запись (verity) при
//! кодировании всегда выбрасывается и пересчитывается заново, чтобы
//! (size + 8) было кратно 4096.

use anyhow::{bail, Result};
use byteorder::{ByteOrder, LittleEndian};

use crate::consts::*;

/// Упорядоченная карта id -> value записей signing block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdValueMap {
    entries: Vec<(u32, Vec<u8>)>,
}

impl IdValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.iter().any(|(k, _)| *k == id)
    }

    pub fn get(&self, id: u32) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(k, _)| *k == id)
            .map(|(_, v)| v.as_slice())
    }

    /// Вставить значение. Существующий ключ заменяется на месте
    /// (позиция в последовательности сохраняется).
    pub fn insert(&mut self, id: u32, value: Vec<u8>) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == id) {
            slot.1 = value;
        } else {
            self.entries.push((id, value));
        }
    }

    /// Удалить запись; вернуть прежнее значение, если оно было.
    pub fn remove(&mut self, id: u32) -> Option<Vec<u8>> {
        let idx = self.entries.iter().position(|(k, _)| *k == id)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.entries.iter().map(|(k, v)| (*k, v.as_slice()))
    }
}

/// Разобрать полный signing block (включая size-префикс и footer).
pub fn decode(block: &[u8]) -> Result<IdValueMap> {
    if (block.len() as u64) < APK_SIG_BLOCK_MIN_SIZE {
        bail!(
            "APK Signing Block too small: {} bytes (min {})",
            block.len(),
            APK_SIG_BLOCK_MIN_SIZE
        );
    }

    // size-префикс (8) и footer (24) кодеку не принадлежат.
    let mut pairs = &block[8..block.len() - APK_SIG_BLOCK_FOOTER_SIZE];
    let mut map = IdValueMap::new();
    let mut entry_count = 0usize;

    while !pairs.is_empty() {
        entry_count += 1;
        if pairs.len() < 8 {
            bail!(
                "insufficient data to read size of APK Signing Block entry #{}",
                entry_count
            );
        }
        let len = LittleEndian::read_u64(&pairs[..8]);
        pairs = &pairs[8..];
        if len < 4 || len > pairs.len() as u64 {
            bail!(
                "APK Signing Block entry #{} size out of range: {} (available {})",
                entry_count,
                len,
                pairs.len()
            );
        }
        let len = len as usize;
        let id = LittleEndian::read_u32(&pairs[..4]);
        map.insert(id, pairs[4..len].to_vec());
        pairs = &pairs[len..];
    }

    if map.is_empty() {
        bail!("no Id-Value pairs in APK Signing Block");
    }
    Ok(map)
}

/// Собрать signing block из карты. Padding-запись входной карты
/// игнорируется и пересчитывается заново; карта не мутируется.
pub fn encode(map: &IdValueMap) -> Result<Vec<u8>> {
    if map.is_empty() {
        bail!("cannot encode empty Id-Value map");
    }

    // size без первого 8-байтового поля: footer (24) + записи.
    let mut size: u64 = APK_SIG_BLOCK_FOOTER_SIZE as u64;
    for (id, value) in map.iter() {
        if id == VERITY_PADDING_BLOCK_ID {
            continue;
        }
        size += 8 + 4 + value.len() as u64;
    }

    // Padding пересчитывается только если он был в исходной карте:
    // блок без verity-записи остаётся без выравнивания.
    let mut pad_value_len: Option<usize> = None;
    if map.contains(VERITY_PADDING_BLOCK_ID) {
        let remainder = (size + 8) % ANDROID_COMMON_PAGE_ALIGNMENT_BYTES;
        if remainder != 0 {
            let mut padding = ANDROID_COMMON_PAGE_ALIGNMENT_BYTES - remainder;
            // Сама padding-запись стоит минимум 12 байт ([len][id]).
            if padding < 8 + 4 {
                padding += ANDROID_COMMON_PAGE_ALIGNMENT_BYTES;
            }
            size += padding;
            pad_value_len = Some((padding - 8 - 4) as usize);
        }
    }

    let total = (size + 8) as usize;
    let mut out = Vec::with_capacity(total);
    let mut buf8 = [0u8; 8];
    let mut buf4 = [0u8; 4];

    LittleEndian::write_u64(&mut buf8, size);
    out.extend_from_slice(&buf8);

    for (id, value) in map.iter() {
        if id == VERITY_PADDING_BLOCK_ID {
            continue;
        }
        LittleEndian::write_u64(&mut buf8, value.len() as u64 + 4);
        out.extend_from_slice(&buf8);
        LittleEndian::write_u32(&mut buf4, id);
        out.extend_from_slice(&buf4);
        out.extend_from_slice(value);
    }

    if let Some(pad_len) = pad_value_len {
        LittleEndian::write_u64(&mut buf8, pad_len as u64 + 4);
        out.extend_from_slice(&buf8);
        LittleEndian::write_u32(&mut buf4, VERITY_PADDING_BLOCK_ID);
        out.extend_from_slice(&buf4);
        out.resize(out.len() + pad_len, 0);
    }

    LittleEndian::write_u64(&mut buf8, size);
    out.extend_from_slice(&buf8);
    LittleEndian::write_u64(&mut buf8, APK_SIG_BLOCK_MAGIC_LO);
    out.extend_from_slice(&buf8);
    LittleEndian::write_u64(&mut buf8, APK_SIG_BLOCK_MAGIC_HI);
    out.extend_from_slice(&buf8);

    if out.len() != total {
        bail!(
            "signing block assembly mismatch: {} bytes, expected {}",
            out.len(),
            total
        );
    }
    Ok(out)
}
