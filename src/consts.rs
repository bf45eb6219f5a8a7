//! Общие константы контейнера ZIP/APK и канального блока.
//!
//! Все числовые поля в APK — little-endian. Значения ID и магические
//! байты зафиксированы платформой Android и инструментом подписи,
//! менять их нельзя.

// -------- ZIP End of Central Directory --------
pub const ZIP_EOCD_REC_SIG: u32 = 0x0605_4b50;
pub const ZIP_EOCD_REC_MIN_SIZE: usize = 22;
// Layout EOCD (LE):
// [sig u32][disk u16][cd_disk u16][cd_count_disk u16][cd_count u16]
// [cd_size u32][cd_offset u32][comment_len u16][comment ...]
pub const ZIP_EOCD_CENTRAL_DIR_SIZE_OFFSET: usize = 12;
pub const ZIP_EOCD_CENTRAL_DIR_OFFSET_OFFSET: usize = 16;
pub const ZIP_EOCD_COMMENT_LENGTH_OFFSET: usize = 20;
pub const UINT16_MAX_VALUE: usize = 0xffff;

// -------- ZIP64 --------
// Локатор ZIP64 EOCD стоит сразу перед обычным EOCD. ZIP64 мы не
// поддерживаем: при обнаружении локатора разбор прекращается с ошибкой.
pub const ZIP64_EOCD_LOCATOR_SIZE: u64 = 20;
pub const ZIP64_EOCD_LOCATOR_SIG: u32 = 0x0706_4b50;

// -------- APK Signing Block --------
// Footer (24 байта, завершается ровно на cd_offset):
// [size u64][magic u128], magic = "APK Sig Block 42".
pub const APK_SIG_BLOCK_MAGIC_LO: u64 = 0x2067_6953_204b_5041;
pub const APK_SIG_BLOCK_MAGIC_HI: u64 = 0x3234_206b_636f_6c42;
pub const APK_SIG_BLOCK_MIN_SIZE: u64 = 32;
pub const APK_SIG_BLOCK_FOOTER_SIZE: usize = 24;

// ID-Value записи внутри signing block:
// [len u64][id u32][value (len-4) bytes]
pub const APK_SIGNATURE_SCHEME_V2_BLOCK_ID: u32 = 0x7109_871a;
pub const APK_SIGNATURE_SCHEME_V3_BLOCK_ID: u32 = 0xf053_68c0;
// Padding-запись, выравнивающая signing block по границе страницы
// (введена вместе с v3/verity). Пересобирается при каждой мутации.
pub const VERITY_PADDING_BLOCK_ID: u32 = 0x4272_6577;
pub const ANDROID_COMMON_PAGE_ALIGNMENT_BYTES: u64 = 4096;

// -------- Канальная запись --------
// Зарезервированный ID канального значения в signing block.
pub const CHANNEL_BLOCK_ID: u32 = 0x8811_55ff;
// Хвостовой маркер канальной записи в ZIP-комментарии (схема V1):
// [channel bytes][len u16 LE][V1_MAGIC].
pub const V1_MAGIC: &[u8; 8] = b"ltlovezh";
pub const V1_LEN_FIELD_SIZE: usize = 2;

// -------- Режим низкой памяти --------
// APK крупнее этого порога не буферизуется целиком: content-регион
// пропускается, канал пишется поверх уже скопированного файла.
pub const LOW_MEMORY_APK_SIZE: u64 = 512 * 1024 * 1024;
