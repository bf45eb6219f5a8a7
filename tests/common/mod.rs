//! Общие фикстуры интеграционных тестов: сборка минимальных APK
//! с JAR-подписью и с APK Signing Block.
#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chankit::consts::{APK_SIGNATURE_SCHEME_V2_BLOCK_ID, VERITY_PADDING_BLOCK_ID};
use chankit::eocd;
use chankit::idvalue::{self, IdValueMap};

/// Уникальный корень под временные файлы одного теста.
pub fn temp_root(tag: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let root = std::env::temp_dir().join(format!(
        "chankit-it-{}-{}-{}",
        tag,
        std::process::id(),
        nanos
    ));
    fs::create_dir_all(&root).unwrap();
    root
}

/// Собрать минимальный ZIP. С jar_signed=true кладутся записи
/// META-INF/MANIFEST.MF и META-INF/CERT.SF, по которым определяется
/// V1-подпись.
pub fn write_apk(path: &Path, jar_signed: bool) {
    let f = File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(f);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);

    zip.start_file("classes.dex", options).unwrap();
    zip.write_all(b"dex\n035\0fixture payload").unwrap();
    zip.start_file("resources.arsc", options).unwrap();
    zip.write_all(&[0u8; 256]).unwrap();

    if jar_signed {
        zip.start_file("META-INF/MANIFEST.MF", options).unwrap();
        zip.write_all(b"Manifest-Version: 1.0\n").unwrap();
        zip.start_file("META-INF/CERT.SF", options).unwrap();
        zip.write_all(b"Signature-Version: 1.0\n").unwrap();
        zip.start_file("META-INF/CERT.RSA", options).unwrap();
        zip.write_all(&[0u8; 64]).unwrap();
    }

    zip.finish().unwrap();
}

/// Вставить перед центральным каталогом APK Signing Block с
/// заданными ID-Value записями (плюс пересчитанный padding).
pub fn splice_signing_block(path: &Path, entries: &[(u32, Vec<u8>)]) {
    let bytes = fs::read(path).unwrap();

    let mut f = File::open(path).unwrap();
    let (mut eocd_bytes, eocd_offset) = eocd::find(&mut f).unwrap();
    drop(f);
    let cd_offset = eocd::central_dir_offset(&eocd_bytes).unwrap() as usize;

    let mut map = IdValueMap::new();
    for (id, value) in entries {
        map.insert(*id, value.clone());
    }
    let block = idvalue::encode(&map).unwrap();

    eocd::set_central_dir_offset(&mut eocd_bytes, (cd_offset + block.len()) as u64).unwrap();

    let mut out = Vec::with_capacity(bytes.len() + block.len());
    out.extend_from_slice(&bytes[..cd_offset]);
    out.extend_from_slice(&block);
    out.extend_from_slice(&bytes[cd_offset..eocd_offset as usize]);
    out.extend_from_slice(&eocd_bytes);
    fs::write(path, out).unwrap();
}

/// APK с signing block: фиктивная запись схемы V2 плюс
/// verity padding, выравнивающий блок по странице.
pub fn write_v2_apk(path: &Path) {
    write_apk(path, false);
    splice_signing_block(
        path,
        &[
            (APK_SIGNATURE_SCHEME_V2_BLOCK_ID, vec![0xab; 64]),
            (VERITY_PADDING_BLOCK_ID, Vec::new()),
        ],
    );
}

/// APK с JAR-подписью и без signing block.
pub fn write_v1_apk(path: &Path) {
    write_apk(path, true);
}
